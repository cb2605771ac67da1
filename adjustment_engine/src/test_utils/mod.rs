//! Helpers for integration tests and behaviour scenarios.
pub mod ledger;
pub mod prepare_env;

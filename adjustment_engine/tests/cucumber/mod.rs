mod adjustment_world;
mod setups;
mod steps;

pub use adjustment_world::{AdjustmentSystem, AdjustmentWorld};

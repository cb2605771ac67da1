use std::{sync::Arc, time::Duration};

use log::*;
use oms_common::{
    helpers::parse_number,
    Secret,
};
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION},
    Client,
};

use crate::{
    db_types::LedgerNotification,
    ledger::{LedgerClient, LedgerError},
};

const DEFAULT_LEDGER_URL: &str = "http://localhost:8480/api";
const DEFAULT_LEDGER_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Base URL of the ledger's API
    pub url: String,
    pub api_token: Secret<String>,
    pub timeout: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_LEDGER_URL.to_string(),
            api_token: Secret::default(),
            timeout: Duration::from_millis(DEFAULT_LEDGER_TIMEOUT_MS),
        }
    }
}

impl LedgerConfig {
    pub fn new_from_env_or_default() -> Self {
        let url = std::env::var("OMS_LEDGER_URL").unwrap_or_else(|_| {
            warn!("📒️ OMS_LEDGER_URL not set, using {DEFAULT_LEDGER_URL} as default");
            DEFAULT_LEDGER_URL.to_string()
        });
        let api_token = Secret::new(std::env::var("OMS_LEDGER_API_TOKEN").unwrap_or_else(|_| {
            warn!("📒️ OMS_LEDGER_API_TOKEN not set. Ledger requests will be sent without credentials");
            String::default()
        }));
        let timeout_ms = parse_number(std::env::var("OMS_LEDGER_TIMEOUT_MS").ok(), DEFAULT_LEDGER_TIMEOUT_MS)
            .unwrap_or_else(|e| {
                warn!("📒️ Invalid OMS_LEDGER_TIMEOUT_MS. {e}. Using {DEFAULT_LEDGER_TIMEOUT_MS}ms");
                DEFAULT_LEDGER_TIMEOUT_MS
            });
        Self { url, api_token, timeout: Duration::from_millis(timeout_ms) }
    }
}

/// Submits receivable adjustments to the ledger's REST API as JSON.
#[derive(Clone)]
pub struct HttpLedgerClient {
    config: LedgerConfig,
    client: Arc<Client>,
}

impl HttpLedgerClient {
    pub fn new(config: LedgerConfig) -> Result<Self, LedgerError> {
        let mut headers = HeaderMap::with_capacity(2);
        if !config.api_token.reveal().is_empty() {
            let bearer = format!("Bearer {}", config.api_token.reveal());
            let mut val = HeaderValue::from_str(&bearer).map_err(|e| LedgerError::Initialization(e.to_string()))?;
            val.set_sensitive(true);
            headers.insert(AUTHORIZATION, val);
        }
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|e| LedgerError::Initialization(e.to_string()))?;
        Ok(Self { config, client: Arc::new(client) })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.url.trim_end_matches('/'))
    }
}

impl LedgerClient for HttpLedgerClient {
    async fn submit_adjustment(&self, notification: &LedgerNotification) -> Result<(), LedgerError> {
        let url = self.url("/receivable-adjustments");
        trace!("📒️ Submitting receivable adjustment {} to {url}", notification.reference_id);
        let response = self
            .client
            .post(url)
            .json(notification)
            .send()
            .await
            .map_err(|e| LedgerError::Transport(e.to_string()))?;
        if response.status().is_success() {
            debug!(
                "📒️ Ledger accepted {} {} for order {} ({})",
                notification.category,
                notification.amount,
                notification.order_id,
                response.status()
            );
            Ok(())
        } else {
            let status = response.status().as_u16();
            let message = response.text().await.map_err(|e| LedgerError::Transport(e.to_string()))?;
            warn!("📒️ Ledger rejected adjustment {}. {status}: {message}", notification.reference_id);
            Err(LedgerError::Rejected { status, message })
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn urls_are_joined_without_double_slashes() {
        let config = LedgerConfig { url: "https://ledger.example.com/v1/".into(), ..Default::default() };
        let client = HttpLedgerClient::new(config).unwrap();
        assert_eq!(client.url("/receivable-adjustments"), "https://ledger.example.com/v1/receivable-adjustments");
    }

    #[test]
    fn tokens_are_not_logged() {
        let config = LedgerConfig { api_token: Secret::new("tok_123".into()), ..Default::default() };
        assert!(!format!("{config:?}").contains("tok_123"));
        assert!(HttpLedgerClient::new(config).is_ok());
    }
}

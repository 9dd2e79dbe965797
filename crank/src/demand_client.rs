//! Peer host client
//!
//! Fetches payment details from the ad server that sent us a transaction.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use crate::types::{AccountAddress, PaymentDetail};

const HTTP_NOT_FOUND: u16 = 404;

#[derive(Debug, Clone, thiserror::Error)]
pub enum DemandError {
    #[error("Empty inventory for transaction {0}")]
    EmptyInventory(String),
    #[error("Unexpected response {status}: {body}")]
    UnexpectedResponse { status: u16, body: String },
    #[error("Network error: {0}")]
    Network(String),
    #[error("Parse error: {0}")]
    Parse(String),
}

impl DemandError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DemandError::UnexpectedResponse { status, .. } if *status == HTTP_NOT_FOUND)
    }
}

#[async_trait]
pub trait DemandClient: Send + Sync {
    /// Fetch the events `host` paid for with transaction `txid`
    async fn fetch_payment_details(
        &self,
        host: &str,
        txid: &str,
    ) -> Result<Vec<PaymentDetail>, DemandError>;
}

/// HTTP client for peer hosts
pub struct HttpDemandClient {
    client: reqwest::Client,
    platform_address: AccountAddress,
}

impl HttpDemandClient {
    pub fn new(platform_address: AccountAddress, timeout: Duration) -> Result<Self, DemandError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DemandError::Network(e.to_string()))?;

        Ok(Self { client, platform_address })
    }
}

#[async_trait]
impl DemandClient for HttpDemandClient {
    async fn fetch_payment_details(
        &self,
        host: &str,
        txid: &str,
    ) -> Result<Vec<PaymentDetail>, DemandError> {
        let url = payment_details_url(host, txid, &self.platform_address);
        debug!("Fetching payment details: {}", url);

        let response = self.client
            .get(&url)
            .send()
            .await
            .map_err(|e| DemandError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response.text().await
            .map_err(|e| DemandError::Network(e.to_string()))?;

        if status != 200 {
            return Err(DemandError::UnexpectedResponse { status, body });
        }

        parse_payment_details(txid, &body)
    }
}

pub fn payment_details_url(host: &str, txid: &str, address: &AccountAddress) -> String {
    format!("{}/payment-details/{}/{}", host.trim_end_matches('/'), txid, address)
}

/// Decode a peer response; an empty list means there is nothing to pay for
pub fn parse_payment_details(txid: &str, body: &str) -> Result<Vec<PaymentDetail>, DemandError> {
    let details: Vec<PaymentDetail> = serde_json::from_str(body)
        .map_err(|e| DemandError::Parse(e.to_string()))?;

    if details.is_empty() {
        return Err(DemandError::EmptyInventory(txid.to_string()));
    }
    Ok(details)
}

//! ADS node gateway
//!
//! Talks JSON-RPC to the node's RPC service to drive block synchronization
//! and fetch transaction bodies.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::types::{AdsTransaction, Wire, CLICKS_PER_ADS};

/// Node error code reported while a block signature is not yet available
pub const GET_SIGNATURE_UNAVAILABLE: i64 = 90;

/// Fractional digits of an ADS amount
const AMOUNT_DECIMALS: usize = 11;

#[derive(Debug, Clone, thiserror::Error)]
pub enum AdsError {
    #[error("Command error {code}: {message}")]
    Command { code: i64, message: String },
    #[error("Network error: {0}")]
    Network(String),
    #[error("Parse error: {0}")]
    Parse(String),
}

impl AdsError {
    /// Transient error raised while block headers are synced but signatures are not
    pub fn is_signature_unavailable(&self) -> bool {
        matches!(self, AdsError::Command { code, .. } if *code == GET_SIGNATURE_UNAVAILABLE)
    }
}

/// Operations the crank needs from an ADS node
#[async_trait]
pub trait AdsNode: Send + Sync {
    /// Advance the node's block cursor, returning how many blocks were updated
    async fn get_block_ids(&self) -> Result<u64, AdsError>;

    /// Fetch a transaction body by id
    async fn get_transaction(&self, txid: &str) -> Result<AdsTransaction, AdsError>;
}

/// JSON-RPC client for the node
pub struct AdsRpcClient {
    client: reqwest::Client,
    rpc_url: String,
}

impl AdsRpcClient {
    pub fn new(rpc_url: String, timeout: Duration) -> Result<Self, AdsError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AdsError::Network(e.to_string()))?;

        Ok(Self { client, rpc_url })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, AdsError> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        debug!("Calling {} on {}", method, self.rpc_url);

        let response = self.client
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AdsError::Network(e.to_string()))?;

        let json: Value = response.json().await
            .map_err(|e| AdsError::Parse(e.to_string()))?;

        parse_rpc_response(json)
    }
}

#[async_trait]
impl AdsNode for AdsRpcClient {
    async fn get_block_ids(&self) -> Result<u64, AdsError> {
        let result = self.call("get_block_ids", serde_json::json!({})).await?;
        lenient_u64(&result["updated_blocks"])
            .ok_or_else(|| AdsError::Parse("No updated_blocks in response".to_string()))
    }

    async fn get_transaction(&self, txid: &str) -> Result<AdsTransaction, AdsError> {
        let result = self.call("get_transaction", serde_json::json!({ "txid": txid })).await?;
        parse_transaction(&result["txn"])
    }
}

/// Unwrap a JSON-RPC envelope into its `result`
pub fn parse_rpc_response(json: Value) -> Result<Value, AdsError> {
    if let Some(error) = json.get("error").filter(|e| !e.is_null()) {
        let code = error["code"].as_i64()
            .ok_or_else(|| AdsError::Parse(format!("Malformed error: {}", error)))?;
        let message = error["message"].as_str().unwrap_or_default().to_string();
        return Err(AdsError::Command { code, message });
    }

    match json.get("result") {
        Some(result) if !result.is_null() => Ok(result.clone()),
        _ => Err(AdsError::Parse("No result in response".to_string())),
    }
}

/// Decode a `txn` object into a typed transaction
pub fn parse_transaction(txn: &Value) -> Result<AdsTransaction, AdsError> {
    let kind = txn["type"].as_str()
        .ok_or_else(|| AdsError::Parse("Transaction without type".to_string()))?;

    match kind {
        "send_one" => Ok(AdsTransaction::SendOne {
            sender_address: required_str(txn, "sender_address")?,
            target_address: required_str(txn, "target_address")?,
            amount: parse_clicks(&required_str(txn, "amount")?)?,
            message: txn["message"].as_str().unwrap_or_default().to_string(),
        }),
        "send_many" => {
            let wires = match txn["wires"].as_array() {
                Some(wires) => wires
                    .iter()
                    .map(|wire| {
                        Ok(Wire {
                            target_address: required_str(wire, "target_address")?,
                            amount: parse_clicks(&required_str(wire, "amount")?)?,
                        })
                    })
                    .collect::<Result<Vec<_>, AdsError>>()?,
                None => Vec::new(),
            };
            Ok(AdsTransaction::SendMany { wires })
        }
        other => Ok(AdsTransaction::Other { kind: other.to_string() }),
    }
}

/// Convert a decimal ADS amount (e.g. `"1.50000000000"`) to clicks
pub fn parse_clicks(amount: &str) -> Result<i64, AdsError> {
    let invalid = || AdsError::Parse(format!("Invalid amount: {}", amount));

    let (negative, unsigned) = match amount.trim().strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, amount.trim()),
    };
    let (whole, fraction) = unsigned.split_once('.').unwrap_or((unsigned, ""));

    if whole.is_empty()
        || fraction.len() > AMOUNT_DECIMALS
        || !whole.chars().all(|c| c.is_ascii_digit())
        || !fraction.chars().all(|c| c.is_ascii_digit())
    {
        return Err(invalid());
    }

    let whole: i64 = whole.parse().map_err(|_| invalid())?;
    let fraction: i64 = if fraction.is_empty() {
        0
    } else {
        format!("{:0<width$}", fraction, width = AMOUNT_DECIMALS)
            .parse()
            .map_err(|_| invalid())?
    };

    let clicks = whole
        .checked_mul(CLICKS_PER_ADS)
        .and_then(|c| c.checked_add(fraction))
        .ok_or_else(invalid)?;

    Ok(if negative { -clicks } else { clicks })
}

fn required_str(value: &Value, field: &str) -> Result<String, AdsError> {
    value[field]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| AdsError::Parse(format!("Missing field: {}", field)))
}

/// The node encodes most numbers as strings
fn lenient_u64(value: &Value) -> Option<u64> {
    value.as_u64().or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

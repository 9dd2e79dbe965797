//! Block synchronization
//!
//! The node must have every pending block before transaction bodies can be
//! queried, so a run syncs until the node reports no updated blocks.

use std::time::Duration;
use tracing::{info, warn};

use crate::ads_client::{AdsError, AdsNode};

/// Retry budget for transient "signature unavailable" errors
#[derive(Debug, Clone)]
pub struct SyncPolicy {
    /// Total attempts allowed across the whole sync
    pub max_attempts: u32,
    /// Fixed delay before retrying
    pub retry_delay: Duration,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_delay: Duration::from_secs(3),
        }
    }
}

/// Drive the node until no blocks are updated
///
/// Returns the total number of updated blocks. Any error other than a
/// signature-unavailable one, or running out of attempts, is returned as is.
pub async fn update_block_ids(node: &dyn AdsNode, policy: &SyncPolicy) -> Result<u64, AdsError> {
    let mut attempt = 0u32;
    let mut total = 0u64;

    loop {
        match node.get_block_ids().await {
            Ok(updated_blocks) => {
                info!("Updated blocks: {}", updated_blocks);
                if updated_blocks == 0 {
                    return Ok(total);
                }
                total += updated_blocks;
            }
            Err(e) if e.is_signature_unavailable() => {
                attempt += 1;
                if attempt >= policy.max_attempts {
                    return Err(e);
                }
                warn!(
                    "Signature unavailable (attempt {}/{}), retrying in {:?}",
                    attempt, policy.max_attempts, policy.retry_delay
                );
                tokio::time::sleep(policy.retry_delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

//! Core crank logic
//!
//! Syncs the node, then classifies every NEW incoming payment into a user
//! deposit, an event payment, a reserved payment or an invalid one. Anything
//! that fails for a transient reason stays NEW and is retried on the next run.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use sqlx::{Pool, Sqlite};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    ads_client::{AdsError, AdsNode},
    db,
    demand_client::{DemandClient, DemandError},
    ledger::{self, LedgerError},
    payment_details::{DetailsError, PaymentDetailsProcessor},
    sync::{self, SyncPolicy},
    types::{AccountAddress, AdsPayment, AdsTransaction, LedgerEntryType, PaymentStatus, UserLedgerEntry, Wire},
};

pub const EXIT_CODE_SUCCESS: u8 = 0;
pub const EXIT_CODE_CANNOT_GET_BLOCK_IDS: u8 = 1;
/// Storage, configuration or setup failure
pub const EXIT_CODE_FAILURE: u8 = 2;

/// Hex characters holding the user uuid at the end of a message
const UUID_HEX_LEN: usize = 32;

/// Result of one processing run
#[derive(Debug)]
pub enum RunOutcome {
    /// Blocks synced and every NEW payment was visited
    Success(RunSummary),
    /// Block sync failed; no payment was touched
    CannotSyncBlocks(AdsError),
}

impl RunOutcome {
    pub fn exit_code(&self) -> u8 {
        match self {
            RunOutcome::Success(_) => EXIT_CODE_SUCCESS,
            RunOutcome::CannotSyncBlocks(_) => EXIT_CODE_CANNOT_GET_BLOCK_IDS,
        }
    }
}

/// Per-run counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub updated_blocks: u64,
    pub invalid: u64,
    pub reserved: u64,
    pub event_payments: u64,
    pub user_deposits: u64,
    /// Payments left NEW for a later run
    pub skipped: u64,
}

impl RunSummary {
    fn record(&mut self, outcome: RowOutcome) {
        match outcome {
            RowOutcome::Finalized(PaymentStatus::Invalid) => self.invalid += 1,
            RowOutcome::Finalized(PaymentStatus::Reserved) => self.reserved += 1,
            RowOutcome::Finalized(PaymentStatus::EventPayment) => self.event_payments += 1,
            RowOutcome::Finalized(PaymentStatus::UserDeposit) => self.user_deposits += 1,
            RowOutcome::Finalized(PaymentStatus::New) | RowOutcome::Skipped => self.skipped += 1,
        }
    }
}

/// What happened to a single payment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowOutcome {
    Finalized(PaymentStatus),
    Skipped,
}

/// Result of trying to settle a payment as an event payment
enum Resolution {
    /// Nothing to pay for; the payment is reserved
    NotEventPayment,
    Paid,
    /// Transient failure, leave the payment NEW
    Retry,
}

/// The crank runner
pub struct Crank {
    node: Arc<dyn AdsNode>,
    demand_client: Arc<dyn DemandClient>,
    details_processor: Arc<dyn PaymentDetailsProcessor>,
    db_pool: Pool<Sqlite>,
    platform_address: AccountAddress,
    sync_policy: SyncPolicy,
}

impl Crank {
    pub fn new(
        node: Arc<dyn AdsNode>,
        demand_client: Arc<dyn DemandClient>,
        details_processor: Arc<dyn PaymentDetailsProcessor>,
        db_pool: Pool<Sqlite>,
        platform_address: AccountAddress,
        sync_policy: SyncPolicy,
    ) -> Self {
        Self {
            node,
            demand_client,
            details_processor,
            db_pool,
            platform_address,
            sync_policy,
        }
    }

    pub fn platform_address(&self) -> &AccountAddress {
        &self.platform_address
    }

    /// Sync blocks and process every NEW incoming payment
    pub async fn process_incoming_txs(&self) -> Result<RunOutcome, CrankError> {
        info!("Start processing incoming txs");

        let updated_blocks = match sync::update_block_ids(self.node.as_ref(), &self.sync_policy).await {
            Ok(updated_blocks) => updated_blocks,
            Err(e) => {
                error!("Cannot update blocks: {}", e);
                info!("Premature finish processing incoming txs");
                return Ok(RunOutcome::CannotSyncBlocks(e));
            }
        };

        let payments = db::get_new_payments(&self.db_pool).await?;
        info!("Found {} new payments", payments.len());

        let mut summary = RunSummary {
            updated_blocks,
            ..Default::default()
        };

        for payment in &payments {
            let outcome = self.handle_payment(payment).await;
            debug!("Payment {} -> {:?}", payment.txid, outcome);
            summary.record(outcome);
        }

        info!(
            "Finish processing incoming txs: deposits({}) event payments({}) reserved({}) invalid({}) | left new: {}",
            summary.user_deposits, summary.event_payments, summary.reserved, summary.invalid, summary.skipped
        );

        Ok(RunOutcome::Success(summary))
    }

    async fn handle_payment(&self, payment: &AdsPayment) -> RowOutcome {
        let transaction = match self.node.get_transaction(&payment.txid).await {
            Ok(transaction) => transaction,
            Err(e) => {
                warn!("Cannot get transaction [{}] data: {}", payment.txid, e);
                return RowOutcome::Skipped;
            }
        };

        match transaction {
            AdsTransaction::SendMany { wires } => self.handle_send_many(payment, &wires).await,
            AdsTransaction::SendOne { sender_address, target_address, amount, message } => {
                self.handle_send_one(payment, &sender_address, &target_address, amount, &message).await
            }
            AdsTransaction::Other { kind } => {
                debug!("Transaction [{}] has unsupported type {}", payment.txid, kind);
                self.finalize(payment, PaymentStatus::Invalid).await
            }
        }
    }

    async fn handle_send_many(&self, payment: &AdsPayment, wires: &[Wire]) -> RowOutcome {
        let targets_us = wires
            .iter()
            .any(|wire| self.platform_address.matches(&wire.target_address));

        if targets_us {
            self.handle_reserved(payment).await
        } else {
            self.finalize(payment, PaymentStatus::Invalid).await
        }
    }

    async fn handle_send_one(
        &self,
        payment: &AdsPayment,
        sender_address: &str,
        target_address: &str,
        amount: i64,
        message: &str,
    ) -> RowOutcome {
        if !self.platform_address.matches(target_address) {
            return self.finalize(payment, PaymentStatus::Invalid).await;
        }

        let user = match user_uuid_from_message(message) {
            Some(uuid) => match db::fetch_user_by_uuid(&self.db_pool, &uuid).await {
                Ok(user) => user,
                Err(e) => {
                    error!("Cannot look up user for [{}]: {}", payment.txid, e);
                    return RowOutcome::Skipped;
                }
            },
            None => None,
        };

        let Some(user) = user else {
            return self.handle_reserved(payment).await;
        };

        let entry = UserLedgerEntry {
            user_id: user.id,
            amount,
            address_from: sender_address.to_string(),
            address_to: target_address.to_string(),
            txid: payment.txid.clone(),
            entry_type: LedgerEntryType::Deposit,
        };

        match ledger::commit_deposit(&self.db_pool, &entry, payment, now()).await {
            Ok(entry_id) => {
                info!("Deposit [{}] credited to user {} (entry {})", payment.txid, user.id, entry_id);
                RowOutcome::Finalized(PaymentStatus::UserDeposit)
            }
            Err(LedgerError::AlreadyProcessed(txid)) => {
                warn!("Deposit [{}] already processed", txid);
                RowOutcome::Skipped
            }
            Err(e) => {
                error!("Cannot commit deposit [{}]: {}", payment.txid, e);
                RowOutcome::Skipped
            }
        }
    }

    async fn handle_reserved(&self, payment: &AdsPayment) -> RowOutcome {
        match self.resolve_event_payment(payment).await {
            Resolution::NotEventPayment => self.finalize(payment, PaymentStatus::Reserved).await,
            Resolution::Paid => self.finalize(payment, PaymentStatus::EventPayment).await,
            Resolution::Retry => RowOutcome::Skipped,
        }
    }

    async fn resolve_event_payment(&self, payment: &AdsPayment) -> Resolution {
        let network_host = match db::fetch_host_by_address(&self.db_pool, &payment.address).await {
            Ok(Some(network_host)) => network_host,
            Ok(None) => return Resolution::NotEventPayment,
            Err(e) => {
                error!("Cannot look up host for [{}]: {}", payment.txid, e);
                return Resolution::Retry;
            }
        };

        let details = match self.demand_client.fetch_payment_details(&network_host.host, &payment.txid).await {
            Ok(details) => details,
            Err(DemandError::EmptyInventory(_)) => return Resolution::NotEventPayment,
            Err(e) if e.is_not_found() => return Resolution::NotEventPayment,
            Err(e) => {
                warn!("Cannot fetch payment details [{}] from {}: {}", payment.txid, network_host.host, e);
                return Resolution::Retry;
            }
        };

        match self.details_processor.process(&payment.address, payment.id, &details).await {
            Ok(details_summary) => {
                info!(
                    "Event payment [{}] from {}: {} cases paid, {} already paid, {} skipped",
                    payment.txid,
                    network_host.host,
                    details_summary.matched_cases,
                    details_summary.already_paid_cases,
                    details_summary.skipped_cases
                );
                Resolution::Paid
            }
            Err(DetailsError::MissingConfiguration(e)) => {
                error!("Missing initial configuration: {}", e);
                Resolution::Retry
            }
            Err(e) => {
                error!("Unexpected error: {}", e);
                Resolution::Retry
            }
        }
    }

    async fn finalize(&self, payment: &AdsPayment, status: PaymentStatus) -> RowOutcome {
        match db::update_payment_status(&self.db_pool, payment.id, status, now()).await {
            Ok(true) => RowOutcome::Finalized(status),
            Ok(false) => {
                warn!("Payment [{}] is no longer new, not marking {}", payment.txid, status);
                RowOutcome::Skipped
            }
            Err(e) => {
                error!("Cannot mark payment [{}] as {}: {}", payment.txid, status, e);
                RowOutcome::Skipped
            }
        }
    }
}

/// Decode the user uuid carried in the last 16 bytes of a hex message
pub fn user_uuid_from_message(message: &str) -> Option<Uuid> {
    let start = message.len().checked_sub(UUID_HEX_LEN)?;
    let bytes = hex::decode(message.get(start..)?).ok()?;
    Uuid::from_slice(&bytes).ok()
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

#[derive(Debug, thiserror::Error)]
pub enum CrankError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl CrankError {
    pub fn exit_code(&self) -> u8 {
        EXIT_CODE_FAILURE
    }
}

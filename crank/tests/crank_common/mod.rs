#![allow(dead_code)]

use adpay_crank::{
    ads_client::{AdsError, AdsNode, GET_SIGNATURE_UNAVAILABLE},
    crank::Crank,
    db,
    demand_client::{DemandClient, DemandError},
    payment_details::{DbPaymentDetailsProcessor, DetailsError, DetailsSummary, PaymentDetailsProcessor, OPERATOR_FEE_SETTING},
    sync::SyncPolicy,
    types::{AccountAddress, AdsTransaction, PaymentDetail, PaymentStatus, Wire, CLICKS_PER_ADS},
};
use async_trait::async_trait;
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

pub const PLATFORM_ADDRESS: &str = "0001-00000001-8B4E";
pub const PEER_ADDRESS: &str = "0002-00000005-F1A0";
pub const OTHER_ADDRESS: &str = "0003-0000000C-1D2E";
pub const PEER_HOST: &str = "https://peer.example";

// ============================================================================
// Mock ADS node
// ============================================================================

/// Node returning scripted block sync results and canned transactions
#[derive(Default)]
pub struct MockAdsNode {
    block_responses: Mutex<VecDeque<Result<u64, AdsError>>>,
    transactions: Mutex<HashMap<String, Result<AdsTransaction, AdsError>>>,
    pub block_calls: AtomicUsize,
    pub transaction_calls: AtomicUsize,
}

impl MockAdsNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a block sync response; once the queue is empty the node reports 0
    pub fn push_block_response(&self, response: Result<u64, AdsError>) {
        self.block_responses.lock().unwrap().push_back(response);
    }

    pub fn add_transaction(&self, txid: &str, transaction: AdsTransaction) {
        self.transactions.lock().unwrap().insert(txid.to_string(), Ok(transaction));
    }

    pub fn add_transaction_error(&self, txid: &str, error: AdsError) {
        self.transactions.lock().unwrap().insert(txid.to_string(), Err(error));
    }

    pub fn block_calls(&self) -> usize {
        self.block_calls.load(Ordering::SeqCst)
    }

    pub fn transaction_calls(&self) -> usize {
        self.transaction_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AdsNode for MockAdsNode {
    async fn get_block_ids(&self) -> Result<u64, AdsError> {
        self.block_calls.fetch_add(1, Ordering::SeqCst);
        self.block_responses.lock().unwrap().pop_front().unwrap_or(Ok(0))
    }

    async fn get_transaction(&self, txid: &str) -> Result<AdsTransaction, AdsError> {
        self.transaction_calls.fetch_add(1, Ordering::SeqCst);
        self.transactions
            .lock()
            .unwrap()
            .get(txid)
            .cloned()
            .unwrap_or_else(|| Err(AdsError::Command { code: 1, message: format!("unknown txid {}", txid) }))
    }
}

pub fn signature_unavailable() -> AdsError {
    AdsError::Command {
        code: GET_SIGNATURE_UNAVAILABLE,
        message: "Signature unavailable".to_string(),
    }
}

// ============================================================================
// Mock peer host
// ============================================================================

/// Peer returning canned payment details per txid; unknown txids time out
#[derive(Default)]
pub struct MockDemandClient {
    responses: Mutex<HashMap<String, Result<Vec<PaymentDetail>, DemandError>>>,
    pub calls: Mutex<Vec<(String, String)>>,
}

impl MockDemandClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_response(&self, txid: &str, response: Result<Vec<PaymentDetail>, DemandError>) {
        self.responses.lock().unwrap().insert(txid.to_string(), response);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl DemandClient for MockDemandClient {
    async fn fetch_payment_details(
        &self,
        host: &str,
        txid: &str,
    ) -> Result<Vec<PaymentDetail>, DemandError> {
        self.calls.lock().unwrap().push((host.to_string(), txid.to_string()));
        self.responses
            .lock()
            .unwrap()
            .get(txid)
            .cloned()
            .unwrap_or_else(|| Err(DemandError::Network("timeout".to_string())))
    }
}

// ============================================================================
// Recording payment details processor
// ============================================================================

pub enum ProcessorBehavior {
    Succeed,
    MissingConfiguration,
    Fail,
}

/// Processor that records calls and answers according to `behavior`
pub struct RecordingProcessor {
    behavior: ProcessorBehavior,
    pub calls: Mutex<Vec<(String, i64, usize)>>,
}

impl RecordingProcessor {
    pub fn new(behavior: ProcessorBehavior) -> Self {
        Self {
            behavior,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl PaymentDetailsProcessor for RecordingProcessor {
    async fn process(
        &self,
        sender_address: &str,
        ads_payment_id: i64,
        details: &[PaymentDetail],
    ) -> Result<DetailsSummary, DetailsError> {
        self.calls
            .lock()
            .unwrap()
            .push((sender_address.to_string(), ads_payment_id, details.len()));
        match self.behavior {
            ProcessorBehavior::Succeed => Ok(DetailsSummary {
                matched_cases: details.len() as u64,
                ..Default::default()
            }),
            ProcessorBehavior::MissingConfiguration => {
                Err(DetailsError::MissingConfiguration(OPERATOR_FEE_SETTING.to_string()))
            }
            ProcessorBehavior::Fail => Err(DetailsError::InvalidDetail("boom".to_string())),
        }
    }
}

// ============================================================================
// Database
// ============================================================================

/// Fresh in-memory database with the crank schema
pub async fn setup_db() -> Pool<Sqlite> {
    // A single connection that never recycles keeps the in-memory database alive
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    db::create_schema(&pool).await.unwrap();
    pool
}

pub async fn add_payment(pool: &Pool<Sqlite>, txid: &str, sender: &str, amount: i64) -> i64 {
    let created_at = 1_700_000_000 + db::get_new_payments(pool).await.unwrap().len() as i64;
    db::insert_payment(pool, txid, sender, amount, created_at).await.unwrap()
}

pub async fn add_user(pool: &Pool<Sqlite>, uuid: Uuid) -> i64 {
    sqlx::query("INSERT INTO users (uuid, email) VALUES (?, ?)")
        .bind(uuid.as_bytes().to_vec())
        .bind(format!("{}@example.com", uuid.simple()))
        .execute(pool)
        .await
        .unwrap()
        .last_insert_rowid()
}

pub async fn add_host(pool: &Pool<Sqlite>, address: &str, host: &str) {
    sqlx::query("INSERT INTO network_hosts (address, host) VALUES (?, ?)")
        .bind(address)
        .bind(host)
        .execute(pool)
        .await
        .unwrap();
}

pub async fn add_network_case(pool: &Pool<Sqlite>, case_id: &str, publisher_id: &str) -> i64 {
    sqlx::query("INSERT INTO network_cases (case_id, publisher_id) VALUES (?, ?)")
        .bind(hex::decode(case_id).unwrap())
        .bind(hex::decode(publisher_id).unwrap())
        .execute(pool)
        .await
        .unwrap()
        .last_insert_rowid()
}

pub async fn set_operator_fee(pool: &Pool<Sqlite>, fee: &str) {
    sqlx::query("INSERT OR REPLACE INTO settings (name, value) VALUES (?, ?)")
        .bind(OPERATOR_FEE_SETTING)
        .bind(fee)
        .execute(pool)
        .await
        .unwrap();
}

pub async fn status_of(pool: &Pool<Sqlite>, txid: &str) -> PaymentStatus {
    db::get_payment_by_txid(pool, txid).await.unwrap().unwrap().status
}

pub async fn count_rows(pool: &Pool<Sqlite>, table: &str) -> i64 {
    sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(pool)
        .await
        .unwrap()
}

// ============================================================================
// Transactions
// ============================================================================

pub fn ads(amount: i64) -> i64 {
    amount * CLICKS_PER_ADS
}

/// Message carrying `uuid` in its last 16 bytes
pub fn deposit_message(uuid: Uuid) -> String {
    format!("{}{}", "00".repeat(16), hex::encode(uuid.as_bytes()))
}

pub fn send_one(sender: &str, target: &str, amount: i64, message: &str) -> AdsTransaction {
    AdsTransaction::SendOne {
        sender_address: sender.to_string(),
        target_address: target.to_string(),
        amount,
        message: message.to_string(),
    }
}

pub fn send_many(targets: &[(&str, i64)]) -> AdsTransaction {
    AdsTransaction::SendMany {
        wires: targets
            .iter()
            .map(|(target, amount)| Wire {
                target_address: target.to_string(),
                amount: *amount,
            })
            .collect(),
    }
}

pub fn detail(case_id: &str, event_value: i64) -> PaymentDetail {
    PaymentDetail {
        case_id: case_id.to_string(),
        publisher_id: "bb".repeat(16),
        event_value,
    }
}

// ============================================================================
// Crank
// ============================================================================

pub struct TestCrank {
    pub crank: Crank,
    pub node: Arc<MockAdsNode>,
    pub demand_client: Arc<MockDemandClient>,
    pub pool: Pool<Sqlite>,
}

pub fn fast_sync_policy() -> SyncPolicy {
    SyncPolicy {
        max_attempts: 5,
        retry_delay: Duration::ZERO,
    }
}

pub fn platform_address() -> AccountAddress {
    PLATFORM_ADDRESS.parse().unwrap()
}

/// Crank wired to mocks and the given processor
pub async fn setup_crank_with(processor: Arc<dyn PaymentDetailsProcessor>) -> TestCrank {
    let pool = setup_db().await;
    let node = Arc::new(MockAdsNode::new());
    let demand_client = Arc::new(MockDemandClient::new());

    let crank = Crank::new(
        node.clone(),
        demand_client.clone(),
        processor,
        pool.clone(),
        platform_address(),
        fast_sync_policy(),
    );

    TestCrank {
        crank,
        node,
        demand_client,
        pool,
    }
}

/// Crank wired to mocks and the database-backed processor
pub async fn setup_crank() -> TestCrank {
    let pool = setup_db().await;
    let node = Arc::new(MockAdsNode::new());
    let demand_client = Arc::new(MockDemandClient::new());

    let crank = Crank::new(
        node.clone(),
        demand_client.clone(),
        Arc::new(DbPaymentDetailsProcessor::new(pool.clone())),
        pool.clone(),
        platform_address(),
        fast_sync_policy(),
    );

    TestCrank {
        crank,
        node,
        demand_client,
        pool,
    }
}

//! Database module for incoming payments and the tables they settle into
//!
//! Uses SQLite via sqlx. Rows are decoded into plain structs here; the rest of
//! the crate never touches raw columns.

use sqlx::{sqlite::SqlitePoolOptions, sqlite::SqliteRow, Pool, Row, Sqlite};
use std::path::Path;
use uuid::Uuid;

use crate::types::{AdsPayment, NetworkHost, PaymentStatus, User};

/// Initialize the database file and create tables
pub async fn init_db(db_path: &Path) -> Result<Pool<Sqlite>, sqlx::Error> {
    // Create database file if it doesn't exist
    if !db_path.exists() {
        std::fs::File::create(db_path)?;
    }

    let db_url = format!("sqlite:{}", db_path.display());

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&db_url)
        .await?;

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create all tables and indexes used by the crank
pub async fn create_schema(pool: &Pool<Sqlite>) -> Result<(), sqlx::Error> {
    sqlx::query(r#"
        CREATE TABLE IF NOT EXISTS ads_payments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            txid TEXT NOT NULL UNIQUE,
            address TEXT NOT NULL,
            amount INTEGER NOT NULL DEFAULT 0,
            status INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            updated_at INTEGER
        )
    "#)
    .execute(pool)
    .await?;

    sqlx::query(r#"
        CREATE TABLE IF NOT EXISTS user_ledger_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            amount INTEGER NOT NULL,
            address_from TEXT NOT NULL,
            address_to TEXT NOT NULL,
            txid TEXT NOT NULL,
            type INTEGER NOT NULL,
            created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        )
    "#)
    .execute(pool)
    .await?;

    sqlx::query(r#"
        CREATE TABLE IF NOT EXISTS network_hosts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            address TEXT NOT NULL UNIQUE,
            host TEXT NOT NULL
        )
    "#)
    .execute(pool)
    .await?;

    sqlx::query(r#"
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            uuid BLOB NOT NULL UNIQUE,
            email TEXT
        )
    "#)
    .execute(pool)
    .await?;

    sqlx::query(r#"
        CREATE TABLE IF NOT EXISTS network_cases (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            case_id BLOB NOT NULL UNIQUE,
            publisher_id BLOB NOT NULL,
            created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        )
    "#)
    .execute(pool)
    .await?;

    sqlx::query(r#"
        CREATE TABLE IF NOT EXISTS network_case_payments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            network_case_id INTEGER NOT NULL,
            ads_payment_id INTEGER NOT NULL,
            pay_from TEXT NOT NULL,
            total_amount INTEGER NOT NULL,
            operator_fee INTEGER NOT NULL,
            paid_amount INTEGER NOT NULL,
            created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        )
    "#)
    .execute(pool)
    .await?;

    sqlx::query(r#"
        CREATE TABLE IF NOT EXISTS settings (
            name TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
    "#)
    .execute(pool)
    .await?;

    // Create indexes for common queries
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_ads_payments_status ON ads_payments(status)")
        .execute(pool)
        .await?;

    // One deposit per transaction
    sqlx::query("CREATE UNIQUE INDEX IF NOT EXISTS idx_user_ledger_entries_txid ON user_ledger_entries(txid, type)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_user_ledger_entries_user ON user_ledger_entries(user_id)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE UNIQUE INDEX IF NOT EXISTS idx_network_case_payments_unique ON network_case_payments(ads_payment_id, network_case_id)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Record a newly observed incoming payment
pub async fn insert_payment(
    pool: &Pool<Sqlite>,
    txid: &str,
    address: &str,
    amount: i64,
    created_at: i64,
) -> Result<i64, sqlx::Error> {
    let result = sqlx::query(r#"
        INSERT INTO ads_payments (txid, address, amount, status, created_at)
        VALUES (?, ?, ?, 0, ?)
    "#)
    .bind(txid)
    .bind(address)
    .bind(amount)
    .bind(created_at)
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Get all payments still in status NEW, oldest first
pub async fn get_new_payments(pool: &Pool<Sqlite>) -> Result<Vec<AdsPayment>, sqlx::Error> {
    let rows = sqlx::query(r#"
        SELECT id, txid, address, amount, status, created_at
        FROM ads_payments
        WHERE status = ?
        ORDER BY created_at ASC, id ASC
        "#)
    .bind(PaymentStatus::New.as_i32())
    .fetch_all(pool)
    .await?;

    rows.iter().map(payment_from_row).collect()
}

/// Get a single payment by transaction id
pub async fn get_payment_by_txid(
    pool: &Pool<Sqlite>,
    txid: &str,
) -> Result<Option<AdsPayment>, sqlx::Error> {
    let row = sqlx::query(r#"
        SELECT id, txid, address, amount, status, created_at
        FROM ads_payments
        WHERE txid = ?
        "#)
    .bind(txid)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(payment_from_row).transpose()
}

/// Move a NEW payment to a terminal status
///
/// Returns false when the row was no longer NEW, in which case nothing changed.
pub async fn update_payment_status(
    pool: &Pool<Sqlite>,
    id: i64,
    status: PaymentStatus,
    updated_at: i64,
) -> Result<bool, sqlx::Error> {
    if !PaymentStatus::New.can_transition_to(status) {
        return Ok(false);
    }

    let result = sqlx::query(r#"
        UPDATE ads_payments
        SET status = ?, updated_at = ?
        WHERE id = ? AND status = ?
    "#)
    .bind(status.as_i32())
    .bind(updated_at)
    .bind(id)
    .bind(PaymentStatus::New.as_i32())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn fetch_host_by_address(
    pool: &Pool<Sqlite>,
    address: &str,
) -> Result<Option<NetworkHost>, sqlx::Error> {
    let row = sqlx::query("SELECT id, address, host FROM network_hosts WHERE address = ?")
        .bind(address)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|row| NetworkHost {
        id: row.get("id"),
        address: row.get("address"),
        host: row.get("host"),
    }))
}

pub async fn fetch_user_by_uuid(
    pool: &Pool<Sqlite>,
    uuid: &Uuid,
) -> Result<Option<User>, sqlx::Error> {
    let row = sqlx::query("SELECT id, uuid FROM users WHERE uuid = ?")
        .bind(uuid.as_bytes().to_vec())
        .fetch_optional(pool)
        .await?;

    row.map(|row| -> Result<User, sqlx::Error> {
        let bytes: Vec<u8> = row.get("uuid");
        let uuid = Uuid::from_slice(&bytes).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
        Ok(User { id: row.get("id"), uuid })
    })
    .transpose()
}

/// Deposit ledger entry as stored
#[derive(Debug, Clone)]
pub struct LedgerEntryRecord {
    pub id: i64,
    pub user_id: i64,
    pub amount: i64,
    pub address_from: String,
    pub address_to: String,
    pub txid: String,
    pub entry_type: i32,
}

/// Get ledger entries created from a transaction
pub async fn get_ledger_entries_by_txid(
    pool: &Pool<Sqlite>,
    txid: &str,
) -> Result<Vec<LedgerEntryRecord>, sqlx::Error> {
    let rows = sqlx::query(r#"
        SELECT id, user_id, amount, address_from, address_to, txid, type
        FROM user_ledger_entries
        WHERE txid = ?
        ORDER BY id ASC
        "#)
    .bind(txid)
    .fetch_all(pool)
    .await?;

    let entries = rows.into_iter().map(|row| {
        LedgerEntryRecord {
            id: row.get("id"),
            user_id: row.get("user_id"),
            amount: row.get("amount"),
            address_from: row.get("address_from"),
            address_to: row.get("address_to"),
            txid: row.get("txid"),
            entry_type: row.get("type"),
        }
    }).collect();

    Ok(entries)
}

pub async fn get_setting(pool: &Pool<Sqlite>, name: &str) -> Result<Option<String>, sqlx::Error> {
    let row = sqlx::query("SELECT value FROM settings WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|row| row.get("value")))
}

/// Payment counts per status
#[derive(Debug, Clone, Default)]
pub struct PaymentStats {
    pub new_count: u64,
    pub invalid_count: u64,
    pub reserved_count: u64,
    pub event_payment_count: u64,
    pub user_deposit_count: u64,
    /// Sum of deposited amounts (clicks)
    pub total_deposited: i64,
}

pub async fn get_payment_stats(pool: &Pool<Sqlite>) -> Result<PaymentStats, sqlx::Error> {
    let row = sqlx::query(r#"
        SELECT
            SUM(CASE WHEN status = 0 THEN 1 ELSE 0 END) as new_count,
            SUM(CASE WHEN status = 1 THEN 1 ELSE 0 END) as invalid_count,
            SUM(CASE WHEN status = 2 THEN 1 ELSE 0 END) as reserved_count,
            SUM(CASE WHEN status = 3 THEN 1 ELSE 0 END) as event_payment_count,
            SUM(CASE WHEN status = 4 THEN 1 ELSE 0 END) as user_deposit_count
        FROM ads_payments
        "#)
    .fetch_one(pool)
    .await?;

    let deposited = sqlx::query("SELECT SUM(amount) as total FROM user_ledger_entries")
        .fetch_one(pool)
        .await?;

    Ok(PaymentStats {
        new_count: row.get::<Option<i64>, _>("new_count").unwrap_or(0) as u64,
        invalid_count: row.get::<Option<i64>, _>("invalid_count").unwrap_or(0) as u64,
        reserved_count: row.get::<Option<i64>, _>("reserved_count").unwrap_or(0) as u64,
        event_payment_count: row.get::<Option<i64>, _>("event_payment_count").unwrap_or(0) as u64,
        user_deposit_count: row.get::<Option<i64>, _>("user_deposit_count").unwrap_or(0) as u64,
        total_deposited: deposited.get::<Option<i64>, _>("total").unwrap_or(0),
    })
}

fn payment_from_row(row: &SqliteRow) -> Result<AdsPayment, sqlx::Error> {
    let status: i32 = row.try_get("status")?;
    let status = PaymentStatus::from_i32(status)
        .ok_or_else(|| sqlx::Error::Decode(format!("Unknown payment status: {}", status).into()))?;

    Ok(AdsPayment {
        id: row.try_get("id")?,
        txid: row.try_get("txid")?,
        address: row.try_get("address")?,
        amount: row.try_get("amount")?,
        status,
        created_at: row.try_get("created_at")?,
    })
}

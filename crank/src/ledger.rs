//! User ledger commits
//!
//! A deposit is a ledger entry plus the payment's status change, written in one
//! SQLite transaction. Either both land or neither does.

use sqlx::{Pool, Sqlite};

use crate::types::{AdsPayment, PaymentStatus, UserLedgerEntry};

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Payment {0} is no longer new")]
    AlreadyProcessed(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Persist `entry` and mark `payment` as a user deposit atomically
///
/// Returns the id of the new ledger entry.
pub async fn commit_deposit(
    pool: &Pool<Sqlite>,
    entry: &UserLedgerEntry,
    payment: &AdsPayment,
    committed_at: i64,
) -> Result<i64, LedgerError> {
    let mut tx = pool.begin().await?;

    // Status first so a processed payment never reaches the ledger insert
    let updated = sqlx::query(r#"
        UPDATE ads_payments
        SET status = ?, updated_at = ?
        WHERE id = ? AND status = ?
    "#)
    .bind(PaymentStatus::UserDeposit.as_i32())
    .bind(committed_at)
    .bind(payment.id)
    .bind(PaymentStatus::New.as_i32())
    .execute(&mut *tx)
    .await?;

    if updated.rows_affected() != 1 {
        tx.rollback().await?;
        return Err(LedgerError::AlreadyProcessed(payment.txid.clone()));
    }

    let inserted = sqlx::query(r#"
        INSERT INTO user_ledger_entries (
            user_id, amount, address_from, address_to, txid, type, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?)
    "#)
    .bind(entry.user_id)
    .bind(entry.amount)
    .bind(&entry.address_from)
    .bind(&entry.address_to)
    .bind(&entry.txid)
    .bind(entry.entry_type.as_i32())
    .bind(committed_at)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(inserted.last_insert_rowid())
}

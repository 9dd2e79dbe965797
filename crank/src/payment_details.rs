//! Payment details processing
//!
//! Records event payments reported by a peer host against the network cases
//! we served.

use async_trait::async_trait;
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, warn};

use crate::db;
use crate::types::PaymentDetail;

/// Settings key holding the operator fee as a fraction in [0, 1]
pub const OPERATOR_FEE_SETTING: &str = "payment-operator-fee";

#[derive(Debug, thiserror::Error)]
pub enum DetailsError {
    #[error("Missing initial configuration: {0}")]
    MissingConfiguration(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Invalid payment detail: {0}")]
    InvalidDetail(String),
    #[error("Unknown ads payment {0}")]
    UnknownPayment(i64),
    #[error("Reported events total {claimed} exceeds payment {payment_id} amount {received}")]
    ExceedsPayment { payment_id: i64, claimed: i64, received: i64 },
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Outcome of processing one batch of details
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetailsSummary {
    /// Cases recorded by this call
    pub matched_cases: u64,
    /// Cases recorded by an earlier call for the same payment
    pub already_paid_cases: u64,
    pub skipped_cases: u64,
    /// Sum paid out after operator fee (clicks)
    pub total_paid: i64,
}

#[async_trait]
pub trait PaymentDetailsProcessor: Send + Sync {
    async fn process(
        &self,
        sender_address: &str,
        ads_payment_id: i64,
        details: &[PaymentDetail],
    ) -> Result<DetailsSummary, DetailsError>;
}

/// Processor writing case payments into the crank database
pub struct DbPaymentDetailsProcessor {
    db_pool: Pool<Sqlite>,
}

impl DbPaymentDetailsProcessor {
    pub fn new(db_pool: Pool<Sqlite>) -> Self {
        Self { db_pool }
    }

    async fn operator_fee(&self) -> Result<f64, DetailsError> {
        let value = db::get_setting(&self.db_pool, OPERATOR_FEE_SETTING)
            .await?
            .ok_or_else(|| DetailsError::MissingConfiguration(OPERATOR_FEE_SETTING.to_string()))?;

        let fee: f64 = value.trim().parse()
            .map_err(|_| DetailsError::InvalidConfiguration(format!("{} = {}", OPERATOR_FEE_SETTING, value)))?;
        if !(0.0..=1.0).contains(&fee) {
            return Err(DetailsError::InvalidConfiguration(format!("{} = {}", OPERATOR_FEE_SETTING, value)));
        }
        Ok(fee)
    }
}

#[async_trait]
impl PaymentDetailsProcessor for DbPaymentDetailsProcessor {
    async fn process(
        &self,
        sender_address: &str,
        ads_payment_id: i64,
        details: &[PaymentDetail],
    ) -> Result<DetailsSummary, DetailsError> {
        let fee = self.operator_fee().await?;
        let mut summary = DetailsSummary::default();

        let mut tx = self.db_pool.begin().await?;

        let received = sqlx::query_scalar::<_, i64>("SELECT amount FROM ads_payments WHERE id = ?")
            .bind(ads_payment_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(DetailsError::UnknownPayment(ads_payment_id))?;

        // Sum of event values over every matched case, recorded now or earlier
        let mut claimed: i64 = 0;

        for detail in details {
            if detail.event_value < 0 {
                return Err(DetailsError::InvalidDetail(format!(
                    "negative event value for case {}",
                    detail.case_id
                )));
            }

            let case_id = match hex::decode(&detail.case_id) {
                Ok(case_id) => case_id,
                Err(_) => {
                    warn!("Skipping detail with malformed case id: {}", detail.case_id);
                    summary.skipped_cases += 1;
                    continue;
                }
            };

            let network_case = sqlx::query("SELECT id FROM network_cases WHERE case_id = ?")
                .bind(case_id)
                .fetch_optional(&mut *tx)
                .await?;

            let Some(network_case) = network_case else {
                warn!("Skipping unknown case: {}", detail.case_id);
                summary.skipped_cases += 1;
                continue;
            };
            let network_case_id: i64 = network_case.get("id");

            claimed = claimed.checked_add(detail.event_value).ok_or_else(|| {
                DetailsError::InvalidDetail(format!("event values overflow at case {}", detail.case_id))
            })?;
            if claimed > received {
                return Err(DetailsError::ExceedsPayment {
                    payment_id: ads_payment_id,
                    claimed,
                    received,
                });
            }

            let (operator_fee, paid_amount) = split_fee(detail.event_value, fee);

            let inserted = sqlx::query(r#"
                INSERT OR IGNORE INTO network_case_payments (
                    network_case_id, ads_payment_id, pay_from,
                    total_amount, operator_fee, paid_amount
                ) VALUES (?, ?, ?, ?, ?, ?)
            "#)
            .bind(network_case_id)
            .bind(ads_payment_id)
            .bind(sender_address)
            .bind(detail.event_value)
            .bind(operator_fee)
            .bind(paid_amount)
            .execute(&mut *tx)
            .await?;

            if inserted.rows_affected() == 0 {
                debug!("Case {} already paid by payment {}", detail.case_id, ads_payment_id);
                summary.already_paid_cases += 1;
                continue;
            }

            summary.matched_cases += 1;
            // paid_amount <= event_value, so this cannot exceed `claimed`
            summary.total_paid += paid_amount;
        }

        tx.commit().await?;

        Ok(summary)
    }
}

/// Split an event value into (operator fee, amount paid on)
fn split_fee(event_value: i64, fee: f64) -> (i64, i64) {
    let operator_fee = ((event_value as f64) * fee).floor() as i64;
    let operator_fee = operator_fee.clamp(0, event_value);
    (operator_fee, event_value - operator_fee)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_fee() {
        assert_eq!(split_fee(1000, 0.0), (0, 1000));
        assert_eq!(split_fee(1000, 0.01), (10, 990));
        assert_eq!(split_fee(999, 0.5), (499, 500));
        assert_eq!(split_fee(1000, 1.0), (1000, 0));
        assert_eq!(split_fee(0, 0.3), (0, 0));
    }
}

//! Adshares incoming transaction crank
//!
//! Reconciles transactions sent to our ADS account into user deposits, event
//! payments from peer ad servers, reserved payments and invalid ones.

pub mod ads_client;
pub mod config;
pub mod crank;
pub mod db;
pub mod demand_client;
pub mod ledger;
pub mod payment_details;
pub mod sync;
pub mod types;

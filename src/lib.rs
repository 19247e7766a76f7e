//! Subscription payments backend for the birthday tracker.
//!
//! Checkout goes through a pluggable payment provider (Paystack today); the
//! verification flow reconciles gateway results with stored payment intents
//! and grants subscription tiers.

pub mod api;
pub mod app;
pub mod config;
pub mod database;
pub mod error;
pub mod payments;

pub use error::{AppError, AppResult};

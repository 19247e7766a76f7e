//! Payment provider implementations
//!
//! Concrete implementations of the PaymentProvider trait for different providers.

pub mod paystack;

pub use paystack::{PaystackConfig, PaystackProvider, PAYSTACK};

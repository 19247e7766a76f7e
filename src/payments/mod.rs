//! Payment provider integration module
//!
//! A pluggable provider abstraction (currently Paystack) behind a registry,
//! the service that talks to it, and the checkout flow that turns verified
//! payments into subscriptions.

pub mod checkout;
pub mod config;
pub mod providers;
pub mod registry;
pub mod service;
pub mod traits;
pub mod types;
pub mod webhook;

pub use checkout::CheckoutFlow;
pub use config::PaymentConfigService;
pub use registry::ProviderRegistry;
pub use service::PaymentService;
pub use traits::PaymentProvider;

//! Subscription lifecycle and access-control service.
//!
//! Provider webhooks are normalized into a closed event vocabulary and
//! reconciled onto locally stored subscriptions; access checks are answered
//! from the stored state without calling any provider.

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod models;
pub mod providers;
pub mod services;
pub mod startup;

pub use startup::{AppState, Application};

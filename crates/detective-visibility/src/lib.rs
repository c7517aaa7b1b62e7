//! Subscription entitlement, expiry and visibility ranking for the detective marketplace.

pub mod cache;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod domain;
pub mod entitlements;
pub mod error;
pub mod ranking;
pub mod service;
pub mod store;
pub mod subscription;
pub mod telemetry;

//! Storage seams consumed by the engine.
//!
//! The relational schema lives outside this crate; these traits describe only the reads and
//! writes the entitlement, expiry and ranking paths need.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    Detective, DetectiveId, DetectiveRecord, PackageId, ServiceRecord, SubscriptionPackage,
    VisibilityOverride,
};

/// Read-only lookups against the subscription package catalog.
#[async_trait]
pub trait PackageStore: Send + Sync {
    async fn package(&self, id: &PackageId) -> Result<Option<SubscriptionPackage>, StoreError>;
}

/// Detective records plus the per-detective inputs used by views and ranking.
#[async_trait]
pub trait DetectiveStore: Send + Sync {
    async fn fetch(&self, id: &DetectiveId) -> Result<Option<Detective>, StoreError>;

    async fn fetch_record(&self, id: &DetectiveId)
        -> Result<Option<DetectiveRecord>, StoreError>;

    async fn list_records(&self) -> Result<Vec<DetectiveRecord>, StoreError>;

    /// Persist a detective. Fails with [`StoreError::Conflict`] when `revision` is stale;
    /// returns the stored record with its new revision.
    async fn save(&self, detective: Detective) -> Result<Detective, StoreError>;

    /// Ids of detectives whose subscription expiry is at or before `now`.
    async fn expired_subscriptions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<DetectiveId>, StoreError>;

    async fn set_visibility(
        &self,
        id: &DetectiveId,
        visibility: VisibilityOverride,
    ) -> Result<(), StoreError>;

    async fn insert_service(&self, service: ServiceRecord) -> Result<ServiceRecord, StoreError>;
}

/// Error enumeration for store failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("record was modified concurrently")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

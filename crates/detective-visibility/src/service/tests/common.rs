use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::response::Response;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::Value;

use crate::cache::TtlCache;
use crate::clock::ManualClock;
use crate::config::EngineConfig;
use crate::domain::{
    BadgeKind, BillingCycle, ContactDetails, Detective, DetectiveId, DetectiveRecord,
    DetectiveStatus, PackageId, ServiceRecord, SubscriptionPackage, SubscriptionState,
    VisibilityOverride,
};
use crate::service::VisibilityService;
use crate::store::{DetectiveStore, MemoryStore, StoreError};

pub(super) fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) fn id(value: &str) -> DetectiveId {
    DetectiveId(value.to_string())
}

pub(super) fn package(
    id: &str,
    monthly_price: u32,
    features: &[&str],
    badges: &[BadgeKind],
    service_limit: u32,
) -> SubscriptionPackage {
    SubscriptionPackage {
        id: PackageId(id.to_string()),
        name: id.to_string(),
        features: features.iter().map(|feature| feature.to_string()).collect(),
        badges: badges
            .iter()
            .map(|badge| (*badge, true))
            .collect::<BTreeMap<_, _>>(),
        is_active: true,
        service_limit,
        monthly_price,
        yearly_price: monthly_price * 10,
    }
}

pub(super) fn seed_catalog(store: &MemoryStore) {
    store.insert_package(package("free", 0, &["contact_email"], &[], 2));
    store.insert_package(package(
        "pro",
        999,
        &["contact_email", "contact_phone", "contact_whatsapp"],
        &[BadgeKind::Pro],
        10,
    ));
    store.insert_package(package(
        "agency",
        2499,
        &[
            "contact_email",
            "contact_phone",
            "contact_whatsapp",
            "contact_website",
        ],
        &[BadgeKind::Pro, BadgeKind::Recommended, BadgeKind::BlueTick],
        25,
    ));
    let mut legacy = package(
        "legacy",
        499,
        &["contact_email", "contact_phone", "contact_website"],
        &[BadgeKind::Pro],
        8,
    );
    legacy.is_active = false;
    store.insert_package(legacy);
}

pub(super) fn detective(value: &str, name: &str, age_days: i64) -> Detective {
    Detective {
        id: id(value),
        business_name: name.to_string(),
        country: "IN".to_string(),
        status: DetectiveStatus::Active,
        is_verified: false,
        created_at: now() - Duration::days(age_days),
        contacts: ContactDetails {
            email: Some(format!("{value}@example.com")),
            phone: Some("+91 98765 43210".to_string()),
            whatsapp: Some("+91 98765 43210".to_string()),
            website: Some(format!("https://{value}.example.com")),
        },
        subscription: SubscriptionState::default(),
        grants: Vec::new(),
        revision: 0,
    }
}

pub(super) fn subscribed(
    mut detective: Detective,
    package: &str,
    activated_at: DateTime<Utc>,
) -> Detective {
    detective.subscription = SubscriptionState {
        package_id: Some(PackageId(package.to_string())),
        billing_cycle: Some(BillingCycle::Monthly),
        activated_at: Some(activated_at),
        expires_at: Some(BillingCycle::Monthly.expiry_from(activated_at)),
        ..SubscriptionState::default()
    };
    detective
}

pub(super) struct Harness<D = MemoryStore> {
    pub(super) store: Arc<MemoryStore>,
    pub(super) clock: Arc<ManualClock>,
    pub(super) cache: Arc<TtlCache>,
    pub(super) service: Arc<VisibilityService<D, MemoryStore>>,
}

pub(super) fn harness() -> Harness {
    let store = Arc::new(MemoryStore::default());
    harness_with(store.clone(), store)
}

pub(super) fn harness_with<D>(detectives: Arc<D>, store: Arc<MemoryStore>) -> Harness<D>
where
    D: DetectiveStore + 'static,
{
    seed_catalog(&store);
    let clock = Arc::new(ManualClock::new(now()));
    let cache = Arc::new(TtlCache::new(clock.clone()));
    let service = Arc::new(VisibilityService::new(
        detectives,
        store.clone(),
        cache.clone(),
        clock.clone(),
        &EngineConfig::default(),
    ));
    Harness {
        store,
        clock,
        cache,
        service,
    }
}

/// Delegates to the memory store but fails every save for one detective.
pub(super) struct FailingSaves {
    pub(super) inner: Arc<MemoryStore>,
    pub(super) failing: DetectiveId,
}

#[async_trait]
impl DetectiveStore for FailingSaves {
    async fn fetch(&self, id: &DetectiveId) -> Result<Option<Detective>, StoreError> {
        self.inner.fetch(id).await
    }

    async fn fetch_record(
        &self,
        id: &DetectiveId,
    ) -> Result<Option<DetectiveRecord>, StoreError> {
        self.inner.fetch_record(id).await
    }

    async fn list_records(&self) -> Result<Vec<DetectiveRecord>, StoreError> {
        self.inner.list_records().await
    }

    async fn save(&self, detective: Detective) -> Result<Detective, StoreError> {
        if detective.id == self.failing {
            return Err(StoreError::Unavailable("disk full".to_string()));
        }
        self.inner.save(detective).await
    }

    async fn expired_subscriptions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<DetectiveId>, StoreError> {
        self.inner.expired_subscriptions(now).await
    }

    async fn set_visibility(
        &self,
        id: &DetectiveId,
        visibility: VisibilityOverride,
    ) -> Result<(), StoreError> {
        self.inner.set_visibility(id, visibility).await
    }

    async fn insert_service(&self, service: ServiceRecord) -> Result<ServiceRecord, StoreError> {
        self.inner.insert_service(service).await
    }
}

/// Reports a stale revision on the first save, as if another writer got there first.
pub(super) struct ConflictOnce {
    pub(super) inner: Arc<MemoryStore>,
    pub(super) tripped: AtomicBool,
}

#[async_trait]
impl DetectiveStore for ConflictOnce {
    async fn fetch(&self, id: &DetectiveId) -> Result<Option<Detective>, StoreError> {
        self.inner.fetch(id).await
    }

    async fn fetch_record(
        &self,
        id: &DetectiveId,
    ) -> Result<Option<DetectiveRecord>, StoreError> {
        self.inner.fetch_record(id).await
    }

    async fn list_records(&self) -> Result<Vec<DetectiveRecord>, StoreError> {
        self.inner.list_records().await
    }

    async fn save(&self, detective: Detective) -> Result<Detective, StoreError> {
        if !self.tripped.swap(true, Ordering::SeqCst) {
            return Err(StoreError::Conflict);
        }
        self.inner.save(detective).await
    }

    async fn expired_subscriptions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<DetectiveId>, StoreError> {
        self.inner.expired_subscriptions(now).await
    }

    async fn set_visibility(
        &self,
        id: &DetectiveId,
        visibility: VisibilityOverride,
    ) -> Result<(), StoreError> {
        self.inner.set_visibility(id, visibility).await
    }

    async fn insert_service(&self, service: ServiceRecord) -> Result<ServiceRecord, StoreError> {
        self.inner.insert_service(service).await
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}

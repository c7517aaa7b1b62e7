use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use super::{compute_effective_badges, effective_package, resolve_features, FALLBACK_SERVICE_LIMIT};
use crate::domain::{BadgeSet, Detective, FeatureSet, PackageId, SubscriptionPackage};
use crate::store::{PackageStore, StoreError};

#[derive(Debug, Clone)]
struct FreePlanBaseline {
    features: FeatureSet,
    service_limit: u32,
}

/// Outcome of resolving a detective's entitlements at a point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEntitlement {
    /// The paid or free package in effect, when one resolved successfully.
    pub package: Option<SubscriptionPackage>,
    pub features: FeatureSet,
    pub badges: BadgeSet,
    pub service_limit: u32,
}

impl ResolvedEntitlement {
    /// True when an active package with a non-zero price governs the detective.
    pub fn is_paid(&self) -> bool {
        self.package
            .as_ref()
            .map(|package| !package.is_free())
            .unwrap_or(false)
    }
}

/// Resolves entitlements against the package store with a free-tier fallback.
pub struct EntitlementResolver<P> {
    packages: Arc<P>,
    free_plan_id: PackageId,
    lookup_timeout: Duration,
    baseline: OnceCell<FreePlanBaseline>,
}

impl<P> EntitlementResolver<P>
where
    P: PackageStore + 'static,
{
    pub fn new(packages: Arc<P>, free_plan_id: PackageId, lookup_timeout: Duration) -> Self {
        Self {
            packages,
            free_plan_id,
            lookup_timeout,
            baseline: OnceCell::new(),
        }
    }

    pub fn free_plan_id(&self) -> &PackageId {
        &self.free_plan_id
    }

    /// Package lookup bounded by the configured timeout.
    pub async fn fetch_package(
        &self,
        id: &PackageId,
    ) -> Result<Option<SubscriptionPackage>, StoreError> {
        match tokio::time::timeout(self.lookup_timeout, self.packages.package(id)).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Unavailable(format!(
                "package lookup timed out after {}ms",
                self.lookup_timeout.as_millis()
            ))),
        }
    }

    /// Free plan features, read once and kept for the life of the process.
    ///
    /// A failed read is not cached; callers get an empty baseline until a read succeeds.
    async fn baseline(&self) -> FreePlanBaseline {
        let loaded = self
            .baseline
            .get_or_try_init(|| async {
                match self.fetch_package(&self.free_plan_id).await {
                    Ok(Some(package)) if package.is_active => {
                        debug!(package_id = %package.id, "cached free plan baseline");
                        Ok(FreePlanBaseline {
                            features: package.features,
                            service_limit: package.service_limit,
                        })
                    }
                    Ok(Some(_)) => Err("free plan is inactive".to_string()),
                    Ok(None) => Err("free plan not found".to_string()),
                    Err(err) => Err(err.to_string()),
                }
            })
            .await;

        match loaded {
            Ok(baseline) => baseline.clone(),
            Err(reason) => {
                warn!(
                    package_id = %self.free_plan_id,
                    %reason,
                    "free plan unavailable; resolving with an empty baseline"
                );
                FreePlanBaseline {
                    features: FeatureSet::new(),
                    service_limit: FALLBACK_SERVICE_LIMIT,
                }
            }
        }
    }

    /// Look up the detective's package, logging and discarding anything unusable.
    async fn subscribed_package(&self, detective: &Detective) -> Option<SubscriptionPackage> {
        let package_id = detective.subscription.package_id.as_ref()?;
        match self.fetch_package(package_id).await {
            Ok(Some(package)) if package.is_active => Some(package),
            Ok(Some(_)) => {
                warn!(
                    detective_id = %detective.id,
                    package_id = %package_id,
                    "package is inactive; treating detective as free tier"
                );
                None
            }
            Ok(None) => {
                warn!(
                    detective_id = %detective.id,
                    package_id = %package_id,
                    "package not found; treating detective as free tier"
                );
                None
            }
            Err(err) => {
                warn!(
                    detective_id = %detective.id,
                    package_id = %package_id,
                    error = %err,
                    "package lookup failed; treating detective as free tier"
                );
                None
            }
        }
    }

    /// Resolve features, badges and service limit. Never fails.
    pub async fn resolve(&self, detective: &Detective, now: DateTime<Utc>) -> ResolvedEntitlement {
        let baseline = self.baseline().await;
        let package = self.subscribed_package(detective).await;

        let features = resolve_features(detective, package.as_ref(), &baseline.features, now);
        let badges = compute_effective_badges(detective, package.as_ref(), now);
        let effective = effective_package(detective, package.as_ref(), now).cloned();
        let service_limit = effective
            .as_ref()
            .map(|package| package.service_limit)
            .unwrap_or(baseline.service_limit);

        ResolvedEntitlement {
            package: effective,
            features,
            badges,
            service_limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        BadgeKind, BillingCycle, ContactDetails, DetectiveId, DetectiveStatus, SubscriptionState,
    };
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingPackages {
        packages: HashMap<PackageId, SubscriptionPackage>,
        failing: Vec<PackageId>,
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl PackageStore for CountingPackages {
        async fn package(
            &self,
            id: &PackageId,
        ) -> Result<Option<SubscriptionPackage>, StoreError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            if self.failing.contains(id) {
                return Err(StoreError::Unavailable("catalog offline".to_string()));
            }
            Ok(self.packages.get(id).cloned())
        }
    }

    struct StalledPackages;

    #[async_trait]
    impl PackageStore for StalledPackages {
        async fn package(
            &self,
            _id: &PackageId,
        ) -> Result<Option<SubscriptionPackage>, StoreError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(None)
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    fn package(id: &str, tokens: &[&str], monthly_price: u32) -> SubscriptionPackage {
        let mut badges = BTreeMap::new();
        if monthly_price > 0 {
            badges.insert(BadgeKind::BlueTick, true);
        }
        SubscriptionPackage {
            id: PackageId(id.to_string()),
            name: id.to_string(),
            features: tokens.iter().map(|token| token.to_string()).collect(),
            badges,
            is_active: true,
            service_limit: if monthly_price > 0 { 15 } else { 2 },
            monthly_price,
            yearly_price: monthly_price * 10,
        }
    }

    fn detective(package_id: Option<&str>) -> Detective {
        Detective {
            id: DetectiveId("det-1".to_string()),
            business_name: "Poirot Partners".to_string(),
            country: "GB".to_string(),
            status: DetectiveStatus::Active,
            is_verified: true,
            created_at: now(),
            contacts: ContactDetails::default(),
            subscription: SubscriptionState {
                package_id: package_id.map(|id| PackageId(id.to_string())),
                billing_cycle: package_id.map(|_| BillingCycle::Yearly),
                ..SubscriptionState::default()
            },
            grants: Vec::new(),
            revision: 0,
        }
    }

    fn store() -> CountingPackages {
        let mut packages = HashMap::new();
        for package in [
            package("free", &["contact_email"], 0),
            package("pro", &["contact_email", "contact_phone"], 1499),
        ] {
            packages.insert(package.id.clone(), package);
        }
        CountingPackages {
            packages,
            ..CountingPackages::default()
        }
    }

    fn resolver<P: PackageStore + 'static>(packages: Arc<P>) -> EntitlementResolver<P> {
        EntitlementResolver::new(
            packages,
            PackageId("free".to_string()),
            Duration::from_millis(50),
        )
    }

    #[tokio::test]
    async fn free_plan_is_fetched_once() {
        let packages = Arc::new(store());
        let resolver = resolver(packages.clone());

        for _ in 0..3 {
            let resolved = resolver.resolve(&detective(None), now()).await;
            assert!(resolved.features.contains("contact_email"));
            assert_eq!(resolved.service_limit, 2);
            assert!(!resolved.is_paid());
        }

        assert_eq!(packages.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn paid_package_overlays_features() {
        let resolver = resolver(Arc::new(store()));
        let resolved = resolver.resolve(&detective(Some("pro")), now()).await;

        assert!(resolved.is_paid());
        assert!(resolved.features.contains("contact_phone"));
        assert_eq!(resolved.service_limit, 15);
        assert_eq!(resolved.badges.get(&BadgeKind::BlueTick), Some(&true));
    }

    #[tokio::test]
    async fn lookup_failure_falls_back_to_free_tier() {
        let mut packages = store();
        packages.failing.push(PackageId("pro".to_string()));
        let resolver = resolver(Arc::new(packages));

        let resolved = resolver.resolve(&detective(Some("pro")), now()).await;
        assert!(resolved.package.is_none());
        assert_eq!(
            resolved.features,
            ["contact_email".to_string()].into_iter().collect()
        );
        assert!(resolved.badges.is_empty());
    }

    #[tokio::test]
    async fn missing_package_falls_back_to_free_tier() {
        let resolver = resolver(Arc::new(store()));
        let resolved = resolver.resolve(&detective(Some("retired")), now()).await;
        assert!(resolved.package.is_none());
        assert_eq!(resolved.service_limit, 2);
    }

    #[tokio::test]
    async fn unavailable_free_plan_yields_empty_baseline() {
        let mut packages = store();
        packages.failing.push(PackageId("free".to_string()));
        let packages = Arc::new(packages);
        let resolver = resolver(packages.clone());

        let first = resolver.resolve(&detective(None), now()).await;
        assert!(first.features.is_empty());
        assert_eq!(first.service_limit, FALLBACK_SERVICE_LIMIT);

        resolver.resolve(&detective(None), now()).await;
        assert_eq!(
            packages.lookups.load(Ordering::SeqCst),
            2,
            "failed baseline reads are retried"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_lookup_times_out_to_free_tier() {
        let resolver = resolver(Arc::new(StalledPackages));
        let resolved = resolver.resolve(&detective(Some("pro")), now()).await;
        assert!(resolved.features.is_empty());
        assert!(resolved.package.is_none());
    }
}

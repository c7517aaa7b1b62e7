//! Visibility service: the consumer operations over entitlements, expiry, ranking and the
//! read-through cache.
//!
//! Every write persists first and then invalidates the listing prefix and the detective's
//! profile key before returning, so a read issued after a write completes never sees the
//! pre-write payload. Owner and admin reads never touch the cache.

mod listing;
pub mod router;
mod sweeper;
mod views;

#[cfg(test)]
mod tests;

pub use listing::{ListingQuery, NormalizedListing, DEFAULT_LIMIT, MAX_LIMIT};
pub use router::visibility_router;
pub use sweeper::{run_expiry_sweeper, spawn_expiry_sweeper};
pub use views::{DetectiveListing, DetectiveView, PaymentReceipt, SubscriptionSummary, Viewer};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::http::StatusCode;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::cache::{profile_key, ReadThrough, ResponseCache};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::domain::{
    BillingCycle, Detective, DetectiveId, DetectiveRecord, DetectiveStatus, PackageId,
    ServiceId, ServiceRecord, SubscriptionPackage, VisibilityOverride, VisibilityOverridePatch,
};
use crate::entitlements::{EntitlementResolver, ResolvedEntitlement};
use crate::ranking::{rank, RankCandidate, ScoreWeights};
use crate::store::{DetectiveStore, PackageStore, StoreError};
use crate::subscription::{
    expiry, payments, ActivationError, DowngradeSchedule, DuplicateGrantConflict, ExpiryApplier,
    SweepReport,
};

/// Confirmed subscription payment.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubscriptionPayment {
    pub package_id: PackageId,
    pub billing_cycle: BillingCycle,
    pub confirmation_ref: String,
}

/// Confirmed Blue Tick add-on payment.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AddonPayment {
    pub confirmation_ref: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DowngradeRequest {
    pub package_id: PackageId,
    pub billing_cycle: BillingCycle,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewService {
    pub title: String,
    #[serde(default)]
    pub category: String,
}

static SERVICE_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_service_id() -> ServiceId {
    let id = SERVICE_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    ServiceId(format!("svc-{id:06}"))
}

/// Service composing the entitlement resolver, expiry applier, ranking engine and cache.
pub struct VisibilityService<D, P> {
    detectives: Arc<D>,
    resolver: Arc<EntitlementResolver<P>>,
    applier: ExpiryApplier<D, P>,
    cache: ReadThrough,
    clock: Arc<dyn Clock>,
    weights: ScoreWeights,
    sweep_guard: Mutex<()>,
}

impl<D, P> VisibilityService<D, P>
where
    D: DetectiveStore + 'static,
    P: PackageStore + 'static,
{
    pub fn new(
        detectives: Arc<D>,
        packages: Arc<P>,
        cache: Arc<dyn ResponseCache>,
        clock: Arc<dyn Clock>,
        config: &EngineConfig,
    ) -> Self {
        let resolver = Arc::new(EntitlementResolver::new(
            packages,
            config.free_plan_id.clone(),
            config.package_lookup_timeout,
        ));
        let applier = ExpiryApplier::new(
            detectives.clone(),
            resolver.clone(),
            config.expiry_sweep_concurrency,
        );

        Self {
            detectives,
            resolver,
            applier,
            cache: ReadThrough::new(cache, config.listing_cache_ttl_secs),
            clock,
            weights: ScoreWeights::STANDARD,
            sweep_guard: Mutex::new(()),
        }
    }

    /// Single detective profile for `viewer`.
    ///
    /// Public reads are cached and masked, and only active detectives are visible. The owner's
    /// read first applies any due expiry transition; owner and admin reads are unmasked and
    /// carry the subscription summary.
    pub async fn get_detective_view(
        &self,
        id: &DetectiveId,
        viewer: &Viewer,
    ) -> Result<DetectiveView, VisibilityError> {
        if viewer.is_privileged_for(id) {
            return self.privileged_view(id, viewer).await;
        }

        let key = profile_key(id);
        if let Some(view) = self.cache.lookup::<DetectiveView>(&key) {
            return Ok(view);
        }

        let generation = self.cache.generation();
        let record = self.load_record(id).await?;
        if record.detective.status != DetectiveStatus::Active {
            return Err(VisibilityError::DetectiveNotFound(id.clone()));
        }
        let resolved = self.resolver.resolve(&record.detective, self.clock.now()).await;
        let view = DetectiveView::public(&record, &resolved);
        self.cache.store(&key, &view, generation);
        Ok(view)
    }

    async fn privileged_view(
        &self,
        id: &DetectiveId,
        viewer: &Viewer,
    ) -> Result<DetectiveView, VisibilityError> {
        let now = self.clock.now();
        if viewer.owns(id) {
            match self.applier.apply_to(id, now).await {
                Ok(check) if check.transition.is_some() => self.cache.invalidate_detective(id),
                Ok(_) => {}
                Err(StoreError::NotFound) => {
                    return Err(VisibilityError::DetectiveNotFound(id.clone()))
                }
                Err(err) => warn!(
                    detective_id = %id,
                    error = %err,
                    "inline expiry failed; serving stored subscription"
                ),
            }
        }

        let record = self.load_record(id).await?;
        let resolved = self.resolver.resolve(&record.detective, now).await;
        Ok(DetectiveView::privileged(&record, &resolved, viewer))
    }

    /// Ranked, filtered and paginated public listing.
    pub async fn list_detectives(
        &self,
        query: &ListingQuery,
    ) -> Result<DetectiveListing, VisibilityError> {
        let normalized = query.normalize().map_err(VisibilityError::InvalidInput)?;
        let key = normalized.cache_key();
        if let Some(listing) = self.cache.lookup::<DetectiveListing>(&key) {
            return Ok(listing);
        }

        let generation = self.cache.generation();
        let now = self.clock.now();
        let records = self.detectives.list_records().await?;
        let mut resolved_by_id: HashMap<DetectiveId, (DetectiveRecord, ResolvedEntitlement)> =
            HashMap::new();
        let mut candidates = Vec::new();

        for record in records.into_iter().filter(|record| normalized.matches(record)) {
            let resolved = self.resolver.resolve(&record.detective, now).await;
            if let Some(plan) = &normalized.plan {
                let effective = resolved
                    .package
                    .as_ref()
                    .map(|package| &package.id)
                    .unwrap_or(self.resolver.free_plan_id());
                if effective != plan {
                    continue;
                }
            }

            candidates.push(RankCandidate {
                id: record.detective.id.clone(),
                created_at: record.detective.created_at,
                visibility: record.visibility,
                is_paid: resolved.is_paid(),
                badges: resolved.badges.clone(),
                is_verified: record.detective.is_verified,
                rating: record.rating,
            });
            resolved_by_id.insert(record.detective.id.clone(), (record, resolved));
        }

        let ranked = rank(candidates, &self.weights);
        let total = ranked.len();
        let items = ranked
            .iter()
            .skip(normalized.offset)
            .take(normalized.limit)
            .filter_map(|id| resolved_by_id.get(id))
            .map(|(record, resolved)| DetectiveView::public(record, resolved))
            .collect();

        let listing = DetectiveListing {
            items,
            total,
            limit: normalized.limit,
            offset: normalized.offset,
        };
        self.cache.store(&key, &listing, generation);
        Ok(listing)
    }

    /// Partial admin override. `manual_rank: null` clears the rank.
    pub async fn set_visibility_override(
        &self,
        id: &DetectiveId,
        patch: &VisibilityOverridePatch,
    ) -> Result<VisibilityOverride, VisibilityError> {
        let record = self.load_record(id).await?;
        let next = patch.apply(record.visibility);
        self.detectives.set_visibility(id, next).await?;
        self.cache.invalidate_detective(id);
        info!(
            detective_id = %id,
            is_visible = next.is_visible,
            is_featured = next.is_featured,
            manual_rank = ?next.manual_rank,
            "visibility override updated"
        );
        Ok(next)
    }

    /// Apply a verified package payment. A replayed confirmation succeeds without mutation even
    /// if the package has since been deactivated.
    pub async fn activate_subscription(
        &self,
        id: &DetectiveId,
        payment: &SubscriptionPayment,
    ) -> Result<PaymentReceipt, VisibilityError> {
        let current = self
            .detectives
            .fetch(id)
            .await?
            .ok_or_else(|| VisibilityError::DetectiveNotFound(id.clone()))?;
        if current.subscription.has_applied(&payment.confirmation_ref) {
            info!(
                detective_id = %id,
                confirmation_ref = %payment.confirmation_ref,
                "subscription payment already applied"
            );
            return self
                .receipt(id, payments::ConfirmationOutcome::AlreadyApplied)
                .await;
        }

        let package = self.available_package(&payment.package_id).await?;
        let now = self.clock.now();
        let outcome = self
            .update_detective(id, |detective| {
                payments::activate_subscription(
                    detective,
                    &package,
                    payment.billing_cycle,
                    &payment.confirmation_ref,
                    now,
                )
            })
            .await?;
        info!(
            detective_id = %id,
            package_id = %package.id,
            cycle = payment.billing_cycle.label(),
            ?outcome,
            "subscription payment confirmed"
        );
        self.receipt(id, outcome).await
    }

    pub async fn grant_blue_tick_addon(
        &self,
        id: &DetectiveId,
        payment: &AddonPayment,
    ) -> Result<PaymentReceipt, VisibilityError> {
        let now = self.clock.now();
        let outcome = self
            .update_detective(id, |detective| {
                payments::grant_blue_tick_addon(detective, &payment.confirmation_ref, now)
            })
            .await?;
        info!(detective_id = %id, ?outcome, "blue tick add-on confirmed");
        self.receipt(id, outcome).await
    }

    pub async fn schedule_downgrade(
        &self,
        id: &DetectiveId,
        request: &DowngradeRequest,
    ) -> Result<DowngradeSchedule, VisibilityError> {
        let package = self.available_package(&request.package_id).await?;
        let now = self.clock.now();
        let schedule = self
            .update_detective(id, |detective| {
                Ok::<_, VisibilityError>(expiry::schedule_downgrade(
                    detective,
                    &package,
                    request.billing_cycle,
                    now,
                ))
            })
            .await?;
        info!(detective_id = %id, package_id = %package.id, ?schedule, "downgrade recorded");
        Ok(schedule)
    }

    /// Add a service, enforcing the effective package's service limit.
    pub async fn create_service(
        &self,
        id: &DetectiveId,
        request: &NewService,
    ) -> Result<ServiceRecord, VisibilityError> {
        let title = request.title.trim();
        if title.is_empty() {
            return Err(VisibilityError::InvalidInput(
                "service title is required".to_string(),
            ));
        }

        let now = self.clock.now();
        let record = self.load_record(id).await?;
        let resolved = self.resolver.resolve(&record.detective, now).await;
        if record.services.len() >= resolved.service_limit as usize {
            return Err(VisibilityError::ServiceLimitReached {
                limit: resolved.service_limit,
            });
        }

        let service = self
            .detectives
            .insert_service(ServiceRecord {
                id: next_service_id(),
                detective_id: id.clone(),
                title: title.to_string(),
                category: request.category.trim().to_string(),
                created_at: now,
            })
            .await?;
        self.cache.invalidate_detective(id);
        Ok(service)
    }

    /// Run one expiry sweep now. Rejected while another sweep is in flight.
    pub async fn run_expiry_sweep(&self) -> Result<SweepReport, VisibilityError> {
        let _running = self
            .sweep_guard
            .try_lock()
            .map_err(|_| VisibilityError::SweepInProgress)?;

        let report = self.applier.sweep(self.clock.now()).await?;
        for id in &report.transitioned {
            self.cache.invalidate_detective(id);
        }
        Ok(report)
    }

    async fn load_record(&self, id: &DetectiveId) -> Result<DetectiveRecord, VisibilityError> {
        self.detectives
            .fetch_record(id)
            .await?
            .ok_or_else(|| VisibilityError::DetectiveNotFound(id.clone()))
    }

    async fn available_package(
        &self,
        id: &PackageId,
    ) -> Result<SubscriptionPackage, VisibilityError> {
        match self.resolver.fetch_package(id).await? {
            Some(package) if package.is_active => Ok(package),
            _ => Err(VisibilityError::PackageUnavailable(id.clone())),
        }
    }

    /// Read-modify-write with one retry on a stale revision. Unchanged records are not saved.
    async fn update_detective<T, E, F>(
        &self,
        id: &DetectiveId,
        mut change: F,
    ) -> Result<T, VisibilityError>
    where
        F: FnMut(&mut Detective) -> Result<T, E>,
        VisibilityError: From<E>,
    {
        let mut retried = false;
        loop {
            let mut detective = self
                .detectives
                .fetch(id)
                .await?
                .ok_or_else(|| VisibilityError::DetectiveNotFound(id.clone()))?;
            let before = detective.clone();
            let outcome = change(&mut detective)?;
            if detective == before {
                return Ok(outcome);
            }

            match self.detectives.save(detective).await {
                Ok(_) => {
                    self.cache.invalidate_detective(id);
                    return Ok(outcome);
                }
                Err(StoreError::Conflict) if !retried => {
                    retried = true;
                    warn!(detective_id = %id, "write conflicted; retrying on fresh record");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn receipt(
        &self,
        id: &DetectiveId,
        outcome: payments::ConfirmationOutcome,
    ) -> Result<PaymentReceipt, VisibilityError> {
        let record = self.load_record(id).await?;
        let resolved = self.resolver.resolve(&record.detective, self.clock.now()).await;
        Ok(PaymentReceipt {
            detective_id: id.clone(),
            outcome,
            subscription: SubscriptionSummary::new(&record, &resolved),
        })
    }
}

/// Error raised by the visibility service.
#[derive(Debug, thiserror::Error)]
pub enum VisibilityError {
    #[error("detective {0} not found")]
    DetectiveNotFound(DetectiveId),
    #[error("package {0} is missing or inactive")]
    PackageUnavailable(PackageId),
    #[error(transparent)]
    Activation(#[from] ActivationError),
    #[error("service limit of {limit} reached for the current plan")]
    ServiceLimitReached { limit: u32 },
    #[error(transparent)]
    DuplicateGrant(#[from] DuplicateGrantConflict),
    #[error("an expiry sweep is already running")]
    SweepInProgress,
    #[error("invalid request: {0}")]
    InvalidInput(String),
    #[error("viewer is not allowed to perform this action")]
    Forbidden,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl VisibilityError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            VisibilityError::DetectiveNotFound(_) | VisibilityError::Store(StoreError::NotFound) => {
                StatusCode::NOT_FOUND
            }
            VisibilityError::PackageUnavailable(_)
            | VisibilityError::Activation(_)
            | VisibilityError::ServiceLimitReached { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            VisibilityError::DuplicateGrant(_)
            | VisibilityError::SweepInProgress
            | VisibilityError::Store(StoreError::Conflict) => StatusCode::CONFLICT,
            VisibilityError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            VisibilityError::Forbidden => StatusCode::FORBIDDEN,
            VisibilityError::Store(StoreError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{error, info, warn};

use super::expiry::{apply_expiry, ExpiryTransition};
use crate::domain::{Detective, DetectiveId};
use crate::entitlements::EntitlementResolver;
use crate::store::{DetectiveStore, PackageStore, StoreError};

/// A detective whose downgrade could not be applied during a sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepFailure {
    pub detective_id: DetectiveId,
    pub reason: String,
}

/// Operational summary of one expiry sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub checked: usize,
    pub transitioned: Vec<DetectiveId>,
    pub errors: Vec<SweepFailure>,
}

/// Record state after an expiry check, with the transition if one fired.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpiryCheck {
    pub detective: Detective,
    pub transition: Option<ExpiryTransition>,
}

/// Applies expiry transitions to stored detectives, one record at a time or as a sweep.
pub struct ExpiryApplier<D, P> {
    detectives: Arc<D>,
    resolver: Arc<EntitlementResolver<P>>,
    concurrency: usize,
}

impl<D, P> ExpiryApplier<D, P>
where
    D: DetectiveStore + 'static,
    P: PackageStore + 'static,
{
    pub fn new(
        detectives: Arc<D>,
        resolver: Arc<EntitlementResolver<P>>,
        concurrency: usize,
    ) -> Self {
        Self {
            detectives,
            resolver,
            concurrency: concurrency.max(1),
        }
    }

    /// Check a single detective and persist the transition if its subscription expired.
    ///
    /// A concurrent writer causes one retry against a fresh read; by then the transition has
    /// usually been applied by the other writer and the retry is a no-op.
    pub async fn apply_to(
        &self,
        id: &DetectiveId,
        now: DateTime<Utc>,
    ) -> Result<ExpiryCheck, StoreError> {
        match self.try_apply(id, now).await {
            Err(StoreError::Conflict) => {
                warn!(detective_id = %id, "expiry write conflicted; retrying on fresh record");
                self.try_apply(id, now).await
            }
            other => other,
        }
    }

    async fn try_apply(
        &self,
        id: &DetectiveId,
        now: DateTime<Utc>,
    ) -> Result<ExpiryCheck, StoreError> {
        let mut detective = self
            .detectives
            .fetch(id)
            .await?
            .ok_or(StoreError::NotFound)?;

        if !detective.subscription.is_expired_at(now) {
            return Ok(ExpiryCheck {
                detective,
                transition: None,
            });
        }

        let pending = match detective.subscription.pending_package_id.clone() {
            Some(pending_id) => match self.resolver.fetch_package(&pending_id).await {
                Ok(package) => package,
                Err(err) => {
                    warn!(
                        detective_id = %id,
                        package_id = %pending_id,
                        error = %err,
                        "pending package lookup failed; keeping billing-cycle expiry"
                    );
                    None
                }
            },
            None => None,
        };
        let pending_is_free = match (&detective.subscription.pending_package_id, &pending) {
            (Some(pending_id), _) if pending_id == self.resolver.free_plan_id() => true,
            (_, Some(package)) => package.is_free(),
            _ => false,
        };

        let Some(transition) = apply_expiry(&mut detective, now, pending_is_free) else {
            return Ok(ExpiryCheck {
                detective,
                transition: None,
            });
        };
        if matches!(transition, ExpiryTransition::Rotated { .. }) {
            detective.sync_package_grants(pending.as_ref(), now);
        }

        let detective = self.detectives.save(detective).await?;
        info!(
            detective_id = %id,
            reason = transition.reason(),
            package_id = ?detective.subscription.package_id,
            "applied subscription expiry"
        );

        Ok(ExpiryCheck {
            detective,
            transition: Some(transition),
        })
    }

    /// Transition every expired subscription. Per-record failures are collected, not raised.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, StoreError> {
        let expired = self.detectives.expired_subscriptions(now).await?;
        info!(count = expired.len(), "starting subscription expiry sweep");

        let results: Vec<(DetectiveId, Result<ExpiryCheck, StoreError>)> = stream::iter(expired)
            .map(|id| async move {
                let result = self.apply_to(&id, now).await;
                (id, result)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut report = SweepReport {
            checked: results.len(),
            ..SweepReport::default()
        };
        for (id, result) in results {
            match result {
                Ok(ExpiryCheck {
                    transition: Some(_),
                    ..
                }) => report.transitioned.push(id),
                Ok(_) => {}
                Err(err) => {
                    error!(detective_id = %id, error = %err, "failed to apply subscription expiry");
                    report.errors.push(SweepFailure {
                        detective_id: id,
                        reason: err.to_string(),
                    });
                }
            }
        }
        report.transitioned.sort();
        report
            .errors
            .sort_by(|left, right| left.detective_id.cmp(&right.detective_id));

        info!(
            checked = report.checked,
            transitioned = report.transitioned.len(),
            failed = report.errors.len(),
            "subscription expiry sweep completed"
        );
        Ok(report)
    }
}

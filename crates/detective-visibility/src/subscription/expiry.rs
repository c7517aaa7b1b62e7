use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{BillingCycle, Detective, PackageId, SubscriptionPackage, SubscriptionState};

/// Subscription lifecycle states the expiry applier distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionPhase<'a> {
    Free,
    Active {
        package: Option<&'a PackageId>,
    },
    ActiveWithPending {
        package: Option<&'a PackageId>,
        pending: &'a PackageId,
    },
}

impl<'a> SubscriptionPhase<'a> {
    pub fn of(state: &'a SubscriptionState) -> Self {
        match (&state.package_id, &state.pending_package_id, state.expires_at) {
            (package, Some(pending), _) => SubscriptionPhase::ActiveWithPending {
                package: package.as_ref(),
                pending,
            },
            (Some(package), None, _) => SubscriptionPhase::Active {
                package: Some(package),
            },
            (None, None, Some(_)) => SubscriptionPhase::Active { package: None },
            (None, None, None) => SubscriptionPhase::Free,
        }
    }
}

/// A transition applied because the subscription expiry passed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExpiryTransition {
    /// The queued package replaced the expired one.
    Rotated {
        from: Option<PackageId>,
        to: PackageId,
    },
    /// Nothing was queued; the detective fell back to the free tier.
    Lapsed { from: Option<PackageId> },
}

impl ExpiryTransition {
    pub fn reason(&self) -> &'static str {
        match self {
            ExpiryTransition::Rotated { .. } => "pending_downgrade",
            ExpiryTransition::Lapsed { .. } => "expiry",
        }
    }
}

/// Apply the expiry transition to `detective` if its subscription expired at `now`.
///
/// `pending_is_free` tells whether the queued package is a free plan, in which case the rotated
/// subscription carries no expiry. Returns `None`, leaving the record untouched, while the
/// subscription is still running, has no expiry at all, or is already on the free tier, so
/// repeated calls are no-ops.
pub fn apply_expiry(
    detective: &mut Detective,
    now: DateTime<Utc>,
    pending_is_free: bool,
) -> Option<ExpiryTransition> {
    if !detective.subscription.is_expired_at(now) {
        return None;
    }

    let transition = match SubscriptionPhase::of(&detective.subscription) {
        SubscriptionPhase::Free => return None,
        SubscriptionPhase::Active { package } => ExpiryTransition::Lapsed {
            from: package.cloned(),
        },
        SubscriptionPhase::ActiveWithPending { package, pending } => ExpiryTransition::Rotated {
            from: package.cloned(),
            to: pending.clone(),
        },
    };

    let subscription = &mut detective.subscription;
    match &transition {
        ExpiryTransition::Rotated { to, .. } => {
            let cycle = subscription.pending_billing_cycle.take();
            subscription.package_id = Some(to.clone());
            subscription.pending_package_id = None;
            subscription.billing_cycle = cycle;
            subscription.activated_at = Some(now);
            subscription.expires_at = match cycle {
                Some(cycle) if !pending_is_free => Some(cycle.expiry_from(now)),
                _ => None,
            };
        }
        ExpiryTransition::Lapsed { .. } => {
            subscription.package_id = None;
            subscription.billing_cycle = None;
            subscription.expires_at = None;
            subscription.pending_billing_cycle = None;
        }
    }

    detective.drop_package_grants();
    Some(transition)
}

/// How a requested downgrade was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DowngradeSchedule {
    /// Queued; takes effect once the current subscription expires.
    Scheduled { effective_at: DateTime<Utc> },
    /// There was no running period to wait for, so the package applied immediately.
    Applied { expires_at: Option<DateTime<Utc>> },
}

/// Queue `package` to replace the current subscription when it expires.
///
/// The effective date is the recorded expiry, or one derived from the activation date and
/// billing cycle. Without either, the change applies immediately.
pub fn schedule_downgrade(
    detective: &mut Detective,
    package: &SubscriptionPackage,
    cycle: BillingCycle,
    now: DateTime<Utc>,
) -> DowngradeSchedule {
    let subscription = &mut detective.subscription;
    let effective_at = subscription.expires_at.or_else(|| {
        subscription
            .activated_at
            .zip(subscription.billing_cycle)
            .map(|(activated_at, cycle)| cycle.expiry_from(activated_at))
    });

    match effective_at {
        Some(effective_at) => {
            subscription.pending_package_id = Some(package.id.clone());
            subscription.pending_billing_cycle = Some(cycle);
            subscription.expires_at = Some(effective_at);
            DowngradeSchedule::Scheduled { effective_at }
        }
        None => {
            let expires_at = (!package.is_free()).then(|| cycle.expiry_from(now));
            subscription.package_id = Some(package.id.clone());
            subscription.billing_cycle = Some(cycle);
            subscription.activated_at = Some(now);
            subscription.expires_at = expires_at;
            subscription.pending_package_id = None;
            subscription.pending_billing_cycle = None;
            detective.sync_package_grants(Some(package), now);
            DowngradeSchedule::Applied { expires_at }
        }
    }
}

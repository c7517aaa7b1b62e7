//! Entitlement resolution: which features and badges a detective may show publicly.
//!
//! Resolution is deny-by-default. Anything short of an active, unexpired package that the
//! package store actually returned resolves to the free plan baseline.

mod resolver;

pub use resolver::{EntitlementResolver, ResolvedEntitlement};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    BadgeKind, BadgeSet, ContactCapability, ContactDetails, Detective, FeatureSet,
    SubscriptionPackage,
};

/// Service limit applied when even the free plan cannot be read.
pub const FALLBACK_SERVICE_LIMIT: u32 = 2;

/// The package that currently governs `detective`, if `package` qualifies.
///
/// `package` must be the one the detective is subscribed to, be active, and the subscription
/// must not have expired at `now`.
pub fn effective_package<'a>(
    detective: &Detective,
    package: Option<&'a SubscriptionPackage>,
    now: DateTime<Utc>,
) -> Option<&'a SubscriptionPackage> {
    let subscribed = detective.subscription.package_id.as_ref()?;
    let package = package?;
    if &package.id != subscribed || !package.is_active {
        return None;
    }
    if detective.subscription.is_expired_at(now) {
        return None;
    }
    Some(package)
}

/// Effective feature set: the package's features replace the baseline, never union with it.
pub fn resolve_features(
    detective: &Detective,
    package: Option<&SubscriptionPackage>,
    baseline: &FeatureSet,
    now: DateTime<Utc>,
) -> FeatureSet {
    match effective_package(detective, package, now) {
        Some(package) => package.features.clone(),
        None => baseline.clone(),
    }
}

/// Package badges of the effective package plus Blue Tick from an add-on grant.
///
/// A package-sourced Blue Tick only counts through the effective package, so it
/// disappears as soon as the package is deactivated or the period runs out.
pub fn compute_effective_badges(
    detective: &Detective,
    package: Option<&SubscriptionPackage>,
    now: DateTime<Utc>,
) -> BadgeSet {
    let mut badges = BadgeSet::new();
    if let Some(package) = effective_package(detective, package, now) {
        for (badge, granted) in &package.badges {
            if *granted {
                badges.insert(*badge, true);
            }
        }
    }
    if detective.blue_tick_addon().is_some() {
        badges.insert(BadgeKind::BlueTick, true);
    }
    badges
}

/// Contact fields a viewer may see. Redacted fields are omitted when serialized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaskedContacts {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub whatsapp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
}

impl MaskedContacts {
    pub fn unmasked(contacts: &ContactDetails) -> Self {
        Self {
            email: non_empty(&contacts.email),
            phone: non_empty(&contacts.phone),
            whatsapp: non_empty(&contacts.whatsapp),
            website: non_empty(&contacts.website),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_ref()
        .filter(|value| !value.trim().is_empty())
        .cloned()
}

/// Redact each contact field whose capability token is absent from `features`.
pub fn mask_contact_fields(detective: &Detective, features: &FeatureSet) -> MaskedContacts {
    let mut masked = MaskedContacts::unmasked(&detective.contacts);
    for capability in ContactCapability::ALL {
        if features.contains(capability.token()) {
            continue;
        }
        let slot = match capability {
            ContactCapability::Email => &mut masked.email,
            ContactCapability::Phone => &mut masked.phone,
            ContactCapability::Whatsapp => &mut masked.whatsapp,
            ContactCapability::Website => &mut masked.website,
        };
        *slot = None;
    }
    masked
}

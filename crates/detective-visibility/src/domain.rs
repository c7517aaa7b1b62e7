use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};

/// Identifier wrapper for detective profiles.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DetectiveId(pub String);

impl fmt::Display for DetectiveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier wrapper for subscription packages.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PackageId(pub String);

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ServiceId(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingCycle {
    Monthly,
    Yearly,
}

impl BillingCycle {
    /// Expiry for a subscription period starting at `activated_at`.
    ///
    /// Monthly periods are a flat 30 days; yearly periods advance the calendar year.
    pub fn expiry_from(self, activated_at: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            BillingCycle::Monthly => activated_at + Duration::days(30),
            BillingCycle::Yearly => activated_at
                .checked_add_months(Months::new(12))
                .unwrap_or(activated_at + Duration::days(365)),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            BillingCycle::Monthly => "monthly",
            BillingCycle::Yearly => "yearly",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectiveStatus {
    Pending,
    Active,
    Suspended,
    Inactive,
}

impl DetectiveStatus {
    pub fn label(self) -> &'static str {
        match self {
            DetectiveStatus::Pending => "pending",
            DetectiveStatus::Active => "active",
            DetectiveStatus::Suspended => "suspended",
            DetectiveStatus::Inactive => "inactive",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "active" => Some(Self::Active),
            "suspended" => Some(Self::Suspended),
            "inactive" => Some(Self::Inactive),
            _ => None,
        }
    }
}

/// Display badges a package or add-on can grant. The set is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BadgeKind {
    BlueTick,
    Pro,
    Recommended,
}

impl BadgeKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "blueTick" | "blue_tick" => Some(Self::BlueTick),
            "pro" => Some(Self::Pro),
            "recommended" => Some(Self::Recommended),
            _ => None,
        }
    }
}

/// Contact fields gated by capability tokens in a package feature set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContactCapability {
    Email,
    Phone,
    Whatsapp,
    Website,
}

impl ContactCapability {
    pub const ALL: [ContactCapability; 4] = [
        ContactCapability::Email,
        ContactCapability::Phone,
        ContactCapability::Whatsapp,
        ContactCapability::Website,
    ];

    pub fn token(self) -> &'static str {
        match self {
            ContactCapability::Email => "contact_email",
            ContactCapability::Phone => "contact_phone",
            ContactCapability::Whatsapp => "contact_whatsapp",
            ContactCapability::Website => "contact_website",
        }
    }
}

pub type FeatureSet = BTreeSet<String>;

/// Only granted badges are present; an empty map means no badges.
pub type BadgeSet = BTreeMap<BadgeKind, bool>;

/// Read-only package definition served by the package store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionPackage {
    pub id: PackageId,
    pub name: String,
    pub features: FeatureSet,
    pub badges: BTreeMap<BadgeKind, bool>,
    pub is_active: bool,
    pub service_limit: u32,
    pub monthly_price: u32,
    pub yearly_price: u32,
}

impl SubscriptionPackage {
    pub fn is_free(&self) -> bool {
        self.monthly_price == 0 && self.yearly_price == 0
    }

    pub fn price_for(&self, cycle: BillingCycle) -> u32 {
        match cycle {
            BillingCycle::Monthly => self.monthly_price,
            BillingCycle::Yearly => self.yearly_price,
        }
    }

    pub fn grants_badge(&self, badge: BadgeKind) -> bool {
        self.badges.get(&badge).copied().unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantSource {
    Package,
    Addon,
}

/// A single active entitlement grant. "Has badge X" means any grant of kind X exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitlementGrant {
    pub source: GrantSource,
    pub kind: BadgeKind,
    pub granted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation_ref: Option<String>,
}

/// Subscription fields written only by payment confirmation and the expiry applier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionState {
    pub package_id: Option<PackageId>,
    pub billing_cycle: Option<BillingCycle>,
    pub activated_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub pending_package_id: Option<PackageId>,
    pub pending_billing_cycle: Option<BillingCycle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation_ref: Option<String>,
    /// Every activation reference ever applied, so older payments cannot be replayed.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub applied_confirmations: BTreeSet<String>,
}

impl SubscriptionState {
    pub fn has_applied(&self, confirmation_ref: &str) -> bool {
        self.confirmation_ref.as_deref() == Some(confirmation_ref)
            || self.applied_confirmations.contains(confirmation_ref)
    }

    /// Whether the recorded expiry has passed at `now`. No expiry never lapses.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|expires| now >= expires).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactDetails {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub whatsapp: Option<String>,
    pub website: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RatingAggregate {
    pub avg: f64,
    pub count: u32,
}

/// Admin-controlled visibility settings, keyed by detective id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisibilityOverride {
    pub is_visible: bool,
    pub is_featured: bool,
    pub manual_rank: Option<i32>,
}

impl Default for VisibilityOverride {
    fn default() -> Self {
        Self {
            is_visible: true,
            is_featured: false,
            manual_rank: None,
        }
    }
}

/// Partial update applied by the admin override endpoint.
///
/// `manual_rank: Some(None)` clears an existing rank.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct VisibilityOverridePatch {
    #[serde(default)]
    pub is_visible: Option<bool>,
    #[serde(default)]
    pub is_featured: Option<bool>,
    #[serde(default, deserialize_with = "deserialize_patch_field")]
    pub manual_rank: Option<Option<i32>>,
}

impl VisibilityOverridePatch {
    pub fn apply(&self, current: VisibilityOverride) -> VisibilityOverride {
        VisibilityOverride {
            is_visible: self.is_visible.unwrap_or(current.is_visible),
            is_featured: self.is_featured.unwrap_or(current.is_featured),
            manual_rank: self.manual_rank.unwrap_or(current.manual_rank),
        }
    }
}

fn deserialize_patch_field<'de, D>(deserializer: D) -> Result<Option<Option<i32>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<i32>::deserialize(deserializer).map(Some)
}

/// Persistent detective record as read from and written to the detective store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detective {
    pub id: DetectiveId,
    pub business_name: String,
    pub country: String,
    pub status: DetectiveStatus,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
    pub contacts: ContactDetails,
    pub subscription: SubscriptionState,
    #[serde(default)]
    pub grants: Vec<EntitlementGrant>,
    /// Optimistic concurrency token maintained by the store.
    #[serde(default)]
    pub revision: u64,
}

impl Detective {
    pub fn has_badge_grant(&self, kind: BadgeKind) -> bool {
        self.grants.iter().any(|grant| grant.kind == kind)
    }

    pub fn has_blue_tick(&self) -> bool {
        self.has_badge_grant(BadgeKind::BlueTick)
    }

    pub fn has_package_blue_tick(&self) -> bool {
        self.grants
            .iter()
            .any(|grant| grant.kind == BadgeKind::BlueTick && grant.source == GrantSource::Package)
    }

    pub fn blue_tick_addon(&self) -> Option<&EntitlementGrant> {
        self.grants
            .iter()
            .find(|grant| grant.kind == BadgeKind::BlueTick && grant.source == GrantSource::Addon)
    }

    pub fn blue_tick_activated_at(&self) -> Option<DateTime<Utc>> {
        self.grants
            .iter()
            .filter(|grant| grant.kind == BadgeKind::BlueTick)
            .map(|grant| grant.granted_at)
            .min()
    }

    pub fn drop_package_grants(&mut self) {
        self.grants.retain(|grant| grant.source != GrantSource::Package);
    }

    /// Align package-sourced grants with the badges of the current package.
    pub fn sync_package_grants(
        &mut self,
        package: Option<&SubscriptionPackage>,
        now: DateTime<Utc>,
    ) {
        let wants_blue_tick = package
            .map(|package| package.is_active && package.grants_badge(BadgeKind::BlueTick))
            .unwrap_or(false);
        let has_blue_tick = self.has_package_blue_tick();

        if wants_blue_tick && !has_blue_tick {
            self.grants.push(EntitlementGrant {
                source: GrantSource::Package,
                kind: BadgeKind::BlueTick,
                granted_at: now,
                confirmation_ref: None,
            });
        } else if !wants_blue_tick && has_blue_tick {
            self.drop_package_grants();
        }
    }
}

/// Service offered by a detective; public views list them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub id: ServiceId,
    pub detective_id: DetectiveId,
    pub title: String,
    pub category: String,
    pub created_at: DateTime<Utc>,
}

/// Detective joined with the read-only inputs ranking and views need.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectiveRecord {
    pub detective: Detective,
    pub visibility: VisibilityOverride,
    pub rating: RatingAggregate,
    pub services: Vec<ServiceRecord>,
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    BadgeSet, BillingCycle, DetectiveId, DetectiveRecord, DetectiveStatus, FeatureSet, PackageId,
    RatingAggregate, ServiceRecord, VisibilityOverride,
};
use crate::entitlements::{mask_contact_fields, MaskedContacts, ResolvedEntitlement};
use crate::subscription::ConfirmationOutcome;

/// Who is asking. Supplied by the upstream auth layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Viewer {
    Public,
    Detective(DetectiveId),
    Admin,
}

impl Viewer {
    /// Parse the `x-viewer` header value: `admin` or `detective:<id>`. Anything else is public.
    pub fn from_header(raw: Option<&str>) -> Self {
        let Some(raw) = raw.map(str::trim) else {
            return Viewer::Public;
        };
        if raw.eq_ignore_ascii_case("admin") {
            return Viewer::Admin;
        }
        match raw.split_once(':') {
            Some((kind, id)) if kind.eq_ignore_ascii_case("detective") && !id.trim().is_empty() => {
                Viewer::Detective(DetectiveId(id.trim().to_string()))
            }
            _ => Viewer::Public,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Viewer::Admin)
    }

    pub fn owns(&self, id: &DetectiveId) -> bool {
        matches!(self, Viewer::Detective(own) if own == id)
    }

    pub fn is_privileged_for(&self, id: &DetectiveId) -> bool {
        self.is_admin() || self.owns(id)
    }
}

/// Subscription details shown only to the owner and admins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionSummary {
    pub package_id: Option<PackageId>,
    pub package_name: Option<String>,
    pub billing_cycle: Option<BillingCycle>,
    pub activated_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub pending_package_id: Option<PackageId>,
    pub pending_billing_cycle: Option<BillingCycle>,
    pub features: FeatureSet,
    pub service_limit: u32,
    pub has_blue_tick: bool,
    pub blue_tick_addon: bool,
    pub blue_tick_activated_at: Option<DateTime<Utc>>,
}

impl SubscriptionSummary {
    pub(crate) fn new(record: &DetectiveRecord, resolved: &ResolvedEntitlement) -> Self {
        let detective = &record.detective;
        let subscription = &detective.subscription;
        Self {
            package_id: subscription.package_id.clone(),
            package_name: resolved.package.as_ref().map(|package| package.name.clone()),
            billing_cycle: subscription.billing_cycle,
            activated_at: subscription.activated_at,
            expires_at: subscription.expires_at,
            pending_package_id: subscription.pending_package_id.clone(),
            pending_billing_cycle: subscription.pending_billing_cycle,
            features: resolved.features.clone(),
            service_limit: resolved.service_limit,
            has_blue_tick: detective.has_package_blue_tick(),
            blue_tick_addon: detective.blue_tick_addon().is_some(),
            blue_tick_activated_at: detective.blue_tick_activated_at(),
        }
    }
}

/// Detective profile as returned to a viewer. Public views carry masked contacts only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectiveView {
    pub id: DetectiveId,
    pub business_name: String,
    pub country: String,
    pub status: DetectiveStatus,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
    pub effective_badges: BadgeSet,
    pub contacts: MaskedContacts,
    pub rating: RatingAggregate,
    pub services: Vec<ServiceRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription: Option<SubscriptionSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<VisibilityOverride>,
}

impl DetectiveView {
    pub(crate) fn public(record: &DetectiveRecord, resolved: &ResolvedEntitlement) -> Self {
        let detective = &record.detective;
        Self {
            id: detective.id.clone(),
            business_name: detective.business_name.clone(),
            country: detective.country.clone(),
            status: detective.status,
            is_verified: detective.is_verified,
            created_at: detective.created_at,
            effective_badges: resolved.badges.clone(),
            contacts: mask_contact_fields(detective, &resolved.features),
            rating: record.rating,
            services: record.services.clone(),
            subscription: None,
            visibility: None,
        }
    }

    pub(crate) fn privileged(
        record: &DetectiveRecord,
        resolved: &ResolvedEntitlement,
        viewer: &Viewer,
    ) -> Self {
        Self {
            contacts: MaskedContacts::unmasked(&record.detective.contacts),
            subscription: Some(SubscriptionSummary::new(record, resolved)),
            visibility: viewer.is_admin().then_some(record.visibility),
            ..Self::public(record, resolved)
        }
    }
}

/// One page of the public listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectiveListing {
    pub items: Vec<DetectiveView>,
    /// Visible records matching the filters, before pagination.
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

/// Result of a payment confirmation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentReceipt {
    pub detective_id: DetectiveId,
    pub outcome: ConfirmationOutcome,
    pub subscription: SubscriptionSummary,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewer_header_parsing() {
        assert_eq!(Viewer::from_header(None), Viewer::Public);
        assert_eq!(Viewer::from_header(Some(" Admin ")), Viewer::Admin);
        assert_eq!(
            Viewer::from_header(Some("detective:det-9")),
            Viewer::Detective(DetectiveId("det-9".to_string()))
        );
        assert_eq!(Viewer::from_header(Some("detective:")), Viewer::Public);
        assert_eq!(Viewer::from_header(Some("customer:1")), Viewer::Public);
    }

    #[test]
    fn ownership_is_per_detective() {
        let viewer = Viewer::Detective(DetectiveId("a".to_string()));
        assert!(viewer.is_privileged_for(&DetectiveId("a".to_string())));
        assert!(!viewer.is_privileged_for(&DetectiveId("b".to_string())));
        assert!(Viewer::Admin.is_privileged_for(&DetectiveId("b".to_string())));
    }
}

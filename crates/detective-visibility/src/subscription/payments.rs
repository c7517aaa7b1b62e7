use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{
    BadgeKind, BillingCycle, Detective, DetectiveId, EntitlementGrant, GrantSource,
    SubscriptionPackage,
};

/// Result of applying a confirmed payment. Replays report the `Already*` variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationOutcome {
    Applied,
    AlreadyApplied,
}

/// A Blue Tick purchase while one is already in effect.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("detective {detective_id} already has an active Blue Tick ({source_label})")]
pub struct DuplicateGrantConflict {
    pub detective_id: DetectiveId,
    pub source_label: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActivationError {
    #[error("package {0} is not active")]
    InactivePackage(String),
    #[error("package {package} has no {cycle} price; free plans are not activated through payments")]
    UnpricedCycle { package: String, cycle: &'static str },
}

/// Activate a paid subscription after payment verification.
///
/// Replaying any previously applied `confirmation_ref` leaves the record untouched, even when a
/// newer payment has since replaced the package.
pub fn activate_subscription(
    detective: &mut Detective,
    package: &SubscriptionPackage,
    cycle: BillingCycle,
    confirmation_ref: &str,
    now: DateTime<Utc>,
) -> Result<ConfirmationOutcome, ActivationError> {
    if detective.subscription.has_applied(confirmation_ref) {
        return Ok(ConfirmationOutcome::AlreadyApplied);
    }
    if !package.is_active {
        return Err(ActivationError::InactivePackage(package.id.0.clone()));
    }
    if package.price_for(cycle) == 0 {
        return Err(ActivationError::UnpricedCycle {
            package: package.id.0.clone(),
            cycle: cycle.label(),
        });
    }

    let subscription = &mut detective.subscription;
    subscription.package_id = Some(package.id.clone());
    subscription.billing_cycle = Some(cycle);
    subscription.activated_at = Some(now);
    subscription.expires_at = Some(cycle.expiry_from(now));
    subscription.pending_package_id = None;
    subscription.pending_billing_cycle = None;
    subscription.confirmation_ref = Some(confirmation_ref.to_string());
    subscription
        .applied_confirmations
        .insert(confirmation_ref.to_string());

    detective.sync_package_grants(Some(package), now);
    Ok(ConfirmationOutcome::Applied)
}

/// Grant the standalone Blue Tick add-on.
///
/// A replay of the confirmation that granted the current add-on succeeds without change; any
/// other purchase while a Blue Tick grant exists is a [`DuplicateGrantConflict`].
pub fn grant_blue_tick_addon(
    detective: &mut Detective,
    confirmation_ref: &str,
    now: DateTime<Utc>,
) -> Result<ConfirmationOutcome, DuplicateGrantConflict> {
    if let Some(existing) = detective.blue_tick_addon() {
        if existing.confirmation_ref.as_deref() == Some(confirmation_ref) {
            return Ok(ConfirmationOutcome::AlreadyApplied);
        }
    }
    ensure_blue_tick_purchasable(detective)?;

    detective.grants.push(EntitlementGrant {
        source: GrantSource::Addon,
        kind: BadgeKind::BlueTick,
        granted_at: now,
        confirmation_ref: Some(confirmation_ref.to_string()),
    });
    Ok(ConfirmationOutcome::Applied)
}

/// Checked before an add-on order is created and again on confirmation.
pub fn ensure_blue_tick_purchasable(detective: &Detective) -> Result<(), DuplicateGrantConflict> {
    if detective.blue_tick_addon().is_some() {
        return Err(DuplicateGrantConflict {
            detective_id: detective.id.clone(),
            source_label: "add-on",
        });
    }
    if detective.has_blue_tick() {
        return Err(DuplicateGrantConflict {
            detective_id: detective.id.clone(),
            source_label: "package",
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ContactDetails, DetectiveStatus, PackageId, SubscriptionState};
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 10, 8, 30, 0)
            .single()
            .expect("valid timestamp")
    }

    fn detective() -> Detective {
        Detective {
            id: DetectiveId("det-5".to_string()),
            business_name: "Continental Op".to_string(),
            country: "US".to_string(),
            status: DetectiveStatus::Active,
            is_verified: false,
            created_at: now(),
            contacts: ContactDetails::default(),
            subscription: SubscriptionState::default(),
            grants: Vec::new(),
            revision: 0,
        }
    }

    fn package(blue_tick: bool, active: bool) -> SubscriptionPackage {
        let mut badges = BTreeMap::new();
        badges.insert(BadgeKind::BlueTick, blue_tick);
        SubscriptionPackage {
            id: PackageId("agency".to_string()),
            name: "Agency".to_string(),
            features: Default::default(),
            badges,
            is_active: active,
            service_limit: 25,
            monthly_price: 2499,
            yearly_price: 0,
        }
    }

    #[test]
    fn activation_sets_period_and_package_grant() {
        let mut subject = detective();
        let outcome = activate_subscription(
            &mut subject,
            &package(true, true),
            BillingCycle::Monthly,
            "pay_001",
            now(),
        )
        .expect("activation succeeds");

        assert_eq!(outcome, ConfirmationOutcome::Applied);
        assert_eq!(
            subject.subscription.expires_at,
            Some(BillingCycle::Monthly.expiry_from(now()))
        );
        assert!(subject.has_package_blue_tick());
    }

    #[test]
    fn activation_replay_does_not_mutate() {
        let mut subject = detective();
        activate_subscription(
            &mut subject,
            &package(false, true),
            BillingCycle::Monthly,
            "pay_001",
            now(),
        )
        .expect("first activation");
        let snapshot = subject.clone();

        let replay = activate_subscription(
            &mut subject,
            &package(false, true),
            BillingCycle::Monthly,
            "pay_001",
            now() + chrono::Duration::hours(2),
        )
        .expect("replay succeeds");

        assert_eq!(replay, ConfirmationOutcome::AlreadyApplied);
        assert_eq!(subject, snapshot);
    }

    #[test]
    fn replaying_an_older_activation_keeps_the_newer_package() {
        let mut subject = detective();
        let mut basic = package(false, true);
        basic.id = PackageId("basic".to_string());
        activate_subscription(&mut subject, &basic, BillingCycle::Monthly, "pay_a", now())
            .expect("basic activation");
        let later = now() + chrono::Duration::days(3);
        activate_subscription(
            &mut subject,
            &package(true, true),
            BillingCycle::Monthly,
            "pay_b",
            later,
        )
        .expect("agency activation");
        let snapshot = subject.clone();

        let replay = activate_subscription(
            &mut subject,
            &basic,
            BillingCycle::Monthly,
            "pay_a",
            later + chrono::Duration::hours(1),
        )
        .expect("replay succeeds");

        assert_eq!(replay, ConfirmationOutcome::AlreadyApplied);
        assert_eq!(subject, snapshot);
        assert_eq!(
            subject.subscription.package_id,
            Some(PackageId("agency".to_string()))
        );
    }

    #[test]
    fn activation_rejects_inactive_and_unpriced_packages() {
        let mut subject = detective();
        assert!(matches!(
            activate_subscription(
                &mut subject,
                &package(false, false),
                BillingCycle::Monthly,
                "pay_002",
                now()
            ),
            Err(ActivationError::InactivePackage(_))
        ));
        assert!(matches!(
            activate_subscription(
                &mut subject,
                &package(false, true),
                BillingCycle::Yearly,
                "pay_003",
                now()
            ),
            Err(ActivationError::UnpricedCycle { .. })
        ));
        assert_eq!(subject.subscription, SubscriptionState::default());
    }

    #[test]
    fn addon_replay_is_idempotent_but_new_purchase_conflicts() {
        let mut subject = detective();
        assert_eq!(
            grant_blue_tick_addon(&mut subject, "order_1", now()),
            Ok(ConfirmationOutcome::Applied)
        );
        assert_eq!(
            grant_blue_tick_addon(&mut subject, "order_1", now()),
            Ok(ConfirmationOutcome::AlreadyApplied)
        );

        let snapshot = subject.clone();
        let conflict = grant_blue_tick_addon(&mut subject, "order_2", now())
            .expect_err("second purchase is rejected");
        assert_eq!(conflict.source_label, "add-on");
        assert_eq!(subject, snapshot);
    }

    #[test]
    fn addon_rejected_when_package_grants_blue_tick() {
        let mut subject = detective();
        subject.sync_package_grants(Some(&package(true, true)), now());

        let conflict = grant_blue_tick_addon(&mut subject, "order_1", now())
            .expect_err("package blue tick blocks add-on");
        assert_eq!(conflict.source_label, "package");
        assert!(subject.blue_tick_addon().is_none());
    }
}

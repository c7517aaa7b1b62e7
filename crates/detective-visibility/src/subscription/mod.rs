//! Subscription lifecycle: payment confirmation, downgrade scheduling and expiry.

mod applier;
pub mod expiry;
pub mod payments;

pub use applier::{ExpiryApplier, ExpiryCheck, SweepFailure, SweepReport};
pub use expiry::{
    apply_expiry, schedule_downgrade, DowngradeSchedule, ExpiryTransition, SubscriptionPhase,
};
pub use payments::{
    activate_subscription, ensure_blue_tick_purchasable, grant_blue_tick_addon, ActivationError,
    ConfirmationOutcome, DuplicateGrantConflict,
};

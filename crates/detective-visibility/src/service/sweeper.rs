use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use super::{VisibilityError, VisibilityService};
use crate::store::{DetectiveStore, PackageStore};

pub fn spawn_expiry_sweeper<D, P>(
    service: Arc<VisibilityService<D, P>>,
    every: Duration,
) -> JoinHandle<()>
where
    D: DetectiveStore + 'static,
    P: PackageStore + 'static,
{
    tokio::spawn(run_expiry_sweeper(service, every))
}

/// Sweep expired subscriptions every `every`, starting one period from now. Runs until the
/// task is dropped or aborted. A slow sweep delays the next tick instead of bunching them.
pub async fn run_expiry_sweeper<D, P>(service: Arc<VisibilityService<D, P>>, every: Duration)
where
    D: DetectiveStore + 'static,
    P: PackageStore + 'static,
{
    let mut ticker = tokio::time::interval(every.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        match service.run_expiry_sweep().await {
            Ok(report) => info!(
                checked = report.checked,
                transitioned = report.transitioned.len(),
                failed = report.errors.len(),
                "scheduled expiry sweep finished"
            ),
            Err(VisibilityError::SweepInProgress) => {
                warn!("manual expiry sweep still running; skipping scheduled run")
            }
            Err(err) => error!(error = %err, "scheduled expiry sweep failed"),
        }
    }
}

use crate::infra::{load_catalog, seed_detectives};
use chrono::{Duration, Utc};
use clap::Args;
use detective_visibility::cache::TtlCache;
use detective_visibility::clock::{Clock, ManualClock};
use detective_visibility::config::EngineConfig;
use detective_visibility::domain::BadgeKind;
use detective_visibility::error::AppError;
use detective_visibility::service::{
    DetectiveListing, DetectiveView, ListingQuery, VisibilityService, Viewer,
};
use detective_visibility::store::MemoryStore;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Days to advance the simulated clock before the expiry sweep
    #[arg(long, default_value_t = 7)]
    pub(crate) advance_days: i64,
    /// Optional package catalog CSV; defaults to the bundled catalog
    #[arg(long)]
    pub(crate) catalog_csv: Option<PathBuf>,
    /// Restrict the listing to one country code
    #[arg(long)]
    pub(crate) country: Option<String>,
    /// Print the sweep report as JSON
    #[arg(long)]
    pub(crate) json: bool,
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        advance_days,
        catalog_csv,
        country,
        json,
    } = args;

    let store = Arc::new(MemoryStore::default());
    let packages = load_catalog(catalog_csv.as_deref(), &store)?;
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let seeded = seed_detectives(&store, clock.now());
    let service = VisibilityService::new(
        store.clone(),
        store,
        Arc::new(TtlCache::new(clock.clone())),
        clock.clone(),
        &EngineConfig::default(),
    );

    println!("Detective visibility demo");
    println!(
        "- {} packages loaded | {} detectives seeded",
        packages,
        seeded.len()
    );

    let query = ListingQuery {
        country,
        ..ListingQuery::default()
    };
    let listing = service.list_detectives(&query).await?;
    render_listing("Listing at start", &listing);

    if let Some(first) = listing.items.first() {
        let public = service.get_detective_view(&first.id, &Viewer::Public).await?;
        let owner = service
            .get_detective_view(&first.id, &Viewer::Detective(first.id.clone()))
            .await?;
        println!("\nProfile of {} (public vs owner)", first.business_name);
        println!(
            "  public contacts: {}",
            serde_json::to_string(&public.contacts).unwrap_or_default()
        );
        println!(
            "  owner contacts:  {}",
            serde_json::to_string(&owner.contacts).unwrap_or_default()
        );
        if let Some(summary) = owner.subscription {
            println!(
                "  plan {} | expires {} | service limit {}",
                summary.package_name.as_deref().unwrap_or("free tier"),
                summary
                    .expires_at
                    .map(|at| at.format("%Y-%m-%d").to_string())
                    .unwrap_or_else(|| "never".to_string()),
                summary.service_limit
            );
        }
    }

    clock.advance(Duration::days(advance_days));
    println!("\nAdvanced clock by {} days", advance_days);
    let report = service.run_expiry_sweep().await?;
    if json {
        match serde_json::to_string_pretty(&report) {
            Ok(payload) => println!("{}", payload),
            Err(err) => println!("  Sweep report unavailable: {}", err),
        }
    } else {
        println!(
            "- sweep checked {} | transitioned {} | failed {}",
            report.checked,
            report.transitioned.len(),
            report.errors.len()
        );
        for id in &report.transitioned {
            println!("  - {} fell back to its next plan", id);
        }
        for failure in &report.errors {
            println!("  - {} not applied: {}", failure.detective_id, failure.reason);
        }
    }

    let listing = service.list_detectives(&query).await?;
    render_listing("Listing after sweep", &listing);
    Ok(())
}

fn badge_labels(item: &DetectiveView) -> String {
    let labels: Vec<&str> = item
        .effective_badges
        .keys()
        .map(|badge| match badge {
            BadgeKind::BlueTick => "blue tick",
            BadgeKind::Pro => "pro",
            BadgeKind::Recommended => "recommended",
        })
        .collect();
    if labels.is_empty() {
        "-".to_string()
    } else {
        labels.join(", ")
    }
}

fn render_listing(title: &str, listing: &DetectiveListing) {
    println!("\n{} ({} visible)", title, listing.total);
    for (index, item) in listing.items.iter().enumerate() {
        println!(
            "  {}. {} [{}] badges: {} | rating {:.1} ({} reviews)",
            index + 1 + listing.offset,
            item.business_name,
            item.country,
            badge_labels(item),
            item.rating.avg,
            item.rating.count
        );
    }
}

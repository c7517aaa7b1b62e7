use chrono::{DateTime, Duration, Utc};
use detective_visibility::catalog::{CatalogImportError, PackageCatalogImporter};
use detective_visibility::domain::{
    BillingCycle, ContactDetails, Detective, DetectiveId, DetectiveStatus, PackageId,
    RatingAggregate, SubscriptionState,
};
use detective_visibility::store::MemoryStore;
use metrics_exporter_prometheus::PrometheusHandle;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Catalog used when no CSV is supplied.
pub(crate) const DEFAULT_CATALOG_CSV: &str = "\
id,name,monthly_price,yearly_price,service_limit,is_active,features,badges
free,Free,0,0,2,true,contact_email,
starter,Starter,499,4990,5,true,contact_email|contact_phone,
pro,Pro,999,9990,10,true,contact_email|contact_phone|contact_whatsapp,pro
agency,Agency,2499,24990,25,true,contact_email|contact_phone|contact_whatsapp|contact_website,pro|recommended|blueTick
";

pub(crate) fn load_catalog(
    path: Option<&Path>,
    store: &MemoryStore,
) -> Result<usize, CatalogImportError> {
    match path {
        Some(path) => {
            let file = std::fs::File::open(path)?;
            PackageCatalogImporter::load_into(file, store)
        }
        None => PackageCatalogImporter::load_into(DEFAULT_CATALOG_CSV.as_bytes(), store),
    }
}

struct SampleDetective {
    id: &'static str,
    name: &'static str,
    country: &'static str,
    verified: bool,
    age_days: i64,
    plan: Option<(&'static str, i64)>,
    rating: (f64, u32),
}

const SAMPLES: [SampleDetective; 5] = [
    SampleDetective {
        id: "det-holmes",
        name: "Holmes Investigations",
        country: "IN",
        verified: true,
        age_days: 400,
        plan: Some(("agency", 12)),
        rating: (4.8, 210),
    },
    SampleDetective {
        id: "det-marple",
        name: "Marple Background Checks",
        country: "IN",
        verified: true,
        age_days: 220,
        plan: None,
        rating: (4.9, 95),
    },
    SampleDetective {
        id: "det-poirot",
        name: "Poirot Corporate Fraud",
        country: "GB",
        verified: false,
        age_days: 90,
        plan: Some(("pro", 25)),
        rating: (4.1, 18),
    },
    SampleDetective {
        id: "det-spade",
        name: "Spade Surveillance",
        country: "US",
        verified: false,
        age_days: 60,
        plan: Some(("starter", 40)),
        rating: (3.7, 6),
    },
    SampleDetective {
        id: "det-drew",
        name: "Drew Missing Persons",
        country: "IN",
        verified: false,
        age_days: 15,
        plan: None,
        rating: (0.0, 0),
    },
];

/// Seed sample detectives. Plans are activated `n` days before `now`, so the starter plan has
/// already lapsed and the pro plan lapses within a week.
pub(crate) fn seed_detectives(store: &MemoryStore, now: DateTime<Utc>) -> Vec<DetectiveId> {
    SAMPLES
        .iter()
        .map(|sample| {
            let id = DetectiveId(sample.id.to_string());
            let subscription = match sample.plan {
                Some((package, activated_days_ago)) => {
                    let activated_at = now - Duration::days(activated_days_ago);
                    SubscriptionState {
                        package_id: Some(PackageId(package.to_string())),
                        billing_cycle: Some(BillingCycle::Monthly),
                        activated_at: Some(activated_at),
                        expires_at: Some(BillingCycle::Monthly.expiry_from(activated_at)),
                        ..SubscriptionState::default()
                    }
                }
                None => SubscriptionState::default(),
            };
            let slug = sample.id.trim_start_matches("det-");
            store.insert_detective(Detective {
                id: id.clone(),
                business_name: sample.name.to_string(),
                country: sample.country.to_string(),
                status: DetectiveStatus::Active,
                is_verified: sample.verified,
                created_at: now - Duration::days(sample.age_days),
                contacts: ContactDetails {
                    email: Some(format!("desk@{slug}.example.com")),
                    phone: Some("+91 98200 00000".to_string()),
                    whatsapp: Some("+91 98200 00000".to_string()),
                    website: Some(format!("https://{slug}.example.com")),
                },
                subscription,
                grants: Vec::new(),
                revision: 0,
            });
            let (avg, count) = sample.rating;
            store.set_rating(&id, RatingAggregate { avg, count });
            id
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use detective_visibility::store::{DetectiveStore, PackageStore};

    #[tokio::test]
    async fn bundled_catalog_and_samples_load() {
        let store = MemoryStore::default();
        let loaded = load_catalog(None, &store).expect("bundled catalog loads");
        assert_eq!(loaded, 4);
        assert!(store
            .package(&PackageId("agency".to_string()))
            .await
            .expect("store readable")
            .is_some());

        let now = Utc
            .with_ymd_and_hms(2024, 6, 1, 0, 0, 0)
            .single()
            .expect("valid timestamp");
        let ids = seed_detectives(&store, now);
        assert_eq!(ids.len(), SAMPLES.len());
        let expired = store
            .expired_subscriptions(now)
            .await
            .expect("store readable");
        assert_eq!(expired, vec![DetectiveId("det-spade".to_string())]);
    }
}

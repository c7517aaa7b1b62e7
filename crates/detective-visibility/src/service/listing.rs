use std::collections::BTreeMap;

use serde::Deserialize;

use crate::cache::listing_key;
use crate::domain::{DetectiveRecord, DetectiveStatus, PackageId};

pub const DEFAULT_LIMIT: usize = 20;
pub const MAX_LIMIT: usize = 100;

/// Listing filters and pagination as received from the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ListingQuery {
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

/// Filters after trimming, lowercasing and defaulting. Equal queries share a cache key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedListing {
    pub country: Option<String>,
    pub status: DetectiveStatus,
    pub search: Option<String>,
    pub plan: Option<PackageId>,
    pub limit: usize,
    pub offset: usize,
}

fn clean(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

impl ListingQuery {
    /// Fails only on an unrecognized status value.
    pub fn normalize(&self) -> Result<NormalizedListing, String> {
        let status = match clean(&self.status) {
            Some(raw) => DetectiveStatus::parse(&raw)
                .ok_or_else(|| format!("unknown status '{raw}'"))?,
            None => DetectiveStatus::Active,
        };
        Ok(NormalizedListing {
            country: clean(&self.country).map(|value| value.to_lowercase()),
            status,
            search: clean(&self.search).map(|value| value.to_lowercase()),
            plan: clean(&self.plan).map(PackageId),
            limit: self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
            offset: self.offset.unwrap_or(0),
        })
    }
}

impl NormalizedListing {
    pub fn cache_key(&self) -> String {
        let mut params = BTreeMap::new();
        if let Some(country) = &self.country {
            params.insert("country", country.clone());
        }
        params.insert("status", self.status.label().to_string());
        if let Some(search) = &self.search {
            params.insert("search", search.clone());
        }
        if let Some(plan) = &self.plan {
            params.insert("plan", plan.0.clone());
        }
        params.insert("limit", self.limit.to_string());
        params.insert("offset", self.offset.to_string());
        listing_key(&params)
    }

    /// Store-level filters. The plan filter needs resolved entitlements and is applied later.
    pub fn matches(&self, record: &DetectiveRecord) -> bool {
        let detective = &record.detective;
        if detective.status != self.status {
            return false;
        }
        if let Some(country) = &self.country {
            if !detective.country.eq_ignore_ascii_case(country) {
                return false;
            }
        }
        if let Some(search) = &self.search {
            let in_name = detective.business_name.to_lowercase().contains(search.as_str());
            let in_services = record
                .services
                .iter()
                .any(|service| service.title.to_lowercase().contains(search.as_str()));
            if !in_name && !in_services {
                return false;
            }
        }
        true
    }
}

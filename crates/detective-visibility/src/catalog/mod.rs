//! Subscription package catalog import from CSV.

mod parser;

use std::collections::{BTreeMap, HashSet};
use std::io::Read;
use std::path::Path;

use tracing::info;

use crate::domain::{BadgeKind, PackageId, SubscriptionPackage};
use crate::store::MemoryStore;

#[derive(Debug)]
pub enum CatalogImportError {
    Io(std::io::Error),
    Csv(csv::Error),
    UnknownBadge { line: u64, value: String },
    DuplicatePackage { line: u64, id: String },
    MissingId { line: u64 },
}

impl std::fmt::Display for CatalogImportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CatalogImportError::Io(err) => write!(f, "failed to read package catalog: {}", err),
            CatalogImportError::Csv(err) => write!(f, "invalid package catalog CSV: {}", err),
            CatalogImportError::UnknownBadge { line, value } => {
                write!(f, "line {}: unknown badge '{}'", line, value)
            }
            CatalogImportError::DuplicatePackage { line, id } => {
                write!(f, "line {}: package '{}' is listed twice", line, id)
            }
            CatalogImportError::MissingId { line } => write!(f, "line {}: package id is empty", line),
        }
    }
}

impl std::error::Error for CatalogImportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CatalogImportError::Io(err) => Some(err),
            CatalogImportError::Csv(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CatalogImportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<csv::Error> for CatalogImportError {
    fn from(err: csv::Error) -> Self {
        Self::Csv(err)
    }
}

pub struct PackageCatalogImporter;

impl PackageCatalogImporter {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Vec<SubscriptionPackage>, CatalogImportError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Vec<SubscriptionPackage>, CatalogImportError> {
        let mut seen = HashSet::new();
        let mut packages = Vec::new();

        for (line, row) in parser::parse_rows(reader)? {
            if row.id.is_empty() {
                return Err(CatalogImportError::MissingId { line });
            }
            if !seen.insert(row.id.clone()) {
                return Err(CatalogImportError::DuplicatePackage { line, id: row.id });
            }

            let mut badges = BTreeMap::new();
            for raw in &row.badges {
                let badge = BadgeKind::parse(raw).ok_or_else(|| CatalogImportError::UnknownBadge {
                    line,
                    value: raw.clone(),
                })?;
                badges.insert(badge, true);
            }

            packages.push(SubscriptionPackage {
                id: PackageId(row.id),
                name: row.name,
                features: row.features.into_iter().collect(),
                badges,
                is_active: row.is_active,
                service_limit: row.service_limit,
                monthly_price: row.monthly_price,
                yearly_price: row.yearly_price,
            });
        }

        Ok(packages)
    }

    /// Import into the in-memory package store, returning how many packages were loaded.
    pub fn load_into<R: Read>(reader: R, store: &MemoryStore) -> Result<usize, CatalogImportError> {
        let packages = Self::from_reader(reader)?;
        let count = packages.len();
        for package in packages {
            store.insert_package(package);
        }
        info!(count, "loaded subscription package catalog");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::PackageStore;

    const HEADER: &str =
        "id,name,monthly_price,yearly_price,service_limit,is_active,features,badges\n";

    #[test]
    fn imports_features_and_badges() {
        let csv = format!(
            "{HEADER}free,Free,0,0,2,true,contact_email,\n\
             agency,Agency,2499,24990,25,true,contact_email|contact_phone|contact_website,pro|recommended|blueTick\n"
        );
        let packages = PackageCatalogImporter::from_reader(csv.as_bytes()).expect("catalog imports");

        assert_eq!(packages.len(), 2);
        assert!(packages[0].is_free());
        assert!(packages[0].badges.is_empty());
        let agency = &packages[1];
        assert!(agency.features.contains("contact_phone"));
        assert!(agency.grants_badge(BadgeKind::BlueTick));
        assert!(agency.grants_badge(BadgeKind::Recommended));
    }

    #[test]
    fn rejects_unknown_badges_with_line_number() {
        let csv = format!("{HEADER}gold,Gold,100,1000,5,true,,platinum\n");
        let err = PackageCatalogImporter::from_reader(csv.as_bytes()).expect_err("unknown badge");
        assert!(matches!(
            err,
            CatalogImportError::UnknownBadge { line: 2, ref value } if value == "platinum"
        ));
    }

    #[test]
    fn rejects_duplicate_ids() {
        let csv = format!("{HEADER}pro,Pro,1,1,1,true,,\npro,Pro again,2,2,2,true,,\n");
        assert!(matches!(
            PackageCatalogImporter::from_reader(csv.as_bytes()),
            Err(CatalogImportError::DuplicatePackage { line: 3, .. })
        ));
    }

    #[tokio::test]
    async fn load_into_populates_store() {
        let store = MemoryStore::default();
        let csv = format!("{HEADER}free,Free,0,0,2,true,contact_email,\n");
        let count = PackageCatalogImporter::load_into(csv.as_bytes(), &store).expect("loads");
        assert_eq!(count, 1);
        let free = store
            .package(&PackageId("free".to_string()))
            .await
            .expect("store readable");
        assert!(free.is_some());
    }
}

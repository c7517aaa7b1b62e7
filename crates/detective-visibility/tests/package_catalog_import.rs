use detective_visibility::catalog::{CatalogImportError, PackageCatalogImporter};
use detective_visibility::domain::{BadgeKind, BillingCycle};

#[test]
fn bundled_catalog_imports() {
    let data = include_bytes!("../packages.csv");
    let packages = PackageCatalogImporter::from_reader(&data[..]).expect("catalog imports");

    assert_eq!(packages.len(), 5);
    let free = packages
        .iter()
        .find(|package| package.id.0 == "free")
        .expect("free plan present");
    assert!(free.is_free());
    assert_eq!(free.service_limit, 2);

    let agency = packages
        .iter()
        .find(|package| package.id.0 == "agency")
        .expect("agency plan present");
    assert_eq!(agency.price_for(BillingCycle::Yearly), 24_990);
    assert!(agency.grants_badge(BadgeKind::BlueTick));
    assert_eq!(agency.features.len(), 4);

    let legacy = packages
        .iter()
        .find(|package| package.id.0 == "legacy_gold")
        .expect("legacy plan present");
    assert!(!legacy.is_active);
}

#[test]
fn malformed_prices_surface_as_csv_errors() {
    let csv = "id,name,monthly_price,yearly_price,service_limit,is_active,features,badges\n\
               pro,Pro,nine,9990,10,true,,\n";
    let err = PackageCatalogImporter::from_reader(csv.as_bytes()).expect_err("bad price");
    assert!(matches!(err, CatalogImportError::Csv(_)));
    assert!(err.to_string().contains("invalid package catalog CSV"));
}

#[test]
fn missing_file_is_an_io_error() {
    let err = PackageCatalogImporter::from_path("does/not/exist.csv").expect_err("missing file");
    assert!(matches!(err, CatalogImportError::Io(_)));
}

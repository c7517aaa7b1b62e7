use serde::{Deserialize, Deserializer};
use std::io::Read;

#[derive(Debug, Deserialize)]
pub(crate) struct PackageRow {
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) monthly_price: u32,
    pub(crate) yearly_price: u32,
    pub(crate) service_limit: u32,
    pub(crate) is_active: bool,
    #[serde(default, deserialize_with = "pipe_list")]
    pub(crate) features: Vec<String>,
    #[serde(default, deserialize_with = "pipe_list")]
    pub(crate) badges: Vec<String>,
}

/// Rows paired with their 1-based line number in the source (header is line 1).
pub(crate) fn parse_rows<R: Read>(reader: R) -> Result<Vec<(u64, PackageRow)>, csv::Error> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let headers = csv_reader.headers()?.clone();
    let mut record = csv::StringRecord::new();
    let mut rows = Vec::new();

    while csv_reader.read_record(&mut record)? {
        let line = record.position().map(|position| position.line()).unwrap_or(0);
        let row: PackageRow = record.deserialize(Some(&headers))?;
        rows.push((line, row));
    }

    Ok(rows)
}

fn pipe_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw
        .split('|')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect())
}

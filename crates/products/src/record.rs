//! Product row layout.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

use globalcat_core::{ItemKey, LwwStamp, ProductId, RegionCode};
use globalcat_store::{Attributes, Row};

pub const LAST_WRITER_REGION: &str = "last_writer_region";
pub const UPDATED_AT: &str = "updated_at";

/// Attributes the catalog owns; callers cannot set them through a payload.
const RESERVED: [&str; 4] = ["PK", "SK", LAST_WRITER_REGION, UPDATED_AT];

/// Drop `null` fields (at every nesting level) and reserved attributes.
///
/// Nested objects are kept whole; a later write replaces them wholesale.
pub fn sanitize(payload: Attributes) -> Attributes {
    payload
        .into_iter()
        .filter(|(name, _)| !RESERVED.contains(&name.as_str()))
        .filter_map(|(name, value)| strip_nulls(value).map(|v| (name, v)))
        .collect()
}

fn strip_nulls(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Object(map) => Some(Value::Object(
            map.into_iter()
                .filter_map(|(k, v)| strip_nulls(v).map(|v| (k, v)))
                .collect(),
        )),
        other => Some(other),
    }
}

pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Full product row as written by `region`.
pub fn product_row(
    product_id: &ProductId,
    region_code: &RegionCode,
    writer: &RegionCode,
    at: DateTime<Utc>,
    payload: Attributes,
) -> Row {
    Row::new(ItemKey::product(product_id, region_code), sanitize(payload))
        .with(LAST_WRITER_REGION, writer.as_str())
        .with(UPDATED_AT, timestamp(at))
}

/// The `(updated_at, last_writer_region)` stamp a stored row carries, if well formed.
pub fn stamp_of(row: &Row) -> Option<LwwStamp> {
    let at = DateTime::parse_from_rfc3339(row.get_str(UPDATED_AT)?)
        .ok()?
        .with_timezone(&Utc);
    let region = RegionCode::new(row.get_str(LAST_WRITER_REGION)?).ok()?;
    Some(LwwStamp::new(at, region))
}

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};

use rawlake_core::WorkUnit;

/// Items in every generated page.
pub const SYNTHETIC_ITEM_COUNT: u32 = 5;

/// Generate the deterministic page for a work unit.
///
/// Everything except `fetched_at` depends only on the unit.
pub fn synthetic_page(unit: &WorkUnit, fetched_at: DateTime<Utc>) -> Value {
    let date = unit.date_string();
    let items: Vec<Value> = (0..SYNTHETIC_ITEM_COUNT)
        .map(|i| {
            json!({
                "id": format!("{}-{}-{}-{}", unit.source(), date, unit.page(), i),
                "value": i,
            })
        })
        .collect();

    json!({
        "endpoint": unit.source(),
        "date": date,
        "page": unit.page(),
        "fetched_at": fetched_at.to_rfc3339_opts(SecondsFormat::Micros, true),
        "items": items,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};

    fn unit(source: &str, page: u32) -> WorkUnit {
        WorkUnit::new(source, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), page).unwrap()
    }

    #[test]
    fn page_has_expected_shape() {
        let doc = synthetic_page(&unit("api-a", 1), Utc::now());

        assert_eq!(doc["endpoint"], "api-a");
        assert_eq!(doc["date"], "2024-01-01");
        assert_eq!(doc["page"], 1);

        let ids: Vec<&str> = doc["items"]
            .as_array()
            .unwrap()
            .iter()
            .map(|item| item["id"].as_str().unwrap())
            .collect();
        assert_eq!(
            ids,
            vec![
                "api-a-2024-01-01-1-0",
                "api-a-2024-01-01-1-1",
                "api-a-2024-01-01-1-2",
                "api-a-2024-01-01-1-3",
                "api-a-2024-01-01-1-4",
            ]
        );
        assert_eq!(doc["items"][4]["value"], 4);
    }

    #[test]
    fn timestamp_is_utc_with_z_suffix() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 12, 30, 0).unwrap();
        let doc = synthetic_page(&unit("api-b", 2), at);
        assert_eq!(doc["fetched_at"], "2024-01-01T12:30:00.000000Z");
    }

    #[test]
    fn only_timestamp_varies() {
        let first = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

        let mut a = synthetic_page(&unit("api-c", 7), first);
        let mut b = synthetic_page(&unit("api-c", 7), later);
        assert_ne!(a, b);

        a["fetched_at"] = Value::Null;
        b["fetched_at"] = Value::Null;
        assert_eq!(a, b);
    }
}

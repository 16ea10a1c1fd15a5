use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::Result,
    storage::{RECORDS_KEY, SharedStorage, read_json_or_none},
    types::FormPayload,
    value::{coerce_string, is_truthy},
};

/// Where a record's output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordSource {
    Ai,
    Fallback,
}

impl RecordSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordSource::Ai => "AI",
            RecordSource::Fallback => "Fallback",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: String,
    pub created_at: String,
    pub source: String,
    pub input: FormPayload,
    pub output: String,
}

impl Record {
    pub fn new(input: FormPayload, output: impl Into<String>, source: RecordSource) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
            source: source.as_str().to_string(),
            input,
            output: output.into(),
        }
    }

    /// Case-insensitive match on title or theme. An empty keyword matches all.
    pub fn matches(&self, keyword: &str) -> bool {
        let keyword = keyword.trim().to_lowercase();
        if keyword.is_empty() {
            return true;
        }
        self.input.prompt_title.to_lowercase().contains(&keyword)
            || self.input.theme.to_lowercase().contains(&keyword)
    }
}

/// Keeps well-formed entries of a stored record list. Entries without a
/// truthy `id`, `input` or `output` are dropped; every other field is coerced
/// to a string.
pub fn normalize_records(raw: &Value) -> Vec<Record> {
    let Value::Array(items) = raw else {
        return Vec::new();
    };

    items
        .iter()
        .filter(|item| {
            item.is_object()
                && ["id", "input", "output"]
                    .iter()
                    .all(|key| item.get(key).is_some_and(is_truthy))
        })
        .map(|item| {
            let input = &item["input"];
            let created_at = match item.get("createdAt").map(coerce_string) {
                Some(s) if !s.is_empty() => s,
                _ => chrono::Utc::now().to_rfc3339(),
            };
            let source = match item.get("source").map(coerce_string) {
                Some(s) if !s.is_empty() => s,
                _ => RecordSource::Ai.as_str().to_string(),
            };

            Record {
                id: coerce_string(&item["id"]),
                created_at,
                source,
                input: FormPayload::from_value(input).unwrap_or_default(),
                output: coerce_string(&item["output"]),
            }
        })
        .collect()
}

/// Ordered record list, newest first.
pub struct RecordStore {
    storage: SharedStorage,
}

impl RecordStore {
    pub fn new(storage: SharedStorage) -> Self {
        Self { storage }
    }

    pub async fn load(&self) -> Vec<Record> {
        read_json_or_none(self.storage.as_ref(), RECORDS_KEY)
            .await
            .map(|raw| normalize_records(&raw))
            .unwrap_or_default()
    }

    pub async fn persist(&self, records: &[Record]) -> Result<()> {
        let value = serde_json::to_value(records)?;
        self.storage.set(RECORDS_KEY, &value).await
    }
}

/// Puts `record` at the front of the list.
pub fn prepend(records: &mut Vec<Record>, record: Record) {
    records.insert(0, record);
}

pub fn filter_records<'a>(records: &'a [Record], keyword: &str) -> Vec<&'a Record> {
    records.iter().filter(|r| r.matches(keyword)).collect()
}

/// Removes the record with `id`. Returns whether anything was removed.
pub fn remove_record(records: &mut Vec<Record>, id: &str) -> bool {
    let before = records.len();
    records.retain(|r| r.id != id);
    records.len() != before
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::storage::MemoryStorage;
    use serde_json::json;

    fn record(title: &str, theme: &str) -> Record {
        Record::new(
            FormPayload {
                prompt_title: title.into(),
                theme: theme.into(),
                ..Default::default()
            },
            "0-3秒画面：推镜头",
            RecordSource::Ai,
        )
    }

    #[test]
    fn malformed_entries_are_dropped() {
        let raw = json!([
            {"id": "1", "input": {"promptTitle": "a"}, "output": "x"},
            {"id": "", "input": {}, "output": "x"},
            {"input": {}, "output": "x"},
            {"id": "3", "output": "x"},
            {"id": "4", "input": {}},
            "not an object",
            null,
        ]);
        let records = normalize_records(&raw);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "1");
        assert_eq!(records[0].input.prompt_title, "a");
        assert!(normalize_records(&json!({"id": "1"})).is_empty());
    }

    #[test]
    fn fields_are_coerced_to_strings() {
        let raw = json!([{
            "id": 17,
            "input": {"promptTitle": 5, "theme": null, "cameraStyle": "推镜头"},
            "output": 99,
            "source": "Fallback",
            "createdAt": "2026-01-02T03:04:05Z",
        }]);
        let records = normalize_records(&raw);
        let r = &records[0];
        assert_eq!(r.id, "17");
        assert_eq!(r.output, "99");
        assert_eq!(r.source, "Fallback");
        assert_eq!(r.created_at, "2026-01-02T03:04:05Z");
        assert_eq!(r.input.prompt_title, "5");
        assert_eq!(r.input.theme, "");
        assert_eq!(r.input.camera_style, "推镜头");
    }

    #[test]
    fn missing_source_and_timestamp_get_defaults() {
        let records = normalize_records(&json!([{"id": "a", "input": {}, "output": "o"}]));
        assert_eq!(records[0].source, "AI");
        assert!(chrono::DateTime::parse_from_rfc3339(&records[0].created_at).is_ok());
    }

    #[test]
    fn search_filters_title_and_theme_case_insensitively() {
        let records = vec![record("Sunrise", "治愈系"), record("夜景", "City Lights")];
        assert_eq!(filter_records(&records, "sun").len(), 1);
        assert_eq!(filter_records(&records, "CITY").len(), 1);
        assert_eq!(filter_records(&records, "治愈").len(), 1);
        assert_eq!(filter_records(&records, "  ").len(), 2);
        assert!(filter_records(&records, "nothing").is_empty());
    }

    #[test]
    fn prepend_and_remove() {
        let mut records = vec![record("old", "t")];
        let newer = record("new", "t");
        let id = newer.id.clone();
        prepend(&mut records, newer);
        assert_eq!(records[0].input.prompt_title, "new");

        assert!(remove_record(&mut records, &id));
        assert!(!remove_record(&mut records, &id));
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn store_round_trips_through_storage() {
        let store = RecordStore::new(Arc::new(MemoryStorage::new()));
        assert!(store.load().await.is_empty());

        let records = vec![record("b", "t"), record("a", "t")];
        store.persist(&records).await.unwrap();
        assert_eq!(store.load().await, records);
    }
}

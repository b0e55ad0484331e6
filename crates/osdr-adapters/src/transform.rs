//! Raw catalog record → [`NormalizedRecord`] mapping.
//!
//! Extraction never fails: every logical field has an ordered list of candidate
//! keys and a default used when none of them holds a non-null value.

use chrono::{DateTime, Utc};
use osdr_core::{
    parse_source_timestamp, DisplayBool, ExportBatch, NormalizedRecord, RawRecord, SourceTimestamp,
};
use serde_json::Value as JsonValue;

/// Logical fields pulled out of a raw record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalField {
    DatasetId,
    Title,
    Organism,
    StudyType,
    Status,
    UpdatedAt,
    IsPublic,
    SampleCount,
    AssayCount,
}

impl LogicalField {
    /// Candidate keys, highest priority first.
    pub fn candidates(self) -> &'static [&'static str] {
        match self {
            LogicalField::DatasetId => &["dataset_id", "id", "uuid", "studyId", "accession", "osdr_id"],
            LogicalField::Title => &["title", "name", "label"],
            LogicalField::Organism => &["organism", "species", "model_organism"],
            LogicalField::StudyType => &["study_type", "type", "experiment_type"],
            LogicalField::Status => &["status", "state", "lifecycle"],
            LogicalField::UpdatedAt => &["updated", "updated_at", "modified", "lastUpdated", "timestamp"],
            LogicalField::IsPublic => &["is_public", "public", "isPublic"],
            LogicalField::SampleCount => &["samples", "sample_count", "num_samples"],
            LogicalField::AssayCount => &["assays", "assay_count", "num_assays"],
        }
    }

    pub fn extract(self, raw: &RawRecord) -> Option<&JsonValue> {
        extract_field(raw, self.candidates())
    }
}

/// First candidate key that is present with a non-null value.
pub fn extract_field<'a>(raw: &'a RawRecord, candidates: &[&str]) -> Option<&'a JsonValue> {
    candidates
        .iter()
        .filter_map(|key| raw.get(*key))
        .find(|value| !value.is_null())
}

const TRUTHY_WORDS: [&str; 4] = ["true", "1", "yes", "да"];

pub fn to_display_bool(value: Option<&JsonValue>) -> DisplayBool {
    let truth = match value {
        None | Some(JsonValue::Null) => false,
        Some(JsonValue::Bool(b)) => *b,
        Some(JsonValue::String(s)) => {
            let lowered = s.to_lowercase();
            TRUTHY_WORDS.contains(&lowered.as_str())
        }
        Some(JsonValue::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
        Some(JsonValue::Array(_)) | Some(JsonValue::Object(_)) => true,
    };
    DisplayBool::from(truth)
}

pub fn to_timestamp(value: Option<&JsonValue>) -> Option<SourceTimestamp> {
    match value? {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(match parse_source_timestamp(s) {
            Some(at) => SourceTimestamp::Parsed(at),
            None => SourceTimestamp::Unparsed(s.clone()),
        }),
        other => Some(SourceTimestamp::Unparsed(other.to_string())),
    }
}

/// `None` means "no value"; callers decide the default.
pub fn to_numeric(value: Option<&JsonValue>) -> Option<f64> {
    let parsed = match value? {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse::<f64>().ok(),
        JsonValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        JsonValue::Null | JsonValue::Array(_) | JsonValue::Object(_) => None,
    };
    parsed.filter(|v| v.is_finite())
}

/// Stringify, collapse whitespace runs to one space, trim.
pub fn sanitize_text(value: Option<&JsonValue>) -> String {
    let text = match value {
        None | Some(JsonValue::Null) => return String::new(),
        Some(JsonValue::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    };
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn count_or_zero(value: Option<&JsonValue>) -> f64 {
    to_numeric(value).map_or(0.0, |v| v.max(0.0))
}

pub fn transform_record(raw: &RawRecord, index: usize, exported_at: DateTime<Utc>) -> NormalizedRecord {
    let dataset_id = match LogicalField::DatasetId.extract(raw) {
        Some(value) => sanitize_text(Some(value)),
        None => String::new(),
    };
    let dataset_id = if dataset_id.is_empty() {
        format!("unknown_{index}")
    } else {
        dataset_id
    };

    let is_public = match LogicalField::IsPublic.extract(raw) {
        Some(value) => to_display_bool(Some(value)),
        None => DisplayBool::True,
    };

    let sample_count = count_or_zero(LogicalField::SampleCount.extract(raw));
    let assay_count = count_or_zero(LogicalField::AssayCount.extract(raw));

    NormalizedRecord {
        export_timestamp: exported_at,
        updated_at: to_timestamp(LogicalField::UpdatedAt.extract(raw)),
        is_public,
        has_samples: DisplayBool::from(sample_count > 0.0),
        has_assays: DisplayBool::from(assay_count > 0.0),
        row_number: u32::try_from(index + 1).unwrap_or(u32::MAX),
        sample_count,
        assay_count,
        dataset_id,
        title: sanitize_text(LogicalField::Title.extract(raw)),
        organism: sanitize_text(LogicalField::Organism.extract(raw)),
        study_type: sanitize_text(LogicalField::StudyType.extract(raw)),
        status: sanitize_text(LogicalField::Status.extract(raw)),
        raw_json: JsonValue::Object(raw.clone()).to_string(),
    }
}

/// One normalized record per raw record, same order, sharing one export timestamp.
pub fn transform_batch(raws: &[RawRecord], exported_at: DateTime<Utc>) -> ExportBatch {
    let records = raws
        .iter()
        .enumerate()
        .map(|(index, raw)| transform_record(raw, index, exported_at))
        .collect();
    ExportBatch::new(exported_at, records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn raw(value: JsonValue) -> RawRecord {
        match value {
            JsonValue::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    fn run_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 24, 12, 0, 0).unwrap()
    }

    #[test]
    fn candidate_priority_skips_missing_and_null() {
        let record = raw(json!({"uuid": "U-9", "id": null, "accession": "ACC"}));
        assert_eq!(
            LogicalField::DatasetId.extract(&record),
            Some(&json!("U-9"))
        );
        assert_eq!(LogicalField::Title.extract(&record), None);
    }

    #[test]
    fn boolean_false_inputs() {
        for value in [
            JsonValue::Null,
            json!(false),
            json!("false"),
            json!("0"),
            json!("no"),
            json!(0),
            json!(0.0),
        ] {
            assert_eq!(to_display_bool(Some(&value)), DisplayBool::False, "{value}");
        }
        assert_eq!(to_display_bool(None), DisplayBool::False);
    }

    #[test]
    fn boolean_true_inputs() {
        for value in [
            json!(true),
            json!("true"),
            json!("TRUE"),
            json!("1"),
            json!("yes"),
            json!("Да"),
            json!(3),
            json!(-0.5),
            json!({"nested": "object"}),
            json!([]),
        ] {
            assert_eq!(to_display_bool(Some(&value)), DisplayBool::True, "{value}");
        }
    }

    #[test]
    fn unrecognized_strings_are_false() {
        assert_eq!(to_display_bool(Some(&json!("maybe"))), DisplayBool::False);
        assert_eq!(to_display_bool(Some(&json!(" true "))), DisplayBool::False);
    }

    #[test]
    fn timestamp_formats_normalize_to_utc() {
        let cases = [
            ("2024-05-06T07:08:09.123456Z", Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap()
                + chrono::Duration::microseconds(123_456)),
            ("2024-05-06T07:08:09Z", Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap()),
            ("2024-05-06T07:08:09", Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap()),
            ("2024-05-06 07:08:09", Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap()),
            ("2024-05-06", Utc.with_ymd_and_hms(2024, 5, 6, 0, 0, 0).unwrap()),
        ];
        for (text, expected) in cases {
            assert_eq!(
                to_timestamp(Some(&json!(text))),
                Some(SourceTimestamp::Parsed(expected)),
                "{text}"
            );
        }
    }

    #[test]
    fn unparseable_timestamp_passes_through() {
        assert_eq!(
            to_timestamp(Some(&json!("06/05/2024"))),
            Some(SourceTimestamp::Unparsed("06/05/2024".into()))
        );
        assert_eq!(to_timestamp(Some(&JsonValue::Null)), None);
        assert_eq!(to_timestamp(None), None);
    }

    #[test]
    fn numeric_failure_is_distinct_from_zero() {
        assert_eq!(to_numeric(Some(&json!("abc"))), None);
        assert_eq!(to_numeric(Some(&json!("0"))), Some(0.0));
        assert_eq!(to_numeric(Some(&json!(" 12.5 "))), Some(12.5));
        assert_eq!(to_numeric(Some(&json!(7))), Some(7.0));
        assert_eq!(to_numeric(Some(&json!("NaN"))), None);
        assert_eq!(to_numeric(None), None);
    }

    #[test]
    fn unparseable_and_explicit_zero_counts_both_default_to_zero() {
        let garbage = transform_record(&raw(json!({"samples": "abc"})), 0, run_at());
        let zero = transform_record(&raw(json!({"samples": "0"})), 0, run_at());
        for record in [&garbage, &zero] {
            assert_eq!(record.sample_count, 0.0);
            assert_eq!(record.has_samples, DisplayBool::False);
        }
    }

    #[test]
    fn sanitize_collapses_whitespace() {
        assert_eq!(sanitize_text(Some(&json!("  Foo \t\n Bar  "))), "Foo Bar");
        assert_eq!(sanitize_text(Some(&json!(42))), "42");
        assert_eq!(sanitize_text(Some(&JsonValue::Null)), "");
        assert_eq!(sanitize_text(None), "");
    }

    #[test]
    fn missing_identity_gets_positional_placeholder() {
        let records = vec![
            raw(json!({"title": "first"})),
            raw(json!({"id": "   ", "title": "blank id"})),
            raw(json!({"accession": "OSD-7"})),
        ];
        let batch = transform_batch(&records, run_at());
        let ids: Vec<_> = batch.iter().map(|r| r.dataset_id.as_str()).collect();
        assert_eq!(ids, ["unknown_0", "unknown_1", "OSD-7"]);
        let rows: Vec<_> = batch.iter().map(|r| r.row_number).collect();
        assert_eq!(rows, [1, 2, 3]);
    }

    #[test]
    fn two_record_scenario() {
        let records = vec![
            raw(json!({"id": "A1", "title": "Foo  Bar", "samples": 3})),
            raw(json!({"title": "NoId"})),
        ];
        let batch = transform_batch(&records, run_at());
        assert_eq!(batch.len(), 2);

        let first = &batch.records[0];
        assert_eq!(first.dataset_id, "A1");
        assert_eq!(first.title, "Foo Bar");
        assert_eq!(first.sample_count, 3.0);
        assert_eq!(first.has_samples, DisplayBool::True);
        assert_eq!(first.is_public, DisplayBool::True);
        assert_eq!(first.export_timestamp, run_at());
        assert_eq!(first.raw_json, r#"{"id":"A1","title":"Foo  Bar","samples":3}"#);

        let second = &batch.records[1];
        assert_eq!(second.dataset_id, "unknown_1");
        assert_eq!(second.title, "NoId");
        assert_eq!(second.sample_count, 0.0);
        assert_eq!(second.has_samples, DisplayBool::False);
        assert_eq!(second.updated_at, None);
    }

    #[test]
    fn visibility_flag_respects_explicit_false() {
        let record = transform_record(&raw(json!({"isPublic": "no"})), 0, run_at());
        assert_eq!(record.is_public, DisplayBool::False);
    }
}

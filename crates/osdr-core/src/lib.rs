//! Core domain model for the OSDR exporter: raw catalog records, their
//! normalized form, and the row shapes persisted by the two sinks.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub const CRATE_NAME: &str = "osdr-core";

/// One schema-less item from the catalog API. Key order follows the upstream payload.
pub type RawRecord = serde_json::Map<String, JsonValue>;

/// Staging file header, in the order every row is written.
pub const STAGING_COLUMNS: [&str; 14] = [
    "export_timestamp",
    "updated_at",
    "is_public",
    "has_samples",
    "has_assays",
    "row_number",
    "sample_count",
    "assay_count",
    "dataset_id",
    "title",
    "organism",
    "study_type",
    "status",
    "raw_json",
];

/// Result of tri-state boolean coercion. Rendered through a [`BoolLocale`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisplayBool {
    True,
    False,
}

impl DisplayBool {
    pub fn as_bool(self) -> bool {
        matches!(self, DisplayBool::True)
    }
}

impl From<bool> for DisplayBool {
    fn from(value: bool) -> Self {
        if value {
            DisplayBool::True
        } else {
            DisplayBool::False
        }
    }
}

/// Pair of display strings used for booleans in the staging file.
///
/// The loader reverses the encoding with [`BoolLocale::parse`]: only the exact
/// true token reads back as `true`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoolLocale {
    pub true_token: &'static str,
    pub false_token: &'static str,
}

impl BoolLocale {
    pub const RUSSIAN: BoolLocale = BoolLocale {
        true_token: "ИСТИНА",
        false_token: "ЛОЖЬ",
    };

    pub const NEUTRAL: BoolLocale = BoolLocale {
        true_token: "TRUE",
        false_token: "FALSE",
    };

    /// Looks up a locale by its configuration name (`ru` or `neutral`).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "ru" | "russian" => Some(Self::RUSSIAN),
            "neutral" | "en" => Some(Self::NEUTRAL),
            _ => None,
        }
    }

    pub fn render(&self, value: DisplayBool) -> &'static str {
        match value {
            DisplayBool::True => self.true_token,
            DisplayBool::False => self.false_token,
        }
    }

    pub fn parse(&self, token: &str) -> bool {
        token == self.true_token
    }
}

impl Default for BoolLocale {
    fn default() -> Self {
        Self::RUSSIAN
    }
}

/// A source timestamp after coercion: normalized to UTC when one of the known
/// formats matched, otherwise the original text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceTimestamp {
    Parsed(DateTime<Utc>),
    Unparsed(String),
}

impl SourceTimestamp {
    /// The instant both sinks store. Passed-through text is resolved with
    /// [`resolve_instant`], the same rule the loader applies to staged values.
    pub fn as_instant(&self) -> Option<DateTime<Utc>> {
        match self {
            SourceTimestamp::Parsed(at) => Some(*at),
            SourceTimestamp::Unparsed(text) => resolve_instant(text),
        }
    }

    pub fn to_staged_string(&self) -> String {
        match self {
            SourceTimestamp::Parsed(at) => format_instant(*at),
            SourceTimestamp::Unparsed(text) => text.clone(),
        }
    }
}

/// Source timestamp layouts as `(pattern, has_time)`, in the order they are tried.
const SOURCE_TIMESTAMP_FORMATS: [(&str, bool); 5] = [
    ("%Y-%m-%dT%H:%M:%S%.fZ", true),
    ("%Y-%m-%dT%H:%M:%SZ", true),
    ("%Y-%m-%dT%H:%M:%S", true),
    ("%Y-%m-%d %H:%M:%S", true),
    ("%Y-%m-%d", false),
];

/// Parse with the first matching source layout, reading the value as UTC.
pub fn parse_source_timestamp(text: &str) -> Option<DateTime<Utc>> {
    SOURCE_TIMESTAMP_FORMATS.iter().find_map(|(pattern, has_time)| {
        let naive = if *has_time {
            NaiveDateTime::parse_from_str(text, pattern).ok()?
        } else {
            NaiveDate::parse_from_str(text, pattern)
                .ok()?
                .and_hms_opt(0, 0, 0)?
        };
        Some(naive.and_utc())
    })
}

/// Text to instant for persistence: RFC 3339 (any offset), then the source layouts.
pub fn resolve_instant(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text.trim())
        .map(|at| at.with_timezone(&Utc))
        .ok()
        .or_else(|| parse_source_timestamp(text))
}

/// RFC 3339 with microseconds, the representation used in staging files.
pub fn format_instant(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, false)
}

/// One catalog record mapped onto the fixed export schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub export_timestamp: DateTime<Utc>,
    pub updated_at: Option<SourceTimestamp>,
    pub is_public: DisplayBool,
    pub has_samples: DisplayBool,
    pub has_assays: DisplayBool,
    pub row_number: u32,
    pub sample_count: f64,
    pub assay_count: f64,
    pub dataset_id: String,
    pub title: String,
    pub organism: String,
    pub study_type: String,
    pub status: String,
    pub raw_json: String,
}

/// Records produced by one cycle, in fetch order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportBatch {
    pub exported_at: DateTime<Utc>,
    pub records: Vec<NormalizedRecord>,
}

impl ExportBatch {
    pub fn new(exported_at: DateTime<Utc>, records: Vec<NormalizedRecord>) -> Self {
        Self {
            exported_at,
            records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, NormalizedRecord> {
        self.records.iter()
    }
}

/// Row appended to the export log. `imported_at` is assigned by the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportLogRow {
    pub export_timestamp: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub is_public: bool,
    pub has_samples: bool,
    pub has_assays: bool,
    pub row_number: i32,
    pub sample_count: i32,
    pub assay_count: i32,
    pub dataset_id: Option<String>,
    pub title: Option<String>,
    pub organism: Option<String>,
    pub study_type: Option<String>,
    pub status: Option<String>,
    pub raw_json: Option<JsonValue>,
    pub source_file: String,
}

/// Latest known state of one dataset, keyed by `dataset_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentStateRow {
    pub dataset_id: String,
    pub title: Option<String>,
    pub organism: Option<String>,
    pub study_type: Option<String>,
    pub status: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
    pub raw: JsonValue,
}

impl CurrentStateRow {
    pub fn from_record(record: &NormalizedRecord) -> Result<Self, serde_json::Error> {
        Ok(Self {
            dataset_id: record.dataset_id.clone(),
            title: non_empty(&record.title),
            organism: non_empty(&record.organism),
            study_type: non_empty(&record.study_type),
            status: non_empty(&record.status),
            updated_at: record.updated_at.as_ref().and_then(SourceTimestamp::as_instant),
            raw: serde_json::from_str(&record.raw_json)?,
        })
    }
}

/// Empty text is stored as SQL NULL by both sinks.
pub fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(updated_at: Option<SourceTimestamp>) -> NormalizedRecord {
        NormalizedRecord {
            export_timestamp: Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap(),
            updated_at,
            is_public: DisplayBool::True,
            has_samples: DisplayBool::False,
            has_assays: DisplayBool::False,
            row_number: 1,
            sample_count: 0.0,
            assay_count: 0.0,
            dataset_id: "OSD-1".into(),
            title: "Rodent Research".into(),
            organism: String::new(),
            study_type: String::new(),
            status: "public".into(),
            raw_json: r#"{"id":"OSD-1"}"#.into(),
        }
    }

    #[test]
    fn locale_tokens_round_trip() {
        for locale in [BoolLocale::RUSSIAN, BoolLocale::NEUTRAL] {
            assert!(locale.parse(locale.render(DisplayBool::True)));
            assert!(!locale.parse(locale.render(DisplayBool::False)));
        }
        assert_eq!(BoolLocale::default().render(DisplayBool::True), "ИСТИНА");
        assert!(!BoolLocale::RUSSIAN.parse("TRUE"));
    }

    #[test]
    fn locale_lookup_by_name() {
        assert_eq!(BoolLocale::from_name("RU"), Some(BoolLocale::RUSSIAN));
        assert_eq!(BoolLocale::from_name("neutral"), Some(BoolLocale::NEUTRAL));
        assert_eq!(BoolLocale::from_name("klingon"), None);
    }

    #[test]
    fn current_state_row_maps_empty_text_to_null() {
        let at = Utc.with_ymd_and_hms(2025, 12, 31, 23, 0, 0).unwrap();
        let row = CurrentStateRow::from_record(&record(Some(SourceTimestamp::Parsed(at))))
            .expect("row");
        assert_eq!(row.title.as_deref(), Some("Rodent Research"));
        assert_eq!(row.organism, None);
        assert_eq!(row.updated_at, Some(at));
        assert_eq!(row.raw["id"], "OSD-1");

        let unparsed = CurrentStateRow::from_record(&record(Some(SourceTimestamp::Unparsed(
            "last tuesday".into(),
        ))))
        .expect("row");
        assert_eq!(unparsed.updated_at, None);
    }

    #[test]
    fn offset_text_resolves_to_the_same_instant_everywhere() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 6, 5, 8, 9).unwrap();
        assert_eq!(resolve_instant("2024-05-06T07:08:09+02:00"), Some(expected));
        assert_eq!(resolve_instant("2024-05-06T05:08:09.000000+00:00"), Some(expected));
        assert_eq!(resolve_instant("2024-05-06 05:08:09"), Some(expected));
        assert_eq!(resolve_instant("sometime"), None);
        assert_eq!(parse_source_timestamp("2024-05-06T07:08:09+02:00"), None);

        let row = CurrentStateRow::from_record(&record(Some(SourceTimestamp::Unparsed(
            "2024-05-06T07:08:09+02:00".into(),
        ))))
        .expect("row");
        assert_eq!(row.updated_at, Some(expected));
    }

    #[test]
    fn staged_timestamp_keeps_unparsed_text() {
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(
            SourceTimestamp::Parsed(at).to_staged_string(),
            "2024-01-02T03:04:05.000000+00:00"
        );
        assert_eq!(
            SourceTimestamp::Unparsed("soon".into()).to_staged_string(),
            "soon"
        );
    }
}

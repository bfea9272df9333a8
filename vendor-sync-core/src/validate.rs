//! Per-record validation of fetched MARC files.
//!
//! A file of N records always yields N rows, in record order. Invalid records
//! are rows, not errors; only a payload that cannot be decoded aborts the
//! file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::contract::{FetchedFile, RecordErrors, RecordValidator, ValidationOutcome};
use crate::marc::{is_control_tag, Field, MarcError, MarcReader, Record};

/// Column order of an exported table.
pub const COLUMNS: [&str; 14] = [
    "valid",
    "error_count",
    "missing_field_count",
    "missing_fields",
    "extra_field_count",
    "extra_fields",
    "invalid_field_count",
    "invalid_fields",
    "order_item_mismatches",
    "record_number",
    "control_number",
    "file_name",
    "vendor_code",
    "validation_date",
];

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Identifier fields searched, in order, after the `001` control number.
/// Each contributes its `$a`.
pub const CONTROL_NUMBER_FALLBACKS: [&str; 5] = ["020", "035", "022", "024", "010"];

/// Vendor name fragments and the reporting code they map to.
const VENDOR_CODES: [(&str, &str); 3] = [
    ("AMALIVRE", "AUXAM"),
    ("EASTVIEW", "EVP"),
    ("LEILA", "LEILA"),
];

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("could not decode record {position} of `{file}`: {source}")]
    Decode {
        file: String,
        position: usize,
        #[source]
        source: MarcError,
    },
}

/// Reporting code for a vendor; unknown vendors report under their own
/// upper-cased name.
pub fn vendor_code(vendor: &str) -> String {
    let upper = vendor.to_uppercase();
    VENDOR_CODES
        .iter()
        .find(|(fragment, _)| upper.contains(fragment))
        .map_or(upper.clone(), |(_, code)| code.to_string())
}

/// Control number of a record, searched in a fixed order: `001`, then `$a` of
/// each fallback identifier field, then the `852$h` call number. Returns the
/// literal `"None"` when every field is absent or empty.
pub fn control_number(record: &Record) -> String {
    let primary = record
        .fields_with_tag("001")
        .filter_map(|field| match field {
            Field::Control { data, .. } => Some(data.trim()),
            Field::Data { .. } => None,
        })
        .find(|value| !value.is_empty());
    primary
        .or_else(|| {
            CONTROL_NUMBER_FALLBACKS
                .iter()
                .find_map(|tag| first_non_empty(record, tag, 'a'))
        })
        .or_else(|| first_non_empty(record, "852", 'h'))
        .map_or_else(|| "None".to_string(), str::to_string)
}

fn first_non_empty<'a>(record: &'a Record, tag: &'a str, code: char) -> Option<&'a str> {
    record
        .fields_with_tag(tag)
        .filter_map(|field| field.subfield(code))
        .map(str::trim)
        .find(|value| !value.is_empty())
}

/// Outcome and provenance of one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationRow {
    pub outcome: ValidationOutcome,
    /// `"{i} of {n}"`, 1-based.
    pub record_number: String,
    pub control_number: String,
    pub file_name: String,
    pub vendor_code: String,
    pub validated_at: DateTime<Utc>,
}

impl ValidationRow {
    pub fn is_valid(&self) -> bool {
        matches!(self.outcome, ValidationOutcome::Valid)
    }

    fn errors(&self) -> Option<&RecordErrors> {
        match &self.outcome {
            ValidationOutcome::Valid => None,
            ValidationOutcome::Invalid(errors) => Some(errors),
        }
    }

    pub fn error_count(&self) -> Option<usize> {
        self.errors().map(RecordErrors::total)
    }

    pub fn missing_field_count(&self) -> Option<usize> {
        self.errors().map(|e| e.missing_fields.len())
    }

    pub fn missing_fields(&self) -> Option<&[String]> {
        self.errors().map(|e| e.missing_fields.as_slice())
    }

    pub fn extra_field_count(&self) -> Option<usize> {
        self.errors().map(|e| e.extra_fields.len())
    }

    pub fn extra_fields(&self) -> Option<&[String]> {
        self.errors().map(|e| e.extra_fields.as_slice())
    }

    pub fn invalid_field_count(&self) -> Option<usize> {
        self.errors().map(|e| e.invalid_fields.len())
    }

    pub fn invalid_fields(&self) -> Option<&[String]> {
        self.errors().map(|e| e.invalid_fields.as_slice())
    }

    pub fn order_item_mismatches(&self) -> Option<&[String]> {
        self.errors().map(|e| e.order_item_mismatches.as_slice())
    }

    /// String value of one column. Count and list columns of a valid record
    /// are present but empty. An empty list of an invalid record is `[]`.
    pub fn cell(&self, column: &str) -> Option<String> {
        let count = |n: Option<usize>| n.map(|n| n.to_string()).unwrap_or_default();
        let list = |l: Option<&[String]>| match l {
            Some([]) => String::from("[]"),
            Some(l) => l.join(", "),
            None => String::new(),
        };
        let value = match column {
            "valid" => String::from(if self.is_valid() { "True" } else { "False" }),
            "error_count" => count(self.error_count()),
            "missing_field_count" => count(self.missing_field_count()),
            "missing_fields" => list(self.missing_fields()),
            "extra_field_count" => count(self.extra_field_count()),
            "extra_fields" => list(self.extra_fields()),
            "invalid_field_count" => count(self.invalid_field_count()),
            "invalid_fields" => list(self.invalid_fields()),
            "order_item_mismatches" => list(self.order_item_mismatches()),
            "record_number" => self.record_number.clone(),
            "control_number" => self.control_number.clone(),
            "file_name" => self.file_name.clone(),
            "vendor_code" => self.vendor_code.clone(),
            "validation_date" => self.validated_at.format(TIMESTAMP_FORMAT).to_string(),
            _ => return None,
        };
        Some(value)
    }

    /// All cells in [`COLUMNS`] order.
    pub fn cells(&self) -> Vec<String> {
        COLUMNS
            .iter()
            .map(|column| self.cell(column).unwrap_or_default())
            .collect()
    }
}

/// Validation rows of one file, all tagged with the same vendor code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationTable {
    vendor_code: String,
    file_name: String,
    rows: Vec<ValidationRow>,
}

impl ValidationTable {
    pub fn new(vendor_code: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            vendor_code: vendor_code.into(),
            file_name: file_name.into(),
            rows: Vec::new(),
        }
    }

    pub fn vendor_code(&self) -> &str {
        &self.vendor_code
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn rows(&self) -> &[ValidationRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn invalid_count(&self) -> usize {
        self.rows.iter().filter(|row| !row.is_valid()).count()
    }

    /// Every value of `column`, in record order.
    pub fn column(&self, column: &str) -> Option<Vec<String>> {
        if !COLUMNS.contains(&column) {
            return None;
        }
        Some(
            self.rows
                .iter()
                .map(|row| row.cell(column).unwrap_or_default())
                .collect(),
        )
    }

    /// Column name to values, in [`COLUMNS`] order.
    pub fn to_columns(&self) -> Vec<(&'static str, Vec<String>)> {
        COLUMNS
            .iter()
            .map(|&column| (column, self.column(column).unwrap_or_default()))
            .collect()
    }

    /// Row-wise export, ready to append to a sheet.
    pub fn to_rows(&self) -> Vec<Vec<String>> {
        self.rows.iter().map(ValidationRow::cells).collect()
    }
}

/// Decodes a payload and checks every record with a [`RecordValidator`].
pub struct ValidationPipeline<'a> {
    validator: &'a dyn RecordValidator,
}

impl<'a> ValidationPipeline<'a> {
    pub fn new(validator: &'a dyn RecordValidator) -> Self {
        Self { validator }
    }

    pub fn validate(
        &self,
        file: &FetchedFile,
        vendor: &str,
    ) -> Result<ValidationTable, ValidationError> {
        self.validate_bytes(&file.content, file.name(), vendor)
    }

    /// The payload is decoded twice: once to count the records (and make sure
    /// all of them decode) and once to validate them.
    pub fn validate_bytes(
        &self,
        content: &[u8],
        file_name: &str,
        vendor: &str,
    ) -> Result<ValidationTable, ValidationError> {
        let decode_error = |position: usize, source: MarcError| ValidationError::Decode {
            file: file_name.to_string(),
            position,
            source,
        };

        let mut total = 0;
        for (i, record) in MarcReader::new(content).enumerate() {
            record.map_err(|e| decode_error(i + 1, e))?;
            total += 1;
        }

        let mut table = ValidationTable::new(vendor_code(vendor), file_name);
        for (i, record) in MarcReader::new(content).enumerate() {
            let record = record.map_err(|e| decode_error(i + 1, e))?;
            let outcome = self.validator.check(&record);
            table.rows.push(ValidationRow {
                outcome,
                record_number: format!("{} of {}", i + 1, total),
                control_number: control_number(&record),
                file_name: file_name.to_string(),
                vendor_code: table.vendor_code.clone(),
                validated_at: Utc::now(),
            });
        }
        debug!(
            file = %file_name,
            vendor_code = %table.vendor_code,
            records = table.len(),
            invalid = table.invalid_count(),
            "[VALIDATE] Validated file"
        );
        Ok(table)
    }
}

const ORDER_TAG: &str = "960";
const ITEM_TAG: &str = "949";

/// Rule-based record validator.
///
/// - a required tag that is absent is a missing field
/// - a forbidden tag that is present is an extra field
/// - a control field without data, or a data field without subfields, is
///   invalid
/// - order (`960`) and item (`949`) fields present in differing numbers are
///   an order/item mismatch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRules {
    #[serde(default)]
    pub required_fields: Vec<String>,
    #[serde(default)]
    pub forbidden_fields: Vec<String>,
}

impl FieldRules {
    pub fn requiring<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            required_fields: tags.into_iter().map(Into::into).collect(),
            forbidden_fields: Vec::new(),
        }
    }
}

impl RecordValidator for FieldRules {
    fn check(&self, record: &Record) -> ValidationOutcome {
        let missing_fields: Vec<String> = self
            .required_fields
            .iter()
            .filter(|tag| !record.has_field(tag))
            .cloned()
            .collect();
        let extra_fields: Vec<String> = self
            .forbidden_fields
            .iter()
            .filter(|tag| record.has_field(tag))
            .cloned()
            .collect();
        let mut invalid_fields: Vec<String> = Vec::new();
        for field in record.fields.iter().filter(|f| !is_well_formed(f)) {
            if !invalid_fields.iter().any(|tag| tag == field.tag()) {
                invalid_fields.push(field.tag().to_string());
            }
        }

        let orders = record.fields_with_tag(ORDER_TAG).count();
        let items = record.fields_with_tag(ITEM_TAG).count();
        let order_item_mismatches = if orders > 0 && items > 0 && orders != items {
            vec![format!(
                "{orders} order field(s) ({ORDER_TAG}) but {items} item field(s) ({ITEM_TAG})"
            )]
        } else {
            Vec::new()
        };

        let total = missing_fields.len()
            + extra_fields.len()
            + invalid_fields.len()
            + order_item_mismatches.len();
        if total == 0 {
            return ValidationOutcome::Valid;
        }
        ValidationOutcome::Invalid(RecordErrors {
            missing_fields,
            extra_fields,
            invalid_fields,
            order_item_mismatches,
            error_count: Some(total),
        })
    }
}

fn is_well_formed(field: &Field) -> bool {
    match field {
        Field::Control { tag, data } => is_control_tag(tag) && !data.is_empty(),
        Field::Data { tag, subfields, .. } => {
            tag.len() == 3
                && tag.bytes().all(|b| b.is_ascii_alphanumeric())
                && !is_control_tag(tag)
                && !subfields.is_empty()
        }
    }
}

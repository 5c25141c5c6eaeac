//! Per-field input validation and normalization.
//!
//! # Responsibilities
//! - Validate one named scalar against its field contract
//! - Normalize accepted values (strip tags, control characters, disallowed chars)
//! - Reduce a request body to its recognized, validated subset
//!
//! # Design Decisions
//! - Every validator returns `FieldResult`; the first failing check for a field wins
//! - Unknown body keys are dropped silently, recognized keys are validated strictly
//! - Status is always 400 for this layer

use std::borrow::Cow;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use chrono::{Datelike, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::security::patterns::{self, PATH_INJECTION, SQL_INJECTION, XSS};
use crate::security::types::{FieldError, FieldResult, ViolationCode};

pub const MAX_PATH_PARAMETER_LEN: usize = 100;
pub const MAX_SEARCH_QUERY_LEN: usize = 200;
pub const MAX_CURSOR_LEN: usize = 500;
pub const MIN_FISCAL_YEAR: i32 = 2010;

pub const LIMIT_RANGE: (i64, i64, i64) = (1, 200, 50);
pub const OFFSET_RANGE: (i64, i64, i64) = (0, 10_000, 0);

/// Closed set of storage document variants.
pub const ALLOWED_FILE_TYPES: &[&str] = &[
    "PublicDoc",
    "PublicDoc_markdown",
    "AuditDoc",
    "AuditDoc_markdown",
];

/// Query parameters checked on GET requests.
pub const QUERY_FIELDS: &[&str] = &[
    "fiscal_year",
    "name_filter",
    "cursor",
    "limit",
    "company_id",
    "file_type",
];

static FISCAL_YEAR: Lazy<Regex> = Lazy::new(|| compile(r"^(20\d{2}|FY20\d{2})$"));
static COMPANY_ID: Lazy<Regex> = Lazy::new(|| compile(r"^[A-Z0-9-]{8,20}$"));
static CURSOR: Lazy<Regex> = Lazy::new(|| compile(r"^[A-Za-z0-9+/]+=*$"));
static DRIVE_PATH: Lazy<Regex> = Lazy::new(|| compile(r"^[a-zA-Z]:[\\/]"));
static URL_SCHEME: Lazy<Regex> = Lazy::new(|| compile(r"(?i)^(http|https|ftp|file):"));
static HTML_TAG: Lazy<Regex> = Lazy::new(|| compile(r"(?s)<[^>]*>"));

// Cursors are produced by several clients; padding is optional.
const CURSOR_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

fn compile(source: &str) -> Regex {
    Regex::new(source).unwrap_or_else(|e| panic!("invalid built-in pattern {source}: {e}"))
}

fn truncate_chars(input: &str, max: usize) -> String {
    input.chars().take(max).collect()
}

/// Validate a value used to build a storage path segment.
///
/// Injection signatures run right after the length check. They reject path
/// separators and colons, so the absolute, UNC and URL checks that follow
/// only see inputs the signature set lets through.
///
/// No query or body key routes here; the pipeline reaches it only through
/// `validate_named_field("path", ..)`, which `shield-cli check-input` uses.
pub fn validate_path_parameter(input: &str) -> FieldResult<String> {
    if input.is_empty() {
        return Err(FieldError::new(ViolationCode::EmptyParameter, "Parameter is required"));
    }

    if input.chars().count() > MAX_PATH_PARAMETER_LEN {
        return Err(FieldError::new(ViolationCode::PathTooLong, "Parameter too long"));
    }

    if let Some(rule) = PATH_INJECTION.first_match(input) {
        tracing::warn!(rule = rule.name, "Path injection signature matched");
        return Err(FieldError::new(
            ViolationCode::PathInjection,
            "Invalid path characters detected",
        ));
    }

    if input.starts_with('/') || DRIVE_PATH.is_match(input) {
        return Err(FieldError::new(
            ViolationCode::AbsolutePath,
            "Absolute paths are not allowed",
        ));
    }

    if input.starts_with("\\\\") || input.starts_with("//") {
        return Err(FieldError::new(ViolationCode::UncPath, "UNC paths are not allowed"));
    }

    if URL_SCHEME.is_match(input) {
        return Err(FieldError::new(ViolationCode::UrlInPath, "URLs are not allowed"));
    }

    let sanitized: String = input
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();

    if sanitized.is_empty() {
        return Err(FieldError::new(
            ViolationCode::InvalidSanitized,
            "Invalid parameter after sanitization",
        ));
    }

    Ok(sanitized)
}

/// Validate a free-text search query and reduce it to plain text.
pub fn validate_search_query(input: &str) -> FieldResult<String> {
    if input.chars().count() > MAX_SEARCH_QUERY_LEN {
        return Err(FieldError::new(ViolationCode::QueryTooLong, "Search query too long"));
    }

    if let Some(rule) = SQL_INJECTION.first_match(input) {
        tracing::warn!(rule = rule.name, "SQL injection signature matched");
        return Err(FieldError::new(
            ViolationCode::SqlInjection,
            "Malicious query pattern detected",
        ));
    }

    if let Some(rule) = XSS.first_match(input) {
        tracing::warn!(rule = rule.name, "XSS signature matched");
        return Err(FieldError::new(ViolationCode::XssDetected, "XSS pattern detected"));
    }

    let text = HTML_TAG.replace_all(input, "");
    let cleaned: String = text.chars().filter(|c| !patterns::is_control(*c)).collect();

    Ok(truncate_chars(&cleaned, MAX_SEARCH_QUERY_LEN))
}

/// Validate a fiscal year (`2024` or `FY2024`) against the current calendar year.
pub fn validate_fiscal_year(input: &str) -> FieldResult<String> {
    validate_fiscal_year_for(input, Utc::now().year())
}

/// Validate a fiscal year against an explicit current year.
pub fn validate_fiscal_year_for(input: &str, current_year: i32) -> FieldResult<String> {
    if !FISCAL_YEAR.is_match(input) {
        return Err(FieldError::new(
            ViolationCode::InvalidFiscalYear,
            "Invalid fiscal year format",
        ));
    }

    let year: i32 = input
        .trim_start_matches("FY")
        .parse()
        .map_err(|_| FieldError::new(ViolationCode::InvalidFiscalYear, "Invalid fiscal year format"))?;

    if year < MIN_FISCAL_YEAR || year > current_year + 1 {
        return Err(FieldError::new(
            ViolationCode::FiscalYearRange,
            "Fiscal year out of range",
        ));
    }

    Ok(input.to_string())
}

/// Validate an opaque pagination cursor.
pub fn validate_cursor(input: &str) -> FieldResult<String> {
    if input.len() > MAX_CURSOR_LEN {
        return Err(FieldError::new(ViolationCode::CursorTooLong, "Cursor too long"));
    }

    if !CURSOR.is_match(input) {
        return Err(FieldError::new(ViolationCode::InvalidCursor, "Invalid cursor format"));
    }

    let bytes = CURSOR_ENGINE
        .decode(input)
        .map_err(|_| FieldError::new(ViolationCode::CursorDecodeError, "Invalid cursor encoding"))?;
    let decoded = String::from_utf8_lossy(&bytes);

    if decoded.contains("..") || decoded.contains('/') || decoded.contains('\\') {
        return Err(FieldError::new(
            ViolationCode::MaliciousCursor,
            "Malicious cursor content",
        ));
    }

    Ok(input.to_string())
}

/// Parse an integer parameter, falling back to `default` when absent.
pub fn validate_numeric(input: Option<&str>, min: i64, max: i64, default: i64) -> FieldResult<i64> {
    let raw = match input.map(str::trim) {
        None | Some("") => return Ok(default),
        Some(raw) => raw,
    };

    let parsed: i64 = raw
        .parse()
        .map_err(|_| FieldError::new(ViolationCode::InvalidNumber, "Invalid numeric value"))?;

    if parsed < min || parsed > max {
        return Err(FieldError::new(
            ViolationCode::NumberOutOfRange,
            format!("Value out of range ({min}-{max})"),
        ));
    }

    Ok(parsed)
}

pub fn validate_file_type(input: &str) -> FieldResult<String> {
    if ALLOWED_FILE_TYPES.contains(&input) {
        Ok(input.to_string())
    } else {
        Err(FieldError::new(ViolationCode::InvalidFileType, "Invalid file type"))
    }
}

pub fn validate_company_id(input: &str) -> FieldResult<String> {
    if COMPANY_ID.is_match(input) {
        Ok(input.to_string())
    } else {
        Err(FieldError::new(
            ViolationCode::InvalidCompanyId,
            "Invalid company ID format",
        ))
    }
}

/// Validate a value by field name.
///
/// Returns `None` for names with no field contract.
pub fn validate_named_field(name: &str, value: &str) -> Option<FieldResult<Value>> {
    let result = match name {
        "fiscal_year" => validate_fiscal_year(value).map(Value::from),
        "name_filter" | "company_name_filter" => validate_search_query(value).map(Value::from),
        "cursor" => validate_cursor(value).map(Value::from),
        "limit" => {
            let (min, max, default) = LIMIT_RANGE;
            validate_numeric(Some(value), min, max, default).map(Value::from)
        }
        "offset" => {
            let (min, max, default) = OFFSET_RANGE;
            validate_numeric(Some(value), min, max, default).map(Value::from)
        }
        "company_id" => validate_company_id(value).map(Value::from),
        "file_type" => validate_file_type(value).map(Value::from),
        "path" => validate_path_parameter(value).map(Value::from),
        _ => return None,
    };
    Some(result)
}

/// Validate every recognized query parameter independently.
///
/// Only the first occurrence of a repeated key is considered. Empty values
/// count as absent.
pub fn validate_query_params(pairs: &[(String, String)]) -> Vec<ViolationCode> {
    let mut violations = Vec::new();

    for field in QUERY_FIELDS {
        let Some((_, value)) = pairs.iter().find(|(key, _)| key == field) else {
            continue;
        };
        if value.is_empty() {
            continue;
        }
        if let Some(Err(err)) = validate_named_field(field, value) {
            tracing::debug!(field = %field, code = %err.code, "Query parameter rejected");
            violations.push(err.code);
        }
    }

    violations
}

enum Scalar<'a> {
    Absent,
    Text(Cow<'a, str>),
    Unsupported,
}

fn scalar(value: &Value) -> Scalar<'_> {
    match value {
        Value::Null => Scalar::Absent,
        Value::String(s) if s.is_empty() => Scalar::Absent,
        Value::String(s) => Scalar::Text(Cow::Borrowed(s)),
        Value::Number(n) => Scalar::Text(Cow::Owned(n.to_string())),
        _ => Scalar::Unsupported,
    }
}

fn text_field<F>(
    value: &Value,
    unsupported: ViolationCode,
    validate: F,
) -> FieldResult<Value>
where
    F: Fn(&str) -> FieldResult<String>,
{
    match scalar(value) {
        Scalar::Absent => Ok(Value::Null),
        Scalar::Text(text) => validate(&text).map(Value::from),
        Scalar::Unsupported => Err(FieldError::new(unsupported, "Unsupported value type")),
    }
}

fn numeric_field(value: &Value, (min, max, default): (i64, i64, i64)) -> FieldResult<Value> {
    match scalar(value) {
        Scalar::Absent => Ok(Value::from(default)),
        Scalar::Text(text) => validate_numeric(Some(&text), min, max, default).map(Value::from),
        Scalar::Unsupported => Err(FieldError::new(
            ViolationCode::InvalidNumber,
            "Invalid numeric value",
        )),
    }
}

/// Reduce a body object to its recognized keys, validating each.
///
/// `company_name_filter` is accepted as an alias and emitted as `name_filter`.
pub fn validate_batch_parameters(params: &Map<String, Value>) -> FieldResult<Map<String, Value>> {
    let mut validated = Map::new();

    if let Some(value) = params.get("fiscal_year") {
        let v = text_field(value, ViolationCode::InvalidFiscalYear, validate_fiscal_year)?;
        validated.insert("fiscal_year".to_string(), v);
    }

    let name_filter = params
        .get("company_name_filter")
        .filter(|v| !v.is_null())
        .or_else(|| params.get("name_filter"));
    if let Some(value) = name_filter {
        let v = text_field(value, ViolationCode::InvalidSanitized, validate_search_query)?;
        validated.insert("name_filter".to_string(), v);
    }

    if let Some(value) = params.get("file_type") {
        let v = text_field(value, ViolationCode::InvalidFileType, validate_file_type)?;
        validated.insert("file_type".to_string(), v);
    }

    if let Some(value) = params.get("cursor") {
        let v = text_field(value, ViolationCode::InvalidCursor, validate_cursor)?;
        validated.insert("cursor".to_string(), v);
    }

    if let Some(value) = params.get("limit") {
        validated.insert("limit".to_string(), numeric_field(value, LIMIT_RANGE)?);
    }

    if let Some(value) = params.get("offset") {
        validated.insert("offset".to_string(), numeric_field(value, OFFSET_RANGE)?);
    }

    if let Some(value) = params.get("company_id") {
        let v = text_field(value, ViolationCode::InvalidCompanyId, validate_company_id)?;
        validated.insert("company_id".to_string(), v);
    }

    Ok(validated)
}

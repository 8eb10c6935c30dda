//! Shared argument validation and response shaping for the handler groups

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{json, Value};

use crate::domain::registry::HandlerError;

pub const DEFAULT_PER_PAGE: u32 = 25;
pub const MAX_PER_PAGE: u32 = 100;

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9](?:[A-Za-z0-9\-]*[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9\-]*[A-Za-z0-9])?)*\.[A-Za-z]{2,}$")
        .expect("email pattern compiles")
});

static IDENTIFIER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_\-]{1,64}$").expect("identifier pattern compiles"));

static DOMAIN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[a-z0-9](?:[a-z0-9\-]{0,61}[a-z0-9])?\.)+[a-z]{2,63}$")
        .expect("domain pattern compiles")
});

pub fn validate_email(value: &str) -> Result<String, HandlerError> {
    let normalized = value.trim().to_ascii_lowercase();
    if !EMAIL_PATTERN.is_match(&normalized) {
        return Err(HandlerError::invalid("email must be a valid email address"));
    }
    Ok(normalized)
}

pub fn validate_identifier(field: &str, value: &str) -> Result<String, HandlerError> {
    let normalized = value.trim();
    if !IDENTIFIER_PATTERN.is_match(normalized) {
        return Err(HandlerError::invalid(format!(
            "{field} must be 1-64 characters of letters, digits, dashes, or underscores"
        )));
    }
    Ok(normalized.to_string())
}

/// Normalizes `https://www.Example.com/` style input to `example.com`.
pub fn normalize_domain(value: &str) -> Result<String, HandlerError> {
    let lowered = value.trim().to_ascii_lowercase();
    let without_scheme = lowered
        .strip_prefix("https://")
        .or_else(|| lowered.strip_prefix("http://"))
        .unwrap_or(lowered.as_str());
    let host = without_scheme
        .split('/')
        .next()
        .unwrap_or_default()
        .trim_start_matches("www.");

    if !DOMAIN_PATTERN.is_match(host) {
        return Err(HandlerError::invalid(format!(
            "organization domain '{}' is not a valid domain name",
            value.trim()
        )));
    }
    Ok(host.to_string())
}

pub fn require_text(field: &str, value: &str) -> Result<String, HandlerError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(HandlerError::invalid(format!("{field} must not be empty")));
    }
    Ok(trimmed.to_string())
}

pub fn clean_text(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn clean_list(values: Option<Vec<String>>) -> Vec<String> {
    values
        .unwrap_or_default()
        .into_iter()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect()
}

pub fn normalize_page(page: Option<u32>) -> u32 {
    page.unwrap_or(1).max(1)
}

pub fn normalize_per_page(per_page: Option<u32>) -> Result<u32, HandlerError> {
    let per_page = per_page.unwrap_or(DEFAULT_PER_PAGE);
    if per_page == 0 || per_page > MAX_PER_PAGE {
        return Err(HandlerError::invalid(format!(
            "per_page must be between 1 and {MAX_PER_PAGE}"
        )));
    }
    Ok(per_page)
}

/// Array under `key` in an upstream response, or empty.
pub fn records<'a>(response: &'a Value, key: &str) -> &'a [Value] {
    response
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

pub fn pagination(response: &Value, page: u32, per_page: u32, returned: usize) -> Value {
    let upstream = response.get("pagination");
    let total = upstream
        .and_then(|value| value.get("total_entries"))
        .and_then(Value::as_u64)
        .unwrap_or(returned as u64);
    let total_pages = upstream
        .and_then(|value| value.get("total_pages"))
        .and_then(Value::as_u64)
        .unwrap_or_else(|| total.div_ceil(u64::from(per_page.max(1))));

    json!({
        "page": page,
        "per_page": per_page,
        "total_entries": total,
        "total_pages": total_pages,
    })
}

/// Copies the listed fields of `record`, dropping nulls.
pub fn pick(record: &Value, fields: &[&str]) -> Value {
    let mut picked = serde_json::Map::new();
    for field in fields {
        if let Some(value) = record.get(*field).filter(|value| !value.is_null()) {
            picked.insert((*field).to_string(), value.clone());
        }
    }
    Value::Object(picked)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_is_lowercased_and_validated() {
        assert_eq!(
            validate_email("  Jane.Doe@Example.COM ").expect("valid email"),
            "jane.doe@example.com"
        );
        assert!(validate_email("not-an-email").is_err());
        assert!(validate_email("a@b").is_err());
    }

    #[test]
    fn identifiers_reject_path_characters() {
        assert_eq!(
            validate_identifier("contact_id", "5f2a9c_x-1").expect("valid id"),
            "5f2a9c_x-1"
        );
        assert!(validate_identifier("contact_id", "../admin").is_err());
        assert!(validate_identifier("contact_id", "").is_err());
    }

    #[test]
    fn domains_are_normalized() {
        assert_eq!(
            normalize_domain("https://www.Acme.io/about").expect("valid domain"),
            "acme.io"
        );
        assert!(normalize_domain("acme").is_err());
    }

    #[test]
    fn per_page_bounds_are_enforced() {
        assert_eq!(normalize_per_page(None).expect("default"), DEFAULT_PER_PAGE);
        assert_eq!(normalize_per_page(Some(100)).expect("max"), 100);
        assert!(normalize_per_page(Some(0)).is_err());
        assert!(normalize_per_page(Some(101)).is_err());
        assert_eq!(normalize_page(Some(0)), 1);
    }

    #[test]
    fn pagination_falls_back_to_returned_count() {
        let value = pagination(&json!({}), 1, 10, 3);
        assert_eq!(value["total_entries"], json!(3));
        assert_eq!(value["total_pages"], json!(1));

        let upstream = json!({"pagination": {"total_entries": 42, "total_pages": 5}});
        let value = pagination(&upstream, 2, 10, 10);
        assert_eq!(value["total_entries"], json!(42));
        assert_eq!(value["total_pages"], json!(5));
    }

    #[test]
    fn pick_drops_missing_and_null_fields() {
        let record = json!({"id": "c1", "name": "Ada", "email": null});
        assert_eq!(pick(&record, &["id", "email", "title"]), json!({"id": "c1"}));
    }
}

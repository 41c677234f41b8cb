//! Key Normalizer
//!
//! Converts a request's parameter set into a canonical form so that semantically
//! identical requests hash identically regardless of client-side field ordering,
//! list ordering or geometry whitespace.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Number, Value};

use crate::error::{CacheError, Result};

// == Normalization Rules ==
/// Which fields of a query kind get special treatment.
#[derive(Debug, Clone, Copy)]
pub struct NormalizationRules {
    /// Fields holding WKT geometry text
    pub geometry_fields: &'static [&'static str],
    /// Fields holding lists that are compared as sets
    pub list_fields: &'static [&'static str],
}

impl NormalizationRules {
    fn is_geometry(&self, field: &str) -> bool {
        self.geometry_fields.contains(&field)
    }

    fn is_list(&self, field: &str) -> bool {
        self.list_fields.contains(&field)
    }
}

// == Normalized Params ==
/// Canonical field name → value mapping.
///
/// Backed by a `BTreeMap`, so iteration and serialization are always key-sorted.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct NormalizedParams(BTreeMap<String, Value>);

impl NormalizedParams {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Returns the field as text when it is a string.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Canonical JSON text of the map, keys sorted.
    pub fn canonical(&self) -> String {
        // A BTreeMap<String, Value> always serializes.
        serde_json::to_string(&self.0).unwrap_or_default()
    }

    /// Canonical text of every field except the given ones.
    pub fn canonical_without(&self, excluded: &[&str]) -> String {
        let rest: BTreeMap<&String, &Value> = self
            .0
            .iter()
            .filter(|(k, _)| !excluded.contains(&k.as_str()))
            .collect();
        serde_json::to_string(&rest).unwrap_or_default()
    }
}

// == Normalize ==
/// Normalizes any serializable request shape under the given rules.
pub fn normalize<P: Serialize>(params: &P, rules: &NormalizationRules) -> Result<NormalizedParams> {
    let value = serde_json::to_value(params)
        .map_err(|e| CacheError::MalformedInput(format!("unserializable parameters: {}", e)))?;
    normalize_value(&value, rules)
}

/// Normalizes a JSON object of request parameters.
///
/// Null fields are dropped, geometry text is canonicalized, list fields are
/// deduplicated, sorted and joined with `,`. Everything else passes through.
pub fn normalize_value(value: &Value, rules: &NormalizationRules) -> Result<NormalizedParams> {
    let object = value.as_object().ok_or_else(|| {
        CacheError::MalformedInput(format!(
            "expected an object of parameters, got {}",
            json_type(value)
        ))
    })?;

    let mut out = BTreeMap::new();
    for (field, raw) in object {
        if raw.is_null() {
            continue;
        }

        let canonical = if rules.is_geometry(field) {
            let text = raw.as_str().ok_or_else(|| {
                CacheError::MalformedInput(format!(
                    "geometry field '{}' must be a string, got {}",
                    field,
                    json_type(raw)
                ))
            })?;
            Value::String(normalize_wkt(text))
        } else if rules.is_list(field) {
            Value::String(normalize_list(field, raw)?)
        } else {
            raw.clone()
        };

        out.insert(field.clone(), canonical);
    }

    Ok(NormalizedParams(out))
}

// == Geometry ==
/// Canonicalizes WKT text.
///
/// Trims, upper-cases, collapses whitespace runs to one space and drops whitespace
/// next to `(`, `)` and `,`: `" polygon (( 0 0,1  0 ))"` becomes `"POLYGON((0 0,1 0))"`.
pub fn normalize_wkt(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;

    for ch in text.trim().chars() {
        if ch.is_whitespace() {
            pending_space = true;
            continue;
        }

        let is_punct = matches!(ch, '(' | ')' | ',');
        let after_punct = out.ends_with(|c| matches!(c, '(' | ')' | ','));
        if pending_space && !is_punct && !after_punct && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        out.extend(ch.to_uppercase());
    }

    out
}

// == Lists ==
fn normalize_list(field: &str, raw: &Value) -> Result<String> {
    let items = raw.as_array().ok_or_else(|| {
        CacheError::MalformedInput(format!(
            "list field '{}' must be an array, got {}",
            field,
            json_type(raw)
        ))
    })?;

    let mut parts = items
        .iter()
        .map(|item| match item {
            Value::String(s) => Ok(s.trim().to_string()),
            Value::Number(n) => Ok(canonical_number(n)),
            Value::Bool(b) => Ok(b.to_string()),
            other => Err(CacheError::MalformedInput(format!(
                "list field '{}' may only hold scalars, got {}",
                field,
                json_type(other)
            ))),
        })
        .collect::<Result<Vec<_>>>()?;

    parts.sort();
    parts.dedup();
    Ok(parts.join(","))
}

/// Integral floats print as integers, so `1` and `1.0` are the same list item.
fn canonical_number(n: &Number) -> String {
    const EXACT_LIMIT: f64 = 9_007_199_254_740_992.0;

    match n.as_f64() {
        Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < EXACT_LIMIT => {
            format!("{}", f as i64)
        }
        _ => n.to_string(),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const RULES: NormalizationRules = NormalizationRules {
        geometry_fields: &["aoi"],
        list_fields: &["productTypes", "resolutions"],
    };

    #[test]
    fn test_wkt_whitespace_and_case() {
        assert_eq!(
            normalize_wkt("  polygon (( 0 0 , 1   0,1 1, 0 0 ))  "),
            "POLYGON((0 0,1 0,1 1,0 0))"
        );
        assert_eq!(normalize_wkt("POINT(1 2)"), "POINT(1 2)");
        assert_eq!(normalize_wkt("point\t(1\n2)"), "POINT(1 2)");
    }

    #[test]
    fn test_wkt_multi_geometry() {
        assert_eq!(
            normalize_wkt("MultiPolygon ( ((0 0, 1 0, 0 0)) , ((2 2,3 2,2 2)) )"),
            "MULTIPOLYGON(((0 0,1 0,0 0)),((2 2,3 2,2 2)))"
        );
    }

    #[test]
    fn test_lists_sorted_and_deduplicated() {
        let params = json!({"aoi": "POINT(0 0)", "productTypes": ["SAR", "DAY", "SAR"]});
        let normalized = normalize_value(&params, &RULES).unwrap();
        assert_eq!(normalized.get_str("productTypes"), Some("DAY,SAR"));
    }

    #[test]
    fn test_integral_list_numbers_match_integers() {
        let ints = normalize_value(&json!({"resolutions": [1, 2.5]}), &RULES).unwrap();
        let floats = normalize_value(&json!({"resolutions": [2.5, 1.0, 1]}), &RULES).unwrap();
        assert_eq!(ints.get_str("resolutions"), Some("1,2.5"));
        assert_eq!(ints, floats);
    }

    #[test]
    fn test_null_fields_omitted_but_empty_list_kept() {
        let params = json!({"aoi": "POINT(0 0)", "fromDate": null, "resolutions": []});
        let normalized = normalize_value(&params, &RULES).unwrap();
        assert!(normalized.get("fromDate").is_none());
        assert_eq!(normalized.get_str("resolutions"), Some(""));
        assert_eq!(normalized.len(), 2);
    }

    #[test]
    fn test_scalars_pass_through() {
        let params = json!({"maxCloudCoveragePercent": 20.5, "openData": true, "fromDate": "2024-01-01"});
        let normalized = normalize_value(&params, &RULES).unwrap();
        assert_eq!(normalized.get("maxCloudCoveragePercent"), Some(&json!(20.5)));
        assert_eq!(normalized.get("openData"), Some(&json!(true)));
        assert_eq!(normalized.get_str("fromDate"), Some("2024-01-01"));
    }

    #[test]
    fn test_canonical_is_key_sorted() {
        let a: Value = serde_json::from_str(r#"{"b": 1, "a": 2}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a": 2, "b": 1}"#).unwrap();
        let na = normalize_value(&a, &RULES).unwrap();
        let nb = normalize_value(&b, &RULES).unwrap();
        assert_eq!(na.canonical(), r#"{"a":2,"b":1}"#);
        assert_eq!(na.canonical(), nb.canonical());
    }

    #[test]
    fn test_canonical_without() {
        let params = json!({"aoi": "POINT(0 0)", "openData": true});
        let normalized = normalize_value(&params, &RULES).unwrap();
        assert_eq!(normalized.canonical_without(&["aoi"]), r#"{"openData":true}"#);
    }

    #[test]
    fn test_rejects_non_object() {
        let result = normalize_value(&json!(["aoi"]), &RULES);
        assert!(matches!(result, Err(CacheError::MalformedInput(_))));
    }

    #[test]
    fn test_rejects_non_string_geometry() {
        let result = normalize_value(&json!({"aoi": 5}), &RULES);
        assert!(matches!(result, Err(CacheError::MalformedInput(_))));
    }

    #[test]
    fn test_rejects_nested_list_items() {
        let result = normalize_value(&json!({"productTypes": [["DAY"]]}), &RULES);
        assert!(matches!(result, Err(CacheError::MalformedInput(_))));

        let result = normalize_value(&json!({"productTypes": "DAY"}), &RULES);
        assert!(matches!(result, Err(CacheError::MalformedInput(_))));
    }
}

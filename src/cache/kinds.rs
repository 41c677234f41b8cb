//! Query kinds served by the TTL result cache.
//!
//! A kind ties a request shape to its storage table, its normalization rules
//! and the fields projected into diagnostic columns.

use serde::Serialize;
use serde_json::Value;

use crate::cache::entry::{FilterProjection, ResultTable};
use crate::keys::{
    ArchiveSearchParams, FeasibilityParams, NormalizationRules, NormalizedParams,
    ARCHIVE_SEARCH_RULES, FEASIBILITY_RULES,
};

pub trait QueryKind: Send + Sync + 'static {
    type Params: Serialize + Send + Sync;

    const TABLE: ResultTable;
    const RULES: NormalizationRules;
    const GEOMETRY_FIELD: &'static str;
    const DATE_FROM_FIELD: &'static str;
    const DATE_TO_FIELD: &'static str;

    /// Scalar stored next to the payload (result count, score, ...).
    fn summarize(response: &Value) -> Option<f64>;

    fn project(params: &NormalizedParams) -> FilterProjection {
        let projected = [Self::GEOMETRY_FIELD, Self::DATE_FROM_FIELD, Self::DATE_TO_FIELD];
        FilterProjection {
            geometry: params.get_str(Self::GEOMETRY_FIELD).map(str::to_string),
            date_from: params.get_str(Self::DATE_FROM_FIELD).map(str::to_string),
            date_to: params.get_str(Self::DATE_TO_FIELD).map(str::to_string),
            filters: Some(params.canonical_without(&projected)),
        }
    }
}

// == Archive Search ==
#[derive(Debug, Clone, Copy)]
pub struct ArchiveSearch;

impl QueryKind for ArchiveSearch {
    type Params = ArchiveSearchParams;

    const TABLE: ResultTable = ResultTable::Search;
    const RULES: NormalizationRules = ARCHIVE_SEARCH_RULES;
    const GEOMETRY_FIELD: &'static str = "aoi";
    const DATE_FROM_FIELD: &'static str = "fromDate";
    const DATE_TO_FIELD: &'static str = "toDate";

    /// Number of results: the reported `total`, else the length of the result list.
    fn summarize(response: &Value) -> Option<f64> {
        if let Some(total) = response.get("total").and_then(Value::as_f64) {
            return Some(total);
        }
        ["archives", "results", "features"]
            .iter()
            .find_map(|field| response.get(field).and_then(Value::as_array))
            .or_else(|| response.as_array())
            .map(|items| items.len() as f64)
    }
}

// == Feasibility ==
#[derive(Debug, Clone, Copy)]
pub struct Feasibility;

impl QueryKind for Feasibility {
    type Params = FeasibilityParams;

    const TABLE: ResultTable = ResultTable::Feasibility;
    const RULES: NormalizationRules = FEASIBILITY_RULES;
    const GEOMETRY_FIELD: &'static str = "aoi";
    const DATE_FROM_FIELD: &'static str = "startDate";
    const DATE_TO_FIELD: &'static str = "endDate";

    /// Overall feasibility score.
    fn summarize(response: &Value) -> Option<f64> {
        ["/overallScore/feasibility", "/feasibilityScore", "/score"]
            .iter()
            .find_map(|pointer| response.pointer(pointer).and_then(Value::as_f64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::normalize;
    use serde_json::json;

    #[test]
    fn test_search_summary() {
        assert_eq!(ArchiveSearch::summarize(&json!({"total": 12, "archives": []})), Some(12.0));
        assert_eq!(ArchiveSearch::summarize(&json!({"archives": [1, 2, 3]})), Some(3.0));
        assert_eq!(ArchiveSearch::summarize(&json!([{}, {}])), Some(2.0));
        assert_eq!(ArchiveSearch::summarize(&json!({"status": "ok"})), None);
    }

    #[test]
    fn test_feasibility_summary() {
        let response = json!({"overallScore": {"feasibility": 0.82}});
        assert_eq!(Feasibility::summarize(&response), Some(0.82));
        assert_eq!(Feasibility::summarize(&json!({"feasibilityScore": 0.4})), Some(0.4));
        assert_eq!(Feasibility::summarize(&json!({})), None);
    }

    #[test]
    fn test_search_projection() {
        let params = ArchiveSearchParams::new("point ( 1 2 )")
            .with_dates("2025-01-01", "2025-02-01")
            .with_product_types(["MULTISPECTRAL", "DAY"]);
        let normalized = normalize(&params, &ArchiveSearch::RULES).unwrap();
        let projection = ArchiveSearch::project(&normalized);

        assert_eq!(projection.geometry.as_deref(), Some("POINT(1 2)"));
        assert_eq!(projection.date_from.as_deref(), Some("2025-01-01"));
        assert_eq!(projection.date_to.as_deref(), Some("2025-02-01"));
        assert_eq!(
            projection.filters.as_deref(),
            Some(r#"{"productTypes":"DAY,MULTISPECTRAL"}"#)
        );
    }

    #[test]
    fn test_feasibility_projection_without_window() {
        let params = FeasibilityParams::new("POINT(0 0)", "DAY");
        let normalized = normalize(&params, &Feasibility::RULES).unwrap();
        let projection = Feasibility::project(&normalized);

        assert!(projection.date_from.is_none());
        assert_eq!(projection.filters.as_deref(), Some(r#"{"productType":"DAY"}"#));
    }
}

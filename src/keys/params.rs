//! Request shapes for the cached query kinds.
//!
//! Field names follow the upstream API's camelCase wire format, so the normalized
//! form (and therefore the key) matches what a caller would send upstream.

use serde::{Deserialize, Serialize};

use super::normalize::NormalizationRules;

// == Archive Search ==
/// Parameters of an archive (catalog) search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveSearchParams {
    /// Area of interest as WKT
    pub aoi: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cloud_coverage_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_off_nadir_angle: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolutions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_types: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub providers: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_data: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_overlap_ratio: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,
}

impl ArchiveSearchParams {
    pub fn new(aoi: impl Into<String>) -> Self {
        Self {
            aoi: aoi.into(),
            ..Self::default()
        }
    }

    pub fn with_dates(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.from_date = Some(from.into());
        self.to_date = Some(to.into());
        self
    }

    pub fn with_product_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.product_types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_resolutions<I, S>(mut self, resolutions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resolutions = Some(resolutions.into_iter().map(Into::into).collect());
        self
    }
}

pub const ARCHIVE_SEARCH_RULES: NormalizationRules = NormalizationRules {
    geometry_fields: &["aoi"],
    list_fields: &["resolutions", "productTypes", "providers"],
};

// == Feasibility ==
/// Parameters of a feasibility / pass-prediction check.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeasibilityParams {
    /// Area of interest as WKT
    pub aoi: String,
    pub product_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cloud_coverage_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_item: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub providers: Option<Vec<String>>,
}

impl FeasibilityParams {
    pub fn new(aoi: impl Into<String>, product_type: impl Into<String>) -> Self {
        Self {
            aoi: aoi.into(),
            product_type: product_type.into(),
            ..Self::default()
        }
    }

    pub fn with_window(mut self, start: impl Into<String>, end: impl Into<String>) -> Self {
        self.start_date = Some(start.into());
        self.end_date = Some(end.into());
        self
    }
}

pub const FEASIBILITY_RULES: NormalizationRules = NormalizationRules {
    geometry_fields: &["aoi"],
    list_fields: &["providers"],
};

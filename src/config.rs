//! Viewer configuration: endpoints, display settings and map parameters.

use std::fmt;

use serde::{Deserialize, Serialize};

const DEFAULT_API_BASE: &str = "http://127.0.0.1:5000";
const DEFAULT_BACKGROUND: &str = "static/mni_2mm.nii.gz";
const DEFAULT_PARAM_DEBOUNCE_SECS: f64 = 0.35;

/// Smoothing kernel requested from the map service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kernel {
    #[default]
    Gauss,
    Sinc,
    Uniform,
}

impl Kernel {
    pub const ALL: [Kernel; 3] = [Kernel::Gauss, Kernel::Sinc, Kernel::Uniform];

    /// Value sent in the `kernel` query parameter.
    pub fn as_str(self) -> &'static str {
        match self {
            Kernel::Gauss => "gauss",
            Kernel::Sinc => "sinc",
            Kernel::Uniform => "uniform",
        }
    }
}

impl fmt::Display for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kernel::Gauss => write!(f, "Gaussian"),
            Kernel::Sinc => write!(f, "Sinc"),
            Kernel::Uniform => write!(f, "Uniform"),
        }
    }
}

/// Parameters that only select which overlay file is requested.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapParams {
    /// Output voxel size in mm.
    pub voxel: f64,
    /// Kernel full width at half maximum in mm.
    pub fwhm: f64,
    pub kernel: Kernel,
    /// Radius in mm.
    pub r: f64,
}

impl Default for MapParams {
    fn default() -> Self {
        Self {
            voxel: 2.0,
            fwhm: 10.0,
            kernel: Kernel::Gauss,
            r: 6.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdMode {
    Value,
    #[default]
    Percentile,
}

/// How the overlay is drawn on top of the background.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Overlay opacity in `[0, 1]`.
    pub alpha: f32,
    pub positive_only: bool,
    pub use_abs: bool,
    pub threshold_mode: ThresholdMode,
    /// Raw cutoff used in [`ThresholdMode::Value`].
    pub threshold_value: f32,
    /// Percentile in `[0, 100]` used in [`ThresholdMode::Percentile`].
    pub percentile: f64,
    /// Show larger X indices on the right-hand side of the image.
    pub mirror_x: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            alpha: 0.5,
            positive_only: true,
            use_abs: false,
            threshold_mode: ThresholdMode::Percentile,
            threshold_value: 0.0,
            percentile: 95.0,
            mirror_x: true,
        }
    }
}

/// Startup configuration for a viewer session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Base URL of the map/locations service.
    pub api_base: String,
    /// URL or local path of the anatomical background.
    pub background_source: String,
    /// Quiet period before map parameter edits trigger a reload.
    pub param_debounce_secs: f64,
    pub initial_query: Option<String>,
    pub display: DisplayConfig,
    pub map: MapParams,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            api_base: std::env::var("NIIVIEW_API_BASE")
                .unwrap_or_else(|_| DEFAULT_API_BASE.to_string()),
            background_source: std::env::var("NIIVIEW_BACKGROUND")
                .unwrap_or_else(|_| DEFAULT_BACKGROUND.to_string()),
            param_debounce_secs: DEFAULT_PARAM_DEBOUNCE_SECS,
            initial_query: std::env::var("NIIVIEW_QUERY").ok().filter(|q| !q.trim().is_empty()),
            display: DisplayConfig::default(),
            map: MapParams::default(),
        }
    }
}

impl ViewerConfig {
    /// Parse a JSON override; missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

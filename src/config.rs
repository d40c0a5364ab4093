//! Viewer configuration.
//!
//! Everything the viewer needs that is not derived from the model itself:
//! framing, shading defaults, static auxiliary maps and the camera rig. All
//! fields default to the values of the studio setup so an empty JSON object is a
//! valid configuration.

use std::collections::BTreeMap;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Size of the largest bounding-box dimension after normalisation.
    pub footprint: f32,
    pub shading: ShadingDefaults,
    /// Static auxiliary maps per panel name. Applied once per load and
    /// independent of the user's selection.
    pub aux_maps: BTreeMap<String, AuxMaps>,
    pub camera: CameraConfig,
    /// Tone-mapping exposure.
    pub exposure: f32,
    pub clear_colour: [f64; 4],
    /// Base directory for relative asset URLs on native targets.
    pub asset_root: String,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            footprint: 2.5,
            shading: ShadingDefaults::default(),
            aux_maps: BTreeMap::new(),
            camera: CameraConfig::default(),
            exposure: 1.5,
            clear_colour: [0.96, 0.96, 0.96, 1.0],
            asset_root: "assets".to_string(),
        }
    }
}

impl ViewerConfig {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let config = serde_json::from_str(json).context("invalid viewer configuration")?;
        Ok(config)
    }
}

/// Fixed shading parameters the baseline pass applies to every panel.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadingDefaults {
    pub roughness: f32,
    pub metalness: f32,
    pub env_map_intensity: f32,
}

impl Default for ShadingDefaults {
    fn default() -> Self {
        // leather-like
        Self {
            roughness: 0.45,
            metalness: 0.1,
            env_map_intensity: 1.2,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AuxMaps {
    pub normal_url: Option<String>,
    pub roughness_url: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub position: [f32; 3],
    pub target: [f32; 3],
    pub fov_deg: f32,
    pub min_distance: f32,
    pub max_distance: f32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            position: [2.2, 0.25, 0.0],
            target: [0.0, 0.5, 0.0],
            fov_deg: 50.0,
            min_distance: 1.2,
            max_distance: 5.0,
        }
    }
}

//! Render pipelines and their bind group layouts.
//!
//! - `basic` builds the panel pipeline (material, camera and light groups)
//! - `light` holds the studio light rig uniform

pub mod basic;
pub mod light;

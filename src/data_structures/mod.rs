//! Viewer data structures: panels, materials, selections and GPU-side buffers.
//!
//! - `bounds` holds bounding boxes and the normalising group transform
//! - `material` contains materials, texture bindings and the original-material table
//! - `model` contains the vertex layout and per-panel GPU buffers
//! - `scene` is the loaded model as a flat list of named panels
//! - `selection` is the per-panel texture choice coming from the catalog
//! - `texture` contains the GPU texture wrapper and creation utilities

pub mod bounds;
pub mod material;
pub mod model;
pub mod scene;
pub mod selection;
pub mod texture;

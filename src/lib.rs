//! panel-ngin
//!
//! A product viewer that shows a 3D model made of named panels and lets a
//! catalog UI restyle each panel with its own colour, normal and roughness
//! textures. It runs natively and in the browser (WebGL through wgpu).
//!
//! The core is GPU independent and can be driven from tests:
//! - `cache`: URL-keyed texture cache with request coalescing and a loading counter
//! - `reconcile`: turns selection map changes into copy-on-write material edits
//! - `introspect`: stable panel list for pickers
//! - `normalize`: centres and scales a model to a fixed footprint
//! - `baseline`: shading defaults and static auxiliary maps
//! - `capture`: snapshots with render settings restored afterwards
//! - `supervisor`: fault isolation with retry
//!
//! On top of it:
//! - `context`: window, device, camera and lights
//! - `render`: per-panel GPU state and offscreen stills
//! - `resources`: fetching, glTF decoding and texture uploads
//! - `viewer`: one mounted viewer tying the above together
//! - `flow`: the winit event loop and the proxy/observer pair for embedding
//!

pub mod baseline;
pub mod cache;
pub mod camera;
pub mod capture;
pub mod config;
pub mod context;
pub mod data_structures;
pub mod error;
pub mod flow;
pub mod introspect;
pub mod normalize;
pub mod pipelines;
pub mod reconcile;
pub mod render;
pub mod resources;
pub mod supervisor;
pub mod viewer;

// Re-exports commonly used types for convenience in downstream code.
pub use capture::{CaptureFormat, CaptureRequest};
pub use config::ViewerConfig;
pub use data_structures::selection::{PanelSelection, SelectionMap};
pub use error::ViewerError;
pub use flow::{ViewerObserver, ViewerProxy, run};
pub use introspect::PanelInfo;

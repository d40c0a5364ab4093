//! Failure taxonomy of the viewer.
//!
//! Internally everything is plumbed through `anyhow`; the variants below are the
//! failures that callers (and the [`Supervisor`](crate::supervisor::Supervisor))
//! distinguish between:
//!
//! - `AssetLoad` is fatal to the viewer and escalates to the supervisor
//! - `TextureLoad` is recovered locally by the texture cache and only logged
//! - `RenderRuntime` is fatal and escalates to the supervisor
//! - `Capture` surfaces as a `None` capture result

/// Errors are `Clone` so that coalesced futures can hand the same failure to every waiter.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ViewerError {
    #[error("failed to load scene {url}: {reason}")]
    AssetLoad { url: String, reason: String },
    #[error("failed to load texture {url}: {reason}")]
    TextureLoad { url: String, reason: String },
    #[error("render pass failed: {0}")]
    RenderRuntime(String),
    #[error("capture failed: {0}")]
    Capture(String),
}

impl ViewerError {
    pub fn asset_load(url: &str, err: &anyhow::Error) -> Self {
        Self::AssetLoad {
            url: url.to_string(),
            reason: format!("{err:#}"),
        }
    }

    pub fn texture_load(url: &str, err: &anyhow::Error) -> Self {
        Self::TextureLoad {
            url: url.to_string(),
            reason: format!("{err:#}"),
        }
    }
}

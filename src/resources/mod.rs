//! Fetching and decoding of everything the viewer loads by URL: scene files,
//! textures and configuration.
//!
//! Every name is first resolved to an absolute URL. Names that are already URLs
//! (`http(s)://`, `file://`, `data:`) are taken as they are; anything else is
//! relative to the asset root, which is a directory on native targets and a path
//! under the page origin on the web. References inside a loaded document are
//! then joined against the document's URL the usual RFC 3986 way.

use std::future::Future;

use anyhow::{Context as _, anyhow, bail};
use base64::Engine as _;
use futures::{FutureExt, future::LocalBoxFuture};

pub mod scene;
pub mod texture;

/// The absolute URL `file_name` refers to.
#[cfg(target_arch = "wasm32")]
pub fn resolve_url(file_name: &str, asset_root: &str) -> anyhow::Result<reqwest::Url> {
    if let Ok(url) = reqwest::Url::parse(file_name) {
        return Ok(url);
    }
    let window = web_sys::window().context("no browser window")?;
    let origin = window
        .location()
        .origin()
        .map_err(|err| anyhow!("no page origin: {err:?}"))?;
    let base = reqwest::Url::parse(&format!("{}/{}/", origin, asset_root.trim_matches('/')))?;
    Ok(base.join(file_name)?)
}

/// The absolute URL `file_name` refers to.
#[cfg(not(target_arch = "wasm32"))]
pub fn resolve_url(file_name: &str, asset_root: &str) -> anyhow::Result<reqwest::Url> {
    // a Windows drive letter parses as a one-letter scheme
    if let Ok(url) = reqwest::Url::parse(file_name)
        && url.scheme().len() > 1
    {
        return Ok(url);
    }
    let path = std::path::Path::new(file_name);
    if path.is_absolute() {
        return reqwest::Url::from_file_path(path)
            .map_err(|()| anyhow!("{file_name} is not a valid file path"));
    }
    let root = std::env::current_dir()
        .context("no working directory")?
        .join(asset_root);
    let base = reqwest::Url::from_directory_path(&root)
        .map_err(|()| anyhow!("{} is not a valid asset root", root.display()))?;
    Ok(base.join(file_name)?)
}

/// The bytes of a `data:` URL. Only base64 payloads are accepted, which is what
/// glTF exporters write.
fn decode_data_url(url: &reqwest::Url) -> anyhow::Result<Vec<u8>> {
    let rest = url.as_str().strip_prefix("data:").context("not a data URL")?;
    let (meta, data) = rest
        .split_once(',')
        .context("invalid data URL: missing comma")?;
    if !meta.split(';').any(|t| t.trim().eq_ignore_ascii_case("base64")) {
        bail!("only base64 data URLs are supported");
    }
    base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|err| anyhow!("invalid base64 in data URL: {err}"))
}

/// Fetch the bytes behind an absolute URL.
pub async fn fetch(url: &reqwest::Url) -> anyhow::Result<Vec<u8>> {
    match url.scheme() {
        "data" => decode_data_url(url),
        #[cfg(not(target_arch = "wasm32"))]
        "file" => {
            let path = url
                .to_file_path()
                .map_err(|()| anyhow!("{url} is not a local path"))?;
            tokio::fs::read(&path)
                .await
                .with_context(|| format!("could not read {}", path.display()))
        }
        _ => Ok(reqwest::get(url.clone())
            .await?
            .error_for_status()?
            .bytes()
            .await?
            .to_vec()),
    }
}

pub async fn load_binary(file_name: &str, asset_root: &str) -> anyhow::Result<Vec<u8>> {
    fetch(&resolve_url(file_name, asset_root)?).await
}

/// Where load futures run.
///
/// On native targets loads are spawned onto the tokio runtime and heavy decoding
/// is moved to its blocking pool; the render thread only polls the join handles.
/// On the web the futures are polled in place.
#[derive(Clone, Debug)]
pub struct Loads {
    asset_root: String,
    #[cfg(not(target_arch = "wasm32"))]
    runtime: tokio::runtime::Handle,
}

impl Loads {
    pub fn new(
        asset_root: impl Into<String>,
        #[cfg(not(target_arch = "wasm32"))] runtime: tokio::runtime::Handle,
    ) -> Self {
        Self {
            asset_root: asset_root.into(),
            #[cfg(not(target_arch = "wasm32"))]
            runtime,
        }
    }

    pub fn asset_root(&self) -> &str {
        &self.asset_root
    }

    /// Fetch `url` and run `decode` on the bytes.
    pub fn fetch_and_decode<T, D>(
        &self,
        url: &str,
        decode: D,
    ) -> LocalBoxFuture<'static, anyhow::Result<T>>
    where
        T: Send + 'static,
        D: FnOnce(Vec<u8>) -> anyhow::Result<T> + Send + 'static,
    {
        let url = url.to_string();
        let asset_root = self.asset_root.clone();

        #[cfg(not(target_arch = "wasm32"))]
        {
            let runtime = self.runtime.clone();
            let task = self.runtime.spawn(async move {
                let bytes = load_binary(&url, &asset_root).await?;
                runtime
                    .spawn_blocking(move || decode(bytes))
                    .await
                    .context("decode task aborted")?
            });
            task.map(|joined| joined.context("load task aborted")?)
                .boxed_local()
        }

        #[cfg(target_arch = "wasm32")]
        {
            async move {
                let bytes = load_binary(&url, &asset_root).await?;
                decode(bytes)
            }
            .boxed_local()
        }
    }

    /// Run an arbitrary load future the same way.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn spawn<F, T>(&self, fut: F) -> LocalBoxFuture<'static, anyhow::Result<T>>
    where
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.runtime
            .spawn(fut)
            .map(|joined| joined.context("load task aborted")?)
            .boxed_local()
    }

    #[cfg(target_arch = "wasm32")]
    pub fn spawn<F, T>(&self, fut: F) -> LocalBoxFuture<'static, anyhow::Result<T>>
    where
        F: Future<Output = anyhow::Result<T>> + 'static,
        T: 'static,
    {
        fut.boxed_local()
    }
}

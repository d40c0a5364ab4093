use std::{cell::OnceCell, path::PathBuf, rc::Rc};

use anyhow::Context as _;
use clap::Parser;
use panel_ngin::{
    CaptureFormat, CaptureRequest, PanelInfo, SelectionMap, ViewerConfig, ViewerError,
    ViewerObserver, ViewerProxy,
};

#[derive(Parser, Debug)]
#[command(name = "viewer")]
#[command(about = "Shows a glTF model and re-textures its panels")]
struct CliArgs {
    /// Model to show, relative to the asset root or an http(s) URL.
    #[arg(long, default_value = "shoe.glb", env = "PANEL_NGIN_MODEL")]
    model: String,

    /// Viewer configuration as JSON.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Initial selection map as JSON.
    #[arg(long)]
    selection: Option<PathBuf>,

    /// Write a snapshot here once everything has loaded, then exit. The extension
    /// picks the format (png, jpg or webp).
    #[arg(long)]
    capture: Option<PathBuf>,
}

struct Cli {
    proxy: Rc<OnceCell<ViewerProxy>>,
    capture: Option<PathBuf>,
    requested: bool,
}

impl ViewerObserver for Cli {
    fn on_panels(&mut self, panels: &[PanelInfo]) {
        for panel in panels {
            println!("{} ({})", panel.name, panel.material);
        }
    }

    fn on_loading(&mut self, loading: bool) {
        if loading || self.requested {
            return;
        }
        let (Some(path), Some(proxy)) = (&self.capture, self.proxy.get()) else {
            return;
        };
        let format = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| CaptureFormat::from_mime(&format!("image/{ext}")))
            .unwrap_or_default();
        self.requested = proxy.capture(CaptureRequest::new(format));
    }

    fn on_capture(&mut self, _request: &CaptureRequest, bytes: Option<Vec<u8>>) {
        let Some(path) = &self.capture else { return };
        match bytes {
            Some(bytes) => match std::fs::write(path, &bytes) {
                Ok(()) => log::info!("Wrote {} bytes to {}", bytes.len(), path.display()),
                Err(err) => log::error!("Cannot write {}: {err}", path.display()),
            },
            None => log::error!("Capture failed"),
        }
        if let Some(proxy) = self.proxy.get() {
            proxy.exit();
        }
    }

    fn on_fault(&mut self, fault: &ViewerError) {
        eprintln!("{fault} (press R to retry)");
    }
}

fn read_json(path: &PathBuf) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))
}

fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    let config = match &args.config {
        Some(path) => ViewerConfig::from_json(&read_json(path)?)?,
        None => ViewerConfig::default(),
    };
    let selection = match &args.selection {
        Some(path) => Some(SelectionMap::from_json(&read_json(path)?)?),
        None => None,
    };

    // no extension means the default format
    let capture = args.capture.map(|mut path| {
        if path.extension().is_none() {
            path.set_extension(CaptureFormat::default().extension());
        }
        path
    });

    let proxy = Rc::new(OnceCell::new());
    let observer = Cli {
        proxy: proxy.clone(),
        capture,
        requested: false,
    };

    panel_ngin::run(config, &args.model, observer, move |handle| {
        if let Some(selection) = selection {
            handle.select(selection);
        }
        let _ = proxy.set(handle);
    })
}

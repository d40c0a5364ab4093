use std::{cell::RefCell, collections::HashMap, rc::Rc};

use futures::{FutureExt, channel::oneshot, future::LocalBoxFuture};
use image::RgbaImage;
use panel_ngin::{
    cache::{LoadingCounter, Settled, TextureCache, TextureLoader, TextureResource},
    capture::{CaptureTarget, RenderSettings},
    data_structures::{
        material::{MapSlot, Material, OriginalMaterials, TextureBinding, UvTransform},
        scene::{MeshPanel, PanelGeometry, SceneAsset},
        selection::SelectionMap,
    },
    reconcile::{ReconcileReport, Reconciler},
};

/// What the scripted loader "uploads": the URL and the payload the test released.
#[derive(Debug, PartialEq)]
pub struct FakeTexture {
    pub url: String,
    pub payload: String,
}

#[derive(Default)]
struct Script {
    waiting: HashMap<String, Vec<oneshot::Sender<anyhow::Result<String>>>>,
    decodes: Vec<String>,
    uploads: usize,
}

/// A texture loader whose decodes only complete when the test says so.
#[derive(Clone, Default)]
pub struct ScriptedLoader(Rc<RefCell<Script>>);

impl ScriptedLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Let every waiting decode of `url` succeed.
    pub fn complete(&self, url: &str) {
        self.finish(url, || Ok(format!("pixels of {url}")));
    }

    /// Let every waiting decode of `url` fail.
    pub fn fail(&self, url: &str) {
        self.finish(url, || Err(anyhow::anyhow!("404 for {url}")));
    }

    fn finish(&self, url: &str, outcome: impl Fn() -> anyhow::Result<String>) {
        let senders = self.0.borrow_mut().waiting.remove(url).unwrap_or_default();
        assert!(!senders.is_empty(), "no decode of {url} is waiting");
        for sender in senders {
            let _ = sender.send(outcome());
        }
    }

    /// How often a decode was started for `url`.
    pub fn decodes_of(&self, url: &str) -> usize {
        self.0.borrow().decodes.iter().filter(|d| *d == url).count()
    }

    pub fn decodes(&self) -> usize {
        self.0.borrow().decodes.len()
    }

    pub fn uploads(&self) -> usize {
        self.0.borrow().uploads
    }
}

impl TextureLoader for ScriptedLoader {
    type Decoded = String;
    type Texture = FakeTexture;

    fn decode(&self, url: &str) -> LocalBoxFuture<'static, anyhow::Result<String>> {
        let (tx, rx) = oneshot::channel();
        let mut script = self.0.borrow_mut();
        script.waiting.entry(url.to_string()).or_default().push(tx);
        script.decodes.push(url.to_string());
        async move {
            match rx.await {
                Ok(outcome) => outcome,
                Err(_) => Err(anyhow::anyhow!("decode abandoned")),
            }
        }
        .boxed_local()
    }

    fn upload(&self, url: &str, decoded: String) -> anyhow::Result<FakeTexture> {
        self.0.borrow_mut().uploads += 1;
        Ok(FakeTexture {
            url: url.to_string(),
            payload: decoded,
        })
    }
}

pub fn ready(url: &str) -> Rc<TextureResource<FakeTexture>> {
    Rc::new(TextureResource::ready(
        url,
        FakeTexture {
            url: url.to_string(),
            payload: "baked".to_string(),
        },
    ))
}

/// A unit quad panel named `name`, optionally with a baked colour map.
pub fn panel(name: &str, color: Option<(&str, UvTransform)>) -> MeshPanel<FakeTexture> {
    let mut material = Material::new(format!("{name}_material"));
    if let Some((url, transform)) = color {
        material.set_map(
            MapSlot::Color,
            Some(TextureBinding::with_transform(ready(url), transform)),
        );
    }
    let geometry = PanelGeometry::from_positions(vec![
        [0.0, 0.0, 0.0],
        [1.0, 0.0, 0.0],
        [1.0, 1.0, 0.0],
        [0.0, 1.0, 0.0],
    ]);
    MeshPanel::new(name, Rc::new(geometry), material)
}

pub fn tiled() -> UvTransform {
    UvTransform {
        offset: [0.25, 0.5],
        repeat: [4.0, 2.0],
        center: [0.5, 0.5],
        rotation: 0.3,
    }
}

/// Scene, cache and reconciler wired the way the viewer wires them.
pub struct Harness {
    pub scene: SceneAsset<FakeTexture>,
    pub originals: OriginalMaterials<FakeTexture>,
    pub cache: TextureCache<ScriptedLoader>,
    pub reconciler: Reconciler,
    pub loader: ScriptedLoader,
    pub counter: LoadingCounter,
}

impl Harness {
    pub fn new(panels: Vec<MeshPanel<FakeTexture>>) -> Self {
        let scene = SceneAsset::new("memory://shoe.glb", panels);
        let mut originals = OriginalMaterials::new();
        for panel in scene.panels() {
            originals.capture(panel.material_rc());
        }
        let loader = ScriptedLoader::new();
        let counter = LoadingCounter::new();
        Self {
            scene,
            originals,
            cache: TextureCache::new(loader.clone(), counter.clone()),
            reconciler: Reconciler::new(),
            loader,
            counter,
        }
    }

    /// Upper, Toe and Quarter; Upper carries a tiled baked colour map.
    pub fn shoe() -> Self {
        Self::new(vec![
            panel("Upper", Some(("baked/upper.png", tiled()))),
            panel("Toe", None),
            panel("Quarter", Some(("baked/quarter.png", UvTransform::default()))),
        ])
    }

    pub fn select(&mut self, selection: &SelectionMap) -> ReconcileReport {
        self.reconciler
            .apply(selection, &mut self.scene, &self.originals, &mut self.cache)
    }

    /// Drain completions into the reconciler, like one viewer frame does.
    pub fn pump(&mut self) -> Vec<Settled> {
        let settled = self.cache.pump();
        self.reconciler
            .settle(&settled, &mut self.scene, &self.originals, &self.cache);
        settled
    }

    pub fn material(&self, panel: &str) -> &Material<FakeTexture> {
        self.scene.panel(panel).expect("panel exists").material()
    }

    pub fn map_url(&self, panel: &str, slot: MapSlot) -> Option<&str> {
        self.material(panel).applied_url(slot)
    }

    pub fn original(&self, panel: &str) -> &Rc<Material<FakeTexture>> {
        let origin = self.scene.panel(panel).expect("panel exists").origin();
        self.originals.get(origin).expect("original captured")
    }
}

/// A capture target that records what it was asked to do.
pub struct FakeStage {
    pub settings: RenderSettings,
    pub applied: Vec<RenderSettings>,
    pub rendered_at: Vec<(u32, u32)>,
    pub fail_render: bool,
    pub fail_apply_of_width: Option<f64>,
}

impl FakeStage {
    pub fn new(width: u32, height: u32, pixel_density: f64) -> Self {
        Self {
            settings: RenderSettings {
                width: f64::from(width),
                height: f64::from(height),
                pixel_density,
                xr_enabled: true,
            },
            applied: Vec::new(),
            rendered_at: Vec::new(),
            fail_render: false,
            fail_apply_of_width: None,
        }
    }
}

impl CaptureTarget for FakeStage {
    fn settings(&self) -> RenderSettings {
        self.settings
    }

    fn apply_settings(&mut self, settings: RenderSettings) -> anyhow::Result<()> {
        self.applied.push(settings);
        if self.fail_apply_of_width == Some(settings.width) {
            anyhow::bail!("cannot resize to {}", settings.width);
        }
        self.settings = settings;
        Ok(())
    }

    fn render_still(&mut self) -> anyhow::Result<RgbaImage> {
        if self.fail_render {
            anyhow::bail!("render failed");
        }
        let (width, height) = self.settings.physical_size();
        self.rendered_at.push((width, height));
        Ok(RgbaImage::from_pixel(width, height, image::Rgba([200, 40, 40, 255])))
    }
}

//! One mounted viewer: a scene, its textures and the selection shown on it.
//!
//! The [`Viewer`] glues the pieces together on the render thread. Every frame
//! [`Viewer::update`] polls the scene load, drains texture completions into the
//! reconciler and pushes dirty panels to the GPU. Nothing here blocks; all
//! fetching and decoding runs on [`Loads`](crate::resources::Loads).

use std::{
    rc::Rc,
    task::{Context as TaskContext, Poll},
};

use futures::{FutureExt, task::noop_waker_ref};

use crate::{
    baseline::apply_baseline,
    cache::{LoadingCounter, TextureCache, TextureLoader, TextureResource},
    capture::{self, CaptureRequest},
    config::ViewerConfig,
    context::Context,
    data_structures::{
        material::{MapSlot, Material, OriginalMaterials, TextureBinding},
        scene::{MeshPanel, SceneAsset},
        selection::SelectionMap,
        texture::Texture,
    },
    error::ViewerError,
    introspect::{Introspector, PanelInfo},
    normalize::Normalizer,
    reconcile::{ReconcileReport, Reconciler},
    render::{SceneRenderer, Stage, render_frame},
    resources::{
        scene::{AssetLoader, SceneLoad, SceneSource},
        texture::WgpuTextureLoader,
    },
};

enum ViewerState {
    Loading(SceneLoad),
    Ready {
        scene: SceneAsset<Texture>,
        renderer: SceneRenderer,
    },
}

pub struct Viewer {
    config: ViewerConfig,
    cache: TextureCache<WgpuTextureLoader>,
    reconciler: Reconciler,
    introspector: Introspector,
    originals: OriginalMaterials<Texture>,
    selection: SelectionMap,
    state: ViewerState,
    // the scene load holds one count on the loading counter until it settles
    scene_counted: bool,
    mounted_at: instant::Instant,
}

impl Viewer {
    /// Start loading `model_url`. The viewer is usable right away and renders an
    /// empty frame until the scene arrives.
    ///
    /// `assets` outlives the viewer, so a remount reuses a scene that already
    /// loaded and refetches one that failed.
    pub fn mount(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        assets: &AssetLoader,
        config: ViewerConfig,
        model_url: &str,
        selection: SelectionMap,
        counter: LoadingCounter,
    ) -> Self {
        let loader = WgpuTextureLoader::new(device.clone(), queue.clone(), assets.loads().clone());
        counter.begin();
        let load = assets.load(model_url);
        Self {
            config,
            cache: TextureCache::new(loader, counter),
            reconciler: Reconciler::new(),
            introspector: Introspector::new(),
            originals: OriginalMaterials::new(),
            selection,
            state: ViewerState::Loading(load),
            scene_counted: true,
            mounted_at: instant::Instant::now(),
        }
    }

    /// Advance loads and apply whatever completed. Returns the panel list when it
    /// changed.
    ///
    /// A failed scene load or a lost device is returned as an error so that the
    /// surrounding supervisor can fault.
    pub fn update(&mut self, ctx: &Context) -> anyhow::Result<Option<Rc<Vec<PanelInfo>>>> {
        if let Some(reason) = ctx.device_lost() {
            return Err(ViewerError::RenderRuntime(format!("graphics device lost: {reason}")).into());
        }

        let mut panels = None;
        if let ViewerState::Loading(load) = &mut self.state {
            let mut cx = TaskContext::from_waker(noop_waker_ref());
            let source = match load.poll_unpin(&mut cx) {
                Poll::Pending => return Ok(None),
                Poll::Ready(Ok(source)) => source,
                Poll::Ready(Err(err)) => {
                    self.release_scene_count();
                    return Err(err.into());
                }
            };
            let before = self.introspector.panels();
            self.state = self.build(ctx, &source);
            log::info!("Scene ready after {:.2?}", self.mounted_at.elapsed());
            // held until the baseline maps are in flight
            self.release_scene_count();
            let after = self.introspector.panels();
            if !Rc::ptr_eq(&before, &after) {
                panels = Some(after);
            }
        }

        let ViewerState::Ready { scene, renderer } = &mut self.state else {
            return Ok(panels);
        };
        let settled = self.cache.pump();
        if !settled.is_empty() {
            self.reconciler
                .settle(&settled, scene, &self.originals, &self.cache);
            for done in &settled {
                scene.mark_dirty_referencing(&done.url);
            }
        }
        renderer.sync(ctx, scene);
        Ok(panels)
    }

    /// Turn the decoded scene into the live one: normalise it, apply the baseline
    /// look, snapshot the originals and show the current selection.
    fn build(&mut self, ctx: &Context, source: &SceneSource) -> ViewerState {
        let images: Vec<Option<Rc<TextureResource<Texture>>>> = source
            .images
            .iter()
            .map(|image| {
                let image = image.as_ref()?;
                match self.cache.loader().upload(&image.key, image.image.to_rgba8()) {
                    Ok(texture) => Some(Rc::new(TextureResource::ready(image.key.clone(), texture))),
                    Err(err) => {
                        log::warn!("Skipping embedded image {}: {err:#}", image.key);
                        None
                    }
                }
            })
            .collect();

        let panels = source
            .panels
            .iter()
            .map(|panel| {
                let mut material = Material::new(panel.material.name.clone());
                material.base_color = panel.material.base_color;
                material.roughness = panel.material.roughness;
                material.metalness = panel.material.metalness;
                for slot in MapSlot::ALL {
                    let Some(map) = &panel.material.maps[slot.index()] else {
                        continue;
                    };
                    if let Some(Some(resource)) = images.get(map.image) {
                        material.set_map(
                            slot,
                            Some(TextureBinding::with_transform(resource.clone(), map.transform)),
                        );
                    }
                }
                MeshPanel::new(panel.name.clone(), Rc::new(panel.geometry.clone()), material)
            })
            .collect();
        let mut scene = SceneAsset::new(source.url.clone(), panels);

        Normalizer::new(self.config.footprint).normalize(&mut scene);
        apply_baseline(
            &mut scene,
            &self.config.shading,
            &self.config.aux_maps,
            &mut self.cache,
        );
        self.originals.clear();
        for panel in scene.panels() {
            self.originals.capture(panel.material_rc());
        }
        self.introspector.traverse(&scene);
        self.reconciler.reset();
        self.reconciler
            .apply(&self.selection, &mut scene, &self.originals, &mut self.cache);

        let renderer = SceneRenderer::new(ctx, &mut scene);
        log::info!(
            "Scene {} ready with {} panels",
            scene.url(),
            renderer.len()
        );
        ViewerState::Ready { scene, renderer }
    }

    /// Show `selection`. Before the scene is ready the map is only remembered.
    pub fn set_selection(&mut self, selection: SelectionMap) -> Option<ReconcileReport> {
        self.selection = selection;
        let ViewerState::Ready { scene, .. } = &mut self.state else {
            return None;
        };
        Some(
            self.reconciler
                .apply(&self.selection, scene, &self.originals, &mut self.cache),
        )
    }

    pub fn selection(&self) -> &SelectionMap {
        &self.selection
    }

    pub fn render(&self, ctx: &mut Context) -> anyhow::Result<()> {
        let renderer = match &self.state {
            ViewerState::Ready { renderer, .. } => Some(renderer),
            ViewerState::Loading(_) => None,
        };
        match render_frame(ctx, renderer) {
            Ok(()) => Ok(()),
            // Reconfigure the surface if it's lost or outdated
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                let size = ctx.window.inner_size();
                ctx.resize(size.width, size.height);
                Ok(())
            }
            Err(wgpu::SurfaceError::Timeout) => {
                log::warn!("Surface timed out, skipping frame");
                Ok(())
            }
            Err(e) => Err(ViewerError::RenderRuntime(format!("unable to render: {e}")).into()),
        }
    }

    /// Snapshot the current view. `None` if the scene is not ready yet or the
    /// capture failed.
    pub fn capture(&self, ctx: &mut Context, request: &CaptureRequest) -> Option<Vec<u8>> {
        let ViewerState::Ready { renderer, .. } = &self.state else {
            log::warn!("Capture requested before the scene is ready");
            return None;
        };
        let mut stage = Stage { ctx, renderer };
        capture::capture(&mut stage, request)
    }

    fn release_scene_count(&mut self) {
        if std::mem::take(&mut self.scene_counted) {
            self.cache.counter().end();
        }
    }
}

impl Drop for Viewer {
    fn drop(&mut self) {
        self.release_scene_count();
    }
}

//! The viewer shell: window, event loop and the supervised viewer.
//!
//! [`run`] opens a window, mounts a [`Viewer`] under a [`Supervisor`] and drives
//! it until the window closes. The embedding application talks to the running
//! viewer through a [`ViewerProxy`] and hears back through its
//! [`ViewerObserver`].
//!
//! # Lifecycle
//!
//! Each frame:
//! 1. Collect window events (camera input, resize, retry key)
//! 2. `Viewer::update` polls loads and applies completed textures
//! 3. `Viewer::render` draws the frame
//! 4. Loading and fault changes are forwarded to the observer
//!
//! A faulted viewer is replaced by a cleared frame until the user retries, either
//! with the `R` key or through [`ViewerProxy::retry`].

use std::{cell::Cell, cell::RefCell, rc::Rc, sync::Arc};

use anyhow::Context as _;
use winit::{
    application::ApplicationHandler,
    event::{ElementState, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop, EventLoopProxy},
    keyboard::Key,
    window::Window,
};

use crate::{
    cache::LoadingCounter,
    capture::CaptureRequest,
    config::ViewerConfig,
    context::Context,
    data_structures::selection::SelectionMap,
    error::ViewerError,
    introspect::PanelInfo,
    render::render_frame,
    resources::{Loads, scene::AssetLoader},
    supervisor::Supervisor,
    viewer::Viewer,
};

#[cfg(target_arch = "wasm32")]
use wasm_bindgen::prelude::*;

/// Callbacks from the running viewer. All of them run on the event loop thread.
pub trait ViewerObserver {
    /// The panel list of a newly loaded scene, for panel pickers.
    fn on_panels(&mut self, _panels: &[PanelInfo]) {}

    /// Called when loading starts (`true`) and when everything has settled (`false`).
    fn on_loading(&mut self, _loading: bool) {}

    /// The encoded image for `request`, or `None` if the capture failed.
    fn on_capture(&mut self, _request: &CaptureRequest, _bytes: Option<Vec<u8>>) {}

    /// The viewer faulted and shows a cleared frame until it is retried.
    fn on_fault(&mut self, _fault: &ViewerError) {}
}

pub enum ViewerEvent {
    Select(SelectionMap),
    Capture(CaptureRequest),
    Retry,
    Exit,
    #[cfg(target_arch = "wasm32")]
    Initialized(Box<Context>),
    #[cfg(target_arch = "wasm32")]
    ContextFailed(String),
}

impl std::fmt::Debug for ViewerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Select(selection) => f.debug_tuple("Select").field(selection).finish(),
            Self::Capture(request) => f.debug_tuple("Capture").field(request).finish(),
            Self::Retry => f.write_str("Retry"),
            Self::Exit => f.write_str("Exit"),
            #[cfg(target_arch = "wasm32")]
            Self::Initialized(_) => f.write_str("Initialized"),
            #[cfg(target_arch = "wasm32")]
            Self::ContextFailed(err) => f.debug_tuple("ContextFailed").field(err).finish(),
        }
    }
}

/// Handle for driving a running viewer from outside the event loop.
///
/// Every method returns `false` once the event loop has shut down.
#[derive(Clone)]
pub struct ViewerProxy(EventLoopProxy<ViewerEvent>);

impl ViewerProxy {
    /// Show `selection`, replacing the previous map as a whole.
    pub fn select(&self, selection: SelectionMap) -> bool {
        self.send(ViewerEvent::Select(selection))
    }

    /// Snapshot the current view. The result arrives at [`ViewerObserver::on_capture`].
    pub fn capture(&self, request: CaptureRequest) -> bool {
        self.send(ViewerEvent::Capture(request))
    }

    pub fn retry(&self) -> bool {
        self.send(ViewerEvent::Retry)
    }

    pub fn exit(&self) -> bool {
        self.send(ViewerEvent::Exit)
    }

    fn send(&self, event: ViewerEvent) -> bool {
        self.0.send_event(event).is_ok()
    }
}

/// What a retry has to rebuild.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Remount {
    /// A new graphics context, then the viewer on top of it.
    Context,
    /// Only the viewer, on the context it already has.
    Viewer,
    /// A context is still being created; it mounts the viewer when ready.
    Wait,
}

impl Remount {
    fn plan(has_context: bool, device_lost: bool, context_pending: bool) -> Self {
        if context_pending {
            Self::Wait
        } else if !has_context || device_lost {
            Self::Context
        } else {
            Self::Viewer
        }
    }
}

struct App<O: ViewerObserver> {
    #[cfg(not(target_arch = "wasm32"))]
    async_runtime: tokio::runtime::Runtime,
    #[cfg_attr(not(target_arch = "wasm32"), allow(dead_code))]
    proxy: EventLoopProxy<ViewerEvent>,
    config: ViewerConfig,
    model_url: String,
    observer: O,
    // outlives the context so that a failed context can be created again
    window: Option<Arc<Window>>,
    ctx: Option<Context>,
    context_pending: bool,
    viewer: Option<Supervisor<Viewer>>,
    // shared with the supervisor's factory so that a remount sees the latest state
    gpu: Rc<RefCell<Option<(wgpu::Device, wgpu::Queue)>>>,
    assets: Rc<AssetLoader>,
    selection: Rc<RefCell<SelectionMap>>,
    counter: LoadingCounter,
    loading: Rc<Cell<Option<bool>>>,
    fault_reported: bool,
}

impl<O: ViewerObserver> App<O> {
    fn new(
        event_loop: &EventLoop<ViewerEvent>,
        #[cfg(not(target_arch = "wasm32"))] async_runtime: tokio::runtime::Runtime,
        config: ViewerConfig,
        model_url: String,
        observer: O,
    ) -> Self {
        let counter = LoadingCounter::new();
        let loading = Rc::new(Cell::new(None));
        {
            let loading = loading.clone();
            counter.set_listener(move |is_loading| loading.set(Some(is_loading)));
        }
        let assets = Rc::new(AssetLoader::new(Loads::new(
            config.asset_root.clone(),
            #[cfg(not(target_arch = "wasm32"))]
            async_runtime.handle().clone(),
        )));
        Self {
            #[cfg(not(target_arch = "wasm32"))]
            async_runtime,
            proxy: event_loop.create_proxy(),
            config,
            model_url,
            observer,
            window: None,
            ctx: None,
            context_pending: false,
            viewer: None,
            gpu: Rc::new(RefCell::new(None)),
            assets,
            selection: Rc::new(RefCell::new(SelectionMap::new())),
            counter,
            loading,
            fault_reported: false,
        }
    }

    /// Take over a fresh context and (re)mount the viewer on it.
    fn initialized(&mut self, ctx: Context) {
        *self.gpu.borrow_mut() = Some((ctx.device.clone(), ctx.queue.clone()));
        ctx.window.request_redraw();
        self.ctx = Some(ctx);

        if let Some(viewer) = &mut self.viewer {
            viewer.retry();
        } else {
            let gpu = self.gpu.clone();
            let selection = self.selection.clone();
            let counter = self.counter.clone();
            let assets = self.assets.clone();
            let config = self.config.clone();
            let model_url = self.model_url.clone();
            self.viewer = Some(Supervisor::new(move || {
                let gpu = gpu.borrow();
                let (device, queue) = gpu.as_ref().context("no graphics device")?;
                Ok(Viewer::mount(
                    device,
                    queue,
                    &assets,
                    config.clone(),
                    &model_url,
                    selection.borrow().clone(),
                    counter.clone(),
                ))
            }));
        }
        self.fault_reported = false;
        self.report_fault();
    }

    /// Whether the retry key should do anything right now.
    fn is_stuck(&self) -> bool {
        (self.ctx.is_none() && !self.context_pending)
            || self
                .viewer
                .as_ref()
                .is_some_and(|viewer| viewer.fault().is_some())
    }

    fn retry(&mut self) {
        let has_context = self.ctx.is_some();
        let device_lost = self
            .ctx
            .as_ref()
            .is_some_and(|ctx| ctx.device_lost().is_some());
        match Remount::plan(has_context, device_lost, self.context_pending) {
            Remount::Context => {
                let Some(window) = self.window.clone() else {
                    return;
                };
                // a lost device cannot be reused; build everything on a new context
                self.ctx = None;
                self.create_context(window);
            }
            Remount::Viewer => {
                if let Some(viewer) = &mut self.viewer {
                    viewer.retry();
                }
                self.fault_reported = false;
                self.report_fault();
            }
            Remount::Wait => log::debug!("Retry ignored while the context is being created"),
        }
    }

    fn context_failed(&mut self, err: String) {
        log::error!("Cannot create the main context: {err}");
        self.context_pending = false;
        self.observer.on_fault(&ViewerError::RenderRuntime(err));
    }

    fn create_context(&mut self, window: Arc<Window>) {
        self.context_pending = true;

        #[cfg(not(target_arch = "wasm32"))]
        {
            match self
                .async_runtime
                .block_on(Context::new(window, &self.config))
            {
                Ok(ctx) => {
                    self.context_pending = false;
                    self.initialized(ctx);
                }
                Err(err) => self.context_failed(format!("{err:#}")),
            }
        }

        #[cfg(target_arch = "wasm32")]
        {
            let proxy = self.proxy.clone();
            let config = self.config.clone();
            wasm_bindgen_futures::spawn_local(async move {
                let event = match Context::new(window, &config).await {
                    Ok(ctx) => ViewerEvent::Initialized(Box::new(ctx)),
                    Err(err) => ViewerEvent::ContextFailed(format!("{err:#}")),
                };
                if proxy.send_event(event).is_err() {
                    log::error!("Event loop closed before the context was ready");
                }
            });
        }
    }

    fn report_fault(&mut self) {
        if self.fault_reported {
            return;
        }
        if let Some(fault) = self.viewer.as_ref().and_then(Supervisor::fault) {
            self.observer.on_fault(fault);
            self.fault_reported = true;
        }
    }

    fn redraw(&mut self) {
        let Self {
            ctx: Some(ctx),
            viewer: Some(viewer),
            observer,
            ..
        } = self
        else {
            return;
        };

        if let Some(Some(panels)) = viewer.run(|viewer| viewer.update(ctx)) {
            observer.on_panels(&panels);
        }
        if viewer.fault().is_none() {
            viewer.run(|viewer| viewer.render(ctx));
        } else if let Err(err) = render_frame(ctx, None) {
            log::warn!("Unable to clear faulted frame: {err}");
        }
        if let Some(loading) = self.loading.take() {
            self.observer.on_loading(loading);
        }
        self.report_fault();
        if let Some(ctx) = &self.ctx {
            ctx.window.request_redraw();
        }
    }
}

impl<O: ViewerObserver> ApplicationHandler<ViewerEvent> for App<O> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        #[allow(unused_mut)]
        let mut window_attributes = Window::default_attributes().with_title("panel-ngin");

        #[cfg(target_arch = "wasm32")]
        {
            use wasm_bindgen::JsCast;
            use winit::platform::web::WindowAttributesExtWebSys;

            const CANVAS_ID: &str = "canvas";

            let window = wgpu::web_sys::window().unwrap_throw();
            let document = window.document().unwrap_throw();
            let canvas = document.get_element_by_id(CANVAS_ID).unwrap_throw();
            let html_canvas_element = canvas.unchecked_into();
            window_attributes = window_attributes.with_canvas(Some(html_canvas_element));
        }

        match event_loop.create_window(window_attributes) {
            Ok(window) => {
                let window = Arc::new(window);
                self.window = Some(window.clone());
                self.create_context(window);
            }
            Err(err) => {
                log::error!("Cannot create a window: {err}");
                event_loop.exit();
            }
        }
    }

    fn user_event(&mut self, event_loop: &ActiveEventLoop, event: ViewerEvent) {
        log::debug!("{event:?}");
        match event {
            ViewerEvent::Select(selection) => {
                *self.selection.borrow_mut() = selection.clone();
                if let Some(viewer) = &mut self.viewer {
                    viewer.run(|viewer| Ok(viewer.set_selection(selection)));
                }
            }
            ViewerEvent::Capture(request) => {
                let bytes = match (&mut self.ctx, &mut self.viewer) {
                    (Some(ctx), Some(viewer)) => viewer
                        .run(|viewer| Ok(viewer.capture(ctx, &request)))
                        .flatten(),
                    _ => None,
                };
                self.observer.on_capture(&request, bytes);
            }
            ViewerEvent::Retry => self.retry(),
            ViewerEvent::Exit => event_loop.exit(),
            #[cfg(target_arch = "wasm32")]
            ViewerEvent::Initialized(ctx) => {
                let mut ctx = *ctx;
                // Important: Trigger a resize now that we are initialized
                let size = ctx.window.inner_size();
                ctx.resize(size.width, size.height);
                self.context_pending = false;
                self.initialized(ctx);
            }
            #[cfg(target_arch = "wasm32")]
            ViewerEvent::ContextFailed(err) => self.context_failed(err),
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        // these work with or without a context
        match &event {
            WindowEvent::CloseRequested => {
                event_loop.exit();
                return;
            }
            WindowEvent::KeyboardInput { event: key, .. } => {
                let retry_key = matches!(&key.logical_key, Key::Character(c) if c.eq_ignore_ascii_case("r"));
                if key.state == ElementState::Pressed && retry_key && self.is_stuck() {
                    self.retry();
                }
            }
            _ => {}
        }

        let Some(ctx) = &mut self.ctx else { return };

        ctx.camera
            .controller
            .handle_window_events(&mut ctx.camera.camera, &event);

        match event {
            WindowEvent::Resized(size) => ctx.resize(size.width, size.height),
            WindowEvent::RedrawRequested => self.redraw(),
            _ => {}
        }
    }
}

/// Open a window showing `model_url` and run until it is closed.
///
/// `setup` receives the proxy before the loop starts; hand it to whatever drives
/// the selection.
pub fn run<O: ViewerObserver + 'static>(
    config: ViewerConfig,
    model_url: &str,
    observer: O,
    setup: impl FnOnce(ViewerProxy),
) -> anyhow::Result<()> {
    #[cfg(not(target_arch = "wasm32"))]
    {
        if let Err(e) = env_logger::try_init() {
            println!("Warning: Could not initialize logger: {}", e);
        };
    }

    #[cfg(target_arch = "wasm32")]
    {
        console_log::init_with_level(log::Level::Info).unwrap_throw();
    }

    let event_loop: EventLoop<ViewerEvent> = EventLoop::with_user_event().build()?;
    setup(ViewerProxy(event_loop.create_proxy()));

    #[cfg(not(target_arch = "wasm32"))]
    let async_runtime = tokio::runtime::Runtime::new().context("cannot start the async runtime")?;

    let mut app = App::new(
        &event_loop,
        #[cfg(not(target_arch = "wasm32"))]
        async_runtime,
        config,
        model_url.to_string(),
        observer,
    );

    event_loop.run_app(&mut app)?;

    Ok(())
}

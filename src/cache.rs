//! Session-scoped texture cache.
//!
//! Textures are keyed by their source URL. The first [`TextureCache::request`] for
//! a URL registers a pending [`TextureResource`] *before* the decode starts, so any
//! later request for the same URL receives the very same resource instead of
//! starting a second decode. Decodes run as futures that are polled from the
//! render thread through [`TextureCache::pump`]; completions are therefore applied
//! on the same thread that reads the cache.
//!
//! Every decode is balanced on the shared [`LoadingCounter`], whether it resolves,
//! fails or is abandoned by [`TextureCache::dispose`]. Failed URLs are evicted so a
//! later request retries them.

use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    fmt::Debug,
    rc::Rc,
    task::{Context, Poll},
};

use futures::{
    FutureExt, StreamExt,
    future::LocalBoxFuture,
    stream::FuturesUnordered,
    task::noop_waker_ref,
};

use crate::error::ViewerError;

/// Decodes texture sources and turns them into renderer textures.
///
/// `decode` may run anywhere (it is only a future); `upload` is always called on
/// the thread that pumps the cache.
pub trait TextureLoader {
    type Decoded: 'static;
    type Texture;

    fn decode(&self, url: &str) -> LocalBoxFuture<'static, anyhow::Result<Self::Decoded>>;

    fn upload(&self, url: &str, decoded: Self::Decoded) -> anyhow::Result<Self::Texture>;
}

/// Count of loads in flight, shared by everything that starts loads.
///
/// The count never goes below zero. A listener is told about transitions between
/// idle and busy, which is what a loading overlay needs.
#[derive(Clone, Default)]
pub struct LoadingCounter(Rc<CounterState>);

#[derive(Default)]
struct CounterState {
    pending: Cell<usize>,
    listener: RefCell<Option<Box<dyn Fn(bool)>>>,
}

impl LoadingCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the idle/busy listener. It must not touch the counter itself.
    pub fn set_listener(&self, listener: impl Fn(bool) + 'static) {
        *self.0.listener.borrow_mut() = Some(Box::new(listener));
    }

    pub fn begin(&self) {
        let before = self.0.pending.get();
        self.0.pending.set(before + 1);
        if before == 0 {
            self.notify(true);
        }
    }

    pub fn end(&self) {
        let before = self.0.pending.get();
        if before == 0 {
            log::warn!("Loading counter was decremented more often than incremented.");
            return;
        }
        self.0.pending.set(before - 1);
        if before == 1 {
            self.notify(false);
        }
    }

    pub fn pending(&self) -> usize {
        self.0.pending.get()
    }

    pub fn is_loading(&self) -> bool {
        self.pending() > 0
    }

    fn notify(&self, loading: bool) {
        if let Some(listener) = self.0.listener.borrow().as_ref() {
            listener(loading);
        }
    }
}

impl Debug for LoadingCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("LoadingCounter").field(&self.pending()).finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextureStatus {
    Pending,
    Ready,
    Failed,
}

enum ResourceState<T> {
    Pending,
    Ready(Rc<T>),
    Failed,
}

/// A decoded texture shared read-only by every material that uses its URL.
///
/// The UV transform is not part of the resource; it lives on the binding that
/// references it.
pub struct TextureResource<T> {
    url: String,
    state: RefCell<ResourceState<T>>,
}

impl<T> TextureResource<T> {
    pub(crate) fn pending(url: &str) -> Self {
        Self {
            url: url.to_string(),
            state: RefCell::new(ResourceState::Pending),
        }
    }

    /// A resource that is ready from the start, e.g. an image embedded in the scene file.
    pub fn ready(url: impl Into<String>, texture: T) -> Self {
        Self {
            url: url.into(),
            state: RefCell::new(ResourceState::Ready(Rc::new(texture))),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn status(&self) -> TextureStatus {
        match &*self.state.borrow() {
            ResourceState::Pending => TextureStatus::Pending,
            ResourceState::Ready(_) => TextureStatus::Ready,
            ResourceState::Failed => TextureStatus::Failed,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status() == TextureStatus::Ready
    }

    /// The decoded texture once the resource is ready.
    pub fn texture(&self) -> Option<Rc<T>> {
        match &*self.state.borrow() {
            ResourceState::Ready(texture) => Some(texture.clone()),
            _ => None,
        }
    }

    fn resolve(&self, texture: T) {
        *self.state.borrow_mut() = ResourceState::Ready(Rc::new(texture));
    }

    fn fail(&self) {
        *self.state.borrow_mut() = ResourceState::Failed;
    }
}

impl<T> Debug for TextureResource<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextureResource")
            .field("url", &self.url)
            .field("status", &self.status())
            .finish()
    }
}

/// The outcome of one decode, reported by [`TextureCache::pump`].
#[derive(Clone, Debug, PartialEq)]
pub struct Settled {
    pub url: String,
    pub outcome: Result<(), ViewerError>,
}

impl Settled {
    pub fn is_ready(&self) -> bool {
        self.outcome.is_ok()
    }
}

type Decode<T, D> = LocalBoxFuture<'static, (Rc<TextureResource<T>>, anyhow::Result<D>)>;

pub struct TextureCache<L: TextureLoader> {
    loader: L,
    entries: HashMap<String, Rc<TextureResource<L::Texture>>>,
    in_flight: FuturesUnordered<Decode<L::Texture, L::Decoded>>,
    counter: LoadingCounter,
    decodes: usize,
}

impl<L> TextureCache<L>
where
    L: TextureLoader,
    L::Texture: 'static,
{
    pub fn new(loader: L, counter: LoadingCounter) -> Self {
        Self {
            loader,
            entries: HashMap::new(),
            in_flight: FuturesUnordered::new(),
            counter,
            decodes: 0,
        }
    }

    /// Return the resource for `url`, starting a decode if nothing is cached yet.
    ///
    /// Never blocks. A fresh resource is pending; observe it through
    /// [`pump`](Self::pump) or the loading counter.
    pub fn request(&mut self, url: &str) -> Rc<TextureResource<L::Texture>> {
        if let Some(resource) = self.entries.get(url) {
            return resource.clone();
        }

        let resource = Rc::new(TextureResource::pending(url));
        self.entries.insert(url.to_string(), resource.clone());
        self.counter.begin();
        self.decodes += 1;
        log::debug!("Decoding texture {url}");

        let decode = self.loader.decode(url);
        let owner = resource.clone();
        self.in_flight
            .push(async move { (owner, decode.await) }.boxed_local());
        resource
    }

    /// Poll in-flight decodes without blocking and apply every completion.
    pub fn pump(&mut self) -> Vec<Settled> {
        let mut cx = Context::from_waker(noop_waker_ref());
        let mut settled = Vec::new();
        while let Poll::Ready(Some((resource, result))) = self.in_flight.poll_next_unpin(&mut cx) {
            settled.push(self.settle(resource, result));
        }
        settled
    }

    fn settle(
        &mut self,
        resource: Rc<TextureResource<L::Texture>>,
        result: anyhow::Result<L::Decoded>,
    ) -> Settled {
        self.counter.end();
        let url = resource.url().to_string();
        match result.and_then(|decoded| self.loader.upload(&url, decoded)) {
            Ok(texture) => {
                resource.resolve(texture);
                Settled { url, outcome: Ok(()) }
            }
            Err(err) => {
                let err = ViewerError::texture_load(&url, &err);
                log::warn!("{err}");
                resource.fail();
                // Failures are not cached so that a later request retries the URL.
                if self
                    .entries
                    .get(&url)
                    .is_some_and(|entry| Rc::ptr_eq(entry, &resource))
                {
                    self.entries.remove(&url);
                }
                Settled {
                    url,
                    outcome: Err(err),
                }
            }
        }
    }

    pub fn get(&self, url: &str) -> Option<Rc<TextureResource<L::Texture>>> {
        self.entries.get(url).cloned()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.entries.contains_key(url)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Number of decodes started over the cache's lifetime.
    pub fn decodes(&self) -> usize {
        self.decodes
    }

    pub fn counter(&self) -> &LoadingCounter {
        &self.counter
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }

    /// Release every cached resource and abandon in-flight decodes.
    ///
    /// Abandoned decodes are balanced on the counter here. Calling this more than
    /// once is harmless.
    pub fn dispose(&mut self) {
        let (released, abandoned) = self.release();
        if released > 0 || abandoned > 0 {
            log::debug!("Released {released} cached textures, abandoned {abandoned} decodes");
        }
    }
}

impl<L: TextureLoader> TextureCache<L> {
    fn release(&mut self) -> (usize, usize) {
        let abandoned = std::mem::take(&mut self.in_flight).len();
        for _ in 0..abandoned {
            self.counter.end();
        }
        for resource in self.entries.values() {
            if resource.status() == TextureStatus::Pending {
                resource.fail();
            }
        }
        let released = self.entries.len();
        self.entries.clear();
        (released, abandoned)
    }
}

impl<L: TextureLoader> Drop for TextureCache<L> {
    fn drop(&mut self) {
        self.release();
    }
}

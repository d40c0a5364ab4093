//! Fault isolation around the whole viewer stack.
//!
//! The [`Supervisor`] owns its child outright. Every call into the child goes
//! through [`Supervisor::run`], which turns both errors and panics into a
//! [`ViewerError`] fault. A faulted child is dropped on the spot, and
//! [`Supervisor::retry`] builds a brand new one from the factory, so nothing
//! survives a retry.

use std::{
    any::Any,
    panic::{AssertUnwindSafe, catch_unwind},
};

use crate::error::ViewerError;

enum State<C> {
    Running(C),
    Failed(ViewerError),
}

pub struct Supervisor<C> {
    factory: Box<dyn FnMut() -> anyhow::Result<C>>,
    state: State<C>,
    mounts: usize,
}

impl<C> Supervisor<C> {
    /// Build the first child right away.
    pub fn new(factory: impl FnMut() -> anyhow::Result<C> + 'static) -> Self {
        let mut supervisor = Self {
            factory: Box::new(factory),
            state: State::Failed(ViewerError::RenderRuntime("not mounted".to_string())),
            mounts: 0,
        };
        supervisor.mount();
        supervisor
    }

    fn mount(&mut self) {
        self.mounts += 1;
        let factory = &mut self.factory;
        self.state = match catch_unwind(AssertUnwindSafe(|| factory())) {
            Ok(Ok(child)) => State::Running(child),
            Ok(Err(err)) => State::Failed(classify(&err)),
            Err(payload) => State::Failed(from_panic(payload)),
        };
        if let State::Failed(fault) = &self.state {
            log::error!("Mounting the viewer failed: {fault}");
        }
    }

    /// Run `f` against the child. Returns `None` if the child is faulted or
    /// faults during the call.
    pub fn run<R>(&mut self, f: impl FnOnce(&mut C) -> anyhow::Result<R>) -> Option<R> {
        let State::Running(child) = &mut self.state else {
            return None;
        };
        let fault = match catch_unwind(AssertUnwindSafe(|| f(child))) {
            Ok(Ok(value)) => return Some(value),
            Ok(Err(err)) => classify(&err),
            Err(payload) => from_panic(payload),
        };
        self.fail(fault);
        None
    }

    /// Tear the child down and record `fault`, e.g. for a lost GPU device that is
    /// reported outside of [`run`](Self::run).
    pub fn fail(&mut self, fault: ViewerError) {
        log::error!("Viewer faulted: {fault}");
        self.state = State::Failed(fault);
    }

    /// Discard whatever is left and mount a fresh child. Returns `true` if the new
    /// child is running.
    pub fn retry(&mut self) -> bool {
        log::info!("Retrying after fault");
        // the old child must be gone before the factory runs again
        self.state = State::Failed(ViewerError::RenderRuntime("retrying".to_string()));
        self.mount();
        self.fault().is_none()
    }

    pub fn fault(&self) -> Option<&ViewerError> {
        match &self.state {
            State::Failed(fault) => Some(fault),
            State::Running(_) => None,
        }
    }

    pub fn child(&self) -> Option<&C> {
        match &self.state {
            State::Running(child) => Some(child),
            State::Failed(_) => None,
        }
    }

    /// How often a child has been built, including the first time.
    pub fn mounts(&self) -> usize {
        self.mounts
    }
}

/// Scene failures keep their identity; anything else is a runtime fault.
fn classify(err: &anyhow::Error) -> ViewerError {
    match err.downcast_ref::<ViewerError>() {
        Some(fault @ ViewerError::AssetLoad { .. }) | Some(fault @ ViewerError::RenderRuntime(_)) => {
            fault.clone()
        }
        _ => ViewerError::RenderRuntime(format!("{err:#}")),
    }
}

fn from_panic(payload: Box<dyn Any + Send>) -> ViewerError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    ViewerError::RenderRuntime(format!("panic: {message}"))
}

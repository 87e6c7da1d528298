//! Typed event slots for an input stream.
//!
//! `data` is a single-subscriber slot: one stream feeds exactly one processing
//! pipeline, so admission counting and acknowledgement stay one-to-one with
//! fetched bundles. `error` and `close` fan out to every registered handler in
//! registration order.

use crate::runtime::error::{ConfigurationError, StreamError};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

type Handler<A, R> = Arc<dyn Fn(&A) -> R + Send + Sync>;

/// Ordered handlers for one event name.
pub struct HandlerList<A: ?Sized, R = ()> {
    handlers: RwLock<Vec<Handler<A, R>>>,
}

impl<A: ?Sized, R> Default for HandlerList<A, R> {
    fn default() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }
}

impl<A: ?Sized, R> HandlerList<A, R> {
    pub fn push(&self, handler: impl Fn(&A) -> R + Send + Sync + 'static) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(handler));
    }

    /// Invokes every handler in registration order and returns the last
    /// handler's result, or `None` when nothing is registered.
    ///
    /// Handlers run outside the registry lock, so a handler may register more
    /// handlers; those are first called on the next emission.
    pub fn emit(&self, args: &A) -> Option<R> {
        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut last = None;
        for handler in handlers {
            last = Some(handler(args));
        }
        last
    }

    pub fn len(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Event registry of one stream, generic over the data handler it feeds.
pub struct EventBus<D> {
    data: OnceLock<D>,
    error: HandlerList<StreamError>,
    close: HandlerList<()>,
}

impl<D> Default for EventBus<D> {
    fn default() -> Self {
        Self {
            data: OnceLock::new(),
            error: HandlerList::default(),
            close: HandlerList::default(),
        }
    }
}

impl<D> EventBus<D> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds the data handler. A second binding is a configuration error.
    pub fn set_data(&self, handler: D) -> Result<(), ConfigurationError> {
        self.data
            .set(handler)
            .map_err(|_| ConfigurationError::DuplicateDataHandler)
    }

    pub fn data(&self) -> Option<&D> {
        self.data.get()
    }

    pub fn has_data(&self) -> bool {
        self.data.get().is_some()
    }

    pub fn on_error(&self, handler: impl Fn(&StreamError) + Send + Sync + 'static) {
        self.error.push(handler);
    }

    pub fn on_close(&self, handler: impl Fn() + Send + Sync + 'static) {
        self.close.push(move |_: &()| handler());
    }

    pub fn emit_error(&self, error: &StreamError) -> Option<()> {
        self.error.emit(error)
    }

    pub fn emit_close(&self) -> Option<()> {
        self.close.emit(&())
    }

    pub fn error_handlers(&self) -> usize {
        self.error.len()
    }
}

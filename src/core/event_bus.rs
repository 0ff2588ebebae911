//! Deferred event bus for host notifications.
//!
//! Architecture:
//! - emitters (params, nodes) push events onto a shared queue
//! - the process driver drains queued events by type at frame boundaries
//!
//! Parameter edits use this path: a param emits a change event when it is
//! set, and the driver forwards queued changes to the owning plugin before
//! the next frame starts, so edits never reach a plugin mid-render.

use std::any::Any;
use std::sync::{Arc, Mutex};

use log::warn;

/// Maximum events in queue before oldest are evicted
const MAX_QUEUE_SIZE: usize = 4096;

/// Marker trait for events. Events must be Send + Sync + 'static.
pub trait Event: Any + Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any + Send + Sync + 'static> Event for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

type BoxedEvent = Box<dyn Event>;
type Queue = Arc<Mutex<Vec<BoxedEvent>>>;

/// Queue shared by every emitter handed out by the bus.
#[derive(Clone, Default)]
pub struct EventBus {
    queue: Queue,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("queue_len", &self.queue_len())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit<E: Event + Clone>(&self, event: E) {
        push(&self.queue, event);
    }

    /// Take queued events of type E, leaving the others queued in order.
    pub fn take<E: Event + Clone>(&self) -> Vec<E> {
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        let mut taken = Vec::new();
        queue.retain(|ev| match downcast::<E>(ev) {
            Some(e) => {
                taken.push(e.clone());
                false
            }
            None => true,
        });
        taken
    }

    /// Get an emitter handle for nodes and params.
    pub fn emitter(&self) -> EventEmitter {
        EventEmitter {
            queue: Arc::clone(&self.queue),
        }
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

fn push<E: Event>(queue: &Mutex<Vec<BoxedEvent>>, event: E) {
    let mut queue = queue.lock().unwrap_or_else(|e| e.into_inner());
    if queue.len() >= MAX_QUEUE_SIZE {
        let evict_count = queue.len() / 2;
        warn!("EventBus queue full ({} events), evicting oldest {}", queue.len(), evict_count);
        queue.drain(0..evict_count);
    }
    queue.push(Box::new(event));
}

/// Must deref to `dyn Event` before `as_any()`, otherwise the blanket impl
/// for `Box<dyn Event>` answers and the downcast always fails.
fn downcast<E: Event>(event: &BoxedEvent) -> Option<&E> {
    (**event).as_any().downcast_ref::<E>()
}

/// Lightweight emitter handle, cloned into params and nodes.
#[derive(Clone)]
pub struct EventEmitter {
    queue: Queue,
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("queue_len", &self.queue.lock().map(|q| q.len()).unwrap_or(0))
            .finish()
    }
}

impl EventEmitter {
    pub fn emit<E: Event + Clone>(&self, event: E) {
        push(&self.queue, event);
    }
}

/// Optional emitter: a no-op until the owner is attached to a host bus.
#[derive(Clone, Default, Debug)]
pub struct NodeEventEmitter {
    inner: Option<EventEmitter>,
}

impl NodeEventEmitter {
    /// Create a no-op emitter (for nodes not yet inserted in a graph)
    pub fn dummy() -> Self {
        Self { inner: None }
    }

    pub fn from_emitter(emitter: EventEmitter) -> Self {
        Self { inner: Some(emitter) }
    }

    pub fn is_attached(&self) -> bool {
        self.inner.is_some()
    }

    /// Emit event (no-op if dummy)
    pub fn emit<E: Event + Clone>(&self, event: E) {
        if let Some(ref emitter) = self.inner {
            emitter.emit(event);
        }
    }
}

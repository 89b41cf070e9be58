//! Synchronous fan-out of pipeline events to registered handlers.
//!
//! Handlers run on the emitting task in registration order. There is no
//! queueing, so a slow handler slows the pipeline down.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::shared::frame::Frame;

use super::events::{FaceEvent, MetadataEvent};

/// Handle returned by a subscription, used to unsubscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct HandlerList<T> {
    entries: Mutex<Vec<(SubscriptionId, Handler<T>)>>,
}

impl<T> HandlerList<T> {
    fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    fn push(&self, id: SubscriptionId, handler: Handler<T>) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, handler));
    }

    fn remove(&self, id: SubscriptionId) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Invokes every handler with `event`. The list is snapshotted first so
    /// handlers may subscribe or unsubscribe while being called.
    fn emit(&self, kind: &str, event: &T) {
        let snapshot: Vec<Handler<T>> = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();

        for handler in snapshot {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                log::error!("{kind} handler panicked; continuing");
            }
        }
    }
}

/// The three event streams a pipeline publishes.
pub struct EventBus {
    next_id: AtomicU64,
    frames: HandlerList<Frame>,
    metadata: HandlerList<MetadataEvent>,
    faces: HandlerList<FaceEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            frames: HandlerList::new(),
            metadata: HandlerList::new(),
            faces: HandlerList::new(),
        }
    }

    fn next_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn subscribe_frames(&self, handler: impl Fn(&Frame) + Send + Sync + 'static) -> SubscriptionId {
        let id = self.next_id();
        self.frames.push(id, Arc::new(handler));
        id
    }

    pub fn subscribe_metadata(
        &self,
        handler: impl Fn(&MetadataEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = self.next_id();
        self.metadata.push(id, Arc::new(handler));
        id
    }

    pub fn subscribe_faces(&self, handler: impl Fn(&FaceEvent) + Send + Sync + 'static) -> SubscriptionId {
        let id = self.next_id();
        self.faces.push(id, Arc::new(handler));
        id
    }

    /// Removes a handler from whichever stream it was registered on.
    /// Returns `false` if the id is unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.frames.remove(id) || self.metadata.remove(id) || self.faces.remove(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.frames.len() + self.metadata.len() + self.faces.len()
    }

    pub fn emit_frame(&self, frame: &Frame) {
        self.frames.emit("NewFrame", frame);
    }

    pub fn emit_metadata(&self, event: &MetadataEvent) {
        self.metadata.emit("NewMetadata", event);
    }

    pub fn emit_face(&self, event: &FaceEvent) {
        self.faces.emit("FaceDetected", event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::events::MetadataSubject;
    use crate::shared::frame::PixelFormat;

    fn frame() -> Frame {
        Frame::new(vec![0; 3], 1, 1, PixelFormat::Rgb8, 0)
    }

    fn metadata(key: &str) -> MetadataEvent {
        MetadataEvent::new(key, "v", MetadataSubject::Pipeline)
    }

    #[test]
    fn test_handlers_run_in_registration_order() {
        let bus = EventBus::new();
        let calls = Arc::new(Mutex::new(Vec::new()));
        for n in 0..3 {
            let calls = calls.clone();
            bus.subscribe_frames(move |_| calls.lock().unwrap().push(n));
        }

        bus.emit_frame(&frame());
        assert_eq!(*calls.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_streams_are_independent() {
        let bus = EventBus::new();
        let keys = Arc::new(Mutex::new(Vec::new()));
        let sink = keys.clone();
        bus.subscribe_metadata(move |e| sink.lock().unwrap().push(e.key.clone()));

        bus.emit_frame(&frame());
        bus.emit_metadata(&metadata("a"));
        assert_eq!(*keys.lock().unwrap(), vec!["a".to_string()]);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicU64::new(0));
        let counter = count.clone();
        let id = bus.subscribe_metadata(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit_metadata(&metadata("a"));
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.emit_metadata(&metadata("b"));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_panicking_handler_does_not_stop_others() {
        let bus = EventBus::new();
        let reached = Arc::new(AtomicU64::new(0));
        bus.subscribe_frames(|_| panic!("handler failure"));
        let flag = reached.clone();
        bus.subscribe_frames(move |_| {
            flag.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit_frame(&frame());
        bus.emit_frame(&frame());
        assert_eq!(reached.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_handler_may_subscribe_during_emit() {
        let bus = Arc::new(EventBus::new());
        let inner = bus.clone();
        bus.subscribe_frames(move |_| {
            inner.subscribe_frames(|_| {});
        });

        bus.emit_frame(&frame());
        assert_eq!(bus.subscriber_count(), 2);
    }
}

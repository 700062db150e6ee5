use std::sync::Arc;

use taskhub_types::events::TaskUpdated;

/// Something that reacts to task updates. Handlers run inline with the
/// request that emitted the event, so they must not block on I/O.
pub trait TaskUpdatedHandler: Send + Sync {
    fn handle(&self, event: &TaskUpdated);
}

/// In-process event bus: a fixed list of handlers, called in registration order.
#[derive(Clone, Default)]
pub struct EventBus {
    handlers: Vec<Arc<dyn TaskUpdatedHandler>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, handler: Arc<dyn TaskUpdatedHandler>) {
        self.handlers.push(handler);
    }

    pub fn with_handler(mut self, handler: Arc<dyn TaskUpdatedHandler>) -> Self {
        self.subscribe(handler);
        self
    }

    pub fn emit(&self, event: &TaskUpdated) {
        for handler in &self.handlers {
            handler.handle(event);
        }
    }
}

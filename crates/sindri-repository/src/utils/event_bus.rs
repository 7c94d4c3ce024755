/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Event Bus for Sindri domain notifications.
//!
//! This module provides an in-process event bus on a tokio broadcast channel.
//! Events are emitted by the deployment, rollout and auto-assign engines and
//! received by any number of subscribers. Delivery beyond the process is left
//! to whoever subscribes.

use once_cell::sync::OnceCell;
use sindri_models::models::SindriEvent;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Default channel buffer size for events.
pub const DEFAULT_CHANNEL_SIZE: usize = 1000;

/// Global event bus storage.
static EVENT_BUS: OnceCell<Arc<EventBus>> = OnceCell::new();

/// The event bus distributing events to subscribers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SindriEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_SIZE)
    }

    /// Creates a new event bus with a custom channel capacity.
    ///
    /// Subscribers lagging more than `capacity` events behind lose the oldest ones.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Emits an event to the bus.
    ///
    /// This never blocks. Events emitted while nobody subscribes are dropped.
    pub fn emit(&self, event: SindriEvent) {
        let event_type = event.event_type.clone();
        let event_id = event.id;
        match self.sender.send(event) {
            Ok(receivers) => {
                debug!(
                    "Event emitted: {} (id: {}) to {} subscriber(s)",
                    event_type, event_id, receivers
                );
            }
            Err(_) => {
                debug!("No subscribers for event {} (id: {})", event_type, event_id);
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SindriEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Initializes the global event bus.
///
/// # Returns
/// Ok(()) if initialization succeeded, Err if already initialized.
pub fn init_event_bus(capacity: usize) -> Result<(), String> {
    EVENT_BUS
        .set(Arc::new(EventBus::with_capacity(capacity)))
        .map_err(|_| "Event bus already initialized".to_string())
}

/// Gets the global event bus.
///
/// # Returns
/// The event bus, or None if not initialized.
pub fn get_event_bus() -> Option<Arc<EventBus>> {
    EVENT_BUS.get().cloned()
}

/// Subscribes to the global event bus, initializing it with the default
/// capacity on first use.
pub fn subscribe() -> broadcast::Receiver<SindriEvent> {
    EVENT_BUS
        .get_or_init(|| Arc::new(EventBus::new()))
        .subscribe()
}

/// Emits an event to the global event bus.
///
/// This is a convenience function for emitting events without
/// needing to get the bus directly.
pub fn emit(event: SindriEvent) {
    if let Some(bus) = get_event_bus() {
        bus.emit(event);
    } else {
        warn!("Event bus not initialized, event dropped: {}", event.event_type);
    }
}

/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Domain notifications emitted by the repository.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Event Type Constants
// =============================================================================

/// A rollout group was activated or changed status.
pub const EVENT_ROLLOUT_GROUP_ADVANCED: &str = "rollout_group.advanced";
/// A rollout changed status.
pub const EVENT_ROLLOUT_STATUS_CHANGED: &str = "rollout.status_changed";
/// An action was created or its status changed.
pub const EVENT_ACTION_STATUS_CHANGED: &str = "action.status_changed";
/// A target received an action through a filter query binding.
pub const EVENT_TARGET_AUTO_ASSIGNED: &str = "target.auto_assigned";

pub const VALID_EVENT_TYPES: &[&str] = &[
    EVENT_ROLLOUT_GROUP_ADVANCED,
    EVENT_ROLLOUT_STATUS_CHANGED,
    EVENT_ACTION_STATUS_CHANGED,
    EVENT_TARGET_AUTO_ASSIGNED,
];

/// A tenant scoped domain event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SindriEvent {
    /// Unique identifier for this event (idempotency key).
    pub id: Uuid,
    /// Event type (e.g., "action.status_changed").
    pub event_type: String,
    pub tenant: String,
    pub timestamp: DateTime<Utc>,
    /// Event-specific data.
    pub data: serde_json::Value,
}

impl SindriEvent {
    pub fn new(event_type: &str, tenant: &str, at: DateTime<Utc>, data: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.to_string(),
            tenant: tenant.to_string(),
            timestamp: at,
            data,
        }
    }
}

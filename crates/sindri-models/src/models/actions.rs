/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Actions
//!
//! An action is the assignment of one distribution set to one target. The
//! target and the set are fixed at creation; everything else evolves through
//! status reports that are appended to the action's history.
//!
//! ```text
//!              +--> WAIT_FOR_CONFIRMATION --+
//!              |                            v
//!   (assign) --+-------------------------> RUNNING --> FINISHED
//!                                            |   \---> ERROR
//!                                            v
//!                                        CANCELING --> CANCELED
//!                                            \-------> CANCEL_REJECTED (still active)
//! ```

use super::{audit_field, entity_base, single, Entity, EntityKind, FieldValue, MAX_WEIGHT};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionType {
    #[serde(rename = "SOFT")]
    Soft,
    #[default]
    #[serde(rename = "FORCED")]
    Forced,
    #[serde(rename = "TIMEFORCED")]
    TimeForced,
    #[serde(rename = "DOWNLOAD_ONLY")]
    DownloadOnly,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Soft => "SOFT",
            ActionType::Forced => "FORCED",
            ActionType::TimeForced => "TIMEFORCED",
            ActionType::DownloadOnly => "DOWNLOAD_ONLY",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionStatus {
    Created,
    Running,
    Canceling,
    Canceled,
    CancelRejected,
    Finished,
    Error,
    WaitForConfirmation,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Created => "CREATED",
            ActionStatus::Running => "RUNNING",
            ActionStatus::Canceling => "CANCELING",
            ActionStatus::Canceled => "CANCELED",
            ActionStatus::CancelRejected => "CANCEL_REJECTED",
            ActionStatus::Finished => "FINISHED",
            ActionStatus::Error => "ERROR",
            ActionStatus::WaitForConfirmation => "WAIT_FOR_CONFIRMATION",
        }
    }

    /// Statuses that close an action.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ActionStatus::Finished | ActionStatus::Error | ActionStatus::Canceled
        )
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of an action's append-only history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionStatusEntry {
    pub status: ActionStatus,
    pub messages: Vec<String>,
    pub occurred_at: DateTime<Utc>,
}

/// A recurring or one-off window during which installation may happen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceWindow {
    pub start: DateTime<Utc>,
    pub duration_secs: i64,
    pub period_secs: Option<i64>,
}

impl MaintenanceWindow {
    pub fn new(
        start: DateTime<Utc>,
        duration_secs: i64,
        period_secs: Option<i64>,
    ) -> Result<Self, String> {
        if duration_secs <= 0 {
            return Err("Maintenance window duration must be positive".to_string());
        }
        if let Some(period) = period_secs {
            if period < duration_secs {
                return Err(
                    "Maintenance window period cannot be shorter than its duration".to_string(),
                );
            }
        }
        Ok(MaintenanceWindow {
            start,
            duration_secs,
            period_secs,
        })
    }

    /// Start of the latest occurrence at or before `now`.
    pub fn latest_occurrence(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if now < self.start {
            return None;
        }
        match self.period_secs {
            None => Some(self.start),
            Some(period) => {
                let elapsed = (now - self.start).num_seconds();
                Some(self.start + Duration::seconds(elapsed / period * period))
            }
        }
    }

    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.latest_occurrence(now)
            .map(|occurrence| now < occurrence + Duration::seconds(self.duration_secs))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: i64,
    pub tenant: String,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub last_modified_at: DateTime<Utc>,
    pub last_modified_by: String,
    pub target_id: i64,
    pub distribution_set_id: i64,
    pub action_type: ActionType,
    pub forced_time: Option<DateTime<Utc>>,
    pub status: ActionStatus,
    pub active: bool,
    pub weight: Option<u16>,
    pub rollout_id: Option<i64>,
    pub rollout_group_id: Option<i64>,
    pub maintenance_window: Option<MaintenanceWindow>,
    pub initiated_by: String,
    pub history: Vec<ActionStatusEntry>,
}

impl Action {
    /// Weight used for delivery ordering; unset weights rank highest.
    pub fn effective_weight(&self) -> u16 {
        self.weight.unwrap_or(MAX_WEIGHT)
    }

    /// Appends a history entry and moves the action to `status`.
    pub fn record(&mut self, status: ActionStatus, messages: Vec<String>, at: DateTime<Utc>) {
        self.history.push(ActionStatusEntry {
            status,
            messages,
            occurred_at: at,
        });
        self.status = status;
        if status.is_terminal() {
            self.active = false;
        }
    }

    /// Appends a history entry without changing the current status.
    pub fn note(&mut self, status: ActionStatus, messages: Vec<String>, at: DateTime<Utc>) {
        self.history.push(ActionStatusEntry {
            status,
            messages,
            occurred_at: at,
        });
    }

    pub fn is_forced(&self) -> bool {
        self.action_type == ActionType::Forced
    }
}

impl Entity for Action {
    const KIND: EntityKind = EntityKind::Action;
    const FIELDS: &'static [&'static str] = &[
        "id",
        "createdat",
        "createdby",
        "lastmodifiedat",
        "lastmodifiedby",
        "target.id",
        "distributionset.id",
        "status",
        "active",
        "type",
        "weight",
        "rollout.id",
        "rolloutgroup.id",
        "initiatedby",
    ];

    entity_base!();

    fn field(&self, path: &str) -> Option<Vec<FieldValue>> {
        match path {
            "target.id" => single(self.target_id),
            "distributionset.id" => single(self.distribution_set_id),
            "status" => single(self.status.as_str()),
            "active" => single(self.active),
            "type" => single(self.action_type.as_str()),
            "weight" => single(self.weight.map(i64::from)),
            "rollout.id" => single(self.rollout_id),
            "rolloutgroup.id" => single(self.rollout_group_id),
            "initiatedby" => single(self.initiated_by.as_str()),
            _ => audit_field(
                path,
                self.id,
                self.created_at,
                &self.created_by,
                self.last_modified_at,
                &self.last_modified_by,
            ),
        }
    }
}

/// Input for creating an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAction {
    pub target_id: i64,
    pub distribution_set_id: i64,
    pub action_type: ActionType,
    pub forced_time: Option<DateTime<Utc>>,
    pub weight: Option<u16>,
    pub rollout_id: Option<i64>,
    pub rollout_group_id: Option<i64>,
    pub maintenance_window: Option<MaintenanceWindow>,
}

impl NewAction {
    pub fn new(
        target_id: i64,
        distribution_set_id: i64,
        action_type: ActionType,
        forced_time: Option<DateTime<Utc>>,
        weight: Option<u16>,
    ) -> Result<Self, String> {
        if action_type == ActionType::TimeForced && forced_time.is_none() {
            return Err("TIMEFORCED actions require a forced time".to_string());
        }
        if let Some(weight) = weight {
            if weight > MAX_WEIGHT {
                return Err(format!("Weight cannot exceed {}", MAX_WEIGHT));
            }
        }
        Ok(NewAction {
            target_id,
            distribution_set_id,
            action_type,
            forced_time,
            weight,
            rollout_id: None,
            rollout_group_id: None,
            maintenance_window: None,
        })
    }

    /// Builds the unsaved action with its initial history entry.
    pub fn into_action(
        self,
        tenant: &str,
        actor: &str,
        now: DateTime<Utc>,
        status: ActionStatus,
        messages: Vec<String>,
    ) -> Action {
        Action {
            id: 0,
            tenant: tenant.to_string(),
            version: 0,
            created_at: now,
            created_by: actor.to_string(),
            last_modified_at: now,
            last_modified_by: actor.to_string(),
            target_id: self.target_id,
            distribution_set_id: self.distribution_set_id,
            action_type: self.action_type,
            forced_time: self.forced_time,
            status,
            active: true,
            weight: self.weight,
            rollout_id: self.rollout_id,
            rollout_group_id: self.rollout_group_id,
            maintenance_window: self.maintenance_window,
            initiated_by: actor.to_string(),
            history: vec![ActionStatusEntry {
                status,
                messages,
                occurred_at: now,
            }],
        }
    }
}

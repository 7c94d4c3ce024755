/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Rollouts
//!
//! A rollout deploys one distribution set to the targets matching a filter
//! query, split into ordered groups. Each group takes a percentage of the
//! targets that remain after the earlier groups, and advances to the next
//! group once its success condition holds.
//!
//! ## Rollout lifecycle
//!
//! ```text
//! CREATING -> READY -> STARTING -> RUNNING <-> PAUSED
//!    |          ^                    |
//!    v          |                    +-> FINISHED
//! WAITING_FOR_APPROVAL -> APPROVAL_DENIED      (ERROR from STARTING/RUNNING)
//!
//! any -> DELETING -> DELETED
//! ```
//!
//! A dynamic rollout keeps a trailing dynamic group open while it runs. The
//! group takes targets that start matching the filter after creation, and a
//! new dynamic group is opened each time the last one is full.

use super::{
    audit_field, entity_base, single, validate_name, ActionType, Entity, EntityKind, FieldValue,
    MAX_WEIGHT,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RolloutStatus {
    Creating,
    Ready,
    Starting,
    Running,
    Paused,
    Finished,
    Error,
    Deleting,
    Deleted,
    WaitingForApproval,
    ApprovalDenied,
}

impl RolloutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RolloutStatus::Creating => "CREATING",
            RolloutStatus::Ready => "READY",
            RolloutStatus::Starting => "STARTING",
            RolloutStatus::Running => "RUNNING",
            RolloutStatus::Paused => "PAUSED",
            RolloutStatus::Finished => "FINISHED",
            RolloutStatus::Error => "ERROR",
            RolloutStatus::Deleting => "DELETING",
            RolloutStatus::Deleted => "DELETED",
            RolloutStatus::WaitingForApproval => "WAITING_FOR_APPROVAL",
            RolloutStatus::ApprovalDenied => "APPROVAL_DENIED",
        }
    }

    /// Statuses the rollout scheduler has work for.
    pub const SCHEDULED: &'static [RolloutStatus] = &[
        RolloutStatus::Creating,
        RolloutStatus::Ready,
        RolloutStatus::Starting,
        RolloutStatus::Running,
        RolloutStatus::Deleting,
    ];
}

impl fmt::Display for RolloutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RolloutGroupStatus {
    Creating,
    Ready,
    Scheduled,
    Running,
    Finished,
    Error,
}

impl RolloutGroupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RolloutGroupStatus::Creating => "CREATING",
            RolloutGroupStatus::Ready => "READY",
            RolloutGroupStatus::Scheduled => "SCHEDULED",
            RolloutGroupStatus::Running => "RUNNING",
            RolloutGroupStatus::Finished => "FINISHED",
            RolloutGroupStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for RolloutGroupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Percentage of finished actions required before a group counts as successful.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "condition", content = "expression", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SuccessCondition {
    Threshold(f64),
}

impl SuccessCondition {
    /// An empty group is always successful.
    pub fn is_met(&self, finished: u64, total: u64) -> bool {
        match self {
            SuccessCondition::Threshold(threshold) => {
                total == 0 || percentage(finished, total) >= *threshold
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SuccessAction {
    #[serde(rename = "NEXTGROUP")]
    NextGroup,
}

/// Percentage of failed actions at which a group is considered failed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "condition", content = "expression", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCondition {
    Threshold(f64),
}

impl ErrorCondition {
    /// An empty group never fails.
    pub fn is_met(&self, errored: u64, total: u64) -> bool {
        match self {
            ErrorCondition::Threshold(threshold) => {
                total > 0 && percentage(errored, total) >= *threshold
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorAction {
    Pause,
}

fn percentage(part: u64, total: u64) -> f64 {
    part as f64 * 100.0 / total as f64
}

fn validate_threshold(threshold: f64) -> Result<(), String> {
    if !(0.0..=100.0).contains(&threshold) {
        return Err(format!("Threshold {} must be between 0 and 100", threshold));
    }
    Ok(())
}

/// Success and error handling of a rollout group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutGroupConditions {
    pub success_condition: SuccessCondition,
    pub success_action: SuccessAction,
    pub error_condition: Option<ErrorCondition>,
    pub error_action: Option<ErrorAction>,
}

impl Default for RolloutGroupConditions {
    fn default() -> Self {
        Self {
            success_condition: SuccessCondition::Threshold(100.0),
            success_action: SuccessAction::NextGroup,
            error_condition: None,
            error_action: None,
        }
    }
}

impl RolloutGroupConditions {
    pub fn with_success_threshold(mut self, threshold: f64) -> Result<Self, String> {
        validate_threshold(threshold)?;
        self.success_condition = SuccessCondition::Threshold(threshold);
        Ok(self)
    }

    /// Pauses the rollout once `threshold` percent of a group's actions failed.
    pub fn with_error_threshold(mut self, threshold: f64) -> Result<Self, String> {
        validate_threshold(threshold)?;
        self.error_condition = Some(ErrorCondition::Threshold(threshold));
        self.error_action = Some(ErrorAction::Pause);
        Ok(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rollout {
    pub id: i64,
    pub tenant: String,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub last_modified_at: DateTime<Utc>,
    pub last_modified_by: String,
    pub name: String,
    pub description: Option<String>,
    pub target_filter_query: String,
    pub distribution_set_id: i64,
    pub action_type: ActionType,
    pub forced_time: Option<DateTime<Utc>>,
    pub weight: Option<u16>,
    pub start_at: Option<DateTime<Utc>>,
    pub confirmation_required: bool,
    pub status: RolloutStatus,
    pub deleted: bool,
    pub total_targets: u64,
    pub group_conditions: RolloutGroupConditions,
    pub dynamic: bool,
    pub access_context: Option<String>,
    pub approval_decided_by: Option<String>,
    pub approval_remark: Option<String>,
}

impl Entity for Rollout {
    const KIND: EntityKind = EntityKind::Rollout;
    const FIELDS: &'static [&'static str] = &[
        "id",
        "createdat",
        "createdby",
        "lastmodifiedat",
        "lastmodifiedby",
        "name",
        "description",
        "status",
        "distributionset.id",
        "deleted",
        "dynamic",
    ];

    entity_base!();

    fn field(&self, path: &str) -> Option<Vec<FieldValue>> {
        match path {
            "name" => single(self.name.as_str()),
            "description" => single(self.description.clone()),
            "status" => single(self.status.as_str()),
            "distributionset.id" => single(self.distribution_set_id),
            "deleted" => single(self.deleted),
            "dynamic" => single(self.dynamic),
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

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutGroup {
    pub id: i64,
    pub tenant: String,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub last_modified_at: DateTime<Utc>,
    pub last_modified_by: String,
    pub rollout_id: i64,
    pub index: u32,
    pub name: String,
    pub description: Option<String>,
    pub status: RolloutGroupStatus,
    /// Share of the targets left over by earlier groups, in (0, 100].
    pub target_percentage: f64,
    /// Extra filter AND-ed onto the rollout's filter query.
    pub target_filter_query: Option<String>,
    pub conditions: RolloutGroupConditions,
    pub total_targets: u64,
    pub confirmation_required: bool,
    /// Opened while the rollout runs; holds at most [`dynamic_group_capacity`] targets.
    pub dynamic: bool,
}

impl Entity for RolloutGroup {
    const KIND: EntityKind = EntityKind::RolloutGroup;
    const FIELDS: &'static [&'static str] = &[
        "id",
        "createdat",
        "createdby",
        "lastmodifiedat",
        "lastmodifiedby",
        "rollout.id",
        "index",
        "name",
        "description",
        "status",
    ];

    entity_base!();

    fn field(&self, path: &str) -> Option<Vec<FieldValue>> {
        match path {
            "rollout.id" => single(self.rollout_id),
            "index" => single(i64::from(self.index)),
            "name" => single(self.name.as_str()),
            "description" => single(self.description.clone()),
            "status" => single(self.status.as_str()),
            "dynamic" => single(self.dynamic),
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

impl RolloutGroup {
    /// The dynamic group following this one, with the same filter, conditions
    /// and confirmation setting.
    pub fn next_dynamic(
        &self,
        status: RolloutGroupStatus,
        actor: &str,
        now: DateTime<Utc>,
    ) -> RolloutGroup {
        let index = self.index + 1;
        let name = format!("group-{}", index + 1);
        RolloutGroup {
            id: 0,
            tenant: self.tenant.clone(),
            version: 0,
            created_at: now,
            created_by: actor.to_string(),
            last_modified_at: now,
            last_modified_by: actor.to_string(),
            rollout_id: self.rollout_id,
            index,
            description: Some(name.clone()),
            name,
            status,
            target_percentage: 100.0,
            target_filter_query: self.target_filter_query.clone(),
            conditions: self.conditions.clone(),
            total_targets: 0,
            confirmation_required: self.confirmation_required,
            dynamic: true,
        }
    }
}

/// Size of a dynamic group when the last static group was empty.
pub const DEFAULT_DYNAMIC_GROUP_SIZE: u64 = 100;

/// How many targets each dynamic group takes: the size of the last static
/// group, `groups` being in index order.
pub fn dynamic_group_capacity(groups: &[RolloutGroup]) -> u64 {
    let last_static = groups
        .iter()
        .take_while(|g| !g.dynamic)
        .last()
        .map(|g| g.total_targets)
        .unwrap_or(0);
    if last_static == 0 {
        DEFAULT_DYNAMIC_GROUP_SIZE
    } else {
        last_static
    }
}

/// Input for creating a rollout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRollout {
    pub name: String,
    pub description: Option<String>,
    pub target_filter_query: String,
    pub distribution_set_id: i64,
    pub action_type: ActionType,
    pub forced_time: Option<DateTime<Utc>>,
    pub weight: Option<u16>,
    pub start_at: Option<DateTime<Utc>>,
    pub confirmation_required: bool,
    pub group_conditions: RolloutGroupConditions,
    pub dynamic: bool,
}

impl NewRollout {
    pub fn new(
        name: String,
        target_filter_query: String,
        distribution_set_id: i64,
    ) -> Result<Self, String> {
        validate_name("Name", &name, 128)?;
        validate_name("Target filter query", &target_filter_query, 1024)?;
        Ok(NewRollout {
            name,
            description: None,
            target_filter_query,
            distribution_set_id,
            action_type: ActionType::Forced,
            forced_time: None,
            weight: None,
            start_at: None,
            confirmation_required: false,
            group_conditions: RolloutGroupConditions::default(),
            dynamic: false,
        })
    }

    pub fn with_action_type(
        mut self,
        action_type: ActionType,
        forced_time: Option<DateTime<Utc>>,
    ) -> Result<Self, String> {
        if action_type == ActionType::TimeForced && forced_time.is_none() {
            return Err("TIMEFORCED rollouts require a forced time".to_string());
        }
        self.action_type = action_type;
        self.forced_time = forced_time;
        Ok(self)
    }

    pub fn with_weight(mut self, weight: u16) -> Result<Self, String> {
        if weight > MAX_WEIGHT {
            return Err(format!("Weight cannot exceed {}", MAX_WEIGHT));
        }
        self.weight = Some(weight);
        Ok(self)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_start_at(mut self, start_at: DateTime<Utc>) -> Self {
        self.start_at = Some(start_at);
        self
    }

    pub fn with_confirmation_required(mut self, confirmation_required: bool) -> Self {
        self.confirmation_required = confirmation_required;
        self
    }

    pub fn with_group_conditions(mut self, conditions: RolloutGroupConditions) -> Self {
        self.group_conditions = conditions;
        self
    }

    /// Keeps a trailing group open for targets matching after creation.
    pub fn with_dynamic(mut self, dynamic: bool) -> Self {
        self.dynamic = dynamic;
        self
    }

    pub fn into_rollout(self, tenant: &str, actor: &str, now: DateTime<Utc>) -> Rollout {
        Rollout {
            id: 0,
            tenant: tenant.to_string(),
            version: 0,
            created_at: now,
            created_by: actor.to_string(),
            last_modified_at: now,
            last_modified_by: actor.to_string(),
            name: self.name,
            description: self.description,
            target_filter_query: self.target_filter_query,
            distribution_set_id: self.distribution_set_id,
            action_type: self.action_type,
            forced_time: self.forced_time,
            weight: self.weight,
            start_at: self.start_at,
            confirmation_required: self.confirmation_required,
            status: RolloutStatus::Creating,
            deleted: false,
            total_targets: 0,
            group_conditions: self.group_conditions,
            dynamic: self.dynamic,
            access_context: None,
            approval_decided_by: None,
            approval_remark: None,
        }
    }
}

/// Input for one explicitly defined rollout group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRolloutGroup {
    pub name: String,
    pub description: Option<String>,
    pub target_percentage: f64,
    pub target_filter_query: Option<String>,
    /// Falls back to the rollout's default conditions when unset.
    pub conditions: Option<RolloutGroupConditions>,
    pub confirmation_required: Option<bool>,
}

impl NewRolloutGroup {
    pub fn new(name: String, target_percentage: f64) -> Result<Self, String> {
        validate_name("Name", &name, 128)?;
        if !(target_percentage > 0.0 && target_percentage <= 100.0) {
            return Err(format!(
                "Target percentage {} must be greater than 0 and at most 100",
                target_percentage
            ));
        }
        Ok(NewRolloutGroup {
            name,
            description: None,
            target_percentage,
            target_filter_query: None,
            conditions: None,
            confirmation_required: None,
        })
    }

    pub fn with_filter(mut self, query: impl Into<String>) -> Self {
        self.target_filter_query = Some(query.into());
        self
    }

    pub fn with_conditions(mut self, conditions: RolloutGroupConditions) -> Self {
        self.conditions = Some(conditions);
        self
    }

    pub fn with_confirmation_required(mut self, confirmation_required: bool) -> Self {
        self.confirmation_required = Some(confirmation_required);
        self
    }

    pub fn into_group(
        self,
        rollout: &Rollout,
        index: u32,
        actor: &str,
        now: DateTime<Utc>,
    ) -> RolloutGroup {
        RolloutGroup {
            id: 0,
            tenant: rollout.tenant.clone(),
            version: 0,
            created_at: now,
            created_by: actor.to_string(),
            last_modified_at: now,
            last_modified_by: actor.to_string(),
            rollout_id: rollout.id,
            index,
            name: self.name,
            description: self.description,
            status: RolloutGroupStatus::Creating,
            target_percentage: self.target_percentage,
            target_filter_query: self.target_filter_query,
            conditions: self
                .conditions
                .unwrap_or_else(|| rollout.group_conditions.clone()),
            total_targets: 0,
            confirmation_required: self
                .confirmation_required
                .unwrap_or(rollout.confirmation_required),
            dynamic: false,
        }
    }
}

/// How a new rollout is split into groups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GroupDefinition {
    /// `n` groups of equal size.
    Amount(u32),
    /// Groups in the given order.
    Explicit(Vec<NewRolloutGroup>),
}

impl GroupDefinition {
    /// Expands `Amount(n)` into groups where group `i` takes `100 / (n - i)`
    /// percent of the remaining targets.
    pub fn into_groups(self) -> Result<Vec<NewRolloutGroup>, String> {
        match self {
            GroupDefinition::Explicit(groups) => Ok(groups),
            GroupDefinition::Amount(0) => Err("A rollout needs at least one group".to_string()),
            GroupDefinition::Amount(n) => (0..n)
                .map(|i| {
                    NewRolloutGroup::new(format!("group-{}", i + 1), 100.0 / f64::from(n - i))
                })
                .collect(),
        }
    }
}

/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Deployment management
//!
//! Assigns distribution sets to targets and drives the resulting actions
//! through their lifecycle:
//!
//! ```text
//! RUNNING | WAIT_FOR_CONFIRMATION ──► FINISHED | ERROR
//!            │
//!            └─► CANCELING ──► CANCELED | CANCEL_REJECTED
//! ```
//!
//! Every action is bound to one target and every mutation of an action needs
//! UPDATE on that target. Unless multi-assignment is enabled a target holds at
//! most one active action per distribution set, and a new assignment softly
//! cancels the target's other active actions.

use crate::acm::Operation;
use crate::context::CallerContext;
use crate::dal::DAL;
use crate::errors::{RepositoryError, Result};
use crate::metrics;
use crate::ql::{parse_for, Predicate};
use crate::store::{Page, Pageable};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sindri_models::models::events::EVENT_ACTION_STATUS_CHANGED;
use sindri_models::models::{
    Action, ActionStatus, ActionType, DistributionSet, Entity, EntityKind, MaintenanceWindow, NewAction,
    Target, TargetUpdateStatus,
};
use sindri_utils::logging::prelude::*;
use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancelMode {
    /// Ask the controller to stop; the action waits in CANCELING.
    Soft,
    /// Close the action immediately.
    Force,
}

/// How an assignment is carried out.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AssignmentOptions {
    pub action_type: ActionType,
    pub forced_time: Option<DateTime<Utc>>,
    pub weight: Option<u16>,
    pub confirmation_required: bool,
    pub maintenance_window: Option<MaintenanceWindow>,
}

impl AssignmentOptions {
    pub fn new(action_type: ActionType) -> Self {
        AssignmentOptions {
            action_type,
            ..Default::default()
        }
    }

    pub fn with_forced_time(mut self, forced_time: DateTime<Utc>) -> Self {
        self.forced_time = Some(forced_time);
        self
    }

    pub fn with_weight(mut self, weight: u16) -> Self {
        self.weight = Some(weight);
        self
    }

    pub fn with_confirmation_required(mut self, confirmation_required: bool) -> Self {
        self.confirmation_required = confirmation_required;
        self
    }

    pub fn with_maintenance_window(mut self, window: MaintenanceWindow) -> Self {
        self.maintenance_window = Some(window);
        self
    }
}

/// Who asked for an assignment; recorded on the action and in metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AssignmentOrigin {
    Manual,
    Rollout { rollout_id: i64, group_id: i64 },
    AutoAssign { query_id: i64 },
}

impl AssignmentOrigin {
    fn as_str(&self) -> &'static str {
        match self {
            AssignmentOrigin::Manual => "manual",
            AssignmentOrigin::Rollout { .. } => "rollout",
            AssignmentOrigin::AutoAssign { .. } => "auto_assign",
        }
    }
}

/// Outcome of a bulk assignment.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AssignmentResult {
    pub assigned: usize,
    /// Targets already holding an active action for the set.
    pub already_assigned: usize,
    /// Targets that are missing, not updatable by the caller or incompatible.
    pub skipped: usize,
    pub actions: Vec<Action>,
}

pub struct DeploymentManagement<'a> {
    pub dal: &'a DAL,
    pub ctx: &'a CallerContext,
}

impl<'a> DeploymentManagement<'a> {
    /// Assigns a distribution set to many targets.
    ///
    /// Targets the caller cannot update and targets of an incompatible type
    /// are skipped rather than failing the call.
    ///
    /// # Arguments
    ///
    /// * `target_ids` - Ids of the targets; duplicates are ignored.
    /// * `ds_id` - The distribution set to assign. Must be READ-visible and assignable.
    /// * `options` - Action type, weight and confirmation settings.
    pub fn assign(
        &self,
        target_ids: &[i64],
        ds_id: i64,
        options: &AssignmentOptions,
    ) -> Result<AssignmentResult> {
        self.assign_with_origin(target_ids, ds_id, options, AssignmentOrigin::Manual)
    }

    pub(crate) fn assign_with_origin(
        &self,
        target_ids: &[i64],
        ds_id: i64,
        options: &AssignmentOptions,
        origin: AssignmentOrigin,
    ) -> Result<AssignmentResult> {
        let set = self.assignable_set(ds_id)?;
        let mut ids = target_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();

        let targets = self.dal.acm.targets.find_all(
            self.ctx,
            Operation::Update,
            Predicate::in_values("id", ids.iter().copied()),
        )?;
        let mut result = AssignmentResult {
            skipped: ids.len() - targets.len(),
            ..Default::default()
        };

        let mut compatibility = HashMap::new();
        for target in targets {
            if !self.is_compatible(&target, &set, &mut compatibility)? {
                debug!(
                    "Skipping target {}: type incompatible with distribution set {}",
                    target.controller_id, set.id
                );
                result.skipped += 1;
                continue;
            }
            match self.create_assignment(target, &set, options, origin)? {
                Some(action) => {
                    result.assigned += 1;
                    result.actions.push(action);
                }
                None => result.already_assigned += 1,
            }
        }

        if result.assigned > 0 {
            self.lock_modules(&set)?;
        }
        metrics::record_actions_created(origin.as_str(), result.assigned);
        info!(
            "Assigned distribution set {} to {} target(s) ({} already assigned, {} skipped)",
            set.id, result.assigned, result.already_assigned, result.skipped
        );
        Ok(result)
    }

    /// Assigns a distribution set to a single target.
    ///
    /// Unlike [`assign`](Self::assign) every obstacle is an error: `NotFound`
    /// for an invisible target, `InsufficientPermission` for a target the
    /// caller cannot update, `Conflict` for an incompatible type or an
    /// existing active assignment of the set.
    pub fn assign_target(
        &self,
        target_id: i64,
        ds_id: i64,
        options: &AssignmentOptions,
    ) -> Result<Action> {
        let set = self.assignable_set(ds_id)?;
        let target = self
            .dal
            .acm
            .targets
            .get_for(self.ctx, Operation::Update, target_id)?;
        if !self.is_compatible(&target, &set, &mut HashMap::new())? {
            return Err(RepositoryError::Conflict(format!(
                "Target {} cannot receive distribution sets of type {}",
                target.controller_id, set.ds_type_id
            )));
        }
        let controller_id = target.controller_id.clone();
        match self.create_assignment(target, &set, options, AssignmentOrigin::Manual)? {
            Some(action) => {
                self.lock_modules(&set)?;
                metrics::record_actions_created(AssignmentOrigin::Manual.as_str(), 1);
                Ok(action)
            }
            None => Err(RepositoryError::Conflict(format!(
                "Distribution set {} is already assigned to target {}",
                set.id, controller_id
            ))),
        }
    }

    /// Cancels an action.
    ///
    /// Repeating a cancellation returns the action unchanged; closed actions
    /// cannot be cancelled.
    pub fn cancel(&self, action_id: i64, mode: CancelMode) -> Result<Action> {
        let mut action = self.action_for(Operation::Update, action_id)?;
        match action.status {
            ActionStatus::Canceled => return Ok(action),
            ActionStatus::Canceling if mode == CancelMode::Soft => return Ok(action),
            ActionStatus::Finished | ActionStatus::Error => {
                return Err(RepositoryError::InvalidState(format!(
                    "Action {} is already closed with status {}",
                    action_id, action.status
                )))
            }
            _ => {}
        }

        let now = self.dal.now();
        match mode {
            CancelMode::Soft => action.record(
                ActionStatus::Canceling,
                vec![format!("Cancellation requested by {}", self.ctx.principal())],
                now,
            ),
            CancelMode::Force => action.record(
                ActionStatus::Canceled,
                vec![format!("Cancellation forced by {}", self.ctx.principal())],
                now,
            ),
        }
        let action = self.save_action(action, now)?;
        if !action.active {
            self.settle_target(&action, now)?;
        }
        info!("Action {} moved to {}", action.id, action.status);
        Ok(action)
    }

    /// Turns a soft or time forced action into a forced one.
    pub fn force_action(&self, action_id: i64) -> Result<Action> {
        let mut action = self.action_for(Operation::Update, action_id)?;
        if !action.active {
            return Err(RepositoryError::InvalidState(format!(
                "Action {} is closed",
                action_id
            )));
        }
        if action.is_forced() {
            return Ok(action);
        }
        action.action_type = ActionType::Forced;
        let now = self.dal.now();
        action.touch(self.ctx.principal(), now);
        self.dal.store.actions.save(action)
    }

    /// Applies controller feedback to an action.
    pub fn add_status(
        &self,
        action_id: i64,
        status: ActionStatus,
        messages: Vec<String>,
    ) -> Result<Action> {
        if matches!(
            status,
            ActionStatus::Created | ActionStatus::Canceling | ActionStatus::WaitForConfirmation
        ) {
            return Err(RepositoryError::Validation(format!(
                "Status {} cannot be reported for an action",
                status
            )));
        }
        let mut action = self.action_for(Operation::Update, action_id)?;
        if !action.active {
            if action.status == status {
                return Ok(action);
            }
            return Err(RepositoryError::InvalidState(format!(
                "Action {} is closed with status {}",
                action_id, action.status
            )));
        }

        let now = self.dal.now();
        match status {
            ActionStatus::Canceled | ActionStatus::CancelRejected => {
                if action.status != ActionStatus::Canceling {
                    return Err(RepositoryError::InvalidState(format!(
                        "Action {} is not being canceled",
                        action_id
                    )));
                }
                action.record(status, messages, now);
            }
            ActionStatus::Running if action.status == ActionStatus::Canceling => {
                action.note(status, messages, now);
            }
            ActionStatus::Running if action.status == ActionStatus::WaitForConfirmation => {
                return Err(RepositoryError::InvalidState(format!(
                    "Action {} awaits confirmation",
                    action_id
                )));
            }
            _ => action.record(status, messages, now),
        }

        let action = self.save_action(action, now)?;
        if !action.active {
            self.settle_target(&action, now)?;
        }
        debug!("Action {} reported {}", action.id, status);
        Ok(action)
    }

    /// Confirms an action waiting for confirmation; it starts RUNNING.
    pub fn confirm_action(&self, action_id: i64, messages: Vec<String>) -> Result<Action> {
        let mut action = self.waiting_action(action_id)?;
        let now = self.dal.now();
        let mut entry = vec![format!("Confirmed by {}", self.ctx.principal())];
        entry.extend(messages);
        action.record(ActionStatus::Running, entry, now);
        self.save_action(action, now)
    }

    /// Records a denial; the action keeps waiting for confirmation.
    pub fn deny_action(&self, action_id: i64, messages: Vec<String>) -> Result<Action> {
        let mut action = self.waiting_action(action_id)?;
        let now = self.dal.now();
        let mut entry = vec![format!("Denied by {}", self.ctx.principal())];
        entry.extend(messages);
        action.note(ActionStatus::WaitForConfirmation, entry, now);
        action.touch(self.ctx.principal(), now);
        self.dal.store.actions.save(action)
    }

    pub fn find_action(&self, action_id: i64) -> Result<Action> {
        self.action_for(Operation::Read, action_id)
    }

    pub fn find_actions(&self, query: Option<&str>, page: &Pageable) -> Result<Page<Action>> {
        let predicate = match query {
            Some(q) => parse_for::<Action>(q)?,
            None => Predicate::True,
        };
        self.dal
            .acm
            .actions
            .find(self.ctx, Operation::Read, predicate, page)
    }

    pub fn find_actions_by_target(&self, target_id: i64, page: &Pageable) -> Result<Page<Action>> {
        self.visible_target(target_id)?;
        self.dal.store.actions.find(
            self.ctx.tenant(),
            &Predicate::equals("target.id", target_id),
            page,
        )
    }

    pub fn find_active_actions_by_target(&self, target_id: i64) -> Result<Vec<Action>> {
        self.visible_target(target_id)?;
        self.active_actions(target_id)
    }

    /// Active actions in delivery order: weight descending, then id ascending.
    pub fn find_active_actions_with_highest_weight(
        &self,
        target_id: i64,
        max: usize,
    ) -> Result<Vec<Action>> {
        let mut actions = self.find_active_actions_by_target(target_id)?;
        actions.sort_by_key(|a| (Reverse(a.effective_weight()), a.id));
        actions.truncate(max);
        Ok(actions)
    }

    pub fn count_actions_by_target(&self, target_id: i64) -> Result<usize> {
        self.visible_target(target_id)?;
        self.dal
            .store
            .actions
            .count(self.ctx.tenant(), &Predicate::equals("target.id", target_id))
    }

    pub fn find_actions_by_rollout_group(
        &self,
        group_id: i64,
        page: &Pageable,
    ) -> Result<Page<Action>> {
        self.dal.acm.actions.find(
            self.ctx,
            Operation::Read,
            Predicate::equals("rolloutgroup.id", group_id),
            page,
        )
    }

    /// Whether installation may happen now; actions without a window always may.
    pub fn is_in_maintenance_window(&self, action_id: i64) -> Result<bool> {
        let action = self.action_for(Operation::Read, action_id)?;
        Ok(action
            .maintenance_window
            .map(|window| window.is_open(self.dal.now()))
            .unwrap_or(true))
    }

    fn action_for(&self, op: Operation, action_id: i64) -> Result<Action> {
        self.dal.acm.actions.get_for(self.ctx, op, action_id)
    }

    fn waiting_action(&self, action_id: i64) -> Result<Action> {
        let action = self.action_for(Operation::Update, action_id)?;
        if action.status != ActionStatus::WaitForConfirmation {
            return Err(RepositoryError::InvalidState(format!(
                "Action {} is not waiting for confirmation (status {})",
                action_id, action.status
            )));
        }
        Ok(action)
    }

    fn visible_target(&self, target_id: i64) -> Result<Target> {
        self.dal
            .acm
            .targets
            .get_for(self.ctx, Operation::Read, target_id)
    }

    fn active_actions(&self, target_id: i64) -> Result<Vec<Action>> {
        self.dal.store.actions.find_all(
            self.ctx.tenant(),
            &Predicate::equals("target.id", target_id).and(Predicate::equals("active", true)),
        )
    }

    /// The READ-visible, assignable distribution set `ds_id`.
    pub(crate) fn assignable_set(&self, ds_id: i64) -> Result<DistributionSet> {
        let set = self
            .dal
            .acm
            .distribution_sets
            .get(self.ctx, ds_id)?
            .ok_or_else(|| RepositoryError::not_found(EntityKind::DistributionSet, ds_id))?;
        if let Some(reason) = set.unassignable_reason() {
            return Err(RepositoryError::Conflict(format!(
                "Distribution set {}:{} {}",
                set.name, set.ds_version, reason
            )));
        }
        Ok(set)
    }

    fn is_compatible(
        &self,
        target: &Target,
        set: &DistributionSet,
        cache: &mut HashMap<i64, Option<BTreeSet<i64>>>,
    ) -> Result<bool> {
        let Some(type_id) = target.target_type_id else {
            return Ok(true);
        };
        if !cache.contains_key(&type_id) {
            let compatible = self
                .dal
                .store
                .target_types
                .get(self.ctx.tenant(), type_id)?
                .map(|t| t.compatible_ds_types);
            cache.insert(type_id, compatible);
        }
        Ok(target.accepts(cache.get(&type_id).and_then(|c| c.as_ref()), set.ds_type_id))
    }

    /// Creates the action of one authorized, compatible target.
    ///
    /// Returns `None` when the target already holds an active action for the
    /// set and multi-assignment is disabled.
    fn create_assignment(
        &self,
        mut target: Target,
        set: &DistributionSet,
        options: &AssignmentOptions,
        origin: AssignmentOrigin,
    ) -> Result<Option<Action>> {
        let now = self.dal.now();
        if !self.dal.settings.multi_assignments_enabled {
            let active = self.active_actions(target.id)?;
            if active.iter().any(|a| a.distribution_set_id == set.id) {
                return Ok(None);
            }
            for other in active {
                self.override_action(other, set.id, now)?;
            }
        }

        let mut new_action = NewAction::new(
            target.id,
            set.id,
            options.action_type,
            options.forced_time,
            options.weight,
        )?;
        new_action.maintenance_window = options.maintenance_window.clone();
        let message = match origin {
            AssignmentOrigin::Manual => format!("Assignment initiated by {}", self.ctx.principal()),
            AssignmentOrigin::Rollout {
                rollout_id,
                group_id,
            } => {
                new_action.rollout_id = Some(rollout_id);
                new_action.rollout_group_id = Some(group_id);
                format!("Assigned by rollout {} group {}", rollout_id, group_id)
            }
            AssignmentOrigin::AutoAssign { query_id } => {
                format!("Assigned by auto-assignment of filter query {}", query_id)
            }
        };
        let status = if options.confirmation_required && self.dal.settings.confirmation_flow_enabled
        {
            ActionStatus::WaitForConfirmation
        } else {
            ActionStatus::Running
        };

        let action = new_action.into_action(
            self.ctx.tenant(),
            self.ctx.principal(),
            now,
            status,
            vec![message],
        );
        let action = self.dal.store.actions.insert(action)?;

        target.assigned_distribution_set_id = Some(set.id);
        target.update_status = TargetUpdateStatus::Pending;
        target.touch(self.ctx.principal(), now);
        self.dal.store.targets.save(target)?;

        self.emit_action(&action);
        Ok(Some(action))
    }

    fn override_action(&self, mut action: Action, ds_id: i64, now: DateTime<Utc>) -> Result<()> {
        if action.status == ActionStatus::Canceling {
            return Ok(());
        }
        action.record(
            ActionStatus::Canceling,
            vec![format!(
                "Overridden by assignment of distribution set {}",
                ds_id
            )],
            now,
        );
        self.save_action(action, now)?;
        Ok(())
    }

    fn save_action(&self, mut action: Action, now: DateTime<Utc>) -> Result<Action> {
        action.touch(self.ctx.principal(), now);
        let action = self.dal.store.actions.save(action)?;
        self.emit_action(&action);
        Ok(action)
    }

    /// Brings the target in line with a closed action.
    fn settle_target(&self, action: &Action, now: DateTime<Utc>) -> Result<()> {
        let Some(mut target) = self
            .dal
            .store
            .targets
            .get(self.ctx.tenant(), action.target_id)?
        else {
            return Ok(());
        };
        let mut remaining = self.active_actions(target.id)?;
        remaining.sort_by_key(|a| a.id);

        match action.status {
            ActionStatus::Finished => {
                target.installed_distribution_set_id = Some(action.distribution_set_id);
                target.installed_at = Some(now);
                target.update_status = if remaining.is_empty() {
                    TargetUpdateStatus::InSync
                } else {
                    TargetUpdateStatus::Pending
                };
            }
            ActionStatus::Error => {
                target.update_status = TargetUpdateStatus::Error;
            }
            ActionStatus::Canceled => match remaining.last() {
                Some(latest) => {
                    target.assigned_distribution_set_id = Some(latest.distribution_set_id);
                    target.update_status = TargetUpdateStatus::Pending;
                }
                None => {
                    target.assigned_distribution_set_id = target.installed_distribution_set_id;
                    target.update_status = if target.installed_distribution_set_id.is_some() {
                        TargetUpdateStatus::InSync
                    } else if target.last_controller_request_at.is_some() {
                        TargetUpdateStatus::Registered
                    } else {
                        TargetUpdateStatus::Unknown
                    };
                }
            },
            _ => return Ok(()),
        }
        target.touch(self.ctx.principal(), now);
        self.dal.store.targets.save(target)?;
        Ok(())
    }

    fn lock_modules(&self, set: &DistributionSet) -> Result<()> {
        let now = self.dal.now();
        for module_id in &set.modules {
            if let Some(mut module) = self
                .dal
                .store
                .software_modules
                .get(self.ctx.tenant(), *module_id)?
            {
                if !module.locked {
                    module.locked = true;
                    module.touch(self.ctx.principal(), now);
                    self.dal.store.software_modules.save(module)?;
                }
            }
        }
        Ok(())
    }

    fn emit_action(&self, action: &Action) {
        self.dal.emit(
            EVENT_ACTION_STATUS_CHANGED,
            self.ctx.tenant(),
            json!({
                "action_id": action.id,
                "target_id": action.target_id,
                "distribution_set_id": action.distribution_set_id,
                "rollout_id": action.rollout_id,
                "status": action.status.as_str(),
                "active": action.active,
            }),
        );
    }
}

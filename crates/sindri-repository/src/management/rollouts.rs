/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Rollout management
//!
//! A rollout splits the targets matched by its filter into ordered groups and
//! deploys one distribution set group by group. Creation and the operator
//! commands live here; moving groups forward is the job of the
//! [`RolloutExecutor`](super::RolloutExecutor) driven by the rollout scheduler.
//!
//! A finished rollout can be retried: the retry is a new single-group rollout
//! over the targets whose action failed.
//!
//! Rollouts are guarded by the `*_ROLLOUT` permissions. The targets reached by
//! a rollout are bounded by the UPDATE scope of its creator, whose context is
//! captured at creation.

use crate::acm::Operation;
use crate::context::{permissions, with_context, CallerContext};
use crate::dal::DAL;
use crate::errors::{RepositoryError, Result};
use crate::management::DeploymentManagement;
use crate::ql::{parse_for, Predicate};
use crate::store::{Page, Pageable};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sindri_models::models::events::EVENT_ROLLOUT_STATUS_CHANGED;
use sindri_models::models::{
    Action, ActionStatus, Entity, EntityKind, GroupDefinition, NewRollout, NewRolloutGroup,
    Rollout, RolloutGroup, RolloutGroupStatus, RolloutStatus, Target,
};
use sindri_utils::logging::prelude::*;

/// Action counters of one rollout group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutGroupStats {
    pub total_targets: u64,
    /// Actions still active, whatever their status.
    pub running: u64,
    pub finished: u64,
    pub error: u64,
    pub canceled: u64,
}

impl RolloutGroupStats {
    pub fn from_actions(total_targets: u64, actions: &[Action]) -> Self {
        let mut stats = RolloutGroupStats {
            total_targets,
            ..Default::default()
        };
        for action in actions {
            match action.status {
                ActionStatus::Finished => stats.finished += 1,
                ActionStatus::Error => stats.error += 1,
                ActionStatus::Canceled => stats.canceled += 1,
                _ if action.active => stats.running += 1,
                _ => {}
            }
        }
        stats
    }
}

/// Number of candidates a group with `percentage` takes out of `candidates`.
pub(crate) fn group_share(percentage: f64, candidates: usize) -> usize {
    let share = (percentage / 100.0 * candidates as f64).round() as usize;
    share.min(candidates)
}

pub struct RolloutManagement<'a> {
    pub dal: &'a DAL,
    pub ctx: &'a CallerContext,
}

impl<'a> RolloutManagement<'a> {
    /// Creates a rollout and its groups.
    ///
    /// # Arguments
    ///
    /// * `new_rollout` - Filter, distribution set and action settings.
    /// * `groups` - Either a number of equal groups or explicit group definitions.
    ///
    /// # Returns
    ///
    /// The rollout in READY, or WAITING_FOR_APPROVAL when approval is enabled
    /// and the creator may not approve rollouts.
    ///
    /// A dynamic rollout gets one extra dynamic group after the given ones and
    /// may start without any matching target.
    pub fn create(&self, new_rollout: NewRollout, groups: GroupDefinition) -> Result<Rollout> {
        self.ctx.require_permission(permissions::CREATE_ROLLOUT)?;
        let filter = parse_for::<Target>(&new_rollout.target_filter_query)?;
        let set = self.deployment().assignable_set(new_rollout.distribution_set_id)?;

        let max_groups = self.dal.settings.max_rollout_groups as usize;
        let groups = groups.into_groups()?;
        let group_count = groups.len() + usize::from(new_rollout.dynamic);
        if groups.is_empty() || group_count > max_groups {
            return Err(RepositoryError::Validation(format!(
                "A rollout needs between 1 and {} groups, got {}",
                max_groups, group_count
            )));
        }
        let group_filters = groups
            .iter()
            .map(|g| g.target_filter_query.as_deref().map(parse_for::<Target>).transpose())
            .collect::<Result<Vec<_>>>()?;
        self.ensure_unique_name(&new_rollout.name, None)?;

        let scope = filter.and(self.dal.compatible_targets(self.ctx.tenant(), set.ds_type_id)?);
        let mut candidates =
            self.dal
                .acm
                .targets
                .find_all(self.ctx, Operation::Update, scope)?;
        if candidates.is_empty() && !new_rollout.dynamic {
            return Err(RepositoryError::Validation(
                "Rollout filter matches no updatable compatible target".to_string(),
            ));
        }
        candidates.sort_by_key(|t| t.id);
        let total_targets = candidates.len() as u64;
        if !new_rollout.dynamic {
            check_coverage(&groups, &group_filters, candidates)?;
        }

        let now = self.dal.now();
        let mut rollout = new_rollout.into_rollout(self.ctx.tenant(), self.ctx.principal(), now);
        rollout.access_context = Some(self.ctx.capture()?);
        rollout.total_targets = total_targets;
        let rollout = self.dal.store.rollouts.insert(rollout)?;
        let mut last = None;
        for (index, group) in groups.into_iter().enumerate() {
            let group = group.into_group(&rollout, index as u32, self.ctx.principal(), now);
            last = Some(self.dal.store.rollout_groups.insert(group)?);
        }
        if let (true, Some(last)) = (rollout.dynamic, last) {
            let dynamic = last.next_dynamic(RolloutGroupStatus::Creating, self.ctx.principal(), now);
            self.dal.store.rollout_groups.insert(dynamic)?;
        }
        info!(
            "Created rollout {} ({}) over {} target(s)",
            rollout.name, rollout.id, rollout.total_targets
        );
        self.complete_creation(rollout)
    }

    /// Moves a CREATING rollout and its groups to READY, or to
    /// WAITING_FOR_APPROVAL when an approver is needed.
    pub(crate) fn complete_creation(&self, rollout: Rollout) -> Result<Rollout> {
        let now = self.dal.now();
        for mut group in self.groups_of(rollout.id)? {
            if group.status == RolloutGroupStatus::Creating {
                group.status = RolloutGroupStatus::Ready;
                group.touch(self.ctx.principal(), now);
                self.dal.store.rollout_groups.save(group)?;
            }
        }
        let needs_approval = self.dal.settings.rollout_approval_enabled
            && !self.ctx.has_permission(permissions::APPROVE_ROLLOUT);
        let status = if needs_approval {
            RolloutStatus::WaitingForApproval
        } else {
            RolloutStatus::Ready
        };
        self.transition(rollout, status)
    }

    pub fn start(&self, rollout_id: i64) -> Result<Rollout> {
        self.ctx.require_permission(permissions::HANDLE_ROLLOUT)?;
        let rollout = self.expect_status(rollout_id, RolloutStatus::Ready)?;
        self.transition(rollout, RolloutStatus::Starting)
    }

    pub fn pause(&self, rollout_id: i64) -> Result<Rollout> {
        self.ctx.require_permission(permissions::HANDLE_ROLLOUT)?;
        let rollout = self.expect_status(rollout_id, RolloutStatus::Running)?;
        self.transition(rollout, RolloutStatus::Paused)
    }

    pub fn resume(&self, rollout_id: i64) -> Result<Rollout> {
        self.ctx.require_permission(permissions::HANDLE_ROLLOUT)?;
        let rollout = self.expect_status(rollout_id, RolloutStatus::Paused)?;
        self.transition(rollout, RolloutStatus::Running)
    }

    /// Starts the next scheduled group of a running rollout without waiting for
    /// the success condition of the running ones.
    ///
    /// The group is activated in the rollout's captured context, like a group
    /// started by the scheduler.
    pub fn trigger_next_group(&self, rollout_id: i64) -> Result<Rollout> {
        self.ctx.require_permission(permissions::HANDLE_ROLLOUT)?;
        let rollout = self.expect_status(rollout_id, RolloutStatus::Running)?;
        let groups = self.groups_of(rollout.id)?;
        let Some(next) = groups
            .iter()
            .find(|g| g.status == RolloutGroupStatus::Scheduled)
            .cloned()
        else {
            return Err(RepositoryError::InvalidState(format!(
                "Rollout {} has no group left to trigger",
                rollout.name
            )));
        };
        if !groups.iter().any(|g| g.status == RolloutGroupStatus::Running) {
            return Err(RepositoryError::InvalidState(format!(
                "Rollout {} has no running group",
                rollout.name
            )));
        }

        info!(
            "{} triggers group {} of rollout {}",
            self.ctx.principal(),
            next.name,
            rollout.name
        );
        with_context(&rollout.tenant, rollout.access_context.as_deref(), |ctx| {
            let captured = RolloutManagement { dal: self.dal, ctx };
            self.dal
                .rollout_executor()
                .activate_group(&captured, &rollout, next)
        })?;
        self.load(rollout_id)
    }

    /// Creates a single-group rollout over the targets whose action of the
    /// finished rollout `rollout_id` ended in ERROR.
    pub fn retry(&self, rollout_id: i64) -> Result<Rollout> {
        self.ctx.require_permission(permissions::CREATE_ROLLOUT)?;
        let original = self.load(rollout_id)?;
        if original.status != RolloutStatus::Finished {
            return Err(RepositoryError::Validation(format!(
                "Rollout {} must be finished to be retried, it is {}",
                original.name, original.status
            )));
        }

        let mut failed: Vec<i64> = self
            .dal
            .store
            .actions
            .find_all(
                self.ctx.tenant(),
                &Predicate::equals("rollout.id", rollout_id)
                    .and(Predicate::equals("status", ActionStatus::Error.as_str())),
            )?
            .iter()
            .map(|a| a.target_id)
            .collect();
        failed.sort_unstable();
        failed.dedup();
        if failed.is_empty() {
            return Err(RepositoryError::Validation(format!(
                "Rollout {} has no failed target to retry",
                original.name
            )));
        }

        let ids: Vec<String> = failed.iter().map(i64::to_string).collect();
        let mut retry = NewRollout::new(
            format!("{}_retry", original.name),
            format!("id=in=({})", ids.join(",")),
            original.distribution_set_id,
        )?
        .with_action_type(original.action_type, original.forced_time)?;
        retry.description = original.description.clone();
        retry.start_at = original.start_at;
        self.create(retry, GroupDefinition::Amount(1))
    }

    /// Decides on a rollout waiting for approval.
    pub fn approve(
        &self,
        rollout_id: i64,
        approved: bool,
        remark: Option<String>,
    ) -> Result<Rollout> {
        self.ctx.require_permission(permissions::APPROVE_ROLLOUT)?;
        let mut rollout = self.expect_status(rollout_id, RolloutStatus::WaitingForApproval)?;
        rollout.approval_decided_by = Some(self.ctx.principal().to_string());
        rollout.approval_remark = remark;
        let status = if approved {
            RolloutStatus::Ready
        } else {
            RolloutStatus::ApprovalDenied
        };
        self.transition(rollout, status)
    }

    /// Marks the rollout for deletion; the next scheduler tick completes it.
    ///
    /// Actions already created keep running.
    pub fn delete(&self, rollout_id: i64) -> Result<()> {
        self.ctx.require_permission(permissions::DELETE_ROLLOUT)?;
        let rollout = self.load(rollout_id)?;
        if matches!(
            rollout.status,
            RolloutStatus::Deleting | RolloutStatus::Deleted
        ) {
            return Ok(());
        }
        self.transition(rollout, RolloutStatus::Deleting)?;
        Ok(())
    }

    pub fn update(
        &self,
        rollout_id: i64,
        name: Option<String>,
        description: Option<String>,
    ) -> Result<Rollout> {
        self.ctx.require_permission(permissions::UPDATE_ROLLOUT)?;
        let mut rollout = self.load(rollout_id)?;
        if let Some(name) = name {
            self.ensure_unique_name(&name, Some(rollout_id))?;
            rollout.name = name;
        }
        if description.is_some() {
            rollout.description = description;
        }
        rollout.touch(self.ctx.principal(), self.dal.now());
        self.dal.store.rollouts.save(rollout)
    }

    pub fn get(&self, rollout_id: i64) -> Result<Rollout> {
        self.ctx.require_permission(permissions::READ_ROLLOUT)?;
        self.load(rollout_id)
    }

    /// Rollouts not deleted, optionally narrowed by a rollout query.
    pub fn find_all(&self, query: Option<&str>, page: &Pageable) -> Result<Page<Rollout>> {
        self.ctx.require_permission(permissions::READ_ROLLOUT)?;
        let predicate = match query {
            Some(q) => parse_for::<Rollout>(q)?,
            None => Predicate::True,
        };
        self.dal.store.rollouts.find(
            self.ctx.tenant(),
            &predicate.and(Predicate::equals("deleted", false)),
            page,
        )
    }

    /// Groups of a rollout in index order.
    pub fn get_groups(&self, rollout_id: i64) -> Result<Vec<RolloutGroup>> {
        self.ctx.require_permission(permissions::READ_ROLLOUT)?;
        self.load(rollout_id)?;
        self.groups_of(rollout_id)
    }

    pub fn get_group(&self, group_id: i64) -> Result<RolloutGroup> {
        self.ctx.require_permission(permissions::READ_ROLLOUT)?;
        self.load_group(group_id)
    }

    pub fn group_stats(&self, group_id: i64) -> Result<RolloutGroupStats> {
        self.ctx.require_permission(permissions::READ_ROLLOUT)?;
        let group = self.load_group(group_id)?;
        self.stats_of(&group)
    }

    /// Targets holding an action of the group that the caller can read.
    pub fn find_group_targets(&self, group_id: i64, page: &Pageable) -> Result<Page<Target>> {
        self.ctx.require_permission(permissions::READ_ROLLOUT)?;
        let group = self.load_group(group_id)?;
        let target_ids: Vec<i64> = self
            .group_actions(&group)?
            .iter()
            .map(|a| a.target_id)
            .collect();
        self.dal.acm.targets.find(
            self.ctx,
            Operation::Read,
            Predicate::in_values("id", target_ids),
            page,
        )
    }

    pub(crate) fn deployment(&self) -> DeploymentManagement<'a> {
        DeploymentManagement {
            dal: self.dal,
            ctx: self.ctx,
        }
    }

    pub(crate) fn groups_of(&self, rollout_id: i64) -> Result<Vec<RolloutGroup>> {
        let mut groups = self.dal.store.rollout_groups.find_all(
            self.ctx.tenant(),
            &Predicate::equals("rollout.id", rollout_id),
        )?;
        groups.sort_by_key(|g| g.index);
        Ok(groups)
    }

    pub(crate) fn group_actions(&self, group: &RolloutGroup) -> Result<Vec<Action>> {
        self.dal.store.actions.find_all(
            self.ctx.tenant(),
            &Predicate::equals("rolloutgroup.id", group.id),
        )
    }

    pub(crate) fn stats_of(&self, group: &RolloutGroup) -> Result<RolloutGroupStats> {
        Ok(RolloutGroupStats::from_actions(
            group.total_targets,
            &self.group_actions(group)?,
        ))
    }

    /// Persists a status change and announces it.
    pub(crate) fn transition(&self, mut rollout: Rollout, to: RolloutStatus) -> Result<Rollout> {
        let from = rollout.status;
        rollout.status = to;
        rollout.touch(self.ctx.principal(), self.dal.now());
        let rollout = self.dal.store.rollouts.save(rollout)?;
        info!("Rollout {} ({}) {} -> {}", rollout.name, rollout.id, from, to);
        self.dal.emit(
            EVENT_ROLLOUT_STATUS_CHANGED,
            &rollout.tenant,
            json!({
                "rollout_id": rollout.id,
                "name": rollout.name,
                "from": from.as_str(),
                "to": to.as_str(),
            }),
        );
        Ok(rollout)
    }

    fn load(&self, rollout_id: i64) -> Result<Rollout> {
        self.dal
            .store
            .rollouts
            .get(self.ctx.tenant(), rollout_id)?
            .filter(|r| !r.deleted)
            .ok_or_else(|| RepositoryError::not_found(EntityKind::Rollout, rollout_id))
    }

    fn load_group(&self, group_id: i64) -> Result<RolloutGroup> {
        let group = self
            .dal
            .store
            .rollout_groups
            .get(self.ctx.tenant(), group_id)?
            .ok_or_else(|| RepositoryError::not_found(EntityKind::RolloutGroup, group_id))?;
        self.load(group.rollout_id)?;
        Ok(group)
    }

    fn expect_status(&self, rollout_id: i64, expected: RolloutStatus) -> Result<Rollout> {
        let rollout = self.load(rollout_id)?;
        if rollout.status != expected {
            return Err(RepositoryError::InvalidState(format!(
                "Rollout {} is {}, expected {}",
                rollout.name, rollout.status, expected
            )));
        }
        Ok(rollout)
    }

    fn ensure_unique_name(&self, name: &str, except_id: Option<i64>) -> Result<()> {
        let taken = self
            .dal
            .store
            .rollouts
            .find_all(self.ctx.tenant(), &Predicate::equals("deleted", false))?
            .iter()
            .any(|r| r.name == name && Some(r.id) != except_id);
        if taken {
            return Err(RepositoryError::Conflict(format!(
                "Rollout with name '{}' already exists",
                name
            )));
        }
        Ok(())
    }
}

/// Replays group activation over the counted targets and fails when targets
/// would be left without a group.
fn check_coverage(
    groups: &[NewRolloutGroup],
    group_filters: &[Option<Predicate>],
    candidates: Vec<Target>,
) -> Result<()> {
    let total = candidates.len();
    let mut remaining = candidates;
    for (group, filter) in groups.iter().zip(group_filters) {
        let matching: Vec<i64> = remaining
            .iter()
            .filter(|t| filter.as_ref().map(|f| f.matches(*t)).unwrap_or(true))
            .map(|t| t.id)
            .collect();
        let share = group_share(group.target_percentage, matching.len());
        let taken: Vec<i64> = matching.into_iter().take(share).collect();
        remaining.retain(|t| !taken.contains(&t.id));
    }
    if !remaining.is_empty() {
        return Err(RepositoryError::Validation(format!(
            "Rollout groups leave {} of {} target(s) unassigned",
            remaining.len(),
            total
        )));
    }
    Ok(())
}

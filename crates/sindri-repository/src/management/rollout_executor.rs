/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Advances a single rollout by one step.
//!
//! Every step runs in the context captured when the rollout was created, so
//! groups only ever reach targets the creator could update, even when the
//! scheduler itself runs as the tenant's system context.
//!
//! Dynamic rollouts keep their last group open: each tick tops it up with
//! newly matching targets until it holds [`dynamic_group_capacity`] of them,
//! then opens the next dynamic group behind it.

use crate::acm::Operation;
use crate::context::with_context;
use crate::dal::DAL;
use crate::errors::{RepositoryError, Result};
use crate::management::deployment::{AssignmentOptions, AssignmentOrigin};
use crate::management::rollouts::{group_share, RolloutManagement};
use crate::metrics;
use crate::ql::{parse_for, Predicate};
use serde_json::json;
use sindri_models::models::events::EVENT_ROLLOUT_GROUP_ADVANCED;
use sindri_models::models::{
    dynamic_group_capacity, DistributionSet, Entity, ErrorAction, Rollout, RolloutGroup,
    RolloutGroupStatus, RolloutStatus, Target,
};
use sindri_utils::logging::prelude::*;
use std::collections::BTreeSet;

pub struct RolloutExecutor<'a> {
    pub dal: &'a DAL,
}

impl<'a> RolloutExecutor<'a> {
    /// Runs the handler for the rollout's current status.
    pub fn execute(&self, rollout: &Rollout) -> Result<()> {
        with_context(&rollout.tenant, rollout.access_context.as_deref(), |ctx| {
            let management = RolloutManagement { dal: self.dal, ctx };
            let Some(current) = self.dal.store.rollouts.get(&rollout.tenant, rollout.id)? else {
                return Ok(());
            };
            match current.status {
                RolloutStatus::Creating => {
                    management.complete_creation(current)?;
                }
                RolloutStatus::Ready => {
                    let due = current
                        .start_at
                        .map(|at| at <= self.dal.now())
                        .unwrap_or(false);
                    if due {
                        info!("Auto starting rollout {} ({})", current.name, current.id);
                        let started = management.transition(current, RolloutStatus::Starting)?;
                        self.handle_starting(&management, started)?;
                    }
                }
                RolloutStatus::Starting => self.handle_starting(&management, current)?,
                RolloutStatus::Running => self.handle_running(&management, current)?,
                RolloutStatus::Deleting => self.handle_deleting(&management, current)?,
                other => debug!("Nothing to do for rollout {} in {}", current.id, other),
            }
            Ok(())
        })
    }

    fn handle_starting(&self, management: &RolloutManagement<'_>, rollout: Rollout) -> Result<()> {
        let now = self.dal.now();
        let mut scheduled = Vec::new();
        for mut group in management.groups_of(rollout.id)? {
            if group.status == RolloutGroupStatus::Ready {
                group.status = RolloutGroupStatus::Scheduled;
                group.touch(management.ctx.principal(), now);
                group = self.dal.store.rollout_groups.save(group)?;
                metrics::record_group_transition(RolloutGroupStatus::Scheduled.as_str());
            }
            if group.status == RolloutGroupStatus::Scheduled {
                scheduled.push(group);
            }
        }

        if let Some(first) = scheduled.into_iter().next() {
            if !self.activate_group(management, &rollout, first)? {
                return Ok(());
            }
        }
        management.transition(rollout, RolloutStatus::Running)?;
        Ok(())
    }

    fn handle_running(&self, management: &RolloutManagement<'_>, rollout: Rollout) -> Result<()> {
        if rollout.dynamic && self.fill_dynamic_group(management, &rollout)? {
            return Ok(());
        }

        let now = self.dal.now();
        let groups = management.groups_of(rollout.id)?;
        let capacity = dynamic_group_capacity(&groups);
        let can_grow = groups.len() < self.dal.settings.max_rollout_groups as usize;
        let last_index = groups.last().map(|g| g.index);
        for mut group in groups {
            if group.status != RolloutGroupStatus::Running {
                continue;
            }
            let stats = management.stats_of(&group)?;
            let conditions = group.conditions.clone();
            let total = if group.dynamic {
                capacity.max(group.total_targets)
            } else {
                group.total_targets
            };

            let failed = conditions
                .error_condition
                .map(|c| c.is_met(stats.error, total))
                .unwrap_or(false);
            if failed {
                warn!(
                    "Group {} of rollout {} failed: {} of {} action(s) in error",
                    group.name, rollout.name, stats.error, total
                );
                self.set_group_status(management, &mut group, RolloutGroupStatus::Error, now)?;
                if conditions.error_action == Some(ErrorAction::Pause) {
                    management.transition(rollout, RolloutStatus::Paused)?;
                }
                return Ok(());
            }

            let open_ended = group.dynamic && Some(group.index) == last_index && can_grow;
            if !open_ended && conditions.success_condition.is_met(stats.finished, total) {
                debug!(
                    "Group {} of rollout {} reached its success condition",
                    group.name, rollout.name
                );
                self.set_group_status(management, &mut group, RolloutGroupStatus::Finished, now)?;
            }
        }

        let groups = management.groups_of(rollout.id)?;
        if groups
            .iter()
            .any(|g| g.status == RolloutGroupStatus::Running)
        {
            return Ok(());
        }
        match groups
            .into_iter()
            .find(|g| g.status == RolloutGroupStatus::Scheduled)
        {
            Some(next) => {
                self.activate_group(management, &rollout, next)?;
            }
            None => {
                management.transition(rollout, RolloutStatus::Finished)?;
            }
        }
        Ok(())
    }

    /// Tops up the running last dynamic group, or opens the next one once it
    /// is full. Returns `true` when something changed.
    fn fill_dynamic_group(
        &self,
        management: &RolloutManagement<'_>,
        rollout: &Rollout,
    ) -> Result<bool> {
        let groups = management.groups_of(rollout.id)?;
        let Some(last) = groups.last() else {
            return Ok(false);
        };
        if !last.dynamic || last.status != RolloutGroupStatus::Running {
            return Ok(false);
        }

        let now = self.dal.now();
        let capacity = dynamic_group_capacity(&groups);
        if last.total_targets >= capacity {
            if groups.len() >= self.dal.settings.max_rollout_groups as usize {
                debug!(
                    "Rollout {} reached the group limit, no further dynamic group",
                    rollout.name
                );
                return Ok(false);
            }
            let next = last.next_dynamic(RolloutGroupStatus::Scheduled, management.ctx.principal(), now);
            let next = self.dal.store.rollout_groups.insert(next)?;
            metrics::record_group_transition(RolloutGroupStatus::Scheduled.as_str());
            info!("Opened dynamic group {} of rollout {}", next.name, rollout.name);
            return Ok(true);
        }

        let Some(set) = self.assignable_set(management, rollout)? else {
            return Ok(true);
        };
        let mut group = last.clone();
        let room = (capacity - group.total_targets) as usize;
        let target_ids: Vec<i64> = self
            .candidates(management, rollout, &group, &set)?
            .into_iter()
            .take(room)
            .collect();
        if target_ids.is_empty() {
            return Ok(false);
        }

        let assigned = self.assign(management, rollout, &group, &set, &target_ids)?;
        if assigned == 0 {
            return Ok(false);
        }
        group.total_targets += assigned;
        group.touch(management.ctx.principal(), now);
        let group = self.dal.store.rollout_groups.save(group)?;

        let mut rollout = rollout.clone();
        rollout.total_targets += assigned;
        rollout.touch(management.ctx.principal(), now);
        self.dal.store.rollouts.save(rollout)?;
        info!(
            "Added {} target(s) to dynamic group {} ({} of {})",
            assigned, group.name, group.total_targets, capacity
        );
        Ok(true)
    }

    fn handle_deleting(
        &self,
        management: &RolloutManagement<'_>,
        mut rollout: Rollout,
    ) -> Result<()> {
        rollout.deleted = true;
        management.transition(rollout, RolloutStatus::Deleted)?;
        Ok(())
    }

    /// Assigns the group's share of the remaining candidates and starts the group.
    ///
    /// Returns `false` when the distribution set can no longer be assigned, in
    /// which case the rollout has been moved to ERROR.
    pub(crate) fn activate_group(
        &self,
        management: &RolloutManagement<'_>,
        rollout: &Rollout,
        mut group: RolloutGroup,
    ) -> Result<bool> {
        let Some(set) = self.assignable_set(management, rollout)? else {
            return Ok(false);
        };

        let candidates = self.candidates(management, rollout, &group, &set)?;
        let share = if group.dynamic {
            let capacity = dynamic_group_capacity(&management.groups_of(rollout.id)?);
            candidates.len().min(capacity as usize)
        } else {
            group_share(group.target_percentage, candidates.len())
        };
        let target_ids: Vec<i64> = candidates.into_iter().take(share).collect();

        group.total_targets = self.assign(management, rollout, &group, &set, &target_ids)?;
        self.set_group_status(management, &mut group, RolloutGroupStatus::Running, self.dal.now())?;
        info!(
            "Started group {} of rollout {} with {} target(s)",
            group.name, rollout.name, group.total_targets
        );
        Ok(true)
    }

    /// The rollout's distribution set, or `None` after moving the rollout to
    /// ERROR because the set can no longer be assigned.
    fn assignable_set(
        &self,
        management: &RolloutManagement<'_>,
        rollout: &Rollout,
    ) -> Result<Option<DistributionSet>> {
        match management.deployment().assignable_set(rollout.distribution_set_id) {
            Ok(set) => Ok(Some(set)),
            Err(e @ RepositoryError::Conflict(_)) | Err(e @ RepositoryError::NotFound { .. }) => {
                warn!(
                    "Rollout {} ({}) cannot continue: {}",
                    rollout.name, rollout.id, e
                );
                let current = self
                    .dal
                    .store
                    .rollouts
                    .get(&rollout.tenant, rollout.id)?
                    .unwrap_or_else(|| rollout.clone());
                management.transition(current, RolloutStatus::Error)?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Ids of the updatable targets the group may still take, in id order.
    fn candidates(
        &self,
        management: &RolloutManagement<'_>,
        rollout: &Rollout,
        group: &RolloutGroup,
        set: &DistributionSet,
    ) -> Result<Vec<i64>> {
        let tenant = rollout.tenant.as_str();
        let mut candidates = parse_for::<Target>(&rollout.target_filter_query)?
            .and(self.dal.compatible_targets(tenant, set.ds_type_id)?);
        if let Some(group_query) = &group.target_filter_query {
            candidates = candidates.and(parse_for::<Target>(group_query)?);
        }
        let in_rollout: BTreeSet<i64> = self
            .dal
            .store
            .actions
            .find_all(tenant, &Predicate::equals("rollout.id", rollout.id))?
            .iter()
            .map(|a| a.target_id)
            .collect();
        if !in_rollout.is_empty() {
            candidates = candidates.and(Predicate::not(Predicate::in_values("id", in_rollout)));
        }

        let mut ids: Vec<i64> = self
            .dal
            .acm
            .targets
            .find_all(management.ctx, Operation::Update, candidates)?
            .iter()
            .map(|t| t.id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    fn assign(
        &self,
        management: &RolloutManagement<'_>,
        rollout: &Rollout,
        group: &RolloutGroup,
        set: &DistributionSet,
        target_ids: &[i64],
    ) -> Result<u64> {
        let options = AssignmentOptions {
            action_type: rollout.action_type,
            forced_time: rollout.forced_time,
            weight: rollout.weight,
            confirmation_required: group.confirmation_required,
            maintenance_window: None,
        };
        let result = management.deployment().assign_with_origin(
            target_ids,
            set.id,
            &options,
            AssignmentOrigin::Rollout {
                rollout_id: rollout.id,
                group_id: group.id,
            },
        )?;
        Ok(result.assigned as u64)
    }

    fn set_group_status(
        &self,
        management: &RolloutManagement<'_>,
        group: &mut RolloutGroup,
        status: RolloutGroupStatus,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        group.status = status;
        group.touch(management.ctx.principal(), now);
        *group = self.dal.store.rollout_groups.save(group.clone())?;
        metrics::record_group_transition(status.as_str());
        self.dal.emit(
            EVENT_ROLLOUT_GROUP_ADVANCED,
            &group.tenant,
            json!({
                "rollout_id": group.rollout_id,
                "group_id": group.id,
                "index": group.index,
                "status": status.as_str(),
                "total_targets": group.total_targets,
            }),
        );
        Ok(())
    }
}

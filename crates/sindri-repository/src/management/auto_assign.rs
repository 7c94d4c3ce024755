/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Auto-assignment of distribution sets through target filter query bindings.
//!
//! A binding is evaluated in the context captured when it was set: the bound
//! set must still be visible to that caller and only targets the caller could
//! update are assigned.
//!
//! A target counts as assigned once it holds any action for the bound set,
//! whatever its status. A canceled or overridden assignment is never repeated.

use crate::acm::Operation;
use crate::context::{with_context, CallerContext};
use crate::dal::DAL;
use crate::errors::{RepositoryError, Result};
use crate::management::deployment::{
    AssignmentOptions, AssignmentOrigin, AssignmentResult, DeploymentManagement,
};
use crate::metrics::AUTO_ASSIGNED_TARGETS_TOTAL;
use crate::ql::{parse_for, Predicate};
use crate::store::Pageable;
use serde_json::json;
use sindri_models::models::events::EVENT_TARGET_AUTO_ASSIGNED;
use sindri_models::models::{
    AutoAssignBinding, DistributionSet, EntityKind, Target, TargetFilterQuery, MAX_WEIGHT,
};
use sindri_utils::logging::prelude::*;
use std::cmp::Reverse;
use std::collections::BTreeSet;

pub struct AutoAssignChecker<'a> {
    pub dal: &'a DAL,
}

impl<'a> AutoAssignChecker<'a> {
    /// Assigns the bound set to the next batch of matching targets.
    ///
    /// # Returns
    ///
    /// The number of actions created. Queries without a binding, or whose set
    /// is no longer assignable, create none.
    pub fn check_query(&self, query: &TargetFilterQuery) -> Result<usize> {
        let Some(binding) = &query.auto_assign else {
            return Ok(0);
        };
        with_context(&query.tenant, query.access_context.as_deref(), |ctx| {
            let deployment = DeploymentManagement { dal: self.dal, ctx };
            let Some(set) = self.bound_set(&deployment, query, binding)? else {
                return Ok(0);
            };

            let mut candidates = parse_for::<Target>(&query.query)?
                .and(self.dal.compatible_targets(ctx.tenant(), set.ds_type_id)?);
            let served = self.targets_with_actions_for(ctx.tenant(), set.id)?;
            if !served.is_empty() {
                candidates = candidates.and(Predicate::not(Predicate::in_values("id", served)));
            }
            let batch = Pageable::first(self.dal.settings.max_actions_per_query_tick);
            let target_ids: Vec<i64> = self
                .dal
                .acm
                .targets
                .find(ctx, Operation::Update, candidates, &batch)?
                .content
                .iter()
                .map(|t| t.id)
                .collect();
            if target_ids.is_empty() {
                return Ok(0);
            }

            let result = deployment.assign_with_origin(
                &target_ids,
                set.id,
                &binding_options(binding),
                AssignmentOrigin::AutoAssign { query_id: query.id },
            )?;
            self.announce(ctx, query, &result);
            if result.assigned > 0 {
                info!(
                    "Auto-assignment of filter query {} assigned set {} to {} target(s)",
                    query.name, set.id, result.assigned
                );
            }
            Ok(result.assigned)
        })
    }

    /// Evaluates the bindings matching one target, highest binding weight first.
    ///
    /// The heaviest matching binding with an assignable set decides, unless
    /// multi-assignment is enabled, in which case every matching binding applies.
    pub fn check_target(&self, tenant: &str, target_id: i64) -> Result<usize> {
        let target = self
            .dal
            .store
            .targets
            .get(tenant, target_id)?
            .ok_or_else(|| RepositoryError::not_found(EntityKind::Target, target_id))?;
        let mut queries = self.dal.store.target_filter_queries.find_all(
            tenant,
            &Predicate::not(Predicate::is_null("autoassignds.id")),
        )?;
        queries.sort_by_key(|q| {
            let weight = q
                .auto_assign
                .as_ref()
                .and_then(|b| b.weight)
                .unwrap_or(MAX_WEIGHT);
            (Reverse(weight), q.id)
        });

        let mut assigned = 0;
        for query in &queries {
            let Some(binding) = &query.auto_assign else {
                continue;
            };
            if !parse_for::<Target>(&query.query)?.matches(&target) {
                continue;
            }

            let outcome = with_context(tenant, query.access_context.as_deref(), |ctx| {
                let deployment = DeploymentManagement { dal: self.dal, ctx };
                let Some(set) = self.bound_set(&deployment, query, binding)? else {
                    return Ok(None);
                };
                if self
                    .targets_with_actions_for(tenant, set.id)?
                    .contains(&target_id)
                {
                    return Ok(Some(0));
                }
                let result = deployment.assign_with_origin(
                    &[target_id],
                    set.id,
                    &binding_options(binding),
                    AssignmentOrigin::AutoAssign { query_id: query.id },
                )?;
                self.announce(ctx, query, &result);
                Ok(Some(result.assigned))
            })?;

            let Some(created) = outcome else {
                continue;
            };
            assigned += created;
            if !self.dal.settings.multi_assignments_enabled {
                break;
            }
        }
        Ok(assigned)
    }

    /// Targets holding an action for `ds_id`, open or closed.
    fn targets_with_actions_for(&self, tenant: &str, ds_id: i64) -> Result<BTreeSet<i64>> {
        Ok(self
            .dal
            .store
            .actions
            .find_all(tenant, &Predicate::equals("distributionset.id", ds_id))?
            .iter()
            .map(|a| a.target_id)
            .collect())
    }

    fn bound_set(
        &self,
        deployment: &DeploymentManagement<'_>,
        query: &TargetFilterQuery,
        binding: &AutoAssignBinding,
    ) -> Result<Option<DistributionSet>> {
        match deployment.assignable_set(binding.distribution_set_id) {
            Ok(set) => Ok(Some(set)),
            Err(e @ RepositoryError::Conflict(_)) | Err(e @ RepositoryError::NotFound { .. }) => {
                warn!(
                    "Skipping auto-assignment of filter query {}: {}",
                    query.name, e
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn announce(&self, ctx: &CallerContext, query: &TargetFilterQuery, result: &AssignmentResult) {
        for action in &result.actions {
            self.dal.emit(
                EVENT_TARGET_AUTO_ASSIGNED,
                ctx.tenant(),
                json!({
                    "filter_query_id": query.id,
                    "target_id": action.target_id,
                    "distribution_set_id": action.distribution_set_id,
                    "action_id": action.id,
                }),
            );
        }
        AUTO_ASSIGNED_TARGETS_TOTAL.inc_by(result.assigned as u64);
    }
}

fn binding_options(binding: &AutoAssignBinding) -> AssignmentOptions {
    AssignmentOptions {
        action_type: binding.action_type,
        forced_time: None,
        weight: binding.weight,
        confirmation_required: binding.confirmation_required,
        maintenance_window: None,
    }
}

/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Data Access Layer
//!
//! The [`DAL`] bundles the entity store, the access controllers of the governed
//! entity types, the clock and the repository settings. Entity specific
//! accessors borrow the DAL together with the caller context they act for:
//!
//! ```ignore
//! let page = dal.targets(&ctx).find(Some("tag==eu"), &Pageable::default())?;
//! ```
//!
//! Governed entities (targets, types, distribution sets, software modules and
//! actions) are only ever read or written through their [`AccessController`].
//! Filter queries and rollouts are guarded by method level permissions.

use crate::acm::{AccessController, ActionRuleProvider, ScopedRuleProvider};
use crate::context::CallerContext;
use crate::errors::{RepositoryError, Result};
use crate::management::{
    AutoAssignChecker, DeploymentManagement, RolloutExecutor, RolloutManagement,
};
use crate::ql::Predicate;
use crate::store::{EntityRepository, Store};
use crate::utils::clock::{Clock, SystemClock};
use crate::utils::event_bus;
use chrono::{DateTime, Utc};
use sindri_models::models::{
    Action, DistributionSet, DistributionSetType, Entity, FieldValue, SindriEvent, SoftwareModule,
    SoftwareModuleType, Target, TargetType,
};
use sindri_utils::config::Repository;
use std::sync::Arc;

mod distribution_set_types;
mod distribution_sets;
mod software_modules;
mod target_filter_queries;
mod target_types;
mod targets;

pub use distribution_set_types::DistributionSetTypesDAL;
pub use distribution_sets::{DistributionSetInvalidation, DistributionSetsDAL};
pub use software_modules::{SoftwareModuleTypesDAL, SoftwareModulesDAL};
pub use target_filter_queries::TargetFilterQueriesDAL;
pub use target_types::TargetTypesDAL;
pub use targets::{TagToggleResult, TargetsDAL};

/// Access controllers of the governed entity types.
#[derive(Clone)]
pub struct AccessControllers {
    pub targets: AccessController<Target>,
    pub target_types: AccessController<TargetType>,
    pub distribution_sets: AccessController<DistributionSet>,
    pub distribution_set_types: AccessController<DistributionSetType>,
    pub software_modules: AccessController<SoftwareModule>,
    pub software_module_types: AccessController<SoftwareModuleType>,
    pub actions: AccessController<Action>,
}

impl AccessControllers {
    /// Grant based controllers over `store`.
    pub fn scoped(store: &Store, cache_capacity: u64) -> Self {
        let targets = AccessController::new(
            Arc::new(ScopedRuleProvider::<Target>::new(cache_capacity)),
            store.targets.clone(),
        );
        AccessControllers {
            actions: AccessController::new(
                Arc::new(ActionRuleProvider::new(targets.clone())),
                store.actions.clone(),
            ),
            targets,
            target_types: AccessController::new(
                Arc::new(ScopedRuleProvider::<TargetType>::new(cache_capacity)),
                store.target_types.clone(),
            ),
            distribution_sets: AccessController::new(
                Arc::new(ScopedRuleProvider::<DistributionSet>::new(cache_capacity)),
                store.distribution_sets.clone(),
            ),
            distribution_set_types: AccessController::new(
                Arc::new(ScopedRuleProvider::<DistributionSetType>::new(cache_capacity)),
                store.distribution_set_types.clone(),
            ),
            software_modules: AccessController::new(
                Arc::new(ScopedRuleProvider::<SoftwareModule>::new(cache_capacity)),
                store.software_modules.clone(),
            ),
            software_module_types: AccessController::new(
                Arc::new(ScopedRuleProvider::<SoftwareModuleType>::new(cache_capacity)),
                store.software_module_types.clone(),
            ),
        }
    }
}

/// The main Data Access Layer struct.
#[derive(Clone)]
pub struct DAL {
    pub store: Store,
    pub acm: AccessControllers,
    pub clock: Arc<dyn Clock>,
    pub settings: Arc<Repository>,
}

impl DAL {
    /// Creates a new DAL with grant based access control.
    ///
    /// # Arguments
    ///
    /// * `store` - The entity repositories.
    /// * `clock` - Time source for audit columns and scheduling decisions.
    /// * `settings` - Repository behaviour toggles and limits.
    pub fn new(store: Store, clock: Arc<dyn Clock>, settings: Repository) -> Self {
        DAL {
            acm: AccessControllers::scoped(&store, settings.scope_cache_capacity),
            store,
            clock,
            settings: Arc::new(settings),
        }
    }

    /// An in-memory DAL on the wall clock.
    pub fn in_memory(settings: Repository) -> Self {
        DAL::new(Store::in_memory(), Arc::new(SystemClock), settings)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn targets<'a>(&'a self, ctx: &'a CallerContext) -> TargetsDAL<'a> {
        TargetsDAL { dal: self, ctx }
    }

    pub fn target_types<'a>(&'a self, ctx: &'a CallerContext) -> TargetTypesDAL<'a> {
        TargetTypesDAL { dal: self, ctx }
    }

    pub fn distribution_sets<'a>(&'a self, ctx: &'a CallerContext) -> DistributionSetsDAL<'a> {
        DistributionSetsDAL { dal: self, ctx }
    }

    pub fn distribution_set_types<'a>(
        &'a self,
        ctx: &'a CallerContext,
    ) -> DistributionSetTypesDAL<'a> {
        DistributionSetTypesDAL { dal: self, ctx }
    }

    pub fn software_modules<'a>(&'a self, ctx: &'a CallerContext) -> SoftwareModulesDAL<'a> {
        SoftwareModulesDAL { dal: self, ctx }
    }

    pub fn software_module_types<'a>(
        &'a self,
        ctx: &'a CallerContext,
    ) -> SoftwareModuleTypesDAL<'a> {
        SoftwareModuleTypesDAL { dal: self, ctx }
    }

    pub fn target_filter_queries<'a>(
        &'a self,
        ctx: &'a CallerContext,
    ) -> TargetFilterQueriesDAL<'a> {
        TargetFilterQueriesDAL { dal: self, ctx }
    }

    pub fn deployment<'a>(&'a self, ctx: &'a CallerContext) -> DeploymentManagement<'a> {
        DeploymentManagement { dal: self, ctx }
    }

    pub fn rollouts<'a>(&'a self, ctx: &'a CallerContext) -> RolloutManagement<'a> {
        RolloutManagement { dal: self, ctx }
    }

    /// Advances rollouts; used by the rollout scheduler.
    pub fn rollout_executor(&self) -> RolloutExecutor<'_> {
        RolloutExecutor { dal: self }
    }

    /// Evaluates auto-assign bindings; used by the auto-assign scheduler.
    pub fn auto_assign(&self) -> AutoAssignChecker<'_> {
        AutoAssignChecker { dal: self }
    }

    /// Targets able to receive sets of `ds_type_id`: untyped targets and those
    /// whose type lists the set type as compatible.
    pub(crate) fn compatible_targets(&self, tenant: &str, ds_type_id: i64) -> Result<Predicate> {
        let type_ids: Vec<i64> = self
            .store
            .target_types
            .find_all(tenant, &Predicate::equals("dstype.id", ds_type_id))?
            .iter()
            .map(|t| t.id)
            .collect();
        Ok(Predicate::is_null("type.id").or(Predicate::in_values("type.id", type_ids)))
    }

    pub(crate) fn emit(&self, event_type: &str, tenant: &str, data: serde_json::Value) {
        event_bus::emit(SindriEvent::new(event_type, tenant, self.now(), data));
    }
}

/// Fails with `Conflict` when another row of the tenant has `value` in `field`.
///
/// Runs unscoped: uniqueness holds across what the caller can see.
pub(crate) fn ensure_unique<T: Entity>(
    repository: &Arc<dyn EntityRepository<T>>,
    tenant: &str,
    field: &str,
    value: &str,
    except_id: Option<i64>,
) -> Result<()> {
    let expected = Some(vec![FieldValue::Str(value.to_string())]);
    let taken = repository
        .find_all(tenant, &Predicate::equals(field, value))?
        .iter()
        .any(|row| Some(row.id()) != except_id && row.field(field) == expected);
    if taken {
        return Err(RepositoryError::Conflict(format!(
            "{} with {} '{}' already exists",
            T::KIND,
            field,
            value
        )));
    }
    Ok(())
}

/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Data Access Layer for DistributionSet operations.
//!
//! A distribution set is the unit of assignment. Its `complete` flag is
//! recomputed whenever its modules change; only complete, unlocked, valid and
//! not deleted sets can be assigned to targets.

use crate::acm::Operation;
use crate::context::CallerContext;
use crate::dal::DAL;
use crate::errors::{RepositoryError, Result};
use crate::management::CancelMode;
use crate::ql::{parse_for, Predicate};
use crate::store::{Page, Pageable};
use sindri_models::models::{
    DistributionSet, DistributionSetType, Entity, EntityKind, NewDistributionSet, SoftwareModule,
};
use sindri_utils::logging::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

/// Outcome of [`DistributionSetsDAL::invalidate`].
#[derive(Debug, Clone, PartialEq)]
pub struct DistributionSetInvalidation {
    pub distribution_set: DistributionSet,
    /// Filter queries whose auto-assign binding was removed.
    pub cleared_queries: usize,
    pub canceled_actions: usize,
}

/// Data Access Layer for DistributionSet operations.
pub struct DistributionSetsDAL<'a> {
    pub dal: &'a DAL,
    pub ctx: &'a CallerContext,
}

impl<'a> DistributionSetsDAL<'a> {
    /// Creates a distribution set.
    ///
    /// # Returns
    ///
    /// The stored set with `complete` computed from its modules. Fails with
    /// `Conflict` on a duplicate name and version, a deleted type or a module
    /// of a type the set type does not allow.
    pub fn create(&self, new_set: NewDistributionSet) -> Result<DistributionSet> {
        let ds_type = self
            .dal
            .acm
            .distribution_set_types
            .get(self.ctx, new_set.ds_type_id)?
            .ok_or_else(|| {
                RepositoryError::not_found(EntityKind::DistributionSetType, new_set.ds_type_id)
            })?;
        if ds_type.deleted {
            return Err(RepositoryError::Conflict(format!(
                "Distribution set type {} is deleted",
                ds_type.key
            )));
        }
        self.ensure_unique_name(&new_set.name, &new_set.ds_version, None)?;
        let modules = self.visible_modules(&new_set.modules)?;
        let complete = self.check_modules(&ds_type, &modules)?;

        let mut set =
            new_set.into_distribution_set(self.ctx.tenant(), self.ctx.principal(), self.dal.now());
        set.complete = complete;
        let set = self.dal.acm.distribution_sets.create(self.ctx, set)?;
        info!(
            "Created distribution set {}:{} ({}), complete: {}",
            set.name, set.ds_version, set.id, set.complete
        );
        Ok(set)
    }

    pub fn get(&self, ds_id: i64) -> Result<DistributionSet> {
        self.dal
            .acm
            .distribution_sets
            .get_for(self.ctx, Operation::Read, ds_id)
    }

    pub fn find(&self, query: Option<&str>, page: &Pageable) -> Result<Page<DistributionSet>> {
        let predicate = match query {
            Some(q) => parse_for::<DistributionSet>(q)?,
            None => Predicate::True,
        };
        self.dal
            .acm
            .distribution_sets
            .find(self.ctx, Operation::Read, predicate, page)
    }

    pub fn count(&self, query: Option<&str>) -> Result<usize> {
        let predicate = match query {
            Some(q) => parse_for::<DistributionSet>(q)?,
            None => Predicate::True,
        };
        self.dal
            .acm
            .distribution_sets
            .count(self.ctx, Operation::Read, predicate)
    }

    pub fn update(
        &self,
        ds_id: i64,
        name: Option<String>,
        ds_version: Option<String>,
        description: Option<String>,
    ) -> Result<DistributionSet> {
        let mut set = self.load_for_update(ds_id)?;
        if name.is_some() || ds_version.is_some() {
            let name = name.unwrap_or_else(|| set.name.clone());
            let ds_version = ds_version.unwrap_or_else(|| set.ds_version.clone());
            self.ensure_unique_name(&name, &ds_version, Some(ds_id))?;
            set.name = name;
            set.ds_version = ds_version;
        }
        if description.is_some() {
            set.description = description;
        }
        self.save(set)
    }

    /// Adds modules to an unlocked set and recomputes `complete`.
    pub fn assign_modules(&self, ds_id: i64, module_ids: &[i64]) -> Result<DistributionSet> {
        let mut set = self.load_for_update(ds_id)?;
        self.ensure_unlocked(&set)?;
        let mut ids = set.modules.clone();
        ids.extend(module_ids.iter().copied());
        let modules = self.visible_modules(&ids)?;
        let ds_type = self.set_type(&set)?;
        set.complete = self.check_modules(&ds_type, &modules)?;
        set.modules = ids;
        self.save(set)
    }

    pub fn unassign_module(&self, ds_id: i64, module_id: i64) -> Result<DistributionSet> {
        let mut set = self.load_for_update(ds_id)?;
        self.ensure_unlocked(&set)?;
        if !set.modules.remove(&module_id) {
            return Err(RepositoryError::not_found(EntityKind::SoftwareModule, module_id));
        }
        let modules = self.visible_modules(&set.modules)?;
        let ds_type = self.set_type(&set)?;
        set.complete = self.check_modules(&ds_type, &modules)?;
        self.save(set)
    }

    /// Freezes the set's content.
    pub fn lock(&self, ds_id: i64) -> Result<DistributionSet> {
        let mut set = self.load_for_update(ds_id)?;
        if set.locked {
            return Ok(set);
        }
        set.locked = true;
        self.save(set)
    }

    pub fn unlock(&self, ds_id: i64) -> Result<DistributionSet> {
        let mut set = self.load_for_update(ds_id)?;
        if !set.locked {
            return Ok(set);
        }
        set.locked = false;
        self.save(set)
    }

    pub fn assign_tag(&self, ds_ids: &[i64], tag: &str) -> Result<Vec<DistributionSet>> {
        self.retag(ds_ids, |set| {
            set.tags.insert(tag.to_string());
        })
    }

    pub fn unassign_tag(&self, ds_ids: &[i64], tag: &str) -> Result<Vec<DistributionSet>> {
        self.retag(ds_ids, |set| {
            set.tags.remove(tag);
        })
    }

    /// Marks the set invalid so it can no longer be assigned.
    ///
    /// Auto-assign bindings to the set are removed. With a `cancel` mode the
    /// set's active actions are cancelled as far as the caller may update
    /// their targets.
    pub fn invalidate(
        &self,
        ds_id: i64,
        cancel: Option<CancelMode>,
    ) -> Result<DistributionSetInvalidation> {
        let mut set = self
            .dal
            .acm
            .distribution_sets
            .get_for(self.ctx, Operation::Update, ds_id)?;
        if !set.invalid {
            set.invalid = true;
            set = self.save(set)?;
        }
        let cleared_queries = self.clear_auto_assign_bindings(ds_id)?;

        let mut canceled_actions = 0;
        if let Some(mode) = cancel {
            let active = self.dal.store.actions.find_all(
                self.ctx.tenant(),
                &Predicate::equals("distributionset.id", ds_id)
                    .and(Predicate::equals("active", true)),
            )?;
            let deployment = self.dal.deployment(self.ctx);
            for action in active {
                match deployment.cancel(action.id, mode) {
                    Ok(_) => canceled_actions += 1,
                    Err(e) => warn!(
                        "Could not cancel action {} of invalidated set {}: {}",
                        action.id, ds_id, e
                    ),
                }
            }
        }
        info!(
            "Invalidated distribution set {} ({} binding(s) cleared, {} action(s) canceled)",
            ds_id, cleared_queries, canceled_actions
        );
        Ok(DistributionSetInvalidation {
            distribution_set: set,
            cleared_queries,
            canceled_actions,
        })
    }

    /// Deletes a set. Sets with actions are kept flagged as deleted.
    pub fn delete(&self, ds_id: i64) -> Result<()> {
        let mut set = self
            .dal
            .acm
            .distribution_sets
            .get_for(self.ctx, Operation::Delete, ds_id)?;
        self.clear_auto_assign_bindings(ds_id)?;
        let in_use = self
            .dal
            .store
            .actions
            .count(self.ctx.tenant(), &Predicate::equals("distributionset.id", ds_id))?;
        if in_use > 0 {
            debug!(
                "Distribution set {} is referenced by {} action(s), marking deleted",
                ds_id, in_use
            );
            set.deleted = true;
            self.save(set)?;
        } else {
            self.dal.acm.distribution_sets.delete(self.ctx, ds_id)?;
        }
        Ok(())
    }

    fn load_for_update(&self, ds_id: i64) -> Result<DistributionSet> {
        let set = self
            .dal
            .acm
            .distribution_sets
            .get_for(self.ctx, Operation::Update, ds_id)?;
        if set.deleted {
            return Err(RepositoryError::InvalidState(format!(
                "Distribution set {} is deleted",
                ds_id
            )));
        }
        Ok(set)
    }

    fn save(&self, mut set: DistributionSet) -> Result<DistributionSet> {
        set.touch(self.ctx.principal(), self.dal.now());
        self.dal.acm.distribution_sets.update(self.ctx, set)
    }

    fn retag<F>(&self, ds_ids: &[i64], change: F) -> Result<Vec<DistributionSet>>
    where
        F: Fn(&mut DistributionSet),
    {
        let mut sets = Vec::with_capacity(ds_ids.len());
        for id in ds_ids {
            let set = self
                .dal
                .store
                .distribution_sets
                .get(self.ctx.tenant(), *id)?
                .ok_or_else(|| RepositoryError::not_found(EntityKind::DistributionSet, id))?;
            sets.push(set);
        }
        self.dal
            .acm
            .distribution_sets
            .assert_operation_allowed(self.ctx, Operation::Update, &sets)?;
        sets.into_iter()
            .map(|mut set| {
                change(&mut set);
                self.save(set)
            })
            .collect()
    }

    fn ensure_unlocked(&self, set: &DistributionSet) -> Result<()> {
        if set.locked {
            return Err(RepositoryError::Conflict(format!(
                "Distribution set {}:{} is locked",
                set.name, set.ds_version
            )));
        }
        Ok(())
    }

    fn ensure_unique_name(&self, name: &str, ds_version: &str, except_id: Option<i64>) -> Result<()> {
        let taken = self
            .dal
            .store
            .distribution_sets
            .find_all(self.ctx.tenant(), &Predicate::equals("name", name))?
            .into_iter()
            .any(|s| Some(s.id) != except_id && s.name == name && s.ds_version == ds_version);
        if taken {
            return Err(RepositoryError::Conflict(format!(
                "Distribution set {}:{} already exists",
                name, ds_version
            )));
        }
        Ok(())
    }

    fn set_type(&self, set: &DistributionSet) -> Result<DistributionSetType> {
        self.dal
            .store
            .distribution_set_types
            .get(self.ctx.tenant(), set.ds_type_id)?
            .ok_or_else(|| RepositoryError::not_found(EntityKind::DistributionSetType, set.ds_type_id))
    }

    fn visible_modules(&self, module_ids: &BTreeSet<i64>) -> Result<Vec<SoftwareModule>> {
        module_ids
            .iter()
            .map(|id| {
                self.dal
                    .acm
                    .software_modules
                    .get(self.ctx, *id)?
                    .filter(|m| !m.deleted)
                    .ok_or_else(|| RepositoryError::not_found(EntityKind::SoftwareModule, id))
            })
            .collect()
    }

    /// Validates module types against the set type and returns whether the
    /// modules make the set complete.
    fn check_modules(
        &self,
        ds_type: &DistributionSetType,
        modules: &[SoftwareModule],
    ) -> Result<bool> {
        let mut per_type: BTreeMap<i64, u32> = BTreeMap::new();
        for module in modules {
            if !ds_type.allows_module_type(module.sm_type_id) {
                return Err(RepositoryError::Conflict(format!(
                    "Distribution set type {} does not allow modules of type {}",
                    ds_type.key, module.sm_type_id
                )));
            }
            *per_type.entry(module.sm_type_id).or_default() += 1;
        }
        for (sm_type_id, count) in &per_type {
            let max = self
                .dal
                .store
                .software_module_types
                .get(self.ctx.tenant(), *sm_type_id)?
                .map(|t| t.max_assignments)
                .unwrap_or(1);
            if *count > max {
                return Err(RepositoryError::Conflict(format!(
                    "At most {} module(s) of type {} allowed per distribution set",
                    max, sm_type_id
                )));
            }
        }
        let module_types: BTreeSet<i64> = per_type.into_keys().collect();
        Ok(ds_type.is_complete_with(&module_types))
    }

    fn clear_auto_assign_bindings(&self, ds_id: i64) -> Result<usize> {
        let repository = &self.dal.store.target_filter_queries;
        let bound = repository.find_all(
            self.ctx.tenant(),
            &Predicate::equals("autoassignds.id", ds_id),
        )?;
        let now = self.dal.now();
        let cleared = bound.len();
        for mut query in bound {
            query.auto_assign = None;
            query.touch(self.ctx.principal(), now);
            repository.save(query)?;
        }
        Ok(cleared)
    }
}

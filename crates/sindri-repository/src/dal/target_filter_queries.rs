/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Data Access Layer for TargetFilterQuery operations.
//!
//! Filter queries are guarded by the target permissions. Setting an
//! auto-assign binding captures the caller's context, which the auto-assign
//! scheduler later re-enters: the binding never assigns more than its author
//! could.

use crate::acm::Operation;
use crate::context::{permissions, CallerContext};
use crate::dal::{ensure_unique, DAL};
use crate::errors::{RepositoryError, Result};
use crate::ql::{parse_for, Predicate};
use crate::store::{Page, Pageable};
use sindri_models::models::{
    AutoAssignBinding, Entity, EntityKind, NewTargetFilterQuery, Target, TargetFilterQuery,
};
use sindri_utils::logging::prelude::*;

/// Data Access Layer for TargetFilterQuery operations.
pub struct TargetFilterQueriesDAL<'a> {
    pub dal: &'a DAL,
    pub ctx: &'a CallerContext,
}

impl<'a> TargetFilterQueriesDAL<'a> {
    /// Stores a named target query, optionally bound to a distribution set.
    ///
    /// # Returns
    ///
    /// `InvalidQuery` when the query is not a valid target query, `Conflict`
    /// on a duplicate name or a non assignable bound set.
    pub fn create(&self, new_query: NewTargetFilterQuery) -> Result<TargetFilterQuery> {
        self.ctx.require_permission(permissions::CREATE_TARGET)?;
        parse_for::<Target>(&new_query.query)?;
        ensure_unique(
            &self.dal.store.target_filter_queries,
            self.ctx.tenant(),
            "name",
            &new_query.name,
            None,
        )?;
        if let Some(binding) = &new_query.auto_assign {
            self.check_binding(binding)?;
        }
        let mut query = new_query.into_target_filter_query(
            self.ctx.tenant(),
            self.ctx.principal(),
            self.dal.now(),
        );
        query.access_context = Some(self.ctx.capture()?);
        let query = self.dal.store.target_filter_queries.insert(query)?;
        info!("Created target filter query {} ({})", query.name, query.id);
        Ok(query)
    }

    pub fn get(&self, query_id: i64) -> Result<TargetFilterQuery> {
        self.ctx.require_permission(permissions::READ_TARGET)?;
        self.load(query_id)
    }

    pub fn find(&self, query: Option<&str>, page: &Pageable) -> Result<Page<TargetFilterQuery>> {
        self.ctx.require_permission(permissions::READ_TARGET)?;
        let predicate = match query {
            Some(q) => parse_for::<TargetFilterQuery>(q)?,
            None => Predicate::True,
        };
        self.dal
            .store
            .target_filter_queries
            .find(self.ctx.tenant(), &predicate, page)
    }

    /// Queries carrying an auto-assign binding, in id order.
    pub fn find_with_auto_assign(&self) -> Result<Vec<TargetFilterQuery>> {
        self.ctx.require_permission(permissions::READ_TARGET)?;
        self.dal.store.target_filter_queries.find_all(
            self.ctx.tenant(),
            &Predicate::not(Predicate::is_null("autoassignds.id")),
        )
    }

    pub fn update(
        &self,
        query_id: i64,
        name: Option<String>,
        query: Option<String>,
    ) -> Result<TargetFilterQuery> {
        self.ctx.require_permission(permissions::UPDATE_TARGET)?;
        let mut stored = self.load(query_id)?;
        if let Some(name) = name {
            ensure_unique(
                &self.dal.store.target_filter_queries,
                self.ctx.tenant(),
                "name",
                &name,
                Some(query_id),
            )?;
            stored.name = name;
        }
        if let Some(query) = query {
            parse_for::<Target>(&query)?;
            stored.query = query;
        }
        stored.touch(self.ctx.principal(), self.dal.now());
        self.dal.store.target_filter_queries.save(stored)
    }

    /// Sets or removes the auto-assign binding and re-captures the caller's context.
    pub fn update_auto_assign(
        &self,
        query_id: i64,
        binding: Option<AutoAssignBinding>,
    ) -> Result<TargetFilterQuery> {
        self.ctx.require_permission(permissions::UPDATE_TARGET)?;
        let mut stored = self.load(query_id)?;
        if let Some(binding) = &binding {
            self.check_binding(binding)?;
        }
        stored.auto_assign = binding;
        stored.access_context = Some(self.ctx.capture()?);
        stored.touch(self.ctx.principal(), self.dal.now());
        let stored = self.dal.store.target_filter_queries.save(stored)?;
        info!(
            "Auto-assign of filter query {} set to {:?}",
            stored.name,
            stored.auto_assign.as_ref().map(|b| b.distribution_set_id)
        );
        Ok(stored)
    }

    pub fn delete(&self, query_id: i64) -> Result<()> {
        self.ctx.require_permission(permissions::DELETE_TARGET)?;
        if !self
            .dal
            .store
            .target_filter_queries
            .delete(self.ctx.tenant(), query_id)?
        {
            return Err(RepositoryError::not_found(EntityKind::TargetFilterQuery, query_id));
        }
        Ok(())
    }

    fn load(&self, query_id: i64) -> Result<TargetFilterQuery> {
        self.dal
            .store
            .target_filter_queries
            .get(self.ctx.tenant(), query_id)?
            .ok_or_else(|| RepositoryError::not_found(EntityKind::TargetFilterQuery, query_id))
    }

    fn check_binding(&self, binding: &AutoAssignBinding) -> Result<()> {
        let set = self
            .dal
            .acm
            .distribution_sets
            .get_for(self.ctx, Operation::Read, binding.distribution_set_id)?;
        if let Some(reason) = set.unassignable_reason() {
            return Err(RepositoryError::Conflict(format!(
                "Distribution set {}:{} {}",
                set.name, set.ds_version, reason
            )));
        }
        Ok(())
    }
}

/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Access control
//!
//! An [`AccessController`] wraps the [`EntityRepository`] of one governed
//! entity type and rewrites every read and write with the caller's access
//! rule. Rules come from an [`AccessRuleProvider`]: `None` means the caller is
//! unrestricted, `Some(predicate)` limits the operation to matching rows.
//!
//! Two failures are kept apart. An entity outside the caller's READ rule does
//! not exist as far as the caller can tell (`NotFound`); a visible entity
//! outside the rule of the requested operation yields `InsufficientPermission`.

use crate::context::CallerContext;
use crate::errors::{RepositoryError, Result};
use crate::ql::Predicate;
use crate::store::{EntityRepository, Page, Pageable};
use serde::{Deserialize, Serialize};
use sindri_models::models::Entity;
use sindri_utils::logging::prelude::*;
use std::fmt;
use std::sync::Arc;

pub mod rules;

pub use rules::{ActionRuleProvider, ScopedRuleProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "CREATE",
            Operation::Read => "READ",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source of the access rules of one entity type.
pub trait AccessRuleProvider<T: Entity>: Send + Sync {
    /// The restriction for `op`, or `None` when the caller is unrestricted.
    ///
    /// Never called for the system context.
    fn rule(&self, ctx: &CallerContext, op: Operation) -> Result<Option<Predicate>>;
}

/// Access checked repository of one entity type.
pub struct AccessController<T: Entity> {
    rules: Arc<dyn AccessRuleProvider<T>>,
    repository: Arc<dyn EntityRepository<T>>,
}

impl<T: Entity> Clone for AccessController<T> {
    fn clone(&self) -> Self {
        AccessController {
            rules: self.rules.clone(),
            repository: self.repository.clone(),
        }
    }
}

impl<T: Entity> AccessController<T> {
    pub fn new(
        rules: Arc<dyn AccessRuleProvider<T>>,
        repository: Arc<dyn EntityRepository<T>>,
    ) -> Self {
        AccessController { rules, repository }
    }

    /// The unchecked repository, for callers that already authorized the work.
    pub fn repository(&self) -> &Arc<dyn EntityRepository<T>> {
        &self.repository
    }

    pub fn get_access_rules(&self, ctx: &CallerContext, op: Operation) -> Result<Option<Predicate>> {
        if ctx.is_system() {
            return Ok(None);
        }
        self.rules.rule(ctx, op)
    }

    /// `query AND rule`, or `query` untouched when unrestricted.
    pub fn append_access_rules(
        &self,
        ctx: &CallerContext,
        op: Operation,
        query: Predicate,
    ) -> Result<Predicate> {
        Ok(query.and_opt(self.get_access_rules(ctx, op)?))
    }

    /// Checks READ visibility of every entity, then the rule of `op`.
    ///
    /// CREATE only checks the create rule as the entities are not stored yet.
    pub fn assert_operation_allowed<'e, I>(
        &self,
        ctx: &CallerContext,
        op: Operation,
        entities: I,
    ) -> Result<()>
    where
        I: IntoIterator<Item = &'e T>,
    {
        if ctx.is_system() {
            return Ok(());
        }
        let entities: Vec<&T> = entities.into_iter().collect();

        if op != Operation::Create {
            if let Some(read) = self.get_access_rules(ctx, Operation::Read)? {
                if let Some(hidden) = entities.iter().find(|e| !read.matches(**e)) {
                    return Err(RepositoryError::not_found(T::KIND, hidden.id()));
                }
            }
            if op == Operation::Read {
                return Ok(());
            }
        }

        if let Some(rule) = self.get_access_rules(ctx, op)? {
            if let Some(denied) = entities.iter().find(|e| !rule.matches(**e)) {
                debug!(
                    "{} denied {} on {} {}",
                    ctx.principal(),
                    op,
                    T::KIND,
                    denied.id()
                );
                return Err(RepositoryError::InsufficientPermission(format!(
                    "{} may not {} {} {}",
                    ctx.principal(),
                    op.as_str().to_ascii_lowercase(),
                    T::KIND,
                    denied.id()
                )));
            }
        }
        Ok(())
    }

    pub fn find(
        &self,
        ctx: &CallerContext,
        op: Operation,
        query: Predicate,
        page: &Pageable,
    ) -> Result<Page<T>> {
        let predicate = self.append_access_rules(ctx, op, query)?;
        self.repository.find(ctx.tenant(), &predicate, page)
    }

    pub fn find_all(&self, ctx: &CallerContext, op: Operation, query: Predicate) -> Result<Vec<T>> {
        let predicate = self.append_access_rules(ctx, op, query)?;
        self.repository.find_all(ctx.tenant(), &predicate)
    }

    pub fn count(&self, ctx: &CallerContext, op: Operation, query: Predicate) -> Result<usize> {
        let predicate = self.append_access_rules(ctx, op, query)?;
        self.repository.count(ctx.tenant(), &predicate)
    }

    /// The entity if it exists and is READ-visible.
    pub fn get(&self, ctx: &CallerContext, id: i64) -> Result<Option<T>> {
        let Some(entity) = self.repository.get(ctx.tenant(), id)? else {
            return Ok(None);
        };
        match self.get_access_rules(ctx, Operation::Read)? {
            Some(read) if !read.matches(&entity) => Ok(None),
            _ => Ok(Some(entity)),
        }
    }

    /// Loads the entity for `op`, failing with `NotFound` or `InsufficientPermission`.
    pub fn get_for(&self, ctx: &CallerContext, op: Operation, id: i64) -> Result<T> {
        let entity = self
            .repository
            .get(ctx.tenant(), id)?
            .ok_or_else(|| RepositoryError::not_found(T::KIND, id))?;
        self.assert_operation_allowed(ctx, op, [&entity])?;
        Ok(entity)
    }

    pub fn create(&self, ctx: &CallerContext, entity: T) -> Result<T> {
        if entity.tenant() != ctx.tenant() {
            return Err(RepositoryError::InvalidContext(format!(
                "cannot create {} of tenant {} in tenant {}",
                T::KIND,
                entity.tenant(),
                ctx.tenant()
            )));
        }
        self.assert_operation_allowed(ctx, Operation::Create, [&entity])?;
        self.repository.insert(entity)
    }

    /// Saves `entity` if the caller may update both its stored and its new state.
    ///
    /// Audit columns are the caller's to set.
    pub fn update(&self, ctx: &CallerContext, entity: T) -> Result<T> {
        self.get_for(ctx, Operation::Update, entity.id())?;
        if let Some(rule) = self.get_access_rules(ctx, Operation::Update)? {
            if !rule.matches(&entity) {
                return Err(RepositoryError::InsufficientPermission(format!(
                    "{} may not move {} {} out of its update scope",
                    ctx.principal(),
                    T::KIND,
                    entity.id()
                )));
            }
        }
        self.repository.save(entity)
    }

    pub fn delete(&self, ctx: &CallerContext, id: i64) -> Result<()> {
        self.get_for(ctx, Operation::Delete, id)?;
        if !self.repository.delete(ctx.tenant(), id)? {
            return Err(RepositoryError::not_found(T::KIND, id));
        }
        Ok(())
    }
}

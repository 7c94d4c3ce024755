/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Rule providers deriving access rules from permission grants.

use super::{AccessController, AccessRuleProvider, Operation};
use crate::context::{permissions, CallerContext};
use crate::errors::Result;
use crate::ql::{parse_for, Predicate};
use moka::sync::Cache;
use sindri_models::models::{Action, Entity, Target};
use sindri_utils::logging::prelude::*;
use std::marker::PhantomData;

/// Rules from `{OP}_{ENTITY}` grants whose scopes are queries over `T`.
///
/// No matching grant yields `False`, an unscoped grant yields no restriction,
/// several scoped grants are OR-ed. UPDATE and DELETE are additionally bound
/// by the READ rule.
pub struct ScopedRuleProvider<T: Entity> {
    scopes: Cache<String, Predicate>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> ScopedRuleProvider<T> {
    /// # Arguments
    ///
    /// * `cache_capacity` - Number of compiled scope predicates kept in memory.
    pub fn new(cache_capacity: u64) -> Self {
        ScopedRuleProvider {
            scopes: Cache::new(cache_capacity),
            _entity: PhantomData,
        }
    }

    fn compile(&self, scope: &str) -> Result<Predicate> {
        let key = format!("{}|{}", T::KIND, scope);
        self.scopes
            .try_get_with(key, || {
                trace!("Compiling {} scope '{}'", T::KIND, scope);
                parse_for::<T>(scope)
            })
            .map_err(|e| (*e).clone())
    }

    fn permission_rule(&self, ctx: &CallerContext, op: Operation) -> Result<Option<Predicate>> {
        let permission = permissions::for_operation(op, T::KIND);
        let grants = ctx.grants_for(&permission);
        if grants.is_empty() {
            return Ok(Some(Predicate::False));
        }
        let mut scopes = Vec::with_capacity(grants.len());
        for grant in grants {
            match &grant.scope {
                None => return Ok(None),
                Some(scope) => scopes.push(self.compile(scope)?),
            }
        }
        Ok(Some(Predicate::any(scopes)))
    }
}

impl<T: Entity> AccessRuleProvider<T> for ScopedRuleProvider<T> {
    fn rule(&self, ctx: &CallerContext, op: Operation) -> Result<Option<Predicate>> {
        let rule = self.permission_rule(ctx, op)?;
        match op {
            Operation::Create | Operation::Read => Ok(rule),
            Operation::Update | Operation::Delete => {
                let read = self.permission_rule(ctx, Operation::Read)?;
                Ok(match (read, rule) {
                    (None, None) => None,
                    (Some(r), None) | (None, Some(r)) => Some(r),
                    (Some(read), Some(rule)) => Some(read.and(rule)),
                })
            }
        }
    }
}

/// Rules of actions, borrowed from their targets.
///
/// Reading an action needs READ on its target, any mutation needs UPDATE on
/// it. The target rule is materialized into the ids of the matching targets.
pub struct ActionRuleProvider {
    targets: AccessController<Target>,
}

impl ActionRuleProvider {
    pub fn new(targets: AccessController<Target>) -> Self {
        ActionRuleProvider { targets }
    }
}

impl AccessRuleProvider<Action> for ActionRuleProvider {
    fn rule(&self, ctx: &CallerContext, op: Operation) -> Result<Option<Predicate>> {
        let target_op = match op {
            Operation::Read => Operation::Read,
            _ => Operation::Update,
        };
        match self.targets.get_access_rules(ctx, target_op)? {
            None => Ok(None),
            Some(Predicate::False) => Ok(Some(Predicate::False)),
            Some(rule) => {
                let ids: Vec<i64> = self
                    .targets
                    .repository()
                    .find_all(ctx.tenant(), &rule)?
                    .iter()
                    .map(|t| t.id)
                    .collect();
                Ok(Some(Predicate::in_values("target.id", ids)))
            }
        }
    }
}

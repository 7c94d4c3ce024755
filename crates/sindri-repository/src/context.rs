/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Caller context
//!
//! Every repository operation receives the [`CallerContext`] it runs for. A
//! user context carries permission grants; the system context of a tenant
//! bypasses every access rule.
//!
//! Work deferred to a scheduler (rollout advancement, auto-assignment) stores
//! the creator's context with [`CallerContext::capture`] and re-enters it
//! through [`with_context`], so the system never widens a user's reach.
//!
//! Grants are written as `PERMISSION` or `PERMISSION/scope`, where the scope is
//! a query over the governed entity, e.g. `UPDATE_TARGET/type.id==2`.

use crate::acm::Operation;
use crate::errors::{RepositoryError, Result};
use serde::{Deserialize, Serialize};
use sindri_models::models::EntityKind;
use std::fmt;
use std::str::FromStr;

/// Permission names not derived from an entity kind.
pub mod permissions {
    use super::{EntityKind, Operation};

    pub const READ_TARGET: &str = "READ_TARGET";
    pub const CREATE_TARGET: &str = "CREATE_TARGET";
    pub const UPDATE_TARGET: &str = "UPDATE_TARGET";
    pub const DELETE_TARGET: &str = "DELETE_TARGET";

    pub const READ_DISTRIBUTION_SET: &str = "READ_DISTRIBUTION_SET";
    pub const UPDATE_DISTRIBUTION_SET: &str = "UPDATE_DISTRIBUTION_SET";

    pub const CREATE_ROLLOUT: &str = "CREATE_ROLLOUT";
    pub const READ_ROLLOUT: &str = "READ_ROLLOUT";
    pub const UPDATE_ROLLOUT: &str = "UPDATE_ROLLOUT";
    pub const DELETE_ROLLOUT: &str = "DELETE_ROLLOUT";
    /// Start, pause and resume.
    pub const HANDLE_ROLLOUT: &str = "HANDLE_ROLLOUT";
    pub const APPROVE_ROLLOUT: &str = "APPROVE_ROLLOUT";

    /// `{OP}_{ENTITY}`, e.g. `UPDATE_SOFTWARE_MODULE`.
    pub fn for_operation(op: Operation, kind: EntityKind) -> String {
        format!("{}_{}", op.as_str(), kind.permission_suffix())
    }
}

/// A permission, optionally restricted to entities matching a scope query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Grant {
    pub permission: String,
    pub scope: Option<String>,
}

impl Grant {
    pub fn unscoped(permission: &str) -> Self {
        Grant {
            permission: permission.to_string(),
            scope: None,
        }
    }

    pub fn scoped(permission: &str, scope: &str) -> Self {
        Grant {
            permission: permission.to_string(),
            scope: Some(scope.to_string()),
        }
    }
}

impl FromStr for Grant {
    type Err = RepositoryError;

    fn from_str(s: &str) -> Result<Self> {
        let (permission, scope) = match s.split_once('/') {
            Some((permission, scope)) => (permission.trim(), Some(scope.trim())),
            None => (s.trim(), None),
        };

        if permission.is_empty()
            || !permission
                .chars()
                .all(|c| c.is_ascii_uppercase() || c == '_')
        {
            return Err(RepositoryError::Validation(format!(
                "Invalid permission name '{}'",
                permission
            )));
        }
        if let Some("") = scope {
            return Err(RepositoryError::Validation(format!(
                "Empty scope in grant '{}'",
                s
            )));
        }

        Ok(Grant {
            permission: permission.to_string(),
            scope: scope.map(str::to_string),
        })
    }
}

impl fmt::Display for Grant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Some(scope) => write!(f, "{}/{}", self.permission, scope),
            None => f.write_str(&self.permission),
        }
    }
}

/// Identity and permissions an operation runs with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CallerContext {
    /// Internal work of a tenant; no access rule applies.
    System { tenant: String },
    User {
        tenant: String,
        principal: String,
        grants: Vec<Grant>,
    },
}

impl CallerContext {
    pub fn system(tenant: &str) -> Self {
        CallerContext::System {
            tenant: tenant.to_string(),
        }
    }

    pub fn user(tenant: &str, principal: &str, grants: Vec<Grant>) -> Self {
        CallerContext::User {
            tenant: tenant.to_string(),
            principal: principal.to_string(),
            grants,
        }
    }

    /// Builds a user context from grant strings such as `READ_TARGET/tag==eu`.
    pub fn user_with(tenant: &str, principal: &str, grants: &[&str]) -> Result<Self> {
        let grants = grants
            .iter()
            .map(|g| g.parse())
            .collect::<Result<Vec<Grant>>>()?;
        Ok(CallerContext::user(tenant, principal, grants))
    }

    pub fn tenant(&self) -> &str {
        match self {
            CallerContext::System { tenant } | CallerContext::User { tenant, .. } => tenant,
        }
    }

    /// Name recorded in audit columns.
    pub fn principal(&self) -> &str {
        match self {
            CallerContext::System { .. } => "system",
            CallerContext::User { principal, .. } => principal,
        }
    }

    pub fn is_system(&self) -> bool {
        matches!(self, CallerContext::System { .. })
    }

    /// The caller's grants of `permission`. Empty for the system context.
    pub fn grants_for(&self, permission: &str) -> Vec<&Grant> {
        match self {
            CallerContext::System { .. } => Vec::new(),
            CallerContext::User { grants, .. } => grants
                .iter()
                .filter(|g| g.permission == permission)
                .collect(),
        }
    }

    /// Whether the caller holds `permission` in any scope.
    pub fn has_permission(&self, permission: &str) -> bool {
        self.is_system() || !self.grants_for(permission).is_empty()
    }

    pub fn require_permission(&self, permission: &str) -> Result<()> {
        if self.has_permission(permission) {
            Ok(())
        } else {
            Err(RepositoryError::InsufficientPermission(format!(
                "{} lacks {}",
                self.principal(),
                permission
            )))
        }
    }

    /// Serializes the context for storage next to deferred work.
    pub fn capture(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| RepositoryError::InvalidContext(format!("capture failed: {}", e)))
    }

    /// Restores a captured context, checking it belongs to `tenant`.
    ///
    /// A missing blob restores the tenant's system context.
    pub fn restore(tenant: &str, captured: Option<&str>) -> Result<Self> {
        let Some(blob) = captured else {
            return Ok(CallerContext::system(tenant));
        };
        let ctx: CallerContext = serde_json::from_str(blob)
            .map_err(|e| RepositoryError::InvalidContext(format!("unreadable: {}", e)))?;
        if ctx.tenant() != tenant {
            return Err(RepositoryError::InvalidContext(format!(
                "context of tenant {} used in tenant {}",
                ctx.tenant(),
                tenant
            )));
        }
        Ok(ctx)
    }
}

/// Runs `f` in the captured context.
pub fn with_context<R, F>(tenant: &str, captured: Option<&str>, f: F) -> Result<R>
where
    F: FnOnce(&CallerContext) -> Result<R>,
{
    let ctx = CallerContext::restore(tenant, captured)?;
    f(&ctx)
}

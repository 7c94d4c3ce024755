/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Entity models and the [`Entity`] trait used by stores and predicates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod actions;
pub mod distribution_sets;
pub mod events;
pub mod rollouts;
pub mod software_modules;
pub mod target_filter_queries;
pub mod target_types;
pub mod targets;

pub use actions::{
    Action, ActionStatus, ActionStatusEntry, ActionType, MaintenanceWindow, NewAction,
};
pub use distribution_sets::{
    DistributionSet, DistributionSetType, NewDistributionSet, NewDistributionSetType,
};
pub use events::SindriEvent;
pub use rollouts::{
    dynamic_group_capacity, ErrorAction, ErrorCondition, GroupDefinition, NewRollout,
    NewRolloutGroup, Rollout, RolloutGroup, RolloutGroupConditions, RolloutGroupStatus,
    RolloutStatus, SuccessAction, SuccessCondition, DEFAULT_DYNAMIC_GROUP_SIZE,
};
pub use software_modules::{
    NewSoftwareModule, NewSoftwareModuleType, SoftwareModule, SoftwareModuleType,
};
pub use target_filter_queries::{AutoAssignBinding, NewTargetFilterQuery, TargetFilterQuery};
pub use target_types::{NewTargetType, TargetType};
pub use targets::{NewTarget, Target, TargetUpdateStatus};

/// Highest accepted action weight; also the weight assumed when none is set.
pub const MAX_WEIGHT: u16 = 1000;

/// Kinds of stored entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Target,
    TargetType,
    DistributionSet,
    DistributionSetType,
    SoftwareModule,
    SoftwareModuleType,
    Action,
    TargetFilterQuery,
    Rollout,
    RolloutGroup,
}

impl EntityKind {
    /// Suffix of the permission names governing this kind, e.g. `TARGET` in `READ_TARGET`.
    ///
    /// Actions and filter queries are governed by target permissions, rollout
    /// groups by rollout permissions.
    pub fn permission_suffix(&self) -> &'static str {
        match self {
            EntityKind::Target | EntityKind::Action | EntityKind::TargetFilterQuery => "TARGET",
            EntityKind::TargetType => "TARGET_TYPE",
            EntityKind::DistributionSet => "DISTRIBUTION_SET",
            EntityKind::DistributionSetType => "DISTRIBUTION_SET_TYPE",
            EntityKind::SoftwareModule => "SOFTWARE_MODULE",
            EntityKind::SoftwareModuleType => "SOFTWARE_MODULE_TYPE",
            EntityKind::Rollout | EntityKind::RolloutGroup => "ROLLOUT",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Target => "Target",
            EntityKind::TargetType => "TargetType",
            EntityKind::DistributionSet => "DistributionSet",
            EntityKind::DistributionSetType => "DistributionSetType",
            EntityKind::SoftwareModule => "SoftwareModule",
            EntityKind::SoftwareModuleType => "SoftwareModuleType",
            EntityKind::Action => "Action",
            EntityKind::TargetFilterQuery => "TargetFilterQuery",
            EntityKind::Rollout => "Rollout",
            EntityKind::RolloutGroup => "RolloutGroup",
        };
        f.write_str(name)
    }
}

/// A single value of an entity field as seen by query predicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Null,
    Str(String),
    Int(i64),
    Bool(bool),
    Time(DateTime<Utc>),
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Str(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Str(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        FieldValue::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(v: DateTime<Utc>) -> Self {
        FieldValue::Time(v)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(FieldValue::Null)
    }
}

/// Common behaviour of every stored entity.
pub trait Entity: Clone + Send + Sync + 'static {
    const KIND: EntityKind;

    /// Lower-case queryable field paths. An entry ending in `.*` admits any sub key.
    const FIELDS: &'static [&'static str];

    fn id(&self) -> i64;
    fn set_id(&mut self, id: i64);
    fn tenant(&self) -> &str;
    fn version(&self) -> u64;
    fn set_version(&mut self, version: u64);

    /// Records who modified the entity and when.
    fn touch(&mut self, actor: &str, at: DateTime<Utc>);

    /// Values of a lower-case field path, `None` for unknown paths.
    fn field(&self, path: &str) -> Option<Vec<FieldValue>>;

    fn supports_field(path: &str) -> bool
    where
        Self: Sized,
    {
        let path = path.to_ascii_lowercase();
        Self::FIELDS.iter().any(|field| match field.strip_suffix(".*") {
            Some(prefix) => path
                .strip_prefix(prefix)
                .and_then(|rest| rest.strip_prefix('.'))
                .map(|key| !key.is_empty())
                .unwrap_or(false),
            None => *field == path,
        })
    }
}

/// Implements the id/tenant/version/audit accessors of [`Entity`] for structs
/// carrying the standard columns.
macro_rules! entity_base {
    () => {
        fn id(&self) -> i64 {
            self.id
        }

        fn set_id(&mut self, id: i64) {
            self.id = id;
        }

        fn tenant(&self) -> &str {
            &self.tenant
        }

        fn version(&self) -> u64 {
            self.version
        }

        fn set_version(&mut self, version: u64) {
            self.version = version;
        }

        fn touch(&mut self, actor: &str, at: chrono::DateTime<chrono::Utc>) {
            self.last_modified_by = actor.to_string();
            self.last_modified_at = at;
        }
    };
}
pub(crate) use entity_base;

/// Resolves the audit columns shared by all entities.
pub(crate) fn audit_field(
    path: &str,
    id: i64,
    created_at: DateTime<Utc>,
    created_by: &str,
    last_modified_at: DateTime<Utc>,
    last_modified_by: &str,
) -> Option<Vec<FieldValue>> {
    let value = match path {
        "id" => FieldValue::Int(id),
        "createdat" => FieldValue::Time(created_at),
        "createdby" => FieldValue::from(created_by),
        "lastmodifiedat" => FieldValue::Time(last_modified_at),
        "lastmodifiedby" => FieldValue::from(last_modified_by),
        _ => return None,
    };
    Some(vec![value])
}

pub(crate) fn single(value: impl Into<FieldValue>) -> Option<Vec<FieldValue>> {
    Some(vec![value.into()])
}

pub(crate) fn ids<'a>(values: impl IntoIterator<Item = &'a i64>) -> Option<Vec<FieldValue>> {
    Some(values.into_iter().map(|v| FieldValue::Int(*v)).collect())
}

pub(crate) fn strings<'a>(values: impl IntoIterator<Item = &'a String>) -> Option<Vec<FieldValue>> {
    Some(values.into_iter().map(|v| FieldValue::Str(v.clone())).collect())
}

/// Rejects blank or oversized names.
pub(crate) fn validate_name(what: &str, value: &str, max_len: usize) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{} cannot be empty", what));
    }
    if value.chars().count() > max_len {
        return Err(format!("{} cannot exceed {} characters", what, max_len));
    }
    Ok(())
}

/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Distribution sets
//!
//! A distribution set bundles software modules into a deployable unit. Its
//! type names the module types that are mandatory and optional. A set is
//! `complete` once every mandatory module type is covered, and only complete,
//! unlocked, undeleted and valid sets may be assigned to targets.

use super::{
    audit_field, entity_base, ids, single, strings, validate_name, Entity, EntityKind, FieldValue,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionSetType {
    pub id: i64,
    pub tenant: String,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub last_modified_at: DateTime<Utc>,
    pub last_modified_by: String,
    pub key: String,
    pub name: String,
    pub description: Option<String>,
    pub mandatory_module_types: BTreeSet<i64>,
    pub optional_module_types: BTreeSet<i64>,
    pub deleted: bool,
}

impl DistributionSetType {
    /// Whether modules of the given type may be part of sets of this type.
    pub fn allows_module_type(&self, sm_type_id: i64) -> bool {
        self.mandatory_module_types.contains(&sm_type_id)
            || self.optional_module_types.contains(&sm_type_id)
    }

    /// Whether the given module types cover every mandatory module type.
    pub fn is_complete_with(&self, module_types: &BTreeSet<i64>) -> bool {
        self.mandatory_module_types.is_subset(module_types)
    }
}

impl Entity for DistributionSetType {
    const KIND: EntityKind = EntityKind::DistributionSetType;
    const FIELDS: &'static [&'static str] = &[
        "id",
        "createdat",
        "createdby",
        "lastmodifiedat",
        "lastmodifiedby",
        "key",
        "name",
        "description",
        "deleted",
    ];

    entity_base!();

    fn field(&self, path: &str) -> Option<Vec<FieldValue>> {
        match path {
            "key" => single(self.key.as_str()),
            "name" => single(self.name.as_str()),
            "description" => single(self.description.clone()),
            "deleted" => single(self.deleted),
            _ => audit_field(
                path,
                self.id,
                self.created_at,
                &self.created_by,
                self.last_modified_at,
                &self.last_modified_by,
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDistributionSetType {
    pub key: String,
    pub name: String,
    pub description: Option<String>,
    pub mandatory_module_types: BTreeSet<i64>,
    pub optional_module_types: BTreeSet<i64>,
}

impl NewDistributionSetType {
    pub fn new(
        key: String,
        name: String,
        mandatory_module_types: BTreeSet<i64>,
        optional_module_types: BTreeSet<i64>,
    ) -> Result<Self, String> {
        validate_name("Key", &key, 64)?;
        validate_name("Name", &name, 64)?;
        if !mandatory_module_types.is_disjoint(&optional_module_types) {
            return Err("A module type cannot be both mandatory and optional".to_string());
        }
        Ok(NewDistributionSetType {
            key,
            name,
            description: None,
            mandatory_module_types,
            optional_module_types,
        })
    }

    pub fn into_distribution_set_type(
        self,
        tenant: &str,
        actor: &str,
        now: DateTime<Utc>,
    ) -> DistributionSetType {
        DistributionSetType {
            id: 0,
            tenant: tenant.to_string(),
            version: 0,
            created_at: now,
            created_by: actor.to_string(),
            last_modified_at: now,
            last_modified_by: actor.to_string(),
            key: self.key,
            name: self.name,
            description: self.description,
            mandatory_module_types: self.mandatory_module_types,
            optional_module_types: self.optional_module_types,
            deleted: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionSet {
    pub id: i64,
    pub tenant: String,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub last_modified_at: DateTime<Utc>,
    pub last_modified_by: String,
    pub name: String,
    /// The set's own version string, unrelated to the optimistic lock `version`.
    pub ds_version: String,
    pub description: Option<String>,
    pub ds_type_id: i64,
    pub modules: BTreeSet<i64>,
    pub tags: BTreeSet<String>,
    pub complete: bool,
    pub locked: bool,
    pub deleted: bool,
    pub invalid: bool,
    pub required_migration_step: bool,
}

impl DistributionSet {
    /// Complete sets that are neither locked, deleted nor invalidated.
    pub fn is_assignable(&self) -> bool {
        self.complete && !self.locked && !self.deleted && !self.invalid
    }

    /// Human readable reason why the set cannot be assigned, if any.
    pub fn unassignable_reason(&self) -> Option<&'static str> {
        if self.deleted {
            Some("is deleted")
        } else if self.invalid {
            Some("is invalidated")
        } else if self.locked {
            Some("is locked")
        } else if !self.complete {
            Some("is incomplete")
        } else {
            None
        }
    }
}

impl Entity for DistributionSet {
    const KIND: EntityKind = EntityKind::DistributionSet;
    const FIELDS: &'static [&'static str] = &[
        "id",
        "createdat",
        "createdby",
        "lastmodifiedat",
        "lastmodifiedby",
        "name",
        "version",
        "description",
        "type.id",
        "module.id",
        "tag",
        "complete",
        "locked",
        "deleted",
        "valid",
    ];

    entity_base!();

    fn field(&self, path: &str) -> Option<Vec<FieldValue>> {
        match path {
            "name" => single(self.name.as_str()),
            "version" => single(self.ds_version.as_str()),
            "description" => single(self.description.clone()),
            "type.id" => single(self.ds_type_id),
            "module.id" => ids(&self.modules),
            "tag" => strings(&self.tags),
            "complete" => single(self.complete),
            "locked" => single(self.locked),
            "deleted" => single(self.deleted),
            "valid" => single(!self.invalid),
            _ => audit_field(
                path,
                self.id,
                self.created_at,
                &self.created_by,
                self.last_modified_at,
                &self.last_modified_by,
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDistributionSet {
    pub name: String,
    pub ds_version: String,
    pub description: Option<String>,
    pub ds_type_id: i64,
    pub modules: BTreeSet<i64>,
    pub tags: BTreeSet<String>,
    pub required_migration_step: bool,
}

impl NewDistributionSet {
    pub fn new(name: String, ds_version: String, ds_type_id: i64) -> Result<Self, String> {
        validate_name("Name", &name, 128)?;
        validate_name("Version", &ds_version, 64)?;
        Ok(NewDistributionSet {
            name,
            ds_version,
            description: None,
            ds_type_id,
            modules: BTreeSet::new(),
            tags: BTreeSet::new(),
            required_migration_step: false,
        })
    }

    pub fn with_modules(mut self, module_ids: impl IntoIterator<Item = i64>) -> Self {
        self.modules.extend(module_ids);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Builds the unsaved entity. Completeness is computed by the caller once
    /// module types are resolved.
    pub fn into_distribution_set(
        self,
        tenant: &str,
        actor: &str,
        now: DateTime<Utc>,
    ) -> DistributionSet {
        DistributionSet {
            id: 0,
            tenant: tenant.to_string(),
            version: 0,
            created_at: now,
            created_by: actor.to_string(),
            last_modified_at: now,
            last_modified_by: actor.to_string(),
            name: self.name,
            ds_version: self.ds_version,
            description: self.description,
            ds_type_id: self.ds_type_id,
            modules: self.modules,
            tags: self.tags,
            complete: false,
            locked: false,
            deleted: false,
            invalid: false,
            required_migration_step: self.required_migration_step,
        }
    }
}

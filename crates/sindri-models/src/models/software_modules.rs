/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Software modules and their types.
//!
//! A module has exactly one type. Once a distribution set containing the
//! module has been assigned to a target the module is `locked` and no longer
//! editable.

use super::{audit_field, entity_base, single, validate_name, Entity, EntityKind, FieldValue};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoftwareModuleType {
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
    /// How many modules of this type a single distribution set may hold.
    pub max_assignments: u32,
    pub deleted: bool,
}

impl Entity for SoftwareModuleType {
    const KIND: EntityKind = EntityKind::SoftwareModuleType;
    const FIELDS: &'static [&'static str] = &[
        "id",
        "createdat",
        "createdby",
        "lastmodifiedat",
        "lastmodifiedby",
        "key",
        "name",
        "description",
        "maxassignments",
        "deleted",
    ];

    entity_base!();

    fn field(&self, path: &str) -> Option<Vec<FieldValue>> {
        match path {
            "key" => single(self.key.as_str()),
            "name" => single(self.name.as_str()),
            "description" => single(self.description.clone()),
            "maxassignments" => single(i64::from(self.max_assignments)),
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
pub struct NewSoftwareModuleType {
    pub key: String,
    pub name: String,
    pub description: Option<String>,
    pub max_assignments: u32,
}

impl NewSoftwareModuleType {
    pub fn new(key: String, name: String, max_assignments: Option<u32>) -> Result<Self, String> {
        validate_name("Key", &key, 64)?;
        validate_name("Name", &name, 64)?;
        let max_assignments = max_assignments.unwrap_or(1);
        if max_assignments == 0 {
            return Err("Max assignments must be at least 1".to_string());
        }
        Ok(NewSoftwareModuleType {
            key,
            name,
            description: None,
            max_assignments,
        })
    }

    pub fn into_software_module_type(
        self,
        tenant: &str,
        actor: &str,
        now: DateTime<Utc>,
    ) -> SoftwareModuleType {
        SoftwareModuleType {
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
            max_assignments: self.max_assignments,
            deleted: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoftwareModule {
    pub id: i64,
    pub tenant: String,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub last_modified_at: DateTime<Utc>,
    pub last_modified_by: String,
    pub name: String,
    /// The module's own version string, unrelated to the optimistic lock `version`.
    pub module_version: String,
    pub vendor: Option<String>,
    pub description: Option<String>,
    pub sm_type_id: i64,
    pub encrypted: bool,
    pub locked: bool,
    pub deleted: bool,
}

impl Entity for SoftwareModule {
    const KIND: EntityKind = EntityKind::SoftwareModule;
    const FIELDS: &'static [&'static str] = &[
        "id",
        "createdat",
        "createdby",
        "lastmodifiedat",
        "lastmodifiedby",
        "name",
        "version",
        "vendor",
        "description",
        "type.id",
        "locked",
        "deleted",
    ];

    entity_base!();

    fn field(&self, path: &str) -> Option<Vec<FieldValue>> {
        match path {
            "name" => single(self.name.as_str()),
            "version" => single(self.module_version.as_str()),
            "vendor" => single(self.vendor.clone()),
            "description" => single(self.description.clone()),
            "type.id" => single(self.sm_type_id),
            "locked" => single(self.locked),
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
pub struct NewSoftwareModule {
    pub name: String,
    pub module_version: String,
    pub vendor: Option<String>,
    pub description: Option<String>,
    pub sm_type_id: i64,
    pub encrypted: bool,
}

impl NewSoftwareModule {
    pub fn new(name: String, module_version: String, sm_type_id: i64) -> Result<Self, String> {
        validate_name("Name", &name, 128)?;
        validate_name("Version", &module_version, 64)?;
        Ok(NewSoftwareModule {
            name,
            module_version,
            vendor: None,
            description: None,
            sm_type_id,
            encrypted: false,
        })
    }

    pub fn with_vendor(mut self, vendor: impl Into<String>) -> Self {
        self.vendor = Some(vendor.into());
        self
    }

    pub fn into_software_module(self, tenant: &str, actor: &str, now: DateTime<Utc>) -> SoftwareModule {
        SoftwareModule {
            id: 0,
            tenant: tenant.to_string(),
            version: 0,
            created_at: now,
            created_by: actor.to_string(),
            last_modified_at: now,
            last_modified_by: actor.to_string(),
            name: self.name,
            module_version: self.module_version,
            vendor: self.vendor,
            description: self.description,
            sm_type_id: self.sm_type_id,
            encrypted: self.encrypted,
            locked: false,
            deleted: false,
        }
    }
}

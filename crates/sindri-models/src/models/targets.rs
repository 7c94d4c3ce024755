/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Targets
//!
//! A target is a managed device. It is identified externally by its
//! `controller_id` and internally by the numeric `id`.
//!
//! ## Update status lifecycle
//!
//! - `UNKNOWN`: created through management, never contacted
//! - `REGISTERED`: the controller has polled at least once
//! - `PENDING`: an action is active
//! - `IN_SYNC`: the last action finished and nothing else is active
//! - `ERROR`: the last closed action failed

use super::{
    audit_field, entity_base, single, strings, validate_name, Entity, EntityKind, FieldValue,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Maximum length of a controller id.
pub const CONTROLLER_ID_MAX_LEN: usize = 256;

/// Deployment status of a target as last reported or derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetUpdateStatus {
    Unknown,
    Registered,
    Pending,
    InSync,
    Error,
}

impl TargetUpdateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetUpdateStatus::Unknown => "UNKNOWN",
            TargetUpdateStatus::Registered => "REGISTERED",
            TargetUpdateStatus::Pending => "PENDING",
            TargetUpdateStatus::InSync => "IN_SYNC",
            TargetUpdateStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for TargetUpdateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub id: i64,
    pub tenant: String,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub last_modified_at: DateTime<Utc>,
    pub last_modified_by: String,
    pub controller_id: String,
    pub name: String,
    pub description: Option<String>,
    pub target_type_id: Option<i64>,
    pub update_status: TargetUpdateStatus,
    pub tags: BTreeSet<String>,
    pub attributes: BTreeMap<String, String>,
    pub last_controller_request_at: Option<DateTime<Utc>>,
    pub assigned_distribution_set_id: Option<i64>,
    pub installed_distribution_set_id: Option<i64>,
    pub installed_at: Option<DateTime<Utc>>,
    /// Serialized caller context of the creator, if created by a user.
    pub access_context: Option<String>,
}

impl Entity for Target {
    const KIND: EntityKind = EntityKind::Target;
    const FIELDS: &'static [&'static str] = &[
        "id",
        "createdat",
        "createdby",
        "lastmodifiedat",
        "lastmodifiedby",
        "controllerid",
        "name",
        "description",
        "updatestatus",
        "type.id",
        "tag",
        "attribute.*",
        "lastcontrollerrequestat",
        "assignedds.id",
        "installedds.id",
        "installedat",
    ];

    entity_base!();

    fn field(&self, path: &str) -> Option<Vec<FieldValue>> {
        if let Some(key) = path.strip_prefix("attribute.") {
            let value = self
                .attributes
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| FieldValue::Str(v.clone()))
                .unwrap_or(FieldValue::Null);
            return Some(vec![value]);
        }
        match path {
            "controllerid" => single(self.controller_id.as_str()),
            "name" => single(self.name.as_str()),
            "description" => single(self.description.clone()),
            "updatestatus" => single(self.update_status.as_str()),
            "type.id" => single(self.target_type_id),
            "tag" => strings(&self.tags),
            "lastcontrollerrequestat" => single(self.last_controller_request_at),
            "assignedds.id" => single(self.assigned_distribution_set_id),
            "installedds.id" => single(self.installed_distribution_set_id),
            "installedat" => single(self.installed_at),
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

impl Target {
    /// Whether the target may receive a set of the given distribution set type.
    ///
    /// Untyped targets accept every set.
    pub fn accepts(&self, compatible_ds_types: Option<&BTreeSet<i64>>, ds_type_id: i64) -> bool {
        match (self.target_type_id, compatible_ds_types) {
            (None, _) => true,
            (Some(_), Some(compatible)) => compatible.contains(&ds_type_id),
            (Some(_), None) => false,
        }
    }
}

/// Input for creating a target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTarget {
    pub controller_id: String,
    pub name: String,
    pub description: Option<String>,
    pub target_type_id: Option<i64>,
    pub tags: BTreeSet<String>,
    pub attributes: BTreeMap<String, String>,
}

impl NewTarget {
    /// Validates the controller id. The name defaults to the controller id.
    pub fn new(controller_id: String, name: Option<String>) -> Result<Self, String> {
        validate_name("Controller id", &controller_id, CONTROLLER_ID_MAX_LEN)?;
        if controller_id.chars().any(char::is_whitespace) {
            return Err("Controller id cannot contain whitespace".to_string());
        }
        let name = name.unwrap_or_else(|| controller_id.clone());
        validate_name("Name", &name, 128)?;

        Ok(NewTarget {
            controller_id,
            name,
            description: None,
            target_type_id: None,
            tags: BTreeSet::new(),
            attributes: BTreeMap::new(),
        })
    }

    pub fn with_type(mut self, target_type_id: i64) -> Self {
        self.target_type_id = Some(target_type_id);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
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

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Builds the unsaved entity; the store assigns `id` and `version`.
    pub fn into_target(self, tenant: &str, actor: &str, now: DateTime<Utc>) -> Target {
        Target {
            id: 0,
            tenant: tenant.to_string(),
            version: 0,
            created_at: now,
            created_by: actor.to_string(),
            last_modified_at: now,
            last_modified_by: actor.to_string(),
            controller_id: self.controller_id,
            name: self.name,
            description: self.description,
            target_type_id: self.target_type_id,
            update_status: TargetUpdateStatus::Unknown,
            tags: self.tags,
            attributes: self.attributes,
            last_controller_request_at: None,
            assigned_distribution_set_id: None,
            installed_distribution_set_id: None,
            installed_at: None,
            access_context: None,
        }
    }
}

/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Target types restrict which distribution set types a target accepts.

use super::{
    audit_field, entity_base, ids, single, validate_name, Entity, EntityKind, FieldValue,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetType {
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
    pub colour: Option<String>,
    pub compatible_ds_types: BTreeSet<i64>,
    pub deleted: bool,
}

impl Entity for TargetType {
    const KIND: EntityKind = EntityKind::TargetType;
    const FIELDS: &'static [&'static str] = &[
        "id",
        "createdat",
        "createdby",
        "lastmodifiedat",
        "lastmodifiedby",
        "key",
        "name",
        "description",
        "colour",
        "dstype.id",
        "deleted",
    ];

    entity_base!();

    fn field(&self, path: &str) -> Option<Vec<FieldValue>> {
        match path {
            "key" => single(self.key.as_str()),
            "name" => single(self.name.as_str()),
            "description" => single(self.description.clone()),
            "colour" => single(self.colour.clone()),
            "dstype.id" => ids(&self.compatible_ds_types),
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
pub struct NewTargetType {
    pub key: String,
    pub name: String,
    pub description: Option<String>,
    pub colour: Option<String>,
    pub compatible_ds_types: BTreeSet<i64>,
}

impl NewTargetType {
    pub fn new(key: String, name: String) -> Result<Self, String> {
        validate_name("Key", &key, 64)?;
        validate_name("Name", &name, 64)?;
        Ok(NewTargetType {
            key,
            name,
            description: None,
            colour: None,
            compatible_ds_types: BTreeSet::new(),
        })
    }

    pub fn with_compatible(mut self, ds_type_ids: impl IntoIterator<Item = i64>) -> Self {
        self.compatible_ds_types.extend(ds_type_ids);
        self
    }

    pub fn into_target_type(self, tenant: &str, actor: &str, now: DateTime<Utc>) -> TargetType {
        TargetType {
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
            colour: self.colour,
            compatible_ds_types: self.compatible_ds_types,
            deleted: false,
        }
    }
}

/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Stored target filter queries, optionally bound to a distribution set for
//! automatic assignment.

use super::{
    audit_field, entity_base, single, validate_name, ActionType, Entity, EntityKind, FieldValue,
    MAX_WEIGHT,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum length of a stored query.
pub const QUERY_MAX_LEN: usize = 1024;

/// The distribution set and assignment options used for auto-assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoAssignBinding {
    pub distribution_set_id: i64,
    pub action_type: ActionType,
    pub weight: Option<u16>,
    pub confirmation_required: bool,
}

impl AutoAssignBinding {
    pub fn new(
        distribution_set_id: i64,
        action_type: ActionType,
        weight: Option<u16>,
        confirmation_required: bool,
    ) -> Result<Self, String> {
        if action_type == ActionType::TimeForced {
            return Err("Auto-assignment does not support TIMEFORCED actions".to_string());
        }
        if weight.map(|w| w > MAX_WEIGHT).unwrap_or(false) {
            return Err(format!("Weight cannot exceed {}", MAX_WEIGHT));
        }
        Ok(AutoAssignBinding {
            distribution_set_id,
            action_type,
            weight,
            confirmation_required,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetFilterQuery {
    pub id: i64,
    pub tenant: String,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub last_modified_at: DateTime<Utc>,
    pub last_modified_by: String,
    pub name: String,
    pub query: String,
    pub auto_assign: Option<AutoAssignBinding>,
    /// Serialized caller context captured when the binding was last set.
    pub access_context: Option<String>,
}

impl Entity for TargetFilterQuery {
    const KIND: EntityKind = EntityKind::TargetFilterQuery;
    const FIELDS: &'static [&'static str] = &[
        "id",
        "createdat",
        "createdby",
        "lastmodifiedat",
        "lastmodifiedby",
        "name",
        "query",
        "autoassignds.id",
    ];

    entity_base!();

    fn field(&self, path: &str) -> Option<Vec<FieldValue>> {
        match path {
            "name" => single(self.name.as_str()),
            "query" => single(self.query.as_str()),
            "autoassignds.id" => single(self.auto_assign.as_ref().map(|b| b.distribution_set_id)),
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
pub struct NewTargetFilterQuery {
    pub name: String,
    pub query: String,
    pub auto_assign: Option<AutoAssignBinding>,
}

impl NewTargetFilterQuery {
    pub fn new(name: String, query: String) -> Result<Self, String> {
        validate_name("Name", &name, 128)?;
        validate_name("Query", &query, QUERY_MAX_LEN)?;
        Ok(NewTargetFilterQuery {
            name,
            query,
            auto_assign: None,
        })
    }

    pub fn with_auto_assign(mut self, binding: AutoAssignBinding) -> Self {
        self.auto_assign = Some(binding);
        self
    }

    pub fn into_target_filter_query(
        self,
        tenant: &str,
        actor: &str,
        now: DateTime<Utc>,
    ) -> TargetFilterQuery {
        TargetFilterQuery {
            id: 0,
            tenant: tenant.to_string(),
            version: 0,
            created_at: now,
            created_by: actor.to_string(),
            last_modified_at: now,
            last_modified_by: actor.to_string(),
            name: self.name,
            query: self.query,
            auto_assign: self.auto_assign,
            access_context: None,
        }
    }
}

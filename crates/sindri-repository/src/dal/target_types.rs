/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Data Access Layer for TargetType operations.

use crate::acm::Operation;
use crate::context::CallerContext;
use crate::dal::{ensure_unique, DAL};
use crate::errors::{RepositoryError, Result};
use crate::ql::{parse_for, Predicate};
use crate::store::{Page, Pageable};
use sindri_models::models::{Entity, EntityKind, NewTargetType, TargetType};
use sindri_utils::logging::prelude::*;

/// Data Access Layer for TargetType operations.
pub struct TargetTypesDAL<'a> {
    pub dal: &'a DAL,
    pub ctx: &'a CallerContext,
}

impl<'a> TargetTypesDAL<'a> {
    /// Creates a target type; `key` and `name` must be unused and every
    /// compatible distribution set type visible.
    pub fn create(&self, new_type: NewTargetType) -> Result<TargetType> {
        let tenant = self.ctx.tenant();
        ensure_unique(&self.dal.store.target_types, tenant, "key", &new_type.key, None)?;
        ensure_unique(&self.dal.store.target_types, tenant, "name", &new_type.name, None)?;
        for ds_type_id in &new_type.compatible_ds_types {
            self.visible_ds_type(*ds_type_id)?;
        }
        let target_type =
            new_type.into_target_type(tenant, self.ctx.principal(), self.dal.now());
        let target_type = self.dal.acm.target_types.create(self.ctx, target_type)?;
        info!("Created target type {} ({})", target_type.key, target_type.id);
        Ok(target_type)
    }

    pub fn get(&self, target_type_id: i64) -> Result<TargetType> {
        self.dal
            .acm
            .target_types
            .get_for(self.ctx, Operation::Read, target_type_id)
    }

    pub fn find(&self, query: Option<&str>, page: &Pageable) -> Result<Page<TargetType>> {
        let predicate = match query {
            Some(q) => parse_for::<TargetType>(q)?,
            None => Predicate::True,
        };
        self.dal
            .acm
            .target_types
            .find(self.ctx, Operation::Read, predicate, page)
    }

    pub fn update(
        &self,
        target_type_id: i64,
        name: Option<String>,
        description: Option<String>,
        colour: Option<String>,
    ) -> Result<TargetType> {
        if let Some(name) = &name {
            ensure_unique(
                &self.dal.store.target_types,
                self.ctx.tenant(),
                "name",
                name,
                Some(target_type_id),
            )?;
        }
        self.modify(target_type_id, |target_type| {
            if let Some(name) = name {
                target_type.name = name;
            }
            if description.is_some() {
                target_type.description = description;
            }
            if colour.is_some() {
                target_type.colour = colour;
            }
        })
    }

    pub fn add_compatible(&self, target_type_id: i64, ds_type_ids: &[i64]) -> Result<TargetType> {
        for ds_type_id in ds_type_ids {
            self.visible_ds_type(*ds_type_id)?;
        }
        self.modify(target_type_id, |target_type| {
            target_type.compatible_ds_types.extend(ds_type_ids.iter().copied());
        })
    }

    pub fn remove_compatible(&self, target_type_id: i64, ds_type_id: i64) -> Result<TargetType> {
        self.modify(target_type_id, |target_type| {
            target_type.compatible_ds_types.remove(&ds_type_id);
        })
    }

    /// Deletes a target type, keeping it flagged as deleted while targets use it.
    pub fn delete(&self, target_type_id: i64) -> Result<()> {
        let target_type = self
            .dal
            .acm
            .target_types
            .get_for(self.ctx, Operation::Delete, target_type_id)?;
        let in_use = self
            .dal
            .store
            .targets
            .count(self.ctx.tenant(), &Predicate::equals("type.id", target_type_id))?;
        if in_use > 0 {
            debug!(
                "Target type {} is used by {} target(s), marking deleted",
                target_type.key, in_use
            );
            let mut target_type = target_type;
            target_type.deleted = true;
            target_type.touch(self.ctx.principal(), self.dal.now());
            self.dal.acm.target_types.update(self.ctx, target_type)?;
        } else {
            self.dal.acm.target_types.delete(self.ctx, target_type_id)?;
        }
        Ok(())
    }

    fn modify<F>(&self, target_type_id: i64, change: F) -> Result<TargetType>
    where
        F: FnOnce(&mut TargetType),
    {
        let mut target_type = self
            .dal
            .acm
            .target_types
            .get_for(self.ctx, Operation::Update, target_type_id)?;
        if target_type.deleted {
            return Err(RepositoryError::InvalidState(format!(
                "Target type {} is deleted",
                target_type.key
            )));
        }
        change(&mut target_type);
        target_type.touch(self.ctx.principal(), self.dal.now());
        self.dal.acm.target_types.update(self.ctx, target_type)
    }

    fn visible_ds_type(&self, ds_type_id: i64) -> Result<()> {
        self.dal
            .acm
            .distribution_set_types
            .get(self.ctx, ds_type_id)?
            .map(|_| ())
            .ok_or_else(|| RepositoryError::not_found(EntityKind::DistributionSetType, ds_type_id))
    }
}

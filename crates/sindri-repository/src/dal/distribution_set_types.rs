/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Data Access Layer for DistributionSetType operations.

use crate::acm::Operation;
use crate::context::CallerContext;
use crate::dal::{ensure_unique, DAL};
use crate::errors::{RepositoryError, Result};
use crate::ql::{parse_for, Predicate};
use crate::store::{Page, Pageable};
use sindri_models::models::{DistributionSetType, Entity, EntityKind, NewDistributionSetType};
use sindri_utils::logging::prelude::*;

/// Data Access Layer for DistributionSetType operations.
pub struct DistributionSetTypesDAL<'a> {
    pub dal: &'a DAL,
    pub ctx: &'a CallerContext,
}

impl<'a> DistributionSetTypesDAL<'a> {
    pub fn create(&self, new_type: NewDistributionSetType) -> Result<DistributionSetType> {
        let tenant = self.ctx.tenant();
        let repository = &self.dal.store.distribution_set_types;
        ensure_unique(repository, tenant, "key", &new_type.key, None)?;
        ensure_unique(repository, tenant, "name", &new_type.name, None)?;
        for sm_type_id in new_type
            .mandatory_module_types
            .iter()
            .chain(new_type.optional_module_types.iter())
        {
            self.visible_module_type(*sm_type_id)?;
        }
        let ds_type =
            new_type.into_distribution_set_type(tenant, self.ctx.principal(), self.dal.now());
        let ds_type = self.dal.acm.distribution_set_types.create(self.ctx, ds_type)?;
        info!("Created distribution set type {} ({})", ds_type.key, ds_type.id);
        Ok(ds_type)
    }

    pub fn get(&self, ds_type_id: i64) -> Result<DistributionSetType> {
        self.dal
            .acm
            .distribution_set_types
            .get_for(self.ctx, Operation::Read, ds_type_id)
    }

    pub fn find(
        &self,
        query: Option<&str>,
        page: &Pageable,
    ) -> Result<Page<DistributionSetType>> {
        let predicate = match query {
            Some(q) => parse_for::<DistributionSetType>(q)?,
            None => Predicate::True,
        };
        self.dal
            .acm
            .distribution_set_types
            .find(self.ctx, Operation::Read, predicate, page)
    }

    pub fn update(
        &self,
        ds_type_id: i64,
        name: Option<String>,
        description: Option<String>,
    ) -> Result<DistributionSetType> {
        let mut ds_type = self.load_for_update(ds_type_id)?;
        if let Some(name) = name {
            ensure_unique(
                &self.dal.store.distribution_set_types,
                self.ctx.tenant(),
                "name",
                &name,
                Some(ds_type_id),
            )?;
            ds_type.name = name;
        }
        if description.is_some() {
            ds_type.description = description;
        }
        ds_type.touch(self.ctx.principal(), self.dal.now());
        self.dal.acm.distribution_set_types.update(self.ctx, ds_type)
    }

    /// Extends the module type lists. Types already used by distribution sets
    /// are frozen.
    pub fn add_module_types(
        &self,
        ds_type_id: i64,
        mandatory: &[i64],
        optional: &[i64],
    ) -> Result<DistributionSetType> {
        let mut ds_type = self.load_for_update(ds_type_id)?;
        let in_use = self
            .dal
            .store
            .distribution_sets
            .count(self.ctx.tenant(), &Predicate::equals("type.id", ds_type_id))?;
        if in_use > 0 {
            return Err(RepositoryError::Conflict(format!(
                "Distribution set type {} is used by {} distribution set(s)",
                ds_type.key, in_use
            )));
        }
        for sm_type_id in mandatory.iter().chain(optional) {
            self.visible_module_type(*sm_type_id)?;
        }
        ds_type.mandatory_module_types.extend(mandatory.iter().copied());
        for sm_type_id in optional {
            if !ds_type.mandatory_module_types.contains(sm_type_id) {
                ds_type.optional_module_types.insert(*sm_type_id);
            }
        }
        for sm_type_id in mandatory {
            ds_type.optional_module_types.remove(sm_type_id);
        }
        ds_type.touch(self.ctx.principal(), self.dal.now());
        self.dal.acm.distribution_set_types.update(self.ctx, ds_type)
    }

    /// Deletes a type, keeping it flagged as deleted while sets use it.
    pub fn delete(&self, ds_type_id: i64) -> Result<()> {
        let mut ds_type = self
            .dal
            .acm
            .distribution_set_types
            .get_for(self.ctx, Operation::Delete, ds_type_id)?;
        let in_use = self
            .dal
            .store
            .distribution_sets
            .count(self.ctx.tenant(), &Predicate::equals("type.id", ds_type_id))?;
        if in_use > 0 {
            ds_type.deleted = true;
            ds_type.touch(self.ctx.principal(), self.dal.now());
            self.dal.acm.distribution_set_types.update(self.ctx, ds_type)?;
        } else {
            self.dal.acm.distribution_set_types.delete(self.ctx, ds_type_id)?;
        }
        Ok(())
    }

    fn load_for_update(&self, ds_type_id: i64) -> Result<DistributionSetType> {
        let ds_type = self
            .dal
            .acm
            .distribution_set_types
            .get_for(self.ctx, Operation::Update, ds_type_id)?;
        if ds_type.deleted {
            return Err(RepositoryError::InvalidState(format!(
                "Distribution set type {} is deleted",
                ds_type.key
            )));
        }
        Ok(ds_type)
    }

    fn visible_module_type(&self, sm_type_id: i64) -> Result<()> {
        self.dal
            .acm
            .software_module_types
            .get(self.ctx, sm_type_id)?
            .map(|_| ())
            .ok_or_else(|| RepositoryError::not_found(EntityKind::SoftwareModuleType, sm_type_id))
    }
}

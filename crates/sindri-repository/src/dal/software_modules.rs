/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Data Access Layer for SoftwareModule and SoftwareModuleType operations.
//!
//! Both are soft-deleted while referenced: a module type stays as long as
//! modules of the type exist, a module as long as a distribution set holds it.

use crate::acm::Operation;
use crate::context::CallerContext;
use crate::dal::{ensure_unique, DAL};
use crate::errors::{RepositoryError, Result};
use crate::ql::{parse_for, Predicate};
use crate::store::{Page, Pageable};
use sindri_models::models::{
    Entity, EntityKind, NewSoftwareModule, NewSoftwareModuleType, SoftwareModule, SoftwareModuleType,
};
use sindri_utils::logging::prelude::*;

/// Data Access Layer for SoftwareModuleType operations.
pub struct SoftwareModuleTypesDAL<'a> {
    pub dal: &'a DAL,
    pub ctx: &'a CallerContext,
}

impl<'a> SoftwareModuleTypesDAL<'a> {
    pub fn create(&self, new_type: NewSoftwareModuleType) -> Result<SoftwareModuleType> {
        let tenant = self.ctx.tenant();
        let repository = &self.dal.store.software_module_types;
        ensure_unique(repository, tenant, "key", &new_type.key, None)?;
        ensure_unique(repository, tenant, "name", &new_type.name, None)?;
        let sm_type =
            new_type.into_software_module_type(tenant, self.ctx.principal(), self.dal.now());
        let sm_type = self.dal.acm.software_module_types.create(self.ctx, sm_type)?;
        info!("Created software module type {} ({})", sm_type.key, sm_type.id);
        Ok(sm_type)
    }

    pub fn get(&self, sm_type_id: i64) -> Result<SoftwareModuleType> {
        self.dal
            .acm
            .software_module_types
            .get_for(self.ctx, Operation::Read, sm_type_id)
    }

    pub fn find(&self, query: Option<&str>, page: &Pageable) -> Result<Page<SoftwareModuleType>> {
        let predicate = match query {
            Some(q) => parse_for::<SoftwareModuleType>(q)?,
            None => Predicate::True,
        };
        self.dal
            .acm
            .software_module_types
            .find(self.ctx, Operation::Read, predicate, page)
    }

    pub fn delete(&self, sm_type_id: i64) -> Result<()> {
        let mut sm_type = self
            .dal
            .acm
            .software_module_types
            .get_for(self.ctx, Operation::Delete, sm_type_id)?;
        let in_use = self
            .dal
            .store
            .software_modules
            .count(self.ctx.tenant(), &Predicate::equals("type.id", sm_type_id))?;
        if in_use > 0 {
            sm_type.deleted = true;
            sm_type.touch(self.ctx.principal(), self.dal.now());
            self.dal.acm.software_module_types.update(self.ctx, sm_type)?;
        } else {
            self.dal.acm.software_module_types.delete(self.ctx, sm_type_id)?;
        }
        Ok(())
    }
}

/// Data Access Layer for SoftwareModule operations.
pub struct SoftwareModulesDAL<'a> {
    pub dal: &'a DAL,
    pub ctx: &'a CallerContext,
}

impl<'a> SoftwareModulesDAL<'a> {
    /// Creates a module of a visible, not deleted module type.
    ///
    /// Name, version and type together must be unused.
    pub fn create(&self, new_module: NewSoftwareModule) -> Result<SoftwareModule> {
        let sm_type = self
            .dal
            .acm
            .software_module_types
            .get(self.ctx, new_module.sm_type_id)?
            .ok_or_else(|| {
                RepositoryError::not_found(EntityKind::SoftwareModuleType, new_module.sm_type_id)
            })?;
        if sm_type.deleted {
            return Err(RepositoryError::Conflict(format!(
                "Software module type {} is deleted",
                sm_type.key
            )));
        }

        let duplicate = self
            .dal
            .store
            .software_modules
            .find_all(self.ctx.tenant(), &Predicate::equals("type.id", sm_type.id))?
            .into_iter()
            .any(|m| m.name == new_module.name && m.module_version == new_module.module_version);
        if duplicate {
            return Err(RepositoryError::Conflict(format!(
                "Software module {}:{} of type {} already exists",
                new_module.name, new_module.module_version, sm_type.key
            )));
        }

        let module =
            new_module.into_software_module(self.ctx.tenant(), self.ctx.principal(), self.dal.now());
        let module = self.dal.acm.software_modules.create(self.ctx, module)?;
        info!(
            "Created software module {}:{} ({})",
            module.name, module.module_version, module.id
        );
        Ok(module)
    }

    pub fn get(&self, module_id: i64) -> Result<SoftwareModule> {
        self.dal
            .acm
            .software_modules
            .get_for(self.ctx, Operation::Read, module_id)
    }

    pub fn find(&self, query: Option<&str>, page: &Pageable) -> Result<Page<SoftwareModule>> {
        let predicate = match query {
            Some(q) => parse_for::<SoftwareModule>(q)?,
            None => Predicate::True,
        };
        self.dal
            .acm
            .software_modules
            .find(self.ctx, Operation::Read, predicate, page)
    }

    /// Updates descriptive metadata; allowed on locked modules too.
    pub fn update(
        &self,
        module_id: i64,
        vendor: Option<String>,
        description: Option<String>,
    ) -> Result<SoftwareModule> {
        let mut module = self
            .dal
            .acm
            .software_modules
            .get_for(self.ctx, Operation::Update, module_id)?;
        if module.deleted {
            return Err(RepositoryError::InvalidState(format!(
                "Software module {} is deleted",
                module_id
            )));
        }
        if vendor.is_some() {
            module.vendor = vendor;
        }
        if description.is_some() {
            module.description = description;
        }
        module.touch(self.ctx.principal(), self.dal.now());
        self.dal.acm.software_modules.update(self.ctx, module)
    }

    pub fn delete(&self, module_id: i64) -> Result<()> {
        let mut module = self
            .dal
            .acm
            .software_modules
            .get_for(self.ctx, Operation::Delete, module_id)?;
        let in_use = self
            .dal
            .store
            .distribution_sets
            .count(self.ctx.tenant(), &Predicate::equals("module.id", module_id))?;
        if in_use > 0 {
            debug!(
                "Software module {} is part of {} distribution set(s), marking deleted",
                module_id, in_use
            );
            module.deleted = true;
            module.touch(self.ctx.principal(), self.dal.now());
            self.dal.acm.software_modules.update(self.ctx, module)?;
        } else {
            self.dal.acm.software_modules.delete(self.ctx, module_id)?;
        }
        Ok(())
    }
}

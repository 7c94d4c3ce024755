/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Data Access Layer for Target operations.
//!
//! Targets are created either by management calls or on first contact of
//! their controller. Every read and write goes through the target access
//! controller, so callers only ever see and change targets within their scope.

use crate::acm::Operation;
use crate::context::CallerContext;
use crate::dal::DAL;
use crate::errors::{RepositoryError, Result};
use crate::ql::{parse_for, Predicate};
use crate::store::{Page, Pageable};
use chrono::{DateTime, Utc};
use sindri_models::models::{Entity, EntityKind, NewTarget, Target, TargetUpdateStatus};
use sindri_utils::logging::prelude::*;
use std::collections::BTreeMap;

/// Targets changed by [`TargetsDAL::toggle_tag`].
#[derive(Debug, Clone, PartialEq)]
pub struct TagToggleResult {
    pub assigned: Vec<Target>,
    pub unassigned: Vec<Target>,
}

/// Data Access Layer for Target operations.
pub struct TargetsDAL<'a> {
    /// Reference to the main DAL instance.
    pub dal: &'a DAL,
    pub ctx: &'a CallerContext,
}

impl<'a> TargetsDAL<'a> {
    /// Creates a new target.
    ///
    /// # Arguments
    ///
    /// * `new_target` - The validated target input.
    ///
    /// # Returns
    ///
    /// The stored target with status UNKNOWN, or `Conflict` when the
    /// controller id is taken and `NotFound` when the target type is not
    /// visible to the caller.
    pub fn create(&self, new_target: NewTarget) -> Result<Target> {
        self.create_with_status(new_target, TargetUpdateStatus::Unknown, None)
    }

    fn create_with_status(
        &self,
        new_target: NewTarget,
        status: TargetUpdateStatus,
        last_request: Option<DateTime<Utc>>,
    ) -> Result<Target> {
        if self.find_by_controller_id_unchecked(&new_target.controller_id)?.is_some() {
            return Err(RepositoryError::Conflict(format!(
                "Target with controller id {} already exists",
                new_target.controller_id
            )));
        }
        if let Some(type_id) = new_target.target_type_id {
            self.assignable_type(type_id)?;
        }

        let now = self.dal.now();
        let mut target = new_target.into_target(self.ctx.tenant(), self.ctx.principal(), now);
        target.update_status = status;
        target.last_controller_request_at = last_request;
        if !self.ctx.is_system() {
            target.access_context = Some(self.ctx.capture()?);
        }
        let target = self.dal.acm.targets.create(self.ctx, target)?;
        info!(
            "Created target {} ({}) in tenant {}",
            target.controller_id, target.id, target.tenant
        );
        Ok(target)
    }

    /// Records a controller poll, creating the target in REGISTERED on first contact.
    pub fn register_controller(&self, controller_id: &str) -> Result<Target> {
        let now = self.dal.now();
        match self.find_by_controller_id_unchecked(controller_id)? {
            Some(existing) => {
                let mut target =
                    self.dal
                        .acm
                        .targets
                        .get_for(self.ctx, Operation::Update, existing.id)?;
                target.last_controller_request_at = Some(now);
                if target.update_status == TargetUpdateStatus::Unknown {
                    target.update_status = TargetUpdateStatus::Registered;
                }
                target.touch(self.ctx.principal(), now);
                self.dal.acm.targets.update(self.ctx, target)
            }
            None => {
                let new_target = NewTarget::new(controller_id.to_string(), None)?;
                self.create_with_status(new_target, TargetUpdateStatus::Registered, Some(now))
            }
        }
    }

    /// Retrieves a target by id.
    pub fn get(&self, target_id: i64) -> Result<Target> {
        self.dal.acm.targets.get_for(self.ctx, Operation::Read, target_id)
    }

    pub fn get_by_controller_id(&self, controller_id: &str) -> Result<Target> {
        let candidates = self.dal.acm.targets.find_all(
            self.ctx,
            Operation::Read,
            Predicate::equals("controllerid", controller_id),
        )?;
        candidates
            .into_iter()
            .find(|t| t.controller_id == controller_id)
            .ok_or_else(|| RepositoryError::not_found(EntityKind::Target, controller_id))
    }

    /// Finds visible targets, optionally filtered by a query such as `tag==eu;updatestatus==PENDING`.
    pub fn find(&self, query: Option<&str>, page: &Pageable) -> Result<Page<Target>> {
        let predicate = match query {
            Some(q) => parse_for::<Target>(q)?,
            None => Predicate::True,
        };
        self.dal.acm.targets.find(self.ctx, Operation::Read, predicate, page)
    }

    pub fn count(&self, query: Option<&str>) -> Result<usize> {
        let predicate = match query {
            Some(q) => parse_for::<Target>(q)?,
            None => Predicate::True,
        };
        self.dal.acm.targets.count(self.ctx, Operation::Read, predicate)
    }

    pub fn update(
        &self,
        target_id: i64,
        name: Option<String>,
        description: Option<String>,
    ) -> Result<Target> {
        self.modify(target_id, |target| {
            if let Some(name) = name {
                if name.trim().is_empty() {
                    return Err(RepositoryError::Validation("Name cannot be empty".to_string()));
                }
                target.name = name;
            }
            if description.is_some() {
                target.description = description;
            }
            Ok(())
        })
    }

    /// Merges controller reported attributes into the target's attributes.
    pub fn update_attributes(
        &self,
        target_id: i64,
        attributes: BTreeMap<String, String>,
    ) -> Result<Target> {
        self.modify(target_id, |target| {
            target.attributes.extend(attributes);
            Ok(())
        })
    }

    pub fn assign_type(&self, target_id: i64, target_type_id: i64) -> Result<Target> {
        self.assignable_type(target_type_id)?;
        self.modify(target_id, |target| {
            target.target_type_id = Some(target_type_id);
            Ok(())
        })
    }

    pub fn unassign_type(&self, target_id: i64) -> Result<Target> {
        self.modify(target_id, |target| {
            target.target_type_id = None;
            Ok(())
        })
    }

    /// Adds `tag` to every target; all targets must be updatable.
    pub fn assign_tag(&self, target_ids: &[i64], tag: &str) -> Result<Vec<Target>> {
        let targets = self.load_for_update(target_ids)?;
        self.save_all(targets, |target| {
            target.tags.insert(tag.to_string());
        })
    }

    pub fn unassign_tag(&self, target_ids: &[i64], tag: &str) -> Result<Vec<Target>> {
        let targets = self.load_for_update(target_ids)?;
        self.save_all(targets, |target| {
            target.tags.remove(tag);
        })
    }

    /// Removes `tag` when every target carries it, otherwise adds it to the ones missing it.
    pub fn toggle_tag(&self, target_ids: &[i64], tag: &str) -> Result<TagToggleResult> {
        let targets = self.load_for_update(target_ids)?;
        if targets.iter().all(|t| t.tags.contains(tag)) {
            let unassigned = self.save_all(targets, |target| {
                target.tags.remove(tag);
            })?;
            return Ok(TagToggleResult {
                assigned: Vec::new(),
                unassigned,
            });
        }
        let missing = targets.into_iter().filter(|t| !t.tags.contains(tag)).collect();
        let assigned = self.save_all(missing, |target| {
            target.tags.insert(tag.to_string());
        })?;
        Ok(TagToggleResult {
            assigned,
            unassigned: Vec::new(),
        })
    }

    /// Deletes a target. Targets with actions are kept for their history.
    pub fn delete(&self, target_id: i64) -> Result<()> {
        let target = self.dal.acm.targets.get_for(self.ctx, Operation::Delete, target_id)?;
        let actions = self
            .dal
            .store
            .actions
            .count(self.ctx.tenant(), &Predicate::equals("target.id", target_id))?;
        if actions > 0 {
            return Err(RepositoryError::Conflict(format!(
                "Target {} has {} action(s) and cannot be deleted",
                target.controller_id, actions
            )));
        }
        self.dal.acm.targets.delete(self.ctx, target_id)?;
        info!("Deleted target {} ({})", target.controller_id, target_id);
        Ok(())
    }

    fn find_by_controller_id_unchecked(&self, controller_id: &str) -> Result<Option<Target>> {
        Ok(self
            .dal
            .store
            .targets
            .find_all(self.ctx.tenant(), &Predicate::equals("controllerid", controller_id))?
            .into_iter()
            .find(|t| t.controller_id == controller_id))
    }

    fn assignable_type(&self, target_type_id: i64) -> Result<()> {
        let target_type = self
            .dal
            .acm
            .target_types
            .get(self.ctx, target_type_id)?
            .ok_or_else(|| RepositoryError::not_found(EntityKind::TargetType, target_type_id))?;
        if target_type.deleted {
            return Err(RepositoryError::Conflict(format!(
                "Target type {} is deleted",
                target_type.key
            )));
        }
        Ok(())
    }

    fn modify<F>(&self, target_id: i64, change: F) -> Result<Target>
    where
        F: FnOnce(&mut Target) -> Result<()>,
    {
        let mut target = self
            .dal
            .acm
            .targets
            .get_for(self.ctx, Operation::Update, target_id)?;
        change(&mut target)?;
        target.touch(self.ctx.principal(), self.dal.now());
        self.dal.acm.targets.update(self.ctx, target)
    }

    fn load_for_update(&self, target_ids: &[i64]) -> Result<Vec<Target>> {
        let mut targets = Vec::with_capacity(target_ids.len());
        for id in target_ids {
            let target = self
                .dal
                .store
                .targets
                .get(self.ctx.tenant(), *id)?
                .ok_or_else(|| RepositoryError::not_found(EntityKind::Target, id))?;
            targets.push(target);
        }
        self.dal
            .acm
            .targets
            .assert_operation_allowed(self.ctx, Operation::Update, &targets)?;
        Ok(targets)
    }

    fn save_all<F>(&self, targets: Vec<Target>, mut change: F) -> Result<Vec<Target>>
    where
        F: FnMut(&mut Target),
    {
        let now = self.dal.now();
        targets
            .into_iter()
            .map(|mut target| {
                change(&mut target);
                target.touch(self.ctx.principal(), now);
                self.dal.acm.targets.update(self.ctx, target)
            })
            .collect()
    }
}

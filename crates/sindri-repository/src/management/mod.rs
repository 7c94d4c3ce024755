/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Deployment, rollout and auto-assignment engines.
//!
//! These build on the per-entity DAL accessors and are reached through
//! [`DAL::deployment`](crate::dal::DAL::deployment),
//! [`DAL::rollouts`](crate::dal::DAL::rollouts),
//! [`DAL::rollout_executor`](crate::dal::DAL::rollout_executor) and
//! [`DAL::auto_assign`](crate::dal::DAL::auto_assign).

pub mod auto_assign;
pub mod deployment;
pub mod rollout_executor;
pub mod rollouts;

pub use auto_assign::AutoAssignChecker;
pub use deployment::{AssignmentOptions, AssignmentResult, CancelMode, DeploymentManagement};
pub use rollout_executor::RolloutExecutor;
pub use rollouts::{RolloutGroupStats, RolloutManagement};

/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Sindri Repository
//!
//! The access-controlled repository and rollout engine of Sindri.
//!
//! Every operation runs on behalf of a [`CallerContext`]. Access controllers
//! turn the caller's scoped grants into predicates which are AND-ed onto every
//! read and checked against every write, so a caller never sees or touches an
//! entity outside its scopes. Rollouts and auto-assign bindings capture the
//! context of their author and the schedulers re-enter it, which keeps deferred
//! work inside the same bounds.
//!
//! The [`DAL`] is the entry point:
//!
//! ```rust,ignore
//! let dal = DAL::in_memory(Repository::default());
//! let ctx = CallerContext::user_with("default", "alice", &["READ_TARGET", "UPDATE_TARGET"])?;
//! let result = dal.deployment(&ctx).assign(&[1, 2], ds_id, &AssignmentOptions::default())?;
//! ```

pub mod acm;
pub mod context;
pub mod dal;
pub mod errors;
pub mod management;
pub mod metrics;
pub mod ql;
pub mod scheduler;
pub mod store;
pub mod utils;

pub use context::{CallerContext, Grant};
pub use dal::DAL;
pub use errors::{RepositoryError, Result};
pub use store::{Page, Pageable, Store};

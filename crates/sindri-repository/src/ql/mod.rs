/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Query language used for target filters, rollout groups and permission scopes.

mod parser;
mod predicate;

pub use parser::{parse, parse_for};
pub use predicate::{glob_match, CompareOp, Predicate};

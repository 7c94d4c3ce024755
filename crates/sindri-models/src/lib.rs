/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Sindri Models
//!
//! Entity definitions shared by the Sindri crates. Every entity is owned by a
//! tenant, carries an optimistic lock `version`, and exposes its queryable
//! fields through the [`models::Entity`] trait.

pub mod models;

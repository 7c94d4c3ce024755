/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Clock and event bus shared by the repository components.

pub mod clock;
pub mod event_bus;

pub use clock::{Clock, ManualClock, SystemClock};

//! # parrotdb Configuration Module
//!
//! Two kinds of configuration live here:
//!
//! - [`constants`]: compile-time layout constants with their dependencies
//!   documented and checked by compile-time assertions.
//! - [`overrides`]: the runtime `name.key = value` table that lets a deployment
//!   resize individual pools (`shift`, `atom-size`, `max-atoms`) without a
//!   rebuild.
//!
//! A `Config` is handed to the arena when it is opened, and every pool opened
//! against that arena consults it.

pub mod constants;
pub mod overrides;

pub use constants::*;
pub use overrides::Config;

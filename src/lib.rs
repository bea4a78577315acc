//! pgtrek - PostgreSQL migrations generated from a pgModeler model.
//!
//! The model is compiled into a creation script and applied to one ephemeral
//! cluster; the committed migrations are replayed into another. The schema
//! delta between the two becomes the next numbered migration, and a dump diff
//! of the result is kept in `diff.lock`.
//!
//! # Modules
//!
//! - [`generate`] - End-to-end generation, one-shot or watching the model
//! - [`migrate`] - Migration directory inspection and numbering
//! - [`apply`] - golang-migrate compatible migration runner
//! - [`diff`] - Statement and dump diffing between two clusters
//! - [`pg`] - Ephemeral clusters and connections

pub mod apply;
pub mod change;
pub mod config;
pub mod diff;
pub mod drift;
pub mod generate;
pub mod materialize;
pub mod migrate;
pub mod pg;
pub mod process;
pub mod project;
pub mod template;
pub mod util;

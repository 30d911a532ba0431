//! Domain model structs and DTOs.
//!
//! Each submodule contains a `FromRow` + `Serialize` entity struct
//! matching the database row, plus `Deserialize` DTOs for inserts where
//! a handler or the pipeline creates rows.

pub mod order;
pub mod polling;
pub mod provider;
pub mod task;
pub mod template;
pub mod transition;

//! Request handlers, grouped by surface.

pub mod orders;
pub mod payment;
pub mod print;

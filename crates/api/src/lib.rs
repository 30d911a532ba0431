//! HTTP surface: mini-program order endpoints, payment and print
//! webhooks, health.

pub mod config;
pub mod error;
pub mod handlers;
pub mod response;
pub mod routes;
pub mod state;

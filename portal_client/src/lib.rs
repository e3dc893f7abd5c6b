//! Internal modules for the portal client.
//!
//! This library provides the HTTP backend, configuration loading and command
//! parsing used by the portal_client binary.

pub mod commands;
pub mod config;
pub mod http_api;

// crates/warden-server/src/lib.rs
// Warden - policy guardrails for AI coding agents

#![allow(clippy::too_many_arguments)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

pub mod auth;
pub mod cache;
pub mod cli;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod mcp;
pub mod observability;
pub mod resilience;
pub mod rules;
pub mod session;
pub mod stores;
pub mod web;

pub use error::{Result, WardenError};

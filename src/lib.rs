//! Orchestrator plugin that manages Kubernetes resources as lifecycle nodes.
//!
//! The binary runs exactly one lifecycle operation per invocation: it reads
//! the operation context the orchestrator hands over, performs the operation
//! and prints the properties to persist, or a classified error.

#[macro_use]
extern crate tracing;

#[macro_use]
pub mod internal_events;

pub mod app;
pub mod cli;
pub mod context;
pub mod kubernetes;
pub mod operations;
pub mod remote;
pub mod resources;
pub mod trace;

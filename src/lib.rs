//! # devloop
//!
//! A local service that keeps a catalog of runnable scripts discovered in configured
//! folders, runs them as supervised child processes, and records every execution in a
//! durable history that any number of UI clients can query over HTTP.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

/// A shared flag that asks a long-running operation to stop.
pub type CancellationToken = Arc<AtomicBool>;

pub mod api;
pub mod cli;
pub mod constants;
pub mod core;
pub mod models;
pub mod state;
pub mod system;

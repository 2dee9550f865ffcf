// src/core/mod.rs

pub mod catalog;
pub mod config_manager;
pub mod engine;
pub mod fingerprint;
pub mod history;
pub mod inputs;
pub mod metadata;
pub mod paths;

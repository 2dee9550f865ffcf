//! # System Interaction Layer
//!
//! The boundary between the service and the operating system.
//!
//! ## Modules
//!
//! - **`executor`**: spawns a script interpreter in its own process group, captures its
//!   combined output within a byte limit, and stops the whole group on timeout or
//!   cancellation.
//! - **`editor`**: opens a script in the user's configured editor without waiting for it.

pub mod editor;
pub mod executor;

//! # HTTP Facade
//!
//! Exposes the catalog, history, configuration and execution engine to UI clients.
//!
//! - **`router`**: route table plus the CORS layer.
//! - **`auth`**: optional API key check.
//! - **`error`**: maps every domain error to a status code and a JSON body.
//! - **`handlers`**: one module per resource.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod router;

pub use router::build_router;

//! Guidepost - stepped guided-authoring workflows
//!
//! A workflow module is an ordered list of steps whose availability and
//! completion depend on form data entered in earlier steps. Each module runs
//! inside a [`session::ModuleSession`] that owns its state containers and
//! loads and saves records through a [`persistence::PersistenceGateway`].

pub mod auth;
pub mod config;
pub mod error;
pub mod generation;
pub mod logging;
pub mod modules;
pub mod persistence;
pub mod session;
pub mod status;
pub mod store;
pub mod workflow;

pub use error::WorkflowError;
pub use session::ModuleSession;

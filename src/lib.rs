//! Dockyard: local multi-container development environments.
//!
//! The crate is the orchestration layer between the developer-facing
//! surfaces and a Docker-compatible engine:
//!
//! - [`ports`]: host port resolution and forwarded-port discovery
//! - [`lifecycle`]: container, network and volume lifecycle
//! - [`proxy`]: edge reverse-proxy configuration sync
//! - [`events`]: engine event stream to invalidation signals
//! - [`entities`]: project and service state managers
//!
//! Every component receives its collaborators at construction; nothing
//! holds a process-wide engine client.

pub mod cli;
pub mod config;
pub mod engine;
pub mod entities;
pub mod error;
pub mod events;
pub mod hosts;
pub mod lifecycle;
pub mod ports;
pub mod proxy;
pub mod registry;
pub mod testing;

pub use config::Config;
pub use error::{Error, Result};

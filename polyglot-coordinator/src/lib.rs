//! # polyglot-coordinator
//!
//! Routes translation work across a pool of LLM backends.
//!
//! - [`registry`]: discovery from environment credentials and remotes
//! - [`providers`]: one client per backend kind
//! - [`coordinator::MultiLlmCoordinator`]: retry and consensus translation
//! - [`manager::DistributedManager`]: status / pair / unpair / translate

pub mod coordinator;
pub mod error;
pub mod instance;
pub mod manager;
pub mod providers;
pub mod registry;

pub use coordinator::MultiLlmCoordinator;
pub use error::CoordinationError;
pub use instance::{Instance, InstanceStatus};
pub use manager::DistributedManager;

use std::sync::Arc;

use polyglot_core::config::PolyglotConfig;
use polyglot_core::EventSink;

/// Discover backends from the process environment and `config`, then
/// build a coordinator over them.
pub fn from_environment(
    config: &PolyglotConfig,
    events: Option<Arc<dyn EventSink>>,
) -> MultiLlmCoordinator {
    let instances = registry::discover_from_env(
        &config.provider_table(),
        &config.remotes,
        &config.coordinator,
        events.as_ref(),
    );
    MultiLlmCoordinator::with_events(instances, config.coordinator.clone(), events)
}

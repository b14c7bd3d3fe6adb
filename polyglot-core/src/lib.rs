//! Polyglot core library: domain types, configuration, capability traits.
//!
//! - [`types`]: newtypes and configuration structs shared by every crate
//! - [`error`]: [`ConfigError`] and [`TranslateError`]
//! - [`config`]: load / save `~/.polyglot/config.yaml`
//! - [`events`]: progress events and the [`EventSink`] hook
//! - [`translate`]: the [`Translate`] capability every backend implements

pub mod config;
pub mod error;
pub mod events;
pub mod translate;
pub mod types;

pub use error::{ConfigError, FailureKind, TranslateError};
pub use events::{EventKind, EventSink, ProgressEvent};
pub use translate::{translation_prompt, Translate};
pub use types::{
    CoordinatorSettings, HashSpec, InstanceId, Provider, ProviderSpec, RemoteConfig,
};

pub mod adapters;
pub mod config;
pub mod debate;
pub mod domain;
pub mod error;
pub mod exchange;
pub mod llm;
pub mod market;
pub mod pipeline;
pub mod services;
pub mod supervisor;

pub use config::AppConfig;
pub use error::{ConclaveError, ErrorKind, Result};
pub use pipeline::{PluginRegistry, PipelineRuntime};
pub use supervisor::{BotSupervisor, SharedDeps};

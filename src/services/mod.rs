//! Service layer for monaco-kit

pub mod config;
pub mod engine;
pub mod loader;
pub mod plugins;
pub mod session;
pub mod workers;

pub use config::{ConfigService, DefaultConfigService};
pub use engine::{
    BundledEngineSource, Engine, EngineSlot, EngineSource, LoadState, LoaderOptions,
    LocalEngineSource, PendingEngine,
};
pub use loader::{LoadRequest, LoadTask, Loaded, Loader, OnLoad, on_load};
pub use plugins::{Plugin, PluginHost, PluginRegistry, PluginRequest, RegistryPolicy};
pub use session::{Session, SessionContext, SessionOptions, SessionSnapshot};
pub use workers::{WorkerInfo, WorkerManager, WorkerRegistration, WorkerSource, WorkerStatus};

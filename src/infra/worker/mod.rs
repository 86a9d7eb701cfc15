//! Worker infrastructure
//!
//! - JSON-RPC 2.0 message types shared by both sides of a worker channel
//! - Content-Length framing for process-hosted workers
//! - Thread and process worker handles with explicit termination
//! - Orchestrator-side client pairing requests with responses
//! - Worker-side bridge dispatching requests to language services

pub mod bridge;
pub mod client;
pub mod handle;
pub mod protocol;
pub mod transport;

pub use bridge::{LanguageService, ServiceError, ServiceFactory, WorkerBridge, service_factory};
pub use client::WorkerClient;
pub use handle::{RemotePort, WorkerHandle, WorkerPort};

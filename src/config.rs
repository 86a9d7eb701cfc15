//! Global Runtime Settings

use std::sync::OnceLock;
use std::time::Duration;

use crate::infra::worker::protocol::methods;
use crate::models::config::KitConfig;
use crate::models::providers::Capability;

static CONFIG: OnceLock<RuntimeConfig> = OnceLock::new();

/// Request classes with different latency expectations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationType {
    Request,
    Validation,
    Formatting,
    Initialization,
    Shutdown,
}

impl OperationType {
    pub fn from_method(method: &str) -> Self {
        if method == methods::INITIALIZE {
            return Self::Initialization;
        }
        if method == methods::SHUTDOWN {
            return Self::Shutdown;
        }
        match Capability::from_method(method) {
            Some(Capability::Diagnostics) => Self::Validation,
            Some(Capability::DocumentFormattingEdit | Capability::DocumentRangeFormattingEdit) => {
                Self::Formatting
            }
            _ => Self::Request,
        }
    }

    fn base_multiplier(self) -> f64 {
        match self {
            Self::Request => 1.0,
            Self::Validation => 2.0,
            // Formatters load their parser plugins on first use
            Self::Formatting => 3.0,
            Self::Initialization => 4.0,
            Self::Shutdown => 0.5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    base_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            base_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&KitConfig> for RuntimeConfig {
    fn from(config: &KitConfig) -> Self {
        Self {
            base_timeout: Duration::from_secs(config.workers.timeout_secs.max(1)),
        }
    }
}

impl RuntimeConfig {
    pub fn timeout_for(&self, method: &str) -> Duration {
        let multiplier = OperationType::from_method(method).base_multiplier();
        Duration::from_secs_f64(self.base_timeout.as_secs_f64() * multiplier)
    }
}

pub fn init(config: &KitConfig) {
    let _ = CONFIG.set(RuntimeConfig::from(config));
}

pub fn timeout_for(method: &str) -> Duration {
    config().timeout_for(method)
}

pub fn is_initialized() -> bool {
    CONFIG.get().is_some()
}

fn config() -> RuntimeConfig {
    CONFIG.get().cloned().unwrap_or_default()
}

//! Theme definitions and active-theme selection

use std::collections::BTreeMap;
use std::fmt;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_THEME: &str = "vs-dark";

/// Themes every engine ships with
pub const BUILTIN_THEMES: [&str; 3] = ["vs", "vs-dark", "hc-black"];

/// Standalone theme data, as the editor's `defineTheme` accepts it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThemeData {
    pub base: String,
    #[serde(default = "default_inherit")]
    pub inherit: bool,
    #[serde(default)]
    pub rules: Vec<Value>,
    #[serde(default)]
    pub colors: BTreeMap<String, String>,
}

fn default_inherit() -> bool {
    true
}

impl ThemeData {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            inherit: true,
            rules: Vec::new(),
            colors: BTreeMap::new(),
        }
    }

    pub fn color(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.colors.insert(key.into(), value.into());
        self
    }
}

pub type ThemeMap = BTreeMap<String, ThemeData>;

type DeferredTheme = Box<dyn Fn() -> BoxFuture<'static, ThemeData> + Send + Sync>;

/// Active theme: a name, inline data, or a computation resolved at apply time
pub enum ThemeSelection {
    Named(String),
    Data(ThemeData),
    Deferred(DeferredTheme),
}

impl ThemeSelection {
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    pub fn deferred<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ThemeData> + Send + 'static,
    {
        Self::Deferred(Box::new(move || Box::pin(f())))
    }
}

impl fmt::Debug for ThemeSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => f.debug_tuple("Named").field(name).finish(),
            Self::Data(data) => f.debug_tuple("Data").field(data).finish(),
            Self::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

impl From<&str> for ThemeSelection {
    fn from(name: &str) -> Self {
        Self::Named(name.to_string())
    }
}

impl From<ThemeData> for ThemeSelection {
    fn from(data: ThemeData) -> Self {
        Self::Data(data)
    }
}

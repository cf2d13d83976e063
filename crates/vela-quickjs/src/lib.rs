//! Vela QuickJS
//!
//! A [`NativeEngine`](vela_view::NativeEngine) backed by QuickJS.
//!
//! Features:
//! - One QuickJS context per view, sharing one runtime
//! - JS objects, arrays and functions cross as handles
//! - Host callbacks bound as global functions
//! - Console API (log, info, warn, error, debug) posted as view events
//! - `vela` paint API: background color plus filled rectangles
//! - `about:`, `file:` and `data:` page loading

mod bindings;
mod console;
mod engine;
mod loader;
mod scene;
mod table;
mod text;

pub use engine::QuickJsEngine;
pub use loader::{Content, LoadError, Page, fetch, percent_decode};
pub use scene::{FillRect, Scene};

use serde::{Deserialize, Serialize};

/// QuickJS runtime limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuickJsConfig {
    /// Heap limit in bytes
    pub memory_limit: usize,
    /// Stack limit in bytes
    pub max_stack_size: usize,
    /// Pending jobs run per `update`
    pub max_jobs_per_update: usize,
}

impl Default for QuickJsConfig {
    fn default() -> Self {
        Self {
            memory_limit: 32 * 1024 * 1024,
            max_stack_size: 1024 * 1024,
            max_jobs_per_update: 1024,
        }
    }
}

impl QuickJsConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

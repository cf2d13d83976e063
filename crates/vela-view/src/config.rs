//! Engine and view configuration
//!
//! Both structs deserialize with every field optional, so a JSON file only
//! needs the keys it changes.

use serde::{Deserialize, Serialize};

use crate::BridgeError;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Name of the engine thread
    pub thread_name: String,
    /// Nested native frames allowed on the engine thread; the native
    /// engine's own limit applies when lower
    pub max_call_depth: usize,
    /// Configuration for sessions created without one
    pub view: ViewConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            thread_name: "vela-engine".into(),
            max_call_depth: 2,
            view: ViewConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON document; missing keys keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, BridgeError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    pub fn with_view(mut self, view: ViewConfig) -> Self {
        self.view = view;
        self
    }

    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.thread_name.is_empty() {
            return Err(BridgeError::Config("thread_name must not be empty".into()));
        }
        if self.max_call_depth == 0 {
            return Err(BridgeError::Config("max_call_depth must be at least 1".into()));
        }
        self.view.validate()
    }
}

/// Per-view configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewConfig {
    pub width: u32,
    pub height: u32,
    /// Paint into a host GPU surface instead of a CPU bitmap
    pub accelerated: bool,
    /// Keep the background transparent
    pub transparent: bool,
    pub device_scale: f64,
    pub initial_focus: bool,
    pub enable_images: bool,
    pub enable_javascript: bool,
    pub font_family_standard: String,
    pub font_family_fixed: String,
    pub font_family_serif: String,
    pub font_family_sans_serif: String,
    pub user_agent: String,
    /// Background color as RGBA, used by engines that paint one
    pub background: [u8; 4],
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            accelerated: true,
            transparent: false,
            device_scale: 1.0,
            initial_focus: true,
            enable_images: true,
            enable_javascript: true,
            font_family_standard: "Times New Roman".into(),
            font_family_fixed: "Courier New".into(),
            font_family_serif: "Times New Roman".into(),
            font_family_sans_serif: "Arial".into(),
            user_agent: concat!("Vela/", env!("CARGO_PKG_VERSION")).into(),
            background: [255, 255, 255, 255],
        }
    }
}

impl ViewConfig {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self, BridgeError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_accelerated(mut self, accelerated: bool) -> Self {
        self.accelerated = accelerated;
        self
    }

    pub fn with_transparent(mut self, transparent: bool) -> Self {
        self.transparent = transparent;
        self
    }

    pub fn with_device_scale(mut self, scale: f64) -> Self {
        self.device_scale = scale;
        self
    }

    pub fn with_javascript(mut self, enabled: bool) -> Self {
        self.enable_javascript = enabled;
        self
    }

    pub fn with_images(mut self, enabled: bool) -> Self {
        self.enable_images = enabled;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_background(mut self, rgba: [u8; 4]) -> Self {
        self.background = rgba;
        self
    }

    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.width == 0 || self.height == 0 {
            return Err(BridgeError::Config(format!(
                "view size {}x{} must be non-zero",
                self.width, self.height
            )));
        }
        if !(self.device_scale.is_finite() && self.device_scale > 0.0) {
            return Err(BridgeError::Config(format!(
                "device_scale {} must be positive",
                self.device_scale
            )));
        }
        Ok(())
    }
}

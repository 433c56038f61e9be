//! Renderer configuration

use std::path::Path;

use serde::Deserialize;

use crate::backend::BackendTier;
use crate::error::{RenderError, RenderResult};

/// Configuration for initializing the device context and render nodes.
///
/// Every key is optional when loaded from TOML:
///
/// ```toml
/// width = 1920
/// height = 1080
/// vsync = false
/// tiers = ["hardware", "reference"]
/// clear_color = [0.1, 0.1, 0.1, 1.0]
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Render resolution width; node targets are allocated at this size
    pub width: u32,
    /// Render resolution height
    pub height: u32,
    /// Wait for vertical sync on present
    pub vsync: bool,
    /// Device tiers tried in order at init
    pub tiers: Vec<BackendTier>,
    /// Clear color of the forward target
    pub clear_color: [f32; 4],
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            vsync: true,
            tiers: vec![
                BackendTier::Hardware,
                BackendTier::Software,
                BackendTier::Reference,
            ],
            clear_color: [0.1, 0.1, 0.1, 1.0],
        }
    }
}

impl RendererConfig {
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    pub fn with_tiers(mut self, tiers: impl Into<Vec<BackendTier>>) -> Self {
        self.tiers = tiers.into();
        self
    }

    pub fn with_clear_color(mut self, clear_color: [f32; 4]) -> Self {
        self.clear_color = clear_color;
        self
    }

    /// Parse a config from TOML text
    pub fn from_toml_str(content: &str) -> RenderResult<Self> {
        Self::parse(content).map_err(RenderError::logged)
    }

    /// Load a config from a TOML file
    pub fn load(path: impl AsRef<Path>) -> RenderResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| {
            RenderError::Io {
                path: path.display().to_string(),
                source,
            }
            .logged()
        })?;
        Self::parse(&content)
            .map_err(|e| RenderError::Config(format!("{}: {e}", path.display())).logged())
    }

    fn parse(content: &str) -> RenderResult<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| RenderError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> RenderResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(RenderError::Config(format!(
                "resolution {}x{} must be non-zero",
                self.width, self.height
            )));
        }
        if self.tiers.is_empty() {
            return Err(RenderError::Config("at least one backend tier is required".into()));
        }
        Ok(())
    }
}

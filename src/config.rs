//! Configuration Management
//!
//! Handles persistent configuration storage for cloudmend.

use crate::cloud::auth;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Region used when nothing else names one
pub const DEFAULT_REGION: &str = "cn-north-4";

/// User configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// Project ID
    #[serde(default)]
    pub project_id: Option<String>,
    /// Region
    #[serde(default)]
    pub region: Option<String>,
    /// Endpoint overrides keyed by service name (`ces`, `smn`)
    #[serde(default)]
    pub endpoints: HashMap<String, String>,
    /// Concurrent action calls
    #[serde(default)]
    pub concurrency: Option<usize>,
    /// Maximum missing-filter nesting
    #[serde(default)]
    pub max_depth: Option<usize>,
}

impl Config {
    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("cloudmend").join("config.json"))
    }

    /// Load configuration from disk
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };

        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(&path) {
            Ok(content) => Self::parse(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring unreadable config {:?}: {}", path, e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn parse(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Failed to parse config")
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let Some(path) = Self::config_path() else {
            return Ok(());
        };

        // Create parent directory
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, content)?;

        Ok(())
    }

    /// Get effective project (CLI > config > environment)
    pub fn effective_project(&self, cli: Option<&str>) -> Option<String> {
        cli.map(String::from)
            .or_else(|| self.project_id.clone())
            .or_else(auth::get_default_project)
    }

    /// Get effective region (CLI > config > environment > default)
    pub fn effective_region(&self, cli: Option<&str>) -> String {
        cli.map(String::from)
            .or_else(|| self.region.clone())
            .or_else(auth::get_default_region)
            .unwrap_or_else(|| DEFAULT_REGION.to_string())
    }

    /// Set project and save
    pub fn set_project(&mut self, project_id: &str) -> Result<()> {
        self.project_id = Some(project_id.to_string());
        self.save()
    }

    /// Set region and save
    pub fn set_region(&mut self, region: &str) -> Result<()> {
        self.region = Some(region.to_string());
        self.save()
    }
}

//! Runtime configuration
//!
//! Loaded once at application start from TOML and passed by reference to the
//! components that need it.
//!
//! ```toml
//! [resources]
//! templates = "static"
//! context = "server"
//!
//! [save]
//! strategy = "changed"
//! track_events = ["upload:finished"]
//!
//! [busy]
//! enabled = true
//! ```

use crate::errors::CanopyError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Where a resource kind is fetched from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceOrigin {
    /// Served from a static source bundled with the application
    Static,
    /// Requested from the server transport
    #[default]
    Server,
    /// Never requested
    None,
}

impl FromStr for ResourceOrigin {
    type Err = CanopyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "static" => Ok(Self::Static),
            "server" => Ok(Self::Server),
            "none" => Ok(Self::None),
            other => Err(CanopyError::structural(format!(
                "unknown resource origin '{other}'"
            ))),
        }
    }
}

/// Per-kind resource origins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    /// Template origin
    pub templates: ResourceOrigin,
    /// Style sheet origin
    pub styles: ResourceOrigin,
    /// Localization string origin
    pub localization: ResourceOrigin,
    /// Application config origin
    pub app_config: ResourceOrigin,
    /// Option list origin
    pub options_data: ResourceOrigin,
    /// Context payload origin
    pub context: ResourceOrigin,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            templates: ResourceOrigin::Static,
            styles: ResourceOrigin::Static,
            localization: ResourceOrigin::Static,
            app_config: ResourceOrigin::Server,
            options_data: ResourceOrigin::Server,
            context: ResourceOrigin::Server,
        }
    }
}

/// Which change-tracking strategy a save handler uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveStrategyKind {
    /// Always submit the whole tree
    #[default]
    All,
    /// Submit only direct children with tracked changes
    Changed,
    /// Submit every change as it happens
    Immediate,
    /// Never submit
    None,
}

impl FromStr for SaveStrategyKind {
    type Err = CanopyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(Self::All),
            "changed" => Ok(Self::Changed),
            "immediate" => Ok(Self::Immediate),
            "none" => Ok(Self::None),
            other => Err(CanopyError::structural(format!(
                "unknown save strategy '{other}'"
            ))),
        }
    }
}

impl fmt::Display for SaveStrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::All => "all",
            Self::Changed => "changed",
            Self::Immediate => "immediate",
            Self::None => "none",
        };
        f.write_str(name)
    }
}

/// Save behaviour.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaveConfig {
    /// Default strategy for new save handlers
    pub strategy: SaveStrategyKind,
    /// Additional bus events that mark their source node as modified
    pub track_events: Vec<String>,
}

/// Busy indicator behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusyConfig {
    /// Whether busy indicators are shown at all
    pub enabled: bool,
}

impl Default for BusyConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Top-level canopy configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanopyConfig {
    /// Resource origins
    pub resources: ResourceConfig,
    /// Save behaviour
    pub save: SaveConfig,
    /// Busy indicator behaviour
    pub busy: BusyConfig,
}

impl CanopyConfig {
    /// Parse configuration from a TOML string.
    pub fn from_toml_str(input: &str) -> Result<Self, CanopyError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self, CanopyError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CanopyError::internal(format!(
                "failed to read config file {}: {e}",
                path.display()
            ))
        })?;
        tracing::debug!(path = %path.display(), "loaded canopy configuration");
        Self::from_toml_str(&content)
    }

    /// Overlay `other` on top of this configuration.
    ///
    /// Scalar sections are replaced; tracked events are unioned.
    pub fn merge_with(&mut self, other: &Self) {
        self.resources = other.resources.clone();
        self.busy = other.busy.clone();
        self.save.strategy = other.save.strategy;
        for event in &other.save.track_events {
            if !self.save.track_events.contains(event) {
                self.save.track_events.push(event.clone());
            }
        }
    }

    /// Check invariants that serde cannot express.
    pub fn validate(&self) -> Result<(), CanopyError> {
        if self
            .save
            .track_events
            .iter()
            .any(|event| event.trim().is_empty())
        {
            return Err(CanopyError::structural(
                "save.track_events must not contain empty event names",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_toml_yields_defaults() {
        let config = CanopyConfig::from_toml_str("").unwrap();
        assert_eq!(config, CanopyConfig::default());
        assert!(config.busy.enabled);
        assert_eq!(config.resources.templates, ResourceOrigin::Static);
    }

    #[test]
    fn test_parse_sections() {
        let config = CanopyConfig::from_toml_str(
            r#"
            [resources]
            templates = "server"
            styles = "none"

            [save]
            strategy = "changed"
            track_events = ["upload:finished"]

            [busy]
            enabled = false
            "#,
        )
        .unwrap();
        assert_eq!(config.resources.templates, ResourceOrigin::Server);
        assert_eq!(config.resources.styles, ResourceOrigin::None);
        assert_eq!(config.save.strategy, SaveStrategyKind::Changed);
        assert_eq!(config.save.track_events, vec!["upload:finished".to_string()]);
        assert!(!config.busy.enabled);
    }

    #[test]
    fn test_rejects_empty_event_name() {
        let err = CanopyConfig::from_toml_str("[save]\ntrack_events = [\" \"]").unwrap_err();
        assert_eq!(err.category(), "structural");
    }

    #[test]
    fn test_rejects_unknown_strategy() {
        assert!(CanopyConfig::from_toml_str("[save]\nstrategy = \"sometimes\"").is_err());
        assert!("sometimes".parse::<SaveStrategyKind>().is_err());
        assert_eq!("immediate".parse::<SaveStrategyKind>().unwrap(), SaveStrategyKind::Immediate);
    }

    #[test]
    fn test_merge_unions_events() {
        let mut base = CanopyConfig::default();
        base.save.track_events.push("a".into());
        let mut other = CanopyConfig::default();
        other.save.strategy = SaveStrategyKind::Immediate;
        other.save.track_events = vec!["a".into(), "b".into()];
        base.merge_with(&other);
        assert_eq!(base.save.strategy, SaveStrategyKind::Immediate);
        assert_eq!(base.save.track_events, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[busy]\nenabled = false").unwrap();
        let config = CanopyConfig::load_from_file(file.path()).unwrap();
        assert!(!config.busy.enabled);
    }
}

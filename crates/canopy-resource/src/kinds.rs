//! Resource kinds and per-node declarations.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// The resource types a node can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Markup templates
    Templates,
    /// Style sheets
    Styles,
    /// Localization strings
    Localization,
    /// Application configuration entries
    AppConfig,
    /// Option lists for selection widgets
    OptionsData,
    /// Opaque context payloads keyed by requesting node
    Context,
}

impl ResourceKind {
    /// Kinds whose requests are plain key lists.
    pub const KEYED: [ResourceKind; 5] = [
        ResourceKind::Templates,
        ResourceKind::Styles,
        ResourceKind::Localization,
        ResourceKind::AppConfig,
        ResourceKind::OptionsData,
    ];

    /// Every kind, keyed kinds first.
    pub const ALL: [ResourceKind; 6] = [
        ResourceKind::Templates,
        ResourceKind::Styles,
        ResourceKind::Localization,
        ResourceKind::AppConfig,
        ResourceKind::OptionsData,
        ResourceKind::Context,
    ];

    /// Field name used in transport requests and responses.
    #[must_use]
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::Templates => "templates",
            Self::Styles => "styles",
            Self::Localization => "l10n",
            Self::AppConfig => "app_config",
            Self::OptionsData => "options_data",
            Self::Context => "context",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Resources a single node declares it needs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceRequests {
    /// Template ids
    pub templates: Vec<String>,
    /// Style ids
    pub styles: Vec<String>,
    /// Localization keys
    pub localization: Vec<String>,
    /// Application config keys
    pub app_config: Vec<String>,
    /// Option list keys
    pub options_data: Vec<String>,
    /// Context payload per resource name, sent on behalf of the requesting node
    pub context: IndexMap<String, Value>,
}

impl ResourceRequests {
    /// Empty declaration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a key of a keyed kind. Context payloads go through [`Self::with_context`].
    #[must_use]
    pub fn with(mut self, kind: ResourceKind, key: impl Into<String>) -> Self {
        if let Some(keys) = self.keys_mut(kind) {
            keys.push(key.into());
        }
        self
    }

    /// Add a template id.
    #[must_use]
    pub fn with_template(self, key: impl Into<String>) -> Self {
        self.with(ResourceKind::Templates, key)
    }

    /// Add a localization key.
    #[must_use]
    pub fn with_localization(self, key: impl Into<String>) -> Self {
        self.with(ResourceKind::Localization, key)
    }

    /// Request a context payload under `name`.
    #[must_use]
    pub fn with_context(mut self, name: impl Into<String>, payload: Value) -> Self {
        self.context.insert(name.into(), payload);
        self
    }

    /// Keys declared for a keyed kind. Empty for [`ResourceKind::Context`].
    #[must_use]
    pub fn keys(&self, kind: ResourceKind) -> &[String] {
        match kind {
            ResourceKind::Templates => &self.templates,
            ResourceKind::Styles => &self.styles,
            ResourceKind::Localization => &self.localization,
            ResourceKind::AppConfig => &self.app_config,
            ResourceKind::OptionsData => &self.options_data,
            ResourceKind::Context => &[],
        }
    }

    fn keys_mut(&mut self, kind: ResourceKind) -> Option<&mut Vec<String>> {
        match kind {
            ResourceKind::Templates => Some(&mut self.templates),
            ResourceKind::Styles => Some(&mut self.styles),
            ResourceKind::Localization => Some(&mut self.localization),
            ResourceKind::AppConfig => Some(&mut self.app_config),
            ResourceKind::OptionsData => Some(&mut self.options_data),
            ResourceKind::Context => None,
        }
    }

    /// Fold another declaration into this one, de-duplicating keys.
    ///
    /// Context payloads from `other` replace payloads of the same name.
    pub fn extend(&mut self, other: &ResourceRequests) {
        for kind in ResourceKind::KEYED {
            let incoming = other.keys(kind).to_vec();
            if let Some(keys) = self.keys_mut(kind) {
                for key in incoming {
                    if !keys.contains(&key) {
                        keys.push(key);
                    }
                }
            }
        }
        for (name, payload) in &other.context {
            self.context.insert(name.clone(), payload.clone());
        }
    }

    /// True when nothing is requested.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        ResourceKind::KEYED.iter().all(|k| self.keys(*k).is_empty()) && self.context.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_routes_keys() {
        let requests = ResourceRequests::new()
            .with_template("form")
            .with_localization("labels.name")
            .with(ResourceKind::OptionsData, "countries")
            .with(ResourceKind::Context, "ignored");
        assert_eq!(requests.keys(ResourceKind::Templates), ["form"]);
        assert_eq!(requests.keys(ResourceKind::Localization), ["labels.name"]);
        assert_eq!(requests.keys(ResourceKind::OptionsData), ["countries"]);
        assert!(requests.context.is_empty());
    }

    #[test]
    fn test_extend_dedups() {
        let mut a = ResourceRequests::new().with_template("form");
        let b = ResourceRequests::new()
            .with_template("form")
            .with_template("row")
            .with_context("user", json!({"id": 1}));
        a.extend(&b);
        assert_eq!(a.templates, vec!["form".to_string(), "row".to_string()]);
        assert_eq!(a.context["user"], json!({"id": 1}));
    }

    #[test]
    fn test_wire_names_are_distinct() {
        let mut names: Vec<_> = ResourceKind::ALL.iter().map(|k| k.wire_name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), ResourceKind::ALL.len());
    }
}

//! Screen layouts: template keys to image paths, button keys to regions.
//!
//! A layout is built once from the YAML config and never mutated. Empty
//! references are valid and mean the feature is switched off for that
//! layout; lookups then answer [`Resolution::Disabled`] instead of failing.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::types::Region;

static KEY_RE: OnceLock<Regex> = OnceLock::new();

pub fn is_valid_key(key: &str) -> bool {
    KEY_RE
        .get_or_init(|| Regex::new(r"^[a-z0-9_]+$").unwrap())
        .is_match(key)
}

/// One or many template image paths.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PathSpec {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TemplateDetail {
    #[serde(default)]
    pub path: Option<PathSpec>,
    #[serde(default)]
    pub threshold: Option<f32>,
    #[serde(default)]
    pub required: bool,
}

/// A node under `templates:`. Maps that are not a detailed entry are groups.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TemplateNode {
    Path(String),
    Paths(Vec<String>),
    Detailed(TemplateDetail),
    Group(BTreeMap<String, TemplateNode>),
    Unset,
}

/// A node under `buttons:`: `[[y1, y2], [x1, x2]]`, empty, or a group.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ButtonNode {
    Region([[f64; 2]; 2]),
    Text(String),
    Group(BTreeMap<String, ButtonNode>),
    Unset,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawLayout {
    #[serde(default)]
    pub templates: BTreeMap<String, TemplateNode>,
    #[serde(default)]
    pub buttons: BTreeMap<String, ButtonNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TemplateEntry {
    pub key: String,
    /// Empty means disabled.
    pub paths: Vec<PathBuf>,
    pub threshold: Option<f32>,
    pub required: bool,
    pub group: Option<String>,
}

impl TemplateEntry {
    pub fn is_disabled(&self) -> bool {
        self.paths.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolution<'a> {
    Template(&'a TemplateEntry),
    /// Configured empty: feature intentionally off.
    Disabled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Layout {
    pub id: String,
    templates: BTreeMap<String, TemplateEntry>,
    buttons: BTreeMap<String, Option<Region>>,
}

impl Layout {
    /// Flatten and validate a raw layout. Relative paths are joined to `asset_root`.
    pub fn build(id: &str, raw: &RawLayout, asset_root: &Path) -> Result<Self, ConfigError> {
        let mut layout = Layout {
            id: id.to_string(),
            templates: BTreeMap::new(),
            buttons: BTreeMap::new(),
        };
        for (key, node) in &raw.templates {
            layout.add_template(key, node, None, asset_root)?;
        }
        for (key, node) in &raw.buttons {
            layout.add_button(key, node)?;
        }
        Ok(layout)
    }

    fn add_template(
        &mut self,
        key: &str,
        node: &TemplateNode,
        group: Option<&str>,
        asset_root: &Path,
    ) -> Result<(), ConfigError> {
        if !is_valid_key(key) {
            return Err(ConfigError::InvalidKey { layout: self.id.clone(), key: key.to_string() });
        }
        let (paths, threshold, required) = match node {
            TemplateNode::Group(children) => {
                for (child, child_node) in children {
                    self.add_template(child, child_node, Some(key), asset_root)?;
                }
                return Ok(());
            }
            TemplateNode::Path(p) => (vec![p.clone()], None, false),
            TemplateNode::Paths(ps) => (ps.clone(), None, false),
            TemplateNode::Detailed(d) => {
                let paths = match &d.path {
                    Some(PathSpec::One(p)) => vec![p.clone()],
                    Some(PathSpec::Many(ps)) => ps.clone(),
                    None => Vec::new(),
                };
                (paths, d.threshold, d.required)
            }
            TemplateNode::Unset => (Vec::new(), None, false),
        };

        if let Some(t) = threshold {
            if !(0.0..=1.0).contains(&t) {
                return Err(ConfigError::InvalidEntry {
                    layout: self.id.clone(),
                    detail: format!("template '{}' threshold {} outside 0..1", key, t),
                });
            }
        }
        let paths: Vec<PathBuf> = paths
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .map(|p| asset_root.join(p))
            .collect();
        if required && paths.is_empty() {
            return Err(ConfigError::InvalidEntry {
                layout: self.id.clone(),
                detail: format!("template '{}' is marked required but has no path", key),
            });
        }
        if self.templates.contains_key(key) {
            return Err(ConfigError::DuplicateKey { layout: self.id.clone(), key: key.to_string() });
        }
        self.templates.insert(
            key.to_string(),
            TemplateEntry {
                key: key.to_string(),
                paths,
                threshold,
                required,
                group: group.map(str::to_string),
            },
        );
        Ok(())
    }

    fn add_button(&mut self, key: &str, node: &ButtonNode) -> Result<(), ConfigError> {
        if !is_valid_key(key) {
            return Err(ConfigError::InvalidKey { layout: self.id.clone(), key: key.to_string() });
        }
        let region = match node {
            ButtonNode::Group(children) => {
                for (child, child_node) in children {
                    self.add_button(child, child_node)?;
                }
                return Ok(());
            }
            ButtonNode::Region([y, x]) => {
                let region = Region { y: (y[0], y[1]), x: (x[0], x[1]) };
                if !region.is_normalized() {
                    return Err(ConfigError::InvalidEntry {
                        layout: self.id.clone(),
                        detail: format!("button '{}' region {:?} is not normalized and ordered", key, region),
                    });
                }
                Some(region)
            }
            ButtonNode::Text(s) if s.trim().is_empty() => None,
            ButtonNode::Text(s) => {
                return Err(ConfigError::InvalidEntry {
                    layout: self.id.clone(),
                    detail: format!("button '{}' must be a region or empty, got '{}'", key, s),
                });
            }
            ButtonNode::Unset => None,
        };
        if self.buttons.contains_key(key) {
            return Err(ConfigError::DuplicateKey { layout: self.id.clone(), key: key.to_string() });
        }
        self.buttons.insert(key.to_string(), region);
        Ok(())
    }

    /// Look up a template key. Unknown keys are a configuration error; empty
    /// references resolve to `Disabled`.
    pub fn resolve(&self, key: &str) -> Result<Resolution<'_>, ConfigError> {
        match self.templates.get(key) {
            Some(entry) if entry.is_disabled() => Ok(Resolution::Disabled),
            Some(entry) => Ok(Resolution::Template(entry)),
            None => Err(ConfigError::UnknownTemplate { layout: self.id.clone(), key: key.to_string() }),
        }
    }

    /// Region for a button key, `None` when the button is disabled.
    pub fn button(&self, key: &str) -> Result<Option<Region>, ConfigError> {
        self.buttons
            .get(key)
            .copied()
            .ok_or_else(|| ConfigError::UnknownButton { layout: self.id.clone(), key: key.to_string() })
    }

    pub fn template(&self, key: &str) -> Option<&TemplateEntry> {
        self.templates.get(key)
    }

    pub fn has_template(&self, key: &str) -> bool {
        self.templates.contains_key(key)
    }

    pub fn has_button(&self, key: &str) -> bool {
        self.buttons.contains_key(key)
    }

    /// Enabled/disabled state is a fixed property of the layout.
    pub fn is_enabled(&self, key: &str) -> bool {
        matches!(self.resolve(key), Ok(Resolution::Template(_)))
    }

    pub fn template_keys(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }

    /// Keys belonging to a group tag, e.g. "bounty".
    pub fn group(&self, tag: &str) -> Vec<&TemplateEntry> {
        self.templates
            .values()
            .filter(|e| e.group.as_deref() == Some(tag))
            .collect()
    }
}

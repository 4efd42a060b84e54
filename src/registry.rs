use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::error::{Result, SatchelError};
use crate::util::{compare_versions, validate_tool_name};

/// The kind of bundle a tool is. Each type installs into its own directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolType {
    Agent,
    Command,
    Skill,
}

impl ToolType {
    pub const ALL: [ToolType; 3] = [ToolType::Agent, ToolType::Command, ToolType::Skill];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolType::Agent => "agent",
            ToolType::Command => "command",
            ToolType::Skill => "skill",
        }
    }

    /// Name of the install subdirectory for this type.
    pub fn dir_name(&self) -> &'static str {
        match self {
            ToolType::Agent => "agents",
            ToolType::Command => "commands",
            ToolType::Skill => "skills",
        }
    }
}

impl fmt::Display for ToolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolType {
    type Err = SatchelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "agent" | "agents" => Ok(ToolType::Agent),
            "command" | "commands" => Ok(ToolType::Command),
            "skill" | "skills" => Ok(ToolType::Skill),
            other => Err(SatchelError::InvalidDescriptor {
                name: other.to_string(),
                reason: "type must be one of agent, command, skill".to_string(),
            }),
        }
    }
}

/// A tool version as published in the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// The name of the tool, unique within its type.
    pub name: String,
    /// The semantic version of this release.
    pub version: String,
    #[serde(rename = "type")]
    pub tool_type: ToolType,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Path or URL of the archive, relative paths resolve against the registry.
    pub file: String,
    /// Declared archive size in bytes.
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub downloads: u64,
    /// SHA-256 of the archive, when the registry publishes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ToolDescriptor {
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| SatchelError::InvalidDescriptor {
            name: self.name.clone(),
            reason: reason.to_string(),
        };
        if self.name.trim().is_empty() {
            return Err(invalid("name is empty"));
        }
        validate_tool_name(&self.name).map_err(|_| invalid("name is not a valid tool name"))?;
        if self.version.trim().is_empty() {
            return Err(invalid("version is empty"));
        }
        if self.file.trim().is_empty() {
            return Err(invalid("archive location is empty"));
        }
        Ok(())
    }

    pub fn matches(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        self.name.to_lowercase().contains(&query)
            || self.description.to_lowercase().contains(&query)
            || self.tags.iter().any(|t| t.to_lowercase().contains(&query))
    }
}

/// The registry index: every published tool version, grouped by type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryDocument {
    pub version: String,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub tools: BTreeMap<ToolType, Vec<ToolDescriptor>>,
}

impl RegistryDocument {
    /// Parses and validates a registry document.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let doc: RegistryDocument = serde_json::from_slice(bytes)
            .map_err(|e| SatchelError::InvalidDocument { reason: e.to_string() })?;
        doc.validate()?;
        Ok(doc)
    }

    /// Checks the document as a whole: a version tag, valid descriptors,
    /// descriptors filed under their own type and no duplicate releases.
    pub fn validate(&self) -> Result<()> {
        if self.version.trim().is_empty() {
            return Err(SatchelError::InvalidDocument {
                reason: "version is empty".to_string(),
            });
        }
        for (tool_type, descriptors) in &self.tools {
            let mut seen = HashSet::new();
            for descriptor in descriptors {
                descriptor.validate()?;
                if descriptor.tool_type != *tool_type {
                    return Err(SatchelError::InvalidDescriptor {
                        name: descriptor.name.clone(),
                        reason: format!(
                            "declared type {} but listed under {}",
                            descriptor.tool_type, tool_type
                        ),
                    });
                }
                if !seen.insert((descriptor.name.as_str(), descriptor.version.as_str())) {
                    return Err(SatchelError::InvalidDescriptor {
                        name: descriptor.name.clone(),
                        reason: format!("version {} listed twice", descriptor.version),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.tools.values().flatten()
    }

    pub fn tool_count(&self) -> usize {
        self.tools.values().map(Vec::len).sum()
    }

    /// Highest published version of `name` under `tool_type`.
    pub fn latest(&self, name: &str, tool_type: ToolType) -> Option<&ToolDescriptor> {
        self.tools
            .get(&tool_type)?
            .iter()
            .filter(|d| d.name == name)
            .max_by(|a, b| compare_versions(&a.version, &b.version))
    }

    /// Finds the descriptor to install for `name`.
    ///
    /// With a `version` the match must be exact; otherwise the latest version
    /// wins. Without a `tool_type` the name must be unique across types.
    pub fn resolve(
        &self,
        name: &str,
        version: Option<&str>,
        tool_type: Option<ToolType>,
    ) -> Result<&ToolDescriptor> {
        let candidates: Vec<&ToolDescriptor> = self
            .descriptors()
            .filter(|d| d.name == name)
            .filter(|d| tool_type.is_none_or(|t| d.tool_type == t))
            .collect();
        if candidates.is_empty() {
            return Err(SatchelError::ToolNotFound { name: name.to_string() });
        }

        let types: BTreeSet<ToolType> = candidates.iter().map(|d| d.tool_type).collect();
        if types.len() > 1 {
            let types: Vec<&str> = types.iter().map(ToolType::as_str).collect();
            return Err(SatchelError::AmbiguousTool {
                name: name.to_string(),
                types: types.join(", "),
            });
        }

        match version {
            Some(version) => candidates
                .into_iter()
                .find(|d| d.version == version)
                .ok_or_else(|| SatchelError::VersionNotFound {
                    name: name.to_string(),
                    version: version.to_string(),
                }),
            None => candidates
                .into_iter()
                .max_by(|a, b| compare_versions(&a.version, &b.version))
                .ok_or_else(|| SatchelError::ToolNotFound { name: name.to_string() }),
        }
    }

    /// Case-insensitive search over names, descriptions and tags.
    pub fn search(&self, query: &str) -> Vec<&ToolDescriptor> {
        self.descriptors().filter(|d| d.matches(query)).collect()
    }
}

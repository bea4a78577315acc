//! Project configuration loaded from `pgtrek.yaml`.

use crate::util::{Result, TrekError};
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

pub const CONFIG_FILE: &str = "pgtrek.yaml";

const IDENTIFIER_PATTERN: &str = r"^[a-z_]+$";

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(IDENTIFIER_PATTERN).expect("valid regex"));

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub model_name: String,
    pub db_name: String,
    #[serde(default)]
    pub db_users: Vec<String>,
    /// Auxiliary files re-rendered after every written migration.
    #[serde(default)]
    pub templates: Vec<TemplateFile>,
    #[serde(default)]
    pub tools: Tools,
    #[serde(default)]
    pub ports: Ports,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TemplateFile {
    /// Destination, relative to the project root unless absolute.
    pub path: PathBuf,
    pub content: String,
}

/// Names (or paths) of the external programs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Tools {
    pub model_compiler: String,
    pub diff: String,
    pub dump: String,
    pub initdb: String,
    pub pg_ctl: String,
}

impl Default for Tools {
    fn default() -> Self {
        Self {
            model_compiler: "pgmodeler-cli".into(),
            diff: "migra".into(),
            dump: "pg_dump".into(),
            initdb: "initdb".into(),
            pg_ctl: "pg_ctl".into(),
        }
    }
}

/// TCP ports of the two ephemeral clusters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Ports {
    pub target: u16,
    pub reference: u16,
}

impl Default for Ports {
    fn default() -> Self {
        Self {
            target: 5432,
            reference: 5433,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| TrekError::io(path, e))?;
        Self::from_yaml(&content)
    }

    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load(&dir.join(CONFIG_FILE))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content)
            .map_err(|e| TrekError::Config(format!("Failed to parse {CONFIG_FILE}: {e}")))?;

        let problems = config.problems();
        if !problems.is_empty() {
            return Err(TrekError::Config(format!(
                "Invalid values in {CONFIG_FILE}:\n  {}",
                problems.join("\n  ")
            )));
        }

        Ok(config)
    }

    /// Every validation problem, so they can be reported together.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if !is_identifier(&self.model_name) {
            problems.push(format!(
                "Model name {:?} contains invalid characters. Must match {IDENTIFIER_PATTERN:?}.",
                self.model_name
            ));
        }
        if !is_identifier(&self.db_name) {
            problems.push(format!(
                "Database name {:?} contains invalid characters. Must match {IDENTIFIER_PATTERN:?}.",
                self.db_name
            ));
        }
        for user in &self.db_users {
            if !is_identifier(user) {
                problems.push(format!(
                    "Database user {user:?} contains invalid characters. Must match {IDENTIFIER_PATTERN:?}."
                ));
            }
        }
        if self.ports.target == self.ports.reference {
            problems.push(format!(
                "Target and reference ports must differ, both are {}.",
                self.ports.target
            ));
        }

        problems
    }
}

pub fn is_identifier(identifier: &str) -> bool {
    IDENTIFIER.is_match(identifier)
}

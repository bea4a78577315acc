use std::path::{Path, PathBuf};

pub const MIGRATIONS_DIR: &str = "migrations";
pub const TESTDATA_DIR: &str = "testdata";
pub const LOCK_FILE: &str = "diff.lock";

/// On-disk layout of a project, rooted at the directory holding `pgtrek.yaml`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    root: PathBuf,
    model_name: String,
}

impl Project {
    pub fn new(root: impl Into<PathBuf>, model_name: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            model_name: model_name.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn model_path(&self) -> PathBuf {
        self.root.join(format!("{}.dbm", self.model_name))
    }

    /// Where the model compiler writes the creation script.
    pub fn sql_path(&self) -> PathBuf {
        self.root.join(format!("{}.sql", self.model_name))
    }

    pub fn diagram_path(&self) -> PathBuf {
        self.root.join(format!("{}.png", self.model_name))
    }

    pub fn migrations_dir(&self) -> PathBuf {
        self.root.join(MIGRATIONS_DIR)
    }

    pub fn testdata_dir(&self) -> PathBuf {
        self.root.join(TESTDATA_DIR)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }
}

//! Migration file lifecycle: inspecting the migrations directory, allocating
//! the next sequence number and writing migration bodies.

use crate::util::{Result, TrekError};
use regex::Regex;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::debug;

const KEBAB_CASE: &str = r"[a-z][a-z0-9\-]*[a-z]";

static MIGRATION_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!("^{KEBAB_CASE}$")).expect("valid regex"));

static MIGRATION_FILENAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"^(\d{{3}})_({KEBAB_CASE})\.up\.sql$")).expect("valid regex")
});

/// A committed migration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    pub number: u32,
    pub name: String,
    pub path: PathBuf,
}

impl MigrationFile {
    pub fn file_name(&self) -> String {
        migration_filename(self.number, &self.name)
    }
}

pub fn validate_migration_name(name: &str) -> Result<()> {
    if MIGRATION_NAME.is_match(name) {
        Ok(())
    } else {
        Err(TrekError::InvalidName(format!(
            "migration name {name:?} must be lower-kebab-case and must not start or end with a number or dash"
        )))
    }
}

/// Generates migration filename like "003_add-users.up.sql"
pub fn migration_filename(number: u32, name: &str) -> String {
    format!("{number:03}_{name}.up.sql")
}

pub fn ensure_migrations_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir).map_err(|e| TrekError::io(dir, e))?;
    }
    Ok(())
}

/// Lists the migrations in `dir`, ordered by file name.
///
/// Any file not matching `NNN_kebab-name.up.sql` makes the whole directory
/// untrustworthy and fails the scan. Subdirectories are skipped.
pub fn list_migrations(dir: &Path) -> Result<Vec<MigrationFile>> {
    let mut migrations = Vec::new();

    for entry in std::fs::read_dir(dir).map_err(|e| TrekError::io(dir, e))? {
        let entry = entry.map_err(|e| TrekError::io(dir, e))?;
        let file_type = entry.file_type().map_err(|e| TrekError::io(entry.path(), e))?;
        if file_type.is_dir() {
            continue;
        }

        let filename = entry.file_name();
        let filename = filename.to_string_lossy();
        let captures = MIGRATION_FILENAME.captures(&filename).ok_or_else(|| {
            TrekError::CorruptMigrations(format!(
                "invalid existing migration filename {filename:?} in {}",
                dir.display()
            ))
        })?;

        let number = captures[1].parse::<u32>().map_err(|e| {
            TrekError::CorruptMigrations(format!("invalid sequence number in {filename:?}: {e}"))
        })?;

        migrations.push(MigrationFile {
            number,
            name: captures[2].to_string(),
            path: entry.path(),
        });
    }

    migrations.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(migrations)
}

/// Number of committed migrations, which is also the highest sequence number.
pub fn inspect(dir: &Path) -> Result<u32> {
    let count = list_migrations(dir)?.len();
    u32::try_from(count)
        .map_err(|_| TrekError::CorruptMigrations(format!("too many migrations: {count}")))
}

/// Decides whether a candidate reuses the latest migration's number.
pub trait OverwritePolicy {
    fn should_overwrite(&self, existing: &str, candidate: &str) -> bool;
}

pub struct AlwaysOverwrite;

impl OverwritePolicy for AlwaysOverwrite {
    fn should_overwrite(&self, _existing: &str, _candidate: &str) -> bool {
        true
    }
}

pub struct NeverOverwrite;

impl OverwritePolicy for NeverOverwrite {
    fn should_overwrite(&self, _existing: &str, _candidate: &str) -> bool {
        false
    }
}

/// Asks on the terminal. An empty answer means yes.
pub struct PromptOverwrite;

impl OverwritePolicy for PromptOverwrite {
    fn should_overwrite(&self, existing: &str, _candidate: &str) -> bool {
        let mut stderr = std::io::stderr();
        let _ = write!(
            stderr,
            "The previous migration is also named {existing:?}. Overwrite it instead of creating a new one? [Y/n] "
        );
        let _ = stderr.flush();

        let mut answer = String::new();
        if std::io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_lowercase().as_str(), "" | "y" | "yes")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub number: u32,
    pub name: String,
    pub path: PathBuf,
    /// The number of the latest migration is reused.
    pub overwrites: bool,
    /// A file already existed at `path` when the number was allocated.
    pub preexisting: bool,
}

impl Allocation {
    /// The first migration carries the whole schema instead of a diff.
    pub fn is_initial(&self) -> bool {
        self.number == 1
    }
}

/// Picks the sequence number for a new migration called `name`.
///
/// Only the latest migration is compared by name; an earlier migration with
/// the same name does not trigger the overwrite question.
pub fn allocate(dir: &Path, name: &str, policy: &dyn OverwritePolicy) -> Result<Allocation> {
    validate_migration_name(name)?;
    let migrations = list_migrations(dir)?;
    let count = inspect_count(&migrations)?;

    let overwrites = match migrations.iter().find(|m| m.number == count) {
        Some(latest) if latest.name == name => policy.should_overwrite(&latest.name, name),
        _ => false,
    };
    let number = if overwrites { count } else { count + 1 };
    let path = dir.join(migration_filename(number, name));
    let preexisting = path.exists();

    debug!(number, overwrites, path = %path.display(), "allocated migration");

    Ok(Allocation {
        number,
        name: name.to_string(),
        path,
        overwrites,
        preexisting,
    })
}

/// Sequence number a stdout-only generation stands for, and whether it is the initial one.
pub fn next_for_stdout(dir: &Path) -> Result<(u32, bool)> {
    let count = inspect(dir)?;
    Ok((count + 1, count == 0))
}

/// Replaces the file at `path` with `body`.
pub fn write_migration(path: &Path, body: &str) -> Result<()> {
    remove_migration(path)?;
    std::fs::write(path, body).map_err(|e| TrekError::io(path, e))
}

/// Removes the file at `path`, reporting whether there was one.
pub fn remove_migration(path: &Path) -> Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(TrekError::io(path, e)),
    }
}

fn inspect_count(migrations: &[MigrationFile]) -> Result<u32> {
    u32::try_from(migrations.len()).map_err(|_| {
        TrekError::CorruptMigrations(format!("too many migrations: {}", migrations.len()))
    })
}

//! Computes the SQL delta between the reference and target databases.
//!
//! Two artifacts come out of here. The migration body is produced by the
//! diff tool (`migra`) with migration-history bookkeeping stripped. The lock
//! artifact is a line diff of normalized `pg_dump --schema-only` output.

use crate::config::Tools;
use crate::process::Tool;
use crate::util::Result;
use similar::{Algorithm, TextDiff};

/// Statements the diff tool emits because the reference database carries the
/// apply tool's history table, which the model never has.
pub const KNOWN_TOOL_ARTIFACTS: &[&str] = &[
    r#"alter table "public"."schema_migrations" drop constraint "schema_migrations_pkey";"#,
    r#"drop index if exists "public"."schema_migrations_pkey";"#,
    r#"drop table "public"."schema_migrations";"#,
];

const DUMP_EXCLUDED_TABLE: &str = "public.schema_migrations";
const DUMP_COMMENT_MARKER: &str = "--";

/// `migra` exits with 2 when the schemas differ.
const DIFF_TOOL_SUCCESS_CODES: &[i32] = &[0, 2];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffMode<'a> {
    /// No migrations exist yet; the compiled model is the migration.
    Initial { compiled_sql: &'a str },
    Incremental,
}

/// Drops empty lines and comment lines, keeping the rest in order.
pub fn clean_dump(dump: &str) -> String {
    dump.split('\n')
        .filter(|line| !line.is_empty() && !line.starts_with(DUMP_COMMENT_MARKER))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn strip_tool_artifacts(statements: &str) -> String {
    KNOWN_TOOL_ARTIFACTS
        .iter()
        .fold(statements.to_string(), |acc, artifact| acc.replace(artifact, ""))
}

/// Removes blank lines and terminates the text with exactly one newline.
pub fn normalize_body(text: &str) -> String {
    let lines: Vec<&str> = text
        .trim_matches('\n')
        .split('\n')
        .filter(|line| !line.is_empty())
        .collect();
    format!("{}\n", lines.join("\n"))
}

/// Migration body for diff tool output.
pub fn incremental_body(raw_statements: &str) -> String {
    normalize_body(&strip_tool_artifacts(raw_statements))
}

/// Migration body for the initial migration: the compiled model as is,
/// ending in a single newline.
pub fn initial_body(compiled_sql: &str) -> String {
    format!("{}\n", compiled_sql.trim_end_matches('\n'))
}

/// An empty dump stays empty so it diffs as zero lines.
fn terminate_lines(text: String) -> String {
    if text.is_empty() {
        text
    } else {
        text + "\n"
    }
}

/// Unified line diff of two cleaned dumps, empty when they match.
pub fn diff_dumps(reference_dump: &str, target_dump: &str) -> String {
    let reference = clean_dump(reference_dump);
    let target = clean_dump(target_dump);
    if reference == target {
        return String::new();
    }

    let reference = terminate_lines(reference);
    let target = terminate_lines(target);
    TextDiff::configure()
        .algorithm(Algorithm::Myers)
        .diff_lines(&reference, &target)
        .unified_diff()
        .context_radius(3)
        .header("reference.sql", "target.sql")
        .to_string()
}

pub async fn schema_dump(tools: &Tools, connection_string: &str) -> Result<String> {
    let output = Tool::new(&tools.dump)
        .arg("--schema-only")
        .arg(format!("--exclude-table={DUMP_EXCLUDED_TABLE}"))
        .arg(format!("--dbname={connection_string}"))
        .run()
        .await?;
    Ok(output.stdout)
}

/// Lock artifact: how the reference schema still differs from the target.
pub async fn dump_diff(tools: &Tools, reference_url: &str, target_url: &str) -> Result<String> {
    let reference = schema_dump(tools, reference_url).await?;
    let target = schema_dump(tools, target_url).await?;
    Ok(diff_dumps(&reference, &target))
}

/// Raw statements transforming the reference schema into the target schema.
pub async fn migration_statements(
    tools: &Tools,
    reference_url: &str,
    target_url: &str,
) -> Result<String> {
    let output = Tool::new(&tools.diff)
        .args(["--unsafe", "--with-privileges", reference_url, target_url])
        .run_accepting(DIFF_TOOL_SUCCESS_CODES)
        .await?;
    Ok(output.stdout)
}

pub async fn migration_body(
    tools: &Tools,
    reference_url: &str,
    target_url: &str,
    mode: DiffMode<'_>,
) -> Result<String> {
    match mode {
        DiffMode::Initial { compiled_sql } => Ok(initial_body(compiled_sql)),
        DiffMode::Incremental => {
            let raw = migration_statements(tools, reference_url, target_url).await?;
            Ok(incremental_body(&raw))
        }
    }
}

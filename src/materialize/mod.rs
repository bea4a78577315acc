//! Brings the ephemeral databases to known schema states.

use crate::apply::{ApplyOutcome, Migrator};
use crate::config::Tools;
use crate::pg::connection::PgConnection;
use crate::process::Tool;
use crate::project::Project;
use crate::util::{quote_ident, Result, TrekError};
use std::path::Path;
use tracing::{debug, info, warn};

/// Compiles the model into its creation script and returns the SQL.
///
/// A compiler that runs but rejects the model yields [`TrekError::InvalidModel`];
/// a compiler that cannot be launched is a process failure.
pub async fn compile_model(project: &Project, tools: &Tools) -> Result<String> {
    let sql_path = project.sql_path();
    let output = Tool::new(&tools.model_compiler)
        .arg("--input")
        .arg(project.model_path())
        .arg("--export-to-file")
        .arg("--output")
        .arg(&sql_path)
        .current_dir(project.root())
        .output()
        .await?;

    if !output.success() {
        let detail = if output.stderr.trim().is_empty() {
            output.stdout.trim()
        } else {
            output.stderr.trim()
        };
        return Err(TrekError::InvalidModel(format!(
            "{} could not export {}: {detail}",
            tools.model_compiler,
            project.model_path().display()
        )));
    }

    std::fs::read_to_string(&sql_path).map_err(|e| TrekError::io(&sql_path, e))
}

/// Starts a detached diagram export. It is never awaited and its failure is only logged.
pub fn spawn_diagram_export(project: &Project, tools: &Tools) {
    let tool = Tool::new(&tools.model_compiler)
        .arg("--input")
        .arg(project.model_path())
        .arg("--export-to-png")
        .arg("--output")
        .arg(project.diagram_path())
        .current_dir(project.root());

    tokio::spawn(async move {
        match tool.run().await {
            Ok(_) => debug!("exported model diagram"),
            Err(e) => warn!("Failed to export model diagram: {e}"),
        }
    });
}

/// Creates the configured login roles. Run identically on both instances.
pub async fn create_roles(connection: &PgConnection, users: &[String]) -> Result<()> {
    for user in users {
        connection
            .execute_script(&format!("CREATE ROLE {} WITH LOGIN;", quote_ident(user)))
            .await
            .map_err(|e| TrekError::Database(format!("Failed to create role {user}: {e}")))?;
    }
    Ok(())
}

/// Executes the compiled model. A failure means the model is invalid.
pub async fn apply_to_target(connection: &PgConnection, sql: &str) -> Result<()> {
    connection
        .execute_script(sql)
        .await
        .map_err(|e| TrekError::InvalidModel(format!("Failed to execute target SQL: {e}")))
}

/// Replays every committed migration.
pub async fn apply_to_reference(connection: &PgConnection, migrations_dir: &Path) -> Result<()> {
    match Migrator::new(migrations_dir)?.up(connection).await? {
        ApplyOutcome::Applied(count) => info!("Replayed {count} committed migrations"),
        ApplyOutcome::NoChange => debug!("no committed migrations to replay"),
    }
    Ok(())
}

/// Executes a freshly written migration file.
pub async fn apply_candidate(connection: &PgConnection, path: &Path) -> Result<()> {
    let body = std::fs::read_to_string(path).map_err(|e| TrekError::io(path, e))?;
    connection.execute_script(&body).await.map_err(|e| {
        TrekError::Database(format!(
            "Failed to apply generated migration {}: {e}",
            path.display()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::fake_tool;

    fn project_with_model(dir: &Path) -> Project {
        std::fs::write(dir.join("shop.dbm"), "<dbmodel/>\n").unwrap();
        Project::new(dir, "shop")
    }

    #[tokio::test]
    async fn compile_model_returns_exported_sql() {
        let dir = tempfile::tempdir().unwrap();
        let project = project_with_model(dir.path());
        let tools = Tools {
            model_compiler: fake_tool(
                dir.path(),
                "pgmodeler-cli",
                "printf 'CREATE TABLE users (id bigint);\\n' > \"$5\"",
            ),
            ..Tools::default()
        };

        let sql = compile_model(&project, &tools).await.unwrap();
        assert_eq!(sql, "CREATE TABLE users (id bigint);\n");
        assert!(project.sql_path().exists());
    }

    #[tokio::test]
    async fn rejected_model_is_invalid_model() {
        let dir = tempfile::tempdir().unwrap();
        let project = project_with_model(dir.path());
        let tools = Tools {
            model_compiler: fake_tool(
                dir.path(),
                "pgmodeler-cli",
                "echo 'table users has no columns' >&2; exit 1",
            ),
            ..Tools::default()
        };

        let err = compile_model(&project, &tools).await.unwrap_err();
        assert!(err.is_invalid_model());
        assert!(err.to_string().contains("table users has no columns"));
    }

    #[tokio::test]
    async fn missing_compiler_is_not_invalid_model() {
        let dir = tempfile::tempdir().unwrap();
        let project = project_with_model(dir.path());
        let tools = Tools {
            model_compiler: "pgtrek-no-such-compiler".into(),
            ..Tools::default()
        };

        let err = compile_model(&project, &tools).await.unwrap_err();
        assert!(matches!(err, TrekError::Process(_)));
    }

    #[tokio::test]
    async fn diagram_export_failure_does_not_surface() {
        let dir = tempfile::tempdir().unwrap();
        let project = project_with_model(dir.path());
        let tools = Tools {
            model_compiler: fake_tool(dir.path(), "pgmodeler-cli", "exit 1"),
            ..Tools::default()
        };

        spawn_diagram_export(&project, &tools);
        let sql = compile_model(&project, &tools).await;
        assert!(sql.unwrap_err().is_invalid_model());
    }
}

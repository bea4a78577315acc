//! Auxiliary files rendered after each written migration.

use crate::config::TemplateFile;
use crate::util::{Result, TrekError};
use minijinja::{context, Environment};
use std::path::Path;
use tracing::info;

/// Renders every template with `new_version` bound to the migration number.
///
/// Relative destinations resolve against `root`. Parent directories are
/// created and existing files are overwritten.
pub fn render_templates(root: &Path, templates: &[TemplateFile], new_version: u32) -> Result<()> {
    let mut env = Environment::new();
    env.set_keep_trailing_newline(true);

    for template in templates {
        let destination = root.join(&template.path);

        let rendered = env
            .render_str(&template.content, context! { new_version })
            .map_err(|e| TrekError::Template(format!("{}: {e}", template.path.display())))?;

        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TrekError::io(parent, e))?;
        }
        std::fs::write(&destination, rendered).map_err(|e| TrekError::io(&destination, e))?;

        info!("Wrote template file {}", destination.display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    fn template(path: &str, content: &str) -> TemplateFile {
        TemplateFile {
            path: PathBuf::from(path),
            content: content.to_string(),
        }
    }

    #[test]
    fn renders_new_version() {
        let dir = tempfile::tempdir().unwrap();
        render_templates(
            dir.path(),
            &[template("version.txt", "schema version {{ new_version }}\n")],
            7,
        )
        .unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("version.txt")).unwrap(),
            "schema version 7\n"
        );
    }

    #[test]
    fn creates_parent_directories_and_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("internal/db/version.go");
        fs::create_dir_all(nested.parent().unwrap()).unwrap();
        fs::write(&nested, "stale").unwrap();

        render_templates(
            dir.path(),
            &[
                template("internal/db/version.go", "const Version = {{ new_version }}"),
                template("deploy/k8s/job.yaml", "version: \"{{ new_version + 1 }}\""),
            ],
            12,
        )
        .unwrap();

        assert_eq!(fs::read_to_string(&nested).unwrap(), "const Version = 12");
        assert_eq!(
            fs::read_to_string(dir.path().join("deploy/k8s/job.yaml")).unwrap(),
            "version: \"13\""
        );
    }

    #[test]
    fn invalid_template_is_template_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = render_templates(dir.path(), &[template("broken.txt", "{{ new_version ")], 1)
            .unwrap_err();
        assert!(matches!(err, TrekError::Template(_)));
        assert!(!dir.path().join("broken.txt").exists());
    }

    #[test]
    fn no_templates_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        render_templates(dir.path(), &[], 3).unwrap();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}

//! End-to-end migration generation.
//!
//! A cycle is gated by the [`ChangeMarker`]. When the model changed, two
//! ephemeral databases are provisioned, the model is materialized into the
//! target and the migration history into the reference, the delta becomes the
//! migration body, and the lock file is reconciled. Both databases are released
//! however the cycle ends.

use crate::change::ChangeMarker;
use crate::config::Config;
use crate::diff::{self, DiffMode};
use crate::drift::reconcile_lock;
use crate::materialize;
use crate::migrate::{self, Allocation, OverwritePolicy};
use crate::pg::{EphemeralInstance, Role};
use crate::project::Project;
use crate::template::render_templates;
use crate::util::Result;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Pause between cycles in watch mode.
pub const WATCH_INTERVAL: Duration = Duration::from_millis(100);

/// Turns `true` on Ctrl-C.
pub fn interrupt_signal() -> watch::Receiver<bool> {
    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                let _ = stop_tx.send(true);
            }
            Err(e) => {
                warn!("Failed to listen for interrupts: {e}");
                std::future::pending::<()>().await;
            }
        }
    });
    stop_rx
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    /// Print the statements; `initial` is decided once, from the committed history.
    Stdout { initial: bool },
    File(Allocation),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The model did not change since the last cycle.
    Unchanged,
    /// The model failed to compile or apply. Logged, not fatal.
    InvalidModel,
    Printed(String),
    Written { number: u32, lock_updated: bool },
}

pub struct Generator {
    project: Project,
    config: Config,
    output: Output,
    marker: ChangeMarker,
}

impl Generator {
    pub fn new(project: Project, config: Config, output: Output) -> Self {
        Self {
            project,
            config,
            output,
            marker: ChangeMarker::new(),
        }
    }

    /// Generator writing `NNN_<name>.up.sql`, with the number allocated now.
    pub fn for_file(
        project: Project,
        config: Config,
        name: &str,
        policy: &dyn OverwritePolicy,
    ) -> Result<Self> {
        let migrations_dir = project.migrations_dir();
        migrate::ensure_migrations_dir(&migrations_dir)?;
        let allocation = migrate::allocate(&migrations_dir, name, policy)?;
        Ok(Self::new(project, config, Output::File(allocation)))
    }

    pub fn for_stdout(project: Project, config: Config) -> Result<Self> {
        let migrations_dir = project.migrations_dir();
        migrate::ensure_migrations_dir(&migrations_dir)?;
        let (_, initial) = migrate::next_for_stdout(&migrations_dir)?;
        Ok(Self::new(project, config, Output::Stdout { initial }))
    }

    pub fn output(&self) -> &Output {
        &self.output
    }

    pub fn allocation(&self) -> Option<&Allocation> {
        match &self.output {
            Output::File(allocation) => Some(allocation),
            Output::Stdout { .. } => None,
        }
    }

    fn is_initial(&self) -> bool {
        match &self.output {
            Output::Stdout { initial } => *initial,
            Output::File(allocation) => allocation.is_initial(),
        }
    }

    pub async fn run_cycle(&mut self) -> Result<CycleOutcome> {
        if !self.marker.check_if_updated(&self.project.model_path())? {
            return Ok(CycleOutcome::Unchanged);
        }

        if let Some(allocation) = self.allocation() {
            if migrate::remove_migration(&allocation.path)? {
                info!("Removed previous {}", allocation.path.display());
            }
        }

        let ports = self.config.ports;
        let tools = &self.config.tools;
        let target = EphemeralInstance::acquire(Role::Target, ports.target, tools).await?;
        let reference =
            match EphemeralInstance::acquire(Role::Reference, ports.reference, tools).await {
                Ok(reference) => reference,
                Err(e) => {
                    target.release().await;
                    return Err(e);
                }
            };

        let result = self.generate(&target, &reference).await;

        tokio::join!(target.release(), reference.release());

        match result {
            Err(e) if e.is_invalid_model() => {
                warn!("{e}");
                Ok(CycleOutcome::InvalidModel)
            }
            other => other,
        }
    }

    async fn generate(
        &self,
        target: &EphemeralInstance,
        reference: &EphemeralInstance,
    ) -> Result<CycleOutcome> {
        info!("Generating migration statements");
        let tools = &self.config.tools;

        materialize::spawn_diagram_export(&self.project, tools);
        let compiled = materialize::compile_model(&self.project, tools).await?;

        materialize::create_roles(reference.connection(), &self.config.db_users).await?;
        materialize::create_roles(target.connection(), &self.config.db_users).await?;
        materialize::apply_to_target(target.connection(), &compiled).await?;

        let mode = if self.is_initial() {
            DiffMode::Initial {
                compiled_sql: &compiled,
            }
        } else {
            materialize::apply_to_reference(
                reference.connection(),
                &self.project.migrations_dir(),
            )
            .await?;
            DiffMode::Incremental
        };

        let body = diff::migration_body(tools, &reference.url(), &target.url(), mode).await?;

        let allocation = match &self.output {
            Output::Stdout { .. } => return Ok(CycleOutcome::Printed(body)),
            Output::File(allocation) => allocation,
        };

        migrate::write_migration(&allocation.path, &body)?;
        info!("Wrote migration file {}", allocation.path.display());

        render_templates(
            self.project.root(),
            &self.config.templates,
            allocation.number,
        )?;

        materialize::apply_candidate(reference.connection(), &allocation.path).await?;
        let lock_diff = diff::dump_diff(tools, &reference.url(), &target.url()).await?;
        let lock = reconcile_lock(&self.project.lock_path(), &lock_diff)?;
        if lock.updated {
            info!("Wrote diff lock file");
        }

        Ok(CycleOutcome::Written {
            number: allocation.number,
            lock_updated: lock.updated,
        })
    }

    /// Runs cycles one after another until `shutdown` turns `true` or its
    /// sender is dropped. Errors are logged and the loop continues. Shutdown is
    /// only observed between cycles; every cycle result goes to `on_cycle`.
    pub async fn watch(
        &mut self,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
        mut on_cycle: impl FnMut(&Result<CycleOutcome>),
    ) {
        info!("Watching {} for changes", self.project.model_path().display());

        loop {
            let result = self.run_cycle().await;
            if let Err(e) = &result {
                error!("Failed to run: {e}");
            }
            on_cycle(&result);

            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => break,
            }
        }

        info!("Stopped watching");
    }

    /// Removes the migration file this generator created, if it created one.
    pub fn cleanup(&self) -> Result<()> {
        if let Some(allocation) = self.allocation() {
            if !allocation.preexisting && migrate::remove_migration(&allocation.path)? {
                info!("Removed {}", allocation.path.display());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::NeverOverwrite;
    use std::fs;

    fn config() -> Config {
        Config::from_yaml("model_name: shop\ndb_name: shop\n").unwrap()
    }

    #[test]
    fn file_generator_allocates_and_creates_migrations_dir() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::new(dir.path(), "shop");

        let generator = Generator::for_file(project.clone(), config(), "init", &NeverOverwrite).unwrap();

        assert!(project.migrations_dir().is_dir());
        let allocation = generator.allocation().unwrap();
        assert_eq!(allocation.number, 1);
        assert!(generator.is_initial());
    }

    #[test]
    fn stdout_generator_decides_initial_from_history() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::new(dir.path(), "shop");
        let generator = Generator::for_stdout(project.clone(), config()).unwrap();
        assert_eq!(generator.output(), &Output::Stdout { initial: true });

        fs::write(project.migrations_dir().join("001_init.up.sql"), "").unwrap();
        let generator = Generator::for_stdout(project, config()).unwrap();
        assert_eq!(generator.output(), &Output::Stdout { initial: false });
    }

    #[test]
    fn corrupt_history_fails_construction() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::new(dir.path(), "shop");
        fs::create_dir(project.migrations_dir()).unwrap();
        fs::write(project.migrations_dir().join("init.sql"), "").unwrap();

        assert!(Generator::for_stdout(project.clone(), config()).is_err());
        assert!(Generator::for_file(project, config(), "init", &NeverOverwrite).is_err());
    }

    #[tokio::test]
    async fn empty_model_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::new(dir.path(), "shop");
        fs::write(project.model_path(), "").unwrap();
        let mut generator = Generator::for_file(project.clone(), config(), "init", &NeverOverwrite).unwrap();

        let outcome = generator.run_cycle().await.unwrap();

        assert_eq!(outcome, CycleOutcome::Unchanged);
        assert!(!project.lock_path().exists());
        assert_eq!(fs::read_dir(project.migrations_dir()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn unchanged_model_leaves_candidate_alone() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::new(dir.path(), "shop");
        fs::write(project.model_path(), "<dbmodel/>\n").unwrap();
        let mut generator = Generator::for_file(project.clone(), config(), "init", &NeverOverwrite).unwrap();
        generator.marker.observe("<dbmodel/>");
        let candidate = generator.allocation().unwrap().path.clone();
        fs::write(&candidate, "CREATE TABLE users ();\n").unwrap();

        assert_eq!(generator.run_cycle().await.unwrap(), CycleOutcome::Unchanged);
        assert!(candidate.exists());
    }

    #[tokio::test]
    async fn watch_keeps_cycling_after_errors_until_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::new(dir.path(), "shop");
        let model = project.model_path();
        let mut generator = Generator::for_file(project, config(), "init", &NeverOverwrite).unwrap();
        let (stop_tx, stop_rx) = watch::channel(false);

        let mut errors = 0;
        let mut outcomes = Vec::new();
        let watching = generator.watch(Duration::from_millis(1), stop_rx, |result| match result {
            Err(_) => {
                errors += 1;
                if errors == 3 {
                    fs::write(&model, "").unwrap();
                }
            }
            Ok(outcome) => {
                outcomes.push(outcome.clone());
                stop_tx.send(true).unwrap();
            }
        });
        tokio::time::timeout(Duration::from_secs(10), watching)
            .await
            .expect("watch stops once shutdown is requested");

        assert_eq!(errors, 3);
        assert_eq!(outcomes, vec![CycleOutcome::Unchanged]);
    }

    #[tokio::test]
    async fn watch_finishes_the_running_cycle_before_stopping() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::new(dir.path(), "shop");
        fs::write(project.model_path(), "").unwrap();
        let mut generator = Generator::for_file(project, config(), "init", &NeverOverwrite).unwrap();
        let (stop_tx, stop_rx) = watch::channel(false);
        stop_tx.send(true).unwrap();

        let mut cycles = 0;
        tokio::time::timeout(
            Duration::from_secs(10),
            generator.watch(Duration::from_secs(60), stop_rx, |_| cycles += 1),
        )
        .await
        .expect("watch stops once shutdown is requested");

        assert_eq!(cycles, 1);
    }

    #[test]
    fn cleanup_removes_only_new_files() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::new(dir.path(), "shop");

        let generator = Generator::for_file(project.clone(), config(), "init", &NeverOverwrite).unwrap();
        let path = generator.allocation().unwrap().path.clone();
        fs::write(&path, "CREATE TABLE users ();\n").unwrap();
        generator.cleanup().unwrap();
        assert!(!path.exists());

        fs::write(&path, "CREATE TABLE users ();\n").unwrap();
        let overwriting =
            Generator::for_file(project, config(), "init", &crate::migrate::AlwaysOverwrite).unwrap();
        assert!(overwriting.allocation().unwrap().preexisting);
        overwriting.cleanup().unwrap();
        assert!(path.exists());
    }
}

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use pgtrek::apply::deploy::{deploy, DeployOptions};
use pgtrek::config::Config;
use pgtrek::generate::{interrupt_signal, CycleOutcome, Generator, Output, WATCH_INTERVAL};
use pgtrek::migrate::{validate_migration_name, AlwaysOverwrite, OverwritePolicy, PromptOverwrite};
use pgtrek::project::Project;
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use std::path::Path;
use tracing::warn;

#[derive(Parser)]
#[command(name = "pgtrek")]
#[command(about = "Generate PostgreSQL migrations from a pgModeler model", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate the next migration from the model
    Generate {
        /// Lower-kebab-case migration name
        name: Option<String>,
        /// Keep regenerating whenever the model changes
        #[arg(long)]
        dev: bool,
        /// Remove the generated migration when dev mode stops
        #[arg(long, default_value_t = true, action = ArgAction::Set)]
        cleanup: bool,
        /// Reuse the latest migration's number without asking
        #[arg(long)]
        overwrite: bool,
        /// Print the statements instead of writing a file
        #[arg(long)]
        stdout: bool,
    },

    /// Apply committed migrations to a database
    Apply {
        #[arg(long, env = "PGTREK_PGHOST", default_value = "localhost")]
        host: String,
        #[arg(long, env = "PGTREK_PGPORT", default_value_t = 5432)]
        port: u16,
        #[arg(long, env = "PGTREK_PGUSER", default_value = "postgres")]
        user: String,
        #[arg(long, env = "PGTREK_PGPASSWORD", hide_env_values = true)]
        password: Option<String>,
        /// Drop the database first and apply migrations one by one
        #[arg(long, env = "PGTREK_RESET_DB")]
        reset_db: bool,
        /// Insert testdata/NNN* files after each migration (with --reset-db)
        #[arg(long, env = "PGTREK_INSERT_TEST_DATA")]
        insert_test_data: bool,
        #[arg(long, env = "PGTREK_DISABLE_SSL")]
        disable_ssl: bool,
    },
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let root = std::env::current_dir().context("Failed to get current directory")?;

    match cli.command {
        Commands::Generate {
            name,
            dev,
            cleanup,
            overwrite,
            stdout,
        } => {
            let name = validate_generate_args(name.as_deref(), stdout)?;
            let config = Config::load_from_dir(&root)?;
            generate(&root, config, name, dev, cleanup, overwrite).await
        }
        Commands::Apply {
            host,
            port,
            user,
            password,
            reset_db,
            insert_test_data,
            disable_ssl,
        } => {
            let config = Config::load_from_dir(&root)?;
            let mut server = PgConnectOptions::new()
                .host(&host)
                .port(port)
                .username(&user)
                .ssl_mode(if disable_ssl {
                    PgSslMode::Disable
                } else {
                    PgSslMode::Require
                });
            if let Some(password) = &password {
                server = server.password(password);
            }

            let project = Project::new(&root, &config.model_name);
            let options = DeployOptions {
                server,
                db_name: config.db_name,
                db_users: config.db_users,
                reset: reset_db,
                insert_test_data,
            };
            deploy(&project, &options).await?;
            Ok(())
        }
    }
}

/// Returns the migration name to write, or `None` for stdout generation.
fn validate_generate_args(name: Option<&str>, stdout: bool) -> Result<Option<&str>> {
    match (name, stdout) {
        (Some(_), true) => bail!("pass no name for stdout generation"),
        (None, true) => Ok(None),
        (None, false) => bail!("pass the name of the migration"),
        (Some(name), false) => {
            validate_migration_name(name)?;
            Ok(Some(name))
        }
    }
}

async fn generate(
    root: &Path,
    config: Config,
    name: Option<&str>,
    dev: bool,
    cleanup: bool,
    overwrite: bool,
) -> Result<()> {
    let project = Project::new(root, &config.model_name);

    let mut generator = match name {
        None => Generator::for_stdout(project, config)?,
        Some(name) => {
            let policy: &dyn OverwritePolicy = if overwrite {
                &AlwaysOverwrite
            } else {
                &PromptOverwrite
            };
            Generator::for_file(project, config, name, policy)?
        }
    };

    let stdout = matches!(generator.output(), Output::Stdout { .. });

    if dev {
        generator
            .watch(WATCH_INTERVAL, interrupt_signal(), |result| {
                if let Ok(outcome) = result {
                    print_statements(outcome, stdout);
                }
            })
            .await;
        if cleanup {
            generator.cleanup()?;
        }
        return Ok(());
    }

    let outcome = generator.run_cycle().await?;
    print_statements(&outcome, stdout);
    if outcome == CycleOutcome::Unchanged {
        warn!("The model is empty, no migration was generated");
    }
    Ok(())
}

/// Text printed for a cycle. In stdout mode an invalid model still prints an empty frame.
fn statements_frame(outcome: &CycleOutcome, stdout: bool) -> Option<String> {
    match outcome {
        CycleOutcome::Printed(body) => Some(format!("\n--\n{body}--\n")),
        CycleOutcome::InvalidModel if stdout => Some("\n--\n--\n".to_string()),
        _ => None,
    }
}

fn print_statements(outcome: &CycleOutcome, stdout: bool) {
    if let Some(frame) = statements_frame(outcome, stdout) {
        print!("{frame}");
    }
}

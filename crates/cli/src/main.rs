//! `dag-versioning` CLI entry-point.
//!
//! Available sub-commands:
//! - `validate`  — check a workflow draft JSON file offline.
//! - `diff`      — compare two relation list JSON files.
//! - `migrate`   — run pending database migrations.
//! - `history`   — list the saved versions of a workflow.
//! - `tree-view` — print the tree view of a workflow as JSON.
//! - `gantt`     — print the Gantt view of a workflow as JSON.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde::de::DeserializeOwned;
use tracing::info;
use tracing_subscriber::EnvFilter;

use db::{PgDefinitionStore, PoolSettings};
use engine::{
    EngineConfig, SnowflakeCodeGenerator, TaskRelation, WorkflowDraft, WorkflowEditor,
};

#[derive(Parser)]
#[command(
    name = "dag-versioning",
    about = "Validate, diff and inspect versioned workflow DAGs",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct DbArgs {
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,
    #[arg(long, env = "DB_MAX_CONNECTIONS", default_value_t = 5)]
    max_connections: u32,
    /// Seconds to wait for a free connection.
    #[arg(long, env = "DB_ACQUIRE_TIMEOUT", default_value_t = 10)]
    acquire_timeout: u64,
}

impl DbArgs {
    fn settings(&self) -> PoolSettings {
        PoolSettings {
            acquire_timeout: Duration::from_secs(self.acquire_timeout),
            ..PoolSettings::new(&self.database_url, self.max_connections)
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Validate a workflow draft: relation list rules and acyclicity.
    Validate {
        /// Path to the workflow draft JSON file.
        path: PathBuf,
    },
    /// Show which edges a save of `new` would insert and delete.
    Diff {
        /// Relation list currently stored.
        old: PathBuf,
        /// Relation list about to be saved.
        new: PathBuf,
    },
    /// Run pending database migrations.
    Migrate {
        #[command(flatten)]
        database: DbArgs,
    },
    /// List the saved versions of a workflow, oldest first.
    History {
        #[command(flatten)]
        database: DbArgs,
        #[arg(long)]
        code: i64,
    },
    /// Print the tree view of a workflow over its recent runs.
    TreeView {
        #[command(flatten)]
        database: DbArgs,
        #[arg(long)]
        code: i64,
        /// Number of recent instances to show.
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Print the Gantt view of a workflow over its recent runs.
    Gantt {
        #[command(flatten)]
        database: DbArgs,
        #[arg(long)]
        code: i64,
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Validate { path } => {
            let draft: WorkflowDraft = read_json(&path)?;
            engine::check_relation_list(&draft.relations, &draft.task_definitions)
                .with_context(|| format!("{} is not a valid workflow", path.display()))?;
            let order = engine::build_dag(&draft.relations, &draft.task_definitions)?
                .topological_sort()?;
            println!("Workflow '{}' is valid. Topological order: {order:?}", draft.name);
        }
        Command::Diff { old, new } => {
            let old: Vec<TaskRelation> = read_json(&old)?;
            let new: Vec<TaskRelation> = read_json(&new)?;
            let diff = engine::compute_edge_diff(&old, &new);
            println!("{}", serde_json::to_string_pretty(&diff)?);
        }
        Command::Migrate { database } => {
            let pool = db::pool::create_pool(&database.settings())
                .await
                .context("failed to connect to database")?;
            db::pool::run_migrations(&pool).await.context("migration failed")?;
            info!("migrations applied");
        }
        Command::History { database, code } => {
            let editor = connect(&database).await?;
            let history = editor.versions().history(code).await?;
            println!("{}", serde_json::to_string_pretty(&history)?);
        }
        Command::TreeView { database, code, limit } => {
            let editor = connect(&database).await?;
            let view = editor.tree_view(code, limit).await?;
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        Command::Gantt { database, code, limit } => {
            let editor = connect(&database).await?;
            let view = editor.gantt_view(code, limit).await?;
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
    }

    Ok(())
}

async fn connect(database: &DbArgs) -> anyhow::Result<WorkflowEditor> {
    let pool = db::pool::create_pool(&database.settings())
        .await
        .context("failed to connect to database")?;
    let host = std::env::var("HOSTNAME").unwrap_or_default();
    Ok(WorkflowEditor::new(
        Arc::new(PgDefinitionStore::new(pool)),
        Arc::new(SnowflakeCodeGenerator::for_host(&host)),
        EngineConfig::default(),
    ))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("invalid JSON in {}", path.display()))
}

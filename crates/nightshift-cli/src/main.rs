mod config;
mod daemon;
mod task_cmds;

use anyhow::Context;
use clap::{Parser, Subcommand};

use nightshift_db::config::DbConfig;
use nightshift_db::pool;

#[derive(Parser)]
#[command(name = "nightshift", about = "Background daemon for LLM coding tasks")]
struct Cli {
    /// Data directory (overrides NIGHTSHIFT_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a nightshift config file
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
    /// Run the daemon
    Run,
    /// Queue a task
    Add {
        /// The task prompt
        prompt: String,
        /// Priority: urgent, high, medium, low
        #[arg(long, default_value = "medium")]
        priority: String,
        /// Working directory for the task
        #[arg(long)]
        project: Option<String>,
        /// Task id that must complete first
        #[arg(long)]
        depends_on: Option<i64>,
        /// Override the continuation iteration cap
        #[arg(long)]
        max_iterations: Option<i64>,
        /// Submitter name (defaults to $USER)
        #[arg(long)]
        created_by: Option<String>,
    },
    /// List tasks
    List {
        /// Filter by status: pending, running, done, failed, cancelled
        #[arg(long)]
        status: Option<String>,
        /// Maximum rows to show
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Show one task in full
    Show {
        /// Task id
        id: i64,
    },
    /// Show queue counts and the running task
    Status,
    /// Cancel a pending task
    Cancel {
        /// Task id
        id: i64,
    },
}

fn resolve_db_config(data_dir: Option<&str>) -> DbConfig {
    match data_dir {
        Some(dir) => DbConfig::new(dir),
        None => DbConfig::from_env(),
    }
}

fn cmd_init(db_config: &DbConfig, force: bool) -> anyhow::Result<()> {
    let path = config::config_path(db_config);

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile::default();
    config::save_config(&path, &cfg)?;

    println!("Config written to {}", path.display());
    println!("Edit it to point at your agent runner, then run `nightshift run`.");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let db_config = resolve_db_config(cli.data_dir.as_deref());

    match cli.command {
        Commands::Init { force } => {
            cmd_init(&db_config, force)?;
        }
        Commands::Run => {
            let resolved = config::resolve(&db_config).context("failed to resolve config")?;
            daemon::run_daemon(&db_config, resolved).await?;
        }
        Commands::Add {
            prompt,
            priority,
            project,
            depends_on,
            max_iterations,
            created_by,
        } => {
            let db_pool = pool::create_pool(&db_config).await?;
            let result = task_cmds::run_add(
                &db_pool,
                &prompt,
                &priority,
                project.as_deref(),
                depends_on,
                max_iterations,
                created_by.as_deref(),
            )
            .await;
            db_pool.close().await;
            result?;
        }
        Commands::List { status, limit } => {
            let db_pool = pool::create_pool(&db_config).await?;
            let result = task_cmds::run_list(&db_pool, status.as_deref(), limit).await;
            db_pool.close().await;
            result?;
        }
        Commands::Show { id } => {
            let db_pool = pool::create_pool(&db_config).await?;
            let result = task_cmds::run_show(&db_pool, id).await;
            db_pool.close().await;
            result?;
        }
        Commands::Status => {
            let db_pool = pool::create_pool(&db_config).await?;
            let result = task_cmds::run_status(&db_pool).await;
            db_pool.close().await;
            result?;
        }
        Commands::Cancel { id } => {
            let db_pool = pool::create_pool(&db_config).await?;
            let result = task_cmds::run_cancel(&db_pool, id).await;
            db_pool.close().await;
            result?;
        }
    }

    Ok(())
}

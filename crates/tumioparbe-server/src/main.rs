//! TumioParbe server
//!
//! Runs the HTTP API and the daily automation scheduler, and provides the
//! operational commands used during deployment.

use std::net::SocketAddr;
use std::path::Path;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tumioparbe_server::{
    config::{AppConfig, BkashConfig, DatabaseConfig, SmsConfig},
    db::{create_pool, schema, DbPool},
    routes::build_router,
    state::AppState,
    tasks::{scheduler, TaskKind},
};

#[derive(Parser)]
#[command(name = "tumioparbe-server")]
#[command(version, about = "TumioParbe LMS backend", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the application tables
    Migrate,

    /// Create the database cache table
    SetupCache,

    /// Create an administrator, or promote an existing account
    CreateSuperuser {
        /// Mobile number in 01XXXXXXXXX form
        #[arg(long)]
        phone: String,

        #[arg(long, default_value = "Admin")]
        name: String,

        #[arg(long)]
        password: String,
    },

    /// Serve the HTTP API (default)
    Runserver,

    /// Copy STATICFILES_DIRS into STATIC_ROOT
    Collectstatic,

    /// Run one automation task now, skipping its schedule checks
    RunTask {
        #[arg(value_enum)]
        task: TaskKind,
    },
}

/// Initialize tracing/logging. `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tumioparbe_server=debug,tower_http=debug".into());

    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

fn load_app_config() -> AppConfig {
    AppConfig::from_env().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load app config, using defaults");
        AppConfig::default()
    })
}

async fn connect() -> anyhow::Result<DbPool> {
    let db_config = DatabaseConfig::from_env().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load database config, using defaults");
        DatabaseConfig::default()
    });
    Ok(create_pool(&db_config).await?)
}

async fn build_state(db_pool: DbPool, app_config: AppConfig) -> anyhow::Result<AppState> {
    let sms_config = SmsConfig::from_env().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load SMS config, using defaults");
        SmsConfig::default()
    });
    let bkash_config = BkashConfig::from_env().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load bKash config, using defaults");
        BkashConfig::default()
    });
    Ok(AppState::new(db_pool, app_config, sms_config, bkash_config)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    dotenvy::dotenv().ok();

    init_tracing();

    let cli = Cli::parse();
    let app_config = load_app_config();

    match cli.command.unwrap_or(Commands::Runserver) {
        Commands::Migrate => {
            let pool = connect().await?;
            schema::migrate(&pool).await?;
            tracing::info!("Migrations applied");
        }
        Commands::SetupCache => {
            let pool = connect().await?;
            schema::create_cache_table(&pool).await?;
            tracing::info!("Cache table ready");
        }
        Commands::CreateSuperuser { phone, name, password } => {
            let state = build_state(connect().await?, app_config).await?;
            let user = state.accounts.create_superuser(&phone, &name, &password).await?;
            println!("Superuser {} ready (id {})", user.phone, user.id);
        }
        Commands::Collectstatic => {
            let mut copied = 0;
            for source in &app_config.staticfiles_dirs {
                copied += copy_tree(Path::new(source), Path::new(&app_config.static_root)).await?;
            }
            println!("{} static files copied to '{}'", copied, app_config.static_root);
        }
        Commands::RunTask { task } => {
            let state = build_state(connect().await?, app_config).await?;
            let result = state.automation.run(task, true).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Runserver => runserver(app_config).await?,
    }

    Ok(())
}

async fn runserver(app_config: AppConfig) -> anyhow::Result<()> {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting TumioParbe server"
    );
    tracing::info!(
        host = %app_config.host,
        port = app_config.port,
        debug = app_config.debug,
        "Configuration loaded"
    );

    let addr: SocketAddr = app_config.bind_address().parse()?;
    let scheduler_enabled = app_config.scheduler_enabled;
    let state = build_state(connect().await?, app_config).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_handle = scheduler_enabled
        .then(|| tokio::spawn(scheduler::run(state.automation.clone(), shutdown_rx)));

    let app = build_router(state);
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    if let Some(handle) = scheduler_handle {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Scheduler task ended abnormally");
        }
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Copy every file under `source` into `dest`, keeping relative paths.
async fn copy_tree(source: &Path, dest: &Path) -> anyhow::Result<usize> {
    if !tokio::fs::try_exists(source).await? {
        tracing::warn!(dir = %source.display(), "Static directory not found, skipping");
        return Ok(0);
    }

    let mut copied = 0;
    let mut pending = vec![source.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                pending.push(path);
                continue;
            }
            let target = dest.join(path.strip_prefix(source)?);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::copy(&path, &target).await?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}

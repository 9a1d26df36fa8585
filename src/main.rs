//! MedScript - prescription records for doctors and their patients
//! Mission: Issue, deliver and verify prescriptions

use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use medscript_backend::{
    app::{build_router, seed_admin, AppState},
    config::AppConfig,
    mail::{LogMailer, Mailer, SmtpMailer},
    middleware::RateLimitLayer,
    store::open_store,
};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "medscript")]
#[command(about = "Prescription records API server")]
struct Cli {
    /// TOML config file; environment variables override its values
    #[arg(short, long, env = "MEDSCRIPT_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, e.g. 0.0.0.0:3000
    #[arg(short, long)]
    bind: Option<String>,

    /// Directory for JSON storage when no database is configured
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// SQLite database file; enables SQLite storage
    #[arg(long)]
    database_path: Option<PathBuf>,
}

impl Cli {
    fn build_config(&self) -> Result<AppConfig> {
        let mut config = match &self.config {
            Some(path) => AppConfig::load(path)?,
            None => AppConfig::default(),
        };
        config.apply_env()?;

        // Flags win over file and environment
        if let Some(bind) = &self.bind {
            config.bind_addr = bind.clone();
        }
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(path) = &self.database_path {
            config.database_path = Some(path.clone());
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize environment and logging
    load_env();
    init_tracing();

    let cli = Cli::parse();
    let config = cli.build_config()?;
    config.warn_insecure_defaults();

    info!(
        "🚀 MedScript starting (v{}, {} storage)",
        env!("CARGO_PKG_VERSION"),
        config.storage_label()
    );

    let store = open_store(&config)?;

    let mailer: Arc<dyn Mailer> = match &config.smtp {
        Some(smtp) => {
            info!("📧 SMTP delivery via {}:{}", smtp.host, smtp.port);
            Arc::new(SmtpMailer::new(smtp)?)
        }
        None => Arc::new(LogMailer),
    };

    let limiter = RateLimitLayer::new(config.rate_limit.to_layer_config());
    let bind_addr = config.bind_addr.clone();

    let state = AppState::new(config, store, mailer)?;
    seed_admin(&state)?;

    if state.config.oauth.google_client_id.is_some() {
        info!("🔐 Google sign-in enabled");
    }

    limiter.spawn_cleanup();
    let app = build_router(state, limiter);

    // Start server
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    info!("🎯 API server listening on {}", bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("Server error")?;

    Ok(())
}

fn load_env() {
    // Standard dotenv search (cwd + parents), then the crate directory
    let _ = dotenv();

    let manifest_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    if manifest_env.exists() {
        let _ = dotenv::from_path(&manifest_env);
    }
}

/// Initialize tracing; RUST_LOG overrides the default filter
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "medscript_backend=debug,medscript=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

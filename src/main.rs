use anyhow::{Context, Result};
use clap::Parser;
use std::{fs, io::ErrorKind, path::Path, process::ExitCode, sync::Arc};
use tokio::{net::TcpListener, signal};
use tracing_subscriber::EnvFilter;
use vidstore::{
    config::{AppConfig, Cli, Command},
    db,
    routes::routes::build_router,
    services::{
        catalog_service::Catalog,
        chunk_store::ChunkStore,
        ingest_service::{IngestPipeline, load_batch},
        probe::DurationProbe,
    },
    state::AppState,
};

/// Pending uploads older than this are treated as abandoned at startup.
const PENDING_UPLOAD_TTL_HOURS: i64 = 1;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = AppConfig::from_env_and_args(&cli.global)?;
    tracing::info!("Starting vidstore with config: {:?}", cfg);

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)
            .with_context(|| format!("creating storage directory {}", cfg.storage_dir))?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    let pool = db::connect(&cfg.database_url, cfg.max_connections).await?;
    db::run_migrations(&pool).await?;
    let db = Arc::new(pool);

    let store = ChunkStore::new(db.clone(), &cfg.storage_dir, cfg.chunk_size);
    let catalog = Catalog::new(db.clone());

    let code = match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            serve(store, catalog, cfg).await?;
            ExitCode::SUCCESS
        }
        Command::Migrate => {
            tracing::info!("Database migration complete.");
            ExitCode::SUCCESS
        }
        Command::Ingest {
            batch,
            ffprobe,
            no_probe,
            replace,
        } => {
            let probe = if no_probe {
                DurationProbe::disabled()
            } else {
                DurationProbe::ffprobe(ffprobe)
            };
            let entries = load_batch(&batch)?;
            let pipeline = IngestPipeline::new(store, catalog, probe);
            if replace {
                let removed = pipeline.clear_catalog().await?;
                println!("Removed {} existing videos", removed);
            }
            let report = pipeline.run_batch(&entries).await;

            for outcome in &report.succeeded {
                println!(
                    "✓ {} -> {} (manifest {})",
                    outcome.path.display(),
                    outcome.video_id,
                    outcome.manifest.id
                );
            }
            for (path, reason) in &report.failed {
                println!("✗ {}: {}", path.display(), reason);
            }
            println!(
                "Upload complete: {} succeeded, {} failed",
                report.succeeded.len(),
                report.failed.len()
            );

            if report.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Command::Remove { video_id } => {
            let pipeline = IngestPipeline::new(store, catalog, DurationProbe::disabled());
            let record = pipeline.remove_video(&video_id).await?;
            println!(
                "Removed {} (manifest {})",
                record.video_id, record.manifest_ref
            );
            ExitCode::SUCCESS
        }
        Command::Stats => {
            let videos = catalog.count().await?;
            let manifests = store.list_manifests().await?;
            let bytes: u64 = manifests.iter().map(|m| m.len()).sum();
            println!("videos:    {}", videos);
            println!("manifests: {}", manifests.len());
            let mb = bytes as f64 / (1024.0 * 1024.0);
            println!("payload:   {:.2} MB", mb);
            if !manifests.is_empty() {
                println!("average:   {:.2} MB", mb / manifests.len() as f64);
            }
            ExitCode::SUCCESS
        }
    };

    db.close().await;
    Ok(code)
}

async fn serve(store: ChunkStore, catalog: Catalog, cfg: AppConfig) -> Result<()> {
    match store
        .sweep_pending(chrono::Duration::hours(PENDING_UPLOAD_TTL_HOURS))
        .await
    {
        Ok(0) => {}
        Ok(n) => tracing::info!("Swept {} abandoned uploads", n),
        Err(e) => tracing::warn!("Could not sweep abandoned uploads: {}", e),
    }

    let addr = cfg.addr();
    let port = cfg.port;
    let wildcard_host = matches!(cfg.host.as_str(), "0.0.0.0" | "::");
    let app = build_router(AppState::new(store, catalog, cfg));

    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err) if err.kind() == ErrorKind::PermissionDenied && wildcard_host => {
            let fallback_addr = format!("127.0.0.1:{}", port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

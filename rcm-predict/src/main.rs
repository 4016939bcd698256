//! rcm-predict - Reactor coking prediction batch run
//!
//! One invocation processes one reactor fully and exits: load configuration
//! and model artifacts, run the incremental prediction pipeline, terminate
//! with success or failure. Scheduling and retries belong to the external
//! orchestrator.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rcm_common::config::Settings;
use rcm_common::db::connect_pool;
use rcm_predict::models::loader::JsonArtifactStore;
use rcm_predict::models::repository::ModelRepository;
use rcm_predict::pipeline::Pipeline;
use rcm_predict::store::{InputHandler, SqlSink, SqlSource};
use rcm_predict::topology::Reactor;

/// Command-line arguments for rcm-predict
#[derive(Parser, Debug)]
#[command(name = "rcm-predict")]
#[command(about = "Coking-probability prediction run for one reactor")]
#[command(version)]
struct Args {
    /// Reactor to predict
    #[arg(short, long, env = "RCM_REACTOR")]
    reactor: String,

    /// Path to the settings TOML file
    #[arg(short, long, env = "RCM_CONFIG")]
    config: PathBuf,

    /// Sensor excluded from prediction for this run (repeatable)
    #[arg(long = "exclude-sensor")]
    exclude_sensors: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rcm_predict=info,rcm_common=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    info!("Starting rcm-predict");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Reactor: {}", args.reactor);

    let settings = Settings::load(&args.config)
        .with_context(|| format!("failed to load settings from {}", args.config.display()))?;

    // full topology for every reactor; the target gets the reduced view
    let reactors = settings
        .reactors
        .iter()
        .map(Reactor::from_config)
        .collect::<rcm_predict::PredictResult<Vec<_>>>()
        .context("invalid reactor topology")?;
    let target = reactors
        .iter()
        .find(|r| r.name() == args.reactor)
        .with_context(|| format!("reactor {} is not configured", args.reactor))?
        .exclude_sensors(&args.exclude_sensors);
    info!(
        sensors = target.all_sensors().len(),
        excluded = args.exclude_sensors.len(),
        "Topology loaded"
    );

    let artifacts = JsonArtifactStore::new(&settings.models.artifact_dir);
    info!(
        artifacts = artifacts.artifact_count(),
        dir = %settings.models.artifact_dir.display(),
        "Model artifact store opened"
    );
    let repository =
        ModelRepository::build(&reactors, &artifacts).context("failed to load model artifacts")?;

    let source_pool = connect_pool(&settings.source.database_url)
        .await
        .context("failed to connect to source database")?;
    let sink_pool = connect_pool(&settings.sink.database_url)
        .await
        .context("failed to connect to sink database")?;

    let input = InputHandler::new(
        SqlSource::new(source_pool, settings.source.timestamp_column.clone()),
        settings.source.tables.clone(),
    );
    let sink = SqlSink::new(
        sink_pool,
        settings.sink.timestamp_column.clone(),
        settings.sink.tables.clone(),
    );
    sink.ensure_tables()
        .await
        .context("failed to initialize output tables")?;

    let pipeline = Pipeline::new(
        &target,
        &repository,
        &settings.features,
        settings.tags.analysis_for(&args.reactor)?,
        settings.tags.temperatures_for(&args.reactor)?,
    );
    pipeline.run(&input, &sink).await.context("prediction run failed")?;

    Ok(())
}

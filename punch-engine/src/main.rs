use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};

use punch_engine::checker::CourseChecker;
use punch_engine::config::EngineConfig;
use punch_engine::ingest;
use punch_engine::logging;
use punch_engine::pipeline::{OperatorNotice, Pipeline};
use punch_engine::publisher::{LiveResultsSink, LogSink, ResultPublisher, ResultSink};
use punch_engine::resolver::{CachedDirectory, CompetitorResolver, JsonDirectory};
use punch_engine::transport::{StationSession, build_transport};
use punch_engine::web::{AppState, create_router};

#[derive(Debug, Parser)]
#[command(name = "punch-engine")]
#[command(about = "Collects station punches and validates them against courses")]
struct Args {
    /// Engine configuration (TOML)
    #[arg(short, long, default_value = "punch-engine.toml")]
    config: PathBuf,

    /// Run directory with runs and courses (JSON)
    #[arg(short, long, default_value = "runs.json")]
    directory: PathBuf,

    /// Skip checksum verification on every station
    #[arg(long)]
    no_crc: bool,

    #[arg(short, long, help = "Enable debug logging")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    logging::init(args.verbose);

    let mut config = EngineConfig::from_file(&args.config)?;
    if args.no_crc {
        warn!("checksum verification disabled");
        config = config.without_crc();
    }

    let directory = CachedDirectory::new(
        JsonDirectory::from_file(&args.directory)?,
        &config.cache_config(),
    );
    let resolver = CompetitorResolver::new(Arc::new(directory));

    let mut sinks: Vec<Arc<dyn ResultSink>> = vec![Arc::new(LogSink)];
    if let Some(live) = &config.live_results {
        info!(url = %live.url, "forwarding results to live results service");
        sinks.push(Arc::new(LiveResultsSink::new(live.clone())?));
    }
    let (publisher, delivery) = ResultPublisher::spawn(sinks);

    let (ingest_tx, ingest_rx) = ingest::channel(config.queue.capacity);
    let (mut pipeline, outputs) = Pipeline::new(
        config.pipeline_config(),
        ingest_rx,
        resolver,
        CourseChecker::new(config.checker_config()),
        publisher,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut sessions = Vec::with_capacity(config.stations.len());
    let mut handles = Vec::with_capacity(config.stations.len());
    for station in &config.stations {
        pipeline.register_station(station.id, station.name.clone());
        let (session, handle) = StationSession::new(
            station.clone(),
            build_transport(station),
            ingest_tx.clone(),
            shutdown_rx.clone(),
            config.session_context(),
        );
        sessions.push(tokio::spawn(session.run()));
        handles.push(handle);
    }
    // The pipeline stops once every session has dropped its sender.
    drop(ingest_tx);
    let pipeline_task = tokio::spawn(pipeline.run());

    let mut notices = outputs.notices;
    tokio::spawn(async move {
        while let Some(notice) = notices.recv().await {
            log_notice(&notice);
        }
    });

    let state = AppState::new(outputs.status, outputs.handle, handles);
    let listener = tokio::net::TcpListener::bind(config.web.bind).await?;
    info!(addr = %config.web.bind, stations = config.stations.len(), "punch engine listening");

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for ctrl-c");
            }
            info!("shutting down");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    for result in futures::future::join_all(sessions).await {
        if let Err(e) = result {
            error!(error = %e, "station session panicked");
        }
    }
    pipeline_task.await?;
    delivery.await?;
    info!("stopped");
    Ok(())
}

fn log_notice(notice: &OperatorNotice) {
    match notice {
        OperatorNotice::Pending { id, card, reason } => {
            warn!(pending = id, card = %card, ?reason, "readout needs an operator");
        }
        OperatorNotice::ReadoutFlagged { card, errors } => {
            warn!(card = %card, ?errors, "readout flagged");
        }
        OperatorNotice::StaleResult { run_id, card } => {
            warn!(run = %run_id, card = %card, "stale result dropped");
        }
        OperatorNotice::LinkLost { station, reason } => {
            warn!(station = %station, reason = %reason, "station link lost");
        }
    }
}

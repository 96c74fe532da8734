//! Capsync Camserver
//!
//! Main entry point. Runs as either the master or the slave endpoint of a
//! synchronized capture pair, selected by `ROLE`.

use std::sync::Arc;

use capsync_camserver::{
    camera::{CameraPipeline, SyntheticSensor, STREAMING_FORMAT},
    capture_engine::CaptureEngine,
    capture_orchestrator::{CaptureConfig, CaptureOrchestrator, CaptureSequencer},
    clock,
    clock_probe::ClockProbe,
    slave_gateway::SlaveGateway,
    state::{AppConfig, AppState, NodeRole},
    storage::ArtifactStore,
    stream_supervisor::StreamSupervisor,
    sync_client::SlaveControlClient,
    sync_server::SlaveSyncServer,
    web_api,
};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "capsync_camserver=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    clock::init();

    tracing::info!("Starting Capsync Camserver v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    tracing::info!(
        role = %config.role.as_str(),
        slave_host = %config.slave_host,
        sync_udp_port = config.sync_udp_port,
        capture_dir = %config.capture_dir.display(),
        allow_slave_missing = config.allow_slave_missing,
        "Configuration loaded"
    );

    // Initialize components
    let sensor = Arc::new(SyntheticSensor::new());
    let pipeline = Arc::new(CameraPipeline::new(sensor, config.default_frame_size));
    pipeline
        .initialize(STREAMING_FORMAT, config.default_frame_size)
        .await?;
    tracing::info!("Camera pipeline initialized");

    let store = Arc::new(ArtifactStore::new(&config.capture_dir).await?);
    let stream = Arc::new(StreamSupervisor::new());

    let (orchestrator, engine, slave) = match config.role {
        NodeRole::Master => {
            let capture_config = CaptureConfig::from_app(&config);
            let gateway = Arc::new(SlaveGateway::new(&config.slave_host, config.slave_http_port));
            let control = SlaveControlClient::new(&config.slave_host, config.sync_udp_port);
            let probe = ClockProbe::new(
                &config.slave_host,
                config.sync_udp_port,
                capture_config.probe_pings,
                capture_config.probe_timeout,
            );
            let sequencer = CaptureSequencer::new(
                pipeline.clone(),
                store.clone(),
                stream.clone(),
                control,
                probe,
                Some(gateway.clone()),
                capture_config,
            );
            let orchestrator = CaptureOrchestrator::start(sequencer);
            tracing::info!("CaptureOrchestrator started");
            (Some(orchestrator), None, Some(gateway))
        }
        NodeRole::Slave => {
            let engine = Arc::new(CaptureEngine::new(
                pipeline.clone(),
                store.clone(),
                stream.clone(),
                config.drop_frames,
            ));
            let server =
                SlaveSyncServer::bind(&config.host, config.sync_udp_port, engine.clone()).await?;
            tokio::spawn(server.run());
            tracing::info!("SlaveSyncServer started");
            (None, Some(engine), None)
        }
    };

    // Create application state
    let state = AppState {
        config: config.clone(),
        pipeline,
        stream,
        store,
        orchestrator,
        engine,
        slave,
    };

    // Create router
    let app = web_api::create_router(state).layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

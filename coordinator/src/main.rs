use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tonic::transport::Server;

use loadtest_coordinator_core::config::ConfigLoader;
use loadtest_coordinator_core::distributed::rpc::proto::coordinator_service_server::CoordinatorServiceServer;
use loadtest_coordinator_core::distributed::rpc::{CoordinatorGrpcApi, TonicWorkerTransportFactory};
use loadtest_coordinator_core::distributed::Coordinator;
use loadtest_coordinator_core::store::memory::{
    InMemoryAggregatedRepo, InMemoryResultRepo, InMemoryTestRepo, InMemoryWorkerRepo,
};
#[cfg(feature = "database")]
use loadtest_coordinator_core::store::postgres::{
    PgAggregatedRepo, PgResultRepo, PgTestRepo, PgWorkerRepo,
};
use loadtest_coordinator_core::store::traits::{AggregatedRepo, ResultRepo, TestRepo, WorkerRepo};

/// Distributed HTTP load-test coordinator: dispatches tests across a
/// dynamic fleet of worker agents over gRPC.
#[derive(Parser)]
#[command(name = "loadtest-coordinator")]
#[command(author = "Loadtest Coordinator Contributors")]
#[command(version)]
#[command(about = "Coordinator for distributed HTTP load testing", long_about = None)]
struct Cli {
    /// Path to a config.toml overriding the default search path.
    #[arg(long)]
    config: Option<String>,

    /// Override the gRPC bind address (e.g. 0.0.0.0:7000).
    #[arg(long)]
    bind: Option<String>,
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

    let mut loader = ConfigLoader::new();
    if let Some(path) = &cli.config {
        loader = loader.with_file(path);
    }
    let mut config = loader.load()?;
    if let Some(bind) = cli.bind {
        config.server.bind_address = bind;
    }

    tracing::info!(bind_address = %config.server.bind_address, "starting coordinator");

    let (worker_repo, test_repo, result_repo, aggregated_repo) = build_stores(&config).await?;

    let transport_factory = Arc::new(TonicWorkerTransportFactory);
    let coordinator = Coordinator::with_capacities(
        worker_repo,
        test_repo,
        result_repo,
        aggregated_repo,
        transport_factory,
        config.capacities.intake_queue,
        config.capacities.availability_set,
    );

    let background_tasks = coordinator.spawn_background_tasks();

    let addr: SocketAddr = config
        .server
        .bind_address
        .parse()
        .map_err(|err| anyhow::anyhow!("invalid bind address {}: {err}", config.server.bind_address))?;
    let grpc_api = CoordinatorGrpcApi::new(coordinator);

    tracing::info!(%addr, "gRPC server listening");
    let serve = Server::builder()
        .add_service(CoordinatorServiceServer::new(grpc_api))
        .serve_with_shutdown(addr, async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        });

    serve.await?;

    for task in background_tasks {
        task.abort();
    }

    Ok(())
}

#[cfg(feature = "database")]
async fn build_stores(
    config: &loadtest_coordinator_core::config::Config,
) -> anyhow::Result<(
    Arc<dyn WorkerRepo>,
    Arc<dyn TestRepo>,
    Arc<dyn ResultRepo>,
    Arc<dyn AggregatedRepo>,
)> {
    use sqlx::postgres::PgPoolOptions;

    let Some(database) = &config.database else {
        tracing::info!("no database configured, using in-memory stores");
        return Ok(in_memory_stores());
    };

    tracing::info!("connecting to database");
    let pool = PgPoolOptions::new()
        .max_connections(database.max_connections)
        .connect(&database.dsn)
        .await?;

    if database.run_migrations {
        tracing::info!("running migrations");
        sqlx::migrate!("../migrations").run(&pool).await?;
    }

    Ok((
        Arc::new(PgWorkerRepo::new(pool.clone())),
        Arc::new(PgTestRepo::new(pool.clone())),
        Arc::new(PgResultRepo::new(pool.clone())),
        Arc::new(PgAggregatedRepo::new(pool)),
    ))
}

#[cfg(not(feature = "database"))]
async fn build_stores(
    _config: &loadtest_coordinator_core::config::Config,
) -> anyhow::Result<(
    Arc<dyn WorkerRepo>,
    Arc<dyn TestRepo>,
    Arc<dyn ResultRepo>,
    Arc<dyn AggregatedRepo>,
)> {
    Ok(in_memory_stores())
}

fn in_memory_stores() -> (
    Arc<dyn WorkerRepo>,
    Arc<dyn TestRepo>,
    Arc<dyn ResultRepo>,
    Arc<dyn AggregatedRepo>,
) {
    (
        Arc::new(InMemoryWorkerRepo::default()),
        Arc::new(InMemoryTestRepo::default()),
        Arc::new(InMemoryResultRepo::default()),
        Arc::new(InMemoryAggregatedRepo::default()),
    )
}

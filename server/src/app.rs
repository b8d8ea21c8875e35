//! Core application

use std::sync::Arc;

use anyhow::Result;

use crate::api::ApiServer;
use crate::core::cli::{self, CliConfig, Commands};
use crate::core::config::AppConfig;
use crate::core::constants::{ENV_LOG, QUEUE_CAPACITY};
use crate::core::shutdown::ShutdownService;
use crate::data::memory::{InMemoryNodeSink, InMemorySpanStore};
use crate::data::quota::{FixedQuota, QuotaChecker, UnmeteredQuota};
use crate::data::store::{NodeSink, SpanStore};
use crate::domain::metrics::MetricsPropagator;
use crate::domain::pricing::PricingTable;
use crate::ingest::queue::{self, IngestQueue};
use crate::ingest::service::IngestService;
use crate::ingest::worker::{ObservabilityWorker, TracingWorker};
use crate::query::service::QueryService;

pub struct CoreApp {
    pub config: AppConfig,
    pub shutdown: ShutdownService,
    pub store: Arc<dyn SpanStore>,
    pub sink: Arc<dyn NodeSink>,
    pub quota: Arc<dyn QuotaChecker>,
    pub pricing: Arc<PricingTable>,
    pub ingest: Arc<IngestService>,
    pub query: Arc<QueryService>,
    pub tracing_queue: IngestQueue,
    pub observability_queue: IngestQueue,
}

impl CoreApp {
    /// Run the application with CLI argument parsing
    pub async fn run() -> Result<()> {
        dotenvy::dotenv().ok();
        Self::init_logging();

        tracing::debug!("Application starting");

        let (cli_config, command) = cli::parse();
        match command {
            Some(Commands::Start) | None => {}
        }

        let (app, tracing_worker, observability_worker) = Self::init(&cli_config)?;
        Self::start_server(app, tracing_worker, observability_worker).await
    }

    /// Wire the whole pipeline. Workers are returned unstarted so the
    /// caller controls when they are spawned and registered.
    fn init(cli: &CliConfig) -> Result<(Self, TracingWorker, ObservabilityWorker)> {
        let config = AppConfig::load(cli);
        let shutdown = ShutdownService::new();

        let pricing = Arc::new(PricingTable::embedded()?);
        let store: Arc<dyn SpanStore> = Arc::new(InMemorySpanStore::new());
        let sink: Arc<dyn NodeSink> = Arc::new(InMemoryNodeSink::new());
        let quota: Arc<dyn QuotaChecker> = match config.trace_quota {
            Some(limit) => Arc::new(FixedQuota::new(limit)),
            None => Arc::new(UnmeteredQuota),
        };

        let (tracing_queue, tracing_consumer) = queue::bounded("tracing", QUEUE_CAPACITY);
        let (observability_queue, observability_consumer) =
            queue::bounded("observability", QUEUE_CAPACITY);

        let tracing_worker = TracingWorker::new(
            tracing_consumer,
            store.clone(),
            quota.clone(),
            shutdown.subscribe(),
        );
        let observability_worker =
            ObservabilityWorker::new(observability_consumer, sink.clone(), shutdown.subscribe());

        let ingest = Arc::new(IngestService::new(
            MetricsPropagator::new(pricing.clone()),
            quota.clone(),
            tracing_queue.clone(),
            observability_queue.clone(),
        ));
        let query = Arc::new(QueryService::new(store.clone()));

        let app = Self {
            config,
            shutdown,
            store,
            sink,
            quota,
            pricing,
            ingest,
            query,
            tracing_queue,
            observability_queue,
        };
        Ok((app, tracing_worker, observability_worker))
    }

    fn init_logging() {
        let default_filter = format!("info,{}=info", env!("CARGO_CRATE_NAME"));

        let filter = std::env::var(ENV_LOG)
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or(default_filter);

        tracing_subscriber::fmt()
            .with_target(false)
            .with_thread_ids(false)
            .with_level(true)
            .with_ansi(true)
            .compact()
            .with_env_filter(filter)
            .init();
    }

    async fn start_server(
        app: Self,
        tracing_worker: TracingWorker,
        observability_worker: ObservabilityWorker,
    ) -> Result<()> {
        // Install signal handlers FIRST (before any blocking calls)
        app.shutdown.install_signal_handlers();

        app.shutdown
            .register(tokio::spawn(tracing_worker.run()))
            .await;
        app.shutdown
            .register(tokio::spawn(observability_worker.run()))
            .await;

        tracing::info!(
            host = %app.config.server.host,
            port = app.config.server.port,
            metered = app.config.trace_quota.is_some(),
            "Starting Tracelake"
        );

        let server = ApiServer::new(app);
        let app = server.start().await?;
        app.shutdown.shutdown().await;

        Ok(())
    }
}

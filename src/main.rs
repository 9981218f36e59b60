use std::{process, sync::Arc};

use apalis::prelude::{Monitor, WorkerBuilder, WorkerFactoryFn};
use apalis_cron::CronStream;
use pinfall::{
    application::{
        documents::{DocumentCatalog, DocumentService},
        error::AppError,
        jobs::{JobQueue, JobWorkerContext, process_scheduled_refresh, refresh_schedule, task_queue},
        refresh::{DocumentRefreshJob, DocumentRefresher, RefreshChannelRegistry},
        repos::{DocumentSource, DocumentStorage},
    },
    cache::{CacheBackend, CacheConfig, CacheStore, MemoryCacheBackend},
    config,
    domain::documents::TriggeredBy,
    infra::{
        error::InfraError,
        http::{self, HttpState},
        source::HttpDocumentSource,
        storage::FsDocumentStorage,
        telemetry,
    },
};
use tokio::{net::TcpListener, sync::watch, task::JoinHandle};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Refresh(args) => run_refresh(settings, &args.document).await,
    }
}

/// Everything both commands share.
struct Components {
    catalog: Arc<DocumentCatalog>,
    cache: CacheStore,
    cache_enabled: bool,
    channels: Arc<RefreshChannelRegistry>,
    storage: Arc<dyn DocumentStorage>,
    refresher: Arc<DocumentRefresher>,
}

async fn build_components(settings: &config::Settings) -> Result<Components, AppError> {
    let cache_config = CacheConfig::from(&settings.cache);
    let cache = build_cache(&cache_config).await?;
    let channels = Arc::new(RefreshChannelRegistry::new(
        settings.jobs.channel_capacity.get(),
    ));

    let storage: Arc<dyn DocumentStorage> =
        Arc::new(FsDocumentStorage::new(settings.storage.directory.clone()).map_err(InfraError::from)?);
    let source: Arc<dyn DocumentSource> = Arc::new(
        HttpDocumentSource::new(&settings.source.base_url, settings.source.timeout)
            .map_err(|err| InfraError::configuration(err.to_string()))?,
    );

    let refresher = Arc::new(
        DocumentRefresher::new(source, Arc::clone(&storage), cache.clone(), Arc::clone(&channels))
            .with_state_ttl(settings.jobs.state_ttl),
    );

    info!(
        documents = settings.documents.len(),
        cache_enabled = cache_config.enabled,
        redis = cache_config.redis_url.is_some(),
        storage = %settings.storage.directory.display(),
        "Components ready"
    );

    Ok(Components {
        catalog: Arc::new(DocumentCatalog::new(settings.documents.clone())),
        cache,
        cache_enabled: cache_config.enabled,
        channels,
        storage,
        refresher,
    })
}

async fn build_cache(config: &CacheConfig) -> Result<CacheStore, AppError> {
    let backend: Arc<dyn CacheBackend> = match config.redis_url.as_deref() {
        Some(url) => redis_backend(url).await?,
        None => Arc::new(MemoryCacheBackend::new(config.memory_entry_limit)),
    };
    Ok(CacheStore::new(backend).with_default_ttl(config.default_ttl))
}

#[cfg(feature = "redis")]
async fn redis_backend(url: &str) -> Result<Arc<dyn CacheBackend>, AppError> {
    let backend = pinfall::cache::RedisCacheBackend::connect(url).await?;
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "redis"))]
async fn redis_backend(_url: &str) -> Result<Arc<dyn CacheBackend>, AppError> {
    Err(InfraError::configuration(
        "cache.redis_url is set but pinfall was built without the `redis` feature",
    )
    .into())
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let components = build_components(&settings).await?;

    let (queue, worker) = task_queue(
        settings.jobs.queue_capacity.get(),
        settings.jobs.refresh_concurrency.get(),
        Arc::clone(&components.refresher),
    );
    let worker_handle = tokio::spawn(worker.run());
    let queue: Arc<dyn JobQueue> = Arc::new(queue);

    let documents = DocumentService::new(
        Arc::clone(&components.catalog),
        Arc::clone(&components.storage),
        components.cache.clone(),
        components.cache_enabled,
        Arc::clone(&queue),
    );

    let monitor_handle = spawn_job_monitor(
        JobWorkerContext {
            catalog: Arc::clone(&components.catalog),
            queue,
        },
        &settings.jobs,
    )?;

    let state = HttpState {
        documents,
        cache: components.cache,
        channels: components.channels,
    };
    let result = serve_http(&settings.server, state).await;

    monitor_handle.abort();
    let _ = monitor_handle.await;
    worker_handle.abort();
    let _ = worker_handle.await;

    result
}

async fn run_refresh(settings: config::Settings, document: &str) -> Result<(), AppError> {
    let components = build_components(&settings).await?;
    let document = components.catalog.resolve(document)?;
    let job = DocumentRefreshJob::new(document, TriggeredBy::User);

    info!(document = %document.id, job_id = %job.job_id, "Refreshing document");
    components.refresher.run(&job).await?;
    info!(document = %document.id, "Document refreshed");
    Ok(())
}

fn spawn_job_monitor(
    context: JobWorkerContext,
    jobs: &config::JobsSettings,
) -> Result<JoinHandle<()>, AppError> {
    let schedule = refresh_schedule(&jobs.refresh_schedule)?;

    let refresh_worker = WorkerBuilder::new("scheduled-refresh-worker")
        .data(context)
        .backend(CronStream::new(schedule))
        .build_fn(process_scheduled_refresh);

    let monitor = Monitor::new().register(refresh_worker);

    Ok(tokio::spawn(async move {
        if let Err(err) = monitor.run().await {
            error!(error = %err, "job monitor stopped");
        }
    }))
}

async fn serve_http(server: &config::ServerSettings, state: HttpState) -> Result<(), AppError> {
    let router = http::build_router(state);
    let listener = TcpListener::bind(server.addr)
        .await
        .map_err(InfraError::from)?;
    info!(addr = %server.addr, "Listening");

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let mut handle = tokio::spawn(async move {
        axum::serve(listener, router.into_make_service())
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            })
            .await
    });

    tokio::select! {
        joined = &mut handle => return server_outcome(joined),
        () = shutdown_signal() => {}
    }

    info!(grace_secs = server.graceful_shutdown.as_secs(), "Shutting down");
    let _ = shutdown_tx.send(true);
    match tokio::time::timeout(server.graceful_shutdown, &mut handle).await {
        Ok(joined) => server_outcome(joined),
        Err(_) => {
            warn!("Graceful shutdown timed out, dropping open connections");
            handle.abort();
            Ok(())
        }
    }
}

fn server_outcome(
    joined: Result<Result<(), std::io::Error>, tokio::task::JoinError>,
) -> Result<(), AppError> {
    match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(InfraError::from(err).into()),
        Err(err) => Err(AppError::unexpected(format!("server task failed: {err}"))),
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        futures::future::pending::<()>().await;
    }
}

use std::{process, sync::Arc};

use motorway::{
    application::error::AppError,
    cache::{CacheConfig, CacheEngine, CacheState, EntityCache, HttpRevalidator},
    catalog::{CatalogSource, JsonFileCatalog},
    config,
    infra::{
        error::InfraError,
        http::{self, AdminState, HttpState},
        telemetry,
    },
    search::{BuildOutcome, SearchConfig, SearchIndex},
    store::{self, KvStore},
};
use tokio::{sync::broadcast, task::JoinHandle, try_join};
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

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Reindex(_) => run_reindex(settings).await,
    }
}

struct ApplicationContext {
    store: Arc<dyn KvStore>,
    catalog: Arc<dyn CatalogSource>,
    search: Arc<SearchIndex>,
}

async fn build_application_context(settings: &config::Settings) -> ApplicationContext {
    let store = store::connect(&settings.store).await;
    let catalog: Arc<dyn CatalogSource> =
        Arc::new(JsonFileCatalog::new(settings.catalog.path.clone()));
    let search = Arc::new(SearchIndex::new(
        SearchConfig::from(&settings.search),
        store.clone(),
        catalog.clone(),
    ));

    ApplicationContext {
        store,
        catalog,
        search,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let app = build_application_context(&settings).await;

    let cache_config = CacheConfig::from(&settings.cache);
    let revalidator = HttpRevalidator::new(
        &settings.server.public_base_url,
        cache_config.revalidate_timeout(),
    )
    .map_err(|err| AppError::from(InfraError::from(err)))?;
    let engine = Arc::new(CacheEngine::new(
        cache_config,
        app.store.clone(),
        Arc::new(revalidator),
    ));
    let entities = Arc::new(EntityCache::new(app.store.clone()));

    // Listeners come up immediately; queries fall back to the shared copy
    // or the catalog until the first build lands.
    let startup_build = spawn_startup_build(app.search.clone());
    let refresh_handle = app
        .search
        .clone()
        .spawn_refresh(settings.search.refresh_interval);

    let http_state = HttpState {
        catalog: app.catalog.clone(),
        search: app.search.clone(),
        entities: entities.clone(),
        store: app.store.clone(),
        cache: CacheState::new(engine.clone()),
    };
    let admin_state = AdminState {
        cache: engine,
        search: app.search.clone(),
        entities,
    };

    let result = serve_http(&settings, http_state, admin_state).await;

    for handle in [startup_build, refresh_handle] {
        handle.abort();
        let _ = handle.await;
    }

    result
}

fn spawn_startup_build(search: Arc<SearchIndex>) -> JoinHandle<()> {
    tokio::spawn(async move {
        match search.build().await {
            Ok(BuildOutcome::Built(report)) => info!(
                target = "motorway::search",
                models = report.models,
                terms = report.terms,
                stored = report.stored,
                elapsed_ms = report.elapsed_ms,
                "startup index build finished"
            ),
            Ok(BuildOutcome::AlreadyRunning) => {}
            Err(err) => warn!(
                target = "motorway::search",
                error = %err,
                "startup index build failed, serving from shared copy or catalog"
            ),
        }
    })
}

async fn run_reindex(settings: config::Settings) -> Result<(), AppError> {
    let app = build_application_context(&settings).await;

    info!(
        target = "motorway::reindex",
        catalog = %settings.catalog.path.display(),
        backend = app.store.backend().as_str(),
        "Starting reindex"
    );

    match app.search.build().await.map_err(InfraError::from)? {
        BuildOutcome::Built(report) => {
            if !report.stored {
                return Err(AppError::from(InfraError::configuration(
                    "reindex needs a reachable shared store",
                )));
            }
            info!(
                target = "motorway::reindex",
                models = report.models,
                brands = report.brands,
                terms = report.terms,
                elapsed_ms = report.elapsed_ms,
                "Reindex completed"
            );
            Ok(())
        }
        BuildOutcome::AlreadyRunning => Err(AppError::unexpected("index build already running")),
    }
}

async fn serve_http(
    settings: &config::Settings,
    http_state: HttpState,
    admin_state: AdminState,
) -> Result<(), AppError> {
    let public_router = http::build_router(http_state);
    let admin_router = http::build_admin_router(admin_state);

    let public_listener = tokio::net::TcpListener::bind(settings.server.public_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    let admin_listener = tokio::net::TcpListener::bind(settings.server.admin_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "motorway::http",
        public = %settings.server.public_addr,
        admin = %settings.server.admin_addr,
        "listeners bound"
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let public_server = axum::serve(public_listener, public_router.into_make_service())
        .with_graceful_shutdown(shutdown_signal(shutdown_tx.subscribe()));
    let admin_server = axum::serve(admin_listener, admin_router.into_make_service())
        .with_graceful_shutdown(shutdown_signal(shutdown_tx.subscribe()));

    let grace = settings.server.graceful_shutdown;
    let mut deadline_rx = shutdown_tx.subscribe();
    let deadline = async move {
        let _ = deadline_rx.recv().await;
        tokio::time::sleep(grace).await;
    };

    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        info!(target = "motorway::http", "shutdown requested, draining connections");
        let _ = shutdown_tx.send(());
    });

    tokio::select! {
        result = async { try_join!(public_server, admin_server) } => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
        }
        () = deadline => warn!(
            target = "motorway::http",
            grace_secs = grace.as_secs(),
            "graceful shutdown timed out, dropping open connections"
        ),
    }

    Ok(())
}

async fn shutdown_signal(mut rx: broadcast::Receiver<()>) {
    let _ = rx.recv().await;
}

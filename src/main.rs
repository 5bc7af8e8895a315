use std::{fs::File, process, sync::Arc};

use fascio::{
    application::{
        error::AppError, orchestrator::ProcessingOrchestrator, processors::ProcessorRegistry,
    },
    cache::{CacheConfig, LruProcessingCache},
    config,
    infra::{
        error::InfraError,
        http::{self, HttpState},
        locator::FsResourceLocator,
        model::{ModelGroupResolver, ModelReloadTask},
        telemetry,
    },
};
use tokio::sync::oneshot;
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
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Digest(args) => run_digest(&args),
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let resolver = Arc::new(
        ModelGroupResolver::from_file(
            settings.resources.prefix.clone(),
            &settings.resources.model_file,
        )
        .await?,
    );
    let locator = Arc::new(FsResourceLocator::new(&settings.resources.root));
    let cache = Arc::new(LruProcessingCache::new(&CacheConfig::from(&settings.cache)));

    let orchestrator = ProcessingOrchestrator::builder(resolver.clone(), locator)
        .config_builder(settings.filter.runtime_config_builder())
        .registry(Arc::new(ProcessorRegistry::with_builtins()))
        .cache(cache)
        .reload_task(Arc::new(ModelReloadTask::new(Arc::clone(&resolver))))
        .build()?;
    let orchestrator = Arc::new(orchestrator);

    if let Some(id) = orchestrator.config().management_id() {
        info!(
            target = "fascio::serve",
            management_id = id,
            "management identifier registered"
        );
    }
    info!(
        target = "fascio::serve",
        groups = resolver.model().len(),
        root = %settings.resources.root.display(),
        prefix = %settings.resources.prefix,
        "group model loaded"
    );

    orchestrator.start();
    let state = HttpState::new(
        Arc::clone(&orchestrator),
        settings.resources.prefix.as_str(),
    );
    let result = serve_http(&settings, state).await;
    orchestrator.shutdown().await;

    result
}

async fn serve_http(settings: &config::Settings, state: HttpState) -> Result<(), AppError> {
    let router = http::build_router(state);
    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| InfraError::bind(settings.server.addr, err))?;

    info!(
        target = "fascio::serve",
        addr = %settings.server.addr,
        "listening"
    );

    let (signalled_tx, signalled_rx) = oneshot::channel::<()>();
    let server = axum::serve(listener, router.into_make_service()).with_graceful_shutdown(
        async move {
            shutdown_signal().await;
            let _ = signalled_tx.send(());
        },
    );

    let grace = settings.server.graceful_shutdown;
    tokio::select! {
        result = server => {
            result.map_err(InfraError::Serve)?;
        }
        _ = async {
            if signalled_rx.await.is_ok() {
                tokio::time::sleep(grace).await;
            } else {
                std::future::pending::<()>().await;
            }
        } => {
            warn!(
                target = "fascio::serve",
                grace_secs = grace.as_secs(),
                "graceful shutdown timed out; dropping open connections"
            );
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
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
    info!(target = "fascio::serve", "shutdown signal received");
}

fn run_digest(args: &config::DigestArgs) -> Result<(), AppError> {
    let generator = args.algorithm.generator();
    for path in &args.files {
        let mut file = File::open(path).map_err(|err| InfraError::read(path, err))?;
        let digest = generator
            .digest(&mut file)
            .map_err(|err| InfraError::read(path, err))?;
        println!("{digest}  {}", path.display());
    }
    Ok(())
}

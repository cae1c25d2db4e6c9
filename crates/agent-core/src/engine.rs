//! Wires the components into the two entrypoints the CLI calls: the
//! `--agent` service loop and the client side of `ensure <id> <version>`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use agent_types::Event;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::broker::Broker;
use crate::config::AgentConfig;
use crate::error::CoordinatorError;
use crate::idle::IdleTracker;
use crate::job::{CachePaths, JobContext, JobRegistry};

struct Service {
    config: AgentConfig,
    paths: CachePaths,
    broker: Arc<Broker>,
    idle: Arc<IdleTracker>,
    http: reqwest::Client,
    download_semaphore: Arc<Semaphore>,
    shutdown: CancellationToken,
}

/// Resolves once a SIGINT or (on Unix) SIGTERM is observed.
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let Ok(mut sigterm) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        else {
            std::future::pending::<()>().await;
            return;
        };
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Runs the `--agent` service loop: acquires the singleton, serves clients
/// until idle, then returns. Returns `Ok(())` immediately, without serving
/// anything, if another process already owns the cache root.
pub async fn run_agent(config: AgentConfig) -> Result<(), CoordinatorError> {
    let root = crate::key::normalize(&config.root)?;
    std::fs::create_dir_all(root.join("packages"))?;
    let (service_name, lock_name) = crate::key::derive_pipe_names(&root, &config.pipe_base);

    let Some(singleton) = crate::singleton::try_acquire(&service_name, &lock_name).await? else {
        return Ok(());
    };

    crate::logging::init(config.log_level);
    tracing::info!(root = %root.display(), service = %service_name, "service started");

    let http = reqwest::Client::builder().timeout(config.http_timeout).build()?;
    let download_semaphore = Arc::new(Semaphore::new(config.max_concurrent_downloads.max(1)));
    let paths = CachePaths::new(root);
    let shutdown = CancellationToken::new();

    let service = Arc::new(Service {
        paths: paths.clone(),
        broker: Arc::new(Broker::new()),
        idle: Arc::new(IdleTracker::new()),
        http,
        download_semaphore,
        shutdown: shutdown.clone(),
        config,
    });
    let jobs = Arc::new(JobRegistry::new(service.broker.clone()));

    let sweeper = tokio::spawn(crate::idle::run_sweeper(paths.packages_dir()));
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = singleton.service_listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        service.idle.client_connected();
                        let service = service.clone();
                        let jobs = jobs.clone();
                        connections.spawn(async move {
                            handle_connection(stream, service.clone(), jobs).await;
                            service.idle.client_disconnected();
                        });
                    }
                    Err(e) => tracing::warn!(error = %e, "accept failed"),
                }
            }
            _ = crate::idle::wait_until_idle(&service.idle) => {
                tracing::info!("idle for one full sampling interval, shutting down");
                break;
            }
            _ = wait_for_shutdown_signal() => {
                tracing::info!("shutdown signal received, no longer accepting connections");
                break;
            }
        }
    }

    shutdown.cancel();
    while connections.join_next().await.is_some() {}
    sweeper.abort();
    drop(singleton);
    Ok(())
}

async fn handle_connection(stream: tokio::net::UnixStream, service: Arc<Service>, jobs: Arc<JobRegistry>) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let request = match crate::protocol::read_request(&mut reader).await {
        Ok(r) => r,
        Err(e) => {
            tracing::debug!(error = %e, "failed to read request");
            return;
        }
    };

    let ensure = match request.into_ensure() {
        Ok(e) => e,
        Err(op) => {
            let event = Event::Error {
                id: String::new(),
                version: String::new(),
                message: crate::protocol::unknown_op_message(&op),
            };
            let _ = crate::protocol::write_event(&mut write_half, &event).await;
            return;
        }
    };

    tracing::debug!(id = %ensure.id, version = %ensure.version, "dispatching request");

    let mut receiver = jobs.ensure_stream(&service.paths, &ensure.id, &ensure.version, {
        let service = service.clone();
        move |ctx| run_job(ctx, service)
    });

    loop {
        match receiver.recv().await {
            Ok(event) => {
                let terminal = event.is_terminal();
                if crate::protocol::write_event(&mut write_half, &event).await.is_err() {
                    break;
                }
                if terminal {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn run_job(ctx: JobContext, service: Arc<Service>) {
    ctx.broker.publish(&ctx.key, Event::Start { id: ctx.id.clone(), version: ctx.version.clone() });
    service.idle.job_started();

    let outcome = run_job_inner(&ctx, &service).await;
    service.idle.job_finished();

    match outcome {
        Ok(path) => {
            tracing::info!(id = %ctx.id, version = %ctx.version, path = %path.display(), "job completed");
            ctx.broker.finish(
                &ctx.key,
                Event::Completed {
                    id: ctx.id,
                    version: ctx.version,
                    path: path.to_string_lossy().into_owned(),
                },
            );
        }
        Err(err) => {
            match err.severity() {
                crate::error::Severity::Warning => {
                    tracing::warn!(id = %ctx.id, version = %ctx.version, error = %err, "job failed")
                }
                crate::error::Severity::Error => {
                    tracing::error!(id = %ctx.id, version = %ctx.version, error = %err, "job failed")
                }
            }
            ctx.broker.finish(
                &ctx.key,
                Event::Error { id: ctx.id, version: ctx.version, message: err.wire_message() },
            );
        }
    }
}

async fn run_job_inner(ctx: &JobContext, service: &Service) -> Result<PathBuf, CoordinatorError> {
    if let Some(path) = crate::job::recheck_final_directory(&ctx.paths, &ctx.key) {
        ctx.broker.publish(
            &ctx.key,
            Event::Hit {
                id: ctx.id.clone(),
                version: ctx.version.clone(),
                path: path.to_string_lossy().into_owned(),
            },
        );
        return Ok(path);
    }

    let registry_client =
        agent_registry::RegistryClient::new(service.http.clone(), service.config.registries.clone());
    let resolved = registry_client
        .resolve(&ctx.id, &ctx.version, &service.config.retry_config())
        .await
        .map_err(CoordinatorError::Resolution)?;

    let staging = ctx.paths.new_staging_dir(&ctx.key);
    std::fs::create_dir_all(&staging)?;

    match run_download_pipeline(ctx, service, &resolved, &staging).await {
        Ok(path) => Ok(path),
        Err(e) => {
            let _ = std::fs::remove_dir_all(&staging);
            Err(e)
        }
    }
}

async fn run_download_pipeline(
    ctx: &JobContext,
    service: &Service,
    resolved: &agent_types::ResolvedPackage,
    staging: &std::path::Path,
) -> Result<PathBuf, CoordinatorError> {
    // Resolution does not hold the throttle slot; only the transfer and
    // extraction below do.
    let _permit = service.download_semaphore.acquire().await.expect("semaphore is never closed");

    let tar_path = crate::download::download_and_verify(
        &service.http,
        resolved,
        staging,
        &ctx.broker,
        &ctx.key,
        &ctx.id,
        &ctx.version,
        &service.shutdown,
    )
    .await?;

    let staging_owned = staging.to_path_buf();
    let shutdown = service.shutdown.clone();
    let extract_result =
        tokio::task::spawn_blocking(move || crate::archive::extract(&tar_path, &staging_owned, &shutdown)).await;
    extract_result.map_err(|e| CoordinatorError::Io(std::io::Error::other(e)))??;

    if !service.config.preserve_tarballs {
        let _ = std::fs::remove_file(staging.join("package.tgz"));
    }

    let final_dir = ctx.paths.final_dir(&ctx.key);
    crate::publish::publish_atomic(staging, &final_dir)
}

/// The client side of `ensure <id> <version>`: connects to a running
/// service (starting one if none is listening yet) and streams events
/// until a terminal one arrives.
pub enum EnsureOutcome {
    Path(String),
    Error(String),
}

pub async fn ensure(
    config: &AgentConfig,
    id: &str,
    version: &str,
    mut on_event: impl FnMut(&Event),
) -> Result<EnsureOutcome, CoordinatorError> {
    let root = crate::key::normalize(&config.root)?;
    let (service_name, _lock_name) = crate::key::derive_pipe_names(&root, &config.pipe_base);

    let stream = connect_with_retry(&service_name, config).await?;
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let request = serde_json::json!({"op": "ensure", "id": id, "version": version});
    let mut line = request.to_string();
    line.push('\n');
    write_half.write_all(line.as_bytes()).await.map_err(CoordinatorError::Io)?;

    loop {
        let mut raw = String::new();
        let read = reader.read_line(&mut raw).await.map_err(CoordinatorError::Io)?;
        if read == 0 {
            return Err(CoordinatorError::Protocol(
                "service closed the connection without a terminal event".to_string(),
            ));
        }
        let event: Event = serde_json::from_str(raw.trim_end())?;
        on_event(&event);
        match event {
            Event::Hit { path, .. } | Event::Completed { path, .. } => return Ok(EnsureOutcome::Path(path)),
            Event::Error { message, .. } => return Ok(EnsureOutcome::Error(message)),
            Event::Start { .. } | Event::Progress { .. } => continue,
        }
    }
}

const CLIENT_CONNECT_CEILING: Duration = Duration::from_secs(3);
const CLIENT_RETRY_INTERVAL: Duration = Duration::from_millis(100);

async fn connect_with_retry(
    service_name: &str,
    config: &AgentConfig,
) -> Result<tokio::net::UnixStream, CoordinatorError> {
    if let Ok(stream) = crate::singleton::connect(service_name).await {
        return Ok(stream);
    }

    spawn_agent_process(config)?;

    let deadline = tokio::time::Instant::now() + CLIENT_CONNECT_CEILING;
    loop {
        if let Ok(stream) = crate::singleton::connect(service_name).await {
            return Ok(stream);
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(CoordinatorError::TransientIo(
                "could not connect to the download service after starting it".to_string(),
            ));
        }
        tokio::time::sleep(CLIENT_RETRY_INTERVAL).await;
    }
}

fn spawn_agent_process(config: &AgentConfig) -> Result<(), CoordinatorError> {
    let exe = std::env::current_exe().map_err(CoordinatorError::Io)?;
    let mut command = std::process::Command::new(exe);
    command
        .arg("--agent")
        .arg("--root")
        .arg(&config.root)
        .arg("--pipe")
        .arg(&config.pipe_base)
        .arg("--max")
        .arg(config.max_concurrent_downloads.to_string())
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null());
    if !config.registries.is_empty() {
        command.arg("--registries").arg(config.registries.join(","));
    }
    command.spawn().map_err(CoordinatorError::Io)?;
    Ok(())
}

//! Server lifecycle management: builds the shared [`AppState`], spawns the
//! watchdog/observer/recording/webhook background tasks, and serves the
//! Control API's HTTP router until a shutdown signal arrives.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tracing::{error, info};

use airwave_api::http::{self, AppState};
use airwave_control::arbiter::LivestreamArbiter;
use airwave_control::downloader::ProcessMediaDownloader;
use airwave_control::mixer::{QueueSocket, TcpMixerControlChannel, TcpQueueSocket};
use airwave_control::observer::SourceObserver;
use airwave_control::queue::QueueController;
use airwave_control::recording::RecordingWorker;
use airwave_control::webhook::WebhookDispatcher;
use airwave_core::jwt::JwtService;
use airwave_core::{Catalog, Config, StateStore};

/// Everything the server needs to run, assembled once at startup from
/// [`Config`] and the two infrastructure connections.
pub struct App {
    config: Arc<Config>,
    state: AppState,
    arbiter: Arc<LivestreamArbiter>,
    observer: Arc<SourceObserver>,
    recording_worker: Arc<RecordingWorker>,
    webhooks: Arc<WebhookDispatcher>,
}

impl App {
    /// Wires every component together: the State Store and Catalog Store
    /// connections are assumed already open; this only builds the domain
    /// services and the mixer transport clients that sit in front of them.
    pub fn new(config: Config, state_store: StateStore, catalog: Catalog) -> Self {
        let config = Arc::new(config);

        let user_socket: Arc<dyn QueueSocket> =
            Arc::new(TcpQueueSocket::new(config.observer.user_queue_socket_address.clone()));
        let fallback_socket: Arc<dyn QueueSocket> =
            Arc::new(TcpQueueSocket::new(config.observer.fallback_queue_socket_address.clone()));
        let mixer_control = Arc::new(TcpMixerControlChannel::new(config.livestream.mixer_telnet_address.clone()));
        let downloader = Arc::new(ProcessMediaDownloader::new(
            config.queue.download_command.clone(),
            config.queue.download_dir.clone(),
        ));

        let jwt = Arc::new(JwtService::new(config.jwt.secret.clone(), config.jwt.leeway_seconds));

        let queue = Arc::new(QueueController::new(
            state_store.clone(),
            user_socket.clone(),
            fallback_socket.clone(),
            downloader,
            config.queue.max_song_duration_seconds,
            config.queue.max_file_size_bytes,
            config.queue.dup_window,
            std::time::Duration::from_secs(config.queue.download_timeout_seconds),
        ));

        let event_bus = airwave_control::event_bus::EventBus::new(state_store.clone());

        let arbiter = Arc::new(LivestreamArbiter::new(
            state_store.clone(),
            event_bus.clone(),
            mixer_control,
            std::time::Duration::from_secs(config.livestream.watchdog_interval_seconds),
        ));

        let observer = Arc::new(SourceObserver::new(
            state_store.clone(),
            event_bus.clone(),
            arbiter.clone(),
            queue.clone(),
            user_socket.clone(),
            fallback_socket.clone(),
            std::time::Duration::from_secs(config.observer.poll_interval_seconds),
        ));

        let recording_worker = Arc::new(RecordingWorker::new(
            catalog.clone(),
            event_bus.clone(),
            arbiter.clone(),
            config.recordings.clone(),
        ));

        let webhooks = Arc::new(WebhookDispatcher::new(catalog.clone(), event_bus, config.webhook.clone()));

        let state = AppState {
            config: config.clone(),
            catalog,
            queue,
            arbiter: arbiter.clone(),
            webhooks: webhooks.clone(),
            jwt,
            user_socket,
            fallback_socket,
            state_store,
        };

        Self {
            config,
            state,
            arbiter,
            observer,
            recording_worker,
            webhooks,
        }
    }

    /// Spawns the background tasks (watchdog, source observer, recording
    /// worker, webhook dispatcher) and serves HTTP until `shutdown` fires,
    /// then awaits every task's graceful exit.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        self.recording_worker.reap_orphaned_captures().await?;

        let watchdog = self.arbiter.clone().spawn_watchdog(shutdown.clone());
        let observer = self.observer.clone().spawn(shutdown.clone());
        let recording = self.recording_worker.clone().spawn(shutdown.clone());
        let dispatcher = self.webhooks.clone().spawn(shutdown.clone());

        let addr: SocketAddr = self
            .config
            .server
            .http_address()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid server.host/server.http_port: {e}"))?;

        let router = http::router(self.state).into_make_service_with_connect_info::<SocketAddr>();
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("Control API listening on {}", addr);

        let graceful = async move {
            let _ = shutdown.changed().await;
        };

        if let Err(e) = axum::serve(listener, router).with_graceful_shutdown(graceful).await {
            error!("HTTP server error: {}", e);
        }
        info!("Control API shut down");

        for (name, handle) in [
            ("watchdog", watchdog),
            ("observer", observer),
            ("recording worker", recording),
            ("webhook dispatcher", dispatcher),
        ] {
            if let Err(e) = handle.await {
                error!(task = name, error = %e, "background task panicked");
            }
        }

        Ok(())
    }
}

/// Resolves on SIGINT (`Ctrl+C`) or, on Unix, SIGTERM — whichever arrives
/// first.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => error!("failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl+C, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
}

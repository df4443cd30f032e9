//! Main application run loop

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::AppState;
use crate::errors::AgentError;
use crate::reconcile::retry::{shutdown_requested, ShutdownRx};
use crate::server::serve::serve;
use crate::server::state::ServerState;
use crate::workers::{checkin, log_shipper};

/// Run the host agent
pub async fn run(
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), AgentError> {
    info!("Initializing host agent {}...", options.host_id);

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx, options.lifecycle.clone());

    let app_state = match AppState::init(&options, shutdown_rx.clone()).await {
        Ok(state) => Arc::new(state),
        Err(e) => {
            error!("Failed to start agent: {}", e);
            shutdown_manager.shutdown().await?;
            return Err(e);
        }
    };

    if let Err(e) = start(&options, app_state, &shutdown_rx, &mut shutdown_manager).await {
        error!("Failed to start agent: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");
    shutdown_manager.shutdown().await
}

/// Spawn the workers and the status server around an initialized state
pub async fn start(
    options: &AppOptions,
    app_state: Arc<AppState>,
    shutdown_rx: &ShutdownRx,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), AgentError> {
    init_checkin_worker(
        options.checkin_worker.clone(),
        app_state.clone(),
        shutdown_manager,
        shutdown_rx.clone(),
    )?;

    init_log_shipper_worker(
        options.log_shipper.clone(),
        app_state.clone(),
        shutdown_manager,
        shutdown_rx.clone(),
    )?;

    if options.enable_status_server {
        init_status_server(options, app_state, shutdown_manager, shutdown_rx.clone()).await?;
    }
    Ok(())
}

fn shutdown_future(mut shutdown_rx: ShutdownRx) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        shutdown_requested(&mut shutdown_rx).await;
    })
}

fn init_checkin_worker(
    options: checkin::Options,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    shutdown_rx: ShutdownRx,
) -> Result<(), AgentError> {
    info!("Initializing checkin worker...");

    let adapter = app_state.adapter.clone();
    let checkin_handle = tokio::spawn(async move {
        checkin::run(
            &options,
            adapter.as_ref(),
            tokio::time::sleep,
            shutdown_future(shutdown_rx),
        )
        .await;
    });

    shutdown_manager.with_checkin_worker_handle(checkin_handle)
}

fn init_log_shipper_worker(
    options: log_shipper::Options,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    shutdown_rx: ShutdownRx,
) -> Result<(), AgentError> {
    info!("Initializing log shipper...");

    let reconciler = app_state.reconciler.clone();
    let fanout = app_state.fanout.clone();
    let log_shipper_handle = tokio::spawn(async move {
        log_shipper::run(
            &options,
            reconciler.as_ref(),
            fanout.as_ref(),
            tokio::time::sleep,
            shutdown_future(shutdown_rx),
        )
        .await;
    });

    shutdown_manager.with_log_shipper_worker_handle(log_shipper_handle)
}

async fn init_status_server(
    options: &AppOptions,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    shutdown_rx: ShutdownRx,
) -> Result<(), AgentError> {
    info!("Initializing status server...");

    let server_state = ServerState::new(
        app_state.store.clone(),
        app_state.changes.clone(),
        app_state.adapter.clone(),
    );

    let server_handle = serve(
        &options.server,
        Arc::new(server_state),
        shutdown_future(shutdown_rx),
    )
    .await?;

    shutdown_manager.with_status_server_handle(server_handle)
}

// ================================= SHUTDOWN ===================================== //

pub struct ShutdownManager {
    shutdown_tx: watch::Sender<bool>,
    lifecycle_options: LifecycleOptions,
    status_server_handle: Option<JoinHandle<Result<(), AgentError>>>,
    checkin_worker_handle: Option<JoinHandle<()>>,
    log_shipper_worker_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: watch::Sender<bool>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            status_server_handle: None,
            checkin_worker_handle: None,
            log_shipper_worker_handle: None,
        }
    }

    pub fn with_checkin_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), AgentError> {
        if self.checkin_worker_handle.is_some() {
            return Err(AgentError::ShutdownError("checkin_handle already set".to_string()));
        }
        self.checkin_worker_handle = Some(handle);
        Ok(())
    }

    pub fn with_log_shipper_worker_handle(
        &mut self,
        handle: JoinHandle<()>,
    ) -> Result<(), AgentError> {
        if self.log_shipper_worker_handle.is_some() {
            return Err(AgentError::ShutdownError("log_shipper_handle already set".to_string()));
        }
        self.log_shipper_worker_handle = Some(handle);
        Ok(())
    }

    pub fn with_status_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), AgentError>>,
    ) -> Result<(), AgentError> {
        if self.status_server_handle.is_some() {
            return Err(AgentError::ShutdownError("server_handle already set".to_string()));
        }
        self.status_server_handle = Some(handle);
        Ok(())
    }

    /// Signal every worker, then wait for them within `max_shutdown_delay`
    pub async fn shutdown(&mut self) -> Result<(), AgentError> {
        self.shutdown_tx.send_replace(true);

        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.lifecycle_options.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), AgentError> {
        info!("Shutting down host agent...");

        // 1. Checkin worker, interrupting any health check wait
        if let Some(handle) = self.checkin_worker_handle.take() {
            handle.await.map_err(|e| AgentError::ShutdownError(e.to_string()))?;
        }

        // 2. Log shipper
        if let Some(handle) = self.log_shipper_worker_handle.take() {
            handle.await.map_err(|e| AgentError::ShutdownError(e.to_string()))?;
        }

        // 3. Status server
        if let Some(handle) = self.status_server_handle.take() {
            handle.await.map_err(|e| AgentError::ShutdownError(e.to_string()))??;
        }

        info!("Shutdown complete");
        Ok(())
    }
}

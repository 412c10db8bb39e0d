//! Gateway assembly: child, router, sweeper and HTTP server.

use std::net::SocketAddr;
use std::sync::Arc;

use prometheus_client::registry::Registry;
use stdiogate_core::lifecycle::LifecycleManager;
use stdiogate_core::metrics::GatewayMetrics;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::GatewayConfig;
use crate::error::{StartupError, SupervisorError};
use crate::router::{MessageRouter, RouterConfig, SweepConfig, spawn_sweeper};
use crate::server::{AppState, app};
use crate::supervisor::ChildSupervisor;

pub struct Gateway;

impl Gateway {
    /// Spawn the child, bind the listener and start serving.
    ///
    /// The child is launched before the listener is bound, so a provider
    /// that cannot start fails the gateway without ever accepting traffic.
    pub async fn start(
        config: GatewayConfig,
        lifecycle: Arc<LifecycleManager>,
    ) -> Result<RunningGateway, StartupError> {
        let mut registry = Registry::default();
        let metrics = Arc::new(GatewayMetrics::new(&mut registry));
        let router = Arc::new(MessageRouter::new(RouterConfig::from(&config), metrics));

        let supervisor = ChildSupervisor::new(
            config.command.clone(),
            config.restart,
            config.grace,
            router.clone(),
            lifecycle.clone(),
        );
        let first = supervisor.launch()?;

        let addr = config.bind_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| StartupError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| StartupError::Bind { addr, source })?;

        let state = AppState {
            router: router.clone(),
            lifecycle: lifecycle.clone(),
            prom_registry: Arc::new(registry),
            transport: config.transport,
            keep_alive: config.keep_alive,
        };
        let service = app(state, &config.path, config.max_body_bytes);

        let shutdown = lifecycle.shutdown_token();
        let server_shutdown = shutdown.clone();
        let server = tokio::spawn(async move {
            let result = axum::serve(listener, service)
                .with_graceful_shutdown(async move {
                    server_shutdown.cancelled().await;
                    info!("HTTP server draining");
                })
                .await;
            if let Err(e) = result {
                error!(error = %e, "HTTP server failed");
            }
        });

        spawn_sweeper(
            router,
            SweepConfig {
                request_timeout: config.request_timeout,
                session_idle_timeout: config.session_idle_timeout,
            },
            shutdown.clone(),
        );
        let supervisor = tokio::spawn(supervisor.run(first, shutdown));

        lifecycle.mark_ready();
        info!(
            addr = %local_addr,
            path = %config.path,
            transport = ?config.transport,
            program = %config.command.program,
            "gateway ready"
        );

        Ok(RunningGateway {
            local_addr,
            lifecycle,
            supervisor,
            server,
        })
    }
}

pub struct RunningGateway {
    local_addr: SocketAddr,
    lifecycle: Arc<LifecycleManager>,
    supervisor: JoinHandle<Result<(), SupervisorError>>,
    server: JoinHandle<()>,
}

impl RunningGateway {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }

    /// Request a graceful stop. Idempotent.
    pub fn shutdown(&self) {
        self.lifecycle.begin_shutdown();
    }

    /// Run until the gateway stops.
    ///
    /// Returns the supervisor's verdict: `Ok` after a requested shutdown,
    /// `RestartsExhausted` when the child could not be kept alive.
    pub async fn wait(self) -> Result<(), SupervisorError> {
        let outcome = match self.supervisor.await {
            Ok(result) => result,
            Err(e) => Err(SupervisorError::Task(e)),
        };
        // Exhaustion ends the supervisor without a shutdown request.
        self.lifecycle.begin_shutdown();
        if let Err(e) = self.server.await {
            error!(error = %e, "HTTP server task failed");
        }
        self.lifecycle.mark_stopped();
        info!("gateway stopped");
        outcome
    }
}

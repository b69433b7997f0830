//! HTTPS plumbing for the ENI IP webhook.
//!
//! [`WebhookServer`] terminates TLS with the serving certificate from a
//! [`CertBundle`], adds request tracing and a `/health` route, and serves the
//! provided Axum [`Router`] until SIGINT or SIGTERM is received.
//!
//! ```no_run
//! use axum::Router;
//! use eni_webhook_server::{Options, WebhookServer};
//!
//! # async fn docs(bundle: eni_webhook_certs::CertBundle) {
//! let server = WebhookServer::new(Router::new(), Options::default(), &bundle).unwrap();
//! server.run().await.unwrap();
//! # }
//! ```
use axum::{Router, routing::get};
use eni_webhook_certs::CertBundle;
use futures_util::{FutureExt as _, pin_mut, select};
use snafu::{ResultExt, Snafu};
use tokio::{
    net::TcpListener,
    signal::unix::{SignalKind, signal},
};
use tower_http::trace::TraceLayer;

use crate::{constants::HEALTH_PATH, tls::TlsServer};

pub mod constants;
pub mod options;
pub mod tls;

pub use crate::options::Options;

/// A result type alias with the [`WebhookError`] type as the default error type.
pub type Result<T, E = WebhookError> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum WebhookError {
    #[snafu(display("failed to create TLS server"))]
    CreateTlsServer { source: tls::TlsServerError },

    #[snafu(display("failed to run TLS server"))]
    RunTlsServer { source: tls::TlsServerError },

    #[snafu(display("failed to register the {signal} handler"))]
    RegisterSignalHandler {
        source: std::io::Error,
        signal: &'static str,
    },
}

/// A ready-to-use HTTPS webhook server.
pub struct WebhookServer {
    tls_server: TlsServer,
}

impl WebhookServer {
    /// Creates the server. Nothing is bound until [`WebhookServer::run`] is
    /// called.
    pub fn new(router: Router, options: Options, bundle: &CertBundle) -> Result<Self> {
        tracing::trace!("create new webhook server");

        // The health route is added after the trace layer so probes are not traced.
        let router = router
            .layer(TraceLayer::new_for_http())
            .route(HEALTH_PATH, get(|| async { "ok" }));

        tracing::debug!("create TLS server");
        let tls_server =
            TlsServer::new(options.socket_addr, router, bundle).context(CreateTlsServerSnafu)?;

        Ok(Self { tls_server })
    }

    /// Serves connections from an already bound listener without installing
    /// signal handlers. The configured socket address is ignored.
    pub async fn serve(self, tcp_listener: TcpListener) {
        self.tls_server.serve(tcp_listener).await;
    }

    /// Runs the server and shuts it down on SIGINT or SIGTERM.
    ///
    /// Open connections are not drained.
    pub async fn run(self) -> Result<()> {
        let mut sigint = signal(SignalKind::interrupt())
            .context(RegisterSignalHandlerSnafu { signal: "SIGINT" })?;
        let mut sigterm = signal(SignalKind::terminate())
            .context(RegisterSignalHandlerSnafu { signal: "SIGTERM" })?;
        tracing::debug!("created unix signal handlers");

        let future_server = self.tls_server.run().fuse();
        let future_signal = async {
            select! {
                signal = sigint.recv().fuse() => {
                    if signal.is_some() {
                        tracing::info!("received SIGINT, shutting down");
                    }
                },
                signal = sigterm.recv().fuse() => {
                    if signal.is_some() {
                        tracing::info!("received SIGTERM, shutting down");
                    }
                },
            };
        }
        .fuse();

        pin_mut!(future_server);
        pin_mut!(future_signal);

        select! {
            result = future_server => result.context(RunTlsServerSnafu),
            () = future_signal => Ok(()),
        }
    }
}

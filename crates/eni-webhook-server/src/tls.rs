//! A TLS termination server in front of an Axum [`Router`].
use std::{net::SocketAddr, sync::Arc};

use axum::{Router, extract::Request};
use eni_webhook_certs::{CertBundle, DecodeBundleError};
use hyper::{body::Incoming, service::service_fn};
use hyper_util::rt::{TokioExecutor, TokioIo};
use snafu::{ResultExt, Snafu};
use tokio::net::TcpListener;
use tokio_rustls::{
    TlsAcceptor,
    rustls::{
        ServerConfig,
        crypto::ring::default_provider,
        version::{TLS12, TLS13},
    },
};
use tower::ServiceExt;
use tracing::{Instrument, field::Empty, instrument};

pub type Result<T, E = TlsServerError> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum TlsServerError {
    #[snafu(display("failed to decode the serving certificate bundle"))]
    DecodeCertificateBundle { source: DecodeBundleError },

    #[snafu(display("failed to set safe TLS protocol versions"))]
    SetSafeTlsProtocolVersions { source: tokio_rustls::rustls::Error },

    #[snafu(display("the serving certificate and key were rejected by rustls"))]
    ConfigureCertificate { source: tokio_rustls::rustls::Error },

    #[snafu(display("failed to create TCP listener by binding to socket address {socket_addr:?}"))]
    BindTcpListener {
        source: std::io::Error,
        socket_addr: SocketAddr,
    },
}

/// A server which terminates TLS connections with a fixed certificate and
/// hands the decrypted HTTP traffic to the router.
pub struct TlsServer {
    config: ServerConfig,
    socket_addr: SocketAddr,
    router: Router,
}

impl TlsServer {
    #[instrument(name = "create_tls_server", skip(router, bundle))]
    pub fn new(socket_addr: SocketAddr, router: Router, bundle: &CertBundle) -> Result<Self> {
        let certificate_chain = bundle
            .server_certificate_chain_der()
            .context(DecodeCertificateBundleSnafu)?;
        let private_key = bundle
            .server_private_key_der()
            .context(DecodeCertificateBundleSnafu)?;

        let tls_provider = default_provider();
        let mut config = ServerConfig::builder_with_provider(tls_provider.into())
            .with_protocol_versions(&[&TLS12, &TLS13])
            .context(SetSafeTlsProtocolVersionsSnafu)?
            .with_no_client_auth()
            .with_single_cert(certificate_chain, private_key)
            .context(ConfigureCertificateSnafu)?;
        config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

        Ok(Self {
            config,
            socket_addr,
            router,
        })
    }

    /// Binds the TCP listener and serves TLS connections until the future is
    /// dropped. Each TLS stream is served by a Hyper connection which calls
    /// the router.
    pub async fn run(self) -> Result<()> {
        let tcp_listener =
            TcpListener::bind(self.socket_addr)
                .await
                .context(BindTcpListenerSnafu {
                    socket_addr: self.socket_addr,
                })?;
        self.serve(tcp_listener).await;

        Ok(())
    }

    /// Serves connections accepted from an already bound listener.
    pub async fn serve(self, tcp_listener: TcpListener) {
        let tls_acceptor = TlsAcceptor::from(Arc::new(self.config));
        tracing::info!(
            server.address = ?tcp_listener.local_addr().ok(),
            "webhook server listening"
        );

        loop {
            let tls_acceptor = tls_acceptor.clone();
            let router = self.router.clone();

            let (tcp_stream, remote_addr) = match tcp_listener.accept().await {
                Ok((stream, addr)) => (stream, addr),
                Err(err) => {
                    tracing::trace!(%err, "failed to accept incoming TCP connection");
                    continue;
                }
            };

            let span = tracing::debug_span!(
                "accept tls connection",
                client.address = %remote_addr.ip(),
                client.port = remote_addr.port(),
                "network.type" = self.socket_addr.network_type(),
                error = Empty,
            );
            tokio::spawn(
                async move {
                    let tls_stream = match tls_acceptor.accept(tcp_stream).await {
                        Ok(tls_stream) => tls_stream,
                        Err(err) => {
                            tracing::Span::current().record("error", err.to_string().as_str());
                            tracing::trace!(%remote_addr, "error during tls handshake connection");
                            return;
                        }
                    };

                    // Hyper has its own IO traits, `TokioIo` adapts the tokio ones.
                    let tls_stream = TokioIo::new(tls_stream);
                    let hyper_service = service_fn(move |request: Request<Incoming>| {
                        router.clone().oneshot(request)
                    });

                    hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                        .serve_connection_with_upgrades(tls_stream, hyper_service)
                        .await
                        .unwrap_or_else(|err| {
                            tracing::warn!(%err, %remote_addr, "failed to serve connection");
                        });
                }
                .instrument(span),
            );
        }
    }
}

pub trait SocketAddrExt {
    fn network_type(&self) -> &'static str;
}

impl SocketAddrExt for SocketAddr {
    fn network_type(&self) -> &'static str {
        match self {
            SocketAddr::V4(_) => "ipv4",
            SocketAddr::V6(_) => "ipv6",
        }
    }
}

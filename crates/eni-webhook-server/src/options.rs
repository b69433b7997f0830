//! Contains available options to configure the [WebhookServer][crate::WebhookServer].
use std::net::{IpAddr, SocketAddr};

use crate::constants::DEFAULT_SOCKET_ADDRESS;

/// Specifies available webhook server options.
///
/// The [`Default`] implementation binds to `0.0.0.0:443`.
///
/// ```
/// use eni_webhook_server::Options;
///
/// let options = Options::builder()
///     .bind_address([127, 0, 0, 1], 8443)
///     .build();
///
/// let options = Options::builder().bind_port(12345).build();
/// ```
#[derive(Debug)]
pub struct Options {
    /// The HTTPS socket address the [`TcpListener`][tokio::net::TcpListener]
    /// binds to.
    pub socket_addr: SocketAddr,
}

impl Default for Options {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Options {
    pub fn builder() -> OptionsBuilder {
        OptionsBuilder::default()
    }
}

/// Selectively customizes the webhook server [`Options`].
#[derive(Debug, Default)]
pub struct OptionsBuilder {
    socket_addr: Option<SocketAddr>,
}

impl OptionsBuilder {
    /// Sets the socket address the webhook server binds to.
    pub fn bind_address(mut self, bind_ip: impl Into<IpAddr>, bind_port: u16) -> Self {
        self.socket_addr = Some(SocketAddr::new(bind_ip.into(), bind_port));
        self
    }

    pub fn socket_addr(mut self, socket_addr: SocketAddr) -> Self {
        self.socket_addr = Some(socket_addr);
        self
    }

    /// Sets only the IP address, keeping the default port.
    pub fn bind_ip(mut self, bind_ip: impl Into<IpAddr>) -> Self {
        let addr = self.socket_addr.get_or_insert(DEFAULT_SOCKET_ADDRESS);
        addr.set_ip(bind_ip.into());
        self
    }

    /// Sets only the port, keeping the default IP address.
    pub fn bind_port(mut self, bind_port: u16) -> Self {
        let addr = self.socket_addr.get_or_insert(DEFAULT_SOCKET_ADDRESS);
        addr.set_port(bind_port);
        self
    }

    pub fn build(self) -> Options {
        Options {
            socket_addr: self.socket_addr.unwrap_or(DEFAULT_SOCKET_ADDRESS),
        }
    }
}

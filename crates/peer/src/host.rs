//! Session bootstrap over an iroh QUIC endpoint.
//!
//! A [`Host`] owns the bound endpoint. It accepts inbound sessions in the
//! background through [`Host::serve`] and opens outbound ones with
//! [`Host::dial`]. Every session is one bidirectional stream on which the
//! chat sub-protocol has already been negotiated.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use iroh::endpoint::Incoming;
use iroh::{Endpoint, NodeId, RelayMode};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::address::PeerAddress;
use crate::config::NetworkConfig;
use crate::error::{ChatError, ChatResult};
use crate::identity::Identity;
use crate::transport::{QuicSession, SessionRole, TransportSession};

/// A bound endpoint able to accept and open chat sessions.
pub struct Host {
    endpoint: Endpoint,
    identity: Identity,
    protocol: String,
    connect_timeout: Duration,
    negotiate_timeout: Duration,
}

impl Host {
    /// Binds an endpoint for `identity` on `0.0.0.0:<port>`.
    ///
    /// The configured protocol is the only ALPN offered. Relay servers and
    /// discovery are used only when `relay_enabled` is set.
    pub async fn listen(identity: Identity, config: &NetworkConfig) -> ChatResult<Self> {
        let builder = Endpoint::builder()
            .secret_key(identity.secret_key().clone())
            .alpns(vec![config.protocol.as_bytes().to_vec()])
            .bind_addr_v4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.port));

        let builder = if config.relay_enabled {
            builder.discovery_n0()
        } else {
            builder.relay_mode(RelayMode::Disabled).clear_discovery()
        };

        let endpoint = builder
            .bind()
            .await
            .map_err(|e| ChatError::Bind(format!("port {}: {}", config.port, e)))?;

        let host = Self {
            endpoint,
            identity,
            protocol: config.protocol.clone(),
            connect_timeout: config.connect_timeout(),
            negotiate_timeout: config.negotiate_timeout(),
        };

        tracing::info!(
            node_id = %host.node_id(),
            addresses = ?host.local_addresses(),
            "Endpoint bound"
        );
        Ok(host)
    }

    /// Returns the local node id.
    pub fn node_id(&self) -> NodeId {
        self.endpoint.node_id()
    }

    /// Returns the local identity.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Returns the sub-protocol this host speaks.
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// Returns the concrete socket addresses the endpoint is bound to.
    ///
    /// Unspecified bind addresses are reported as loopback so the result
    /// is always dialable from the same machine.
    pub fn local_addresses(&self) -> Vec<SocketAddr> {
        let (v4, v6) = self.endpoint.bound_sockets();
        std::iter::once(v4)
            .chain(v6)
            .map(|addr| {
                let ip = match addr.ip() {
                    IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
                    IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
                    ip => ip,
                };
                SocketAddr::new(ip, addr.port())
            })
            .collect()
    }

    /// Returns the address other peers can dial.
    pub fn local_peer_address(&self) -> PeerAddress {
        PeerAddress::new(self.node_id(), self.local_addresses())
    }

    /// Starts accepting inbound sessions in the background.
    ///
    /// Each incoming connection is handled in its own task; once its chat
    /// stream is negotiated the session is passed to `handler`. A failed
    /// inbound attempt is logged and does not stop the loop. The loop ends
    /// when `cancel` fires or the endpoint is closed.
    pub fn serve<F>(&self, handler: F, cancel: CancellationToken) -> JoinHandle<()>
    where
        F: Fn(QuicSession) + Send + Sync + 'static,
    {
        let endpoint = self.endpoint.clone();
        let protocol = self.protocol.clone();
        let negotiate_timeout = self.negotiate_timeout;
        let handler = Arc::new(handler);

        tokio::spawn(async move {
            loop {
                let incoming = tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!("Accept loop cancelled");
                        break;
                    }
                    incoming = endpoint.accept() => match incoming {
                        Some(incoming) => incoming,
                        None => {
                            tracing::debug!("Endpoint closed, accept loop exiting");
                            break;
                        }
                    },
                };

                let handler = Arc::clone(&handler);
                let protocol = protocol.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    let accepted = tokio::select! {
                        _ = cancel.cancelled() => return,
                        accepted = accept_session(incoming, &protocol, negotiate_timeout) => accepted,
                    };

                    match accepted {
                        Ok(session) => {
                            tracing::info!(
                                session = %session.id(),
                                peer = ?session.peer(),
                                "Accepted inbound session"
                            );
                            handler(session);
                        }
                        Err(e) => tracing::warn!("Inbound session failed: {}", e),
                    }
                });
            }
        })
    }

    /// Opens a session to the peer named by `destination`.
    pub async fn dial(&self, destination: &str) -> ChatResult<QuicSession> {
        let address: PeerAddress = destination.parse()?;
        let node_addr = address.to_node_addr();

        self.endpoint
            .add_node_addr(node_addr.clone())
            .map_err(|e| ChatError::Connection(format!("cannot use address {}: {}", address, e)))?;

        let connection = tokio::time::timeout(
            self.connect_timeout,
            self.endpoint.connect(node_addr, self.protocol.as_bytes()),
        )
        .await
        .map_err(|_| {
            ChatError::Connection(format!(
                "connecting to {} timed out after {:?}",
                address.node_id, self.connect_timeout
            ))
        })?
        .map_err(|e| ChatError::Connection(format!("failed to connect to {}: {}", address.node_id, e)))?;

        let protocol = self.protocol.as_str();
        let session = tokio::time::timeout(self.negotiate_timeout, async {
            let (send, recv) = connection
                .open_bi()
                .await
                .map_err(|e| ChatError::Connection(format!("failed to open stream: {}", e)))?;

            let mut session = TransportSession::from_streams(
                SessionRole::Initiator,
                Some(address.node_id),
                recv,
                send,
            )
            .with_connection(connection.clone());
            session.negotiate_outbound(protocol).await?;
            Ok::<_, ChatError>(session)
        })
        .await
        .map_err(|_| {
            ChatError::Connection(format!(
                "negotiating {} timed out after {:?}",
                protocol, self.negotiate_timeout
            ))
        })??;

        tracing::info!(session = %session.id(), peer = %address.node_id, "Dialed peer");
        Ok(session)
    }

    /// Closes the endpoint and every connection on it.
    pub async fn close(&self) {
        self.endpoint.close().await;
        tracing::info!("Endpoint closed");
    }
}

/// Completes one inbound connection up to a negotiated session.
async fn accept_session(
    incoming: Incoming,
    protocol: &str,
    negotiate_timeout: Duration,
) -> ChatResult<QuicSession> {
    let connection = incoming
        .await
        .map_err(|e| ChatError::Connection(format!("failed to accept connection: {}", e)))?;
    let peer = connection.remote_node_id().ok();

    tokio::time::timeout(negotiate_timeout, async {
        let (send, recv) = connection
            .accept_bi()
            .await
            .map_err(|e| ChatError::Connection(format!("failed to accept stream: {}", e)))?;

        let mut session = TransportSession::from_streams(SessionRole::Responder, peer, recv, send)
            .with_connection(connection.clone());
        session.negotiate_inbound(&[protocol]).await?;
        Ok::<_, ChatError>(session)
    })
    .await
    .map_err(|_| {
        ChatError::Connection(format!(
            "inbound negotiation timed out after {:?}",
            negotiate_timeout
        ))
    })?
}

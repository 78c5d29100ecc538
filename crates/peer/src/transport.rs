//! Transport sessions.
//!
//! A session is one ordered, authenticated byte stream to one peer, carrying
//! one negotiated sub-protocol. It splits into a [`SessionReader`] and a
//! [`SessionWriter`] that own disjoint halves of the stream, so the two chat
//! tasks never share mutable state.
//!
//! Sessions are generic over the stream types. Over the network they wrap an
//! iroh QUIC bidirectional stream ([`QuicSession`]); tests use in-memory
//! duplex pipes.

use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;

use bytes::{Buf, BytesMut};
use futures_util::StreamExt;
use iroh::endpoint::{Connection, RecvStream, SendStream};
use iroh::NodeId;
use protocol::{negotiate, LineCodec};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufWriter, WriteHalf};
use tokio_util::codec::{Decoder, FramedRead};

use crate::error::{ChatError, ChatResult};

/// Unique identifier for a session, used in logs.
pub type SessionId = String;

/// A session carried by a QUIC bidirectional stream.
pub type QuicSession = TransportSession<RecvStream, SendStream>;

/// How a session came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    /// This peer dialed and opened the stream.
    Initiator,
    /// The remote peer dialed; this side accepted the stream.
    Responder,
}

impl fmt::Display for SessionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionRole::Initiator => write!(f, "initiator"),
            SessionRole::Responder => write!(f, "responder"),
        }
    }
}

/// Send side of a session stream.
pub trait OutboundStream: AsyncWrite + Unpin + Send {
    /// Resolves once the peer has consumed everything sent before shutdown.
    ///
    /// Streams without delivery feedback resolve immediately.
    fn delivered(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(std::future::ready(()))
    }
}

impl OutboundStream for SendStream {
    // Dropping the last connection handle closes the connection and may
    // discard unread data, so wait for the peer to read to the end.
    fn delivered(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            if let Err(e) = self.stopped().await {
                tracing::debug!("Send stream ended before delivery: {}", e);
            }
        })
    }
}

impl<T: AsyncWrite + Send> OutboundStream for WriteHalf<T> {}

/// Adapts [`LineCodec`] to the `tokio_util` decoder interface.
#[derive(Debug, Default)]
struct LineDecoder {
    codec: LineCodec,
}

impl Decoder for LineDecoder {
    type Item = Vec<u8>;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<Vec<u8>>> {
        match self.codec.decode(src) {
            Some((frame, consumed)) => {
                src.advance(consumed);
                Ok(Some(frame))
            }
            None => Ok(None),
        }
    }

    // An unterminated tail is handed up as-is; the message codec rejects it.
    fn decode_eof(&mut self, src: &mut BytesMut) -> io::Result<Option<Vec<u8>>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Ok(Some(src.split().to_vec())),
        }
    }
}

/// Receiving half of a session.
pub struct SessionReader<R> {
    frames: FramedRead<R, LineDecoder>,
    _connection: Option<Connection>,
}

impl<R: AsyncRead + Unpin> SessionReader<R> {
    fn new(recv: R) -> Self {
        Self {
            frames: FramedRead::new(recv, LineDecoder::default()),
            _connection: None,
        }
    }

    /// Waits for the next delimiter-terminated chunk.
    ///
    /// Returns the chunk without its delimiter, or `None` once the peer has
    /// closed its send side and everything buffered has been returned.
    pub async fn read_line(&mut self) -> ChatResult<Option<Vec<u8>>> {
        match self.frames.next().await {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(e)) => Err(ChatError::TransportRead(e)),
            None => Ok(None),
        }
    }
}

/// Sending half of a session.
///
/// Writes are buffered until [`flush`](Self::flush).
pub struct SessionWriter<W> {
    inner: BufWriter<W>,
    _connection: Option<Connection>,
}

impl<W: OutboundStream> SessionWriter<W> {
    fn new(send: W) -> Self {
        Self {
            inner: BufWriter::new(send),
            _connection: None,
        }
    }

    /// Queues bytes for sending.
    pub async fn write(&mut self, bytes: &[u8]) -> ChatResult<()> {
        self.inner
            .write_all(bytes)
            .await
            .map_err(ChatError::TransportWrite)
    }

    /// Submits all queued bytes to the transport.
    pub async fn flush(&mut self) -> ChatResult<()> {
        self.inner.flush().await.map_err(ChatError::TransportFlush)
    }

    /// Flushes and closes the send side; the peer sees end of stream.
    ///
    /// Returns once the peer has consumed everything sent, where the
    /// stream can tell.
    pub async fn shutdown(&mut self) -> ChatResult<()> {
        self.inner
            .shutdown()
            .await
            .map_err(ChatError::TransportFlush)?;
        self.inner.get_mut().delivered().await;
        Ok(())
    }
}

/// One byte-stream channel to one peer.
pub struct TransportSession<R, W> {
    id: SessionId,
    role: SessionRole,
    peer: Option<NodeId>,
    protocol: Option<String>,
    reader: SessionReader<R>,
    writer: SessionWriter<W>,
}

impl<R, W> TransportSession<R, W>
where
    R: AsyncRead + Unpin,
    W: OutboundStream,
{
    /// Builds a session from a receive and a send stream.
    pub fn from_streams(role: SessionRole, peer: Option<NodeId>, recv: R, send: W) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            peer,
            protocol: None,
            reader: SessionReader::new(recv),
            writer: SessionWriter::new(send),
        }
    }

    /// Keeps `connection` open for as long as either half is alive.
    ///
    /// QUIC streams do not hold their connection; dropping the last
    /// connection handle closes it.
    pub fn with_connection(mut self, connection: Connection) -> Self {
        self.reader._connection = Some(connection.clone());
        self.writer._connection = Some(connection);
        self
    }

    /// Returns the session id.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Returns how the session was created.
    pub fn role(&self) -> SessionRole {
        self.role
    }

    /// Returns the authenticated remote node id, if known.
    pub fn peer(&self) -> Option<NodeId> {
        self.peer
    }

    /// Returns the negotiated sub-protocol, once negotiation succeeded.
    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    /// Proposes `protocol` and waits for the peer to confirm it.
    pub async fn negotiate_outbound(&mut self, protocol: &str) -> ChatResult<()> {
        let proposal = negotiate::encode_line(protocol)?;
        self.writer.write(&proposal).await?;
        self.writer.flush().await?;

        let reply = self.reader.read_line().await?.ok_or_else(|| {
            ChatError::Connection(format!(
                "peer closed the stream while negotiating {}",
                protocol
            ))
        })?;
        negotiate::check_reply(protocol, &reply)?;

        tracing::debug!(session = %self.id, protocol, "negotiated outbound");
        self.protocol = Some(protocol.to_string());
        Ok(())
    }

    /// Waits for the peer's proposal and accepts it if it is in `supported`.
    ///
    /// An unsupported proposal is refused and the send side is closed.
    pub async fn negotiate_inbound(&mut self, supported: &[&str]) -> ChatResult<String> {
        let proposal = self.reader.read_line().await?.ok_or_else(|| {
            ChatError::Connection("peer closed the stream before proposing a protocol".into())
        })?;

        let (reply, selected) = negotiate::respond(&proposal, supported)?;
        self.writer.write(&reply).await?;
        self.writer.flush().await?;

        match selected {
            Some(protocol) => {
                tracing::debug!(session = %self.id, protocol, "negotiated inbound");
                self.protocol = Some(protocol.to_string());
                Ok(protocol.to_string())
            }
            None => {
                if let Err(e) = self.writer.shutdown().await {
                    tracing::debug!(session = %self.id, "failed to close refused stream: {}", e);
                }
                Err(ChatError::Connection(format!(
                    "peer proposed unsupported protocol {:?}",
                    String::from_utf8_lossy(&proposal)
                )))
            }
        }
    }

    /// Splits into independently owned halves.
    pub fn into_split(self) -> (SessionReader<R>, SessionWriter<W>) {
        (self.reader, self.writer)
    }
}

impl<R, W> fmt::Debug for TransportSession<R, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportSession")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("peer", &self.peer)
            .field("protocol", &self.protocol)
            .finish_non_exhaustive()
    }
}

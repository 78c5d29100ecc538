//! The chat loop.
//!
//! Each session runs two independent tasks. The reader decodes frames from
//! the peer and renders them; the writer takes local input lines, wraps
//! them in an envelope and sends them. The tasks share nothing but a
//! cancellation token, and neither ending stops the other.

use std::future::Future;
use std::io::{self, Stdout, Write};
use std::pin::Pin;

use crossterm::{
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
};
use protocol::{ChatMessage, LineCodec, User};
use tokio::io::AsyncRead;
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::error::ChatError;
use crate::transport::{OutboundStream, SessionId, SessionReader, SessionWriter, TransportSession};

/// Prompt printed after every rendered message.
pub const PROMPT: &str = "> ";

/// Output seam for received messages.
pub trait Renderer: Send + 'static {
    /// Displays one non-blank message.
    fn render(&mut self, message: &ChatMessage) -> io::Result<()>;
}

/// Renders `name : message` in green, then a fresh prompt.
pub struct ConsoleRenderer<W = Stdout> {
    out: W,
}

impl ConsoleRenderer<Stdout> {
    /// Renderer writing to the process stdout.
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> ConsoleRenderer<W> {
    /// Renderer writing to `out`.
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send + 'static> Renderer for ConsoleRenderer<W> {
    fn render(&mut self, message: &ChatMessage) -> io::Result<()> {
        execute!(
            self.out,
            Print("\r"),
            SetForegroundColor(Color::Green),
            Print(message.display_line()),
            ResetColor,
            Print("\n"),
            Print(PROMPT)
        )
    }
}

/// Source of local input lines.
///
/// `None` means the input is exhausted and no more lines will come.
pub trait InputSource: Send + 'static {
    /// Waits for the next line.
    fn next_line(&mut self) -> Pin<Box<dyn Future<Output = Option<String>> + Send + '_>>;
}

impl InputSource for mpsc::Receiver<String> {
    fn next_line(&mut self) -> Pin<Box<dyn Future<Output = Option<String>> + Send + '_>> {
        Box::pin(self.recv())
    }
}

impl InputSource for broadcast::Receiver<String> {
    fn next_line(&mut self) -> Pin<Box<dyn Future<Output = Option<String>> + Send + '_>> {
        Box::pin(async move {
            loop {
                match self.recv().await {
                    Ok(line) => return Some(line),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Input fell behind, skipped {} lines", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
    }
}

/// How a reader task ended.
#[derive(Debug)]
pub enum ReaderOutcome {
    /// The peer closed its side. `messages` counts every decoded frame,
    /// including blank ones that were not rendered.
    Closed { messages: usize },
    /// Reading, decoding or rendering failed.
    Failed(ChatError),
    /// The session was cancelled locally.
    Cancelled,
}

/// How a writer task ended.
#[derive(Debug)]
pub enum WriterOutcome {
    /// Local input ran out; the send side was closed after `sent` messages.
    InputExhausted { sent: usize },
    /// Encoding or sending failed.
    Failed(ChatError),
    /// The session was cancelled locally.
    Cancelled,
}

/// Outcomes of both halves of a finished session.
#[derive(Debug)]
pub struct ChatOutcome {
    pub reader: ReaderOutcome,
    pub writer: WriterOutcome,
}

/// Reads, decodes and renders frames until the stream ends.
pub async fn run_reader<R, T>(
    mut reader: SessionReader<R>,
    mut renderer: T,
    cancel: CancellationToken,
) -> ReaderOutcome
where
    R: AsyncRead + Unpin,
    T: Renderer,
{
    let mut messages = 0;

    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => return ReaderOutcome::Cancelled,
            chunk = reader.read_line() => chunk,
        };

        let chunk = match chunk {
            Ok(Some(chunk)) => chunk,
            Ok(None) => return ReaderOutcome::Closed { messages },
            Err(e) => return ReaderOutcome::Failed(e),
        };

        let message = match protocol::decode(&chunk) {
            Ok(message) => message,
            Err(e) => return ReaderOutcome::Failed(e.into()),
        };
        messages += 1;

        if message.is_blank() {
            tracing::debug!(from = %message.user.name, "Received blank message");
            continue;
        }

        if let Err(e) = renderer.render(&message) {
            return ReaderOutcome::Failed(ChatError::Terminal(e));
        }
    }
}

/// Sends each local input line as one framed envelope from `user`.
///
/// When input is exhausted the send side is closed so the peer sees end of
/// stream.
pub async fn run_writer<W, I>(
    mut writer: SessionWriter<W>,
    user: User,
    mut input: I,
    cancel: CancellationToken,
) -> WriterOutcome
where
    W: OutboundStream,
    I: InputSource,
{
    let codec = LineCodec::new();
    let mut sent = 0;

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => return WriterOutcome::Cancelled,
            line = input.next_line() => line,
        };

        let Some(line) = line else {
            let closed = tokio::select! {
                _ = cancel.cancelled() => return WriterOutcome::Cancelled,
                closed = writer.shutdown() => closed,
            };
            return match closed {
                Ok(()) => WriterOutcome::InputExhausted { sent },
                Err(e) => WriterOutcome::Failed(e),
            };
        };

        let text = line.trim_end_matches(['\r', '\n']);
        let frame = match protocol::encode(text, &user).and_then(|payload| codec.encode(&payload)) {
            Ok(frame) => frame,
            Err(e) => return WriterOutcome::Failed(e.into()),
        };

        let result = tokio::select! {
            _ = cancel.cancelled() => return WriterOutcome::Cancelled,
            result = async {
                writer.write(&frame).await?;
                writer.flush().await
            } => result,
        };

        if let Err(e) = result {
            return WriterOutcome::Failed(e);
        }
        sent += 1;
        tracing::debug!(bytes = frame.len(), "Sent message");
    }
}

/// Handle to the two tasks of a running session.
pub struct ChatHandle {
    id: SessionId,
    cancel: CancellationToken,
    reader: JoinHandle<ReaderOutcome>,
    writer: JoinHandle<WriterOutcome>,
}

impl ChatHandle {
    /// Returns the session id.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Stops both tasks.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for both tasks to end.
    pub async fn join(self) -> Result<ChatOutcome, JoinError> {
        let (reader, writer) = tokio::join!(self.reader, self.writer);
        Ok(ChatOutcome {
            reader: reader?,
            writer: writer?,
        })
    }
}

/// Splits `session` and runs its reader and writer as separate tasks.
///
/// Both tasks observe a child of `parent`, so cancelling `parent` stops
/// every session spawned from it.
pub fn spawn_chat<R, W, I, T>(
    session: TransportSession<R, W>,
    user: User,
    input: I,
    renderer: T,
    parent: &CancellationToken,
) -> ChatHandle
where
    R: AsyncRead + Unpin + Send + 'static,
    W: OutboundStream + 'static,
    I: InputSource,
    T: Renderer,
{
    let id = session.id().clone();
    let cancel = parent.child_token();
    let (reader, writer) = session.into_split();

    let reader = tokio::spawn({
        let id = id.clone();
        let cancel = cancel.clone();
        async move {
            let outcome = run_reader(reader, renderer, cancel).await;
            match &outcome {
                ReaderOutcome::Closed { messages } => {
                    tracing::info!(session = %id, messages, "Peer closed the stream")
                }
                ReaderOutcome::Failed(e) => tracing::warn!(session = %id, "Reader failed: {}", e),
                ReaderOutcome::Cancelled => tracing::debug!(session = %id, "Reader cancelled"),
            }
            outcome
        }
    });

    let writer = tokio::spawn({
        let id = id.clone();
        let cancel = cancel.clone();
        async move {
            let outcome = run_writer(writer, user, input, cancel).await;
            match &outcome {
                WriterOutcome::InputExhausted { sent } => {
                    tracing::info!(session = %id, sent, "Local input ended")
                }
                WriterOutcome::Failed(e) => tracing::warn!(session = %id, "Writer failed: {}", e),
                WriterOutcome::Cancelled => tracing::debug!(session = %id, "Writer cancelled"),
            }
            outcome
        }
    });

    ChatHandle {
        id,
        cancel,
        reader,
        writer,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::test_support::memory_pair;
    use crate::transport::{SessionRole, TransportSession};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    const TIMEOUT: Duration = Duration::from_secs(5);

    /// Records rendered lines instead of printing them.
    #[derive(Clone, Default)]
    struct CaptureRenderer {
        lines: Arc<Mutex<Vec<String>>>,
    }

    impl CaptureRenderer {
        fn lines(&self) -> Vec<String> {
            self.lines.lock().unwrap().clone()
        }
    }

    impl Renderer for CaptureRenderer {
        fn render(&mut self, message: &ChatMessage) -> io::Result<()> {
            self.lines.lock().unwrap().push(message.display_line());
            Ok(())
        }
    }

    struct BrokenRenderer;

    impl Renderer for BrokenRenderer {
        fn render(&mut self, _message: &ChatMessage) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "terminal gone"))
        }
    }

    fn user(name: &str) -> User {
        User::new(name, "abc", "0")
    }

    fn input(lines: &[&str]) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(lines.len().max(1));
        for line in lines {
            tx.try_send(line.to_string()).unwrap();
        }
        rx
    }

    async fn join(handle: ChatHandle) -> ChatOutcome {
        tokio::time::timeout(TIMEOUT, handle.join())
            .await
            .expect("session did not finish")
            .unwrap()
    }

    #[tokio::test]
    async fn test_scenario_a_hello_is_rendered() {
        let (b, a) = memory_pair();
        let cancel = CancellationToken::new();
        let a_screen = CaptureRenderer::default();

        let a_handle = spawn_chat(a, user("A"), input(&[]), a_screen.clone(), &cancel);
        let b_handle = spawn_chat(b, user("B"), input(&["hello\n"]), CaptureRenderer::default(), &cancel);

        let a_outcome = join(a_handle).await;
        let b_outcome = join(b_handle).await;

        assert_eq!(a_screen.lines(), vec!["B : hello".to_string()]);
        assert!(matches!(a_outcome.reader, ReaderOutcome::Closed { messages: 1 }));
        assert!(matches!(b_outcome.writer, WriterOutcome::InputExhausted { sent: 1 }));
        assert!(matches!(b_outcome.reader, ReaderOutcome::Closed { messages: 0 }));
    }

    #[tokio::test]
    async fn test_scenario_b_empty_message_is_received_not_rendered() {
        let (a, b) = memory_pair();
        let cancel = CancellationToken::new();
        let b_screen = CaptureRenderer::default();

        let a_handle = spawn_chat(a, user("A"), input(&[""]), CaptureRenderer::default(), &cancel);
        let b_handle = spawn_chat(b, user("B"), input(&[]), b_screen.clone(), &cancel);

        join(a_handle).await;
        let b_outcome = join(b_handle).await;

        assert!(b_screen.lines().is_empty());
        assert!(matches!(b_outcome.reader, ReaderOutcome::Closed { messages: 1 }));
    }

    #[tokio::test]
    async fn test_blank_message_is_on_the_wire() {
        let (near, mut far) = tokio::io::duplex(4096);
        let (recv, send) = tokio::io::split(near);
        let session = TransportSession::from_streams(SessionRole::Initiator, None, recv, send);
        let (_reader, writer) = session.into_split();

        let outcome = run_writer(writer, user("A"), input(&["\n", "\r\n"]), CancellationToken::new()).await;
        assert!(matches!(outcome, WriterOutcome::InputExhausted { sent: 2 }));

        let mut wire = String::new();
        far.read_to_string(&mut wire).await.unwrap();
        let frame = r#"{"user":{"name":"A","id":"abc","password_hash":"0"},"message":""}"#;
        assert_eq!(wire, format!("{frame}\n{frame}\n"));
    }

    #[tokio::test]
    async fn test_scenario_c_input_end_keeps_reader_alive() {
        let (b, a) = memory_pair();
        let cancel = CancellationToken::new();
        let a_screen = CaptureRenderer::default();
        let b_screen = CaptureRenderer::default();

        let (a_tx, a_rx) = mpsc::channel(4);
        let a_handle = spawn_chat(a, user("A"), a_rx, a_screen.clone(), &cancel);
        let b_handle = spawn_chat(b, user("B"), input(&["only message"]), b_screen.clone(), &cancel);

        // B's input is already exhausted; A still gets the message and EOF.
        a_tx.send("still here".to_string()).await.unwrap();
        drop(a_tx);

        let a_outcome = join(a_handle).await;
        let b_outcome = join(b_handle).await;

        assert_eq!(a_screen.lines(), vec!["B : only message".to_string()]);
        assert!(matches!(a_outcome.reader, ReaderOutcome::Closed { messages: 1 }));
        assert!(matches!(b_outcome.writer, WriterOutcome::InputExhausted { sent: 1 }));

        assert_eq!(b_screen.lines(), vec!["A : still here".to_string()]);
        assert!(matches!(b_outcome.reader, ReaderOutcome::Closed { messages: 1 }));
    }

    #[tokio::test]
    async fn test_trailing_line_terminators_are_trimmed() {
        let (a, b) = memory_pair();
        let cancel = CancellationToken::new();
        let b_screen = CaptureRenderer::default();

        let a_handle = spawn_chat(a, user("A"), input(&["hi\r\n", "  spaced  \n"]), CaptureRenderer::default(), &cancel);
        let b_handle = spawn_chat(b, user("B"), input(&[]), b_screen.clone(), &cancel);

        join(a_handle).await;
        join(b_handle).await;

        assert_eq!(
            b_screen.lines(),
            vec!["A : hi".to_string(), "A :   spaced  ".to_string()]
        );
    }

    #[tokio::test]
    async fn test_malformed_frame_fails_reader_only() {
        let (near, far) = tokio::io::duplex(4096);
        let (recv, send) = tokio::io::split(near);
        let session = TransportSession::from_streams(SessionRole::Responder, None, recv, send);
        let (mut far_recv, mut far_send) = tokio::io::split(far);

        let (tx, rx) = mpsc::channel(4);
        let handle = spawn_chat(session, user("A"), rx, CaptureRenderer::default(), &CancellationToken::new());

        far_send.write_all(b"{\"user\":{\"name\"\n").await.unwrap();
        far_send.flush().await.unwrap();

        // The writer keeps working after the reader gave up.
        tx.send("after".to_string()).await.unwrap();
        let mut buf = vec![0u8; 256];
        let n = tokio::time::timeout(TIMEOUT, far_recv.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let sent = protocol::decode(&buf[..n]).unwrap();
        assert_eq!(sent.message, "after");

        drop(tx);
        let outcome = join(handle).await;
        assert!(matches!(
            outcome.reader,
            ReaderOutcome::Failed(ChatError::MalformedEnvelope(_))
        ));
        assert!(matches!(outcome.writer, WriterOutcome::InputExhausted { sent: 1 }));
    }

    #[tokio::test]
    async fn test_unterminated_tail_is_malformed() {
        let (near, far) = tokio::io::duplex(4096);
        let (recv, send) = tokio::io::split(near);
        let session = TransportSession::from_streams(SessionRole::Responder, None, recv, send);
        let (reader, _writer) = session.into_split();
        let (_far_recv, mut far_send) = tokio::io::split(far);

        far_send.write_all(b"{\"user\":{},\"mess").await.unwrap();
        far_send.shutdown().await.unwrap();

        let outcome = run_reader(reader, CaptureRenderer::default(), CancellationToken::new()).await;
        assert!(matches!(
            outcome,
            ReaderOutcome::Failed(ChatError::MalformedEnvelope(_))
        ));
    }

    #[tokio::test]
    async fn test_flush_failure_ends_writer_only() {
        let (near, far) = tokio::io::duplex(4096);
        let (recv, send) = tokio::io::split(near);
        let session = TransportSession::from_streams(SessionRole::Initiator, None, recv, send);
        drop(far);

        let handle = spawn_chat(session, user("A"), input(&["hi"]), CaptureRenderer::default(), &CancellationToken::new());

        let outcome = join(handle).await;
        assert!(matches!(
            outcome.writer,
            WriterOutcome::Failed(ChatError::TransportFlush(_))
        ));
        assert!(matches!(outcome.reader, ReaderOutcome::Closed { messages: 0 }));
    }

    /// Receive side that fails every read.
    struct ResetStream;

    impl AsyncRead for ResetStream {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            _buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<io::Result<()>> {
            std::task::Poll::Ready(Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "reset by peer",
            )))
        }
    }

    #[tokio::test]
    async fn test_read_failure_ends_reader_only() {
        let (near, mut far) = tokio::io::duplex(4096);
        let (_near_recv, send) = tokio::io::split(near);
        let session = TransportSession::from_streams(SessionRole::Responder, None, ResetStream, send);

        let (tx, rx) = mpsc::channel(4);
        let handle = spawn_chat(session, user("A"), rx, CaptureRenderer::default(), &CancellationToken::new());

        // The writer keeps working after the reader gave up.
        tx.send("still sending".to_string()).await.unwrap();
        drop(tx);
        let mut wire = Vec::new();
        tokio::time::timeout(TIMEOUT, far.read_to_end(&mut wire))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(protocol::decode(&wire).unwrap().message, "still sending");

        let outcome = join(handle).await;
        match outcome.reader {
            ReaderOutcome::Failed(ChatError::TransportRead(e)) => {
                assert_eq!(e.kind(), io::ErrorKind::ConnectionReset)
            }
            other => panic!("unexpected reader outcome: {:?}", other),
        }
        assert!(matches!(outcome.writer, WriterOutcome::InputExhausted { sent: 1 }));
    }

    #[tokio::test]
    async fn test_render_failure_ends_reader() {
        let (a, b) = memory_pair();
        let cancel = CancellationToken::new();

        let a_handle = spawn_chat(a, user("A"), input(&["boom"]), CaptureRenderer::default(), &cancel);
        let b_handle = spawn_chat(b, user("B"), input(&[]), BrokenRenderer, &cancel);

        join(a_handle).await;
        let b_outcome = join(b_handle).await;
        assert!(matches!(
            b_outcome.reader,
            ReaderOutcome::Failed(ChatError::Terminal(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_stops_both_tasks() {
        let (a, _b) = memory_pair();
        let parent = CancellationToken::new();
        let (_tx, rx) = mpsc::channel::<String>(1);

        let handle = spawn_chat(a, user("A"), rx, CaptureRenderer::default(), &parent);
        parent.cancel();

        let outcome = join(handle).await;
        assert!(matches!(outcome.reader, ReaderOutcome::Cancelled));
        assert!(matches!(outcome.writer, WriterOutcome::Cancelled));
    }

    #[tokio::test]
    async fn test_handle_cancel_leaves_parent_untouched() {
        let (a, _b) = memory_pair();
        let parent = CancellationToken::new();
        let (_tx, rx) = mpsc::channel::<String>(1);

        let handle = spawn_chat(a, user("A"), rx, CaptureRenderer::default(), &parent);
        assert!(uuid::Uuid::parse_str(handle.id()).is_ok());
        handle.cancel();

        join(handle).await;
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn test_broadcast_input_skips_lagged_lines() {
        let (tx, mut rx) = broadcast::channel(2);
        for line in ["1", "2", "3", "4"] {
            tx.send(line.to_string()).unwrap();
        }
        drop(tx);

        assert_eq!(rx.next_line().await.as_deref(), Some("3"));
        assert_eq!(rx.next_line().await.as_deref(), Some("4"));
        assert_eq!(rx.next_line().await, None);
    }

    #[test]
    fn test_console_renderer_output() {
        let mut renderer = ConsoleRenderer::new(Vec::new());
        renderer
            .render(&ChatMessage::new(user("B"), "hello"))
            .unwrap();

        let output = String::from_utf8(renderer.into_inner()).unwrap();
        assert!(output.contains("B : hello"));
        assert!(output.ends_with(PROMPT));
    }
}

//! Local console input shared by every session.
//!
//! One task reads lines from the terminal and broadcasts each of them to all
//! subscribed writer tasks. Lines read while nobody is subscribed are held
//! and handed to the next subscriber. When input ends the channel is closed,
//! so every writer sees its input exhausted and closes its send side.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::chat::PROMPT;

/// Lines buffered per subscriber before it starts lagging. Also bounds the
/// lines held while no session is subscribed.
const INPUT_BUFFER: usize = 64;

#[derive(Default)]
struct HubState {
    sender: Option<broadcast::Sender<String>>,
    pending: VecDeque<String>,
}

impl HubState {
    fn deliver(&mut self, line: String) {
        let Some(tx) = self.sender.as_ref().filter(|tx| tx.receiver_count() > 0) else {
            self.hold(line);
            return;
        };
        // A receiver may have gone away since the count was taken
        if let Err(broadcast::error::SendError(line)) = tx.send(line) {
            self.hold(line);
        }
    }

    fn hold(&mut self, line: String) {
        if self.pending.len() == INPUT_BUFFER {
            self.pending.pop_front();
            tracing::debug!("No session connected, oldest held input line dropped");
        }
        self.pending.push_back(line);
    }
}

type SharedState = Arc<Mutex<HubState>>;

/// Fans local input lines out to any number of sessions.
pub struct InputHub {
    state: SharedState,
    task: JoinHandle<()>,
}

impl InputHub {
    /// Reads lines from stdin, printing a prompt before each read.
    pub fn stdin(cancel: CancellationToken) -> Self {
        Self::start(BufReader::new(tokio::io::stdin()), true, cancel)
    }

    /// Reads lines from `input`.
    pub fn spawn<R>(input: R, cancel: CancellationToken) -> Self
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        Self::start(input, false, cancel)
    }

    fn start<R>(input: R, prompt: bool, cancel: CancellationToken) -> Self
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let (tx, _) = broadcast::channel(INPUT_BUFFER);
        let state = Arc::new(Mutex::new(HubState {
            sender: Some(tx),
            pending: VecDeque::new(),
        }));
        let task = tokio::spawn(read_lines(input, prompt, Arc::clone(&state), cancel));
        Self { state, task }
    }

    /// Returns a new receiver for lines read from now on, preceded by any
    /// lines held while no session was subscribed.
    ///
    /// After input has ended the receiver closes once the held lines are
    /// consumed.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        let mut state = lock(&self.state);
        let (tx, rx) = match state.sender.as_ref() {
            Some(tx) => (tx.clone(), tx.subscribe()),
            None => broadcast::channel(INPUT_BUFFER),
        };
        for line in state.pending.drain(..) {
            let _ = tx.send(line);
        }
        rx
    }

    /// Returns true once input has ended.
    pub fn is_closed(&self) -> bool {
        lock(&self.state).sender.is_none()
    }

    /// Waits for the reading task to finish.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            tracing::warn!("Console input task failed: {}", e);
        }
    }
}

fn lock(state: &SharedState) -> MutexGuard<'_, HubState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn read_lines<R>(mut input: R, prompt: bool, state: SharedState, cancel: CancellationToken)
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();

    loop {
        if prompt {
            let mut stdout = std::io::stdout();
            let _ = stdout.write_all(PROMPT.as_bytes()).and_then(|_| stdout.flush());
        }

        buf.clear();
        let read = tokio::select! {
            _ = cancel.cancelled() => break,
            read = input.read_until(b'\n', &mut buf) => read,
        };

        match read {
            Ok(0) => {
                tracing::debug!("Console input ended");
                break;
            }
            Ok(_) => {
                // Invalid UTF-8 is replaced, not fatal
                let line = String::from_utf8_lossy(&buf).into_owned();
                lock(&state).deliver(line);
            }
            Err(e) => {
                tracing::warn!("Failed to read console input: {}", e);
                break;
            }
        }
    }

    lock(&state).sender.take();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::InputSource;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    const TIMEOUT: Duration = Duration::from_secs(5);

    async fn next(rx: &mut broadcast::Receiver<String>) -> Option<String> {
        tokio::time::timeout(TIMEOUT, rx.next_line())
            .await
            .expect("no input within timeout")
    }

    #[tokio::test]
    async fn test_lines_reach_every_subscriber() {
        let (mut keyboard, pipe) = tokio::io::duplex(1024);
        let hub = InputHub::spawn(BufReader::new(pipe), CancellationToken::new());
        let mut first = hub.subscribe();
        let mut second = hub.subscribe();

        keyboard.write_all(b"hello\nworld\n").await.unwrap();
        drop(keyboard);

        for rx in [&mut first, &mut second] {
            assert_eq!(next(rx).await.as_deref(), Some("hello\n"));
            assert_eq!(next(rx).await.as_deref(), Some("world\n"));
            assert_eq!(next(rx).await, None);
        }

        hub.join().await;
    }

    #[tokio::test]
    async fn test_last_line_without_newline() {
        let (mut keyboard, pipe) = tokio::io::duplex(1024);
        let hub = InputHub::spawn(BufReader::new(pipe), CancellationToken::new());
        let mut rx = hub.subscribe();

        keyboard.write_all(b"no newline").await.unwrap();
        drop(keyboard);

        assert_eq!(next(&mut rx).await.as_deref(), Some("no newline"));
        assert_eq!(next(&mut rx).await, None);
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_is_replaced_not_fatal() {
        let (mut keyboard, pipe) = tokio::io::duplex(1024);
        let hub = InputHub::spawn(BufReader::new(pipe), CancellationToken::new());
        let mut rx = hub.subscribe();

        keyboard.write_all(b"caf\xe9\nstill typing\n").await.unwrap();

        assert_eq!(next(&mut rx).await.as_deref(), Some("caf\u{FFFD}\n"));
        assert_eq!(next(&mut rx).await.as_deref(), Some("still typing\n"));
        assert!(!hub.is_closed());

        drop(keyboard);
        assert_eq!(next(&mut rx).await, None);
    }

    async fn wait_closed(hub: &InputHub) {
        tokio::time::timeout(TIMEOUT, async {
            while !hub.is_closed() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("input never closed");
    }

    #[tokio::test]
    async fn test_lines_before_first_subscriber_are_held() {
        let (mut keyboard, pipe) = tokio::io::duplex(1024);
        let hub = InputHub::spawn(BufReader::new(pipe), CancellationToken::new());

        keyboard.write_all(b"typed early\n").await.unwrap();
        // Give the reader a moment to consume the line with nobody listening
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut rx = hub.subscribe();
        keyboard.write_all(b"typed later\n").await.unwrap();
        drop(keyboard);

        assert_eq!(next(&mut rx).await.as_deref(), Some("typed early\n"));
        assert_eq!(next(&mut rx).await.as_deref(), Some("typed later\n"));
        assert_eq!(next(&mut rx).await, None);
    }

    #[tokio::test]
    async fn test_held_lines_survive_input_end() {
        let (mut keyboard, pipe) = tokio::io::duplex(1024);
        let hub = InputHub::spawn(BufReader::new(pipe), CancellationToken::new());

        keyboard.write_all(b"one\ntwo\n").await.unwrap();
        drop(keyboard);
        wait_closed(&hub).await;

        let mut first = hub.subscribe();
        assert_eq!(next(&mut first).await.as_deref(), Some("one\n"));
        assert_eq!(next(&mut first).await.as_deref(), Some("two\n"));
        assert_eq!(next(&mut first).await, None);

        // Held lines go to one subscriber only
        let mut second = hub.subscribe();
        assert_eq!(next(&mut second).await, None);
    }

    #[test]
    fn test_held_lines_are_bounded() {
        let mut state = HubState::default();
        for i in 0..INPUT_BUFFER + 3 {
            state.deliver(i.to_string());
        }
        assert_eq!(state.pending.len(), INPUT_BUFFER);
        assert_eq!(state.pending.front().map(String::as_str), Some("3"));
    }

    #[tokio::test]
    async fn test_subscribe_after_close_is_exhausted() {
        let (keyboard, pipe) = tokio::io::duplex(1024);
        let hub = InputHub::spawn(BufReader::new(pipe), CancellationToken::new());
        drop(keyboard);
        wait_closed(&hub).await;

        let mut late = hub.subscribe();
        assert_eq!(next(&mut late).await, None);
    }

    #[tokio::test]
    async fn test_cancel_closes_input() {
        let (_keyboard, pipe) = tokio::io::duplex(1024);
        let cancel = CancellationToken::new();
        let hub = InputHub::spawn(BufReader::new(pipe), cancel.clone());
        let mut rx = hub.subscribe();

        cancel.cancel();
        assert_eq!(next(&mut rx).await, None);
        assert!(hub.is_closed());
    }
}

//! # peerchat peer
//!
//! Direct two-party chat over an authenticated QUIC connection.
//!
//! ## Overview
//!
//! A peer generates a fresh identity, binds an endpoint and then either waits
//! for someone to dial it or dials a printed address itself. Every session is
//! one bidirectional stream on which the `/chat/1.0.0` sub-protocol has been
//! negotiated. Messages travel as newline-terminated JSON envelopes.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           Host                               │
//! │   listen ── serve (accept loop) ── dial ── close             │
//! ├──────────────────────────────────────────────────────────────┤
//! │   TransportSession  (one QUIC bi-stream, negotiated)         │
//! │        │                                   │                 │
//! │   SessionReader                       SessionWriter          │
//! │        │                                   │                 │
//! │   reader task ── Renderer        InputSource ── writer task  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use peer::{spawn_chat, ConsoleRenderer, Host, Identity, InputHub};
//! use peer::config::Config;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     let identity = Identity::generate(&mut rand::rngs::OsRng)?;
//!     let host = Host::listen(identity, &config.network).await?;
//!     let cancel = CancellationToken::new();
//!     let input = InputHub::stdin(cancel.clone());
//!
//!     let session = host.dial("/ip4/127.0.0.1/udp/4433/p2p/...").await?;
//!     let handle = spawn_chat(
//!         session,
//!         config.user.to_user(),
//!         input.subscribe(),
//!         ConsoleRenderer::stdout(),
//!         &cancel,
//!     );
//!     handle.join().await?;
//!     host.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`identity`]: Peer key pair
//! - [`address`]: Textual peer addresses
//! - [`transport`]: Sessions over ordered byte streams
//! - [`host`]: Endpoint binding, accepting and dialing
//! - [`chat`]: Reader and writer tasks
//! - [`console`]: Terminal input fan-out

pub mod address;
pub mod chat;
pub mod config;
pub mod console;
pub mod error;
pub mod host;
pub mod identity;
pub mod transport;

// Re-export protocol for convenience
pub use protocol;

pub use address::PeerAddress;
pub use chat::{
    run_reader, run_writer, spawn_chat, ChatHandle, ChatOutcome, ConsoleRenderer, InputSource,
    ReaderOutcome, Renderer, WriterOutcome,
};
pub use config::Config;
pub use console::InputHub;
pub use error::{ChatError, ChatResult};
pub use host::Host;
pub use identity::Identity;
pub use transport::{
    QuicSession, SessionId, SessionReader, SessionRole, SessionWriter, TransportSession,
};

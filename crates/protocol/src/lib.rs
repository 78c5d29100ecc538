//! # peerchat Protocol Library
//!
//! Wire-level definitions for peerchat, independent of any transport or
//! async runtime.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            Chat Messages                │  compact JSON envelope
//! ├─────────────────────────────────────────┤
//! │              Framing                    │  one record per '\n'
//! ├─────────────────────────────────────────┤
//! │       Sub-protocol negotiation          │  "/chat/1.0.0\n" echo
//! ├─────────────────────────────────────────┤
//! │     Transport (QUIC bi-directional)     │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{decode, encode, LineCodec, User};
//!
//! let user = User::new("B", "abc", "0");
//! let payload = encode("hello", &user).unwrap();
//!
//! let codec = LineCodec::new();
//! let frame = codec.encode(&payload).unwrap();
//!
//! let (record, _) = codec.decode(&frame).unwrap();
//! let message = decode(&record).unwrap();
//! assert_eq!(message.display_line(), "B : hello");
//! ```
//!
//! ## Modules
//!
//! - [`messages`]: Chat envelope and codec
//! - [`framing`]: Delimiter-based frame codec
//! - [`negotiate`]: Sub-protocol negotiation primitives
//! - [`error`]: Error types

pub mod error;
pub mod framing;
pub mod messages;
pub mod negotiate;

pub use error::{ProtocolError, Result};
pub use framing::{LineCodec, FRAME_DELIMITER};
pub use messages::{decode, encode, ChatMessage, User};
pub use negotiate::{CHAT_PROTOCOL, NOT_AVAILABLE};

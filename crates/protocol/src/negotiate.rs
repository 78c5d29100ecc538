//! Sub-protocol negotiation on a freshly opened stream.
//!
//! The exchange is line based and uses the same delimiter as chat frames:
//!
//! ```text
//! initiator                         responder
//!     | -- "/chat/1.0.0\n" ----------> |
//!     | <--------- "/chat/1.0.0\n" --- |   supported: echo
//!     | <--------------------- "na\n"  |   unsupported: refuse, drop stream
//! ```
//!
//! These helpers are pure; the transport drives the I/O.

use crate::error::{ProtocolError, Result};
use crate::framing::FRAME_DELIMITER;

/// Sub-protocol identifier for chat streams.
pub const CHAT_PROTOCOL: &str = "/chat/1.0.0";

/// Reply sent by a responder that does not support the proposed protocol.
pub const NOT_AVAILABLE: &str = "na";

/// Returns true if `protocol` is usable as a sub-protocol identifier.
///
/// Identifiers start with `/`, are not just `/`, and carry no delimiter or
/// control characters.
pub fn is_valid_protocol_id(protocol: &str) -> bool {
    protocol.len() > 1 && protocol.starts_with('/') && !protocol.chars().any(char::is_control)
}

/// Encode a negotiation line (identifier plus delimiter).
pub fn encode_line(protocol: &str) -> Result<Vec<u8>> {
    if protocol.as_bytes().contains(&FRAME_DELIMITER) {
        return Err(ProtocolError::NegotiationFailed(format!(
            "protocol identifier contains a delimiter: {:?}",
            protocol
        )));
    }

    let mut line = Vec::with_capacity(protocol.len() + 1);
    line.extend_from_slice(protocol.as_bytes());
    line.push(FRAME_DELIMITER);
    Ok(line)
}

/// Parse a received negotiation line, with or without its delimiter.
pub fn parse_line(line: &[u8]) -> Result<&str> {
    let line = line.strip_suffix(&[FRAME_DELIMITER]).unwrap_or(line);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    std::str::from_utf8(line)
        .map_err(|e| ProtocolError::NegotiationFailed(format!("non UTF-8 negotiation line: {}", e)))
}

/// Responder side: pick the proposed protocol if it is supported.
///
/// Returns the reply line to send back and the selected protocol, if any.
pub fn respond<'a>(proposal: &[u8], supported: &[&'a str]) -> Result<(Vec<u8>, Option<&'a str>)> {
    let proposed = parse_line(proposal)?;

    match supported.iter().find(|p| **p == proposed) {
        Some(selected) => Ok((encode_line(selected)?, Some(*selected))),
        None => Ok((encode_line(NOT_AVAILABLE)?, None)),
    }
}

/// Initiator side: check the responder's reply to `proposed`.
pub fn check_reply(proposed: &str, reply: &[u8]) -> Result<()> {
    let reply = parse_line(reply)?;

    if reply == proposed {
        Ok(())
    } else if reply == NOT_AVAILABLE {
        Err(ProtocolError::ProtocolRejected {
            protocol: proposed.to_string(),
        })
    } else {
        Err(ProtocolError::NegotiationFailed(format!(
            "expected echo of {:?}, got {:?}",
            proposed, reply
        )))
    }
}

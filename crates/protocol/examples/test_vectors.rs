//! Print wire test vectors for interop testing with other chat peers.
//!
//! Run with: cargo run --package protocol --example test_vectors

use protocol::negotiate::encode_line;
use protocol::{encode, LineCodec, User, CHAT_PROTOCOL};

fn main() {
    let codec = LineCodec::new();
    let user = User::new("User", "abc", "0");

    // Negotiation proposal
    let proposal = encode_line(CHAT_PROTOCOL).expect("invalid protocol id");
    print_test_vector("negotiation_proposal", &proposal);

    // Plain message
    let hello = encode("hello", &user).expect("serialization failed");
    print_test_vector("hello", &codec.encode(&hello).expect("framing failed"));

    // Blank message: transmitted, never displayed
    let blank = encode("", &user).expect("serialization failed");
    print_test_vector("blank", &codec.encode(&blank).expect("framing failed"));

    // Embedded newline is escaped inside the record
    let multiline = encode("one\ntwo", &user).expect("serialization failed");
    print_test_vector("multiline", &codec.encode(&multiline).expect("framing failed"));
}

fn print_test_vector(name: &str, bytes: &[u8]) {
    println!("{}: {:?}", name, String::from_utf8_lossy(bytes));
}

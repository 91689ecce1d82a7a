//! Opaque session token generation.

use forum_common::id::prefix;

/// Number of random bytes in a session token.
const SESSION_TOKEN_BYTES: usize = 32;

/// Generate an opaque random token with the given prefix.
pub fn generate_opaque_token(prefix: &str, bytes: usize) -> String {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    use rand::Rng;
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill(&mut buf[..]);
    format!("{}_{}", prefix, URL_SAFE_NO_PAD.encode(&buf))
}

pub fn generate_session_token() -> String {
    generate_opaque_token(prefix::SESSION, SESSION_TOKEN_BYTES)
}

//! Opaque credential generation

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;

const TOKEN_BYTES: usize = 32;

/// A fresh 256-bit random token, base64url-encoded so it embeds in URLs as-is
pub fn generate() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Credential placeholder for accounts created without a password.
///
/// The leading `!` can never be produced by a password hash, so the account
/// cannot be logged into until its owner resets the password.
pub fn unusable_credential() -> String {
    format!("!{}", generate())
}

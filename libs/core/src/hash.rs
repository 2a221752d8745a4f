//! Content hashing for WhatsApp message dedupe.

use sha2::{Digest, Sha256};

/// Secondary dedupe key for a WhatsApp message: SHA-256 over
/// `chat_title + sender_name + text`. The hash is only ever consulted within
/// one chat's rolling window, so the chat title contributes stability rather
/// than cross-chat collisions; a sender rename voids this key (never the
/// platform message-id key).
pub fn content_hash(chat_title: &str, sender_name: Option<&str>, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(chat_title.as_bytes());
    hasher.update(sender_name.unwrap_or_default().as_bytes());
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

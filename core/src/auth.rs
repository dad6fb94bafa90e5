use sha2::{Digest, Sha256};

/// Prefix carried by agent API keys (`guild_sk_` + 64 hex chars).
pub const API_KEY_PREFIX: &str = "guild_sk_";

/// SHA-256 hex digest of a token string.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn is_api_key(token: &str) -> bool {
    token
        .strip_prefix(API_KEY_PREFIX)
        .is_some_and(|rest| !rest.is_empty())
}

/// First 8 chars after `guild_sk_`, safe to log for identification.
pub fn key_prefix(full_key: &str) -> String {
    full_key
        .strip_prefix(API_KEY_PREFIX)
        .map(|rest| rest.chars().take(8).collect())
        .unwrap_or_default()
}

use std::collections::HashSet;

use guild_core::auth::hash_token;

/// Operational tokens that bypass rate limiting entirely.
///
/// Only SHA-256 digests are held; membership is the single supported query.
#[derive(Debug, Clone, Default)]
pub struct AdminAllowList {
    digests: HashSet<String>,
}

impl AdminAllowList {
    pub fn from_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let digests = tokens
            .into_iter()
            .map(|token| token.as_ref().trim().to_string())
            .filter(|token| !token.is_empty())
            .map(|token| hash_token(&token))
            .collect();
        Self { digests }
    }

    pub fn contains(&self, token: &str) -> bool {
        !self.digests.is_empty() && self.digests.contains(&hash_token(token))
    }

    pub fn len(&self) -> usize {
        self.digests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }
}

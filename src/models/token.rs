// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Per-user OAuth token state for the activity provider.

use serde::{Deserialize, Serialize};

/// OAuth tokens owned by the Secret Store, keyed by user id.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenState {
    pub access_token: String,
    pub refresh_token: String,
    /// When the access token expires (Unix seconds)
    pub expires_at: i64,
}

impl TokenState {
    /// Whether the access token is expired or will expire within `margin_secs`.
    pub fn needs_refresh(&self, now: i64, margin_secs: i64) -> bool {
        now + margin_secs >= self.expires_at
    }
}

// Keep secrets out of logs.
impl std::fmt::Debug for TokenState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenState")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(expires_at: i64) -> TokenState {
        TokenState {
            access_token: "access".to_string(),
            refresh_token: "refresh".to_string(),
            expires_at,
        }
    }

    #[test]
    fn test_needs_refresh_inside_margin() {
        assert!(token(1_000).needs_refresh(900, 300));
        assert!(token(1_000).needs_refresh(1_010, 0));
        assert!(!token(1_000).needs_refresh(600, 300));
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let rendered = format!("{:?}", token(42));
        assert!(!rendered.contains("access\""));
        assert!(rendered.contains("<redacted>"));
        assert!(rendered.contains("42"));
    }
}

// Session gate - opaque bearer tokens guarding every tool invocation

use std::collections::HashSet;
use std::sync::RwLock;

use rand::RngCore;

use crate::constants::limits::SESSION_TOKEN_BYTES;
use crate::core::errors::BridgeError;

/// Process-wide set of session tokens.
///
/// Tokens are minted by `authenticate`, never expire in-process, and are
/// discarded on restart. Every other operation validates its token here
/// before doing any work.
#[derive(Debug, Default)]
pub struct SessionGate {
    tokens: RwLock<HashSet<String>>,
}

impl SessionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a fresh token: 32 random bytes as lowercase hex (64 chars).
    pub fn mint(&self) -> String {
        let mut bytes = [0u8; SESSION_TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = hex::encode(bytes);

        let mut tokens = self.tokens.write().unwrap_or_else(|e| e.into_inner());
        tokens.insert(token.clone());
        token
    }

    pub fn validate(&self, token: &str) -> Result<(), BridgeError> {
        let tokens = self.tokens.read().unwrap_or_else(|e| e.into_inner());
        if tokens.contains(token) {
            Ok(())
        } else {
            Err(BridgeError::AuthFailed(
                "invalid or missing session token; call authenticate first".to_string(),
            ))
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.tokens.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_token_is_64_lowercase_hex() {
        let gate = SessionGate::new();
        let token = gate.mint();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn minted_token_validates() {
        let gate = SessionGate::new();
        let token = gate.mint();
        assert!(gate.validate(&token).is_ok());
    }

    #[test]
    fn unknown_token_is_auth_failed() {
        let gate = SessionGate::new();
        let err = gate.validate("deadbeef").unwrap_err();
        assert_eq!(err.code(), "auth_failed");
    }

    #[test]
    fn tokens_are_unique() {
        let gate = SessionGate::new();
        let a = gate.mint();
        let b = gate.mint();
        assert_ne!(a, b);
        assert_eq!(gate.len(), 2);
    }
}

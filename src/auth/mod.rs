//! Dual-credential management and request signing.

pub mod credentials;
pub mod signer;

pub use credentials::{AccessToken, CredentialProvider};
pub use signer::{SignableRequest, SignatureHeaders, SigningCredentials};

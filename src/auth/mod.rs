//! Token verification against the upstream key set

pub mod jwks;
pub mod verifier;

pub use verifier::{AccessClaims, InvalidToken, TokenVerifier, VerifyOptions};

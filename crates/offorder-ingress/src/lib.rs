//! # offorder-ingress
//!
//! The flows the request layer calls into: placing an order against an
//! account balance and cancelling it again. Signature checking sits behind
//! the [`SignatureVerifier`] trait so the transport can pick a scheme.

pub mod desk;
pub mod verifier;

pub use desk::{OrderDesk, PlaceOrder};
pub use verifier::{AcceptAll, Ed25519Verifier, SignatureVerifier, ed25519_address, sign_order};

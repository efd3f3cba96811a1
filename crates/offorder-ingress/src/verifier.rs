//! Signature checks on submitted orders.

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use offorder_types::{Address, OrderData, Result};

/// Decides whether `signature` over `message` was produced by `address`.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, message: &[u8], signature: &[u8], address: &Address) -> bool;
}

/// Ed25519 signatures; the address is the 32-byte verifying key.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Verifier;

impl SignatureVerifier for Ed25519Verifier {
    fn verify(&self, message: &[u8], signature: &[u8], address: &Address) -> bool {
        let Ok(key_bytes) = <[u8; 32]>::try_from(address.as_bytes()) else {
            tracing::trace!(len = address.as_bytes().len(), "address is not an ed25519 key");
            return false;
        };
        let Ok(key) = VerifyingKey::from_bytes(&key_bytes) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(signature) else {
            return false;
        };
        key.verify_strict(message, &signature).is_ok()
    }
}

/// Accepts every signature. For tests and trusted internal callers.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl SignatureVerifier for AcceptAll {
    fn verify(&self, _message: &[u8], _signature: &[u8], _address: &Address) -> bool {
        true
    }
}

/// Address an [`Ed25519Verifier`] attributes to `key`.
#[must_use]
pub fn ed25519_address(key: &SigningKey) -> Address {
    Address::new(key.verifying_key().to_bytes().to_vec())
}

/// Sign the canonical bytes of `data` with `key`.
pub fn sign_order(key: &SigningKey, data: &OrderData) -> Result<Vec<u8>> {
    let message = data.signing_bytes()?;
    Ok(key.sign(&message).to_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SigningKey {
        SigningKey::from_bytes(&[7u8; 32])
    }

    fn data(address: Address) -> OrderData {
        OrderData {
            address,
            base: "base".into(),
            quote: "quote".into(),
            amount: 5,
            price: 10,
        }
    }

    #[test]
    fn accepts_own_signature() {
        let key = key();
        let data = data(ed25519_address(&key));
        let sig = sign_order(&key, &data).unwrap();

        assert!(Ed25519Verifier.verify(&data.signing_bytes().unwrap(), &sig, &data.address));
    }

    #[test]
    fn rejects_tampered_message() {
        let key = key();
        let mut data = data(ed25519_address(&key));
        let sig = sign_order(&key, &data).unwrap();
        data.amount = 6;

        assert!(!Ed25519Verifier.verify(&data.signing_bytes().unwrap(), &sig, &data.address));
    }

    #[test]
    fn rejects_other_signer() {
        let key = key();
        let other = SigningKey::from_bytes(&[9u8; 32]);
        let data = data(ed25519_address(&key));
        let sig = sign_order(&other, &data).unwrap();

        assert!(!Ed25519Verifier.verify(&data.signing_bytes().unwrap(), &sig, &data.address));
    }

    #[test]
    fn rejects_malformed_inputs() {
        let key = key();
        let data = data(ed25519_address(&key));
        let message = data.signing_bytes().unwrap();
        let sig = sign_order(&key, &data).unwrap();

        assert!(!Ed25519Verifier.verify(&message, &sig[..63], &data.address));
        assert!(!Ed25519Verifier.verify(&message, &sig, &Address::from("short")));
    }

    #[test]
    fn accept_all_accepts() {
        assert!(AcceptAll.verify(b"", b"", &Address::default()));
    }
}

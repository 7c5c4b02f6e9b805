//! Signing of contributed inputs in the final mixing transaction

use secp256k1::{ecdsa, All, Message, PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};

use crate::consensus_params::{domain_hash, domains};
use crate::crypto::{CryptoError, CryptoResult, CryptoUtils};

use super::{InputCommitment, OutPoint, SessionId};

/// Signature over one of our inputs in the joint transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedInput {
    pub outpoint: OutPoint,
    /// Compact 64-byte ECDSA signature
    pub signature: Vec<u8>,
    /// Compressed public key
    pub public_key: Vec<u8>,
}

/// Digest each participant signs for an input of the final transaction
pub fn input_sighash(session: SessionId, final_tx: &[u8; 32], outpoint: &OutPoint) -> [u8; 32] {
    domain_hash(
        &domains::SESSION_MESSAGE,
        &[&session.0.to_be_bytes(), final_tx, &outpoint.to_bytes()],
    )
}

/// Wallet key access used when the session reaches signing
pub trait InputSigner: Send + Sync {
    fn sign_input(&self, session: SessionId, input: &InputCommitment, final_tx: &[u8; 32]) -> CryptoResult<SignedInput>;
}

/// ECDSA signer over secp256k1
pub struct Secp256k1InputSigner {
    secp: Secp256k1<All>,
    secret_key: SecretKey,
    public_key: PublicKey,
}

impl Secp256k1InputSigner {
    pub fn new(private_key: &[u8; 32]) -> CryptoResult<Self> {
        let secp = Secp256k1::new();
        let secret_key = SecretKey::from_slice(private_key)
            .map_err(|e| CryptoError::InvalidInput(format!("invalid signing key: {:?}", e)))?;
        let public_key = secret_key.public_key(&secp);
        Ok(Self {
            secp,
            secret_key,
            public_key,
        })
    }

    /// Signer with a fresh random key
    pub fn random() -> CryptoResult<Self> {
        Self::new(&CryptoUtils::random_32())
    }

    pub fn public_key(&self) -> [u8; 33] {
        self.public_key.serialize()
    }

    /// Check a signature produced by any participant
    pub fn verify(signed: &SignedInput, session: SessionId, final_tx: &[u8; 32]) -> CryptoResult<bool> {
        let secp = Secp256k1::verification_only();
        let digest = input_sighash(session, final_tx, &signed.outpoint);
        let message = Message::from_digest_slice(&digest).map_err(|e| CryptoError::InvalidInput(e.to_string()))?;
        let signature = ecdsa::Signature::from_compact(&signed.signature)
            .map_err(|e| CryptoError::InvalidInput(e.to_string()))?;
        let public_key = PublicKey::from_slice(&signed.public_key)
            .map_err(|e| CryptoError::InvalidInput(e.to_string()))?;
        Ok(secp.verify_ecdsa(&message, &signature, &public_key).is_ok())
    }
}

impl InputSigner for Secp256k1InputSigner {
    fn sign_input(&self, session: SessionId, input: &InputCommitment, final_tx: &[u8; 32]) -> CryptoResult<SignedInput> {
        let digest = input_sighash(session, final_tx, &input.outpoint);
        let message = Message::from_digest_slice(&digest).map_err(|e| CryptoError::InvalidInput(e.to_string()))?;
        let signature = self.secp.sign_ecdsa(&message, &self.secret_key);
        Ok(SignedInput {
            outpoint: input.outpoint,
            signature: signature.serialize_compact().to_vec(),
            public_key: self.public_key.serialize().to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let signer = Secp256k1InputSigner::new(&[7u8; 32]).unwrap();
        let input = InputCommitment {
            outpoint: OutPoint::new([1u8; 32], 3),
            value: 10,
        };
        let final_tx = [9u8; 32];

        let signed = signer.sign_input(SessionId(5), &input, &final_tx).unwrap();
        assert_eq!(signed.public_key, signer.public_key().to_vec());
        assert!(Secp256k1InputSigner::verify(&signed, SessionId(5), &final_tx).unwrap());
        assert!(!Secp256k1InputSigner::verify(&signed, SessionId(6), &final_tx).unwrap());
        assert!(!Secp256k1InputSigner::verify(&signed, SessionId(5), &[8u8; 32]).unwrap());
    }

    #[test]
    fn test_rejects_invalid_key() {
        assert!(Secp256k1InputSigner::new(&[0u8; 32]).is_err());
    }
}

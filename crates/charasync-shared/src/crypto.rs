//! Chat message signing.
//!
//! Chat payloads travel through the relay, which must not be able to forge
//! them. Each message is signed over its canonical bytes (sender UID,
//! timestamp, text) with the sender's Ed25519 key.

use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

use crate::error::ProtocolError;
use crate::protocol::SignedChatMessage;
use crate::types::UserData;

/// The local user's signing identity.
pub struct ChatIdentity {
    signing_key: SigningKey,
}

impl ChatIdentity {
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_secret(secret: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(secret),
        }
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Build a signed chat message from the local user.
    pub fn sign_message(&self, sender: UserData, message: impl Into<String>) -> SignedChatMessage {
        let message = message.into();
        let sent_at = Utc::now();
        let signature = self
            .signing_key
            .sign(&canonical_bytes(&sender.uid, &sent_at, &message));
        SignedChatMessage {
            sender,
            sent_at,
            message,
            signature: signature.to_bytes().to_vec(),
        }
    }
}

/// Verify a received chat message against the sender's registered key.
pub fn verify_message(
    public_key: &[u8; 32],
    message: &SignedChatMessage,
) -> Result<(), ProtocolError> {
    let verifying_key =
        VerifyingKey::from_bytes(public_key).map_err(|_| ProtocolError::InvalidKeyBytes)?;
    let signature = Signature::from_slice(&message.signature)
        .map_err(|_| ProtocolError::InvalidSignature)?;
    verifying_key
        .verify(
            &canonical_bytes(&message.sender.uid, &message.sent_at, &message.message),
            &signature,
        )
        .map_err(|_| ProtocolError::InvalidSignature)
}

// uid || timestamp-millis || text, unambiguous because uid never contains '|'
fn canonical_bytes(uid: &str, sent_at: &DateTime<Utc>, message: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(uid.len() + message.len() + 24);
    bytes.extend_from_slice(uid.as_bytes());
    bytes.push(b'|');
    bytes.extend_from_slice(sent_at.timestamp_millis().to_le_bytes().as_slice());
    bytes.push(b'|');
    bytes.extend_from_slice(message.as_bytes());
    bytes
}

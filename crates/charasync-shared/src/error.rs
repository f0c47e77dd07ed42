use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid content hash: {0}")]
    InvalidHash(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid public key bytes")]
    InvalidKeyBytes,

    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },
}

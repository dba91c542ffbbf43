use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed: invalid ciphertext or wrong key")]
    DecryptionFailed,

    #[error("Invalid key length")]
    InvalidKeyLength,
}

#[derive(Error, Debug)]
pub enum CellMapError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cell map serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

/// Unique device identifier size in bytes
pub const UID_SIZE: usize = 8;

/// Anonymous identifier size in bytes (one AES block)
pub const AID_SIZE: usize = 16;

/// Nonce appended to the UID before encryption, in bytes
pub const NONCE_SIZE: usize = 8;

/// Secret key size in bytes (AES-128)
pub const KEY_SIZE: usize = 16;

/// Key-store master key size in bytes
pub const MASTER_KEY_SIZE: usize = 32;

/// Default capacity of the per-observer recent-acquaintance window
pub const RECENT_WINDOW_SIZE: usize = 1000;

/// Candidate-set size above which trial decryption fans out to worker threads
pub const PARALLEL_SEARCH_THRESHOLD: usize = 64;

/// Commit buffer: uncommitted rows that force an early commit
pub const COMMIT_BUFFER_SIZE: usize = 5000;

/// Interval of the periodic commit ticker in seconds
pub const COMMIT_INTERVAL_SECS: u64 = 5;

/// Default HTTP API port
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Key derivation context for the key-store encryption key (BLAKE3)
pub const KDF_CONTEXT_KEY_STORE: &str = "bellrock-key-store-v1";

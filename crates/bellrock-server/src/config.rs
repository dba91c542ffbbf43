use std::net::SocketAddr;
use std::path::PathBuf;

use bellrock_shared::constants::{
    COMMIT_BUFFER_SIZE, COMMIT_INTERVAL_SECS, MASTER_KEY_SIZE, PARALLEL_SEARCH_THRESHOLD,
    RECENT_WINDOW_SIZE,
};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub db_path: PathBuf,
    pub keystore_path: PathBuf,
    pub master_key: [u8; MASTER_KEY_SIZE],
    pub cell_map_path: Option<PathBuf>,
    pub http_addr: SocketAddr,
    pub recent_window: usize,
    pub commit_buffer: usize,
    pub commit_interval_secs: u64,
    pub parallel_threshold: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./bellrock.db"),
            keystore_path: PathBuf::from("./bellrock_keys.db"),
            master_key: [0u8; MASTER_KEY_SIZE],
            cell_map_path: None,
            http_addr: ([0, 0, 0, 0], 8080).into(),
            recent_window: RECENT_WINDOW_SIZE,
            commit_buffer: COMMIT_BUFFER_SIZE,
            commit_interval_secs: COMMIT_INTERVAL_SECS,
            parallel_threshold: PARALLEL_SEARCH_THRESHOLD,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("BELLROCK_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }

        if let Ok(path) = std::env::var("BELLROCK_KEYSTORE_PATH") {
            config.keystore_path = PathBuf::from(path);
        }

        if let Ok(hex_key) = std::env::var("BELLROCK_MASTER_KEY") {
            match parse_hex_master_key(&hex_key) {
                Ok(key) => config.master_key = key,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "Invalid BELLROCK_MASTER_KEY, using default (dev-only)"
                    );
                }
            }
        }

        if let Ok(path) = std::env::var("BELLROCK_CELL_MAP") {
            config.cell_map_path = Some(PathBuf::from(path));
        }

        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(
                    value = %addr,
                    "Invalid HTTP_ADDR, using default"
                );
            }
        }

        if let Ok(value) = std::env::var("BELLROCK_RECENT_WINDOW") {
            match value.parse::<usize>() {
                Ok(n) if n > 0 => config.recent_window = n,
                _ => tracing::warn!(value = %value, "Invalid BELLROCK_RECENT_WINDOW, using default"),
            }
        }

        if let Ok(value) = std::env::var("BELLROCK_COMMIT_BUFFER") {
            match value.parse::<usize>() {
                Ok(n) if n > 0 => config.commit_buffer = n,
                _ => tracing::warn!(value = %value, "Invalid BELLROCK_COMMIT_BUFFER, using default"),
            }
        }

        if let Ok(value) = std::env::var("BELLROCK_COMMIT_INTERVAL_SECS") {
            match value.parse::<u64>() {
                Ok(n) if n > 0 => config.commit_interval_secs = n,
                _ => tracing::warn!(
                    value = %value,
                    "Invalid BELLROCK_COMMIT_INTERVAL_SECS, using default"
                ),
            }
        }

        if let Ok(value) = std::env::var("BELLROCK_PARALLEL_THRESHOLD") {
            match value.parse::<usize>() {
                Ok(n) => config.parallel_threshold = n,
                _ => tracing::warn!(
                    value = %value,
                    "Invalid BELLROCK_PARALLEL_THRESHOLD, using default"
                ),
            }
        }

        config
    }
}

fn parse_hex_master_key(hex_key: &str) -> Result<[u8; MASTER_KEY_SIZE], String> {
    let bytes = hex::decode(hex_key).map_err(|e| format!("not hex: {e}"))?;
    if bytes.len() != MASTER_KEY_SIZE {
        return Err(format!(
            "expected {} bytes, got {}",
            MASTER_KEY_SIZE,
            bytes.len()
        ));
    }
    let mut key = [0u8; MASTER_KEY_SIZE];
    key.copy_from_slice(&bytes);
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.recent_window, 1000);
        assert_eq!(config.commit_buffer, 5000);
        assert_eq!(config.parallel_threshold, 64);
    }

    #[test]
    fn test_parse_hex_master_key() {
        let hex = "ab".repeat(32);
        let key = parse_hex_master_key(&hex).unwrap();
        assert_eq!(key, [0xab; 32]);
    }

    #[test]
    fn test_parse_hex_master_key_wrong_length() {
        assert!(parse_hex_master_key("abcd").is_err());
        assert!(parse_hex_master_key("not hex").is_err());
    }
}

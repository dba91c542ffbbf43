pub mod celltower;
pub mod constants;
pub mod crypto;
pub mod types;

mod error;

pub use error::{CellMapError, CryptoError};
pub use types::{Aid, Uid};

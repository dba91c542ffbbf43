use serde::{Deserialize, Serialize};

use crate::constants::{AID_SIZE, UID_SIZE};

// Persistent device identity. 8 opaque bytes, unique per registered device.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Uid(pub [u8; UID_SIZE]);

impl Uid {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != UID_SIZE {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; UID_SIZE];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; UID_SIZE] {
        &self.0
    }
}

impl std::fmt::Display for Uid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

// Anonymous identity broadcast over BLE: one AES block, opaque to observers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Aid(pub [u8; AID_SIZE]);

impl Aid {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != AID_SIZE {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; AID_SIZE];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; AID_SIZE] {
        &self.0
    }
}

impl std::fmt::Display for Aid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uid_hex_round_trip() {
        let uid = Uid([0, 1, 2, 3, 4, 5, 6, 255]);
        assert_eq!(uid.to_hex(), "00010203040506ff");
        assert_eq!(Uid::from_hex(&uid.to_hex()).unwrap(), uid);
    }

    #[test]
    fn uid_rejects_wrong_length() {
        assert!(Uid::from_hex("0001").is_err());
        assert!(Uid::from_hex("not hex").is_err());
    }

    #[test]
    fn aid_hex_round_trip() {
        let aid = Aid([0xAB; 16]);
        assert_eq!(Aid::from_hex(&aid.to_hex()).unwrap(), aid);
        assert!(Aid::from_hex("abcd").is_err());
    }
}

//! System state - what the badge remembers across restarts

use badge_proto::{DEFAULT_TOKEN, TOKEN_SIZE};
use serde::{Deserialize, Serialize};

pub const MAX_OWNER_LEN: usize = 40;
pub const MAX_PATTERNS: usize = 16;
pub const MAX_PATTERN_LEN: usize = 512;
pub const MAX_ANIMATIONS: usize = 16;

/// LED border settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedBorderState {
    pub enabled: bool,
    pub brightness: u8,
    #[serde(with = "hex_records")]
    pub patterns: Vec<Vec<u8>>,
    #[serde(with = "hex_records")]
    pub animations: Vec<Vec<u8>>,
}

impl Default for LedBorderState {
    fn default() -> Self {
        Self {
            enabled: false,
            brightness: 128,
            patterns: Vec::new(),
            animations: Vec::new(),
        }
    }
}

/// Outcome of the last update attempt, as last seen by the main loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateRecord {
    pub status: u32,
    pub committed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemState {
    #[serde(with = "hex_token")]
    pub token: [u8; TOKEN_SIZE],
    pub owner: String,
    pub contact: String,
    pub current_image: String,
    pub led: LedBorderState,
    pub last_update: Option<UpdateRecord>,

    /// Set by handlers or a committed update; never persisted
    #[serde(skip)]
    pub restart_pending: bool,
}

impl Default for SystemState {
    fn default() -> Self {
        Self {
            token: DEFAULT_TOKEN,
            owner: String::new(),
            contact: String::new(),
            current_image: String::new(),
            led: LedBorderState::default(),
            last_update: None,
            restart_pending: false,
        }
    }
}

impl SystemState {
    /// Reset everything a factory reset clears
    pub fn factory_reset(&mut self) {
        *self = Self { restart_pending: true, ..Self::default() };
    }
}

mod hex_token {
    use badge_proto::TOKEN_SIZE;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8; TOKEN_SIZE], serializer: S) -> Result<S::Ok, S::Error>
    where S: Serializer {
        serializer.serialize_str(&data_encoding::HEXLOWER.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; TOKEN_SIZE], D::Error>
    where D: Deserializer<'de> {
        let s = String::deserialize(deserializer)?;
        let bytes = data_encoding::HEXLOWER.decode(s.as_bytes())
            .map_err(serde::de::Error::custom)?;
        bytes.try_into().map_err(|_| serde::de::Error::custom("expected 16 bytes"))
    }
}

mod hex_records {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(records: &[Vec<u8>], serializer: S) -> Result<S::Ok, S::Error>
    where S: Serializer {
        use serde::ser::SerializeSeq;
        let mut seq = serializer.serialize_seq(Some(records.len()))?;
        for record in records {
            seq.serialize_element(&data_encoding::HEXLOWER.encode(record))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<Vec<u8>>, D::Error>
    where D: Deserializer<'de> {
        let strings: Vec<String> = Vec::deserialize(deserializer)?;
        strings.into_iter().map(|s| {
            data_encoding::HEXLOWER.decode(s.as_bytes()).map_err(serde::de::Error::custom)
        }).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_uses_hex_for_binary_fields() {
        let mut state = SystemState::default();
        state.led.patterns.push(vec![0xAB, 0x01]);
        state.restart_pending = true;

        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["token"], "30303030303030303030303030303030");
        assert_eq!(json["led"]["patterns"][0], "ab01");
        assert!(json.get("restart_pending").is_none());

        let back: SystemState = serde_json::from_value(json).unwrap();
        assert_eq!(back.led.patterns, vec![vec![0xAB, 0x01]]);
        assert!(!back.restart_pending);
    }

    #[test]
    fn factory_reset_restores_defaults_and_asks_for_restart() {
        let mut state = SystemState {
            owner: "Ada".to_string(),
            token: *b"abcdefghijklmnop",
            ..SystemState::default()
        };
        state.factory_reset();
        assert_eq!(state.owner, "");
        assert_eq!(state.token, DEFAULT_TOKEN);
        assert!(state.restart_pending);
    }
}

// =============================================================================
// Shared types used across the agent
// =============================================================================

use serde::{Deserialize, Serialize};

/// Token side of a game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameToken {
    #[serde(rename = "baseAsset")]
    pub base_asset: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameDetails {
    #[serde(rename = "quoteAsset")]
    pub quote_asset: String,
    pub token: GameToken,
}

/// A live game announced on the push channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameData {
    pub id: String,
    pub data: GameDetails,
}

impl GameData {
    /// Trading pair key, e.g. `BTCUSDT`.
    pub fn symbol(&self) -> String {
        format!("{}{}", self.data.token.base_asset, self.data.quote_asset)
    }
}

/// Envelope of every push-channel frame that carries a game.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameMessage {
    #[serde(rename = "type", default)]
    pub kind: String,
    pub data: GameData,
}

/// Binary answer for a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn game_message_decodes_and_builds_symbol() {
        let raw = r#"{
            "type": "agent_live_game_list",
            "data": { "id": "g-1", "data": { "quoteAsset": "USDT", "token": { "baseAsset": "BTC" } } }
        }"#;
        let msg: GameMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.kind, "agent_live_game_list");
        assert_eq!(msg.data.id, "g-1");
        assert_eq!(msg.data.symbol(), "BTCUSDT");
    }

    #[test]
    fn direction_serialises_lowercase() {
        assert_eq!(serde_json::to_string(&Direction::Long).unwrap(), "\"long\"");
        assert_eq!(Direction::Short.to_string(), "SHORT");
    }
}

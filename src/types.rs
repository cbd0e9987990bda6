//! Payloads for the endpoints the built-in actions call.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Factions a new agent may start in.
pub const FACTIONS: [&str; 19] = [
    "COSMIC", "VOID", "GALACTIC", "QUANTUM", "DOMINION", "ASTRO", "CORSAIRS", "OBSIDIAN", "AEGIS",
    "UNITED", "SOLITARY", "COBALT", "OMEGA", "ECHO", "LORDS", "CULT", "ANCIENTS", "SHADOW",
    "ETHEREAL",
];

pub const DEFAULT_FACTION: &str = "COSMIC";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    pub status: String,
    #[serde(default)]
    pub version: String,
    /// Date of the last reset, `YYYY-MM-DD` or RFC 3339.
    pub reset_date: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub stats: Map<String, Value>,
    #[serde(default)]
    pub announcements: Vec<Announcement>,
    #[serde(default)]
    pub server_resets: Option<ServerResets>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Announcement {
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerResets {
    pub next: String,
    #[serde(default)]
    pub frequency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegisterRequest {
    pub faction: String,
    pub symbol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterData {
    pub token: String,
    pub agent: Agent,
    #[serde(default)]
    pub contract: Option<Value>,
    #[serde(default)]
    pub faction: Option<Value>,
    #[serde(default)]
    pub ship: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub symbol: String,
    #[serde(default)]
    pub headquarters: String,
    #[serde(default)]
    pub credits: i64,
    #[serde(default)]
    pub starting_faction: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_payload_parses_with_optional_sections_missing() {
        let status: ServerStatus = serde_json::from_str(
            r#"{"status":"SpaceTraders is currently online","resetDate":"2024-01-28"}"#,
        )
        .unwrap();
        assert_eq!(status.reset_date, "2024-01-28");
        assert!(status.announcements.is_empty());
        assert!(status.server_resets.is_none());
    }

    #[test]
    fn register_request_omits_missing_email() {
        let body = serde_json::to_value(RegisterRequest {
            faction: "COSMIC".into(),
            symbol: "BADGER".into(),
            email: None,
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"faction": "COSMIC", "symbol": "BADGER"}));
    }
}

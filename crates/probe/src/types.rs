//! Status response document and the probe report derived from it.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize, Serializer};

use crate::error::{ProbeError, ProbeResult};

const FAVICON_PREFIX: &str = "data:image/png;base64,";

/// Status response JSON as sent by the server.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StatusResponse {
    #[serde(default)]
    pub version: Option<VersionInfo>,
    #[serde(default)]
    pub players: Option<PlayersInfo>,
    /// Plain string or chat component.
    #[serde(default)]
    pub description: Option<serde_json::Value>,
    #[serde(default)]
    pub favicon: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct VersionInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub protocol: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PlayersInfo {
    #[serde(default)]
    pub online: u32,
    #[serde(default)]
    pub max: u32,
    #[serde(default)]
    pub sample: Vec<PlayerSample>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PlayerSample {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub id: String,
}

impl StatusResponse {
    /// Parse the JSON carried by a status response packet.
    ///
    /// # Errors
    ///
    /// `Malformed` when the text is not a status document.
    pub fn parse(json: &str) -> ProbeResult<Self> {
        serde_json::from_str(json).map_err(|e| ProbeError::malformed(e.to_string()))
    }

    /// Flattened description text.
    #[must_use]
    pub fn motd(&self) -> Option<String> {
        let mut text = String::new();
        flatten_chat(self.description.as_ref()?, &mut text);
        Some(text).filter(|t| !t.is_empty())
    }

    /// Decoded PNG bytes of the favicon.
    ///
    /// # Errors
    ///
    /// `Malformed` when the favicon is not a base64 PNG data URI.
    pub fn favicon_png(&self) -> ProbeResult<Option<Vec<u8>>> {
        let Some(favicon) = self.favicon.as_deref() else {
            return Ok(None);
        };
        let encoded = favicon
            .strip_prefix(FAVICON_PREFIX)
            .ok_or_else(|| ProbeError::malformed("favicon is not a PNG data URI"))?;
        // Some servers wrap the payload like a PEM block.
        let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
        STANDARD
            .decode(compact)
            .map(Some)
            .map_err(|e| ProbeError::malformed(format!("favicon: {e}")))
    }
}

fn flatten_chat(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::String(text) => out.push_str(text),
        serde_json::Value::Array(parts) => parts.iter().for_each(|part| flatten_chat(part, out)),
        serde_json::Value::Object(component) => {
            if let Some(text) = component.get("text") {
                flatten_chat(text, out);
            }
            if let Some(extra) = component.get("extra") {
                flatten_chat(extra, out);
            }
        }
        _ => {}
    }
}

/// Outcome of one probe. Unreachability is a fact here, not an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProbeReport {
    pub reachable: bool,
    /// Names from the player sample.
    pub players: Vec<String>,
    /// Player count reported by the server; may exceed the sample.
    pub online: u32,
    pub max_players: u32,
    pub version: Option<String>,
    pub motd: Option<String>,
    /// Decoded favicon PNG.
    #[serde(serialize_with = "serialize_base64", rename = "favicon")]
    pub favicon_png: Option<Vec<u8>>,
    pub latency_ms: Option<u64>,
    /// Why the service was unreachable.
    pub error: Option<String>,
}

fn serialize_base64<S: Serializer>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
    match bytes {
        Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
        None => serializer.serialize_none(),
    }
}

impl ProbeReport {
    /// Report for a service that could not be queried.
    pub fn unreachable(reason: impl Into<String>) -> Self {
        Self {
            reachable: false,
            error: Some(reason.into()),
            ..Self::default()
        }
    }

    /// Report for a service that answered the status query.
    ///
    /// A favicon that fails to decode is dropped rather than failing the probe.
    #[must_use]
    pub fn from_status(status: &StatusResponse, latency_ms: Option<u64>) -> Self {
        let players = status.players.clone().unwrap_or_default();
        let favicon_png = status.favicon_png().unwrap_or_else(|e| {
            tracing::debug!(error = %e, "Ignoring undecodable favicon");
            None
        });

        Self {
            reachable: true,
            players: players
                .sample
                .into_iter()
                .map(|p| p.name)
                .filter(|name| !name.is_empty())
                .collect(),
            online: players.online,
            max_players: players.max,
            version: status
                .version
                .as_ref()
                .map(|v| v.name.clone())
                .filter(|name| !name.is_empty()),
            motd: status.motd(),
            favicon_png,
            latency_ms,
            error: None,
        }
    }

    /// Whether anyone is connected.
    ///
    /// Servers may hide the sample while still reporting a count, so both
    /// are consulted.
    #[must_use]
    pub fn has_players(&self) -> bool {
        self.reachable && (self.online > 0 || !self.players.is_empty())
    }

    /// Favicon re-encoded as base64 for status.
    #[must_use]
    pub fn thumbnail(&self) -> Option<String> {
        self.favicon_png.as_ref().map(|png| STANDARD.encode(png))
    }
}

//! Save Codec
//!
//! Wire format for save snapshots exchanged over `/files`:
//!
//! ```text
//! wire text = base64( gzip( JSON save document ) )
//! ```
//!
//! The codec is a transport encoding only. Decoding validates each stage
//! (text encoding, compression stream, document shape) and extracts the
//! handful of fields the upload pipeline needs for authorization; the rest
//! of the document is carried through untouched as `raw_body`.

use std::io::{Read, Write};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use flate2::{read::MultiGzDecoder, write::GzEncoder, Compression};
use serde::Deserialize;
use thiserror::Error;

/// Default ceiling on the inflated size of a save (64 MiB).
pub const DEFAULT_MAX_DECODED_BYTES: usize = 64 * 1024 * 1024;

/// Player type marking a human-controlled participant.
pub const HUMAN_PLAYER_TYPE: &str = "Human";

// =============================================================================
// ERRORS
// =============================================================================

/// Codec stage at which decoding failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStage {
    /// Nothing to decode.
    Input,
    /// Text-safe encoding (base64) was invalid.
    Encoding,
    /// Compressed stream was corrupt or too large.
    Decompression,
    /// Decompressed bytes were not a well-formed save document.
    Schema,
}

impl DecodeStage {
    /// Stable lowercase name used in logs and error bodies.
    pub fn as_str(&self) -> &'static str {
        match self {
            DecodeStage::Input => "input",
            DecodeStage::Encoding => "encoding",
            DecodeStage::Decompression => "decompression",
            DecodeStage::Schema => "schema",
        }
    }
}

/// Save decoding errors.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Empty input.
    #[error("save payload is empty")]
    Empty,

    /// Base64 decoding failed.
    #[error("invalid save encoding: {0}")]
    Encoding(#[from] base64::DecodeError),

    /// Gzip stream could not be inflated.
    #[error("corrupt save compression: {0}")]
    Decompression(#[source] std::io::Error),

    /// Inflated save exceeds the configured ceiling.
    #[error("decompressed save exceeds {limit} bytes")]
    TooLarge {
        /// Configured ceiling in bytes.
        limit: usize,
    },

    /// Document is valid JSON but not an object.
    #[error("save document is not a JSON object")]
    NotAnObject,

    /// Document failed to parse.
    #[error("malformed save document: {0}")]
    Schema(#[from] serde_json::Error),
}

impl DecodeError {
    /// Stage that failed.
    pub fn stage(&self) -> DecodeStage {
        match self {
            DecodeError::Empty => DecodeStage::Input,
            DecodeError::Encoding(_) => DecodeStage::Encoding,
            DecodeError::Decompression(_) | DecodeError::TooLarge { .. } => {
                DecodeStage::Decompression
            }
            DecodeError::NotAnObject | DecodeError::Schema(_) => DecodeStage::Schema,
        }
    }
}

// =============================================================================
// DOCUMENT
// =============================================================================

/// The parts of a save document the server reads.
///
/// Unknown fields are ignored; missing fields fall back to defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveDocument {
    /// Embedded game identifier.
    #[serde(default)]
    pub game_id: String,
    /// Turn counter.
    #[serde(default)]
    pub turns: u32,
    /// Game setup, including the participant list.
    #[serde(default)]
    pub game_parameters: Option<GameParameters>,
}

/// Game setup block of a save document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GameParameters {
    /// Declared players, human and AI.
    #[serde(default)]
    pub players: Vec<PlayerEntry>,
}

/// One declared player.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerEntry {
    /// Player identifier (empty for AI slots).
    #[serde(default)]
    pub player_id: String,
    /// Controller type, e.g. `"Human"` or `"AI"`.
    #[serde(default)]
    pub player_type: String,
}

/// Human participants of a save, in document order.
///
/// Duplicates are kept; callers test membership, not uniqueness.
pub fn extract_human_participants(doc: &SaveDocument) -> Vec<String> {
    doc.game_parameters
        .as_ref()
        .map(|params| {
            params
                .players
                .iter()
                .filter(|p| p.player_type == HUMAN_PLAYER_TYPE && !p.player_id.is_empty())
                .map(|p| p.player_id.clone())
                .collect()
        })
        .unwrap_or_default()
}

/// Parse raw document bytes into a [`SaveDocument`].
pub fn parse_document(raw: &[u8]) -> Result<SaveDocument, DecodeError> {
    // serde would happily map a JSON array onto the struct positionally
    let first = raw.iter().find(|b| !b.is_ascii_whitespace());
    if first != Some(&b'{') {
        // Surface a real parse error for non-JSON input
        serde_json::from_slice::<serde::de::IgnoredAny>(raw)?;
        return Err(DecodeError::NotAnObject);
    }
    Ok(serde_json::from_slice(raw)?)
}

// =============================================================================
// PAYLOAD
// =============================================================================

/// A decoded save, valid for the duration of one upload or download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavePayload {
    /// Embedded game identifier.
    pub game_id: String,
    /// Turn number.
    pub turn_number: u32,
    /// Human participants, in document order.
    pub participant_ids: Vec<String>,
    /// Decompressed document bytes.
    pub raw_body: Vec<u8>,
}

impl SavePayload {
    /// Build a payload from decompressed document bytes.
    pub fn from_raw(raw_body: Vec<u8>) -> Result<Self, DecodeError> {
        let doc = parse_document(&raw_body)?;
        Ok(Self {
            participant_ids: extract_human_participants(&doc),
            game_id: doc.game_id,
            turn_number: doc.turns,
            raw_body,
        })
    }

    /// Whether `player_id` is among the human participants.
    pub fn has_participant(&self, player_id: &str) -> bool {
        self.participant_ids.iter().any(|p| p == player_id)
    }
}

// =============================================================================
// CODEC
// =============================================================================

/// Save codec with a bounded decompression budget.
#[derive(Debug, Clone, Copy)]
pub struct SaveCodec {
    max_decoded_bytes: usize,
}

impl Default for SaveCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DECODED_BYTES)
    }
}

impl SaveCodec {
    /// Create a codec that refuses to inflate more than `max_decoded_bytes`.
    pub fn new(max_decoded_bytes: usize) -> Self {
        Self { max_decoded_bytes }
    }

    /// Decode wire text into a [`SavePayload`].
    pub fn decode(&self, wire: &str) -> Result<SavePayload, DecodeError> {
        let wire = wire.trim_matches(|c: char| c.is_ascii_whitespace());
        if wire.is_empty() {
            return Err(DecodeError::Empty);
        }

        let compressed = STANDARD.decode(wire)?;
        let raw = self.inflate(&compressed)?;
        SavePayload::from_raw(raw)
    }

    /// Encode document bytes into wire text.
    pub fn encode(raw_body: &[u8]) -> std::io::Result<String> {
        let mut encoder = GzEncoder::new(Vec::with_capacity(raw_body.len() / 4), Compression::default());
        encoder.write_all(raw_body)?;
        let compressed = encoder.finish()?;
        Ok(STANDARD.encode(compressed))
    }

    fn inflate(&self, compressed: &[u8]) -> Result<Vec<u8>, DecodeError> {
        let limit = self.max_decoded_bytes;
        let mut out = Vec::new();
        MultiGzDecoder::new(compressed)
            .take(limit as u64 + 1)
            .read_to_end(&mut out)
            .map_err(DecodeError::Decompression)?;

        if out.len() > limit {
            return Err(DecodeError::TooLarge { limit });
        }
        Ok(out)
    }
}

/// Decode with the default budget.
pub fn decode(wire: &str) -> Result<SavePayload, DecodeError> {
    SaveCodec::default().decode(wire)
}

/// Encode document bytes into wire text.
pub fn encode(raw_body: &[u8]) -> std::io::Result<String> {
    SaveCodec::encode(raw_body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn sample_doc() -> Vec<u8> {
        serde_json::to_vec(&json!({
            "gameId": "11111111-1111-1111-1111-111111111111",
            "turns": 42,
            "gameParameters": {
                "players": [
                    { "playerId": "p1", "playerType": "Human" },
                    { "playerId": "", "playerType": "Human" },
                    { "playerId": "ai-1", "playerType": "AI" },
                    { "playerId": "p2", "playerType": "Human" },
                    { "playerId": "p1", "playerType": "Human" }
                ]
            },
            "civilizations": [{ "civName": "Rome" }]
        }))
        .unwrap()
    }

    #[test]
    fn test_decode_extracts_fields() {
        let wire = encode(&sample_doc()).unwrap();
        let payload = decode(&wire).unwrap();

        assert_eq!(payload.game_id, "11111111-1111-1111-1111-111111111111");
        assert_eq!(payload.turn_number, 42);
        // Order kept, empty ids and AI dropped, duplicates kept
        assert_eq!(payload.participant_ids, vec!["p1", "p2", "p1"]);
        assert_eq!(payload.raw_body, sample_doc());
        assert!(payload.has_participant("p2"));
        assert!(!payload.has_participant("ai-1"));
    }

    #[test]
    fn test_empty_input_rejected() {
        assert_eq!(decode("").unwrap_err().stage(), DecodeStage::Input);
        assert_eq!(decode("  \n").unwrap_err().stage(), DecodeStage::Input);
    }

    #[test]
    fn test_bad_encoding_rejected() {
        let err = decode("not base64 at all!").unwrap_err();
        assert_eq!(err.stage(), DecodeStage::Encoding);
    }

    #[test]
    fn test_bad_compression_rejected() {
        let wire = STANDARD.encode(b"plain bytes, no gzip header");
        let err = decode(&wire).unwrap_err();
        assert_eq!(err.stage(), DecodeStage::Decompression);
    }

    #[test]
    fn test_non_json_rejected() {
        let wire = encode(b"this is not json").unwrap();
        let err = decode(&wire).unwrap_err();
        assert_eq!(err.stage(), DecodeStage::Schema);
        assert!(matches!(err, DecodeError::Schema(_)));
    }

    #[test]
    fn test_non_object_rejected() {
        let wire = encode(b"[\"11111111-1111-1111-1111-111111111111\", 3]").unwrap();
        let err = decode(&wire).unwrap_err();
        assert!(matches!(err, DecodeError::NotAnObject));
        assert_eq!(err.stage(), DecodeStage::Schema);
    }

    #[test]
    fn test_negative_turns_rejected() {
        let wire = encode(br#"{"gameId":"x","turns":-1}"#).unwrap();
        assert_eq!(decode(&wire).unwrap_err().stage(), DecodeStage::Schema);
    }

    #[test]
    fn test_missing_fields_default() {
        let wire = encode(b"{}").unwrap();
        let payload = decode(&wire).unwrap();
        assert_eq!(payload.game_id, "");
        assert_eq!(payload.turn_number, 0);
        assert!(payload.participant_ids.is_empty());
    }

    #[test]
    fn test_decompression_budget() {
        let doc = format!("{{\"pad\":\"{}\"}}", "a".repeat(4096));
        let wire = encode(doc.as_bytes()).unwrap();

        let err = SaveCodec::new(1024).decode(&wire).unwrap_err();
        assert!(matches!(err, DecodeError::TooLarge { limit: 1024 }));
        assert_eq!(err.stage(), DecodeStage::Decompression);

        assert!(SaveCodec::new(doc.len()).decode(&wire).is_ok());
    }

    #[test]
    fn test_surrounding_whitespace_tolerated() {
        let wire = format!("{}\n", encode(&sample_doc()).unwrap());
        assert!(decode(&wire).is_ok());
    }

    proptest! {
        #[test]
        fn prop_roundtrip(
            turns in 0u32..100_000,
            humans in proptest::collection::vec("[a-z0-9-]{1,12}", 0..6),
            note in ".{0,64}",
        ) {
            let players: Vec<_> = humans
                .iter()
                .map(|id| json!({ "playerId": id, "playerType": "Human" }))
                .chain(std::iter::once(json!({ "playerId": "bot", "playerType": "AI" })))
                .collect();
            let raw = serde_json::to_vec(&json!({
                "gameId": "22222222-2222-2222-2222-222222222222",
                "turns": turns,
                "gameParameters": { "players": players },
                "note": note,
            })).unwrap();

            let original = SavePayload::from_raw(raw).unwrap();
            let wire = encode(&original.raw_body).unwrap();
            let decoded = decode(&wire).unwrap();

            prop_assert_eq!(&decoded, &original);
            prop_assert_eq!(decoded.participant_ids, humans);
        }
    }
}

//! Game and Player Identifiers
//!
//! Shape checks for the identifiers carried in URLs, credential headers
//! and save documents.
//!
//! A game identifier is a lowercase canonical UUID, optionally followed by
//! [`PREVIEW_SUFFIX`] to address the lightweight preview snapshot of the
//! same game:
//!
//! ```text
//! 11111111-1111-1111-1111-111111111111          full save
//! 11111111-1111-1111-1111-111111111111_Preview  preview save
//! ```

/// Suffix marking the preview variant of a game identifier.
pub const PREVIEW_SUFFIX: &str = "_Preview";

/// Length of a hyphenated canonical UUID.
const UUID_LEN: usize = 36;

/// Positions of the hyphens in a canonical UUID.
const HYPHENS: [usize; 4] = [8, 13, 18, 23];

/// Check `s` is a hyphenated UUID made of lowercase hex digits.
fn is_lower_uuid(s: &str) -> bool {
    let bytes = s.as_bytes();
    if bytes.len() != UUID_LEN {
        return false;
    }
    bytes.iter().enumerate().all(|(i, &b)| {
        if HYPHENS.contains(&i) {
            b == b'-'
        } else {
            b.is_ascii_digit() || (b'a'..=b'f').contains(&b)
        }
    })
}

/// Validate a game identifier (canonical UUID, optional preview suffix).
pub fn validate_game_id(id: &str) -> bool {
    is_lower_uuid(id.strip_suffix(PREVIEW_SUFFIX).unwrap_or(id))
}

/// Whether the identifier addresses the preview variant.
pub fn is_preview_variant(id: &str) -> bool {
    id.len() > PREVIEW_SUFFIX.len() && id.ends_with(PREVIEW_SUFFIX)
}

/// Strip the preview suffix, returning the base game identifier.
///
/// Identifiers without the suffix are returned unchanged.
pub fn strip_preview_suffix(id: &str) -> &str {
    if is_preview_variant(id) {
        &id[..id.len() - PREVIEW_SUFFIX.len()]
    } else {
        id
    }
}

/// A validated game identifier split into base id and variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameRef {
    /// Base game identifier (no suffix).
    pub base_id: String,
    /// Whether the preview variant was addressed.
    pub preview: bool,
}

impl GameRef {
    /// Parse a raw identifier. Returns `None` if the shape is invalid.
    pub fn parse(id: &str) -> Option<Self> {
        if !validate_game_id(id) {
            return None;
        }
        Some(Self {
            base_id: strip_preview_suffix(id).to_string(),
            preview: is_preview_variant(id),
        })
    }
}

/// Validate a player identifier.
///
/// Players are addressed by UUID in any of the forms the `uuid` crate
/// accepts in hyphenated layout; case is not significant.
pub fn validate_player_id(id: &str) -> bool {
    id.len() == UUID_LEN && uuid::Uuid::try_parse(id).is_ok()
}

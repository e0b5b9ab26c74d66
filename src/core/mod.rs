//! Save format primitives.
//!
//! Identifier shape checks and the save wire codec. Pure functions with no
//! I/O; everything here is safe to call from any task.

pub mod codec;
pub mod game_id;

pub use codec::{DecodeError, DecodeStage, SaveCodec, SavePayload};
pub use game_id::{GameRef, PREVIEW_SUFFIX};

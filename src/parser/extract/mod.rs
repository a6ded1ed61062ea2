pub mod lineup;
pub mod metadata;
pub mod pitching;

use crate::db::{BattingRow, GameRow, PitchingRow};
use crate::parser::blocks::DocumentBlock;
use crate::source::GameRef;

/// Everything read off the box-score document. Batting and pitching rows are
/// placeholders: identity and box-only fields, counters still zero.
pub struct BoxScore {
    pub game: GameRow,
    pub lineup: Vec<BattingRow>,
    pub staff: Vec<PitchingRow>,
}

pub fn extract_box(game: &GameRef, blocks: &[DocumentBlock]) -> BoxScore {
    BoxScore {
        game: metadata::extract(game, blocks),
        lineup: lineup::extract(game, blocks),
        staff: pitching::extract(game, blocks),
    }
}

// ── Tests ──

pub mod blocks;
pub mod chronology;
pub mod events;
pub mod extract;
pub mod result;
pub mod rules;

use std::path::Path;

use crate::db::{BattingRow, GameRow, PitchingRow};
use crate::error::IngestError;
use crate::rollup;
use crate::source::{self, GameDocuments};
use events::PlateAppearance;

/// One game, fully parsed and rolled up, ready to be written in one transaction.
#[derive(Debug, Clone)]
pub struct GameData {
    pub game: GameRow,
    pub events: Vec<PlateAppearance>,
    pub batting: Vec<BattingRow>,
    pub pitching: Vec<PitchingRow>,
}

/// Play-by-play → chronology → events; box score → metadata and placeholders;
/// then per-player rollup over the events.
pub fn process_game(docs: &GameDocuments) -> GameData {
    let events = chronology::replay(&docs.game, &docs.play_by_play);
    let box_score = extract::extract_box(&docs.game, &docs.box_score);
    let batting = rollup::batting(&docs.game, &events, &box_score.lineup);
    let pitching = rollup::pitching(&docs.game, &events, &box_score.staff);
    GameData { game: box_score.game, events, batting, pitching }
}

pub fn process_dir(dir: &Path) -> Result<GameData, IngestError> {
    let docs = source::load_game_dir(dir)?;
    Ok(process_game(&docs))
}

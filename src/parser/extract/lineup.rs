use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::db::BattingRow;
use crate::parser::blocks::{row_text, Cell, DocumentBlock};
use crate::rollup::BattingCounters;
use crate::source::GameRef;

const HEADER_LABELS: &[&str] = &["守備", "選手", "打数", "安打"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Position {
    #[serde(rename = "P")]
    Pitcher,
    #[serde(rename = "C")]
    Catcher,
    #[serde(rename = "1B")]
    FirstBase,
    #[serde(rename = "2B")]
    SecondBase,
    #[serde(rename = "3B")]
    ThirdBase,
    #[serde(rename = "SS")]
    Shortstop,
    #[serde(rename = "LF")]
    LeftField,
    #[serde(rename = "CF")]
    CenterField,
    #[serde(rename = "RF")]
    RightField,
    #[serde(rename = "DH")]
    DesignatedHitter,
    #[serde(rename = "PH")]
    PinchHitter,
    #[serde(rename = "PR")]
    PinchRunner,
}

// Two-character substitution marks first, then fielding positions, then the
// bare pinch marks. A sub who took the field ("打中") keeps the field position.
const POSITION_MARKS: &[(&str, Position)] = &[
    ("走指", Position::PinchRunner),
    ("打指", Position::PinchHitter),
    ("投", Position::Pitcher),
    ("捕", Position::Catcher),
    ("一", Position::FirstBase),
    ("二", Position::SecondBase),
    ("三", Position::ThirdBase),
    ("遊", Position::Shortstop),
    ("左", Position::LeftField),
    ("中", Position::CenterField),
    ("右", Position::RightField),
    ("DH", Position::DesignatedHitter),
    ("指", Position::DesignatedHitter),
    ("打", Position::PinchHitter),
    ("走", Position::PinchRunner),
];

impl Position {
    pub fn from_box_text(text: &str) -> Option<Self> {
        POSITION_MARKS
            .iter()
            .find(|(mark, _)| text.contains(mark))
            .map(|(_, p)| *p)
    }

    pub fn code(self) -> &'static str {
        match self {
            Position::Pitcher => "P",
            Position::Catcher => "C",
            Position::FirstBase => "1B",
            Position::SecondBase => "2B",
            Position::ThirdBase => "3B",
            Position::Shortstop => "SS",
            Position::LeftField => "LF",
            Position::CenterField => "CF",
            Position::RightField => "RF",
            Position::DesignatedHitter => "DH",
            Position::PinchHitter => "PH",
            Position::PinchRunner => "PR",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        POSITION_MARKS
            .iter()
            .map(|(_, p)| *p)
            .find(|p| p.code() == code)
    }
}

/// Placeholder batting rows (identity, team, lineup slot, position, runs) from
/// the box score's batting tables. The first table is the away side.
pub fn extract(game: &GameRef, blocks: &[DocumentBlock]) -> Vec<BattingRow> {
    let tables = blocks.iter().filter(|b| {
        let text = b.flat_text();
        b.is_table() && HEADER_LABELS.iter().all(|l| text.contains(l))
    });

    let mut rows = Vec::new();
    let mut seen = HashSet::new();
    for (table, team) in tables.zip([&game.away, &game.home]) {
        let Some(header_idx) = table.rows.iter().position(|r| {
            let text = row_text(r);
            text.contains("選手") && text.contains("打数")
        }) else {
            continue;
        };
        let header = &table.rows[header_idx];
        let column = |label: &str| header.iter().position(|c| c.text.trim() == label);
        let player_col = column("選手");
        let position_col = column("守備");
        let runs_col = column("得点");

        for cells in &table.rows[header_idx + 1..] {
            let Some(player_idx) = cells.iter().position(|c| c.player_id().is_some()) else {
                continue;
            };
            let Some(player_id) = cells[player_idx].player_id() else { continue };
            if !seen.insert(player_id.to_string()) {
                debug!(game = %game.id, player_id, "player listed twice in batting tables");
                continue;
            }
            // Data rows can carry a leading lineup cell the header lacks.
            let offset = player_col.map_or(0, |p| player_idx as isize - p as isize);
            let at = |col: Option<usize>| {
                col.and_then(|c| usize::try_from(c as isize + offset).ok())
                    .and_then(|c| cells.get(c))
                    .map(|c| c.text.trim())
            };

            let lineup_slot = cells[..player_idx]
                .iter()
                .find_map(|c| c.text.trim().parse::<u8>().ok())
                .filter(|n| (1..=9).contains(n));
            let position = at(position_col)
                .and_then(Position::from_box_text)
                .or_else(|| cells[..player_idx].iter().find_map(|c| Position::from_box_text(&c.text)));

            rows.push(BattingRow {
                game_id: game.id.clone(),
                player_id: player_id.to_string(),
                team: team.clone(),
                lineup_slot,
                position,
                runs: at(runs_col).and_then(|t| t.parse().ok()).unwrap_or(0),
                counters: BattingCounters::default(),
            });
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cells(texts: &[&str], player: (usize, &str)) -> Vec<Cell> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| {
                if i == player.0 {
                    Cell::with_link(*t, format!("/bis/players/{}.html", player.1))
                } else {
                    Cell::new(*t)
                }
            })
            .collect()
    }

    fn table(rows: Vec<Vec<Cell>>) -> DocumentBlock {
        DocumentBlock::table(rows)
    }

    fn header() -> Vec<Cell> {
        ["守備", "選手", "打数", "得点", "安打", "打点", "盗塁"].into_iter().map(Cell::new).collect()
    }

    #[test]
    fn position_marks() {
        assert_eq!(Position::from_box_text("(中)"), Some(Position::CenterField));
        assert_eq!(Position::from_box_text("打中"), Some(Position::CenterField));
        assert_eq!(Position::from_box_text("打"), Some(Position::PinchHitter));
        assert_eq!(Position::from_box_text("走指"), Some(Position::PinchRunner));
        assert_eq!(Position::from_box_text("指"), Some(Position::DesignatedHitter));
        assert_eq!(Position::from_box_text(""), None);
        assert_eq!(Position::from_code("SS"), Some(Position::Shortstop));
    }

    #[test]
    fn first_table_is_away_second_is_home() {
        let game = GameRef::parse("2021-0409-db-t-01").unwrap();
        let away = table(vec![
            header(),
            cells(&["1", "(中)", "近本", "4", "1", "2", "0", "0"], (2, "101")),
            cells(&["", "打", "原口", "1", "0", "0", "0", "0"], (2, "109")),
        ]);
        let home = table(vec![header(), cells(&["1", "(二)", "牧", "4", "0", "1", "1", "0"], (2, "201"))]);

        let rows = extract(&game, &[away, home]);
        assert_eq!(rows.len(), 3);

        assert_eq!(rows[0].team, "t");
        assert_eq!(rows[0].lineup_slot, Some(1));
        assert_eq!(rows[0].position, Some(Position::CenterField));
        assert_eq!(rows[0].runs, 1);
        assert_eq!(rows[0].counters, BattingCounters::default());

        assert_eq!(rows[1].lineup_slot, None);
        assert_eq!(rows[1].position, Some(Position::PinchHitter));

        assert_eq!(rows[2].team, "db");
        assert_eq!(rows[2].position, Some(Position::SecondBase));
        assert_eq!(rows[2].runs, 0);
    }

    #[test]
    fn tables_without_batting_headers_are_ignored() {
        let game = GameRef::parse("2021-0409-db-t-01").unwrap();
        let other = table(vec![cells(&["○", "投手", "山本"], (2, "900"))]);
        assert!(extract(&game, &[other]).is_empty());
    }
}

use serde::{Deserialize, Serialize};

use crate::db::PitchingRow;
use crate::parser::blocks::{row_text, Cell, DocumentBlock};
use crate::rollup::Tally;
use crate::source::GameRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Win,
    Loss,
    Save,
    Hold,
}

impl Decision {
    pub fn from_mark(mark: &str) -> Option<Self> {
        match mark.trim() {
            "○" => Some(Decision::Win),
            "●" => Some(Decision::Loss),
            "S" | "Ｓ" => Some(Decision::Save),
            "H" | "Ｈ" => Some(Decision::Hold),
            _ => None,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Decision::Win => "W",
            Decision::Loss => "L",
            Decision::Save => "S",
            Decision::Hold => "H",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "W" => Some(Decision::Win),
            "L" => Some(Decision::Loss),
            "S" => Some(Decision::Save),
            "H" => Some(Decision::Hold),
            _ => None,
        }
    }
}

/// Box-score workload for one pitcher in one game.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    /// Innings pitched, stored as outs recorded (5⅔ = 17).
    pub outs_recorded: u32,
    pub pitches: u32,
    pub batters_faced: u32,
    pub runs: u32,
    pub earned_runs: u32,
    pub wild_pitches: u32,
    pub balks: u32,
}

/// Outs recorded from an innings-pitched cell and an optional separate
/// fraction cell: "5.2", "5 2/3", "0+", ("6", "1/3").
pub fn outs_from_innings(whole: &str, fraction: Option<&str>) -> Option<u32> {
    let mut outs = 0;
    let mut seen = false;
    let tokens = whole.split_whitespace().chain(fraction.into_iter().flat_map(str::split_whitespace));
    for token in tokens {
        let token = token.trim_end_matches('+');
        if token.is_empty() {
            seen = true;
            continue;
        }
        if let Some((num, den)) = token.split_once('/') {
            if den.trim() != "3" {
                return None;
            }
            outs += num.trim().parse::<u32>().ok()?;
        } else if let Some((inn, thirds)) = token.split_once('.') {
            outs += inn.parse::<u32>().ok()? * 3 + thirds.parse::<u32>().ok()?;
        } else {
            outs += token.parse::<u32>().ok()? * 3;
        }
        seen = true;
    }
    seen.then_some(outs)
}

fn is_fraction(text: &str) -> bool {
    matches!(text.trim(), "1/3" | "2/3")
}

/// Placeholder pitching rows with box-score workload and decisions. The first
/// table is the away staff.
pub fn extract(game: &GameRef, blocks: &[DocumentBlock]) -> Vec<PitchingRow> {
    let tables = blocks.iter().filter(|b| {
        let text = b.flat_text();
        b.is_table() && text.contains("投手") && text.contains("投球回")
    });

    let mut rows = Vec::new();
    for (table, team) in tables.zip([&game.away, &game.home]) {
        let Some(header_idx) = table.rows.iter().position(|r| row_text(r).contains("投球回")) else {
            continue;
        };
        let header: Vec<&str> = table.rows[header_idx].iter().map(|c| c.text.trim()).collect();
        let staff: Vec<&[Cell]> = table.rows[header_idx + 1..]
            .iter()
            .map(Vec::as_slice)
            .filter(|cells| cells.iter().any(|c| c.player_id().is_some()))
            .collect();

        let last = staff.len().saturating_sub(1);
        for (order, cells) in staff.iter().enumerate() {
            if let Some(row) = pitching_line(game, team, &header, cells, order, last) {
                rows.push(row);
            }
        }
    }
    rows
}

fn pitching_line(
    game: &GameRef,
    team: &str,
    header: &[&str],
    cells: &[Cell],
    order: usize,
    last: usize,
) -> Option<PitchingRow> {
    let player_idx = cells.iter().position(|c| c.player_id().is_some())?;
    let player_id = cells[player_idx].player_id()?;
    let column = |label: &str| header.iter().position(|h| *h == label);
    let header_player = column("投手").unwrap_or(0);

    // Columns up to innings pitched line up from the player cell; the rest are
    // counted from the right, since innings can span one or two cells.
    let leading = |label: &str| {
        column(label)
            .and_then(|c| (c + player_idx).checked_sub(header_player))
            .and_then(|c| cells.get(c))
            .map(|c| c.text.trim())
    };
    let trailing = |label: &str| {
        column(label)
            .and_then(|c| cells.len().checked_sub(header.len() - c))
            .and_then(|c| cells.get(c))
            .map(|c| c.text.trim())
    };
    let count = |text: Option<&str>| text.and_then(|t| t.parse::<u32>().ok()).unwrap_or(0);

    let outs_recorded = column("投球回")
        .and_then(|c| (c + player_idx).checked_sub(header_player))
        .and_then(|c| {
            let whole = cells.get(c)?.text.as_str();
            let fraction = cells.get(c + 1).map(|n| n.text.as_str()).filter(|t| is_fraction(t));
            outs_from_innings(whole, fraction)
        })
        .unwrap_or(0);

    let decision = cells[..player_idx].iter().find_map(|c| Decision::from_mark(&c.text));

    Some(PitchingRow {
        game_id: game.id.clone(),
        player_id: player_id.to_string(),
        team: team.to_string(),
        appearance: order as u32,
        decision,
        is_start: order == 0,
        is_finish: order == last,
        workload: Workload {
            outs_recorded,
            pitches: count(leading("投球数")),
            batters_faced: count(leading("打者")),
            runs: count(trailing("失点")),
            earned_runs: count(trailing("自責点")),
            wild_pitches: count(trailing("暴投")),
            balks: count(trailing("ボーク")),
        },
        counters: Tally::default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &[&str] = &[
        "", "投手", "投球数", "打者", "投球回", "安打", "本塁打", "四球", "死球", "三振", "暴投", "ボーク",
        "失点", "自責点",
    ];

    fn row(texts: &[&str], player: (usize, &str)) -> Vec<Cell> {
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

    #[test]
    fn innings_forms() {
        assert_eq!(outs_from_innings("5.2", None), Some(17));
        assert_eq!(outs_from_innings("5 2/3", None), Some(17));
        assert_eq!(outs_from_innings("6", Some("1/3")), Some(19));
        assert_eq!(outs_from_innings("0+", None), Some(0));
        assert_eq!(outs_from_innings("9", None), Some(27));
        assert_eq!(outs_from_innings("", None), None);
        assert_eq!(outs_from_innings("abc", None), None);
    }

    #[test]
    fn staff_lines_with_split_innings_cell() {
        let game = GameRef::parse("2021-0409-db-t-01").unwrap();
        let header: Vec<Cell> = HEADER.iter().map(|t| Cell::new(*t)).collect();
        // Starter's innings spill into a separate "2/3" cell.
        let starter = row(
            &["●", "青柳", "98", "27", "5", "2/3", "8", "1", "2", "0", "4", "1", "0", "4", "3"],
            (1, "501"),
        );
        let reliever = row(
            &["", "岩崎", "15", "4", "1", "1", "0", "0", "0", "2", "0", "0", "0", "0"],
            (1, "502"),
        );
        let block = DocumentBlock::table(vec![header, starter, reliever]);

        let rows = extract(&game, &[block]);
        assert_eq!(rows.len(), 2);

        let s = &rows[0];
        assert_eq!(s.team, "t");
        assert_eq!(s.decision, Some(Decision::Loss));
        assert!(s.is_start && !s.is_finish);
        assert_eq!(s.workload.outs_recorded, 17);
        assert_eq!(s.workload.pitches, 98);
        assert_eq!(s.workload.batters_faced, 27);
        assert_eq!(s.workload.wild_pitches, 1);
        assert_eq!(s.workload.balks, 0);
        assert_eq!(s.workload.runs, 4);
        assert_eq!(s.workload.earned_runs, 3);

        let r = &rows[1];
        assert!(!r.is_start && r.is_finish);
        assert_eq!(r.decision, None);
        assert_eq!(r.workload.outs_recorded, 3);
        assert_eq!(r.workload.earned_runs, 0);
        assert_eq!(r.appearance, 1);
    }

    #[test]
    fn decision_marks() {
        assert_eq!(Decision::from_mark("○"), Some(Decision::Win));
        assert_eq!(Decision::from_mark(" H "), Some(Decision::Hold));
        assert_eq!(Decision::from_mark("勝"), None);
        assert_eq!(Decision::from_code(Decision::Save.code()), Some(Decision::Save));
    }
}

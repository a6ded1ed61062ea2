use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::blocks::{Cell, Inning, RESULT_COL};
use super::result::{self, OutcomeFlags};

static OUTS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d)\s*(?:アウト|outs?\b)").unwrap());
static COUNT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d)\s*[-－ー]\s*(\d)").unwrap());

// ── Base state ──

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaseState {
    #[default]
    Empty,
    First,
    Second,
    Third,
    FirstSecond,
    FirstThird,
    SecondThird,
    Loaded,
}

// Two-base phrases come before the single-base phrases they contain.
const BASE_VOCABULARY: &[(&str, BaseState)] = &[
    ("満塁", BaseState::Loaded),
    ("bases loaded", BaseState::Loaded),
    ("1・2塁", BaseState::FirstSecond),
    ("一・二塁", BaseState::FirstSecond),
    ("1,2塁", BaseState::FirstSecond),
    ("first and second", BaseState::FirstSecond),
    ("1st and 2nd", BaseState::FirstSecond),
    ("1・3塁", BaseState::FirstThird),
    ("一・三塁", BaseState::FirstThird),
    ("1,3塁", BaseState::FirstThird),
    ("first and third", BaseState::FirstThird),
    ("1st and 3rd", BaseState::FirstThird),
    ("2・3塁", BaseState::SecondThird),
    ("二・三塁", BaseState::SecondThird),
    ("2,3塁", BaseState::SecondThird),
    ("second and third", BaseState::SecondThird),
    ("2nd and 3rd", BaseState::SecondThird),
    ("1塁", BaseState::First),
    ("一塁", BaseState::First),
    ("first", BaseState::First),
    ("1st", BaseState::First),
    ("2塁", BaseState::Second),
    ("二塁", BaseState::Second),
    ("second", BaseState::Second),
    ("2nd", BaseState::Second),
    ("3塁", BaseState::Third),
    ("三塁", BaseState::Third),
    ("third", BaseState::Third),
    ("3rd", BaseState::Third),
];

impl BaseState {
    pub fn parse(text: &str) -> Self {
        let lower = text.trim().to_lowercase();
        BASE_VOCABULARY
            .iter()
            .find(|(phrase, _)| lower.contains(phrase))
            .map(|(_, state)| *state)
            .unwrap_or_default()
    }

    pub fn code(self) -> &'static str {
        match self {
            BaseState::Empty => "---",
            BaseState::First => "1--",
            BaseState::Second => "-2-",
            BaseState::Third => "--3",
            BaseState::FirstSecond => "12-",
            BaseState::FirstThird => "1-3",
            BaseState::SecondThird => "-23",
            BaseState::Loaded => "123",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        [
            BaseState::Empty,
            BaseState::First,
            BaseState::Second,
            BaseState::Third,
            BaseState::FirstSecond,
            BaseState::FirstThird,
            BaseState::SecondThird,
            BaseState::Loaded,
        ]
        .into_iter()
        .find(|s| s.code() == code)
    }
}

// ── Count ──

/// Ball-strike count before the deciding pitch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Count {
    pub balls: u8,
    pub strikes: u8,
}

impl Count {
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.replace("より", "");
        let caps = COUNT_RE.captures(text.trim())?;
        let balls: u8 = caps[1].parse().ok()?;
        let strikes: u8 = caps[2].parse().ok()?;
        (balls <= 3 && strikes <= 2).then_some(Count { balls, strikes })
    }
}

impl fmt::Display for Count {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.balls, self.strikes)
    }
}

// ── Outs ──

/// Outs before the plate appearance; 0 when absent or unreadable.
pub fn parse_outs(text: &str) -> u8 {
    let text = text.trim();
    if text.contains("無死") || text.to_lowercase().contains("no out") {
        return 0;
    }
    if text.contains("一死") {
        return 1;
    }
    if text.contains("二死") {
        return 2;
    }
    OUTS_RE
        .captures(text)
        .and_then(|caps| caps[1].parse::<u8>().ok())
        .filter(|n| *n <= 2)
        .unwrap_or(0)
}

// ── Plate appearances ──

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlateAppearance {
    pub game_id: String,
    /// Position within the game's chronology, starting at 0.
    pub seq: u32,
    pub batter_id: String,
    pub pitcher_id: Option<String>,
    pub inning: Inning,
    pub batting_team: String,
    pub outs: u8,
    pub base_state: BaseState,
    pub count: Option<Count>,
    #[serde(flatten)]
    pub outcome: OutcomeFlags,
}

/// Context attached to every row of an event table.
#[derive(Debug, Clone, Copy)]
pub struct AtBatContext<'a> {
    pub game_id: &'a str,
    pub pitcher_id: Option<&'a str>,
    pub inning: Inning,
    pub batting_team: &'a str,
}

/// Convert forwarded table rows into plate appearances, appending to `out`.
/// Rows that do not describe a completed plate appearance are skipped.
pub fn extract_rows(rows: &[&[Cell]], ctx: &AtBatContext<'_>, out: &mut Vec<PlateAppearance>) {
    for row in rows {
        if let Some(pa) = parse_row(row, ctx, out.len() as u32) {
            out.push(pa);
        }
    }
}

fn parse_row(cells: &[Cell], ctx: &AtBatContext<'_>, seq: u32) -> Option<PlateAppearance> {
    if cells.iter().filter(|c| c.is_populated()).count() < 3 {
        return None;
    }

    let text_at = |idx: usize| cells.get(idx).map(|c| c.text.as_str()).unwrap_or("");

    let Some(batter_id) = cells.iter().find_map(Cell::player_id) else {
        debug!(game = ctx.game_id, inning = %ctx.inning, "row without batter reference");
        return None;
    };

    let result_text = text_at(RESULT_COL);
    let Some(outcome) = result::interpret(result_text) else {
        debug!(game = ctx.game_id, inning = %ctx.inning, result_text, "row is not a completed plate appearance");
        return None;
    };

    Some(PlateAppearance {
        game_id: ctx.game_id.to_string(),
        seq,
        batter_id: batter_id.to_string(),
        pitcher_id: ctx.pitcher_id.map(str::to_string),
        inning: ctx.inning,
        batting_team: ctx.batting_team.to_string(),
        outs: parse_outs(text_at(0)),
        base_state: BaseState::parse(text_at(1)),
        count: Count::parse(text_at(3)),
        outcome,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> AtBatContext<'static> {
        AtBatContext {
            game_id: "2021-0409-db-t-01",
            pitcher_id: Some("900"),
            inning: Inning::top(1),
            batting_team: "t",
        }
    }

    fn row(outs: &str, bases: &str, batter: &str, count: &str, result: &str) -> Vec<Cell> {
        vec![
            Cell::new(outs),
            Cell::new(bases),
            Cell::with_link("打者", format!("/bis/players/{batter}.html")),
            Cell::new(count),
            Cell::new(result),
        ]
    }

    #[test]
    fn base_state_prefers_two_base_phrases() {
        assert_eq!(BaseState::parse("1・2塁"), BaseState::FirstSecond);
        assert_eq!(BaseState::parse("2・3塁"), BaseState::SecondThird);
        assert_eq!(BaseState::parse("1・3塁"), BaseState::FirstThird);
        assert_eq!(BaseState::parse("満塁"), BaseState::Loaded);
        assert_eq!(BaseState::parse("2塁"), BaseState::Second);
        assert_eq!(BaseState::parse("runners on first and second"), BaseState::FirstSecond);
        assert_eq!(BaseState::parse("runners on first and third"), BaseState::FirstThird);
        assert_eq!(BaseState::parse(""), BaseState::Empty);
        assert_eq!(BaseState::parse("1・2塁").code(), "12-");
        assert_eq!(BaseState::from_code("-23"), Some(BaseState::SecondThird));
    }

    #[test]
    fn count_strips_suffix_and_rejects_impossible_counts() {
        assert_eq!(Count::parse("3-2より"), Some(Count { balls: 3, strikes: 2 }));
        assert_eq!(Count::parse("0-0"), Some(Count { balls: 0, strikes: 0 }));
        assert_eq!(Count::parse("4-1"), None);
        assert_eq!(Count::parse(""), None);
        assert_eq!(Count { balls: 1, strikes: 2 }.to_string(), "1-2");
    }

    #[test]
    fn outs_vocabulary() {
        assert_eq!(parse_outs("2アウト"), 2);
        assert_eq!(parse_outs("一死"), 1);
        assert_eq!(parse_outs("1 out"), 1);
        assert_eq!(parse_outs(""), 0);
        assert_eq!(parse_outs("7アウト"), 0);
    }

    #[test]
    fn full_row_becomes_a_plate_appearance() {
        let rows = [row("1アウト", "1・2塁", "11", "2-1より", "左中間への二塁打、打点2")];
        let slices: Vec<&[Cell]> = rows.iter().map(Vec::as_slice).collect();
        let mut out = Vec::new();
        extract_rows(&slices, &ctx(), &mut out);

        assert_eq!(out.len(), 1);
        let pa = &out[0];
        assert_eq!(pa.batter_id, "11");
        assert_eq!(pa.pitcher_id.as_deref(), Some("900"));
        assert_eq!(pa.outs, 1);
        assert_eq!(pa.base_state, BaseState::FirstSecond);
        assert_eq!(pa.count, Some(Count { balls: 2, strikes: 1 }));
        assert!(pa.outcome.double);
        assert_eq!(pa.outcome.rbi, 2);
        assert_eq!(pa.seq, 0);
    }

    #[test]
    fn sparse_unlinked_and_unrecognised_rows_are_skipped() {
        let header = vec![Cell::new("アウト"), Cell::new("塁上"), Cell::new("打者")];
        let sparse = vec![Cell::new(""), Cell::with_link("x", "/bis/players/1.html")];
        let unlinked = vec![Cell::new("0"), Cell::new(""), Cell::new("代打"), Cell::new(""), Cell::new("三振")];
        let stolen = row("0アウト", "1塁", "12", "", "盗塁成功");
        let good = row("0アウト", "", "13", "0-0", "ショートゴロ");
        let rows = [header, sparse, unlinked, stolen, good];
        let slices: Vec<&[Cell]> = rows.iter().map(Vec::as_slice).collect();

        let mut out = Vec::new();
        extract_rows(&slices, &ctx(), &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].batter_id, "13");
        assert!(out[0].outcome.ground_out);
    }
}

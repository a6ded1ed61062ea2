use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::db::{GameRow, LineScore};
use crate::parser::blocks::{Cell, DocumentBlock};
use crate::source::GameRef;

static START_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"◇開始\s*(\d{1,2})\s*[:時]\s*(\d{2})").unwrap());
static DURATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"◇試合時間\s*(\d+)\s*時間\s*(\d+)\s*分").unwrap());
static ATTENDANCE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"◇入場者\s*([\d,]+)\s*人").unwrap());
static VENUE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d{4}年\d{1,2}月\d{1,2}日\s*(?:[（(][^）)]*[）)])?\s*([^【◇\d:]+)").unwrap()
});
static TITLE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"【([^】]+)】").unwrap());

const KNOWN_VENUES: &[&str] = &[
    "東京ドーム", "横浜", "神宮", "バンテリンドーム", "甲子園", "マツダスタジアム", "京セラD大阪",
    "PayPayドーム", "楽天モバイル", "ベルーナドーム", "ZOZOマリン", "エスコンフィールド",
    "ほっと神戸", "丸亀",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameType {
    #[default]
    Regular,
    Interleague,
    ClimaxFirstStage,
    ClimaxFinalStage,
    ClimaxSeries,
    JapanSeries,
    AllStar,
    Exhibition,
}

// Stage names come before the series name they appear with.
const GAME_TYPES: &[(&str, GameType)] = &[
    ("ファーストステージ", GameType::ClimaxFirstStage),
    ("ファイナルステージ", GameType::ClimaxFinalStage),
    ("クライマックスシリーズ", GameType::ClimaxSeries),
    ("日本シリーズ", GameType::JapanSeries),
    ("オールスター", GameType::AllStar),
    ("オープン戦", GameType::Exhibition),
    ("交流戦", GameType::Interleague),
    ("公式戦", GameType::Regular),
];

impl GameType {
    pub fn from_title(title: &str) -> Self {
        GAME_TYPES
            .iter()
            .find(|(label, _)| title.contains(label))
            .map(|(_, t)| *t)
            .unwrap_or_default()
    }

    pub fn code(self) -> &'static str {
        match self {
            GameType::Regular => "regular",
            GameType::Interleague => "interleague",
            GameType::ClimaxFirstStage => "climax_first_stage",
            GameType::ClimaxFinalStage => "climax_final_stage",
            GameType::ClimaxSeries => "climax_series",
            GameType::JapanSeries => "japan_series",
            GameType::AllStar => "all_star",
            GameType::Exhibition => "exhibition",
        }
    }

    pub fn from_code(code: &str) -> Self {
        [
            GameType::Interleague,
            GameType::ClimaxFirstStage,
            GameType::ClimaxFinalStage,
            GameType::ClimaxSeries,
            GameType::JapanSeries,
            GameType::AllStar,
            GameType::Exhibition,
        ]
        .into_iter()
        .find(|t| t.code() == code)
        .unwrap_or_default()
    }

    /// Counts toward season league context and park factors.
    pub fn is_regular_season(self) -> bool {
        matches!(self, GameType::Regular | GameType::Interleague)
    }
}

pub fn extract(game: &GameRef, blocks: &[DocumentBlock]) -> GameRow {
    let page: String = blocks
        .iter()
        .map(|b| b.flat_text().into_owned())
        .collect::<Vec<_>>()
        .join("\n");

    let (away_line, home_line) = line_scores(blocks);
    let (winning_team, losing_team) = match (&away_line, &home_line) {
        (Some(a), Some(h)) if a.runs > h.runs => (Some(game.away.clone()), Some(game.home.clone())),
        (Some(a), Some(h)) if h.runs > a.runs => (Some(game.home.clone()), Some(game.away.clone())),
        _ => (None, None),
    };
    let decisions = decisions(blocks);

    GameRow {
        game_id: game.id.clone(),
        season: game.season,
        date: game.date,
        number: game.number,
        home_team: game.home.clone(),
        away_team: game.away.clone(),
        ballpark: venue(blocks),
        game_type: TITLE_RE
            .captures(&page)
            .map(|caps| GameType::from_title(&caps[1]))
            .unwrap_or_default(),
        start_time: START_RE.captures(&page).and_then(|caps| {
            let hour: u32 = caps[1].parse().ok()?;
            Some(format!("{hour:02}:{}", &caps[2]))
        }),
        duration_minutes: DURATION_RE.captures(&page).and_then(|caps| {
            let hours: u32 = caps[1].parse().ok()?;
            let minutes: u32 = caps[2].parse().ok()?;
            Some(hours * 60 + minutes)
        }),
        attendance: ATTENDANCE_RE
            .captures(&page)
            .and_then(|caps| caps[1].replace(',', "").parse().ok()),
        away_line,
        home_line,
        winning_team,
        losing_team,
        winning_pitcher: decisions.win,
        losing_pitcher: decisions.loss,
        save_pitcher: decisions.save,
    }
}

fn venue(blocks: &[DocumentBlock]) -> Option<String> {
    for block in blocks {
        let text = block.flat_text();
        if let Some(caps) = VENUE_RE.captures(&text) {
            let name: String = caps[1].chars().filter(|c| !c.is_whitespace()).collect();
            if !name.is_empty() {
                return Some(name);
            }
        }
    }
    // Fall back to scanning for a known park name.
    blocks.iter().find_map(|block| {
        let squeezed: String = block.flat_text().chars().filter(|c| !c.is_whitespace()).collect();
        KNOWN_VENUES
            .iter()
            .find(|v| squeezed.contains(*v))
            .map(|v| v.to_string())
    })
}

/// (away, home) line scores from the inning-by-inning table.
fn line_scores(blocks: &[DocumentBlock]) -> (Option<LineScore>, Option<LineScore>) {
    let Some(table) = blocks.iter().find(|b| {
        let text = b.flat_text();
        b.is_table() && text.contains('計') && text.contains('H') && text.contains('E')
    }) else {
        return (None, None);
    };

    let mut lines = table.rows.iter().filter_map(|row| parse_line(row));
    (lines.next(), lines.next())
}

fn parse_line(row: &[Cell]) -> Option<LineScore> {
    if row.len() < 5 {
        return None;
    }
    let number = |cell: &Cell| cell.text.trim().parse::<u32>().ok();
    let totals = &row[row.len() - 3..];
    let runs = number(&totals[0])?;
    let hits = number(&totals[1])?;
    let errors = number(&totals[2])?;
    let innings = row[1..row.len() - 3]
        .iter()
        .map(|cell| {
            // "1x" marks a walk-off; a bare "x" an unplayed half.
            cell.text.trim().trim_end_matches(['x', 'X']).parse::<u32>().ok()
        })
        .collect();
    Some(LineScore { innings, runs, hits, errors })
}

#[derive(Debug, Default)]
struct Decisions {
    win: Option<String>,
    loss: Option<String>,
    save: Option<String>,
}

fn decisions(blocks: &[DocumentBlock]) -> Decisions {
    let mut found = Decisions::default();
    let tables = blocks.iter().filter(|b| b.is_table() && b.flat_text().contains("投球数"));
    for row in tables.flat_map(|t| t.rows.iter()) {
        let Some(player_idx) = row.iter().position(|c| c.player_id().is_some()) else {
            continue;
        };
        let Some(id) = row[player_idx].player_id() else { continue };
        let mark = row[..player_idx].iter().map(|c| c.text.trim()).collect::<String>();
        let slot = match mark.as_str() {
            "○" => &mut found.win,
            "●" => &mut found.loss,
            "S" | "Ｓ" => &mut found.save,
            _ => continue,
        };
        slot.get_or_insert_with(|| id.to_string());
    }
    found
}

//! Game identity and document loading.
//!
//! A game lives in a directory whose path ends in `<year>/<mmdd>/<home>-<away>-<nn>`
//! and holds a box-score and a play-by-play document, each either as HTML markup
//! (`box.html`, `playbyplay.html`) or as a JSON dump of `DocumentBlock`s.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use tracing::debug;

use crate::error::IngestError;
use crate::parser::blocks::{Cell, DocumentBlock, Link, Side, Tag};

static GAME_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{4})[/-](\d{2})(\d{2})[/-]([a-z]+)-([a-z]+)-(\d{2})").unwrap());
static SPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

pub const BOX_SCORE: &str = "box";
pub const PLAY_BY_PLAY: &str = "playbyplay";

// ── Game identity ──

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct GameRef {
    /// Canonical id, e.g. `2021-0409-db-t-01`.
    pub id: String,
    pub season: i32,
    pub date: NaiveDate,
    pub home: String,
    pub away: String,
    pub number: u8,
}

impl GameRef {
    /// Accepts a score URL, a game directory path or a canonical id.
    pub fn parse(input: &str) -> Result<Self, IngestError> {
        let normalized = input.replace('\\', "/");
        let unidentifiable = || IngestError::UnidentifiableGame(input.to_string());
        let caps = GAME_ID_RE.captures(&normalized).ok_or_else(unidentifiable)?;

        let season: i32 = caps[1].parse().map_err(|_| unidentifiable())?;
        let month: u32 = caps[2].parse().map_err(|_| unidentifiable())?;
        let day: u32 = caps[3].parse().map_err(|_| unidentifiable())?;
        let date = NaiveDate::from_ymd_opt(season, month, day).ok_or_else(unidentifiable)?;
        let number: u8 = caps[6].parse().map_err(|_| unidentifiable())?;

        Ok(GameRef {
            id: format!("{}-{}{}-{}-{}-{}", &caps[1], &caps[2], &caps[3], &caps[4], &caps[5], &caps[6]),
            season,
            date,
            home: caps[4].to_string(),
            away: caps[5].to_string(),
            number,
        })
    }

    pub fn batting_team(&self, side: Side) -> &str {
        match side {
            Side::Top => &self.away,
            Side::Bottom => &self.home,
        }
    }

    /// The other team in this game; `None` if `team` did not play in it.
    pub fn opponent_of(&self, team: &str) -> Option<&str> {
        if team == self.home {
            Some(&self.away)
        } else if team == self.away {
            Some(&self.home)
        } else {
            None
        }
    }
}

// ── Loading ──

#[derive(Debug, Clone)]
pub struct GameDocuments {
    pub game: GameRef,
    pub box_score: Vec<DocumentBlock>,
    pub play_by_play: Vec<DocumentBlock>,
}

pub fn load_game_dir(dir: &Path) -> Result<GameDocuments, IngestError> {
    let game = GameRef::parse(&dir.to_string_lossy())?;
    let box_score = load_document(dir, BOX_SCORE)?;
    let play_by_play = load_document(dir, PLAY_BY_PLAY)?;
    debug!(game = %game.id, box_blocks = box_score.len(), pbp_blocks = play_by_play.len(), "documents loaded");
    Ok(GameDocuments { game, box_score, play_by_play })
}

fn load_document(dir: &Path, kind: &'static str) -> Result<Vec<DocumentBlock>, IngestError> {
    let html = dir.join(format!("{kind}.html"));
    if html.is_file() {
        let markup = read(&html)?;
        return Ok(blocks_from_markup(&markup));
    }
    let json = dir.join(format!("{kind}.json"));
    if json.is_file() {
        let dump = read(&json)?;
        return blocks_from_json(&json.to_string_lossy(), &dump);
    }
    Err(IngestError::MissingDocument { dir: dir.to_path_buf(), kind })
}

fn read(path: &Path) -> Result<String, IngestError> {
    fs::read_to_string(path).map_err(|source| IngestError::Io { path: path.to_path_buf(), source })
}

/// Every directory under `root` (inclusive) that holds a play-by-play document,
/// in sorted path order.
pub fn discover_game_dirs(root: &Path) -> Result<Vec<PathBuf>, IngestError> {
    let mut found = Vec::new();
    walk(root, &mut found)?;
    found.sort();
    Ok(found)
}

fn walk(dir: &Path, found: &mut Vec<PathBuf>) -> Result<(), IngestError> {
    let io_err = |source| IngestError::Io { path: dir.to_path_buf(), source };
    if has_document(dir, PLAY_BY_PLAY) {
        found.push(dir.to_path_buf());
        return Ok(());
    }
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.is_dir() {
            walk(&path, found)?;
        }
    }
    Ok(())
}

fn has_document(dir: &Path, kind: &str) -> bool {
    ["html", "json"]
        .iter()
        .any(|ext| dir.join(format!("{kind}.{ext}")).is_file())
}

pub fn blocks_from_json(document: &str, dump: &str) -> Result<Vec<DocumentBlock>, IngestError> {
    let mut blocks: Vec<DocumentBlock> = serde_json::from_str(dump)
        .map_err(|source| IngestError::Json { document: document.to_string(), source })?;
    for block in &mut blocks {
        block.text = normalize_text(&block.text);
        for cell in block.rows.iter_mut().flatten() {
            cell.text = normalize_text(&cell.text);
        }
    }
    Ok(blocks)
}

/// Full-width digits and punctuation to ASCII, collapsed whitespace.
pub fn normalize_text(s: &str) -> String {
    let mapped: String = s
        .chars()
        .map(|c| match c {
            '０'..='９' => char::from_u32(c as u32 - '０' as u32 + '0' as u32).unwrap_or(c),
            '－' | '−' => '-',
            '：' => ':',
            '，' => ',',
            '\u{a0}' | '\u{3000}' => ' ',
            _ => c,
        })
        .collect();
    SPACE_RE.replace_all(mapped.trim(), " ").into_owned()
}

// ── Markup ──

static BLOCK_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h1, h2, h3, h4, h5, h6, table").unwrap());
static ROW_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("tr").unwrap());
static LINK_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());

/// Headings and tables of a game page, in document order. Tables nested in a
/// table and headings inside a table are folded into the outer table.
pub fn blocks_from_markup(markup: &str) -> Vec<DocumentBlock> {
    let document = Html::parse_document(markup);
    let mut blocks = Vec::new();

    for element in document.select(&BLOCK_SELECTOR) {
        if inside_table(element) {
            continue;
        }
        let name = element.value().name();
        if name == "table" {
            blocks.push(table_block(element));
            continue;
        }
        let level = name[1..].parse().unwrap_or(1);
        let text = element_text(element);
        if !text.is_empty() {
            blocks.push(DocumentBlock::heading(level, text));
        }
    }
    blocks
}

fn inside_table(element: ElementRef<'_>) -> bool {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .any(|ancestor| ancestor.value().name() == "table")
}

fn table_block(table: ElementRef<'_>) -> DocumentBlock {
    let rows = table
        .select(&ROW_SELECTOR)
        .map(|tr| {
            tr.children()
                .filter_map(ElementRef::wrap)
                .filter(|cell| matches!(cell.value().name(), "td" | "th"))
                .map(table_cell)
                .collect::<Vec<_>>()
        })
        .filter(|row| !row.is_empty())
        .collect();
    DocumentBlock { tag: Tag::Table, text: element_text(table), rows }
}

fn table_cell(cell: ElementRef<'_>) -> Cell {
    let links = cell
        .select(&LINK_SELECTOR)
        .map(|a| Link {
            text: element_text(a),
            href: a.value().attr("href").unwrap_or_default().to_string(),
        })
        .collect();
    Cell { text: element_text(cell), links }
}

/// Visible text of an element: `<br>` reads as a space, script and style
/// bodies are skipped.
fn element_text(element: ElementRef<'_>) -> String {
    let mut text = String::new();
    for node in element.descendants() {
        match node.value() {
            Node::Text(t) => {
                let hidden = node
                    .parent()
                    .and_then(ElementRef::wrap)
                    .is_some_and(|parent| matches!(parent.value().name(), "script" | "style"));
                if !hidden {
                    text.push_str(t);
                }
            }
            Node::Element(e) if e.name() == "br" => text.push(' '),
            _ => {}
        }
    }
    normalize_text(&text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn game_ref_from_url_path_and_id() {
        let from_url = GameRef::parse("https://npb.jp/scores/2021/0409/db-t-01/playbyplay.html").unwrap();
        assert_eq!(from_url.id, "2021-0409-db-t-01");
        assert_eq!(from_url.home, "db");
        assert_eq!(from_url.away, "t");
        assert_eq!(from_url.number, 1);
        assert_eq!(from_url.date, NaiveDate::from_ymd_opt(2021, 4, 9).unwrap());

        let from_dir = GameRef::parse(r"data\2021\0409\db-t-01").unwrap();
        assert_eq!(from_dir, from_url);
        assert_eq!(GameRef::parse("2021-0409-db-t-01").unwrap(), from_url);
    }

    #[test]
    fn unidentifiable_games_are_errors() {
        assert!(matches!(GameRef::parse("/scores/2021/"), Err(IngestError::UnidentifiableGame(_))));
        assert!(GameRef::parse("/scores/2021/1345/db-t-01/").is_err());
    }

    #[test]
    fn sides_map_to_teams() {
        let g = GameRef::parse("2021-0409-db-t-01").unwrap();
        assert_eq!(g.batting_team(Side::Top), "t");
        assert_eq!(g.batting_team(Side::Bottom), "db");
        assert_eq!(g.opponent_of("t"), Some("db"));
        assert_eq!(g.opponent_of("g"), None);
    }

    #[test]
    fn normalizes_full_width_text() {
        assert_eq!(normalize_text("  ２－１より\u{3000} "), "2-1より");
        assert_eq!(normalize_text("1回表\n  阪神"), "1回表 阪神");
    }

    #[test]
    fn markup_yields_headings_and_tables_in_order() {
        let markup = r#"<html><body>
            <script>var x = "<h1>no</h1>";</script>
            <h4>1回表</h4>
            <table><tr><th>アウト</th><th>打者</th></tr>
              <tr><td>0アウト</td><td><a href="/bis/players/11.html">近本</a></td><td>三振</td></tr>
            </table>
            <div><p>ignored</p></div>
            <h4>1回裏</h4>
          </body></html>"#;
        let blocks = blocks_from_markup(markup);
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0], DocumentBlock::heading(4, "1回表"));
        assert!(blocks[1].is_table());
        assert_eq!(blocks[1].rows.len(), 2);
        assert_eq!(blocks[1].rows[1][1].links[0].text, "近本");
        assert_eq!(blocks[1].rows[1][1].player_id(), Some("11"));
        assert!(blocks[1].text.contains("三振"));
        assert_eq!(blocks[2], DocumentBlock::heading(4, "1回裏"));
    }

    #[test]
    fn inline_script_with_comparison_keeps_later_blocks() {
        let markup = r#"<html><head><script>for(var i=0;i<n;i++){}</script></head><body>
            <h4>1回表</h4>
            <table><tr><td>0アウト</td><td>一塁<br>二塁</td>
              <td><a href="/bis/players/11.html">近本</a></td><td>1-1より</td><td>左前安打</td></tr></table>
          </body></html>"#;
        let blocks = blocks_from_markup(markup);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0], DocumentBlock::heading(4, "1回表"));
        let row = &blocks[1].rows[0];
        assert_eq!(row.len(), 5);
        assert_eq!(row[1].text, "一塁 二塁");
        assert_eq!(row[4].text, "左前安打");
        assert!(blocks[1].text.contains("左前安打"));
    }

    #[test]
    fn nested_tables_fold_into_the_outer_block() {
        let markup = "<table><tr><td><table><tr><td>投手</td></tr></table></td></tr></table><h3>&nbsp;試合経過</h3>";
        let blocks = blocks_from_markup(markup);
        assert_eq!(blocks.len(), 2);
        assert!(blocks[0].text.contains("投手"));
        assert_eq!(blocks[1], DocumentBlock::heading(3, "試合経過"));
    }

    #[test]
    fn loads_fixture_game_directory() {
        let docs = load_game_dir(Path::new("tests/fixtures/2021/0409/db-t-01")).unwrap();
        assert_eq!(docs.game.id, "2021-0409-db-t-01");
        assert!(!docs.box_score.is_empty());
        assert!(!docs.play_by_play.is_empty());
    }

    #[test]
    fn discovery_finds_every_game_under_root() {
        let dirs = discover_game_dirs(Path::new("tests/fixtures")).unwrap();
        let ids: Vec<String> = dirs
            .iter()
            .map(|d| GameRef::parse(&d.to_string_lossy()).unwrap().id)
            .collect();
        assert!(ids.contains(&"2021-0409-db-t-01".to_string()));
        assert!(ids.contains(&"2021-0410-db-t-02".to_string()));
    }

    #[test]
    fn missing_box_score_is_reported() {
        let err = load_game_dir(Path::new("tests/fixtures/broken/2021/0411/db-t-03")).unwrap_err();
        assert!(matches!(err, IngestError::MissingDocument { kind: BOX_SCORE, .. }));
    }
}

use std::borrow::Cow;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::rules::{first_match, FnRule};

static INNING_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d{1,2})回([表裏])").unwrap());
static PLAYER_HREF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/players?/(\d+)(?:\.html?)?(?:[/?#]|$)").unwrap());

/// Keyword that marks a table as carrying a pitcher announcement.
pub const PITCHER_KEYWORD: &str = "投手";
const ANNOUNCEMENT_LABELS: &[&str] = &["先発投手", "投手交代"];
/// Column of an event row holding the result text.
pub const RESULT_COL: usize = 4;

// ── Document model ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Tag {
    Heading(u8),
    Table,
}

impl TryFrom<String> for Tag {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        let lower = s.to_ascii_lowercase();
        if lower == "table" {
            return Ok(Tag::Table);
        }
        match lower.strip_prefix('h').and_then(|n| n.parse::<u8>().ok()) {
            Some(level @ 1..=6) => Ok(Tag::Heading(level)),
            _ => Err(format!("unsupported block tag {s:?}")),
        }
    }
}

impl From<Tag> for String {
    fn from(tag: Tag) -> String {
        match tag {
            Tag::Heading(level) => format!("h{level}"),
            Tag::Table => "table".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    #[serde(default)]
    pub text: String,
    pub href: String,
}

impl Link {
    /// Player identifier embedded in the link target, if it points at a player page.
    pub fn player_id(&self) -> Option<&str> {
        PLAYER_HREF_RE
            .captures(&self.href)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub links: Vec<Link>,
}

impl Cell {
    pub fn new(text: impl Into<String>) -> Self {
        Cell { text: text.into(), links: Vec::new() }
    }

    pub fn with_link(text: impl Into<String>, href: impl Into<String>) -> Self {
        let text = text.into();
        Cell {
            links: vec![Link { text: text.clone(), href: href.into() }],
            text,
        }
    }

    pub fn player_id(&self) -> Option<&str> {
        self.links.iter().find_map(Link::player_id)
    }

    pub fn is_populated(&self) -> bool {
        !self.text.trim().is_empty() || !self.links.is_empty()
    }
}

/// One structural unit of a game document: a heading or a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentBlock {
    pub tag: Tag,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub rows: Vec<Vec<Cell>>,
}

impl DocumentBlock {
    pub fn heading(level: u8, text: impl Into<String>) -> Self {
        DocumentBlock { tag: Tag::Heading(level), text: text.into(), rows: Vec::new() }
    }

    pub fn table(rows: Vec<Vec<Cell>>) -> Self {
        DocumentBlock { tag: Tag::Table, text: String::new(), rows }
    }

    pub fn is_table(&self) -> bool {
        self.tag == Tag::Table
    }

    /// Flattened text. Tables loaded from dumps may omit `text`; it is then
    /// rebuilt from the cells.
    pub fn flat_text(&self) -> Cow<'_, str> {
        if !self.text.is_empty() || self.rows.is_empty() {
            return Cow::Borrowed(&self.text);
        }
        Cow::Owned(
            self.rows
                .iter()
                .flat_map(|row| row.iter().map(|c| c.text.as_str()))
                .collect::<String>(),
        )
    }

    pub fn player_links(&self) -> impl Iterator<Item = &Link> {
        self.rows
            .iter()
            .flatten()
            .flat_map(|cell| cell.links.iter())
            .filter(|link| link.player_id().is_some())
    }
}

/// Concatenated text of one table row.
pub fn row_text(row: &[Cell]) -> String {
    row.iter().map(|c| c.text.as_str()).collect()
}

/// A row that names a pitcher rather than describing a plate appearance:
/// it carries a `先発投手`/`投手交代`/`投手` label cell, or mentions the
/// keyword without the shape of an event row.
pub fn is_announcement_row(row: &[Cell]) -> bool {
    let labelled = row.iter().any(|cell| {
        let text = cell.text.trim();
        text == PITCHER_KEYWORD || ANNOUNCEMENT_LABELS.iter().any(|label| text.starts_with(label))
    });
    if labelled {
        return true;
    }
    if !row_text(row).contains(PITCHER_KEYWORD) {
        return false;
    }
    let populated = row.iter().filter(|c| c.is_populated()).count();
    let has_result = row.get(RESULT_COL).is_some_and(|c| !c.text.trim().is_empty());
    populated < 3 || !has_result
}

// ── Innings ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Side {
    /// 表: the away team bats.
    Top,
    /// 裏: the home team bats.
    Bottom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Inning {
    pub number: u8,
    pub side: Side,
}

impl Inning {
    pub fn top(number: u8) -> Self {
        Inning { number, side: Side::Top }
    }

    pub fn bottom(number: u8) -> Self {
        Inning { number, side: Side::Bottom }
    }

    /// Parses the stored form, e.g. `"7B"`.
    pub fn parse(s: &str) -> Option<Self> {
        let side = match s.chars().last()? {
            'T' => Side::Top,
            'B' => Side::Bottom,
            _ => return None,
        };
        let number = s[..s.len() - 1].parse().ok()?;
        Some(Inning { number, side })
    }
}

impl fmt::Display for Inning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = match self.side {
            Side::Top => 'T',
            Side::Bottom => 'B',
        };
        write!(f, "{}{}", self.number, side)
    }
}

// ── Classification ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    InningMarker(Inning),
    PitchingAnnouncement,
    EventTable,
    Unclassified,
}

const BLOCK_RULES: &[FnRule<DocumentBlock, BlockKind>] = &[
    FnRule { name: "inning_marker", apply: inning_marker },
    FnRule { name: "pitching_announcement", apply: pitching_announcement },
    FnRule { name: "event_table", apply: event_table },
];

pub fn classify(block: &DocumentBlock) -> BlockKind {
    first_match(BLOCK_RULES, block)
        .map(|(_, kind)| kind)
        .unwrap_or(BlockKind::Unclassified)
}

fn inning_marker(block: &DocumentBlock) -> Option<BlockKind> {
    let text = block.flat_text();
    let caps = INNING_RE.captures(&text)?;
    let number: u8 = caps[1].parse().ok()?;
    if number == 0 {
        return None;
    }
    let side = if &caps[2] == "表" { Side::Top } else { Side::Bottom };
    Some(BlockKind::InningMarker(Inning { number, side }))
}

fn pitching_announcement(block: &DocumentBlock) -> Option<BlockKind> {
    (block.is_table() && block.flat_text().contains(PITCHER_KEYWORD))
        .then_some(BlockKind::PitchingAnnouncement)
}

fn event_table(block: &DocumentBlock) -> Option<BlockKind> {
    if !block.is_table() {
        return None;
    }
    let links = block.player_links().count();
    let lone_pitcher = links == 1 && block.flat_text().contains(PITCHER_KEYWORD);
    (links >= 1 && !lone_pitcher).then_some(BlockKind::EventTable)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batter_row(id: &str) -> Vec<Cell> {
        vec![
            Cell::new("0アウト"),
            Cell::new(""),
            Cell::with_link("打者", format!("/bis/players/{id}.html")),
            Cell::new("1-1より"),
            Cell::new("空振り三振"),
        ]
    }

    #[test]
    fn heading_with_inning_side_is_a_marker() {
        let top = DocumentBlock::heading(4, "1回表");
        let bottom = DocumentBlock::heading(4, "12回裏（阪神）");
        assert_eq!(classify(&top), BlockKind::InningMarker(Inning::top(1)));
        assert_eq!(classify(&bottom), BlockKind::InningMarker(Inning::bottom(12)));
    }

    #[test]
    fn marker_beats_announcement_and_events() {
        let mut block = DocumentBlock::table(vec![batter_row("11"), batter_row("12")]);
        block.text = "3回表 投手".to_string();
        assert_eq!(classify(&block), BlockKind::InningMarker(Inning::top(3)));
    }

    #[test]
    fn announcement_beats_event_table() {
        let mut rows = vec![vec![
            Cell::new("投手交代"),
            Cell::with_link("山本", "/bis/players/900.html"),
        ]];
        rows.push(batter_row("11"));
        let block = DocumentBlock::table(rows);
        assert_eq!(classify(&block), BlockKind::PitchingAnnouncement);
    }

    #[test]
    fn result_text_mentioning_the_pitcher_is_not_an_announcement_row() {
        let mut row = batter_row("11");
        row[4] = Cell::new("投手強襲ヒット");
        assert!(!is_announcement_row(&row));

        let label = vec![Cell::new("投手"), Cell::with_link("山本", "/bis/players/900.html")];
        let in_cell = vec![Cell::new("投手交代 田中 → 佐藤")];
        let bare = vec![Cell::new("投手 山本")];
        assert!(is_announcement_row(&label));
        assert!(is_announcement_row(&in_cell));
        assert!(is_announcement_row(&bare));
        assert!(!is_announcement_row(&batter_row("12")));
    }

    #[test]
    fn table_with_links_and_no_keyword_is_event_table() {
        let block = DocumentBlock::table(vec![batter_row("11")]);
        assert_eq!(classify(&block), BlockKind::EventTable);
    }

    #[test]
    fn non_player_links_do_not_make_an_event_table() {
        let block = DocumentBlock::table(vec![vec![Cell::with_link("速報", "/scores/2021/")]]);
        assert_eq!(classify(&block), BlockKind::Unclassified);
        assert_eq!(classify(&DocumentBlock::heading(2, "試合経過")), BlockKind::Unclassified);
    }

    #[test]
    fn player_ids_come_from_either_href_shape() {
        let a = Link { text: String::new(), href: "/bis/players/51155136.html".into() };
        let b = Link { text: String::new(), href: "https://npb.jp/player/1100064".into() };
        let c = Link { text: String::new(), href: "/bis/teams/index.html".into() };
        assert_eq!(a.player_id(), Some("51155136"));
        assert_eq!(b.player_id(), Some("1100064"));
        assert_eq!(c.player_id(), None);
    }

    #[test]
    fn inning_display_round_trips_storage_form() {
        assert_eq!(Inning::bottom(9).to_string(), "9B");
        assert_eq!(Inning::parse("11T"), Some(Inning::top(11)));
        assert_eq!(Inning::parse("x"), None);
    }

    #[test]
    fn json_dump_tag_forms() {
        let block: DocumentBlock =
            serde_json::from_str(r#"{"tag":"H4","text":"2回裏"}"#).unwrap();
        assert_eq!(block.tag, Tag::Heading(4));
        assert!(serde_json::from_str::<DocumentBlock>(r#"{"tag":"div"}"#).is_err());
    }
}

//! Replays a play-by-play document in order, carrying the half-inning and the
//! pitcher of record for each side, and attaches that context to every event row.

use tracing::{debug, warn};

use super::blocks::{classify, is_announcement_row, BlockKind, Cell, DocumentBlock, Inning, Side};
use super::events::{self, AtBatContext, PlateAppearance};
use crate::source::GameRef;

const CHANGE_ARROW: char = '→';

/// Per-game running state. Created fresh for every game and discarded after.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GameContext {
    pub half_inning: Option<Inning>,
    /// Pitcher facing the away batters (top halves).
    pub top_pitcher: Option<String>,
    /// Pitcher facing the home batters (bottom halves).
    pub bottom_pitcher: Option<String>,
}

impl GameContext {
    pub fn active_pitcher(&self) -> Option<&str> {
        match self.half_inning?.side {
            Side::Top => self.top_pitcher.as_deref(),
            Side::Bottom => self.bottom_pitcher.as_deref(),
        }
    }

    fn with_pitcher(mut self, pitcher: String) -> Self {
        match self.half_inning.map(|i| i.side) {
            Some(Side::Top) => self.top_pitcher = Some(pitcher),
            Some(Side::Bottom) => self.bottom_pitcher = Some(pitcher),
            None => warn!(pitcher = %pitcher, "announcement before any inning marker ignored"),
        }
        self
    }
}

/// Result of feeding one block through the state machine.
#[derive(Debug)]
pub struct Step<'b> {
    pub context: GameContext,
    /// Rows to hand to the event extractor under `context`.
    pub forward: Vec<&'b [Cell]>,
}

/// Pure transition: the next context plus any rows to forward.
pub fn transition<'b>(context: GameContext, kind: BlockKind, block: &'b DocumentBlock) -> Step<'b> {
    match kind {
        BlockKind::InningMarker(inning) => Step {
            context: GameContext { half_inning: Some(inning), ..context },
            forward: Vec::new(),
        },
        BlockKind::PitchingAnnouncement => {
            let (announcement, rest): (Vec<&[Cell]>, Vec<&[Cell]>) = block
                .rows
                .iter()
                .map(Vec::as_slice)
                .partition(|row| is_announcement_row(row));
            let context = match incoming_pitcher(&announcement) {
                Some(pitcher) => context.with_pitcher(pitcher),
                None => context,
            };
            Step { context, forward: rest }
        }
        BlockKind::EventTable => Step {
            context,
            forward: block.rows.iter().map(Vec::as_slice).collect(),
        },
        BlockKind::Unclassified => Step { context, forward: Vec::new() },
    }
}

/// The pitcher taking the mound: the last player reference after a change
/// arrow, or the last player reference when there is no arrow.
fn incoming_pitcher(rows: &[&[Cell]]) -> Option<String> {
    let mut arrow_seen = false;
    let mut after_arrow = None;
    let mut last = None;

    for cell in rows.iter().flat_map(|row| row.iter()) {
        let arrow_at = cell.text.find(CHANGE_ARROW);
        for link in &cell.links {
            let Some(id) = link.player_id() else { continue };
            let past_arrow = arrow_seen
                || match arrow_at {
                    Some(at) => !link.text.is_empty()
                        && cell.text.rfind(link.text.as_str()).is_some_and(|pos| pos > at),
                    None => false,
                };
            if past_arrow {
                after_arrow = Some(id.to_string());
            }
            last = Some(id.to_string());
        }
        if arrow_at.is_some() {
            arrow_seen = true;
        }
    }

    if arrow_seen {
        after_arrow
    } else {
        last
    }
}

/// Run the whole play-by-play through the state machine and collect events.
pub fn replay(game: &GameRef, blocks: &[DocumentBlock]) -> Vec<PlateAppearance> {
    let mut context = GameContext::default();
    let mut events = Vec::new();

    for (idx, block) in blocks.iter().enumerate() {
        let step = transition(context, classify(block), block);
        context = step.context;
        if step.forward.is_empty() {
            continue;
        }
        let Some(inning) = context.half_inning else {
            warn!(game = %game.id, block = idx, rows = step.forward.len(), "event rows before any inning marker dropped");
            continue;
        };
        let at_bat = AtBatContext {
            game_id: &game.id,
            pitcher_id: context.active_pitcher(),
            inning,
            batting_team: game.batting_team(inning.side),
        };
        events::extract_rows(&step.forward, &at_bat, &mut events);
    }

    debug!(game = %game.id, events = events.len(), "play-by-play replayed");
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::blocks::Link;
    use crate::parser::result::OutcomeFlags;

    fn game() -> GameRef {
        GameRef::parse("/scores/2021/0409/db-t-01/").unwrap()
    }

    fn player(name: &str, id: &str) -> Cell {
        Cell::with_link(name, format!("/bis/players/{id}.html"))
    }

    fn event(batter: &str, outs: &str, result: &str) -> Vec<Cell> {
        vec![Cell::new(outs), Cell::new(""), player("打者", batter), Cell::new("1-1より"), Cell::new(result)]
    }

    fn starter(id: &str) -> DocumentBlock {
        DocumentBlock::table(vec![vec![Cell::new("先発投手"), player("先発", id)]])
    }

    fn change(out_id: &str, in_id: &str) -> DocumentBlock {
        DocumentBlock::table(vec![vec![
            Cell::new("投手交代"),
            player("降板", out_id),
            Cell::new("→"),
            player("登板", in_id),
        ]])
    }

    #[test]
    fn events_get_inning_team_and_side_specific_pitcher() {
        let blocks = vec![
            DocumentBlock::heading(4, "1回表"),
            starter("9001"),
            DocumentBlock::table(vec![event("101", "0アウト", "空振り三振")]),
            DocumentBlock::heading(4, "1回裏"),
            starter("9002"),
            DocumentBlock::table(vec![event("201", "0アウト", "四球")]),
            DocumentBlock::heading(4, "2回表"),
            DocumentBlock::table(vec![event("102", "0アウト", "ライト前ヒット")]),
        ];
        let events = replay(&game(), &blocks);

        assert_eq!(events.len(), 3);
        assert_eq!(events[0].inning.to_string(), "1T");
        assert_eq!(events[0].batting_team, "t");
        assert_eq!(events[0].pitcher_id.as_deref(), Some("9001"));
        assert!(events[0].outcome.strikeout);

        assert_eq!(events[1].inning.to_string(), "1B");
        assert_eq!(events[1].batting_team, "db");
        assert_eq!(events[1].pitcher_id.as_deref(), Some("9002"));

        // 2T inherits the top-half pitcher from 1T.
        assert_eq!(events[2].pitcher_id.as_deref(), Some("9001"));
        assert_eq!(events.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn change_arrow_selects_incoming_pitcher() {
        let blocks = vec![
            DocumentBlock::heading(4, "6回裏"),
            starter("9002"),
            change("9002", "9009"),
            DocumentBlock::table(vec![event("205", "1アウト", "センターフライ")]),
        ];
        let events = replay(&game(), &blocks);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].pitcher_id.as_deref(), Some("9009"));
    }

    #[test]
    fn arrow_inside_one_cell_uses_link_position() {
        let cell = Cell {
            text: "投手交代 田中 → 佐藤".to_string(),
            links: vec![
                Link { text: "田中".into(), href: "/bis/players/1.html".into() },
                Link { text: "佐藤".into(), href: "/bis/players/2.html".into() },
            ],
        };
        let row = vec![cell];
        assert_eq!(incoming_pitcher(&[row.as_slice()]), Some("2".to_string()));
    }

    #[test]
    fn announcement_before_any_marker_does_not_leak() {
        let blocks = vec![
            starter("9000"),
            DocumentBlock::heading(4, "1回表"),
            DocumentBlock::table(vec![event("101", "0アウト", "ショートゴロ")]),
        ];
        let events = replay(&game(), &blocks);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].pitcher_id, None);
    }

    #[test]
    fn rows_before_first_marker_are_dropped() {
        let blocks = vec![
            DocumentBlock::table(vec![event("101", "0アウト", "ショートゴロ")]),
            DocumentBlock::heading(4, "1回表"),
        ];
        assert!(replay(&game(), &blocks).is_empty());
    }

    #[test]
    fn announcement_table_forwards_its_event_rows() {
        let mut rows = vec![vec![Cell::new("投手交代"), player("a", "9002"), Cell::new("→"), player("b", "9003")]];
        rows.push(event("104", "2アウト", "見逃し三振"));
        let blocks = vec![DocumentBlock::heading(4, "8回表"), DocumentBlock::table(rows)];

        let events = replay(&game(), &blocks);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].batter_id, "104");
        assert_eq!(events[0].pitcher_id.as_deref(), Some("9003"));
        assert_eq!(events[0].outs, 2);
    }

    #[test]
    fn pitcher_keyword_in_result_text_stays_an_event() {
        let blocks = vec![
            DocumentBlock::heading(4, "1回表"),
            starter("9001"),
            DocumentBlock::table(vec![
                event("101", "0アウト", "投手強襲ヒット"),
                event("102", "0アウト", "空振り三振"),
            ]),
        ];
        let events = replay(&game(), &blocks);

        let seen: Vec<_> = events.iter().map(|e| (e.batter_id.as_str(), e.pitcher_id.as_deref())).collect();
        assert_eq!(seen, vec![("101", Some("9001")), ("102", Some("9001"))]);
        assert!(events[0].outcome.single);
    }

    #[test]
    fn lone_strikeout_in_first_top_half() {
        let blocks = vec![
            DocumentBlock::heading(4, "1回表"),
            DocumentBlock::table(vec![event("101", "0アウト", "strikeout")]),
        ];
        let events = replay(&game(), &blocks);

        assert_eq!(events.len(), 1);
        let pa = &events[0];
        assert_eq!(pa.inning, Inning::top(1));
        assert_eq!(pa.batting_team, "t");
        assert_eq!(pa.pitcher_id, None);
        assert_eq!(pa.outs, 0);
        assert_eq!(pa.outcome, OutcomeFlags { strikeout: true, ..OutcomeFlags::default() });
    }

    #[test]
    fn marker_transition_keeps_pitchers() {
        let ctx = GameContext {
            half_inning: Some(Inning::top(1)),
            top_pitcher: Some("9001".into()),
            bottom_pitcher: None,
        };
        let marker = DocumentBlock::heading(4, "1回裏");
        let step = transition(ctx, classify(&marker), &marker);
        assert_eq!(step.context.half_inning, Some(Inning::bottom(1)));
        assert_eq!(step.context.top_pitcher.as_deref(), Some("9001"));
        assert_eq!(step.context.active_pitcher(), None);
        assert!(step.forward.is_empty());
    }
}

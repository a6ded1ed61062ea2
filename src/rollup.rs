//! Per-game batting and pitching counters summed from plate appearances.

use std::collections::HashSet;
use std::ops::AddAssign;

use itertools::Itertools;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::db::{self, BattingRow, PitchingRow, Summaries};
use crate::error::IngestError;
use crate::parser::events::PlateAppearance;
use crate::parser::result::OutcomeFlags;
use crate::source::GameRef;

/// Flag sums over a set of plate appearances.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub pa: u32,
    pub hits: u32,
    pub singles: u32,
    pub doubles: u32,
    pub triples: u32,
    pub home_runs: u32,
    pub ground_outs: u32,
    pub fly_outs: u32,
    pub strikeouts: u32,
    pub reached_on_error: u32,
    pub walks: u32,
    pub hit_by_pitch: u32,
    pub double_plays: u32,
    pub sacrifices: u32,
}

impl Tally {
    pub fn record(&mut self, o: &OutcomeFlags) {
        self.pa += 1;
        self.singles += u32::from(o.single);
        self.doubles += u32::from(o.double);
        self.triples += u32::from(o.triple);
        self.home_runs += u32::from(o.home_run);
        self.hits = self.singles + self.doubles + self.triples + self.home_runs;
        self.ground_outs += u32::from(o.ground_out);
        self.fly_outs += u32::from(o.fly_out);
        self.strikeouts += u32::from(o.strikeout);
        self.reached_on_error += u32::from(o.reached_on_error);
        self.walks += u32::from(o.walk);
        self.hit_by_pitch += u32::from(o.hit_by_pitch);
        self.double_plays += u32::from(o.double_play);
        self.sacrifices += u32::from(o.sacrifice);
    }

    pub fn from_outcomes<'a>(outcomes: impl IntoIterator<Item = &'a OutcomeFlags>) -> Self {
        let mut t = Tally::default();
        for o in outcomes {
            t.record(o);
        }
        t
    }

    /// PA minus walks, hit-by-pitch and sacrifices.
    pub fn at_bats(&self) -> u32 {
        self.pa
            .saturating_sub(self.walks + self.hit_by_pitch + self.sacrifices)
    }
}

impl AddAssign for Tally {
    fn add_assign(&mut self, rhs: Self) {
        self.pa += rhs.pa;
        self.hits += rhs.hits;
        self.singles += rhs.singles;
        self.doubles += rhs.doubles;
        self.triples += rhs.triples;
        self.home_runs += rhs.home_runs;
        self.ground_outs += rhs.ground_outs;
        self.fly_outs += rhs.fly_outs;
        self.strikeouts += rhs.strikeouts;
        self.reached_on_error += rhs.reached_on_error;
        self.walks += rhs.walks;
        self.hit_by_pitch += rhs.hit_by_pitch;
        self.double_plays += rhs.double_plays;
        self.sacrifices += rhs.sacrifices;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BattingCounters {
    #[serde(flatten)]
    pub events: Tally,
    pub ab: u32,
    pub rbi: u32,
}

impl BattingCounters {
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a PlateAppearance>) -> Self {
        let mut tally = Tally::default();
        let mut rbi = 0;
        for e in events {
            tally.record(&e.outcome);
            rbi += u32::from(e.outcome.rbi);
        }
        BattingCounters { events: tally, ab: tally.at_bats(), rbi }
    }
}

impl AddAssign for BattingCounters {
    fn add_assign(&mut self, rhs: Self) {
        self.events += rhs.events;
        self.ab += rhs.ab;
        self.rbi += rhs.rbi;
    }
}

// ── Views ──

/// Batting rows for one game: every placeholder, counters filled from its
/// events, plus a row for any batter with events but no placeholder.
pub fn batting(game: &GameRef, events: &[PlateAppearance], placeholders: &[BattingRow]) -> Vec<BattingRow> {
    let by_batter = events.iter().into_group_map_by(|e| e.batter_id.as_str());
    let listed: HashSet<&str> = placeholders.iter().map(|p| p.player_id.as_str()).collect();

    let mut rows: Vec<BattingRow> = placeholders
        .iter()
        .map(|p| BattingRow {
            counters: BattingCounters::from_events(
                by_batter.get(p.player_id.as_str()).into_iter().flatten().copied(),
            ),
            ..p.clone()
        })
        .collect();

    for (batter, evs) in by_batter.iter().sorted_by_key(|(id, _)| **id) {
        if listed.contains(batter) {
            continue;
        }
        warn!(game = %game.id, batter, "batter has events but no box-score line");
        rows.push(BattingRow {
            game_id: game.id.clone(),
            player_id: batter.to_string(),
            team: evs[0].batting_team.clone(),
            lineup_slot: None,
            position: None,
            runs: 0,
            counters: BattingCounters::from_events(evs.iter().copied()),
        });
    }
    rows
}

/// Pitching rows for one game. Events without a pitcher of record are left out.
pub fn pitching(game: &GameRef, events: &[PlateAppearance], placeholders: &[PitchingRow]) -> Vec<PitchingRow> {
    let by_pitcher = events
        .iter()
        .filter_map(|e| e.pitcher_id.as_deref().map(|p| (p, e)))
        .into_group_map();
    let listed: HashSet<&str> = placeholders.iter().map(|p| p.player_id.as_str()).collect();

    let mut rows: Vec<PitchingRow> = placeholders
        .iter()
        .map(|p| PitchingRow {
            counters: Tally::from_outcomes(
                by_pitcher
                    .get(p.player_id.as_str())
                    .into_iter()
                    .flatten()
                    .map(|e| &e.outcome),
            ),
            ..p.clone()
        })
        .collect();

    let mut next_appearance = rows.len() as u32;
    for (pitcher, evs) in by_pitcher.iter().sorted_by_key(|(id, _)| **id) {
        if listed.contains(pitcher) {
            continue;
        }
        warn!(game = %game.id, pitcher, "pitcher has events but no box-score line");
        let team = game
            .opponent_of(&evs[0].batting_team)
            .unwrap_or(evs[0].batting_team.as_str())
            .to_string();
        rows.push(PitchingRow {
            game_id: game.id.clone(),
            player_id: pitcher.to_string(),
            team,
            appearance: next_appearance,
            decision: None,
            is_start: false,
            is_finish: false,
            workload: Default::default(),
            counters: Tally::from_outcomes(evs.iter().map(|e| &e.outcome)),
        });
        next_appearance += 1;
    }
    rows
}

// ── Re-aggregation ──

#[derive(Debug, Default, Clone, Copy)]
pub struct RollupCounts {
    pub events: usize,
    pub batting: usize,
    pub pitching: usize,
}

impl AddAssign for RollupCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.events += rhs.events;
        self.batting += rhs.batting;
        self.pitching += rhs.pitching;
    }
}

/// Outcome of re-aggregating a batch of stored games.
#[derive(Debug, Default, Clone, Copy)]
pub struct BatchRollup {
    pub games: usize,
    pub failed: usize,
    pub totals: RollupCounts,
}

/// Run `run_for_game` over every id. A failing game is logged and counted;
/// the rest of the batch still runs.
pub fn run_for_games(conn: &Connection, game_ids: &[String]) -> BatchRollup {
    let mut batch = BatchRollup::default();
    for id in game_ids {
        match run_for_game(conn, id) {
            Ok(counts) => {
                batch.games += 1;
                batch.totals += counts;
            }
            Err(e) => {
                batch.failed += 1;
                error!(game = %id, "rollup failed: {e}");
            }
        }
    }
    batch
}

/// Recompute one stored game's batting and pitching rows from its stored
/// events. Box-only fields of existing rows are kept. Each role is replaced
/// in its own transaction.
pub fn run_for_game(conn: &Connection, game_id: &str) -> Result<RollupCounts, IngestError> {
    let game = GameRef::parse(game_id)?;
    let events = db::fetch_events(conn, &game.id)?;
    let batting_rows = batting(&game, &events, &db::fetch_batting(conn, &game.id)?);
    let pitching_rows = pitching(&game, &events, &db::fetch_pitching(conn, &game.id)?);

    db::replace_summaries(conn, &game.id, Summaries::Batting(&batting_rows))?;
    db::replace_summaries(conn, &game.id, Summaries::Pitching(&pitching_rows))?;

    info!(game = %game.id, events = events.len(), batting = batting_rows.len(), pitching = pitching_rows.len(), "rollup rewritten");
    Ok(RollupCounts { events: events.len(), batting: batting_rows.len(), pitching: pitching_rows.len() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::blocks::Inning;
    use crate::parser::events::BaseState;
    use crate::parser::result::interpret;

    fn game() -> GameRef {
        GameRef::parse("2021-0409-db-t-01").unwrap()
    }

    fn pa(seq: u32, batter: &str, pitcher: Option<&str>, result: &str) -> PlateAppearance {
        PlateAppearance {
            game_id: game().id,
            seq,
            batter_id: batter.to_string(),
            pitcher_id: pitcher.map(str::to_string),
            inning: Inning::top(1),
            batting_team: "t".to_string(),
            outs: 0,
            base_state: BaseState::Empty,
            count: None,
            outcome: interpret(result).unwrap(),
        }
    }

    fn placeholder(id: &str) -> BattingRow {
        BattingRow {
            game_id: game().id,
            player_id: id.to_string(),
            team: "t".to_string(),
            lineup_slot: Some(1),
            position: None,
            runs: 1,
            counters: BattingCounters::default(),
        }
    }

    fn staff(id: &str) -> PitchingRow {
        PitchingRow {
            game_id: game().id,
            player_id: id.to_string(),
            team: "db".to_string(),
            appearance: 0,
            decision: None,
            is_start: true,
            is_finish: true,
            workload: Default::default(),
            counters: Tally::default(),
        }
    }

    #[test]
    fn strikeout_counts_for_batter_and_pitcher() {
        let events = vec![pa(0, "B1", Some("P1"), "strikeout")];
        let b = batting(&game(), &events, &[placeholder("B1")]);
        assert_eq!(b.len(), 1);
        assert_eq!(b[0].counters.events.pa, 1);
        assert_eq!(b[0].counters.ab, 1);
        assert_eq!(b[0].counters.events.strikeouts, 1);
        assert_eq!(b[0].runs, 1);

        let p = pitching(&game(), &events, &[staff("P1")]);
        assert_eq!(p[0].counters.pa, 1);
        assert_eq!(p[0].counters.strikeouts, 1);
    }

    #[test]
    fn walk_and_sacrifice_are_not_at_bats() {
        let events = vec![
            pa(0, "B1", None, "四球"),
            pa(1, "B1", None, "犠打"),
            pa(2, "B1", None, "死球"),
            pa(3, "B1", None, "二塁打、打点2"),
        ];
        let c = BattingCounters::from_events(&events);
        assert_eq!(c.events.pa, 4);
        assert_eq!(c.ab, 1);
        assert_eq!(c.events.hits, 1);
        assert_eq!(c.rbi, 2);
    }

    #[test]
    fn untouched_placeholders_stay_zero_and_unlisted_batters_are_added() {
        let events = vec![pa(0, "B2", None, "ショートゴロ")];
        let rows = batting(&game(), &events, &[placeholder("B1")]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].player_id, "B1");
        assert_eq!(rows[0].counters, BattingCounters::default());
        assert_eq!(rows[1].player_id, "B2");
        assert_eq!(rows[1].team, "t");
        assert_eq!(rows[1].counters.events.ground_outs, 1);
    }

    #[test]
    fn single_plus_walk() {
        let events = vec![pa(0, "B1", None, "左前安打"), pa(1, "B1", None, "四球")];
        let c = BattingCounters::from_events(&events);
        assert_eq!(c.events.pa, 2);
        assert_eq!(c.ab, 1);
        assert_eq!(c.events.hits, 1);
        assert_eq!(c.events.singles, 1);
        assert_eq!(c.events.walks, 1);
        assert_eq!(c.events.doubles + c.events.triples + c.events.home_runs, 0);
    }

    #[test]
    fn rerunning_a_stored_game_matches_ingestion() {
        let conn = db::open_in_memory().unwrap();
        let data = crate::parser::process_dir(std::path::Path::new("tests/fixtures/2021/0409/db-t-01")).unwrap();
        db::save_game(&conn, &data).unwrap();
        db::replace_summaries(&conn, &data.game.game_id, Summaries::Batting(&[])).unwrap();

        let counts = run_for_game(&conn, &data.game.game_id).unwrap();
        assert_eq!(counts.events, data.events.len());
        assert_eq!(counts.pitching, data.pitching.len());

        let batting = db::fetch_batting(&conn, &data.game.game_id).unwrap();
        let total: u32 = batting.iter().map(|r| r.counters.events.pa).sum();
        assert_eq!(total as usize, data.events.len());
        assert_eq!(db::fetch_pitching(&conn, &data.game.game_id).unwrap(), data.pitching);
    }

    #[test]
    fn one_bad_game_does_not_stop_the_batch() {
        let conn = db::open_in_memory().unwrap();
        let data = crate::parser::process_dir(std::path::Path::new("tests/fixtures/2021/0409/db-t-01")).unwrap();
        db::save_game(&conn, &data).unwrap();

        let ids = vec!["not-a-game".to_string(), data.game.game_id.clone()];
        let batch = run_for_games(&conn, &ids);
        assert_eq!(batch.failed, 1);
        assert_eq!(batch.games, 1);
        assert_eq!(batch.totals.events, data.events.len());
    }

    #[test]
    fn events_without_pitcher_are_left_out_of_pitching() {
        let events = vec![pa(0, "B1", None, "三振"), pa(1, "B1", Some("P9"), "三振")];
        let rows = pitching(&game(), &events, &[]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].player_id, "P9");
        assert_eq!(rows[0].team, "db");
        assert_eq!(rows[0].counters.pa, 1);
    }

    #[test]
    fn batter_pa_sum_equals_event_count() {
        let events = vec![
            pa(0, "B1", Some("P1"), "ヒット"),
            pa(1, "B2", Some("P1"), "三振"),
            pa(2, "B3", Some("P1"), "四球"),
            pa(3, "B1", Some("P1"), "エラー"),
        ];
        let rows = batting(&game(), &events, &[placeholder("B1"), placeholder("B2")]);
        let total: u32 = rows.iter().map(|r| r.counters.events.pa).sum();
        assert_eq!(total as usize, events.len());
        let roe: u32 = rows.iter().map(|r| r.counters.events.reached_on_error).sum();
        assert_eq!(roe, 1);
    }

    #[test]
    fn tally_adds() {
        let mut a = Tally::from_outcomes(&[interpret("本塁打").unwrap()]);
        a += Tally::from_outcomes(&[interpret("三振").unwrap()]);
        assert_eq!(a.pa, 2);
        assert_eq!(a.home_runs, 1);
        assert_eq!(a.hits, 1);
        assert_eq!(a.at_bats(), 2);
    }
}

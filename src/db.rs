use std::path::Path;

use chrono::NaiveDate;
use rusqlite::types::Type;
use rusqlite::{Connection, Result, Row};
use serde::Serialize;

use crate::parser::blocks::Inning;
use crate::parser::events::{BaseState, Count, PlateAppearance};
use crate::parser::extract::lineup::Position;
use crate::parser::extract::metadata::GameType;
use crate::parser::extract::pitching::{Decision, Workload};
use crate::parser::result::OutcomeFlags;
use crate::parser::GameData;
use crate::rollup::{BattingCounters, Tally};
use crate::season::ParkFactor;

pub fn connect(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS games (
            game_id          TEXT PRIMARY KEY,
            season           INTEGER NOT NULL,
            date             TEXT NOT NULL,
            game_number      INTEGER NOT NULL,
            home_team        TEXT NOT NULL,
            away_team        TEXT NOT NULL,
            ballpark         TEXT,
            game_type        TEXT NOT NULL DEFAULT 'regular',
            start_time       TEXT,
            duration_minutes INTEGER,
            attendance       INTEGER,
            away_line        TEXT,
            home_line        TEXT,
            away_runs        INTEGER,
            away_hits        INTEGER,
            away_errors      INTEGER,
            home_runs        INTEGER,
            home_hits        INTEGER,
            home_errors      INTEGER,
            winning_team     TEXT,
            losing_team      TEXT,
            winning_pitcher  TEXT,
            losing_pitcher   TEXT,
            save_pitcher     TEXT,
            ingested_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_games_season ON games(season);
        CREATE INDEX IF NOT EXISTS idx_games_ballpark ON games(ballpark);

        -- One row per plate appearance, in chronology order
        CREATE TABLE IF NOT EXISTS events (
            game_id    TEXT NOT NULL REFERENCES games(game_id),
            seq        INTEGER NOT NULL,
            batter_id  TEXT NOT NULL,
            pitcher_id TEXT,
            inning     TEXT NOT NULL,
            team       TEXT NOT NULL,
            outs       INTEGER NOT NULL,
            on_base    TEXT NOT NULL,
            count      TEXT,
            h          BOOLEAN NOT NULL,
            rbi        INTEGER NOT NULL,
            "1b"       BOOLEAN NOT NULL,
            "2b"       BOOLEAN NOT NULL,
            "3b"       BOOLEAN NOT NULL,
            hr         BOOLEAN NOT NULL,
            gb         BOOLEAN NOT NULL,
            fb         BOOLEAN NOT NULL,
            k          BOOLEAN NOT NULL,
            roe        BOOLEAN NOT NULL,
            bb         BOOLEAN NOT NULL,
            hbp        BOOLEAN NOT NULL,
            gdp        BOOLEAN NOT NULL,
            sac        BOOLEAN NOT NULL,
            PRIMARY KEY (game_id, seq)
        );
        CREATE INDEX IF NOT EXISTS idx_events_batter ON events(batter_id);
        CREATE INDEX IF NOT EXISTS idx_events_pitcher ON events(pitcher_id);

        CREATE TABLE IF NOT EXISTS batting (
            game_id     TEXT NOT NULL REFERENCES games(game_id),
            player_id   TEXT NOT NULL,
            team        TEXT NOT NULL,
            lineup_slot INTEGER,
            position    TEXT,
            r           INTEGER NOT NULL DEFAULT 0,
            pa          INTEGER NOT NULL DEFAULT 0,
            ab          INTEGER NOT NULL DEFAULT 0,
            h           INTEGER NOT NULL DEFAULT 0,
            "1b"        INTEGER NOT NULL DEFAULT 0,
            "2b"        INTEGER NOT NULL DEFAULT 0,
            "3b"        INTEGER NOT NULL DEFAULT 0,
            hr          INTEGER NOT NULL DEFAULT 0,
            rbi         INTEGER NOT NULL DEFAULT 0,
            gb          INTEGER NOT NULL DEFAULT 0,
            fb          INTEGER NOT NULL DEFAULT 0,
            k           INTEGER NOT NULL DEFAULT 0,
            roe         INTEGER NOT NULL DEFAULT 0,
            bb          INTEGER NOT NULL DEFAULT 0,
            hbp         INTEGER NOT NULL DEFAULT 0,
            gdp         INTEGER NOT NULL DEFAULT 0,
            sac         INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (game_id, player_id)
        );
        CREATE INDEX IF NOT EXISTS idx_batting_player ON batting(player_id);

        CREATE TABLE IF NOT EXISTS pitching (
            game_id        TEXT NOT NULL REFERENCES games(game_id),
            player_id      TEXT NOT NULL,
            team           TEXT NOT NULL,
            appearance     INTEGER NOT NULL,
            decision       TEXT CHECK(decision IN ('W','L','S','H')),
            is_start       BOOLEAN NOT NULL DEFAULT 0,
            is_finish      BOOLEAN NOT NULL DEFAULT 0,
            outs_recorded  INTEGER NOT NULL DEFAULT 0,
            pitches        INTEGER NOT NULL DEFAULT 0,
            batters_faced  INTEGER NOT NULL DEFAULT 0,
            r              INTEGER NOT NULL DEFAULT 0,
            er             INTEGER NOT NULL DEFAULT 0,
            wp             INTEGER NOT NULL DEFAULT 0,
            bk             INTEGER NOT NULL DEFAULT 0,
            pa             INTEGER NOT NULL DEFAULT 0,
            h              INTEGER NOT NULL DEFAULT 0,
            "1b"           INTEGER NOT NULL DEFAULT 0,
            "2b"           INTEGER NOT NULL DEFAULT 0,
            "3b"           INTEGER NOT NULL DEFAULT 0,
            hr             INTEGER NOT NULL DEFAULT 0,
            gb             INTEGER NOT NULL DEFAULT 0,
            fb             INTEGER NOT NULL DEFAULT 0,
            k              INTEGER NOT NULL DEFAULT 0,
            roe            INTEGER NOT NULL DEFAULT 0,
            bb             INTEGER NOT NULL DEFAULT 0,
            hbp            INTEGER NOT NULL DEFAULT 0,
            gdp            INTEGER NOT NULL DEFAULT 0,
            sac            INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (game_id, player_id)
        );
        CREATE INDEX IF NOT EXISTS idx_pitching_player ON pitching(player_id);

        CREATE TABLE IF NOT EXISTS ballparks (
            park           TEXT PRIMARY KEY,
            games          INTEGER NOT NULL,
            runs_per_game  REAL NOT NULL,
            raw_index      REAL NOT NULL,
            confidence     REAL NOT NULL,
            factor         REAL NOT NULL,
            team_adjusted  REAL NOT NULL,
            updated_at     TEXT NOT NULL DEFAULT (datetime('now'))
        );
        "#,
    )?;
    Ok(())
}

// ── Rows ──

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineScore {
    /// Runs per inning; `None` for a half that was not played.
    pub innings: Vec<Option<u32>>,
    pub runs: u32,
    pub hits: u32,
    pub errors: u32,
}

impl LineScore {
    fn encode_innings(&self) -> String {
        self.innings
            .iter()
            .map(|i| i.map_or_else(|| "x".to_string(), |r| r.to_string()))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn decode_innings(s: &str) -> Vec<Option<u32>> {
        s.split_whitespace().map(|t| t.parse().ok()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GameRow {
    pub game_id: String,
    pub season: i32,
    pub date: NaiveDate,
    pub number: u8,
    pub home_team: String,
    pub away_team: String,
    pub ballpark: Option<String>,
    pub game_type: GameType,
    pub start_time: Option<String>,
    pub duration_minutes: Option<u32>,
    pub attendance: Option<u32>,
    pub away_line: Option<LineScore>,
    pub home_line: Option<LineScore>,
    pub winning_team: Option<String>,
    pub losing_team: Option<String>,
    pub winning_pitcher: Option<String>,
    pub losing_pitcher: Option<String>,
    pub save_pitcher: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BattingRow {
    pub game_id: String,
    pub player_id: String,
    pub team: String,
    pub lineup_slot: Option<u8>,
    pub position: Option<Position>,
    /// Runs scored, from the box score.
    pub runs: u32,
    pub counters: BattingCounters,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PitchingRow {
    pub game_id: String,
    pub player_id: String,
    pub team: String,
    /// Order of appearance within the team's staff, 0 for the starter.
    pub appearance: u32,
    pub decision: Option<Decision>,
    pub is_start: bool,
    pub is_finish: bool,
    pub workload: Workload,
    pub counters: Tally,
}

fn conversion_error(idx: usize, what: &str, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, format!("bad {what}: {value:?}").into())
}

// ── Games ──

const GAME_COLUMNS: &str = "game_id, season, date, game_number, home_team, away_team, ballpark, game_type,
     start_time, duration_minutes, attendance, away_line, home_line, away_runs, away_hits, away_errors,
     home_runs, home_hits, home_errors, winning_team, losing_team, winning_pitcher, losing_pitcher,
     save_pitcher";

pub fn upsert_game(conn: &Connection, g: &GameRow) -> Result<()> {
    let line = |l: &Option<LineScore>| {
        (
            l.as_ref().map(LineScore::encode_innings),
            l.as_ref().map(|l| l.runs),
            l.as_ref().map(|l| l.hits),
            l.as_ref().map(|l| l.errors),
        )
    };
    let (away_line, away_runs, away_hits, away_errors) = line(&g.away_line);
    let (home_line, home_runs, home_hits, home_errors) = line(&g.home_line);

    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO games ({GAME_COLUMNS})
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21,?22,?23,?24)"
        ),
        rusqlite::params![
            g.game_id, g.season, g.date.to_string(), g.number, g.home_team, g.away_team,
            g.ballpark, g.game_type.code(), g.start_time, g.duration_minutes, g.attendance,
            away_line, home_line, away_runs, away_hits, away_errors, home_runs, home_hits,
            home_errors, g.winning_team, g.losing_team, g.winning_pitcher, g.losing_pitcher,
            g.save_pitcher,
        ],
    )?;
    Ok(())
}

fn game_from_row(row: &Row<'_>) -> Result<GameRow> {
    let date: String = row.get(2)?;
    let line = |text: usize, runs: usize| -> Result<Option<LineScore>> {
        let Some(r) = row.get::<_, Option<u32>>(runs)? else {
            return Ok(None);
        };
        let innings: Option<String> = row.get(text)?;
        Ok(Some(LineScore {
            innings: innings.as_deref().map(LineScore::decode_innings).unwrap_or_default(),
            runs: r,
            hits: row.get::<_, Option<u32>>(runs + 1)?.unwrap_or(0),
            errors: row.get::<_, Option<u32>>(runs + 2)?.unwrap_or(0),
        }))
    };
    Ok(GameRow {
        game_id: row.get(0)?,
        season: row.get(1)?,
        date: date.parse().map_err(|_| conversion_error(2, "date", &date))?,
        number: row.get(3)?,
        home_team: row.get(4)?,
        away_team: row.get(5)?,
        ballpark: row.get(6)?,
        game_type: GameType::from_code(&row.get::<_, String>(7)?),
        start_time: row.get(8)?,
        duration_minutes: row.get(9)?,
        attendance: row.get(10)?,
        away_line: line(11, 13)?,
        home_line: line(12, 16)?,
        winning_team: row.get(19)?,
        losing_team: row.get(20)?,
        winning_pitcher: row.get(21)?,
        losing_pitcher: row.get(22)?,
        save_pitcher: row.get(23)?,
    })
}

pub fn fetch_games(conn: &Connection) -> Result<Vec<GameRow>> {
    let mut stmt = conn.prepare(&format!("SELECT {GAME_COLUMNS} FROM games ORDER BY date, game_id"))?;
    let rows = stmt
        .query_map([], |row| game_from_row(row))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn fetch_game_ids(conn: &Connection, limit: Option<usize>) -> Result<Vec<String>> {
    let sql = format!(
        "SELECT game_id FROM games ORDER BY date, game_id{}",
        match limit {
            Some(n) => format!(" LIMIT {}", n),
            None => String::new(),
        }
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Events ──

/// Delete-then-insert the game's events in their own transaction.
pub fn replace_events(conn: &Connection, game_id: &str, events: &[PlateAppearance]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let count = write_events(&tx, game_id, events)?;
    tx.commit()?;
    Ok(count)
}

/// Delete-then-insert without opening a transaction; callers hold one.
pub fn write_events(conn: &Connection, game_id: &str, events: &[PlateAppearance]) -> Result<usize> {
    conn.execute("DELETE FROM events WHERE game_id = ?1", [game_id])?;
    let mut count = 0;
    let mut stmt = conn.prepare(
        r#"INSERT INTO events
           (game_id, seq, batter_id, pitcher_id, inning, team, outs, on_base, count,
            h, rbi, "1b", "2b", "3b", hr, gb, fb, k, roe, bb, hbp, gdp, sac)
           VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21,?22,?23)"#,
    )?;
    for e in events {
        let o = &e.outcome;
        count += stmt.execute(rusqlite::params![
            game_id, e.seq, e.batter_id, e.pitcher_id, e.inning.to_string(), e.batting_team,
            e.outs, e.base_state.code(), e.count.map(|c| c.to_string()),
            o.hit, o.rbi, o.single, o.double, o.triple, o.home_run, o.ground_out, o.fly_out,
            o.strikeout, o.reached_on_error, o.walk, o.hit_by_pitch, o.double_play, o.sacrifice,
        ])?;
    }
    Ok(count)
}

pub fn fetch_events(conn: &Connection, game_id: &str) -> Result<Vec<PlateAppearance>> {
    let mut stmt = conn.prepare(
        r#"SELECT game_id, seq, batter_id, pitcher_id, inning, team, outs, on_base, count,
                  h, rbi, "1b", "2b", "3b", hr, gb, fb, k, roe, bb, hbp, gdp, sac
           FROM events WHERE game_id = ?1 ORDER BY seq"#,
    )?;
    let rows = stmt
        .query_map([game_id], |row| {
            let inning: String = row.get(4)?;
            let on_base: String = row.get(7)?;
            let count: Option<String> = row.get(8)?;
            Ok(PlateAppearance {
                game_id: row.get(0)?,
                seq: row.get(1)?,
                batter_id: row.get(2)?,
                pitcher_id: row.get(3)?,
                inning: Inning::parse(&inning).ok_or_else(|| conversion_error(4, "inning", &inning))?,
                batting_team: row.get(5)?,
                outs: row.get(6)?,
                base_state: BaseState::from_code(&on_base)
                    .ok_or_else(|| conversion_error(7, "base state", &on_base))?,
                count: count.as_deref().and_then(Count::parse),
                outcome: OutcomeFlags {
                    hit: row.get(9)?,
                    rbi: row.get(10)?,
                    single: row.get(11)?,
                    double: row.get(12)?,
                    triple: row.get(13)?,
                    home_run: row.get(14)?,
                    ground_out: row.get(15)?,
                    fly_out: row.get(16)?,
                    strikeout: row.get(17)?,
                    reached_on_error: row.get(18)?,
                    walk: row.get(19)?,
                    hit_by_pitch: row.get(20)?,
                    double_play: row.get(21)?,
                    sacrifice: row.get(22)?,
                },
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Batting / pitching ──

pub enum Summaries<'a> {
    Batting(&'a [BattingRow]),
    Pitching(&'a [PitchingRow]),
}

/// Delete-then-insert one game's summary rows; callers hold the transaction.
pub fn write_summaries(conn: &Connection, game_id: &str, rows: Summaries<'_>) -> Result<usize> {
    let mut count = 0;
    match rows {
        Summaries::Batting(rows) => {
            conn.execute("DELETE FROM batting WHERE game_id = ?1", [game_id])?;
            let mut stmt = conn.prepare(
                r#"INSERT INTO batting
                   (game_id, player_id, team, lineup_slot, position, r,
                    pa, ab, h, "1b", "2b", "3b", hr, rbi, gb, fb, k, roe, bb, hbp, gdp, sac)
                   VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21,?22)"#,
            )?;
            for r in rows {
                let c = &r.counters;
                let t = &c.events;
                count += stmt.execute(rusqlite::params![
                    game_id, r.player_id, r.team, r.lineup_slot, r.position.map(Position::code), r.runs,
                    t.pa, c.ab, t.hits, t.singles, t.doubles, t.triples, t.home_runs, c.rbi,
                    t.ground_outs, t.fly_outs, t.strikeouts, t.reached_on_error, t.walks,
                    t.hit_by_pitch, t.double_plays, t.sacrifices,
                ])?;
            }
        }
        Summaries::Pitching(rows) => {
            conn.execute("DELETE FROM pitching WHERE game_id = ?1", [game_id])?;
            let mut stmt = conn.prepare(
                r#"INSERT INTO pitching
                   (game_id, player_id, team, appearance, decision, is_start, is_finish,
                    outs_recorded, pitches, batters_faced, r, er, wp, bk,
                    pa, h, "1b", "2b", "3b", hr, gb, fb, k, roe, bb, hbp, gdp, sac)
                   VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,
                           ?21,?22,?23,?24,?25,?26,?27,?28)"#,
            )?;
            for r in rows {
                let w = &r.workload;
                let t = &r.counters;
                count += stmt.execute(rusqlite::params![
                    game_id, r.player_id, r.team, r.appearance, r.decision.map(Decision::code),
                    r.is_start, r.is_finish, w.outs_recorded, w.pitches, w.batters_faced, w.runs,
                    w.earned_runs, w.wild_pitches, w.balks, t.pa, t.hits, t.singles, t.doubles,
                    t.triples, t.home_runs, t.ground_outs, t.fly_outs, t.strikeouts,
                    t.reached_on_error, t.walks, t.hit_by_pitch, t.double_plays, t.sacrifices,
                ])?;
            }
        }
    }
    Ok(count)
}

/// Own-transaction wrapper over `write_summaries`.
pub fn replace_summaries(conn: &Connection, game_id: &str, rows: Summaries<'_>) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let count = write_summaries(&tx, game_id, rows)?;
    tx.commit()?;
    Ok(count)
}

const BATTING_SELECT: &str = r#"SELECT game_id, player_id, team, lineup_slot, position, r,
        pa, ab, h, "1b", "2b", "3b", hr, rbi, gb, fb, k, roe, bb, hbp, gdp, sac
    FROM batting"#;

fn batting_from_row(row: &Row<'_>) -> Result<BattingRow> {
    let position: Option<String> = row.get(4)?;
    Ok(BattingRow {
        game_id: row.get(0)?,
        player_id: row.get(1)?,
        team: row.get(2)?,
        lineup_slot: row.get(3)?,
        position: position.as_deref().and_then(Position::from_code),
        runs: row.get(5)?,
        counters: BattingCounters {
            events: Tally {
                pa: row.get(6)?,
                hits: row.get(8)?,
                singles: row.get(9)?,
                doubles: row.get(10)?,
                triples: row.get(11)?,
                home_runs: row.get(12)?,
                ground_outs: row.get(14)?,
                fly_outs: row.get(15)?,
                strikeouts: row.get(16)?,
                reached_on_error: row.get(17)?,
                walks: row.get(18)?,
                hit_by_pitch: row.get(19)?,
                double_plays: row.get(20)?,
                sacrifices: row.get(21)?,
            },
            ab: row.get(7)?,
            rbi: row.get(13)?,
        },
    })
}

const PITCHING_SELECT: &str = r#"SELECT game_id, player_id, team, appearance, decision, is_start, is_finish,
        outs_recorded, pitches, batters_faced, r, er, wp, bk,
        pa, h, "1b", "2b", "3b", hr, gb, fb, k, roe, bb, hbp, gdp, sac
    FROM pitching"#;

fn pitching_from_row(row: &Row<'_>) -> Result<PitchingRow> {
    let decision: Option<String> = row.get(4)?;
    Ok(PitchingRow {
        game_id: row.get(0)?,
        player_id: row.get(1)?,
        team: row.get(2)?,
        appearance: row.get(3)?,
        decision: decision.as_deref().and_then(Decision::from_code),
        is_start: row.get(5)?,
        is_finish: row.get(6)?,
        workload: Workload {
            outs_recorded: row.get(7)?,
            pitches: row.get(8)?,
            batters_faced: row.get(9)?,
            runs: row.get(10)?,
            earned_runs: row.get(11)?,
            wild_pitches: row.get(12)?,
            balks: row.get(13)?,
        },
        counters: Tally {
            pa: row.get(14)?,
            hits: row.get(15)?,
            singles: row.get(16)?,
            doubles: row.get(17)?,
            triples: row.get(18)?,
            home_runs: row.get(19)?,
            ground_outs: row.get(20)?,
            fly_outs: row.get(21)?,
            strikeouts: row.get(22)?,
            reached_on_error: row.get(23)?,
            walks: row.get(24)?,
            hit_by_pitch: row.get(25)?,
            double_plays: row.get(26)?,
            sacrifices: row.get(27)?,
        },
    })
}

pub fn fetch_batting(conn: &Connection, game_id: &str) -> Result<Vec<BattingRow>> {
    let mut stmt = conn.prepare(&format!("{BATTING_SELECT} WHERE game_id = ?1 ORDER BY rowid"))?;
    let rows = stmt
        .query_map([game_id], |row| batting_from_row(row))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn fetch_pitching(conn: &Connection, game_id: &str) -> Result<Vec<PitchingRow>> {
    let mut stmt = conn.prepare(&format!("{PITCHING_SELECT} WHERE game_id = ?1 ORDER BY rowid"))?;
    let rows = stmt
        .query_map([game_id], |row| pitching_from_row(row))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn fetch_all_batting(conn: &Connection) -> Result<Vec<BattingRow>> {
    let mut stmt = conn.prepare(&format!("{BATTING_SELECT} ORDER BY game_id, rowid"))?;
    let rows = stmt
        .query_map([], |row| batting_from_row(row))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn fetch_all_pitching(conn: &Connection) -> Result<Vec<PitchingRow>> {
    let mut stmt = conn.prepare(&format!("{PITCHING_SELECT} ORDER BY game_id, rowid"))?;
    let rows = stmt
        .query_map([], |row| pitching_from_row(row))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Whole-game save ──

/// Write everything for one game atomically. Re-saving a game replaces it.
pub fn save_game(conn: &Connection, data: &GameData) -> Result<()> {
    let id = data.game.game_id.as_str();
    let tx = conn.unchecked_transaction()?;
    // Children first so the games row can be replaced under the foreign keys.
    tx.execute("DELETE FROM events WHERE game_id = ?1", [id])?;
    tx.execute("DELETE FROM batting WHERE game_id = ?1", [id])?;
    tx.execute("DELETE FROM pitching WHERE game_id = ?1", [id])?;
    upsert_game(&tx, &data.game)?;
    write_events(&tx, id, &data.events)?;
    write_summaries(&tx, id, Summaries::Batting(&data.batting))?;
    write_summaries(&tx, id, Summaries::Pitching(&data.pitching))?;
    tx.commit()?;
    Ok(())
}

// ── Ballparks ──

/// Replace the whole park table with `parks`.
pub fn save_ballparks(conn: &Connection, parks: &[ParkFactor]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM ballparks", [])?;
    let mut count = 0;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO ballparks
             (park, games, runs_per_game, raw_index, confidence, factor, team_adjusted)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        for p in parks {
            count += stmt.execute(rusqlite::params![
                p.park, p.games, p.runs_per_game, p.raw_index, p.confidence, p.factor, p.team_adjusted,
            ])?;
        }
    }
    tx.commit()?;
    Ok(count)
}

pub fn fetch_ballparks(conn: &Connection) -> Result<Vec<ParkFactor>> {
    let mut stmt = conn.prepare(
        "SELECT park, games, runs_per_game, raw_index, confidence, factor, team_adjusted
         FROM ballparks ORDER BY factor DESC",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(ParkFactor {
                park: row.get(0)?,
                games: row.get(1)?,
                runs_per_game: row.get(2)?,
                raw_index: row.get(3)?,
                confidence: row.get(4)?,
                factor: row.get(5)?,
                team_adjusted: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Stats ──

pub struct Stats {
    pub games: i64,
    pub seasons: i64,
    pub events: i64,
    pub batting: i64,
    pub pitching: i64,
    pub ballparks: i64,
    pub events_without_pitcher: i64,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let count = |sql: &str| -> Result<i64> { conn.query_row(sql, [], |r| r.get(0)) };
    Ok(Stats {
        games: count("SELECT COUNT(*) FROM games")?,
        seasons: count("SELECT COUNT(DISTINCT season) FROM games")?,
        events: count("SELECT COUNT(*) FROM events")?,
        batting: count("SELECT COUNT(*) FROM batting")?,
        pitching: count("SELECT COUNT(*) FROM pitching")?,
        ballparks: count("SELECT COUNT(*) FROM ballparks")?,
        events_without_pitcher: count("SELECT COUNT(*) FROM events WHERE pitcher_id IS NULL")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;

    fn fixture_game() -> GameData {
        parser::process_dir(Path::new("tests/fixtures/2021/0409/db-t-01")).unwrap()
    }

    #[test]
    fn schema_is_idempotent() {
        let conn = open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        assert_eq!(get_stats(&conn).unwrap().games, 0);
    }

    #[test]
    fn save_and_read_back_game() {
        let conn = open_in_memory().unwrap();
        let data = fixture_game();
        save_game(&conn, &data).unwrap();

        let games = fetch_games(&conn).unwrap();
        assert_eq!(games, vec![data.game.clone()]);
        assert_eq!(fetch_events(&conn, &data.game.game_id).unwrap(), data.events);
        assert_eq!(fetch_batting(&conn, &data.game.game_id).unwrap(), data.batting);
        assert_eq!(fetch_pitching(&conn, &data.game.game_id).unwrap(), data.pitching);
    }

    #[test]
    fn reingesting_a_game_replaces_rather_than_duplicates() {
        let conn = open_in_memory().unwrap();
        let data = fixture_game();
        save_game(&conn, &data).unwrap();
        let first = get_stats(&conn).unwrap();

        save_game(&conn, &data).unwrap();
        let second = get_stats(&conn).unwrap();

        assert_eq!(first.games, 1);
        assert_eq!(second.games, 1);
        assert_eq!(first.events, second.events);
        assert_eq!(first.batting, second.batting);
        assert_eq!(first.pitching, second.pitching);
        assert_eq!(fetch_events(&conn, &data.game.game_id).unwrap(), data.events);
    }

    #[test]
    fn replace_events_swaps_the_whole_set() {
        let conn = open_in_memory().unwrap();
        let data = fixture_game();
        save_game(&conn, &data).unwrap();

        let fewer = &data.events[..1];
        assert_eq!(replace_events(&conn, &data.game.game_id, fewer).unwrap(), 1);
        assert_eq!(fetch_events(&conn, &data.game.game_id).unwrap(), fewer.to_vec());
    }

    #[test]
    fn ballparks_round_trip() {
        let conn = open_in_memory().unwrap();
        let park = ParkFactor {
            park: "神宮".into(),
            games: 10,
            runs_per_game: 9.4,
            raw_index: 1.12,
            confidence: 0.2,
            factor: 1.024,
            team_adjusted: 1.03,
        };
        save_ballparks(&conn, &[park.clone()]).unwrap();
        save_ballparks(&conn, &[park.clone()]).unwrap();
        assert_eq!(fetch_ballparks(&conn).unwrap(), vec![park]);
    }

    #[test]
    fn ballparks_are_rewritten_wholesale() {
        let conn = open_in_memory().unwrap();
        let park = |name: &str, factor: f64| ParkFactor {
            park: name.into(),
            games: 12,
            runs_per_game: 8.0,
            raw_index: factor,
            confidence: 0.24,
            factor,
            team_adjusted: factor,
        };
        save_ballparks(&conn, &[park("神宮", 1.05), park("横浜", 1.02)]).unwrap();
        assert_eq!(save_ballparks(&conn, &[park("横浜", 1.01)]).unwrap(), 1);
        assert_eq!(fetch_ballparks(&conn).unwrap(), vec![park("横浜", 1.01)]);
    }

    #[test]
    fn replace_summaries_touches_one_role() {
        let conn = open_in_memory().unwrap();
        let data = fixture_game();
        save_game(&conn, &data).unwrap();
        let id = data.game.game_id.as_str();

        let kept = &data.batting[..2];
        assert_eq!(replace_summaries(&conn, id, Summaries::Batting(kept)).unwrap(), 2);
        assert_eq!(fetch_batting(&conn, id).unwrap(), kept.to_vec());
        assert_eq!(fetch_pitching(&conn, id).unwrap(), data.pitching);
    }
}

//! Season and career views over stored per-game rows, with league context and
//! park adjustment.

use std::collections::{BTreeMap, HashMap};

use itertools::Itertools;
use rusqlite::Connection;
use serde::Serialize;
use tracing::debug;

use crate::db::{self, BattingRow, GameRow, PitchingRow};
use crate::parser::extract::pitching::Decision;
use crate::rollup::{BattingCounters, Tally};
use crate::settings::Settings;

const W_BB: f64 = 0.69;
const W_HBP: f64 = 0.72;
const W_1B: f64 = 0.89;
const W_2B: f64 = 1.27;
const W_3B: f64 = 1.62;
const W_HR: f64 = 2.10;

/// Used when a season has no innings to derive its own constant from.
const DEFAULT_FIP_CONSTANT: f64 = 3.10;
/// Teams below this many games use the league average in the team-adjusted index.
const MIN_TEAM_GAMES: u32 = 10;

fn ratio(num: f64, den: f64) -> Option<f64> {
    (den > 0.0).then(|| num / den)
}

fn innings(outs: u32) -> f64 {
    f64::from(outs) / 3.0
}

pub fn woba(t: &Tally) -> Option<f64> {
    let num = W_BB * f64::from(t.walks)
        + W_HBP * f64::from(t.hit_by_pitch)
        + W_1B * f64::from(t.singles)
        + W_2B * f64::from(t.doubles)
        + W_3B * f64::from(t.triples)
        + W_HR * f64::from(t.home_runs);
    ratio(num, f64::from(t.pa))
}

/// FIP before the league constant is added.
pub fn raw_fip(t: &Tally, outs: u32) -> Option<f64> {
    let num = 13.0 * f64::from(t.home_runs) + 3.0 * f64::from(t.walks + t.hit_by_pitch)
        - 2.0 * f64::from(t.strikeouts);
    ratio(num, innings(outs))
}

// ── Ledger ──

/// Everything the aggregator reads, restricted to regular-season games.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    pub games: Vec<GameRow>,
    pub batting: Vec<BattingRow>,
    pub pitching: Vec<PitchingRow>,
}

impl Ledger {
    pub fn load(conn: &Connection) -> rusqlite::Result<Self> {
        Ok(Ledger::regular_season(
            db::fetch_games(conn)?,
            db::fetch_all_batting(conn)?,
            db::fetch_all_pitching(conn)?,
        ))
    }

    pub fn regular_season(games: Vec<GameRow>, batting: Vec<BattingRow>, pitching: Vec<PitchingRow>) -> Self {
        let games: Vec<GameRow> = games.into_iter().filter(|g| g.game_type.is_regular_season()).collect();
        let keep: HashMap<&str, ()> = games.iter().map(|g| (g.game_id.as_str(), ())).collect();
        let batting = batting.into_iter().filter(|r| keep.contains_key(r.game_id.as_str())).collect();
        let pitching = pitching.into_iter().filter(|r| keep.contains_key(r.game_id.as_str())).collect();
        Ledger { games, batting, pitching }
    }

    fn game_index(&self) -> HashMap<&str, &GameRow> {
        self.games.iter().map(|g| (g.game_id.as_str(), g)).collect()
    }

    /// Games played per (season, team).
    fn team_games(&self) -> HashMap<(i32, &str), u32> {
        let mut counts = HashMap::new();
        for g in &self.games {
            *counts.entry((g.season, g.home_team.as_str())).or_insert(0) += 1;
            *counts.entry((g.season, g.away_team.as_str())).or_insert(0) += 1;
        }
        counts
    }
}

// ── League context ──

#[derive(Debug, Clone, Serialize)]
pub struct LeagueContext {
    pub season: i32,
    pub games: u32,
    pub plate_appearances: u32,
    pub outs: u32,
    pub woba: f64,
    pub era: f64,
    pub fip_constant: f64,
}

pub fn league_contexts(ledger: &Ledger, settings: &Settings) -> BTreeMap<i32, LeagueContext> {
    let index = ledger.game_index();
    let season_of = |game_id: &str| index.get(game_id).map(|g| g.season);

    let mut batting: BTreeMap<i32, Tally> = BTreeMap::new();
    for r in &ledger.batting {
        if let Some(season) = season_of(&r.game_id) {
            *batting.entry(season).or_default() += r.counters.events;
        }
    }
    let mut pitching: BTreeMap<i32, (Tally, u32, u32)> = BTreeMap::new();
    for r in &ledger.pitching {
        if let Some(season) = season_of(&r.game_id) {
            let entry = pitching.entry(season).or_default();
            entry.0 += r.counters;
            entry.1 += r.workload.outs_recorded;
            entry.2 += r.workload.earned_runs;
        }
    }
    let games = ledger.games.iter().counts_by(|g| g.season);

    games
        .keys()
        .map(|&season| {
            let bat = batting.get(&season).copied().unwrap_or_default();
            let (pit, outs, er) = pitching.get(&season).copied().unwrap_or_default();
            let era = ratio(9.0 * f64::from(er), innings(outs)).unwrap_or(settings.default_league_era);
            let fip_constant = raw_fip(&pit, outs).map_or(DEFAULT_FIP_CONSTANT, |raw| era - raw);
            let ctx = LeagueContext {
                season,
                games: games[&season] as u32,
                plate_appearances: bat.pa,
                outs,
                woba: woba(&bat).unwrap_or(settings.default_league_woba),
                era,
                fip_constant,
            };
            debug!(season, woba = ctx.woba, era = ctx.era, fip_constant = ctx.fip_constant, "league context");
            (season, ctx)
        })
        .collect()
}

// ── Park factors ──

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParkFactor {
    pub park: String,
    pub games: u32,
    /// Mean combined runs per game at this park.
    pub runs_per_game: f64,
    pub raw_index: f64,
    pub confidence: f64,
    /// Raw index regressed toward 1.0 by sample size.
    pub factor: f64,
    /// Same regression over actual vs. expected runs from both teams' scoring.
    pub team_adjusted: f64,
}

fn regress(raw: f64, games: u32, full_confidence_games: f64) -> (f64, f64) {
    let confidence = if full_confidence_games > 0.0 {
        (f64::from(games) / full_confidence_games).min(1.0)
    } else {
        1.0
    };
    (confidence, confidence * raw + (1.0 - confidence))
}

pub fn park_factors(games: &[GameRow], full_confidence_games: f64) -> Vec<ParkFactor> {
    // (park, home team, away team, home runs, away runs)
    let scored: Vec<(&str, &str, &str, f64, f64)> = games
        .iter()
        .filter_map(|g| {
            let park = g.ballpark.as_deref()?;
            let home = f64::from(g.home_line.as_ref()?.runs);
            let away = f64::from(g.away_line.as_ref()?.runs);
            Some((park, g.home_team.as_str(), g.away_team.as_str(), home, away))
        })
        .collect();
    if scored.is_empty() {
        return Vec::new();
    }

    let league_avg = scored.iter().map(|s| (s.3 + s.4) / 2.0).sum::<f64>() / scored.len() as f64;

    // Runs scored per game by each team, for the team-adjusted index.
    let mut offense: HashMap<&str, (f64, u32)> = HashMap::new();
    for &(_, home, away, h, a) in &scored {
        let e = offense.entry(home).or_default();
        e.0 += h;
        e.1 += 1;
        let e = offense.entry(away).or_default();
        e.0 += a;
        e.1 += 1;
    }
    let team_avg = |team: &str| match offense.get(team) {
        Some(&(runs, n)) if n >= MIN_TEAM_GAMES => runs / f64::from(n),
        _ => league_avg,
    };

    scored
        .iter()
        .into_group_map_by(|s| s.0)
        .into_iter()
        .sorted_by_key(|(park, _)| *park)
        .map(|(park, rows)| {
            let n = rows.len() as u32;
            let total: f64 = rows.iter().map(|s| s.3 + s.4).sum();
            let park_avg = total / 2.0 / f64::from(n);
            let raw_index = ratio(park_avg, league_avg).unwrap_or(1.0);
            let (confidence, factor) = regress(raw_index, n, full_confidence_games);

            let expected: f64 = rows.iter().map(|s| team_avg(s.1) + team_avg(s.2)).sum();
            let adj_raw = ratio(total, expected).unwrap_or(1.0);
            let (_, team_adjusted) = regress(adj_raw, n, full_confidence_games);

            ParkFactor {
                park: park.to_string(),
                games: n,
                runs_per_game: total / f64::from(n),
                raw_index,
                confidence,
                factor,
                team_adjusted,
            }
        })
        .collect()
}

/// Σ factor × weight / Σ weight over `(park, weight)` pairs; 1.0 with no weight.
pub fn weighted_park_factor<'a>(
    samples: impl IntoIterator<Item = (Option<&'a str>, f64)>,
    factors: &HashMap<String, f64>,
) -> f64 {
    let (sum, weight) = samples.into_iter().fold((0.0, 0.0), |(sum, weight), (park, w)| {
        let pf = park.and_then(|p| factors.get(p)).copied().unwrap_or(1.0);
        (sum + pf * w, weight + w)
    });
    ratio(sum, weight).unwrap_or(1.0)
}

// ── Player lines ──

#[derive(Debug, Clone, Serialize)]
pub struct BattingLine {
    pub player_id: String,
    /// `None` for a career line.
    pub season: Option<i32>,
    pub team: Option<String>,
    pub games: u32,
    pub runs: u32,
    pub counters: BattingCounters,
    pub avg: Option<f64>,
    pub obp: Option<f64>,
    pub slg: Option<f64>,
    pub ops: Option<f64>,
    pub woba: Option<f64>,
    pub k_pct: Option<f64>,
    pub bb_pct: Option<f64>,
    pub park_factor: f64,
    pub league_woba: f64,
    pub wrc_plus: Option<f64>,
    pub qualified: bool,
}

impl BattingLine {
    fn build(
        player_id: &str,
        season: Option<i32>,
        team: Option<String>,
        rows: &[&BattingRow],
        park_factor: f64,
        league_woba: f64,
        settings: &Settings,
    ) -> Self {
        let mut counters = BattingCounters::default();
        let mut runs = 0;
        for r in rows {
            counters += r.counters;
            runs += r.runs;
        }
        let t = &counters.events;
        let pa = f64::from(t.pa);
        let ab = f64::from(counters.ab);
        let total_bases = t.singles + 2 * t.doubles + 3 * t.triples + 4 * t.home_runs;

        let avg = ratio(f64::from(t.hits), ab);
        // Sacrifice flies are not told apart from bunts, so PA is the denominator.
        let obp = ratio(f64::from(t.hits + t.walks + t.hit_by_pitch), pa);
        let slg = ratio(f64::from(total_bases), ab);
        let woba = woba(t);
        let wrc_plus = woba.and_then(|w| {
            let above = ((w - league_woba) / settings.woba_scale) * 100.0 + 100.0;
            ratio(above, park_factor)
        });

        BattingLine {
            player_id: player_id.to_string(),
            season,
            team,
            games: rows.iter().map(|r| r.game_id.as_str()).unique().count() as u32,
            runs,
            counters,
            avg,
            obp,
            slg,
            ops: obp.zip(slg).map(|(o, s)| o + s),
            woba,
            k_pct: ratio(f64::from(t.strikeouts), pa),
            bb_pct: ratio(f64::from(t.walks), pa),
            park_factor,
            league_woba,
            wrc_plus,
            qualified: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PitchingLine {
    pub player_id: String,
    pub season: Option<i32>,
    pub team: Option<String>,
    pub games: u32,
    pub starts: u32,
    pub wins: u32,
    pub losses: u32,
    pub saves: u32,
    pub holds: u32,
    pub outs: u32,
    pub runs: u32,
    pub earned_runs: u32,
    pub counters: Tally,
    pub era: Option<f64>,
    pub fip: Option<f64>,
    pub whip: Option<f64>,
    pub k9: Option<f64>,
    pub park_factor: f64,
    pub league_era: f64,
    pub era_plus: Option<f64>,
    pub qualified: bool,
}

impl PitchingLine {
    fn build(
        player_id: &str,
        season: Option<i32>,
        team: Option<String>,
        rows: &[&PitchingRow],
        park_factor: f64,
        league_era: f64,
        fip_constant: f64,
    ) -> Self {
        let mut counters = Tally::default();
        let (mut outs, mut runs, mut er) = (0, 0, 0);
        let mut decisions: HashMap<Decision, u32> = HashMap::new();
        for r in rows {
            counters += r.counters;
            outs += r.workload.outs_recorded;
            runs += r.workload.runs;
            er += r.workload.earned_runs;
            if let Some(d) = r.decision {
                *decisions.entry(d).or_default() += 1;
            }
        }
        let ip = innings(outs);
        let era = ratio(9.0 * f64::from(er), ip);
        let decided = |d: Decision| decisions.get(&d).copied().unwrap_or(0);

        PitchingLine {
            player_id: player_id.to_string(),
            season,
            team,
            games: rows.iter().map(|r| r.game_id.as_str()).unique().count() as u32,
            starts: rows.iter().filter(|r| r.is_start).count() as u32,
            wins: decided(Decision::Win),
            losses: decided(Decision::Loss),
            saves: decided(Decision::Save),
            holds: decided(Decision::Hold),
            outs,
            runs,
            earned_runs: er,
            counters,
            era,
            fip: raw_fip(&counters, outs).map(|raw| raw + fip_constant),
            whip: ratio(f64::from(counters.walks + counters.hits), ip),
            k9: ratio(9.0 * f64::from(counters.strikeouts), ip),
            park_factor,
            league_era,
            era_plus: era
                .filter(|e| *e > 0.0)
                .map(|e| 100.0 * league_era / e * park_factor),
            qualified: false,
        }
    }
}

/// Everything needed to turn stored rows into player lines.
pub struct Aggregator<'a> {
    ledger: &'a Ledger,
    settings: &'a Settings,
    contexts: BTreeMap<i32, LeagueContext>,
    factors: HashMap<String, f64>,
    games: HashMap<&'a str, &'a GameRow>,
    team_games: HashMap<(i32, &'a str), u32>,
}

impl<'a> Aggregator<'a> {
    pub fn new(ledger: &'a Ledger, settings: &'a Settings) -> Self {
        let factors = park_factors(&ledger.games, settings.park_full_confidence_games)
            .into_iter()
            .map(|p| (p.park, p.factor))
            .collect();
        Aggregator {
            ledger,
            settings,
            contexts: league_contexts(ledger, settings),
            factors,
            games: ledger.game_index(),
            team_games: ledger.team_games(),
        }
    }

    pub fn context(&self, season: i32) -> Option<&LeagueContext> {
        self.contexts.get(&season)
    }

    fn season_of(&self, game_id: &str) -> Option<i32> {
        self.games.get(game_id).map(|g| g.season)
    }

    fn park_of(&self, game_id: &str) -> Option<&'a str> {
        self.games.get(game_id).and_then(|g| g.ballpark.as_deref())
    }

    fn league_woba(&self, season: i32) -> f64 {
        self.contexts.get(&season).map_or(self.settings.default_league_woba, |c| c.woba)
    }

    fn league_era(&self, season: i32) -> (f64, f64) {
        self.contexts
            .get(&season)
            .map_or((self.settings.default_league_era, DEFAULT_FIP_CONSTANT), |c| (c.era, c.fip_constant))
    }

    /// Team with the most weight for a player in a season.
    fn main_team<'r>(rows: impl Iterator<Item = (&'r str, u32)>) -> Option<String> {
        let mut by_team: BTreeMap<&str, u32> = BTreeMap::new();
        for (team, w) in rows {
            *by_team.entry(team).or_default() += w;
        }
        by_team
            .into_iter()
            .max_by_key(|(_, w)| *w)
            .map(|(team, _)| team.to_string())
    }

    pub fn batting_seasons(&self, player: Option<&str>) -> Vec<BattingLine> {
        let grouped = self
            .ledger
            .batting
            .iter()
            .filter(|r| player.map_or(true, |p| r.player_id == p))
            .filter_map(|r| Some(((r.player_id.as_str(), self.season_of(&r.game_id)?), r)))
            .into_group_map();

        grouped
            .into_iter()
            .sorted_by_key(|((player, season), _)| (*season, *player))
            .map(|((player, season), rows)| {
                let pf = weighted_park_factor(
                    rows.iter().map(|r| (self.park_of(&r.game_id), f64::from(r.counters.events.pa))),
                    &self.factors,
                );
                let team = Self::main_team(rows.iter().map(|r| (r.team.as_str(), r.counters.events.pa.max(1))));
                let mut line = BattingLine::build(
                    player,
                    Some(season),
                    team.clone(),
                    &rows,
                    pf,
                    self.league_woba(season),
                    self.settings,
                );
                let team_games = team
                    .as_deref()
                    .and_then(|t| self.team_games.get(&(season, t)))
                    .copied()
                    .unwrap_or(0);
                line.qualified = team_games > 0
                    && f64::from(line.counters.events.pa)
                        >= self.settings.batting_qualifier_per_game * f64::from(team_games);
                line
            })
            .collect()
    }

    pub fn pitching_seasons(&self, player: Option<&str>) -> Vec<PitchingLine> {
        let grouped = self
            .ledger
            .pitching
            .iter()
            .filter(|r| player.map_or(true, |p| r.player_id == p))
            .filter_map(|r| Some(((r.player_id.as_str(), self.season_of(&r.game_id)?), r)))
            .into_group_map();

        grouped
            .into_iter()
            .sorted_by_key(|((player, season), _)| (*season, *player))
            .map(|((player, season), rows)| {
                let pf = weighted_park_factor(
                    rows.iter().map(|r| (self.park_of(&r.game_id), innings(r.workload.outs_recorded))),
                    &self.factors,
                );
                let team = Self::main_team(rows.iter().map(|r| (r.team.as_str(), r.workload.outs_recorded.max(1))));
                let (league_era, fip_constant) = self.league_era(season);
                let mut line =
                    PitchingLine::build(player, Some(season), team.clone(), &rows, pf, league_era, fip_constant);
                let team_games = team
                    .as_deref()
                    .and_then(|t| self.team_games.get(&(season, t)))
                    .copied()
                    .unwrap_or(0);
                line.qualified = team_games > 0
                    && innings(line.outs) >= self.settings.pitching_qualifier_per_game * f64::from(team_games);
                line
            })
            .collect()
    }

    /// Career batting line: league wOBA weighted by each season's PA, park
    /// factor over every game.
    pub fn batting_career(&self, player: &str) -> Option<BattingLine> {
        let rows: Vec<&BattingRow> = self.ledger.batting.iter().filter(|r| r.player_id == player).collect();
        if rows.is_empty() {
            return None;
        }
        let samples: Vec<(f64, f64)> = rows
            .iter()
            .filter_map(|r| Some((self.league_woba(self.season_of(&r.game_id)?), f64::from(r.counters.events.pa))))
            .collect();
        let league_woba = weighted_mean(&samples).unwrap_or(self.settings.default_league_woba);
        let pf = weighted_park_factor(
            rows.iter().map(|r| (self.park_of(&r.game_id), f64::from(r.counters.events.pa))),
            &self.factors,
        );
        let team = Self::main_team(rows.iter().map(|r| (r.team.as_str(), r.counters.events.pa.max(1))));
        Some(BattingLine::build(player, None, team, &rows, pf, league_woba, self.settings))
    }

    /// Career pitching line: league ERA and FIP constant weighted by each
    /// season's innings.
    pub fn pitching_career(&self, player: &str) -> Option<PitchingLine> {
        let rows: Vec<&PitchingRow> = self.ledger.pitching.iter().filter(|r| r.player_id == player).collect();
        if rows.is_empty() {
            return None;
        }
        let mut era_samples = Vec::new();
        let mut fip_samples = Vec::new();
        for r in &rows {
            if let Some(season) = self.season_of(&r.game_id) {
                let (era, constant) = self.league_era(season);
                let w = innings(r.workload.outs_recorded);
                era_samples.push((era, w));
                fip_samples.push((constant, w));
            }
        }
        let league_era = weighted_mean(&era_samples).unwrap_or(self.settings.default_league_era);
        let fip_constant = weighted_mean(&fip_samples).unwrap_or(DEFAULT_FIP_CONSTANT);
        let pf = weighted_park_factor(
            rows.iter().map(|r| (self.park_of(&r.game_id), innings(r.workload.outs_recorded))),
            &self.factors,
        );
        let team = Self::main_team(rows.iter().map(|r| (r.team.as_str(), r.workload.outs_recorded.max(1))));
        Some(PitchingLine::build(player, None, team, &rows, pf, league_era, fip_constant))
    }
}

fn weighted_mean(samples: &[(f64, f64)]) -> Option<f64> {
    let (sum, weight) = samples
        .iter()
        .fold((0.0, 0.0), |(s, w), (value, weight)| (s + value * weight, w + weight));
    ratio(sum, weight)
}

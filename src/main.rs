use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use rusqlite::Connection;
use tracing::{error, info, warn};

use yakyuu_ingest::db;
use yakyuu_ingest::parser;
use yakyuu_ingest::rollup;
use yakyuu_ingest::season::{self, Aggregator, Ledger};
use yakyuu_ingest::settings::Settings;
use yakyuu_ingest::source;

#[derive(Parser)]
#[command(name = "yakyuu", about = "NPB game-report ingestion and season aggregation")]
struct Cli {
    /// SQLite database (overrides YAKYUU_DB_PATH / yakyuu.toml)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the schema
    Init,
    /// Ingest saved game directories (searched recursively)
    Ingest {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Max games to ingest
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Parse one game directory and print its events as JSON lines, without saving
    Events { path: PathBuf },
    /// Rebuild batting/pitching rows from stored events
    Rollup {
        /// Only this game id (default: every stored game)
        #[arg(long)]
        game: Option<String>,
    },
    /// Recompute park factors from stored games
    Parks,
    /// League context and leaders for one season
    Season {
        year: i32,
        /// Leaders per table
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,
    },
    /// Season and career lines for one player
    Player { id: String },
    /// Show row counts
    Stats,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let mut settings = Settings::load().context("loading settings")?;
    if let Some(path) = cli.db {
        settings.db_path = path;
    }

    let result = match cli.command {
        Commands::Init => {
            let conn = open(&settings)?;
            let s = db::get_stats(&conn)?;
            println!("Schema ready at {} ({} games stored)", settings.db_path.display(), s.games);
            Ok(())
        }
        Commands::Ingest { paths, limit } => {
            let conn = open(&settings)?;
            let mut dirs = Vec::new();
            for path in &paths {
                dirs.extend(source::discover_game_dirs(path)?);
            }
            if let Some(n) = limit {
                dirs.truncate(n);
            }
            if dirs.is_empty() {
                println!("No game directories found.");
                return Ok(());
            }
            println!("Ingesting {} games...", dirs.len());
            let counts = ingest(&conn, &dirs, settings.chunk_size)?;
            counts.print();
            Ok(())
        }
        Commands::Events { path } => {
            let data = parser::process_dir(&path)?;
            for e in &data.events {
                println!("{}", serde_json::to_string(e)?);
            }
            info!(game = %data.game.game_id, events = data.events.len(), "dry run");
            Ok(())
        }
        Commands::Rollup { game } => {
            let conn = open(&settings)?;
            let ids = match game {
                Some(id) => vec![id],
                None => db::fetch_game_ids(&conn, None)?,
            };
            let batch = rollup::run_for_games(&conn, &ids);
            let total = batch.totals;
            println!(
                "Rolled up {} games ({} failed): {} events -> {} batting, {} pitching rows.",
                batch.games, batch.failed, total.events, total.batting, total.pitching
            );
            Ok(())
        }
        Commands::Parks => {
            let conn = open(&settings)?;
            let ledger = Ledger::load(&conn)?;
            let parks = season::park_factors(&ledger.games, settings.park_full_confidence_games);
            db::save_ballparks(&conn, &parks)?;

            println!(
                "{:<12} | {:>5} | {:>6} | {:>6} | {:>5} | {:>6} | {:>6}",
                "Park", "G", "R/G", "Raw", "Conf", "PF", "TeamPF"
            );
            println!("{}", "-".repeat(66));
            for p in &parks {
                println!(
                    "{:<12} | {:>5} | {:>6.2} | {:>6.3} | {:>5.2} | {:>6.3} | {:>6.3}",
                    truncate(&p.park, 12), p.games, p.runs_per_game, p.raw_index, p.confidence, p.factor, p.team_adjusted
                );
            }
            println!("\n{} parks", parks.len());
            Ok(())
        }
        Commands::Season { year, limit } => {
            let conn = open(&settings)?;
            let ledger = Ledger::load(&conn)?;
            let agg = Aggregator::new(&ledger, &settings);
            print_season(&agg, year, limit);
            Ok(())
        }
        Commands::Player { id } => {
            let conn = open(&settings)?;
            let ledger = Ledger::load(&conn)?;
            let agg = Aggregator::new(&ledger, &settings);
            print_player(&agg, &id);
            Ok(())
        }
        Commands::Stats => {
            let conn = open(&settings)?;
            let s = db::get_stats(&conn)?;
            println!("Games:     {}", s.games);
            println!("Seasons:   {}", s.seasons);
            println!("Events:    {}", s.events);
            println!("Batting:   {}", s.batting);
            println!("Pitching:  {}", s.pitching);
            println!("Ballparks: {}", s.ballparks);
            println!("No pitcher: {}", s.events_without_pitcher);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn open(settings: &Settings) -> anyhow::Result<Connection> {
    if let Some(parent) = settings.db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let conn = db::connect(&settings.db_path)?;
    db::init_schema(&conn)?;
    Ok(conn)
}

#[derive(Default)]
struct IngestCounts {
    games: usize,
    failed: usize,
    events: usize,
    batting: usize,
    pitching: usize,
}

impl IngestCounts {
    fn print(&self) {
        println!(
            "Saved {} games ({} failed): {} events, {} batting rows, {} pitching rows.",
            self.games, self.failed, self.events, self.batting, self.pitching,
        );
    }
}

fn ingest(conn: &Connection, dirs: &[PathBuf], chunk_size: usize) -> anyhow::Result<IngestCounts> {
    let pb = ProgressBar::new(dirs.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")?
            .progress_chars("#>-"),
    );

    let mut counts = IngestCounts::default();
    for chunk in dirs.chunks(chunk_size.max(1)) {
        let results: Vec<_> = chunk
            .par_iter()
            .map(|dir| (dir.as_path(), parser::process_dir(dir)))
            .collect();

        for (dir, result) in results {
            match result.and_then(|data| {
                db::save_game(conn, &data)?;
                Ok(data)
            }) {
                Ok(data) => {
                    counts.games += 1;
                    counts.events += data.events.len();
                    counts.batting += data.batting.len();
                    counts.pitching += data.pitching.len();
                    if data.events.is_empty() {
                        warn!(game = %data.game.game_id, "no events extracted");
                    }
                }
                Err(e) => {
                    counts.failed += 1;
                    pb.suspend(|| error!(dir = %crate::display(dir), "{e}"));
                }
            }
        }
        pb.inc(chunk.len() as u64);
    }

    pb.finish_and_clear();
    Ok(counts)
}

fn display(dir: &Path) -> String {
    dir.to_string_lossy().into_owned()
}

fn print_season(agg: &Aggregator, year: i32, limit: usize) {
    let Some(ctx) = agg.context(year) else {
        println!("No regular-season games stored for {year}.");
        return;
    };
    println!(
        "{year}: {} games, {} PA, {:.1} IP | lgwOBA {:.3} | lgERA {:.2} | FIP const {:.2}",
        ctx.games,
        ctx.plate_appearances,
        f64::from(ctx.outs) / 3.0,
        ctx.woba,
        ctx.era,
        ctx.fip_constant
    );

    let mut hitters: Vec<_> = agg.batting_seasons(None).into_iter().filter(|l| l.season == Some(year) && l.qualified).collect();
    hitters.sort_by(|a, b| b.wrc_plus.unwrap_or(f64::MIN).total_cmp(&a.wrc_plus.unwrap_or(f64::MIN)));
    println!("\n--- Batting (qualified, by wRC+) ---");
    println!(
        "{:>3} | {:<10} | {:<4} | {:>4} | {:>5} | {:>5} | {:>5} | {:>5} | {:>5}",
        "#", "Player", "Team", "PA", "AVG", "OBP", "SLG", "wOBA", "wRC+"
    );
    for (i, l) in hitters.iter().take(limit).enumerate() {
        println!(
            "{:>3} | {:<10} | {:<4} | {:>4} | {:>5} | {:>5} | {:>5} | {:>5} | {:>5}",
            i + 1,
            truncate(&l.player_id, 10),
            l.team.as_deref().unwrap_or("-"),
            l.counters.events.pa,
            rate(l.avg),
            rate(l.obp),
            rate(l.slg),
            rate(l.woba),
            plus(l.wrc_plus),
        );
    }

    let mut pitchers: Vec<_> = agg.pitching_seasons(None).into_iter().filter(|l| l.season == Some(year) && l.qualified).collect();
    pitchers.sort_by(|a, b| a.era.unwrap_or(f64::MAX).total_cmp(&b.era.unwrap_or(f64::MAX)));
    println!("\n--- Pitching (qualified, by ERA) ---");
    println!(
        "{:>3} | {:<10} | {:<4} | {:>6} | {:>5} | {:>5} | {:>5} | {:>5}",
        "#", "Player", "Team", "IP", "ERA", "FIP", "WHIP", "ERA+"
    );
    for (i, l) in pitchers.iter().take(limit).enumerate() {
        println!(
            "{:>3} | {:<10} | {:<4} | {:>6} | {:>5} | {:>5} | {:>5} | {:>5}",
            i + 1,
            truncate(&l.player_id, 10),
            l.team.as_deref().unwrap_or("-"),
            innings(l.outs),
            two(l.era),
            two(l.fip),
            two(l.whip),
            plus(l.era_plus),
        );
    }
}

fn print_player(agg: &Aggregator, id: &str) {
    let batting: Vec<_> = agg.batting_seasons(Some(id)).into_iter().chain(agg.batting_career(id)).collect();
    let pitching: Vec<_> = agg.pitching_seasons(Some(id)).into_iter().chain(agg.pitching_career(id)).collect();
    if batting.is_empty() && pitching.is_empty() {
        println!("No regular-season rows for player {id}.");
        return;
    }

    if !batting.is_empty() {
        println!("{:<6} | {:<4} | {:>3} | {:>4} | {:>3} | {:>3} | {:>5} | {:>5} | {:>5} | {:>5} | {:>5}",
            "Year", "Team", "G", "PA", "H", "HR", "AVG", "OBP", "SLG", "OPS", "wRC+");
        for l in &batting {
            println!(
                "{:<6} | {:<4} | {:>3} | {:>4} | {:>3} | {:>3} | {:>5} | {:>5} | {:>5} | {:>5} | {:>5}",
                l.season.map_or_else(|| "Career".to_string(), |s| s.to_string()),
                l.team.as_deref().unwrap_or("-"),
                l.games,
                l.counters.events.pa,
                l.counters.events.hits,
                l.counters.events.home_runs,
                rate(l.avg),
                rate(l.obp),
                rate(l.slg),
                rate(l.ops),
                plus(l.wrc_plus),
            );
        }
    }

    if !pitching.is_empty() {
        if !batting.is_empty() {
            println!();
        }
        println!("{:<6} | {:<4} | {:>3} | {:>3} | {:>5} | {:>6} | {:>5} | {:>5} | {:>5} | {:>5} | {:>5}",
            "Year", "Team", "G", "GS", "W-L-S", "IP", "ERA", "FIP", "WHIP", "K/9", "ERA+");
        for l in &pitching {
            println!(
                "{:<6} | {:<4} | {:>3} | {:>3} | {:>5} | {:>6} | {:>5} | {:>5} | {:>5} | {:>5} | {:>5}",
                l.season.map_or_else(|| "Career".to_string(), |s| s.to_string()),
                l.team.as_deref().unwrap_or("-"),
                l.games,
                l.starts,
                format!("{}-{}-{}", l.wins, l.losses, l.saves),
                innings(l.outs),
                two(l.era),
                two(l.fip),
                two(l.whip),
                two(l.k9),
                plus(l.era_plus),
            );
        }
    }
}

/// `.312` style, three decimals without the leading zero.
fn rate(v: Option<f64>) -> String {
    match v {
        Some(v) if v < 1.0 => format!("{v:.3}").trim_start_matches('0').to_string(),
        Some(v) => format!("{v:.3}"),
        None => "-".into(),
    }
}

fn two(v: Option<f64>) -> String {
    v.map_or_else(|| "-".into(), |v| format!("{v:.2}"))
}

fn plus(v: Option<f64>) -> String {
    v.map_or_else(|| "-".into(), |v| format!("{v:.0}"))
}

/// Baseball notation: 5 outs → "1.2".
fn innings(outs: u32) -> String {
    format!("{}.{}", outs / 3, outs % 3)
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

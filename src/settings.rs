use std::path::PathBuf;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Runtime knobs. Built-in defaults, then `yakyuu.toml` (optional), then
/// `YAKYUU_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub db_path: PathBuf,
    /// Games parsed per rayon batch before the batch is written.
    pub chunk_size: usize,
    pub woba_scale: f64,
    /// Sample size (games) at which a park's raw run index is trusted fully.
    pub park_full_confidence_games: f64,
    pub default_league_woba: f64,
    pub default_league_era: f64,
    pub batting_qualifier_per_game: f64,
    pub pitching_qualifier_per_game: f64,
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        let d = Settings::default();
        Config::builder()
            .set_default("db_path", d.db_path.to_string_lossy().into_owned())?
            .set_default("chunk_size", d.chunk_size as i64)?
            .set_default("woba_scale", d.woba_scale)?
            .set_default("park_full_confidence_games", d.park_full_confidence_games)?
            .set_default("default_league_woba", d.default_league_woba)?
            .set_default("default_league_era", d.default_league_era)?
            .set_default("batting_qualifier_per_game", d.batting_qualifier_per_game)?
            .set_default("pitching_qualifier_per_game", d.pitching_qualifier_per_game)?
            .add_source(File::with_name("yakyuu").required(false))
            .add_source(Environment::with_prefix("YAKYUU").try_parsing(true))
            .build()?
            .try_deserialize()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            db_path: PathBuf::from("data/yakyuu.sqlite"),
            chunk_size: 200,
            woba_scale: 0.16,
            park_full_confidence_games: 50.0,
            default_league_woba: 0.320,
            default_league_era: 4.00,
            batting_qualifier_per_game: 3.1,
            pitching_qualifier_per_game: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_load_without_file_or_env() {
        let s = Settings::load().unwrap();
        assert_eq!(s.chunk_size, 200);
        assert!((s.woba_scale - 0.16).abs() < 1e-9);
        assert!((s.park_full_confidence_games - 50.0).abs() < 1e-9);
    }
}

//! Maps free-form plate-appearance result text onto outcome flags.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::rules::{contains_any, contains_word, first_match, has_token, Matcher};

static RBI_JA_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"打点\s*(\d+)").unwrap());
/// A fielder position followed by a scorebook result code. Longer codes come
/// first so `犠飛` is not read as `犠`.
static SCOREBOOK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[投捕一二三遊左中右](犠飛|邪飛|犠|安|本|[2２]|[3３]|ゴ|飛|直|併|失)").unwrap());
static RBI_EN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)\s*RBIs?\b|\bRBIs?\s*(\d+)").unwrap());

/// Rows describing a plate appearance that did not finish.
const INTERRUPTED: &[&str] = &["途中終了", "途中交代"];
const ERROR_MARKERS: &[&str] = &["エラー", "失策", "野選", "error", "fielder's choice"];

/// Outcome of one plate appearance. Flags are booleans; `rbi` is a count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeFlags {
    pub hit: bool,
    pub rbi: u8,
    pub single: bool,
    pub double: bool,
    pub triple: bool,
    pub home_run: bool,
    pub ground_out: bool,
    pub fly_out: bool,
    pub strikeout: bool,
    pub reached_on_error: bool,
    pub walk: bool,
    pub hit_by_pitch: bool,
    pub double_play: bool,
    pub sacrifice: bool,
}

impl OutcomeFlags {
    pub fn hit_types(&self) -> u8 {
        [self.single, self.double, self.triple, self.home_run]
            .iter()
            .filter(|b| **b)
            .count() as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Primary {
    Strikeout,
    DoublePlay,
    HomeRun,
    Triple,
    Double,
    Single,
    Walk,
    HitByPitch,
    SacrificeFly,
    SacrificeBunt,
    GroundOut,
    FlyOut,
    OtherOut,
}

impl Primary {
    fn flags(self) -> OutcomeFlags {
        let mut f = OutcomeFlags::default();
        match self {
            Primary::Strikeout => f.strikeout = true,
            Primary::DoublePlay => f.double_play = true,
            Primary::HomeRun => {
                f.hit = true;
                f.home_run = true;
                f.rbi = 1;
            }
            Primary::Triple => {
                f.hit = true;
                f.triple = true;
            }
            Primary::Double => {
                f.hit = true;
                f.double = true;
            }
            Primary::Single => {
                f.hit = true;
                f.single = true;
            }
            Primary::Walk => f.walk = true,
            Primary::HitByPitch => f.hit_by_pitch = true,
            Primary::SacrificeFly => {
                f.sacrifice = true;
                f.rbi = 1;
            }
            Primary::SacrificeBunt => f.sacrifice = true,
            Primary::GroundOut => f.ground_out = true,
            Primary::FlyOut => f.fly_out = true,
            Primary::OtherOut => {}
        }
        f
    }
}

struct TextRule {
    name: &'static str,
    /// Substrings of the Japanese report wording.
    any_of: &'static [&'static str],
    /// English words and phrases, matched on word boundaries in the
    /// lower-cased text.
    words: &'static [&'static str],
    /// Whole ASCII abbreviations, compared case-sensitively.
    tokens: &'static [&'static str],
    /// Scorebook codes following a fielder position, e.g. `飛` in `中飛`.
    short: &'static [&'static str],
    primary: Primary,
}

impl Matcher<str, Primary> for TextRule {
    fn name(&self) -> &'static str {
        self.name
    }

    fn matches(&self, text: &str) -> Option<Primary> {
        let lower = text.to_lowercase();
        let hit = contains_any(text, self.any_of)
            || contains_word(&lower, self.words)
            || has_token(text, self.tokens)
            || scorebook_codes(text).any(|code| self.short.contains(&code));
        hit.then_some(self.primary)
    }
}

/// Codes of every `<position><code>` pair in `text`, e.g. `安` and `飛` in `中安 右飛`.
fn scorebook_codes(text: &str) -> impl Iterator<Item = &str> {
    SCOREBOOK_RE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
}

// Order matters: compound phrases must precede the shorter words they contain
// (ツーベースヒット before ヒット, 犠牲フライ before 犠牲 and フライ,
// "double play" before "double", "sacrifice fly" before "walk").
const OUTCOME_RULES: &[TextRule] = &[
    TextRule {
        name: "strikeout",
        any_of: &["三振", "振り逃げ"],
        words: &["strikeout", "struck out", "strikes out"],
        tokens: &["K", "SO"],
        short: &[],
        primary: Primary::Strikeout,
    },
    TextRule {
        name: "double_play",
        any_of: &["併殺", "ゲッツー"],
        words: &["double play", "double-play"],
        tokens: &["DP", "GDP"],
        short: &["併"],
        primary: Primary::DoublePlay,
    },
    TextRule {
        name: "triple_play",
        any_of: &["三重殺"],
        words: &["triple play"],
        tokens: &["TP"],
        short: &[],
        primary: Primary::OtherOut,
    },
    TextRule {
        name: "home_run",
        any_of: &["本塁打", "ホームラン"],
        words: &["home run", "homer", "homers", "homered"],
        tokens: &["HR"],
        short: &["本"],
        primary: Primary::HomeRun,
    },
    TextRule {
        name: "triple",
        any_of: &["三塁打", "スリーベース"],
        words: &["triple", "triples"],
        tokens: &["3B"],
        short: &["3", "３"],
        primary: Primary::Triple,
    },
    TextRule {
        name: "double",
        any_of: &["二塁打", "ツーベース"],
        words: &["double", "doubles", "ground-rule double"],
        tokens: &["2B"],
        short: &["2", "２"],
        primary: Primary::Double,
    },
    TextRule {
        name: "single",
        any_of: &["内野安打", "安打", "ヒット"],
        words: &["single", "singles", "singled", "infield hit"],
        tokens: &["1B"],
        short: &["安"],
        primary: Primary::Single,
    },
    TextRule {
        name: "sacrifice_fly",
        any_of: &["犠飛", "犠牲フライ"],
        words: &["sacrifice fly", "sac fly"],
        tokens: &["SF"],
        short: &["犠飛"],
        primary: Primary::SacrificeFly,
    },
    TextRule {
        name: "walk",
        any_of: &["四球", "フォアボール", "敬遠"],
        words: &["base on balls", "walk", "walks", "walked"],
        tokens: &["BB", "IBB"],
        short: &[],
        primary: Primary::Walk,
    },
    TextRule {
        name: "hit_by_pitch",
        any_of: &["死球", "デッドボール"],
        words: &["hit by pitch", "hit by a pitch"],
        tokens: &["HBP"],
        short: &[],
        primary: Primary::HitByPitch,
    },
    TextRule {
        name: "sacrifice_bunt",
        any_of: &["犠打", "犠牲バント", "犠牲"],
        words: &["sacrifice", "sacrifice bunt", "sac bunt"],
        tokens: &["SH"],
        short: &["犠"],
        primary: Primary::SacrificeBunt,
    },
    TextRule {
        name: "ground_out",
        any_of: &["ゴロ"],
        words: &["ground", "grounds", "grounded", "groundout", "ground out"],
        tokens: &["GO"],
        short: &["ゴ"],
        primary: Primary::GroundOut,
    },
    TextRule {
        name: "fly_out",
        any_of: &["フライ", "飛球"],
        words: &["fly", "flies", "flied", "flyout", "pop", "pops", "popped", "pop-up"],
        tokens: &["FO"],
        short: &["飛"],
        primary: Primary::FlyOut,
    },
    TextRule {
        name: "other_out",
        any_of: &["ライナー", "邪飛", "直", "アウト"],
        words: &["line", "lined", "lines", "liner", "lineout", "out", "outs"],
        tokens: &[],
        short: &["邪飛", "直"],
        primary: Primary::OtherOut,
    },
];

/// Interpret result text. `None` means the row does not describe a completed
/// plate appearance and is dropped.
pub fn interpret(text: &str) -> Option<OutcomeFlags> {
    let text = text.trim();
    if text.is_empty() || contains_any(text, INTERRUPTED) {
        return None;
    }

    let lower = text.to_lowercase();
    let on_error = contains_any(&lower, ERROR_MARKERS) || scorebook_codes(text).any(|code| code == "失");

    let mut flags = match first_match(OUTCOME_RULES, text) {
        Some((rule, primary)) => {
            trace!(rule, text, "result text matched");
            primary.flags()
        }
        None if on_error => OutcomeFlags::default(),
        None => return None,
    };

    if on_error {
        flags.reached_on_error = true;
    }
    if let Some(rbi) = explicit_rbi(text) {
        flags.rbi = rbi;
    }
    Some(flags)
}

fn explicit_rbi(text: &str) -> Option<u8> {
    if let Some(caps) = RBI_JA_RE.captures(text) {
        return caps[1].parse().ok();
    }
    let caps = RBI_EN_RE.captures(text)?;
    caps.get(1).or_else(|| caps.get(2))?.as_str().parse().ok()
}

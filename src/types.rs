use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::columns::{EmbeddingColumn, Feature, PitchColumn, Source};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum HalfInning {
    #[default]
    #[serde(rename = "Top")]
    Top,
    #[serde(rename = "Bot")]
    Bottom,
}

impl HalfInning {
    pub fn as_str(self) -> &'static str {
        match self {
            HalfInning::Top => "Top",
            HalfInning::Bottom => "Bot",
        }
    }
}

impl fmt::Display for HalfInning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HalfInning {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Top" => Ok(HalfInning::Top),
            "Bot" => Ok(HalfInning::Bottom),
            other => Err(Error::InvalidInput(format!("inning_topbot `{}`", other))),
        }
    }
}

/// One pitch, as published by Statcast. Field names follow the Statcast CSV
/// headers so the same struct reads both the download and the local table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PitchEvent {
    pub game_pk: i64,
    pub game_date: String,
    pub game_year: i64,
    pub game_type: String,
    pub home_team: String,
    pub away_team: String,
    pub inning: i64,
    pub inning_topbot: HalfInning,
    pub outs_when_up: i64,
    pub at_bat_number: i64,
    pub pitch_number: i64,
    pub pitcher: i64,
    pub batter: i64,
    pub stand: String,
    pub p_throws: String,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub events: Option<String>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub description: Option<String>,
    /// Outcome code: B (ball), S (strike), X (in play)
    #[serde(rename = "type", default, deserialize_with = "csv::invalid_option")]
    pub pitch_result: Option<String>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub pitch_type: Option<String>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub release_speed: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub release_spin_rate: Option<f64>,
    pub balls: i64,
    pub strikes: i64,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub on_1b: Option<i64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub on_2b: Option<i64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub on_3b: Option<i64>,
    pub bat_score: i64,
    pub fld_score: i64,
    pub post_bat_score: i64,
    pub post_fld_score: i64,
}

impl PitchEvent {
    /// Table columns in storage order, with their SQLite types.
    pub const COLUMNS: &'static [(&'static str, &'static str)] = &[
        ("game_pk", "INTEGER"),
        ("game_date", "TEXT"),
        ("game_year", "INTEGER"),
        ("game_type", "TEXT"),
        ("home_team", "TEXT"),
        ("away_team", "TEXT"),
        ("inning", "INTEGER"),
        ("inning_topbot", "TEXT"),
        ("outs_when_up", "INTEGER"),
        ("at_bat_number", "INTEGER"),
        ("pitch_number", "INTEGER"),
        ("pitcher", "INTEGER"),
        ("batter", "INTEGER"),
        ("stand", "TEXT"),
        ("p_throws", "TEXT"),
        ("events", "TEXT"),
        ("description", "TEXT"),
        ("type", "TEXT"),
        ("pitch_type", "TEXT"),
        ("release_speed", "REAL"),
        ("release_spin_rate", "REAL"),
        ("balls", "INTEGER"),
        ("strikes", "INTEGER"),
        ("on_1b", "INTEGER"),
        ("on_2b", "INTEGER"),
        ("on_3b", "INTEGER"),
        ("bat_score", "INTEGER"),
        ("fld_score", "INTEGER"),
        ("post_bat_score", "INTEGER"),
        ("post_fld_score", "INTEGER"),
    ];

    /// Team in the field: home team in the top half, away team in the bottom.
    pub fn pitcher_team(&self) -> &str {
        match self.inning_topbot {
            HalfInning::Top => &self.home_team,
            HalfInning::Bottom => &self.away_team,
        }
    }

    pub fn batter_team(&self) -> &str {
        match self.inning_topbot {
            HalfInning::Top => &self.away_team,
            HalfInning::Bottom => &self.home_team,
        }
    }

    /// Numeric view of a pitch column; `None` when the source field is null.
    pub fn value(&self, col: PitchColumn) -> Option<f64> {
        let flag = |b: bool| if b { 1.0 } else { 0.0 };
        let described = |names: &[&str]| {
            self.description
                .as_deref()
                .map(|d| flag(names.contains(&d)))
        };
        match col {
            PitchColumn::PitchNumber => Some(self.pitch_number as f64),
            PitchColumn::Balls => Some(self.balls as f64),
            PitchColumn::Strikes => Some(self.strikes as f64),
            PitchColumn::ReleaseSpeed => self.release_speed,
            PitchColumn::ReleaseSpinRate => self.release_spin_rate,
            PitchColumn::OutsWhenUp => Some(self.outs_when_up as f64),
            PitchColumn::BatScore => Some(self.bat_score as f64),
            PitchColumn::FldScore => Some(self.fld_score as f64),
            PitchColumn::PostBatScore => Some(self.post_bat_score as f64),
            PitchColumn::PostFldScore => Some(self.post_fld_score as f64),
            PitchColumn::OnFirst => Some(flag(self.on_1b.is_some())),
            PitchColumn::OnSecond => Some(flag(self.on_2b.is_some())),
            PitchColumn::OnThird => Some(flag(self.on_3b.is_some())),
            PitchColumn::Ball => self.pitch_result.as_deref().map(|t| flag(t == "B")),
            PitchColumn::Strike => self.pitch_result.as_deref().map(|t| flag(t == "S")),
            PitchColumn::InPlay => self.pitch_result.as_deref().map(|t| flag(t == "X")),
            PitchColumn::SwingingStrike => {
                described(&["swinging_strike", "swinging_strike_blocked", "missed_bunt"])
            }
            PitchColumn::CalledStrike => described(&["called_strike"]),
            PitchColumn::Foul => described(&["foul", "foul_tip", "foul_bunt"]),
        }
    }
}

/// Identifies one start: a (game, starting pitcher) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StartKey {
    pub game_pk: i64,
    pub pitcher: i64,
    pub game_year: i64,
}

/// All pitches of one batter's turn, reduced to a single row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlateAppearance {
    pub game_pk: i64,
    pub game_date: String,
    pub game_year: i64,
    pub game_type: String,
    pub at_bat_number: i64,
    pub inning: i64,
    pub half: HalfInning,
    pub pitcher: i64,
    pub batter: i64,
    pub pitcher_team: String,
    pub batter_team: String,
    pub stand: String,
    pub p_throws: String,
    /// Outcome of the appearance, taken from its final pitch
    pub events: Option<String>,
    pub outs_before: i64,
    pub outs_after: i64,
    pub batters_faced: i64,
    /// Last appearance before the starter was removed
    pub pulled: bool,
    pub aggregates: BTreeMap<PitchColumn, f64>,
    pub features: BTreeMap<Feature, f64>,
}

impl PlateAppearance {
    pub fn start_key(&self) -> StartKey {
        StartKey {
            game_pk: self.game_pk,
            pitcher: self.pitcher,
            game_year: self.game_year,
        }
    }

    pub fn get(&self, source: Source) -> Option<f64> {
        match source {
            Source::Pitch(c) => self.aggregates.get(&c).copied(),
            Source::Feature(Feature::Inning) => Some(self.inning as f64),
            Source::Feature(Feature::OutsBefore) => Some(self.outs_before as f64),
            Source::Feature(Feature::OutsAfter) => Some(self.outs_after as f64),
            Source::Feature(Feature::BattersFaced) => Some(self.batters_faced as f64),
            Source::Feature(f) => self.features.get(&f).copied(),
        }
    }

    pub fn category(&self, col: EmbeddingColumn) -> String {
        match col {
            EmbeddingColumn::Pitcher => self.pitcher.to_string(),
            EmbeddingColumn::Batter => self.batter.to_string(),
            EmbeddingColumn::PitcherTeam => self.pitcher_team.clone(),
            EmbeddingColumn::BatterTeam => self.batter_team.clone(),
            EmbeddingColumn::Stand => self.stand.clone(),
            EmbeddingColumn::PThrows => self.p_throws.clone(),
            EmbeddingColumn::GameType => self.game_type.clone(),
        }
    }
}

/// Chronological plate appearances of one start.
#[derive(Debug, Clone, PartialEq)]
pub struct StartSequence {
    pub key: StartKey,
    pub appearances: Vec<PlateAppearance>,
}

impl StartSequence {
    pub fn len(&self) -> usize {
        self.appearances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.appearances.is_empty()
    }

    /// Position of the appearance after which the pitcher was pulled.
    pub fn pull_index(&self) -> Option<usize> {
        self.appearances.iter().position(|pa| pa.pulled)
    }
}

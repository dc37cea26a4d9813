//! Column vocabularies used by the aggregation plan, the feature steps and
//! the model inputs.
//!
//! Every column is a closed enum with a stable snake_case name so that
//! configuration files and persisted preprocessors can refer to columns by
//! name while unknown names are rejected at load time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

macro_rules! named_columns {
    ($(#[$meta:meta])* $name:ident, $kind:literal { $($variant:ident => $label:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn name(self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                $name::ALL
                    .iter()
                    .copied()
                    .find(|c| c.name() == s)
                    .ok_or_else(|| Error::Config(format!("unknown {} `{}`", $kind, s)))
            }
        }

        impl TryFrom<String> for $name {
            type Error = Error;

            fn try_from(s: String) -> Result<Self> {
                s.parse()
            }
        }

        impl From<$name> for String {
            fn from(c: $name) -> String {
                c.name().to_string()
            }
        }
    };
}

named_columns! {
    /// Numeric pitch-level columns that can be reduced to one value per
    /// plate appearance.
    PitchColumn, "pitch column" {
        PitchNumber => "pitch_number",
        Balls => "balls",
        Strikes => "strikes",
        ReleaseSpeed => "release_speed",
        ReleaseSpinRate => "release_spin_rate",
        OutsWhenUp => "outs_when_up",
        BatScore => "bat_score",
        FldScore => "fld_score",
        PostBatScore => "post_bat_score",
        PostFldScore => "post_fld_score",
        OnFirst => "on_1b",
        OnSecond => "on_2b",
        OnThird => "on_3b",
        Ball => "ball",
        Strike => "strike",
        InPlay => "in_play",
        SwingingStrike => "swinging_strike",
        CalledStrike => "called_strike",
        Foul => "foul",
    }
}

named_columns! {
    /// Appearance-level columns. The first four are filled in by the
    /// aggregator itself, the rest by the feature steps.
    Feature, "feature" {
        Inning => "inning",
        OutsBefore => "outs_before",
        OutsAfter => "outs_after",
        BattersFaced => "batters_faced",
        Strikeout => "strikeout",
        Walk => "walk",
        Hit => "hit",
        HomeRun => "home_run",
        RunsAllowed => "runs_allowed",
        ScoreDiff => "score_diff",
        OutsRecorded => "outs_recorded",
        RunnersOn => "runners_on",
        PitchCount => "pitch_count",
        CumStrikeouts => "cum_strikeouts",
        CumWalks => "cum_walks",
        CumHits => "cum_hits",
        CumHomeRuns => "cum_home_runs",
        CumRunsAllowed => "cum_runs_allowed",
        CumOutsRecorded => "cum_outs_recorded",
        CumSwingingStrikes => "cum_swinging_strikes",
        TimesThroughOrder => "times_through_order",
    }
}

impl Feature {
    /// Columns available before any feature step runs.
    pub fn is_base(self) -> bool {
        matches!(
            self,
            Feature::Inning | Feature::OutsBefore | Feature::OutsAfter | Feature::BattersFaced
        )
    }
}

named_columns! {
    /// Categorical columns fed to the model's embedding layers.
    EmbeddingColumn, "embedding column" {
        Pitcher => "pitcher",
        Batter => "batter",
        PitcherTeam => "pitcher_team",
        BatterTeam => "batter_team",
        Stand => "stand",
        PThrows => "p_throws",
        GameType => "game_type",
    }
}

/// A numeric column readable from a plate appearance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Source {
    Pitch(PitchColumn),
    Feature(Feature),
}

impl Source {
    pub fn name(self) -> &'static str {
        match self {
            Source::Pitch(c) => c.name(),
            Source::Feature(f) => f.name(),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Source {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if let Ok(f) = s.parse::<Feature>() {
            return Ok(Source::Feature(f));
        }
        s.parse::<PitchColumn>()
            .map(Source::Pitch)
            .map_err(|_| Error::Config(format!("unknown column `{}`", s)))
    }
}

impl TryFrom<String> for Source {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Source> for String {
    fn from(s: Source) -> String {
        s.name().to_string()
    }
}

/// How the pitches of one plate appearance are reduced to a single value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggKind {
    Last,
    Sum,
    Max,
    First,
}

impl AggKind {
    /// Reduce the non-null values in pitch order. `None` when there are none.
    pub fn apply<I>(self, values: I) -> Option<f64>
    where
        I: IntoIterator<Item = f64>,
    {
        let mut it = values.into_iter();
        let first = it.next()?;
        Some(match self {
            AggKind::First => first,
            AggKind::Last => it.last().unwrap_or(first),
            AggKind::Sum => it.fold(first, |acc, v| acc + v),
            AggKind::Max => it.fold(first, f64::max),
        })
    }
}

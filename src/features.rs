//! Appearance-level feature derivation.
//!
//! Features are produced by a fixed, ordered list of steps. A step may only
//! read aggregated pitch columns, the base appearance columns, or features
//! written by an earlier step; `FeaturePlan::new` checks this up front so a
//! misordered plan never reaches the data.

use std::collections::{BTreeSet, HashMap};
use tracing::debug;

use crate::columns::{Feature, PitchColumn, Source};
use crate::error::{Error, Result};
use crate::processing::AggregationPlan;
use crate::types::PlateAppearance;

#[derive(Debug, Clone, PartialEq)]
pub enum FeatureStep {
    /// 1.0 when the appearance's event is one of `events`
    Indicator {
        events: &'static [&'static str],
        out: Feature,
    },
    Difference {
        minuend: Source,
        subtrahend: Source,
        out: Feature,
    },
    Total {
        sources: &'static [Source],
        out: Feature,
    },
    /// Running sum within the (game, pitcher) start
    Accumulate { source: Source, out: Feature },
    /// Earlier appearances of the same batter against the same pitcher
    TimesThroughOrder { out: Feature },
}

impl FeatureStep {
    pub fn reads(&self) -> Vec<Source> {
        match self {
            FeatureStep::Indicator { .. } | FeatureStep::TimesThroughOrder { .. } => Vec::new(),
            FeatureStep::Difference {
                minuend,
                subtrahend,
                ..
            } => vec![*minuend, *subtrahend],
            FeatureStep::Total { sources, .. } => sources.to_vec(),
            FeatureStep::Accumulate { source, .. } => vec![*source],
        }
    }

    pub fn output(&self) -> Feature {
        match self {
            FeatureStep::Indicator { out, .. }
            | FeatureStep::Difference { out, .. }
            | FeatureStep::Total { out, .. }
            | FeatureStep::Accumulate { out, .. }
            | FeatureStep::TimesThroughOrder { out } => *out,
        }
    }
}

const fn pitch(c: PitchColumn) -> Source {
    Source::Pitch(c)
}

const fn feature(f: Feature) -> Source {
    Source::Feature(f)
}

pub const STANDARD_STEPS: &[FeatureStep] = &[
    FeatureStep::Indicator {
        events: &["strikeout", "strikeout_double_play"],
        out: Feature::Strikeout,
    },
    FeatureStep::Indicator {
        events: &["walk", "intent_walk"],
        out: Feature::Walk,
    },
    FeatureStep::Indicator {
        events: &["single", "double", "triple", "home_run"],
        out: Feature::Hit,
    },
    FeatureStep::Indicator {
        events: &["home_run"],
        out: Feature::HomeRun,
    },
    FeatureStep::Difference {
        minuend: pitch(PitchColumn::PostBatScore),
        subtrahend: pitch(PitchColumn::BatScore),
        out: Feature::RunsAllowed,
    },
    FeatureStep::Difference {
        minuend: pitch(PitchColumn::FldScore),
        subtrahend: pitch(PitchColumn::BatScore),
        out: Feature::ScoreDiff,
    },
    FeatureStep::Difference {
        minuend: feature(Feature::OutsAfter),
        subtrahend: feature(Feature::OutsBefore),
        out: Feature::OutsRecorded,
    },
    FeatureStep::Total {
        sources: &[
            pitch(PitchColumn::OnFirst),
            pitch(PitchColumn::OnSecond),
            pitch(PitchColumn::OnThird),
        ],
        out: Feature::RunnersOn,
    },
    FeatureStep::Accumulate {
        source: pitch(PitchColumn::PitchNumber),
        out: Feature::PitchCount,
    },
    FeatureStep::Accumulate {
        source: feature(Feature::Strikeout),
        out: Feature::CumStrikeouts,
    },
    FeatureStep::Accumulate {
        source: feature(Feature::Walk),
        out: Feature::CumWalks,
    },
    FeatureStep::Accumulate {
        source: feature(Feature::Hit),
        out: Feature::CumHits,
    },
    FeatureStep::Accumulate {
        source: feature(Feature::HomeRun),
        out: Feature::CumHomeRuns,
    },
    FeatureStep::Accumulate {
        source: feature(Feature::RunsAllowed),
        out: Feature::CumRunsAllowed,
    },
    FeatureStep::Accumulate {
        source: feature(Feature::OutsRecorded),
        out: Feature::CumOutsRecorded,
    },
    FeatureStep::Accumulate {
        source: pitch(PitchColumn::SwingingStrike),
        out: Feature::CumSwingingStrikes,
    },
    FeatureStep::TimesThroughOrder {
        out: Feature::TimesThroughOrder,
    },
];

/// A validated, ordered list of feature steps.
#[derive(Debug, Clone, PartialEq)]
pub struct FeaturePlan {
    steps: Vec<FeatureStep>,
}

impl FeaturePlan {
    pub fn new(steps: Vec<FeatureStep>, aggregation: &AggregationPlan) -> Result<Self> {
        let mut written: BTreeSet<Feature> = Feature::ALL.iter().copied().filter(|f| f.is_base()).collect();
        for (i, step) in steps.iter().enumerate() {
            for source in step.reads() {
                let available = match source {
                    Source::Pitch(c) => aggregation.contains(c),
                    Source::Feature(f) => written.contains(&f),
                };
                if !available {
                    return Err(Error::Config(format!(
                        "feature step {} ({}) reads `{}` before it is available",
                        i,
                        step.output(),
                        source
                    )));
                }
            }
            if !written.insert(step.output()) {
                return Err(Error::Config(format!(
                    "feature `{}` is written more than once",
                    step.output()
                )));
            }
        }
        Ok(Self { steps })
    }

    pub fn standard(aggregation: &AggregationPlan) -> Result<Self> {
        Self::new(STANDARD_STEPS.to_vec(), aggregation)
    }

    pub fn steps(&self) -> &[FeatureStep] {
        &self.steps
    }

    /// Whether `f` exists once the plan has run.
    pub fn provides(&self, f: Feature) -> bool {
        f.is_base() || self.steps.iter().any(|s| s.output() == f)
    }
}

impl Default for FeaturePlan {
    fn default() -> Self {
        Self {
            steps: STANDARD_STEPS.to_vec(),
        }
    }
}

/// Apply every step, in order, to appearances ordered by game then at-bat.
/// Null inputs count as zero.
pub fn feature_engineering(appearances: &mut [PlateAppearance], plan: &FeaturePlan) {
    for step in plan.steps() {
        let out = step.output();
        match step {
            FeatureStep::Indicator { events, .. } => {
                for pa in appearances.iter_mut() {
                    let hit = pa.events.as_deref().map_or(false, |e| events.contains(&e));
                    pa.features.insert(out, if hit { 1.0 } else { 0.0 });
                }
            }
            FeatureStep::Difference {
                minuend,
                subtrahend,
                ..
            } => {
                for pa in appearances.iter_mut() {
                    let v = pa.get(*minuend).unwrap_or(0.0) - pa.get(*subtrahend).unwrap_or(0.0);
                    pa.features.insert(out, v);
                }
            }
            FeatureStep::Total { sources, .. } => {
                for pa in appearances.iter_mut() {
                    let v = sources.iter().map(|s| pa.get(*s).unwrap_or(0.0)).sum::<f64>();
                    pa.features.insert(out, v);
                }
            }
            FeatureStep::Accumulate { source, .. } => {
                let mut running: HashMap<(i64, i64), f64> = HashMap::new();
                for pa in appearances.iter_mut() {
                    let acc = running.entry((pa.game_pk, pa.pitcher)).or_insert(0.0);
                    *acc += pa.get(*source).unwrap_or(0.0);
                    pa.features.insert(out, *acc);
                }
            }
            FeatureStep::TimesThroughOrder { .. } => {
                let mut seen: HashMap<(i64, i64, i64), u32> = HashMap::new();
                for pa in appearances.iter_mut() {
                    let n = seen.entry((pa.game_pk, pa.pitcher, pa.batter)).or_insert(0);
                    pa.features.insert(out, *n as f64);
                    *n += 1;
                }
            }
        }
        debug!("feature {} computed for {} appearances", out, appearances.len());
    }
}

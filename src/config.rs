use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::columns::{EmbeddingColumn, Feature, PitchColumn, Source};
use crate::error::{Error, Result};
use crate::features::FeaturePlan;
use crate::processing::{AggregationPlan, CleanOptions};

/// On-disk shape of the pipeline configuration. Every field is optional.
#[derive(Deserialize, Debug)]
#[serde(default, deny_unknown_fields)]
struct PipelineFile {
    at_bat_aggs: AggregationPlan,
    feature_cols: Vec<Source>,
    embedding_cols: Vec<EmbeddingColumn>,
    game_types: Vec<String>,
    al_only: bool,
    val_fraction: f64,
    seed: u64,
}

impl Default for PipelineFile {
    fn default() -> Self {
        let clean = CleanOptions::default();
        let split = SplitOptions::default();
        Self {
            at_bat_aggs: AggregationPlan::standard(),
            feature_cols: default_feature_cols(),
            embedding_cols: default_embedding_cols(),
            game_types: clean.game_types,
            al_only: clean.al_only,
            val_fraction: split.val_fraction,
            seed: split.seed,
        }
    }
}

fn default_feature_cols() -> Vec<Source> {
    let features = [
        Feature::Inning,
        Feature::OutsBefore,
        Feature::BattersFaced,
        Feature::PitchCount,
        Feature::TimesThroughOrder,
        Feature::ScoreDiff,
        Feature::RunnersOn,
        Feature::CumStrikeouts,
        Feature::CumWalks,
        Feature::CumHits,
        Feature::CumHomeRuns,
        Feature::CumRunsAllowed,
        Feature::CumOutsRecorded,
        Feature::CumSwingingStrikes,
    ];
    let pitches = [
        PitchColumn::PitchNumber,
        PitchColumn::Balls,
        PitchColumn::Strikes,
        PitchColumn::ReleaseSpeed,
    ];
    features
        .into_iter()
        .map(Source::Feature)
        .chain(pitches.into_iter().map(Source::Pitch))
        .collect()
}

fn default_embedding_cols() -> Vec<EmbeddingColumn> {
    vec![
        EmbeddingColumn::Pitcher,
        EmbeddingColumn::Batter,
        EmbeddingColumn::PitcherTeam,
        EmbeddingColumn::BatterTeam,
    ]
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitOptions {
    /// Share of starts held out for validation
    pub val_fraction: f64,
    pub seed: u64,
}

impl Default for SplitOptions {
    fn default() -> Self {
        Self {
            val_fraction: 0.2,
            seed: 42,
        }
    }
}

/// Validated pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub aggregation: AggregationPlan,
    pub features: FeaturePlan,
    pub feature_cols: Vec<Source>,
    pub embedding_cols: Vec<EmbeddingColumn>,
    pub clean: CleanOptions,
    pub split: SplitOptions,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let file = PipelineFile::default();
        Self {
            aggregation: file.at_bat_aggs,
            features: FeaturePlan::default(),
            feature_cols: file.feature_cols,
            embedding_cols: file.embedding_cols,
            clean: CleanOptions::default(),
            split: SplitOptions::default(),
        }
    }
}

impl PipelineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_json(&text)
    }

    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let file: PipelineFile =
            serde_json::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        Self::validate(file)
    }

    fn validate(file: PipelineFile) -> Result<Self> {
        let features = FeaturePlan::standard(&file.at_bat_aggs)?;

        if file.feature_cols.is_empty() {
            return Err(Error::Config("feature_cols is empty".into()));
        }
        let mut seen = BTreeSet::new();
        for col in &file.feature_cols {
            if !seen.insert(*col) {
                return Err(Error::Config(format!("feature column `{}` listed twice", col)));
            }
            let available = match col {
                Source::Pitch(c) => file.at_bat_aggs.contains(*c),
                Source::Feature(f) => features.provides(*f),
            };
            if !available {
                return Err(Error::Config(format!(
                    "feature column `{}` has no aggregation rule",
                    col
                )));
            }
        }

        let unique: BTreeSet<_> = file.embedding_cols.iter().collect();
        if unique.len() != file.embedding_cols.len() {
            return Err(Error::Config("embedding_cols contains duplicates".into()));
        }
        if !(0.0..1.0).contains(&file.val_fraction) {
            return Err(Error::Config(format!(
                "val_fraction must be in [0, 1), got {}",
                file.val_fraction
            )));
        }

        Ok(Self {
            aggregation: file.at_bat_aggs,
            features,
            feature_cols: file.feature_cols,
            embedding_cols: file.embedding_cols,
            clean: CleanOptions {
                game_types: file.game_types,
                al_only: file.al_only,
            },
            split: SplitOptions {
                val_fraction: file.val_fraction,
                seed: file.seed,
            },
        })
    }
}

/// Dashboard settings, read from the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub db_path: PathBuf,
    pub preprocessors_path: PathBuf,
    pub model_path: PathBuf,
    pub pipeline_config: Option<PathBuf>,
    pub port: u16,
}

impl ServerConfig {
    /// Environment variables:
    /// - `DB_PATH` (default: ./data/raw/statcast_pitches.db)
    /// - `PREPROCESSORS_PATH` (default: ./data/processed/preprocessors.json)
    /// - `MODEL_PATH` (required)
    /// - `PIPELINE_CONFIG` (optional)
    /// - `PORT` (default: 8501)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let model_path = get("MODEL_PATH").ok_or_else(|| Error::Config("MODEL_PATH not set".into()))?;
        let port = match get("PORT") {
            Some(p) => p
                .parse()
                .map_err(|_| Error::Config(format!("PORT `{}` is not a port number", p)))?,
            None => 8501,
        };
        Ok(Self {
            db_path: get("DB_PATH")
                .unwrap_or_else(|| "./data/raw/statcast_pitches.db".to_string())
                .into(),
            preprocessors_path: get("PREPROCESSORS_PATH")
                .unwrap_or_else(|| "./data/processed/preprocessors.json".to_string())
                .into(),
            model_path: model_path.into(),
            pipeline_config: get("PIPELINE_CONFIG").map(PathBuf::from),
            port,
        })
    }
}

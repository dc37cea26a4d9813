//! Plate appearances to model inputs: per-start sequences, categorical ids,
//! z-scored features, targets and front-padded batches.
//!
//! Fitting and transforming are separate calls. `Mappers::fit` and
//! `StandardScaler::fit` run once on training starts; the resulting values are
//! immutable and shared by every later transform, including inference.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracing::{info, warn};

use crate::batch::{stack_into_df, PaddedBatch};
use crate::columns::{EmbeddingColumn, Source};
use crate::config::{PipelineConfig, SplitOptions};
use crate::error::{Error, Result};
use crate::types::{PlateAppearance, StartKey, StartSequence};

/// Id written into padded embedding positions.
pub const PAD_ID: i64 = 0;
/// Id for categories never seen while fitting.
pub const UNKNOWN_ID: i64 = 1;

/// Group appearances into starts, ordered by game then pitcher. Appearance
/// order inside a start is preserved.
pub fn get_starts(appearances: Vec<PlateAppearance>) -> Vec<StartSequence> {
    let mut starts: BTreeMap<(i64, i64), StartSequence> = BTreeMap::new();
    for pa in appearances {
        let key = pa.start_key();
        starts
            .entry((key.game_pk, key.pitcher))
            .or_insert_with(|| StartSequence {
                key,
                appearances: Vec::new(),
            })
            .appearances
            .push(pa);
    }
    starts.into_values().filter(|s| !s.is_empty()).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryMapper {
    pub column: EmbeddingColumn,
    ids: BTreeMap<String, i64>,
}

impl CategoryMapper {
    /// Ids are handed out in first-seen order, starting after the reserved ids.
    pub fn fit<I>(column: EmbeddingColumn, values: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut ids = BTreeMap::new();
        for v in values {
            let next = UNKNOWN_ID + 1 + ids.len() as i64;
            ids.entry(v).or_insert(next);
        }
        Self { column, ids }
    }

    pub fn encode(&self, value: &str) -> i64 {
        self.ids.get(value).copied().unwrap_or(UNKNOWN_ID)
    }

    /// Embedding table size, reserved ids included.
    pub fn vocab_size(&self) -> usize {
        self.ids.len() + 2
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mappers(Vec<CategoryMapper>);

impl Mappers {
    pub fn fit(starts: &[StartSequence], cols: &[EmbeddingColumn]) -> Self {
        Self(
            cols.iter()
                .map(|&col| {
                    CategoryMapper::fit(
                        col,
                        starts
                            .iter()
                            .flat_map(|s| &s.appearances)
                            .map(|pa| pa.category(col)),
                    )
                })
                .collect(),
        )
    }

    pub fn columns(&self) -> Vec<EmbeddingColumn> {
        self.0.iter().map(|m| m.column).collect()
    }

    pub fn get(&self, col: EmbeddingColumn) -> Option<&CategoryMapper> {
        self.0.iter().find(|m| m.column == col)
    }

    pub fn vocab_sizes(&self) -> Vec<usize> {
        self.0.iter().map(CategoryMapper::vocab_size).collect()
    }
}

/// Per-step embedding ids for every start, in mapper column order.
pub fn encode_embedding_cols(starts: &[StartSequence], mappers: &Mappers) -> Vec<Vec<Vec<i64>>> {
    starts
        .iter()
        .map(|s| {
            s.appearances
                .iter()
                .map(|pa| {
                    mappers
                        .0
                        .iter()
                        .map(|m| m.encode(&pa.category(m.column)))
                        .collect()
                })
                .collect()
        })
        .collect()
}

/// Raw numeric feature rows of one start; nulls become 0.
pub fn numeric_rows(start: &StartSequence, cols: &[Source]) -> Vec<Vec<f64>> {
    start
        .appearances
        .iter()
        .map(|pa| cols.iter().map(|c| pa.get(*c).unwrap_or(0.0)).collect())
        .collect()
}

/// Z-score statistics per feature column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub columns: Vec<Source>,
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl StandardScaler {
    /// Population mean and standard deviation over every step of every
    /// start. Constant columns get a scale of 1.
    pub fn fit(starts: &[StartSequence], cols: &[Source]) -> Self {
        let width = cols.len();
        let mut n = 0usize;
        let mut sum = vec![0.0; width];
        let mut sum_sq = vec![0.0; width];
        for start in starts {
            for row in numeric_rows(start, cols) {
                n += 1;
                for (j, v) in row.iter().enumerate() {
                    sum[j] += v;
                    sum_sq[j] += v * v;
                }
            }
        }
        let (mean, scale) = if n == 0 {
            (vec![0.0; width], vec![1.0; width])
        } else {
            let nf = n as f64;
            let mean: Vec<f64> = sum.iter().map(|s| s / nf).collect();
            let scale = sum_sq
                .iter()
                .zip(&mean)
                .map(|(sq, m)| {
                    let var = (sq / nf - m * m).max(0.0);
                    let std = var.sqrt();
                    if std > f64::EPSILON && std.is_finite() {
                        std
                    } else {
                        1.0
                    }
                })
                .collect();
            (mean, scale)
        };
        Self {
            columns: cols.to_vec(),
            mean,
            scale,
        }
    }

    fn check_widths(&self) -> Result<()> {
        let n = self.columns.len();
        if self.mean.len() != n || self.scale.len() != n {
            return Err(Error::Config(format!(
                "scaler has {} columns but {} means and {} scales",
                n,
                self.mean.len(),
                self.scale.len()
            )));
        }
        Ok(())
    }

    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    pub fn scale(&self) -> &[f64] {
        &self.scale
    }

    pub fn transform_row(&self, row: &[f64]) -> Vec<f32> {
        row.iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(v, (m, s))| ((v - m) / s) as f32)
            .collect()
    }
}

/// Scaled feature steps for every start using fitted statistics.
pub fn scale(starts: &[StartSequence], scaler: &StandardScaler) -> Vec<Vec<Vec<f32>>> {
    starts
        .iter()
        .map(|s| {
            numeric_rows(s, &scaler.columns)
                .iter()
                .map(|row| scaler.transform_row(row))
                .collect()
        })
        .collect()
}

/// One target per step: 1.0 on the appearance the pitcher was pulled after.
pub fn add_targets(starts: &[StartSequence]) -> Vec<Vec<Vec<f32>>> {
    starts
        .iter()
        .map(|s| {
            s.appearances
                .iter()
                .map(|pa| vec![if pa.pulled { 1.0 } else { 0.0 }])
                .collect()
        })
        .collect()
}

/// Seeded random validation flags, one per start.
pub fn add_val_flags(n: usize, val_fraction: f64, seed: u64) -> Vec<bool> {
    let mut order: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    order.shuffle(&mut rng);
    let n_val = ((n as f64) * val_fraction).round() as usize;
    let mut flags = vec![false; n];
    for &i in order.iter().take(n_val) {
        flags[i] = true;
    }
    flags
}

/// Train and validation starts, in input order. The same starts and split
/// options always give the same partition.
pub fn split_starts(starts: &[StartSequence], split: &SplitOptions) -> (Vec<StartSequence>, Vec<StartSequence>) {
    let flags = add_val_flags(starts.len(), split.val_fraction, split.seed);
    let mut train = Vec::new();
    let mut val = Vec::new();
    for (start, is_val) in starts.iter().zip(&flags) {
        if *is_val {
            val.push(start.clone());
        } else {
            train.push(start.clone());
        }
    }
    (train, val)
}

/// Everything fitted on training data that inference needs to reproduce
/// the same inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preprocessors {
    pub mappers: Mappers,
    pub scaler: StandardScaler,
}

impl Preprocessors {
    pub fn fit(starts: &[StartSequence], feature_cols: &[Source], embedding_cols: &[EmbeddingColumn]) -> Self {
        Self {
            mappers: Mappers::fit(starts, embedding_cols),
            scaler: StandardScaler::fit(starts, feature_cols),
        }
    }

    pub fn feature_cols(&self) -> &[Source] {
        &self.scaler.columns
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::create(path.as_ref())?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(())
    }

    /// Read a saved bundle. Scaler statistics must line up with its columns.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let prep: Self = serde_json::from_reader(BufReader::new(file))?;
        prep.scaler.check_widths().map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("{}: {}", path.display(), msg)),
            other => other,
        })?;
        Ok(prep)
    }
}

/// Model-ready tensors for a set of starts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelInputs {
    pub keys: Vec<StartKey>,
    /// `(batch, max_len, feature_cols)`
    pub features: PaddedBatch<f32>,
    /// `(batch, max_len, embedding_cols)`
    pub embeddings: PaddedBatch<i64>,
    /// `(batch, max_len, 1)`
    pub targets: PaddedBatch<f32>,
}

impl ModelInputs {
    pub fn empty() -> Self {
        Self {
            keys: Vec::new(),
            features: PaddedBatch::empty(),
            embeddings: PaddedBatch::empty(),
            targets: PaddedBatch::empty(),
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            keys: indices.iter().map(|&i| self.keys[i]).collect(),
            features: self.features.select(indices),
            embeddings: self.embeddings.select(indices),
            targets: self.targets.select(indices),
        }
    }

    /// Shuffled mini-batches, each padded to its own longest start.
    pub fn batches(&self, batch_size: usize, seed: u64) -> Vec<ModelInputs> {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.shuffle(&mut StdRng::seed_from_u64(seed));
        order
            .chunks(batch_size.max(1))
            .map(|chunk| self.select(chunk))
            .collect()
    }
}

fn assemble(starts: &[StartSequence], preprocessors: &Preprocessors) -> ModelInputs {
    if starts.is_empty() {
        return ModelInputs::empty();
    }
    ModelInputs {
        keys: starts.iter().map(|s| s.key).collect(),
        features: stack_into_df(&scale(starts, &preprocessors.scaler)),
        embeddings: stack_into_df(&encode_embedding_cols(starts, &preprocessors.mappers)),
        targets: stack_into_df(&add_targets(starts)),
    }
}

#[derive(Debug, Clone)]
pub struct PreparedData {
    pub train: ModelInputs,
    pub val: ModelInputs,
    pub preprocessors: Preprocessors,
}

/// Split starts, fit preprocessors on the training side and build inputs for
/// both sides. The returned preprocessors are what inference must reuse.
pub fn prep_data_for_modeling(starts: &[StartSequence], config: &PipelineConfig) -> PreparedData {
    if starts.is_empty() {
        warn!("no sequences to prepare");
    }
    let (train, val) = split_starts(starts, &config.split);
    let preprocessors = Preprocessors::fit(&train, &config.feature_cols, &config.embedding_cols);
    let train = assemble(&train, &preprocessors);
    let val = assemble(&val, &preprocessors);
    info!(
        "prepared {} train / {} val starts; feature shape {:?}",
        train.len(),
        val.len(),
        train.features.shape()
    );
    PreparedData {
        train,
        val,
        preprocessors,
    }
}

/// Build inputs with already fitted preprocessors; nothing is refit.
pub fn prep_data_for_inference(starts: &[StartSequence], preprocessors: &Preprocessors) -> ModelInputs {
    assemble(starts, preprocessors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns::{Feature, PitchColumn};

    fn start(game_pk: i64, pitcher: i64, batters: &[i64]) -> StartSequence {
        let appearances: Vec<PlateAppearance> = batters
            .iter()
            .enumerate()
            .map(|(i, &batter)| {
                let mut pa = PlateAppearance {
                    game_pk,
                    game_year: 2019,
                    pitcher,
                    batter,
                    at_bat_number: i as i64 + 1,
                    inning: 1 + i as i64 / 3,
                    batters_faced: i as i64 + 1,
                    pitcher_team: "CLE".into(),
                    batter_team: "MIN".into(),
                    pulled: i + 1 == batters.len(),
                    ..Default::default()
                };
                pa.aggregates.insert(PitchColumn::PitchNumber, 3.0 + i as f64);
                pa
            })
            .collect();
        StartSequence {
            key: appearances[0].start_key(),
            appearances,
        }
    }

    #[test]
    fn test_get_starts_groups_interleaved_rows() {
        let mut rows = Vec::new();
        for ab in 1..=4 {
            rows.push(PlateAppearance {
                game_pk: 1,
                at_bat_number: ab,
                pitcher: if ab % 2 == 0 { 20 } else { 10 },
                ..Default::default()
            });
        }
        let starts = get_starts(rows);
        assert_eq!(starts.len(), 2);
        assert_eq!(starts[0].key.pitcher, 10);
        let abs: Vec<i64> = starts[1].appearances.iter().map(|p| p.at_bat_number).collect();
        assert_eq!(abs, vec![2, 4]);
    }

    #[test]
    fn test_mapper_ids_first_seen_order() {
        let m = CategoryMapper::fit(
            EmbeddingColumn::BatterTeam,
            ["NYY", "BOS", "NYY", "TB"].map(String::from),
        );
        assert_eq!(m.encode("NYY"), 2);
        assert_eq!(m.encode("BOS"), 3);
        assert_eq!(m.encode("TB"), 4);
        assert_eq!(m.encode("SEA"), UNKNOWN_ID);
        assert_eq!(m.vocab_size(), 5);
    }

    #[test]
    fn test_fit_then_encode_is_stable() {
        let starts = vec![start(1, 10, &[1, 2, 3]), start(2, 11, &[3, 4])];
        let cols = [EmbeddingColumn::Pitcher, EmbeddingColumn::Batter];
        let mappers = Mappers::fit(&starts, &cols);
        let first = encode_embedding_cols(&starts, &mappers);
        let second = encode_embedding_cols(&starts, &mappers.clone());
        assert_eq!(first, second);
        assert_eq!(first[0][0], vec![2, 2]);
        assert_eq!(first[1][0], vec![3, 4]);

        let unseen = vec![start(3, 99, &[1, 77])];
        let codes = encode_embedding_cols(&unseen, &mappers);
        assert_eq!(codes[0], vec![vec![UNKNOWN_ID, 2], vec![UNKNOWN_ID, UNKNOWN_ID]]);
    }

    #[test]
    fn test_scaler_fit_and_transform() {
        let starts = vec![start(1, 10, &[1, 2, 3, 4])];
        let cols = [
            Source::Pitch(PitchColumn::PitchNumber),
            Source::Feature(Feature::OutsBefore),
        ];
        let scaler = StandardScaler::fit(&starts, &cols);
        // pitch numbers 3,4,5,6
        assert!((scaler.mean()[0] - 4.5).abs() < 1e-9);
        assert!((scaler.scale()[0] - 1.25f64.sqrt()).abs() < 1e-9);
        // constant column
        assert_eq!(scaler.scale()[1], 1.0);

        let scaled = scale(&starts, &scaler);
        let col: Vec<f32> = scaled[0].iter().map(|r| r[0]).collect();
        let mean: f32 = col.iter().sum::<f32>() / col.len() as f32;
        assert!(mean.abs() < 1e-6);
        assert!(scaled[0].iter().all(|r| r[1] == 0.0));
    }

    #[test]
    fn test_val_flags_are_seeded() {
        let a = add_val_flags(50, 0.2, 7);
        let b = add_val_flags(50, 0.2, 7);
        assert_eq!(a, b);
        assert_eq!(a.iter().filter(|f| **f).count(), 10);
        assert!(add_val_flags(10, 0.0, 7).iter().all(|f| !f));
    }

    #[test]
    fn test_prep_data_for_modeling_shapes() {
        let starts: Vec<StartSequence> = (0..10)
            .map(|g| start(g, 10 + g % 3, &(0..(3 + g % 4)).collect::<Vec<_>>()))
            .collect();
        let config = PipelineConfig::default();
        let data = prep_data_for_modeling(&starts, &config);

        assert_eq!(data.train.len() + data.val.len(), 10);
        assert_eq!(data.val.len(), 2);
        let [b, t, f] = data.train.features.shape();
        assert_eq!(b, data.train.len());
        assert_eq!(f, config.feature_cols.len());
        assert_eq!(data.train.embeddings.shape(), [b, t, config.embedding_cols.len()]);
        assert_eq!(data.train.targets.shape(), [b, t, 1]);

        for i in 0..b {
            let targets = data.train.targets.unpad(i);
            assert_eq!(targets.iter().filter(|s| s[0] == 1.0).count(), 1);
            assert_eq!(targets.last(), Some(&vec![1.0]));
        }

        let again = prep_data_for_inference(&starts[..1], &data.preprocessors);
        assert_eq!(again.len(), 1);
    }

    #[test]
    fn test_prep_empty_is_empty() {
        let data = prep_data_for_modeling(&[], &PipelineConfig::default());
        assert!(data.train.is_empty());
        assert!(data.val.is_empty());
        assert!(prep_data_for_inference(&[], &data.preprocessors).is_empty());
    }

    #[test]
    fn test_batches_cover_every_start() {
        let starts: Vec<StartSequence> = (0..7).map(|g| start(g, 10, &[1, 2])).collect();
        let prep = Preprocessors::fit(&starts, &PipelineConfig::default().feature_cols, &[]);
        let inputs = prep_data_for_inference(&starts, &prep);
        let batches = inputs.batches(3, 1);
        assert_eq!(batches.iter().map(ModelInputs::len).collect::<Vec<_>>(), vec![3, 3, 1]);
        let mut games: Vec<i64> = batches.iter().flat_map(|b| b.keys.iter().map(|k| k.game_pk)).collect();
        games.sort();
        assert_eq!(games, (0..7).collect::<Vec<_>>());
    }

    #[test]
    fn test_split_matches_modeling_split() {
        let starts: Vec<StartSequence> = (0..10).map(|g| start(g, 10, &[1, 2])).collect();
        let config = PipelineConfig::default();
        let data = prep_data_for_modeling(&starts, &config);
        let (train, val) = split_starts(&starts, &config.split);
        assert_eq!(train.len() + val.len(), starts.len());
        let val_keys: Vec<StartKey> = val.iter().map(|s| s.key).collect();
        assert_eq!(val_keys, data.val.keys);

        let again = prep_data_for_inference(&val, &data.preprocessors);
        assert_eq!(again, data.val);
    }

    #[test]
    fn test_truncated_scaler_is_rejected_on_load() {
        let starts = vec![start(1, 10, &[1, 2, 3])];
        let config = PipelineConfig::default();
        let prep = Preprocessors::fit(&starts, &config.feature_cols, &config.embedding_cols);
        let mut json = serde_json::to_value(&prep).unwrap();
        json["scaler"]["mean"].as_array_mut().unwrap().pop();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preprocessors.json");
        std::fs::write(&path, serde_json::to_string(&json).unwrap()).unwrap();
        let err = Preprocessors::load(&path).unwrap_err();
        assert!(matches!(err, Error::Config(_)), "{}", err);
        assert!(err.to_string().contains("means"), "{}", err);
    }

    #[test]
    fn test_preprocessors_persist() {
        let starts = vec![start(1, 10, &[1, 2, 3])];
        let config = PipelineConfig::default();
        let prep = Preprocessors::fit(&starts, &config.feature_cols, &config.embedding_cols);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preprocessors.json");
        prep.save(&path).unwrap();
        let loaded = Preprocessors::load(&path).unwrap();
        assert_eq!(loaded, prep);
        assert_eq!(loaded.mappers.columns(), config.embedding_cols);
    }
}

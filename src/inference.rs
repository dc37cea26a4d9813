//! One-start inference: load a game, check the requested pitcher started it,
//! build model inputs with fitted preprocessors and shape the result for the
//! dashboard.

use serde::Serialize;
use serde_json::{json, Value};
use std::path::Path;
use tracing::info;

use crate::acquisition::query_pitches;
use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::metrics::{actual_pull_index, predicted_pull_index, targets_per_start};
use crate::model::Predictor;
use crate::pipeline::{get_starts, prep_data_for_inference, ModelInputs, Preprocessors};
use crate::processing::process_pitches;
use crate::types::{PitchEvent, PlateAppearance, StartKey};

/// Probability at which a step counts as a predicted pull.
pub const PULL_THRESHOLD: f32 = 0.5;

/// Every pitch of one game.
pub fn get_game_df(db_path: impl AsRef<Path>, year: i32, game_pk: i64) -> Result<Vec<PitchEvent>> {
    let pitches = query_pitches(db_path, year, Some(game_pk), None)?;
    if pitches.is_empty() {
        return Err(Error::NotFound(format!("game {} in {}", game_pk, year)));
    }
    Ok(pitches)
}

/// Whether `pitcher` appears as a starter in processed appearances.
pub fn is_valid_starter(appearances: &[PlateAppearance], pitcher: i64) -> bool {
    appearances.iter().any(|pa| pa.pitcher == pitcher)
}

/// Model inputs for one start plus the number of padding steps in front of
/// it.
pub fn game_df2tensor(
    pitches: Vec<PitchEvent>,
    game_pk: i64,
    pitcher: i64,
    preprocessors: &Preprocessors,
    config: &PipelineConfig,
) -> Result<(ModelInputs, usize)> {
    let appearances: Vec<PlateAppearance> = process_pitches(pitches, config)
        .into_iter()
        .filter(|pa| pa.game_pk == game_pk)
        .collect();
    if !is_valid_starter(&appearances, pitcher) {
        return Err(Error::NotFound(format!(
            "pitcher {} did not start game {}",
            pitcher, game_pk
        )));
    }
    let starts = get_starts(
        appearances
            .into_iter()
            .filter(|pa| pa.pitcher == pitcher)
            .collect(),
    );
    let inputs = prep_data_for_inference(&starts, preprocessors);
    if inputs.is_empty() {
        return Err(Error::NotFound(format!(
            "no appearances for pitcher {} in game {}",
            pitcher, game_pk
        )));
    }
    let pad_diff = inputs.features.pad_offset(0);
    Ok((inputs, pad_diff))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StartPrediction {
    pub key: StartKey,
    /// Pull probability after each appearance
    pub probabilities: Vec<f32>,
    /// 0-based appearance after which the pitcher was actually pulled
    pub actual_pull: Option<usize>,
    pub predicted_pull: Option<usize>,
    pub pad_diff: usize,
}

pub fn predict_start(predictor: &dyn Predictor, inputs: &ModelInputs, pad_diff: usize) -> Result<StartPrediction> {
    let key = *inputs
        .keys
        .first()
        .ok_or_else(|| Error::InvalidInput("no start to predict".into()))?;
    let probabilities = predictor
        .predict(inputs)?
        .into_iter()
        .next()
        .ok_or_else(|| Error::Model("model returned no predictions".into()))?;
    let targets = targets_per_start(inputs).into_iter().next().unwrap_or_default();
    if probabilities.len() != targets.len() {
        return Err(Error::Model(format!(
            "{} probabilities for {} appearances",
            probabilities.len(),
            targets.len()
        )));
    }
    let prediction = StartPrediction {
        key,
        actual_pull: actual_pull_index(&targets),
        predicted_pull: predicted_pull_index(&probabilities, PULL_THRESHOLD),
        probabilities,
        pad_diff,
    };
    info!(
        "game {} pitcher {}: predicted pull {:?}, actual {:?}",
        key.game_pk, key.pitcher, prediction.predicted_pull, prediction.actual_pull
    );
    Ok(prediction)
}

/// Vega-Lite bar chart of pull probability per appearance, with the actual
/// pull highlighted.
pub fn make_histogram_spec(prediction: &StartPrediction) -> Value {
    let values: Vec<Value> = prediction
        .probabilities
        .iter()
        .enumerate()
        .map(|(i, p)| {
            json!({
                "plate_appearance": i + 1,
                "probability": p,
                "pulled": prediction.actual_pull == Some(i),
            })
        })
        .collect();
    json!({
        "$schema": "https://vega.github.io/schema/vega-lite/v5.json",
        "title": format!(
            "Pitcher {} in game {}",
            prediction.key.pitcher, prediction.key.game_pk
        ),
        "width": "container",
        "data": { "values": values },
        "mark": "bar",
        "encoding": {
            "x": {
                "field": "plate_appearance",
                "type": "ordinal",
                "title": "Batters faced"
            },
            "y": {
                "field": "probability",
                "type": "quantitative",
                "title": "P(pulled)",
                "scale": { "domain": [0, 1] }
            },
            "color": {
                "field": "pulled",
                "type": "nominal",
                "title": "Actually pulled",
                "scale": { "domain": [false, true], "range": ["#4c78a8", "#e45756"] }
            },
            "tooltip": [
                { "field": "plate_appearance", "type": "ordinal" },
                { "field": "probability", "type": "quantitative", "format": ".3f" }
            ]
        }
    })
}

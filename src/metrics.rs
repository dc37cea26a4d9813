//! Evaluation of per-step pull probabilities against the observed pulls.
//!
//! Predictions and targets are given per start over real (unpadded) steps,
//! as returned by `Predictor::predict` and `targets_per_start`.

use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::pipeline::ModelInputs;

/// Unpadded targets of every start, one value per appearance.
pub fn targets_per_start(inputs: &ModelInputs) -> Vec<Vec<f32>> {
    (0..inputs.targets.batch_size())
        .map(|i| inputs.targets.unpad(i).into_iter().map(|s| s[0]).collect())
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConfusionMatrix {
    pub true_pos: usize,
    pub false_pos: usize,
    pub true_neg: usize,
    pub false_neg: usize,
}

impl ConfusionMatrix {
    pub fn total(&self) -> usize {
        self.true_pos + self.false_pos + self.true_neg + self.false_neg
    }

    pub fn accuracy(&self) -> Option<f64> {
        let n = self.total();
        (n > 0).then(|| (self.true_pos + self.true_neg) as f64 / n as f64)
    }

    pub fn precision(&self) -> Option<f64> {
        let n = self.true_pos + self.false_pos;
        (n > 0).then(|| self.true_pos as f64 / n as f64)
    }

    pub fn recall(&self) -> Option<f64> {
        let n = self.true_pos + self.false_neg;
        (n > 0).then(|| self.true_pos as f64 / n as f64)
    }
}

/// Step-level confusion counts with predictions thresholded at `threshold`.
pub fn confusion_matrix(preds: &[Vec<f32>], targets: &[Vec<f32>], threshold: f32) -> ConfusionMatrix {
    let mut cm = ConfusionMatrix::default();
    for (p, t) in preds.iter().zip(targets) {
        for (&p, &t) in p.iter().zip(t) {
            match (p >= threshold, t >= 0.5) {
                (true, true) => cm.true_pos += 1,
                (true, false) => cm.false_pos += 1,
                (false, false) => cm.true_neg += 1,
                (false, true) => cm.false_neg += 1,
            }
        }
    }
    cm
}

pub fn actual_pull_index(targets: &[f32]) -> Option<usize> {
    targets.iter().position(|&t| t >= 0.5)
}

/// First step whose probability reaches `threshold`; the last step when
/// none does. `None` only for an empty start.
pub fn predicted_pull_index(preds: &[f32], threshold: f32) -> Option<usize> {
    preds
        .iter()
        .position(|&p| p >= threshold)
        .or_else(|| preds.len().checked_sub(1))
}

/// Predicted minus actual pull position for every start with both.
fn pull_diffs(preds: &[Vec<f32>], targets: &[Vec<f32>], threshold: f32) -> Vec<i64> {
    preds
        .iter()
        .zip(targets)
        .filter_map(|(p, t)| {
            let predicted = predicted_pull_index(p, threshold)?;
            let actual = actual_pull_index(t)?;
            Some(predicted as i64 - actual as i64)
        })
        .collect()
}

/// Average number of appearances the predicted pull lands after (positive)
/// or before (negative) the actual one.
pub fn mean_pa_diff(preds: &[Vec<f32>], targets: &[Vec<f32>], threshold: f32) -> Option<f64> {
    let diffs = pull_diffs(preds, targets, threshold);
    if diffs.is_empty() {
        return None;
    }
    Some(diffs.iter().sum::<i64>() as f64 / diffs.len() as f64)
}

/// Mean absolute error between probabilities and targets over real steps.
pub fn mean_target_diff(preds: &[Vec<f32>], targets: &[Vec<f32>]) -> Option<f64> {
    let mut n = 0usize;
    let mut total = 0.0f64;
    for (p, t) in preds.iter().zip(targets) {
        for (&p, &t) in p.iter().zip(t) {
            total += (p - t).abs() as f64;
            n += 1;
        }
    }
    (n > 0).then(|| total / n as f64)
}

/// Count of starts per pull-position difference.
pub fn preds_histogram(preds: &[Vec<f32>], targets: &[Vec<f32>], threshold: f32) -> BTreeMap<i64, usize> {
    let mut hist = BTreeMap::new();
    for d in pull_diffs(preds, targets, threshold) {
        *hist.entry(d).or_insert(0) += 1;
    }
    hist
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsReport {
    pub starts: usize,
    pub threshold: f32,
    pub confusion: ConfusionMatrix,
    pub mean_pa_diff: Option<f64>,
    pub mean_target_diff: Option<f64>,
    pub histogram: BTreeMap<i64, usize>,
}

/// Compute every metric and log a summary.
pub fn print_all_metrics(preds: &[Vec<f32>], targets: &[Vec<f32>], threshold: f32) -> MetricsReport {
    if preds.len() != targets.len() {
        warn!(
            "{} prediction sequences for {} target sequences; extra starts ignored",
            preds.len(),
            targets.len()
        );
    }
    let report = MetricsReport {
        starts: preds.len().min(targets.len()),
        threshold,
        confusion: confusion_matrix(preds, targets, threshold),
        mean_pa_diff: mean_pa_diff(preds, targets, threshold),
        mean_target_diff: mean_target_diff(preds, targets),
        histogram: preds_histogram(preds, targets, threshold),
    };

    let cm = &report.confusion;
    info!("starts evaluated: {}", report.starts);
    info!(
        "confusion matrix @{:.2}: tp={} fp={} tn={} fn={}",
        threshold, cm.true_pos, cm.false_pos, cm.true_neg, cm.false_neg
    );
    if let (Some(p), Some(r)) = (cm.precision(), cm.recall()) {
        info!("precision={:.3} recall={:.3}", p, r);
    }
    match report.mean_pa_diff {
        Some(d) => info!("mean pull difference: {:+.2} plate appearances", d),
        None => info!("mean pull difference: n/a"),
    }
    if let Some(d) = report.mean_target_diff {
        info!("mean absolute target difference: {:.4}", d);
    }
    for (diff, count) in &report.histogram {
        info!("  {:+3}: {}", diff, count);
    }
    report
}

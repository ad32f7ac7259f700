//! Exact-match accuracy aggregation over an evaluation pass.
//!
//! [`SudokuAccuracy`] is driven by the harness in three phases:
//!
//! 1. [`begin_eval`](SudokuAccuracy::begin_eval) clears the counters.
//! 2. [`update_batch`](SudokuAccuracy::update_batch) is called once per batch.
//! 3. [`result`](SudokuAccuracy::result) is called once by *every* worker;
//!    counts are summed across the group before the accuracy is computed.
//!
//! Batches with missing or malformed fields are skipped, never scored.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::dist::{Collective, WorkerContext};
use crate::error::{Error, Result};
use crate::eval::report::{RESULTS_FILE, SudokuReport};
use crate::metrics::{MatchCount, count_exact_matches};
use crate::resolve::KeyResolver;
use crate::tensor::TensorMap;

/// Configuration for a [`SudokuAccuracy`] aggregator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    /// Resolution order for the prediction field.
    pub prediction_keys: KeyResolver,

    /// Resolution order for the ground-truth field.
    pub target_keys: KeyResolver,

    /// Output fields the harness should ask the model for.
    pub required_outputs: Vec<String>,

    /// Warn (instead of debug-log) on every skipped batch.
    pub strict: bool,

    /// Also write a JSON report next to the text results.
    pub json_report: bool,

    /// File name of the plain-text results.
    pub results_file: String,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            prediction_keys: KeyResolver::predictions(),
            target_keys: KeyResolver::targets(),
            required_outputs: vec!["preds".to_string()],
            strict: false,
            json_report: false,
            results_file: RESULTS_FILE.to_string(),
        }
    }
}

impl EvalConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub fn builder() -> EvalConfigBuilder {
        EvalConfigBuilder::default()
    }

    /// Load a configuration from a JSON file. Missing fields take defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Builder for [`EvalConfig`].
#[derive(Debug, Default)]
pub struct EvalConfigBuilder {
    prediction_keys: Option<KeyResolver>,
    target_keys: Option<KeyResolver>,
    required_outputs: Option<Vec<String>>,
    strict: bool,
    json_report: bool,
    results_file: Option<String>,
}

impl EvalConfigBuilder {
    /// Set the prediction resolution order.
    #[must_use]
    pub fn prediction_keys(mut self, resolver: KeyResolver) -> Self {
        self.prediction_keys = Some(resolver);
        self
    }

    /// Set the ground-truth resolution order.
    #[must_use]
    pub fn target_keys(mut self, resolver: KeyResolver) -> Self {
        self.target_keys = Some(resolver);
        self
    }

    /// Set the output fields requested from the model.
    #[must_use]
    pub fn required_outputs(mut self, outputs: Vec<String>) -> Self {
        self.required_outputs = Some(outputs);
        self
    }

    /// Warn on skipped batches.
    #[must_use]
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Write a JSON report alongside the text results.
    #[must_use]
    pub fn json_report(mut self, enabled: bool) -> Self {
        self.json_report = enabled;
        self
    }

    /// Set the results file name.
    #[must_use]
    pub fn results_file(mut self, name: impl Into<String>) -> Self {
        self.results_file = Some(name.into());
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> EvalConfig {
        let defaults = EvalConfig::default();
        EvalConfig {
            prediction_keys: self.prediction_keys.unwrap_or(defaults.prediction_keys),
            target_keys: self.target_keys.unwrap_or(defaults.target_keys),
            required_outputs: self.required_outputs.unwrap_or(defaults.required_outputs),
            strict: self.strict,
            json_report: self.json_report,
            results_file: self.results_file.unwrap_or(defaults.results_file),
        }
    }
}

/// Why a batch was not scored.
#[derive(Debug)]
#[non_exhaustive]
pub enum SkipReason {
    /// No prediction field resolved.
    NoPredictions,
    /// No ground-truth field resolved.
    NoTargets,
    /// Fields were found but cannot be compared.
    Malformed(Error),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoPredictions => write!(f, "no prediction field found"),
            Self::NoTargets => write!(f, "no ground-truth field found"),
            Self::Malformed(err) => write!(f, "{err}"),
        }
    }
}

/// Exact-match Sudoku accuracy, aggregated across workers.
///
/// # Example
///
/// ```
/// use sudoku_eval::{EvalConfig, SudokuAccuracy, Tensor, TensorMap, WorkerContext};
///
/// let mut metric = SudokuAccuracy::new("data/", serde_json::Value::Null, EvalConfig::default());
/// metric.begin_eval();
///
/// let grid: Vec<i64> = (0..81).map(|i| i % 9 + 1).collect();
/// let batch = TensorMap::new().with("labels", Tensor::int(&[1, 81], grid.clone()).unwrap());
/// let preds = TensorMap::new().with("preds", Tensor::int(&[1, 81], grid).unwrap());
/// metric.update_batch(&batch, &preds);
///
/// let report = metric.report(&WorkerContext::single(), None).unwrap();
/// assert_eq!(report.accuracy, 1.0);
/// ```
#[derive(Debug, Clone)]
pub struct SudokuAccuracy {
    data_path: PathBuf,
    metadata: serde_json::Value,
    config: EvalConfig,
    counts: MatchCount,
    unscored_batches: u64,
}

impl SudokuAccuracy {
    /// Create an aggregator with zeroed counters.
    ///
    /// `data_path` and `metadata` belong to the harness; they are kept but
    /// never inspected.
    #[must_use]
    pub fn new(data_path: impl Into<PathBuf>, metadata: serde_json::Value, config: EvalConfig) -> Self {
        let data_path = data_path.into();
        debug!("sudoku evaluator created for {}", data_path.display());
        Self {
            data_path,
            metadata,
            config,
            counts: MatchCount::default(),
            unscored_batches: 0,
        }
    }

    /// Zero all counters.
    pub fn reset(&mut self) {
        self.counts = MatchCount::default();
        self.unscored_batches = 0;
    }

    /// Start a new evaluation pass.
    pub fn begin_eval(&mut self) {
        self.reset();
    }

    /// Output fields the harness should request from the model.
    #[must_use]
    pub fn required_outputs(&self) -> &[String] {
        &self.config.required_outputs
    }

    /// Local (unreduced) counts so far.
    #[must_use]
    pub fn counts(&self) -> MatchCount {
        self.counts
    }

    /// Batches skipped since the last reset.
    #[must_use]
    pub fn unscored_batches(&self) -> u64 {
        self.unscored_batches
    }

    /// Data-source path given at construction.
    #[must_use]
    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    /// Opaque evaluation metadata given at construction.
    #[must_use]
    pub fn metadata(&self) -> &serde_json::Value {
        &self.metadata
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    /// Score one batch.
    ///
    /// Returns the counts added, or `None` when the batch was skipped. A
    /// skipped batch leaves the correct and total counters untouched.
    pub fn update_batch(&mut self, batch: &TensorMap, predictions: &TensorMap) -> Option<MatchCount> {
        match self.score(batch, predictions) {
            Ok(count) => {
                self.counts += count;
                debug!(correct = count.correct, total = count.total; "scored batch");
                Some(count)
            }
            Err(reason) => {
                self.unscored_batches += 1;
                let source = self.data_path.display();
                if self.config.strict {
                    warn!("sudoku batch from {source} not scored: {reason}");
                } else {
                    debug!("sudoku batch from {source} not scored: {reason}");
                }
                None
            }
        }
    }

    fn score(&self, batch: &TensorMap, predictions: &TensorMap) -> std::result::Result<MatchCount, SkipReason> {
        let predicted = self
            .config
            .prediction_keys
            .resolve(predictions)
            .ok_or(SkipReason::NoPredictions)?;
        let expected = self
            .config
            .target_keys
            .resolve(batch)
            .ok_or(SkipReason::NoTargets)?;
        count_exact_matches(&predicted, &expected).map_err(SkipReason::Malformed)
    }

    /// Reduce counts across the group and compute the accuracy.
    ///
    /// When `context.world_size > 1` this blocks until every worker in
    /// `group` has called it. Nothing is printed or written.
    pub fn report(&self, context: &WorkerContext, group: Option<&dyn Collective>) -> Result<SudokuReport> {
        context.validate()?;

        let mut totals = [self.counts.correct as f64, self.counts.total as f64];
        if context.is_distributed() {
            let group = group.ok_or(Error::MissingGroup {
                world_size: context.world_size,
            })?;
            if group.world_size() != context.world_size {
                return Err(Error::InvalidContext(format!(
                    "group has {} workers, context says {}",
                    group.world_size(),
                    context.world_size
                )));
            }
            group.all_reduce_sum(&mut totals)?;
        }

        let [correct, total] = totals;
        Ok(SudokuReport::new(correct, total, self.unscored_batches, context.world_size))
    }

    /// Finish the pass and return `{"test/sudoku_accuracy": accuracy}`.
    ///
    /// Every worker must call this; the returned value is the same on all of
    /// them. The primary worker also prints a summary and, when `save_path`
    /// is given, writes the results file there.
    pub fn result(
        &self,
        save_path: Option<&Path>,
        context: &WorkerContext,
        group: Option<&dyn Collective>,
    ) -> Result<HashMap<String, f64>> {
        let report = self.report(context, group)?;

        if context.is_primary {
            println!("{report}");
            info!(
                correct = report.correct,
                total = report.total,
                unscored = report.unscored_batches;
                "sudoku accuracy {:.4}",
                report.accuracy
            );

            if let Some(dir) = save_path {
                let path = report.write_text(dir, &self.config.results_file)?;
                debug!("wrote {}", path.display());
                if self.config.json_report {
                    let path = report.write_json(dir)?;
                    debug!("wrote {}", path.display());
                }
            }
        }

        Ok(report.metrics())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex, Once, PoisonError};
    use std::thread;

    use super::*;
    use crate::dist::{LocalGroup, SingleProcess};
    use crate::eval::report::{ACCURACY_KEY, JSON_REPORT_FILE};
    use crate::tensor::Tensor;

    static CAPTURED: Mutex<Vec<(log::Level, String)>> = Mutex::new(Vec::new());

    struct CaptureLogger;

    impl log::Log for CaptureLogger {
        fn enabled(&self, _metadata: &log::Metadata<'_>) -> bool {
            true
        }

        fn log(&self, record: &log::Record<'_>) {
            CAPTURED
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((record.level(), record.args().to_string()));
        }

        fn flush(&self) {}
    }

    static LOGGER: CaptureLogger = CaptureLogger;

    fn capture_logs() {
        static INIT: Once = Once::new();
        INIT.call_once(|| {
            log::set_logger(&LOGGER).unwrap();
            log::set_max_level(log::LevelFilter::Trace);
        });
    }

    /// Levels of captured records mentioning `needle`, in order.
    fn logged_levels(needle: &str) -> Vec<log::Level> {
        CAPTURED
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, message)| message.contains(needle))
            .map(|(level, _)| *level)
            .collect()
    }

    fn solved_grid(seed: i64) -> Vec<i64> {
        (0..81).map(|i| (i + seed) % 9 + 1).collect()
    }

    fn grids(rows: &[Vec<i64>], shape: &[usize]) -> Tensor {
        Tensor::int(shape, rows.concat()).unwrap()
    }

    fn metric() -> SudokuAccuracy {
        SudokuAccuracy::new("data/sudoku", serde_json::json!({"split": "test"}), EvalConfig::default())
    }

    /// Three grids where the middle one differs in one cell.
    fn two_of_three() -> (TensorMap, TensorMap) {
        let labels = vec![solved_grid(0), solved_grid(3), solved_grid(6)];
        let mut preds = labels.clone();
        preds[1][17] = preds[1][17] % 9 + 1;
        (
            TensorMap::new().with("labels", grids(&labels, &[3, 81])),
            TensorMap::new().with("preds", grids(&preds, &[3, 81])),
        )
    }

    /// Batch of `total` grids of which the first `correct` are predicted exactly.
    fn batch_with(correct: usize, total: usize) -> (TensorMap, TensorMap) {
        let labels: Vec<Vec<i64>> = (0..total as i64).map(solved_grid).collect();
        let preds: Vec<Vec<i64>> = labels
            .iter()
            .enumerate()
            .map(|(i, row)| {
                let mut row = row.clone();
                if i >= correct {
                    row[0] = row[0] % 9 + 1;
                }
                row
            })
            .collect();
        (
            TensorMap::new().with("labels", grids(&labels, &[total, 81])),
            TensorMap::new().with("preds", grids(&preds, &[total, 81])),
        )
    }

    #[test]
    fn test_required_outputs_default() {
        assert_eq!(metric().required_outputs(), ["preds".to_string()]);
    }

    #[test]
    fn test_update_counts_exact_rows() {
        let mut metric = metric();
        let (batch, preds) = two_of_three();
        let added = metric.update_batch(&batch, &preds);
        assert_eq!(added, Some(MatchCount { correct: 2, total: 3 }));
        assert_eq!(metric.counts(), MatchCount { correct: 2, total: 3 });
    }

    #[test]
    fn test_reset_then_result_is_zero() {
        let mut metric = metric();
        let (batch, preds) = two_of_three();
        metric.update_batch(&batch, &preds);
        metric.reset();

        let report = metric.report(&WorkerContext::single(), None).unwrap();
        assert_eq!(report.accuracy, 0.0);
        assert_eq!(report.correct, 0.0);
        assert_eq!(report.total, 0.0);
        let result = metric.result(None, &WorkerContext::single(), None).unwrap();
        assert_eq!(result[ACCURACY_KEY], 0.0);
    }

    #[test]
    fn test_square_grids_equal_flat_grids() {
        let labels = vec![solved_grid(1), solved_grid(2)];
        let mut preds = labels.clone();
        preds[1][80] = preds[1][80] % 9 + 1;

        let mut flat = metric();
        flat.update_batch(
            &TensorMap::new().with("labels", grids(&labels, &[2, 81])),
            &TensorMap::new().with("preds", grids(&preds, &[2, 81])),
        );
        let mut square = metric();
        square.update_batch(
            &TensorMap::new().with("labels", grids(&labels, &[2, 9, 9])),
            &TensorMap::new().with("preds", grids(&preds, &[2, 9, 9])),
        );

        assert_eq!(flat.counts(), square.counts());
        assert_eq!(square.counts(), MatchCount { correct: 1, total: 2 });
    }

    #[test]
    fn test_logits_use_argmax() {
        let labels = vec![solved_grid(0), solved_grid(4)];
        // One-hot scores over 10 classes, the second grid shifted by one class.
        let mut scores = Vec::with_capacity(2 * 81 * 10);
        for (row, grid) in labels.iter().enumerate() {
            for &digit in grid {
                let class = if row == 0 { digit } else { digit % 9 + 1 };
                scores.extend((0..10).map(|c| if c == class { 4.0 } else { -1.0 }));
            }
        }
        let logits = Tensor::float(&[2, 81, 10], scores).unwrap();

        let mut metric = metric();
        metric.update_batch(
            &TensorMap::new().with("labels", grids(&labels, &[2, 81])),
            &TensorMap::new().with("logits", logits),
        );
        assert_eq!(metric.counts(), MatchCount { correct: 1, total: 2 });
    }

    #[test]
    fn test_empty_predictions_leave_counters() {
        let mut metric = metric();
        let (batch, preds) = two_of_three();
        metric.update_batch(&batch, &preds);

        assert_eq!(metric.update_batch(&batch, &TensorMap::new()), None);
        assert_eq!(metric.counts(), MatchCount { correct: 2, total: 3 });
        assert_eq!(metric.unscored_batches(), 1);
    }

    #[test]
    fn test_missing_targets_leave_counters() {
        let mut metric = metric();
        let (_, preds) = two_of_three();
        let batch = TensorMap::new().with("inputs", grids(&[solved_grid(0)], &[1, 81]));
        assert_eq!(metric.update_batch(&batch, &preds), None);
        assert_eq!(metric.counts(), MatchCount::default());
    }

    #[test]
    fn test_malformed_batch_is_skipped() {
        let mut metric = metric();
        let batch = TensorMap::new().with("labels", grids(&[solved_grid(0)], &[1, 81]));
        let preds = TensorMap::new().with("preds", grids(&[solved_grid(0), solved_grid(1)], &[2, 81]));

        assert_eq!(metric.update_batch(&batch, &preds), None);
        assert_eq!(metric.counts(), MatchCount::default());
        assert_eq!(metric.unscored_batches(), 1);
    }

    #[test]
    fn test_strict_mode_warns_on_skip() {
        capture_logs();
        let (batch, _) = two_of_three();

        let mut strict = SudokuAccuracy::new(
            "strict-skip-source",
            serde_json::Value::Null,
            EvalConfig::builder().strict(true).build(),
        );
        assert_eq!(strict.update_batch(&batch, &TensorMap::new()), None);
        assert_eq!(strict.unscored_batches(), 1);

        let mut lenient = SudokuAccuracy::new("lenient-skip-source", serde_json::Value::Null, EvalConfig::default());
        assert_eq!(lenient.update_batch(&batch, &TensorMap::new()), None);

        assert_eq!(
            logged_levels("strict-skip-source"),
            vec![log::Level::Debug, log::Level::Warn]
        );
        assert_eq!(
            logged_levels("lenient-skip-source"),
            vec![log::Level::Debug, log::Level::Debug]
        );
    }

    #[test]
    fn test_skip_reason_display() {
        assert_eq!(SkipReason::NoPredictions.to_string(), "no prediction field found");
        assert_eq!(SkipReason::NoTargets.to_string(), "no ground-truth field found");
        assert_eq!(
            SkipReason::Malformed(Error::EmptyRank).to_string(),
            Error::EmptyRank.to_string()
        );
    }

    #[test]
    fn test_target_fallback_keys() {
        let mut metric = metric();
        let (batch, preds) = two_of_three();
        let target = batch.get("labels").unwrap().clone();
        metric.update_batch(&TensorMap::new().with("target", target), &preds);
        assert_eq!(metric.counts(), MatchCount { correct: 2, total: 3 });
    }

    #[test]
    fn test_begin_eval_starts_new_pass() {
        let mut metric = metric();
        let (batch, preds) = two_of_three();
        metric.update_batch(&batch, &preds);
        metric.update_batch(&batch, &TensorMap::new());

        metric.begin_eval();
        assert_eq!(metric.counts(), MatchCount::default());
        assert_eq!(metric.unscored_batches(), 0);

        metric.update_batch(&batch, &preds);
        assert_eq!(metric.counts(), MatchCount { correct: 2, total: 3 });
    }

    #[test]
    fn test_end_to_end_writes_results_file() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("eval");
        let mut metric = metric();
        metric.begin_eval();
        let (batch, preds) = two_of_three();
        metric.update_batch(&batch, &preds);

        let result = metric
            .result(Some(out.as_path()), &WorkerContext::single(), Some(&SingleProcess))
            .unwrap();
        assert_eq!(result.len(), 1);
        assert!((result[ACCURACY_KEY] - 2.0 / 3.0).abs() < 1e-12);

        let text = std::fs::read_to_string(out.join(RESULTS_FILE)).unwrap();
        assert_eq!(text, "Accuracy: 0.6666666666666666\nCorrect: 2.0\nTotal: 3.0");
        assert!(!out.join(JSON_REPORT_FILE).exists());
    }

    #[test]
    fn test_json_report_and_custom_file_name() {
        let tmp = tempfile::tempdir().unwrap();
        let config = EvalConfig::builder()
            .json_report(true)
            .results_file("grids.txt")
            .build();
        let mut metric = SudokuAccuracy::new("data", serde_json::Value::Null, config);
        let (batch, preds) = two_of_three();
        metric.update_batch(&batch, &preds);

        metric.result(Some(tmp.path()), &WorkerContext::single(), None).unwrap();
        assert!(tmp.path().join("grids.txt").exists());
        let report = SudokuReport::read_json(&tmp.path().join(JSON_REPORT_FILE)).unwrap();
        assert_eq!(report.total, 3.0);
    }

    #[test]
    fn test_non_primary_writes_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let mut metric = metric();
        let (batch, preds) = two_of_three();
        metric.update_batch(&batch, &preds);

        let context = WorkerContext::single().with_primary(false);
        let result = metric.result(Some(tmp.path()), &context, None).unwrap();
        assert!((result[ACCURACY_KEY] - 2.0 / 3.0).abs() < 1e-12);
        assert!(!tmp.path().join(RESULTS_FILE).exists());
    }

    #[test]
    fn test_distributed_without_group_fails() {
        let metric = metric();
        let err = metric.report(&WorkerContext::new(0, 2), None).unwrap_err();
        assert!(matches!(err, Error::MissingGroup { world_size: 2 }));
    }

    #[test]
    fn test_group_size_must_match_context() {
        let metric = metric();
        let group = LocalGroup::new(1).unwrap();
        let err = metric.report(&WorkerContext::new(0, 2), Some(&group)).unwrap_err();
        assert!(matches!(err, Error::InvalidContext(_)));
    }

    #[test]
    fn test_two_workers_reduce_to_global_accuracy() {
        let tmp = tempfile::tempdir().unwrap();
        let group = Arc::new(LocalGroup::new(2).unwrap());

        let handles: Vec<_> = [(3, 5), (2, 5)]
            .into_iter()
            .enumerate()
            .map(|(rank, (correct, total))| {
                let group = Arc::clone(&group);
                let out = tmp.path().to_path_buf();
                thread::spawn(move || {
                    let mut metric = metric();
                    let (batch, preds) = batch_with(correct, total);
                    metric.update_batch(&batch, &preds);
                    let context = WorkerContext::new(rank, 2);
                    metric.result(Some(out.as_path()), &context, Some(&*group)).unwrap()
                })
            })
            .collect();

        for handle in handles {
            let result = handle.join().unwrap();
            assert!((result[ACCURACY_KEY] - 0.5).abs() < f64::EPSILON);
        }
        let text = std::fs::read_to_string(tmp.path().join(RESULTS_FILE)).unwrap();
        assert_eq!(text, "Accuracy: 0.5\nCorrect: 5.0\nTotal: 10.0");
    }

    #[test]
    fn test_config_from_json_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("eval.json");
        std::fs::write(
            &path,
            r#"{"strict": true, "target_keys": {"rules": [{"key": "solution"}]}}"#,
        )
        .unwrap();

        let config = EvalConfig::from_json_file(&path).unwrap();
        assert!(config.strict);
        assert_eq!(config.target_keys.rules.len(), 1);
        assert_eq!(config.prediction_keys, KeyResolver::predictions());
        assert_eq!(config.results_file, RESULTS_FILE);
    }
}

//! Scoring command.
//!
//! Batches are dealt round-robin to `workers` in-process workers, each with
//! its own aggregator. The workers meet in a [`LocalGroup`] for the final
//! reduction, exactly as separate processes would in a real harness.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, bail};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use sudoku_eval::{
    ACCURACY_KEY, Collective, EvalConfig, LocalGroup, MatchCount, SingleProcess, SudokuAccuracy,
    TensorMap, WorkerContext,
};

/// One harness step: the batch and the model's outputs for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRecord {
    pub batch: TensorMap,
    #[serde(alias = "predictions")]
    pub preds: TensorMap,
}

pub struct ScoreArgs {
    pub input: PathBuf,
    pub config: Option<PathBuf>,
    pub save_path: Option<PathBuf>,
    pub workers: usize,
    pub strict: bool,
    pub json_report: bool,
    pub history: Option<PathBuf>,
}

/// What one worker saw and what the group agreed on.
#[derive(Debug, Clone)]
pub struct WorkerOutcome {
    pub rank: usize,
    pub local: MatchCount,
    pub unscored_batches: u64,
    pub scores: HashMap<String, f64>,
}

#[derive(Debug, Serialize)]
struct HistoryRow<'a> {
    timestamp: String,
    input: &'a str,
    workers: usize,
    correct: u64,
    total: u64,
    unscored_batches: u64,
    accuracy: f64,
}

pub fn run(args: ScoreArgs) -> Result<()> {
    if args.workers == 0 {
        bail!("--workers must be at least 1");
    }

    let mut config = match &args.config {
        Some(path) => EvalConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => EvalConfig::default(),
    };
    config.strict |= args.strict;
    config.json_report |= args.json_report;

    let records = load_records(&args.input)?;
    info!("loaded {} batches from {}", records.len(), args.input.display());

    let outcomes = score_records(
        &records,
        &args.input,
        &config,
        args.workers,
        args.save_path.as_deref(),
    )?;

    let mut global = MatchCount::default();
    let mut unscored = 0;
    for outcome in &outcomes {
        global += outcome.local;
        unscored += outcome.unscored_batches;
        debug!(
            rank = outcome.rank,
            correct = outcome.local.correct,
            total = outcome.local.total;
            "worker finished"
        );
    }
    let accuracy = outcomes
        .first()
        .and_then(|o| o.scores.get(ACCURACY_KEY).copied())
        .unwrap_or_default();

    if unscored > 0 {
        println!("Unscored batches: {unscored}");
    }

    if let Some(path) = &args.history {
        let input = args.input.to_string_lossy();
        let row = HistoryRow {
            timestamp: chrono::Utc::now().to_rfc3339(),
            input: &input,
            workers: args.workers,
            correct: global.correct,
            total: global.total,
            unscored_batches: unscored,
            accuracy,
        };
        append_history(path, &row)
            .with_context(|| format!("Failed to append history to {}", path.display()))?;
    }

    Ok(())
}

fn load_records(path: &Path) -> Result<Vec<BatchRecord>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&json).with_context(|| format!("Failed to parse batches in {}", path.display()))
}

/// Run `workers` aggregators over `records` and reduce them.
///
/// Outcomes are returned sorted by rank.
pub fn score_records(
    records: &[BatchRecord],
    data_path: &Path,
    config: &EvalConfig,
    workers: usize,
    save_path: Option<&Path>,
) -> Result<Vec<WorkerOutcome>> {
    if workers == 1 {
        let outcome = run_worker(records, data_path, config, WorkerContext::single(), &SingleProcess, save_path)?;
        return Ok(vec![outcome]);
    }

    let group = LocalGroup::new(workers)?;
    // One thread per worker: every worker blocks in the reduction.
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("sudoku-worker-{i}"))
        .build()
        .context("Failed to start worker threads")?;

    let collected: Mutex<Vec<Result<WorkerOutcome>>> = Mutex::new(Vec::with_capacity(workers));
    pool.scope(|scope| {
        for rank in 0..workers {
            let group = &group;
            let collected = &collected;
            scope.spawn(move |_| {
                let shard: Vec<BatchRecord> = records
                    .iter()
                    .skip(rank)
                    .step_by(workers)
                    .cloned()
                    .collect();
                let context = WorkerContext::new(rank, workers);
                let outcome = run_worker(&shard, data_path, config, context, group, save_path);
                collected
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .push(outcome);
            });
        }
    });

    let mut outcomes = collected
        .into_inner()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .into_iter()
        .collect::<Result<Vec<_>>>()?;
    outcomes.sort_by_key(|o| o.rank);
    Ok(outcomes)
}

fn run_worker(
    records: &[BatchRecord],
    data_path: &Path,
    config: &EvalConfig,
    context: WorkerContext,
    group: &dyn Collective,
    save_path: Option<&Path>,
) -> Result<WorkerOutcome> {
    let mut metric = SudokuAccuracy::new(data_path, serde_json::Value::Null, config.clone());
    metric.begin_eval();
    for record in records {
        metric.update_batch(&record.batch, &record.preds);
    }

    let scores = metric
        .result(save_path, &context, Some(group))
        .with_context(|| format!("Worker {} failed to finish evaluation", context.rank))?;

    Ok(WorkerOutcome {
        rank: context.rank,
        local: metric.counts(),
        unscored_batches: metric.unscored_batches(),
        scores,
    })
}

fn append_history(path: &Path, row: &HistoryRow<'_>) -> Result<()> {
    let is_new = !path.exists() || std::fs::metadata(path)?.len() == 0;
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut wtr = csv::WriterBuilder::new().has_headers(is_new).from_writer(file);
    wtr.serialize(row)?;
    wtr.flush()?;
    Ok(())
}

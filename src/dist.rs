//! Worker identity and cross-worker reduction.
//!
//! Each worker owns its own aggregator state. The only interaction between
//! workers is a blocking sum-reduction at finalization: every member of the
//! group must call [`Collective::all_reduce_sum`] or the others wait forever.
//!
//! - [`WorkerContext`]: rank, world size and the "is primary" flag that
//!   gates console output and report files.
//! - [`Collective`]: the reduction seam; harnesses plug their transport in.
//! - [`SingleProcess`]: identity reduction for one worker.
//! - [`LocalGroup`]: in-process group for worker threads.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use crate::error::{Error, Result};

/// Where this worker sits in the group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerContext {
    /// Rank of this worker (0-based).
    pub rank: usize,
    /// Total number of workers.
    pub world_size: usize,
    /// Whether this worker prints the summary and writes reports.
    pub is_primary: bool,
}

impl WorkerContext {
    /// Context for `rank` of `world_size`; rank 0 is primary.
    #[must_use]
    pub fn new(rank: usize, world_size: usize) -> Self {
        Self {
            rank,
            world_size,
            is_primary: rank == 0,
        }
    }

    /// Context for a single, primary worker.
    #[must_use]
    pub fn single() -> Self {
        Self::new(0, 1)
    }

    /// Override the primary flag.
    #[must_use]
    pub fn with_primary(mut self, is_primary: bool) -> Self {
        self.is_primary = is_primary;
        self
    }

    /// Whether results must be reduced across workers.
    #[must_use]
    pub fn is_distributed(&self) -> bool {
        self.world_size > 1
    }

    /// Check that rank and world size are consistent.
    pub fn validate(&self) -> Result<()> {
        if self.world_size == 0 {
            return Err(Error::InvalidContext("world_size must be >= 1".into()));
        }
        if self.rank >= self.world_size {
            return Err(Error::InvalidContext(format!(
                "rank {} >= world_size {}",
                self.rank, self.world_size
            )));
        }
        Ok(())
    }
}

impl Default for WorkerContext {
    fn default() -> Self {
        Self::single()
    }
}

/// Sum-reduction across a group of workers.
pub trait Collective: Send + Sync {
    /// Replace `values` with the element-wise sum over all workers.
    ///
    /// Blocks until every member of the group has contributed.
    fn all_reduce_sum(&self, values: &mut [f64]) -> Result<()>;

    /// Number of workers in the group.
    fn world_size(&self) -> usize;
}

/// Group of one: reduction is the identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleProcess;

impl Collective for SingleProcess {
    fn all_reduce_sum(&self, _values: &mut [f64]) -> Result<()> {
        Ok(())
    }

    fn world_size(&self) -> usize {
        1
    }
}

/// In-process group shared by worker threads.
///
/// Share it behind an `Arc`; every thread calls
/// [`all_reduce_sum`](Collective::all_reduce_sum) with a buffer of the same
/// length and receives the sum. The group can be reused for any number of
/// consecutive reductions.
#[derive(Debug)]
pub struct LocalGroup {
    size: usize,
    state: Mutex<RoundState>,
    round_done: Condvar,
}

#[derive(Debug, Default)]
struct RoundState {
    generation: u64,
    arrived: usize,
    accumulator: Vec<f64>,
    mismatch: Option<String>,
    // Outcome of the last completed round.
    result: Vec<f64>,
    failure: Option<String>,
}

impl LocalGroup {
    /// Create a group of `size` workers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidContext`] if `size` is zero.
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::InvalidContext("group size must be >= 1".into()));
        }
        Ok(Self {
            size,
            state: Mutex::new(RoundState::default()),
            round_done: Condvar::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, RoundState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Collective for LocalGroup {
    fn all_reduce_sum(&self, values: &mut [f64]) -> Result<()> {
        let mut state = self.lock();
        let generation = state.generation;

        if state.arrived == 0 {
            state.accumulator = values.to_vec();
            state.mismatch = None;
        } else if state.accumulator.len() != values.len() {
            // Still count the arrival so the rest of the group is released.
            state.mismatch = Some(format!(
                "buffer length {} does not match group length {}",
                values.len(),
                state.accumulator.len()
            ));
        } else {
            for (acc, value) in state.accumulator.iter_mut().zip(values.iter()) {
                *acc += *value;
            }
        }
        state.arrived += 1;

        if state.arrived == self.size {
            state.result = std::mem::take(&mut state.accumulator);
            state.failure = state.mismatch.take();
            state.arrived = 0;
            state.generation = state.generation.wrapping_add(1);
            self.round_done.notify_all();
        } else {
            while state.generation == generation {
                state = self
                    .round_done
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }

        if let Some(reason) = &state.failure {
            return Err(Error::Collective(reason.clone()));
        }
        values.copy_from_slice(&state.result);
        Ok(())
    }

    fn world_size(&self) -> usize {
        self.size
    }
}

//! Generic simulated annealing.
//!
//! The driver only knows the [`Annealable`] contract; the packing model is one
//! implementation of it.

use rand::Rng;

/// Number of progress reports per run.
const PROGRESS_REPORTS: usize = 200;

/// A state that can be scored, perturbed and restored.
pub trait Annealable: Clone {
    /// Everything needed to reverse one move.
    type Undo;

    /// Lower is better.
    fn energy(&self) -> f64;

    /// Applies a random valid perturbation.
    ///
    /// Returns the undo record and the number of draws it took. A count at or
    /// above the driver's cap means no valid perturbation was found and the
    /// state is unchanged.
    fn propose_move<R: Rng + ?Sized>(&mut self, rng: &mut R) -> (Self::Undo, usize);

    fn undo_move(&mut self, undo: Self::Undo);
}

/// Exponential cooling schedule.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AnnealSchedule {
    pub max_temp: f64,
    pub min_temp: f64,
    pub steps: usize,
}

impl AnnealSchedule {
    pub const BASE_MAX_TEMP: f64 = 1.0;
    pub const BASE_MIN_TEMP: f64 = 1e-4;

    /// Schedule with both base temperatures scaled by `factor`.
    pub fn with_factor(factor: f64, steps: usize) -> Self {
        Self {
            max_temp: Self::BASE_MAX_TEMP * factor,
            min_temp: Self::BASE_MIN_TEMP * factor,
            steps,
        }
    }

    /// Temperature at `step`, falling from `max_temp` to `min_temp`.
    pub fn temperature(&self, step: usize) -> f64 {
        if self.steps <= 1 {
            return self.max_temp;
        }
        let progress = step as f64 / (self.steps - 1) as f64;
        let factor = -(self.max_temp / self.min_temp).ln();
        self.max_temp * (factor * progress).exp()
    }
}

/// Snapshot handed to the progress callback.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AnnealProgress {
    pub step: usize,
    pub steps: usize,
    pub temperature: f64,
    pub energy: f64,
    pub best_energy: f64,
}

/// Result of one annealing run.
#[derive(Clone, Debug)]
pub struct AnnealOutcome<S> {
    pub best: S,
    pub best_energy: f64,
    /// Draw count of the last proposal.
    pub attempts: usize,
    pub steps_completed: usize,
    /// The run stopped because a proposal exhausted its draws.
    pub saturated: bool,
}

/// Runs simulated annealing on `state`.
///
/// A move is kept when it lowers the energy, or with probability
/// `exp(-delta / T)` when it raises it; otherwise it is undone. The best state
/// seen is cloned on every improvement. The run stops early when a proposal
/// reports `attempt_cap` or more draws.
///
/// # Parameters
/// * `state` - Current state, left at the last accepted configuration
/// * `schedule` - Temperatures and step count
/// * `attempt_cap` - Draw count that marks a saturated proposal
/// * `rng` - Random source
/// * `on_progress` - Called every `steps / 200` steps
pub fn anneal<S, R>(
    state: &mut S,
    schedule: &AnnealSchedule,
    attempt_cap: usize,
    rng: &mut R,
    mut on_progress: impl FnMut(&AnnealProgress),
) -> AnnealOutcome<S>
where
    S: Annealable,
    R: Rng + ?Sized,
{
    let mut energy = state.energy();
    let mut best = state.clone();
    let mut best_energy = energy;
    let mut attempts = 0;
    let mut steps_completed = 0;
    let mut saturated = false;
    let report_every = (schedule.steps / PROGRESS_REPORTS).max(1);

    for step in 0..schedule.steps {
        let temperature = schedule.temperature(step);
        let (undo, used) = state.propose_move(rng);
        attempts = used;
        if used >= attempt_cap {
            saturated = true;
            break;
        }

        let next = state.energy();
        let delta = next - energy;
        if delta <= 0.0 || (-delta / temperature).exp() >= rng.gen_range(0.0..1.0) {
            energy = next;
            if energy < best_energy {
                best_energy = energy;
                best = state.clone();
            }
        } else {
            state.undo_move(undo);
        }
        steps_completed = step + 1;

        if steps_completed % report_every == 0 {
            on_progress(&AnnealProgress {
                step: steps_completed,
                steps: schedule.steps,
                temperature,
                energy,
                best_energy,
            });
        }
    }

    AnnealOutcome {
        best,
        best_energy,
        attempts,
        steps_completed,
        saturated,
    }
}

//! Packing-count search for irregular solids.
//!
//! The optimizer looks for the largest prefix of the item list that can be
//! placed collision-free inside the build volume:
//! - every probe anneals the model restricted to a candidate count
//! - a probe succeeds once a run finishes unsaturated with a valid best state
//! - candidates are chosen by binary search, starting with all items

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info};
use rand::SeedableRng;
use rand::rngs::StdRng;
use thiserror::Error;

use crate::anneal::{AnnealSchedule, anneal};
use crate::geometry::RotationSet;
use crate::model::{Frame, Model, Placement, PreparedSolid, Solid, ValidationError};
use crate::types::Transform;

/// Configuration for the packing algorithm.
///
/// Contains the BVH resolution, the annealing schedule and the search budgets.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PackingConfig {
    /// Depth of every solid's BVH (2^(depth+1) - 1 nodes)
    pub bvh_depth: usize,
    /// Steps of a single annealing run
    pub annealing_iterations: usize,
    /// Wall-clock budget for one candidate count, checked between runs
    pub candidate_budget: Duration,
    /// Draws a single move may take before the run counts as saturated
    pub max_move_attempts: usize,
    /// Scales both base temperatures of the schedule
    pub temperature_factor: f64,
    /// Fixed RNG seed for reproducible runs
    pub seed: Option<u64>,
}

impl PackingConfig {
    pub const DEFAULT_BVH_DEPTH: usize = 8;
    pub const DEFAULT_ANNEALING_ITERATIONS: usize = 2_000_000;
    pub const DEFAULT_CANDIDATE_BUDGET: Duration = Duration::from_secs(10);
    pub const DEFAULT_MAX_MOVE_ATTEMPTS: usize = 20_000;
    pub const DEFAULT_TEMPERATURE_FACTOR: f64 = 0.5;
    /// Deeper trees cost 2^(depth+1) boxes per orientation.
    pub const MAX_BVH_DEPTH: usize = 16;
    pub const MAX_ANNEALING_ITERATIONS: usize = 1_000_000_000;

    /// Checks an annealing step count against the accepted range.
    pub fn validate_annealing_iterations(iterations: usize) -> Result<(), ValidationError> {
        if iterations == 0 || iterations > Self::MAX_ANNEALING_ITERATIONS {
            return Err(ValidationError::InvalidConfiguration(format!(
                "annealing_iterations must be between 1 and {}, got: {}",
                Self::MAX_ANNEALING_ITERATIONS,
                iterations
            )));
        }
        Ok(())
    }

    /// Creates a builder for custom configuration.
    pub fn builder() -> PackingConfigBuilder {
        PackingConfigBuilder::default()
    }

    fn schedule(&self) -> AnnealSchedule {
        AnnealSchedule::with_factor(self.temperature_factor, self.annealing_iterations)
    }
}

impl Default for PackingConfig {
    fn default() -> Self {
        Self {
            bvh_depth: Self::DEFAULT_BVH_DEPTH,
            annealing_iterations: Self::DEFAULT_ANNEALING_ITERATIONS,
            candidate_budget: Self::DEFAULT_CANDIDATE_BUDGET,
            max_move_attempts: Self::DEFAULT_MAX_MOVE_ATTEMPTS,
            temperature_factor: Self::DEFAULT_TEMPERATURE_FACTOR,
            seed: None,
        }
    }
}

/// Builder pattern for PackingConfig.
#[derive(Clone, Debug, Default)]
pub struct PackingConfigBuilder {
    config: PackingConfig,
}

impl PackingConfigBuilder {
    /// Sets the BVH depth, capped at [`PackingConfig::MAX_BVH_DEPTH`].
    pub fn bvh_depth(mut self, depth: usize) -> Self {
        self.config.bvh_depth = depth.min(PackingConfig::MAX_BVH_DEPTH);
        self
    }

    pub fn annealing_iterations(mut self, iterations: usize) -> Self {
        self.config.annealing_iterations = iterations;
        self
    }

    pub fn candidate_budget(mut self, budget: Duration) -> Self {
        self.config.candidate_budget = budget;
        self
    }

    pub fn max_move_attempts(mut self, attempts: usize) -> Self {
        self.config.max_move_attempts = attempts;
        self
    }

    pub fn temperature_factor(mut self, factor: f64) -> Self {
        self.config.temperature_factor = factor;
        self
    }

    pub fn seed(mut self, seed: Option<u64>) -> Self {
        self.config.seed = seed;
        self
    }

    /// Creates the final configuration.
    pub fn build(self) -> PackingConfig {
        self.config
    }
}

/// A solid and how many copies of it to pack.
#[derive(Clone, Debug)]
pub struct PackItem {
    pub solid: Solid,
    pub count: usize,
}

/// Outcome for one item copy.
#[derive(Clone, Debug, PartialEq)]
pub struct ItemPlacement {
    pub name: String,
    /// `None` when the item is not part of the packed prefix.
    pub transform: Option<Transform>,
    /// Footprint volume including the spacing margin.
    pub volume_with_spacing: f64,
}

impl ItemPlacement {
    pub fn is_placed(&self) -> bool {
        self.transform.is_some()
    }

    /// Homogeneous 4x4 matrix; all zeros for an unplaced item.
    pub fn matrix(&self) -> [[f64; 4]; 4] {
        self.transform
            .map(|t| t.to_matrix())
            .unwrap_or([[0.0; 4]; 4])
    }
}

/// Result of a successful packing search.
#[derive(Clone, Debug)]
pub struct PackingResult {
    pub placements: Vec<ItemPlacement>,
    pub packed_count: usize,
    pub total_count: usize,
    /// Spaced volume of the placed items relative to the build volume.
    pub fill_fraction: f64,
    /// Best energy of the largest feasible count.
    pub energy: f64,
}

impl PackingResult {
    /// Indicates whether all items were packed.
    pub fn is_complete(&self) -> bool {
        self.packed_count == self.total_count
    }

    /// Returns the number of items left out.
    pub fn unplaced_count(&self) -> usize {
        self.total_count - self.packed_count
    }
}

/// Final state of a packing search.
#[derive(Clone, Debug)]
pub enum PackOutcome {
    Packed(PackingResult),
    /// Not even a single item could be placed.
    Infeasible { total_items: usize },
}

/// Input that cannot be packed at all.
#[derive(Debug, Error)]
pub enum PackError {
    #[error("no items to pack")]
    NoItems,
    #[error("solid '{name}' does not fit the build volume in any orientation")]
    SolidTooLarge { name: String },
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// Events emitted during the search to allow live progress reporting.
#[derive(Clone, Debug, serde::Serialize)]
#[serde(tag = "type")]
pub enum PackEvent {
    /// A candidate count is being probed.
    ProbeStarted { candidate: usize, total: usize },
    /// Periodic annealing progress within a probe.
    AnnealProgress {
        candidate: usize,
        run: usize,
        step: usize,
        steps: usize,
        temperature: f64,
        energy: f64,
        best_energy: f64,
    },
    /// A probe has been decided.
    ProbeFinished {
        candidate: usize,
        feasible: bool,
        runs: usize,
        energy: Option<f64>,
    },
    /// Search finished.
    Finished { packed: usize, total: usize },
}

/// Packs the items with the default event sink.
pub fn pack_solids(
    items: Vec<PackItem>,
    frame: Frame,
    config: PackingConfig,
) -> Result<PackOutcome, PackError> {
    pack_solids_with_progress(items, frame, config, |_| {})
}

/// Packs the items and reports every probe through `on_event`.
///
/// Items are expanded by their count in input order; only prefixes of that
/// order are probed. Degenerate input is rejected before any annealing and
/// without emitting events.
///
/// # Parameters
/// * `items` - Solids with their counts
/// * `frame` - Build volume and spacing
/// * `config` - Algorithm parameters
/// * `on_event` - Progress callback (suitable for SSE)
pub fn pack_solids_with_progress(
    items: Vec<PackItem>,
    frame: Frame,
    config: PackingConfig,
    mut on_event: impl FnMut(&PackEvent),
) -> Result<PackOutcome, PackError> {
    let total: usize = items.iter().map(|item| item.count).sum();
    if total == 0 {
        return Err(PackError::NoItems);
    }

    let rotations = Arc::new(RotationSet::build());
    let half_extent = frame.half_extent();
    let margin = frame.margin();

    let mut prepared = Vec::with_capacity(items.len());
    for item in items.iter().filter(|item| item.count > 0) {
        let solid = PreparedSolid::build(&item.solid, &rotations, config.bvh_depth, margin);
        if !solid.fits_frame(&rotations, &half_extent) {
            return Err(PackError::SolidTooLarge { name: solid.name });
        }
        prepared.push((Arc::new(solid), item.count));
    }

    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut model = Model::new(rotations, half_extent, config.max_move_attempts);
    for (solid, count) in &prepared {
        for _ in 0..*count {
            model.add(Arc::clone(solid), &mut rng);
        }
    }

    info!(
        "Packing {} items ({} distinct solids) into {:?}",
        total,
        prepared.len(),
        frame.size
    );

    debug!(
        "Model ready: largest item volume {:.3}, total {:.3}, step deviation {:.4}",
        model.min_volume(),
        model.max_volume(),
        model.deviation()
    );

    let schedule = config.schedule();
    let mut best: Option<(Vec<Option<Placement>>, f64)> = None;

    let packed = largest_feasible_count(total, |candidate| {
        model.set_active_count(candidate);
        model.reset(&mut rng);
        on_event(&PackEvent::ProbeStarted { candidate, total });

        let started = Instant::now();
        let mut runs = 0;
        let found = loop {
            runs += 1;
            let outcome = anneal(
                &mut model,
                &schedule,
                config.max_move_attempts,
                &mut rng,
                |progress| {
                    on_event(&PackEvent::AnnealProgress {
                        candidate,
                        run: runs,
                        step: progress.step,
                        steps: progress.steps,
                        temperature: progress.temperature,
                        energy: progress.energy,
                        best_energy: progress.best_energy,
                    })
                },
            );

            if !outcome.saturated && outcome.best.is_valid() {
                break Some((outcome.best.snapshot(), outcome.best_energy));
            }
            debug!(
                "Run {} for {} items rejected (saturated: {}, steps: {})",
                runs, candidate, outcome.saturated, outcome.steps_completed
            );
            if started.elapsed() >= config.candidate_budget {
                break None;
            }
            model.reset(&mut rng);
        };

        let energy = found.as_ref().map(|(_, energy)| *energy);
        on_event(&PackEvent::ProbeFinished {
            candidate,
            feasible: found.is_some(),
            runs,
            energy,
        });
        match found {
            Some(state) => {
                info!(
                    "{} of {} items fit after {} run(s), energy {:.4}",
                    candidate,
                    total,
                    runs,
                    state.1
                );
                best = Some(state);
                true
            }
            None => {
                info!("{} of {} items do not fit within the budget", candidate, total);
                false
            }
        }
    });

    on_event(&PackEvent::Finished { packed, total });

    let (snapshot, energy) = match best {
        Some(state) if packed > 0 => state,
        _ => return Ok(PackOutcome::Infeasible { total_items: total }),
    };

    let placements: Vec<ItemPlacement> = model
        .items()
        .iter()
        .zip(snapshot)
        .map(|(item, placement)| ItemPlacement {
            name: item.solid().name.clone(),
            transform: placement.map(|p| p.transform),
            volume_with_spacing: item.solid().volume_with_spacing(margin),
        })
        .collect();
    let fill_fraction = placements
        .iter()
        .filter(|p| p.is_placed())
        .map(|p| p.volume_with_spacing)
        .sum::<f64>()
        / frame.volume();

    Ok(PackOutcome::Packed(PackingResult {
        placements,
        packed_count: packed,
        total_count: total,
        fill_fraction,
        energy,
    }))
}

/// Binary search for the largest feasible count in `0..=total`.
///
/// The first probe is `total`; later probes use the rounded-up midpoint.
/// Count 0 is feasible without probing.
fn largest_feasible_count(total: usize, mut probe: impl FnMut(usize) -> bool) -> usize {
    let mut min = 0;
    let mut max = total;
    let mut candidate = total;
    loop {
        let feasible = candidate == 0 || probe(candidate);
        if feasible {
            min = candidate + 1;
        } else {
            max = candidate - 1;
        }
        if min > max {
            return max;
        }
        candidate = (min + max).div_ceil(2);
    }
}

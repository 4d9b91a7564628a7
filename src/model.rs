//! Data models for the solid packing run.
//!
//! This module defines the structures the optimizer mutates:
//! - `Solid`: a rigid body given as triangle bounding boxes
//! - `PreparedSolid`: a solid with its 24 rotated BVH trees, shared read-only
//! - `Frame`: the build volume with its spacing
//! - `Model`: the placed items plus everything needed to score and perturb them

use std::sync::Arc;

use rand::Rng;
use rand_distr::StandardNormal;

use crate::anneal::Annealable;
use crate::bvh::Tree;
use crate::geometry::{Axis, ROTATION_COUNT, RotationSet};
use crate::types::{BoundingBox, EPSILON_GENERAL, Transform, Vec3};

/// Growth factor of the seeding radius between attempts.
const SEED_RADIUS_GROWTH: f64 = 1.2;
/// Random draws inside the frame before seeding falls back to the sphere.
const SEED_FRAME_TRIES: usize = 256;
/// Deviation = cube root of the total footprint volume divided by this.
const DEVIATION_DIVISOR: f64 = 32.0;

/// Validation error for input data.
#[derive(Debug, Clone)]
pub enum ValidationError {
    InvalidDimension(String),
    InvalidGeometry(String),
    InvalidConfiguration(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::InvalidDimension(msg) => write!(f, "Invalid dimension: {}", msg),
            ValidationError::InvalidGeometry(msg) => write!(f, "Invalid geometry: {}", msg),
            ValidationError::InvalidConfiguration(msg) => {
                write!(f, "Invalid configuration: {}", msg)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Helper function to validate a single dimension.
fn validate_dimension(value: f64, name: &str) -> Result<(), ValidationError> {
    if value <= 0.0 || value.is_nan() || value.is_infinite() {
        return Err(ValidationError::InvalidDimension(format!(
            "{} must be positive, got: {}",
            name, value
        )));
    }
    Ok(())
}

/// A rigid solid, represented by the bounding boxes of its triangles.
///
/// The boxes are recentred on construction so the solid's overall bounding
/// box is centred at the origin; `offset` is the translation that was
/// applied to the caller's coordinates.
#[derive(Clone, Debug)]
pub struct Solid {
    name: String,
    boxes: Vec<BoundingBox>,
    offset: Vec3,
}

impl Solid {
    /// Creates a solid from triangle bounding boxes.
    ///
    /// # Returns
    /// `Ok(Solid)` for a non-empty list of finite boxes, otherwise `Err(ValidationError)`
    pub fn from_boxes(
        name: impl Into<String>,
        boxes: Vec<BoundingBox>,
    ) -> Result<Self, ValidationError> {
        let name = name.into();
        if boxes.is_empty() {
            return Err(ValidationError::InvalidGeometry(format!(
                "Solid '{}' contains no triangles",
                name
            )));
        }
        if let Some(bad) = boxes
            .iter()
            .position(|b| !b.min.is_finite() || !b.max.is_finite())
        {
            return Err(ValidationError::InvalidGeometry(format!(
                "Solid '{}' has a non-finite triangle at index {}",
                name, bad
            )));
        }
        if let Some(bad) = boxes.iter().position(|b| b.is_empty()) {
            return Err(ValidationError::InvalidGeometry(format!(
                "Solid '{}' has an inverted triangle box at index {} (min exceeds max)",
                name, bad
            )));
        }

        let offset = -BoundingBox::for_boxes(&boxes).center();
        let boxes = boxes.iter().map(|b| b.translate(offset)).collect();
        Ok(Self {
            name,
            boxes,
            offset,
        })
    }

    /// Creates a solid from triangles given as three vertices each.
    pub fn from_triangles(
        name: impl Into<String>,
        triangles: &[[[f64; 3]; 3]],
    ) -> Result<Self, ValidationError> {
        let name = name.into();
        if let Some(bad) = triangles
            .iter()
            .position(|t| t.iter().flatten().any(|c| !c.is_finite()))
        {
            return Err(ValidationError::InvalidGeometry(format!(
                "Solid '{}' has a non-finite vertex in triangle {}",
                name, bad
            )));
        }
        let boxes = triangles
            .iter()
            .map(|t| BoundingBox::from_points(&t.map(Vec3::from_array)))
            .collect();
        Self::from_boxes(name, boxes)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Centred triangle boxes.
    pub fn boxes(&self) -> &[BoundingBox] {
        &self.boxes
    }

    /// Size of the solid's bounding box.
    pub fn footprint(&self) -> Vec3 {
        BoundingBox::for_boxes(&self.boxes).size()
    }
}

/// A solid with one BVH per canonical rotation.
///
/// Shared between all items made from the same solid and between all clones
/// of a [`Model`].
#[derive(Debug)]
pub struct PreparedSolid {
    pub name: String,
    pub footprint: Vec3,
    pub offset: Vec3,
    trees: Vec<Tree>,
}

impl PreparedSolid {
    /// Builds the base tree once and rotates it into every orientation.
    ///
    /// # Parameters
    /// * `solid` - The centred solid
    /// * `rotations` - The canonical rotation set
    /// * `depth` - BVH depth
    /// * `margin` - Clearance added around every node box
    pub fn build(solid: &Solid, rotations: &RotationSet, depth: usize, margin: f64) -> Self {
        let base = Tree::build(solid.boxes(), depth, margin);
        let trees = rotations
            .iter()
            .map(|m| base.transform(&Transform::new(*m, Vec3::zero())))
            .collect();
        Self {
            name: solid.name().to_string(),
            footprint: solid.footprint(),
            offset: solid.offset,
            trees,
        }
    }

    #[inline]
    pub fn tree(&self, orientation: usize) -> &Tree {
        &self.trees[orientation]
    }

    /// Checks whether the footprint fits the frame in at least one orientation.
    pub fn fits_frame(&self, rotations: &RotationSet, half_extent: &Vec3) -> bool {
        let half = self.footprint * 0.5;
        rotations
            .iter()
            .any(|m| m.apply(half).abs().fits_within(half_extent, EPSILON_GENERAL))
    }

    /// Footprint volume with `margin` added to every dimension.
    pub fn volume_with_spacing(&self, margin: f64) -> f64 {
        (self.footprint + Vec3::splat(margin)).volume()
    }
}

/// The build volume.
///
/// # Fields
/// * `size` - Full extents (width, depth, height), centred at the origin
/// * `spacing` - Minimum distance between two solids
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Frame {
    pub size: Vec3,
    pub spacing: f64,
}

impl Frame {
    /// Creates a frame after validating the parameters.
    pub fn new(size: Vec3, spacing: f64) -> Result<Self, ValidationError> {
        validate_dimension(size.x, "Build volume width")?;
        validate_dimension(size.y, "Build volume depth")?;
        validate_dimension(size.z, "Build volume height")?;
        if !(spacing >= 0.0) || spacing.is_infinite() {
            return Err(ValidationError::InvalidDimension(format!(
                "Spacing must be zero or positive, got: {}",
                spacing
            )));
        }
        Ok(Self { size, spacing })
    }

    pub fn half_extent(&self) -> Vec3 {
        self.size * 0.5
    }

    /// Clearance per solid; two neighbours each contribute half the spacing.
    pub fn margin(&self) -> f64 {
        self.spacing / 2.0
    }

    pub fn volume(&self) -> f64 {
        self.size.volume()
    }
}

/// A placed instance of a prepared solid.
#[derive(Clone, Debug)]
pub struct Item {
    solid: Arc<PreparedSolid>,
    rotation: usize,
    translation: Vec3,
}

impl Item {
    fn new(solid: Arc<PreparedSolid>) -> Self {
        Self {
            solid,
            rotation: 0,
            translation: Vec3::zero(),
        }
    }

    pub fn solid(&self) -> &Arc<PreparedSolid> {
        &self.solid
    }

    #[inline]
    fn tree(&self) -> &Tree {
        self.solid.tree(self.rotation)
    }

    /// Root box of the current orientation at the current position.
    #[inline]
    pub fn placed_root(&self) -> BoundingBox {
        self.tree().root().translate(self.translation)
    }
}

/// Everything needed to reverse one proposed move.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Undo {
    pub index: usize,
    pub rotation: usize,
    pub translation: Vec3,
}

/// Final position of one item.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Placement {
    pub orientation: usize,
    pub translation: Vec3,
    /// Maps the caller's original solid coordinates into the frame.
    pub transform: Transform,
}

/// The packing state: items, volume statistics and frame.
///
/// Only the first `active_count` items take part in validity checks, energy
/// and moves; the rest stay in the list with a zero placement.
#[derive(Clone, Debug)]
pub struct Model {
    items: Vec<Item>,
    rotations: Arc<RotationSet>,
    target_sizes: Vec<Vec3>,
    min_volume: f64,
    max_volume: f64,
    footprint_volume: f64,
    deviation: f64,
    frame: Vec3,
    active_count: usize,
    max_move_attempts: usize,
}

impl Model {
    /// Creates an empty model; all items are active until
    /// [`Model::set_active_count`] says otherwise.
    ///
    /// # Parameters
    /// * `rotations` - The canonical rotation set
    /// * `frame` - Half-extent of the build volume
    /// * `max_move_attempts` - Re-sampling budget of a single move
    pub fn new(rotations: Arc<RotationSet>, frame: Vec3, max_move_attempts: usize) -> Self {
        Self {
            items: Vec::new(),
            rotations,
            target_sizes: Vec::new(),
            min_volume: 0.0,
            max_volume: 0.0,
            footprint_volume: 0.0,
            deviation: 1.0,
            frame,
            active_count: usize::MAX,
            max_move_attempts,
        }
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    /// Largest single root-box volume.
    pub fn min_volume(&self) -> f64 {
        self.min_volume
    }

    /// Sum of all root-box volumes; the energy normalizer.
    pub fn max_volume(&self) -> f64 {
        self.max_volume
    }

    /// Standard deviation of a translation step.
    pub fn deviation(&self) -> f64 {
        self.deviation
    }

    /// Number of items currently taking part in the packing.
    #[inline]
    pub fn active_count(&self) -> usize {
        self.active_count.min(self.items.len())
    }

    /// Restricts validity, energy and moves to the first `count` items.
    pub fn set_active_count(&mut self, count: usize) {
        self.active_count = count;
    }

    /// Overwrites an item's orientation and translation.
    pub fn set_placement(&mut self, index: usize, rotation: usize, translation: Vec3) {
        let item = &mut self.items[index];
        item.rotation = rotation % ROTATION_COUNT;
        item.translation = translation;
    }

    /// Appends an item and seeds a collision-free placement for it.
    ///
    /// The seed is collision-free and inside the frame when there is room;
    /// otherwise it is collision-free at a growing radius.
    ///
    /// # Returns
    /// The index of the new item
    pub fn add<R: Rng + ?Sized>(&mut self, solid: Arc<PreparedSolid>, rng: &mut R) -> usize {
        let index = self.items.len();
        let root_volume = solid.tree(0).root().volume();

        self.min_volume = self.min_volume.max(root_volume);
        self.max_volume += root_volume;
        self.footprint_volume += solid.footprint.volume();
        self.deviation = self.footprint_volume.cbrt() / DEVIATION_DIVISOR;
        self.target_sizes.push(solid.footprint);
        self.items.push(Item::new(solid));

        if index < self.active_count() {
            self.seed_placement(index, rng);
        }
        index
    }

    fn seed_placement<R: Rng + ?Sized>(&mut self, index: usize, rng: &mut R) {
        if !self.seed_in_frame(index, rng) {
            self.seed_by_radius(index, rng);
        }
    }

    /// Looks for a collision-free seed inside the frame.
    ///
    /// Every orientation is tried at the origin first; after that the
    /// translation is drawn uniformly from the slack the rotated footprint
    /// leaves on each axis.
    fn seed_in_frame<R: Rng + ?Sized>(&mut self, index: usize, rng: &mut R) -> bool {
        let size = self.target_sizes[index];
        let first = rng.gen_range(0..ROTATION_COUNT);
        for k in 0..ROTATION_COUNT {
            self.set_placement(index, (first + k) % ROTATION_COUNT, Vec3::zero());
            if self.valid_placement(index) && self.valid_bounds(index, size) {
                return true;
            }
        }

        let slacks: Vec<(usize, Vec3)> = (0..ROTATION_COUNT)
            .filter_map(|rotation| {
                let half = self.rotations.matrix(rotation).apply(size * 0.5).abs();
                let slack = self.frame - half;
                let fits = slack.x >= -EPSILON_GENERAL
                    && slack.y >= -EPSILON_GENERAL
                    && slack.z >= -EPSILON_GENERAL;
                fits.then(|| (rotation, slack.max(&Vec3::zero())))
            })
            .collect();
        if slacks.is_empty() {
            return false;
        }

        for _ in 0..SEED_FRAME_TRIES {
            let (rotation, slack) = slacks[rng.gen_range(0..slacks.len())];
            let translation = Vec3::new(
                rng.gen_range(-slack.x..=slack.x),
                rng.gen_range(-slack.y..=slack.y),
                rng.gen_range(-slack.z..=slack.z),
            );
            self.set_placement(index, rotation, translation);
            if self.valid_placement(index) && self.valid_bounds(index, size) {
                return true;
            }
        }
        false
    }

    /// Pushes the item outwards on a growing sphere until nothing collides.
    ///
    /// Only used when the frame has no room left; the result may lie
    /// outside the frame, which makes that item count fail.
    fn seed_by_radius<R: Rng + ?Sized>(&mut self, index: usize, rng: &mut R) {
        let mut radius = (self.target_sizes[index].length() * 0.1).max(EPSILON_GENERAL);
        while !self.valid_placement(index) {
            let rotation = rng.gen_range(0..ROTATION_COUNT);
            let translation = random_unit_vector(rng) * radius;
            self.set_placement(index, rotation, translation);
            radius *= SEED_RADIUS_GROWTH;
        }
    }

    /// Re-adds every item from scratch with fresh seeds.
    ///
    /// Items outside the active prefix get the zero placement.
    pub fn reset<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let solids: Vec<Arc<PreparedSolid>> =
            self.items.drain(..).map(|item| item.solid).collect();
        self.target_sizes.clear();
        self.min_volume = 0.0;
        self.max_volume = 0.0;
        self.footprint_volume = 0.0;
        for solid in solids {
            self.add(solid, rng);
        }
    }

    /// Checks that item `i` collides with no other active item.
    pub fn valid_placement(&self, i: usize) -> bool {
        let item = &self.items[i];
        let tree = item.tree();
        self.items[..self.active_count()]
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != i)
            .all(|(_, other)| !tree.intersects(other.tree(), item.translation, other.translation))
    }

    /// Checks that a footprint of `size`, rotated and moved like item `i`,
    /// stays inside the frame on every axis.
    pub fn valid_bounds(&self, i: usize, size: Vec3) -> bool {
        let item = &self.items[i];
        let transform = self.rotations.transform(item.rotation, item.translation);
        BoundingBox::from_center_and_size(Vec3::zero(), size)
            .corners()
            .iter()
            .all(|c| transform.apply(*c).abs().fits_within(&self.frame, EPSILON_GENERAL))
    }

    /// Checks every active item for collisions and bounds.
    pub fn is_valid(&self) -> bool {
        (0..self.active_count())
            .all(|i| self.valid_placement(i) && self.valid_bounds(i, self.target_sizes[i]))
    }

    /// Union of the placed root boxes of all active items.
    pub fn bounding_box(&self) -> BoundingBox {
        self.items[..self.active_count()]
            .iter()
            .fold(BoundingBox::EMPTY, |acc, item| acc.union(&item.placed_root()))
    }

    /// Bounding volume of the active items relative to their summed volume.
    ///
    /// Lower is tighter.
    pub fn energy(&self) -> f64 {
        if self.max_volume <= 0.0 {
            return 0.0;
        }
        self.bounding_box().volume() / self.max_volume
    }

    /// Perturbs one random active item until it is valid again.
    ///
    /// A quarter of the draws pick a new orientation, the rest shift the item
    /// along one axis by a Normal(0, deviation) step. Every draw starts from
    /// the saved state.
    ///
    /// # Returns
    /// The undo record and the number of draws used. When the budget runs
    /// out the item is left unchanged and the budget is returned.
    pub fn propose_move<R: Rng + ?Sized>(&mut self, rng: &mut R) -> (Undo, usize) {
        let active = self.active_count();
        if active == 0 {
            let undo = Undo {
                index: self.items.len(),
                rotation: 0,
                translation: Vec3::zero(),
            };
            return (undo, self.max_move_attempts);
        }

        let index = rng.gen_range(0..active);
        let undo = Undo {
            index,
            rotation: self.items[index].rotation,
            translation: self.items[index].translation,
        };
        let size = self.target_sizes[index];
        let deviation = self.deviation;

        for attempt in 1..=self.max_move_attempts {
            let item = &mut self.items[index];
            if rng.gen_range(0..4) == 0 {
                item.rotation = rng.gen_range(0..ROTATION_COUNT);
            } else {
                let axis = Axis::from_index(rng.gen_range(0..3));
                let step: f64 = rng.sample(StandardNormal);
                item.translation = item.translation + axis.unit() * (step * deviation);
            }
            if self.valid_placement(index) && self.valid_bounds(index, size) {
                return (undo, attempt);
            }
            self.undo_move(undo);
        }
        (undo, self.max_move_attempts)
    }

    /// Restores the item named by `undo`.
    pub fn undo_move(&mut self, undo: Undo) {
        if undo.index < self.items.len() {
            self.set_placement(undo.index, undo.rotation, undo.translation);
        }
    }

    /// Current placements; `None` for items outside the active prefix.
    pub fn snapshot(&self) -> Vec<Option<Placement>> {
        let active = self.active_count();
        self.items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                (i < active).then(|| Placement {
                    orientation: item.rotation,
                    translation: item.translation,
                    transform: self
                        .rotations
                        .transform(item.rotation, item.translation)
                        .compose(&Transform::translate(item.solid.offset)),
                })
            })
            .collect()
    }
}

impl Annealable for Model {
    type Undo = Undo;

    fn energy(&self) -> f64 {
        Model::energy(self)
    }

    fn propose_move<R: Rng + ?Sized>(&mut self, rng: &mut R) -> (Undo, usize) {
        Model::propose_move(self, rng)
    }

    fn undo_move(&mut self, undo: Undo) {
        Model::undo_move(self, undo)
    }
}

fn random_unit_vector<R: Rng + ?Sized>(rng: &mut R) -> Vec3 {
    loop {
        let v = Vec3::new(
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
        );
        let length = v.length();
        if length > EPSILON_GENERAL && length <= 1.0 {
            return v * (1.0 / length);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    const IDENTITY: usize = 5;

    fn box_solid(name: &str, size: Vec3) -> Solid {
        Solid::from_boxes(
            name,
            vec![BoundingBox::from_center_and_size(Vec3::zero(), size)],
        )
        .unwrap()
    }

    fn prepared(size: Vec3, margin: f64, rotations: &RotationSet) -> Arc<PreparedSolid> {
        Arc::new(PreparedSolid::build(
            &box_solid("box", size),
            rotations,
            4,
            margin,
        ))
    }

    fn model_with_cubes(count: usize, frame: Vec3, rng: &mut StdRng) -> Model {
        let rotations = Arc::new(RotationSet::build());
        let cube = prepared(Vec3::splat(1.0), 0.0, &rotations);
        let mut model = Model::new(rotations, frame, 20_000);
        for _ in 0..count {
            model.add(Arc::clone(&cube), rng);
        }
        model
    }

    #[test]
    fn solid_is_recentred() {
        let solid = Solid::from_boxes(
            "offset",
            vec![BoundingBox::new(Vec3::new(10.0, 0.0, 0.0), Vec3::new(12.0, 4.0, 6.0))],
        )
        .unwrap();
        assert_eq!(solid.footprint(), Vec3::new(2.0, 4.0, 6.0));
        assert_eq!(solid.boxes()[0].center(), Vec3::zero());
        assert_eq!(solid.offset, Vec3::new(-11.0, -2.0, -3.0));
    }

    #[test]
    fn solid_from_triangles_boxes_each_triangle() {
        let triangles = [
            [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            [[0.0, 0.0, 1.0], [1.0, 0.0, 1.0], [0.0, 1.0, 1.0]],
        ];
        let solid = Solid::from_triangles("wedge", &triangles).unwrap();
        assert_eq!(solid.boxes().len(), 2);
        assert_eq!(solid.footprint(), Vec3::new(1.0, 1.0, 1.0));
    }

    #[test]
    fn solid_rejects_empty_and_non_finite_input() {
        assert!(matches!(
            Solid::from_boxes("none", Vec::new()),
            Err(ValidationError::InvalidGeometry(_))
        ));
        let nan = [[[f64::NAN, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]];
        assert!(Solid::from_triangles("nan", &nan).is_err());
    }

    #[test]
    fn inverted_boxes_are_named_as_such() {
        let inverted = BoundingBox::new(Vec3::splat(1.0), Vec3::zero());
        let err = Solid::from_boxes("flipped", vec![inverted]).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("inverted"), "{}", message);
        assert!(!message.contains("non-finite"), "{}", message);

        let infinite = BoundingBox::new(Vec3::zero(), Vec3::splat(f64::INFINITY));
        let err = Solid::from_boxes("endless", vec![infinite]).unwrap_err();
        assert!(err.to_string().contains("non-finite"));
    }

    #[test]
    fn frame_validation() {
        assert!(Frame::new(Vec3::splat(10.0), 0.0).is_ok());
        assert!(Frame::new(Vec3::new(10.0, 0.0, 10.0), 0.0).is_err());
        assert!(Frame::new(Vec3::splat(10.0), -1.0).is_err());
        assert!(Frame::new(Vec3::splat(10.0), f64::NAN).is_err());
        let frame = Frame::new(Vec3::new(10.0, 20.0, 30.0), 2.0).unwrap();
        assert_eq!(frame.half_extent(), Vec3::new(5.0, 10.0, 15.0));
        assert_eq!(frame.margin(), 1.0);
    }

    #[test]
    fn valid_placement_matches_root_overlap() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut model = model_with_cubes(2, Vec3::splat(10.0), &mut rng);

        model.set_placement(0, IDENTITY, Vec3::zero());
        model.set_placement(1, IDENTITY, Vec3::new(0.5, 0.5, 0.0));
        assert!(model.items[0].placed_root().intersects(&model.items[1].placed_root()));
        assert!(!model.valid_placement(0));
        assert!(!model.valid_placement(1));

        model.set_placement(1, IDENTITY, Vec3::new(0.0, 1.5, 0.0));
        assert!(!model.items[0].placed_root().intersects(&model.items[1].placed_root()));
        assert!(model.valid_placement(0));
        assert!(model.valid_placement(1));
    }

    #[test]
    fn inactive_items_are_ignored() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut model = model_with_cubes(2, Vec3::splat(10.0), &mut rng);
        model.set_placement(0, IDENTITY, Vec3::zero());
        model.set_placement(1, IDENTITY, Vec3::zero());
        assert!(!model.valid_placement(0));

        model.set_active_count(1);
        assert!(model.valid_placement(0));
        assert_eq!(model.active_count(), 1);
        assert_eq!(model.snapshot()[1], None);
    }

    #[test]
    fn valid_bounds_uses_rotated_footprint() {
        let rotations = Arc::new(RotationSet::build());
        let bar = prepared(Vec3::new(4.0, 1.0, 1.0), 0.0, &rotations);
        let mut rng = StdRng::seed_from_u64(3);
        let mut model = Model::new(Arc::clone(&rotations), Vec3::new(2.0, 0.5, 2.0), 100);
        model.add(bar, &mut rng);

        let size = model.target_sizes[0];
        model.set_placement(0, IDENTITY, Vec3::zero());
        assert!(model.valid_bounds(0, size));
        model.set_placement(0, IDENTITY, Vec3::new(0.1, 0.0, 0.0));
        assert!(!model.valid_bounds(0, size));

        // any orientation that lays the bar along Y
        let along_y = (0..ROTATION_COUNT)
            .find(|&r| {
                let axis = rotations.matrix(r).apply(Vec3::new(1.0, 0.0, 0.0)).abs();
                axis == Vec3::new(0.0, 1.0, 0.0)
            })
            .unwrap();
        model.set_placement(0, along_y, Vec3::zero());
        assert!(!model.valid_bounds(0, size));
    }

    #[test]
    fn energy_is_one_for_exact_tiling() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut model = model_with_cubes(2, Vec3::splat(10.0), &mut rng);
        assert_eq!(model.max_volume(), 2.0);
        assert_eq!(model.min_volume(), 1.0);

        model.set_placement(0, IDENTITY, Vec3::zero());
        model.set_placement(1, IDENTITY, Vec3::new(0.0, 1.0, 0.0));
        assert_eq!(model.energy(), 1.0);

        model.set_placement(1, IDENTITY, Vec3::new(0.0, 2.0, 0.0));
        assert_eq!(model.energy(), 1.5);
        assert!(model.energy() >= 0.0);
    }

    #[test]
    fn add_seeds_collision_free_items() {
        let mut rng = StdRng::seed_from_u64(42);
        let model = model_with_cubes(6, Vec3::splat(10.0), &mut rng);
        assert_eq!(model.items.len(), 6);
        for i in 0..model.items.len() {
            assert!(model.valid_placement(i), "item {} collides after seeding", i);
        }
        assert!(model.deviation() > 0.0);
    }

    #[test]
    fn elongated_item_is_seeded_inside_a_tight_frame() {
        let rotations = Arc::new(RotationSet::build());
        let bar = prepared(Vec3::new(4.0, 1.0, 1.0), 0.0, &rotations);
        for seed in 0..10 {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut model = Model::new(Arc::clone(&rotations), Vec3::new(2.2, 0.7, 0.7), 100);
            model.add(Arc::clone(&bar), &mut rng);
            assert!(model.is_valid(), "seed {} left the frame", seed);
        }
    }

    #[test]
    fn crowded_frame_falls_back_to_collision_free_seed() {
        let rotations = Arc::new(RotationSet::build());
        let cube = prepared(Vec3::splat(1.0), 0.0, &rotations);
        let mut rng = StdRng::seed_from_u64(8);
        // room for exactly one cube
        let mut model = Model::new(rotations, Vec3::splat(0.5), 100);
        model.add(Arc::clone(&cube), &mut rng);
        model.add(cube, &mut rng);
        assert!(model.valid_placement(0));
        assert!(model.valid_placement(1));
        assert!(!model.is_valid());
    }

    #[test]
    fn prefixes_of_a_valid_packing_stay_valid() {
        use crate::anneal::{AnnealSchedule, anneal};

        let mut rng = StdRng::seed_from_u64(13);
        let mut model = model_with_cubes(6, Vec3::splat(3.0), &mut rng);
        assert!(model.is_valid());
        let schedule = AnnealSchedule::with_factor(0.5, 5_000);
        let outcome = anneal(&mut model, &schedule, 20_000, &mut rng, |_| {});
        let mut packed = outcome.best;
        assert!(packed.is_valid());

        let mut previous = packed.energy();
        for n in (0..=6).rev() {
            packed.set_active_count(n);
            assert!(packed.is_valid(), "prefix of {} items is invalid", n);
            let energy = packed.energy();
            assert!(energy <= previous + 1e-12, "energy grew at {} items", n);
            previous = energy;
        }
        assert_eq!(packed.energy(), 0.0);
    }

    #[test]
    fn undo_exactly_inverts_a_move() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut model = model_with_cubes(3, Vec3::splat(10.0), &mut rng);
        for _ in 0..50 {
            let before: Vec<(usize, Vec3)> = model
                .items()
                .iter()
                .map(|item| (item.rotation, item.translation))
                .collect();
            let energy = model.energy();

            let (undo, attempts) = model.propose_move(&mut rng);
            assert!(attempts >= 1);
            model.undo_move(undo);

            let after: Vec<(usize, Vec3)> = model
                .items()
                .iter()
                .map(|item| (item.rotation, item.translation))
                .collect();
            assert_eq!(before, after);
            assert_eq!(model.energy(), energy);
        }
    }

    #[test]
    fn accepted_moves_stay_valid() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut model = model_with_cubes(3, Vec3::splat(10.0), &mut rng);
        for _ in 0..200 {
            let (undo, attempts) = model.propose_move(&mut rng);
            if attempts < 20_000 {
                assert!(model.valid_placement(undo.index));
                assert!(model.valid_bounds(undo.index, model.target_sizes[undo.index]));
            }
        }
    }

    #[test]
    fn exhausted_moves_leave_item_unchanged() {
        let rotations = Arc::new(RotationSet::build());
        let block = prepared(Vec3::new(4.0, 2.0, 2.0), 0.0, &rotations);
        let mut rng = StdRng::seed_from_u64(1);
        // frame exactly the size of the block: every shift leaves the frame
        // and only the axis-preserving orientations fit
        let mut model = Model::new(rotations, Vec3::new(2.0, 1.0, 1.0), 50);
        model.add(block, &mut rng);
        model.set_placement(0, IDENTITY, Vec3::zero());

        let mut saturated = false;
        for _ in 0..200 {
            let (undo, attempts) = model.propose_move(&mut rng);
            assert!(attempts <= 50);
            if attempts == 50 {
                saturated = true;
                assert_eq!(model.items[0].translation, undo.translation);
                assert_eq!(model.items[0].rotation, undo.rotation);
            }
            assert!(model.is_valid());
        }
        assert!(saturated);
    }

    #[test]
    fn reset_reseeds_and_zeroes_inactive_items() {
        let mut rng = StdRng::seed_from_u64(21);
        let mut model = model_with_cubes(4, Vec3::splat(10.0), &mut rng);
        model.set_active_count(2);
        model.reset(&mut rng);

        assert_eq!(model.items.len(), 4);
        assert_eq!(model.max_volume(), 4.0);
        assert!(model.is_valid());
        for i in 2..4 {
            assert_eq!(model.items[i].translation, Vec3::zero());
            assert_eq!(model.items[i].rotation, 0);
        }
        let snapshot = model.snapshot();
        assert!(snapshot[0].is_some() && snapshot[1].is_some());
        assert!(snapshot[2].is_none() && snapshot[3].is_none());
    }

    #[test]
    fn clone_shares_trees_but_not_placements() {
        let mut rng = StdRng::seed_from_u64(2);
        let model = model_with_cubes(2, Vec3::splat(10.0), &mut rng);
        let mut copy = model.clone();
        assert!(Arc::ptr_eq(model.items[0].solid(), copy.items[0].solid()));

        copy.set_placement(0, IDENTITY, Vec3::new(3.0, 0.0, 0.0));
        assert_ne!(model.items[0].translation, copy.items[0].translation);
    }

    #[test]
    fn snapshot_transform_includes_centring() {
        let rotations = Arc::new(RotationSet::build());
        let solid = Solid::from_boxes(
            "shifted",
            vec![BoundingBox::new(Vec3::new(10.0, 10.0, 10.0), Vec3::new(11.0, 11.0, 11.0))],
        )
        .unwrap();
        let prepared = Arc::new(PreparedSolid::build(&solid, &rotations, 2, 0.0));
        let mut rng = StdRng::seed_from_u64(4);
        let mut model = Model::new(rotations, Vec3::splat(5.0), 100);
        model.add(prepared, &mut rng);
        model.set_placement(0, IDENTITY, Vec3::new(1.0, 2.0, 3.0));

        let placement = model.snapshot()[0].unwrap();
        assert_eq!(
            placement.transform.apply(Vec3::new(10.5, 10.5, 10.5)),
            Vec3::new(1.0, 2.0, 3.0)
        );
    }

    #[test]
    fn fits_frame_tries_all_orientations() {
        let rotations = RotationSet::build();
        let bar = PreparedSolid::build(
            &box_solid("bar", Vec3::new(1.0, 1.0, 8.0)),
            &rotations,
            2,
            0.0,
        );
        assert!(bar.fits_frame(&rotations, &Vec3::new(4.0, 1.0, 1.0)));
        assert!(!bar.fits_frame(&rotations, &Vec3::splat(2.0)));
        assert_eq!(bar.volume_with_spacing(1.0), 2.0 * 2.0 * 9.0);
    }
}

//! Bounding volume hierarchy over a solid's triangle boxes.
//!
//! A [`Tree`] is a complete binary tree stored as a flat array: node `i` has
//! its children at `2i + 1` and `2i + 2`. Slots below a leaf stay
//! `BoundingBox::EMPTY`. Trees are built once per solid and orientation and
//! never mutated afterwards; runtime placement is applied as a translation
//! offset while testing.

use crate::geometry::Axis;
use crate::types::{BoundingBox, Transform, Vec3};

/// Number of slices per axis when searching for a split (positions 1/16..15/16).
const SPLIT_SLICES: usize = 16;

/// Flat, implicitly indexed BVH.
#[derive(Clone, Debug, PartialEq)]
pub struct Tree {
    boxes: Vec<BoundingBox>,
}

impl Tree {
    /// Builds a tree of fixed `depth` (2^(depth+1) - 1 slots).
    ///
    /// Every node box is the union of its triangle boxes grown by `margin`,
    /// so two trees that do not intersect keep at least `2 * margin` apart.
    ///
    /// # Parameters
    /// * `boxes` - Triangle bounding boxes in build order
    /// * `depth` - Maximum depth below the root
    /// * `margin` - Clearance added around every node box
    pub fn build(boxes: &[BoundingBox], depth: usize, margin: f64) -> Self {
        let mut tree = vec![BoundingBox::EMPTY; (1usize << (depth + 1)) - 1];
        build_node(&mut tree, 0, boxes, depth, margin);
        Self { boxes: tree }
    }

    /// Root box (the whole solid including clearance).
    #[inline]
    pub fn root(&self) -> &BoundingBox {
        &self.boxes[0]
    }

    /// Applies `transform` to every node box.
    ///
    /// Empty slots stay empty, so the shape of the tree is preserved.
    pub fn transform(&self, transform: &Transform) -> Self {
        Self {
            boxes: self.boxes.iter().map(|b| b.transform(transform)).collect(),
        }
    }

    /// Checks whether this tree, moved by `offset`, can overlap `other`
    /// moved by `other_offset`.
    ///
    /// Two overlapping leaves count as a collision; there is no
    /// triangle-level refinement below the leaves.
    pub fn intersects(&self, other: &Tree, offset: Vec3, other_offset: Vec3) -> bool {
        self.intersects_at(other, offset, other_offset, 0, 0)
    }

    fn intersects_at(&self, other: &Tree, t1: Vec3, t2: Vec3, i: usize, j: usize) -> bool {
        let a = self.boxes[i];
        let b = other.boxes[j];
        if !a.translate(t1).intersects(&b.translate(t2)) {
            return false;
        }

        let (i1, i2) = (2 * i + 1, 2 * i + 2);
        let (j1, j2) = (2 * j + 1, 2 * j + 2);
        match (self.has_children(i), other.has_children(j)) {
            (false, false) => true,
            (false, true) => {
                self.intersects_at(other, t1, t2, i, j1) || self.intersects_at(other, t1, t2, i, j2)
            }
            (true, false) => {
                self.intersects_at(other, t1, t2, i1, j) || self.intersects_at(other, t1, t2, i2, j)
            }
            (true, true) => {
                self.intersects_at(other, t1, t2, i1, j1)
                    || self.intersects_at(other, t1, t2, i1, j2)
                    || self.intersects_at(other, t1, t2, i2, j1)
                    || self.intersects_at(other, t1, t2, i2, j2)
            }
        }
    }

    #[inline]
    fn has_children(&self, i: usize) -> bool {
        let left = 2 * i + 1;
        left + 1 < self.boxes.len()
            && !(self.boxes[left].is_empty() && self.boxes[left + 1].is_empty())
    }
}

fn build_node(tree: &mut [BoundingBox], index: usize, boxes: &[BoundingBox], depth: usize, margin: f64) {
    let node = BoundingBox::for_boxes(boxes).inflate(margin);
    tree[index] = node;
    if depth == 0 || node.is_empty() {
        return;
    }

    let Some(split) = best_split(boxes, &node) else {
        return;
    };
    let (lower, upper) = partition(boxes, split);
    build_node(tree, 2 * index + 1, &lower, depth - 1, margin);
    build_node(tree, 2 * index + 2, &upper, depth - 1, margin);
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Split {
    axis: Axis,
    point: f64,
    /// Straddling boxes join the lower partition when `true`.
    side: bool,
}

/// Searches axis, then position, then side for the cheapest split.
///
/// Returns `None` when no split beats the unsplit node volume. Ties keep
/// the first split found.
fn best_split(boxes: &[BoundingBox], node: &BoundingBox) -> Option<Split> {
    let mut best_cost = node.volume();
    let mut best = None;
    let size = node.size();

    for axis in Axis::ALL {
        for slice in 1..SPLIT_SLICES {
            let fraction = slice as f64 / SPLIT_SLICES as f64;
            let point = node.min[axis] + size[axis] * fraction;
            for side in [false, true] {
                let split = Split { axis, point, side };
                let Some(cost) = split_cost(boxes, split) else {
                    continue;
                };
                if cost < best_cost {
                    best_cost = cost;
                    best = Some(split);
                }
            }
        }
    }
    best
}

/// Whether a box reaches below and above the split point.
#[inline]
fn classify(b: &BoundingBox, axis: Axis, point: f64) -> (bool, bool) {
    (b.min[axis] <= point, b.max[axis] >= point)
}

fn major_box(boxes: &[BoundingBox], split: Split) -> BoundingBox {
    boxes
        .iter()
        .filter(|b| {
            let (lower, upper) = classify(b, split.axis, split.point);
            (lower && upper) || (lower && split.side) || (upper && !split.side)
        })
        .fold(BoundingBox::EMPTY, |acc, b| acc.union(b))
}

/// vol(major) + vol(minor) - vol(major ∩ minor), or `None` if either
/// side would be empty.
fn split_cost(boxes: &[BoundingBox], split: Split) -> Option<f64> {
    let major = major_box(boxes, split);
    let minor = boxes
        .iter()
        .filter(|b| !major.contains_box(b))
        .fold(BoundingBox::EMPTY, |acc, b| acc.union(b));
    if major.is_empty() || minor.is_empty() {
        return None;
    }
    Some(major.volume() + minor.volume() - major.intersection(&minor).volume())
}

/// Splits `boxes` into (lower child, upper child).
fn partition(boxes: &[BoundingBox], split: Split) -> (Vec<BoundingBox>, Vec<BoundingBox>) {
    let major = major_box(boxes, split);
    let (inside, outside): (Vec<BoundingBox>, Vec<BoundingBox>) =
        boxes.iter().copied().partition(|b| major.contains_box(b));
    if split.side {
        (inside, outside)
    } else {
        (outside, inside)
    }
}

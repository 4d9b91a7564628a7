//! Common value types for 3D geometry.
//!
//! This module defines the small, copyable building blocks every other
//! module works with: vectors, rotation matrices, rigid transforms and
//! axis-aligned bounding boxes.

use std::ops::{Add, Index, Mul, Neg, Sub};

use crate::geometry::Axis;

/// Global numerical tolerance for floating-point comparisons.
pub const EPSILON_GENERAL: f64 = 1e-9;

/// Represents a 3D vector or point in space.
///
/// # Examples
/// ```
/// use solid_packer::types::Vec3;
///
/// let position = Vec3::new(1.0, 2.0, 3.0);
/// let size = Vec3::new(10.0, 20.0, 30.0);
/// let center = position + size * 0.5;
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    /// Creates a new 3D vector.
    #[inline]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Creates a zero vector (origin).
    #[inline]
    pub const fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    /// Creates a vector with all components set to `value`.
    #[inline]
    pub const fn splat(value: f64) -> Self {
        Self::new(value, value, value)
    }

    /// Converts to array format for API compatibility.
    #[inline]
    pub const fn as_array(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    /// Creates from array format.
    #[inline]
    pub const fn from_array(array: [f64; 3]) -> Self {
        Self::new(array[0], array[1], array[2])
    }

    /// Calculates the volume (product of all components).
    ///
    /// Useful for size vectors.
    #[inline]
    pub fn volume(&self) -> f64 {
        self.x * self.y * self.z
    }

    /// Component-wise minimum.
    #[inline]
    pub fn min(&self, other: &Self) -> Self {
        Self::new(self.x.min(other.x), self.y.min(other.y), self.z.min(other.z))
    }

    /// Component-wise maximum.
    #[inline]
    pub fn max(&self, other: &Self) -> Self {
        Self::new(self.x.max(other.x), self.y.max(other.y), self.z.max(other.z))
    }

    /// Component-wise absolute value.
    #[inline]
    pub fn abs(&self) -> Self {
        Self::new(self.x.abs(), self.y.abs(), self.z.abs())
    }

    /// Euclidean length.
    #[inline]
    pub fn length(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Returns the unit vector pointing in the same direction.
    ///
    /// The zero vector is returned unchanged.
    #[inline]
    pub fn normalize(&self) -> Self {
        let length = self.length();
        if length <= 0.0 {
            *self
        } else {
            *self * (1.0 / length)
        }
    }

    /// Checks if all components are finite.
    #[inline]
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Checks if the vector fits within another vector (component-wise <=).
    ///
    /// # Parameters
    /// * `container` - The outer vector (e.g., frame half-extent)
    /// * `tolerance` - Numerical tolerance for the comparison
    #[inline]
    pub fn fits_within(&self, container: &Self, tolerance: f64) -> bool {
        self.x <= container.x + tolerance
            && self.y <= container.y + tolerance
            && self.z <= container.z + tolerance
    }
}

impl Add for Vec3 {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self::Output {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Self) -> Self::Output {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Neg for Vec3 {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self::Output {
        Self::new(-self.x, -self.y, -self.z)
    }
}

impl Mul<f64> for Vec3 {
    type Output = Self;

    #[inline]
    fn mul(self, scalar: f64) -> Self::Output {
        Self::new(self.x * scalar, self.y * scalar, self.z * scalar)
    }
}

impl Index<Axis> for Vec3 {
    type Output = f64;

    #[inline]
    fn index(&self, axis: Axis) -> &f64 {
        match axis {
            Axis::X => &self.x,
            Axis::Y => &self.y,
            Axis::Z => &self.z,
        }
    }
}

impl From<[f64; 3]> for Vec3 {
    #[inline]
    fn from(array: [f64; 3]) -> Self {
        Self::from_array(array)
    }
}

impl From<Vec3> for [f64; 3] {
    #[inline]
    fn from(vec: Vec3) -> Self {
        vec.as_array()
    }
}

/// Row-major 3×3 matrix, used for the canonical rotations.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Matrix3 {
    pub rows: [[f64; 3]; 3],
}

impl Matrix3 {
    pub const IDENTITY: Self = Self {
        rows: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
    };

    /// Rotation about a unit `axis` by `quarter_turns` × 90°.
    ///
    /// Sine and cosine are taken from the exact quarter-turn table, so
    /// rotations about coordinate axes have entries in {-1, 0, 1}.
    pub fn quarter_turns(axis: Vec3, quarter_turns: i32) -> Self {
        let (sin, cos) = match quarter_turns.rem_euclid(4) {
            0 => (0.0, 1.0),
            1 => (1.0, 0.0),
            2 => (0.0, -1.0),
            _ => (-1.0, 0.0),
        };
        let Vec3 { x, y, z } = axis.normalize();
        let t = 1.0 - cos;
        Self {
            rows: [
                [t * x * x + cos, t * x * y - sin * z, t * x * z + sin * y],
                [t * x * y + sin * z, t * y * y + cos, t * y * z - sin * x],
                [t * x * z - sin * y, t * y * z + sin * x, t * z * z + cos],
            ],
        }
    }

    /// Matrix product `self · other` (apply `other` first).
    pub fn compose(&self, other: &Self) -> Self {
        let mut rows = [[0.0; 3]; 3];
        for (r, row) in rows.iter_mut().enumerate() {
            for (c, value) in row.iter_mut().enumerate() {
                *value = (0..3).map(|k| self.rows[r][k] * other.rows[k][c]).sum();
            }
        }
        Self { rows }
    }

    /// Applies the matrix to a vector.
    #[inline]
    pub fn apply(&self, v: Vec3) -> Vec3 {
        let [a, b, c] = self.rows;
        Vec3::new(
            a[0] * v.x + a[1] * v.y + a[2] * v.z,
            b[0] * v.x + b[1] * v.y + b[2] * v.z,
            c[0] * v.x + c[1] * v.y + c[2] * v.z,
        )
    }

    /// Determinant; +1 for proper rotations.
    pub fn determinant(&self) -> f64 {
        let [a, b, c] = self.rows;
        a[0] * (b[1] * c[2] - b[2] * c[1]) - a[1] * (b[0] * c[2] - b[2] * c[0])
            + a[2] * (b[0] * c[1] - b[1] * c[0])
    }
}

/// Rigid affine map: rotate first, then translate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub rotation: Matrix3,
    pub translation: Vec3,
}

impl Transform {
    #[inline]
    pub const fn new(rotation: Matrix3, translation: Vec3) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Pure translation.
    #[inline]
    pub const fn translate(translation: Vec3) -> Self {
        Self::new(Matrix3::IDENTITY, translation)
    }

    /// Applies the transform to a point.
    #[inline]
    pub fn apply(&self, point: Vec3) -> Vec3 {
        self.rotation.apply(point) + self.translation
    }

    /// Composition `self ∘ other` (apply `other` first).
    pub fn compose(&self, other: &Self) -> Self {
        Self::new(
            self.rotation.compose(&other.rotation),
            self.rotation.apply(other.translation) + self.translation,
        )
    }

    /// Row-major 4×4 affine matrix `[R | t; 0 0 0 1]`.
    pub fn to_matrix(&self) -> [[f64; 4]; 4] {
        let [a, b, c] = self.rotation.rows;
        let t = self.translation;
        [
            [a[0], a[1], a[2], t.x],
            [b[0], b[1], b[2], t.y],
            [c[0], c[1], c[2], t.z],
            [0.0, 0.0, 0.0, 1.0],
        ]
    }
}

/// Represents an Axis-Aligned Bounding Box (AABB).
///
/// `BoundingBox::EMPTY` has no extent: it is the identity of `union`,
/// never intersects and never contains anything.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    /// Minimum corner
    pub min: Vec3,
    /// Maximum corner
    pub max: Vec3,
}

impl BoundingBox {
    pub const EMPTY: Self = Self {
        min: Vec3::splat(f64::INFINITY),
        max: Vec3::splat(f64::NEG_INFINITY),
    };

    /// Creates a new bounding box.
    #[inline]
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Creates a bounding box centred at `center` with the given size.
    #[inline]
    pub fn from_center_and_size(center: Vec3, size: Vec3) -> Self {
        let half = size * 0.5;
        Self::new(center - half, center + half)
    }

    /// Smallest box containing all given points.
    pub fn from_points(points: &[Vec3]) -> Self {
        points.iter().fold(Self::EMPTY, |acc, p| Self {
            min: acc.min.min(p),
            max: acc.max.max(p),
        })
    }

    /// Union of all given boxes.
    pub fn for_boxes(boxes: &[BoundingBox]) -> Self {
        boxes.iter().fold(Self::EMPTY, |acc, b| acc.union(b))
    }

    /// Checks whether the box has no extent.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// Returns the smallest box containing both boxes.
    #[inline]
    pub fn union(&self, other: &Self) -> Self {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Self::new(self.min.min(&other.min), self.max.max(&other.max))
    }

    /// Returns the overlapping region, or `EMPTY`.
    #[inline]
    pub fn intersection(&self, other: &Self) -> Self {
        let result = Self::new(self.min.max(&other.min), self.max.min(&other.max));
        if result.is_empty() { Self::EMPTY } else { result }
    }

    /// Checks if two bounding boxes intersect.
    ///
    /// Boxes that only touch count as intersecting.
    #[inline]
    pub fn intersects(&self, other: &Self) -> bool {
        !(self.is_empty()
            || other.is_empty()
            || self.min.x > other.max.x
            || self.max.x < other.min.x
            || self.min.y > other.max.y
            || self.max.y < other.min.y
            || self.min.z > other.max.z
            || self.max.z < other.min.z)
    }

    /// Checks if `other` lies completely inside this box.
    #[inline]
    pub fn contains_box(&self, other: &Self) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.min.x <= other.min.x
            && self.min.y <= other.min.y
            && self.min.z <= other.min.z
            && self.max.x >= other.max.x
            && self.max.y >= other.max.y
            && self.max.z >= other.max.z
    }

    /// Returns the dimensions (width, depth, height).
    #[inline]
    pub fn size(&self) -> Vec3 {
        if self.is_empty() {
            Vec3::zero()
        } else {
            self.max - self.min
        }
    }

    /// Returns the center point.
    #[inline]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Volume; zero for `EMPTY`.
    #[inline]
    pub fn volume(&self) -> f64 {
        self.size().volume()
    }

    /// Grows the box by `margin` on every side.
    #[inline]
    pub fn inflate(&self, margin: f64) -> Self {
        if self.is_empty() {
            return Self::EMPTY;
        }
        let offset = Vec3::splat(margin);
        Self::new(self.min - offset, self.max + offset)
    }

    /// Moves the box by `offset`.
    #[inline]
    pub fn translate(&self, offset: Vec3) -> Self {
        if self.is_empty() {
            return Self::EMPTY;
        }
        Self::new(self.min + offset, self.max + offset)
    }

    /// The 8 corners, ordered by bit pattern (x = bit 0, y = bit 1, z = bit 2).
    pub fn corners(&self) -> [Vec3; 8] {
        let (lo, hi) = (self.min, self.max);
        std::array::from_fn(|i| {
            Vec3::new(
                if i & 1 == 0 { lo.x } else { hi.x },
                if i & 2 == 0 { lo.y } else { hi.y },
                if i & 4 == 0 { lo.z } else { hi.z },
            )
        })
    }

    /// Transforms all 8 corners and re-derives an AABB.
    ///
    /// For arbitrary rotations this over-approximates; for the canonical
    /// rotations it is exact.
    pub fn transform(&self, transform: &Transform) -> Self {
        if self.is_empty() {
            return Self::EMPTY;
        }
        let corners = self.corners().map(|c| transform.apply(c));
        Self::from_points(&corners)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box() -> BoundingBox {
        BoundingBox::new(Vec3::zero(), Vec3::splat(1.0))
    }

    #[test]
    fn test_vec3_operations() {
        let a = Vec3::new(1.0, 2.0, 3.0);
        let b = Vec3::new(4.0, 5.0, 6.0);

        assert_eq!(a + b, Vec3::new(5.0, 7.0, 9.0));
        assert_eq!(b - a, Vec3::new(3.0, 3.0, 3.0));
        assert_eq!(a * 2.0, Vec3::new(2.0, 4.0, 6.0));
        assert_eq!(-a, Vec3::new(-1.0, -2.0, -3.0));
        assert_eq!(Vec3::new(-1.0, 2.0, -3.0).abs(), a);
        assert_eq!(a.min(&Vec3::new(0.0, 5.0, 1.0)), Vec3::new(0.0, 2.0, 1.0));
        assert_eq!(a[Axis::Y], 2.0);
    }

    #[test]
    fn test_vec3_normalize() {
        let v = Vec3::new(3.0, 0.0, 4.0).normalize();
        assert!((v.length() - 1.0).abs() < EPSILON_GENERAL);
        assert_eq!(Vec3::zero().normalize(), Vec3::zero());
    }

    #[test]
    fn test_empty_box_is_union_identity() {
        let b = unit_box();
        assert_eq!(BoundingBox::EMPTY.union(&b), b);
        assert_eq!(b.union(&BoundingBox::EMPTY), b);
        assert!(BoundingBox::EMPTY.union(&BoundingBox::EMPTY).is_empty());
        assert_eq!(BoundingBox::EMPTY.volume(), 0.0);
        assert_eq!(BoundingBox::for_boxes(&[]), BoundingBox::EMPTY);
    }

    #[test]
    fn test_empty_box_never_intersects_or_contains() {
        let b = unit_box();
        assert!(!BoundingBox::EMPTY.intersects(&b));
        assert!(!b.intersects(&BoundingBox::EMPTY));
        assert!(!BoundingBox::EMPTY.contains_box(&b));
        assert!(!b.contains_box(&BoundingBox::EMPTY));
        assert!(BoundingBox::EMPTY.inflate(2.0).is_empty());
        assert!(BoundingBox::EMPTY.translate(Vec3::splat(1.0)).is_empty());
        let rotation = Transform::new(
            Matrix3::quarter_turns(Vec3::new(0.0, 0.0, 1.0), 1),
            Vec3::zero(),
        );
        assert!(BoundingBox::EMPTY.transform(&rotation).is_empty());
    }

    #[test]
    fn test_bounding_box_intersects_touching() {
        let a = unit_box();
        let touching = a.translate(Vec3::new(1.0, 0.0, 0.0));
        let apart = a.translate(Vec3::new(1.5, 0.0, 0.0));

        assert!(a.intersects(&touching));
        assert!(!a.intersects(&apart));
    }

    #[test]
    fn test_bounding_box_intersection_volume() {
        let a = BoundingBox::new(Vec3::zero(), Vec3::splat(10.0));
        let b = BoundingBox::new(Vec3::splat(5.0), Vec3::splat(15.0));
        let c = BoundingBox::new(Vec3::splat(20.0), Vec3::splat(30.0));

        assert!((a.intersection(&b).volume() - 125.0).abs() < EPSILON_GENERAL);
        assert!(a.intersection(&c).is_empty());
        assert!((a.union(&b).volume() - 3375.0).abs() < EPSILON_GENERAL);
    }

    #[test]
    fn test_contains_and_inflate() {
        let a = unit_box();
        let grown = a.inflate(0.5);
        assert!(grown.contains_box(&a));
        assert!(!a.contains_box(&grown));
        assert_eq!(grown.size(), Vec3::splat(2.0));
    }

    #[test]
    fn test_quarter_turn_is_exact() {
        let m = Matrix3::quarter_turns(Vec3::new(0.0, 0.0, 1.0), 1);
        assert_eq!(m.apply(Vec3::new(1.0, 0.0, 0.0)), Vec3::new(0.0, 1.0, 0.0));
        assert_eq!(m.determinant(), 1.0);
        for row in m.rows {
            for value in row {
                assert!(value == 0.0 || value.abs() == 1.0);
            }
        }
    }

    #[test]
    fn test_transform_box_rotates_extent() {
        let b = BoundingBox::new(Vec3::zero(), Vec3::new(2.0, 1.0, 1.0));
        let rotation = Transform::new(
            Matrix3::quarter_turns(Vec3::new(0.0, 0.0, 1.0), 1),
            Vec3::new(10.0, 0.0, 0.0),
        );
        let moved = b.transform(&rotation);
        assert_eq!(moved.size(), Vec3::new(1.0, 2.0, 1.0));
        assert_eq!(moved.min, Vec3::new(9.0, 0.0, 0.0));
    }

    #[test]
    fn test_transform_matrix_layout() {
        let t = Transform::translate(Vec3::new(1.0, 2.0, 3.0));
        let m = t.to_matrix();
        assert_eq!(m[0], [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(m[2], [0.0, 0.0, 1.0, 3.0]);
        assert_eq!(m[3], [0.0, 0.0, 0.0, 1.0]);

        let r = Transform::new(Matrix3::quarter_turns(Vec3::new(0.0, 0.0, 1.0), 1), Vec3::zero());
        let composed = t.compose(&r);
        assert_eq!(
            composed.apply(Vec3::new(1.0, 0.0, 0.0)),
            Vec3::new(1.0, 3.0, 3.0)
        );
    }
}

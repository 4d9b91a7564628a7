//! Coordinate axes and the canonical rotation set.
//!
//! The 24 rotations of a cube are enumerated in a fixed order: orientation
//! indices are stored in undo records and placement snapshots, so the order
//! is part of the data format.

use crate::types::{Matrix3, Transform, Vec3};

/// Number of canonical orientations (rotation group of the cube).
pub const ROTATION_COUNT: usize = 24;

/// A coordinate axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    /// Unit vector along the axis.
    pub fn unit(self) -> Vec3 {
        match self {
            Axis::X => Vec3::new(1.0, 0.0, 0.0),
            Axis::Y => Vec3::new(0.0, 1.0, 0.0),
            Axis::Z => Vec3::new(0.0, 0.0, 1.0),
        }
    }

    /// Axis by index 0..3; larger indices wrap.
    pub fn from_index(index: usize) -> Self {
        Self::ALL[index % 3]
    }
}

/// The ordered canonical rotations.
///
/// Built once per run with [`RotationSet::build`] and shared read-only.
#[derive(Clone, Debug, PartialEq)]
pub struct RotationSet {
    rotations: [Matrix3; ROTATION_COUNT],
}

impl RotationSet {
    /// Enumerates the 24 rotations.
    ///
    /// Index = `turn * 6 + sign * 3 + axis`: a quarter turn about +Z,
    /// followed by the rotation carrying +Z onto the signed axis
    /// (sign -1 first, axes in X, Y, Z order).
    pub fn build() -> Self {
        let up = Axis::Z.unit();
        let mut rotations = [Matrix3::IDENTITY; ROTATION_COUNT];
        let mut index = 0;
        for turn in 0..4 {
            let spin = Matrix3::quarter_turns(up, turn);
            for sign in [-1.0, 1.0] {
                for axis in Axis::ALL {
                    let target = axis.unit() * sign;
                    rotations[index] = rotate_to(up, target).compose(&spin);
                    index += 1;
                }
            }
        }
        debug_assert!(rotations.iter().all(|m| m.determinant() == 1.0));
        Self { rotations }
    }

    /// Rotation matrix for an orientation index.
    ///
    /// # Panics
    /// If `index >= ROTATION_COUNT`.
    #[inline]
    pub fn matrix(&self, index: usize) -> &Matrix3 {
        &self.rotations[index]
    }

    /// Rotation followed by a translation.
    #[inline]
    pub fn transform(&self, index: usize, translation: Vec3) -> Transform {
        Transform::new(*self.matrix(index), translation)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Matrix3> {
        self.rotations.iter()
    }
}

/// Minimal rotation carrying unit vector `from` onto unit vector `to`,
/// both restricted to signed coordinate axes.
fn rotate_to(from: Vec3, to: Vec3) -> Matrix3 {
    let dot = from.x * to.x + from.y * to.y + from.z * to.z;
    if dot >= 1.0 {
        return Matrix3::IDENTITY;
    }
    if dot <= -1.0 {
        return Matrix3::quarter_turns(perpendicular(from), 2);
    }
    let axis = Vec3::new(
        from.y * to.z - from.z * to.y,
        from.z * to.x - from.x * to.z,
        from.x * to.y - from.y * to.x,
    );
    Matrix3::quarter_turns(axis, 1)
}

fn perpendicular(v: Vec3) -> Vec3 {
    if v.x == 0.0 && v.y == 0.0 {
        Axis::Y.unit()
    } else {
        Vec3::new(-v.y, v.x, 0.0).normalize()
    }
}

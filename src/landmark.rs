//! Hand landmark sets as reported by a [`Detector`].
//!
//! [`Detector`]: crate::detector::Detector

use std::ops::Index;

type Position = [f32; 3];

/// An ordered set of landmarks belonging to one detected hand.
///
/// Coordinates are normalized: `x` and `y` are relative to the frame's width and height (so they
/// are in `[0, 1]` for points inside the frame, although detectors may report values slightly
/// outside of that range near the edges). `z` is relative depth and unused by the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkSet {
    positions: Box<[Position]>,
}

impl LandmarkSet {
    /// Creates a landmark set from 3D positions.
    pub fn new(positions: impl Into<Box<[Position]>>) -> Self {
        Self {
            positions: positions.into(),
        }
    }

    /// Creates a landmark set from 2D positions, setting `z` to `0.0`.
    pub fn from_xy<I: IntoIterator<Item = [f32; 2]>>(points: I) -> Self {
        Self {
            positions: points.into_iter().map(|[x, y]| [x, y, 0.0]).collect(),
        }
    }

    /// Creates a landmark set from a flat `[x0, y0, z0, x1, y1, z1, ...]` slice.
    ///
    /// Returns [`None`] if the length of `coords` is not a multiple of 3.
    pub fn from_flat(coords: &[f32]) -> Option<Self> {
        if coords.len() % 3 != 0 {
            return None;
        }
        Some(Self {
            positions: coords
                .chunks_exact(3)
                .map(|c| [c[0], c[1], c[2]])
                .collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Landmark> + Clone + '_ {
        self.positions.iter().map(|&pos| Landmark::new(pos))
    }

    pub fn get(&self, index: usize) -> Landmark {
        Landmark::new(self.positions[index])
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    /// Flattens the positions into `[x0, y0, z0, x1, y1, z1, ...]`.
    pub fn to_flat(&self) -> Vec<f32> {
        self.positions.iter().flatten().copied().collect()
    }

    pub(crate) fn map_positions(&mut self, mut f: impl FnMut(Position) -> Position) {
        for pos in self.positions.iter_mut() {
            *pos = f(*pos);
        }
    }
}

impl Index<usize> for LandmarkSet {
    type Output = Position;

    fn index(&self, index: usize) -> &Self::Output {
        &self.positions[index]
    }
}

/// A single normalized landmark.
#[derive(Debug, PartialEq, PartialOrd, Clone, Copy)]
pub struct Landmark {
    pos: Position,
}

impl Landmark {
    pub fn new(position: Position) -> Self {
        Self { pos: position }
    }

    #[inline]
    pub fn position(&self) -> Position {
        self.pos
    }

    #[inline]
    pub fn x(&self) -> f32 {
        self.pos[0]
    }

    #[inline]
    pub fn y(&self) -> f32 {
        self.pos[1]
    }

    #[inline]
    pub fn z(&self) -> f32 {
        self.pos[2]
    }
}

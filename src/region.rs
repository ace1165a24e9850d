//! Region algebra.
//!
//! A [`Region`] is an axis-aligned integer box over up to [`MAX_DIMENSIONS`]
//! axes. It is a plain `Copy` value: origin and size live in fixed-size
//! inline arrays so regions can be passed around the engine without
//! allocation. Axis 0 is the fastest-varying axis of any buffer laid out
//! over a region. That storage caps a region at [`MAX_DIMENSIONS`] axes;
//! [`Region::try_new`] and [`Region::try_appended`] report the cap as an
//! error where the axis count comes from outside the program.

use std::fmt;
use thiserror::Error;

/// Maximum number of axes a region can describe.
pub const MAX_DIMENSIONS: usize = 4;

/// Why a region could not be built.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegionError {
    #[error("Region with {found} axes exceeds the supported {max}")]
    TooManyAxes { found: usize, max: usize },

    #[error("Region origin has {origin} axes but size has {size}")]
    AxisCountMismatch { origin: usize, size: usize },
}

/// A pixel index. Only the first `Region::dim()` entries are meaningful.
pub type Index = [i64; MAX_DIMENSIONS];

/// Axis-aligned box: `origin[axis] .. origin[axis] + size[axis]` on every axis,
/// over at most [`MAX_DIMENSIONS`] axes.
///
/// Unused trailing entries are always zero, so the derived equality and hash
/// only see the meaningful axes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Region {
    dim: usize,
    origin: Index,
    size: [usize; MAX_DIMENSIONS],
}

impl Region {
    /// Build a region from per-axis origin and size.
    ///
    /// Panics if the slices differ in length or exceed [`MAX_DIMENSIONS`].
    pub fn new(origin: &[i64], size: &[usize]) -> Self {
        assert_eq!(
            origin.len(),
            size.len(),
            "region origin and size must have the same dimension"
        );
        assert!(
            origin.len() <= MAX_DIMENSIONS,
            "regions support at most {} dimensions",
            MAX_DIMENSIONS
        );
        let dim = origin.len();
        let mut region = Region {
            dim,
            ..Default::default()
        };
        region.origin[..dim].copy_from_slice(origin);
        region.size[..dim].copy_from_slice(size);
        region
    }

    /// Checked form of [`Region::new`].
    pub fn try_new(origin: &[i64], size: &[usize]) -> Result<Self, RegionError> {
        if origin.len() != size.len() {
            return Err(RegionError::AxisCountMismatch {
                origin: origin.len(),
                size: size.len(),
            });
        }
        if size.len() > MAX_DIMENSIONS {
            return Err(RegionError::TooManyAxes {
                found: size.len(),
                max: MAX_DIMENSIONS,
            });
        }
        Ok(Self::new(origin, size))
    }

    /// Region of the given size anchored at the zero index.
    pub fn from_size(size: &[usize]) -> Self {
        let origin = [0i64; MAX_DIMENSIONS];
        Self::new(&origin[..size.len()], size)
    }

    /// Explicit empty region of dimension `dim`.
    pub fn empty(dim: usize) -> Self {
        let zeros = [0usize; MAX_DIMENSIONS];
        Self::from_size(&zeros[..dim])
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    #[inline]
    pub fn origin(&self) -> &[i64] {
        &self.origin[..self.dim]
    }

    #[inline]
    pub fn size(&self) -> &[usize] {
        &self.size[..self.dim]
    }

    /// Exclusive upper bound along `axis`.
    #[inline]
    pub fn upper(&self, axis: usize) -> i64 {
        self.origin[axis] + self.size[axis] as i64
    }

    /// Number of pixels covered. A zero-dimensional region covers nothing.
    pub fn num_elements(&self) -> usize {
        if self.dim == 0 {
            return 0;
        }
        self.size().iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.num_elements() == 0
    }

    /// Largest region contained in both `self` and `other`.
    ///
    /// Disjoint regions produce an empty region whose disjoint axes have
    /// size zero; sizes are never negative.
    pub fn intersect(&self, other: &Region) -> Region {
        debug_assert_eq!(self.dim, other.dim, "intersecting regions of different dimension");
        let dim = self.dim.min(other.dim);
        let mut out = Region {
            dim,
            ..Default::default()
        };
        for axis in 0..dim {
            let lo = self.origin[axis].max(other.origin[axis]);
            let hi = self.upper(axis).min(other.upper(axis));
            out.origin[axis] = lo;
            out.size[axis] = if hi > lo { (hi - lo) as usize } else { 0 };
        }
        out
    }

    /// Smallest region containing both. An empty operand is ignored.
    pub fn union(&self, other: &Region) -> Region {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        debug_assert_eq!(self.dim, other.dim, "joining regions of different dimension");
        let mut out = *self;
        for axis in 0..self.dim {
            let lo = self.origin[axis].min(other.origin[axis]);
            let hi = self.upper(axis).max(other.upper(axis));
            out.origin[axis] = lo;
            out.size[axis] = (hi - lo) as usize;
        }
        out
    }

    pub fn contains_index(&self, index: &[i64]) -> bool {
        index.len() >= self.dim
            && (0..self.dim).all(|axis| {
                index[axis] >= self.origin[axis] && index[axis] < self.upper(axis)
            })
    }

    /// Whether `inner` lies entirely inside `self`. The empty region is
    /// contained in every region.
    pub fn contains(&self, inner: &Region) -> bool {
        if inner.is_empty() {
            return true;
        }
        self.dim == inner.dim
            && (0..self.dim).all(|axis| {
                inner.origin[axis] >= self.origin[axis] && inner.upper(axis) <= self.upper(axis)
            })
    }

    /// Grow by `lower` below the origin and `upper` above the end on each axis.
    pub fn pad(&self, lower: &[usize], upper: &[usize]) -> Region {
        let mut out = *self;
        for axis in 0..self.dim {
            let lo = lower.get(axis).copied().unwrap_or(0);
            let hi = upper.get(axis).copied().unwrap_or(0);
            out.origin[axis] -= lo as i64;
            out.size[axis] += lo + hi;
        }
        out
    }

    /// Copy of `self` with one axis replaced.
    pub fn with_axis(&self, axis: usize, origin: i64, size: usize) -> Region {
        let mut out = *self;
        out.origin[axis] = origin;
        out.size[axis] = size;
        out
    }

    /// Checked form of [`Region::appended`].
    pub fn try_appended(&self, origin: i64, size: usize) -> Result<Region, RegionError> {
        if self.dim >= MAX_DIMENSIONS {
            return Err(RegionError::TooManyAxes {
                found: self.dim + 1,
                max: MAX_DIMENSIONS,
            });
        }
        Ok(self.appended(origin, size))
    }

    /// Region with one more (slowest-varying) axis appended.
    ///
    /// Panics if `self` already has [`MAX_DIMENSIONS`] axes.
    pub fn appended(&self, origin: i64, size: usize) -> Region {
        assert!(
            self.dim < MAX_DIMENSIONS,
            "cannot append an axis to a {}-dimensional region",
            self.dim
        );
        let mut out = *self;
        out.origin[self.dim] = origin;
        out.size[self.dim] = size;
        out.dim += 1;
        out
    }

    /// Region with the slowest-varying axis removed.
    pub fn truncated(&self) -> Region {
        let mut out = *self;
        if out.dim > 0 {
            out.dim -= 1;
            out.origin[out.dim] = 0;
            out.size[out.dim] = 0;
        }
        out
    }

    /// Linear offset of `index` in a buffer laid out over this region.
    pub fn offset_of(&self, index: &[i64]) -> Option<usize> {
        if !self.contains_index(index) {
            return None;
        }
        let mut offset = 0usize;
        let mut stride = 1usize;
        for axis in 0..self.dim {
            offset += (index[axis] - self.origin[axis]) as usize * stride;
            stride *= self.size[axis];
        }
        Some(offset)
    }

    /// Inverse of [`Region::offset_of`].
    pub fn index_at(&self, mut offset: usize) -> Index {
        let mut index = [0i64; MAX_DIMENSIONS];
        for axis in 0..self.dim {
            let extent = self.size[axis].max(1);
            index[axis] = self.origin[axis] + (offset % extent) as i64;
            offset /= extent;
        }
        index
    }

    /// Iterate over every index in buffer order (axis 0 fastest).
    pub fn indices(&self) -> RegionIndices {
        RegionIndices {
            region: *self,
            next: self.origin,
            remaining: self.num_elements(),
        }
    }

    /// The outermost axis with more than one element.
    ///
    /// Pieces cut along this axis map to contiguous windows of a buffer laid
    /// out over the region.
    pub fn outermost_splittable_axis(&self) -> Option<usize> {
        (0..self.dim).rev().find(|&axis| self.size[axis] > 1)
    }

    /// Partition into at most `max_pieces` disjoint pieces along the
    /// outermost splittable axis, each at least `min_extent` thick.
    ///
    /// Pieces are returned in buffer order and their union is `self`.
    pub fn split(&self, max_pieces: usize, min_extent: usize) -> Vec<Region> {
        let axis = match self.outermost_splittable_axis() {
            Some(axis) if !self.is_empty() => axis,
            _ => return vec![*self],
        };
        let extent = self.size[axis];
        let pieces = max_pieces
            .min(extent / min_extent.max(1))
            .max(1);
        let base = extent / pieces;
        let remainder = extent % pieces;

        let mut out = Vec::with_capacity(pieces);
        let mut start = self.origin[axis];
        for piece in 0..pieces {
            let thickness = base + usize::from(piece < remainder);
            out.push(self.with_axis(axis, start, thickness));
            start += thickness as i64;
        }
        out
    }
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Region[origin={:?}, size={:?}]", self.origin(), self.size())
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Iterator returned by [`Region::indices`].
pub struct RegionIndices {
    region: Region,
    next: Index,
    remaining: usize,
}

impl Iterator for RegionIndices {
    type Item = Index;

    fn next(&mut self) -> Option<Index> {
        if self.remaining == 0 {
            return None;
        }
        let current = self.next;
        self.remaining -= 1;
        for axis in 0..self.region.dim {
            self.next[axis] += 1;
            if self.next[axis] < self.region.upper(axis) {
                break;
            }
            self.next[axis] = self.region.origin[axis];
        }
        Some(current)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for RegionIndices {}

//! Pixel buffers and owned images.
//!
//! The engine treats pixel data as an opaque [`Buffer`] laid out over a
//! [`Region`] (axis 0 fastest). Two pixel kinds exist: real samples for
//! spatial-domain images and complex samples for frequency-domain images.

use crate::region::{Region, MAX_DIMENSIONS};
use rustfft::num_complex::Complex64;
use serde::{Deserialize, Serialize};

/// The kind of samples a buffer holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelKind {
    Real,
    Complex,
}

/// Pixel storage. Length always equals the element count of the region it
/// is laid out over.
#[derive(Debug, Clone, PartialEq)]
pub enum Buffer {
    Real(Vec<f64>),
    Complex(Vec<Complex64>),
}

impl Buffer {
    pub fn zeros(kind: PixelKind, len: usize) -> Self {
        match kind {
            PixelKind::Real => Buffer::Real(vec![0.0; len]),
            PixelKind::Complex => Buffer::Complex(vec![Complex64::new(0.0, 0.0); len]),
        }
    }

    pub fn kind(&self) -> PixelKind {
        match self {
            Buffer::Real(_) => PixelKind::Real,
            Buffer::Complex(_) => PixelKind::Complex,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Buffer::Real(v) => v.len(),
            Buffer::Complex(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_real(&self) -> Option<&[f64]> {
        match self {
            Buffer::Real(v) => Some(v),
            Buffer::Complex(_) => None,
        }
    }

    pub fn as_complex(&self) -> Option<&[Complex64]> {
        match self {
            Buffer::Complex(v) => Some(v),
            Buffer::Real(_) => None,
        }
    }

    /// Mutable view over the whole buffer.
    pub fn as_slice_mut(&mut self) -> BufferSliceMut<'_> {
        match self {
            Buffer::Real(v) => BufferSliceMut::Real(v.as_mut_slice()),
            Buffer::Complex(v) => BufferSliceMut::Complex(v.as_mut_slice()),
        }
    }

    /// Split into consecutive mutable windows of the given lengths.
    ///
    /// The lengths must sum to at most the buffer length.
    pub fn split_mut(&mut self, lengths: &[usize]) -> Vec<BufferSliceMut<'_>> {
        fn cut<'a, T>(mut rest: &'a mut [T], lengths: &[usize]) -> Vec<&'a mut [T]> {
            let mut out = Vec::with_capacity(lengths.len());
            for &len in lengths {
                let (head, tail) = std::mem::take(&mut rest).split_at_mut(len);
                out.push(head);
                rest = tail;
            }
            out
        }
        match self {
            Buffer::Real(v) => cut(v.as_mut_slice(), lengths)
                .into_iter()
                .map(BufferSliceMut::Real)
                .collect(),
            Buffer::Complex(v) => cut(v.as_mut_slice(), lengths)
                .into_iter()
                .map(BufferSliceMut::Complex)
                .collect(),
        }
    }
}

/// A mutable window into a [`Buffer`], handed to one worker.
#[derive(Debug)]
pub enum BufferSliceMut<'a> {
    Real(&'a mut [f64]),
    Complex(&'a mut [Complex64]),
}

impl BufferSliceMut<'_> {
    pub fn kind(&self) -> PixelKind {
        match self {
            BufferSliceMut::Real(_) => PixelKind::Real,
            BufferSliceMut::Complex(_) => PixelKind::Complex,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            BufferSliceMut::Real(v) => v.len(),
            BufferSliceMut::Complex(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Metadata propagated during the information pass.
///
/// `spacing` is carried through the pipeline untouched by the engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageInfo {
    pub largest: Region,
    pub kind: PixelKind,
    pub spacing: [f64; MAX_DIMENSIONS],
}

impl ImageInfo {
    pub fn new(largest: Region, kind: PixelKind) -> Self {
        Self {
            largest,
            kind,
            spacing: [1.0; MAX_DIMENSIONS],
        }
    }

    pub fn with_spacing(mut self, spacing: &[f64]) -> Self {
        for (dst, src) in self.spacing.iter_mut().zip(spacing) {
            *dst = *src;
        }
        self
    }

    pub fn with_largest(mut self, largest: Region) -> Self {
        self.largest = largest;
        self
    }

    pub fn with_kind(mut self, kind: PixelKind) -> Self {
        self.kind = kind;
        self
    }
}

/// An owned image: a buffer laid out over a region, plus spacing.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub region: Region,
    pub spacing: [f64; MAX_DIMENSIONS],
    pub buffer: Buffer,
}

impl Image {
    /// Real image from pixels in buffer order.
    ///
    /// Returns `None` when the pixel count does not match the region.
    pub fn real(region: Region, pixels: Vec<f64>) -> Option<Self> {
        (pixels.len() == region.num_elements()).then(|| Self {
            region,
            spacing: [1.0; MAX_DIMENSIONS],
            buffer: Buffer::Real(pixels),
        })
    }

    /// Complex image from pixels in buffer order.
    pub fn complex(region: Region, pixels: Vec<Complex64>) -> Option<Self> {
        (pixels.len() == region.num_elements()).then(|| Self {
            region,
            spacing: [1.0; MAX_DIMENSIONS],
            buffer: Buffer::Complex(pixels),
        })
    }

    /// Real image whose pixel at `index` is `f(index)`.
    pub fn from_fn(region: Region, f: impl Fn(&[i64]) -> f64) -> Self {
        let pixels = region.indices().map(|index| f(&index[..region.dim()])).collect();
        Self {
            region,
            spacing: [1.0; MAX_DIMENSIONS],
            buffer: Buffer::Real(pixels),
        }
    }

    pub fn with_spacing(mut self, spacing: &[f64]) -> Self {
        for (dst, src) in self.spacing.iter_mut().zip(spacing) {
            *dst = *src;
        }
        self
    }

    pub fn kind(&self) -> PixelKind {
        self.buffer.kind()
    }

    pub fn info(&self) -> ImageInfo {
        ImageInfo {
            largest: self.region,
            kind: self.kind(),
            spacing: self.spacing,
        }
    }

    /// Real sample at `index`, if inside the region.
    pub fn value(&self, index: &[i64]) -> Option<f64> {
        let offset = self.region.offset_of(index)?;
        self.buffer.as_real().map(|v| v[offset])
    }

    pub fn pixels(&self) -> Option<&[f64]> {
        self.buffer.as_real()
    }
}

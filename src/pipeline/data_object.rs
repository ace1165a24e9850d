//! Data objects: buffers plus the three regions the engine negotiates over.
//!
//! A [`DataObject`] is shared through a [`DataHandle`] (`Arc`): the producing
//! node's output slot holds one reference, every consumer input holds
//! another, and the object lives as long as its longest holder. Disconnecting
//! severs the producer link and freezes the object as an immutable snapshot.

use crate::image::{Buffer, Image, ImageInfo, PixelKind};
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::id::SourceLink;
use crate::pipeline::stamp::Stamp;
use crate::region::{Region, MAX_DIMENSIONS};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Shared reference to a data object.
pub type DataHandle = Arc<DataObject>;

/// Mutable state behind the lock.
pub(crate) struct DataState {
    pub kind: PixelKind,
    /// Largest possible region and metadata; `None` until information is known.
    pub info: Option<ImageInfo>,
    pub requested: Option<Region>,
    pub buffered: Region,
    pub buffer: Option<Buffer>,
    pub modified: Stamp,
    /// Newest modification anywhere upstream, refreshed each information pass.
    pub pipeline_mtime: Stamp,
    /// When the buffer contents were last generated.
    pub update_time: Stamp,
    pub source: Option<SourceLink>,
    pub disconnected: bool,
    pub release_data: bool,
    pub released: bool,
}

impl DataState {
    /// (Re)allocate the buffer to exactly cover `region`.
    ///
    /// No-op when the buffer already covers exactly that region.
    pub fn allocate(&mut self, region: Region) {
        let fits = self.buffered == region
            && self
                .buffer
                .as_ref()
                .is_some_and(|b| b.kind() == self.kind && b.len() == region.num_elements());
        if !fits {
            self.buffer = Some(Buffer::zeros(self.kind, region.num_elements()));
            self.buffered = region;
        }
        self.released = false;
        self.modified = Stamp::next();
    }

    pub fn release(&mut self) {
        self.buffer = None;
        self.buffered = Region::empty(self.buffered.dim());
        self.released = true;
    }

    /// Drop a buffer whose generation failed part way, so the next update
    /// regenerates it instead of trusting zero-filled pixels.
    pub fn discard(&mut self) {
        self.buffer = None;
        self.buffered = Region::empty(self.buffered.dim());
        self.update_time = Stamp::ZERO;
        self.modified = Stamp::next();
    }

    pub fn largest(&self) -> Option<Region> {
        self.info.map(|i| i.largest)
    }
}

/// A typed buffer with largest-possible, requested and buffered regions.
pub struct DataObject {
    state: RwLock<DataState>,
}

impl DataObject {
    /// Fresh, empty output owned by a node.
    pub(crate) fn new_output(kind: PixelKind, source: SourceLink) -> DataHandle {
        Arc::new(Self {
            state: RwLock::new(DataState {
                kind,
                info: None,
                requested: None,
                buffered: Region::empty(0),
                buffer: None,
                modified: Stamp::next(),
                pipeline_mtime: Stamp::ZERO,
                update_time: Stamp::ZERO,
                source: Some(source),
                disconnected: false,
                release_data: false,
                released: false,
            }),
        })
    }

    /// Leaf object wrapping an externally supplied image.
    ///
    /// Leaves are never regenerated; their whole region is buffered.
    pub fn from_image(image: Image) -> DataHandle {
        let modified = Stamp::next();
        Arc::new(Self {
            state: RwLock::new(DataState {
                kind: image.kind(),
                info: Some(image.info()),
                requested: None,
                buffered: image.region,
                buffer: Some(image.buffer),
                modified,
                pipeline_mtime: modified,
                update_time: modified,
                source: None,
                disconnected: false,
                release_data: false,
                released: false,
            }),
        })
    }

    pub(crate) fn read_state(&self) -> RwLockReadGuard<'_, DataState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write_state(&self) -> RwLockWriteGuard<'_, DataState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn kind(&self) -> PixelKind {
        self.read_state().kind
    }

    pub fn info(&self) -> Option<ImageInfo> {
        self.read_state().info
    }

    pub fn largest_possible_region(&self) -> Option<Region> {
        self.read_state().largest()
    }

    pub fn requested_region(&self) -> Option<Region> {
        self.read_state().requested
    }

    pub fn buffered_region(&self) -> Region {
        self.read_state().buffered
    }

    pub fn modified_time(&self) -> Stamp {
        self.read_state().modified
    }

    pub fn source(&self) -> Option<SourceLink> {
        self.read_state().source
    }

    pub fn is_disconnected(&self) -> bool {
        self.read_state().disconnected
    }

    pub fn is_released(&self) -> bool {
        self.read_state().released
    }

    /// Store the region a consumer needs.
    ///
    /// Fails with `InvalidRegion` when the largest possible region is known
    /// and does not contain `region`.
    pub fn set_requested_region(&self, region: Region) -> PipelineResult<()> {
        let mut state = self.write_state();
        if let Some(largest) = state.largest() {
            if !largest.contains(&region) {
                return Err(PipelineError::InvalidRegion {
                    node: state.source.map(|s| s.node),
                    requested: region,
                    largest,
                });
            }
        }
        state.requested = Some(region);
        Ok(())
    }

    /// Request the whole largest possible region, once it is known.
    pub fn set_requested_region_to_largest(&self) {
        let mut state = self.write_state();
        if let Some(largest) = state.largest() {
            state.requested = Some(largest);
        }
    }

    /// Ask the engine to free this buffer as soon as a consumer has read it.
    pub fn set_release_data_flag(&self, release: bool) {
        self.write_state().release_data = release;
    }

    /// Copy of the buffered pixels.
    pub fn snapshot(&self) -> Option<Image> {
        let state = self.read_state();
        let buffer = state.buffer.clone()?;
        let spacing = state.info.map(|i| i.spacing).unwrap_or([1.0; MAX_DIMENSIONS]);
        Some(Image {
            region: state.buffered,
            spacing,
            buffer,
        })
    }

    /// Real sample at `index`, if buffered.
    pub fn value_at(&self, index: &[i64]) -> Option<f64> {
        let state = self.read_state();
        let offset = state.buffered.offset_of(index)?;
        state.buffer.as_ref()?.as_real().map(|v| v[offset])
    }

    /// Run `f` over the buffered region and pixels without copying.
    pub fn with_buffer<R>(&self, f: impl FnOnce(&Region, &Buffer) -> R) -> Option<R> {
        let state = self.read_state();
        state.buffer.as_ref().map(|b| f(&state.buffered, b))
    }

    /// Sever the producer link. The object keeps its buffer and becomes a
    /// leaf whose contents never change again.
    pub(crate) fn mark_disconnected(&self) {
        let mut state = self.write_state();
        state.source = None;
        state.disconnected = true;
        state.release_data = false;
        state.modified = Stamp::next();
        state.pipeline_mtime = state.modified;
    }
}

impl fmt::Debug for DataObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.read_state();
        f.debug_struct("DataObject")
            .field("kind", &state.kind)
            .field("largest", &state.largest())
            .field("requested", &state.requested)
            .field("buffered", &state.buffered)
            .field("modified", &state.modified)
            .field("source", &state.source)
            .field("disconnected", &state.disconnected)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::id::{NodeId, PipelineId};

    fn output() -> DataHandle {
        DataObject::new_output(
            PixelKind::Real,
            SourceLink {
                pipeline: PipelineId::next(),
                node: NodeId(0),
                port: 0,
            },
        )
    }

    #[test]
    fn test_requested_region_validated_against_largest() {
        let data = output();
        // Unknown largest region: anything goes.
        data.set_requested_region(Region::from_size(&[100, 100])).unwrap();

        data.write_state().info = Some(ImageInfo::new(Region::from_size(&[8, 8]), PixelKind::Real));
        assert!(data.set_requested_region(Region::from_size(&[4, 4])).is_ok());
        let err = data
            .set_requested_region(Region::new(&[6, 6], &[4, 4]))
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidRegion { node: Some(NodeId(0)), .. }));
        assert_eq!(data.requested_region(), Some(Region::from_size(&[4, 4])));
    }

    #[test]
    fn test_allocate_is_noop_when_region_unchanged() {
        let data = output();
        let region = Region::from_size(&[3, 3]);
        {
            let mut state = data.write_state();
            state.allocate(region);
            if let Some(Buffer::Real(v)) = state.buffer.as_mut() {
                v[4] = 7.0;
            }
            state.allocate(region);
        }
        assert_eq!(data.buffered_region(), region);
        assert_eq!(data.value_at(&[1, 1]), Some(7.0));
    }

    #[test]
    fn test_discard_forgets_buffer() {
        let data = output();
        {
            let mut state = data.write_state();
            state.allocate(Region::from_size(&[2, 2]));
            state.update_time = state.modified;
            state.discard();
            assert_eq!(state.update_time, Stamp::ZERO);
            assert!(!state.released);
        }
        assert!(data.buffered_region().is_empty());
        assert!(data.snapshot().is_none());
    }

    #[test]
    fn test_disconnect_makes_leaf() {
        let data = output();
        let before = data.modified_time();
        data.mark_disconnected();
        assert!(data.is_disconnected());
        assert!(data.source().is_none());
        assert!(data.modified_time() > before);
    }

    #[test]
    fn test_from_image_is_fully_buffered() {
        let image = Image::from_fn(Region::new(&[2], &[3]), |i| i[0] as f64);
        let data = DataObject::from_image(image.clone());
        assert_eq!(data.buffered_region(), image.region);
        assert_eq!(data.largest_possible_region(), Some(image.region));
        assert_eq!(data.snapshot(), Some(image));
    }
}

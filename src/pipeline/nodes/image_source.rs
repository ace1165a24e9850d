//! ImageSourceNode: serves an in-memory image as a pipeline output.

use crate::image::{Buffer, Image, ImageInfo, PixelKind};
use crate::pipeline::context::{InformationContext, RegionContext};
use crate::pipeline::error::PipelineResult;
use crate::pipeline::node::NodePlugin;
use crate::pipeline::nodes::copy_region;
use crate::pipeline::port::PortDescriptor;

static REAL_PORTS: &[PortDescriptor] = &[PortDescriptor::output("output", PixelKind::Real)];
static COMPLEX_PORTS: &[PortDescriptor] = &[PortDescriptor::output("output", PixelKind::Complex)];

/// Source node backed by an owned [`Image`]. Any sub-region can be served.
pub struct ImageSourceNode {
    image: Image,
}

impl ImageSourceNode {
    pub fn new(image: Image) -> Self {
        Self { image }
    }

    pub fn image(&self) -> &Image {
        &self.image
    }
}

impl NodePlugin for ImageSourceNode {
    fn name(&self) -> &str {
        "ImageSource"
    }

    fn ports(&self) -> &[PortDescriptor] {
        match self.image.kind() {
            PixelKind::Real => REAL_PORTS,
            PixelKind::Complex => COMPLEX_PORTS,
        }
    }

    fn generate_output_information(&self, _ctx: &InformationContext) -> PipelineResult<Vec<ImageInfo>> {
        Ok(vec![self.image.info()])
    }

    fn generate_data(&self, ctx: &mut RegionContext) -> PipelineResult<()> {
        let src_region = self.image.region;
        match &self.image.buffer {
            Buffer::Real(pixels) => {
                let (region, out) = ctx.real_output(0)?;
                copy_region(src_region, pixels, region, out);
            }
            Buffer::Complex(pixels) => {
                let (region, out) = ctx.complex_output(0)?;
                copy_region(src_region, pixels, region, out);
            }
        }
        Ok(())
    }
}

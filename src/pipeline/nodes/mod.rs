//! Built-in pipeline node implementations.

pub mod arithmetic;
pub mod complex_multiply;
pub mod fft;
pub mod functor;
pub mod image_source;
pub mod pad;
pub mod richardson_lucy;
pub mod series_reader;

pub use arithmetic::{BinaryArithmeticNode, BinaryOp, DivisionPolicy};
pub use complex_multiply::ComplexMultiplyNode;
pub use fft::{ForwardFftNode, InverseFftNode};
pub use functor::{UnaryFunctor, UnaryFunctorNode};
pub use image_source::ImageSourceNode;
pub use pad::{PadNode, PaddingMethod};
pub use richardson_lucy::RichardsonLucyNode;
pub use series_reader::SeriesReaderNode;

use crate::image::ImageInfo;
use crate::pipeline::context::{default_output_information, InformationContext};
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::node::{AnyNode, BuiltinNode};
use crate::pipeline::port::{self, PortDescriptor};
use crate::region::Region;

macro_rules! into_any_node {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        $(
            impl From<$ty> for AnyNode {
                fn from(node: $ty) -> Self {
                    AnyNode::Builtin(BuiltinNode::$variant(node))
                }
            }
        )*
    };
}

into_any_node!(
    ImageSource(ImageSourceNode),
    UnaryFunctor(UnaryFunctorNode),
    BinaryArithmetic(BinaryArithmeticNode),
    ComplexMultiply(ComplexMultiplyNode),
    ForwardFft(ForwardFftNode),
    InverseFft(InverseFftNode),
    Pad(PadNode),
    RichardsonLucy(RichardsonLucyNode),
    SeriesReader(SeriesReaderNode),
);

/// Output information for nodes that combine their inputs pixel by pixel.
/// Every input must span the same largest possible region as the first.
pub(crate) fn matching_inputs_information(
    ports: &[PortDescriptor],
    ctx: &InformationContext,
) -> PipelineResult<Vec<ImageInfo>> {
    let mut inputs = port::inputs(ports).enumerate();
    let Some((_, lead)) = inputs.next() else {
        return default_output_information(ports, ctx);
    };
    let first = ctx.input(0, lead.name)?;
    for (index, desc) in inputs {
        let info = ctx.input(index, desc.name)?;
        if info.largest != first.largest {
            return Err(PipelineError::ExtentMismatch {
                node: ctx.node,
                port: desc.name,
                expected: first.largest,
                found: info.largest,
            });
        }
    }
    Ok(port::outputs(ports).map(|p| first.with_kind(p.kind)).collect())
}

/// Buffer offsets, within a buffer laid out over `outer`, of every index of
/// `inner` in buffer order. Indices of `inner` outside `outer` are skipped.
pub(crate) fn offsets_within(outer: Region, inner: Region) -> impl Iterator<Item = usize> {
    let inner = inner.intersect(&outer);
    let (rows, row) = if inner.is_empty() {
        (Region::empty(inner.dim()), 0)
    } else {
        (inner.with_axis(0, inner.origin()[0], 1), inner.size()[0])
    };
    rows.indices()
        .filter_map(move |start| outer.offset_of(&start))
        .flat_map(move |base| base..base + row)
}

/// Copy the `dst_region` part of `src` (laid out over `src_region`) into `dst`.
pub(crate) fn copy_region<T: Copy>(src_region: Region, src: &[T], dst_region: Region, dst: &mut [T]) {
    for (out, offset) in dst.iter_mut().zip(offsets_within(src_region, dst_region)) {
        *out = src[offset];
    }
}

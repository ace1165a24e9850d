//! Contexts handed to node hooks during each phase of an update.

use crate::image::{Buffer, BufferSliceMut, ImageInfo, PixelKind};
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::id::NodeId;
use crate::pipeline::port::{self, PortDescriptor};
use crate::pipeline::progress::ProgressReporter;
use crate::region::Region;
use rustfft::num_complex::Complex64;

/// Input metadata available during the information pass.
pub struct InformationContext<'a> {
    pub node: NodeId,
    /// One entry per declared input; `None` for unbound optional inputs.
    pub inputs: &'a [Option<ImageInfo>],
}

impl InformationContext<'_> {
    /// Info of input `index`, or `UnsatisfiedInput` naming `port`.
    pub fn input(&self, index: usize, port: &'static str) -> PipelineResult<ImageInfo> {
        self.inputs
            .get(index)
            .copied()
            .flatten()
            .ok_or(PipelineError::UnsatisfiedInput {
                node: self.node,
                port,
                reason: "no upstream information".into(),
            })
    }
}

/// Output information derived from the first bound input, one entry per
/// declared output with the output port's pixel kind.
pub fn default_output_information(
    ports: &[PortDescriptor],
    ctx: &InformationContext,
) -> PipelineResult<Vec<ImageInfo>> {
    let first = ctx.inputs.iter().flatten().next().copied().ok_or_else(|| {
        PipelineError::UnsatisfiedInput {
            node: ctx.node,
            port: port::inputs(ports).next().map_or("input", |p| p.name),
            reason: "no upstream information".into(),
        }
    })?;
    Ok(port::outputs(ports).map(|p| first.with_kind(p.kind)).collect())
}

/// What a node sees while translating its output request into input requests.
pub struct RegionRequest<'a> {
    pub node: NodeId,
    /// Requested region of each output, after enlargement.
    pub outputs: &'a [Region],
    pub output_infos: &'a [ImageInfo],
    pub inputs: &'a [Option<ImageInfo>],
}

/// Ask each input for the first output's requested region, clipped to that
/// input's largest possible region.
pub fn default_input_requested_regions(req: &RegionRequest) -> Vec<Option<Region>> {
    let wanted = req.outputs.first().copied();
    req.inputs
        .iter()
        .map(|info| {
            let info = info.as_ref()?;
            match wanted {
                Some(w) if w.dim() == info.largest.dim() => Some(w.intersect(&info.largest)),
                _ => Some(info.largest),
            }
        })
        .collect()
}

/// Read-only view of an input's buffered pixels.
#[derive(Clone, Copy)]
pub struct InputView<'a> {
    /// Region the buffer is laid out over.
    pub region: Region,
    pub info: ImageInfo,
    buffer: &'a Buffer,
}

impl<'a> InputView<'a> {
    pub(crate) fn new(region: Region, info: ImageInfo, buffer: &'a Buffer) -> Self {
        Self {
            region,
            info,
            buffer,
        }
    }

    pub fn kind(&self) -> PixelKind {
        self.buffer.kind()
    }

    pub fn buffer(&self) -> &'a Buffer {
        self.buffer
    }

    pub fn real(&self) -> Option<&'a [f64]> {
        self.buffer.as_real()
    }

    pub fn complex(&self) -> Option<&'a [Complex64]> {
        self.buffer.as_complex()
    }

    /// Real sample at `index`; zero outside the buffered region.
    pub fn value(&self, index: &[i64]) -> f64 {
        self.region
            .offset_of(index)
            .and_then(|offset| self.real().map(|v| v[offset]))
            .unwrap_or(0.0)
    }
}

/// One output's writable window for the piece being generated.
pub struct OutputChunk<'a> {
    pub region: Region,
    pub data: BufferSliceMut<'a>,
}

/// Everything `generate_data` needs for one piece.
pub struct RegionContext<'a> {
    pub node: NodeId,
    pub node_name: &'a str,
    /// Piece of the first output to fill.
    pub region: Region,
    pub inputs: &'a [Option<InputView<'a>>],
    pub outputs: Vec<OutputChunk<'a>>,
    pub output_infos: &'a [ImageInfo],
    /// Worker threads available to nested pipelines.
    pub threads: usize,
    pub progress: ProgressReporter,
}

impl<'a> RegionContext<'a> {
    /// Bound input `index`, or `UnsatisfiedInput` naming `port`.
    pub fn input(&self, index: usize, port: &'static str) -> PipelineResult<InputView<'a>> {
        self.inputs
            .get(index)
            .copied()
            .flatten()
            .ok_or(PipelineError::UnsatisfiedInput {
                node: self.node,
                port,
                reason: "not connected".into(),
            })
    }

    /// Real window of output `index`.
    pub fn real_output(&mut self, index: usize) -> PipelineResult<(Region, &mut [f64])> {
        let node = self.node;
        match self.outputs.get_mut(index) {
            Some(OutputChunk {
                region,
                data: BufferSliceMut::Real(v),
            }) => Ok((*region, &mut **v)),
            _ => Err(PipelineError::Node {
                node_id: node,
                message: format!("output {index} is not a real buffer"),
            }),
        }
    }

    /// Complex window of output `index`.
    pub fn complex_output(&mut self, index: usize) -> PipelineResult<(Region, &mut [Complex64])> {
        let node = self.node;
        match self.outputs.get_mut(index) {
            Some(OutputChunk {
                region,
                data: BufferSliceMut::Complex(v),
            }) => Ok((*region, &mut **v)),
            _ => Err(PipelineError::Node {
                node_id: node,
                message: format!("output {index} is not a complex buffer"),
            }),
        }
    }

    /// A node-level failure attributed to this node.
    pub fn fail(&self, message: impl Into<String>) -> PipelineError {
        PipelineError::Node {
            node_id: self.node,
            message: message.into(),
        }
    }
}

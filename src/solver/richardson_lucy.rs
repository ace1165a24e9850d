//! Richardson-Lucy deconvolution on a fixed pipeline sub-graph.
//!
//! Each iteration computes
//!
//! ```text
//! e[k+1] = e[k] * IFFT( FFT( d / IFFT(FFT(e[k]) * H) ) * conj(H) )
//! ```
//!
//! where `d` is the padded input and `H` the transfer function of the
//! centred kernel. The seven step nodes are wired once; every iteration
//! rebinds the transformed estimate and the estimate itself, drives the
//! terminal multiply and disconnects its output as the next estimate. The
//! graph therefore stays the same size however many iterations run.

use crate::image::{Image, PixelKind};
use crate::pipeline::data_object::DataHandle;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::executor::Pipeline;
use crate::pipeline::id::NodeId;
use crate::pipeline::nodes::{
    copy_region, BinaryArithmeticNode, BinaryOp, ComplexMultiplyNode, DivisionPolicy, ForwardFftNode,
    ImageSourceNode, InverseFftNode, PadNode, PaddingMethod,
};
use crate::pipeline::progress::ScopeHandle;
use crate::pipeline::threader::Threader;
use crate::region::{Region, MAX_DIMENSIONS};
use crate::solver::{IterativeSolver, SolverState};
use serde::{Deserialize, Serialize};

/// Share of one iteration's weight spent transforming the estimate.
const TRANSFORM_WEIGHT: f64 = 0.10;

/// Step nodes in wiring order with their share of one iteration's weight.
const STEP_WEIGHTS: [(&str, f64); 7] = [
    ("multiply", 0.07),
    ("inverse_fft", 0.20),
    ("divide", 0.10),
    ("fft", 0.20),
    ("conjugate_multiply", 0.07),
    ("inverse_fft", 0.20),
    ("update", 0.06),
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RichardsonLucySettings {
    pub iterations: usize,
    pub division: DivisionPolicy,
    pub padding: PaddingMethod,
    pub normalize_kernel: bool,
}

impl Default for RichardsonLucySettings {
    fn default() -> Self {
        Self {
            iterations: 10,
            division: DivisionPolicy::default(),
            padding: PaddingMethod::default(),
            normalize_kernel: true,
        }
    }
}

/// The per-iteration sub-graph.
struct IterationGraph {
    /// Forward transform of the current estimate.
    transform: Pipeline,
    forward: NodeId,
    steps: Pipeline,
    /// Step nodes in [`STEP_WEIGHTS`] order; the first and last have their
    /// `input1` rebound every iteration.
    nodes: [NodeId; 7],
    scope: Option<ScopeHandle>,
}

impl IterationGraph {
    fn blur(&self) -> NodeId {
        self.nodes[0]
    }

    fn update(&self) -> NodeId {
        self.nodes[6]
    }

    fn node_count(&self) -> usize {
        self.transform.node_count() + self.steps.node_count()
    }
}

pub struct RichardsonLucySolver {
    input: Image,
    kernel: Image,
    settings: RichardsonLucySettings,
    threader: Threader,
    progress: Option<ScopeHandle>,
    state: SolverState,
    graph: Option<IterationGraph>,
    estimate: Option<DataHandle>,
    completed: usize,
    result: Option<Image>,
}

impl RichardsonLucySolver {
    pub fn new(
        input: Image,
        kernel: Image,
        settings: RichardsonLucySettings,
        threader: Threader,
    ) -> PipelineResult<Self> {
        if input.kind() != PixelKind::Real || kernel.kind() != PixelKind::Real {
            return Err(PipelineError::PortMismatch(
                "deconvolution needs real input and kernel".into(),
            ));
        }
        if input.region.is_empty() || kernel.region.is_empty() {
            return Err(PipelineError::EmptyInput(
                "deconvolution input or kernel is empty".into(),
            ));
        }
        if input.region.dim() != kernel.region.dim() {
            return Err(PipelineError::PortMismatch(format!(
                "kernel has {} axes, input has {}",
                kernel.region.dim(),
                input.region.dim()
            )));
        }
        Ok(Self {
            input,
            kernel,
            settings,
            threader,
            progress: None,
            state: SolverState::Idle,
            graph: None,
            estimate: None,
            completed: 0,
            result: None,
        })
    }

    /// Report progress under `scope`.
    pub fn with_progress(mut self, scope: ScopeHandle) -> Self {
        self.progress = Some(scope);
        self
    }

    pub fn settings(&self) -> &RichardsonLucySettings {
        &self.settings
    }

    /// Nodes currently owned by the solver's pipelines.
    pub fn node_count(&self) -> usize {
        self.graph.as_ref().map_or(0, IterationGraph::node_count)
    }

    pub fn completed_iterations(&self) -> usize {
        self.completed
    }

    /// Current estimate over the padded region, while iterating.
    pub fn estimate(&self) -> Option<&DataHandle> {
        self.estimate.as_ref()
    }

    /// Final estimate cropped to the input region, after `finish`.
    pub fn result(&self) -> Option<&Image> {
        self.result.as_ref()
    }

    pub fn into_result(self) -> Option<Image> {
        self.result
    }

    /// Lower and upper padding that makes circular convolution with the
    /// kernel linear over the input.
    fn padding(&self) -> ([usize; MAX_DIMENSIONS], [usize; MAX_DIMENSIONS]) {
        let mut lower = [0; MAX_DIMENSIONS];
        let mut upper = [0; MAX_DIMENSIONS];
        for (axis, &k) in self.kernel.region.size().iter().enumerate() {
            lower[axis] = k / 2;
            upper[axis] = k - 1 - k / 2;
        }
        (lower, upper)
    }

    /// Kernel over `padded` with its centre moved to the first buffer
    /// position, wrapping around each axis.
    fn centred_kernel(&self, padded: Region, lower: &[usize]) -> PipelineResult<Image> {
        let pixels = self
            .kernel
            .pixels()
            .ok_or_else(|| PipelineError::PortMismatch("kernel is not real-valued".into()))?;
        let mut scale = 1.0;
        if self.settings.normalize_kernel {
            let sum: f64 = pixels.iter().sum();
            if sum.abs() > f64::EPSILON {
                scale = 1.0 / sum;
            } else {
                tracing::warn!("Kernel sums to zero, leaving it unnormalized");
            }
        }

        let dim = padded.dim();
        let kernel_origin = self.kernel.region.origin();
        let mut out = vec![0.0; padded.num_elements()];
        for (value, index) in pixels.iter().zip(self.kernel.region.indices()) {
            let mut target = [0i64; MAX_DIMENSIONS];
            for axis in 0..dim {
                let extent = padded.size()[axis] as i64;
                let shifted = (index[axis] - kernel_origin[axis] - lower[axis] as i64).rem_euclid(extent);
                target[axis] = padded.origin()[axis] + shifted;
            }
            if let Some(offset) = padded.offset_of(&target[..dim]) {
                out[offset] += value * scale;
            }
        }
        Image::real(padded, out)
            .ok_or_else(|| PipelineError::EmptyInput("padded kernel has no pixels".into()))
    }

    fn build_graph(&self, transfer: DataHandle, padded: DataHandle) -> PipelineResult<IterationGraph> {
        let mut transform = Pipeline::new(self.threader);
        let forward = transform.add_node(ForwardFftNode::new());

        let mut steps = Pipeline::new(self.threader);
        let blur = steps.add_node(ComplexMultiplyNode::new());
        let blurred = steps.add_node(InverseFftNode::new());
        let ratio = steps.add_node(BinaryArithmeticNode::new(BinaryOp::Divide(self.settings.division)));
        let ratio_fft = steps.add_node(ForwardFftNode::new());
        let correlate = steps.add_node(ComplexMultiplyNode::conjugate());
        let correlated = steps.add_node(InverseFftNode::new());
        let update = steps.add_node(BinaryArithmeticNode::new(BinaryOp::Multiply));

        steps.set_input(blur, "input2", transfer.clone())?;
        steps.connect(blur, "output", blurred, "input")?;
        steps.set_input(ratio, "input1", padded)?;
        steps.connect(blurred, "output", ratio, "input2")?;
        steps.connect(ratio, "output", ratio_fft, "input")?;
        steps.connect(ratio_fft, "output", correlate, "input1")?;
        steps.set_input(correlate, "input2", transfer)?;
        steps.connect(correlate, "output", correlated, "input")?;
        steps.connect(correlated, "output", update, "input2")?;
        for node in [blur, blurred, ratio, ratio_fft, correlate, correlated] {
            steps.set_release_data(node, "output", true)?;
        }

        Ok(IterationGraph {
            transform,
            forward,
            steps,
            nodes: [blur, blurred, ratio, ratio_fft, correlate, correlated, update],
            scope: None,
        })
    }

    /// Build the transfer function, the padded input and the iteration graph.
    fn prepare(&mut self, weight: f64) -> PipelineResult<()> {
        let scope = self
            .progress
            .as_ref()
            .map(|root| root.register_child("initialize", weight));

        let (lower, upper) = self.padding();
        let padded_region = self.input.region.pad(&lower, &upper);
        tracing::info!(
            "Richardson-Lucy: input {}, kernel {}, padded {}",
            self.input.region,
            self.kernel.region,
            padded_region
        );

        let mut prepare = Pipeline::new(self.threader);
        let kernel_source = prepare.add_node(ImageSourceNode::new(self.centred_kernel(padded_region, &lower)?));
        let kernel_fft = prepare.add_node(ForwardFftNode::new());
        prepare.connect(kernel_source, "output", kernel_fft, "input")?;
        let input_source = prepare.add_node(ImageSourceNode::new(self.input.clone()));
        let pad = prepare.add_node(PadNode::new(&lower, &upper, self.settings.padding));
        prepare.connect(input_source, "output", pad, "input")?;
        if let Some(scope) = &scope {
            prepare.set_progress_scope(kernel_fft, scope.register_child("transfer_function", 0.5))?;
            prepare.set_progress_scope(pad, scope.register_child("pad", 0.5))?;
        }

        prepare.update_largest_possible_region(kernel_fft)?;
        let transfer = prepare.disconnect(&prepare.output(kernel_fft, "output")?)?;
        prepare.update_largest_possible_region(pad)?;
        let padded = prepare.disconnect(&prepare.output(pad, "output")?)?;

        self.graph = Some(self.build_graph(transfer, padded.clone())?);
        self.estimate = Some(padded);
        Ok(())
    }

    fn missing(what: &str) -> PipelineError {
        PipelineError::InvalidEdge(format!("solver has no {what}; initialize it first"))
    }
}

impl IterativeSolver for RichardsonLucySolver {
    fn state(&self) -> SolverState {
        self.state
    }

    fn iterations(&self) -> usize {
        self.settings.iterations
    }

    fn initialize(&mut self, weight: f64) -> PipelineResult<()> {
        self.state.transition(SolverState::Initializing)?;
        self.completed = 0;
        self.result = None;
        if let Err(err) = self.prepare(weight) {
            tracing::warn!("Richardson-Lucy initialization failed: {}", err);
            self.graph = None;
            self.estimate = None;
            self.state.transition(SolverState::Idle)?;
            return Err(err);
        }
        Ok(())
    }

    fn iteration(&mut self, weight: f64) -> PipelineResult<()> {
        self.state.transition(SolverState::Iterating)?;
        let root = self.progress.clone();
        let graph = self.graph.as_mut().ok_or_else(|| Self::missing("iteration graph"))?;

        if let (None, Some(root)) = (&graph.scope, root) {
            let scope = root.register_child("iteration", weight);
            graph
                .transform
                .set_progress_scope(graph.forward, scope.register_child("transform", TRANSFORM_WEIGHT))?;
            for (node, (label, share)) in graph.nodes.iter().zip(STEP_WEIGHTS) {
                graph.steps.set_progress_scope(*node, scope.register_child(label, share))?;
            }
            graph.scope = Some(scope);
        }

        // The estimate is only replaced once the whole step succeeded.
        let estimate = self.estimate.clone().ok_or_else(|| Self::missing("estimate"))?;
        graph.transform.set_input(graph.forward, "input", estimate.clone())?;
        graph.transform.update_largest_possible_region(graph.forward)?;
        let transformed = graph
            .transform
            .disconnect(&graph.transform.output(graph.forward, "output")?)?;

        let (blur, update) = (graph.blur(), graph.update());
        graph.steps.set_input(blur, "input1", transformed)?;
        graph.steps.set_input(update, "input1", estimate)?;
        graph.steps.update_largest_possible_region(update)?;
        self.estimate = Some(graph.steps.disconnect(&graph.steps.output(update, "output")?)?);

        if let Some(scope) = &graph.scope {
            scope.reset_keeping_accumulated();
        }
        self.completed += 1;
        tracing::debug!("Richardson-Lucy iteration {} done", self.completed);
        Ok(())
    }

    fn finish(&mut self, weight: f64) -> PipelineResult<()> {
        self.state.transition(SolverState::Finishing)?;
        let scope = self
            .progress
            .as_ref()
            .map(|root| root.register_child("finish", weight));

        let estimate = self.estimate.take().ok_or_else(|| Self::missing("estimate"))?;
        self.graph = None;
        let snapshot = estimate
            .snapshot()
            .ok_or_else(|| PipelineError::EmptyInput("estimate has no buffer".into()))?;
        let pixels = snapshot
            .pixels()
            .ok_or_else(|| PipelineError::PortMismatch("estimate is not real-valued".into()))?;
        let region = self.input.region;
        let mut cropped = vec![0.0; region.num_elements()];
        copy_region(snapshot.region, pixels, region, &mut cropped);
        let result = Image::real(region, cropped)
            .ok_or_else(|| PipelineError::EmptyInput("cropped estimate has no pixels".into()))?
            .with_spacing(&self.input.spacing);
        self.result = Some(result);

        if let Some(scope) = scope {
            scope.advance(1.0);
        }
        tracing::info!("Richardson-Lucy finished after {} iterations", self.completed);
        self.state.transition(SolverState::Idle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::data_object::DataObject;
    use rustfft::num_complex::Complex64;
    use std::sync::Arc;

    fn solve(input: Image, kernel: Image, iterations: usize) -> RichardsonLucySolver {
        let settings = RichardsonLucySettings {
            iterations,
            ..Default::default()
        };
        let mut solver = RichardsonLucySolver::new(input, kernel, settings, Threader::new(Some(2), 1)).unwrap();
        solver.run().unwrap();
        solver
    }

    #[test]
    fn test_identity_kernel_keeps_input() {
        let input = Image::from_fn(Region::new(&[2, -1], &[5, 4]), |i| 2.0 + (i[0] + i[1]) as f64 * 0.25);
        let kernel = Image::from_fn(Region::from_size(&[1, 1]), |_| 3.0);
        let solver = solve(input.clone(), kernel, 3);
        let result = solver.result().unwrap();
        assert_eq!(result.region, input.region);
        for (a, b) in result.pixels().unwrap().iter().zip(input.pixels().unwrap()) {
            assert!((a - b).abs() < 1e-9, "{a} vs {b}");
        }
    }

    #[test]
    fn test_constant_image_is_a_fixed_point() {
        let input = Image::from_fn(Region::from_size(&[9]), |_| 2.0);
        let kernel = Image::real(Region::from_size(&[3]), vec![1.0, 2.0, 1.0]).unwrap();
        let solver = solve(input, kernel, 4);
        for value in solver.result().unwrap().pixels().unwrap() {
            assert!((value - 2.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_centred_kernel_wraps_around() {
        let input = Image::from_fn(Region::from_size(&[4]), |_| 1.0);
        let kernel = Image::real(Region::from_size(&[3]), vec![1.0, 2.0, 1.0]).unwrap();
        let solver = RichardsonLucySolver::new(input, kernel, RichardsonLucySettings::default(), Threader::default())
            .unwrap();
        let (lower, upper) = solver.padding();
        assert_eq!((lower[0], upper[0]), (1, 1));
        let padded = Region::new(&[-1], &[6]);
        let centred = solver.centred_kernel(padded, &lower).unwrap();
        assert_eq!(centred.pixels().unwrap(), &[0.5, 0.25, 0.0, 0.0, 0.0, 0.25]);
    }

    #[test]
    fn test_graph_released_after_finish() {
        let input = Image::from_fn(Region::from_size(&[6]), |i| i[0] as f64 + 1.0);
        let kernel = Image::real(Region::from_size(&[3]), vec![1.0, 1.0, 1.0]).unwrap();
        let mut solver =
            RichardsonLucySolver::new(input, kernel, RichardsonLucySettings::default(), Threader::default()).unwrap();
        solver.initialize(0.25).unwrap();
        assert_eq!(solver.node_count(), 8);
        solver.iteration(0.25).unwrap();
        solver.iteration(0.25).unwrap();
        assert_eq!(solver.node_count(), 8);
        assert!(solver.estimate().unwrap().is_disconnected());
        solver.finish(0.25).unwrap();
        assert_eq!(solver.node_count(), 0);
        assert_eq!(solver.state(), SolverState::Idle);
        assert_eq!(solver.completed_iterations(), 2);
    }

    #[test]
    fn test_iteration_before_initialize_fails() {
        let input = Image::from_fn(Region::from_size(&[2]), |_| 1.0);
        let kernel = Image::from_fn(Region::from_size(&[1]), |_| 1.0);
        let mut solver =
            RichardsonLucySolver::new(input, kernel, RichardsonLucySettings::default(), Threader::default()).unwrap();
        assert!(solver.iteration(0.5).is_err());
    }

    #[test]
    fn test_failed_initialize_returns_to_idle() {
        let input = Image::from_fn(Region::from_size(&[6]), |i| i[0] as f64 + 1.0);
        let kernel = Image::real(Region::from_size(&[3]), vec![1.0, 2.0, 1.0]).unwrap();
        let mut solver =
            RichardsonLucySolver::new(input, kernel.clone(), RichardsonLucySettings::default(), Threader::default())
                .unwrap();
        let spectrum = vec![Complex64::new(1.0, 0.0); 3];
        solver.kernel = Image::complex(Region::from_size(&[3]), spectrum).unwrap();

        assert!(matches!(solver.initialize(0.25), Err(PipelineError::PortMismatch(_))));
        assert_eq!(solver.state(), SolverState::Idle);
        assert_eq!(solver.node_count(), 0);
        assert!(solver.estimate().is_none());

        solver.kernel = kernel;
        solver.initialize(0.25).unwrap();
        assert_eq!(solver.state(), SolverState::Initializing);
        assert_eq!(solver.node_count(), 8);
    }

    #[test]
    fn test_failed_iteration_keeps_estimate() {
        let input = Image::from_fn(Region::from_size(&[6]), |i| i[0] as f64 + 1.0);
        let kernel = Image::real(Region::from_size(&[3]), vec![1.0, 2.0, 1.0]).unwrap();
        let mut solver =
            RichardsonLucySolver::new(input, kernel, RichardsonLucySettings::default(), Threader::default()).unwrap();
        solver.initialize(0.25).unwrap();
        let good = solver.estimate().cloned().unwrap();

        // An estimate over the wrong extent cannot be combined with the transfer function.
        let wrong = DataObject::from_image(Image::from_fn(Region::from_size(&[3]), |_| 1.0));
        solver.estimate = Some(wrong.clone());
        assert!(solver.iteration(0.25).is_err());
        assert!(Arc::ptr_eq(solver.estimate().unwrap(), &wrong));
        assert_eq!(solver.completed_iterations(), 0);

        solver.estimate = Some(good);
        solver.iteration(0.25).unwrap();
        assert_eq!(solver.completed_iterations(), 1);
        solver.finish(0.25).unwrap();
        assert!(solver.result().is_some());
    }
}

//! RichardsonLucyNode: hosts [`RichardsonLucySolver`] as a pipeline node.
//!
//! The node takes its whole input and kernel, runs the solver's own inner
//! pipelines on the same number of threads, and reports the solver's phases
//! as sub-scopes of its progress scope.

use crate::image::{Image, ImageInfo, PixelKind};
use crate::pipeline::context::{InputView, RegionContext, RegionRequest};
use crate::pipeline::error::PipelineResult;
use crate::pipeline::node::{ConfigValue, NodePlugin, Threading};
use crate::pipeline::nodes::{copy_region, PaddingMethod};
use crate::pipeline::port::PortDescriptor;
use crate::pipeline::threader::Threader;
use crate::region::Region;
use crate::solver::{IterativeSolver, RichardsonLucySettings, RichardsonLucySolver};

static PORTS: &[PortDescriptor] = &[
    PortDescriptor::input("input", PixelKind::Real),
    PortDescriptor::input("kernel", PixelKind::Real),
    PortDescriptor::output("output", PixelKind::Real),
];

#[derive(Default)]
pub struct RichardsonLucyNode {
    settings: RichardsonLucySettings,
}

impl RichardsonLucyNode {
    pub fn new(settings: RichardsonLucySettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &RichardsonLucySettings {
        &self.settings
    }

    fn owned_image(view: &InputView) -> Image {
        Image {
            region: view.region,
            spacing: view.info.spacing,
            buffer: view.buffer().clone(),
        }
    }
}

impl NodePlugin for RichardsonLucyNode {
    fn name(&self) -> &str {
        "RichardsonLucy"
    }

    fn ports(&self) -> &[PortDescriptor] {
        PORTS
    }

    fn threading(&self) -> Threading {
        Threading::Whole
    }

    fn enlarge_output_requested_region(&self, requested: &mut [Region], infos: &[ImageInfo]) {
        for (region, info) in requested.iter_mut().zip(infos) {
            *region = info.largest;
        }
    }

    fn generate_input_requested_region(&self, req: &RegionRequest) -> Vec<Option<Region>> {
        req.inputs.iter().map(|info| info.map(|i| i.largest)).collect()
    }

    fn generate_data(&self, ctx: &mut RegionContext) -> PipelineResult<()> {
        let input = Self::owned_image(&ctx.input(0, "input")?);
        let kernel = Self::owned_image(&ctx.input(1, "kernel")?);
        let mut solver = RichardsonLucySolver::new(input, kernel, self.settings, Threader::new(Some(ctx.threads), 1))?;
        if let Some(scope) = ctx.progress.scope() {
            // Sub-scopes left by an earlier execution would count twice.
            scope.clear_children();
            solver = solver.with_progress(scope.clone());
        }
        solver.run()?;

        let result = solver.into_result().ok_or_else(|| ctx.fail("solver finished without a result"))?;
        let pixels = result
            .pixels()
            .ok_or_else(|| ctx.fail("solver result is not real-valued"))?;
        let (region, out) = ctx.real_output(0)?;
        copy_region(result.region, pixels, region, out);
        Ok(())
    }

    fn on_config_change(&mut self, key: &str, value: &ConfigValue) -> bool {
        let settings = &mut self.settings;
        match key {
            "iterations" => match value.as_int() {
                Some(n) if n >= 0 => settings.iterations = n as usize,
                _ => return false,
            },
            "normalize_kernel" => match value.as_bool() {
                Some(normalize) => settings.normalize_kernel = normalize,
                None => return false,
            },
            "padding" => match value.as_str().and_then(PaddingMethod::parse) {
                Some(method) => settings.padding = method,
                None => return false,
            },
            "division" | "threshold" => match settings.division.with_parameter(key, value) {
                Some(policy) => settings.division = policy,
                None => return false,
            },
            _ => return false,
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::data_object::DataObject;
    use crate::pipeline::executor::Pipeline;
    use crate::pipeline::nodes::DivisionPolicy;
    use crate::pipeline::progress::{ProgressAccumulator, ProgressFn, ProgressObserver};
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_node_reports_monotonic_progress() {
        let input = Image::from_fn(Region::from_size(&[8, 3]), |i| 1.0 + ((i[0] - 4).abs() + i[1]) as f64);
        let kernel = Image::real(Region::from_size(&[3, 1]), vec![1.0, 2.0, 1.0]).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let observer: Arc<dyn ProgressObserver> = Arc::new(ProgressFn(move |p: f64| sink.lock().unwrap().push(p)));
        let accumulator = ProgressAccumulator::new();
        accumulator.add_observer(&observer);

        let mut pipeline = Pipeline::default();
        let node = pipeline.add_node(RichardsonLucyNode::new(RichardsonLucySettings {
            iterations: 3,
            ..Default::default()
        }));
        pipeline.set_input(node, "input", DataObject::from_image(input.clone())).unwrap();
        pipeline.set_input(node, "kernel", DataObject::from_image(kernel)).unwrap();
        pipeline
            .set_progress_scope(node, accumulator.register_scope("deconvolution", 1.0))
            .unwrap();
        pipeline.update(node).unwrap();

        let out = pipeline.output(node, "output").unwrap();
        assert_eq!(out.buffered_region(), input.region);
        let seen = seen.lock().unwrap();
        assert!(seen.windows(2).all(|w| w[1] >= w[0] - 1e-12));
        assert!((accumulator.progress() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_parameters() {
        let mut node = RichardsonLucyNode::default();
        assert!(node.on_config_change("iterations", &ConfigValue::Int(25)));
        assert!(!node.on_config_change("iterations", &ConfigValue::Int(-1)));
        assert!(node.on_config_change("padding", &ConfigValue::String("zero".into())));
        assert!(node.on_config_change("division", &ConfigValue::String("clamp".into())));
        assert!(node.on_config_change("threshold", &ConfigValue::Float(0.01)));
        let settings = node.settings();
        assert_eq!(settings.iterations, 25);
        assert_eq!(settings.padding, PaddingMethod::Zero);
        assert_eq!(settings.division, DivisionPolicy::Clamp { epsilon: 0.01 });
    }
}

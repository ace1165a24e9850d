//! Mock nodes and observers for engine tests

use regionflow::image::PixelKind;
use regionflow::pipeline::{NodePlugin, PipelineResult, PortDescriptor, ProgressObserver, RegionContext, RegionRequest};
use regionflow::region::Region;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

static PORTS: &[PortDescriptor] = &[
    PortDescriptor::input("input", PixelKind::Real),
    PortDescriptor::output("output", PixelKind::Real),
];

/// Copies its input and counts `generate_data` calls. With a margin it asks
/// its input for the output request grown by `margin` on every axis.
pub struct CountingNode {
    calls: Arc<AtomicUsize>,
    margin: usize,
}

impl CountingNode {
    pub fn new() -> (Self, Arc<AtomicUsize>) {
        Self::with_margin(0)
    }

    pub fn with_margin(margin: usize) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                calls: calls.clone(),
                margin,
            },
            calls,
        )
    }

    /// Boxed for `Pipeline::add_node`
    pub fn boxed(self) -> Box<dyn NodePlugin> {
        Box::new(self)
    }
}

impl NodePlugin for CountingNode {
    fn name(&self) -> &str {
        "Counting"
    }

    fn ports(&self) -> &[PortDescriptor] {
        PORTS
    }

    fn generate_input_requested_region(&self, req: &RegionRequest) -> Vec<Option<Region>> {
        let margins = [self.margin; 4];
        vec![req.inputs[0].map(|info| {
            let wanted = req.outputs[0].pad(&margins, &margins);
            wanted.intersect(&info.largest)
        })]
    }

    fn generate_data(&self, ctx: &mut RegionContext) -> PipelineResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let input = ctx.input(0, "input")?;
        let (region, out) = ctx.real_output(0)?;
        for (dst, index) in out.iter_mut().zip(region.indices()) {
            *dst = input.value(&index[..region.dim()]);
        }
        Ok(())
    }
}

/// Copies its input, but fails on any piece larger than `limit` pixels
/// after writing part of it.
pub struct FailingNode {
    limit: usize,
}

impl FailingNode {
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }

    pub fn boxed(self) -> Box<dyn NodePlugin> {
        Box::new(self)
    }
}

impl NodePlugin for FailingNode {
    fn name(&self) -> &str {
        "Failing"
    }

    fn ports(&self) -> &[PortDescriptor] {
        PORTS
    }

    fn generate_data(&self, ctx: &mut RegionContext) -> PipelineResult<()> {
        let input = ctx.input(0, "input")?;
        let pixels = ctx.region.num_elements();
        let failure = (pixels > self.limit)
            .then(|| ctx.fail(format!("{} pixels exceed the limit of {}", pixels, self.limit)));
        let (region, out) = ctx.real_output(0)?;
        if let Some(err) = failure {
            if let (Some(first), Some(index)) = (out.first_mut(), region.indices().next()) {
                *first = input.value(&index[..region.dim()]);
            }
            return Err(err);
        }
        for (dst, index) in out.iter_mut().zip(region.indices()) {
            *dst = input.value(&index[..region.dim()]);
        }
        Ok(())
    }
}

pub fn calls(counter: &Arc<AtomicUsize>) -> usize {
    counter.load(Ordering::SeqCst)
}

/// Records every progress notification
#[derive(Default)]
pub struct RecordingObserver {
    values: Mutex<Vec<f64>>,
}

impl RecordingObserver {
    pub fn values(&self) -> Vec<f64> {
        self.values.lock().unwrap().clone()
    }

    pub fn is_monotonic(&self) -> bool {
        self.values().windows(2).all(|w| w[1] >= w[0] - 1e-12)
    }
}

impl ProgressObserver for RecordingObserver {
    fn on_progress(&self, fraction: f64) {
        self.values.lock().unwrap().push(fraction);
    }
}

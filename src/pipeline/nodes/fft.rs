//! Forward and inverse N-dimensional FFT nodes.
//!
//! Both need the whole image: they enlarge their output request to the
//! largest possible region and ask for all of their input. The transform
//! works in buffer coordinates, so the region origin plays no part.

use crate::image::{ImageInfo, PixelKind};
use crate::pipeline::context::{RegionContext, RegionRequest};
use crate::pipeline::error::PipelineResult;
use crate::pipeline::node::{NodePlugin, Threading};
use crate::pipeline::nodes::offsets_within;
use crate::pipeline::port::PortDescriptor;
use crate::region::Region;
use rustfft::num_complex::Complex64;
use rustfft::{Fft, FftDirection, FftPlanner};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

static FORWARD_PORTS: &[PortDescriptor] = &[
    PortDescriptor::input("input", PixelKind::Real),
    PortDescriptor::output("output", PixelKind::Complex),
];

static INVERSE_PORTS: &[PortDescriptor] = &[
    PortDescriptor::input("input", PixelKind::Complex),
    PortDescriptor::output("output", PixelKind::Real),
];

/// One-dimensional plans a node has built, keyed by length and direction.
/// Plans survive across executions, so an iterating solver plans each
/// length once.
pub(crate) struct FftPlans {
    cache: Mutex<PlanCache>,
}

struct PlanCache {
    planner: FftPlanner<f64>,
    plans: HashMap<(usize, bool), Arc<dyn Fft<f64>>>,
}

impl FftPlans {
    pub(crate) fn new() -> Self {
        Self {
            cache: Mutex::new(PlanCache {
                planner: FftPlanner::new(),
                plans: HashMap::new(),
            }),
        }
    }

    pub(crate) fn plan(&self, len: usize, direction: FftDirection) -> Arc<dyn Fft<f64>> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        let key = (len, direction == FftDirection::Forward);
        if let Some(plan) = cache.plans.get(&key) {
            return Arc::clone(plan);
        }
        tracing::trace!("Planning {:?} FFT of length {}", direction, len);
        let plan = cache.planner.plan_fft(len, direction);
        cache.plans.insert(key, Arc::clone(&plan));
        plan
    }

    #[cfg(test)]
    fn cached(&self) -> usize {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner).plans.len()
    }
}

impl Default for FftPlans {
    fn default() -> Self {
        Self::new()
    }
}

/// In-place unnormalized transform of `data`, laid out with axis 0 fastest.
pub(crate) fn fft_nd(plans: &FftPlans, data: &mut [Complex64], size: &[usize], direction: FftDirection) {
    let mut stride = 1usize;
    for &len in size {
        if len > 1 {
            let fft = plans.plan(len, direction);
            let mut line = vec![Complex64::default(); len];
            let mut scratch = vec![Complex64::default(); fft.get_inplace_scratch_len()];
            let block = stride * len;
            for start in (0..data.len()).step_by(block) {
                for lane in 0..stride {
                    let base = start + lane;
                    for (k, value) in line.iter_mut().enumerate() {
                        *value = data[base + k * stride];
                    }
                    fft.process_with_scratch(&mut line, &mut scratch);
                    for (k, value) in line.iter().enumerate() {
                        data[base + k * stride] = *value;
                    }
                }
            }
        }
        stride *= len;
    }
}

fn whole_image_request(req: &RegionRequest) -> Vec<Option<Region>> {
    req.inputs.iter().map(|info| info.map(|i| i.largest)).collect()
}

fn enlarge_to_largest(requested: &mut [Region], infos: &[ImageInfo]) {
    for (region, info) in requested.iter_mut().zip(infos) {
        *region = info.largest;
    }
}

/// Real image to its complex spectrum.
pub struct ForwardFftNode {
    plans: FftPlans,
}

impl ForwardFftNode {
    pub fn new() -> Self {
        Self { plans: FftPlans::new() }
    }
}

impl Default for ForwardFftNode {
    fn default() -> Self {
        Self::new()
    }
}

impl NodePlugin for ForwardFftNode {
    fn name(&self) -> &str {
        "ForwardFFT"
    }

    fn ports(&self) -> &[PortDescriptor] {
        FORWARD_PORTS
    }

    fn threading(&self) -> Threading {
        Threading::Whole
    }

    fn enlarge_output_requested_region(&self, requested: &mut [Region], infos: &[ImageInfo]) {
        enlarge_to_largest(requested, infos);
    }

    fn generate_input_requested_region(&self, req: &RegionRequest) -> Vec<Option<Region>> {
        whole_image_request(req)
    }

    fn generate_data(&self, ctx: &mut RegionContext) -> PipelineResult<()> {
        let input = ctx.input(0, "input")?;
        let pixels = input
            .real()
            .ok_or_else(|| ctx.fail("input is not a real buffer"))?;
        let (region, out) = ctx.complex_output(0)?;
        for (dst, offset) in out.iter_mut().zip(offsets_within(input.region, region)) {
            *dst = Complex64::new(pixels[offset], 0.0);
        }
        fft_nd(&self.plans, out, region.size(), FftDirection::Forward);
        ctx.progress.report(1.0);
        Ok(())
    }
}

/// Complex spectrum back to a real image, normalized by the element count.
pub struct InverseFftNode {
    plans: FftPlans,
}

impl InverseFftNode {
    pub fn new() -> Self {
        Self { plans: FftPlans::new() }
    }
}

impl Default for InverseFftNode {
    fn default() -> Self {
        Self::new()
    }
}

impl NodePlugin for InverseFftNode {
    fn name(&self) -> &str {
        "InverseFFT"
    }

    fn ports(&self) -> &[PortDescriptor] {
        INVERSE_PORTS
    }

    fn threading(&self) -> Threading {
        Threading::Whole
    }

    fn enlarge_output_requested_region(&self, requested: &mut [Region], infos: &[ImageInfo]) {
        enlarge_to_largest(requested, infos);
    }

    fn generate_input_requested_region(&self, req: &RegionRequest) -> Vec<Option<Region>> {
        whole_image_request(req)
    }

    fn generate_data(&self, ctx: &mut RegionContext) -> PipelineResult<()> {
        let input = ctx.input(0, "input")?;
        let spectrum = input
            .complex()
            .ok_or_else(|| ctx.fail("input is not a complex buffer"))?;
        let (region, out) = ctx.real_output(0)?;
        let mut work: Vec<Complex64> = offsets_within(input.region, region)
            .map(|offset| spectrum[offset])
            .collect();
        fft_nd(&self.plans, &mut work, region.size(), FftDirection::Inverse);
        let scale = 1.0 / region.num_elements().max(1) as f64;
        for (dst, value) in out.iter_mut().zip(&work) {
            *dst = value.re * scale;
        }
        Ok(())
    }
}

//! regionflow demo - series -> deconvolution -> threshold
//!
//! Writes a small synthetic slice series, reads it back through the
//! pipeline, deconvolves it with a Gaussian kernel and thresholds the result.
//!
//! Usage: `regionflow [config.toml]`

use anyhow::Context;
use regionflow::collaborators::{Histogram, IsoDataThresholdCalculator, JsonSlice, SliceFormatRegistry};
use regionflow::config::{LoggingConfig, RegionflowConfig};
use regionflow::image::Image;
use regionflow::pipeline::nodes::{ImageSourceNode, RichardsonLucyNode, SeriesReaderNode};
use regionflow::pipeline::{DataObject, Pipeline, ProgressAccumulator, ProgressFn, ProgressObserver};
use regionflow::region::Region;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const SLICE_SIZE: usize = 48;
const SLICES: usize = 4;
const HISTOGRAM_BINS: usize = 128;

fn main() -> anyhow::Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => RegionflowConfig::load(&path).with_context(|| format!("loading {path}"))?,
        None => RegionflowConfig::load_or_default(),
    };
    let _guard = init_logging(&config.logging)?;
    tracing::info!("Starting regionflow demo");

    let dir = std::env::temp_dir().join("regionflow-demo");
    let files = write_series(&dir).context("writing demo series")?;

    let registry = SliceFormatRegistry::new();
    let mut pipeline = Pipeline::from_config(&config.engine);
    let reader = pipeline.add_node(SeriesReaderNode::new(files, &registry, "json")?);
    let kernel = pipeline.add_node(ImageSourceNode::new(gaussian_kernel(2, 1.5)));
    let deconvolve = pipeline.add_node(RichardsonLucyNode::new(config.deconvolution));
    pipeline.connect(reader, "output", deconvolve, "input")?;
    pipeline.connect(kernel, "output", deconvolve, "kernel")?;

    let accumulator = ProgressAccumulator::new();
    let last_decile = Arc::new(AtomicU32::new(0));
    let seen = last_decile.clone();
    let observer: Arc<dyn ProgressObserver> = Arc::new(ProgressFn(move |fraction: f64| {
        let decile = (fraction * 10.0).floor() as u32;
        if seen.fetch_max(decile, Ordering::Relaxed) < decile {
            tracing::info!("Deconvolution {:>3.0}%", fraction * 100.0);
        }
    }));
    accumulator.add_observer(&observer);
    pipeline.set_progress_scope(deconvolve, accumulator.register_scope("deconvolution", 1.0))?;

    let stats = pipeline.update(deconvolve)?;
    tracing::info!(
        "Update executed {} nodes in {} pieces",
        stats.executed_nodes,
        stats.generate_data_calls
    );

    let result = pipeline
        .output(deconvolve, "output")?
        .snapshot()
        .context("deconvolution produced no buffer")?;
    let pixels = result.pixels().context("deconvolution result is not real")?;
    let histogram = Histogram::from_samples(pixels, HISTOGRAM_BINS)?;
    let threshold = IsoDataThresholdCalculator::new().calculate(&histogram)?;
    let foreground = pixels.iter().filter(|&&v| v >= threshold.value).count();
    tracing::info!(
        "IsoData threshold {:.4}: {} of {} pixels in foreground",
        threshold.value,
        foreground,
        pixels.len()
    );
    Ok(())
}

/// Install the console subscriber and, if configured, a file writer. The
/// returned guard flushes the file writer when dropped.
fn init_logging(config: &LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer());

    match &config.file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|d| !d.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path.file_name().context("log file path has no file name")?;
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            registry
                .with(tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false))
                .init();
            Ok(Some(guard))
        }
        None => {
            registry.init();
            Ok(None)
        }
    }
}

/// Write blurred Gaussian spots, one JSON file per slice.
fn write_series(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;
    let spots = [(12.0, 14.0), (30.0, 20.0), (22.0, 36.0)];
    (0..SLICES)
        .map(|z| {
            let shift = z as f64 * 2.0;
            let image = Image::from_fn(Region::from_size(&[SLICE_SIZE, SLICE_SIZE]), |i| {
                let (x, y) = (i[0] as f64, i[1] as f64);
                0.05 + spots
                    .iter()
                    .map(|&(cx, cy)| {
                        let d2 = (x - cx - shift).powi(2) + (y - cy).powi(2);
                        (-d2 / (2.0 * 2.5 * 2.5)).exp()
                    })
                    .sum::<f64>()
            });
            let path = dir.join(format!("slice_{z:03}.json"));
            JsonSlice::from_image(&image)
                .context("synthetic slice is not real")?
                .save(&path)?;
            Ok(path)
        })
        .collect()
}

/// In-plane Gaussian of the given radius, one slice thick.
fn gaussian_kernel(radius: i64, sigma: f64) -> Image {
    let extent = (2 * radius + 1) as usize;
    Image::from_fn(Region::new(&[-radius, -radius, 0], &[extent, extent, 1]), |i| {
        let d2 = (i[0] * i[0] + i[1] * i[1]) as f64;
        (-d2 / (2.0 * sigma * sigma)).exp()
    })
}

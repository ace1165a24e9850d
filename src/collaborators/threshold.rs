//! Histogram and the IsoData threshold calculator.

use crate::pipeline::error::{PipelineError, PipelineResult};

/// One histogram bin: a representative value and how often it occurs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bin {
    pub value: f64,
    pub frequency: f64,
}

/// Finite histogram with bins ordered by increasing value.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Histogram {
    bins: Vec<Bin>,
}

impl Histogram {
    /// Pair `values[i]` with `frequencies[i]`.
    pub fn new(values: &[f64], frequencies: &[f64]) -> PipelineResult<Self> {
        if values.len() != frequencies.len() {
            return Err(PipelineError::LengthMismatch {
                what: "histogram frequencies",
                expected: values.len(),
                found: frequencies.len(),
            });
        }
        let bins = values
            .iter()
            .zip(frequencies)
            .map(|(&value, &frequency)| Bin { value, frequency })
            .collect();
        Ok(Self { bins })
    }

    /// Equal-width histogram of `samples` with `bins` bins between the
    /// smallest and largest sample. Bin values are bin centres.
    pub fn from_samples(samples: &[f64], bins: usize) -> PipelineResult<Self> {
        let finite: Vec<f64> = samples.iter().copied().filter(|v| v.is_finite()).collect();
        if finite.is_empty() || bins == 0 {
            return Err(PipelineError::EmptyInput(
                "cannot build a histogram without samples or bins".into(),
            ));
        }
        let min = finite.iter().copied().fold(f64::INFINITY, f64::min);
        let max = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if max <= min {
            return Ok(Self {
                bins: vec![Bin {
                    value: min,
                    frequency: finite.len() as f64,
                }],
            });
        }

        let width = (max - min) / bins as f64;
        let mut histogram = Self {
            bins: (0..bins)
                .map(|i| Bin {
                    value: min + (i as f64 + 0.5) * width,
                    frequency: 0.0,
                })
                .collect(),
        };
        for sample in finite {
            let bin = (((sample - min) / width) as usize).min(bins - 1);
            histogram.bins[bin].frequency += 1.0;
        }
        Ok(histogram)
    }

    pub fn bins(&self) -> &[Bin] {
        &self.bins
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    pub fn total_frequency(&self) -> f64 {
        self.bins.iter().map(|b| b.frequency).sum()
    }

    /// Frequency-weighted mean of the bin values.
    pub fn mean(&self) -> f64 {
        let total = self.total_frequency();
        if total <= 0.0 {
            return 0.0;
        }
        self.bins.iter().map(|b| b.value * b.frequency).sum::<f64>() / total
    }

    /// Weighted sum and total frequency of `bins[range]`.
    fn partition(&self, range: std::ops::Range<usize>) -> (f64, f64) {
        self.bins[range]
            .iter()
            .fold((0.0, 0.0), |(sum, total), b| (sum + b.value * b.frequency, total + b.frequency))
    }
}

/// Result of a threshold computation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Threshold {
    pub value: f64,
    /// Bin that satisfied the IsoData test; `None` when the histogram mean
    /// (or the single bin) was used.
    pub bin: Option<usize>,
}

/// IsoData (iterative intermeans) threshold.
///
/// Scans non-empty bins in increasing order and stops at the first bin whose
/// value is at least the midpoint of the mean below (inclusive) and the mean
/// above. Falls back to the histogram mean when no bin passes.
#[derive(Debug, Clone, Copy, Default)]
pub struct IsoDataThresholdCalculator;

impl IsoDataThresholdCalculator {
    pub fn new() -> Self {
        Self
    }

    pub fn calculate(&self, histogram: &Histogram) -> PipelineResult<Threshold> {
        if histogram.total_frequency() <= 0.0 {
            return Err(PipelineError::EmptyInput("histogram is empty".into()));
        }
        let size = histogram.len();
        if size == 1 {
            return Ok(Threshold {
                value: histogram.bins[0].value,
                bin: None,
            });
        }

        let nonempty = (0..size).filter(|&i| histogram.bins[i].frequency > 0.0);
        for pos in nonempty {
            let (low_sum, low_total) = histogram.partition(0..pos + 1);
            let (high_sum, high_total) = histogram.partition(pos + 1..size);
            if low_total <= f64::EPSILON || high_total <= f64::EPSILON {
                continue;
            }
            let midpoint = (low_sum / low_total + high_sum / high_total) * 0.5;
            let value = histogram.bins[pos].value;
            if value >= midpoint {
                tracing::debug!("IsoData threshold {} at bin {}", value, pos);
                return Ok(Threshold {
                    value,
                    bin: Some(pos),
                });
            }
        }

        let mean = histogram.mean();
        tracing::debug!("IsoData found no crossing, using mean {}", mean);
        Ok(Threshold {
            value: mean,
            bin: None,
        })
    }
}

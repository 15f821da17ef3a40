//! Band-pass filtering of seismic sample batches.

use anyhow::{anyhow, Result};
use std::f64::consts::PI;

/// Filter capability applied to each sample batch.
///
/// Implementations must return exactly one output sample per input sample.
pub trait SignalFilter: Send {
    fn name(&self) -> &'static str;

    fn apply(&self, samples: &[f64]) -> Result<Vec<f64>>;
}

/// Identity filter.
#[derive(Clone, Copy, Debug, Default)]
pub struct PassThrough;

impl SignalFilter for PassThrough {
    fn name(&self) -> &'static str {
        "pass-through"
    }

    fn apply(&self, samples: &[f64]) -> Result<Vec<f64>> {
        Ok(samples.to_vec())
    }
}

/// Butterworth band-pass built from a high-pass cascade at `lowcut` followed
/// by a low-pass cascade at `highcut`.
///
/// Each cascade has `ceil(order / 2)` second-order sections, so odd orders
/// behave like the next even order. Every batch is filtered from zero state.
#[derive(Clone, Debug)]
pub struct BandPass {
    lowcut: f64,
    highcut: f64,
    sampling_rate: f64,
    order: u32,
    sections: Vec<Biquad>,
}

impl BandPass {
    pub fn new(lowcut: f64, highcut: f64, sampling_rate: f64, order: u32) -> Result<Self> {
        let nyquist = sampling_rate / 2.0;
        if !(sampling_rate.is_finite() && sampling_rate > 0.0) {
            return Err(anyhow!("sampling rate must be positive"));
        }
        if !(lowcut > 0.0 && lowcut < highcut && highcut < nyquist) {
            return Err(anyhow!(
                "band-pass cutoffs must satisfy 0 < low ({}) < high ({}) < nyquist ({})",
                lowcut,
                highcut,
                nyquist
            ));
        }
        if order == 0 {
            return Err(anyhow!("filter order must be at least 1"));
        }

        let pairs = order.div_ceil(2);
        let even_order = f64::from(pairs * 2);
        let mut sections = Vec::with_capacity(pairs as usize * 2);
        for kind in [Kind::HighPass(lowcut), Kind::LowPass(highcut)] {
            for k in 0..pairs {
                let q = 1.0 / (2.0 * (PI * f64::from(2 * k + 1) / (2.0 * even_order)).cos());
                sections.push(Biquad::design(kind, q, sampling_rate));
            }
        }
        Ok(Self {
            lowcut,
            highcut,
            sampling_rate,
            order,
            sections,
        })
    }

    pub fn lowcut(&self) -> f64 {
        self.lowcut
    }

    pub fn highcut(&self) -> f64 {
        self.highcut
    }

    pub fn sampling_rate(&self) -> f64 {
        self.sampling_rate
    }

    pub fn order(&self) -> u32 {
        self.order
    }
}

impl SignalFilter for BandPass {
    fn name(&self) -> &'static str {
        "butterworth-band-pass"
    }

    fn apply(&self, samples: &[f64]) -> Result<Vec<f64>> {
        if samples.iter().any(|s| !s.is_finite()) {
            return Err(anyhow!("sample batch contains non-finite values"));
        }
        let mut out = samples.to_vec();
        for section in &self.sections {
            section.run(&mut out);
        }
        Ok(out)
    }
}

#[derive(Clone, Copy, Debug)]
enum Kind {
    HighPass(f64),
    LowPass(f64),
}

/// Normalized second-order section (a0 = 1).
#[derive(Clone, Copy, Debug)]
struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl Biquad {
    fn design(kind: Kind, q: f64, fs: f64) -> Self {
        let cutoff = match kind {
            Kind::HighPass(f) | Kind::LowPass(f) => f,
        };
        let w0 = 2.0 * PI * cutoff / fs;
        let (sin, cos) = w0.sin_cos();
        let alpha = sin / (2.0 * q);
        let a0 = 1.0 + alpha;
        let (b0, b1, b2) = match kind {
            Kind::LowPass(_) => ((1.0 - cos) / 2.0, 1.0 - cos, (1.0 - cos) / 2.0),
            Kind::HighPass(_) => ((1.0 + cos) / 2.0, -(1.0 + cos), (1.0 + cos) / 2.0),
        };
        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: -2.0 * cos / a0,
            a2: (1.0 - alpha) / a0,
        }
    }

    // Transposed direct form II, zero initial state.
    fn run(&self, samples: &mut [f64]) {
        let (mut z1, mut z2) = (0.0, 0.0);
        for x in samples.iter_mut() {
            let input = *x;
            let y = self.b0 * input + z1;
            z1 = self.b1 * input - self.a1 * y + z2;
            z2 = self.b2 * input - self.a2 * y;
            *x = y;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f64, fs: f64, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| (2.0 * PI * freq * i as f64 / fs).sin())
            .collect()
    }

    fn tail_energy(samples: &[f64]) -> f64 {
        samples[samples.len() / 2..].iter().map(|s| s * s).sum()
    }

    #[test]
    fn keeps_length() -> Result<()> {
        let filter = BandPass::new(2.0, 15.0, 100.0, 5)?;
        for n in [0, 1, 10, 1000] {
            assert_eq!(filter.apply(&vec![0.3; n])?.len(), n);
        }
        Ok(())
    }

    #[test]
    fn passes_band_and_rejects_outside() -> Result<()> {
        let filter = BandPass::new(2.0, 15.0, 100.0, 5)?;
        let in_band = sine(8.0, 100.0, 2000);
        let above = sine(40.0, 100.0, 2000);
        let pass_ratio = tail_energy(&filter.apply(&in_band)?) / tail_energy(&in_band);
        let stop_ratio = tail_energy(&filter.apply(&above)?) / tail_energy(&above);
        assert!(pass_ratio > 0.8, "pass ratio {pass_ratio}");
        assert!(stop_ratio < 0.01, "stop ratio {stop_ratio}");

        let dc = filter.apply(&vec![1.0; 2000])?;
        assert!(dc[1999].abs() < 1e-3);
        Ok(())
    }

    #[test]
    fn rejects_bad_design() {
        assert!(BandPass::new(15.0, 2.0, 100.0, 5).is_err());
        assert!(BandPass::new(2.0, 60.0, 100.0, 5).is_err());
        assert!(BandPass::new(2.0, 15.0, 100.0, 0).is_err());
    }

    #[test]
    fn pass_through_is_identity() -> Result<()> {
        assert_eq!(PassThrough.apply(&[1.0, -2.0])?, vec![1.0, -2.0]);
        Ok(())
    }
}

//! Sampled single-quantum response of a readout channel.
use calo_digi_common::Time;
use serde::Deserialize;
use thiserror::Error;

/// The tail of a biexponential response is dropped once it falls below this fraction of the peak.
const BIEXP_TAIL_FRACTION: f64 = 1e-3;
/// Gaussian responses are truncated at this many standard deviations from the peak.
const GAUSSIAN_SUPPORT_SD: f64 = 4.0;

#[derive(Debug, Error, PartialEq)]
pub(crate) enum PulseTemplateError {
    #[error("Sampling interval must be positive and finite, got {0}")]
    InvalidSampling(Time),
    #[error("At least one sub-sample phase is required")]
    NoPhases,
    #[error("Invalid pulse shape: {0}")]
    InvalidShape(&'static str),
}

/// Analog response of a single quantum, as a function of the time since its arrival.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case", rename_all_fields = "kebab-case", tag = "pulse-type")]
pub(crate) enum PulseShape {
    Flat {
        width: f64,
        height: f64,
    },
    Triangular {
        peak_time: f64,
        width: f64,
        height: f64,
    },
    Gaussian {
        peak_time: f64,
        sd: f64,
        height: f64,
    },
    Biexp {
        rise: f64,
        decay: f64,
        height: f64,
    },
}

impl PulseShape {
    fn validate(&self) -> Result<(), PulseTemplateError> {
        match *self {
            Self::Flat { width, .. } if !(width > 0.0) => {
                Err(PulseTemplateError::InvalidShape("flat width must be positive"))
            }
            Self::Triangular {
                peak_time, width, ..
            } if !(width > 0.0 && (0.0..=width).contains(&peak_time)) => Err(
                PulseTemplateError::InvalidShape("triangular peak time must lie within its width"),
            ),
            Self::Gaussian { sd, .. } if !(sd > 0.0) => Err(PulseTemplateError::InvalidShape(
                "gaussian standard deviation must be positive",
            )),
            Self::Biexp { rise, decay, .. } if !(rise > 0.0 && decay > rise) => Err(
                PulseTemplateError::InvalidShape("biexp requires 0 < rise < decay"),
            ),
            _ => Ok(()),
        }
    }

    /// Time of the maximum and the unnormalised maximum of `exp(-t/decay) - exp(-t/rise)`.
    fn biexp_peak(rise: f64, decay: f64) -> (f64, f64) {
        let peak_time = f64::ln(decay / rise) * decay * rise / (decay - rise);
        let peak_value = f64::exp(-peak_time / decay) - f64::exp(-peak_time / rise);
        (peak_time, peak_value)
    }

    /// Time after arrival beyond which the response is treated as zero.
    pub(crate) fn support(&self) -> Time {
        match *self {
            Self::Flat { width, .. } => width,
            Self::Triangular { width, .. } => width,
            Self::Gaussian { peak_time, sd, .. } => peak_time + GAUSSIAN_SUPPORT_SD * sd,
            Self::Biexp { rise, decay, .. } => {
                let (peak_time, peak_value) = Self::biexp_peak(rise, decay);
                // Past the peak the rising term is negligible, so invert the decaying term alone.
                f64::max(peak_time, decay * f64::ln(1.0 / (peak_value * BIEXP_TAIL_FRACTION)))
            }
        }
    }

    pub(crate) fn get_value_at(&self, time: Time) -> f64 {
        match *self {
            Self::Flat { width, height } => {
                if (0.0..width).contains(&time) {
                    height
                } else {
                    f64::default()
                }
            }
            Self::Triangular {
                peak_time,
                width,
                height,
            } => {
                if 0.0 <= time && time < peak_time {
                    height * time / peak_time
                } else if peak_time <= time && time < width {
                    height * (width - time) / (width - peak_time)
                } else {
                    f64::default()
                }
            }
            Self::Gaussian {
                peak_time,
                sd,
                height,
            } => {
                if time < 0.0 || (time - peak_time).abs() > GAUSSIAN_SUPPORT_SD * sd {
                    f64::default()
                } else {
                    height * f64::exp(-0.5 * f64::powi((time - peak_time) / sd, 2))
                }
            }
            Self::Biexp {
                rise,
                decay,
                height,
            } => {
                if time < 0.0 {
                    f64::default()
                } else {
                    let (_, peak_value) = Self::biexp_peak(rise, decay);
                    height * (f64::exp(-time / decay) - f64::exp(-time / rise)) / peak_value
                }
            }
        }
    }
}

/// A pulse ready to be superposed onto a waveform, starting at sample `start`.
#[derive(Debug, PartialEq)]
pub(crate) struct DigitizedPulse<'a> {
    pub(crate) start: i64,
    pub(crate) samples: &'a [f64],
}

impl DigitizedPulse<'_> {
    /// Adds the scaled pulse to `waveform`, dropping any samples outside of it.
    pub(crate) fn superpose(&self, waveform: &mut [f64], scale: f64) {
        for (offset, amplitude) in self.samples.iter().enumerate() {
            let Ok(index) = usize::try_from(self.start + offset as i64) else {
                continue;
            };
            match waveform.get_mut(index) {
                Some(sample) => *sample += amplitude * scale,
                None => break,
            }
        }
    }
}

/// Response of a single quantum sampled at the digitiser rate, for a number of sub-sample phases.
/// Phase `p` of `n` holds the response to a quantum arriving at `(p + 0.5)/n` of the way into its first sample.
#[derive(Clone, Debug)]
pub(crate) struct PulseTemplate {
    sampling: Time,
    phases: Vec<Vec<f64>>,
}

impl PulseTemplate {
    pub(crate) fn new(
        shape: &PulseShape,
        sampling: Time,
        num_phases: usize,
    ) -> Result<Self, PulseTemplateError> {
        Self::check_sampling(sampling)?;
        if num_phases == 0 {
            return Err(PulseTemplateError::NoPhases);
        }
        shape.validate()?;

        let num_samples = (shape.support() / sampling).ceil() as usize + 1;
        let phases = (0..num_phases)
            .map(|phase| {
                let offset = (phase as f64 + 0.5) / num_phases as f64;
                (0..num_samples)
                    .map(|sample| shape.get_value_at((sample as f64 - offset) * sampling))
                    .collect()
            })
            .collect();
        Ok(Self { sampling, phases })
    }

    /// Builds a template from explicit per-phase tables, phase 0 first.
    pub(crate) fn from_tables(
        sampling: Time,
        phases: Vec<Vec<f64>>,
    ) -> Result<Self, PulseTemplateError> {
        Self::check_sampling(sampling)?;
        if phases.is_empty() {
            return Err(PulseTemplateError::NoPhases);
        }
        Ok(Self { sampling, phases })
    }

    fn check_sampling(sampling: Time) -> Result<(), PulseTemplateError> {
        if sampling > 0.0 && sampling.is_finite() {
            Ok(())
        } else {
            Err(PulseTemplateError::InvalidSampling(sampling))
        }
    }

    pub(crate) fn sampling(&self) -> Time {
        self.sampling
    }

    pub(crate) fn num_phases(&self) -> usize {
        self.phases.len()
    }

    /// Longest pulse, in samples.
    pub(crate) fn max_len(&self) -> usize {
        self.phases.iter().map(Vec::len).max().unwrap_or_default()
    }

    /// The sampled response to a quantum arriving at `time`, where time zero is the start of sample zero.
    pub(crate) fn digitized_pulse(&self, time: Time) -> DigitizedPulse<'_> {
        let position = time / self.sampling;
        let start = position.floor();
        let bucket = ((position - start) * self.num_phases() as f64) as usize;
        let phase = bucket.min(self.num_phases() - 1);
        DigitizedPulse {
            start: start as i64,
            samples: self.phases.get(phase).map(Vec::as_slice).unwrap_or(&[]),
        }
    }
}

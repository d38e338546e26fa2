use crate::pulse_template::PulseShape;
use calo_digi_common::{Intensity, Time};
use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Parser)]
pub(crate) struct DigitiserParameters {
    /// Start of the digitisation window, relative to the nominal proton bunch time, in ns.
    #[clap(long, default_value = "400")]
    pub(crate) digitization_start: Time,

    /// End of the digitisation window, relative to the nominal proton bunch time, in ns.
    /// Only used for on-spill events.
    #[clap(long, default_value = "1695")]
    pub(crate) digitization_end: Time,

    /// Add noise to the waveforms.
    #[clap(long)]
    pub(crate) add_noise: bool,

    /// Only generate noise near signal deposits, rather than over the whole waveform.
    #[clap(long)]
    pub(crate) generate_spot_noise: bool,

    /// Add random salt and pepper noise, only applies to spot noise.
    #[clap(long)]
    pub(crate) add_random_noise: bool,

    /// Digitiser sampling interval, in ns.
    #[clap(long, default_value = "5")]
    pub(crate) digi_sampling: Time,

    /// ADC resolution in bits, between 1 and 16.
    #[clap(long, default_value = "12")]
    pub(crate) n_bits: u32,

    /// Half-width, in samples, of the window in which a hit's peak must be the local maximum.
    #[clap(long, default_value = "2")]
    pub(crate) n_bins_peak: usize,

    /// Minimum pedestal-subtracted ADC value of a hit.
    #[clap(long, default_value = "16")]
    pub(crate) min_peak_adc: Intensity,

    /// Number of samples recorded before each hit. Also sets the start time buffer.
    #[clap(long, default_value = "16")]
    pub(crate) buffer_digi: usize,

    /// Diagnostic verbosity, levels above 2 log every waveform and digi.
    #[clap(long, default_value = "0")]
    pub(crate) diag_level: i32,

    #[clap(flatten)]
    pub(crate) noise: NoiseParameters,

    #[clap(flatten)]
    pub(crate) pulse: PulseParameters,
}

#[derive(Debug, Clone, Parser)]
pub(crate) struct NoiseParameters {
    /// Mean baseline of the noise realisation, in ADC counts.
    #[clap(long, default_value = "100")]
    pub(crate) noise_baseline: f64,

    /// Standard deviation of the electronics noise, in ADC counts.
    #[clap(long, default_value = "1.5")]
    pub(crate) noise_electronics_sd: f64,

    /// Rate of single-quantum dark counts, per ns.
    #[clap(long, default_value = "0.0005")]
    pub(crate) noise_dark_rate: f64,

    /// Peak ADC counts of a single dark count.
    #[clap(long, default_value = "0.35")]
    pub(crate) noise_dark_amplitude: f64,

    /// Number of samples in the precomputed noise realisation.
    #[clap(long, default_value = "20000")]
    pub(crate) noise_bank_size: usize,

    /// Probability of each sample receiving a salt and pepper impulse.
    #[clap(long, default_value = "0.0001")]
    pub(crate) noise_salt_pepper_probability: f64,

    /// Size of a salt and pepper impulse, in ADC counts.
    #[clap(long, default_value = "8")]
    pub(crate) noise_salt_pepper_amplitude: f64,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub(crate) enum PulseType {
    Flat,
    Triangular,
    Gaussian,
    Biexp,
}

#[derive(Debug, Clone, Parser)]
pub(crate) struct PulseParameters {
    /// Shape of the single-quantum response.
    #[clap(long, default_value = "biexp")]
    pub(crate) pulse_type: PulseType,

    /// Peak height of the single-quantum response, in units of the calibration scale.
    #[clap(long, default_value = "1")]
    pub(crate) pulse_height: f64,

    /// Width of flat and triangular responses, in ns.
    #[clap(long, default_value = "40")]
    pub(crate) pulse_width: f64,

    /// Time from arrival to peak of triangular and gaussian responses, in ns.
    #[clap(long, default_value = "15")]
    pub(crate) pulse_peak_time: f64,

    /// Standard deviation of gaussian responses, in ns.
    #[clap(long, default_value = "5")]
    pub(crate) pulse_sd: f64,

    /// Rise time constant of biexponential responses, in ns.
    #[clap(long, default_value = "10")]
    pub(crate) pulse_rise: f64,

    /// Decay time constant of biexponential responses, in ns.
    #[clap(long, default_value = "30")]
    pub(crate) pulse_decay: f64,

    /// Number of sub-sample phases the response is tabulated for.
    #[clap(long, default_value = "10")]
    pub(crate) pulse_phases: usize,
}

impl PulseParameters {
    pub(crate) fn shape(&self) -> PulseShape {
        match self.pulse_type {
            PulseType::Flat => PulseShape::Flat {
                width: self.pulse_width,
                height: self.pulse_height,
            },
            PulseType::Triangular => PulseShape::Triangular {
                peak_time: self.pulse_peak_time,
                width: self.pulse_width,
                height: self.pulse_height,
            },
            PulseType::Gaussian => PulseShape::Gaussian {
                peak_time: self.pulse_peak_time,
                sd: self.pulse_sd,
                height: self.pulse_height,
            },
            PulseType::Biexp => PulseShape::Biexp {
                rise: self.pulse_rise,
                decay: self.pulse_decay,
                height: self.pulse_height,
            },
        }
    }
}

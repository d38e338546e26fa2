//! Baseline and electronics noise of a readout channel.
use crate::{parameters::NoiseParameters, pulse_template::PulseTemplate};
use calo_digi_common::{Channel, EventId, Intensity};
use rand::{Rng, SeedableRng, distr::Bernoulli, rngs::StdRng};
use rand_distr::{Distribution, Normal, NormalError, Poisson, PoissonError};
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Debug, Error)]
pub(crate) enum NoiseError {
    #[error("Noise bank must contain at least one sample")]
    EmptyBank,
    #[error("Invalid electronics noise: {0}")]
    Normal(#[from] NormalError),
    #[error("Invalid dark count rate: {0}")]
    Poisson(#[from] PoissonError),
    #[error("Salt and pepper probability {0} is not in [0, 1]")]
    Probability(f64),
    #[error("Electronics noise standard deviation {0} must be finite and non-negative")]
    ElectronicsSd(f64),
}

/// Seed from which every random stream of a job is derived.
///
/// Each channel of each event gets its own stream, so the output for a given seed
/// does not depend on the order in which channels are processed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct NoiseSeed(u64);

impl NoiseSeed {
    pub(crate) fn new(seed: u64) -> Self {
        Self(seed)
    }

    /// Stream used for run-level initialisation.
    pub(crate) fn run_stream(&self) -> StdRng {
        StdRng::seed_from_u64(splitmix64(self.0))
    }

    pub(crate) fn channel_stream(&self, event_id: EventId, channel: Channel) -> StdRng {
        let event_seed = splitmix64(self.0 ^ splitmix64(event_id.wrapping_add(1)));
        StdRng::seed_from_u64(splitmix64(event_seed ^ u64::from(channel)))
    }
}

/// Finaliser of the SplitMix64 generator, decorrelates nearby seeds.
fn splitmix64(value: u64) -> u64 {
    let mut z = value.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Synthesises noise from a bank of baseline realisations built once per run.
#[derive(Clone, Debug)]
pub(crate) struct NoiseModel {
    bank: Vec<f64>,
    pedestal: Intensity,
    salt_and_pepper: Bernoulli,
    salt_and_pepper_amplitude: f64,
}

impl NoiseModel {
    /// Builds the noise bank and fixes the pedestal as the mean baseline seen by windows
    /// of `buffer` samples.
    #[instrument(skip_all, err(level = "error"))]
    pub(crate) fn initialize(
        parameters: &NoiseParameters,
        template: &PulseTemplate,
        buffer: usize,
        rng: &mut impl Rng,
    ) -> Result<Self, NoiseError> {
        if parameters.noise_bank_size == 0 {
            return Err(NoiseError::EmptyBank);
        }
        let salt_and_pepper = Bernoulli::new(parameters.noise_salt_pepper_probability)
            .map_err(|_| NoiseError::Probability(parameters.noise_salt_pepper_probability))?;

        let sd = parameters.noise_electronics_sd;
        if !(sd >= 0.0 && sd.is_finite()) {
            return Err(NoiseError::ElectronicsSd(sd));
        }
        let electronics = Normal::new(0.0, sd)?;
        let mut bank = (0..parameters.noise_bank_size)
            .map(|_| parameters.noise_baseline + electronics.sample(rng))
            .collect::<Vec<_>>();

        let num_dark_counts = add_dark_counts(&mut bank, parameters, template, rng)?;
        let pedestal = estimate_pedestal(&bank, buffer);
        debug!(
            "Noise bank of {} samples with {num_dark_counts} dark counts, pedestal {pedestal}",
            bank.len()
        );

        Ok(Self {
            bank,
            pedestal,
            salt_and_pepper,
            salt_and_pepper_amplitude: parameters.noise_salt_pepper_amplitude,
        })
    }

    pub(crate) fn pedestal(&self) -> Intensity {
        self.pedestal
    }

    /// Adds noise to every sample, or just the pedestal if `pedestal_only`.
    pub(crate) fn add_full_noise(
        &self,
        waveform: &mut [f64],
        pedestal_only: bool,
        rng: &mut impl Rng,
    ) {
        if pedestal_only {
            let pedestal = f64::from(self.pedestal);
            waveform.iter_mut().for_each(|sample| *sample += pedestal);
        } else {
            let length = waveform.len();
            self.add_sample_noise(waveform, 0, length, rng);
        }
    }

    /// Adds a random segment of the noise bank to `length` samples from `start`.
    pub(crate) fn add_sample_noise(
        &self,
        waveform: &mut [f64],
        start: usize,
        length: usize,
        rng: &mut impl Rng,
    ) {
        let offset = rng.random_range(0..self.bank.len());
        waveform
            .iter_mut()
            .skip(start)
            .take(length)
            .zip(self.bank.iter().cycle().skip(offset))
            .for_each(|(sample, noise)| *sample += noise);
    }

    /// Independently perturbs each sample by a fixed impulse of random sign.
    pub(crate) fn add_salt_and_pepper(&self, waveform: &mut [f64], rng: &mut impl Rng) {
        for sample in waveform.iter_mut() {
            if self.salt_and_pepper.sample(rng) {
                if rng.random::<bool>() {
                    *sample += self.salt_and_pepper_amplitude;
                } else {
                    *sample -= self.salt_and_pepper_amplitude;
                }
            }
        }
    }
}

/// Superposes single-quantum pulses at Poisson-distributed times.
/// Pulses may start before the bank so that its first samples carry the same pile-up as the rest.
fn add_dark_counts(
    bank: &mut [f64],
    parameters: &NoiseParameters,
    template: &PulseTemplate,
    rng: &mut impl Rng,
) -> Result<usize, NoiseError> {
    let lead_in = template.max_len() as f64 * template.sampling();
    let span = bank.len() as f64 * template.sampling() + lead_in;
    let expected = parameters.noise_dark_rate * span;
    if expected <= 0.0 {
        return Ok(0);
    }
    let num_dark_counts = Poisson::new(expected)?.sample(rng) as usize;
    for _ in 0..num_dark_counts {
        let time = rng.random_range(-lead_in..span - lead_in);
        template
            .digitized_pulse(time)
            .superpose(bank, parameters.noise_dark_amplitude);
    }
    Ok(num_dark_counts)
}

/// Mean over every complete window of `buffer` samples, or over the whole bank
/// if it is shorter than one window.
fn estimate_pedestal(bank: &[f64], buffer: usize) -> Intensity {
    let covered = if buffer == 0 || buffer > bank.len() {
        bank
    } else {
        bank.get(..bank.len() - bank.len() % buffer).unwrap_or(bank)
    };
    let mean = covered.iter().sum::<f64>() / covered.len().max(1) as f64;
    mean.round().clamp(0.0, f64::from(Intensity::MAX)) as Intensity
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn parameters() -> NoiseParameters {
        NoiseParameters {
            noise_baseline: 20.0,
            noise_electronics_sd: 1.0,
            noise_dark_rate: 0.0,
            noise_dark_amplitude: 1.0,
            noise_bank_size: 10_000,
            noise_salt_pepper_probability: 0.0,
            noise_salt_pepper_amplitude: 8.0,
        }
    }

    fn template() -> PulseTemplate {
        PulseTemplate::from_tables(5.0, vec![vec![4.0, 2.0, 1.0]]).unwrap()
    }

    fn model(parameters: &NoiseParameters) -> NoiseModel {
        NoiseModel::initialize(parameters, &template(), 10, &mut NoiseSeed::new(7).run_stream())
            .unwrap()
    }

    #[test]
    fn pedestal_tracks_baseline() {
        assert_eq!(model(&parameters()).pedestal(), 20);
    }

    #[test]
    fn dark_counts_raise_pedestal() {
        let parameters = NoiseParameters {
            // One dark count every ten samples, each adding seven counts in total.
            noise_dark_rate: 0.02,
            ..parameters()
        };
        assert_eq!(model(&parameters).pedestal(), 21);
    }

    #[test]
    fn pedestal_windows() {
        let bank = [1.0, 1.0, 1.0, 1.0, 9.0];
        assert_eq!(estimate_pedestal(&bank, 2), 1);
        assert_eq!(estimate_pedestal(&bank, 0), 3);
        assert_eq!(estimate_pedestal(&bank, 6), 3);
    }

    #[test]
    fn pedestal_only() {
        let noise = model(&parameters());
        let mut waveform = vec![1.5; 4];
        noise.add_full_noise(&mut waveform, true, &mut NoiseSeed::new(1).run_stream());
        assert_eq!(waveform, vec![21.5; 4]);
    }

    #[test]
    fn full_noise_fluctuates_about_baseline() {
        let noise = model(&parameters());
        let mut waveform = vec![0.0; 2000];
        noise.add_full_noise(&mut waveform, false, &mut NoiseSeed::new(1).run_stream());
        let mean = waveform.iter().sum::<f64>() / waveform.len() as f64;
        assert_approx_eq!(mean, 20.0, 0.2);
        assert!(waveform.iter().any(|&s| s != 20.0));
    }

    #[test]
    fn sample_noise_is_restricted_to_range() {
        let noise = model(&parameters());
        let mut waveform = vec![0.0; 10];
        noise.add_sample_noise(&mut waveform, 3, 4, &mut NoiseSeed::new(1).run_stream());
        assert!(waveform[..3].iter().all(|&s| s == 0.0));
        assert!(waveform[3..7].iter().all(|&s| s > 10.0));
        assert!(waveform[7..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn sample_noise_past_the_end_is_clipped() {
        let noise = model(&parameters());
        let mut waveform = vec![0.0; 5];
        noise.add_sample_noise(&mut waveform, 3, 10, &mut NoiseSeed::new(1).run_stream());
        assert!(waveform[..3].iter().all(|&s| s == 0.0));
        assert!(waveform[3..].iter().all(|&s| s > 10.0));
    }

    #[test]
    fn salt_and_pepper() {
        let mut rng = NoiseSeed::new(3).run_stream();

        let mut waveform = vec![50.0; 100];
        model(&parameters()).add_salt_and_pepper(&mut waveform, &mut rng);
        assert!(waveform.iter().all(|&s| s == 50.0));

        let always = NoiseParameters {
            noise_salt_pepper_probability: 1.0,
            ..parameters()
        };
        model(&always).add_salt_and_pepper(&mut waveform, &mut rng);
        assert!(waveform.iter().all(|&s| s == 42.0 || s == 58.0));
        assert!(waveform.contains(&42.0) && waveform.contains(&58.0));
    }

    #[test]
    fn streams_are_reproducible() {
        let seed = NoiseSeed::new(99);
        let draw = |mut rng: StdRng| (0..4).map(|_| rng.random::<u64>()).collect::<Vec<_>>();
        assert_eq!(draw(seed.channel_stream(4, 2)), draw(seed.channel_stream(4, 2)));
        assert_ne!(draw(seed.channel_stream(4, 2)), draw(seed.channel_stream(4, 3)));
        assert_ne!(draw(seed.channel_stream(4, 2)), draw(seed.channel_stream(5, 2)));
        assert_ne!(draw(seed.channel_stream(0, 0)), draw(seed.run_stream()));
    }

    #[test]
    fn invalid_parameters_rejected() {
        let mut rng = NoiseSeed::new(0).run_stream();
        let empty = NoiseParameters {
            noise_bank_size: 0,
            ..parameters()
        };
        assert!(matches!(
            NoiseModel::initialize(&empty, &template(), 10, &mut rng),
            Err(NoiseError::EmptyBank)
        ));
        let probability = NoiseParameters {
            noise_salt_pepper_probability: 1.5,
            ..parameters()
        };
        assert!(matches!(
            NoiseModel::initialize(&probability, &template(), 10, &mut rng),
            Err(NoiseError::Probability(_))
        ));
        for noise_electronics_sd in [-1.0, f64::NAN, f64::INFINITY] {
            let sd = NoiseParameters {
                noise_electronics_sd,
                ..parameters()
            };
            assert!(matches!(
                NoiseModel::initialize(&sd, &template(), 10, &mut rng),
                Err(NoiseError::ElectronicsSd(_))
            ));
        }
        let silent = NoiseParameters {
            noise_electronics_sd: 0.0,
            ..parameters()
        };
        assert_eq!(
            NoiseModel::initialize(&silent, &template(), 10, &mut rng)
                .unwrap()
                .pedestal(),
            20
        );
    }
}

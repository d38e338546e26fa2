//! Builds, digitises and windows the waveform of every readout channel of an event.
use crate::{
    conditions::{Calibration, Conditions},
    data::{CaloDigi, Event, EventWindowMarker, SpillType, group_by_channel},
    noise::{NoiseError, NoiseModel, NoiseSeed},
    parameters::DigitiserParameters,
    pulse_template::{PulseTemplate, PulseTemplateError},
    window::{HitWindow, WindowExtractor, WindowParameters},
};
use calo_digi_common::{Channel, EventId, Intensity, Time};
use rand::Rng;
use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info_span, instrument};

/// Spot noise is generated around samples exceeding this fraction of the channel's ADC counts per MeV.
const SPOT_NOISE_THRESHOLD_MEV: f64 = 0.1;

/// Only diagnostic levels above this log waveform contents.
const WAVEFORM_DIAG_LEVEL: i32 = 2;

/// Longest waveform a single channel may be read out for.
const MAX_WAVEFORM_SAMPLES: f64 = (1u64 << 24) as f64;

#[derive(Debug, Error)]
pub(crate) enum DigitiserError {
    #[error(
        "Digitization start {digitization_start} ns is too small to accommodate the start time buffer of {start_time_buffer} ns"
    )]
    StartTimeBuffer {
        digitization_start: Time,
        start_time_buffer: Time,
    },
    #[error("ADC resolution of {0} bits is not in 1..=16")]
    AdcBits(u32),
    #[error("Pulse template sampled every {template} ns, but the digitiser samples every {digitiser} ns")]
    SamplingMismatch { template: Time, digitiser: Time },
    #[error("Pulse Template Error: {0}")]
    PulseTemplate(#[from] PulseTemplateError),
    #[error("Noise Error: {0}")]
    Noise(#[from] NoiseError),
    #[error("Event {event_id}: digitization size too short ({length} samples)")]
    WaveformTooShort { event_id: EventId, length: f64 },
    #[error("Event {event_id}: digitization size too long ({length} samples)")]
    WaveformTooLong { event_id: EventId, length: f64 },
}

/// The digitisation window of one event, corrected by the event's timing offset.
#[derive(Clone, Copy, Debug)]
struct EventFrame {
    event_id: EventId,
    start: Time,
    num_samples: usize,
}

/// Saturating conversion of an analog sample to a pedestal-subtracted ADC code.
pub(crate) fn quantize(sample: f64, pedestal: Intensity, max_adc: Intensity) -> Intensity {
    let pedestal = f64::from(pedestal);
    if sample.is_nan() || sample < pedestal {
        0
    } else {
        (sample - pedestal).min(f64::from(max_adc)) as Intensity
    }
}

pub(crate) struct Digitiser {
    parameters: DigitiserParameters,
    start_time_buffer: Time,
    max_adc: Intensity,
    template: PulseTemplate,
    hit_extractor: WindowExtractor,
    noise: Option<NoiseModel>,
    seed: NoiseSeed,
}

impl Digitiser {
    /// Validates the configuration and performs the run-level initialisation of the noise model.
    #[instrument(skip_all, err(level = "error"))]
    pub(crate) fn new(
        parameters: DigitiserParameters,
        template: PulseTemplate,
        seed: NoiseSeed,
    ) -> Result<Self, DigitiserError> {
        if !(1..=Intensity::BITS).contains(&parameters.n_bits) {
            return Err(DigitiserError::AdcBits(parameters.n_bits));
        }
        if template.sampling() != parameters.digi_sampling {
            return Err(DigitiserError::SamplingMismatch {
                template: template.sampling(),
                digitiser: parameters.digi_sampling,
            });
        }
        let start_time_buffer = parameters.digi_sampling * parameters.buffer_digi as f64;
        if start_time_buffer > parameters.digitization_start {
            return Err(DigitiserError::StartTimeBuffer {
                digitization_start: parameters.digitization_start,
                start_time_buffer,
            });
        }

        let hit_extractor = WindowExtractor::new(WindowParameters {
            // Codes are integers, so this accepts every code of at least `min_peak_adc`.
            // Zero codes are never active.
            min_amplitude: f64::from(parameters.min_peak_adc.max(1)) - 0.5,
            buffer: parameters.buffer_digi,
            peak_window: parameters.n_bins_peak,
        });

        let noise = if parameters.add_noise {
            Some(NoiseModel::initialize(
                &parameters.noise,
                &template,
                hit_extractor.buffer(),
                &mut seed.run_stream(),
            )?)
        } else {
            None
        };

        Ok(Self {
            max_adc: (u32::MAX >> (u32::BITS - parameters.n_bits)) as Intensity,
            start_time_buffer,
            template,
            hit_extractor,
            noise,
            seed,
            parameters,
        })
    }

    pub(crate) fn max_adc(&self) -> Intensity {
        self.max_adc
    }

    pub(crate) fn pedestal(&self) -> Intensity {
        self.noise.as_ref().map(NoiseModel::pedestal).unwrap_or_default()
    }

    /// Number of samples of the event's waveforms.
    /// Off-spill events are read out until the end of the event rather than the configured window.
    pub(crate) fn waveform_length(
        &self,
        event_id: EventId,
        marker: &EventWindowMarker,
    ) -> Result<usize, DigitiserError> {
        let end = match marker.spill_type {
            SpillType::OnSpill => self.parameters.digitization_end,
            SpillType::OffSpill | SpillType::Other => marker.event_length,
        };
        let length = ((end - self.parameters.digitization_start) / self.parameters.digi_sampling)
            .trunc();
        if length > MAX_WAVEFORM_SAMPLES {
            Err(DigitiserError::WaveformTooLong { event_id, length })
        } else if length >= 1.0 {
            Ok(length as usize)
        } else {
            Err(DigitiserError::WaveformTooShort { event_id, length })
        }
    }

    /// Digitises every channel of the event, in channel order.
    #[instrument(
        skip_all,
        fields(
            event_id = event.event_id,
            num_hits = event.hits.len(),
            num_samples,
            effective_start,
            num_digis
        ),
        err(level = "error")
    )]
    pub(crate) fn digitise_event(
        &self,
        event: &Event,
        conditions: Conditions<'_>,
    ) -> Result<Vec<CaloDigi>, DigitiserError> {
        let num_channels = conditions.geometry.num_channels();
        if num_channels == 0 {
            return Ok(Vec::new());
        }

        let frame = EventFrame {
            event_id: event.event_id,
            start: self.parameters.digitization_start - conditions.timing.timing_offset(event),
            num_samples: self.waveform_length(event.event_id, &event.marker)?,
        };
        let span = tracing::Span::current();
        span.record("num_samples", frame.num_samples);
        span.record("effective_start", frame.start);

        let digis = group_by_channel(&event.hits, num_channels)
            .par_iter()
            .enumerate()
            .flat_map_iter(|(channel, times)| {
                let channel = channel as Channel;
                info_span!(parent: &span, "channel", channel).in_scope(|| {
                    self.digitise_channel(channel, times, &frame, conditions.calibration)
                })
            })
            .collect::<Vec<_>>();

        span.record("num_digis", digis.len());
        Ok(digis)
    }

    fn digitise_channel(
        &self,
        channel: Channel,
        times: &[Time],
        frame: &EventFrame,
        calibration: &dyn Calibration,
    ) -> Vec<CaloDigi> {
        let mut waveform = vec![0.0; frame.num_samples];
        self.fill(&mut waveform, times, frame, calibration.scale_factor(channel));

        let pedestal = match &self.noise {
            Some(noise) => {
                let mut rng = self.seed.channel_stream(frame.event_id, channel);
                if self.parameters.generate_spot_noise {
                    self.add_spot_noise(
                        noise,
                        &mut waveform,
                        calibration.adc_per_mev(channel),
                        &mut rng,
                    );
                } else {
                    noise.add_full_noise(&mut waveform, false, &mut rng);
                }
                noise.pedestal()
            }
            None => 0,
        };

        let codes = waveform
            .iter()
            .map(|&sample| quantize(sample, pedestal, self.max_adc))
            .collect::<Vec<_>>();
        if self.parameters.diag_level > WAVEFORM_DIAG_LEVEL && codes.iter().any(|&code| code > 0) {
            debug!("Waveform content for channel {channel}: {codes:?}");
        }

        self.hit_extractor
            .extract(&codes)
            .into_iter()
            .map(|window| self.build_digi(channel, &waveform, window, frame))
            .collect()
    }

    /// Superposes the scaled response to each arrival time.
    fn fill(&self, waveform: &mut [f64], times: &[Time], frame: &EventFrame, scale: f64) {
        for &time in times {
            let time = time - frame.start + self.start_time_buffer;
            self.template
                .digitized_pulse(time)
                .superpose(waveform, scale);
        }
    }

    /// Adds noise only around the regions containing signal.
    fn add_spot_noise(
        &self,
        noise: &NoiseModel,
        waveform: &mut [f64],
        adc_per_mev: f64,
        rng: &mut impl Rng,
    ) {
        let regions = WindowExtractor::new(WindowParameters {
            min_amplitude: SPOT_NOISE_THRESHOLD_MEV * adc_per_mev,
            buffer: self.parameters.buffer_digi,
            peak_window: 0,
        })
        .extract(&*waveform);

        for region in regions {
            noise.add_sample_noise(waveform, region.start, region.len(), rng);
        }
        if self.parameters.add_random_noise {
            noise.add_salt_and_pepper(waveform, rng);
        }
    }

    fn build_digi(
        &self,
        channel: Channel,
        waveform: &[f64],
        window: HitWindow,
        frame: &EventFrame,
    ) -> CaloDigi {
        let sampling = self.parameters.digi_sampling;
        let samples = waveform
            .get(window.range())
            .unwrap_or_default()
            .iter()
            .map(|&sample| (sample as Intensity).min(self.max_adc))
            .collect::<Vec<_>>();
        let t0 = (window.start as f64 * sampling + frame.start - self.start_time_buffer) as i64;

        // Only samples from the start of the effective window may be the peak.
        // The comparison is not strict, so the latest of equal maxima is chosen.
        let mut peak_pos = 0;
        let mut peak_value = samples.first().copied().unwrap_or_default();
        for (index, &value) in samples.iter().enumerate() {
            let time = t0 as f64 + index as f64 * sampling;
            if time >= frame.start && value >= peak_value {
                peak_pos = index;
                peak_value = value;
            }
        }

        if self.parameters.diag_level > WAVEFORM_DIAG_LEVEL {
            debug!(
                "Created digi for channel {channel}: start={} stop={} t0={t0} peak={peak_pos} content={samples:?}",
                window.start, window.stop
            );
        }

        CaloDigi {
            channel,
            t0,
            waveform: samples,
            peak_pos,
        }
    }
}

//! Read-only lookups provided by the calibration, geometry and timing services.
use crate::data::Event;
use calo_digi_common::{Channel, Time};
use serde::Deserialize;
use std::{collections::BTreeMap, io::Read};
use thiserror::Error;

#[derive(Debug, Error)]
pub(crate) enum ConditionsError {
    #[error("Json Error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Calibration of channel {channel} is invalid: {adc_per_mev} ADC/MeV, {pe_per_mev} PE/MeV")]
    InvalidCalibration {
        channel: Channel,
        adc_per_mev: f64,
        pe_per_mev: f64,
    },
    #[error("Default calibration is invalid: {adc_per_mev} ADC/MeV, {pe_per_mev} PE/MeV")]
    InvalidDefaultCalibration { adc_per_mev: f64, pe_per_mev: f64 },
    #[error("Channel {0} is calibrated more than once")]
    DuplicateChannel(Channel),
}

pub(crate) trait Calibration: Sync {
    /// ADC counts per MeV deposited.
    fn adc_per_mev(&self, channel: Channel) -> f64;

    /// Photo-electrons per MeV deposited.
    fn pe_per_mev(&self, channel: Channel) -> f64;

    /// ADC counts per photo-electron.
    fn scale_factor(&self, channel: Channel) -> f64 {
        self.adc_per_mev(channel) / self.pe_per_mev(channel)
    }
}

pub(crate) trait Geometry: Sync {
    fn num_channels(&self) -> usize;
}

pub(crate) trait EventTiming: Sync {
    /// Time from the proton bunch to the event marker.
    fn timing_offset(&self, event: &Event) -> Time;
}

/// Lookups for a single event, shared by every channel.
#[derive(Clone, Copy)]
pub(crate) struct Conditions<'a> {
    pub(crate) calibration: &'a dyn Calibration,
    pub(crate) geometry: &'a dyn Geometry,
    pub(crate) timing: &'a dyn EventTiming,
}

#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct UniformCalibration {
    pub(crate) adc_per_mev: f64,
    pub(crate) pe_per_mev: f64,
}

impl UniformCalibration {
    /// Calibration applied to channels without their own entry.
    pub(crate) fn new(adc_per_mev: f64, pe_per_mev: f64) -> Result<Self, ConditionsError> {
        let calibration = Self {
            adc_per_mev,
            pe_per_mev,
        };
        if calibration.is_valid() {
            Ok(calibration)
        } else {
            Err(ConditionsError::InvalidDefaultCalibration {
                adc_per_mev,
                pe_per_mev,
            })
        }
    }

    fn is_valid(&self) -> bool {
        self.adc_per_mev.is_finite() && self.pe_per_mev.is_finite() && self.pe_per_mev > 0.0
    }

    fn validate(&self, channel: Channel) -> Result<(), ConditionsError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(ConditionsError::InvalidCalibration {
                channel,
                adc_per_mev: self.adc_per_mev,
                pe_per_mev: self.pe_per_mev,
            })
        }
    }
}

impl Calibration for UniformCalibration {
    fn adc_per_mev(&self, _: Channel) -> f64 {
        self.adc_per_mev
    }

    fn pe_per_mev(&self, _: Channel) -> f64 {
        self.pe_per_mev
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ChannelCalibration {
    channel: Channel,
    #[serde(flatten)]
    calibration: UniformCalibration,
}

/// Per-channel calibration, with a fallback for channels absent from the table.
#[derive(Debug)]
pub(crate) struct CalibrationTable {
    channels: BTreeMap<Channel, UniformCalibration>,
    fallback: UniformCalibration,
}

impl CalibrationTable {
    /// Reads a JSON list of `{ "channel", "adc-per-mev", "pe-per-mev" }` objects.
    pub(crate) fn from_reader(
        reader: impl Read,
        fallback: UniformCalibration,
    ) -> Result<Self, ConditionsError> {
        let fallback = UniformCalibration::new(fallback.adc_per_mev, fallback.pe_per_mev)?;
        let entries: Vec<ChannelCalibration> = serde_json::from_reader(reader)?;
        let mut channels = BTreeMap::new();
        for ChannelCalibration {
            channel,
            calibration,
        } in entries
        {
            calibration.validate(channel)?;
            if channels.insert(channel, calibration).is_some() {
                return Err(ConditionsError::DuplicateChannel(channel));
            }
        }
        Ok(Self { channels, fallback })
    }

    fn get(&self, channel: Channel) -> &UniformCalibration {
        self.channels.get(&channel).unwrap_or(&self.fallback)
    }
}

impl Calibration for CalibrationTable {
    fn adc_per_mev(&self, channel: Channel) -> f64 {
        self.get(channel).adc_per_mev
    }

    fn pe_per_mev(&self, channel: Channel) -> f64 {
        self.get(channel).pe_per_mev
    }
}

/// Every crystal is read out by the same number of sensors.
#[derive(Clone, Copy, Debug)]
pub(crate) struct CrystalGeometry {
    pub(crate) num_crystals: usize,
    pub(crate) sensors_per_crystal: usize,
}

impl Geometry for CrystalGeometry {
    fn num_channels(&self) -> usize {
        self.num_crystals * self.sensors_per_crystal
    }
}

/// Uses the offset recorded with each event, or a default for events without one.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct RecordedTiming {
    pub(crate) default_offset: Time,
}

impl EventTiming for RecordedTiming {
    fn timing_offset(&self, event: &Event) -> Time {
        event.timing_offset.unwrap_or(self.default_offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FALLBACK: UniformCalibration = UniformCalibration {
        adc_per_mev: 10.0,
        pe_per_mev: 20.0,
    };

    #[test]
    fn calibration_table() {
        let json = r#"[
            { "channel": 1, "adc-per-mev": 12.0, "pe-per-mev": 30.0 },
            { "channel": 4, "adc-per-mev": 9.0, "pe-per-mev": 18.0 }
        ]"#;
        let table = CalibrationTable::from_reader(json.as_bytes(), FALLBACK).unwrap();
        assert_eq!(table.adc_per_mev(1), 12.0);
        assert_eq!(table.scale_factor(1), 0.4);
        assert_eq!(table.scale_factor(4), 0.5);
        assert_eq!(table.pe_per_mev(2), 20.0);
    }

    #[test]
    fn invalid_calibration_rejected() {
        let json = r#"[{ "channel": 3, "adc-per-mev": 12.0, "pe-per-mev": 0.0 }]"#;
        assert!(matches!(
            CalibrationTable::from_reader(json.as_bytes(), FALLBACK),
            Err(ConditionsError::InvalidCalibration { channel: 3, .. })
        ));
        let json = r#"[
            { "channel": 3, "adc-per-mev": 12.0, "pe-per-mev": 1.0 },
            { "channel": 3, "adc-per-mev": 11.0, "pe-per-mev": 1.0 }
        ]"#;
        assert!(matches!(
            CalibrationTable::from_reader(json.as_bytes(), FALLBACK),
            Err(ConditionsError::DuplicateChannel(3))
        ));
        assert!(matches!(
            CalibrationTable::from_reader("{".as_bytes(), FALLBACK),
            Err(ConditionsError::Json(_))
        ));
    }

    #[test]
    fn invalid_default_calibration_rejected() {
        assert_eq!(UniformCalibration::new(10.0, 20.0).unwrap(), FALLBACK);
        for (adc_per_mev, pe_per_mev) in [(10.0, 0.0), (10.0, -2.0), (f64::NAN, 20.0)] {
            assert!(matches!(
                UniformCalibration::new(adc_per_mev, pe_per_mev),
                Err(ConditionsError::InvalidDefaultCalibration { .. })
            ));
        }
        let zero_fallback = UniformCalibration {
            adc_per_mev: 10.0,
            pe_per_mev: 0.0,
        };
        assert!(matches!(
            CalibrationTable::from_reader("[]".as_bytes(), zero_fallback),
            Err(ConditionsError::InvalidDefaultCalibration { .. })
        ));
    }

    #[test]
    fn geometry_without_sensors_has_no_channels() {
        let geometry = CrystalGeometry {
            num_crystals: 674,
            sensors_per_crystal: 0,
        };
        assert_eq!(geometry.num_channels(), 0);
        let geometry = CrystalGeometry {
            num_crystals: 674,
            sensors_per_crystal: 2,
        };
        assert_eq!(geometry.num_channels(), 1348);
    }

    #[test]
    fn recorded_timing_falls_back_to_default() {
        let timing = RecordedTiming {
            default_offset: 25.0,
        };
        let mut event = Event::default();
        assert_eq!(timing.timing_offset(&event), 25.0);
        event.timing_offset = Some(-3.0);
        assert_eq!(timing.timing_offset(&event), -3.0);
    }
}

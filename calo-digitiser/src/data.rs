//! Per-event input and output records.
use calo_digi_common::{Channel, EventId, Intensity, SampleIndex, Time};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// A single signal quantum arriving at a readout channel.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct PhotoHit {
    pub(crate) channel: Channel,
    pub(crate) time: Time,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) enum SpillType {
    #[default]
    OnSpill,
    OffSpill,
    Other,
}

/// Describes the readout window of an event.
#[derive(Clone, Copy, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct EventWindowMarker {
    pub(crate) spill_type: SpillType,
    /// Only consulted when the event is not on-spill.
    #[serde(default)]
    pub(crate) event_length: Time,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct Event {
    pub(crate) event_id: EventId,
    #[serde(default)]
    pub(crate) marker: EventWindowMarker,
    /// Time from the proton bunch to the event marker, if recorded with the event.
    #[serde(default)]
    pub(crate) timing_offset: Option<Time>,
    #[serde(default)]
    pub(crate) hits: Vec<PhotoHit>,
}

/// Arrival times bucketed by channel.
/// Hits on channels outside of `0..num_channels` are dropped.
pub(crate) fn group_by_channel(hits: &[PhotoHit], num_channels: usize) -> Vec<Vec<Time>> {
    let mut grouped = vec![Vec::<Time>::new(); num_channels];
    for hit in hits {
        match grouped.get_mut(hit.channel as usize) {
            Some(times) => times.push(hit.time),
            None => warn!(
                "Photo hit on channel {} outside of {num_channels} channels, skipping",
                hit.channel
            ),
        }
    }
    grouped
}

/// A digitised hit window of a single channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct CaloDigi {
    pub(crate) channel: Channel,
    /// Time of the first sample.
    pub(crate) t0: i64,
    pub(crate) waveform: Vec<Intensity>,
    /// Index into `waveform` of the peak sample.
    pub(crate) peak_pos: SampleIndex,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct EventDigis {
    pub(crate) event_id: EventId,
    pub(crate) digis: Vec<CaloDigi>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const JSON_EVENT: &str = r#"
    {
        "event-id": 17,
        "marker": { "spill-type": "off-spill", "event-length": 100000.0 },
        "hits": [
            { "channel": 2, "time": 640.5 },
            { "channel": 0, "time": 700.0 },
            { "channel": 2, "time": 655.0 }
        ]
    }
    "#;

    #[test]
    fn deserialise_event() {
        let event: Event = serde_json::from_str(JSON_EVENT).unwrap();
        assert_eq!(event.event_id, 17);
        assert_eq!(event.marker.spill_type, SpillType::OffSpill);
        assert_eq!(event.marker.event_length, 100000.0);
        assert_eq!(event.timing_offset, None);
        assert_eq!(event.hits.len(), 3);
    }

    #[test]
    fn marker_defaults_to_on_spill() {
        let event: Event = serde_json::from_str(r#"{ "event-id": 1 }"#).unwrap();
        assert_eq!(event.marker.spill_type, SpillType::OnSpill);
        assert!(event.hits.is_empty());
    }

    #[test]
    fn hits_grouped_in_arrival_order() {
        let event: Event = serde_json::from_str(JSON_EVENT).unwrap();
        let grouped = group_by_channel(&event.hits, 3);
        assert_eq!(grouped, vec![vec![700.0], vec![], vec![640.5, 655.0]]);
    }

    #[test]
    fn hits_outside_geometry_dropped() {
        let hits = [
            PhotoHit {
                channel: 5,
                time: 1.0,
            },
            PhotoHit {
                channel: 0,
                time: 2.0,
            },
        ];
        assert_eq!(group_by_channel(&hits, 1), vec![vec![2.0]]);
        assert!(group_by_channel(&hits, 0).is_empty());
    }
}

use crate::{
    conditions::Conditions,
    data::{Event, EventDigis},
    digitiser::{Digitiser, DigitiserError},
};
use tracing::{info, instrument};

/// Digitises the events in order, stopping at the first event which cannot be digitised.
#[instrument(skip_all, fields(num_events = events.len(), num_digis), err(level = "error"))]
pub(crate) fn process_events(
    digitiser: &Digitiser,
    events: &[Event],
    conditions: Conditions<'_>,
) -> Result<Vec<EventDigis>, DigitiserError> {
    let output = events
        .iter()
        .map(|event| {
            Ok(EventDigis {
                event_id: event.event_id,
                digis: digitiser.digitise_event(event, conditions)?,
            })
        })
        .collect::<Result<Vec<_>, DigitiserError>>()?;

    let num_digis = output.iter().map(|event| event.digis.len()).sum::<usize>();
    tracing::Span::current().record("num_digis", num_digis);
    info!(
        "Digitised {} events into {num_digis} digis",
        output.len()
    );
    Ok(output)
}

//! Server-sent domain events with `Last-Event-ID` resume.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use axum::{
    extract::State,
    http::HeaderMap,
    response::sse::{self, Sse},
};
use castellan_events::{EventBus, EventEnvelope, EventId};
use futures_util::Stream;
use tracing::warn;

use crate::http::constants::{HEADER_LAST_EVENT_ID, SSE_KEEP_ALIVE_SECS};
use crate::state::ApiState;

pub(crate) async fn stream_events(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
) -> Sse<impl Stream<Item = Result<sse::Event, Infallible>> + Send> {
    let last_id = headers
        .get(HEADER_LAST_EVENT_ID)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<EventId>().ok());

    Sse::new(event_sse_stream(&state.events, last_id)).keep_alive(
        sse::KeepAlive::new()
            .interval(Duration::from_secs(SSE_KEEP_ALIVE_SECS))
            .text("keep-alive"),
    )
}

fn event_sse_stream(
    events: &EventBus,
    since: Option<EventId>,
) -> impl Stream<Item = Result<sse::Event, Infallible>> + Send + use<> {
    let mut subscription = events.subscribe(since);
    stream! {
        while let Some(envelope) = subscription.next().await {
            if let Some(event) = to_sse_event(&envelope) {
                yield Ok(event);
            }
        }
    }
}

fn to_sse_event(envelope: &EventEnvelope) -> Option<sse::Event> {
    match serde_json::to_string(envelope) {
        Ok(payload) => Some(
            sse::Event::default()
                .id(envelope.id.to_string())
                .event(envelope.event.kind())
                .data(payload),
        ),
        Err(err) => {
            warn!(error = %err, event_id = envelope.id, "failed to serialise event");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use castellan_events::{Event, ServiceState};
    use futures_util::StreamExt;
    use std::error::Error;
    use tokio::time::timeout;

    #[tokio::test]
    async fn resumes_after_the_last_seen_id() -> Result<(), Box<dyn Error>> {
        let bus = EventBus::new();
        let first = bus.publish(Event::ServiceStateChanged {
            state: ServiceState::Restarting,
        });
        bus.publish(Event::ServiceStateChanged {
            state: ServiceState::Running,
        });

        let stream = event_sse_stream(&bus, Some(first));
        futures_util::pin_mut!(stream);
        let next = timeout(Duration::from_secs(1), stream.next())
            .await?
            .ok_or("stream ended")?;
        assert!(next.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn envelopes_serialise_into_frames() -> Result<(), Box<dyn Error>> {
        let bus = EventBus::new();
        bus.publish(Event::UpdateAvailable {
            version: "v2.0.0".to_string(),
        });
        let envelope = bus
            .subscribe(Some(0))
            .next()
            .await
            .ok_or("replayed event expected")?;
        assert!(to_sse_event(&envelope).is_some());
        Ok(())
    }
}

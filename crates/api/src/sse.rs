//! Server-Sent Events rendering of job subscriptions.
//!
//! Both the REST stream and the RPC stream endpoint turn a
//! [`Subscription`] into an SSE body here. The subscription is owned by the
//! stream, so a client disconnect drops the body, the stream, and with it
//! the subscription.

use std::convert::Infallible;
use std::time::Duration;

use axum::http::header::CACHE_CONTROL;
use axum::http::{HeaderName, HeaderValue};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use demix_core::JobEvent;
use demix_events::{Delivery, Subscription};
use futures::stream::Stream;

/// Comment text sent on idle streams.
pub const HEARTBEAT_COMMENT: &str = "heartbeat";

/// Render every delivery of `subscription` until it closes.
///
/// `render` maps a job frame to an SSE event; returning `None` skips it.
pub fn subscription_stream<F>(
    mut subscription: Subscription,
    heartbeat: Duration,
    render: F,
) -> impl Stream<Item = Result<Event, Infallible>>
where
    F: Fn(&JobEvent) -> Option<Event> + Send + 'static,
{
    async_stream::stream! {
        tracing::debug!(job_id = %subscription.job_id(), "SSE stream opened");

        loop {
            match subscription.next(heartbeat).await {
                Delivery::Event(event) => {
                    if let Some(frame) = render(&event) {
                        yield Ok(frame);
                    }
                }
                Delivery::Heartbeat => {
                    yield Ok(Event::default().comment(HEARTBEAT_COMMENT));
                }
                Delivery::Closed => break,
            }
        }

        tracing::debug!(job_id = %subscription.job_id(), "SSE stream finished");
    }
}

/// Wrap an event stream in an SSE response with proxy-friendly headers.
pub fn into_sse_response<S>(stream: S) -> Response
where
    S: Stream<Item = Result<Event, Infallible>> + Send + 'static,
{
    (
        [
            (CACHE_CONTROL, HeaderValue::from_static("no-cache")),
            // Disables response buffering in nginx-style reverse proxies.
            (
                HeaderName::from_static("x-accel-buffering"),
                HeaderValue::from_static("no"),
            ),
        ],
        Sse::new(stream),
    )
        .into_response()
}

/// `event: <type>` with the frame as JSON data.
pub fn typed_event(event: &JobEvent) -> Option<Event> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Event::default().event(event.event_type()).data(json)),
        Err(e) => {
            tracing::warn!(job_id = %event.job_id, error = %e, "Failed to serialize job frame");
            None
        }
    }
}

use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use futures_util::stream::{self, Stream};

use crate::error::GrepwiseError;
use crate::event_bus::{RecvOutcome, Subscriber};
use crate::AppState;

fn subscriber_stream<T>(sub: Subscriber<T>) -> impl Stream<Item = Result<Event, Infallible>>
where
    T: Clone + Send + serde::Serialize + 'static,
{
    stream::unfold(sub, |sub| async move {
        loop {
            match sub.next().await {
                RecvOutcome::Item(payload) => {
                    let event = Event::default().json_data(&payload).unwrap_or_else(|_| Event::default().data("serialization error"));
                    return Some((Ok(event), sub));
                }
                RecvOutcome::Lagged(n) => {
                    return Some((Ok(Event::default().event("lagged").data(n.to_string())), sub));
                }
                RecvOutcome::Closed => return None,
            }
        }
    })
}

/// Live tail of every ingested `LogEvent` (§6 `/api/realtime/logs`).
pub async fn logs(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let sub = state.log_events.subscribe().await;
    Sse::new(subscriber_stream(sub)).keep_alive(KeepAlive::default())
}

/// Live feed of fired `AlarmEvent`s, scoped to one alarm id (widget hosts a
/// single alarm's status in the teacher's dashboard model). Dashboards and
/// saved-widget layout persistence are out of scope (§1 Non-goals); this
/// endpoint only re-exposes the alarm event bus, filtered client-side by id.
pub async fn widget(State(state): State<AppState>, Path(id): Path<uuid::Uuid>) -> Result<impl IntoResponse, GrepwiseError> {
    if state.config_store.get_alarm(id).is_none() {
        return Err(GrepwiseError::NotFound(id.to_string()));
    }
    let sub = state.alarm_events.subscribe().await;
    Ok(Sse::new(filtered_alarm_stream(sub, id)).keep_alive(KeepAlive::default()))
}

fn filtered_alarm_stream(
    sub: Subscriber<crate::model::alarm::AlarmEvent>,
    alarm_id: uuid::Uuid,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(sub, move |sub| async move {
        loop {
            match sub.next().await {
                RecvOutcome::Item(payload) if payload.alarm_id == alarm_id => {
                    let event = Event::default().json_data(&payload).unwrap_or_else(|_| Event::default().data("serialization error"));
                    return Some((Ok(event), sub));
                }
                RecvOutcome::Item(_) => continue,
                RecvOutcome::Lagged(n) => return Some((Ok(Event::default().event("lagged").data(n.to_string())), sub)),
                RecvOutcome::Closed => return None,
            }
        }
    })
}

//! Server-Sent Events support

use crate::runtime::{Subscription, UiEvent};
use crate::state_machine::InteractionSnapshot;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

/// Stream that starts with the current snapshot, then forwards session updates
pub fn sse_stream(subscription: Subscription) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let Subscription {
        snapshot,
        events,
        snapshots,
    } = subscription;

    let init = futures::stream::once(async move {
        Ok(Event::default()
            .event("init")
            .data(json!({ "type": "init", "state": snapshot }).to_string()))
    });
    let updates = session_updates(events, snapshots).map(|event| Ok(ui_event_to_axum(event)));

    Sse::new(init.chain(updates)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

/// Session updates for one client.
///
/// A client that falls behind the broadcast gets the latest state in place of
/// what it missed; chunks that state already contains are not sent again.
fn session_updates(
    events: broadcast::Receiver<UiEvent>,
    snapshots: watch::Receiver<InteractionSnapshot>,
) -> impl Stream<Item = UiEvent> {
    let mut resynced: Option<InteractionSnapshot> = None;

    BroadcastStream::new(events).filter_map(move |result| match result {
        Ok(UiEvent::Chunk { turn, index, .. })
            if resynced.as_ref().is_some_and(|s| s.includes_chunk(turn, index)) =>
        {
            None
        }
        Ok(event) => Some(event),
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            tracing::debug!(skipped, "SSE client lagged, resending state");
            let snapshot = snapshots.borrow().clone();
            resynced = Some(snapshot.clone());
            Some(UiEvent::State { snapshot })
        }
    })
}

fn ui_event_to_axum(event: UiEvent) -> Event {
    let (event_type, data) = match event {
        UiEvent::State { snapshot } => ("state", json!({ "type": "state", "state": snapshot })),
        UiEvent::Chunk { turn, index, text } => (
            "chunk",
            json!({ "type": "chunk", "turn": turn, "index": index, "text": text }),
        ),
        UiEvent::AgentDone => ("agent_done", json!({ "type": "agent_done" })),
        UiEvent::Error { message } => ("error", json!({ "type": "error", "message": message })),
    };

    Event::default().event(event_type).data(data.to_string())
}

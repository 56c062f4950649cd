//! Server-Sent Events for quote processing progress

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::models::QuoteStatus;
use crate::AppState;

/// GET /quotes/:id/events - processing snapshots for one quote
///
/// The first event is the current snapshot; after that one event per
/// change. The stream ends once the quote has moved past analysis. A client
/// disconnect drops the stream, which closes the subscription.
pub async fn quote_event_stream(
    State(state): State<AppState>,
    Path(quote_id): Path<Uuid>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let mut subscription = state.engine.subscribe(quote_id).await?;
    info!(quote_id = %quote_id, "SSE client subscribed to quote progress");

    let stream = async_stream::stream! {
        while let Some(snapshot) = subscription.next().await {
            match serde_json::to_string(&snapshot) {
                Ok(data) => {
                    debug!(quote_id = %quote_id, progress = snapshot.progress, "SSE: progress snapshot");
                    yield Ok(Event::default().event("ProcessingSnapshot").data(data));
                }
                Err(e) => {
                    warn!(quote_id = %quote_id, error = %e, "SSE: failed to serialize snapshot");
                }
            }

            if settled(snapshot.status) {
                break;
            }
        }
        subscription.close().await;
        debug!(quote_id = %quote_id, "SSE: quote progress stream ended");
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    ))
}

/// Analysis outcome decided, nothing more to report
fn settled(status: QuoteStatus) -> bool {
    !matches!(
        status,
        QuoteStatus::Draft | QuoteStatus::DetailsPending | QuoteStatus::AwaitingAnalysis
    )
}

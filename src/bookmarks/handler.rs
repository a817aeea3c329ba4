//! HTTP Handlers for the bookmarks API, including the SSE feed endpoints.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::HeaderMap,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures_util::stream::Stream;
use serde::Serialize;
use tokio::sync::mpsc;

use super::{Bookmarks, CreateBookmark, validate_url};
use crate::db::Database;
use crate::feed::{ChangeEvent, FeedMessage};
use crate::handler::AppState;
use crate::model::{Bookmark, BookmarkStats, StatsWindow};
use crate::reconciler::BookmarkView;
use crate::session::Session;
use crate::{created, error_response, internal_error, not_found, success, unpack_error};

pub async fn create_bookmark(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateBookmark>,
) -> Response {
    let session = match state.sessions.authenticate(&headers).await {
        Ok(session) => session,
        Err(e) => return error_response(&e),
    };

    if let Err(e) = validate_url(&payload.url) {
        return error_response(&e);
    }

    let lib = Bookmarks::new(state.db.connection());
    match lib.create(&session.user_id, payload).await {
        Ok(record) => {
            tracing::info!(owner = %record.owner, id = %record.id, "bookmark created");
            state.feed.publish(ChangeEvent::Insert {
                record: record.clone(),
            });
            created(record)
        }
        Err(e) => {
            tracing::error!("failed to create bookmark: {}", unpack_error(e.as_ref()));
            internal_error("failed to create bookmark")
        }
    }
}

pub async fn list_bookmarks(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let session = match state.sessions.authenticate(&headers).await {
        Ok(session) => session,
        Err(e) => return error_response(&e),
    };

    let lib = Bookmarks::new(state.db.connection());
    match lib.list_for_owner(&session.user_id).await {
        Ok(records) => success(records),
        Err(e) => {
            tracing::error!("failed to list bookmarks: {}", unpack_error(e.as_ref()));
            internal_error("failed to list bookmarks")
        }
    }
}

pub async fn delete_bookmark(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let session = match state.sessions.authenticate(&headers).await {
        Ok(session) => session,
        Err(e) => return error_response(&e),
    };

    let lib = Bookmarks::new(state.db.connection());
    match lib.delete(&session.user_id, &id).await {
        Ok(Some(record)) => {
            tracing::info!(owner = %record.owner, id = %record.id, "bookmark deleted");
            state.feed.publish(ChangeEvent::Delete {
                record: record.clone(),
            });
            success(record)
        }
        Ok(None) => not_found("bookmark not found"),
        Err(e) => {
            tracing::error!("failed to delete bookmark: {}", unpack_error(e.as_ref()));
            internal_error("failed to delete bookmark")
        }
    }
}

pub async fn get_stats(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let session = match state.sessions.authenticate(&headers).await {
        Ok(session) => session,
        Err(e) => return error_response(&e),
    };

    let lib = Bookmarks::new(state.db.connection());
    match lib
        .stats_for_owner(&session.user_id, &StatsWindow::current())
        .await
    {
        Ok(stats) => success(stats),
        Err(e) => {
            tracing::error!("failed to compute stats: {}", unpack_error(e.as_ref()));
            internal_error("failed to compute stats")
        }
    }
}

/// Raw owner-filtered change events over SSE. The stream ends when the
/// session is revoked, so it never outlives the user it was opened for.
pub async fn feed(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let (session, revoked) = match authenticate_stream(&state, &headers).await {
        Ok(pair) => pair,
        Err(response) => return response,
    };
    let mut sub = state.feed.subscribe(&session.user_id);

    let (tx, rx) = mpsc::channel::<Event>(16);
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = revoked.cancelled() => break,
                // receiver gone means the client disconnected
                _ = tx.closed() => break,
                msg = sub.next() => match msg {
                    FeedMessage::Event(event) => {
                        let Ok(frame) = sse_event("change", &event) else { break };
                        if tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                    FeedMessage::Lagged(skipped) => {
                        tracing::warn!(skipped, owner = %sub.owner(), "feed receiver lagged");
                        let frame = Event::default().event("lagged").data(skipped.to_string());
                        if tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                    FeedMessage::Closed => break,
                },
            }
        }
    });

    Sse::new(event_stream(rx))
        .keep_alive(KeepAlive::default())
        .into_response()
}

#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum LiveFrame {
    Snapshot {
        records: Vec<Bookmark>,
        stats: BookmarkStats,
    },
    Change {
        event: ChangeEvent,
        stats: BookmarkStats,
    },
}

/// Reconciled live stream: one snapshot frame, then deduplicated change
/// events, each with freshly counted stats.
///
/// The feed subscription is taken *before* the snapshot query, so events
/// racing the snapshot arrive as duplicates and are absorbed by the view.
/// A lagged subscription means events were missed; the reload is
/// authoritative, so the stream re-snapshots instead of guessing.
pub async fn live(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let (session, revoked) = match authenticate_stream(&state, &headers).await {
        Ok(pair) => pair,
        Err(response) => return response,
    };
    let mut sub = state.feed.subscribe(&session.user_id);

    let (tx, rx) = mpsc::channel::<Event>(16);
    let db = state.db.clone();
    tokio::spawn(async move {
        let mut view = BookmarkView::new(&session.user_id);
        if send_snapshot(&db, &mut view, &tx).await.is_err() {
            return;
        }

        loop {
            tokio::select! {
                _ = revoked.cancelled() => break,
                _ = tx.closed() => break,
                msg = sub.next() => match msg {
                    FeedMessage::Event(event) => {
                        let Some(applied) = view.apply(event) else { continue };
                        let lib = Bookmarks::new(db.connection());
                        let stats = match lib
                            .stats_for_owner(view.owner(), &StatsWindow::current())
                            .await
                        {
                            Ok(stats) => stats,
                            Err(e) => {
                                tracing::error!(
                                    "failed to refresh stats: {}",
                                    unpack_error(e.as_ref())
                                );
                                break;
                            }
                        };
                        let frame = LiveFrame::Change {
                            event: applied,
                            stats,
                        };
                        let Ok(frame) = sse_event("change", &frame) else { break };
                        if tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                    FeedMessage::Lagged(skipped) => {
                        tracing::warn!(skipped, owner = %view.owner(), "live stream lagged, reloading");
                        if send_snapshot(&db, &mut view, &tx).await.is_err() {
                            break;
                        }
                    }
                    FeedMessage::Closed => break,
                },
            }
        }
    });

    Sse::new(event_stream(rx))
        .keep_alive(KeepAlive::default())
        .into_response()
}

async fn authenticate_stream(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<(Session, tokio_util::sync::CancellationToken), Response> {
    let session = state
        .sessions
        .authenticate(headers)
        .await
        .map_err(|e| error_response(&e))?;
    let revoked = state
        .sessions
        .revocation(&session.token)
        .await
        .ok_or_else(|| error_response(&crate::error::BokmerkeError::Unauthenticated))?;
    Ok((session, revoked))
}

async fn send_snapshot(
    db: &Arc<Database>,
    view: &mut BookmarkView,
    tx: &mpsc::Sender<Event>,
) -> Result<(), ()> {
    let lib = Bookmarks::new(db.connection());

    let records = match lib.list_for_owner(view.owner()).await {
        Ok(records) => records,
        Err(e) => {
            tracing::error!("failed to load snapshot: {}", unpack_error(e.as_ref()));
            return Err(());
        }
    };
    let stats = match lib.stats_for_owner(view.owner(), &StatsWindow::current()).await {
        Ok(stats) => stats,
        Err(e) => {
            tracing::error!("failed to count snapshot stats: {}", unpack_error(e.as_ref()));
            return Err(());
        }
    };

    view.load(records);
    let frame = LiveFrame::Snapshot {
        records: view.records().to_vec(),
        stats,
    };
    let event = sse_event("snapshot", &frame).map_err(|_| ())?;
    tx.send(event).await.map_err(|_| ())
}

fn event_stream(rx: mpsc::Receiver<Event>) -> impl Stream<Item = Result<Event, Infallible>> {
    futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (Ok(event), rx))
    })
}

fn sse_event<T: Serialize>(name: &str, payload: &T) -> Result<Event, serde_json::Error> {
    Ok(Event::default()
        .event(name)
        .data(serde_json::to_string(payload)?))
}

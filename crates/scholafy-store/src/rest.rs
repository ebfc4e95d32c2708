//! PostgREST-style HTTP implementation of [`RemoteStore`].
//!
//! Each relation lives at `{url}/rest/v1/{table}`. Reads filter with
//! `column=eq.value`; upserts send `Prefer: resolution=merge-duplicates`.
//! The hosted realtime channel is replaced by a polling task per subscription.
//! Writes that find the live row gone are announced to every subscription of
//! the same store right away, so a delete is not lost between two polls.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    AssignmentRow, BadgeRow, ChangeKind, LessonResultRow, LiveChange, LiveSessionRow,
    LiveSubscription, ProfileRow, QuoteRow, RemoteStore, Result, StoreError,
};

/// Per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Buffer size of each polling subscription.
const POLL_CAPACITY: usize = 16;

/// Connection settings for [`RestStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestConfig {
    /// Base URL of the service, without a trailing `/rest/v1`.
    pub url: String,
    /// Public API key sent as `apikey`.
    pub anon_key: String,
    /// Session token; the anon key is used as bearer when absent.
    pub access_token: Option<String>,
    /// How often a live subscription polls for changes.
    pub poll_interval: Duration,
}

/// A [`RemoteStore`] backed by the hosted service's REST interface.
///
/// Clones share the client and the local change channel.
#[derive(Debug, Clone)]
pub struct RestStore {
    client: Client,
    base: String,
    poll_interval: Duration,
    local: broadcast::Sender<LiveChange>,
}

impl RestStore {
    /// Builds a client with the credential headers baked in.
    pub fn new(config: &RestConfig) -> Result<Self> {
        let bearer = config
            .access_token
            .as_deref()
            .unwrap_or(config.anon_key.as_str());

        let mut headers = HeaderMap::new();
        headers.insert("apikey", header_value(&config.anon_key)?);
        headers.insert(AUTHORIZATION, header_value(&format!("Bearer {bearer}"))?);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| StoreError::Network(e.to_string()))?;

        let (local, _) = broadcast::channel(POLL_CAPACITY);
        Ok(Self {
            client,
            base: format!("{}/rest/v1", config.url.trim_end_matches('/')),
            poll_interval: config.poll_interval,
            local,
        })
    }

    fn table(&self, name: &str) -> String {
        format!("{}/{name}", self.base)
    }

    async fn select<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<Vec<T>> {
        let response = send(request).await?;
        response
            .json()
            .await
            .map_err(|e| StoreError::Network(format!("invalid response body: {e}")))
    }

    async fn select_one<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<Option<T>> {
        let mut rows: Vec<T> = self.select(request).await?;
        Ok(if rows.is_empty() {
            None
        } else {
            Some(rows.swap_remove(0))
        })
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|_| {
        StoreError::Unauthorized("credential contains invalid header characters".to_string())
    })
}

async fn send(request: RequestBuilder) -> Result<Response> {
    let response = request
        .send()
        .await
        .map_err(|e| StoreError::Network(e.to_string()))?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(classify_status(status, message))
}

fn classify_status(status: StatusCode, message: String) -> StoreError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StoreError::Unauthorized(message),
        StatusCode::NOT_FOUND => StoreError::NotFound(message),
        _ => StoreError::Service {
            status: status.as_u16(),
            message,
        },
    }
}

fn eq(value: impl std::fmt::Display) -> String {
    format!("eq.{value}")
}

#[async_trait]
impl RemoteStore for RestStore {
    async fn list_lessons(&self) -> Result<Vec<serde_json::Value>> {
        self.select(self.client.get(self.table("lessons")).query(&[("select", "*")]))
            .await
    }

    async fn list_badges(&self) -> Result<Vec<BadgeRow>> {
        self.select(self.client.get(self.table("badges")).query(&[("select", "*")]))
            .await
    }

    async fn list_quotes(&self) -> Result<Vec<QuoteRow>> {
        self.select(self.client.get(self.table("quotes")).query(&[("select", "*")]))
            .await
    }

    async fn fetch_profile(&self, profile_id: Uuid) -> Result<Option<ProfileRow>> {
        self.select_one(
            self.client
                .get(self.table("profiles"))
                .query(&[("select", "*".to_string()), ("id", eq(profile_id))]),
        )
        .await
    }

    async fn upsert_profile(&self, profile: ProfileRow) -> Result<ProfileRow> {
        let stored: Option<ProfileRow> = self
            .select_one(
                self.client
                    .post(self.table("profiles"))
                    .query(&[("on_conflict", "id")])
                    .header(
                        "Prefer",
                        "resolution=merge-duplicates,return=representation",
                    )
                    .json(&profile),
            )
            .await?;
        Ok(stored.unwrap_or(profile))
    }

    async fn list_assignments(&self, profile_id: Uuid) -> Result<Vec<AssignmentRow>> {
        self.select(
            self.client
                .get(self.table("assignments"))
                .query(&[("select", "*".to_string()), ("profile_id", eq(profile_id))]),
        )
        .await
    }

    async fn insert_assignment(&self, assignment: AssignmentRow) -> Result<()> {
        send(
            self.client
                .post(self.table("assignments"))
                .query(&[("on_conflict", "profile_id,lesson_id")])
                .header("Prefer", "resolution=ignore-duplicates")
                .json(&assignment),
        )
        .await?;
        Ok(())
    }

    async fn delete_assignment(&self, profile_id: Uuid, lesson_id: &str) -> Result<()> {
        send(
            self.client
                .delete(self.table("assignments"))
                .query(&[("profile_id", eq(profile_id)), ("lesson_id", eq(lesson_id))]),
        )
        .await?;
        Ok(())
    }

    async fn insert_lesson_result(&self, result: LessonResultRow) -> Result<()> {
        send(self.client.post(self.table("lesson_history")).json(&result)).await?;
        Ok(())
    }

    async fn list_lesson_results(&self, profile_id: Uuid) -> Result<Vec<LessonResultRow>> {
        self.select(self.client.get(self.table("lesson_history")).query(&[
            ("select", "*".to_string()),
            ("profile_id", eq(profile_id)),
            ("order", "timestamp.desc".to_string()),
        ]))
        .await
    }

    async fn upsert_live_session(&self, row: LiveSessionRow) -> Result<()> {
        send(
            self.client
                .post(self.table("live_sessions"))
                .query(&[("on_conflict", "profile_id")])
                .header("Prefer", "resolution=merge-duplicates")
                .json(&row),
        )
        .await?;
        Ok(())
    }

    async fn update_live_session(&self, row: LiveSessionRow) -> Result<bool> {
        let profile_id = row.profile_id;
        let updated: Vec<LiveSessionRow> = self
            .select(
                self.client
                    .patch(self.table("live_sessions"))
                    .query(&[("profile_id", eq(profile_id))])
                    .header("Prefer", "return=representation")
                    .json(&row),
            )
            .await?;
        if !updated.is_empty() {
            return Ok(true);
        }

        debug!(%profile_id, "Live row is gone, announcing delete");
        let _ = self.local.send(LiveChange {
            kind: ChangeKind::Delete,
            profile_id,
            row: None,
        });
        Ok(false)
    }

    async fn fetch_live_session(&self, profile_id: Uuid) -> Result<Option<LiveSessionRow>> {
        self.select_one(
            self.client
                .get(self.table("live_sessions"))
                .query(&[("select", "*".to_string()), ("profile_id", eq(profile_id))]),
        )
        .await
    }

    async fn delete_live_session(&self, profile_id: Uuid) -> Result<()> {
        send(
            self.client
                .delete(self.table("live_sessions"))
                .query(&[("profile_id", eq(profile_id))]),
        )
        .await?;
        Ok(())
    }

    fn subscribe_live(&self, profile_id: Uuid) -> LiveSubscription {
        let (sender, receiver) = broadcast::channel(POLL_CAPACITY);
        let local = self.local.subscribe();
        let store = self.clone();
        tokio::spawn(async move {
            poll_live(store, profile_id, sender, local).await;
        });
        LiveSubscription::new(profile_id, receiver)
    }
}

/// Polls one profile's live row and turns presence/`last_update` changes into events.
///
/// Deletes noticed by this store's own writes are merged in between polls.
/// At most one `Delete` is emitted per disappearance of the row.
async fn poll_live(
    store: RestStore,
    profile_id: Uuid,
    sender: broadcast::Sender<LiveChange>,
    mut local: broadcast::Receiver<LiveChange>,
) {
    let mut interval = tokio::time::interval(store.poll_interval);
    let mut last: Option<LiveSessionRow> = None;
    let mut primed = false;
    let mut delete_sent = false;

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            notice = local.recv() => {
                match notice {
                    Ok(change) if change.profile_id == profile_id
                        && change.kind == ChangeKind::Delete =>
                    {
                        last = None;
                        if !delete_sent {
                            delete_sent = true;
                            if sender.send(change).is_err() {
                                return;
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(n)) => {
                        warn!(%profile_id, missed = n, "Local live notices lagged");
                    }
                    Err(RecvError::Closed) => return,
                }
                continue;
            }
        }

        if sender.receiver_count() == 0 {
            debug!(%profile_id, "Live poller stopping, no subscribers");
            return;
        }

        let current = match store.fetch_live_session(profile_id).await {
            Ok(row) => row,
            Err(e) => {
                warn!(%profile_id, error = %e, "Live poll failed");
                continue;
            }
        };

        if primed {
            if let Some(change) = diff_live(profile_id, last.as_ref(), current.as_ref()) {
                if change.kind == ChangeKind::Delete && delete_sent {
                    debug!(%profile_id, "Delete already announced");
                } else if sender.send(change).is_err() {
                    return;
                }
            }
        }
        if current.is_some() {
            delete_sent = false;
        } else if last.is_some() {
            delete_sent = true;
        }
        primed = true;
        last = current;
    }
}

fn diff_live(
    profile_id: Uuid,
    previous: Option<&LiveSessionRow>,
    current: Option<&LiveSessionRow>,
) -> Option<LiveChange> {
    let kind = match (previous, current) {
        (None, Some(_)) => ChangeKind::Insert,
        (Some(_), None) => ChangeKind::Delete,
        (Some(a), Some(b)) if a.last_update != b.last_update => ChangeKind::Update,
        _ => return None,
    };
    Some(LiveChange {
        kind,
        profile_id,
        row: current.cloned(),
    })
}

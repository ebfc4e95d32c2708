//! Periodic live-status publishing.
//!
//! Every tick writes a full snapshot of the session, so a missed tick is
//! repaired by the next one. Only the first write creates the row; later
//! writes update it in place and never bring back a row deleted elsewhere.
//! The loop stops on its own once the session stops producing snapshots,
//! and every publish races the heartbeat's [`CancellationToken`] so nothing
//! is written after [`Heartbeat::stop`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use scholafy_store::RemoteStore;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::live::LiveStatus;
use crate::session::PlayerSession;

/// Writes and deletes the live row of one profile.
///
/// Failures are logged and dropped. Clones share the created flag.
#[derive(Clone)]
pub struct LivePublisher {
    store: Arc<dyn RemoteStore>,
    profile_id: Uuid,
    created: Arc<AtomicBool>,
}

impl std::fmt::Debug for LivePublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LivePublisher")
            .field("profile_id", &self.profile_id)
            .finish_non_exhaustive()
    }
}

impl LivePublisher {
    /// Creates a publisher for `profile_id`.
    #[must_use]
    pub fn new(store: Arc<dyn RemoteStore>, profile_id: Uuid) -> Self {
        Self {
            store,
            profile_id,
            created: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Profile whose row is written.
    #[must_use]
    pub const fn profile_id(&self) -> Uuid {
        self.profile_id
    }

    /// Writes a snapshot. Returns `false` if the write failed or the row was
    /// deleted after this publisher created it.
    pub async fn publish(&self, status: &LiveStatus) -> bool {
        let row = status.to_row(self.profile_id);
        let written = if self.created.load(Ordering::SeqCst) {
            self.store.update_live_session(row).await
        } else {
            self.store.upsert_live_session(row).await.map(|()| {
                self.created.store(true, Ordering::SeqCst);
                true
            })
        };
        match written {
            Ok(true) => true,
            Ok(false) => {
                info!(profile_id = %self.profile_id, "Live row deleted elsewhere, not recreating it");
                false
            }
            Err(e) => {
                warn!(profile_id = %self.profile_id, error = %e, "Live status publish failed");
                false
            }
        }
    }

    /// Deletes the live row. Returns `false` if the delete failed.
    pub async fn clear(&self) -> bool {
        match self.store.delete_live_session(self.profile_id).await {
            Ok(()) => true,
            Err(e) => {
                warn!(profile_id = %self.profile_id, error = %e, "Live status delete failed");
                false
            }
        }
    }
}

/// The 1-second snapshot loop for one running session.
#[derive(Debug)]
pub struct Heartbeat {
    publisher: LivePublisher,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Heartbeat {
    /// Spawns the loop; the first snapshot is published immediately.
    #[must_use]
    pub fn spawn(
        publisher: LivePublisher,
        session: Arc<Mutex<PlayerSession>>,
        period: Duration,
    ) -> Self {
        let token = CancellationToken::new();
        let handle = tokio::spawn(run(publisher.clone(), session, period, token.clone()));
        Self {
            publisher,
            token,
            handle: Some(handle),
        }
    }

    /// Publishes outside the regular tick, unless the heartbeat was stopped.
    pub async fn publish_now(&self, status: &LiveStatus) {
        tokio::select! {
            biased;
            () = self.token.cancelled() => {
                debug!("Heartbeat stopped, dropping immediate publish");
            }
            _ = self.publisher.publish(status) => {}
        }
    }

    /// Cancels the loop and any in-flight publish, then waits for it to exit.
    pub async fn stop(&mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Heartbeat task failed");
            }
        }
    }

    /// Whether the loop is still publishing.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn run(
    publisher: LivePublisher,
    session: Arc<Mutex<PlayerSession>>,
    period: Duration,
    token: CancellationToken,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            () = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let snapshot = session.lock().await.live_snapshot(Utc::now());
        let Some(status) = snapshot else {
            debug!(profile_id = %publisher.profile_id(), "Session ending, heartbeat stops");
            break;
        };

        tokio::select! {
            biased;
            () = token.cancelled() => break,
            _ = publisher.publish(&status) => {}
        }
    }
}

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::clients::Credentials;
use crate::console::client::ConsoleClient;
use crate::models::EntryListResponse;

/// One refresh of the live entry listing.
#[derive(Debug, Clone)]
pub enum LiveUpdate {
    Entries(EntryListResponse),
    Failed(String),
}

/// Re-lists a datastore's entries on a fixed interval until dropped.
///
/// Failures are published and the next tick proceeds as normal.
pub struct LiveMode {
    task: JoinHandle<()>,
}

impl LiveMode {
    pub fn start(
        client: ConsoleClient,
        credentials: Credentials,
        datastore: String,
        search: Option<String>,
        period: Duration,
    ) -> (Self, mpsc::Receiver<LiveUpdate>) {
        let (tx, rx) = mpsc::channel(16);

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let update = match client
                    .list_entries(&credentials, &datastore, None, search.as_deref())
                    .await
                {
                    Ok(entries) => LiveUpdate::Entries(entries),
                    Err(e) => {
                        warn!(datastore = %datastore, "live refresh failed: {}", e);
                        LiveUpdate::Failed(e.to_string())
                    }
                };
                if tx.send(update).await.is_err() {
                    debug!(datastore = %datastore, "live mode receiver gone, stopping");
                    break;
                }
            }
        });

        (Self { task }, rx)
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn stop(self) {
        self.task.abort();
    }
}

impl Drop for LiveMode {
    fn drop(&mut self) {
        self.task.abort();
    }
}

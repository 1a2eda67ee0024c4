//! Debounced filesystem watcher that ships coalesced delta batches.
//!
//! State machine per session: Idle -> Pending (first event arms a one-shot
//! timer) -> Sending (timer fired, batch in flight) -> Idle on success or
//! Retry on failure. The timer is never re-armed by later events, so a
//! busy editor cannot starve transmission. A stop signal cancels the timer
//! and releases every directory subscription on the way out.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use color_eyre::eyre::eyre;
use color_eyre::Result;
use notify::{Event, RecursiveMode, Watcher as _};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use txtsync_core::{delta, scan, IgnorePolicy, TextCache, TextFileDelta};
use txtsync_transport::SyncSession;

/// Debounce window: events inside it coalesce into one `ApplyDeltas` call.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(200);

/// Watches the local tree and mirrors edits onto the session's peer.
///
/// Sole mutator of the cache once the watch loop runs; cache update and
/// the corresponding RPC stay inside one task, so no locking is needed.
pub struct ClientWatcher<S> {
    session: S,
    cache: TextCache,
    policy: IgnorePolicy,
    root: PathBuf,
    debounce: Duration,
}

impl<S: SyncSession> ClientWatcher<S> {
    pub fn new(session: S, cache: TextCache, policy: IgnorePolicy, root: PathBuf) -> Self {
        Self {
            session,
            cache,
            policy,
            root,
            debounce: DEBOUNCE_WINDOW,
        }
    }

    #[must_use]
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Run until the stop channel fires or the watcher backend dies.
    ///
    /// Send failures keep the computed deltas and retry after another
    /// debounce window, indefinitely; events arriving meanwhile join the
    /// next attempt.
    pub async fn run(mut self, mut stop: mpsc::Receiver<()>) -> Result<()> {
        let (event_tx, mut events) = mpsc::unbounded_channel();
        let mut fs_watcher =
            notify::recommended_watcher(move |result: Result<Event, notify::Error>| {
                match result {
                    Ok(event) => {
                        let _ = event_tx.send(event);
                    }
                    Err(e) => warn!("watch backend error: {e}"),
                }
            })?;

        // Notifications are directory-granular on some platforms, so every
        // non-ignored directory gets its own subscription up front; fresh
        // directories are registered lazily on their first event.
        fs_watcher.watch(&self.root, RecursiveMode::NonRecursive)?;
        for dir in scan::tracked_dirs(&self.root, &self.policy)? {
            fs_watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        }
        info!("watching {}", self.root.display());

        let mut batch: BTreeSet<String> = BTreeSet::new();
        let mut pending: Vec<TextFileDelta> = Vec::new();
        let mut deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                _ = stop.recv() => {
                    info!("stop requested, leaving watch loop");
                    break;
                }

                event = events.recv() => {
                    let Some(event) = event else {
                        return Err(eyre!("watch backend channel closed"));
                    };
                    for dir in self.absorb(&event, &mut batch) {
                        if let Err(e) = fs_watcher.watch(&dir, RecursiveMode::NonRecursive) {
                            debug!("could not watch new directory {}: {e}", dir.display());
                        }
                    }
                    if !batch.is_empty() && deadline.is_none() {
                        deadline = Some(Instant::now() + self.debounce);
                    }
                }

                () = sleep_until_opt(deadline) => {
                    deadline = None;
                    let mut outgoing = std::mem::take(&mut pending);
                    outgoing.extend(self.collect_deltas(&mut batch));
                    if outgoing.is_empty() {
                        continue;
                    }

                    match self.session.apply_deltas(&outgoing).await {
                        Ok(()) => debug!("sent {} delta(s)", outgoing.len()),
                        Err(e) => {
                            warn!("failed to send {} delta(s), will retry: {e}", outgoing.len());
                            pending = outgoing;
                            deadline = Some(Instant::now() + self.debounce);
                        }
                    }
                }
            }
        }

        // fs_watcher drops here, releasing every subscription.
        Ok(())
    }

    /// Fold one filesystem event into the batch. Returns directories that
    /// appeared and still need a subscription.
    fn absorb(&self, event: &Event, batch: &mut BTreeSet<String>) -> Vec<PathBuf> {
        let mut new_dirs = Vec::new();

        for path in &event.paths {
            let Ok(rel) = path.strip_prefix(&self.root) else {
                continue;
            };
            let rel = rel.to_string_lossy().into_owned();
            if rel.is_empty() {
                continue;
            }

            if path.is_dir() {
                if !self.policy.skip_dir(&rel) {
                    new_dirs.push(path.clone());
                }
                continue;
            }
            if self.policy.ignore_file(&rel) {
                continue;
            }
            if !path.is_file() {
                // Removals are observed but not propagated; the cache entry
                // stays until the peer protocol grows a delete verb.
                debug!("ignoring event for {rel}: not a regular file");
                continue;
            }

            batch.insert(rel);
        }

        new_dirs
    }

    /// Drain the batch into deltas, updating the cache before transmission
    /// so a later retry re-sends the exact same transformation.
    fn collect_deltas(&mut self, batch: &mut BTreeSet<String>) -> Vec<TextFileDelta> {
        let mut deltas = Vec::with_capacity(batch.len());

        for path in std::mem::take(batch) {
            let full = self.root.join(&path);
            let bytes = match std::fs::read(&full) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("dropping {path} from batch, read failed: {e}");
                    continue;
                }
            };
            let Ok(content) = String::from_utf8(bytes) else {
                warn!("dropping {path} from batch: not utf-8");
                continue;
            };

            let encoded = delta::between(self.cache.get(&path).unwrap_or(""), &content);
            self.cache.put(path.clone(), content);
            deltas.push(TextFileDelta {
                path,
                delta: encoded,
            });
        }

        deltas
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

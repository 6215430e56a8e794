//! Removal of comments whose scheduled deletion time has passed.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;

use crate::config::EditorSettings;
use crate::docx::package::verify_archive;
use crate::store::{CommentRecord, MetadataStore, StoreResult};
use crate::transaction;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweepOutcome {
    /// Due comments found.
    pub due: usize,
    /// Removed from both the archive and the store.
    pub deleted: usize,
    /// Removed from the store only; the archive was missing or could not be changed.
    pub store_only: usize,
    pub errors: usize,
    pub dry_run: bool,
}

/// Deletes every comment due at `now`. With `dry_run` nothing changes.
pub fn sweep_due(
    store: &dyn MetadataStore,
    settings: &EditorSettings,
    now: DateTime<Utc>,
    dry_run: bool,
) -> StoreResult<SweepOutcome> {
    let due = store.due_comments(now)?;
    let mut out = SweepOutcome {
        due: due.len(),
        dry_run,
        ..Default::default()
    };
    if due.is_empty() {
        debug!("no comments due for deletion");
        return Ok(out);
    }
    info!("{} comments due for deletion", due.len());

    for comment in &due {
        if dry_run {
            info!(
                "[dry run] would delete comment {} of document {}",
                comment.comment_id, comment.document_id
            );
            continue;
        }
        match sweep_one(store, settings, comment) {
            Ok(true) => out.deleted += 1,
            Ok(false) => out.store_only += 1,
            Err(e) => {
                error!(
                    "failed to delete comment {} of document {}: {e}",
                    comment.comment_id, comment.document_id
                );
                out.errors += 1;
            }
        }
    }
    if !dry_run {
        info!(
            "sweep deleted {} comments ({} store only), {} errors",
            out.deleted + out.store_only,
            out.store_only,
            out.errors
        );
    }
    Ok(out)
}

/// Returns whether the archive was updated as well as the store.
fn sweep_one(
    store: &dyn MetadataStore,
    settings: &EditorSettings,
    comment: &CommentRecord,
) -> StoreResult<bool> {
    let id = comment.comment_id;
    let archive = store.document(comment.document_id)?.map(|d| d.file_path);

    let in_archive = match archive {
        Some(path) if path.is_file() => match verify_archive(&path)
            .and_then(|_| transaction::delete_comment(&path, settings, id))
        {
            Ok(_) => true,
            Err(e) => {
                warn!("archive deletion failed for comment {id}: {e}");
                false
            }
        },
        Some(path) => {
            warn!("archive {} not found for comment {id}", path.display());
            false
        }
        None => {
            warn!("document {} of comment {id} no longer exists", comment.document_id);
            false
        }
    };
    store.delete_comment(comment.document_id, id)?;
    info!(
        "deleted comment {id} of document {} ({})",
        comment.document_id,
        if in_archive { "archive+store" } else { "store only" }
    );
    Ok(in_archive)
}

/// Background thread running [`sweep_due`] every `settings.sweep_interval`.
pub struct Sweeper {
    stop: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<JoinHandle<()>>,
}

impl Sweeper {
    pub fn spawn(store: Arc<dyn MetadataStore>, settings: EditorSettings) -> Self {
        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let signal = stop.clone();
        let handle = thread::spawn(move || {
            let (lock, cvar) = &*signal;
            loop {
                if let Err(e) = sweep_due(&*store, &settings, Utc::now(), settings.sweep_dry_run) {
                    error!("sweep failed: {e}");
                }
                let mut stopped = lock.lock();
                if !*stopped {
                    cvar.wait_for(&mut stopped, settings.sweep_interval);
                }
                if *stopped {
                    break;
                }
            }
            debug!("sweeper stopped");
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let (lock, cvar) = &*self.stop;
        *lock.lock() = true;
        cvar.notify_all();
        if let Some(h) = self.handle.take() {
            if h.join().is_err() {
                error!("sweeper thread panicked");
            }
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.shutdown();
    }
}

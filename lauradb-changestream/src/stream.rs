//! Resumable tailing cursor over an [`Oplog`], with filter/pipeline
//! predicates and bounded-backpressure delivery.

use std::sync::Arc;
use std::time::Duration;

use lauradb_common::{metrics, ChangeStreamError, Error, ResumeToken, Result};
use lauradb_oplog::Oplog;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::event::{map_entry, ChangeEvent};

pub type Predicate = Arc<dyn Fn(&serde_json::Value) -> bool + Send + Sync>;

/// A pipeline stage. Only `$match` is supported, per the spec's scope.
pub enum PipelineStage {
    Match(Predicate),
}

pub struct ChangeStreamOptions {
    pub database: Option<String>,
    pub collection: Option<String>,
    pub filter: Option<Predicate>,
    pub pipeline: Vec<PipelineStage>,
    pub resume_after: Option<ResumeToken>,
    pub max_await_time: Duration,
    pub batch_size: usize,
}

impl Default for ChangeStreamOptions {
    fn default() -> Self {
        Self {
            database: None,
            collection: None,
            filter: None,
            pipeline: Vec::new(),
            resume_after: None,
            max_await_time: Duration::from_secs(1),
            batch_size: 1024,
        }
    }
}

/// A live tailing cursor. Dropping or calling [`ChangeStream::close`] stops
/// the background poll loop and closes the output channel.
pub struct ChangeStream {
    receiver: mpsc::Receiver<ChangeEvent>,
    cancel: CancellationToken,
    closed: bool,
}

impl ChangeStream {
    pub fn new(oplog: Arc<Oplog>, options: ChangeStreamOptions) -> Self {
        let (sender, receiver) = mpsc::channel(options.batch_size.max(1));
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        tokio::spawn(poll_loop(oplog, options, sender, task_cancel));

        Self {
            receiver,
            cancel,
            closed: false,
        }
    }

    /// Returns the next delivered event, or a closed-stream error once the
    /// stream has been closed and drained.
    pub async fn next(&mut self) -> Result<ChangeEvent> {
        if self.closed {
            return Err(Error::ChangeStream(ChangeStreamError::Closed));
        }
        match self.receiver.recv().await {
            Some(event) => Ok(event),
            None => {
                self.closed = true;
                Err(Error::ChangeStream(ChangeStreamError::Closed))
            }
        }
    }

    pub fn close(&mut self) {
        self.cancel.cancel();
        self.closed = true;
    }
}

impl Drop for ChangeStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn poll_loop(
    oplog: Arc<Oplog>,
    options: ChangeStreamOptions,
    sender: mpsc::Sender<ChangeEvent>,
    cancel: CancellationToken,
) {
    let mut current_op_id = options.resume_after.map_or(0, |token| token.op_id);

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                debug!("change stream poll loop cancelled");
                return;
            }
            () = tokio::time::sleep(options.max_await_time) => {}
        }

        let entries = match oplog.get_entries_since(current_op_id) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "change stream failed to read oplog");
                continue;
            }
        };

        for entry in entries {
            if let Some(db) = &options.database {
                if &entry.database != db {
                    current_op_id = entry.op_id;
                    continue;
                }
            }
            if let Some(coll) = &options.collection {
                if &entry.collection != coll {
                    current_op_id = entry.op_id;
                    continue;
                }
            }

            let Some(event) = map_entry(&entry) else {
                current_op_id = entry.op_id;
                continue;
            };

            current_op_id = event.resume_token.op_id;

            let view = event.as_filter_view();
            if let Some(filter) = &options.filter {
                if !filter(&view) {
                    continue;
                }
            }
            if !options
                .pipeline
                .iter()
                .all(|stage| match stage {
                    PipelineStage::Match(predicate) => predicate(&view),
                })
            {
                continue;
            }

            match sender.try_send(event) {
                Ok(()) => metrics::record_change_event_delivered(),
                Err(mpsc::error::TrySendError::Full(event)) => {
                    tokio::select! {
                        result = sender.send_timeout(event, Duration::from_millis(100)) => {
                            match result {
                                Ok(()) => metrics::record_change_event_delivered(),
                                Err(_) => metrics::record_change_event_dropped(),
                            }
                        }
                        () = cancel.cancelled() => return,
                    }
                }
                Err(mpsc::error::TrySendError::Closed(_)) => return,
            }
        }
    }
}

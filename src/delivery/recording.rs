//! Sink that records what it was given, for tests.

use super::DeliverySink;
use crate::types::{DestinationId, RequestContext};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone)]
pub(crate) struct RecordedBatch {
    pub(crate) destination: DestinationId,
    pub(crate) names: Vec<String>,
    pub(crate) contents: Vec<Vec<u8>>,
}

impl RecordedBatch {
    pub(crate) fn bytes(&self) -> usize {
        self.contents.iter().map(Vec::len).sum()
    }
}

#[derive(Default)]
pub(crate) struct RecordingSink {
    /// Zero-based `send` calls that fail
    pub(crate) fail_calls: HashSet<usize>,
    pub(crate) fail_notify: bool,
    /// Take accepted files away and remove their emptied directory
    pub(crate) consume: bool,
    calls: AtomicUsize,
    pub(crate) batches: Mutex<Vec<RecordedBatch>>,
    pub(crate) notices: Mutex<Vec<(DestinationId, String)>>,
}

impl RecordingSink {
    pub(crate) fn failing(calls: impl IntoIterator<Item = usize>) -> Self {
        Self {
            fail_calls: calls.into_iter().collect(),
            ..Default::default()
        }
    }

    pub(crate) fn consuming() -> Self {
        Self {
            consume: true,
            ..Default::default()
        }
    }

    pub(crate) fn batches(&self) -> Vec<RecordedBatch> {
        self.batches.lock().expect("batches poisoned").clone()
    }

    pub(crate) fn notices(&self) -> Vec<(DestinationId, String)> {
        self.notices.lock().expect("notices poisoned").clone()
    }
}

#[async_trait]
impl DeliverySink for RecordingSink {
    async fn send(
        &self,
        files: &[PathBuf],
        destination: DestinationId,
        _ctx: &RequestContext,
    ) -> crate::Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_calls.contains(&call) {
            return Err(crate::error::DeliveryError::Rejected {
                files: files.len(),
                reason: "transport refused the batch".into(),
            }
            .into());
        }

        let mut names = Vec::new();
        let mut contents = Vec::new();
        for file in files {
            names.push(file.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default());
            contents.push(tokio::fs::read(file).await?);
        }
        if self.consume {
            for file in files {
                tokio::fs::remove_file(file).await?;
                if let Some(parent) = file.parent() {
                    // only succeeds once the directory is empty
                    tokio::fs::remove_dir(parent).await.ok();
                }
            }
        }
        self.batches
            .lock()
            .expect("batches poisoned")
            .push(RecordedBatch {
                destination,
                names,
                contents,
            });
        Ok(())
    }

    async fn notify(
        &self,
        destination: DestinationId,
        _ctx: &RequestContext,
        message: &str,
    ) -> crate::Result<()> {
        if self.fail_notify {
            return Err(crate::error::DeliveryError::Unavailable {
                destination: destination.to_string(),
                reason: "channel gone".into(),
            }
            .into());
        }
        self.notices
            .lock()
            .expect("notices poisoned")
            .push((destination, message.to_string()));
        Ok(())
    }
}

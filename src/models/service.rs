use std::{sync::Arc, thread};

use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::core::events::ProgressReporter;

use super::{CancelToken, Fetcher, IngestErrorKind, Ingestor, ModelEntry, PackageSource};

#[derive(Debug, Clone)]
pub struct IngestJob {
    pub source: PackageSource,
    pub name: String,
    pub cancel: CancelToken,
}

#[derive(Debug, Clone)]
pub enum IngestEvent {
    Progress {
        name: String,
        fraction: f32,
        message: String,
    },
    Finished {
        name: String,
        result: Result<ModelEntry, (IngestErrorKind, String)>,
    },
}

/// Runs ingestions on a dedicated worker thread so blocking download and
/// extraction work stays off the caller's thread.
#[derive(Debug, Clone)]
pub struct IngestService {
    sender: Sender<IngestJob>,
}

impl IngestService {
    /// Spawns the worker. Events for every queued job arrive on the returned
    /// receiver; the worker exits once all service handles are dropped.
    pub fn spawn<F>(ingestor: Arc<Ingestor<F>>) -> Result<(Self, Receiver<IngestEvent>)>
    where
        F: Fetcher + 'static,
    {
        let (sender, jobs) = unbounded();
        let (events, receiver) = unbounded();
        thread::Builder::new()
            .name("model-ingest".into())
            .spawn(move || worker_loop(jobs, ingestor, events))
            .context("spawn model ingest worker")?;
        Ok((Self { sender }, receiver))
    }

    /// Queues an ingestion and returns the token that cancels it.
    pub fn queue(&self, source: PackageSource, name: impl Into<String>) -> Result<CancelToken> {
        let cancel = CancelToken::new();
        self.sender
            .send(IngestJob {
                source,
                name: name.into(),
                cancel: cancel.clone(),
            })
            .context("send model ingest job to worker")?;
        Ok(cancel)
    }
}

struct ChannelProgress<'a> {
    name: &'a str,
    events: &'a Sender<IngestEvent>,
}

impl ProgressReporter for ChannelProgress<'_> {
    fn report(&self, fraction: f32, message: &str) {
        let _ = self.events.send(IngestEvent::Progress {
            name: self.name.to_string(),
            fraction,
            message: message.to_string(),
        });
    }
}

fn worker_loop<F: Fetcher>(
    jobs: Receiver<IngestJob>,
    ingestor: Arc<Ingestor<F>>,
    events: Sender<IngestEvent>,
) {
    for job in jobs.iter() {
        let progress = ChannelProgress {
            name: &job.name,
            events: &events,
        };
        let result = ingestor
            .ingest(&job.source, &job.name, &progress, &job.cancel)
            .map_err(|error| {
                tracing::warn!(model = %job.name, "model ingestion failed: {error}");
                (error.kind(), error.to_string())
            });
        let _ = events.send(IngestEvent::Finished {
            name: job.name,
            result,
        });
    }
    tracing::debug!("ingest worker stopped");
}

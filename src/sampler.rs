// CC-COMPETE: Orchestrated Competition Experiments between TCP Congestion-Control Algorithms
// Copyright (C) 2024-2025 Roland Schmid <roschmi@ethz.ch> and Tibor Schneider <sctibor@ethz.ch>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//! Sampling of the bottleneck queue.
//!
//! The sampler polls the backlog of the bottleneck interface at a fixed interval. Samples are
//! produced lazily by [`QueueSamples`], and [`QueueSampler::start`] drives that sequence in a
//! background task that appends every sample to a file as soon as it is taken.

use std::{
    fmt::Debug,
    fs::File,
    io,
    path::Path,
    process::ExitStatus,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use cc_compete_utils::other::unix_time;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{interval, Interval, MissedTickBehavior},
};

use crate::{error::CaptureError, process::MeasurementHandle, report::QueueSample};

/// Access to the instantaneous backlog (in packets) of a transmit queue.
#[async_trait::async_trait]
pub trait BacklogReader: Debug + Send + Sync {
    async fn read_backlog(&self) -> Result<u64, CaptureError>;

    /// Name of the monitored interface.
    fn iface(&self) -> &str;
}

#[derive(Debug, Clone)]
pub struct QueueSampler {
    reader: Arc<dyn BacklogReader>,
    interval: Duration,
}

impl QueueSampler {
    pub fn new(reader: Arc<dyn BacklogReader>, interval: Duration) -> Self {
        Self { reader, interval }
    }

    /// A fresh sequence of samples that ends once `cancel` becomes `true` (or its sender is
    /// dropped). Every call starts a new sequence with its own clock.
    pub fn samples(&self, cancel: watch::Receiver<bool>) -> QueueSamples {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        QueueSamples {
            reader: self.reader.clone(),
            ticker,
            cancel,
            origin: Instant::now(),
            wall_origin: unix_time(),
            gaps: 0,
            done: false,
        }
    }

    /// Sample in the background until the returned handle is terminated. Each sample is written
    /// to `sink` as a `time,len` line and flushed immediately.
    pub fn start(&self, sink: &Path) -> Result<SamplerHandle, CaptureError> {
        let (cancel, rx) = watch::channel(false);
        let mut samples = self.samples(rx);
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(File::create(sink)?);
        let label = format!("sampler on {}", self.reader.iface());
        log::debug!("[sampler] sampling {} every {:?}", self.reader.iface(), self.interval);

        let progress = Arc::new(Progress::default());
        let task_progress = progress.clone();
        let task = tokio::spawn(async move {
            while let Some(sample) = samples.next().await {
                writer.serialize(sample).map_err(io::Error::from)?;
                writer.flush()?;
                task_progress.samples.fetch_add(1, Ordering::SeqCst);
                task_progress.gaps.store(samples.gaps(), Ordering::SeqCst);
            }
            task_progress.gaps.store(samples.gaps(), Ordering::SeqCst);
            Ok::<_, CaptureError>(task_progress.summary())
        });

        Ok(SamplerHandle {
            label,
            cancel,
            cancelled: false,
            task: Some(task),
            progress,
            summary: None,
        })
    }
}

/// Lazy, unbounded sequence of queue samples.
#[derive(Debug)]
pub struct QueueSamples {
    reader: Arc<dyn BacklogReader>,
    ticker: Interval,
    cancel: watch::Receiver<bool>,
    origin: Instant,
    wall_origin: f64,
    gaps: usize,
    done: bool,
}

impl QueueSamples {
    /// Wait for the next tick and take a sample. Ticks whose read fails are skipped. Returns
    /// `None` at most one interval after cancellation.
    pub async fn next(&mut self) -> Option<QueueSample> {
        loop {
            if self.done || *self.cancel.borrow() {
                self.done = true;
                return None;
            }
            tokio::select! {
                biased;
                _ = self.cancel.changed() => {
                    self.done = true;
                    return None;
                }
                _ = self.ticker.tick() => {}
            }
            let read = tokio::select! {
                biased;
                _ = self.cancel.changed() => {
                    self.done = true;
                    return None;
                }
                read = self.reader.read_backlog() => read,
            };
            match read {
                Ok(len) => {
                    return Some(QueueSample {
                        time: self.wall_origin + self.origin.elapsed().as_secs_f64(),
                        len,
                    })
                }
                Err(e) => {
                    self.gaps += 1;
                    log::debug!("[sampler] skipping a sample: {e}");
                }
            }
        }
    }

    /// Number of ticks skipped because the backlog could not be read.
    pub fn gaps(&self) -> usize {
        self.gaps
    }
}

/// What a finished sampler produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SamplerSummary {
    pub samples: usize,
    pub gaps: usize,
}

/// Samples written so far, shared with the sampling task.
#[derive(Debug, Default)]
struct Progress {
    samples: AtomicUsize,
    gaps: AtomicUsize,
}

impl Progress {
    fn summary(&self) -> SamplerSummary {
        SamplerSummary {
            samples: self.samples.load(Ordering::SeqCst),
            gaps: self.gaps.load(Ordering::SeqCst),
        }
    }
}

/// Handle on a running [`QueueSampler`].
#[derive(Debug)]
pub struct SamplerHandle {
    label: String,
    cancel: watch::Sender<bool>,
    cancelled: bool,
    task: Option<JoinHandle<Result<SamplerSummary, CaptureError>>>,
    progress: Arc<Progress>,
    summary: Option<SamplerSummary>,
}

impl SamplerHandle {
    /// Available once the sampler was waited for.
    pub fn summary(&self) -> Option<SamplerSummary> {
        self.summary
    }
}

#[async_trait::async_trait]
impl MeasurementHandle for SamplerHandle {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_finished(&mut self) -> bool {
        self.task.as_ref().map_or(true, |t| t.is_finished())
    }

    async fn wait(&mut self) -> Result<Option<ExitStatus>, CaptureError> {
        if let Some(task) = self.task.as_mut() {
            let result = task.await;
            self.task = None;
            self.summary = Some(result??);
        }
        Ok(None)
    }

    fn terminate(&mut self) -> Result<(), CaptureError> {
        if !self.cancelled {
            // the task may already be gone, which is fine
            let _ = self.cancel.send(true);
            self.cancelled = true;
        }
        Ok(())
    }

    /// Abort the task and wait until it is gone, such that the sink is no longer written.
    async fn kill(&mut self) -> Result<(), CaptureError> {
        if let Some(task) = self.task.take() {
            task.abort();
            match task.await {
                Ok(result) => self.summary = Some(result?),
                Err(e) if e.is_cancelled() => self.summary = Some(self.progress.summary()),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

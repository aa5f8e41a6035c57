//! Decode worker pool
//!
//! Frames are numbered as they arrive, decoded and parsed on a fixed set of
//! worker tasks, and handed back strictly in arrival order. The job queue
//! drops the oldest frame when saturated; a dropped frame still yields a
//! [`FrameOutcome::Dropped`] so the resequencer never stalls on a gap.

use crate::decode::{DecodeError, FrameDecoder};
use crate::feed::{ParseError, ParsedPayload, TickParser};
use crate::queue::{DropOldestQueue, Push};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Inbound frame as read from the socket
#[derive(Debug, Clone)]
pub enum RawFrame {
    Text(String),
    Binary(Vec<u8>),
}

/// What became of one frame
#[derive(Debug)]
pub enum FrameOutcome {
    Parsed(ParsedPayload),
    DecodeFailed(DecodeError),
    ParseFailed(ParseError),
    /// Evicted from a saturated queue before a worker took it
    Dropped,
}

struct Job {
    seq: u64,
    frame: RawFrame,
}

/// Pool sizing
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub workers: usize,
    pub queue_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_capacity: 1024,
        }
    }
}

/// Ordered decode/parse pipeline backed by worker tasks
pub struct DecodePool {
    queue: Arc<DropOldestQueue<Job>>,
    results_tx: mpsc::UnboundedSender<(u64, FrameOutcome)>,
    results_rx: mpsc::UnboundedReceiver<(u64, FrameOutcome)>,
    pending: BTreeMap<u64, FrameOutcome>,
    next_submit: u64,
    next_emit: u64,
    dropped: u64,
    workers: Vec<JoinHandle<()>>,
}

impl DecodePool {
    /// Spawn the workers
    pub fn new(config: &PoolConfig, decoder: Arc<FrameDecoder>, parser: Arc<TickParser>) -> Self {
        let queue: Arc<DropOldestQueue<Job>> =
            Arc::new(DropOldestQueue::new(config.queue_capacity));
        let (results_tx, results_rx) = mpsc::unbounded_channel();

        let workers = (0..config.workers.max(1))
            .map(|worker| {
                let queue = queue.clone();
                let results = results_tx.clone();
                let decoder = decoder.clone();
                let parser = parser.clone();
                tokio::spawn(async move {
                    while let Some(job) = queue.pop().await {
                        let outcome = process(&decoder, &parser, job.frame);
                        if results.send((job.seq, outcome)).is_err() {
                            break;
                        }
                    }
                    tracing::trace!(worker, "Decode worker exiting");
                })
            })
            .collect();

        Self {
            queue,
            results_tx,
            results_rx,
            pending: BTreeMap::new(),
            next_submit: 0,
            next_emit: 0,
            dropped: 0,
            workers,
        }
    }

    /// Queue a frame; returns its sequence number
    pub fn submit(&mut self, frame: RawFrame) -> u64 {
        let seq = self.next_submit;
        self.next_submit += 1;

        if let Push::Evicted(evicted) = self.queue.push(Job { seq, frame }) {
            self.dropped += 1;
            metrics::counter!("steamwatch_frames_dropped_total").increment(1);
            tracing::warn!(seq = evicted.seq, "Decode queue saturated, dropped oldest frame");
            // unbounded and we hold the receiver
            let _ = self.results_tx.send((evicted.seq, FrameOutcome::Dropped));
        }

        seq
    }

    /// Next outcome in submission order
    ///
    /// Cancel safe: outcomes received but not yet due stay buffered.
    pub async fn next(&mut self) -> (u64, FrameOutcome) {
        loop {
            if let Some(outcome) = self.pending.remove(&self.next_emit) {
                let seq = self.next_emit;
                self.next_emit += 1;
                return (seq, outcome);
            }

            match self.results_rx.recv().await {
                Some((seq, outcome)) => {
                    self.pending.insert(seq, outcome);
                }
                // self holds a sender, so the channel never closes
                None => std::future::pending::<()>().await,
            }
        }
    }

    /// Frames submitted but not yet returned by [`next`](Self::next)
    pub fn in_flight(&self) -> u64 {
        self.next_submit - self.next_emit
    }

    /// Frames evicted from the queue so far
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Discard the backlog, stop accepting frames and wait for workers to
    /// finish the frame each is holding
    pub async fn shutdown(mut self) {
        let discarded = self.queue.clear();
        self.queue.close();
        if discarded > 0 {
            tracing::debug!(discarded, "Decode backlog discarded on shutdown");
        }
        for worker in self.workers.drain(..) {
            let _ = worker.await;
        }
    }
}

impl Drop for DecodePool {
    fn drop(&mut self) {
        self.queue.close();
    }
}

fn process(decoder: &FrameDecoder, parser: &TickParser, frame: RawFrame) -> FrameOutcome {
    let parsed = match frame {
        RawFrame::Text(text) => parser.parse(&text),
        RawFrame::Binary(bytes) => match decoder.decode(&bytes) {
            Ok(decoded) => parser.parse(&decoded.payload),
            Err(e) => return FrameOutcome::DecodeFailed(e),
        },
    };

    match parsed {
        Ok(payload) => FrameOutcome::Parsed(payload),
        Err(e) => FrameOutcome::ParseFailed(e),
    }
}

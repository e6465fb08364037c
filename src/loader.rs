//! Panel image loader: decodes pages on a small pool of background threads.
//!
//! The interactive thread binds a slot (see `pool`) and then dispatches a
//! `DecodeJob` carrying `(slot, index, generation)`. Workers never touch the
//! pool; they send a `DecodeCompletion` back over a channel which the
//! interactive thread drains with `try_recv()` and checks for staleness
//! before applying. There is no cancellation: a job for a slot that has
//! since been recycled still runs, and its result is simply dropped.

use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use log::{debug, error, warn};

use crate::archive::{LoadError, PanelDecoder, PanelImage};
use crate::library::Panel;
use crate::pool::SlotId;

/// One decode request.
#[derive(Debug, Clone)]
pub struct DecodeJob {
    pub slot: SlotId,
    pub index: usize,
    pub generation: u64,
    pub archive: Arc<PathBuf>,
    pub entry: String,
}

/// Result of a `DecodeJob`, delivered back to the interactive thread.
#[derive(Debug)]
pub struct DecodeCompletion {
    pub slot: SlotId,
    pub index: usize,
    pub generation: u64,
    pub result: Result<Arc<PanelImage>, LoadError>,
    pub elapsed: Duration,
}

pub struct PanelLoader {
    job_tx: Option<mpsc::Sender<DecodeJob>>,
    done_rx: mpsc::Receiver<DecodeCompletion>,
    workers: Vec<JoinHandle<()>>,
}

impl PanelLoader {
    /// Spawn `workers` decode threads (at least one) sharing one job queue.
    pub fn new(decoder: Arc<dyn PanelDecoder>, workers: usize) -> Result<Self> {
        let (job_tx, job_rx) = mpsc::channel::<DecodeJob>();
        let (done_tx, done_rx) = mpsc::channel::<DecodeCompletion>();
        let job_rx = Arc::new(Mutex::new(job_rx));

        let count = workers.max(1);
        let mut handles = Vec::with_capacity(count);
        for n in 0..count {
            let job_rx = Arc::clone(&job_rx);
            let done_tx = done_tx.clone();
            let decoder = Arc::clone(&decoder);
            let handle = thread::Builder::new()
                .name(format!("panel-decode-{n}"))
                .spawn(move || worker_loop(n, &job_rx, &done_tx, decoder.as_ref()))
                .with_context(|| format!("failed to spawn decode worker {n}"))?;
            handles.push(handle);
        }
        debug!("loader: started {count} decode worker(s)");

        Ok(Self {
            job_tx: Some(job_tx),
            done_rx,
            workers: handles,
        })
    }

    /// Queue a decode of `panel` into `slot` at `generation`.
    pub fn load(&self, panel: &Panel, archive: &Arc<PathBuf>, slot: SlotId, generation: u64) {
        self.submit(DecodeJob {
            slot,
            index: panel.index,
            generation,
            archive: Arc::clone(archive),
            entry: panel.entry_name.clone(),
        });
    }

    pub fn submit(&self, job: DecodeJob) {
        debug!(
            "loader: queue panel {} ({}) -> slot {} gen {}",
            job.index, job.entry, job.slot.0, job.generation
        );
        if let Some(tx) = &self.job_tx
            && tx.send(job).is_err()
        {
            error!("loader: all decode workers have exited");
        }
    }

    /// Every completion that has arrived so far (non-blocking).
    pub fn drain(&self) -> Vec<DecodeCompletion> {
        let mut out = Vec::new();
        while let Ok(done) = self.done_rx.try_recv() {
            out.push(done);
        }
        out
    }

    /// Block up to `timeout` for the next completion.
    pub fn wait_one(&self, timeout: Duration) -> Option<DecodeCompletion> {
        self.done_rx.recv_timeout(timeout).ok()
    }
}

impl Drop for PanelLoader {
    fn drop(&mut self) {
        // Closing the queue makes every worker's recv() fail.
        self.job_tx.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        debug!("loader: workers joined");
    }
}

fn worker_loop(
    n: usize,
    job_rx: &Mutex<mpsc::Receiver<DecodeJob>>,
    done_tx: &mpsc::Sender<DecodeCompletion>,
    decoder: &dyn PanelDecoder,
) {
    debug!("decode worker {n}: started");
    loop {
        // Hold the lock only while waiting for the next job.
        let job = match job_rx.lock() {
            Ok(rx) => rx.recv(),
            Err(_) => {
                error!("decode worker {n}: job queue lock poisoned");
                break;
            }
        };
        let Ok(job) = job else { break };

        let start = Instant::now();
        let result = decoder
            .decode_entry(&job.archive, &job.entry)
            .map(Arc::new);
        let elapsed = start.elapsed();
        match &result {
            Ok(img) => debug!(
                "decode worker {n}: panel {} {}x{} in {:.1}ms",
                job.index,
                img.width(),
                img.height(),
                elapsed.as_secs_f64() * 1000.0
            ),
            Err(e) => warn!("decode worker {n}: panel {} failed: {e}", job.index),
        }
        let done = DecodeCompletion {
            slot: job.slot,
            index: job.index,
            generation: job.generation,
            result,
            elapsed,
        };
        if done_tx.send(done).is_err() {
            break;
        }
    }
    debug!("decode worker {n}: channel closed, exiting");
}

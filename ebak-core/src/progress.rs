use std::fmt;
use std::sync::mpsc::SyncSender;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex, MutexGuard,
};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Scanning,
    Hashing,
    Packaging,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Scanning => "scanning",
            Stage::Hashing => "hashing",
            Stage::Packaging => "packaging",
        })
    }
}

/// Snapshot pushed to a listener. Units are files while scanning, bytes otherwise.
#[derive(Clone, Debug)]
pub struct ProgressEvent {
    pub stage: Stage,
    pub done: u64,
    pub total: u64,
    pub percent: f64,
    /// Units per second since the stage started.
    pub throughput: f64,
    pub elapsed: Duration,
    pub remaining: Option<Duration>,
}

struct StageClock {
    stage: Stage,
    started: Instant,
}

/// Shared progress counters. Cloning is cheap; every clone reports into the
/// same listener. Delivery is `try_send`: a full or dropped channel loses the
/// event and never blocks the caller.
#[derive(Clone)]
pub struct Progress {
    sink: Option<SyncSender<ProgressEvent>>,
    clock: Arc<Mutex<StageClock>>,
    done: Arc<AtomicU64>,
    total: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    ticker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Default for Progress {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Progress {
    pub fn new(sink: Option<SyncSender<ProgressEvent>>) -> Self {
        Self {
            sink,
            clock: Arc::new(Mutex::new(StageClock {
                stage: Stage::Scanning,
                started: Instant::now(),
            })),
            done: Arc::new(AtomicU64::new(0)),
            total: Arc::new(AtomicU64::new(0)),
            running: Arc::new(AtomicBool::new(false)),
            ticker: Arc::new(Mutex::new(None)),
        }
    }

    pub fn enabled(&self) -> bool {
        self.sink.is_some()
    }

    fn clock(&self) -> MutexGuard<'_, StageClock> {
        self.clock.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Enter `stage` with a fresh counter and clock.
    pub fn set_stage(&self, stage: Stage, total: u64) {
        {
            let mut c = self.clock();
            c.stage = stage;
            c.started = Instant::now();
        }
        self.total.store(total, Ordering::Relaxed);
        self.done.store(0, Ordering::Relaxed);
    }

    pub fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.done.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProgressEvent {
        let (stage, elapsed) = {
            let c = self.clock();
            (c.stage, c.started.elapsed())
        };
        let done = self.done.load(Ordering::Relaxed);
        let total = self.total.load(Ordering::Relaxed);
        let percent = if total > 0 { (done as f64 / total as f64 * 100.0).min(100.0) } else { 0.0 };
        let secs = elapsed.as_secs_f64();
        let throughput = if secs > 0.0 { done as f64 / secs } else { 0.0 };
        let remaining = if throughput > 0.0 && total >= done {
            Some(Duration::from_secs_f64((total - done) as f64 / throughput))
        } else {
            None
        };
        ProgressEvent { stage, done, total, percent, throughput, elapsed, remaining }
    }

    /// Push the current snapshot to the listener, if any.
    pub fn emit(&self) {
        if let Some(sink) = &self.sink {
            let _ = sink.try_send(self.snapshot());
        }
    }

    /// Emit a snapshot every `interval` from a background thread until `stop`.
    pub fn start(&self, interval: Duration) {
        if !self.enabled() || self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let me = self.clone();
        let handle = thread::spawn(move || loop {
            thread::park_timeout(interval);
            if !me.running.load(Ordering::SeqCst) {
                break;
            }
            me.emit();
        });
        *self.ticker_slot() = Some(handle);
    }

    /// Halt the ticker and wait for it to exit, then emit a final snapshot.
    /// No tick from this start can arrive once `stop` returns.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let handle = self.ticker_slot().take();
        if let Some(h) = handle {
            h.thread().unpark();
            let _ = h.join();
        }
        self.emit();
    }

    fn ticker_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.ticker.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Cooperative cancellation flag shared by scan, hash and packaging.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

//! Message queue contracts and two local bindings.
//!
//! Consumers hold at most one unacknowledged delivery (flow-control value of 1):
//! calling [`QueueConsumer::receive`] again before acking is an error. A
//! [`Delivery`] is consumed by [`QueueConsumer::ack`], so it can be acked once.

use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use crate::shutdown::shutdown_flag;

/// Suffix of a published, unclaimed message
const READY_EXT: &str = "json";
/// Suffix of a claimed, unacknowledged message
const INFLIGHT_EXT: &str = "inflight";
/// Suffix of a message still being written
const TMP_EXT: &str = "tmp";

/// Error from a queue operation
#[derive(Debug)]
pub enum QueueError {
    Io(io::Error),
    /// `receive` called while a delivery is still outstanding
    Unacknowledged { tag: u64 },
    /// `ack` called with a delivery this consumer does not hold
    UnknownDelivery { tag: u64 },
}

impl std::fmt::Display for QueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "queue IO: {e}"),
            Self::Unacknowledged { tag } => {
                write!(f, "delivery {tag} must be acknowledged before receiving")
            }
            Self::UnknownDelivery { tag } => write!(f, "unknown delivery {tag}"),
        }
    }
}

impl std::error::Error for QueueError {}

impl From<io::Error> for QueueError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// One message handed to a consumer.
#[derive(Debug)]
pub struct Delivery {
    pub tag: u64,
    pub body: Vec<u8>,
}

/// Producer side of the queue.
pub trait QueuePublisher {
    fn publish(&self, body: &[u8]) -> Result<(), QueueError>;
}

impl<Q: QueuePublisher + ?Sized> QueuePublisher for &Q {
    fn publish(&self, body: &[u8]) -> Result<(), QueueError> {
        (**self).publish(body)
    }
}

/// Consumer side of the queue.
pub trait QueueConsumer {
    /// Block until a message is available. `Ok(None)` ends the consume loop.
    fn receive(&mut self) -> Result<Option<Delivery>, QueueError>;

    /// Acknowledge a delivery, removing it from the queue for good.
    fn ack(&mut self, delivery: Delivery) -> Result<(), QueueError>;
}

// ============================================================================
// In-process queue
// ============================================================================

#[derive(Debug, Default)]
struct MemoryState {
    pending: VecDeque<Vec<u8>>,
    published: usize,
    acked: usize,
}

/// In-process queue. Cloning shares the same underlying queue.
///
/// `receive` returns `None` once the queue is drained, which makes it handy
/// for driving a worker to completion in tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryQueue {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn consumer(&self) -> MemoryConsumer {
        MemoryConsumer {
            queue: self.clone(),
            in_flight: None,
            next_tag: 1,
        }
    }

    /// Messages published and not yet claimed
    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn published(&self) -> usize {
        self.lock().published
    }

    pub fn acked(&self) -> usize {
        self.lock().acked
    }

    /// Snapshot of unclaimed message bodies, oldest first
    pub fn pending_bodies(&self) -> Vec<Vec<u8>> {
        self.lock().pending.iter().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().expect("memory queue lock poisoned")
    }
}

impl QueuePublisher for MemoryQueue {
    fn publish(&self, body: &[u8]) -> Result<(), QueueError> {
        let mut state = self.lock();
        state.pending.push_back(body.to_vec());
        state.published += 1;
        Ok(())
    }
}

/// Consumer handle on a [`MemoryQueue`].
#[derive(Debug)]
pub struct MemoryConsumer {
    queue: MemoryQueue,
    in_flight: Option<(u64, Vec<u8>)>,
    next_tag: u64,
}

impl MemoryConsumer {
    /// Drop the outstanding delivery without acking; it goes back to the
    /// front of the queue, as a broker would do when a consumer dies.
    pub fn abandon(&mut self) {
        if let Some((_, body)) = self.in_flight.take() {
            self.queue.lock().pending.push_front(body);
        }
    }
}

impl QueueConsumer for MemoryConsumer {
    fn receive(&mut self) -> Result<Option<Delivery>, QueueError> {
        if let Some((tag, _)) = &self.in_flight {
            return Err(QueueError::Unacknowledged { tag: *tag });
        }
        let Some(body) = self.queue.lock().pending.pop_front() else {
            return Ok(None);
        };
        let tag = self.next_tag;
        self.next_tag += 1;
        self.in_flight = Some((tag, body.clone()));
        Ok(Some(Delivery { tag, body }))
    }

    fn ack(&mut self, delivery: Delivery) -> Result<(), QueueError> {
        match &self.in_flight {
            Some((tag, _)) if *tag == delivery.tag => {
                self.in_flight = None;
                self.queue.lock().acked += 1;
                Ok(())
            }
            _ => Err(QueueError::UnknownDelivery { tag: delivery.tag }),
        }
    }
}

// ============================================================================
// Directory spool
// ============================================================================

/// Directory-backed queue shared by processes on one host or a shared volume.
///
/// Each message is one file. Publishing writes `<name>.json.tmp` and renames
/// it into place; consuming claims a message by renaming it to
/// `<name>.json.inflight`, which only one competing consumer can win. Acking
/// deletes the claimed file.
#[derive(Debug, Clone)]
pub struct SpoolQueue {
    dir: PathBuf,
}

impl SpoolQueue {
    /// Open (and create) a spool directory
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Blocking consumer polling every `poll_interval`.
    ///
    /// It returns `None` from `receive` when shutdown is requested, or when
    /// the spool is empty if `stop_when_empty` is set.
    pub fn consumer(&self, poll_interval: Duration, stop_when_empty: bool) -> SpoolConsumer {
        SpoolConsumer {
            dir: self.dir.clone(),
            poll_interval,
            stop_when_empty,
            stop: shutdown_flag(),
            in_flight: None,
            next_tag: 1,
        }
    }

    /// Number of ready (unclaimed) messages
    pub fn pending(&self) -> io::Result<usize> {
        Ok(list_with_ext(&self.dir, READY_EXT)?.len())
    }

    /// Return claimed messages untouched for `older_than` to the ready state.
    ///
    /// A consumer that died mid-batch leaves its claim behind; this is how the
    /// batch gets redelivered.
    pub fn requeue_stale(&self, older_than: Duration) -> io::Result<usize> {
        let now = SystemTime::now();
        let mut requeued = 0;
        for path in list_with_ext(&self.dir, INFLIGHT_EXT)? {
            let modified = match fs::metadata(&path).and_then(|m| m.modified()) {
                Ok(m) => m,
                // Acked by its owner in the meantime
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            let age = now.duration_since(modified).unwrap_or_default();
            if age < older_than {
                continue;
            }
            let ready = path.with_extension("");
            match fs::rename(&path, &ready) {
                Ok(()) => {
                    log::warn!("Requeued stale message {}", ready.display());
                    requeued += 1;
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(requeued)
    }
}

impl QueuePublisher for SpoolQueue {
    fn publish(&self, body: &[u8]) -> Result<(), QueueError> {
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.6f");
        let name = format!("{stamp}-{}.{READY_EXT}", uuid::Uuid::new_v4().simple());
        let final_path = self.dir.join(&name);
        let tmp_path = self.dir.join(format!("{name}.{TMP_EXT}"));

        let mut file = File::create(&tmp_path)?;
        file.write_all(body)?;
        file.sync_all()?;
        fs::rename(&tmp_path, &final_path)?;
        Ok(())
    }
}

/// Consumer handle on a [`SpoolQueue`].
#[derive(Debug)]
pub struct SpoolConsumer {
    dir: PathBuf,
    poll_interval: Duration,
    stop_when_empty: bool,
    stop: &'static AtomicBool,
    in_flight: Option<(u64, PathBuf)>,
    next_tag: u64,
}

impl SpoolConsumer {
    /// Watch `stop` instead of the process shutdown flag.
    pub fn with_stop_flag(mut self, stop: &'static AtomicBool) -> Self {
        self.stop = stop;
        self
    }

    /// Claim the oldest ready message, if any.
    fn try_claim(&mut self) -> io::Result<Option<Delivery>> {
        for ready in list_with_ext(&self.dir, READY_EXT)? {
            let claimed = ready.with_extension(format!("{READY_EXT}.{INFLIGHT_EXT}"));
            match fs::rename(&ready, &claimed) {
                Ok(()) => {}
                // Another consumer won the race
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            }
            // Claim time drives stale-claim detection
            File::options()
                .write(true)
                .open(&claimed)?
                .set_modified(SystemTime::now())?;
            let body = fs::read(&claimed)?;
            let tag = self.next_tag;
            self.next_tag += 1;
            self.in_flight = Some((tag, claimed));
            return Ok(Some(Delivery { tag, body }));
        }
        Ok(None)
    }
}

impl QueueConsumer for SpoolConsumer {
    fn receive(&mut self) -> Result<Option<Delivery>, QueueError> {
        if let Some((tag, _)) = &self.in_flight {
            return Err(QueueError::Unacknowledged { tag: *tag });
        }
        loop {
            if self.stop.load(Ordering::Relaxed) {
                return Ok(None);
            }
            if let Some(delivery) = self.try_claim()? {
                return Ok(Some(delivery));
            }
            if self.stop_when_empty {
                return Ok(None);
            }
            std::thread::sleep(self.poll_interval);
        }
    }

    fn ack(&mut self, delivery: Delivery) -> Result<(), QueueError> {
        match self.in_flight.take() {
            Some((tag, path)) if tag == delivery.tag => match fs::remove_file(&path) {
                Ok(()) => Ok(()),
                // Requeued as stale while we held it; it will be redelivered
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    log::warn!(
                        "Claim {} was requeued before ack, batch may be processed twice",
                        path.display()
                    );
                    Ok(())
                }
                Err(e) => Err(e.into()),
            },
            other => {
                self.in_flight = other;
                Err(QueueError::UnknownDelivery { tag: delivery.tag })
            }
        }
    }
}

/// Files in `dir` whose final extension is `ext`, sorted by name (publish order).
fn list_with_ext(dir: &Path, ext: &str) -> io::Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|e| e == ext) {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

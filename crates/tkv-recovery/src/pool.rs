//! Per-txn-pinned worker pool driving recovery replay (§4.11 point 2).
//!
//! `N = next_pow2(max_threads*2)` lanes, each a dedicated channel plus
//! a lazily (re)spawned worker thread. Every op for a given `txnId`
//! hashes to the same lane, so a lane's FIFO channel is exactly the
//! per-txn serialization §4.11 asks for, while distinct lanes run
//! fully concurrently. Idle lanes shut their thread down after 5
//! seconds with nothing to do and respawn on the next submission,
//! except the pool never lets its *total* live-thread count drop below
//! one (§4.11 "floor=1").

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

const IDLE_TIMEOUT: Duration = Duration::from_secs(5);

type Job = Box<dyn FnOnce() + Send>;

enum Message {
    Apply(Job),
    Barrier(Arc<(Mutex<usize>, Condvar)>),
}

#[derive(Default)]
struct Lane {
    sender: Option<Sender<Message>>,
    handle: Option<JoinHandle<()>>,
}

pub(crate) struct RecoveryPool {
    lanes: Vec<Arc<Mutex<Lane>>>,
    live: Arc<AtomicUsize>,
}

impl RecoveryPool {
    /// `lane_count` should be `next_pow2(max_threads*2)` per §4.11;
    /// callers typically derive it from `available_parallelism()`.
    pub(crate) fn new(lane_count: usize) -> Self {
        let lane_count = lane_count.max(1);
        let live = Arc::new(AtomicUsize::new(0));
        let lanes: Vec<_> = (0..lane_count).map(|_| Arc::new(Mutex::new(Lane::default()))).collect();
        let pool = Self { lanes, live };
        for idx in 0..lane_count {
            pool.ensure_spawned(idx);
        }
        pool
    }

    pub(crate) fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    fn ensure_spawned(&self, idx: usize) {
        let lane_arc = Arc::clone(&self.lanes[idx]);
        let mut lane = lane_arc.lock();
        if lane.sender.is_some() {
            return;
        }
        let (tx, rx) = mpsc::channel::<Message>();
        let live = Arc::clone(&self.live);
        live.fetch_add(1, Ordering::SeqCst);
        let worker_lane = Arc::clone(&self.lanes[idx]);
        let handle = std::thread::Builder::new()
            .name(format!("tkv-recovery-lane-{idx}"))
            .spawn(move || {
                loop {
                    match rx.recv_timeout(IDLE_TIMEOUT) {
                        Ok(Message::Apply(job)) => job(),
                        Ok(Message::Barrier(sync)) => {
                            let (lock, cvar) = &*sync;
                            let mut done = lock.lock();
                            *done += 1;
                            cvar.notify_all();
                        }
                        Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => {
                            if live.load(Ordering::SeqCst) > 1 {
                                live.fetch_sub(1, Ordering::SeqCst);
                                // mark the slot stale so the next submit respawns it
                                worker_lane.lock().sender = None;
                                break;
                            }
                        }
                    }
                }
            })
            .expect("spawn recovery lane worker");
        lane.sender = Some(tx);
        lane.handle = Some(handle);
    }

    /// Hash an arbitrary key (a `txnId`, or an index/key pair for an
    /// autocommit op) onto a lane index.
    pub(crate) fn lane_for(&self, hash: u64) -> usize {
        (hash as usize) % self.lanes.len()
    }

    pub(crate) fn submit(&self, lane: usize, job: Job) {
        self.ensure_spawned(lane);
        let sender = self.lanes[lane].lock().sender.clone().expect("just ensured spawned");
        if let Err(mpsc::SendError(message)) = sender.send(Message::Apply(job)) {
            // the worker raced us into its idle-timeout exit; retry the
            // same job against a freshly spawned one.
            let Message::Apply(job) = message else { unreachable!("only Apply is ever sent here") };
            self.ensure_spawned(lane);
            let sender = self.lanes[lane].lock().sender.clone().expect("just ensured spawned");
            let _ = sender.send(Message::Apply(job));
        }
    }

    /// Block until every lane has drained everything submitted before
    /// this call (used by `RESET` handling, §4.11 point 5).
    pub(crate) fn barrier(&self) {
        let sync = Arc::new((Mutex::new(0usize), Condvar::new()));
        let mut sent = 0usize;
        for idx in 0..self.lanes.len() {
            self.ensure_spawned(idx);
            let guard = self.lanes[idx].lock();
            if let Some(sender) = &guard.sender {
                if sender.send(Message::Barrier(Arc::clone(&sync))).is_ok() {
                    sent += 1;
                }
            }
        }
        let (lock, cvar) = &*sync;
        let mut done = lock.lock();
        while *done < sent {
            cvar.wait(&mut done);
        }
    }
}

impl Drop for RecoveryPool {
    fn drop(&mut self) {
        self.barrier();
        for lane in &self.lanes {
            let mut guard = lane.lock();
            guard.sender = None;
            if let Some(handle) = guard.handle.take() {
                let _ = handle.join();
            }
        }
    }
}

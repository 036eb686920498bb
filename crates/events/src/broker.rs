//! Per-job progress broker.
//!
//! [`ProgressBroker`] fans [`JobEvent`]s out to every subscriber of a job.
//! Each subscriber owns a bounded queue; publishing never blocks and never
//! waits for a consumer. Every frame is a full snapshot of the job, so once
//! a subscriber's queue is full further frames collapse into a single
//! pending slot that always holds the newest one. A lagging consumer skips
//! intermediate progress but still ends on the terminal frame. Consumers
//! that stop pulling altogether are left to [`ProgressBroker::reap_inactive`].
//!
//! Subscriptions are opened through [`ProgressBroker::subscribe`], which
//! reads the job under the registry's per-job lock and registers the queue
//! before the lock is released. Combined with publishers that publish from
//! inside [`JobRegistry::update_with`], no update can slip between the
//! replayed snapshot and the live feed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak,
};
use std::time::{Duration, Instant};

use demix_core::{JobEvent, JobId, JobRegistry};
use tokio::sync::mpsc::{self, error::TrySendError};

/// Default per-subscriber queue capacity.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 64;

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

/// Newest frame that did not fit in a subscriber's queue.
///
/// Publisher and consumer both touch the queue while holding this lock, so
/// a frame parked here is never missed by a consumer about to wait on an
/// empty queue.
type Pending = Arc<Mutex<Option<JobEvent>>>;

struct Subscriber {
    id: u64,
    sender: mpsc::Sender<JobEvent>,
    pending: Pending,
    /// Milliseconds since the broker epoch when the consumer last pulled.
    last_active: Arc<AtomicU64>,
}

#[derive(Default)]
struct Channel {
    subscribers: Vec<Subscriber>,
}

type ChannelSlot = Arc<Mutex<Channel>>;

struct BrokerState {
    channels: RwLock<HashMap<JobId, ChannelSlot>>,
    capacity: usize,
    next_subscriber: AtomicU64,
    epoch: Instant,
}

impl BrokerState {
    fn elapsed_millis(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn channel(&self, job_id: &JobId) -> Option<ChannelSlot> {
        self.read_map().get(job_id).cloned()
    }

    /// Remove one subscriber. Returns `false` if it was already gone.
    fn detach(&self, job_id: &JobId, subscriber_id: u64) -> bool {
        let Some(slot) = self.channel(job_id) else {
            return false;
        };
        let (removed, emptied) = {
            let mut channel = lock(&slot);
            let before = channel.subscribers.len();
            channel.subscribers.retain(|sub| sub.id != subscriber_id);
            (
                channel.subscribers.len() < before,
                channel.subscribers.is_empty(),
            )
        };
        if emptied {
            self.drop_if_empty(job_id);
        }
        removed
    }

    /// Forget a job's channel once nobody listens to it any more.
    fn drop_if_empty(&self, job_id: &JobId) {
        let mut map = self.write_map();
        if map
            .get(job_id)
            .is_some_and(|slot| lock(slot).subscribers.is_empty())
        {
            map.remove(job_id);
        }
    }

    fn read_map(&self) -> RwLockReadGuard<'_, HashMap<JobId, ChannelSlot>> {
        self.channels.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_map(&self) -> RwLockWriteGuard<'_, HashMap<JobId, ChannelSlot>> {
        self.channels.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn lock<T>(slot: &Mutex<T>) -> MutexGuard<'_, T> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Subscriber {
    /// Queue `event`, or park it in the pending slot once the queue is full.
    ///
    /// Returns `false` when the consumer is gone.
    fn offer(&self, event: &JobEvent) -> bool {
        let mut pending = lock(&self.pending);
        // Queued frames must stay older than the parked one.
        if pending.is_some() {
            *pending = Some(event.clone());
            return true;
        }
        match self.sender.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                tracing::debug!(
                    job_id = %event.job_id,
                    subscriber_id = self.id,
                    "Subscriber lagging, coalescing progress frames",
                );
                *pending = Some(event);
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

// ---------------------------------------------------------------------------
// ProgressBroker
// ---------------------------------------------------------------------------

/// Fan-out hub for job progress frames.
///
/// Cheap to clone; all clones share the same channels.
#[derive(Clone)]
pub struct ProgressBroker {
    state: Arc<BrokerState>,
}

impl ProgressBroker {
    /// Create a broker whose subscriber queues hold `capacity` frames.
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Arc::new(BrokerState {
                channels: RwLock::new(HashMap::new()),
                capacity: capacity.max(1),
                next_subscriber: AtomicU64::new(1),
                epoch: Instant::now(),
            }),
        }
    }

    /// Open a subscription on `job_id`.
    ///
    /// The first frame is always the job's current state. Unknown jobs get a
    /// single `job_not_found` frame; jobs that already finished get their
    /// terminal frame. In both cases the stream then ends and nothing is
    /// registered with the broker.
    pub fn subscribe(&self, registry: &JobRegistry, job_id: &JobId) -> Subscription {
        let subscription = registry.read_with(job_id, |record| {
            let snapshot = JobEvent::snapshot(record);
            if snapshot.is_terminal() {
                Subscription::detached(snapshot)
            } else {
                self.attach(snapshot)
            }
        });

        subscription.unwrap_or_else(|| {
            tracing::debug!(job_id = %job_id, "Subscription requested for unknown job");
            Subscription::detached(JobEvent::not_found(job_id))
        })
    }

    /// Deliver `event` to every subscriber of its job.
    ///
    /// Returns the number of subscribers that accepted the frame, queued or
    /// parked.
    pub fn publish(&self, event: &JobEvent) -> usize {
        let Some(slot) = self.state.channel(&event.job_id) else {
            return 0;
        };

        let mut delivered = 0;
        let emptied = {
            let mut channel = lock(&slot);
            channel.subscribers.retain(|sub| {
                let accepted = sub.offer(event);
                if accepted {
                    delivered += 1;
                }
                accepted
            });
            channel.subscribers.is_empty()
        };

        if emptied {
            self.state.drop_if_empty(&event.job_id);
        }
        delivered
    }

    /// Detach `subscription`. Safe to call more than once.
    pub fn unsubscribe(&self, subscription: &mut Subscription) -> bool {
        subscription.unsubscribe()
    }

    /// End every stream on `job_id`. Returns how many were closed.
    pub fn close(&self, job_id: &JobId) -> usize {
        let Some(slot) = self.state.write_map().remove(job_id) else {
            return 0;
        };
        let count = lock(&slot).subscribers.len();
        if count > 0 {
            tracing::debug!(job_id = %job_id, count, "Closed job channel");
        }
        count
    }

    /// End every stream on every job. Used at shutdown.
    pub fn close_all(&self) -> usize {
        let drained: Vec<ChannelSlot> = self
            .state
            .write_map()
            .drain()
            .map(|(_, slot)| slot)
            .collect();
        let count: usize = drained
            .iter()
            .map(|slot| lock(slot).subscribers.len())
            .sum();
        tracing::info!(count, "Closed all progress subscriptions");
        count
    }

    /// Disconnect subscribers that have not pulled a frame within `window`.
    ///
    /// `window` must be longer than the heartbeat interval used by
    /// [`Subscription::next`], since a waiting consumer only refreshes its
    /// activity stamp once per heartbeat.
    pub fn reap_inactive(&self, window: Duration) -> usize {
        let now = self.state.elapsed_millis();
        let window = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        let slots: Vec<(JobId, ChannelSlot)> = self
            .state
            .read_map()
            .iter()
            .map(|(job_id, slot)| (job_id.clone(), Arc::clone(slot)))
            .collect();

        let mut reaped = 0;
        for (job_id, slot) in slots {
            let emptied = {
                let mut channel = lock(&slot);
                channel.subscribers.retain(|sub| {
                    let idle = now.saturating_sub(sub.last_active.load(Ordering::Relaxed));
                    if idle > window {
                        tracing::info!(
                            job_id = %job_id,
                            subscriber_id = sub.id,
                            idle_ms = idle,
                            "Disconnecting inactive subscriber",
                        );
                        reaped += 1;
                        false
                    } else {
                        true
                    }
                });
                channel.subscribers.is_empty()
            };
            if emptied {
                self.state.drop_if_empty(&job_id);
            }
        }
        reaped
    }

    /// Live subscribers on one job.
    pub fn subscriber_count(&self, job_id: &JobId) -> usize {
        let Some(slot) = self.state.channel(job_id) else {
            return 0;
        };
        let count = lock(&slot).subscribers.len();
        count
    }

    /// Live subscribers across all jobs.
    pub fn total_subscribers(&self) -> usize {
        let slots: Vec<ChannelSlot> = self.state.read_map().values().cloned().collect();
        slots.iter().map(|slot| lock(slot).subscribers.len()).sum()
    }

    /// Jobs with at least one live subscriber.
    pub fn channel_count(&self) -> usize {
        self.state.read_map().len()
    }

    fn attach(&self, snapshot: JobEvent) -> Subscription {
        let job_id = snapshot.job_id.clone();
        let (sender, receiver) = mpsc::channel(self.state.capacity);
        // Fresh queue with capacity >= 1, the snapshot always fits.
        let _ = sender.try_send(snapshot);

        let id = self.state.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let last_active = Arc::new(AtomicU64::new(self.state.elapsed_millis()));
        let pending = Pending::default();
        {
            let mut map = self.state.write_map();
            let slot = map.entry(job_id.clone()).or_default();
            lock(slot).subscribers.push(Subscriber {
                id,
                sender,
                pending: Arc::clone(&pending),
                last_active: Arc::clone(&last_active),
            });
        }
        tracing::debug!(job_id = %job_id, subscriber_id = id, "Subscriber attached");

        Subscription {
            job_id,
            subscriber_id: Some(id),
            receiver,
            pending,
            last_active,
            broker: Arc::downgrade(&self.state),
            cursor: Cursor::default(),
        }
    }
}

impl Default for ProgressBroker {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_BUFFER)
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// Outcome of one [`Subscription::next`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Event(JobEvent),
    /// Nothing arrived within the heartbeat interval.
    Heartbeat,
    /// The stream is over. Every later call returns `Closed` too.
    Closed,
}

/// Tracks the newest state a consumer has seen.
#[derive(Debug, Default)]
struct Cursor {
    /// `(status rank, progress)` of the last delivered frame.
    last: Option<(u8, u8)>,
    finished: bool,
}

impl Cursor {
    /// Accept `event` unless it is older than what was already delivered.
    fn admit(&mut self, event: &JobEvent) -> bool {
        if let Some(status) = event.status {
            let position = (status.rank(), event.progress);
            if self.last.is_some_and(|last| position < last) {
                return false;
            }
            self.last = Some(position);
        }
        self.finished = event.is_terminal();
        true
    }
}

/// One consumer's view of a job's progress.
///
/// Dropping a subscription unsubscribes it.
pub struct Subscription {
    job_id: JobId,
    subscriber_id: Option<u64>,
    receiver: mpsc::Receiver<JobEvent>,
    pending: Pending,
    last_active: Arc<AtomicU64>,
    broker: Weak<BrokerState>,
    cursor: Cursor,
}

impl Subscription {
    /// A subscription that yields `event` and then ends.
    fn detached(event: JobEvent) -> Self {
        let (sender, receiver) = mpsc::channel(1);
        let job_id = event.job_id.clone();
        let _ = sender.try_send(event);

        Self {
            job_id,
            subscriber_id: None,
            receiver,
            pending: Pending::default(),
            last_active: Arc::new(AtomicU64::new(0)),
            broker: Weak::new(),
            cursor: Cursor::default(),
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Broker-assigned id, or `None` once detached.
    pub fn subscriber_id(&self) -> Option<u64> {
        self.subscriber_id
    }

    /// Wait for the next frame, emitting [`Delivery::Heartbeat`] whenever
    /// `heartbeat` passes without one.
    ///
    /// Frames older than the last delivered one are skipped. After a
    /// terminal frame the subscription detaches and returns
    /// [`Delivery::Closed`].
    pub async fn next(&mut self, heartbeat: Duration) -> Delivery {
        loop {
            if self.cursor.finished {
                self.detach();
                return Delivery::Closed;
            }
            self.touch();

            let event = match self.take_ready() {
                Some(event) => event,
                None => match tokio::time::timeout(heartbeat, self.receiver.recv()).await {
                    Err(_) => return Delivery::Heartbeat,
                    Ok(Some(event)) => event,
                    Ok(None) => {
                        let parked = lock(&self.pending).take();
                        match parked {
                            Some(event) => event,
                            None => {
                                self.cursor.finished = true;
                                self.detach();
                                return Delivery::Closed;
                            }
                        }
                    }
                },
            };

            if !self.cursor.admit(&event) {
                tracing::debug!(job_id = %self.job_id, "Skipping stale progress frame");
                continue;
            }
            if self.cursor.finished {
                self.detach();
            }
            return Delivery::Event(event);
        }
    }

    /// Like [`next`](Self::next) without heartbeats. `None` ends the stream.
    pub async fn recv(&mut self) -> Option<JobEvent> {
        loop {
            match self.next(Duration::MAX).await {
                Delivery::Event(event) => return Some(event),
                Delivery::Heartbeat => continue,
                Delivery::Closed => return None,
            }
        }
    }

    /// Stop receiving frames. Returns `true` only on the first call for a
    /// subscription that was still registered.
    pub fn unsubscribe(&mut self) -> bool {
        self.cursor.finished = true;
        self.detach()
    }

    /// A frame that is already available: queued frames first, then the
    /// parked one.
    fn take_ready(&mut self) -> Option<JobEvent> {
        let mut pending = lock(&self.pending);
        match self.receiver.try_recv() {
            Ok(event) => Some(event),
            Err(_) => pending.take(),
        }
    }

    fn touch(&self) {
        if let Some(state) = self.broker.upgrade() {
            self.last_active
                .store(state.elapsed_millis(), Ordering::Relaxed);
        }
    }

    fn detach(&mut self) -> bool {
        let Some(id) = self.subscriber_id.take() else {
            return false;
        };
        self.broker
            .upgrade()
            .is_some_and(|state| state.detach(&self.job_id, id))
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

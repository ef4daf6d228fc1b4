mod conflict;
mod error;
mod mutations;
mod queries;

pub use conflict::{find_conflict, violations, BufferPolicy};
pub(crate) use conflict::{now_ms, validate_span};
pub use error::{EngineError, Missing};
pub use mutations::TimelineTxn;
pub use queries::Violation;

use std::io;
use std::path::PathBuf;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::CLEANING_BUFFER_MS;
use crate::model::*;
use crate::observability;
use crate::wal::Wal;

pub type SharedTimeline = Arc<RwLock<Timeline>>;

type Ack = oneshot::Sender<io::Result<()>>;

// ── WAL writer task ──────────────────────────────────────

pub(super) enum WalCommand {
    Append { event: Event, response: Ack },
    Rewrite { events: Vec<Event>, response: Ack },
}

/// Owns the WAL. Appends that queue up while a sync is running are written
/// together and share one fsync.
async fn wal_writer(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    let mut batch: Vec<(Event, Ack)> = Vec::new();
    while let Some(first) = rx.recv().await {
        let mut next = Some(first);
        while let Some(cmd) = next.take() {
            match cmd {
                WalCommand::Append { event, response } => batch.push((event, response)),
                control => {
                    commit_batch(&mut wal, &mut batch);
                    handle_control(&mut wal, control);
                }
            }
            next = rx.try_recv().ok();
        }
        commit_batch(&mut wal, &mut batch);
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, Ack)>) {
    if batch.is_empty() {
        return;
    }
    metrics::histogram!(observability::WAL_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();

    let appended = batch.iter().try_for_each(|(event, _)| wal.append_buffered(event));
    // Sync even after a failed append so no stray bytes ride along with the
    // next batch; the whole batch is reported failed either way.
    let synced = wal.sync();
    let result = appended.and(synced);

    metrics::histogram!(observability::WAL_SYNC_SECONDS).record(started.elapsed().as_secs_f64());
    for (_, ack) in batch.drain(..) {
        let _ = ack.send(match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        });
    }
}

fn handle_control(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Rewrite { events, response } => {
            let _ = response.send(wal.rewrite(&events));
        }
        WalCommand::Append { event, response } => {
            // Not routed here by `wal_writer`; keep it durable anyway.
            let _ = response.send(wal.append_buffered(&event).and_then(|()| wal.sync()));
        }
    }
}

// ── Engine ───────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Gap kept free after each reservation.
    pub buffer_ms: Ms,
    pub buffer_policy: BufferPolicy,
    /// Upper bound on waiting for a facility lock before giving up with
    /// `Contention`.
    pub lock_timeout: Duration,
    /// Rewrite the WAL after this many appends. 0 disables.
    pub compact_threshold: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer_ms: CLEANING_BUFFER_MS,
            buffer_policy: BufferPolicy::Symmetric,
            lock_timeout: Duration::from_secs(5),
            compact_threshold: 1000,
        }
    }
}

/// Reservation store: one timeline per facility, each behind its own lock,
/// made durable by the WAL.
pub struct Engine {
    pub(super) timelines: DashMap<Ulid, SharedTimeline>,
    /// Reservation id → facility id.
    pub(super) index: DashMap<Ulid, Ulid>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Writers hold it shared for the length of a unit of work; compaction
    /// takes it exclusively so no write is in flight while the log is rewritten.
    pub(super) gate: Arc<RwLock<()>>,
    pub(super) config: EngineConfig,
    /// Records in the log since it was last rewritten.
    pub(super) appends_since_compact: AtomicU64,
    replay_discarded_bytes: u64,
}

/// Apply an event to already-locked timelines.
fn apply_event(timelines: &mut [&mut Timeline], event: &Event, index: &DashMap<Ulid, Ulid>) {
    fn find<'t>(timelines: &'t mut [&mut Timeline], facility_id: Ulid) -> Option<&'t mut Timeline> {
        timelines
            .iter_mut()
            .find(|t| t.facility_id == facility_id)
            .map(|t| &mut **t)
    }

    match event {
        Event::ReservationCreated { reservation } => {
            if let Some(tl) = find(timelines, reservation.facility_id) {
                tl.insert(reservation.clone());
                index.insert(reservation.id, reservation.facility_id);
            }
        }
        Event::ReservationReplaced {
            previous_facility_id,
            reservation,
        } => {
            if let Some(tl) = find(timelines, *previous_facility_id) {
                tl.remove(reservation.id);
            }
            if let Some(tl) = find(timelines, reservation.facility_id) {
                tl.insert(reservation.clone());
                index.insert(reservation.id, reservation.facility_id);
            }
        }
        Event::ReservationDeleted { id, facility_id } => {
            if let Some(tl) = find(timelines, *facility_id) {
                tl.remove(*id);
            }
            index.remove(id);
        }
    }
}

impl Engine {
    /// Replay the WAL at `wal_path` and start its writer task. Must be called
    /// inside a Tokio runtime.
    pub fn open(wal_path: PathBuf, config: EngineConfig) -> io::Result<Self> {
        let replay = Wal::replay(&wal_path)?;
        if replay.discarded_bytes > 0 {
            warn!(
                "{}: discarded {} trailing bytes after the last intact record",
                wal_path.display(),
                replay.discarded_bytes
            );
            Wal::truncate(&wal_path, replay.valid_bytes)?;
        }
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer(wal, wal_rx));

        let engine = Self {
            timelines: DashMap::new(),
            index: DashMap::new(),
            wal_tx,
            gate: Arc::new(RwLock::new(())),
            config,
            appends_since_compact: AtomicU64::new(replay.events.len() as u64),
            replay_discarded_bytes: replay.discarded_bytes,
        };

        // Nobody else can see these locks yet, so try_write never waits.
        // Blocking variants are off limits: this may run on a runtime thread.
        for event in &replay.events {
            let mut guards = Vec::new();
            for facility_id in event.facilities() {
                let guard = engine
                    .timeline(facility_id)
                    .try_write_owned()
                    .map_err(|_| io::Error::other("replay: timeline unexpectedly locked"))?;
                guards.push(guard);
            }
            let mut tls: Vec<&mut Timeline> = guards.iter_mut().map(|g| &mut **g).collect();
            apply_event(&mut tls, event, &engine.index);
        }

        info!(
            "replayed {} WAL events: {} reservations on {} facilities",
            replay.events.len(),
            engine.index.len(),
            engine.timelines.len()
        );
        metrics::gauge!(observability::RESERVATIONS_LIVE).set(engine.index.len() as f64);
        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Bytes dropped from the end of the WAL at startup.
    pub fn replay_discarded_bytes(&self) -> u64 {
        self.replay_discarded_bytes
    }

    /// Timeline for `facility_id`, created empty on first use.
    pub(super) fn timeline(&self, facility_id: Ulid) -> SharedTimeline {
        self.timelines
            .entry(facility_id)
            .or_insert_with(|| Arc::new(RwLock::new(Timeline::new(facility_id))))
            .value()
            .clone()
    }

    /// Snapshot of the timeline handles, so no map shard is held across an await.
    pub(super) fn timeline_handles(&self) -> Vec<SharedTimeline> {
        self.timelines.iter().map(|e| e.value().clone()).collect()
    }

    /// Make `event` durable through the writer task.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }
}

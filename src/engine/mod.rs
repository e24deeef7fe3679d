mod availability;
mod conflict;
pub mod duration;
pub mod eligibility;
mod error;
mod lifecycle;
mod mutations;
mod queries;
pub mod slots;

pub use availability::availability_for_day;
pub use error::EngineError;
pub use lifecycle::{allowed_transitions, check_transition};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::cache::{AvailabilityCache, DEFAULT_TTL_MS};
use crate::limits::MAX_CENTERS_PER_TENANT;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedCenterState = Arc<RwLock<CenterState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush the current batch first, then handle the
                            // non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

// ── The per-tenant engine ────────────────────────────────

pub struct Engine {
    pub centers: DashMap<Ulid, SharedCenterState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub cache: AvailabilityCache,
    /// Reverse lookup: appointment id → owning center id.
    pub(super) appt_index: DashMap<Ulid, Ulid>,
    /// Reverse lookup: block id → owning center id.
    pub(super) block_index: DashMap<Ulid, Ulid>,
    /// Appointment id → transition trail. Append-only; survives center moves.
    pub(super) history: DashMap<Ulid, Vec<HistoryEntry>>,
}

/// Apply an event to one center's state (no locking — caller holds the
/// guard). Cross-center reschedules are split by the caller into a removal
/// from the old center and this insert into the new one.
fn apply_to_center(cs: &mut CenterState, event: &Event) {
    match event {
        Event::SchedulePublished { schedule } => {
            cs.schedules.insert(schedule.date, schedule.clone());
        }
        Event::BlockAdded { block } => {
            cs.blocks.push(block.clone());
        }
        Event::BlockRemoved { id, .. } => {
            cs.remove_block(*id);
        }
        Event::AppointmentCreated { appt, .. } => {
            cs.insert_appointment(appt.clone());
        }
        Event::AppointmentRescheduled { appt, .. } => {
            cs.remove_appointment(appt.id);
            cs.insert_appointment(appt.clone());
        }
        Event::StatusChanged { appt, .. } => {
            cs.remove_appointment(appt.id);
            cs.insert_appointment(appt.clone());
        }
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            centers: DashMap::new(),
            wal_tx,
            notify,
            cache: AvailabilityCache::new(DEFAULT_TTL_MS),
            appt_index: DashMap::new(),
            block_index: DashMap::new(),
            history: DashMap::new(),
        };

        // Replay — we're the sole owner of these Arcs, so try_write always
        // succeeds instantly. Never use blocking_write here because this may
        // run inside an async context (lazy tenant creation).
        for event in &events {
            if let Event::AppointmentRescheduled {
                old_center_id,
                appt,
                ..
            } = event
                && *old_center_id != appt.center_id
                && let Some(old_arc) = engine.get_center(old_center_id)
            {
                let mut old_guard = old_arc.try_write().expect("replay: uncontended write");
                old_guard.remove_appointment(appt.id);
            }
            let cs_arc = engine.get_or_create_center_unchecked(event.center_id());
            let mut guard = cs_arc.try_write().expect("replay: uncontended write");
            apply_to_center(&mut guard, event);
            drop(guard);
            engine.index_event(event);
        }

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
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

    pub fn get_center(&self, id: &Ulid) -> Option<SharedCenterState> {
        self.centers.get(id).map(|e| e.value().clone())
    }

    fn get_or_create_center_unchecked(&self, id: Ulid) -> SharedCenterState {
        self.centers
            .entry(id)
            .or_insert_with(|| Arc::new(RwLock::new(CenterState::new(id))))
            .value()
            .clone()
    }

    pub(super) fn get_or_create_center(&self, id: Ulid) -> Result<SharedCenterState, EngineError> {
        if let Some(cs) = self.get_center(&id) {
            return Ok(cs);
        }
        if self.centers.len() >= MAX_CENTERS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many centers"));
        }
        Ok(self.get_or_create_center_unchecked(id))
    }

    pub fn center_for_appointment(&self, appointment_id: &Ulid) -> Option<Ulid> {
        self.appt_index.get(appointment_id).map(|e| *e.value())
    }

    /// Maintain the engine-level indices and the history trail.
    fn index_event(&self, event: &Event) {
        match event {
            Event::AppointmentCreated { appt, entry }
            | Event::AppointmentRescheduled { appt, entry, .. }
            | Event::StatusChanged { appt, entry } => {
                self.appt_index.insert(appt.id, appt.center_id);
                self.history.entry(appt.id).or_default().push(entry.clone());
            }
            Event::BlockAdded { block } => {
                self.block_index.insert(block.id, block.center_id);
            }
            Event::BlockRemoved { id, .. } => {
                self.block_index.remove(id);
            }
            Event::SchedulePublished { .. } => {}
        }
    }

    /// Drop cached availability made stale by this event.
    fn invalidate_cache(&self, event: &Event) {
        match event {
            Event::SchedulePublished { schedule } => {
                self.cache.invalidate_day(schedule.center_id, schedule.date);
            }
            Event::BlockAdded { block } => {
                if block.recurrence.is_some() {
                    self.cache.invalidate_center(block.center_id);
                } else {
                    self.cache.invalidate_day(block.center_id, block.date);
                }
            }
            // The removed block's dates are unknown here; a recurring one
            // may span many days, so clear the whole center.
            Event::BlockRemoved { center_id, .. } => {
                self.cache.invalidate_center(*center_id);
            }
            Event::AppointmentCreated { appt, .. } | Event::StatusChanged { appt, .. } => {
                self.cache.invalidate_day(appt.center_id, appt.date);
            }
            Event::AppointmentRescheduled {
                old_center_id,
                appt,
                entry,
            } => {
                self.cache.invalidate_day(appt.center_id, appt.date);
                // The entry's diffs carry the old day for cross-date moves
                let old_date = entry
                    .changes
                    .iter()
                    .find(|c| c.field == "date")
                    .and_then(|c| c.before.parse().ok())
                    .unwrap_or(appt.date);
                self.cache.invalidate_day(*old_center_id, old_date);
            }
        }
    }

    /// WAL-append + apply + index + notify + cache invalidation in one call.
    pub(super) async fn persist_and_apply(
        &self,
        center_id: Ulid,
        cs: &mut CenterState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_center(cs, event);
        self.index_event(event);
        self.invalidate_cache(event);
        self.notify.send(center_id, event);
        Ok(())
    }

    /// Lookup appointment → center, acquire the center write lock.
    pub(super) async fn resolve_appointment_write(
        &self,
        appointment_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<CenterState>), EngineError> {
        let center_id = self
            .center_for_appointment(appointment_id)
            .ok_or(EngineError::NotFound(*appointment_id))?;
        let cs = self
            .get_center(&center_id)
            .ok_or(EngineError::NotFound(center_id))?;
        let guard = cs.write_owned().await;
        Ok((center_id, guard))
    }

    /// Compact the WAL down to the events needed to rebuild current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        for entry in self.centers.iter() {
            let cs = entry.value().clone();
            let guard = cs.try_read().expect("compact: uncontended read");

            for schedule in guard.schedules.values() {
                events.push(Event::SchedulePublished {
                    schedule: schedule.clone(),
                });
            }
            for block in &guard.blocks {
                events.push(Event::BlockAdded {
                    block: block.clone(),
                });
            }
            for appt in guard.appointments.values() {
                let trail = self
                    .history
                    .get(&appt.id)
                    .map(|h| h.value().clone())
                    .unwrap_or_default();
                let mut iter = trail.into_iter();
                let first = iter.next().unwrap_or_else(|| HistoryEntry {
                    appointment_id: appt.id,
                    prev_status: None,
                    new_status: appt.status,
                    changes: Vec::new(),
                    actor: None,
                    reason: None,
                    at: 0,
                });
                // Re-create then replay the remaining trail so history
                // survives compaction intact.
                let mut created = appt.clone();
                created.status = first.new_status;
                events.push(Event::AppointmentCreated {
                    appt: created,
                    entry: first,
                });
                let rest: Vec<HistoryEntry> = iter.collect();
                let last_idx = rest.len().saturating_sub(1);
                for (i, entry) in rest.into_iter().enumerate() {
                    let mut snapshot = appt.clone();
                    // RESCHEDULED is a trail marker, never a resting status;
                    // the final snapshot must land on the row's true status.
                    snapshot.status = if i == last_idx {
                        appt.status
                    } else {
                        entry.new_status
                    };
                    events.push(Event::StatusChanged {
                        appt: snapshot,
                        entry,
                    });
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

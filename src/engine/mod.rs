mod booking;
mod calendar;
mod conflict;
mod day_index;
mod error;
mod mutations;
mod queries;
mod scanner;
mod slots;

pub use booking::ReserveRequest;
pub use calendar::build_calendar;
pub use error::EngineError;
pub use scanner::{booked_ms, merge_overlapping, scan_available_days};
pub use slots::generate_daily_slots;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedProviderState = Arc<RwLock<ProviderState>>;

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

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Appends that queue up while a flush is running are written
/// together and share one fsync.
async fn wal_writer_loop(mut wal: Wal<Event>, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };

        let mut batch: Vec<PendingAppend> = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        commit_batch(&mut wal, batch);
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
    tracing::debug!("wal writer stopped");
}

fn commit_batch(wal: &mut Wal<Event>, batch: Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let mut result = Ok(());
    for (event, _) in &batch {
        if let Err(e) = wal.append_buffered(event) {
            result = Err(e);
            break;
        }
    }
    // Flush even after a failed append so the partial bytes are not carried
    // into the next batch.
    let flushed = wal.flush_sync();
    let result = result.and(flushed);

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("wal flush failed for {} events: {e}", batch.len());
    }

    for (_, tx) in batch {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
    }
}

fn handle_non_append(wal: &mut Wal<Event>, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// Secondary lookups maintained alongside provider state.
#[derive(Default)]
pub(super) struct Indexes {
    /// appointment id → provider id
    pub appointments: DashMap<Ulid, ProviderId>,
    /// service id → provider id
    pub services: DashMap<Ulid, ProviderId>,
    /// customer id → that customer's non-canceled appointments, across providers,
    /// sorted by start
    pub customers: DashMap<CustomerId, Vec<(Ulid, Span)>>,
}

pub struct Engine {
    providers: DashMap<ProviderId, SharedProviderState>,
    wal_tx: mpsc::Sender<WalCommand>,
    indexes: Indexes,
    /// Serializes reservations per customer; always taken before a provider lock.
    customer_locks: DashMap<CustomerId, Arc<Mutex<()>>>,
    /// Taken by provider creation and WAL compaction.
    create_lock: Mutex<()>,
}

/// Apply an event to a provider (caller holds the write lock).
fn apply_to_provider(ps: &mut ProviderState, event: &Event, idx: &Indexes) {
    match event {
        Event::ScheduleSet {
            iso_weekday, rule, ..
        } => {
            ps.schedule.days.insert(*iso_weekday, *rule);
        }
        Event::ServiceUpserted { service } => {
            idx.services.insert(service.id, service.provider_id);
            ps.services.insert(service.id, service.clone());
        }
        Event::ServiceRemoved { id, .. } => {
            ps.services.remove(id);
            idx.services.remove(id);
        }
        Event::AppointmentBooked { appointment } => {
            idx.appointments.insert(appointment.id, appointment.provider_id);
            if let Some(customer) = appointment.customer_id
                && appointment.is_active()
            {
                let mut held = idx.customers.entry(customer).or_default();
                let pos = held.partition_point(|(_, s)| s.start <= appointment.span.start);
                held.insert(pos, (appointment.id, appointment.span));
            }
            ps.insert_appointment(appointment.clone());
        }
        Event::AppointmentCanceled {
            id, actor, reason, ..
        } => {
            if let Some(appt) = ps.appointment_mut(*id) {
                appt.status = AppointmentStatus::Canceled;
                appt.cancel_reason = reason.clone();
                appt.canceled_by = Some(*actor);
                if let Some(customer) = appt.customer_id {
                    if let Some(mut held) = idx.customers.get_mut(&customer) {
                        held.retain(|(aid, _)| aid != id);
                    }
                    idx.customers.remove_if(&customer, |_, held| held.is_empty());
                }
            }
        }
        Event::AppointmentFinished { id, .. } => {
            if let Some(appt) = ps.appointment_mut(*id) {
                appt.status = AppointmentStatus::Finished;
            }
        }
        // Handled at the map level.
        Event::ProviderCreated { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::<Event>::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            providers: DashMap::new(),
            wal_tx,
            indexes: Indexes::default(),
            customer_locks: DashMap::new(),
            create_lock: Mutex::new(()),
        };

        // Sole owner of every lock during replay: try_write never contends.
        for event in &events {
            match event {
                Event::ProviderCreated { id, name, timezone } => {
                    match crate::timezone::parse_zone(timezone) {
                        Ok(tz) => {
                            let ps = ProviderState::new(*id, name.clone(), tz);
                            engine.providers.insert(*id, Arc::new(RwLock::new(ps)));
                        }
                        Err(e) => tracing::warn!("replay: skipping provider {id}: {e}"),
                    }
                }
                other => {
                    let provider_id = other.provider_id();
                    if let Some(entry) = engine.providers.get(&provider_id) {
                        let ps = entry.clone();
                        let mut guard = ps.try_write().expect("replay: uncontended write");
                        apply_to_provider(&mut guard, other, &engine.indexes);
                    }
                }
            }
        }
        metrics::gauge!(crate::observability::PROVIDERS_ACTIVE).set(engine.providers.len() as f64);
        tracing::info!(
            "replayed {} events for {} providers",
            events.len(),
            engine.providers.len()
        );

        Ok(engine)
    }

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

    pub(super) fn provider(&self, id: ProviderId) -> Result<SharedProviderState, EngineError> {
        self.providers
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::ProviderNotFound(id))
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    /// Durably log the event, then apply it. Nothing changes if the WAL write fails.
    pub(super) async fn persist_and_apply(
        &self,
        ps: &mut ProviderState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_provider(ps, event, &self.indexes);
        Ok(())
    }

    /// Resolve an appointment to its provider and take that provider's write lock.
    pub(super) async fn resolve_appointment_write(
        &self,
        appointment_id: Ulid,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<ProviderState>, EngineError> {
        let provider_id = self
            .indexes
            .appointments
            .get(&appointment_id)
            .map(|e| *e.value())
            .ok_or(EngineError::AppointmentNotFound(appointment_id))?;
        Ok(self.provider(provider_id)?.write_owned().await)
    }

    pub(super) fn customer_lock(&self, customer: CustomerId) -> Arc<Mutex<()>> {
        self.customer_locks.entry(customer).or_default().clone()
    }

    /// Drop customer locks nobody holds or waits on. Returns how many went.
    pub fn prune_customer_locks(&self) -> usize {
        let before = self.customer_locks.len();
        self.customer_locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before.saturating_sub(self.customer_locks.len())
    }
}

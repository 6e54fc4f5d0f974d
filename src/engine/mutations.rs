use std::sync::Arc;

use chrono::NaiveTime;
use tokio::sync::{oneshot, RwLock};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::timezone::{parse_zone, weekday_from_iso};

use super::{Engine, EngineError, WalCommand};

/// Only the provider itself may change its own configuration.
pub(super) fn require_provider(actor: Actor, provider_id: ProviderId) -> Result<(), EngineError> {
    match actor {
        Actor::Provider(id) if id == provider_id => Ok(()),
        _ => Err(EngineError::PermissionDenied(format!(
            "{actor} cannot modify provider {provider_id}"
        ))),
    }
}

impl Engine {
    pub async fn create_provider(
        &self,
        actor: Actor,
        id: ProviderId,
        name: Option<String>,
        timezone: &str,
    ) -> Result<(), EngineError> {
        require_provider(actor, id)?;
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN
        {
            return Err(EngineError::LimitExceeded("provider name too long"));
        }
        let tz = parse_zone(timezone)?;

        // Held across the append so compaction never misses a provider in flight.
        let _creating = self.create_lock.lock().await;
        if self.providers.len() >= MAX_PROVIDERS {
            return Err(EngineError::LimitExceeded("too many providers"));
        }
        if self.providers.contains_key(&id) {
            return Err(EngineError::AlreadyExists(format!("provider {id}")));
        }

        let event = Event::ProviderCreated {
            id,
            name: name.clone(),
            timezone: tz.name().to_string(),
        };
        self.wal_append(&event).await?;
        let ps = ProviderState::new(id, name, tz);
        self.providers.insert(id, Arc::new(RwLock::new(ps)));
        metrics::gauge!(crate::observability::PROVIDERS_ACTIVE).set(self.providers.len() as f64);
        tracing::info!("provider {id} created in {}", tz.name());
        Ok(())
    }

    /// Replace the rule for one ISO weekday. `None`/`None` marks the day closed.
    pub async fn set_schedule_entry(
        &self,
        actor: Actor,
        provider_id: ProviderId,
        day_of_week: i64,
        open: Option<NaiveTime>,
        close: Option<NaiveTime>,
    ) -> Result<(), EngineError> {
        require_provider(actor, provider_id)?;
        let iso_weekday = weekday_from_iso(day_of_week)?.number_from_monday() as u8;
        let rule = match (open, close) {
            (Some(o), Some(c)) if o < c => DayRule { open, close },
            (Some(o), Some(c)) => {
                return Err(EngineError::InvalidTimeInput(format!(
                    "open {o} must be before close {c}"
                )));
            }
            (None, None) => DayRule::CLOSED,
            _ => {
                return Err(EngineError::InvalidTimeInput(
                    "open and close must both be set or both be NULL".into(),
                ));
            }
        };

        let ps = self.provider(provider_id)?;
        let mut guard = ps.write().await;
        let event = Event::ScheduleSet {
            provider_id,
            iso_weekday,
            rule,
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn upsert_service(&self, actor: Actor, service: Service) -> Result<(), EngineError> {
        require_provider(actor, service.provider_id)?;
        if service.name.is_empty() || service.name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("service name must be 1..=256 bytes"));
        }
        if let Some(ref c) = service.currency
            && c.len() > MAX_CURRENCY_LEN
        {
            return Err(EngineError::LimitExceeded("currency code too long"));
        }
        if service.price.is_some_and(|p| p < 0) {
            return Err(EngineError::InvalidTimeInput("price must not be negative".into()));
        }
        if let Some(owner) = self.indexes.services.get(&service.id).map(|e| *e.value())
            && owner != service.provider_id
        {
            return Err(EngineError::AlreadyExists(format!("service {}", service.id)));
        }

        let ps = self.provider(service.provider_id)?;
        let mut guard = ps.write().await;
        if !guard.services.contains_key(&service.id)
            && guard.services.len() >= MAX_SERVICES_PER_PROVIDER
        {
            return Err(EngineError::LimitExceeded("too many services on provider"));
        }
        let event = Event::ServiceUpserted { service };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn remove_service(&self, actor: Actor, id: Ulid) -> Result<ProviderId, EngineError> {
        let provider_id = self
            .indexes
            .services
            .get(&id)
            .map(|e| *e.value())
            .ok_or(EngineError::ServiceNotFound(id))?;
        require_provider(actor, provider_id)?;
        let ps = self.provider(provider_id)?;
        let mut guard = ps.write().await;
        if !guard.services.contains_key(&id) {
            return Err(EngineError::ServiceNotFound(id));
        }
        let event = Event::ServiceRemoved { id, provider_id };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(provider_id)
    }

    /// Rewrite the WAL with only the events needed to recreate the current state.
    ///
    /// Every provider's read lock (and the creation lock) is held until the
    /// writer has swapped the file, so no append can slip in between the
    /// snapshot and the swap.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _creating = self.create_lock.lock().await;

        let mut ids: Vec<ProviderId> = self.providers.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            if let Ok(ps) = self.provider(id) {
                guards.push(ps.read_owned().await);
            }
        }

        let mut events = Vec::new();
        for ps in &guards {
            events.push(Event::ProviderCreated {
                id: ps.id,
                name: ps.name.clone(),
                timezone: ps.tz.name().to_string(),
            });
            for (&iso_weekday, &rule) in &ps.schedule.days {
                events.push(Event::ScheduleSet {
                    provider_id: ps.id,
                    iso_weekday,
                    rule,
                });
            }
            for service in ps.services.values() {
                events.push(Event::ServiceUpserted {
                    service: service.clone(),
                });
            }
            for appointment in &ps.appointments {
                events.push(Event::AppointmentBooked {
                    appointment: appointment.clone(),
                });
            }
        }
        let count = events.len();

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
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        tracing::info!("wal compacted to {count} events");
        Ok(())
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

use dashmap::mapref::entry::Entry;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{check_customer_conflict, check_provider_conflict, now_ms, validate_span};
use super::{Engine, EngineError, SharedProviderState};

/// Everything a caller supplies to reserve an interval.
#[derive(Debug, Clone)]
pub struct ReserveRequest {
    pub id: Ulid,
    pub provider_id: ProviderId,
    pub customer_id: Option<CustomerId>,
    pub start: Ms,
    pub end: Ms,
    pub service_id: Option<Ulid>,
    pub message: Option<String>,
    pub is_blocked: bool,
}

fn outcome_label(result: &Result<Appointment, EngineError>) -> &'static str {
    match result {
        Ok(_) => "booked",
        Err(e) if e.is_conflict() => "conflict",
        Err(_) => "rejected",
    }
}

impl Engine {
    /// Atomically check for overlaps and insert an appointment.
    ///
    /// The customer's lock (when there is a customer) is taken before the
    /// provider's write lock, and both are held until the event is durable.
    pub async fn reserve(
        &self,
        actor: Actor,
        req: ReserveRequest,
    ) -> Result<Appointment, EngineError> {
        let result = self.reserve_inner(actor, req).await;
        metrics::counter!(observability::RESERVATIONS_TOTAL, "outcome" => outcome_label(&result))
            .increment(1);
        result
    }

    async fn reserve_inner(
        &self,
        actor: Actor,
        req: ReserveRequest,
    ) -> Result<Appointment, EngineError> {
        let (channel, customer_id) = match actor {
            Actor::Customer(c) => {
                if req.customer_id.is_some_and(|id| id != c) {
                    return Err(EngineError::PermissionDenied(format!(
                        "{actor} cannot book for another customer"
                    )));
                }
                if req.is_blocked {
                    return Err(EngineError::PermissionDenied(format!(
                        "{actor} cannot block provider time"
                    )));
                }
                (Channel::PlatformBooking, Some(c))
            }
            Actor::Provider(p) => {
                if p != req.provider_id {
                    return Err(EngineError::PermissionDenied(format!(
                        "{actor} cannot book for provider {}",
                        req.provider_id
                    )));
                }
                (Channel::ManualEntry, req.customer_id)
            }
        };

        let span = Span {
            start: req.start,
            end: req.end,
        };
        validate_span(&span)?;
        if channel == Channel::PlatformBooking && span.start < now_ms() {
            return Err(EngineError::InvalidDateRange(
                "cannot book an interval that has already started".into(),
            ));
        }
        if req.is_blocked && customer_id.is_some() {
            return Err(EngineError::InvalidTimeInput(
                "a blocked interval has no customer".into(),
            ));
        }
        if let Some(ref m) = req.message
            && m.len() > MAX_MESSAGE_LEN
        {
            return Err(EngineError::LimitExceeded("message too long"));
        }

        let _customer_guard = match customer_id {
            Some(c) => Some(self.customer_lock(c).lock_owned().await),
            None => None,
        };
        let ps = self.provider(req.provider_id)?;
        let mut guard = ps.write().await;

        // Ids are global: claim this one before any check, release it on failure.
        let id = req.id;
        match self.indexes.appointments.entry(id) {
            Entry::Occupied(_) => {
                return Err(EngineError::AlreadyExists(format!("appointment {id}")));
            }
            Entry::Vacant(slot) => {
                slot.insert(req.provider_id);
            }
        }

        let booked = async {
            if guard.appointments.len() >= MAX_APPOINTMENTS_PER_PROVIDER {
                return Err(EngineError::LimitExceeded("too many appointments on provider"));
            }

            check_provider_conflict(&guard, &span)?;
            if let Some(held) = customer_id.and_then(|c| self.indexes.customers.get(&c)) {
                check_customer_conflict(&held, &span)?;
            }

            let mut details = AppointmentDetails {
                message: req.message,
                ..AppointmentDetails::default()
            };
            if let Some(service_id) = req.service_id {
                let service = guard
                    .services
                    .get(&service_id)
                    .ok_or(EngineError::ServiceNotFound(service_id))?;
                details.service_name = Some(service.name.clone());
                details.price = service.price;
                details.currency = service.currency.clone();
            }

            let appointment = Appointment {
                id,
                provider_id: req.provider_id,
                customer_id,
                span,
                status: AppointmentStatus::InProgress,
                channel,
                is_blocked: req.is_blocked,
                details,
                cancel_reason: None,
                canceled_by: None,
            };
            let event = Event::AppointmentBooked {
                appointment: appointment.clone(),
            };
            self.persist_and_apply(&mut guard, &event).await?;
            Ok::<_, EngineError>(appointment)
        }
        .await;
        let appointment = match booked {
            Ok(appointment) => appointment,
            Err(e) => {
                self.indexes.appointments.remove(&id);
                return Err(e);
            }
        };
        tracing::debug!(
            "appointment {} booked on provider {} by {actor}",
            appointment.id,
            appointment.provider_id
        );
        Ok(appointment)
    }

    /// Cancel an in-progress appointment. The row is kept with the reason and actor.
    pub async fn cancel(
        &self,
        actor: Actor,
        id: Ulid,
        reason: Option<String>,
    ) -> Result<Appointment, EngineError> {
        if let Some(ref r) = reason
            && r.len() > MAX_REASON_LEN
        {
            return Err(EngineError::LimitExceeded("cancel reason too long"));
        }
        let mut guard = self.resolve_appointment_write(id).await?;
        let appt = guard
            .appointment(id)
            .ok_or(EngineError::AppointmentNotFound(id))?;

        let allowed = match actor {
            Actor::Provider(p) => p == appt.provider_id,
            Actor::Customer(c) => appt.customer_id == Some(c),
        };
        if !allowed {
            return Err(EngineError::PermissionDenied(format!(
                "{actor} cannot cancel appointment {id}"
            )));
        }
        if appt.status != AppointmentStatus::InProgress {
            return Err(EngineError::InvalidTransition {
                id,
                status: appt.status,
            });
        }

        let event = Event::AppointmentCanceled {
            id,
            provider_id: appt.provider_id,
            actor,
            reason,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        guard
            .appointment(id)
            .cloned()
            .ok_or(EngineError::AppointmentNotFound(id))
    }

    /// Promote one appointment to finished. `Ok(false)` when it is no longer in progress.
    pub async fn finish_appointment(&self, id: Ulid) -> Result<bool, EngineError> {
        let mut guard = self.resolve_appointment_write(id).await?;
        let appt = guard
            .appointment(id)
            .ok_or(EngineError::AppointmentNotFound(id))?;
        if appt.status != AppointmentStatus::InProgress {
            return Ok(false);
        }
        let event = Event::AppointmentFinished {
            id,
            provider_id: appt.provider_id,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(true)
    }

    /// In-progress appointments whose start is at or before `now`.
    pub async fn collect_due_appointments(&self, now: Ms) -> Vec<Ulid> {
        let providers: Vec<SharedProviderState> =
            self.providers.iter().map(|e| e.value().clone()).collect();
        let mut due = Vec::new();
        for ps in providers {
            let guard = ps.read().await;
            due.extend(
                guard
                    .appointments
                    .iter()
                    .take_while(|a| a.span.start <= now)
                    .filter(|a| a.status == AppointmentStatus::InProgress)
                    .map(|a| a.id),
            );
        }
        due
    }
}

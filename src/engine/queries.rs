use chrono::{NaiveDate, NaiveTime};
use chrono_tz::Tz;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::timezone::{iso_weekday, local_to_utc, today_in};

use super::calendar::build_calendar;
use super::conflict::now_ms;
use super::scanner::scan_available_days;
use super::slots::generate_daily_slots;
use super::{Engine, EngineError};

fn slot_duration_ms(minutes: i64) -> Result<Ms, EngineError> {
    if !(MIN_SLOT_MINUTES..=MAX_SLOT_MINUTES).contains(&minutes) {
        return Err(EngineError::InvalidTimeInput(format!(
            "slot_duration must be {MIN_SLOT_MINUTES}..={MAX_SLOT_MINUTES} minutes, got {minutes}"
        )));
    }
    Ok(minutes * 60_000)
}

fn check_date_range(start: NaiveDate, end: NaiveDate) -> Result<(), EngineError> {
    if start > end {
        return Err(EngineError::InvalidDateRange(format!(
            "start_date {start} is after end_date {end}"
        )));
    }
    if (end - start).num_days() >= MAX_QUERY_DAYS {
        return Err(EngineError::LimitExceeded("date range too long"));
    }
    Ok(())
}

/// Absolute span covering every civil day in `[start, end]` for `tz`.
fn civil_range(tz: Tz, start: NaiveDate, end: NaiveDate) -> Span {
    let midnight = NaiveTime::MIN;
    let after = end.succ_opt().unwrap_or(end);
    Span::new(
        local_to_utc(tz, start, midnight),
        local_to_utc(tz, after, midnight),
    )
}

impl Engine {
    /// Free slots of `slot_minutes` on `date`, in the provider's zone.
    pub async fn daily_slots(
        &self,
        provider_id: ProviderId,
        date: NaiveDate,
        slot_minutes: i64,
    ) -> Result<DailySlots, EngineError> {
        let slot_ms = slot_duration_ms(slot_minutes)?;
        let ps = self.provider(provider_id)?;
        let guard = ps.read().await;
        if !guard.schedule.is_configured() {
            return Err(EngineError::ScheduleNotFound(provider_id));
        }
        let tz = guard.tz;
        let now = now_ms();
        let today = today_in(tz, now);
        if date < today {
            return Err(EngineError::InvalidDateRange(format!(
                "{date} is before today ({today})"
            )));
        }

        let window = guard.schedule.window_for(iso_weekday(date));
        let bookings: Vec<Span> = match window {
            Some((open, close)) => {
                let (s, e) = (local_to_utc(tz, date, open), local_to_utc(tz, date, close));
                if s < e {
                    guard
                        .active_overlapping(&Span::new(s, e))
                        .map(|a| a.span)
                        .collect()
                } else {
                    Vec::new()
                }
            }
            None => Vec::new(),
        };
        drop(guard);

        Ok(generate_daily_slots(tz, date, window, &bookings, slot_ms, now))
    }

    /// Dates in `[start, end]` with at least some unbooked opening time.
    pub async fn available_days(
        &self,
        provider_id: ProviderId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<NaiveDate>, EngineError> {
        check_date_range(start, end)?;
        let ps = self.provider(provider_id)?;
        let guard = ps.read().await;
        if !guard.schedule.is_configured() {
            return Err(EngineError::ScheduleNotFound(provider_id));
        }
        let tz = guard.tz;
        let schedule = guard.schedule.clone();
        let range = civil_range(tz, start, end);
        let bookings: Vec<Span> = guard.active_overlapping(&range).map(|a| a.span).collect();
        drop(guard);

        let today = today_in(tz, now_ms());
        Ok(scan_available_days(tz, &schedule, &bookings, start, end, today))
    }

    pub async fn calendar_events(
        &self,
        provider_id: ProviderId,
        start: NaiveDate,
        end: NaiveDate,
        slot_minutes: i64,
    ) -> Result<Calendar, EngineError> {
        let slot_ms = slot_duration_ms(slot_minutes)?;
        check_date_range(start, end)?;
        let ps = self.provider(provider_id)?;
        let guard = ps.read().await;
        if !guard.schedule.is_configured() {
            return Err(EngineError::ScheduleNotFound(provider_id));
        }
        let tz = guard.tz;
        let schedule = guard.schedule.clone();
        let range = civil_range(tz, start, end);
        let appointments: Vec<Appointment> = guard.active_overlapping(&range).cloned().collect();
        drop(guard);

        Ok(build_calendar(tz, &schedule, &appointments, start, end, slot_ms))
    }

    pub async fn weekly_schedule(
        &self,
        provider_id: ProviderId,
    ) -> Result<WeeklySchedule, EngineError> {
        let ps = self.provider(provider_id)?;
        let guard = ps.read().await;
        Ok(guard.schedule.clone())
    }

    /// Non-canceled appointments overlapping `span`, in start order.
    pub async fn bookings_in_range(
        &self,
        provider_id: ProviderId,
        span: Span,
    ) -> Result<Vec<Appointment>, EngineError> {
        let ps = self.provider(provider_id)?;
        let guard = ps.read().await;
        Ok(guard.active_overlapping(&span).cloned().collect())
    }

    pub async fn timezone(&self, provider_id: ProviderId) -> Result<Tz, EngineError> {
        let ps = self.provider(provider_id)?;
        Ok(ps.read().await.tz)
    }

    pub async fn provider_info(&self, provider_id: ProviderId) -> Result<ProviderInfo, EngineError> {
        let ps = self.provider(provider_id)?;
        let guard = ps.read().await;
        Ok(ProviderInfo {
            id: guard.id,
            name: guard.name.clone(),
            timezone: guard.tz.name().to_string(),
        })
    }

    /// All appointments of a provider, any status. A customer only sees its own.
    pub async fn list_appointments(
        &self,
        actor: Actor,
        provider_id: ProviderId,
    ) -> Result<Vec<Appointment>, EngineError> {
        let ps = self.provider(provider_id)?;
        let guard = ps.read().await;
        let visible = |a: &&Appointment| match actor {
            Actor::Provider(p) => p == provider_id,
            Actor::Customer(c) => a.customer_id == Some(c),
        };
        Ok(guard.appointments.iter().filter(visible).cloned().collect())
    }

    pub async fn get_appointment(&self, id: Ulid) -> Result<Appointment, EngineError> {
        let provider_id = self
            .indexes
            .appointments
            .get(&id)
            .map(|e| *e.value())
            .ok_or(EngineError::AppointmentNotFound(id))?;
        let ps = self.provider(provider_id)?;
        let guard = ps.read().await;
        guard
            .appointment(id)
            .cloned()
            .ok_or(EngineError::AppointmentNotFound(id))
    }

    /// Services offered by a provider, by id.
    pub async fn services(&self, provider_id: ProviderId) -> Result<Vec<Service>, EngineError> {
        let ps = self.provider(provider_id)?;
        let guard = ps.read().await;
        Ok(guard.services.values().cloned().collect())
    }
}

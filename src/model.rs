use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds (UTC). Every comparison in the engine happens on this type.
pub type Ms = i64;

pub type ProviderId = i64;
pub type CustomerId = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Length of the intersection, zero when disjoint.
    pub fn overlap_ms(&self, other: &Span) -> Ms {
        (self.end.min(other.end) - self.start.max(other.start)).max(0)
    }
}

/// Who is performing an operation. Always passed explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Actor {
    Provider(ProviderId),
    Customer(CustomerId),
}

impl Actor {
    /// Parses `provider_<id>` / `customer_<id>` login names.
    pub fn from_login(user: &str) -> Option<Actor> {
        if let Some(id) = user.strip_prefix("provider_") {
            id.parse().ok().map(Actor::Provider)
        } else if let Some(id) = user.strip_prefix("customer_") {
            id.parse().ok().map(Actor::Customer)
        } else {
            None
        }
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Actor::Provider(id) => write!(f, "provider_{id}"),
            Actor::Customer(id) => write!(f, "customer_{id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppointmentStatus {
    InProgress,
    Finished,
    Canceled,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::InProgress => "in_progress",
            AppointmentStatus::Finished => "finished",
            AppointmentStatus::Canceled => "canceled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Channel {
    PlatformBooking,
    ManualEntry,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::PlatformBooking => "platform_booking",
            Channel::ManualEntry => "manual_entry",
        }
    }
}

/// Display fields copied onto the appointment when it is booked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentDetails {
    pub service_name: Option<String>,
    /// Minor currency units.
    pub price: Option<i64>,
    pub currency: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub provider_id: ProviderId,
    pub customer_id: Option<CustomerId>,
    pub span: Span,
    pub status: AppointmentStatus,
    pub channel: Channel,
    pub is_blocked: bool,
    pub details: AppointmentDetails,
    pub cancel_reason: Option<String>,
    pub canceled_by: Option<Actor>,
}

impl Appointment {
    /// Canceled appointments no longer hold their interval.
    pub fn is_active(&self) -> bool {
        self.status != AppointmentStatus::Canceled
    }
}

/// One weekday's opening window in local time. `None` means closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayRule {
    pub open: Option<NaiveTime>,
    pub close: Option<NaiveTime>,
}

impl DayRule {
    pub const CLOSED: DayRule = DayRule { open: None, close: None };

    pub fn window(&self) -> Option<(NaiveTime, NaiveTime)> {
        match (self.open, self.close) {
            (Some(open), Some(close)) => Some((open, close)),
            _ => None,
        }
    }
}

/// Recurring weekly schedule keyed by ISO weekday (Monday = 1 .. Sunday = 7).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WeeklySchedule {
    pub days: BTreeMap<u8, DayRule>,
}

impl WeeklySchedule {
    pub fn is_configured(&self) -> bool {
        !self.days.is_empty()
    }

    /// The opening window for a weekday, `None` when closed or unset.
    pub fn window_for(&self, iso_weekday: u8) -> Option<(NaiveTime, NaiveTime)> {
        self.days.get(&iso_weekday).and_then(DayRule::window)
    }

    /// `[earliest open, latest close]` over every open weekday.
    pub fn global_window(&self) -> Option<(NaiveTime, NaiveTime)> {
        self.days
            .values()
            .filter_map(DayRule::window)
            .fold(None, |acc, (open, close)| match acc {
                None => Some((open, close)),
                Some((lo, hi)) => Some((lo.min(open), hi.max(close))),
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Ulid,
    pub provider_id: ProviderId,
    pub name: String,
    pub price: Option<i64>,
    pub currency: Option<String>,
}

/// Everything the engine knows about one provider.
#[derive(Debug, Clone)]
pub struct ProviderState {
    pub id: ProviderId,
    pub name: Option<String>,
    pub tz: Tz,
    pub schedule: WeeklySchedule,
    pub services: BTreeMap<Ulid, Service>,
    /// All appointments including canceled ones, sorted by `span.start`.
    pub appointments: Vec<Appointment>,
}

impl ProviderState {
    pub fn new(id: ProviderId, name: Option<String>, tz: Tz) -> Self {
        Self {
            id,
            name,
            tz,
            schedule: WeeklySchedule::default(),
            services: BTreeMap::new(),
            appointments: Vec::new(),
        }
    }

    /// Insert maintaining sort order by span.start.
    pub fn insert_appointment(&mut self, appointment: Appointment) {
        let pos = self
            .appointments
            .partition_point(|a| a.span.start <= appointment.span.start);
        self.appointments.insert(pos, appointment);
    }

    pub fn appointment_mut(&mut self, id: Ulid) -> Option<&mut Appointment> {
        self.appointments.iter_mut().find(|a| a.id == id)
    }

    pub fn appointment(&self, id: Ulid) -> Option<&Appointment> {
        self.appointments.iter().find(|a| a.id == id)
    }

    /// Appointments (any status) whose span overlaps the query window.
    /// Uses binary search to skip appointments starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Appointment> {
        let right_bound = self
            .appointments
            .partition_point(|a| a.span.start < query.end);
        self.appointments[..right_bound]
            .iter()
            .filter(move |a| a.span.end > query.start)
    }

    /// Non-canceled appointments overlapping the window, in start order.
    pub fn active_overlapping(&self, query: &Span) -> impl Iterator<Item = &Appointment> {
        self.overlapping(query).filter(|a| a.is_active())
    }
}

/// WAL record format. Flat, one variant per state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ProviderCreated {
        id: ProviderId,
        name: Option<String>,
        timezone: String,
    },
    ScheduleSet {
        provider_id: ProviderId,
        iso_weekday: u8,
        rule: DayRule,
    },
    ServiceUpserted {
        service: Service,
    },
    ServiceRemoved {
        id: Ulid,
        provider_id: ProviderId,
    },
    AppointmentBooked {
        appointment: Appointment,
    },
    AppointmentCanceled {
        id: Ulid,
        provider_id: ProviderId,
        actor: Actor,
        reason: Option<String>,
    },
    AppointmentFinished {
        id: Ulid,
        provider_id: ProviderId,
    },
}

impl Event {
    pub fn provider_id(&self) -> ProviderId {
        match self {
            Event::ProviderCreated { id, .. } => *id,
            Event::ScheduleSet { provider_id, .. }
            | Event::ServiceRemoved { provider_id, .. }
            | Event::AppointmentCanceled { provider_id, .. }
            | Event::AppointmentFinished { provider_id, .. } => *provider_id,
            Event::ServiceUpserted { service } => service.provider_id,
            Event::AppointmentBooked { appointment } => appointment.provider_id,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

/// A free, bookable slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub span: Span,
    pub start_local: DateTime<FixedOffset>,
    pub end_local: DateTime<FixedOffset>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailySlots {
    pub date: NaiveDate,
    pub is_closed: bool,
    pub slots: Vec<Slot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Free,
    Closed,
    Booked,
    Blocked,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Free => "free",
            EntryKind::Closed => "closed",
            EntryKind::Booked => "booked",
            EntryKind::Blocked => "blocked",
        }
    }

    pub fn is_unavailable(&self) -> bool {
        !matches!(self, EntryKind::Free)
    }
}

/// Booking metadata carried by booked / blocked calendar entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRef {
    pub appointment_id: Ulid,
    pub customer_id: Option<CustomerId>,
    pub channel: Channel,
    pub is_blocked: bool,
    pub details: AppointmentDetails,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarEntry {
    pub kind: EntryKind,
    pub span: Span,
    pub start_local: DateTime<FixedOffset>,
    pub end_local: DateTime<FixedOffset>,
    pub booking: Option<BookingRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarDay {
    pub date: NaiveDate,
    pub is_closed: bool,
    pub is_booked: bool,
    pub entries: Vec<CalendarEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Calendar {
    pub min_slot_time: Option<Ms>,
    pub max_slot_time: Option<Ms>,
    pub days: Vec<CalendarDay>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderInfo {
    pub id: ProviderId,
    pub name: Option<String>,
    pub timezone: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn appt(start: Ms, end: Ms, status: AppointmentStatus) -> Appointment {
        Appointment {
            id: Ulid::new(),
            provider_id: 1,
            customer_id: None,
            span: Span::new(start, end),
            status,
            channel: Channel::ManualEntry,
            is_blocked: false,
            details: AppointmentDetails::default(),
            cancel_reason: None,
            canceled_by: None,
        }
    }

    fn provider() -> ProviderState {
        ProviderState::new(1, None, Tz::UTC)
    }

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
        assert!(s.contains_span(&Span::new(100, 200)));
        assert!(!s.contains_span(&Span::new(50, 150)));
    }

    #[test]
    fn span_overlap_is_half_open() {
        let a = Span::new(100, 200);
        assert!(a.overlaps(&Span::new(150, 250)));
        assert!(!a.overlaps(&Span::new(200, 300)));
        assert_eq!(a.overlap_ms(&Span::new(150, 250)), 50);
        assert_eq!(a.overlap_ms(&Span::new(300, 400)), 0);
    }

    #[test]
    fn appointments_kept_sorted() {
        let mut p = provider();
        p.insert_appointment(appt(300, 400, AppointmentStatus::InProgress));
        p.insert_appointment(appt(100, 200, AppointmentStatus::InProgress));
        p.insert_appointment(appt(200, 300, AppointmentStatus::Finished));
        let starts: Vec<Ms> = p.appointments.iter().map(|a| a.span.start).collect();
        assert_eq!(starts, vec![100, 200, 300]);
    }

    #[test]
    fn overlapping_skips_past_and_future() {
        let mut p = provider();
        p.insert_appointment(appt(100, 200, AppointmentStatus::InProgress));
        p.insert_appointment(appt(450, 600, AppointmentStatus::InProgress));
        p.insert_appointment(appt(1000, 1100, AppointmentStatus::InProgress));
        let hits: Vec<_> = p.overlapping(&Span::new(500, 800)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span, Span::new(450, 600));
    }

    #[test]
    fn overlapping_adjacent_not_included() {
        let mut p = provider();
        p.insert_appointment(appt(100, 200, AppointmentStatus::InProgress));
        assert_eq!(p.overlapping(&Span::new(200, 300)).count(), 0);
    }

    #[test]
    fn active_overlapping_ignores_canceled() {
        let mut p = provider();
        p.insert_appointment(appt(100, 200, AppointmentStatus::Canceled));
        p.insert_appointment(appt(150, 250, AppointmentStatus::Finished));
        let hits: Vec<_> = p.active_overlapping(&Span::new(0, 1000)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].status, AppointmentStatus::Finished);
    }

    #[test]
    fn global_window_spans_widest_hours() {
        let t = |h| NaiveTime::from_hms_opt(h, 0, 0).unwrap();
        let mut s = WeeklySchedule::default();
        s.days.insert(1, DayRule { open: Some(t(9)), close: Some(t(17)) });
        s.days.insert(2, DayRule { open: Some(t(8)), close: Some(t(12)) });
        s.days.insert(3, DayRule::CLOSED);
        s.days.insert(6, DayRule { open: Some(t(10)), close: Some(t(20)) });
        assert_eq!(s.global_window(), Some((t(8), t(20))));
        assert_eq!(s.window_for(3), None);
        assert_eq!(s.window_for(7), None);
        assert!(s.is_configured());
        assert_eq!(WeeklySchedule::default().global_window(), None);
    }

    #[test]
    fn actor_login_names() {
        assert_eq!(Actor::from_login("provider_12"), Some(Actor::Provider(12)));
        assert_eq!(Actor::from_login("customer_7"), Some(Actor::Customer(7)));
        assert_eq!(Actor::from_login("postgres"), None);
        assert_eq!(Actor::from_login("provider_x"), None);
        assert_eq!(Actor::Customer(7).to_string(), "customer_7");
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::AppointmentBooked {
            appointment: appt(1_000, 2_000, AppointmentStatus::InProgress),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
        assert_eq!(decoded.provider_id(), 1);
    }

    #[test]
    fn schedule_event_roundtrip() {
        let event = Event::ScheduleSet {
            provider_id: 4,
            iso_weekday: 2,
            rule: DayRule {
                open: NaiveTime::from_hms_opt(9, 0, 0),
                close: NaiveTime::from_hms_opt(17, 30, 0),
            },
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}

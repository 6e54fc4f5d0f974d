use std::fmt::Debug;
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{AuthSource, DefaultServerParameterProvider, LoginInfo, Password, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::engine::{Engine, EngineError, ReserveRequest};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, SqlError};
use crate::timezone::{format_instant, parse_date, parse_instant, parse_time};

pub struct SlotdHandler {
    engine: Arc<Engine>,
    query_parser: Arc<SlotdQueryParser>,
}

impl SlotdHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(SlotdQueryParser),
        }
    }

    /// The acting identity is the connection's login name.
    fn actor<C: ClientInfo>(client: &C) -> PgWireResult<Actor> {
        let user = client.metadata().get("user").cloned().unwrap_or_default();
        Actor::from_login(&user).ok_or_else(|| {
            user_error(
                "42501",
                format!("login {user:?} is neither provider_<id> nor customer_<id>"),
            )
        })
    }

    async fn run<C: ClientInfo>(&self, client: &C, query: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let actor = Self::actor(client)?;
        let label = observability::command_label(&cmd);
        let started = std::time::Instant::now();

        let result = self.execute_command(actor, cmd).await;

        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result.map_err(|e| {
            tracing::debug!("{label} by {actor} failed: {e}");
            engine_err(e)
        })
    }

    async fn execute_command(&self, actor: Actor, cmd: Command) -> Result<Response, EngineError> {
        let engine = &self.engine;
        match cmd {
            Command::InsertProvider { id, name, timezone } => {
                engine.create_provider(actor, id, name, &timezone).await?;
                Ok(inserted())
            }
            Command::InsertSchedule {
                provider_id,
                day_of_week,
                open,
                close,
            } => {
                let open = open.as_deref().map(parse_time).transpose()?;
                let close = close.as_deref().map(parse_time).transpose()?;
                engine
                    .set_schedule_entry(actor, provider_id, day_of_week, open, close)
                    .await?;
                Ok(inserted())
            }
            Command::InsertService {
                id,
                provider_id,
                name,
                price,
                currency,
            } => {
                let service = Service {
                    id,
                    provider_id,
                    name,
                    price,
                    currency,
                };
                engine.upsert_service(actor, service).await?;
                Ok(inserted())
            }
            Command::DeleteService { id } => {
                engine.remove_service(actor, id).await?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::InsertAppointment {
                id,
                provider_id,
                customer_id,
                start,
                end,
                service_id,
                message,
                is_blocked,
            } => {
                let req = ReserveRequest {
                    id,
                    provider_id,
                    customer_id,
                    start: parse_instant(&start)?,
                    end: parse_instant(&end)?,
                    service_id,
                    message,
                    is_blocked,
                };
                engine.reserve(actor, req).await?;
                Ok(inserted())
            }
            Command::InsertCancellation {
                appointment_id,
                reason,
            } => {
                engine.cancel(actor, appointment_id, reason).await?;
                Ok(inserted())
            }
            Command::SelectDailySlots {
                provider_id,
                day,
                slot_duration,
            } => {
                let out = engine
                    .daily_slots(provider_id, parse_date(&day)?, slot_duration)
                    .await?;
                Ok(daily_slots_response(out))
            }
            Command::SelectAvailableDays {
                provider_id,
                start_date,
                end_date,
            } => {
                let days = engine
                    .available_days(provider_id, parse_date(&start_date)?, parse_date(&end_date)?)
                    .await?;
                Ok(query_response(available_days_schema(), days, |enc, day| {
                    enc.encode_field(&day.to_string())
                }))
            }
            Command::SelectCalendarEvents {
                provider_id,
                start_date,
                end_date,
                slot_duration,
            } => {
                let calendar = engine
                    .calendar_events(
                        provider_id,
                        parse_date(&start_date)?,
                        parse_date(&end_date)?,
                        slot_duration,
                    )
                    .await?;
                Ok(calendar_response(calendar))
            }
            Command::SelectAppointments { provider_id } => {
                let appointments = engine.list_appointments(actor, provider_id).await?;
                Ok(appointments_response(appointments))
            }
            Command::SelectAppointment { id } => {
                let appointment = engine.get_appointment(id).await?;
                let visible = match actor {
                    Actor::Provider(p) => p == appointment.provider_id,
                    Actor::Customer(c) => appointment.customer_id == Some(c),
                };
                if !visible {
                    return Err(EngineError::PermissionDenied(format!(
                        "{actor} cannot read appointment {id}"
                    )));
                }
                Ok(appointments_response(vec![appointment]))
            }
            Command::SelectSchedules { provider_id } => {
                let schedule = engine.weekly_schedule(provider_id).await?;
                Ok(query_response(schedules_schema(), schedule.days, |enc, (day, rule)| {
                    enc.encode_field(&provider_id)?;
                    enc.encode_field(&i64::from(day))?;
                    enc.encode_field(&rule.open.map(|t| t.format("%H:%M:%S").to_string()))?;
                    enc.encode_field(&rule.close.map(|t| t.format("%H:%M:%S").to_string()))
                }))
            }
            Command::SelectServices { provider_id } => {
                let services = engine.services(provider_id).await?;
                Ok(query_response(services_schema(), services, |enc, s| {
                    enc.encode_field(&s.id.to_string())?;
                    enc.encode_field(&s.provider_id)?;
                    enc.encode_field(&s.name)?;
                    enc.encode_field(&s.price)?;
                    enc.encode_field(&s.currency)
                }))
            }
            Command::SelectProvider { id } => {
                let info = engine.provider_info(id).await?;
                Ok(query_response(providers_schema(), [info], |enc, p| {
                    enc.encode_field(&p.id)?;
                    enc.encode_field(&p.name)?;
                    enc.encode_field(&p.timezone)
                }))
            }
        }
    }
}

fn inserted() -> Response {
    Response::Execution(Tag::new("INSERT").with_rows(1))
}

fn local(dt: &DateTime<FixedOffset>) -> String {
    dt.to_rfc3339()
}

// ── Result sets ──────────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn daily_slots_schema() -> Vec<FieldInfo> {
    vec![
        field("day", Type::VARCHAR),
        field("is_closed", Type::BOOL),
        field("start", Type::VARCHAR),
        field("end", Type::VARCHAR),
        field("start_local", Type::VARCHAR),
        field("end_local", Type::VARCHAR),
    ]
}

fn available_days_schema() -> Vec<FieldInfo> {
    vec![field("day", Type::VARCHAR)]
}

fn calendar_schema() -> Vec<FieldInfo> {
    vec![
        field("day", Type::VARCHAR),
        field("is_closed", Type::BOOL),
        field("is_booked", Type::BOOL),
        field("kind", Type::VARCHAR),
        field("start", Type::VARCHAR),
        field("end", Type::VARCHAR),
        field("start_local", Type::VARCHAR),
        field("end_local", Type::VARCHAR),
        field("appointment_id", Type::VARCHAR),
        field("customer_id", Type::INT8),
        field("channel", Type::VARCHAR),
        field("service_name", Type::VARCHAR),
        field("price", Type::INT8),
        field("currency", Type::VARCHAR),
        field("message", Type::VARCHAR),
        field("min_slot_time", Type::VARCHAR),
        field("max_slot_time", Type::VARCHAR),
    ]
}

fn appointments_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("provider_id", Type::INT8),
        field("customer_id", Type::INT8),
        field("start", Type::VARCHAR),
        field("end", Type::VARCHAR),
        field("status", Type::VARCHAR),
        field("channel", Type::VARCHAR),
        field("is_blocked", Type::BOOL),
        field("service_name", Type::VARCHAR),
        field("price", Type::INT8),
        field("currency", Type::VARCHAR),
        field("message", Type::VARCHAR),
        field("cancel_reason", Type::VARCHAR),
        field("canceled_by", Type::VARCHAR),
    ]
}

fn schedules_schema() -> Vec<FieldInfo> {
    vec![
        field("provider_id", Type::INT8),
        field("day_of_week", Type::INT8),
        field("open", Type::VARCHAR),
        field("close", Type::VARCHAR),
    ]
}

fn services_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("provider_id", Type::INT8),
        field("name", Type::VARCHAR),
        field("price", Type::INT8),
        field("currency", Type::VARCHAR),
    ]
}

fn providers_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::INT8),
        field("name", Type::VARCHAR),
        field("timezone", Type::VARCHAR),
    ]
}

/// Result schema for a statement, judged from the table after `FROM`.
fn schema_for(sql: &str) -> Vec<FieldInfo> {
    let lower = sql.to_lowercase();
    if !lower.trim_start().starts_with("select") {
        return Vec::new();
    }
    let mut words = lower.split_whitespace();
    let table = words
        .by_ref()
        .find(|w| *w == "from")
        .and_then(|_| words.next())
        .map(|t| t.trim_matches(|c| c == ';' || c == '"'));
    match table {
        Some("daily_slots") => daily_slots_schema(),
        Some("available_days") => available_days_schema(),
        Some("calendar_events") => calendar_schema(),
        Some("appointments") => appointments_schema(),
        Some("schedules") => schedules_schema(),
        Some("services") => services_schema(),
        Some("providers") => providers_schema(),
        _ => Vec::new(),
    }
}

fn query_response<T>(
    schema: Vec<FieldInfo>,
    items: impl IntoIterator<Item = T>,
    encode: impl Fn(&mut DataRowEncoder, T) -> PgWireResult<()>,
) -> Response {
    let schema = Arc::new(schema);
    let rows: Vec<PgWireResult<_>> = items
        .into_iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

/// A closed day is one row with `is_closed` set and no times.
fn daily_slots_response(out: DailySlots) -> Response {
    let day = out.date.to_string();
    if out.is_closed {
        return query_response(daily_slots_schema(), [()], |enc, ()| {
            enc.encode_field(&day)?;
            enc.encode_field(&true)?;
            for _ in 0..4 {
                enc.encode_field(&None::<String>)?;
            }
            Ok(())
        });
    }
    query_response(daily_slots_schema(), out.slots, |enc, slot| {
        enc.encode_field(&day)?;
        enc.encode_field(&false)?;
        enc.encode_field(&format_instant(slot.span.start))?;
        enc.encode_field(&format_instant(slot.span.end))?;
        enc.encode_field(&local(&slot.start_local))?;
        enc.encode_field(&local(&slot.end_local))
    })
}

/// One row per entry; a closed day is a single `day_closed` row without times.
fn calendar_response(calendar: Calendar) -> Response {
    let min = calendar.min_slot_time.map(format_instant);
    let max = calendar.max_slot_time.map(format_instant);

    let mut rows: Vec<(&CalendarDay, Option<&CalendarEntry>)> = Vec::new();
    for day in &calendar.days {
        if day.is_closed {
            rows.push((day, None));
        } else {
            rows.extend(day.entries.iter().map(|e| (day, Some(e))));
        }
    }

    query_response(calendar_schema(), rows, |enc, (day, entry)| {
        enc.encode_field(&day.date.to_string())?;
        enc.encode_field(&day.is_closed)?;
        enc.encode_field(&day.is_booked)?;
        match entry {
            None => {
                enc.encode_field(&"day_closed")?;
                for _ in 0..4 {
                    enc.encode_field(&None::<String>)?;
                }
            }
            Some(e) => {
                enc.encode_field(&e.kind.as_str())?;
                enc.encode_field(&format_instant(e.span.start))?;
                enc.encode_field(&format_instant(e.span.end))?;
                enc.encode_field(&local(&e.start_local))?;
                enc.encode_field(&local(&e.end_local))?;
            }
        }
        let booking = entry.and_then(|e| e.booking.as_ref());
        enc.encode_field(&booking.map(|b| b.appointment_id.to_string()))?;
        enc.encode_field(&booking.and_then(|b| b.customer_id))?;
        enc.encode_field(&booking.map(|b| b.channel.as_str()))?;
        enc.encode_field(&booking.and_then(|b| b.details.service_name.clone()))?;
        enc.encode_field(&booking.and_then(|b| b.details.price))?;
        enc.encode_field(&booking.and_then(|b| b.details.currency.clone()))?;
        enc.encode_field(&booking.and_then(|b| b.details.message.clone()))?;
        enc.encode_field(&min)?;
        enc.encode_field(&max)
    })
}

fn appointments_response(appointments: Vec<Appointment>) -> Response {
    query_response(appointments_schema(), appointments, |enc, a| {
        enc.encode_field(&a.id.to_string())?;
        enc.encode_field(&a.provider_id)?;
        enc.encode_field(&a.customer_id)?;
        enc.encode_field(&format_instant(a.span.start))?;
        enc.encode_field(&format_instant(a.span.end))?;
        enc.encode_field(&a.status.as_str())?;
        enc.encode_field(&a.channel.as_str())?;
        enc.encode_field(&a.is_blocked)?;
        enc.encode_field(&a.details.service_name)?;
        enc.encode_field(&a.details.price)?;
        enc.encode_field(&a.details.currency)?;
        enc.encode_field(&a.details.message)?;
        enc.encode_field(&a.cancel_reason)?;
        enc.encode_field(&a.canceled_by.map(|actor| actor.to_string()))
    })
}

#[async_trait]
impl SimpleQueryHandler for SlotdHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(vec![self.run(client, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct SlotdQueryParser;

#[async_trait]
impl QueryParser for SlotdQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(schema_for(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for SlotdHandler {
    type Statement = String;
    type QueryParser = SlotdQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(portal);
        self.run(client, &sql).await
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            schema_for(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(schema_for(
            &target.statement.statement,
        )))
    }
}

/// Highest `$N` placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if let Ok(n) = sql[start..i].parse::<usize>() {
            max = max.max(n);
        }
    }
    max
}

/// Inline bound text parameters as quoted literals. Highest index first so
/// `$1` never clobbers the prefix of `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut sql = portal.statement.statement.clone();
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        sql = sql.replace(&placeholder, &value);
    }
    sql
}

// ── Authentication ───────────────────────────────────────────────

/// One shared password; the login name must name a provider or a customer.
#[derive(Debug)]
pub struct SlotdAuthSource {
    password: String,
}

impl SlotdAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for SlotdAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        let user = login.user().as_deref().unwrap_or_default().to_string();
        if Actor::from_login(&user).is_none() {
            metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
            return Err(PgWireError::UserError(Box::new(ErrorInfo::new(
                "FATAL".into(),
                "28000".into(),
                format!("unknown login {user:?}: expected provider_<id> or customer_<id>"),
            ))));
        }
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

// ── Factory ──────────────────────────────────────────────────────

pub struct SlotdFactory {
    handler: Arc<SlotdHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<SlotdAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl SlotdFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        let auth_source = SlotdAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(SlotdHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for SlotdFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(SlotdFactory::new(engine, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

pub(crate) fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::SlotAlreadyBooked(_) | EngineError::CustomerAlreadyBooked(_) => "23P01",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::ProviderNotFound(_)
        | EngineError::AppointmentNotFound(_)
        | EngineError::ServiceNotFound(_)
        | EngineError::ScheduleNotFound(_) => "P0002",
        EngineError::PermissionDenied(_) => "42501",
        EngineError::InvalidTimeInput(_) | EngineError::InvalidDateRange(_) => "22023",
        EngineError::InvalidTransition { .. } => "55000",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(sqlstate(&e), e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn params_counted_by_highest_index() {
        assert_eq!(count_params("SELECT * FROM daily_slots WHERE provider_id = $1 AND day = $2"), 2);
        assert_eq!(count_params("SELECT $3, $12"), 12);
        assert_eq!(count_params("SELECT 1"), 0);
        assert_eq!(count_params("SELECT '$'"), 0);
    }

    #[test]
    fn schema_follows_table() {
        let names = |sql: &str| -> Vec<String> {
            schema_for(sql).iter().map(|f| f.name().to_string()).collect()
        };
        assert_eq!(names("select * from available_days where provider_id = $1"), vec!["day"]);
        assert_eq!(names("SELECT * FROM calendar_events WHERE provider_id = 1").len(), 17);
        assert_eq!(names("SELECT * FROM \"providers\";"), vec!["id", "name", "timezone"]);
        assert!(names("INSERT INTO providers VALUES (1, NULL, 'UTC')").is_empty());
    }

    #[test]
    fn sqlstates_by_error_class() {
        let id = Ulid::new();
        assert_eq!(sqlstate(&EngineError::SlotAlreadyBooked(id)), "23P01");
        assert_eq!(sqlstate(&EngineError::CustomerAlreadyBooked(id)), "23P01");
        assert_eq!(sqlstate(&EngineError::ScheduleNotFound(1)), "P0002");
        assert_eq!(sqlstate(&EngineError::PermissionDenied("x".into())), "42501");
        assert_eq!(sqlstate(&EngineError::InvalidTimeInput("x".into())), "22023");
        assert_eq!(sqlstate(&EngineError::LimitExceeded("x")), "54000");
        assert_eq!(sqlstate(&EngineError::WalError("x".into())), "58030");
    }
}

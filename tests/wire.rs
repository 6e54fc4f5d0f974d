use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{Datelike, Days, NaiveDate, Utc};
use tokio::net::TcpListener;
use tokio_test::assert_ok;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use slotd::engine::Engine;
use slotd::wire;

// ── Test infrastructure ──────────────────────────────────────

const PASSWORD: &str = "slotd";

async fn start_test_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("slotd_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let engine = Arc::new(Engine::new(dir.join("slotd.wal")).unwrap());

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = engine.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, engine, PASSWORD.to_string(), None).await;
            });
        }
    });

    addr
}

async fn try_connect(addr: SocketAddr, user: &str) -> Result<Client, tokio_postgres::Error> {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("slotd")
        .user(user)
        .password(PASSWORD);

    let (client, connection) = config.connect(NoTls).await?;
    tokio::spawn(async move {
        let _ = connection.await;
    });
    Ok(client)
}

async fn connect(addr: SocketAddr, user: &str) -> Client {
    try_connect(addr, user).await.unwrap()
}

async fn rows(client: &Client, sql: &str) -> Vec<SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(r) => Some(r),
            _ => None,
        })
        .collect()
}

async fn sqlstate(client: &Client, sql: &str) -> String {
    let err = client.batch_execute(sql).await.unwrap_err();
    err.as_db_error()
        .map(|db| db.code().code().to_string())
        .unwrap_or_else(|| panic!("expected a server error, got {err}"))
}

/// Provider 1 in UTC, open 09:00-17:00 on Mondays only.
async fn provider_with_monday_hours(addr: SocketAddr) -> Client {
    let provider = connect(addr, "provider_1").await;
    provider
        .batch_execute("INSERT INTO providers (id, name, timezone) VALUES (1, 'Clinic', 'UTC')")
        .await
        .unwrap();
    provider
        .batch_execute(
            "INSERT INTO schedules (provider_id, day_of_week, open, close) VALUES (1, 1, '09:00', '17:00')",
        )
        .await
        .unwrap();
    provider
}

/// The first Monday at least a week from today (UTC).
fn next_monday() -> NaiveDate {
    let week_out = Utc::now().date_naive() + Days::new(7);
    let to_monday = (7 - week_out.weekday().num_days_from_monday()) % 7;
    week_out + Days::new(u64::from(to_monday))
}

fn day(offset: u64) -> NaiveDate {
    next_monday() + Days::new(offset)
}

/// RFC 3339 instant at `hour:00` UTC on `date`.
fn at(date: NaiveDate, hour: u32) -> String {
    format!("{date}T{hour:02}:00:00Z")
}

fn book_sql(id: Ulid, start: &str, end: &str) -> String {
    format!(
        r#"INSERT INTO appointments (id, provider_id, start, "end") VALUES ('{id}', 1, '{start}', '{end}')"#
    )
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn unknown_login_is_rejected() {
    let addr = start_test_server().await;
    let err = try_connect(addr, "postgres").await.err().unwrap();
    let code = err.as_db_error().map(|db| db.code().code().to_string());
    assert_eq!(code.as_deref(), Some("28000"));
}

#[tokio::test]
async fn provider_setup_round_trip() {
    let addr = start_test_server().await;
    let provider = provider_with_monday_hours(addr).await;

    let info = rows(&provider, "SELECT * FROM providers WHERE id = 1").await;
    assert_eq!(info.len(), 1);
    assert_eq!(info[0].get("name"), Some("Clinic"));
    assert_eq!(info[0].get("timezone"), Some("UTC"));

    let schedule = rows(&provider, "SELECT * FROM schedules WHERE provider_id = 1").await;
    assert_eq!(schedule.len(), 1);
    assert_eq!(schedule[0].get("day_of_week"), Some("1"));
    assert_eq!(schedule[0].get("open"), Some("09:00:00"));
    assert_eq!(schedule[0].get("close"), Some("17:00:00"));

    let dup = "INSERT INTO providers (id, name, timezone) VALUES (1, NULL, 'UTC')";
    assert_eq!(sqlstate(&provider, dup).await, "23505");
}

#[tokio::test]
async fn customer_books_and_slot_disappears() {
    let addr = start_test_server().await;
    let _provider = provider_with_monday_hours(addr).await;
    let customer = connect(addr, "customer_5").await;

    let mon = day(0);
    let slots_sql = format!(
        "SELECT * FROM daily_slots WHERE provider_id = 1 AND day = '{mon}' AND slot_duration = 30"
    );
    let before = rows(&customer, &slots_sql).await;
    assert_eq!(before.len(), 16);
    assert_eq!(before[0].get("is_closed"), Some("f"));

    let id = Ulid::new();
    customer
        .batch_execute(&book_sql(id, &at(mon, 10), &at(mon, 11)))
        .await
        .unwrap();

    let after = rows(&customer, &slots_sql).await;
    assert_eq!(after.len(), 14);

    let mine = rows(&customer, &format!("SELECT * FROM appointments WHERE id = '{id}'")).await;
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].get("customer_id"), Some("5"));
    assert_eq!(mine[0].get("status"), Some("in_progress"));
    assert_eq!(mine[0].get("channel"), Some("platform_booking"));
}

#[tokio::test]
async fn closed_day_is_a_single_row() {
    let addr = start_test_server().await;
    let _provider = provider_with_monday_hours(addr).await;
    let customer = connect(addr, "customer_5").await;

    let tuesday = rows(
        &customer,
        &format!(
            "SELECT * FROM daily_slots WHERE provider_id = 1 AND day = '{}' AND slot_duration = 30",
            day(1)
        ),
    )
    .await;
    assert_eq!(tuesday.len(), 1);
    assert_eq!(tuesday[0].get("is_closed"), Some("t"));
    assert_eq!(tuesday[0].get("start"), None);
}

#[tokio::test]
async fn conflicts_map_to_exclusion_violation() {
    let addr = start_test_server().await;
    let _provider = provider_with_monday_hours(addr).await;
    let alice = connect(addr, "customer_5").await;
    let bob = connect(addr, "customer_6").await;

    let mon = day(0);
    alice
        .batch_execute(&book_sql(Ulid::new(), &at(mon, 10), &at(mon, 11)))
        .await
        .unwrap();
    let clash = book_sql(Ulid::new(), &format!("{mon}T10:30:00Z"), &format!("{mon}T11:30:00Z"));
    assert_eq!(sqlstate(&bob, &clash).await, "23P01");
}

#[tokio::test]
async fn error_codes_for_bad_requests() {
    let addr = start_test_server().await;
    let provider = provider_with_monday_hours(addr).await;
    let customer = connect(addr, "customer_5").await;

    // Customers cannot touch provider configuration.
    let sql = "INSERT INTO schedules (provider_id, day_of_week, open, close) VALUES (1, 2, '09:00', '17:00')";
    assert_eq!(sqlstate(&customer, sql).await, "42501");

    let sql = "SELECT * FROM daily_slots WHERE provider_id = 1 AND day = 'someday' AND slot_duration = 30";
    assert_eq!(sqlstate(&customer, sql).await, "22023");

    let sql = format!(
        "SELECT * FROM daily_slots WHERE provider_id = 99 AND day = '{}' AND slot_duration = 30",
        day(0)
    );
    assert_eq!(sqlstate(&customer, &sql).await, "P0002");

    let sql = format!(
        "SELECT * FROM available_days WHERE provider_id = 1 AND start_date = '{}' AND end_date = '{}'",
        day(25),
        day(0)
    );
    assert_eq!(sqlstate(&customer, &sql).await, "22023");

    let sql = "UPDATE providers SET name = 'x' WHERE id = 1";
    assert_eq!(sqlstate(&provider, sql).await, "42601");
}

#[tokio::test]
async fn cancellation_flow() {
    let addr = start_test_server().await;
    let provider = provider_with_monday_hours(addr).await;
    let customer = connect(addr, "customer_5").await;
    let stranger = connect(addr, "customer_6").await;

    let id = Ulid::new();
    customer
        .batch_execute(&book_sql(id, &at(day(0), 13), &at(day(0), 14)))
        .await
        .unwrap();

    let cancel = format!("INSERT INTO cancellations (appointment_id, reason) VALUES ('{id}', 'moved')");
    assert_eq!(sqlstate(&stranger, &cancel).await, "42501");
    assert_ok!(customer.batch_execute(&cancel).await);
    assert_eq!(sqlstate(&customer, &cancel).await, "55000");

    let listed = rows(&provider, "SELECT * FROM appointments WHERE provider_id = 1").await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].get("status"), Some("canceled"));
    assert_eq!(listed[0].get("cancel_reason"), Some("moved"));
    assert_eq!(listed[0].get("canceled_by"), Some("customer_5"));

    // The stranger sees none of it.
    let theirs = rows(&stranger, "SELECT * FROM appointments WHERE provider_id = 1").await;
    assert!(theirs.is_empty());
}

#[tokio::test]
async fn calendar_and_available_days_over_the_wire() {
    let addr = start_test_server().await;
    let provider = provider_with_monday_hours(addr).await;

    let (mon, tue) = (day(0), day(1));
    provider
        .batch_execute(&format!(
            r#"INSERT INTO appointments (id, provider_id, start, "end", is_blocked) VALUES ('{}', 1, '{}', '{}', true)"#,
            Ulid::new(),
            at(mon, 9),
            at(mon, 17)
        ))
        .await
        .unwrap();

    let days = rows(
        &provider,
        &format!(
            "SELECT * FROM available_days WHERE provider_id = 1 AND start_date = '{mon}' AND end_date = '{}'",
            day(13)
        ),
    )
    .await;
    let days: Vec<&str> = days.iter().filter_map(|r| r.get("day")).collect();
    assert_eq!(days, vec![day(7).to_string()]);

    let calendar = rows(
        &provider,
        &format!(
            "SELECT * FROM calendar_events WHERE provider_id = 1 AND start_date = '{mon}' AND end_date = '{tue}' AND slot_duration = 60"
        ),
    )
    .await;
    assert_eq!(calendar.len(), 2);
    assert_eq!(calendar[0].get("kind"), Some("blocked"));
    assert_eq!(calendar[0].get("is_booked"), Some("t"));
    assert_eq!(calendar[0].get("channel"), Some("manual_entry"));
    assert_eq!(calendar[1].get("kind"), Some("day_closed"));
    assert_eq!(calendar[1].get("day"), Some(tue.to_string().as_str()));
}

#[tokio::test]
async fn services_snapshot_onto_appointments() {
    let addr = start_test_server().await;
    let provider = provider_with_monday_hours(addr).await;
    let customer = connect(addr, "customer_5").await;

    let service = Ulid::new();
    provider
        .batch_execute(&format!(
            "INSERT INTO services (id, provider_id, name, price, currency) VALUES ('{service}', 1, 'Massage', 4000, 'EUR')"
        ))
        .await
        .unwrap();

    let id = Ulid::new();
    customer
        .batch_execute(&format!(
            r#"INSERT INTO appointments (id, provider_id, start, "end", service_id, message) VALUES ('{id}', 1, '{}', '{}', '{service}', 'back pain')"#,
            at(day(0), 15),
            at(day(0), 16)
        ))
        .await
        .unwrap();

    assert_ok!(
        provider
            .batch_execute(&format!("DELETE FROM services WHERE id = '{service}'"))
            .await
    );
    assert!(rows(&provider, "SELECT * FROM services WHERE provider_id = 1").await.is_empty());

    let row = rows(&customer, &format!("SELECT * FROM appointments WHERE id = '{id}'")).await;
    assert_eq!(row[0].get("service_name"), Some("Massage"));
    assert_eq!(row[0].get("price"), Some("4000"));
    assert_eq!(row[0].get("currency"), Some("EUR"));
    assert_eq!(row[0].get("message"), Some("back pain"));
}

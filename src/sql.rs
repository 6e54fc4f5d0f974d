use std::collections::HashMap;

use sqlparser::ast::{
    self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::{CustomerId, ProviderId};

/// Parsed command from SQL input.
///
/// Dates, times and instants are kept as the client's strings; the wire layer
/// parses them so a malformed value surfaces as a time-input error rather
/// than a syntax error.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertProvider {
        id: ProviderId,
        name: Option<String>,
        timezone: String,
    },
    InsertSchedule {
        provider_id: ProviderId,
        day_of_week: i64,
        open: Option<String>,
        close: Option<String>,
    },
    InsertService {
        id: Ulid,
        provider_id: ProviderId,
        name: String,
        price: Option<i64>,
        currency: Option<String>,
    },
    DeleteService {
        id: Ulid,
    },
    InsertAppointment {
        id: Ulid,
        provider_id: ProviderId,
        customer_id: Option<CustomerId>,
        start: String,
        end: String,
        service_id: Option<Ulid>,
        message: Option<String>,
        is_blocked: bool,
    },
    InsertCancellation {
        appointment_id: Ulid,
        reason: Option<String>,
    },
    SelectDailySlots {
        provider_id: ProviderId,
        day: String,
        slot_duration: i64,
    },
    SelectAvailableDays {
        provider_id: ProviderId,
        start_date: String,
        end_date: String,
    },
    SelectCalendarEvents {
        provider_id: ProviderId,
        start_date: String,
        end_date: String,
        slot_duration: i64,
    },
    SelectAppointments {
        provider_id: ProviderId,
    },
    SelectAppointment {
        id: Ulid,
    },
    SelectSchedules {
        provider_id: ProviderId,
    },
    SelectServices {
        provider_id: ProviderId,
    },
    SelectProvider {
        id: ProviderId,
    },
}

const PROVIDER_COLUMNS: &[&str] = &["id", "name", "timezone"];
const SCHEDULE_COLUMNS: &[&str] = &["provider_id", "day_of_week", "open", "close"];
const SERVICE_COLUMNS: &[&str] = &["id", "provider_id", "name", "price", "currency"];
const APPOINTMENT_COLUMNS: &[&str] = &[
    "id",
    "provider_id",
    "customer_id",
    "start",
    "end",
    "service_id",
    "message",
    "is_blocked",
];
const CANCELLATION_COLUMNS: &[&str] = &["appointment_id", "reason"];

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let canonical = match table.as_str() {
        "providers" => PROVIDER_COLUMNS,
        "schedules" => SCHEDULE_COLUMNS,
        "services" => SERVICE_COLUMNS,
        "appointments" => APPOINTMENT_COLUMNS,
        "cancellations" => CANCELLATION_COLUMNS,
        _ => return Err(SqlError::UnknownTable(table)),
    };
    let row = Row::from_insert(insert, canonical)?;

    match table.as_str() {
        "providers" => Ok(Command::InsertProvider {
            id: row.i64("id")?,
            name: row.string_or_null("name")?,
            timezone: row.string("timezone")?,
        }),
        "schedules" => Ok(Command::InsertSchedule {
            provider_id: row.i64("provider_id")?,
            day_of_week: row.i64("day_of_week")?,
            open: row.string_or_null("open")?,
            close: row.string_or_null("close")?,
        }),
        "services" => Ok(Command::InsertService {
            id: row.ulid("id")?,
            provider_id: row.i64("provider_id")?,
            name: row.string("name")?,
            price: row.i64_or_null("price")?,
            currency: row.string_or_null("currency")?,
        }),
        "appointments" => Ok(Command::InsertAppointment {
            id: row.ulid("id")?,
            provider_id: row.i64("provider_id")?,
            customer_id: row.i64_or_null("customer_id")?,
            start: row.string("start")?,
            end: row.string("end")?,
            service_id: row.ulid_or_null("service_id")?,
            message: row.string_or_null("message")?,
            is_blocked: row.bool_or_default("is_blocked")?,
        }),
        _ => Ok(Command::InsertCancellation {
            appointment_id: row.ulid("appointment_id")?,
            reason: row.string_or_null("reason")?,
        }),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let filters = Filters::from_selection(delete.selection.as_ref())?;

    match table.as_str() {
        "services" => Ok(Command::DeleteService {
            id: filters.ulid("id")?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;
    let filters = Filters::from_selection(select.selection.as_ref())?;

    match table.as_str() {
        "daily_slots" => Ok(Command::SelectDailySlots {
            provider_id: filters.i64("provider_id")?,
            day: filters.string("day")?,
            slot_duration: filters.i64("slot_duration")?,
        }),
        "available_days" => Ok(Command::SelectAvailableDays {
            provider_id: filters.i64("provider_id")?,
            start_date: filters.string("start_date")?,
            end_date: filters.string("end_date")?,
        }),
        "calendar_events" => Ok(Command::SelectCalendarEvents {
            provider_id: filters.i64("provider_id")?,
            start_date: filters.string("start_date")?,
            end_date: filters.string("end_date")?,
            slot_duration: filters.i64("slot_duration")?,
        }),
        "appointments" if filters.has("id") => Ok(Command::SelectAppointment {
            id: filters.ulid("id")?,
        }),
        "appointments" => Ok(Command::SelectAppointments {
            provider_id: filters.i64("provider_id")?,
        }),
        "schedules" => Ok(Command::SelectSchedules {
            provider_id: filters.i64("provider_id")?,
        }),
        "services" => Ok(Command::SelectServices {
            provider_id: filters.i64("provider_id")?,
        }),
        "providers" => Ok(Command::SelectProvider {
            id: filters.i64("id")?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── Column access ─────────────────────────────────────────────

/// One VALUES row keyed by column name. Without an explicit column list the
/// table's canonical order applies.
struct Row {
    values: HashMap<String, Expr>,
}

impl Row {
    fn from_insert(insert: &ast::Insert, canonical: &[&str]) -> Result<Self, SqlError> {
        let exprs = extract_insert_values(insert)?;
        let names: Vec<String> = if insert.columns.is_empty() {
            canonical.iter().map(|c| c.to_string()).collect()
        } else {
            insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
        };
        if exprs.len() > names.len() {
            return Err(SqlError::WrongArity(names.len(), exprs.len()));
        }
        if let Some(unknown) = names.iter().find(|n| !canonical.contains(&n.as_str())) {
            return Err(SqlError::UnknownColumn(unknown.clone()));
        }
        Ok(Self {
            values: names.into_iter().zip(exprs).collect(),
        })
    }

    fn get(&self, col: &'static str) -> Result<&Expr, SqlError> {
        self.values.get(col).ok_or(SqlError::MissingColumn(col))
    }

    fn opt(&self, col: &str) -> Option<&Expr> {
        self.values.get(col).filter(|e| !is_null(e))
    }

    fn i64(&self, col: &'static str) -> Result<i64, SqlError> {
        parse_i64_expr(self.get(col)?)
    }

    fn string(&self, col: &'static str) -> Result<String, SqlError> {
        parse_string_expr(self.get(col)?)
    }

    fn ulid(&self, col: &'static str) -> Result<Ulid, SqlError> {
        parse_ulid_expr(self.get(col)?)
    }

    fn i64_or_null(&self, col: &str) -> Result<Option<i64>, SqlError> {
        self.opt(col).map(parse_i64_expr).transpose()
    }

    fn string_or_null(&self, col: &str) -> Result<Option<String>, SqlError> {
        self.opt(col).map(parse_string_expr).transpose()
    }

    fn ulid_or_null(&self, col: &str) -> Result<Option<Ulid>, SqlError> {
        self.opt(col).map(parse_ulid_expr).transpose()
    }

    fn bool_or_default(&self, col: &str) -> Result<bool, SqlError> {
        Ok(self.opt(col).map(parse_bool).transpose()?.unwrap_or(false))
    }
}

/// `col = value` pairs from a WHERE clause made of AND-ed equalities.
struct Filters {
    eq: HashMap<String, Expr>,
}

impl Filters {
    fn from_selection(selection: Option<&Expr>) -> Result<Self, SqlError> {
        let mut eq = HashMap::new();
        if let Some(expr) = selection {
            collect_equalities(expr, &mut eq)?;
        }
        Ok(Self { eq })
    }

    fn has(&self, col: &str) -> bool {
        self.eq.contains_key(col)
    }

    fn get(&self, col: &'static str) -> Result<&Expr, SqlError> {
        self.eq.get(col).ok_or(SqlError::MissingFilter(col))
    }

    fn i64(&self, col: &'static str) -> Result<i64, SqlError> {
        parse_i64_expr(self.get(col)?)
    }

    fn string(&self, col: &'static str) -> Result<String, SqlError> {
        parse_string_expr(self.get(col)?)
    }

    fn ulid(&self, col: &'static str) -> Result<Ulid, SqlError> {
        parse_ulid_expr(self.get(col)?)
    }
}

fn collect_equalities(expr: &Expr, eq: &mut HashMap<String, Expr>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_equalities(inner, eq),
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                collect_equalities(left, eq)?;
                collect_equalities(right, eq)
            }
            ast::BinaryOperator::Eq => {
                let col = expr_column_name(left)
                    .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
                eq.insert(col, right.as_ref().clone());
                Ok(())
            }
            other => Err(SqlError::Unsupported(format!("operator {other} in WHERE"))),
        },
        other => Err(SqlError::Unsupported(format!("WHERE {other}"))),
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    match tables_with_joins.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [row] => Ok(row.clone()),
            [] => Err(SqlError::Parse("empty VALUES".into())),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

fn parse_string_expr(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_string_expr(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID {s:?}: {e}")))
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    match extract_value(expr) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(true),
            "false" | "f" | "0" => Ok(false),
            _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
        },
        Some(Value::Number(n, _)) => Ok(n != "0"),
        Some(value) => Err(SqlError::Parse(format!("expected bool, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("unknown column: {0}")]
    UnknownColumn(String),
    #[error("expected at most {0} values, got {1}")]
    WrongArity(usize, usize),
    #[error("missing column: {0}")]
    MissingColumn(&'static str),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
}

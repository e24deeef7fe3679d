use chrono::NaiveDate;
use sqlparser::ast::{
    self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::limits::MAX_SCHEDULE_JSON_LEN;
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    PublishSchedule {
        center_id: Ulid,
        date: NaiveDate,
        closed: bool,
        entries: Vec<StaffEntry>,
    },
    InsertBlock {
        id: Ulid,
        center_id: Ulid,
        date: NaiveDate,
        staff_id: Option<Ulid>,
        start: Minutes,
        end: Minutes,
        reason: String,
        recurrence: Option<Recurrence>,
    },
    DeleteBlock {
        id: Ulid,
    },
    InsertAppointment {
        id: Ulid,
        center_id: Ulid,
        date: NaiveDate,
        start: Minutes,
        staff_id: Option<Ulid>,
        control: ControlType,
        vehicle: VehicleType,
        fuel: FuelType,
        actor: Option<String>,
    },
    Reschedule {
        id: Ulid,
        new_date: NaiveDate,
        new_start: Minutes,
        new_center: Option<Ulid>,
        new_staff: Option<Ulid>,
        reason: Option<String>,
    },
    Transition {
        id: Ulid,
        action: TransitionAction,
    },
    SelectAvailability {
        center_id: Ulid,
        date: NaiveDate,
        control: ControlType,
        vehicle: VehicleType,
        fuel: FuelType,
    },
    SelectAvailableDates {
        center_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
        control: ControlType,
        vehicle: Option<VehicleType>,
        fuel: Option<FuelType>,
    },
    SelectAppointments {
        center_id: Ulid,
        date: NaiveDate,
    },
    SelectHistory {
        appointment_id: Ulid,
    },
    Listen {
        channel: String,
    },
}

/// Status updates map one-to-one onto lifecycle triggers.
#[derive(Debug, PartialEq)]
pub enum TransitionAction {
    Confirm { staff_id: Option<Ulid> },
    Remind,
    Start,
    Complete {
        result: ResultCode,
        recheck_due: Option<NaiveDate>,
    },
    Cancel { reason: String },
    NoShow,
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim();
    if trimmed.to_uppercase().starts_with("LISTEN ") {
        let channel = trimmed[7..].trim().trim_matches(';').to_string();
        return Ok(Command::Listen { channel });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "schedules" => {
            if values.len() < 2 {
                return Err(SqlError::WrongArity("schedules", 2, values.len()));
            }
            let center_id = parse_ulid(&values[0])?;
            let date = parse_date(&values[1])?;
            let closed = if values.len() >= 3 {
                parse_bool(&values[2])?
            } else {
                false
            };
            let entries = if values.len() >= 4 {
                parse_staff_json(&values[3])?
            } else {
                Vec::new()
            };
            Ok(Command::PublishSchedule {
                center_id,
                date,
                closed,
                entries,
            })
        }
        "blocks" => {
            if values.len() < 7 {
                return Err(SqlError::WrongArity("blocks", 7, values.len()));
            }
            Ok(Command::InsertBlock {
                id: parse_ulid(&values[0])?,
                center_id: parse_ulid(&values[1])?,
                date: parse_date(&values[2])?,
                staff_id: parse_ulid_or_null(&values[3])?,
                start: parse_minutes(&values[4])?,
                end: parse_minutes(&values[5])?,
                reason: parse_string(&values[6])?,
                recurrence: if values.len() >= 8 {
                    parse_recurrence_or_null(&values[7])?
                } else {
                    None
                },
            })
        }
        "appointments" => {
            if values.len() < 8 {
                return Err(SqlError::WrongArity("appointments", 8, values.len()));
            }
            Ok(Command::InsertAppointment {
                id: parse_ulid(&values[0])?,
                center_id: parse_ulid(&values[1])?,
                date: parse_date(&values[2])?,
                start: parse_minutes(&values[3])?,
                staff_id: parse_ulid_or_null(&values[4])?,
                control: parse_control(&values[5])?,
                vehicle: parse_vehicle(&values[6])?,
                fuel: parse_fuel(&values[7])?,
                actor: if values.len() >= 9 {
                    parse_string_or_null(&values[8])?
                } else {
                    None
                },
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    if table != "appointments" {
        return Err(SqlError::UnknownTable(table));
    }
    let id = extract_where_id(selection)?;

    let mut set: Vec<(String, &Expr)> = Vec::new();
    for a in assignments {
        let col = assignment_column(a)?;
        set.push((col, &a.value));
    }
    let get = |name: &str| set.iter().find(|(c, _)| c == name).map(|(_, e)| *e);

    if let Some(status_expr) = get("status") {
        let status_str = parse_string(status_expr)?;
        let status = AppointmentStatus::parse(&status_str)
            .ok_or_else(|| SqlError::Parse(format!("unknown status: {status_str}")))?;
        let action = match status {
            AppointmentStatus::Confirmed => TransitionAction::Confirm {
                staff_id: match get("staff_id") {
                    Some(e) => parse_ulid_or_null(e)?,
                    None => None,
                },
            },
            AppointmentStatus::Reminded => TransitionAction::Remind,
            AppointmentStatus::InProgress => TransitionAction::Start,
            AppointmentStatus::Completed => {
                let result_expr = get("result")
                    .ok_or(SqlError::MissingFilter("result"))?;
                let result_str = parse_string(result_expr)?;
                let result = ResultCode::parse(&result_str)
                    .ok_or_else(|| SqlError::Parse(format!("unknown result: {result_str}")))?;
                TransitionAction::Complete {
                    result,
                    recheck_due: match get("recheck_due") {
                        Some(e) => Some(parse_date(e)?),
                        None => None,
                    },
                }
            }
            AppointmentStatus::Cancelled => TransitionAction::Cancel {
                reason: match get("reason") {
                    Some(e) => parse_string(e)?,
                    None => return Err(SqlError::MissingFilter("reason")),
                },
            },
            AppointmentStatus::NoShow => TransitionAction::NoShow,
            other => {
                return Err(SqlError::Unsupported(format!(
                    "cannot set status to {other} directly"
                )));
            }
        };
        return Ok(Command::Transition { id, action });
    }

    // No status assignment: a reschedule needs at least the new date + start
    let new_date = parse_date(get("date").ok_or(SqlError::MissingFilter("date"))?)?;
    let new_start = parse_minutes(get("start").ok_or(SqlError::MissingFilter("start"))?)?;
    Ok(Command::Reschedule {
        id,
        new_date,
        new_start,
        new_center: match get("center_id") {
            Some(e) => Some(parse_ulid(e)?),
            None => None,
        },
        new_staff: match get("staff_id") {
            Some(e) => parse_ulid_or_null(e)?,
            None => None,
        },
        reason: match get("reason") {
            Some(e) => parse_string_or_null(e)?,
            None => None,
        },
    })
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    match table.as_str() {
        "blocks" => {
            let id = extract_where_id(&delete.selection)?;
            Ok(Command::DeleteBlock { id })
        }
        "appointments" => Err(SqlError::Unsupported(
            "appointments are never deleted; cancel instead".into(),
        )),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    let mut filters = Filters::default();
    if let Some(selection) = &select.selection {
        collect_filters(selection, &mut filters)?;
    }

    match table.as_str() {
        "availability" => Ok(Command::SelectAvailability {
            center_id: filters.center_id.ok_or(SqlError::MissingFilter("center_id"))?,
            date: filters.date.ok_or(SqlError::MissingFilter("date"))?,
            control: filters.control.ok_or(SqlError::MissingFilter("control"))?,
            vehicle: filters.vehicle.ok_or(SqlError::MissingFilter("vehicle"))?,
            fuel: filters.fuel.ok_or(SqlError::MissingFilter("fuel"))?,
        }),
        "available_dates" => Ok(Command::SelectAvailableDates {
            center_id: filters.center_id.ok_or(SqlError::MissingFilter("center_id"))?,
            from: filters.date_from.ok_or(SqlError::MissingFilter("date >="))?,
            to: filters.date_to.ok_or(SqlError::MissingFilter("date <="))?,
            control: filters.control.ok_or(SqlError::MissingFilter("control"))?,
            vehicle: filters.vehicle,
            fuel: filters.fuel,
        }),
        "appointments" => Ok(Command::SelectAppointments {
            center_id: filters.center_id.ok_or(SqlError::MissingFilter("center_id"))?,
            date: filters.date.ok_or(SqlError::MissingFilter("date"))?,
        }),
        "history" => Ok(Command::SelectHistory {
            appointment_id: filters
                .appointment_id
                .ok_or(SqlError::MissingFilter("appointment_id"))?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

#[derive(Default)]
struct Filters {
    center_id: Option<Ulid>,
    appointment_id: Option<Ulid>,
    date: Option<NaiveDate>,
    date_from: Option<NaiveDate>,
    date_to: Option<NaiveDate>,
    control: Option<ControlType>,
    vehicle: Option<VehicleType>,
    fuel: Option<FuelType>,
}

fn collect_filters(expr: &Expr, filters: &mut Filters) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                collect_filters(left, filters)?;
                collect_filters(right, filters)?;
            }
            ast::BinaryOperator::Eq => match expr_column_name(left).as_deref() {
                Some("center_id") => filters.center_id = Some(parse_ulid(right)?),
                Some("appointment_id") => filters.appointment_id = Some(parse_ulid(right)?),
                Some("date") => filters.date = Some(parse_date(right)?),
                Some("control") => filters.control = Some(parse_control(right)?),
                Some("vehicle") => filters.vehicle = Some(parse_vehicle(right)?),
                Some("fuel") => filters.fuel = Some(parse_fuel(right)?),
                _ => {}
            },
            ast::BinaryOperator::GtEq => {
                if expr_column_name(left).as_deref() == Some("date") {
                    filters.date_from = Some(parse_date(right)?);
                }
            }
            ast::BinaryOperator::LtEq => {
                if expr_column_name(left).as_deref() == Some("date") {
                    filters.date_to = Some(parse_date(right)?);
                }
            }
            _ => {}
        }
    }
    Ok(())
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
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
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
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            if values.rows.len() > 1 {
                return Err(SqlError::Unsupported("multi-row INSERT".into()));
            }
            Ok(values.rows[0].clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn assignment_column(a: &ast::Assignment) -> Result<String, SqlError> {
    match &a.target {
        ast::AssignmentTarget::ColumnName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))
        }
        _ => Err(SqlError::Parse("unsupported assignment target".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if expr_column_name(left).as_deref() == Some("id") {
                parse_ulid(right)
            } else {
                Err(SqlError::MissingFilter("id"))
            }
        }
        _ => Err(SqlError::MissingFilter("id")),
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

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) => Ok(s.clone()),
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        return Ok(None);
    }
    parse_string(expr).map(Some)
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_string(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
}

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        return Ok(None);
    }
    parse_ulid(expr).map(Some)
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    NaiveDate::parse_from_str(&s, "%Y-%m-%d")
        .map_err(|e| SqlError::Parse(format!("bad date {s:?}: {e}")))
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad number: {e}"))),
            Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad number: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

/// Minutes since midnight, range-checked to one day.
fn parse_minutes(expr: &Expr) -> Result<Minutes, SqlError> {
    let v = parse_i64(expr)?;
    if !(0..=DAY_MINUTES as i64).contains(&v) {
        return Err(SqlError::Parse(format!("{v} outside 0..{DAY_MINUTES} minutes")));
    }
    Ok(v as Minutes)
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(n != "0"),
            _ => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_control(expr: &Expr) -> Result<ControlType, SqlError> {
    let s = parse_string(expr)?;
    ControlType::parse(&s).ok_or_else(|| SqlError::Parse(format!("unknown control type: {s}")))
}

fn parse_vehicle(expr: &Expr) -> Result<VehicleType, SqlError> {
    let s = parse_string(expr)?;
    VehicleType::parse(&s).ok_or_else(|| SqlError::Parse(format!("unknown vehicle type: {s}")))
}

fn parse_fuel(expr: &Expr) -> Result<FuelType, SqlError> {
    let s = parse_string(expr)?;
    FuelType::parse(&s).ok_or_else(|| SqlError::Parse(format!("unknown fuel type: {s}")))
}

fn parse_recurrence_or_null(expr: &Expr) -> Result<Option<Recurrence>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        return Ok(None);
    }
    let s = parse_string(expr)?;
    Recurrence::parse(&s)
        .map(Some)
        .ok_or_else(|| SqlError::Parse(format!("unknown recurrence: {s}")))
}

/// The `staff` column of a schedule publish is a JSON array of entries.
fn parse_staff_json(expr: &Expr) -> Result<Vec<StaffEntry>, SqlError> {
    let s = parse_string(expr)?;
    if s.len() > MAX_SCHEDULE_JSON_LEN {
        return Err(SqlError::Parse("staff payload too large".into()));
    }
    serde_json::from_str(&s).map_err(|e| SqlError::Parse(format!("bad staff JSON: {e}")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const U: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";

    #[test]
    fn parse_publish_schedule() {
        let staff = r#"[{"id":"01ARZ3NDEKTSV4RRFFQ69G5FAV","windows":[{"open":480,"close":720,"break_range":null}],"qualifications":["vl"]}]"#;
        let sql = format!(
            "INSERT INTO schedules (center_id, date, closed, staff) VALUES ('{U}', '2026-04-07', false, '{staff}')"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::PublishSchedule {
                center_id,
                date,
                closed,
                entries,
            } => {
                assert_eq!(center_id.to_string(), U);
                assert_eq!(date, NaiveDate::from_ymd_opt(2026, 4, 7).unwrap());
                assert!(!closed);
                assert_eq!(entries.len(), 1);
                assert_eq!(entries[0].windows[0].open, 480);
                assert_eq!(entries[0].qualifications, vec![Qualification::Vl]);
            }
            _ => panic!("expected PublishSchedule, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_publish_closed_day_without_staff() {
        let sql = format!("INSERT INTO schedules (center_id, date, closed) VALUES ('{U}', '2026-04-07', true)");
        let cmd = parse_sql(&sql).unwrap();
        assert!(matches!(
            cmd,
            Command::PublishSchedule {
                closed: true,
                ref entries,
                ..
            } if entries.is_empty()
        ));
    }

    #[test]
    fn parse_insert_block() {
        let sql = format!(
            r#"INSERT INTO blocks (id, center_id, date, staff_id, start, "end", reason, recurrence) VALUES ('{U}', '{U}', '2026-04-07', NULL, 600, 630, 'maintenance', 'weekly')"#
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertBlock {
                staff_id,
                start,
                end,
                recurrence,
                ..
            } => {
                assert_eq!(staff_id, None);
                assert_eq!(start, 600);
                assert_eq!(end, 630);
                assert_eq!(recurrence, Some(Recurrence::Weekly));
            }
            _ => panic!("expected InsertBlock, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_delete_block() {
        let sql = format!("DELETE FROM blocks WHERE id = '{U}'");
        assert!(matches!(parse_sql(&sql).unwrap(), Command::DeleteBlock { .. }));
    }

    #[test]
    fn parse_insert_appointment() {
        let sql = format!(
            "INSERT INTO appointments (id, center_id, date, start, staff_id, control, vehicle, fuel) VALUES ('{U}', '{U}', '2026-04-07', 540, NULL, 'ctp', 'vp', 'essence')"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertAppointment {
                start,
                staff_id,
                control,
                vehicle,
                fuel,
                ..
            } => {
                assert_eq!(start, 540);
                assert_eq!(staff_id, None);
                assert_eq!(control, ControlType::Ctp);
                assert_eq!(vehicle, VehicleType::Vp);
                assert_eq!(fuel, FuelType::Essence);
            }
            _ => panic!("expected InsertAppointment, got {cmd:?}"),
        }
    }

    #[test]
    fn appointment_insert_has_no_end_column() {
        // The guard recomputes end/duration; a client-sent end is rejected
        // simply because the arity/columns never include one.
        let sql = format!(
            "INSERT INTO appointments (id, center_id, date, start, staff_id, control, vehicle) VALUES ('{U}', '{U}', '2026-04-07', 540, NULL, 'ctp', 'vp')"
        );
        assert!(parse_sql(&sql).is_err());
    }

    #[test]
    fn parse_confirm_with_staff() {
        let sql = format!("UPDATE appointments SET status = 'confirmed', staff_id = '{U}' WHERE id = '{U}'");
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::Transition {
                action: TransitionAction::Confirm { staff_id },
                ..
            } => assert!(staff_id.is_some()),
            _ => panic!("expected Confirm, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_complete_with_recheck() {
        let sql = format!(
            "UPDATE appointments SET status = 'completed', result = 'refused', recheck_due = '2026-05-07' WHERE id = '{U}'"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::Transition {
                action: TransitionAction::Complete { result, recheck_due },
                ..
            } => {
                assert_eq!(result, ResultCode::Refused);
                assert!(recheck_due.is_some());
            }
            _ => panic!("expected Complete, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_cancel_requires_reason() {
        let sql = format!("UPDATE appointments SET status = 'cancelled' WHERE id = '{U}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingFilter("reason"))));

        let sql = format!(
            "UPDATE appointments SET status = 'cancelled', reason = 'client absent' WHERE id = '{U}'"
        );
        assert!(matches!(
            parse_sql(&sql).unwrap(),
            Command::Transition {
                action: TransitionAction::Cancel { .. },
                ..
            }
        ));
    }

    #[test]
    fn parse_reschedule() {
        let sql = format!(
            "UPDATE appointments SET date = '2026-04-09', start = 600 WHERE id = '{U}'"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::Reschedule {
                new_date,
                new_start,
                new_center,
                new_staff,
                ..
            } => {
                assert_eq!(new_date, NaiveDate::from_ymd_opt(2026, 4, 9).unwrap());
                assert_eq!(new_start, 600);
                assert_eq!(new_center, None);
                assert_eq!(new_staff, None);
            }
            _ => panic!("expected Reschedule, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_reschedule_with_center_move() {
        let sql = format!(
            "UPDATE appointments SET date = '2026-04-09', start = 600, center_id = '{U}' WHERE id = '{U}'"
        );
        let cmd = parse_sql(&sql).unwrap();
        assert!(matches!(
            cmd,
            Command::Reschedule {
                new_center: Some(_),
                ..
            }
        ));
    }

    #[test]
    fn parse_select_availability() {
        let sql = format!(
            "SELECT * FROM availability WHERE center_id = '{U}' AND date = '2026-04-07' AND control = 'ctp' AND vehicle = 'vp' AND fuel = 'essence'"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::SelectAvailability { control, vehicle, fuel, .. } => {
                assert_eq!(control, ControlType::Ctp);
                assert_eq!(vehicle, VehicleType::Vp);
                assert_eq!(fuel, FuelType::Essence);
            }
            _ => panic!("expected SelectAvailability, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_available_dates() {
        let sql = format!(
            "SELECT * FROM available_dates WHERE center_id = '{U}' AND date >= '2026-04-01' AND date <= '2026-04-30' AND control = 'ctp'"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::SelectAvailableDates { from, to, vehicle, fuel, .. } => {
                assert_eq!(from, NaiveDate::from_ymd_opt(2026, 4, 1).unwrap());
                assert_eq!(to, NaiveDate::from_ymd_opt(2026, 4, 30).unwrap());
                assert_eq!(vehicle, None);
                assert_eq!(fuel, None);
            }
            _ => panic!("expected SelectAvailableDates, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_history() {
        let sql = format!("SELECT * FROM history WHERE appointment_id = '{U}'");
        assert!(matches!(
            parse_sql(&sql).unwrap(),
            Command::SelectHistory { .. }
        ));
    }

    #[test]
    fn parse_listen() {
        let sql = format!("LISTEN center_{U}");
        match parse_sql(&sql).unwrap() {
            Command::Listen { channel } => assert_eq!(channel, format!("center_{U}")),
            cmd => panic!("expected Listen, got {cmd:?}"),
        }
    }

    #[test]
    fn delete_appointment_is_refused() {
        let sql = format!("DELETE FROM appointments WHERE id = '{U}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn unknown_table_errors() {
        let sql = format!("INSERT INTO foobar (id) VALUES ('{U}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn minutes_out_of_range_rejected() {
        let sql = format!(
            "INSERT INTO appointments (id, center_id, date, start, staff_id, control, vehicle, fuel) VALUES ('{U}', '{U}', '2026-04-07', 2000, NULL, 'ctp', 'vp', 'essence')"
        );
        assert!(parse_sql(&sql).is_err());
    }

    #[test]
    fn empty_input_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
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
use ulid::Ulid;

use crate::auth::CreneauAuthSource;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::sql::{self, Command, TransitionAction};
use crate::tenant::TenantManager;

pub struct CreneauHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<CreneauQueryParser>,
}

impl CreneauHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(CreneauQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("tenant error: {e}"),
            )))
        })
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Vec<Response>> {
        let label = crate::observability::command_label(&cmd);
        let started = std::time::Instant::now();
        let result = self.dispatch(engine, cmd).await;
        metrics::histogram!(crate::observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        metrics::counter!(
            crate::observability::QUERIES_TOTAL,
            "command" => label,
            "status" => if result.is_ok() { "ok" } else { "error" }
        )
        .increment(1);
        result
    }

    async fn dispatch(&self, engine: &Engine, cmd: Command) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::PublishSchedule {
                center_id,
                date,
                closed,
                entries,
            } => {
                engine
                    .publish_schedule(StaffSchedule {
                        center_id,
                        date,
                        closed,
                        entries,
                    })
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::InsertBlock {
                id,
                center_id,
                date,
                staff_id,
                start,
                end,
                reason,
                recurrence,
            } => {
                engine
                    .add_block(BlockedInterval {
                        id,
                        center_id,
                        date,
                        staff_id,
                        range: TimeRange { start, end },
                        reason,
                        recurrence,
                    })
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeleteBlock { id } => {
                engine.remove_block(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertAppointment {
                id,
                center_id,
                date,
                start,
                staff_id,
                control,
                vehicle,
                fuel,
                actor,
            } => {
                let appt = engine
                    .create_appointment(BookingRequest {
                        id,
                        center_id,
                        date,
                        start,
                        staff_id,
                        control,
                        vehicle,
                        fuel,
                        actor,
                    })
                    .await
                    .map_err(engine_err)?;
                Ok(vec![appointment_rows(vec![appt])])
            }
            Command::Reschedule {
                id,
                new_date,
                new_start,
                new_center,
                new_staff,
                reason,
            } => {
                let appt = engine
                    .reschedule_appointment(id, new_date, new_start, new_center, new_staff, reason, None)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![appointment_rows(vec![appt])])
            }
            Command::Transition { id, action } => {
                let appt = match action {
                    TransitionAction::Confirm { staff_id } => {
                        engine.confirm(id, staff_id, None).await
                    }
                    TransitionAction::Remind => engine.remind(id, None).await,
                    TransitionAction::Start => engine.start(id, None).await,
                    TransitionAction::Complete {
                        result,
                        recheck_due,
                    } => engine.complete(id, result, recheck_due, None).await,
                    TransitionAction::Cancel { reason } => engine.cancel(id, reason, None).await,
                    TransitionAction::NoShow => engine.mark_no_show(id, None).await,
                }
                .map_err(engine_err)?;
                Ok(vec![appointment_rows(vec![appt])])
            }
            Command::SelectAvailability {
                center_id,
                date,
                control,
                vehicle,
                fuel,
            } => {
                let result = engine
                    .get_availability(center_id, date, control, vehicle, fuel)
                    .await
                    .map_err(engine_err)?;

                let schema = Arc::new(availability_schema());
                let duration = result.duration_min;
                let rows: Vec<PgWireResult<_>> = result
                    .slots
                    .into_iter()
                    .map(|slot| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&slot.staff_id.to_string())?;
                        encoder.encode_field(&slot.start)?;
                        encoder.encode_field(&slot.end)?;
                        encoder.encode_field(&duration)?;
                        Ok(encoder.take_row())
                    })
                    .collect();

                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectAvailableDates {
                center_id,
                from,
                to,
                control,
                vehicle,
                fuel,
            } => {
                let dates = engine
                    .get_available_dates(center_id, from, to, control, vehicle, fuel)
                    .await
                    .map_err(engine_err)?;

                let schema = Arc::new(dates_schema());
                let rows: Vec<PgWireResult<_>> = dates
                    .into_iter()
                    .map(|date| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&date.to_string())?;
                        Ok(encoder.take_row())
                    })
                    .collect();

                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectAppointments { center_id, date } => {
                let appts = engine.list_appointments(center_id, date).await;
                Ok(vec![appointment_rows(appts)])
            }
            Command::SelectHistory { appointment_id } => {
                let trail = engine.get_history(appointment_id);

                let schema = Arc::new(history_schema());
                let rows: Vec<PgWireResult<_>> = trail
                    .into_iter()
                    .map(|entry| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&entry.appointment_id.to_string())?;
                        encoder
                            .encode_field(&entry.prev_status.map(|s| s.as_str().to_string()))?;
                        encoder.encode_field(&entry.new_status.as_str())?;
                        let changes = serde_json::to_string(&entry.changes)
                            .unwrap_or_else(|_| "[]".into());
                        encoder.encode_field(&changes)?;
                        encoder.encode_field(&entry.actor)?;
                        encoder.encode_field(&entry.reason)?;
                        encoder.encode_field(&entry.at)?;
                        Ok(encoder.take_row())
                    })
                    .collect();

                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::Listen { channel } => {
                let center_id_str = channel.strip_prefix("center_").ok_or_else(|| {
                    PgWireError::UserError(Box::new(ErrorInfo::new(
                        "ERROR".into(),
                        "42000".into(),
                        format!("invalid channel: {channel} (expected center_{{id}})"),
                    )))
                })?;
                let _center_id = Ulid::from_string(center_id_str).map_err(|e| {
                    PgWireError::UserError(Box::new(ErrorInfo::new(
                        "ERROR".into(),
                        "42000".into(),
                        format!("bad ULID in channel: {e}"),
                    )))
                })?;
                Ok(vec![Response::Execution(Tag::new("LISTEN"))])
            }
        }
    }
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("staff_id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("start".into(), None, None, Type::INT4, FieldFormat::Text),
        FieldInfo::new("end".into(), None, None, Type::INT4, FieldFormat::Text),
        FieldInfo::new("duration".into(), None, None, Type::INT4, FieldFormat::Text),
    ]
}

fn dates_schema() -> Vec<FieldInfo> {
    vec![FieldInfo::new(
        "date".into(),
        None,
        None,
        Type::VARCHAR,
        FieldFormat::Text,
    )]
}

fn appointment_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("center_id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("date".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("start".into(), None, None, Type::INT4, FieldFormat::Text),
        FieldInfo::new("end".into(), None, None, Type::INT4, FieldFormat::Text),
        FieldInfo::new("duration".into(), None, None, Type::INT4, FieldFormat::Text),
        FieldInfo::new("status".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("staff_id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("control".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("vehicle".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("fuel".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("result".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("recheck_due".into(), None, None, Type::VARCHAR, FieldFormat::Text),
    ]
}

fn appointment_rows(appts: Vec<Appointment>) -> Response {
    let schema = Arc::new(appointment_schema());
    let rows: Vec<PgWireResult<_>> = appts
        .into_iter()
        .map(|a| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&a.id.to_string())?;
            encoder.encode_field(&a.center_id.to_string())?;
            encoder.encode_field(&a.date.to_string())?;
            encoder.encode_field(&a.range.start)?;
            encoder.encode_field(&a.range.end)?;
            encoder.encode_field(&a.duration_min)?;
            encoder.encode_field(&a.status.as_str())?;
            encoder.encode_field(&a.staff_id.map(|s| s.to_string()))?;
            encoder.encode_field(&a.control.as_str())?;
            encoder.encode_field(&a.vehicle.as_str())?;
            encoder.encode_field(&a.fuel.as_str())?;
            encoder.encode_field(&a.result.map(|r| r.as_str().to_string()))?;
            encoder.encode_field(&a.recheck_due.map(|d| d.to_string()))?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

#[async_trait]
impl SimpleQueryHandler for CreneauHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        self.execute_command(&engine, cmd).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct CreneauQueryParser;

#[async_trait]
impl QueryParser for CreneauQueryParser {
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
        Ok(schema_for_statement(stmt))
    }
}

fn schema_for_statement(stmt: &str) -> Vec<FieldInfo> {
    let upper = stmt.to_uppercase();
    if upper.contains("AVAILABLE_DATES") {
        dates_schema()
    } else if upper.contains("AVAILABILITY") {
        availability_schema()
    } else if upper.contains("HISTORY") {
        history_schema()
    } else if upper.contains("APPOINTMENTS") {
        appointment_schema()
    } else {
        vec![]
    }
}

fn history_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("appointment_id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("prev_status".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("new_status".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("changes".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("actor".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("reason".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("at".into(), None, None, Type::INT8, FieldFormat::Text),
    ]
}

#[async_trait]
impl ExtendedQueryHandler for CreneauHandler {
    type Statement = String;
    type QueryParser = CreneauQueryParser;

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
        let engine = self.resolve_engine(client)?;
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let mut responses = self.execute_command(&engine, cmd).await?;
        Ok(responses.remove(0))
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
            schema_for_statement(&target.statement),
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
        Ok(DescribePortalResponse::new(schema_for_statement(
            &target.statement.statement,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start
                && let Ok(n) = sql[start..i].parse::<usize>()
                && n > max
            {
                max = n;
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let sql = portal.statement.statement.to_string();
    let params = &portal.parameters;
    let mut result = sql;

    for (i, param) in params.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }

    result
}

// ── Factory + connection entry point ─────────────────────────────

pub struct CreneauFactory {
    handler: Arc<CreneauHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<CreneauAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl CreneauFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = CreneauAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(CreneauHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for CreneauFactory {
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

/// Drive one client connection through the pgwire protocol machinery.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = Arc::new(CreneauFactory::new(tenant_manager, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn engine_err(e: EngineError) -> PgWireError {
    let code = match &e {
        // 23P01 is Postgres' exclusion_violation — the closest fit for a
        // slot conflict
        EngineError::SlotUnavailable { .. } => "23P01",
        EngineError::InvalidTransition { .. } => "P0002",
        EngineError::NotFound(_) => "P0003",
        EngineError::Validation(_) => "22000",
        _ => "P0001",
    };
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        e.to_string(),
    )))
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use futures::Sink;
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
use pgwire::messages::data::DataRow;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use ulid::Ulid;

use crate::auth::ConsoleAuthSource;
use crate::engine::{EngineError, ErrorKind};
use crate::model::*;
use crate::observability;
use crate::policy::Actor;
use crate::service::HotelService;
use crate::sql::{self, Command, ResultTable};

/// SQL console over the Postgres wire protocol.
pub struct ConsoleHandler {
    service: Arc<HotelService>,
    query_parser: Arc<ConsoleQueryParser>,
}

impl ConsoleHandler {
    pub fn new(service: Arc<HotelService>) -> Self {
        Self {
            service,
            query_parser: Arc::new(ConsoleQueryParser),
        }
    }

    /// The login name picks the actor: a registered user's ULID or email acts
    /// as that user, any other name is the hotel operator.
    fn resolve_actor<C: ClientInfo>(&self, client: &C) -> Actor {
        let login = client.metadata().get("user").cloned().unwrap_or_default();
        let user = match Ulid::from_string(login.trim()) {
            Ok(id) => self.service.engine().get_user(id).ok(),
            Err(_) => self.service.engine().user_by_email(&login),
        };
        match user {
            Some(user) => Actor::new(user.id, user.role),
            None => Actor::new(Ulid::nil(), Role::Admin),
        }
    }

    async fn run(&self, actor: &Actor, sql: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(sql).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(actor, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, actor: &Actor, cmd: Command) -> PgWireResult<Response> {
        let svc = &self.service;
        let who = Some(actor);
        match cmd {
            Command::InsertRoom {
                id,
                number,
                room_type,
                capacity,
                price,
            } => {
                svc.create_room(who, id, number, room_type, capacity, price)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted())
            }
            Command::InsertUser { id, name, email, role } => {
                svc.register_user(who, id, name, email, role)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted())
            }
            Command::InsertBooking {
                id,
                room_id,
                guest_id,
                check_in,
                check_out,
            } => {
                let guest_id = match guest_id {
                    Some(g) => g,
                    None if !actor.id.is_nil() => actor.id,
                    None => {
                        return Err(engine_err(EngineError::Invalid(
                            "guest_id is required for operator sessions".into(),
                        )));
                    }
                };
                svc.create_booking(who, id, room_id, guest_id, check_in, check_out)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted())
            }
            Command::InsertPayment {
                id,
                booking_id,
                amount,
                method,
            } => {
                svc.record_payment(who, id, booking_id, amount, method)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted())
            }
            Command::InsertRefund {
                id,
                booking_id,
                amount,
                reason,
            } => {
                svc.request_refund(who, id, booking_id, amount, reason)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted())
            }
            Command::InsertReview {
                id,
                booking_id,
                rating,
                comment,
            } => {
                svc.post_review(who, id, booking_id, rating, comment)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted())
            }
            Command::UpdateRoom {
                id,
                room_type,
                capacity,
                price,
            } => {
                svc.update_room(who, id, room_type, capacity, price)
                    .await
                    .map_err(engine_err)?;
                Ok(updated())
            }
            Command::SetRoomStatus { id, status } => {
                svc.set_room_status(who, id, status).await.map_err(engine_err)?;
                Ok(updated())
            }
            Command::SetBookingStatus { id, status } => {
                svc.set_booking_status(who, id, status)
                    .await
                    .map_err(engine_err)?;
                Ok(updated())
            }
            Command::SetPaymentStatus { id, status } => {
                svc.set_payment_status(who, id, status)
                    .await
                    .map_err(engine_err)?;
                Ok(updated())
            }
            Command::SetRefundStatus { id, status } => {
                svc.set_refund_status(who, id, status)
                    .await
                    .map_err(engine_err)?;
                Ok(updated())
            }
            Command::DeleteRoom { id } => {
                svc.delete_room(who, id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::DeleteBooking { id } => {
                svc.cancel_booking(who, id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectRooms(filter) => {
                let rooms: Vec<Room> = svc
                    .list_rooms(who)
                    .await
                    .map_err(engine_err)?
                    .into_iter()
                    .filter(|r| filter.id.is_none_or(|id| r.id == id))
                    .filter(|r| filter.status.is_none_or(|s| r.status == s))
                    .filter(|r| filter.room_type.is_none_or(|t| r.room_type == t))
                    .collect();
                rows_response(room_schema(), &rooms, encode_room)
            }
            Command::SelectBookings(filter) => {
                let bookings = svc
                    .visible_bookings(who, |b| {
                        filter.id.is_none_or(|id| b.id == id)
                            && filter.room_id.is_none_or(|id| b.room_id == id)
                            && filter.guest_id.is_none_or(|id| b.guest_id == id)
                            && filter.status.is_none_or(|s| b.status == s)
                    })
                    .await
                    .map_err(engine_err)?;
                rows_response(booking_schema(), &bookings, encode_booking)
            }
            Command::SelectAvailability {
                check_in,
                check_out,
                room_id,
                room_type,
                min_capacity,
            } => {
                let rooms = match room_id {
                    Some(room_id) => {
                        let room = svc.get_room(who, room_id).await.map_err(engine_err)?;
                        let free = svc
                            .is_room_available(who, room_id, check_in, check_out)
                            .await
                            .map_err(engine_err)?;
                        let fits = room_type.is_none_or(|t| room.room_type == t)
                            && min_capacity.is_none_or(|c| room.capacity >= c);
                        if free && fits { vec![room] } else { vec![] }
                    }
                    None => svc
                        .search_available_rooms(who, check_in, check_out, min_capacity, room_type)
                        .await
                        .map_err(engine_err)?,
                };
                rows_response(availability_schema(), &rooms, encode_available_room)
            }
            Command::SelectFreeWindows { room_id, from, to } => {
                let windows = svc
                    .free_windows(who, room_id, from, to)
                    .await
                    .map_err(engine_err)?;
                let rows: Vec<(Ulid, Stay)> = windows.into_iter().map(|w| (room_id, w)).collect();
                rows_response(free_window_schema(), &rows, encode_free_window)
            }
        }
    }
}

fn inserted() -> Response {
    Response::Execution(Tag::new("INSERT").with_rows(1))
}

fn updated() -> Response {
    Response::Execution(Tag::new("UPDATE").with_rows(1))
}

// ── Result sets ──────────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn room_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("number", Type::VARCHAR),
        field("room_type", Type::VARCHAR),
        field("capacity", Type::INT8),
        field("price", Type::INT8),
        field("status", Type::VARCHAR),
    ]
}

fn booking_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("room_id", Type::VARCHAR),
        field("guest_id", Type::VARCHAR),
        field("check_in", Type::DATE),
        field("check_out", Type::DATE),
        field("status", Type::VARCHAR),
        field("total_price", Type::INT8),
        field("created_at", Type::INT8),
    ]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        field("room_id", Type::VARCHAR),
        field("number", Type::VARCHAR),
        field("room_type", Type::VARCHAR),
        field("capacity", Type::INT8),
        field("price", Type::INT8),
    ]
}

fn free_window_schema() -> Vec<FieldInfo> {
    vec![
        field("room_id", Type::VARCHAR),
        field("check_in", Type::DATE),
        field("check_out", Type::DATE),
        field("nights", Type::INT8),
    ]
}

fn schema_for(table: Option<ResultTable>) -> Vec<FieldInfo> {
    match table {
        Some(ResultTable::Rooms) => room_schema(),
        Some(ResultTable::Bookings) => booking_schema(),
        Some(ResultTable::Availability) => availability_schema(),
        Some(ResultTable::FreeWindows) => free_window_schema(),
        None => vec![],
    }
}

fn encode_room(encoder: &mut DataRowEncoder, room: &Room) -> PgWireResult<()> {
    encoder.encode_field(&room.id.to_string())?;
    encoder.encode_field(&room.number)?;
    encoder.encode_field(&room.room_type.as_str())?;
    encoder.encode_field(&i64::from(room.capacity))?;
    encoder.encode_field(&room.price)?;
    encoder.encode_field(&room.status.as_str())
}

fn encode_booking(encoder: &mut DataRowEncoder, booking: &Booking) -> PgWireResult<()> {
    encoder.encode_field(&booking.id.to_string())?;
    encoder.encode_field(&booking.room_id.to_string())?;
    encoder.encode_field(&booking.guest_id.to_string())?;
    encoder.encode_field(&booking.stay.check_in.to_string())?;
    encoder.encode_field(&booking.stay.check_out.to_string())?;
    encoder.encode_field(&booking.status.as_str())?;
    encoder.encode_field(&booking.total_price)?;
    encoder.encode_field(&booking.created_at)
}

fn encode_available_room(encoder: &mut DataRowEncoder, room: &Room) -> PgWireResult<()> {
    encoder.encode_field(&room.id.to_string())?;
    encoder.encode_field(&room.number)?;
    encoder.encode_field(&room.room_type.as_str())?;
    encoder.encode_field(&i64::from(room.capacity))?;
    encoder.encode_field(&room.price)
}

fn encode_free_window(encoder: &mut DataRowEncoder, row: &(Ulid, Stay)) -> PgWireResult<()> {
    let (room_id, stay) = row;
    encoder.encode_field(&room_id.to_string())?;
    encoder.encode_field(&stay.check_in.to_string())?;
    encoder.encode_field(&stay.check_out.to_string())?;
    encoder.encode_field(&stay.nights())
}

fn rows_response<T>(
    schema: Vec<FieldInfo>,
    items: &[T],
    encode: fn(&mut DataRowEncoder, &T) -> PgWireResult<()>,
) -> PgWireResult<Response> {
    let schema = Arc::new(schema);
    let rows: Vec<PgWireResult<DataRow>> = items
        .iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

#[async_trait]
impl SimpleQueryHandler for ConsoleHandler {
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
        let actor = self.resolve_actor(client);
        Ok(vec![self.run(&actor, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct ConsoleQueryParser;

#[async_trait]
impl QueryParser for ConsoleQueryParser {
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
        Ok(schema_for(sql::result_table(stmt)))
    }
}

#[async_trait]
impl ExtendedQueryHandler for ConsoleHandler {
    type Statement = String;
    type QueryParser = ConsoleQueryParser;

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
        let actor = self.resolve_actor(client);
        let sql = substitute_params(portal);
        self.run(&actor, &sql).await
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
            schema_for(sql::result_table(&target.statement)),
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
        Ok(DescribePortalResponse::new(schema_for(sql::result_table(
            &target.statement.statement,
        ))))
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
            if i > start {
                if let Ok(n) = sql[start..i].parse::<usize>() {
                    max = max.max(n);
                }
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    bind_params(&portal.statement.statement, &portal.parameters)
}

/// One left-to-right pass over `sql`, so bound text is never rescanned.
/// Placeholders with no matching parameter are left as written.
fn bind_params(sql: &str, params: &[Option<Bytes>]) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut rest = sql;
    while let Some(pos) = rest.find('$') {
        result.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let digits = after.bytes().take_while(u8::is_ascii_digit).count();
        let param = after[..digits]
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| params.get(i));
        match param {
            Some(Some(bytes)) => {
                let text = String::from_utf8_lossy(bytes);
                result.push('\'');
                result.push_str(&text.replace('\'', "''"));
                result.push('\'');
            }
            Some(None) => result.push_str("NULL"),
            None => result.push_str(&rest[pos..pos + 1 + digits]),
        }
        rest = &after[digits..];
    }
    result.push_str(rest);
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct ConsoleFactory {
    handler: Arc<ConsoleHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<ConsoleAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl ConsoleFactory {
    pub fn new(service: Arc<HotelService>, password: String) -> Self {
        let auth_source = ConsoleAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(ConsoleHandler::new(service)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for ConsoleFactory {
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

/// Serve one console connection until the client goes away.
pub async fn process_connection(
    socket: TcpStream,
    service: Arc<HotelService>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = Arc::new(ConsoleFactory::new(service, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

/// SQLSTATE for each engine error kind.
fn sqlstate(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::NotFound => "P0002",
        ErrorKind::InvalidInterval => "22007",
        ErrorKind::Unavailable => "23P01",
        ErrorKind::ConcurrencyConflict => "40001",
        ErrorKind::InvalidTransition => "55000",
        ErrorKind::AlreadyExists => "23505",
        ErrorKind::Invalid => "22023",
        ErrorKind::Forbidden => "42501",
        ErrorKind::Store => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(e.kind()).into(),
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

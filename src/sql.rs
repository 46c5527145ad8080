use chrono::NaiveDate;
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertRoom {
        id: Ulid,
        number: String,
        room_type: RoomType,
        capacity: u32,
        price: Cents,
    },
    InsertUser {
        id: Ulid,
        name: String,
        email: String,
        role: Role,
    },
    /// `guest_id` defaults to the console user.
    InsertBooking {
        id: Ulid,
        room_id: Ulid,
        guest_id: Option<Ulid>,
        check_in: NaiveDate,
        check_out: NaiveDate,
    },
    InsertPayment {
        id: Ulid,
        booking_id: Ulid,
        amount: Cents,
        method: PaymentMethod,
    },
    InsertRefund {
        id: Ulid,
        booking_id: Ulid,
        amount: Cents,
        reason: Option<String>,
    },
    InsertReview {
        id: Ulid,
        booking_id: Ulid,
        rating: u8,
        comment: Option<String>,
    },
    /// Unset fields keep their current value.
    UpdateRoom {
        id: Ulid,
        room_type: Option<RoomType>,
        capacity: Option<u32>,
        price: Option<Cents>,
    },
    SetRoomStatus {
        id: Ulid,
        status: RoomStatus,
    },
    SetBookingStatus {
        id: Ulid,
        status: BookingStatus,
    },
    SetPaymentStatus {
        id: Ulid,
        status: PaymentStatus,
    },
    SetRefundStatus {
        id: Ulid,
        status: RefundStatus,
    },
    DeleteRoom {
        id: Ulid,
    },
    /// Cancels; bookings are never physically removed.
    DeleteBooking {
        id: Ulid,
    },
    SelectRooms(RoomFilter),
    SelectBookings(BookingFilter),
    SelectAvailability {
        check_in: NaiveDate,
        check_out: NaiveDate,
        room_id: Option<Ulid>,
        room_type: Option<RoomType>,
        min_capacity: Option<u32>,
    },
    SelectFreeWindows {
        room_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    },
}

#[derive(Debug, Default, PartialEq)]
pub struct RoomFilter {
    pub id: Option<Ulid>,
    pub status: Option<RoomStatus>,
    pub room_type: Option<RoomType>,
}

#[derive(Debug, Default, PartialEq)]
pub struct BookingFilter {
    pub id: Option<Ulid>,
    pub room_id: Option<Ulid>,
    pub guest_id: Option<Ulid>,
    pub status: Option<BookingStatus>,
}

/// Tables a SELECT can read, used to describe result columns before execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultTable {
    Rooms,
    Bookings,
    Availability,
    FreeWindows,
}

const ROOM_COLUMNS: &[&str] = &["id", "number", "room_type", "capacity", "price"];
const USER_COLUMNS: &[&str] = &["id", "name", "email", "role"];
const BOOKING_COLUMNS: &[&str] = &["id", "room_id", "guest_id", "check_in", "check_out"];
const PAYMENT_COLUMNS: &[&str] = &["id", "booking_id", "amount", "method"];
const REFUND_COLUMNS: &[&str] = &["id", "booking_id", "amount", "reason"];
const REVIEW_COLUMNS: &[&str] = &["id", "booking_id", "rating", "comment"];

fn parse_one(sql: &str) -> Result<Statement, SqlError> {
    let dialect = PostgreSqlDialect {};
    let mut stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    match stmts.len() {
        0 => Err(SqlError::Empty),
        1 => Ok(stmts.remove(0)),
        _ => Err(SqlError::Unsupported("multiple statements".into())),
    }
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    if sql.trim().trim_end_matches(';').trim().is_empty() {
        return Err(SqlError::Empty);
    }
    match &parse_one(sql)? {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table.relation, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// The table a SELECT reads, without evaluating its filters (which may
/// still hold `$n` placeholders).
pub fn result_table(sql: &str) -> Option<ResultTable> {
    let Ok(Statement::Query(query)) = parse_one(sql) else {
        return None;
    };
    let SetExpr::Select(select) = query.body.as_ref() else {
        return None;
    };
    let table = table_factor_name(&select.from.first()?.relation).ok()?;
    match table.as_str() {
        "rooms" => Some(ResultTable::Rooms),
        "bookings" => Some(ResultTable::Bookings),
        "availability" => Some(ResultTable::Availability),
        "free_windows" => Some(ResultTable::FreeWindows),
        _ => None,
    }
}

// ── INSERT ────────────────────────────────────────────────────

/// One VALUES row keyed by column name.
struct Row<'a> {
    table: &'static str,
    cells: Vec<(String, &'a Expr)>,
}

impl<'a> Row<'a> {
    fn get(&self, column: &str) -> Option<&'a Expr> {
        self.cells
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, expr)| *expr)
    }

    fn require(&self, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(column)
            .ok_or(SqlError::MissingColumn(self.table, column))
    }

    /// Present and not NULL.
    fn optional(&self, column: &str) -> Option<&'a Expr> {
        self.get(column).filter(|e| !is_null(e))
    }
}

fn insert_row<'a>(
    insert: &'a ast::Insert,
    table: &'static str,
    columns: &[&'static str],
) -> Result<Row<'a>, SqlError> {
    let values = extract_insert_values(insert)?;
    let cells: Vec<(String, &Expr)> = if insert.columns.is_empty() {
        if values.len() > columns.len() {
            return Err(SqlError::WrongArity(table, columns.len(), values.len()));
        }
        columns
            .iter()
            .map(|c| c.to_string())
            .zip(values.iter())
            .collect()
    } else {
        if insert.columns.len() != values.len() {
            return Err(SqlError::WrongArity(table, insert.columns.len(), values.len()));
        }
        let mut cells = Vec::with_capacity(values.len());
        for (ident, value) in insert.columns.iter().zip(values.iter()) {
            let name = ident.value.to_lowercase();
            if !columns.contains(&name.as_str()) {
                return Err(SqlError::UnknownColumn(table, name));
            }
            cells.push((name, value));
        }
        cells
    };
    Ok(Row { table, cells })
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;

    match table.as_str() {
        "rooms" => {
            let row = insert_row(insert, "rooms", ROOM_COLUMNS)?;
            Ok(Command::InsertRoom {
                id: parse_ulid_expr(row.require("id")?)?,
                number: parse_string_expr(row.require("number")?)?,
                room_type: parse_enum_expr(row.require("room_type")?)?,
                capacity: parse_u32(row.require("capacity")?)?,
                price: parse_i64_expr(row.require("price")?)?,
            })
        }
        "users" => {
            let row = insert_row(insert, "users", USER_COLUMNS)?;
            Ok(Command::InsertUser {
                id: parse_ulid_expr(row.require("id")?)?,
                name: parse_string_expr(row.require("name")?)?,
                email: parse_string_expr(row.require("email")?)?,
                role: match row.optional("role") {
                    Some(e) => parse_enum_expr(e)?,
                    None => Role::Guest,
                },
            })
        }
        "bookings" => {
            let row = insert_row(insert, "bookings", BOOKING_COLUMNS)?;
            Ok(Command::InsertBooking {
                id: parse_ulid_expr(row.require("id")?)?,
                room_id: parse_ulid_expr(row.require("room_id")?)?,
                guest_id: row.optional("guest_id").map(parse_ulid_expr).transpose()?,
                check_in: parse_date_expr(row.require("check_in")?)?,
                check_out: parse_date_expr(row.require("check_out")?)?,
            })
        }
        "payments" => {
            let row = insert_row(insert, "payments", PAYMENT_COLUMNS)?;
            Ok(Command::InsertPayment {
                id: parse_ulid_expr(row.require("id")?)?,
                booking_id: parse_ulid_expr(row.require("booking_id")?)?,
                amount: parse_i64_expr(row.require("amount")?)?,
                method: match row.optional("method") {
                    Some(e) => parse_enum_expr(e)?,
                    None => PaymentMethod::Card,
                },
            })
        }
        "refunds" => {
            let row = insert_row(insert, "refunds", REFUND_COLUMNS)?;
            Ok(Command::InsertRefund {
                id: parse_ulid_expr(row.require("id")?)?,
                booking_id: parse_ulid_expr(row.require("booking_id")?)?,
                amount: parse_i64_expr(row.require("amount")?)?,
                reason: row.optional("reason").map(parse_string_expr).transpose()?,
            })
        }
        "reviews" => {
            let row = insert_row(insert, "reviews", REVIEW_COLUMNS)?;
            let rating = parse_i64_expr(row.require("rating")?)?;
            Ok(Command::InsertReview {
                id: parse_ulid_expr(row.require("id")?)?,
                booking_id: parse_ulid_expr(row.require("booking_id")?)?,
                rating: u8::try_from(rating).map_err(|_| SqlError::Parse(format!("{rating} out of rating range")))?,
                comment: row.optional("comment").map(parse_string_expr).transpose()?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    let id = extract_where_id(selection)?;

    let mut set: Vec<(String, &Expr)> = Vec::with_capacity(assignments.len());
    for assignment in assignments {
        let column = match &assignment.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name),
            AssignmentTarget::Tuple(_) => None,
        }
        .ok_or_else(|| SqlError::Unsupported("tuple assignment".into()))?;
        set.push((column, &assignment.value));
    }
    let only_status = || -> Result<&Expr, SqlError> {
        match set.as_slice() {
            [(column, value)] if column == "status" => Ok(*value),
            _ => Err(SqlError::Unsupported(format!("{table}: only SET status = '...' is supported"))),
        }
    };

    match table.as_str() {
        "bookings" => Ok(Command::SetBookingStatus {
            id,
            status: parse_enum_expr(only_status()?)?,
        }),
        "payments" => Ok(Command::SetPaymentStatus {
            id,
            status: parse_enum_expr(only_status()?)?,
        }),
        "refunds" => Ok(Command::SetRefundStatus {
            id,
            status: parse_enum_expr(only_status()?)?,
        }),
        "rooms" => {
            if let Ok(status) = only_status() {
                return Ok(Command::SetRoomStatus {
                    id,
                    status: parse_enum_expr(status)?,
                });
            }
            let (mut room_type, mut capacity, mut price) = (None, None, None);
            for (column, value) in &set {
                match column.as_str() {
                    "room_type" => room_type = Some(parse_enum_expr(value)?),
                    "capacity" => capacity = Some(parse_u32(value)?),
                    "price" => price = Some(parse_i64_expr(value)?),
                    "status" => {
                        return Err(SqlError::Unsupported(
                            "rooms: status must be updated on its own".into(),
                        ));
                    }
                    other => return Err(SqlError::UnknownColumn("rooms", other.to_string())),
                }
            }
            Ok(Command::UpdateRoom {
                id,
                room_type,
                capacity,
                price,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "rooms" => Ok(Command::DeleteRoom { id }),
        "bookings" => Ok(Command::DeleteBooking { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

/// `column op value` conditions joined by AND.
struct Conditions<'a>(Vec<(String, &'a ast::BinaryOperator, &'a Expr)>);

impl<'a> Conditions<'a> {
    fn collect(selection: &'a Option<Expr>) -> Result<Self, SqlError> {
        let mut out = Vec::new();
        if let Some(expr) = selection {
            Self::walk(expr, &mut out)?;
        }
        Ok(Self(out))
    }

    fn walk(expr: &'a Expr, out: &mut Vec<(String, &'a ast::BinaryOperator, &'a Expr)>) -> Result<(), SqlError> {
        match expr {
            Expr::Nested(inner) => Self::walk(inner, out),
            Expr::BinaryOp {
                left,
                op: ast::BinaryOperator::And,
                right,
            } => {
                Self::walk(left, out)?;
                Self::walk(right, out)
            }
            Expr::BinaryOp { left, op, right } => {
                let column =
                    expr_column_name(left).ok_or_else(|| SqlError::Unsupported(format!("condition {expr}")))?;
                out.push((column, op, right.as_ref()));
                Ok(())
            }
            other => Err(SqlError::Unsupported(format!("condition {other}"))),
        }
    }

    /// Value of `column` compared with one of `ops`.
    fn find(&self, column: &str, ops: &[ast::BinaryOperator]) -> Option<&'a Expr> {
        self.0
            .iter()
            .find(|(c, op, _)| c == column && ops.contains(op))
            .map(|(_, _, v)| *v)
    }

    fn eq(&self, column: &str) -> Option<&'a Expr> {
        self.find(column, &[ast::BinaryOperator::Eq])
    }

    /// Reject conditions on columns the table does not filter by.
    fn only(&self, table: &'static str, allowed: &[&str]) -> Result<(), SqlError> {
        match self.0.iter().find(|(c, _, _)| !allowed.contains(&c.as_str())) {
            Some((c, _, _)) => Err(SqlError::UnknownColumn(table, c.clone())),
            None => Ok(()),
        }
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
    let cond = Conditions::collect(&select.selection)?;
    use ast::BinaryOperator::{Eq, GtEq, LtEq};

    match table.as_str() {
        "rooms" => {
            cond.only("rooms", &["id", "status", "room_type"])?;
            Ok(Command::SelectRooms(RoomFilter {
                id: cond.eq("id").map(parse_ulid_expr).transpose()?,
                status: cond.eq("status").map(parse_enum_expr).transpose()?,
                room_type: cond.eq("room_type").map(parse_enum_expr).transpose()?,
            }))
        }
        "bookings" => {
            cond.only("bookings", &["id", "room_id", "guest_id", "status"])?;
            Ok(Command::SelectBookings(BookingFilter {
                id: cond.eq("id").map(parse_ulid_expr).transpose()?,
                room_id: cond.eq("room_id").map(parse_ulid_expr).transpose()?,
                guest_id: cond.eq("guest_id").map(parse_ulid_expr).transpose()?,
                status: cond.eq("status").map(parse_enum_expr).transpose()?,
            }))
        }
        "availability" => {
            cond.only("availability", &["check_in", "check_out", "room_id", "room_type", "capacity"])?;
            Ok(Command::SelectAvailability {
                check_in: parse_date_expr(
                    cond.find("check_in", &[Eq, GtEq])
                        .ok_or(SqlError::MissingFilter("check_in"))?,
                )?,
                check_out: parse_date_expr(
                    cond.find("check_out", &[Eq, LtEq])
                        .ok_or(SqlError::MissingFilter("check_out"))?,
                )?,
                room_id: cond.eq("room_id").map(parse_ulid_expr).transpose()?,
                room_type: cond.eq("room_type").map(parse_enum_expr).transpose()?,
                min_capacity: cond.find("capacity", &[Eq, GtEq]).map(parse_u32).transpose()?,
            })
        }
        "free_windows" => {
            cond.only("free_windows", &["room_id", "check_in", "check_out"])?;
            Ok(Command::SelectFreeWindows {
                room_id: parse_ulid_expr(cond.eq("room_id").ok_or(SqlError::MissingFilter("room_id"))?)?,
                from: parse_date_expr(
                    cond.find("check_in", &[Eq, GtEq])
                        .ok_or(SqlError::MissingFilter("check_in"))?,
                )?,
                to: parse_date_expr(
                    cond.find("check_out", &[Eq, LtEq])
                        .ok_or(SqlError::MissingFilter("check_out"))?,
                )?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
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

fn extract_insert_values(insert: &ast::Insert) -> Result<&Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some("id") => parse_ulid_expr(right),
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

fn parse_date_expr(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string_expr(expr)?;
    NaiveDate::parse_from_str(&s, "%Y-%m-%d").map_err(|e| SqlError::Parse(format!("bad date {s:?}: {e}")))
}

/// Any closed status/type enum from its string spelling.
fn parse_enum_expr<T>(expr: &Expr) -> Result<T, SqlError>
where
    T: std::str::FromStr<Err = UnknownVariant>,
{
    let s = parse_string_expr(expr)?;
    s.parse().map_err(|e: UnknownVariant| SqlError::Parse(e.to_string()))
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

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(&'static str, String),
    MissingColumn(&'static str, &'static str),
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
            SqlError::UnknownColumn(t, c) => write!(f, "{t}: unknown column {c}"),
            SqlError::MissingColumn(t, c) => write!(f, "{t}: missing value for {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

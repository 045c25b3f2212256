//! Identifiers, store values and decoded rows.
//!
//! These are the only data shapes that cross the boundary between the
//! mapper layer and the backing store.

use crate::error::OrmError;
use chrono::NaiveDate;
use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Immutable identifier of a persisted entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub i64);

impl EntityId {
    pub fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for EntityId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable type tag of an entity, used to resolve its mapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct EntityKind(&'static str);

impl EntityKind {
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Session-wide identity of an entity: its kind plus its identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub id: EntityId,
}

impl EntityKey {
    pub fn new(kind: EntityKind, id: impl Into<EntityId>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.id)
    }
}

/// A single column value exchanged with the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Name of the variant, for decode error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Integer(_) => "integer",
            Value::Real(_) => "real",
            Value::Text(_) => "text",
            Value::Blob(_) => "blob",
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(value as i64)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Integer(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Real(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<EntityId> for Value {
    fn from(value: EntityId) -> Self {
        Value::Integer(value.0)
    }
}

/// Dates are stored as ISO 8601 text (`YYYY-MM-DD`)
impl From<NaiveDate> for Value {
    fn from(value: NaiveDate) -> Self {
        Value::Text(value.format(DATE_FORMAT).to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let value = match self {
            Value::Null => ValueRef::Null,
            Value::Integer(i) => ValueRef::Integer(*i),
            Value::Real(r) => ValueRef::Real(*r),
            Value::Text(s) => ValueRef::Text(s.as_bytes()),
            Value::Blob(b) => ValueRef::Blob(b),
        };
        Ok(ToSqlOutput::Borrowed(value))
    }
}

impl From<ValueRef<'_>> for Value {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(r) => Value::Real(r),
            ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        }
    }
}

/// One decoded result row, addressable by column name.
///
/// Column names are shared between all rows of one result set.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Raw value of a column (case-insensitive match, like SQL)
    pub fn value(&self, column: &str) -> Result<&Value, OrmError> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
            .and_then(|i| self.values.get(i))
            .ok_or_else(|| OrmError::decode(column, "no such column in result row"))
    }

    pub fn get_i64(&self, column: &str) -> Result<i64, OrmError> {
        match self.value(column)? {
            Value::Integer(i) => Ok(*i),
            other => Err(type_mismatch(column, "integer", other)),
        }
    }

    pub fn get_opt_i64(&self, column: &str) -> Result<Option<i64>, OrmError> {
        match self.value(column)? {
            Value::Null => Ok(None),
            Value::Integer(i) => Ok(Some(*i)),
            other => Err(type_mismatch(column, "integer or null", other)),
        }
    }

    /// Reads a REAL column; integers are widened since SQLite stores whole
    /// numbers in REAL columns as integers when it can.
    pub fn get_f64(&self, column: &str) -> Result<f64, OrmError> {
        match self.value(column)? {
            Value::Real(r) => Ok(*r),
            Value::Integer(i) => Ok(*i as f64),
            other => Err(type_mismatch(column, "real", other)),
        }
    }

    pub fn get_str(&self, column: &str) -> Result<&str, OrmError> {
        match self.value(column)? {
            Value::Text(s) => Ok(s),
            other => Err(type_mismatch(column, "text", other)),
        }
    }

    pub fn get_opt_str(&self, column: &str) -> Result<Option<&str>, OrmError> {
        match self.value(column)? {
            Value::Null => Ok(None),
            Value::Text(s) => Ok(Some(s)),
            other => Err(type_mismatch(column, "text or null", other)),
        }
    }

    pub fn get_date(&self, column: &str) -> Result<NaiveDate, OrmError> {
        let text = self.get_str(column)?;
        NaiveDate::parse_from_str(text, DATE_FORMAT)
            .map_err(|e| OrmError::decode(column, format!("invalid date '{}': {}", text, e)))
    }

    pub fn get_id(&self, column: &str) -> Result<EntityId, OrmError> {
        self.get_i64(column).map(EntityId)
    }

    pub fn get_opt_id(&self, column: &str) -> Result<Option<EntityId>, OrmError> {
        self.get_opt_i64(column).map(|id| id.map(EntityId))
    }
}

fn type_mismatch(column: &str, expected: &str, found: &Value) -> OrmError {
    OrmError::decode(
        column,
        format!("expected {}, found {}", expected, found.type_name()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_row() -> Row {
        let columns: Arc<[String]> = vec![
            "id".to_string(),
            "name".to_string(),
            "hours".to_string(),
            "department_id".to_string(),
        ]
        .into();
        Row::new(
            columns,
            vec![
                Value::Integer(7),
                Value::Text("Ada".to_string()),
                Value::Integer(8),
                Value::Null,
            ],
        )
    }

    #[test]
    fn test_row_typed_access() {
        let row = sample_row();
        assert_eq!(row.get_id("id").unwrap(), EntityId(7));
        assert_eq!(row.get_str("NAME").unwrap(), "Ada");
        assert_eq!(row.get_f64("hours").unwrap(), 8.0);
        assert_eq!(row.get_opt_id("department_id").unwrap(), None);
    }

    #[test]
    fn test_row_type_mismatch_names_column() {
        let row = sample_row();
        let err = row.get_i64("name").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("name"));
        assert!(msg.contains("expected integer, found text"));
    }

    #[test]
    fn test_row_missing_column() {
        let row = sample_row();
        assert!(matches!(
            row.value("salary"),
            Err(OrmError::Decode { .. })
        ));
    }

    #[test]
    fn test_entity_key_display() {
        let key = EntityKey::new(EntityKind::new("employee"), 42);
        assert_eq!(key.to_string(), "employee#42");
    }

    #[test]
    fn test_option_into_value() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::Text("x".to_string()));
        assert_eq!(Value::from(Some(EntityId(3))), Value::Integer(3));
    }

    #[test]
    fn test_dates_are_iso_text() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 9).unwrap();
        assert_eq!(Value::from(date), Value::Text("2026-03-09".to_string()));

        let columns: Arc<[String]> = vec!["day".to_string(), "note".to_string()].into();
        let row = Row::new(columns, vec![Value::from(date), Value::from("9 March")]);
        assert_eq!(row.get_date("day").unwrap(), date);
        assert!(row
            .get_date("note")
            .unwrap_err()
            .to_string()
            .contains("invalid date '9 March'"));
    }
}

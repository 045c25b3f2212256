//! Staff reference domain.
//!
//! Four entity types exercising every loading path of the core:
//!
//! - `Department`: plain scalar fields
//! - `Employee`: a scalar, an associated department (a ghost until
//!   touched) and its time records (a lazily loaded collection)
//! - `TimeRecord`: belongs to one employee
//! - `Leave`: time off, either a single holiday or a vacation period,
//!   stored for both shapes in one table with a discriminator column. The
//!   vacation [`Period`] is an embedded value.

mod mapping;

pub use mapping::{DepartmentMapping, EmployeeMapping, LeaveMapping, TimeRecordMapping};

use crate::entity::{Entity, EntityRef};
use crate::error::OrmError;
use crate::layout::{embedded_column, Embedded};
use crate::lazy::LazyList;
use crate::registry::MapperRegistry;
use crate::types::{EntityId, EntityKind, Row, Value};
use chrono::NaiveDate;
use serde::Serialize;

/// DDL for the staff tables
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS departments (
    id INTEGER PRIMARY KEY NOT NULL,
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS employees (
    id INTEGER PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    department_id INTEGER REFERENCES departments(id)
);

CREATE TABLE IF NOT EXISTS time_records (
    id INTEGER PRIMARY KEY NOT NULL,
    employee_id INTEGER NOT NULL REFERENCES employees(id),
    hours REAL NOT NULL,
    note TEXT
);

CREATE TABLE IF NOT EXISTS leaves (
    id INTEGER PRIMARY KEY NOT NULL,
    employee_id INTEGER NOT NULL REFERENCES employees(id),
    discriminator TEXT NOT NULL,
    day TEXT,
    period_start TEXT,
    period_end TEXT
);

CREATE INDEX IF NOT EXISTS idx_employees_department ON employees(department_id);
CREATE INDEX IF NOT EXISTS idx_time_records_employee ON time_records(employee_id);
CREATE INDEX IF NOT EXISTS idx_leaves_employee ON leaves(employee_id);
"#;

#[derive(Debug, Clone, PartialEq)]
pub struct Department {
    pub name: String,
}

impl Department {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Entity for Department {
    const KIND: EntityKind = EntityKind::new("department");
}

#[derive(Debug)]
pub struct Employee {
    pub name: String,
    pub department: Option<EntityRef<Department>>,
    pub time_records: LazyList<TimeRecord>,
}

impl Employee {
    /// A newly hired employee, with no department and no time records.
    ///
    /// The time records become a lazy list over the store once the
    /// employee is given an id.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            department: None,
            time_records: LazyList::empty(),
        }
    }

    pub fn with_department(mut self, department: EntityRef<Department>) -> Self {
        self.department = Some(department);
        self
    }
}

impl Entity for Employee {
    const KIND: EntityKind = EntityKind::new("employee");

    fn identified(&mut self, id: EntityId) {
        self.time_records = LazyList::owned_by(Self::KIND, id);
    }
}

#[derive(Debug)]
pub struct TimeRecord {
    pub employee: EntityRef<Employee>,
    pub hours: f64,
    pub note: Option<String>,
}

impl TimeRecord {
    pub fn new(employee: EntityRef<Employee>, hours: f64) -> Self {
        Self {
            employee,
            hours,
            note: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

impl Entity for TimeRecord {
    const KIND: EntityKind = EntityKind::new("time_record");
}

/// Consecutive days, both ends included
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Period {
    start: NaiveDate,
    end: NaiveDate,
}

impl Period {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, OrmError> {
        if end < start {
            return Err(OrmError::invariant(format!(
                "period ends on {} before it starts on {}",
                end, start
            )));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn days(&self) -> i64 {
        self.end.signed_duration_since(self.start).num_days() + 1
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }
}

impl Embedded for Period {
    const FIELDS: &'static [&'static str] = &["start", "end"];

    fn read(row: &Row, prefix: &str) -> Result<Self, OrmError> {
        Period::new(
            row.get_date(&embedded_column(prefix, "start"))?,
            row.get_date(&embedded_column(prefix, "end"))?,
        )
    }

    fn write(&self) -> Vec<Value> {
        vec![self.start.into(), self.end.into()]
    }
}

/// Shape of a [`Leave`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LeaveKind {
    Holiday { day: NaiveDate },
    Vacation { period: Period },
}

#[derive(Debug)]
pub struct Leave {
    pub employee: EntityRef<Employee>,
    pub kind: LeaveKind,
}

impl Leave {
    pub fn holiday(employee: EntityRef<Employee>, day: NaiveDate) -> Self {
        Self {
            employee,
            kind: LeaveKind::Holiday { day },
        }
    }

    pub fn vacation(employee: EntityRef<Employee>, period: Period) -> Self {
        Self {
            employee,
            kind: LeaveKind::Vacation { period },
        }
    }

    pub fn days(&self) -> i64 {
        match self.kind {
            LeaveKind::Holiday { .. } => 1,
            LeaveKind::Vacation { period } => period.days(),
        }
    }

    pub fn covers(&self, day: NaiveDate) -> bool {
        match self.kind {
            LeaveKind::Holiday { day: holiday } => holiday == day,
            LeaveKind::Vacation { period } => period.contains(day),
        }
    }
}

impl Entity for Leave {
    const KIND: EntityKind = EntityKind::new("leave");
}

/// Registry with the mappers for all staff entities
pub fn registry() -> Result<MapperRegistry, OrmError> {
    MapperRegistry::new()
        .with(DepartmentMapping)?
        .with(EmployeeMapping)?
        .with(TimeRecordMapping)?
        .with(LeaveMapping::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_covers_all_kinds() {
        let registry = registry().unwrap();
        assert_eq!(
            registry.kinds(),
            vec![Department::KIND, Employee::KIND, Leave::KIND, TimeRecord::KIND]
        );
    }

    #[test]
    fn test_employee_records_follow_its_id() {
        let mut employee = Employee::new("Ada");
        assert!(employee.time_records.is_loaded());

        employee.identified(EntityId(7));
        assert!(!employee.time_records.is_loaded());
    }

    #[test]
    fn test_schema_applies() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        // Idempotent
        conn.execute_batch(SCHEMA).unwrap();

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 4);
    }

    fn date(month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, month, day).unwrap()
    }

    #[test]
    fn test_period_bounds() {
        let period = Period::new(date(7, 30), date(8, 2)).unwrap();
        assert_eq!(period.days(), 4);
        assert!(period.contains(date(7, 30)));
        assert!(period.contains(date(8, 2)));
        assert!(!period.contains(date(8, 3)));

        assert_eq!(Period::new(date(5, 1), date(5, 1)).unwrap().days(), 1);
        assert!(matches!(
            Period::new(date(5, 2), date(5, 1)),
            Err(OrmError::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_leave_covers_its_days() {
        let ada = EntityRef::detached(Employee::new("Ada"));
        let holiday = Leave::holiday(ada.clone(), date(12, 25));
        assert_eq!(holiday.days(), 1);
        assert!(holiday.covers(date(12, 25)));
        assert!(!holiday.covers(date(12, 26)));

        let vacation = Leave::vacation(ada, Period::new(date(8, 1), date(8, 14)).unwrap());
        assert_eq!(vacation.days(), 14);
        assert!(vacation.covers(date(8, 7)));
    }
}

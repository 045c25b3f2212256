use super::{Department, Employee, Leave, LeaveKind, Period, TimeRecord};
use crate::context::LoadContext;
use crate::entity::Entity;
use crate::error::OrmError;
use crate::layout::{Embedded, SingleTable, Variant};
use crate::lazy::LazyList;
use crate::mapper::Mapping;
use crate::types::{EntityKind, Row, Value};

pub struct DepartmentMapping;

impl Mapping for DepartmentMapping {
    type Entity = Department;

    fn table(&self) -> &str {
        "departments"
    }

    fn columns(&self) -> &[&str] {
        &["name"]
    }

    fn decode(&self, row: &Row, _cx: &mut LoadContext<'_>) -> Result<Department, OrmError> {
        Ok(Department {
            name: row.get_str("name")?.to_string(),
        })
    }

    fn encode(&self, department: &Department) -> Vec<Value> {
        vec![department.name.clone().into()]
    }
}

pub struct EmployeeMapping;

impl Mapping for EmployeeMapping {
    type Entity = Employee;

    fn table(&self) -> &str {
        "employees"
    }

    fn columns(&self) -> &[&str] {
        &["name", "department_id"]
    }

    /// The department comes back as a ghost and the time records as an
    /// unloaded list; neither is fetched here.
    fn decode(&self, row: &Row, cx: &mut LoadContext<'_>) -> Result<Employee, OrmError> {
        let id = row.get_id(self.key_column())?;
        let department = match row.get_opt_id("department_id")? {
            Some(department_id) => Some(cx.find::<Department>(department_id)?),
            None => None,
        };

        Ok(Employee {
            name: row.get_str("name")?.to_string(),
            department,
            time_records: LazyList::owned_by(Employee::KIND, id),
        })
    }

    fn encode(&self, employee: &Employee) -> Vec<Value> {
        vec![
            employee.name.clone().into(),
            employee.department.as_ref().and_then(|d| d.id()).into(),
        ]
    }
}

pub struct TimeRecordMapping;

impl Mapping for TimeRecordMapping {
    type Entity = TimeRecord;

    fn table(&self) -> &str {
        "time_records"
    }

    fn columns(&self) -> &[&str] {
        &["employee_id", "hours", "note"]
    }

    fn owner_column(&self, owner: EntityKind) -> Option<&str> {
        (owner == Employee::KIND).then_some("employee_id")
    }

    fn decode(&self, row: &Row, cx: &mut LoadContext<'_>) -> Result<TimeRecord, OrmError> {
        Ok(TimeRecord {
            employee: cx.find::<Employee>(row.get_id("employee_id")?)?,
            hours: row.get_f64("hours")?,
            note: row.get_opt_str("note")?.map(str::to_string),
        })
    }

    fn encode(&self, record: &TimeRecord) -> Vec<Value> {
        vec![
            record.employee.id().into(),
            record.hours.into(),
            record.note.clone().into(),
        ]
    }
}

const HOLIDAY: &str = "holiday";
const VACATION: &str = "vacation";
const PERIOD: &str = "period";

const LEAVE_VARIANTS: &[Variant] = &[
    Variant {
        tag: HOLIDAY,
        columns: &["day"],
    },
    Variant {
        tag: VACATION,
        columns: &["period_start", "period_end"],
    },
];

/// Both leave shapes share the `leaves` table, told apart by `discriminator`.
pub struct LeaveMapping {
    layout: SingleTable,
}

impl LeaveMapping {
    pub fn new() -> Self {
        Self {
            layout: SingleTable::new("discriminator", &["employee_id"], LEAVE_VARIANTS),
        }
    }
}

impl Default for LeaveMapping {
    fn default() -> Self {
        Self::new()
    }
}

impl Mapping for LeaveMapping {
    type Entity = Leave;

    fn table(&self) -> &str {
        "leaves"
    }

    fn columns(&self) -> &[&str] {
        self.layout.columns()
    }

    fn owner_column(&self, owner: EntityKind) -> Option<&str> {
        (owner == Employee::KIND).then_some("employee_id")
    }

    fn decode(&self, row: &Row, cx: &mut LoadContext<'_>) -> Result<Leave, OrmError> {
        let employee = cx.find::<Employee>(row.get_id("employee_id")?)?;
        let kind = match self.layout.variant_of(row)?.tag {
            HOLIDAY => LeaveKind::Holiday {
                day: row.get_date("day")?,
            },
            _ => LeaveKind::Vacation {
                period: Period::read(row, PERIOD)?,
            },
        };
        Ok(Leave { employee, kind })
    }

    fn encode(&self, leave: &Leave) -> Vec<Value> {
        let (tag, own) = match leave.kind {
            LeaveKind::Holiday { day } => (HOLIDAY, vec![day.into()]),
            LeaveKind::Vacation { period } => (VACATION, period.write()),
        };
        self.layout
            .encode(tag, vec![leave.employee.id().into()], own)
    }
}

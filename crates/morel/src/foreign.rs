//! Foreign tabular sources.
//!
//! A foreign value is an opaque producer of record rows: the evaluator
//! scans it like a list but never mutates through it and makes no
//! assumption about where the rows come from. The JDBC-backed source lives
//! outside this crate; the in-memory [`MemoryTable`] is enough to exercise
//! relational queries against a foreign source.

use std::rc::Rc;

use crate::error::EvalResult;
use crate::types::{Type, record_type};
use crate::value::Value;

pub trait ForeignValue {
    /// A stable name for diagnostics and hashing.
    fn schema_name(&self) -> &str;

    /// The row type, as canonical record fields.
    fn schema(&self) -> Vec<(String, Type)>;

    /// Materializes the rows. Row order is only meaningful when
    /// [`ForeignValue::ordered`] is true.
    fn rows(&self) -> EvalResult<Vec<Value>>;

    /// Whether the source guarantees a deterministic row order.
    fn ordered(&self) -> bool {
        false
    }

    fn same(&self, other: &dyn ForeignValue) -> bool;
}

/// An in-memory table: schema plus materialized rows.
pub struct MemoryTable {
    name: String,
    fields: Vec<(String, Type)>,
    rows: Vec<Value>,
}

impl MemoryTable {
    /// `fields` may arrive in any order; rows must already be record
    /// values in the canonical order of the sorted fields.
    pub fn new(name: impl Into<String>, fields: Vec<(String, Type)>, rows: Vec<Value>) -> Self {
        let mut fields = fields;
        fields.sort_by(|(a, _), (b, _)| crate::types::label_compare(a, b));
        Self {
            name: name.into(),
            fields,
            rows,
        }
    }
}

impl ForeignValue for MemoryTable {
    fn schema_name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> Vec<(String, Type)> {
        self.fields.clone()
    }

    fn rows(&self) -> EvalResult<Vec<Value>> {
        Ok(self.rows.clone())
    }

    fn same(&self, other: &dyn ForeignValue) -> bool {
        self.schema_name() == other.schema_name()
    }
}

/// A named value a foreign data source contributes to the session.
pub struct ForeignBinding {
    pub name: &'static str,
    pub ty: Type,
    pub value: Value,
}

/// Loads a foreign data source by name. `scott` is the only built-in
/// source: a two-table in-memory schema in the tradition of the classic
/// demo database.
pub fn load(name: &str) -> Option<Vec<ForeignBinding>> {
    match name {
        "scott" => Some(scott()),
        _ => None,
    }
}

fn scott() -> Vec<ForeignBinding> {
    // canonical field order: deptno < ename < id, deptno < dname
    let emp_fields = vec![
        ("deptno".to_owned(), Type::INT),
        ("ename".to_owned(), Type::STRING),
        ("id".to_owned(), Type::INT),
    ];
    let emp = |deptno: i64, ename: &str, id: i64| {
        Value::record(vec![Value::Int(deptno), Value::str(ename), Value::Int(id)])
    };
    let emps = MemoryTable::new(
        "scott.emps",
        emp_fields.clone(),
        vec![
            emp(10, "Fred", 100),
            emp(20, "Velma", 101),
            emp(30, "Shaggy", 102),
            emp(30, "Scooby", 103),
        ],
    );

    let dept_fields = vec![
        ("deptno".to_owned(), Type::INT),
        ("dname".to_owned(), Type::STRING),
    ];
    let dept = |deptno: i64, dname: &str| {
        Value::record(vec![Value::Int(deptno), Value::str(dname)])
    };
    let depts = MemoryTable::new(
        "scott.depts",
        dept_fields.clone(),
        vec![
            dept(10, "Sales"),
            dept(20, "Marketing"),
            dept(30, "Engineering"),
        ],
    );

    vec![
        ForeignBinding {
            name: "emps",
            ty: Type::list(record_type(emp_fields)),
            value: Value::Foreign(Rc::new(emps)),
        },
        ForeignBinding {
            name: "depts",
            ty: Type::list(record_type(dept_fields)),
            value: Value::Foreign(Rc::new(depts)),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scott_schema_is_canonical() {
        let bindings = load("scott").unwrap();
        assert_eq!(bindings.len(), 2);
        let Value::Foreign(emps) = &bindings[0].value else {
            panic!("expected foreign value");
        };
        let schema = emps.schema();
        let labels: Vec<&str> = schema.iter().map(|(l, _)| l.as_str()).collect();
        assert_eq!(labels, vec!["deptno", "ename", "id"]);
        assert_eq!(emps.rows().unwrap().len(), 4);
    }

    #[test]
    fn unknown_source_is_none() {
        assert!(load("mystery").is_none());
    }
}

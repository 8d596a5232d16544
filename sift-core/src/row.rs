use std::collections::HashMap;
use std::fmt;

use crate::error::SourceError;
use crate::job::ColumnId;

/// A single cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Missing or not produced
    Null,
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// Floating point number
    Float(f64),
    /// Text
    Str(String),
}

impl Value {
    /// Whether this is `Null`
    pub fn is_null(&self) -> bool {
        *self == Value::Null
    }

    /// The text, if this is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The integer, if this is one
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

/// A row flowing through the pipeline.  Holds one slot per column of the
/// job; slots of columns that were not (yet) produced are `Null`.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    id: u64,
    distinct_count: u32,
    values: Vec<Value>,
}

impl Row {
    /// An all-`Null` row with room for `n_columns` columns
    pub fn new(id: u64, distinct_count: u32, n_columns: usize) -> Self {
        Row { id, distinct_count, values: vec![Value::Null; n_columns] }
    }

    /// Physical, source assigned row id (1-based)
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Number of physical records this row stands for
    pub fn distinct_count(&self) -> u32 {
        self.distinct_count
    }

    /// Value of a column; `Null` if it was never set
    pub fn value(&self, column: ColumnId) -> &Value {
        self.values.get(column.0).unwrap_or(&Value::Null)
    }

    /// Sets the value of a column, growing the row if needed
    pub fn set(&mut self, column: ColumnId, value: Value) {
        if column.0 >= self.values.len() {
            self.values.resize(column.0 + 1, Value::Null);
        }
        self.values[column.0] = value;
    }

    /// Borrowed view restricted to the given columns
    pub fn view<'a>(&'a self, columns: &'a [ColumnId]) -> InputRow<'a> {
        InputRow { row: self, columns }
    }
}

/// What a component sees of a row: only its declared input columns, in
/// declaration order.
#[derive(Clone, Copy)]
pub struct InputRow<'a> {
    row: &'a Row,
    columns: &'a [ColumnId],
}

impl<'a> InputRow<'a> {
    /// Row id of the underlying row
    pub fn id(&self) -> u64 {
        self.row.id
    }

    /// Number of physical records the row stands for
    pub fn distinct_count(&self) -> u32 {
        self.row.distinct_count
    }

    /// Number of input columns
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether the component reads no columns
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Value of the `idx`th input column
    pub fn get(&self, idx: usize) -> &'a Value {
        match self.columns.get(idx) {
            Some(c) => self.row.value(*c),
            None => &Value::Null,
        }
    }

    /// Copies of every input value, in declaration order
    pub fn values(&self) -> Vec<Value> {
        self.columns.iter().map(|c| self.row.value(*c).clone()).collect()
    }
}

impl<'a> fmt::Debug for InputRow<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("InputRow")
            .field("id", &self.id())
            .field("values", &self.values())
            .finish()
    }
}

/// A query against a single table, with optional offset/limit push-down.
/// `first_row` is 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    /// Table to read
    pub table: String,
    /// Columns to read, in order
    pub columns: Vec<String>,
    /// First row to return, 1-based; `None` starts at the first row
    pub first_row: Option<u64>,
    /// Maximum number of rows; `None` reads to the end
    pub max_rows: Option<u64>,
}

impl Query {
    /// A query over every row of `table`
    pub fn new<S: Into<String>>(table: S, columns: Vec<String>) -> Self {
        Query { table: table.into(), columns, first_row: None, max_rows: None }
    }

    /// Restricts the query to a window of rows.  Both windows are in
    /// physical row ids, so narrowing an already restricted query yields
    /// their intersection.
    pub fn restrict(mut self, first_row: u64, max_rows: Option<u64>) -> Self {
        let (cur_first, cur_max) = (self.first_row.unwrap_or(1), self.max_rows);
        let new_first = cur_first.max(first_row);
        let cur_end = cur_max.map(|m| cur_first + m);
        let new_end = max_rows.map(|m| first_row.max(1) + m);
        let end = match (cur_end, new_end) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, None) => a,
            (None, b) => b,
        };
        self.first_row = if new_first > 1 { Some(new_first) } else { None };
        self.max_rows = end.map(|e| e.saturating_sub(new_first));
        self
    }
}

/// A raw record as produced by a row source, aligned with the query's
/// columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Values, aligned with the query columns
    pub values: Vec<Value>,
    /// Number of physical records this record stands for
    pub distinct_count: u32,
}

impl Record {
    /// A record standing for a single physical record
    pub fn new(values: Vec<Value>) -> Self {
        Record { values, distinct_count: 1 }
    }
}

/// Records yielded by `RowSource::execute`
pub type RecordIter<'a> = Box<dyn Iterator<Item = Result<Record, SourceError>> + Send + 'a>;

/// Forward-only access to the rows of one or more tables.
pub trait RowSource: Send + Sync {
    /// Number of rows the query is expected to yield
    fn expected_rows(&self, query: &Query) -> Result<u64, SourceError>;

    /// Executes the query.  Sources must honor `first_row`/`max_rows`.
    fn execute<'a>(&'a self, query: &Query) -> Result<RecordIter<'a>, SourceError>;
}

#[derive(Debug, Clone)]
struct MemoryTable {
    columns: Vec<String>,
    records: Vec<Record>,
}

/// Row source keeping all tables in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryRowSource {
    tables: HashMap<String, MemoryTable>,
}

impl MemoryRowSource {
    /// An empty source
    pub fn new() -> Self {
        MemoryRowSource { tables: HashMap::new() }
    }

    /// Adds a table.  Each row must have one value per column.
    pub fn with_table<S: Into<String>>(mut self, name: S, columns: &[&str], rows: Vec<Vec<Value>>) -> Self {
        let records = rows.into_iter().map(Record::new).collect();
        self.add_table(name, columns, records);
        self
    }

    /// Adds a table of prepared records
    pub fn add_table<S: Into<String>>(&mut self, name: S, columns: &[&str], records: Vec<Record>) {
        let columns = columns.iter().map(|c| (*c).to_owned()).collect();
        self.tables.insert(name.into(), MemoryTable { columns, records });
    }

    fn window(&self, query: &Query) -> Result<(&MemoryTable, usize, usize), SourceError> {
        let table = self
            .tables
            .get(&query.table)
            .ok_or_else(|| SourceError::NoSuchTable(query.table.clone()))?;
        let len = table.records.len();
        let start = (query.first_row.unwrap_or(1).max(1) - 1) as usize;
        let start = start.min(len);
        let end = match query.max_rows {
            Some(m) => (start + m as usize).min(len),
            None => len,
        };
        Ok((table, start, end))
    }
}

impl RowSource for MemoryRowSource {
    fn expected_rows(&self, query: &Query) -> Result<u64, SourceError> {
        let (_, start, end) = self.window(query)?;
        Ok((end - start) as u64)
    }

    fn execute<'a>(&'a self, query: &Query) -> Result<RecordIter<'a>, SourceError> {
        let (table, start, end) = self.window(query)?;
        let mut positions = Vec::with_capacity(query.columns.len());
        for column in query.columns.iter() {
            match table.columns.iter().position(|c| c == column) {
                Some(p) => positions.push(p),
                None => {
                    return Err(SourceError::NoSuchColumn {
                        table: query.table.clone(),
                        column: column.clone(),
                    })
                }
            }
        }
        let iter = table.records[start..end].iter().map(move |record| {
            let values = positions
                .iter()
                .map(|p| record.values.get(*p).cloned().unwrap_or(Value::Null))
                .collect();
            Ok(Record { values, distinct_count: record.distinct_count })
        });
        Ok(Box::new(iter))
    }
}

#[cfg(test)]
mod row_test {
    use super::*;

    fn source() -> MemoryRowSource {
        let rows = (1..=10i64).map(|i| vec![Value::Int(i), Value::from(format!("r{}", i))]).collect();
        MemoryRowSource::new().with_table("t", &["id", "name"], rows)
    }

    #[test]
    fn test_memory_source_window() {
        let src = source();
        let q = Query::new("t", vec!["name".into()]).restrict(4, Some(3));
        assert_eq!(q.first_row, Some(4));
        assert_eq!(src.expected_rows(&q), Ok(3));
        let names: Vec<_> = src.execute(&q).unwrap().map(|r| r.unwrap().values[0].clone()).collect();
        assert_eq!(names, vec![Value::from("r4"), Value::from("r5"), Value::from("r6")]);
    }

    #[test]
    fn test_restrict_intersects() {
        // [3, 8) and [2, 12)
        let q = Query::new("t", vec![]).restrict(3, Some(5)).restrict(2, Some(10));
        assert_eq!(q.first_row, Some(3));
        assert_eq!(q.max_rows, Some(5));

        // [3, 8) and [6, 16)
        let q = Query::new("t", vec![]).restrict(3, Some(5)).restrict(6, Some(10));
        assert_eq!(q.first_row, Some(6));
        assert_eq!(q.max_rows, Some(2));

        // Disjoint windows leave nothing to read
        let q = Query::new("t", vec![]).restrict(3, Some(2)).restrict(10, None);
        assert_eq!(q.first_row, Some(10));
        assert_eq!(q.max_rows, Some(0));

        let open = Query::new("t", vec![]).restrict(1, None);
        assert_eq!(open.first_row, None);
        assert_eq!(open.max_rows, None);
    }

    #[test]
    fn test_unknown_column() {
        let src = source();
        let q = Query::new("t", vec!["nope".into()]);
        assert!(src.execute(&q).is_err());
        assert_eq!(src.expected_rows(&Query::new("x", vec![])), Err(SourceError::NoSuchTable("x".into())));
    }
}

//! 복제 스트림 이벤트 및 정규화된 레코드 타입 정의

use crate::offset::BinlogPosition;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// 컬럼 값 (binlog 행에 들어오는 MySQL 타입)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnValue {
    Null,
    Int(i64),
    UInt(u64),
    Float(f32),
    Double(f64),
    /// 정밀 10진수 (문자열 표현 그대로)
    Decimal(String),
    String(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    /// `[-]HHH:MM:SS[.ffffff]`
    Time(String),
    Json(Value),
}

impl ColumnValue {
    /// 로그 출력용 JSON 표현
    pub fn to_json(&self) -> Value {
        match self {
            ColumnValue::Null => Value::Null,
            ColumnValue::Int(i) => json!(i),
            ColumnValue::UInt(u) => json!(u),
            ColumnValue::Float(f) => json!(f),
            ColumnValue::Double(d) => json!(d),
            ColumnValue::Decimal(d) => Value::String(d.clone()),
            ColumnValue::String(s) => Value::String(s.clone()),
            ColumnValue::Bytes(b) => Value::String(to_hex(b)),
            ColumnValue::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
            ColumnValue::DateTime(dt) => {
                Value::String(dt.format("%Y-%m-%d %H:%M:%S%.f").to_string())
            }
            ColumnValue::Time(t) => Value::String(t.clone()),
            ColumnValue::Json(v) => v.clone(),
        }
    }
}

fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("0x");
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// 컬럼 메타데이터
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    /// `INFORMATION_SCHEMA.COLUMNS.DATA_TYPE` (소문자, 예: "decimal")
    pub data_type: String,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        ColumnDescriptor {
            name: name.into(),
            data_type: data_type.into().to_ascii_lowercase(),
        }
    }
}

/// 테이블 스키마 디스크립터
///
/// 스트리밍 측이 소유하고 정규화기는 콜백 한 번 동안만 읽는다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub schema: String,
    pub name: String,
    pub columns: Vec<ColumnDescriptor>,
}

impl TableDescriptor {
    pub fn new(
        schema: impl Into<String>,
        name: impl Into<String>,
        columns: Vec<ColumnDescriptor>,
    ) -> Self {
        TableDescriptor {
            schema: schema.into(),
            name: name.into(),
            columns,
        }
    }

    /// 컬럼 이름만으로 디스크립터 생성 (타입은 알 수 없음)
    pub fn with_column_names<I, S>(schema: &str, name: &str, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TableDescriptor::new(
            schema,
            name,
            columns
                .into_iter()
                .map(|c| ColumnDescriptor::new(c, ""))
                .collect(),
        )
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

/// 행 변경 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowAction {
    Insert,
    Delete,
    Update,
    /// MySQL 8 부분 JSON 업데이트. 아직 레코드로 모델링하지 않는다.
    PartialUpdate,
}

impl RowAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RowAction::Insert => "INSERT",
            RowAction::Delete => "DELETE",
            RowAction::Update => "UPDATE",
            RowAction::PartialUpdate => "PARTIAL_UPDATE",
        }
    }
}

/// 디코딩된 행 변경 이벤트
///
/// UPDATE의 경우 `rows`는 (변경 전, 변경 후) 순서로 번갈아 들어온다.
#[derive(Debug, Clone)]
pub struct RowChangeEvent {
    pub table: Arc<TableDescriptor>,
    pub action: RowAction,
    pub rows: Vec<Vec<ColumnValue>>,
}

impl RowChangeEvent {
    pub fn new(
        table: Arc<TableDescriptor>,
        action: RowAction,
        rows: Vec<Vec<ColumnValue>>,
    ) -> Self {
        RowChangeEvent {
            table,
            action,
            rows,
        }
    }

    pub fn schema(&self) -> &str {
        &self.table.schema
    }

    pub fn table_name(&self) -> &str {
        &self.table.name
    }
}

/// DDL 쿼리 이벤트
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DdlEvent {
    pub schema: String,
    pub query: String,
    /// 이 이벤트 다음 위치
    pub next_position: BinlogPosition,
}

impl fmt::Display for DdlEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Schema: {}\nNext position: {}\nQuery: {}",
            self.schema, self.next_position, self.query
        )
    }
}

/// 로테이션 이벤트 (새 binlog 파일)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotateEvent {
    pub next_binlog: String,
    pub position: u64,
}

impl fmt::Display for RotateEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Position: {}\nNext log name: {}",
            self.position, self.next_binlog
        )
    }
}

/// 컬럼 이름 → 값
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowRecord(BTreeMap<String, ColumnValue>);

impl RowRecord {
    pub fn get(&self, column: &str) -> Option<&ColumnValue> {
        self.0.get(column)
    }

    pub fn to_json(&self) -> Value {
        Value::Object(
            self.0
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect::<Map<String, Value>>(),
        )
    }
}

impl FromIterator<(String, ColumnValue)> for RowRecord {
    fn from_iter<T: IntoIterator<Item = (String, ColumnValue)>>(iter: T) -> Self {
        RowRecord(iter.into_iter().collect())
    }
}

/// 정규화된 변경 레코드 (싱크로 전달되는 단위)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChangeRecord {
    Added {
        schema: String,
        table: String,
        row: RowRecord,
    },
    Removed {
        schema: String,
        table: String,
        row: RowRecord,
    },
    Changed {
        schema: String,
        table: String,
        before: RowRecord,
        after: RowRecord,
    },
}

impl ChangeRecord {
    pub fn kind(&self) -> &'static str {
        match self {
            ChangeRecord::Added { .. } => "added",
            ChangeRecord::Removed { .. } => "removed",
            ChangeRecord::Changed { .. } => "changed",
        }
    }

    pub fn schema(&self) -> &str {
        match self {
            ChangeRecord::Added { schema, .. }
            | ChangeRecord::Removed { schema, .. }
            | ChangeRecord::Changed { schema, .. } => schema,
        }
    }

    pub fn table(&self) -> &str {
        match self {
            ChangeRecord::Added { table, .. }
            | ChangeRecord::Removed { table, .. }
            | ChangeRecord::Changed { table, .. } => table,
        }
    }

    /// 레코드 본문 JSON (스키마/테이블 제외)
    pub fn body_json(&self) -> Value {
        match self {
            ChangeRecord::Added { row, .. } | ChangeRecord::Removed { row, .. } => row.to_json(),
            ChangeRecord::Changed { before, after, .. } => json!({
                "before": before.to_json(),
                "after": after.to_json(),
            }),
        }
    }
}

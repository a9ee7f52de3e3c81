//! 행 변경 이벤트 정규화
//!
//! 컬럼 값 배열을 테이블 디스크립터의 컬럼 이름과 위치로 짝지어 레코드로 만든다.
//! - INSERT: 행마다 "added" 레코드
//! - DELETE: 행마다 "removed" 레코드
//! - UPDATE: (변경 전, 변경 후) 쌍마다 "changed" 레코드
//!
//! 이벤트 사이에 상태를 유지하지 않는다. 콜백은 한 번에 하나씩 순서대로 호출된다.

use crate::error::Result;
use crate::events::{
    ChangeRecord, ColumnValue, DdlEvent, RotateEvent, RowAction, RowChangeEvent, RowRecord,
    TableDescriptor,
};
use crate::sink::{Notice, RecordSink};
use async_trait::async_trait;
use tracing::{debug, warn};

/// 복제 스트림 콜백 집합
///
/// 인자로 받은 이벤트는 콜백이 끝나면 버려지므로 보관하면 안 된다.
#[async_trait]
pub trait EventHandler: Send {
    async fn on_row(&mut self, event: &RowChangeEvent) -> Result<()>;

    async fn on_ddl(&mut self, _event: &DdlEvent) -> Result<()> {
        Ok(())
    }

    async fn on_rotate(&mut self, _event: &RotateEvent) -> Result<()> {
        Ok(())
    }

    async fn on_table_changed(&mut self, _schema: &str, _table: &str) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "EventHandler"
    }
}

/// 행 하나를 레코드로 변환. 컬럼 수가 다르면 `None`.
pub fn project_row(table: &TableDescriptor, row: &[ColumnValue]) -> Option<RowRecord> {
    if table.column_count() != row.len() {
        debug!(
            "Column count mismatch for {}: descriptor={}, row={}",
            table.qualified_name(),
            table.column_count(),
            row.len()
        );
        return None;
    }

    Some(
        table
            .columns
            .iter()
            .zip(row)
            .map(|(column, value)| (column.name.clone(), value.clone()))
            .collect(),
    )
}

/// 행 변경 이벤트 하나를 레코드 목록으로 변환
pub fn normalize(event: &RowChangeEvent) -> Vec<ChangeRecord> {
    let table = event.table.as_ref();
    let schema = || table.schema.clone();
    let name = || table.name.clone();

    match event.action {
        RowAction::Insert => event
            .rows
            .iter()
            .filter_map(|row| project_row(table, row))
            .map(|row| ChangeRecord::Added {
                schema: schema(),
                table: name(),
                row,
            })
            .collect(),

        RowAction::Delete => event
            .rows
            .iter()
            .filter_map(|row| project_row(table, row))
            .map(|row| ChangeRecord::Removed {
                schema: schema(),
                table: name(),
                row,
            })
            .collect(),

        RowAction::Update => {
            if event.rows.len() % 2 != 0 {
                warn!(
                    "Skipping update event on {} with unpaired rows (count={})",
                    table.qualified_name(),
                    event.rows.len()
                );
                return Vec::new();
            }

            event
                .rows
                .chunks_exact(2)
                .filter_map(|pair| {
                    let before = project_row(table, &pair[0])?;
                    let after = project_row(table, &pair[1])?;
                    Some(ChangeRecord::Changed {
                        schema: schema(),
                        table: name(),
                        before,
                        after,
                    })
                })
                .collect()
        }

        RowAction::PartialUpdate => Vec::new(),
    }
}

/// 정규화 결과를 싱크로 넘기는 이벤트 핸들러
pub struct Normalizer<S> {
    sink: S,
}

impl<S: RecordSink> Normalizer<S> {
    pub fn new(sink: S) -> Self {
        Normalizer { sink }
    }
}

#[async_trait]
impl<S: RecordSink> EventHandler for Normalizer<S> {
    async fn on_row(&mut self, event: &RowChangeEvent) -> Result<()> {
        debug!(
            "OnRow({}.{}) action={} rows={}",
            event.schema(),
            event.table_name(),
            event.action.as_str(),
            event.rows.len()
        );

        for record in normalize(event) {
            self.sink.emit(record).await?;
        }
        Ok(())
    }

    async fn on_ddl(&mut self, event: &DdlEvent) -> Result<()> {
        self.sink.notice(Notice::Ddl(event.clone())).await
    }

    async fn on_rotate(&mut self, event: &RotateEvent) -> Result<()> {
        self.sink.notice(Notice::Rotate(event.clone())).await
    }

    async fn on_table_changed(&mut self, schema: &str, table: &str) -> Result<()> {
        self.sink
            .notice(Notice::TableChanged {
                schema: schema.to_string(),
                table: table.to_string(),
            })
            .await
    }

    fn name(&self) -> &str {
        "Normalizer"
    }
}

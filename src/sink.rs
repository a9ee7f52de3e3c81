//! 정규화된 레코드 출력 대상
//!
//! 기본 출력은 구조화 로그이며, 하위 소비자가 있으면 채널로 넘긴다.

use crate::error::{CdcError, Result};
use crate::events::{ChangeRecord, DdlEvent, RotateEvent};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;

/// 행 변경 외의 정보성 알림
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Ddl(DdlEvent),
    Rotate(RotateEvent),
    TableChanged { schema: String, table: String },
}

#[async_trait]
pub trait RecordSink: Send {
    async fn emit(&mut self, record: ChangeRecord) -> Result<()>;

    async fn notice(&mut self, notice: Notice) -> Result<()>;
}

/// tracing 로그로 출력하는 싱크
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl RecordSink for LogSink {
    async fn emit(&mut self, record: ChangeRecord) -> Result<()> {
        let schema = record.schema();
        let table = record.table();

        match &record {
            ChangeRecord::Changed { before, after, .. } => {
                let before = serde_json::to_string_pretty(&before.to_json())?;
                let after = serde_json::to_string_pretty(&after.to_json())?;
                info!(
                    schema,
                    table,
                    "changed\nbefore: {}\nafter: {}",
                    before,
                    after
                );
            }
            _ => {
                let body = serde_json::to_string_pretty(&record.body_json())?;
                info!(schema, table, "{} {}", record.kind(), body);
            }
        }
        Ok(())
    }

    async fn notice(&mut self, notice: Notice) -> Result<()> {
        match notice {
            Notice::Ddl(ddl) => info!("DDL: {}", ddl),
            Notice::Rotate(rotate) => info!("Rotate: {}", rotate),
            Notice::TableChanged { schema, table } => info!("TableChanged: {} {}", schema, table),
        }
        Ok(())
    }
}

/// 채널로 전달되는 싱크 항목
#[derive(Debug, Clone, PartialEq)]
pub enum SinkItem {
    Record(ChangeRecord),
    Notice(Notice),
}

/// 하위 소비자에게 bounded 채널로 넘기는 싱크
pub struct ChannelSink {
    tx: mpsc::Sender<SinkItem>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<SinkItem>) -> Self {
        ChannelSink { tx }
    }

    /// 싱크와 수신자 쌍 생성
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<SinkItem>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (ChannelSink { tx }, rx)
    }

    async fn send(&self, item: SinkItem) -> Result<()> {
        self.tx.send(item).await.map_err(|_| CdcError::ChannelClosed)
    }
}

#[async_trait]
impl RecordSink for ChannelSink {
    async fn emit(&mut self, record: ChangeRecord) -> Result<()> {
        self.send(SinkItem::Record(record)).await
    }

    async fn notice(&mut self, notice: Notice) -> Result<()> {
        self.send(SinkItem::Notice(notice)).await
    }
}

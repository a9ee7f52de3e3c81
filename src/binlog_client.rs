//! MySQL Binlog 스트리밍 세션
//!
//! 복제 프로토콜(핸드셰이크, 이벤트 프레이밍, 체크섬)은 mysql_async의 binlog
//! 스트림에 맡기고, 여기서는 이벤트를 크레이트의 이벤트 모델로 바꿔 inbox에 넣는다.
//!
//! 태스크 구성:
//! - 리더: binlog 이벤트 읽기 → 디코딩 → 디스크립터 조회 → inbox
//! - 디스패처: inbox → 이벤트 핸들러 (단일 소비자)

use crate::connection::{load_table_descriptor, ConnectionConfig};
use crate::dispatcher::{dispatch, StreamEvent};
use crate::error::{CdcError, Result};
use crate::events::{
    ColumnDescriptor, ColumnValue, DdlEvent, RotateEvent, RowAction, RowChangeEvent,
    TableDescriptor,
};
use crate::normalizer::EventHandler;
use crate::offset::{BinlogPosition, SessionState, SourceInfo};
use crate::position::StartPosition;
use crate::schema::{ddl_target, is_ddl, SchemaCache};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use futures::StreamExt;
use mysql_async::binlog::events::{Event, EventData, RowsEventData};
use mysql_async::binlog::row::BinlogRow;
use mysql_async::binlog::value::BinlogValue;
use mysql_async::{BinlogStream, BinlogStreamRequest, Pool, Value};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// 기본 inbox 크기
pub const DEFAULT_INBOX_CAPACITY: usize = 1024;

/// 디코딩 직후, 디스크립터 조회 전의 이벤트
#[derive(Debug)]
enum DecodedEvent {
    Rotate(RotateEvent),
    Query {
        schema: String,
        query: String,
        next_position: BinlogPosition,
    },
    Rows {
        schema: String,
        table: String,
        action: RowAction,
        rows: Vec<Vec<Value>>,
    },
}

/// Binlog 스트리밍 세션
pub struct StreamingSession {
    config: ConnectionConfig,
    shutdown: CancellationToken,
    source_info: Arc<RwLock<SourceInfo>>,
    inbox_capacity: usize,
    close_timeout: Duration,
    reader: Option<JoinHandle<()>>,
    dispatcher: Option<JoinHandle<()>>,
}

impl StreamingSession {
    /// 상위 종료 토큰의 자식 토큰으로 세션 생성
    pub fn new(config: ConnectionConfig, shutdown: &CancellationToken) -> Self {
        let source_info = Arc::new(RwLock::new(SourceInfo::new(config.server_id)));
        StreamingSession {
            config,
            shutdown: shutdown.child_token(),
            source_info,
            inbox_capacity: DEFAULT_INBOX_CAPACITY,
            close_timeout: Duration::from_secs(10),
            reader: None,
            dispatcher: None,
        }
    }

    pub fn with_inbox_capacity(mut self, capacity: usize) -> Self {
        self.inbox_capacity = capacity.max(1);
        self
    }

    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// 현재 SourceInfo 반환
    pub fn source_info(&self) -> SourceInfo {
        self.source_info.read().clone()
    }

    /// GTID 위치부터 스트리밍 시작
    ///
    /// 복제 연결과 dump 요청까지 이 호출 안에서 끝나며, 실패하면 태스크를 띄우지 않는다.
    pub async fn start_from_gtid<H>(&mut self, position: StartPosition, handler: H) -> Result<()>
    where
        H: EventHandler + 'static,
    {
        if self.reader.is_some() {
            return Err(CdcError::StreamError("session already started".to_string()));
        }

        if let Some(path) = &self.config.dump_execution_path {
            warn!(
                "Dump execution path {} is configured but bulk dump is not supported, ignoring",
                path.display()
            );
        }

        info!(
            "Starting binlog streaming from {} as server_id={}",
            if position.is_empty() {
                "<empty GTID set>".to_string()
            } else {
                position.to_string()
            },
            self.config.server_id
        );

        let conn = self.config.open_conn(None).await?;
        let request = BinlogStreamRequest::new(self.config.server_id)
            .with_gtid()
            .with_gtid_set(position.into_sids());

        let dump = conn.get_binlog_stream(request);
        let stream = match tokio::time::timeout(self.config.timeout, dump).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(CdcError::StreamError(format!(
                    "Failed to request binlog dump: {}",
                    e
                )))
            }
            Err(_) => return Err(CdcError::Timeout),
        };

        let (tx, rx) = mpsc::channel(self.inbox_capacity);

        let token = self.shutdown.clone();
        self.dispatcher = Some(tokio::spawn(async move {
            if let Err(e) = dispatch(rx, handler, token.clone()).await {
                error!("Event handler failed, stopping stream: {}", e);
                token.cancel();
            }
        }));

        let reader = BinlogReader {
            cache: SchemaCache::new(),
            pool: self.config.metadata_pool(),
            use_decimal: self.config.use_decimal,
            source_info: self.source_info.clone(),
        };
        let token = self.shutdown.clone();
        let source_info = self.source_info.clone();
        self.reader = Some(tokio::spawn(async move {
            let state = match reader.run(stream, tx, token).await {
                Ok(()) => SessionState::Stopped,
                Err(e) => {
                    error!("Binlog streaming error: {}", e);
                    SessionState::Failed
                }
            };
            source_info.write().state = state;
        }));

        self.source_info.write().state = SessionState::Streaming;
        Ok(())
    }

    /// 스트리밍 중지. 리더가 binlog 스트림과 메타데이터 풀을 닫을 때까지 기다린다.
    pub async fn close(&mut self) {
        info!("Closing binlog streaming session");
        self.shutdown.cancel();

        let handles = [
            ("reader", self.reader.take()),
            ("dispatcher", self.dispatcher.take()),
        ];
        for (name, handle) in handles {
            let Some(handle) = handle else { continue };
            match tokio::time::timeout(self.close_timeout, handle).await {
                Ok(Ok(())) => debug!("Binlog {} task finished", name),
                Ok(Err(e)) => error!("Binlog {} task panicked: {}", name, e),
                Err(_) => warn!("Timed out waiting for binlog {} task", name),
            }
        }

        let mut info = self.source_info.write();
        if info.state != SessionState::Failed {
            info.state = SessionState::Stopped;
        }
        info!("Binlog streaming session closed: {}", *info);
    }
}

/// 리더 태스크 상태
struct BinlogReader {
    cache: SchemaCache,
    pool: Pool,
    use_decimal: bool,
    source_info: Arc<RwLock<SourceInfo>>,
}

impl BinlogReader {
    async fn run(
        mut self,
        mut stream: BinlogStream,
        tx: mpsc::Sender<StreamEvent>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let result = 'read: loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break 'read Ok(()),
                next = stream.next() => next,
            };

            let event = match next {
                Some(Ok(event)) => event,
                Some(Err(e)) => break 'read Err(CdcError::StreamError(e.to_string())),
                None => {
                    warn!("Binlog stream closed by server");
                    break 'read Ok(());
                }
            };

            let decoded = match self.decode(&stream, &event) {
                Ok(Some(decoded)) => decoded,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Failed to decode binlog event: {}", e);
                    continue;
                }
            };
            drop(event);

            for out in self.resolve(decoded).await {
                if tx.send(out).await.is_err() {
                    debug!("Event inbox closed, stopping reader");
                    break 'read Ok(());
                }
            }
        };

        if let Err(e) = stream.close().await {
            warn!("Failed to close binlog stream: {}", e);
        }
        if let Err(e) = self.pool.disconnect().await {
            warn!("Failed to close metadata pool: {}", e);
        }

        result
    }

    /// 이벤트 하나 디코딩 (동기, 스트림 참조는 여기서만 사용)
    fn decode(&self, stream: &BinlogStream, event: &Event) -> Result<Option<DecodedEvent>> {
        let header = event.header();
        let log_pos = u64::from(header.log_pos());
        self.source_info.write().record_event(header.timestamp(), log_pos);

        let data = match event.read_data()? {
            Some(data) => data,
            None => return Ok(None),
        };

        match data {
            EventData::RotateEvent(rotate) => {
                let next_binlog = rotate.name().to_string();
                self.source_info
                    .write()
                    .rotate(next_binlog.clone(), rotate.position());
                Ok(Some(DecodedEvent::Rotate(RotateEvent {
                    next_binlog,
                    position: rotate.position(),
                })))
            }

            EventData::GtidEvent(gtid) => {
                let gtid = format!("{}:{}", Uuid::from_bytes(gtid.sid()), gtid.gno());
                debug!("GTID: {}", gtid);
                self.source_info.write().gtid = Some(gtid);
                Ok(None)
            }

            EventData::QueryEvent(query) => {
                let filename = self.source_info.read().binlog_position.filename.clone();
                Ok(Some(DecodedEvent::Query {
                    schema: query.schema().to_string(),
                    query: query.query().to_string(),
                    next_position: BinlogPosition::new(filename, log_pos),
                }))
            }

            EventData::RowsEvent(rows_event) => {
                let tme = stream.get_tme(rows_event.table_id()).ok_or_else(|| {
                    CdcError::StreamError(format!(
                        "No table map for table_id={}",
                        rows_event.table_id()
                    ))
                })?;

                let action = match &rows_event {
                    RowsEventData::WriteRowsEvent(_) | RowsEventData::WriteRowsEventV1(_) => {
                        RowAction::Insert
                    }
                    RowsEventData::UpdateRowsEvent(_) | RowsEventData::UpdateRowsEventV1(_) => {
                        RowAction::Update
                    }
                    RowsEventData::DeleteRowsEvent(_) | RowsEventData::DeleteRowsEventV1(_) => {
                        RowAction::Delete
                    }
                    RowsEventData::PartialUpdateRowsEvent(_) => RowAction::PartialUpdate,
                };

                let pairs = rows_event
                    .rows(tme)
                    .map(|row| {
                        row.map(|(before, after)| {
                            (before.map(|r| image_values(&r)), after.map(|r| image_values(&r)))
                        })
                    })
                    .collect::<std::io::Result<Vec<_>>>()?;

                let Some(rows) = flatten_images(action, pairs) else {
                    warn!(
                        "Skipping {} event on {}.{} with a missing row image",
                        action.as_str(),
                        tme.database_name(),
                        tme.table_name()
                    );
                    return Ok(None);
                };

                Ok(Some(DecodedEvent::Rows {
                    schema: tme.database_name().to_string(),
                    table: tme.table_name().to_string(),
                    action,
                    rows,
                }))
            }

            _ => Ok(None),
        }
    }

    /// 디스크립터를 붙이고 DDL은 캐시를 무효화한다.
    async fn resolve(&mut self, decoded: DecodedEvent) -> Vec<StreamEvent> {
        match decoded {
            DecodedEvent::Rotate(rotate) => vec![StreamEvent::Rotate(rotate)],

            DecodedEvent::Query {
                schema,
                query,
                next_position,
            } => {
                if !is_ddl(&query) {
                    return Vec::new();
                }

                let mut out = Vec::with_capacity(2);
                match ddl_target(&query) {
                    Some(target) => {
                        let target_schema = target.resolve_schema(&schema).to_string();
                        self.cache.invalidate(&target_schema, &target.table);
                        out.push(StreamEvent::TableChanged {
                            schema: target_schema,
                            table: target.table,
                        });
                    }
                    None if !schema.is_empty() => self.cache.invalidate_schema(&schema),
                    None => {}
                }
                out.push(StreamEvent::Ddl(DdlEvent {
                    schema,
                    query,
                    next_position,
                }));
                out
            }

            DecodedEvent::Rows {
                schema,
                table,
                action,
                rows,
            } => {
                let width = rows.first().map(Vec::len);
                let Some(descriptor) = self.descriptor(&schema, &table, width).await else {
                    warn!("No column metadata for {}.{}, skipping rows event", schema, table);
                    return Vec::new();
                };

                let rows = rows
                    .into_iter()
                    .map(|row| convert_row(row, &descriptor, self.use_decimal))
                    .collect();
                vec![StreamEvent::Rows(RowChangeEvent::new(descriptor, action, rows))]
            }
        }
    }

    /// 캐시된 디스크립터, 없거나 컬럼 수가 다르면 다시 조회
    async fn descriptor(
        &mut self,
        schema: &str,
        table: &str,
        width: Option<usize>,
    ) -> Option<Arc<TableDescriptor>> {
        let cached = self.cache.get(schema, table);
        if let Some(descriptor) = &cached {
            if width.map_or(true, |w| w == descriptor.column_count()) {
                return cached;
            }
            debug!("Column count changed for {}.{}, reloading", schema, table);
        }

        match load_table_descriptor(&self.pool, schema, table).await {
            Ok(Some(descriptor)) => {
                let descriptor = self.cache.insert(descriptor);
                debug!(
                    "Cached {} columns for {}.{} ({} tables cached)",
                    descriptor.column_count(),
                    schema,
                    table,
                    self.cache.len()
                );
                Some(descriptor)
            }
            Ok(None) => cached,
            Err(e) => {
                warn!("Failed to query columns for {}.{}: {}", schema, table, e);
                cached
            }
        }
    }
}

fn image_values(image: &BinlogRow) -> Vec<Value> {
    (0..image.len()).map(|i| raw_value(image.as_ref(i))).collect()
}

/// 행 이미지 쌍을 한 줄로 펼친다. UPDATE는 (변경 전, 변경 후)가 번갈아 들어간다.
///
/// UPDATE 쌍 중 한쪽 이미지가 없으면 짝이 어긋나므로 `None`.
fn flatten_images<T>(action: RowAction, pairs: Vec<(Option<T>, Option<T>)>) -> Option<Vec<T>> {
    let mut rows = Vec::with_capacity(pairs.len() * 2);
    for pair in pairs {
        match (action, pair) {
            (RowAction::Update | RowAction::PartialUpdate, (Some(before), Some(after))) => {
                rows.push(before);
                rows.push(after);
            }
            (RowAction::Update | RowAction::PartialUpdate, _) => return None,
            (_, (before, after)) => rows.extend(before.or(after)),
        }
    }
    Some(rows)
}

/// JSONB는 JSON 텍스트로 풀리고, 부분 JSON 변경(JsonDiff)만 Debug 표현으로 남는다.
fn raw_value(value: Option<&BinlogValue<'_>>) -> Value {
    match value {
        Some(BinlogValue::Value(v)) => v.clone(),
        Some(other) => Value::try_from(other.clone())
            .unwrap_or_else(|_| Value::Bytes(format!("{:?}", other).into_bytes())),
        None => Value::NULL,
    }
}

fn convert_row(row: Vec<Value>, table: &TableDescriptor, use_decimal: bool) -> Vec<ColumnValue> {
    row.into_iter()
        .enumerate()
        .map(|(i, value)| convert_value(value, table.columns.get(i), use_decimal))
        .collect()
}

/// MySQL 값 → 컬럼 값 (DATA_TYPE 기준)
pub(crate) fn convert_value(
    value: Value,
    column: Option<&ColumnDescriptor>,
    use_decimal: bool,
) -> ColumnValue {
    let data_type = column.map(|c| c.data_type.as_str()).unwrap_or_default();

    match value {
        Value::NULL => ColumnValue::Null,
        Value::Int(i) => ColumnValue::Int(i),
        Value::UInt(u) => ColumnValue::UInt(u),
        Value::Float(f) => ColumnValue::Float(f),
        Value::Double(d) => ColumnValue::Double(d),
        Value::Bytes(bytes) => convert_bytes(bytes, data_type, use_decimal),
        Value::Date(year, month, day, hour, minute, second, micros) => {
            let date = NaiveDate::from_ymd_opt(i32::from(year), u32::from(month), u32::from(day));
            match (data_type, date) {
                ("date", Some(date)) => ColumnValue::Date(date),
                (_, Some(date)) => date
                    .and_hms_micro_opt(
                        u32::from(hour),
                        u32::from(minute),
                        u32::from(second),
                        micros,
                    )
                    .map(ColumnValue::DateTime)
                    .unwrap_or(ColumnValue::Null),
                // 0000-00-00 같은 zero date
                (_, None) => ColumnValue::String(format!(
                    "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                    year, month, day, hour, minute, second
                )),
            }
        }
        Value::Time(negative, days, hours, minutes, seconds, micros) => ColumnValue::Time(
            format_time(negative, days, hours, minutes, seconds, micros),
        ),
    }
}

fn convert_bytes(bytes: Vec<u8>, data_type: &str, use_decimal: bool) -> ColumnValue {
    match data_type {
        "decimal" => {
            let text = String::from_utf8_lossy(&bytes).into_owned();
            if use_decimal {
                ColumnValue::Decimal(text)
            } else {
                text.parse()
                    .map(ColumnValue::Double)
                    .unwrap_or(ColumnValue::Decimal(text))
            }
        }
        // TIMESTAMP2는 "<unix 초>[.<소수부>]" 텍스트로 들어온다
        "timestamp" => {
            let text = String::from_utf8_lossy(&bytes).into_owned();
            parse_unix_timestamp(&text)
                .map(ColumnValue::DateTime)
                .unwrap_or(ColumnValue::String(text))
        }
        "year" => {
            let text = String::from_utf8_lossy(&bytes).into_owned();
            text.trim()
                .parse()
                .map(ColumnValue::Int)
                .unwrap_or(ColumnValue::String(text))
        }
        "json" => match serde_json::from_slice(&bytes) {
            Ok(json) => ColumnValue::Json(json),
            Err(_) => ColumnValue::String(String::from_utf8_lossy(&bytes).into_owned()),
        },
        "char" | "varchar" | "tinytext" | "text" | "mediumtext" | "longtext" | "enum" | "set"
        | "" => match String::from_utf8(bytes) {
            Ok(text) => ColumnValue::String(text),
            Err(e) => ColumnValue::Bytes(e.into_bytes()),
        },
        _ => ColumnValue::Bytes(bytes),
    }
}

fn parse_unix_timestamp(text: &str) -> Option<NaiveDateTime> {
    let (secs, fraction) = match text.trim().split_once('.') {
        Some((secs, fraction)) => (secs, fraction),
        None => (text.trim(), ""),
    };
    if fraction.len() > 6 || !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let micros = if fraction.is_empty() {
        0
    } else {
        fraction.parse::<u32>().ok()? * 10u32.pow(6 - fraction.len() as u32)
    };
    DateTime::from_timestamp(secs.parse().ok()?, micros * 1_000).map(|dt| dt.naive_utc())
}

fn format_time(
    negative: bool,
    days: u32,
    hours: u8,
    minutes: u8,
    seconds: u8,
    micros: u32,
) -> String {
    let total_hours = u64::from(days) * 24 + u64::from(hours);
    let mut out = format!(
        "{}{:02}:{:02}:{:02}",
        if negative { "-" } else { "" },
        total_hours,
        minutes,
        seconds
    );
    if micros > 0 {
        out.push_str(&format!(".{:06}", micros));
    }
    out
}

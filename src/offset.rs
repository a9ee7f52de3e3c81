//! 스트리밍 위치 추적 (SourceInfo)
//!
//! 리더 태스크가 갱신하고 다른 태스크는 스냅샷만 읽는다.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Binlog 파일 위치 정보
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BinlogPosition {
    /// 바이너리 로그 파일명 (e.g., "mysql-bin.000001")
    pub filename: String,
    /// 바이트 위치
    pub position: u64,
}

impl BinlogPosition {
    pub fn new(filename: impl Into<String>, position: u64) -> Self {
        BinlogPosition {
            filename: filename.into(),
            position,
        }
    }
}

impl fmt::Display for BinlogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.filename, self.position)
    }
}

/// 스트리밍 세션 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Streaming,
    Stopped,
    Failed,
}

/// 현재 처리 위치 (Debezium의 SourceInfo와 유사)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceInfo {
    /// 복제 클라이언트 server_id
    pub server_id: u32,
    pub state: SessionState,
    /// 마지막으로 확인한 binlog 위치
    pub binlog_position: BinlogPosition,
    /// 마지막 GTID (uuid:seq)
    pub gtid: Option<String>,
    /// 이벤트 타임스탬프 (초 단위)
    pub ts_sec: u32,
    /// 받은 binlog 이벤트 수
    pub events_received: u64,
}

impl SourceInfo {
    pub fn new(server_id: u32) -> Self {
        SourceInfo {
            server_id,
            state: SessionState::Idle,
            binlog_position: BinlogPosition::default(),
            gtid: None,
            ts_sec: 0,
            events_received: 0,
        }
    }

    /// 이벤트 헤더 기준 위치 갱신 (log_pos 0은 가상 이벤트)
    pub fn record_event(&mut self, ts_sec: u32, log_pos: u64) {
        self.events_received += 1;
        if ts_sec > 0 {
            self.ts_sec = ts_sec;
        }
        if log_pos > 0 {
            self.binlog_position.position = log_pos;
        }
    }

    pub fn rotate(&mut self, filename: impl Into<String>, position: u64) {
        self.binlog_position = BinlogPosition::new(filename, position);
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "server_id": self.server_id,
            "state": self.state,
            "file": self.binlog_position.filename,
            "pos": self.binlog_position.position,
            "gtid": self.gtid,
            "ts_sec": self.ts_sec,
            "events": self.events_received,
        })
    }
}

impl fmt::Display for SourceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SourceInfo {{ server_id: {}, state: {:?}, pos: {}, gtid: {:?} }}",
            self.server_id, self.state, self.binlog_position, self.gtid
        )
    }
}

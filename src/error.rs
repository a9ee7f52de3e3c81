//! CDC 관련 에러 타입

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CdcError {
    #[error("MySQL 연결 에러: {0}")]
    ConnectionError(String),

    #[error("쿼리 실행 에러: {0}")]
    QueryError(String),

    /// 변수 값이 비어 있거나 `NONE` 같은 센티널 값인 경우
    #[error("서버 변수 {0} 값이 없습니다")]
    MissingVariable(&'static str),

    #[error("유효하지 않은 server_uuid '{value}': {source}")]
    InvalidServerUuid {
        value: String,
        #[source]
        source: uuid::Error,
    },

    #[error("유효하지 않은 server_id: {0}")]
    InvalidServerId(i64),

    #[error("GTID 처리 에러: {0}")]
    GtidError(String),

    #[error("설정 에러: {0}")]
    ConfigError(String),

    #[error("Binlog 스트림 에러: {0}")]
    StreamError(String),

    #[error("I/O 에러: {0}")]
    IoError(String),

    #[error("직렬화 에러: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Timeout 에러")]
    Timeout,

    #[error("채널이 닫혔습니다")]
    ChannelClosed,
}

impl CdcError {
    /// 프로브 이름 같은 문맥을 메시지 앞에 붙인다.
    ///
    /// 변수 검증 에러는 이미 충분한 정보를 담고 있으므로 그대로 둔다.
    pub fn context(self, ctx: &str) -> Self {
        match self {
            CdcError::ConnectionError(msg) => CdcError::ConnectionError(format!("{ctx}: {msg}")),
            CdcError::QueryError(msg) => CdcError::QueryError(format!("{ctx}: {msg}")),
            CdcError::GtidError(msg) => CdcError::GtidError(format!("{ctx}: {msg}")),
            CdcError::StreamError(msg) => CdcError::StreamError(format!("{ctx}: {msg}")),
            CdcError::IoError(msg) => CdcError::IoError(format!("{ctx}: {msg}")),
            other => other,
        }
    }
}

impl From<io::Error> for CdcError {
    fn from(err: io::Error) -> Self {
        CdcError::IoError(err.to_string())
    }
}

impl From<mysql_async::Error> for CdcError {
    fn from(err: mysql_async::Error) -> Self {
        match err {
            mysql_async::Error::Io(e) => CdcError::IoError(e.to_string()),
            mysql_async::Error::Driver(e) => CdcError::ConnectionError(e.to_string()),
            other => CdcError::QueryError(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, CdcError>;

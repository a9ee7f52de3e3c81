//! MySQL 데이터베이스 연결 관리
//!
//! 관리용(부트스트랩, 스키마 조회) 연결과 복제 연결이 같은 설정을 공유한다.

use crate::error::{CdcError, Result};
use crate::events::{ColumnDescriptor, TableDescriptor};
use crate::gtid::GtidSet;
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, OptsBuilder, Pool};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

/// 관리용 연결이 붙는 스키마 (사용자 데이터 접근 불필요)
pub const ADMIN_DATABASE: &str = "information_schema";

/// 복제 대상 서버 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Flavor {
    #[default]
    MySql,
}

impl FromStr for Flavor {
    type Err = CdcError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mysql" => Ok(Flavor::MySql),
            other => Err(CdcError::ConfigError(format!(
                "지원하지 않는 flavor: {}",
                other
            ))),
        }
    }
}

/// MySQL 연결 설정
#[derive(Clone)]
pub struct ConnectionConfig {
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// 복제 클라이언트 자신의 server_id (소스 서버와 달라야 함)
    pub server_id: u32,
    pub timeout: Duration,
    pub flavor: Flavor,
    /// DECIMAL 컬럼을 정밀 10진 문자열로 유지할지 여부
    pub use_decimal: bool,
    /// 벌크 덤프 작업 경로 (기본값: 비활성)
    pub dump_execution_path: Option<PathBuf>,
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("server_id", &self.server_id)
            .field("timeout", &self.timeout)
            .field("flavor", &self.flavor)
            .field("use_decimal", &self.use_decimal)
            .field("dump_execution_path", &self.dump_execution_path)
            .finish()
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            hostname: "localhost".to_string(),
            port: 3306,
            username: "root".to_string(),
            password: String::new(),
            server_id: 1001,
            timeout: Duration::from_secs(30),
            flavor: Flavor::MySql,
            use_decimal: true,
            dump_execution_path: None,
        }
    }
}

impl ConnectionConfig {
    pub fn new(hostname: impl Into<String>, username: impl Into<String>) -> Self {
        ConnectionConfig {
            hostname: hostname.into(),
            username: username.into(),
            ..Default::default()
        }
    }

    /// 환경 변수에서 설정 읽기
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 키 조회 함수로부터 설정 구성 (없는 키는 기본값 사용)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = ConnectionConfig::default();

        let port = match lookup("DB_PORT") {
            Some(raw) => raw
                .parse()
                .map_err(|_| CdcError::ConfigError(format!("DB_PORT 값이 잘못됨: {}", raw)))?,
            None => defaults.port,
        };

        let server_id = match lookup("CDC_SERVER_ID") {
            Some(raw) => raw.parse().map_err(|_| {
                CdcError::ConfigError(format!("CDC_SERVER_ID 값이 잘못됨: {}", raw))
            })?,
            None => defaults.server_id,
        };

        let timeout = match lookup("CDC_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(raw.parse().map_err(|_| {
                CdcError::ConfigError(format!("CDC_TIMEOUT_SECS 값이 잘못됨: {}", raw))
            })?),
            None => defaults.timeout,
        };

        let flavor = match lookup("CDC_FLAVOR") {
            Some(raw) => raw.parse()?,
            None => defaults.flavor,
        };

        Ok(ConnectionConfig {
            hostname: lookup("DB_HOST").unwrap_or(defaults.hostname),
            port,
            username: lookup("DB_USER").unwrap_or(defaults.username),
            password: lookup("DB_PASSWORD").unwrap_or(defaults.password),
            server_id,
            timeout,
            flavor,
            use_decimal: defaults.use_decimal,
            dump_execution_path: lookup("CDC_DUMP_PATH")
                .filter(|p| !p.is_empty())
                .map(PathBuf::from),
        })
    }

    /// `host:port` 주소
    pub fn addr(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }

    pub(crate) fn build_opts(&self, database: Option<&str>) -> Opts {
        OptsBuilder::default()
            .ip_or_hostname(self.hostname.clone())
            .tcp_port(self.port)
            .user(Some(self.username.clone()))
            .pass(Some(self.password.clone()))
            .db_name(database.map(str::to_string))
            .into()
    }

    /// 타임아웃이 걸린 단일 연결 열기
    pub(crate) async fn open_conn(&self, database: Option<&str>) -> Result<Conn> {
        let opts = self.build_opts(database);
        match tokio::time::timeout(self.timeout, Conn::new(opts)).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(e)) => Err(CdcError::ConnectionError(format!(
                "Failed to connect to MySQL at {}: {}",
                self.addr(),
                e
            ))),
            Err(_) => Err(CdcError::Timeout),
        }
    }

    /// 스키마 조회용 커넥션 풀
    pub(crate) fn metadata_pool(&self) -> Pool {
        Pool::new(self.build_opts(Some(ADMIN_DATABASE)))
    }
}

/// 관리용 MySQL 연결
///
/// 한 번의 작업 범위 안에서만 사용하고 `close`로 반드시 반환한다.
pub struct AdminConnection {
    conn: Conn,
}

impl AdminConnection {
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let conn = config.open_conn(Some(ADMIN_DATABASE)).await?;
        debug!("Admin connection opened to {}", config.addr());
        Ok(AdminConnection { conn })
    }

    /// 단일 행, 단일 컬럼 문자열 조회
    pub async fn query_string(&mut self, query: &str) -> Result<Option<String>> {
        self.conn
            .query_first::<Option<String>, _>(query)
            .await
            .map(Option::flatten)
            .map_err(|e| CdcError::QueryError(format!("{}: {}", query, e)))
    }

    /// 단일 행, 단일 컬럼 정수 조회
    pub async fn query_int(&mut self, query: &str) -> Result<Option<i64>> {
        self.conn
            .query_first::<Option<i64>, _>(query)
            .await
            .map(Option::flatten)
            .map_err(|e| CdcError::QueryError(format!("{}: {}", query, e)))
    }

    /// 현재 실행된 GTID 집합 조회
    pub async fn executed_gtid_set(&mut self) -> Result<GtidSet> {
        match self.query_string("SELECT @@GLOBAL.gtid_executed").await? {
            Some(raw) => GtidSet::parse(&raw),
            None => Ok(GtidSet::new()),
        }
    }

    /// 연결 종료. 실패해도 호출자의 결과를 바꾸지 않는다.
    pub async fn close(self) {
        if let Err(e) = self.conn.disconnect().await {
            warn!("Failed to close admin connection: {}", e);
        }
    }
}

/// `INFORMATION_SCHEMA.COLUMNS`에서 테이블 디스크립터 조회
pub async fn load_table_descriptor(
    pool: &Pool,
    schema: &str,
    table: &str,
) -> Result<Option<TableDescriptor>> {
    let mut conn = pool.get_conn().await.map_err(|e| {
        CdcError::ConnectionError(format!("Failed to get metadata connection: {}", e))
    })?;

    let columns: Vec<(String, String)> = conn
        .exec(
            "SELECT COLUMN_NAME, DATA_TYPE \
             FROM INFORMATION_SCHEMA.COLUMNS \
             WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? \
             ORDER BY ORDINAL_POSITION",
            (schema, table),
        )
        .await
        .map_err(|e| CdcError::QueryError(format!("Failed to query table schema: {}", e)))?;

    if columns.is_empty() {
        return Ok(None);
    }

    Ok(Some(TableDescriptor::new(
        schema,
        table,
        columns
            .into_iter()
            .map(|(name, data_type)| ColumnDescriptor::new(name, data_type))
            .collect(),
    )))
}

//! MySQL GTID CDC 엔진
//!
//! 엔진은 다음 단계로 진행됩니다:
//! 1. 부트스트랩 (gtid_mode, server_uuid, server_id 확인)
//! 2. 시작 위치 결정 (gtid_executed 또는 명시 범위)
//! 3. Binlog 스트리밍 (종료 신호까지)

use crate::binlog_client::{StreamingSession, DEFAULT_INBOX_CAPACITY};
use crate::bootstrap::{resolve_identity, BootstrapOutcome, ReplicationIdentity};
use crate::connection::{AdminConnection, ConnectionConfig};
use crate::error::{CdcError, Result};
use crate::normalizer::EventHandler;
use crate::position::{resolve_start_position, SequenceRange};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// CDC 엔진 설정
#[derive(Debug, Clone)]
pub struct CdcConfig {
    pub connection: ConnectionConfig,
    /// 명시 시작 범위 (`CDC_START_RANGE`, 예: "1-100")
    pub start_range: Option<SequenceRange>,
    pub inbox_capacity: usize,
    pub shutdown_timeout: Duration,
}

impl CdcConfig {
    pub fn new(connection: ConnectionConfig) -> Self {
        CdcConfig {
            connection,
            start_range: None,
            inbox_capacity: DEFAULT_INBOX_CAPACITY,
            shutdown_timeout: Duration::from_secs(10),
        }
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let connection = ConnectionConfig::from_lookup(&lookup)?;
        let start_range = lookup("CDC_START_RANGE")
            .filter(|raw| !raw.trim().is_empty())
            .map(|raw| raw.trim().parse())
            .transpose()?;

        Ok(CdcConfig {
            start_range,
            ..CdcConfig::new(connection)
        })
    }
}

/// 엔진 실행 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// GTID 모드가 꺼져 있어 스트리밍하지 않음
    Ineligible { gtid_mode: String },
    /// 종료 신호로 정상 종료
    Stopped,
}

/// MySQL CDC 엔진
pub struct CdcEngine {
    config: CdcConfig,
}

impl CdcEngine {
    pub fn new(config: CdcConfig) -> Self {
        CdcEngine { config }
    }

    /// 부트스트랩 후 종료 신호까지 스트리밍
    ///
    /// 부트스트랩 실패는 에러로 반환된다. 시작 위치 조회나 스트림 시작 실패는
    /// 로그만 남기고 종료 신호를 기다린다.
    pub async fn run<H>(self, handler: H, shutdown: CancellationToken) -> Result<RunOutcome>
    where
        H: EventHandler + 'static,
    {
        info!(
            "Starting CDC engine against {}",
            self.config.connection.addr()
        );

        let identity = match resolve_identity(&self.config.connection).await? {
            BootstrapOutcome::Eligible(identity) => identity,
            BootstrapOutcome::Ineligible { gtid_mode } => {
                warn!("GTID mode is '{}', not streaming", gtid_mode);
                return Ok(RunOutcome::Ineligible { gtid_mode });
            }
        };

        check_replica_id(&self.config.connection, &identity)?;

        let shutdown_timeout = self.config.shutdown_timeout;
        let startup = tokio::spawn(stream_until_cancelled(
            self.config,
            identity,
            handler,
            shutdown.clone(),
        ));

        shutdown.cancelled().await;
        info!("Shutdown requested");

        match tokio::time::timeout(shutdown_timeout, startup).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Startup task panicked: {}", e),
            Err(_) => warn!("Timed out waiting for streaming session to close"),
        }

        info!("CDC engine stopped");
        Ok(RunOutcome::Stopped)
    }
}

/// 복제 클라이언트 server_id는 소스 서버와 달라야 한다.
fn check_replica_id(config: &ConnectionConfig, identity: &ReplicationIdentity) -> Result<()> {
    if config.server_id == identity.source_server_numeric_id {
        return Err(CdcError::ConfigError(format!(
            "CDC_SERVER_ID({})가 소스 서버 server_id와 같습니다",
            config.server_id
        )));
    }
    Ok(())
}

async fn stream_until_cancelled<H>(
    config: CdcConfig,
    identity: ReplicationIdentity,
    handler: H,
    shutdown: CancellationToken,
) where
    H: EventHandler + 'static,
{
    let mut session = StreamingSession::new(config.connection.clone(), &shutdown)
        .with_inbox_capacity(config.inbox_capacity)
        .with_close_timeout(config.shutdown_timeout);

    if let Err(e) = start_session(&config, &identity, &mut session, handler).await {
        error!("Failed to start binlog streaming: {}", e);
        return;
    }

    shutdown.cancelled().await;
    session.close().await;
    info!("Final stream position: {}", session.source_info().to_json());
}

async fn start_session<H>(
    config: &CdcConfig,
    identity: &ReplicationIdentity,
    session: &mut StreamingSession,
    handler: H,
) -> Result<()>
where
    H: EventHandler + 'static,
{
    let mut admin = AdminConnection::connect(&config.connection).await?;
    let executed = admin.executed_gtid_set().await;
    admin.close().await;

    let executed = executed?;
    info!("Executed GTID set: {}", executed);

    let position = resolve_start_position(identity, config.start_range, &executed)?;
    session.start_from_gtid(position, handler).await
}

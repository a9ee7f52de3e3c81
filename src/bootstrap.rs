//! 복제 부트스트랩: 소스 서버의 GTID 설정 확인
//!
//! 세 개의 전역 변수를 순서대로 조회해 스트리밍을 시작할 수 있는지 판단한다.
//! 1. `gtid_mode`: 정확히 "ON"이어야 함 (아니면 스트리밍 대상 아님, 에러 아님)
//! 2. `server_uuid`: GTID 집합 구성에 쓰이는 소스 UUID
//! 3. `server_id`: 양수인 숫자 ID

use crate::connection::{AdminConnection, ConnectionConfig};
use crate::error::{CdcError, Result};
use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

pub const GTID_MODE_QUERY: &str = "SELECT @@GLOBAL.gtid_mode";
pub const SERVER_UUID_QUERY: &str = "SELECT @@GLOBAL.server_uuid";
pub const SERVER_ID_QUERY: &str = "SELECT @@GLOBAL.server_id";

/// 변수가 비어 있음을 나타내는 센티널 값
const NONE_SENTINEL: &str = "NONE";

/// 검증이 끝난 복제 식별 정보
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReplicationIdentity {
    pub gtid_mode_enabled: bool,
    pub source_server_id: Uuid,
    pub source_server_numeric_id: u32,
}

impl ReplicationIdentity {
    pub fn new(source_server_id: Uuid, source_server_numeric_id: u32) -> Self {
        ReplicationIdentity {
            gtid_mode_enabled: true,
            source_server_id,
            source_server_numeric_id,
        }
    }
}

/// 부트스트랩 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// 스트리밍 가능
    Eligible(ReplicationIdentity),
    /// GTID 모드가 완전히 켜져 있지 않음 (에러 아님)
    Ineligible { gtid_mode: String },
}

/// 단일 행, 단일 컬럼 변수 조회
#[async_trait]
pub trait VariableProbe: Send {
    async fn fetch_string(&mut self, query: &'static str) -> Result<Option<String>>;
    async fn fetch_int(&mut self, query: &'static str) -> Result<Option<i64>>;
}

#[async_trait]
impl VariableProbe for AdminConnection {
    async fn fetch_string(&mut self, query: &'static str) -> Result<Option<String>> {
        self.query_string(query).await
    }

    async fn fetch_int(&mut self, query: &'static str) -> Result<Option<i64>> {
        self.query_int(query).await
    }
}

/// 관리용 연결을 열어 복제 식별 정보를 확인한다.
///
/// 연결은 결과와 관계없이 반환 전에 닫힌다.
pub async fn resolve_identity(config: &ConnectionConfig) -> Result<BootstrapOutcome> {
    let mut conn = AdminConnection::connect(config)
        .await
        .map_err(|e| e.context("bootstrap"))?;

    let outcome = resolve_with(&mut conn).await;
    conn.close().await;

    outcome
}

/// 프로브 순서대로 조회 및 검증. 첫 실패에서 멈춘다.
pub async fn resolve_with<P>(probe: &mut P) -> Result<BootstrapOutcome>
where
    P: VariableProbe + ?Sized,
{
    let gtid_mode = probe
        .fetch_string(GTID_MODE_QUERY)
        .await
        .map_err(|e| e.context("gtid_mode"))?
        .unwrap_or_default();

    if gtid_mode != "ON" {
        info!("GTID mode is '{}', not eligible for streaming", gtid_mode);
        return Ok(BootstrapOutcome::Ineligible { gtid_mode });
    }

    let raw_uuid = probe
        .fetch_string(SERVER_UUID_QUERY)
        .await
        .map_err(|e| e.context("server_uuid"))?;
    let source_server_id = validate_server_uuid(raw_uuid)?;

    let raw_id = probe
        .fetch_int(SERVER_ID_QUERY)
        .await
        .map_err(|e| e.context("server_id"))?;
    let source_server_numeric_id = validate_server_id(raw_id)?;

    info!(
        "GTIDMode: {}, masterServerUuid: {}, masterServerId: {}",
        gtid_mode, source_server_id, source_server_numeric_id
    );

    Ok(BootstrapOutcome::Eligible(ReplicationIdentity::new(
        source_server_id,
        source_server_numeric_id,
    )))
}

fn validate_server_uuid(raw: Option<String>) -> Result<Uuid> {
    let value = match raw {
        Some(v) if !v.is_empty() && v != NONE_SENTINEL => v,
        _ => return Err(CdcError::MissingVariable("server_uuid")),
    };

    Uuid::parse_str(&value).map_err(|source| CdcError::InvalidServerUuid { value, source })
}

fn validate_server_id(raw: Option<i64>) -> Result<u32> {
    let value = raw.ok_or(CdcError::MissingVariable("server_id"))?;
    if value <= 0 {
        return Err(CdcError::InvalidServerId(value));
    }
    u32::try_from(value).map_err(|_| CdcError::InvalidServerId(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tokio_test::{assert_err, assert_ok};

    const UUID: &str = "3e11fa47-71ca-11e1-9e33-c80aa9429562";

    enum Answer {
        Text(Option<String>),
        Int(Option<i64>),
        Fail,
    }

    #[derive(Default)]
    struct FakeProbe {
        answers: HashMap<&'static str, Answer>,
        issued: Vec<&'static str>,
    }

    impl FakeProbe {
        fn server(mode: &str, uuid: &str, id: i64) -> Self {
            let mut probe = FakeProbe::default();
            probe
                .answers
                .insert(GTID_MODE_QUERY, Answer::Text(Some(mode.to_string())));
            probe
                .answers
                .insert(SERVER_UUID_QUERY, Answer::Text(Some(uuid.to_string())));
            probe.answers.insert(SERVER_ID_QUERY, Answer::Int(Some(id)));
            probe
        }

        fn answer(mut self, query: &'static str, answer: Answer) -> Self {
            self.answers.insert(query, answer);
            self
        }
    }

    #[async_trait]
    impl VariableProbe for FakeProbe {
        async fn fetch_string(&mut self, query: &'static str) -> Result<Option<String>> {
            self.issued.push(query);
            match self.answers.get(query) {
                Some(Answer::Text(v)) => Ok(v.clone()),
                Some(Answer::Fail) => Err(CdcError::QueryError("connection reset".to_string())),
                _ => Ok(None),
            }
        }

        async fn fetch_int(&mut self, query: &'static str) -> Result<Option<i64>> {
            self.issued.push(query);
            match self.answers.get(query) {
                Some(Answer::Int(v)) => Ok(*v),
                Some(Answer::Fail) => Err(CdcError::QueryError("connection reset".to_string())),
                _ => Ok(None),
            }
        }
    }

    #[tokio::test]
    async fn test_valid_server_is_eligible() {
        let mut probe = FakeProbe::server("ON", UUID, 7);
        let outcome = assert_ok!(resolve_with(&mut probe).await);

        assert_eq!(
            outcome,
            BootstrapOutcome::Eligible(ReplicationIdentity {
                gtid_mode_enabled: true,
                source_server_id: Uuid::parse_str(UUID).unwrap(),
                source_server_numeric_id: 7,
            })
        );
        assert_eq!(
            probe.issued,
            vec![GTID_MODE_QUERY, SERVER_UUID_QUERY, SERVER_ID_QUERY]
        );
    }

    #[tokio::test]
    async fn test_partial_gtid_modes_are_ineligible() {
        for mode in ["ON_PERMISSIVE", "OFF_PERMISSIVE", "OFF", "NONE", "", "on"] {
            let mut probe = FakeProbe::server(mode, UUID, 7);
            let outcome = assert_ok!(resolve_with(&mut probe).await);
            assert_eq!(
                outcome,
                BootstrapOutcome::Ineligible {
                    gtid_mode: mode.to_string()
                }
            );
            assert_eq!(probe.issued, vec![GTID_MODE_QUERY]);
        }
    }

    #[tokio::test]
    async fn test_missing_gtid_mode_row_is_ineligible() {
        let mut probe =
            FakeProbe::server("ON", UUID, 7).answer(GTID_MODE_QUERY, Answer::Text(None));
        let outcome = assert_ok!(resolve_with(&mut probe).await);
        assert!(matches!(outcome, BootstrapOutcome::Ineligible { .. }));
    }

    #[tokio::test]
    async fn test_malformed_uuid_fails_regardless_of_id() {
        for id in [7, 0, -1] {
            let mut probe = FakeProbe::server("ON", "not-a-uuid", id);
            let err = assert_err!(resolve_with(&mut probe).await);
            assert!(matches!(
                err,
                CdcError::InvalidServerUuid { ref value, .. } if value == "not-a-uuid"
            ));
        }
    }

    #[tokio::test]
    async fn test_uuid_sentinel_is_missing() {
        let mut probe = FakeProbe::server("ON", "NONE", 7);
        let err = assert_err!(resolve_with(&mut probe).await);
        assert!(matches!(err, CdcError::MissingVariable("server_uuid")));
        assert_eq!(probe.issued, vec![GTID_MODE_QUERY, SERVER_UUID_QUERY]);
    }

    #[tokio::test]
    async fn test_non_positive_server_id_fails() {
        for id in [0, -5] {
            let mut probe = FakeProbe::server("ON", UUID, id);
            let err = assert_err!(resolve_with(&mut probe).await);
            assert!(matches!(err, CdcError::InvalidServerId(v) if v == id));
        }
    }

    #[tokio::test]
    async fn test_oversized_server_id_fails() {
        let mut probe = FakeProbe::server("ON", UUID, i64::from(u32::MAX) + 1);
        assert!(matches!(
            resolve_with(&mut probe).await,
            Err(CdcError::InvalidServerId(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_server_id_row() {
        let mut probe = FakeProbe::server("ON", UUID, 7).answer(SERVER_ID_QUERY, Answer::Int(None));
        assert!(matches!(
            resolve_with(&mut probe).await,
            Err(CdcError::MissingVariable("server_id"))
        ));
    }

    #[tokio::test]
    async fn test_query_failure_stops_probing() {
        let mut probe = FakeProbe::server("ON", UUID, 7).answer(SERVER_UUID_QUERY, Answer::Fail);
        let err = assert_err!(resolve_with(&mut probe).await);

        assert!(matches!(err, CdcError::QueryError(ref msg) if msg.starts_with("server_uuid")));
        assert_eq!(probe.issued, vec![GTID_MODE_QUERY, SERVER_UUID_QUERY]);
    }

    #[tokio::test]
    async fn test_resolution_is_idempotent() {
        let mut first = FakeProbe::server("ON", UUID, 42);
        let mut second = FakeProbe::server("ON", UUID, 42);
        let a = assert_ok!(resolve_with(&mut first).await);
        let b = assert_ok!(resolve_with(&mut second).await);
        assert_eq!(a, b);
    }

    #[tokio::test]
    #[ignore] // 실제 MySQL 연결 필요
    async fn test_resolve_identity_live() {
        let config = ConnectionConfig::from_env().unwrap();
        let outcome = resolve_identity(&config).await.unwrap();
        println!("{:?}", outcome);
    }
}

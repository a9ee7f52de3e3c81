//! 복제 시작 위치 생성
//!
//! 소스 서버가 이미 실행한 트랜잭션 범위를 GTID 집합으로 만들어
//! 그 바로 다음부터 스트리밍을 시작한다.

use crate::bootstrap::ReplicationIdentity;
use crate::error::{CdcError, Result};
use crate::gtid::{GtidSet, MAX_SEQUENCE};
use mysql_async::Sid;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

/// 트랜잭션 시퀀스 범위 (양 끝 포함, 1부터)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceRange {
    first: u64,
    last: u64,
}

impl SequenceRange {
    pub fn new(first: u64, last: u64) -> Result<Self> {
        if first == 0 || first > last || last > MAX_SEQUENCE {
            return Err(CdcError::GtidError(format!(
                "Invalid sequence range: {}-{}",
                first, last
            )));
        }
        Ok(SequenceRange { first, last })
    }

    /// 서버의 `gtid_executed`에서 소스 UUID가 실행한 범위 (`1..=최대값`)
    ///
    /// 소스가 아직 아무것도 실행하지 않았다면 `None`.
    pub fn from_executed(executed: &GtidSet, identity: &ReplicationIdentity) -> Option<Self> {
        let last = executed
            .get(&identity.source_server_id)
            .and_then(|set| set.last_sequence())?;
        SequenceRange::new(1, last).ok()
    }
}

impl FromStr for SequenceRange {
    type Err = CdcError;

    /// "1-100" 또는 "42"
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || CdcError::ConfigError(format!("Invalid sequence range: {}", s));
        let (first, last) = match s.trim().split_once('-') {
            Some((first, last)) => (
                first.trim().parse().map_err(|_| invalid())?,
                last.trim().parse().map_err(|_| invalid())?,
            ),
            None => (1, s.trim().parse().map_err(|_| invalid())?),
        };
        SequenceRange::new(first, last).map_err(|_| invalid())
    }
}

impl fmt::Display for SequenceRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.first, self.last)
    }
}

/// 스트리밍 세션 시작 위치
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartPosition {
    gtid_set: GtidSet,
}

impl StartPosition {
    /// 실행된 트랜잭션이 없을 때: 서버에 남아 있는 가장 오래된 binlog부터
    pub fn empty() -> Self {
        StartPosition {
            gtid_set: GtidSet::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.gtid_set.is_empty()
    }

    /// 복제 요청에 넣을 SID 목록 (한 번만 소비)
    pub fn into_sids(self) -> Vec<Sid<'static>> {
        self.gtid_set.to_sids()
    }
}

impl fmt::Display for StartPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.gtid_set)
    }
}

/// `<uuid>:<first>-<last>` 형식의 GTID 집합을 만들어 파싱한다.
pub fn build_start_position(
    identity: &ReplicationIdentity,
    range: SequenceRange,
) -> Result<StartPosition> {
    let expr = format!("{}:{}", identity.source_server_id, range);
    let gtid_set = GtidSet::parse(&expr).map_err(|e| e.context(&expr))?;

    debug!("Start position: {}", gtid_set);
    Ok(StartPosition { gtid_set })
}

/// 명시 범위 → 서버 실행 범위 → 빈 위치 순서로 시작 위치 결정
pub fn resolve_start_position(
    identity: &ReplicationIdentity,
    override_range: Option<SequenceRange>,
    executed: &GtidSet,
) -> Result<StartPosition> {
    if let Some(range) = override_range {
        return build_start_position(identity, range);
    }

    match SequenceRange::from_executed(executed, identity) {
        Some(range) => build_start_position(identity, range),
        None => {
            warn!(
                "No executed transactions recorded for {}, streaming from the oldest retained binlog",
                identity.source_server_id
            );
            Ok(StartPosition::empty())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    const UUID: &str = "3e11fa47-71ca-11e1-9e33-c80aa9429562";

    fn identity() -> ReplicationIdentity {
        ReplicationIdentity::new(Uuid::parse_str(UUID).unwrap(), 1)
    }

    #[test]
    fn test_build_start_position() {
        let range = SequenceRange::new(1, 57).unwrap();
        let position = build_start_position(&identity(), range).unwrap();
        assert_eq!(position.to_string(), format!("{}:1-57", UUID));
        assert_eq!(position.into_sids().len(), 1);
    }

    #[test]
    fn test_sequence_range_validation() {
        assert!(SequenceRange::new(0, 5).is_err());
        assert!(SequenceRange::new(6, 5).is_err());
        assert_eq!("3-9".parse::<SequenceRange>().unwrap(), SequenceRange::new(3, 9).unwrap());
        assert_eq!("12".parse::<SequenceRange>().unwrap(), SequenceRange::new(1, 12).unwrap());
        assert!("x-9".parse::<SequenceRange>().is_err());
    }

    #[test]
    fn test_sequence_range_parse_errors_are_config_errors() {
        let too_large = format!("1-{}", u64::MAX);
        for raw in ["20-5", "0-3", "0", "x-9", too_large.as_str()] {
            assert!(
                matches!(raw.parse::<SequenceRange>(), Err(CdcError::ConfigError(_))),
                "{}",
                raw
            );
        }
        assert!(SequenceRange::new(1, MAX_SEQUENCE).is_ok());
    }

    #[test]
    fn test_range_from_executed_uses_highest_sequence() {
        let other = "550e8400-e29b-41d4-a716-446655440000";
        let executed = GtidSet::parse(&format!("{}:1-10:15-20,\n{}:1-999", UUID, other)).unwrap();
        let range = SequenceRange::from_executed(&executed, &identity()).unwrap();
        assert_eq!(range, SequenceRange::new(1, 20).unwrap());
    }

    #[test]
    fn test_resolve_prefers_override() {
        let executed = GtidSet::parse(&format!("{}:1-100", UUID)).unwrap();
        let position =
            resolve_start_position(&identity(), Some(SequenceRange::new(1, 2).unwrap()), &executed)
                .unwrap();
        assert_eq!(position.to_string(), format!("{}:1-2", UUID));
    }

    #[test]
    fn test_resolve_without_history_is_empty() {
        let position = resolve_start_position(&identity(), None, &GtidSet::new()).unwrap();
        assert!(position.is_empty());
        assert!(position.into_sids().is_empty());
    }
}

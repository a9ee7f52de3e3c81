//! GTID (Global Transaction ID) 집합
//!
//! GTID 형식: UUID:sequence-number
//! 여러 서버의 GTID 집합: "uuid1:1-100:200,uuid2:1-50"
//! `@@GLOBAL.gtid_executed`는 쉼표 뒤에 줄바꿈이 들어갈 수 있다.

use crate::error::{CdcError, Result};
use mysql_async::{GnoInterval, Sid};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// GTID 범위 (양 끝 포함)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GtidRange {
    pub start: u64,
    pub end: u64,
}

/// MySQL이 허용하는 가장 큰 GTID 시퀀스 번호 (2^63-1)
pub const MAX_SEQUENCE: u64 = i64::MAX as u64;

impl GtidRange {
    pub fn new(start: u64, end: u64) -> Result<Self> {
        if end > MAX_SEQUENCE {
            return Err(CdcError::GtidError(format!(
                "Invalid range: {} exceeds {}",
                end, MAX_SEQUENCE
            )));
        }
        if start == 0 {
            return Err(CdcError::GtidError(
                "Invalid range: sequence numbers start at 1".to_string(),
            ));
        }
        if start > end {
            return Err(CdcError::GtidError(format!(
                "Invalid range: {} > {}",
                start, end
            )));
        }
        Ok(GtidRange { start, end })
    }

    fn merge(&self, other: &GtidRange) -> Option<GtidRange> {
        // 연접한 범위 병합
        if self.end.saturating_add(1) >= other.start
            && other.end.saturating_add(1) >= self.start
        {
            Some(GtidRange {
                start: self.start.min(other.start),
                end: self.end.max(other.end),
            })
        } else {
            None
        }
    }

    fn parse(text: &str) -> Result<Self> {
        let invalid = || CdcError::GtidError(format!("Invalid interval: {}", text));
        match text.split_once('-') {
            Some((start, end)) => GtidRange::new(
                start.trim().parse().map_err(|_| invalid())?,
                end.trim().parse().map_err(|_| invalid())?,
            ),
            None => {
                let seq = text.trim().parse().map_err(|_| invalid())?;
                GtidRange::new(seq, seq)
            }
        }
    }
}

impl fmt::Display for GtidRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// 한 소스 UUID의 GTID 범위들 (정렬, 병합 상태 유지)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceGtidSet {
    pub uuid: Uuid,
    pub ranges: Vec<GtidRange>,
}

impl SourceGtidSet {
    pub fn new(uuid: Uuid) -> Self {
        SourceGtidSet {
            uuid,
            ranges: Vec::new(),
        }
    }

    pub fn add_range(&mut self, range: GtidRange) {
        self.ranges.push(range);
        self.ranges.sort();

        let mut merged: Vec<GtidRange> = Vec::with_capacity(self.ranges.len());
        for r in self.ranges.drain(..) {
            match merged.last_mut() {
                Some(last) => match last.merge(&r) {
                    Some(m) => *last = m,
                    None => merged.push(r),
                },
                None => merged.push(r),
            }
        }
        self.ranges = merged;
    }

    /// 기록된 가장 큰 시퀀스 번호
    pub fn last_sequence(&self) -> Option<u64> {
        self.ranges.last().map(|r| r.end)
    }

    /// 복제 라이브러리의 SID 표현으로 변환 (GnoInterval은 끝이 열린 구간)
    pub fn to_sid(&self) -> Sid<'static> {
        self.ranges
            .iter()
            .fold(Sid::new(*self.uuid.as_bytes()), |sid, r| {
                sid.with_interval(GnoInterval::new(r.start, r.end + 1))
            })
    }
}

impl fmt::Display for SourceGtidSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uuid)?;
        for r in &self.ranges {
            write!(f, ":{}", r)?;
        }
        Ok(())
    }
}

/// 전체 GTID 집합 (여러 UUID)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GtidSet {
    pub sets: BTreeMap<Uuid, SourceGtidSet>,
}

impl GtidSet {
    pub fn new() -> Self {
        GtidSet {
            sets: BTreeMap::new(),
        }
    }

    /// GTID 문자열 파싱
    ///
    /// 허용 형식: "uuid:1-100:200", "uuid:1-100,uuid2:5", 쉼표 뒤 연속 구간 "uuid:1-3,7-9"
    pub fn parse(gtid_str: &str) -> Result<Self> {
        let mut gtid_set = GtidSet::new();
        let text = gtid_str.trim();

        if text.is_empty() || text.eq_ignore_ascii_case("NULL") {
            return Ok(gtid_set);
        }

        let mut current: Option<Uuid> = None;

        for part in text.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            let mut pieces = part.split(':');
            let head = pieces.next().unwrap_or_default().trim();

            let (uuid, intervals): (Uuid, Vec<&str>) = if part.contains(':') {
                let uuid = Uuid::parse_str(head)
                    .map_err(|e| CdcError::GtidError(format!("Invalid UUID '{}': {}", head, e)))?;
                (uuid, pieces.collect())
            } else {
                // UUID 없는 구간은 직전 UUID에 속한다
                let uuid = current.ok_or_else(|| {
                    CdcError::GtidError(format!("Interval without UUID: {}", part))
                })?;
                (uuid, vec![head])
            };

            if intervals.is_empty() {
                return Err(CdcError::GtidError(format!("Missing interval: {}", part)));
            }

            let entry = gtid_set
                .sets
                .entry(uuid)
                .or_insert_with(|| SourceGtidSet::new(uuid));
            for interval in intervals {
                entry.add_range(GtidRange::parse(interval)?);
            }
            current = Some(uuid);
        }

        Ok(gtid_set)
    }

    pub fn get(&self, uuid: &Uuid) -> Option<&SourceGtidSet> {
        self.sets.get(uuid)
    }

    pub fn is_empty(&self) -> bool {
        self.sets.values().all(|set| set.ranges.is_empty())
    }

    pub fn to_sids(&self) -> Vec<Sid<'static>> {
        self.sets
            .values()
            .filter(|set| !set.ranges.is_empty())
            .map(SourceGtidSet::to_sid)
            .collect()
    }
}

impl fmt::Display for GtidSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .sets
            .values()
            .filter(|set| !set.ranges.is_empty())
            .map(|set| set.to_string())
            .collect();
        write!(f, "{}", parts.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UUID_A: &str = "550e8400-e29b-41d4-a716-446655440000";
    const UUID_B: &str = "3e11fa47-71ca-11e1-9e33-c80aa9429562";

    #[test]
    fn test_gtid_parse_single_range() {
        let set = GtidSet::parse(&format!("{}:1-100", UUID_A)).unwrap();
        let uuid = Uuid::parse_str(UUID_A).unwrap();
        let source = set.get(&uuid).unwrap();
        assert_eq!(source.ranges, vec![GtidRange { start: 1, end: 100 }]);
        assert_eq!(source.last_sequence(), Some(100));
    }

    #[test]
    fn test_gtid_parse_multi_source_with_newlines() {
        let raw = format!("{}:1-5:7,\n{}:1-3,\n9-10", UUID_A, UUID_B);
        let set = GtidSet::parse(&raw).unwrap();
        assert_eq!(set.sets.len(), 2);

        let b = set.get(&Uuid::parse_str(UUID_B).unwrap()).unwrap();
        assert_eq!(b.last_sequence(), Some(10));
        assert_eq!(b.ranges.len(), 2);
    }

    #[test]
    fn test_gtid_adjacent_ranges_merge() {
        let set = GtidSet::parse(&format!("{}:1-5:6-9:11", UUID_A)).unwrap();
        assert_eq!(set.to_string(), format!("{}:1-9:11", UUID_A));
    }

    #[test]
    fn test_gtid_parse_empty() {
        assert!(GtidSet::parse("").unwrap().is_empty());
        assert!(GtidSet::parse("  \n").unwrap().is_empty());
    }

    #[test]
    fn test_gtid_parse_rejects_garbage() {
        assert!(GtidSet::parse("not-a-uuid:1-2").is_err());
        assert!(GtidSet::parse(&format!("{}:5-1", UUID_A)).is_err());
        assert!(GtidSet::parse(&format!("{}:0-3", UUID_A)).is_err());
        assert!(GtidSet::parse(&format!("{}:", UUID_A)).is_err());
        assert!(GtidSet::parse("1-5").is_err());
    }

    #[test]
    fn test_gtid_sequence_upper_bound() {
        let max = GtidSet::parse(&format!("{}:1-{}", UUID_A, MAX_SEQUENCE)).unwrap();
        assert_eq!(max.to_sids().len(), 1);

        assert!(GtidRange::new(1, u64::MAX).is_err());
        assert!(GtidSet::parse(&format!("{}:1-{}", UUID_A, u64::MAX)).is_err());
    }

    #[test]
    fn test_to_sids_skips_empty_sources() {
        let set = GtidSet::parse(&format!("{}:1-2,{}:4", UUID_A, UUID_B)).unwrap();
        assert_eq!(set.to_sids().len(), 2);
        assert!(GtidSet::new().to_sids().is_empty());
    }
}

//! 테이블 디스크립터 캐시와 DDL 대상 추출
//!
//! binlog 행 이벤트에는 컬럼 이름이 없으므로 INFORMATION_SCHEMA에서 읽은
//! 디스크립터를 캐시해 둔다. DDL이 들어오면 해당 항목을 무효화한다.

use crate::events::TableDescriptor;
use regex::Regex;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, OnceLock};
use tracing::debug;

type TableKey = (String, String);

/// (schema, table) → 디스크립터 캐시, FIFO 제거
pub struct SchemaCache {
    tables: HashMap<TableKey, Arc<TableDescriptor>>,
    insertion_order: VecDeque<TableKey>,
    max_entries: usize,
}

impl Default for SchemaCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaCache {
    const DEFAULT_MAX_ENTRIES: usize = 1000;

    pub fn new() -> Self {
        Self::with_max_entries(Self::DEFAULT_MAX_ENTRIES)
    }

    pub fn with_max_entries(max_entries: usize) -> Self {
        SchemaCache {
            tables: HashMap::new(),
            insertion_order: VecDeque::new(),
            max_entries: max_entries.max(1),
        }
    }

    pub fn get(&self, schema: &str, table: &str) -> Option<Arc<TableDescriptor>> {
        self.tables
            .get(&(schema.to_string(), table.to_string()))
            .cloned()
    }

    pub fn insert(&mut self, descriptor: TableDescriptor) -> Arc<TableDescriptor> {
        let key = (descriptor.schema.clone(), descriptor.name.clone());
        let descriptor = Arc::new(descriptor);

        if self
            .tables
            .insert(key.clone(), descriptor.clone())
            .is_none()
        {
            self.insertion_order.push_back(key);
            while self.tables.len() > self.max_entries {
                match self.insertion_order.pop_front() {
                    Some(oldest) => {
                        self.tables.remove(&oldest);
                        debug!("Evicted schema cache entry for {}.{}", oldest.0, oldest.1);
                    }
                    None => break,
                }
            }
        }

        descriptor
    }

    pub fn invalidate(&mut self, schema: &str, table: &str) -> bool {
        let key = (schema.to_string(), table.to_string());
        let removed = self.tables.remove(&key).is_some();
        if removed {
            self.insertion_order.retain(|k| k != &key);
        }
        removed
    }

    pub fn invalidate_schema(&mut self, schema: &str) {
        self.tables.retain(|(s, _), _| s != schema);
        self.insertion_order.retain(|(s, _)| s != schema);
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }
}

/// DDL이 가리키는 테이블
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DdlTarget {
    /// 쿼리에 스키마가 명시된 경우
    pub schema: Option<String>,
    pub table: String,
}

impl DdlTarget {
    /// 명시 스키마가 없으면 쿼리 이벤트의 기본 스키마 사용
    pub fn resolve_schema<'a>(&'a self, default_schema: &'a str) -> &'a str {
        self.schema.as_deref().unwrap_or(default_schema)
    }
}

fn ddl_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)^\s*ALTER\s+(?:ONLINE\s+|IGNORE\s+)*TABLE\s+([^\s(,;]+)",
            r"(?i)^\s*CREATE\s+(?:TEMPORARY\s+)?TABLE\s+(?:IF\s+NOT\s+EXISTS\s+)?([^\s(,;]+)",
            r"(?i)^\s*DROP\s+(?:TEMPORARY\s+)?TABLE\s+(?:IF\s+EXISTS\s+)?([^\s(,;]+)",
            r"(?i)^\s*TRUNCATE\s+(?:TABLE\s+)?([^\s(,;]+)",
            r"(?i)^\s*RENAME\s+TABLE\s+([^\s(,;]+)",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

/// 스키마 변경 쿼리 여부 (BEGIN, COMMIT 등은 제외)
pub fn is_ddl(query: &str) -> bool {
    let head = query
        .trim_start()
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();
    matches!(
        head.as_str(),
        "CREATE" | "ALTER" | "DROP" | "RENAME" | "TRUNCATE"
    )
}

/// DDL 쿼리에서 대상 테이블 추출
pub fn ddl_target(query: &str) -> Option<DdlTarget> {
    let token = ddl_patterns()
        .iter()
        .find_map(|re| re.captures(query))
        .and_then(|caps| caps.get(1))?
        .as_str();

    let mut parts = token.splitn(2, '.').map(|p| p.trim_matches('`'));

    let first = parts.next().filter(|p| !p.is_empty())?;
    match parts.next() {
        Some(table) if !table.is_empty() => Some(DdlTarget {
            schema: Some(first.to_string()),
            table: table.to_string(),
        }),
        Some(_) => None,
        None => Some(DdlTarget {
            schema: None,
            table: first.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(schema: &str, table: &str) -> TableDescriptor {
        TableDescriptor::with_column_names(schema, table, ["id"])
    }

    #[test]
    fn test_cache_insert_and_get() {
        let mut cache = SchemaCache::new();
        cache.insert(descriptor("db", "users"));
        assert!(cache.get("db", "users").is_some());
        assert!(cache.get("db", "orders").is_none());
    }

    #[test]
    fn test_cache_evicts_oldest() {
        let mut cache = SchemaCache::with_max_entries(2);
        cache.insert(descriptor("db", "a"));
        cache.insert(descriptor("db", "b"));
        cache.insert(descriptor("db", "c"));

        assert_eq!(cache.len(), 2);
        assert!(cache.get("db", "a").is_none());
        assert!(cache.get("db", "c").is_some());
    }

    #[test]
    fn test_cache_invalidation() {
        let mut cache = SchemaCache::new();
        cache.insert(descriptor("db", "a"));
        cache.insert(descriptor("db", "b"));
        cache.insert(descriptor("other", "a"));

        assert!(cache.invalidate("db", "a"));
        assert!(!cache.invalidate("db", "a"));
        cache.invalidate_schema("db");
        assert_eq!(cache.len(), 1);
        assert!(cache.get("other", "a").is_some());
    }

    #[test]
    fn test_is_ddl() {
        assert!(is_ddl("ALTER TABLE users ADD COLUMN age INT"));
        assert!(is_ddl("  create table t (id int)"));
        assert!(!is_ddl("BEGIN"));
        assert!(!is_ddl("COMMIT"));
        assert!(!is_ddl(""));
    }

    #[test]
    fn test_ddl_target_unqualified() {
        assert_eq!(
            ddl_target("ALTER TABLE users ADD COLUMN age INT"),
            Some(DdlTarget {
                schema: None,
                table: "users".to_string()
            })
        );
    }

    #[test]
    fn test_ddl_target_qualified_and_quoted() {
        let target = ddl_target("CREATE TABLE IF NOT EXISTS `shop`.`orders`(id INT)").unwrap();
        assert_eq!(target.schema.as_deref(), Some("shop"));
        assert_eq!(target.table, "orders");
        assert_eq!(target.resolve_schema("default"), "shop");
    }

    #[test]
    fn test_ddl_target_other_statements() {
        assert_eq!(ddl_target("DROP TABLE IF EXISTS t1").unwrap().table, "t1");
        assert_eq!(ddl_target("truncate table logs;").unwrap().table, "logs");
        assert_eq!(ddl_target("RENAME TABLE a TO b").unwrap().table, "a");
        assert!(ddl_target("CREATE DATABASE shop").is_none());
    }
}

//! MySQL GTID 기반 CDC (Change Data Capture) 클라이언트
//!
//! 소스 서버의 복제 식별 정보를 확인하고, GTID 위치부터 binlog를 스트리밍해
//! 행 변경을 컬럼 이름 기반 레코드로 정규화합니다.
//! 주요 기능:
//! - 부트스트랩 (gtid_mode / server_uuid / server_id 확인)
//! - GTID 시작 위치 구성
//! - 행 변경 이벤트 정규화 및 출력

pub mod binlog_client;
pub mod bootstrap;
pub mod cdc_engine;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod gtid;
pub mod normalizer;
pub mod offset;
pub mod position;
pub mod schema;
pub mod sink;

pub use binlog_client::StreamingSession;
pub use bootstrap::{resolve_identity, BootstrapOutcome, ReplicationIdentity};
pub use cdc_engine::{CdcConfig, CdcEngine, RunOutcome};
pub use connection::ConnectionConfig;
pub use error::{CdcError, Result};
pub use events::{ChangeRecord, RowChangeEvent, TableDescriptor};
pub use gtid::GtidSet;
pub use normalizer::{EventHandler, Normalizer};
pub use offset::SourceInfo;
pub use position::{build_start_position, StartPosition};

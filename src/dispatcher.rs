//! 단일 소비자 이벤트 전달
//!
//! 리더 태스크가 채운 inbox를 하나의 태스크가 순서대로 비우며 핸들러를 호출한다.
//! 핸들러는 동시에 두 번 호출되지 않으므로 내부 잠금이 필요 없다.

use crate::error::Result;
use crate::events::{DdlEvent, RotateEvent, RowChangeEvent};
use crate::normalizer::EventHandler;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// 스트리밍 측이 전달하는 이벤트
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Rows(RowChangeEvent),
    Ddl(DdlEvent),
    Rotate(RotateEvent),
    TableChanged { schema: String, table: String },
}

async fn deliver<H>(handler: &mut H, event: StreamEvent) -> Result<()>
where
    H: EventHandler,
{
    match event {
        StreamEvent::Rows(rows) => handler.on_row(&rows).await,
        StreamEvent::Ddl(ddl) => handler.on_ddl(&ddl).await,
        StreamEvent::Rotate(rotate) => handler.on_rotate(&rotate).await,
        StreamEvent::TableChanged { schema, table } => {
            handler.on_table_changed(&schema, &table).await
        }
    }
}

/// inbox가 닫히거나 종료 신호가 올 때까지 이벤트를 전달한다.
///
/// 종료 신호는 매 전달 전에 먼저 확인하므로 취소 이후에는 콜백이 호출되지 않는다.
/// 핸들러 에러는 그대로 반환되고 전달이 멈춘다.
pub async fn dispatch<H>(
    mut inbox: mpsc::Receiver<StreamEvent>,
    mut handler: H,
    shutdown: CancellationToken,
) -> Result<u64>
where
    H: EventHandler,
{
    let mut delivered = 0u64;

    loop {
        let event = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                debug!("{} dispatch cancelled", handler.name());
                break;
            }
            next = inbox.recv() => match next {
                Some(event) => event,
                None => break,
            },
        };

        deliver(&mut handler, event).await?;
        delivered += 1;
    }

    inbox.close();
    info!("{} delivered {} events", handler.name(), delivered);
    Ok(delivered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CdcError;
    use crate::events::{ColumnValue, RowAction, TableDescriptor};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Recorder {
        calls: Arc<Mutex<Vec<String>>>,
        fail_on_row: bool,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        async fn on_row(&mut self, event: &RowChangeEvent) -> Result<()> {
            if self.fail_on_row {
                return Err(CdcError::ChannelClosed);
            }
            self.calls
                .lock()
                .unwrap()
                .push(format!("row:{}", event.rows.len()));
            Ok(())
        }

        async fn on_ddl(&mut self, event: &DdlEvent) -> Result<()> {
            self.calls.lock().unwrap().push(format!("ddl:{}", event.query));
            Ok(())
        }

        async fn on_rotate(&mut self, event: &RotateEvent) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("rotate:{}", event.next_binlog));
            Ok(())
        }

        async fn on_table_changed(&mut self, schema: &str, table: &str) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("table:{}.{}", schema, table));
            Ok(())
        }
    }

    fn rows(count: usize) -> StreamEvent {
        let table = Arc::new(TableDescriptor::with_column_names("db", "t", ["id"]));
        StreamEvent::Rows(RowChangeEvent::new(
            table,
            RowAction::Insert,
            (0..count).map(|i| vec![ColumnValue::Int(i as i64)]).collect(),
        ))
    }

    fn ddl(query: &str) -> StreamEvent {
        StreamEvent::Ddl(DdlEvent {
            schema: "db".to_string(),
            query: query.to_string(),
            next_position: Default::default(),
        })
    }

    #[tokio::test]
    async fn test_dispatch_delivers_in_order() {
        let (tx, rx) = mpsc::channel(8);
        let recorder = Recorder::default();
        let calls = recorder.calls.clone();

        tx.send(StreamEvent::TableChanged {
            schema: "db".to_string(),
            table: "t".to_string(),
        })
        .await
        .unwrap();
        tx.send(ddl("ALTER TABLE t ADD c INT")).await.unwrap();
        tx.send(rows(2)).await.unwrap();
        tx.send(StreamEvent::Rotate(RotateEvent {
            next_binlog: "mysql-bin.000002".to_string(),
            position: 4,
        }))
        .await
        .unwrap();
        drop(tx);

        let delivered = dispatch(rx, recorder, CancellationToken::new()).await.unwrap();

        assert_eq!(delivered, 4);
        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                "table:db.t",
                "ddl:ALTER TABLE t ADD c INT",
                "row:2",
                "rotate:mysql-bin.000002"
            ]
        );
    }

    #[tokio::test]
    async fn test_no_callbacks_after_cancellation() {
        let (tx, rx) = mpsc::channel(8);
        let recorder = Recorder::default();
        let calls = recorder.calls.clone();
        let shutdown = CancellationToken::new();

        shutdown.cancel();
        tx.send(rows(1)).await.unwrap();
        tx.send(rows(3)).await.unwrap();

        let delivered = dispatch(rx, recorder, shutdown).await.unwrap();
        assert_eq!(delivered, 0);
        assert!(calls.lock().unwrap().is_empty());
        assert!(tx.is_closed());
    }

    #[tokio::test]
    async fn test_cancellation_while_waiting() {
        let (_tx, rx) = mpsc::channel::<StreamEvent>(8);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(dispatch(rx, Recorder::default(), shutdown.clone()));

        shutdown.cancel();
        assert_eq!(task.await.unwrap().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_handler_error_stops_dispatch() {
        let (tx, rx) = mpsc::channel(8);
        let recorder = Recorder {
            fail_on_row: true,
            ..Default::default()
        };
        let calls = recorder.calls.clone();

        tx.send(rows(1)).await.unwrap();
        tx.send(ddl("DROP TABLE t")).await.unwrap();

        let result = dispatch(rx, recorder, CancellationToken::new()).await;
        assert!(matches!(result, Err(CdcError::ChannelClosed)));
        assert!(calls.lock().unwrap().is_empty());
    }
}

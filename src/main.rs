/// MySQL GTID CDC 실행 파일
///
/// 환경 변수로 설정을 읽고, 종료 신호가 올 때까지 행 변경을 로그로 출력합니다.
use gtid_cdc::cdc_engine::{CdcConfig, CdcEngine, RunOutcome};
use gtid_cdc::normalizer::Normalizer;
use gtid_cdc::sink::LogSink;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 초기화
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = CdcConfig::from_env()?;
    info!(
        "Connecting to {} as {:?}",
        config.connection.addr(),
        config.connection
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    let engine = CdcEngine::new(config);
    match engine.run(Normalizer::new(LogSink), shutdown).await {
        Ok(RunOutcome::Stopped) => info!("Bye"),
        Ok(RunOutcome::Ineligible { gtid_mode }) => {
            info!("gtid_mode={}, enable GTID mode on the source to stream", gtid_mode)
        }
        Err(e) => {
            error!("Bootstrap failed: {}", e);
            return Err(e.into());
        }
    }

    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal(shutdown: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    let kinds = [
        ("SIGINT", SignalKind::interrupt()),
        ("SIGHUP", SignalKind::hangup()),
        ("SIGTERM", SignalKind::terminate()),
        ("SIGQUIT", SignalKind::quit()),
    ];

    let mut listeners = Vec::with_capacity(kinds.len());
    for (name, kind) in kinds {
        match signal(kind) {
            Ok(stream) => listeners.push((name, stream)),
            Err(e) => error!("Failed to listen for {}: {}", name, e),
        }
    }
    if listeners.is_empty() {
        return;
    }

    let received = futures::future::select_all(
        listeners
            .iter_mut()
            .map(|(name, stream)| {
                Box::pin(async move {
                    stream.recv().await;
                    *name
                })
            }),
    )
    .await
    .0;

    info!("Received {}, shutting down", received);
    shutdown.cancel();
}

#[cfg(not(unix))]
async fn wait_for_signal(shutdown: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("Received ctrl-c, shutting down");
            shutdown.cancel();
        }
        Err(e) => error!("Failed to listen for ctrl-c: {}", e),
    }
}

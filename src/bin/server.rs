//! ARQFT 서버 (송신자)
//!
//! 요청받은 파일을 선택한 ARQ 방식으로 전송
//! - SW: Stop-and-Wait
//! - GBN: Go-Back-N (누적 ACK)
//! - SR: Selective-Repeat (개별 ACK)
//!
//! 사용법:
//!   arqft-server <IP> <PORT> <PROTOCOL> <WINDOW_SIZE> <TIMEOUT> [OPTIONS]
//!
//! 예시:
//!   # Go-Back-N, 윈도우 6, RTO 200ms
//!   arqft-server 127.0.0.1 12345 GBN 6 0.2
//!
//!   # Selective-Repeat, 재시도 한도 100회
//!   arqft-server 0.0.0.0 12345 SR 8 0.5 --max-retries 100

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};

use arqft::{Config, Discipline, Sender, DEFAULT_CHUNK_SIZE};

#[derive(Debug, Parser)]
#[command(name = "arqft-server", about = "ARQFT 서버 - SW/GBN/SR 파일 송신자")]
struct Args {
    /// 바인드 IP
    ip: IpAddr,

    /// 바인드 포트
    port: u16,

    /// 재전송 방식 (SW, GBN, SR)
    protocol: Discipline,

    /// 윈도우 크기 (SW에서는 무시)
    window_size: usize,

    /// 재전송 타임아웃 (초)
    timeout: f64,

    /// 청크 크기 (바이트)
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// 진전 없는 연속 타임아웃 허용 횟수 (기본: 무한)
    #[arg(long)]
    max_retries: Option<u32>,

    /// 세션 유휴 만료 (밀리초)
    #[arg(long, default_value_t = 60_000)]
    idle_timeout_ms: u64,

    /// 요청 파일을 찾을 디렉터리
    #[arg(long, default_value = ".")]
    root: PathBuf,
}

impl Args {
    fn config(&self) -> Result<Config, String> {
        if !self.timeout.is_finite() || self.timeout <= 0.0 {
            return Err(format!("timeout은 양수여야 함: {}", self.timeout));
        }

        Ok(Config {
            chunk_size: self.chunk_size,
            discipline: self.protocol,
            window_size: self.window_size,
            retransmit_timeout_ms: ((self.timeout * 1000.0).round() as u64).max(1),
            max_retries: self.max_retries,
            session_idle_timeout_ms: self.idle_timeout_ms,
            ..Config::default()
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정 (stdout은 비워 둠)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = args.config()?;
    let bind_addr = SocketAddr::new(args.ip, args.port);

    info!("ARQFT Server starting...");
    info!("Bind address: {}", bind_addr);
    info!("Protocol: {}", config.discipline);
    info!("Window size: {}", config.effective_window());
    info!("Retransmit timeout: {}ms", config.retransmit_timeout_ms);
    info!("Chunk size: {} bytes", config.chunk_size);

    let sender = match Sender::bind(bind_addr, config).await {
        Ok(sender) => sender.with_root(&args.root),
        Err(e) => {
            error!("바인딩 실패 {}: {}", bind_addr, e);
            return Err(e.into());
        }
    };

    let shutdown = sender.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down...");
            shutdown.abort();
        }
    });

    sender.run().await?;
    Ok(())
}

//! ARQFT 클라이언트 (수신자)
//!
//! 서버에 파일을 요청하고, 받은 패킷마다 ACK을 보낸 뒤
//! 종료 마커를 받으면 `received_<파일명>`으로 저장한다.
//! 표준 출력에는 전송 시간(초)만 출력한다.
//!
//! 사용법:
//!   arqft-client <SERVER_IP> <SERVER_PORT> <FILENAME> [OPTIONS]
//!
//! 예시:
//!   arqft-client 127.0.0.1 12345 loco.jpg
//!   arqft-client 127.0.0.1 12345 loco.jpg -o copy.jpg --termination-timeout-ms 30000

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;

use clap::Parser;
use tracing::{info, warn};

use arqft::receiver::output_path;
use arqft::{AckMode, Config, PeerSocket, Receiver};

#[derive(Debug, Parser)]
#[command(name = "arqft-client", about = "ARQFT 클라이언트 - 파일 수신자")]
struct Args {
    /// 서버 IP
    server_ip: IpAddr,

    /// 서버 포트
    server_port: u16,

    /// 요청할 파일명
    filename: String,

    /// 저장 경로 (기본: received_<파일명>)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// 로컬 바인드 주소 (기본: 자동 할당)
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// 수신 대기 주기 (밀리초)
    #[arg(long, default_value_t = 2000)]
    poll_ms: u64,

    /// 이 시간 동안 아무것도 못 받으면 실패 (기본: 무한 대기)
    #[arg(long)]
    termination_timeout_ms: Option<u64>,

    /// 누락 seq가 있으면 저장하지 않고 실패
    #[arg(long)]
    strict: bool,

    /// 0부터 연속으로 받은 구간 안의 seq로만 ACK (Go-Back-N 유실 복구)
    #[arg(long)]
    cumulative_acks: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정 (stdout은 전송 시간 전용)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let server_addr = SocketAddr::new(args.server_ip, args.server_port);
    let bind_addr = args.bind.unwrap_or_else(|| match server_addr {
        SocketAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        SocketAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
    });

    let config = Config {
        receive_poll_ms: args.poll_ms,
        termination_timeout_ms: args.termination_timeout_ms,
        strict_reassembly: args.strict,
        ack_mode: if args.cumulative_acks {
            AckMode::Cumulative
        } else {
            AckMode::PerPacket
        },
        ..Config::default()
    };
    config.validate()?;

    let transport = PeerSocket::bind(bind_addr, server_addr, config.recv_buffer_size).await?;
    info!(
        "ARQFT Client {} → {}: {:?}",
        transport.local_addr()?,
        server_addr,
        args.filename
    );

    let file = Receiver::new(transport, config).fetch(&args.filename).await?;

    let output = args.output.unwrap_or_else(|| output_path(&args.filename));
    file.write_to(&output).await?;

    if !file.is_complete() {
        warn!("불완전한 파일 저장: 누락 seq {}개", file.missing.len());
    }
    info!("Data saved to {:?} ({} bytes)", output, file.data.len());

    println!("{:.2}", file.elapsed.as_secs_f64());
    Ok(())
}

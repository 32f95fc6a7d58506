//! 송신자 (서버측)
//!
//! - 주소별 세션 디멀티플렉싱
//! - 세션마다 별도 태스크, 세션 전용 수신 큐
//! - 완료/유휴 세션 정리

use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tracing::{debug, error, info, warn};

use crate::chunk::FileSequence;
use crate::packet::{decode_request, Control};
use crate::session::{AbortHandle, Dispatch, Session, SessionReport, SessionTable};
use crate::transport::SessionChannel;
use crate::{Config, Error, Result};

/// 유휴 세션 검사 주기
const SWEEP_INTERVAL: Duration = Duration::from_millis(50);

/// 송신자
pub struct Sender {
    /// 설정
    config: Config,

    /// 공유 소켓 (send_to만 공유, 설정 변경 없음)
    socket: Arc<UdpSocket>,

    /// 세션 테이블
    sessions: Arc<SessionTable>,

    /// 요청 파일을 찾는 기준 디렉터리
    root: PathBuf,

    /// 정지 플래그
    shutdown: AbortHandle,
}

impl Sender {
    /// 소켓 바인딩 (실패 시 치명적)
    pub async fn bind(bind_addr: SocketAddr, config: Config) -> Result<Self> {
        config.validate()?;
        let socket = Arc::new(UdpSocket::bind(bind_addr).await?);

        let sessions = Arc::new(
            SessionTable::new(config.session_queue_depth, config.session_idle_timeout())
                .with_linger(config.completed_linger()),
        );

        Ok(Self {
            config,
            socket,
            sessions,
            root: PathBuf::from("."),
            shutdown: AbortHandle::new(),
        })
    }

    /// 파일 기준 디렉터리 설정
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// 진행 중인 세션 테이블
    pub fn sessions(&self) -> Arc<SessionTable> {
        self.sessions.clone()
    }

    /// run 루프를 멈추는 핸들
    pub fn shutdown_handle(&self) -> AbortHandle {
        self.shutdown.clone()
    }

    /// 수신 루프
    pub async fn run(&self) -> Result<()> {
        info!(
            "ARQFT Sender started on {} using {} (window={}, timeout={}ms)",
            self.local_addr()?,
            self.config.discipline,
            self.config.effective_window(),
            self.config.retransmit_timeout_ms
        );

        let mut buf = vec![0u8; self.config.recv_buffer_size];
        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);

        while !self.shutdown.is_aborted() {
            tokio::select! {
                result = self.socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, addr)) => {
                            self.handle_datagram(Bytes::copy_from_slice(&buf[..len]), addr);
                        }
                        Err(e) => {
                            warn!("수신 에러: {}", e);
                        }
                    }
                }
                _ = sweep.tick() => {
                    for peer in self.sessions.evict_idle() {
                        warn!("유휴 세션 정리: {}", peer);
                    }
                }
            }
        }

        self.sessions.abort_all();
        info!("ARQFT Sender stopped");
        Ok(())
    }

    /// 데이터그램 분배
    fn handle_datagram(&self, datagram: Bytes, addr: SocketAddr) {
        match self.sessions.dispatch(addr, datagram.clone()) {
            Dispatch::Delivered => {}
            Dispatch::Dropped => debug!("세션 큐 가득 참, 폐기: {}", addr),
            Dispatch::Unknown => self.accept(datagram, addr),
        }
    }

    /// 새 주소에서 온 파일 요청 처리
    fn accept(&self, datagram: Bytes, addr: SocketAddr) {
        // 끝난 세션에 늦게 도착한 ACK
        if Control::parse_ack(&datagram).is_ok() {
            debug!("세션 없는 ACK 폐기: {}", addr);
            return;
        }

        let filename = match decode_request(&datagram) {
            Ok(name) => name,
            Err(e) => {
                warn!("{} 요청 폐기: {}", addr, e);
                return;
            }
        };

        // 요청 재전송이 완료 뒤에 도착한 경우
        if self.sessions.recently_completed(addr, &filename) {
            debug!("완료된 전송의 중복 요청 폐기: {} {:?}", addr, filename);
            return;
        }

        let path = match resolve(&self.root, &filename) {
            Ok(path) => path,
            Err(e) => {
                warn!("{} 요청 거부 {:?}: {}", addr, filename, e);
                return;
            }
        };

        let abort = AbortHandle::new();
        let Some(inbox) = self.sessions.register(addr, abort.clone()) else {
            return;
        };

        info!("Connection from {}: {:?}", addr, filename);

        let channel = SessionChannel::new(self.socket.clone(), addr, inbox);
        let sessions = self.sessions.clone();
        let config = self.config.clone();

        tokio::spawn(async move {
            match serve(channel, path, config, abort.clone()).await {
                Ok(report) => {
                    sessions.finish(addr, &abort, &filename);
                    debug!(
                        "세션 종료 {}: {} packets, {}",
                        report.peer, report.packets, report.discipline
                    );
                }
                Err(e) => {
                    sessions.remove(addr, &abort);
                    error!("세션 실패 {}: {}", addr, e);
                }
            }
        });
    }
}

/// 세션 하나 처리: 파일 로드 → 전송 → END
pub async fn serve(
    mut channel: SessionChannel,
    path: PathBuf,
    config: Config,
    abort: AbortHandle,
) -> Result<SessionReport> {
    let sequence = FileSequence::load(&path, config.chunk_size).await?;
    info!(
        "Serving {:?} to {}: {} bytes, {} packets, crc32={:08X}",
        path,
        channel.peer(),
        sequence.total_bytes,
        sequence.len(),
        sequence.checksum
    );

    Session::new(channel.peer(), &sequence, &config)?
        .with_abort(abort)
        .run(&mut channel)
        .await
}

/// 요청 파일명을 기준 디렉터리 아래 경로로 변환
///
/// 절대 경로와 상위 디렉터리 참조는 거부한다.
pub fn resolve(root: &Path, filename: &str) -> Result<PathBuf> {
    let requested = Path::new(filename);
    let escapes = requested
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));

    if escapes {
        return Err(Error::InvalidRequest);
    }
    Ok(root.join(requested))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve() {
        let root = Path::new("/srv/files");
        assert_eq!(
            resolve(root, "loco.jpg").unwrap(),
            PathBuf::from("/srv/files/loco.jpg")
        );
        assert_eq!(
            resolve(root, "sub/a.bin").unwrap(),
            PathBuf::from("/srv/files/sub/a.bin")
        );
        assert!(resolve(root, "../etc/passwd").is_err());
        assert!(resolve(root, "/etc/passwd").is_err());
    }

    #[tokio::test]
    async fn test_bind_rejects_invalid_config() {
        let config = Config {
            chunk_size: 0,
            ..Config::default()
        };
        let result = Sender::bind("127.0.0.1:0".parse().unwrap(), config).await;
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_stray_ack_does_not_create_session() {
        let sender = Arc::new(
            Sender::bind("127.0.0.1:0".parse().unwrap(), Config::local())
                .await
                .unwrap(),
        );
        let addr = sender.local_addr().unwrap();
        let shutdown = sender.shutdown_handle();
        let sessions = sender.sessions();

        let server = {
            let sender = sender.clone();
            tokio::spawn(async move { sender.run().await })
        };

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"ACK-3", addr).await.unwrap();
        client.send_to(b"../secret", addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(sessions.is_empty());

        shutdown.abort();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_repeated_request_after_completion_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();

        let sender = Arc::new(
            Sender::bind("127.0.0.1:0".parse().unwrap(), Config::local())
                .await
                .unwrap()
                .with_root(dir.path()),
        );
        let addr = sender.local_addr().unwrap();
        let shutdown = sender.shutdown_handle();
        let sessions = sender.sessions();
        let server = {
            let sender = sender.clone();
            tokio::spawn(async move { sender.run().await })
        };

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut buf = [0u8; 2048];
        client.send_to(b"a.txt", addr).await.unwrap();
        loop {
            let wait = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf));
            let (len, _) = wait.await.unwrap().unwrap();
            if &buf[..len] == b"END" {
                break;
            }
            let seq = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
            client.send_to(&Control::Ack(seq).encode(), addr).await.unwrap();
        }

        for _ in 0..100 {
            if sessions.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(sessions.is_empty());

        // 늦게 도착한 요청 재전송
        client.send_to(b"a.txt", addr).await.unwrap();
        let late = tokio::time::timeout(Duration::from_millis(200), client.recv_from(&mut buf));
        assert!(late.await.is_err());
        assert!(sessions.is_empty());

        shutdown.abort();
        server.await.unwrap().unwrap();
    }
}

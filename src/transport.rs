//! 전송 계층 어댑터
//!
//! 손실/중복/순서 뒤바뀜이 있을 수 있는 메시지 단위 채널.
//! 수신 대기 시간은 호출마다 인자로 넘기며 소켓 설정을 바꾸지 않는다.
//! 여러 세션이 같은 UDP 소켓을 공유해도 서로의 타임아웃에 영향을 주지 않는다.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::trace;

use crate::{Error, Result};

/// 비신뢰 데이터그램 채널
pub trait Transport: Send + Sync {
    /// 데이터그램 하나 전송
    fn send(&self, datagram: &[u8]) -> impl Future<Output = Result<()>> + Send;

    /// `deadline` 안에 데이터그램 하나 수신, 시간이 지나면 `None`
    fn recv(&mut self, deadline: Duration) -> impl Future<Output = Result<Option<Bytes>>> + Send;
}

/// 상대 한 곳과 통신하는 UDP 소켓 (수신측)
pub struct PeerSocket {
    socket: UdpSocket,
    peer: SocketAddr,
    buf: Vec<u8>,
}

impl PeerSocket {
    pub fn new(socket: UdpSocket, peer: SocketAddr, recv_buffer_size: usize) -> Self {
        Self {
            socket,
            peer,
            buf: vec![0u8; recv_buffer_size],
        }
    }

    /// 로컬 주소에 바인딩
    pub async fn bind(
        local: SocketAddr,
        peer: SocketAddr,
        recv_buffer_size: usize,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(local).await?;
        Ok(Self::new(socket, peer, recv_buffer_size))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl Transport for PeerSocket {
    async fn send(&self, datagram: &[u8]) -> Result<()> {
        self.socket.send_to(datagram, self.peer).await?;
        Ok(())
    }

    async fn recv(&mut self, deadline: Duration) -> Result<Option<Bytes>> {
        match tokio::time::timeout(deadline, self.socket.recv_from(&mut self.buf)).await {
            Ok(Ok((len, _from))) => Ok(Some(Bytes::copy_from_slice(&self.buf[..len]))),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Ok(None),
        }
    }
}

/// 송신측 세션 전용 핸들
///
/// 전송은 공유 소켓의 `send_to`로, 수신은 디멀티플렉서가 채워주는
/// 세션 전용 큐에서 한다.
pub struct SessionChannel {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    inbox: mpsc::Receiver<Bytes>,
}

impl SessionChannel {
    pub fn new(socket: Arc<UdpSocket>, peer: SocketAddr, inbox: mpsc::Receiver<Bytes>) -> Self {
        Self {
            socket,
            peer,
            inbox,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl Transport for SessionChannel {
    async fn send(&self, datagram: &[u8]) -> Result<()> {
        self.socket.send_to(datagram, self.peer).await?;
        Ok(())
    }

    async fn recv(&mut self, deadline: Duration) -> Result<Option<Bytes>> {
        match tokio::time::timeout(deadline, self.inbox.recv()).await {
            Ok(Some(datagram)) => Ok(Some(datagram)),
            Ok(None) => Err(Error::ConnectionClosed),
            Err(_) => Ok(None),
        }
    }
}

/// 프로세스 내부 데이터그램 파이프 (테스트용)
pub struct MemoryTransport {
    tx: mpsc::UnboundedSender<Bytes>,
    rx: mpsc::UnboundedReceiver<Bytes>,
}

impl MemoryTransport {
    /// 서로 연결된 양 끝
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            Self { tx: a_tx, rx: b_rx },
            Self { tx: b_tx, rx: a_rx },
        )
    }
}

impl Transport for MemoryTransport {
    async fn send(&self, datagram: &[u8]) -> Result<()> {
        // 상대가 없으면 UDP처럼 조용히 사라짐
        let _ = self.tx.send(Bytes::copy_from_slice(datagram));
        Ok(())
    }

    async fn recv(&mut self, deadline: Duration) -> Result<Option<Bytes>> {
        match tokio::time::timeout(deadline, self.rx.recv()).await {
            Ok(Some(datagram)) => Ok(Some(datagram)),
            Ok(None) => Err(Error::ConnectionClosed),
            Err(_) => Ok(None),
        }
    }
}

/// 송신 데이터그램 선택 폐기 함수
pub type DropScript = Box<dyn FnMut(&[u8]) -> bool + Send>;

/// 송신 방향에 손실을 주입하는 래퍼
pub struct LossyTransport<T> {
    inner: T,
    loss_rate: f64,
    rng: Mutex<StdRng>,
    script: Mutex<Option<DropScript>>,
    dropped: AtomicU64,
}

impl<T: Transport> LossyTransport<T> {
    /// `loss_rate` 확률로 무작위 폐기 (시드 고정)
    pub fn new(inner: T, loss_rate: f64, seed: u64) -> Self {
        Self {
            inner,
            loss_rate: loss_rate.clamp(0.0, 1.0),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            script: Mutex::new(None),
            dropped: AtomicU64::new(0),
        }
    }

    /// 스크립트가 true를 돌려준 데이터그램만 폐기
    pub fn scripted(inner: T, script: impl FnMut(&[u8]) -> bool + Send + 'static) -> Self {
        let lossy = Self::new(inner, 0.0, 0);
        *lossy.script.lock() = Some(Box::new(script));
        lossy
    }

    /// 지금까지 폐기한 데이터그램 수
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    fn should_drop(&self, datagram: &[u8]) -> bool {
        let scripted = self
            .script
            .lock()
            .as_mut()
            .map_or(false, |script| script(datagram));
        scripted || (self.loss_rate > 0.0 && self.rng.lock().gen_bool(self.loss_rate))
    }
}

impl<T: Transport> Transport for LossyTransport<T> {
    async fn send(&self, datagram: &[u8]) -> Result<()> {
        if self.should_drop(datagram) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            trace!("데이터그램 폐기: {} bytes", datagram.len());
            return Ok(());
        }
        self.inner.send(datagram).await
    }

    async fn recv(&mut self, deadline: Duration) -> Result<Option<Bytes>> {
        self.inner.recv(deadline).await
    }
}

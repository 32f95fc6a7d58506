//! 세션 (송신측)
//!
//! - Session: 상대 한 곳에 파일 하나를 보내는 동안의 상태와 구동 루프
//! - SessionTable: 주소별 세션 수신 큐, 완료/유휴 시 정리

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::chunk::FileSequence;
use crate::config::Discipline;
use crate::packet::{Control, Seq};
use crate::stats::TransferStats;
use crate::transport::Transport;
use crate::window::{AckOutcome, ArqWindow};
use crate::{Config, Error, Result};

/// 세션 중단 플래그
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// 같은 플래그를 공유하는 핸들인지
    pub fn same_as(&self, other: &AbortHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// 완료된 세션 보고
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub peer: SocketAddr,
    pub discipline: Discipline,
    pub packets: u32,
    pub stats: TransferStats,
}

/// 송신 세션
pub struct Session {
    peer: SocketAddr,
    wire: Vec<Bytes>,
    window: ArqWindow,
    retransmit_timeout: Duration,
    max_retries: Option<u32>,
    stats: TransferStats,
    abort: AbortHandle,

    /// 아직 한 번도 보내지 않은 첫 seq
    first_unsent: Seq,
}

impl Session {
    /// 설정 검증 후 전송할 패킷을 미리 직렬화
    pub fn new(peer: SocketAddr, sequence: &FileSequence, config: &Config) -> Result<Self> {
        config.validate()?;

        let wire: Vec<Bytes> = sequence.packets().iter().map(|p| p.encode()).collect();
        let window = ArqWindow::new(
            config.discipline,
            wire.len() as Seq,
            config.effective_window(),
        )?;

        Ok(Self {
            peer,
            wire,
            window,
            retransmit_timeout: config.retransmit_timeout(),
            max_retries: config.max_retries,
            stats: TransferStats::new(),
            abort: AbortHandle::new(),
            first_unsent: 0,
        })
    }

    /// 외부에서 준 중단 플래그 사용
    pub fn with_abort(mut self, abort: AbortHandle) -> Self {
        self.abort = abort;
        self
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn window(&self) -> &ArqWindow {
        &self.window
    }

    pub fn stats(&self) -> &TransferStats {
        &self.stats
    }

    /// 모든 패킷이 확인될 때까지 구동한 뒤 종료 마커를 한 번 전송
    pub async fn run<T: Transport>(mut self, transport: &mut T) -> Result<SessionReport> {
        let discipline = self.window.discipline();
        info!(
            "Session {} started: {} packets, {} window={}",
            self.peer,
            self.wire.len(),
            discipline,
            self.window.size()
        );

        let mut stalled = 0u32;

        while !self.window.is_done() {
            if self.abort.is_aborted() {
                warn!("세션 {} 중단: base={}", self.peer, self.window.base());
                return Err(Error::Aborted);
            }

            self.transmit(transport).await?;

            match transport.recv(self.retransmit_timeout).await? {
                Some(datagram) => {
                    if self.handle_ack(&datagram) {
                        stalled = 0;
                    }
                }
                None => {
                    self.stats.timeouts += 1;
                    stalled += 1;

                    if let Some(max) = self.max_retries {
                        if stalled > max {
                            return Err(Error::RetriesExhausted {
                                seq: self.window.base(),
                                attempts: stalled,
                            });
                        }
                    }

                    let resend = self.window.on_timeout();
                    debug!(
                        "{} timeout: base={}, {}개 재전송 예약",
                        self.peer,
                        self.window.base(),
                        resend.len()
                    );
                }
            }
        }

        transport.send(&Control::End.encode()).await?;
        info!("Session {} complete: {}", self.peer, self.stats.summary());

        Ok(SessionReport {
            peer: self.peer,
            discipline,
            packets: self.wire.len() as Seq,
            stats: self.stats,
        })
    }

    /// 윈도우가 허락하는 패킷 전송
    async fn transmit<T: Transport>(&mut self, transport: &T) -> Result<()> {
        for seq in self.window.poll_transmit() {
            let Some(datagram) = self.wire.get(seq as usize) else {
                continue;
            };
            transport.send(datagram).await?;

            let retransmission = seq < self.first_unsent;
            self.first_unsent = self.first_unsent.max(seq + 1);
            self.stats.record_send(datagram.len(), retransmission);
        }
        Ok(())
    }

    /// ACK 처리, 진전이 있었으면 true
    fn handle_ack(&mut self, datagram: &[u8]) -> bool {
        let seq = match Control::parse_ack(datagram) {
            Ok(seq) => seq,
            Err(e) => {
                self.stats.malformed += 1;
                debug!("{} 메시지 폐기: {}", self.peer, e);
                return false;
            }
        };

        let outcome = self.window.on_ack(seq);
        self.stats.record_ack(outcome);

        match outcome {
            AckOutcome::Advanced { base } => {
                debug!("{} ACK-{}: base → {}", self.peer, seq, base);
                true
            }
            AckOutcome::Recorded => true,
            AckOutcome::Duplicate | AckOutcome::OutOfWindow => false,
        }
    }
}

/// 디멀티플렉서 전달 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Delivered,

    /// 세션 큐가 가득 차서 폐기
    Dropped,

    /// 등록된 세션 없음
    Unknown,
}

/// 세션 테이블 항목
struct SessionEntry {
    inbox: mpsc::Sender<Bytes>,
    last_seen: Instant,
    abort: AbortHandle,
}

/// 주소별 세션 테이블
pub struct SessionTable {
    sessions: DashMap<SocketAddr, SessionEntry>,
    queue_depth: usize,
    idle_timeout: Duration,

    /// 최근 완료된 (주소, 파일명)과 완료 시각
    completed: DashMap<SocketAddr, (String, Instant)>,
    linger: Duration,
}

impl SessionTable {
    pub fn new(queue_depth: usize, idle_timeout: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            queue_depth,
            idle_timeout,
            completed: DashMap::new(),
            linger: Duration::ZERO,
        }
    }

    /// 완료된 전송을 기억하는 시간
    pub fn with_linger(mut self, linger: Duration) -> Self {
        self.linger = linger;
        self
    }

    /// 완료 기록 후 제거
    ///
    /// 기록이 먼저라서 제거 직후 도착한 중복 요청도 걸러진다.
    pub fn finish(&self, peer: SocketAddr, abort: &AbortHandle, filename: &str) -> bool {
        if !self.linger.is_zero() {
            self.completed.insert(peer, (filename.to_string(), Instant::now()));
        }
        self.remove(peer, abort)
    }

    /// 같은 주소가 방금 끝난 파일을 다시 요청했는지
    pub fn recently_completed(&self, peer: SocketAddr, filename: &str) -> bool {
        self.completed.get(&peer).map_or(false, |entry| {
            let (name, at) = entry.value();
            name == filename && at.elapsed() < self.linger
        })
    }

    /// 새 주소면 항목을 만들고 세션 수신 큐를 반환
    pub fn register(&self, peer: SocketAddr, abort: AbortHandle) -> Option<mpsc::Receiver<Bytes>> {
        match self.sessions.entry(peer) {
            Entry::Occupied(_) => None,
            Entry::Vacant(vacant) => {
                let (tx, rx) = mpsc::channel(self.queue_depth);
                vacant.insert(SessionEntry {
                    inbox: tx,
                    last_seen: Instant::now(),
                    abort,
                });
                Some(rx)
            }
        }
    }

    /// 데이터그램을 해당 세션 큐로 전달
    pub fn dispatch(&self, peer: SocketAddr, datagram: Bytes) -> Dispatch {
        let Some(mut entry) = self.sessions.get_mut(&peer) else {
            return Dispatch::Unknown;
        };
        entry.last_seen = Instant::now();

        match entry.inbox.try_send(datagram) {
            Ok(()) => Dispatch::Delivered,
            Err(_) => Dispatch::Dropped,
        }
    }

    /// 같은 세션일 때만 제거 (재등록된 항목은 유지)
    pub fn remove(&self, peer: SocketAddr, abort: &AbortHandle) -> bool {
        self.sessions
            .remove_if(&peer, |_, entry| entry.abort.same_as(abort))
            .is_some()
    }

    /// 유휴 세션 중단 및 제거
    pub fn evict_idle(&self) -> Vec<SocketAddr> {
        self.completed.retain(|_, (_, at)| at.elapsed() < self.linger);

        let mut evicted = Vec::new();
        self.sessions.retain(|peer, entry| {
            if entry.last_seen.elapsed() > self.idle_timeout {
                entry.abort.abort();
                evicted.push(*peer);
                false
            } else {
                true
            }
        });
        evicted
    }

    /// 모든 세션 중단
    pub fn abort_all(&self) {
        for entry in self.sessions.iter() {
            entry.abort.abort();
        }
        self.sessions.clear();
    }

    pub fn contains(&self, peer: &SocketAddr) -> bool {
        self.sessions.contains_key(peer)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

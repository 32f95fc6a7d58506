//! 수신자 (클라이언트측)
//!
//! - 도착 순서와 무관하게 패킷 저장, 패킷마다 즉시 ACK
//!   (누적 모드에서는 0부터 연속으로 받은 구간 안의 seq로만 ACK)
//! - 종료 마커 수신 시 seq 오름차순으로 조립
//! - 요청 전송부터 종료 마커 수신까지 경과 시간 측정

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tracing::{debug, info, warn};

use crate::packet::{encode_request, Control, Datagram, Packet, Seq};
use crate::stats::TransferStats;
use crate::transport::Transport;
use crate::{AckMode, Config, Error, Result};

/// 수신 패킷 조립 버퍼
#[derive(Debug, Default)]
pub struct Reassembly {
    chunks: BTreeMap<Seq, Bytes>,
    next_expected: Seq,
}

impl Reassembly {
    pub fn new() -> Self {
        Self::default()
    }

    /// 패킷 저장, 처음 받은 seq면 true
    ///
    /// 같은 seq는 나중 것으로 덮어쓴다.
    pub fn insert(&mut self, packet: Packet) -> bool {
        let fresh = self.chunks.insert(packet.seq, packet.payload).is_none();
        while self.chunks.contains_key(&self.next_expected) {
            self.next_expected += 1;
        }
        fresh
    }

    /// 0부터 연속으로 받은 마지막 seq (seq 0을 아직 못 받았으면 None)
    pub fn last_in_order(&self) -> Option<Seq> {
        self.next_expected.checked_sub(1)
    }

    pub fn contains(&self, seq: Seq) -> bool {
        self.chunks.contains_key(&seq)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// 0부터 가장 큰 seq까지 중 빠진 seq
    pub fn missing(&self) -> Vec<Seq> {
        let Some(&max) = self.chunks.keys().next_back() else {
            return Vec::new();
        };
        (0..=max).filter(|seq| !self.chunks.contains_key(seq)).collect()
    }

    pub fn total_bytes(&self) -> usize {
        self.chunks.values().map(|c| c.len()).sum()
    }

    /// seq 오름차순으로 이어 붙이기
    pub fn into_bytes(self) -> Bytes {
        let mut out = BytesMut::with_capacity(self.total_bytes());
        for chunk in self.chunks.into_values() {
            out.extend_from_slice(&chunk);
        }
        out.freeze()
    }
}

/// 수신 완료된 파일
#[derive(Debug, Clone)]
pub struct ReceivedFile {
    /// 조립된 데이터
    pub data: Bytes,

    /// 요청 전송부터 종료 마커까지
    pub elapsed: Duration,

    /// 빠진 seq (비어 있으면 완전)
    pub missing: Vec<Seq>,

    /// 데이터 CRC32
    pub checksum: u32,

    /// 수신 통계
    pub stats: TransferStats,
}

impl ReceivedFile {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    /// 파일로 저장
    pub async fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        tokio::fs::write(path, &self.data).await?;
        Ok(())
    }
}

/// 요청 파일명에서 기본 저장 경로 생성 (`received_<파일명>`)
pub fn output_path(filename: &str) -> PathBuf {
    let name = Path::new(filename)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    PathBuf::from(format!("received_{}", name))
}

/// 패킷 하나를 받은 뒤 보낼 ACK seq
///
/// 누적 모드에서는 0부터 연속으로 받은 구간 안의 seq만 ACK한다.
/// 받은 seq가 구간 안이면 그 seq를, 구간 끝이 더 크면 구간 끝도 함께 보낸다.
/// 두 ACK 모두 누적(Go-Back-N)으로 읽어도 개별(Selective-Repeat)로 읽어도 참이다.
fn ack_targets(mode: AckMode, seq: Seq, reassembly: &Reassembly) -> Vec<Seq> {
    match mode {
        AckMode::PerPacket => vec![seq],
        AckMode::Cumulative => match reassembly.last_in_order() {
            None => Vec::new(),
            Some(run_end) if seq < run_end => vec![seq, run_end],
            Some(run_end) => vec![run_end],
        },
    }
}

/// 수신자
pub struct Receiver<T> {
    transport: T,
    config: Config,
    stats: TransferStats,
}

impl<T: Transport> Receiver<T> {
    pub fn new(transport: T, config: Config) -> Self {
        Self {
            transport,
            config,
            stats: TransferStats::new(),
        }
    }

    /// 파일 요청 후 종료 마커까지 수신
    pub async fn fetch(mut self, filename: &str) -> Result<ReceivedFile> {
        let request = encode_request(filename);
        let poll = self.config.receive_poll();
        let termination_timeout = self.config.termination_timeout();

        self.transport.send(&request).await?;
        let start = Instant::now();
        self.stats.start_time = start;
        info!("Requested {:?}", filename);

        let mut reassembly = Reassembly::new();
        let mut heard_from_sender = false;
        let mut idle = Duration::ZERO;

        loop {
            let Some(datagram) = self.transport.recv(poll).await? else {
                idle += poll;
                if let Some(limit) = termination_timeout {
                    if idle >= limit {
                        warn!("{:?} 동안 수신 없음, 종료 마커 유실로 판단", idle);
                        return Err(Error::TerminationLost { idle });
                    }
                }

                if heard_from_sender {
                    debug!("Timeout occurred, waiting for retransmission...");
                } else {
                    // 요청 자체가 유실되었을 수 있음
                    debug!("응답 없음, 요청 재전송");
                    self.transport.send(&request).await?;
                }
                continue;
            };

            idle = Duration::ZERO;
            heard_from_sender = true;

            match Datagram::classify(datagram) {
                Ok(Datagram::End) => break,
                Ok(Datagram::Data(packet)) => {
                    let seq = packet.seq;
                    let len = packet.payload.len();
                    let fresh = reassembly.insert(packet);
                    self.stats.record_receive(len, !fresh);

                    for ack in ack_targets(self.config.ack_mode, seq, &reassembly) {
                        self.transport.send(&Control::Ack(ack).encode()).await?;
                        self.stats.acks_sent += 1;
                    }
                }
                Err(e) => {
                    self.stats.malformed += 1;
                    debug!("데이터그램 폐기: {}", e);
                }
            }
        }

        let elapsed = start.elapsed();
        let missing = reassembly.missing();

        if !missing.is_empty() {
            if self.config.strict_reassembly {
                return Err(Error::IncompleteTransfer { missing });
            }
            warn!(
                "종료 마커 수신 시점에 누락 seq {}개 (첫 누락: {})",
                missing.len(),
                missing[0]
            );
        }

        let packets = reassembly.len();
        let data = reassembly.into_bytes();
        let checksum = crc32fast::hash(&data);

        info!(
            "Transfer complete: {} bytes, {} packets, crc32={:08X}, {:.2}s",
            data.len(),
            packets,
            checksum,
            elapsed.as_secs_f64()
        );
        debug!("{}", self.stats.summary());

        Ok(ReceivedFile {
            data,
            elapsed,
            missing,
            checksum,
            stats: self.stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;

    #[test]
    fn test_reassembly_out_of_order() {
        let mut r = Reassembly::new();
        assert!(r.insert(Packet::new(2, &b"cc"[..])));
        assert!(r.insert(Packet::new(0, &b"aa"[..])));
        assert_eq!(r.missing(), vec![1]);
        assert!(r.insert(Packet::new(1, &b"bb"[..])));

        // 같은 내용의 중복 수신
        assert!(!r.insert(Packet::new(1, &b"bb"[..])));
        assert_eq!(r.len(), 3);
        assert!(r.missing().is_empty());
        assert_eq!(r.into_bytes().as_ref(), b"aabbcc");
    }

    #[test]
    fn test_last_in_order() {
        let mut r = Reassembly::new();
        assert_eq!(r.last_in_order(), None);
        r.insert(Packet::new(1, &b"b"[..]));
        assert_eq!(r.last_in_order(), None);
        r.insert(Packet::new(0, &b"a"[..]));
        assert_eq!(r.last_in_order(), Some(1));
        r.insert(Packet::new(3, &b"d"[..]));
        assert_eq!(r.last_in_order(), Some(1));
        r.insert(Packet::new(2, &b"c"[..]));
        assert_eq!(r.last_in_order(), Some(3));
    }

    #[test]
    fn test_cumulative_ack_targets() {
        let mut r = Reassembly::new();
        r.insert(Packet::new(2, &b"c"[..]));
        assert!(ack_targets(AckMode::Cumulative, 2, &r).is_empty());
        assert_eq!(ack_targets(AckMode::PerPacket, 2, &r), vec![2]);

        r.insert(Packet::new(0, &b"a"[..]));
        assert_eq!(ack_targets(AckMode::Cumulative, 0, &r), vec![0]);

        // 구간 밖의 seq는 구간 끝으로만 ACK
        r.insert(Packet::new(4, &b"e"[..]));
        assert_eq!(ack_targets(AckMode::Cumulative, 4, &r), vec![0]);

        // 빈칸을 메우면 그 seq와 새 구간 끝
        r.insert(Packet::new(1, &b"b"[..]));
        assert_eq!(ack_targets(AckMode::Cumulative, 1, &r), vec![1, 2]);
    }

    #[test]
    fn test_reassembly_empty() {
        let r = Reassembly::new();
        assert!(r.is_empty());
        assert!(r.missing().is_empty());
        assert!(r.into_bytes().is_empty());
    }

    #[test]
    fn test_output_path() {
        assert_eq!(output_path("loco.jpg"), PathBuf::from("received_loco.jpg"));
        assert_eq!(
            output_path("dir/sub/data.bin"),
            PathBuf::from("received_data.bin")
        );
    }

    #[tokio::test]
    async fn test_acks_every_packet_and_finishes_on_end() {
        let (client, mut server) = MemoryTransport::pair();
        let receiver = Receiver::new(client, Config::local());
        let task = tokio::spawn(async move { receiver.fetch("f.bin").await });

        let deadline = Duration::from_secs(1);
        let request = server.recv(deadline).await.unwrap().unwrap();
        assert_eq!(request.as_ref(), b"f.bin");

        for (seq, body) in [
            (1u32, &b"world"[..]),
            (0, &b"hello "[..]),
            (1, &b"world"[..]),
        ] {
            server.send(&Packet::new(seq, body).encode()).await.unwrap();
            let ack = server.recv(deadline).await.unwrap().unwrap();
            assert_eq!(Control::parse_ack(&ack).unwrap(), seq);
        }
        server.send(b"END").await.unwrap();

        let file = task.await.unwrap().unwrap();
        assert_eq!(file.data.as_ref(), b"hello world");
        assert!(file.is_complete());
        assert_eq!(file.stats.duplicate_packets, 1);
        assert_eq!(file.stats.acks_sent, 3);
        assert_eq!(file.checksum, crc32fast::hash(b"hello world"));
    }

    #[tokio::test]
    async fn test_cumulative_acks_hold_at_gap() {
        let (client, mut server) = MemoryTransport::pair();
        let config = Config {
            ack_mode: AckMode::Cumulative,
            ..Config::local()
        };
        let task = tokio::spawn(async move { Receiver::new(client, config).fetch("f").await });

        let deadline = Duration::from_secs(1);
        server.recv(deadline).await.unwrap().unwrap();

        // 0 수신 → ACK-0
        server.send(&Packet::new(0, &b"a"[..]).encode()).await.unwrap();
        let ack = server.recv(deadline).await.unwrap().unwrap();
        assert_eq!(Control::parse_ack(&ack).unwrap(), 0);

        // 1 유실, 2 수신 → 여전히 ACK-0
        server.send(&Packet::new(2, &b"c"[..]).encode()).await.unwrap();
        let ack = server.recv(deadline).await.unwrap().unwrap();
        assert_eq!(Control::parse_ack(&ack).unwrap(), 0);

        // 1 재전송 → ACK-1, ACK-2
        server.send(&Packet::new(1, &b"b"[..]).encode()).await.unwrap();
        for expected in [1, 2] {
            let ack = server.recv(deadline).await.unwrap().unwrap();
            assert_eq!(Control::parse_ack(&ack).unwrap(), expected);
        }

        // 구간 안의 중복 → 그 seq와 구간 끝
        server.send(&Packet::new(0, &b"a"[..]).encode()).await.unwrap();
        for expected in [0, 2] {
            let ack = server.recv(deadline).await.unwrap().unwrap();
            assert_eq!(Control::parse_ack(&ack).unwrap(), expected);
        }

        server.send(b"END").await.unwrap();
        let file = task.await.unwrap().unwrap();
        assert_eq!(file.data.as_ref(), b"abc");
        assert_eq!(file.stats.acks_sent, 6);
    }

    #[tokio::test]
    async fn test_gap_is_reported() {
        let (client, mut server) = MemoryTransport::pair();
        let strict = Config {
            strict_reassembly: true,
            ..Config::local()
        };
        let task = tokio::spawn(async move { Receiver::new(client, strict).fetch("f").await });

        let deadline = Duration::from_secs(1);
        server.recv(deadline).await.unwrap().unwrap();
        server.send(&Packet::new(2, &b"x"[..]).encode()).await.unwrap();
        server.recv(deadline).await.unwrap().unwrap();
        server.send(b"END").await.unwrap();

        match task.await.unwrap() {
            Err(Error::IncompleteTransfer { missing }) => assert_eq!(missing, vec![0, 1]),
            other => panic!("unexpected: {:?}", other.map(|f| f.data)),
        }
    }

    #[tokio::test]
    async fn test_lost_termination_marker() {
        let (client, mut server) = MemoryTransport::pair();
        let config = Config {
            receive_poll_ms: 10,
            termination_timeout_ms: Some(50),
            ..Config::local()
        };
        let task = tokio::spawn(async move { Receiver::new(client, config).fetch("f").await });

        let deadline = Duration::from_secs(1);
        server.recv(deadline).await.unwrap().unwrap();
        server.send(&Packet::new(0, &b"x"[..]).encode()).await.unwrap();
        // END를 보내지 않음

        assert!(matches!(
            task.await.unwrap(),
            Err(Error::TerminationLost { .. })
        ));
    }

    #[tokio::test]
    async fn test_request_is_repeated_until_answered() {
        let (client, mut server) = MemoryTransport::pair();
        let config = Config {
            receive_poll_ms: 10,
            ..Config::local()
        };
        let task = tokio::spawn(async move { Receiver::new(client, config).fetch("f").await });

        let deadline = Duration::from_secs(1);
        assert_eq!(server.recv(deadline).await.unwrap().unwrap().as_ref(), b"f");
        // 첫 요청을 무시하면 다시 요청이 옴
        assert_eq!(server.recv(deadline).await.unwrap().unwrap().as_ref(), b"f");

        server.send(b"END").await.unwrap();
        let file = task.await.unwrap().unwrap();
        assert!(file.data.is_empty());
    }
}

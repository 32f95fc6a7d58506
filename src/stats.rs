//! 전송 통계

use std::time::{Duration, Instant};

use crate::window::AckOutcome;

/// 세션 단위 전송 통계
#[derive(Debug, Clone)]
pub struct TransferStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 전송한 데이터 패킷 수 (재전송 포함)
    pub packets_sent: u64,

    /// 재전송 패킷 수
    pub retransmissions: u64,

    /// 전송 바이트 (헤더 포함)
    pub bytes_sent: u64,

    /// 수신한 ACK 수
    pub acks_received: u64,

    /// 중복 ACK 수
    pub duplicate_acks: u64,

    /// 윈도우 밖이라 무시한 ACK 수
    pub ignored_acks: u64,

    /// 파싱 실패로 버린 메시지 수
    pub malformed: u64,

    /// 대기 시간 초과 횟수
    pub timeouts: u64,

    /// 수신한 데이터 패킷 수 (수신측)
    pub packets_received: u64,

    /// 중복 수신 패킷 수 (수신측)
    pub duplicate_packets: u64,

    /// 수신 바이트 (수신측, 페이로드)
    pub bytes_received: u64,

    /// 보낸 ACK 수 (수신측)
    pub acks_sent: u64,
}

impl TransferStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            packets_sent: 0,
            retransmissions: 0,
            bytes_sent: 0,
            acks_received: 0,
            duplicate_acks: 0,
            ignored_acks: 0,
            malformed: 0,
            timeouts: 0,
            packets_received: 0,
            duplicate_packets: 0,
            bytes_received: 0,
            acks_sent: 0,
        }
    }

    /// 패킷 전송 기록
    pub fn record_send(&mut self, wire_len: usize, retransmission: bool) {
        self.packets_sent += 1;
        self.bytes_sent += wire_len as u64;
        if retransmission {
            self.retransmissions += 1;
        }
    }

    /// ACK 처리 결과 기록
    pub fn record_ack(&mut self, outcome: AckOutcome) {
        self.acks_received += 1;
        match outcome {
            AckOutcome::Duplicate => self.duplicate_acks += 1,
            AckOutcome::OutOfWindow => self.ignored_acks += 1,
            AckOutcome::Advanced { .. } | AckOutcome::Recorded => {}
        }
    }

    /// 데이터 패킷 수신 기록
    pub fn record_receive(&mut self, payload_len: usize, duplicate: bool) {
        self.packets_received += 1;
        if duplicate {
            self.duplicate_packets += 1;
        } else {
            self.bytes_received += payload_len as u64;
        }
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 처리율 (bytes/sec), 송신측이면 전송 바이트 기준
    pub fn throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.bytes_sent.max(self.bytes_received) as f64 / elapsed
    }

    /// 재전송 비율
    pub fn retransmission_ratio(&self) -> f64 {
        if self.packets_sent == 0 {
            return 0.0;
        }
        self.retransmissions as f64 / self.packets_sent as f64
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Sent: {} ({} retx, {:.1}%) | ACKs: {} ({} dup, {} ignored) | Timeouts: {} | Recv: {} ({} dup) | Throughput: {:.2} KB/s",
            self.elapsed().as_secs_f64(),
            self.packets_sent,
            self.retransmissions,
            self.retransmission_ratio() * 100.0,
            self.acks_received,
            self.duplicate_acks,
            self.ignored_acks,
            self.timeouts,
            self.packets_received,
            self.duplicate_packets,
            self.throughput() / 1024.0,
        )
    }
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let mut stats = TransferStats::new();
        stats.record_send(1028, false);
        stats.record_send(1028, false);
        stats.record_send(1028, true);
        stats.record_ack(AckOutcome::Advanced { base: 1 });
        stats.record_ack(AckOutcome::Duplicate);
        stats.record_ack(AckOutcome::OutOfWindow);

        assert_eq!(stats.packets_sent, 3);
        assert_eq!(stats.bytes_sent, 3084);
        assert_eq!(stats.retransmissions, 1);
        assert!((stats.retransmission_ratio() - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.acks_received, 3);
        assert_eq!(stats.duplicate_acks, 1);
        assert_eq!(stats.ignored_acks, 1);

        stats.record_receive(100, false);
        stats.record_receive(100, true);
        assert_eq!(stats.packets_received, 2);
        assert_eq!(stats.duplicate_packets, 1);
        assert_eq!(stats.bytes_received, 100);

        assert!(stats.summary().contains("1 retx"));
    }

    #[test]
    fn test_empty_ratio() {
        assert_eq!(TransferStats::default().retransmission_ratio(), 0.0);
    }
}

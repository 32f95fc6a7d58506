//! 프로토콜 설정

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::{Error, Result, DEFAULT_CHUNK_SIZE, SEQ_HEADER_LEN};

/// UDP 데이터그램 최대 페이로드
const MAX_DATAGRAM_SIZE: usize = 65_507;

/// 재전송 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Discipline {
    /// 윈도우 1, 패킷마다 ACK 대기
    StopAndWait,

    /// 누적 ACK, 타임아웃 시 윈도우 전체 재전송
    GoBackN,

    /// 개별 ACK, 타임아웃 시 미확인 패킷만 재전송
    SelectiveRepeat,
}

impl Discipline {
    /// 명령행/로그에 쓰는 짧은 이름
    pub fn tag(&self) -> &'static str {
        match self {
            Discipline::StopAndWait => "SW",
            Discipline::GoBackN => "GBN",
            Discipline::SelectiveRepeat => "SR",
        }
    }
}

impl fmt::Display for Discipline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Discipline {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sw" | "stop-and-wait" | "stopandwait" => Ok(Discipline::StopAndWait),
            "gbn" | "go-back-n" | "gobackn" => Ok(Discipline::GoBackN),
            "sr" | "selective-repeat" | "selectiverepeat" => Ok(Discipline::SelectiveRepeat),
            _ => Err(Error::UnknownDiscipline(s.to_string())),
        }
    }
}

/// 수신측 ACK 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckMode {
    /// 받은 패킷마다 그 seq로 ACK
    #[default]
    PerPacket,

    /// 0부터 연속으로 받은 구간 안의 seq로만 ACK
    /// 유실 뒤의 패킷이 Go-Back-N의 base를 건너뛰게 하지 않고,
    /// Selective-Repeat 송신자도 재전송한 seq마다 ACK을 받음
    Cumulative,
}

/// ARQFT 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 청크 크기 (바이트)
    pub chunk_size: usize,

    /// 재전송 방식
    pub discipline: Discipline,

    /// 윈도우 크기 (Stop-and-Wait에서는 무시되고 1로 고정)
    pub window_size: usize,

    /// ACK 대기 타임아웃 (밀리초)
    pub retransmit_timeout_ms: u64,

    /// 진전 없는 연속 타임아웃 허용 횟수
    /// None이면 무한 재시도
    pub max_retries: Option<u32>,

    /// 수신측 수신 대기 주기 (밀리초)
    pub receive_poll_ms: u64,

    /// 수신측 종료 마커 대기 한도 (밀리초)
    /// None이면 END가 올 때까지 계속 대기
    pub termination_timeout_ms: Option<u64>,

    /// 송신측 세션 유휴 만료 시간 (밀리초)
    pub session_idle_timeout_ms: u64,

    /// 완료된 (주소, 파일명)을 기억하는 시간 (밀리초)
    /// 이 동안 같은 요청이 다시 오면 새 세션을 만들지 않음
    pub completed_linger_ms: u64,

    /// 세션별 수신 큐 깊이
    pub session_queue_depth: usize,

    /// 수신 버퍼 크기
    pub recv_buffer_size: usize,

    /// 누락 seq가 있으면 파일을 쓰지 않고 에러 반환
    pub strict_reassembly: bool,

    /// 수신측 ACK 방식
    pub ack_mode: AckMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            discipline: Discipline::GoBackN,
            window_size: 6,
            retransmit_timeout_ms: 200,    // 200ms RTO
            max_retries: None,             // 무한 재시도
            receive_poll_ms: 2000,         // 2초
            termination_timeout_ms: None,  // END 무한 대기
            session_idle_timeout_ms: 60_000,
            completed_linger_ms: 5_000,
            session_queue_depth: 1024,
            recv_buffer_size: 65_535,
            strict_reassembly: false,
            ack_mode: AckMode::PerPacket,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 실제 사용되는 윈도우 크기
    pub fn effective_window(&self) -> usize {
        match self.discipline {
            Discipline::StopAndWait => 1,
            _ => self.window_size,
        }
    }

    pub fn retransmit_timeout(&self) -> Duration {
        Duration::from_millis(self.retransmit_timeout_ms)
    }

    pub fn receive_poll(&self) -> Duration {
        Duration::from_millis(self.receive_poll_ms)
    }

    pub fn termination_timeout(&self) -> Option<Duration> {
        self.termination_timeout_ms.map(Duration::from_millis)
    }

    pub fn session_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.session_idle_timeout_ms)
    }

    pub fn completed_linger(&self) -> Duration {
        Duration::from_millis(self.completed_linger_ms)
    }

    /// 설정 검증
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk_size는 0보다 커야 함".into()));
        }
        if self.chunk_size + SEQ_HEADER_LEN > MAX_DATAGRAM_SIZE {
            return Err(Error::InvalidConfig(format!(
                "chunk_size {}는 데이터그램 한도 {}를 초과",
                self.chunk_size,
                MAX_DATAGRAM_SIZE - SEQ_HEADER_LEN
            )));
        }
        if self.chunk_size + SEQ_HEADER_LEN > self.recv_buffer_size {
            return Err(Error::InvalidConfig(
                "recv_buffer_size가 패킷 하나보다 작음".into(),
            ));
        }
        if self.effective_window() == 0 {
            return Err(Error::InvalidConfig("window_size는 0보다 커야 함".into()));
        }
        if self.retransmit_timeout_ms == 0 || self.receive_poll_ms == 0 {
            return Err(Error::InvalidConfig("타임아웃은 0보다 커야 함".into()));
        }
        if self.session_queue_depth == 0 {
            return Err(Error::InvalidConfig("session_queue_depth는 0보다 커야 함".into()));
        }
        Ok(())
    }

    /// 손실이 큰 네트워크용 설정
    pub fn lossy_network() -> Self {
        Self {
            window_size: 8,
            retransmit_timeout_ms: 500,
            max_retries: Some(50),
            termination_timeout_ms: Some(30_000),
            session_idle_timeout_ms: 120_000,
            ..Self::default()
        }
    }

    /// 루프백/테스트용 설정 (짧은 타임아웃, 유한 재시도)
    pub fn local() -> Self {
        Self {
            retransmit_timeout_ms: 20,
            max_retries: Some(200),
            receive_poll_ms: 50,
            termination_timeout_ms: Some(5_000),
            session_idle_timeout_ms: 5_000,
            ..Self::default()
        }
    }
}

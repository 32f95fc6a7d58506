//! 에러 타입 정의

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// ARQFT 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("잘못된 데이터 패킷: {len} bytes (최소 4 bytes 필요)")]
    MalformedPacket { len: usize },

    #[error("잘못된 제어 메시지: {0:?}")]
    MalformedControl(String),

    #[error("유효하지 않은 파일 요청")]
    InvalidRequest,

    #[error("알 수 없는 재전송 방식: {0}")]
    UnknownDiscipline(String),

    #[error("원본 파일을 열 수 없음 {path:?}: {source}")]
    SourceFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("재전송 한도 초과: seq={seq}, 연속 타임아웃 {attempts}회")]
    RetriesExhausted { seq: u32, attempts: u32 },

    #[error("세션 중단됨")]
    Aborted,

    #[error("종료 마커 유실: {idle:?} 동안 수신 없음")]
    TerminationLost { idle: Duration },

    #[error("불완전한 전송: 누락 seq {} 개 (첫 누락: {:?})", .missing.len(), .missing.first())]
    IncompleteTransfer { missing: Vec<u32> },

    #[error("연결 종료")]
    ConnectionClosed,

    #[error("설정 오류: {0}")]
    InvalidConfig(String),
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;

//! # ARQFT (ARQ File Transfer)
//!
//! UDP 위에서 ARQ로 파일 하나를 신뢰성 있게 전송
//!
//! ## 핵심 특징
//! - **세 가지 재전송 방식**: Stop-and-Wait, Go-Back-N, Selective-Repeat
//! - **고정 크기 청크**: 4바이트 big-endian seq + 페이로드
//! - **텍스트 제어 메시지**: `ACK-<seq>`, `END`
//! - **세션 격리**: 상대 주소별 태스크와 전용 수신 큐, 호출별 수신 대기 시간
//! - **재시도 한도/중단**: 무한 대기 대신 선택적으로 실패 보고

pub mod chunk;
pub mod config;
pub mod error;
pub mod packet;
pub mod receiver;
pub mod sender;
pub mod session;
pub mod stats;
pub mod transport;
pub mod window;

pub use chunk::{Chunker, FileSequence};
pub use config::{AckMode, Config, Discipline};
pub use error::{Error, Result};
pub use packet::{Control, Datagram, Packet, Seq};
pub use receiver::{ReceivedFile, Receiver, Reassembly};
pub use sender::Sender;
pub use session::{AbortHandle, Session, SessionReport, SessionTable};
pub use stats::TransferStats;
pub use transport::{LossyTransport, MemoryTransport, PeerSocket, SessionChannel, Transport};
pub use window::{AckOutcome, ArqWindow};

/// 기본 청크 크기 (바이트)
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// 데이터 패킷 헤더 (seq) 길이
pub const SEQ_HEADER_LEN: usize = 4;

/// 종료 마커
pub const END_MARKER: &[u8] = b"END";

/// ACK 메시지 접두어
pub const ACK_PREFIX: &str = "ACK-";

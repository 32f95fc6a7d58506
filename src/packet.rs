//! 패킷 코덱
//!
//! - 데이터 패킷: `[seq: u32 big-endian][payload]`, 길이 필드 없음
//! - 제어 메시지: 텍스트 `ACK-<seq>`, 3바이트 `END`
//! - 파일 요청: UTF-8 파일명 그대로

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{Error, Result, ACK_PREFIX, END_MARKER, SEQ_HEADER_LEN};

/// 시퀀스 번호 (파일 전송 내 0부터 연속)
pub type Seq = u32;

/// 데이터 패킷
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub seq: Seq,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(seq: Seq, payload: impl Into<Bytes>) -> Self {
        Self {
            seq,
            payload: payload.into(),
        }
    }

    /// 와이어 바이트로 직렬화
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(SEQ_HEADER_LEN + self.payload.len());
        buf.put_u32(self.seq);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// 와이어 바이트에서 역직렬화
    pub fn decode(mut bytes: Bytes) -> Result<Self> {
        if bytes.len() < SEQ_HEADER_LEN {
            return Err(Error::MalformedPacket { len: bytes.len() });
        }
        let seq = bytes.get_u32();
        Ok(Self {
            seq,
            payload: bytes,
        })
    }

    /// 와이어 상의 크기
    pub fn wire_len(&self) -> usize {
        SEQ_HEADER_LEN + self.payload.len()
    }
}

/// 제어 메시지
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// 수신 확인
    Ack(Seq),

    /// 종료 마커
    End,
}

impl Control {
    pub fn encode(&self) -> Bytes {
        match self {
            Control::Ack(seq) => Bytes::from(format!("{}{}", ACK_PREFIX, seq)),
            Control::End => Bytes::from_static(END_MARKER),
        }
    }

    /// `ACK-<seq>` 파싱
    pub fn parse_ack(bytes: &[u8]) -> Result<Seq> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| Error::MalformedControl(String::from_utf8_lossy(bytes).into_owned()))?;

        // 10진수 숫자만 허용 (부호/공백 없음)
        text.strip_prefix(ACK_PREFIX)
            .filter(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|n| n.parse::<Seq>().ok())
            .ok_or_else(|| Error::MalformedControl(text.to_string()))
    }
}

/// 수신측에서 본 데이터그램 분류
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Datagram {
    Data(Packet),
    End,
}

impl Datagram {
    /// 정확히 `END`이면 종료 마커, 4바이트 이상이면 데이터 패킷
    pub fn classify(bytes: Bytes) -> Result<Self> {
        if bytes.as_ref() == END_MARKER {
            return Ok(Datagram::End);
        }
        Packet::decode(bytes).map(Datagram::Data)
    }
}

/// 파일 요청 직렬화
pub fn encode_request(filename: &str) -> Bytes {
    Bytes::copy_from_slice(filename.as_bytes())
}

/// 파일 요청 역직렬화 (비어 있지 않은 UTF-8)
pub fn decode_request(bytes: &[u8]) -> Result<String> {
    let name = std::str::from_utf8(bytes).map_err(|_| Error::InvalidRequest)?;
    let name = name.trim_end_matches(['\0', '\n', '\r']);
    if name.is_empty() {
        return Err(Error::InvalidRequest);
    }
    Ok(name.to_string())
}

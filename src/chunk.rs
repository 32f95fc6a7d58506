//! 파일 청크 분할
//!
//! - Chunker: 파일을 고정 크기 청크로 읽으며 패킷을 지연 생성
//! - FileSequence: 한 세션 동안 재전송에 쓰는 전체 패킷 목록

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use bytes::{Bytes, BytesMut};

use crate::packet::{Packet, Seq};
use crate::{Error, Result};

/// 청크 분할기 (송신측)
///
/// 앞에서부터 한 번만 읽을 수 있고 중간 위치로 되감을 수 없다.
pub struct Chunker<R> {
    reader: R,
    chunk_size: usize,
    next_seq: Seq,
    finished: bool,
}

impl<R: Read> Chunker<R> {
    pub fn new(reader: R, chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk_size는 0보다 커야 함".into()));
        }
        Ok(Self {
            reader,
            chunk_size,
            next_seq: 0,
            finished: false,
        })
    }

    /// chunk_size만큼 채우거나 EOF까지 읽기
    fn read_chunk(&mut self) -> io::Result<Bytes> {
        let mut buf = BytesMut::zeroed(self.chunk_size);
        let mut filled = 0;

        while filled < self.chunk_size {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        buf.truncate(filled);
        Ok(buf.freeze())
    }
}

impl Chunker<BufReader<File>> {
    /// 파일 열기
    pub fn open(path: impl AsRef<Path>, chunk_size: usize) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| Error::SourceFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::new(BufReader::new(file), chunk_size)
    }
}

impl<R: Read> Iterator for Chunker<R> {
    type Item = io::Result<Packet>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.read_chunk() {
            Ok(data) if data.is_empty() => {
                self.finished = true;
                None
            }
            Ok(data) => {
                if data.len() < self.chunk_size {
                    self.finished = true;
                }
                let packet = Packet::new(self.next_seq, data);
                self.next_seq += 1;
                Some(Ok(packet))
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

/// 전송할 파일 전체의 패킷 목록
#[derive(Debug, Clone)]
pub struct FileSequence {
    packets: Vec<Packet>,

    /// 원본 파일 크기
    pub total_bytes: u64,

    /// 원본 파일 CRC32
    pub checksum: u32,
}

impl FileSequence {
    /// 청크 이터레이터에서 수집
    pub fn collect<R: Read>(chunker: Chunker<R>) -> io::Result<Self> {
        let mut hasher = crc32fast::Hasher::new();
        let mut total_bytes = 0u64;
        let mut packets = Vec::new();

        for packet in chunker {
            let packet = packet?;
            hasher.update(&packet.payload);
            total_bytes += packet.payload.len() as u64;
            packets.push(packet);
        }

        Ok(Self {
            packets,
            total_bytes,
            checksum: hasher.finalize(),
        })
    }

    /// 메모리 데이터에서 생성
    pub fn from_bytes(data: &[u8], chunk_size: usize) -> Result<Self> {
        Ok(Self::collect(Chunker::new(data, chunk_size)?)?)
    }

    /// 파일에서 로드 (블로킹 읽기는 런타임 밖에서 수행)
    pub async fn load(path: impl Into<PathBuf>, chunk_size: usize) -> Result<Self> {
        let path = path.into();
        let join = tokio::task::spawn_blocking(move || {
            let chunker = Chunker::open(&path, chunk_size)?;
            Self::collect(chunker).map_err(|source| Error::SourceFile { path, source })
        })
        .await;

        match join {
            Ok(result) => result,
            Err(e) => Err(Error::Io(io::Error::new(io::ErrorKind::Other, e))),
        }
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn get(&self, seq: Seq) -> Option<&Packet> {
        self.packets.get(seq as usize)
    }

    pub fn packets(&self) -> &[Packet] {
        &self.packets
    }
}

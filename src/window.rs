//! 송신 윈도우 상태 기계
//!
//! 소켓 I/O 없이 상태만 관리한다. 호출자는 다음 순서로 구동한다.
//!
//! 1. `poll_transmit()`이 돌려준 seq를 전송
//! 2. ACK 수신 시 `on_ack(k)`, 대기 시간 초과 시 `on_timeout()`
//! 3. `is_done()`이 true가 될 때까지 반복한 뒤 종료 마커 전송
//!
//! ```text
//!    base              next           base + size
//!     │                 │                  │
//! ────┼─────────────────┼──────────────────┼────▶ seq
//!     │ <── in flight ─▶│ <── 전송 가능 ──▶│
//! ```
//!
//! 모든 방식에서 `base <= next <= base + size`이고 base는 감소하지 않는다.

use std::collections::VecDeque;
use std::ops::Range;

use crate::config::Discipline;
use crate::packet::Seq;
use crate::{Error, Result};

/// ACK 처리 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// base가 전진함
    Advanced { base: Seq },

    /// 윈도우 안의 ACK을 기록했지만 base는 그대로 (Selective-Repeat)
    Recorded,

    /// 이미 확인된 seq
    Duplicate,

    /// 윈도우 밖의 seq, 무시
    OutOfWindow,
}

fn window_end(base: Seq, size: usize, total: Seq) -> Seq {
    let end = base as u64 + size as u64;
    end.min(total as u64) as Seq
}

/// Stop-and-Wait: 한 번에 한 패킷
#[derive(Debug, Clone)]
pub struct StopAndWait {
    total: Seq,
    base: Seq,
    awaiting: bool,
}

impl StopAndWait {
    fn new(total: Seq) -> Self {
        Self {
            total,
            base: 0,
            awaiting: false,
        }
    }

    fn poll_transmit(&mut self) -> Vec<Seq> {
        if self.awaiting || self.base >= self.total {
            return Vec::new();
        }
        self.awaiting = true;
        vec![self.base]
    }

    fn on_ack(&mut self, seq: Seq) -> AckOutcome {
        if seq < self.base {
            AckOutcome::Duplicate
        } else if self.awaiting && seq == self.base {
            self.base += 1;
            self.awaiting = false;
            AckOutcome::Advanced { base: self.base }
        } else {
            AckOutcome::OutOfWindow
        }
    }

    fn on_timeout(&mut self) -> Vec<Seq> {
        if !self.awaiting {
            return Vec::new();
        }
        self.awaiting = false;
        vec![self.base]
    }

    fn next(&self) -> Seq {
        self.base + self.awaiting as Seq
    }
}

/// Go-Back-N: 누적 ACK, 타임아웃 시 윈도우 전체 재전송
#[derive(Debug, Clone)]
pub struct GoBackN {
    total: Seq,
    size: usize,
    base: Seq,
    next: Seq,
}

impl GoBackN {
    fn new(total: Seq, size: usize) -> Self {
        Self {
            total,
            size,
            base: 0,
            next: 0,
        }
    }

    fn poll_transmit(&mut self) -> Vec<Seq> {
        let end = window_end(self.base, self.size, self.total);
        let range: Range<Seq> = self.next..end.max(self.next);
        self.next = range.end;
        range.collect()
    }

    /// ACK k는 0..=k 전체를 확인한다
    fn on_ack(&mut self, seq: Seq) -> AckOutcome {
        if seq < self.base {
            AckOutcome::Duplicate
        } else if seq >= self.next {
            AckOutcome::OutOfWindow
        } else {
            self.base = seq + 1;
            AckOutcome::Advanced { base: self.base }
        }
    }

    fn on_timeout(&mut self) -> Vec<Seq> {
        let resend: Vec<Seq> = (self.base..self.next).collect();
        self.next = self.base;
        resend
    }
}

/// Selective-Repeat: 개별 ACK, 미확인 패킷만 재전송
#[derive(Debug, Clone)]
pub struct SelectiveRepeat {
    total: Seq,
    size: usize,
    base: Seq,
    next: Seq,
    acked: Vec<bool>,
    retransmit: VecDeque<Seq>,
}

impl SelectiveRepeat {
    fn new(total: Seq, size: usize) -> Self {
        Self {
            total,
            size,
            base: 0,
            next: 0,
            acked: vec![false; total as usize],
            retransmit: VecDeque::new(),
        }
    }

    fn poll_transmit(&mut self) -> Vec<Seq> {
        let mut out: Vec<Seq> = Vec::new();

        // 예약된 재전송 중 그 사이 확인된 것은 건너뜀
        while let Some(seq) = self.retransmit.pop_front() {
            if seq >= self.base && !self.acked[seq as usize] {
                out.push(seq);
            }
        }

        let end = window_end(self.base, self.size, self.total);
        if end > self.next {
            out.extend(self.next..end);
            self.next = end;
        }
        out
    }

    fn on_ack(&mut self, seq: Seq) -> AckOutcome {
        if seq < self.base {
            return AckOutcome::Duplicate;
        }
        if seq as u64 >= self.base as u64 + self.size as u64 || seq >= self.next {
            return AckOutcome::OutOfWindow;
        }
        if self.acked[seq as usize] {
            return AckOutcome::Duplicate;
        }

        self.acked[seq as usize] = true;
        if seq != self.base {
            return AckOutcome::Recorded;
        }

        while self.base < self.total && self.acked[self.base as usize] {
            self.base += 1;
        }
        AckOutcome::Advanced { base: self.base }
    }

    fn on_timeout(&mut self) -> Vec<Seq> {
        let resend: Vec<Seq> = (self.base..self.next)
            .filter(|&seq| !self.acked[seq as usize])
            .collect();
        self.retransmit = resend.iter().copied().collect();
        resend
    }

    /// 확인된 seq 여부
    pub fn is_acked(&self, seq: Seq) -> bool {
        self.acked.get(seq as usize).copied().unwrap_or(false)
    }
}

/// 세 가지 재전송 방식의 윈도우
#[derive(Debug, Clone)]
pub enum ArqWindow {
    StopAndWait(StopAndWait),
    GoBackN(GoBackN),
    SelectiveRepeat(SelectiveRepeat),
}

impl ArqWindow {
    /// 전체 패킷 수와 윈도우 크기로 생성
    ///
    /// Stop-and-Wait는 window_size를 보지 않는다.
    pub fn new(discipline: Discipline, total: Seq, window_size: usize) -> Result<Self> {
        if discipline != Discipline::StopAndWait && window_size == 0 {
            return Err(Error::InvalidConfig("window_size는 0보다 커야 함".into()));
        }

        Ok(match discipline {
            Discipline::StopAndWait => ArqWindow::StopAndWait(StopAndWait::new(total)),
            Discipline::GoBackN => ArqWindow::GoBackN(GoBackN::new(total, window_size)),
            Discipline::SelectiveRepeat => {
                ArqWindow::SelectiveRepeat(SelectiveRepeat::new(total, window_size))
            }
        })
    }

    pub fn discipline(&self) -> Discipline {
        match self {
            ArqWindow::StopAndWait(_) => Discipline::StopAndWait,
            ArqWindow::GoBackN(_) => Discipline::GoBackN,
            ArqWindow::SelectiveRepeat(_) => Discipline::SelectiveRepeat,
        }
    }

    /// 지금 전송해야 할 seq 목록 (재전송 포함, 전송된 것으로 기록됨)
    pub fn poll_transmit(&mut self) -> Vec<Seq> {
        match self {
            ArqWindow::StopAndWait(w) => w.poll_transmit(),
            ArqWindow::GoBackN(w) => w.poll_transmit(),
            ArqWindow::SelectiveRepeat(w) => w.poll_transmit(),
        }
    }

    /// ACK 처리
    pub fn on_ack(&mut self, seq: Seq) -> AckOutcome {
        match self {
            ArqWindow::StopAndWait(w) => w.on_ack(seq),
            ArqWindow::GoBackN(w) => w.on_ack(seq),
            ArqWindow::SelectiveRepeat(w) => w.on_ack(seq),
        }
    }

    /// 타임아웃 처리, 다음 poll_transmit에서 재전송될 seq 반환
    pub fn on_timeout(&mut self) -> Vec<Seq> {
        match self {
            ArqWindow::StopAndWait(w) => w.on_timeout(),
            ArqWindow::GoBackN(w) => w.on_timeout(),
            ArqWindow::SelectiveRepeat(w) => w.on_timeout(),
        }
    }

    pub fn base(&self) -> Seq {
        match self {
            ArqWindow::StopAndWait(w) => w.base,
            ArqWindow::GoBackN(w) => w.base,
            ArqWindow::SelectiveRepeat(w) => w.base,
        }
    }

    pub fn next(&self) -> Seq {
        match self {
            ArqWindow::StopAndWait(w) => w.next(),
            ArqWindow::GoBackN(w) => w.next,
            ArqWindow::SelectiveRepeat(w) => w.next,
        }
    }

    pub fn total(&self) -> Seq {
        match self {
            ArqWindow::StopAndWait(w) => w.total,
            ArqWindow::GoBackN(w) => w.total,
            ArqWindow::SelectiveRepeat(w) => w.total,
        }
    }

    pub fn size(&self) -> usize {
        match self {
            ArqWindow::StopAndWait(_) => 1,
            ArqWindow::GoBackN(w) => w.size,
            ArqWindow::SelectiveRepeat(w) => w.size,
        }
    }

    /// 전송 후 확인 대기 중인 패킷 수
    pub fn in_flight(&self) -> usize {
        (self.next() - self.base()) as usize
    }

    /// 모든 패킷이 확인됨
    pub fn is_done(&self) -> bool {
        self.base() >= self.total()
    }
}

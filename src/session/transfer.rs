//! The transfer session state machine.
//!
//! One instance per active transfer, created on start and discarded on
//! Completed/Aborted. Receiving runs either the pull protocol (request,
//! await the matching data frame, pace, request next), the fast protocol
//! (one "dump all" request, then unsolicited streaming), or an unbounded
//! ambient capture. Sending emits data frames unsolicited with pacing
//! between items.
//!
//! Inputs arrive through explicit methods; outputs leave as an ordered
//! list of [`SessionEffect`]s. The session itself never sleeps and never
//! touches the transport.

use crate::address::{SlotAddress, SLOT_CAPACITY};
use crate::error::SessionError;
use crate::patch::{PatchPayload, PatchRecord};
use crate::protocol::Codec;
use crate::session::timer::PacingTimer;
use bytes::Bytes;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Transfer direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Receiving,
    Sending,
}

/// Pacing and timeout thresholds for one session.
#[derive(Debug, Clone, Copy)]
pub struct TransferOptions {
    /// Delay between an accepted frame and the next request (or between
    /// outgoing data frames when sending).
    pub pacing: Duration,
    /// Quiet threshold after which a [`TimeoutNotice`] is raised. The
    /// session keeps waiting; recovery is the caller's call.
    pub timeout: Duration,
}

/// Observable session state. `paused` is orthogonal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// A request is outstanding, or the device is streaming.
    AwaitingData,
    /// Waiting out the pacing delay before the next emission.
    Pacing,
    Completed,
    Aborted,
}

/// What a session wants done, in order.
#[derive(Debug)]
pub enum SessionEffect {
    /// Put this frame on the wire.
    Transmit(Bytes),
    /// Progress changed.
    Progress(ProgressReport),
    /// The quiet threshold elapsed with nothing accepted.
    TimedOut(TimeoutNotice),
    /// Terminal: the full ordered record list.
    Completed(Vec<PatchRecord>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressReport {
    pub completed: usize,
    /// `None` for unbounded captures.
    pub total: Option<usize>,
    pub eta_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy)]
pub struct TimeoutNotice {
    /// The threshold that elapsed.
    pub quiet_for: Duration,
    pub completed: usize,
}

/// What `resume()` owes the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    Nothing,
    /// Re-send the request that was outstanding when pause hit.
    Resend(SlotAddress),
    /// Emit the next queued item.
    Next,
}

enum Mode {
    /// Pull protocol: one request per patch, strict address matching.
    Pull {
        queue: VecDeque<SlotAddress>,
        last_requested: Option<SlotAddress>,
    },
    /// Fast protocol: device streams autonomously after one dump-all.
    Fast,
    /// Unbounded ambient capture; completes only via `finish`.
    Capture,
    /// Sending: unsolicited data frames, paced.
    Push {
        queue: VecDeque<(SlotAddress, PatchPayload)>,
    },
}

pub struct TransferSession {
    codec: Codec,
    mode: Mode,
    state: SessionState,
    paused: bool,
    pending: Pending,
    total: Option<usize>,
    completed: usize,
    records: Vec<PatchRecord>,
    pacing: Duration,
    timeout: Duration,
    pacing_timer: PacingTimer,
    timeout_timer: PacingTimer,
    started_at: Instant,
}

impl TransferSession {
    /// Start a receiving session over the given addresses.
    ///
    /// `fast` takes effect only when the full 1024-slot range is requested:
    /// the session emits exactly one dump-all request and accepts
    /// unsolicited data frames. Any other address list runs the pull
    /// protocol.
    pub fn receive(
        codec: Codec,
        addrs: Vec<SlotAddress>,
        fast: bool,
        opts: TransferOptions,
    ) -> Result<(Self, Vec<SessionEffect>), SessionError> {
        if addrs.is_empty() {
            return Err(SessionError::EmptyBatch);
        }
        let full_range = addrs.len() == SLOT_CAPACITY
            && addrs
                .iter()
                .enumerate()
                .all(|(i, a)| a.index() == Some(i as u16));

        let total = addrs.len();
        let mut session = if fast && full_range {
            Self::new(codec, Mode::Fast, Some(total), opts)
        } else {
            Self::new(
                codec,
                Mode::Pull {
                    queue: addrs.into(),
                    last_requested: None,
                },
                Some(total),
                opts,
            )
        };

        let mut effects = Vec::new();
        match &mut session.mode {
            Mode::Fast => effects.push(SessionEffect::Transmit(session.codec.encode_dump_all())),
            Mode::Pull {
                queue,
                last_requested,
            } => {
                if let Some(first) = queue.pop_front() {
                    *last_requested = Some(first);
                    effects.push(SessionEffect::Transmit(session.codec.encode_request(first)));
                }
            }
            _ => unreachable!(),
        }
        session.timeout_timer.arm(session.timeout);
        Ok((session, effects))
    }

    /// Start an unbounded ambient capture: any data frame is recorded,
    /// total unknown, completion only via [`finish`](Self::finish).
    pub fn capture(codec: Codec, opts: TransferOptions) -> (Self, Vec<SessionEffect>) {
        let mut session = Self::new(codec, Mode::Capture, None, opts);
        session.timeout_timer.arm(session.timeout);
        (session, Vec::new())
    }

    /// Start a sending session over an ordered item list. The first data
    /// frame goes out immediately; the device sends no response to writes.
    pub fn send(
        codec: Codec,
        items: Vec<(SlotAddress, PatchPayload)>,
        opts: TransferOptions,
    ) -> Result<(Self, Vec<SessionEffect>), SessionError> {
        if items.is_empty() {
            return Err(SessionError::EmptyBatch);
        }
        let total = items.len();
        let mut session = Self::new(
            codec,
            Mode::Push {
                queue: items.into(),
            },
            Some(total),
            opts,
        );
        let effects = session.emit_next_item();
        Ok((session, effects))
    }

    fn new(codec: Codec, mode: Mode, total: Option<usize>, opts: TransferOptions) -> Self {
        Self {
            codec,
            mode,
            state: SessionState::AwaitingData,
            paused: false,
            pending: Pending::Nothing,
            total,
            completed: 0,
            records: Vec::new(),
            pacing: opts.pacing,
            timeout: opts.timeout,
            pacing_timer: PacingTimer::new(),
            timeout_timer: PacingTimer::new(),
            started_at: Instant::now(),
        }
    }

    // -------------------------------------------------------------------------
    // Inputs
    // -------------------------------------------------------------------------

    /// A decoded data frame arrived for this session.
    pub fn on_data_frame(&mut self, addr: SlotAddress, payload: PatchPayload) -> Vec<SessionEffect> {
        if self.is_terminal() {
            debug!(%addr, "data frame after terminal state, ignored");
            return Vec::new();
        }
        match &mut self.mode {
            Mode::Push { .. } => {
                debug!(%addr, "data frame during send, ignored");
                Vec::new()
            }
            Mode::Pull { last_requested, .. } => {
                if *last_requested != Some(addr) {
                    debug!(%addr, "stray data frame, address not requested");
                    return Vec::new();
                }
                *last_requested = None;
                self.accept(addr, payload)
            }
            Mode::Fast | Mode::Capture => self.accept(addr, payload),
        }
    }

    fn accept(&mut self, addr: SlotAddress, payload: PatchPayload) -> Vec<SessionEffect> {
        self.records.push(PatchRecord::new(addr, payload));
        self.completed += 1;

        let mut effects = vec![SessionEffect::Progress(self.progress())];
        if self.total == Some(self.completed) {
            effects.push(self.complete());
            return effects;
        }

        if self.paused {
            // Defer the follow-up; resume owes exactly one emission.
            if matches!(self.mode, Mode::Pull { .. }) {
                self.pending = Pending::Next;
            }
            return effects;
        }

        self.timeout_timer.arm(self.timeout);
        if matches!(self.mode, Mode::Pull { .. }) {
            self.state = SessionState::Pacing;
            self.pacing_timer.arm(self.pacing);
        }
        effects
    }

    /// The pacing delay elapsed: emit the next request (pull) or the next
    /// data frame (send).
    pub fn on_pacing_elapsed(&mut self) -> Vec<SessionEffect> {
        self.pacing_timer.cancel();
        if self.is_terminal() || self.paused || self.state != SessionState::Pacing {
            return Vec::new();
        }
        match &mut self.mode {
            Mode::Pull {
                queue,
                last_requested,
            } => match queue.pop_front() {
                Some(addr) => {
                    *last_requested = Some(addr);
                    self.state = SessionState::AwaitingData;
                    vec![SessionEffect::Transmit(self.codec.encode_request(addr))]
                }
                None => Vec::new(),
            },
            Mode::Push { .. } => self.emit_next_item(),
            Mode::Fast | Mode::Capture => Vec::new(),
        }
    }

    /// The quiet threshold elapsed. Raises one notice and keeps waiting;
    /// the next accepted frame re-arms the threshold.
    pub fn on_timeout_elapsed(&mut self) -> Vec<SessionEffect> {
        self.timeout_timer.cancel();
        if self.is_terminal() || self.paused {
            return Vec::new();
        }
        vec![SessionEffect::TimedOut(TimeoutNotice {
            quiet_for: self.timeout,
            completed: self.completed,
        })]
    }

    fn emit_next_item(&mut self) -> Vec<SessionEffect> {
        let Mode::Push { queue } = &mut self.mode else {
            return Vec::new();
        };
        let Some((addr, payload)) = queue.pop_front() else {
            return Vec::new();
        };
        let frame = self.codec.encode_data(addr, &payload);
        self.completed += 1;

        let mut effects = vec![
            SessionEffect::Transmit(frame),
            SessionEffect::Progress(self.progress()),
        ];
        let done = match &self.mode {
            Mode::Push { queue } => queue.is_empty(),
            _ => unreachable!(),
        };
        if done {
            effects.push(self.complete());
        } else {
            self.state = SessionState::Pacing;
            self.pacing_timer.arm(self.pacing);
        }
        effects
    }

    // -------------------------------------------------------------------------
    // Pause / resume / abort / finish
    // -------------------------------------------------------------------------

    /// Suspend pacing without losing the pending request. Idempotent.
    pub fn pause(&mut self) {
        if self.paused || self.is_terminal() {
            return;
        }
        self.paused = true;
        self.pacing_timer.cancel();
        self.timeout_timer.cancel();
        self.pending = match (&self.mode, self.state) {
            (Mode::Pull { last_requested, .. }, SessionState::AwaitingData) => {
                match last_requested {
                    Some(addr) => Pending::Resend(*addr),
                    None => Pending::Nothing,
                }
            }
            (Mode::Pull { .. }, SessionState::Pacing) => Pending::Next,
            (Mode::Push { .. }, SessionState::Pacing) => Pending::Next,
            // Fast/capture streams are device-driven; nothing to re-issue.
            _ => Pending::Nothing,
        };
    }

    /// Resume a paused session. Emits precisely the one outstanding
    /// request (or queued item) - never zero for a pull session, never
    /// more than one.
    pub fn resume(&mut self) -> Vec<SessionEffect> {
        if !self.paused || self.is_terminal() {
            return Vec::new();
        }
        self.paused = false;
        if self.direction() == Direction::Receiving {
            self.timeout_timer.arm(self.timeout);
        }
        match std::mem::replace(&mut self.pending, Pending::Nothing) {
            Pending::Resend(addr) => {
                if let Mode::Pull { last_requested, .. } = &mut self.mode {
                    *last_requested = Some(addr);
                }
                self.state = SessionState::AwaitingData;
                vec![SessionEffect::Transmit(self.codec.encode_request(addr))]
            }
            Pending::Next => {
                // Skip the remainder of the pacing delay; the user already
                // waited.
                self.state = SessionState::Pacing;
                self.on_pacing_elapsed()
            }
            Pending::Nothing => Vec::new(),
        }
    }

    /// Abort a bounded session. Unbounded captures cannot be torn down
    /// mid-frame; they are abandoned by the coordinator instead.
    pub fn abort(&mut self) -> Result<(), SessionError> {
        if self.is_terminal() {
            return Err(SessionError::NotActive);
        }
        if self.total.is_none() {
            return Err(SessionError::UnboundedAbort);
        }
        self.state = SessionState::Aborted;
        self.pending = Pending::Nothing;
        self.pacing_timer.cancel();
        self.timeout_timer.cancel();
        Ok(())
    }

    /// Complete an unbounded capture with whatever has been recorded.
    pub fn finish(&mut self) -> Result<Vec<SessionEffect>, SessionError> {
        if !matches!(self.mode, Mode::Capture) {
            return Err(SessionError::NotCapture);
        }
        if self.is_terminal() {
            return Err(SessionError::NotActive);
        }
        Ok(vec![self.complete()])
    }

    fn complete(&mut self) -> SessionEffect {
        self.state = SessionState::Completed;
        self.pending = Pending::Nothing;
        self.pacing_timer.cancel();
        self.timeout_timer.cancel();
        SessionEffect::Completed(std::mem::take(&mut self.records))
    }

    // -------------------------------------------------------------------------
    // Introspection
    // -------------------------------------------------------------------------

    pub fn progress(&self) -> ProgressReport {
        ProgressReport {
            completed: self.completed,
            total: self.total,
            eta_ms: self.eta_ms(),
        }
    }

    fn eta_ms(&self) -> Option<u64> {
        let total = self.total?;
        if self.completed == 0 {
            return None;
        }
        let remaining = total.saturating_sub(self.completed);
        let elapsed = self.started_at.elapsed();
        let per_item = elapsed.as_millis() as u64 / self.completed as u64;
        Some(per_item * remaining as u64)
    }

    pub fn direction(&self) -> Direction {
        match self.mode {
            Mode::Push { .. } => Direction::Sending,
            _ => Direction::Receiving,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, SessionState::Completed | SessionState::Aborted)
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_bounded(&self) -> bool {
        self.total.is_some()
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn total(&self) -> Option<usize> {
        self.total
    }

    pub fn pacing_deadline(&self) -> Option<Instant> {
        self.pacing_timer.deadline()
    }

    pub fn timeout_deadline(&self) -> Option<Instant> {
        self.timeout_timer.deadline()
    }

    /// Earliest armed deadline, for the drive loop's sleep.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.pacing_deadline(), self.timeout_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Fire whichever timers are due at `now`.
    pub fn on_deadline(&mut self, now: Instant) -> Vec<SessionEffect> {
        let mut effects = Vec::new();
        if self.timeout_timer.fire_if_due(now) {
            effects.extend(self.on_timeout_elapsed());
        }
        if self.pacing_timer.fire_if_due(now) {
            effects.extend(self.on_pacing_elapsed());
        }
        effects
    }
}

impl std::fmt::Debug for TransferSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferSession")
            .field("direction", &self.direction())
            .field("state", &self.state)
            .field("paused", &self.paused)
            .field("completed", &self.completed)
            .field("total", &self.total)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

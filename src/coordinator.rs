//! The session coordinator.
//!
//! Owns the single active transfer - an explicit latch, not a queue -
//! routes inbound frames to it, and on completion drives reconciliation
//! and the persistent commit. Outbound frames and UI events leave through
//! unbounded channels; the caller's event loop selects over inbound
//! frames, UI commands, and [`SessionCoordinator::next_deadline`].

use crate::address::SlotAddress;
use crate::config::DumpConfig;
use crate::error::{DumpError, Result, SessionError};
use crate::patch::{PatchPayload, PatchRecord};
use crate::protocol::{Codec, Frame};
use crate::reconcile::{ImportPolicy, ReconcileEngine, ReconcilePlan};
use crate::session::{ProgressReport, SessionEffect, TimeoutNotice, TransferSession};
use crate::store::{CollectionSlotMap, CommitReceipt, PatchStore};
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Events surfaced to the caller/UI.
#[derive(Debug, Clone)]
pub enum DumpEvent {
    Progress(ProgressReport),
    TimedOut(TimeoutNotice),
    /// The transfer finished; the ordered record list.
    Completed { records: Vec<PatchRecord> },
    /// Reconciliation produced a plan (conflicts included) about to be
    /// committed.
    PlanReady(ReconcilePlan),
    Committed(CommitReceipt),
    Aborted,
}

/// Where a completed receive lands: a named collection with slot
/// semantics, or `None` for a library-only import.
#[derive(Debug, Clone, Default)]
pub struct ImportRequest {
    pub collection: Option<String>,
    pub policy: ImportPolicy,
}

struct ActiveTransfer {
    session: TransferSession,
    /// `None` for sends: nothing to reconcile afterwards.
    import: Option<ImportRequest>,
}

pub struct SessionCoordinator<S> {
    store: Arc<S>,
    engine: ReconcileEngine<S>,
    codec: Codec,
    config: DumpConfig,
    active: Option<ActiveTransfer>,
    /// Records of a completed transfer whose import failed; kept so the
    /// caller can retry with different flags.
    pending_batch: Option<Vec<PatchRecord>>,
    wire_tx: mpsc::UnboundedSender<Bytes>,
    event_tx: mpsc::UnboundedSender<DumpEvent>,
}

impl<S: PatchStore> SessionCoordinator<S> {
    /// Returns the coordinator plus the outbound wire channel and the
    /// event channel.
    pub fn new(
        store: Arc<S>,
        config: DumpConfig,
    ) -> (
        Self,
        mpsc::UnboundedReceiver<Bytes>,
        mpsc::UnboundedReceiver<DumpEvent>,
    ) {
        let (wire_tx, wire_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let coordinator = Self {
            engine: ReconcileEngine::new(store.clone()),
            codec: Codec::new(config.unit_id),
            store,
            config,
            active: None,
            pending_batch: None,
            wire_tx,
            event_tx,
        };
        (coordinator, wire_rx, event_rx)
    }

    // -------------------------------------------------------------------------
    // Starting transfers
    // -------------------------------------------------------------------------

    /// Start a receiving session. Fails fast while another transfer holds
    /// the latch.
    pub async fn start_receive(
        &mut self,
        addrs: Vec<SlotAddress>,
        fast: bool,
        import: ImportRequest,
    ) -> Result<()> {
        self.ensure_idle()?;
        let (session, effects) =
            TransferSession::receive(self.codec, addrs, fast, self.config.transfer_options())?;
        self.active = Some(ActiveTransfer {
            session,
            import: Some(import),
        });
        self.apply_effects(effects).await
    }

    /// Start an unbounded ambient capture.
    pub async fn start_capture(&mut self, import: ImportRequest) -> Result<()> {
        self.ensure_idle()?;
        let (session, effects) =
            TransferSession::capture(self.codec, self.config.transfer_options());
        self.active = Some(ActiveTransfer {
            session,
            import: Some(import),
        });
        self.apply_effects(effects).await
    }

    /// Start sending an ordered list of patches to the device.
    pub async fn start_send(&mut self, items: Vec<(SlotAddress, PatchPayload)>) -> Result<()> {
        self.ensure_idle()?;
        let (session, effects) =
            TransferSession::send(self.codec, items, self.config.transfer_options())?;
        self.active = Some(ActiveTransfer {
            session,
            import: None,
        });
        self.apply_effects(effects).await
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.active.is_some() {
            return Err(SessionError::Busy.into());
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Inbound frames and timers
    // -------------------------------------------------------------------------

    /// Feed one raw inbound frame. Malformed frames are dropped and
    /// logged; frames with no active session are stray device chatter.
    pub async fn handle_frame(&mut self, raw: &[u8]) -> Result<()> {
        let frame = match self.codec.decode(raw) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(%err, len = raw.len(), "dropping malformed frame");
                return Ok(());
            }
        };
        match frame {
            Frame::Data { addr, payload } => {
                let Some(active) = self.active.as_mut() else {
                    debug!(%addr, "data frame with no active session, dropped");
                    return Ok(());
                };
                let effects = active.session.on_data_frame(addr, payload);
                self.apply_effects(effects).await
            }
            // The host never services requests; inbound ones are chatter.
            Frame::Request { addr } => {
                debug!(%addr, "inbound request frame dropped");
                Ok(())
            }
            Frame::DumpAllRequest => {
                debug!("inbound dump-all request dropped");
                Ok(())
            }
        }
    }

    /// Earliest armed session deadline, for the drive loop's sleep.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.active.as_ref().and_then(|a| a.session.next_deadline())
    }

    /// Fire whichever session timers are due now.
    pub async fn on_deadline(&mut self) -> Result<()> {
        let Some(active) = self.active.as_mut() else {
            return Ok(());
        };
        let effects = active.session.on_deadline(Instant::now());
        self.apply_effects(effects).await
    }

    /// Sleep until the next armed deadline and fire it. Returns `false`
    /// when no deadline is armed.
    pub async fn tick(&mut self) -> Result<bool> {
        let Some(deadline) = self.next_deadline() else {
            return Ok(false);
        };
        tokio::time::sleep_until(deadline).await;
        self.on_deadline().await?;
        Ok(true)
    }

    // -------------------------------------------------------------------------
    // Caller controls
    // -------------------------------------------------------------------------

    pub fn pause(&mut self) -> Result<()> {
        let active = self.active.as_mut().ok_or(SessionError::NotActive)?;
        active.session.pause();
        Ok(())
    }

    pub async fn resume(&mut self) -> Result<()> {
        let active = self.active.as_mut().ok_or(SessionError::NotActive)?;
        let effects = active.session.resume();
        self.apply_effects(effects).await
    }

    /// Abort the active bounded session and release the latch.
    pub fn abort(&mut self) -> Result<()> {
        let active = self.active.as_mut().ok_or(SessionError::NotActive)?;
        active.session.abort().map_err(DumpError::from)?;
        self.active = None;
        let _ = self.event_tx.send(DumpEvent::Aborted);
        Ok(())
    }

    /// Complete an unbounded capture with the records gathered so far.
    pub async fn finish_capture(&mut self) -> Result<()> {
        let active = self.active.as_mut().ok_or(SessionError::NotActive)?;
        let effects = active.session.finish().map_err(DumpError::from)?;
        self.apply_effects(effects).await
    }

    /// Abandon an unbounded capture: drop the latch and discard whatever
    /// the device keeps streaming.
    pub fn abandon(&mut self) -> Result<()> {
        let active = self.active.as_ref().ok_or(SessionError::NotActive)?;
        if active.session.is_bounded() {
            return Err(SessionError::NotCapture.into());
        }
        self.active = None;
        let _ = self.event_tx.send(DumpEvent::Aborted);
        Ok(())
    }

    /// Retry the import of a completed batch whose reconciliation or
    /// commit failed, typically with adjusted flags (library-only after a
    /// capacity failure).
    pub async fn reimport(&mut self, import: ImportRequest) -> Result<()> {
        let records = self
            .pending_batch
            .take()
            .ok_or(SessionError::NoPendingBatch)?;
        self.reconcile_and_commit(records, import).await
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn progress(&self) -> Option<ProgressReport> {
        self.active.as_ref().map(|a| a.session.progress())
    }

    // -------------------------------------------------------------------------
    // Completion pipeline
    // -------------------------------------------------------------------------

    async fn apply_effects(&mut self, effects: Vec<SessionEffect>) -> Result<()> {
        for effect in effects {
            match effect {
                SessionEffect::Transmit(frame) => {
                    if self.wire_tx.send(frame).is_err() {
                        warn!("transport channel closed; outbound frame dropped");
                    }
                }
                SessionEffect::Progress(report) => {
                    let _ = self.event_tx.send(DumpEvent::Progress(report));
                }
                SessionEffect::TimedOut(notice) => {
                    let _ = self.event_tx.send(DumpEvent::TimedOut(notice));
                }
                SessionEffect::Completed(records) => {
                    self.on_session_completed(records).await?;
                }
            }
        }
        Ok(())
    }

    async fn on_session_completed(&mut self, records: Vec<PatchRecord>) -> Result<()> {
        // The latch is released at the terminal transition; commit runs to
        // completion under the same exclusive borrow, so a second session
        // cannot start - or commit - in between.
        let import = self.active.take().and_then(|active| active.import);
        let _ = self.event_tx.send(DumpEvent::Completed {
            records: records.clone(),
        });
        match import {
            Some(import) => self.reconcile_and_commit(records, import).await,
            None => Ok(()),
        }
    }

    async fn reconcile_and_commit(
        &mut self,
        records: Vec<PatchRecord>,
        import: ImportRequest,
    ) -> Result<()> {
        let occupancy = match &import.collection {
            Some(name) if !import.policy.new_collection => Some(self.store.occupancy(name).await?),
            Some(_) => Some(CollectionSlotMap::empty()),
            None => None,
        };

        let plan = match self
            .engine
            .plan(records.clone(), occupancy.as_ref(), import.policy)
            .await
        {
            Ok(plan) => plan,
            Err(err) => {
                self.pending_batch = Some(records);
                return Err(err);
            }
        };
        let _ = self.event_tx.send(DumpEvent::PlanReady(plan.clone()));

        let mut attempt = 0;
        loop {
            match self
                .store
                .commit(import.collection.as_deref(), &plan, self.config.dedup)
                .await
            {
                Ok(receipt) => {
                    self.pending_batch = None;
                    let _ = self.event_tx.send(DumpEvent::Committed(receipt));
                    return Ok(());
                }
                Err(err) if attempt < self.config.commit_retries => {
                    attempt += 1;
                    warn!(%err, attempt, "commit failed, retrying");
                }
                Err(err) => {
                    self.pending_batch = Some(records);
                    return Err(err.into());
                }
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

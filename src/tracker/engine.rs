//! Synchronous heart of the tracker: one state machine, one ledger, and the
//! glue that turns transitions into ledger mutations. The async loop in
//! `controller` owns it behind a mutex and never awaits while holding it.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::error::PresenceError;
use crate::events::TrackerEvent;
use crate::ledger::{format_hms, Interval, TimeAccrualLedger};
use crate::presence::{
    AbsenceReason, PresencePolicy, PresenceState, PresenceStateMachine, SignalKind, SignalUpdate,
    SignalValues, Transition,
};
use crate::reconcile::{DailyRecordSubmission, ReconciliationScheduler};
use crate::sensing::SignalReport;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// Side effects the loop performs after a step.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Effects {
    pub events: Vec<TrackerEvent>,
    pub checkpoint: bool,
}

/// Point-in-time view for display.
#[derive(Debug, Clone, serde::Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrackerSnapshot {
    pub state: PresenceState,
    pub accumulated_seconds: u64,
    pub accumulated_display: String,
    pub intervals: Vec<Interval>,
    pub reason: Option<AbsenceReason>,
    pub signals: SignalValues,
    pub next_flush_at: DateTime<Utc>,
}

pub struct TrackerCore {
    machine: PresenceStateMachine,
    ledger: TimeAccrualLedger,
    revision: u64,
    ticks: u32,
    heartbeat_every: u32,
    next_flush_at: DateTime<Utc>,
    notified: HashSet<SignalKind>,
}

impl TrackerCore {
    pub fn new(
        policy: PresencePolicy,
        ledger: TimeAccrualLedger,
        revision: u64,
        heartbeat_every: u32,
        next_flush_at: DateTime<Utc>,
    ) -> Self {
        Self {
            machine: PresenceStateMachine::new(policy),
            ledger,
            revision,
            ticks: 0,
            heartbeat_every: heartbeat_every.max(1),
            next_flush_at,
            notified: HashSet::new(),
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> PresenceState {
        self.machine.state()
    }

    pub fn ledger(&self) -> &TimeAccrualLedger {
        &self.ledger
    }

    pub fn next_flush_at(&self) -> DateTime<Utc> {
        self.next_flush_at
    }

    /// Bumps and returns the checkpoint revision.
    pub fn next_revision(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> TrackerSnapshot {
        let signals = self.machine.signal_values(now);
        let accumulated_seconds = self.ledger.accumulated_seconds();
        TrackerSnapshot {
            state: self.machine.state(),
            accumulated_seconds,
            accumulated_display: format_hms(accumulated_seconds),
            intervals: self.ledger.record().intervals(),
            reason: signals.absence_reason(),
            signals,
            next_flush_at: self.next_flush_at,
        }
    }

    pub fn handle_report(&mut self, report: SignalReport, now: DateTime<Utc>) -> Effects {
        match report {
            SignalReport::Observed(update) => {
                if !matches!(update, SignalUpdate::Unavailable { .. })
                    && self.notified.remove(&update.kind())
                {
                    log_info!("{} sensor recovered", update.kind());
                }
                let transition = self.machine.apply(update, now);
                self.apply_transition(transition)
            }
            SignalReport::Failed { kind, error } if error.is_unavailable() => {
                let transition = self.machine.apply(SignalUpdate::Unavailable { kind }, now);
                let mut effects = self.apply_transition(transition);
                if self.notified.insert(kind) {
                    let notice = PresenceError::SensorUnavailable {
                        signal: kind,
                        reason: error.to_string(),
                    };
                    log_warn!("{notice}");
                    effects.events.push(TrackerEvent::Notice {
                        signal: kind,
                        message: notice.to_string(),
                    });
                }
                effects
            }
            SignalReport::Failed { kind, error } => {
                // transient: keep the last observed value
                log_debug!("{kind} read failed, keeping last value: {error}");
                Effects::default()
            }
        }
    }

    /// One second of wall time: re-evaluate freshness, then accrue if present.
    pub fn accrual_tick(&mut self, now: DateTime<Utc>) -> Effects {
        let transition = self.machine.evaluate(now);
        let mut effects = self.apply_transition(transition);

        if self.machine.state() == PresenceState::Present {
            if let Err(err) = self.ledger.tick() {
                report_invalid(&err);
            }
        }

        self.ticks = self.ticks.wrapping_add(1);
        if self.ticks % self.heartbeat_every == 0 {
            let accumulated_seconds = self.ledger.accumulated_seconds();
            effects.events.push(TrackerEvent::Heartbeat {
                state: self.machine.state(),
                accumulated_seconds,
                display: format_hms(accumulated_seconds),
            });
            effects.checkpoint = true;
        }
        effects
    }

    /// Closes the day at `at` and re-arms for the next day. A person still
    /// present keeps accruing: the new day opens with an entry at `at`.
    pub fn flush(
        &mut self,
        scheduler: &ReconciliationScheduler,
        at: DateTime<Utc>,
    ) -> (DailyRecordSubmission, Effects) {
        let carry_over = self.ledger.has_open_entry();
        let submission = scheduler.fire(&mut self.ledger, at);
        if carry_over {
            if let Err(err) = self.ledger.on_enter(at) {
                report_invalid(&err);
            }
            log_info!("still present at flush; new day opened at {at}");
        }
        self.next_flush_at = scheduler.next_fire_after(at);
        log_info!("next flush armed for {}", self.next_flush_at);

        let effects = Effects {
            events: Vec::new(),
            checkpoint: true,
        };
        (submission, effects)
    }

    fn apply_transition(&mut self, transition: Option<Transition>) -> Effects {
        let Some(transition) = transition else {
            return Effects::default();
        };

        let result = match transition {
            Transition::Entered { at } => self.ledger.on_enter(at),
            Transition::Exited { at } => self.ledger.on_exit(at),
        };
        if let Err(err) = result {
            report_invalid(&err);
        }

        let at = transition.at();
        let state = transition.resulting_state();
        let reason = self.machine.signal_values(at).absence_reason();
        match state {
            PresenceState::Present => log_info!("entered at {at}"),
            PresenceState::Absent => log_info!(
                "exited at {at} ({})",
                reason.map(|r| r.message()).unwrap_or("unknown")
            ),
        }

        Effects {
            events: vec![TrackerEvent::StateChanged {
                state,
                at,
                accumulated_seconds: self.ledger.accumulated_seconds(),
                reason,
            }],
            checkpoint: true,
        }
    }
}

/// Logic defects: loud in debug builds, logged and dropped in release.
fn report_invalid(err: &PresenceError) {
    log_error!("dropped ledger mutation: {err}");
    debug_assert!(false, "ledger invariant violated: {err}");
}

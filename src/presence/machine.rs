//! Presence fusion.
//!
//! The derived state is `Present` iff the geofence reports inside, the
//! identity check has passed, and the beacon was last seen above the RSSI
//! threshold no longer than the staleness window ago. Evaluation is a pure
//! function of the signal board and the evaluation time; it never fails.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::signals::{SignalBoard, SignalUpdate};
use super::state::{AbsenceReason, PresenceState, Transition};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresencePolicy {
    pub rssi_threshold: i16,
    pub staleness: Duration,
}

impl Default for PresencePolicy {
    fn default() -> Self {
        Self {
            rssi_threshold: -70,
            staleness: Duration::seconds(10),
        }
    }
}

/// Effective value of each signal at one evaluation instant.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SignalValues {
    pub geofence: bool,
    pub proximity: bool,
    pub identity: bool,
}

impl SignalValues {
    pub fn all_true(&self) -> bool {
        self.geofence && self.proximity && self.identity
    }

    pub fn absence_reason(&self) -> Option<AbsenceReason> {
        if !self.geofence {
            Some(AbsenceReason::OutsideGeofence)
        } else if !self.proximity {
            Some(AbsenceReason::OutOfBeaconRange)
        } else if !self.identity {
            Some(AbsenceReason::IdentityNotVerified)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct PresenceStateMachine {
    policy: PresencePolicy,
    board: SignalBoard,
    state: PresenceState,
    changed_at: Option<DateTime<Utc>>,
}

impl PresenceStateMachine {
    pub fn new(policy: PresencePolicy) -> Self {
        Self {
            policy,
            board: SignalBoard::default(),
            state: PresenceState::Absent,
            changed_at: None,
        }
    }

    pub fn state(&self) -> PresenceState {
        self.state
    }

    pub fn board(&self) -> &SignalBoard {
        &self.board
    }

    pub fn policy(&self) -> PresencePolicy {
        self.policy
    }

    /// Time of the last transition, if any.
    pub fn changed_at(&self) -> Option<DateTime<Utc>> {
        self.changed_at
    }

    pub fn signal_values(&self, now: DateTime<Utc>) -> SignalValues {
        SignalValues {
            geofence: self.board.geofence,
            proximity: self.proximity_in_range(now),
            identity: self.board.identity,
        }
    }

    /// Records `update` and re-evaluates at `now`.
    pub fn apply(&mut self, update: SignalUpdate, now: DateTime<Utc>) -> Option<Transition> {
        self.board.apply(update);
        self.evaluate(now)
    }

    /// Recomputes the derived state. Returns the transition when it changed;
    /// evaluations that leave the state unchanged return `None`.
    pub fn evaluate(&mut self, now: DateTime<Utc>) -> Option<Transition> {
        let derived = if self.signal_values(now).all_true() {
            PresenceState::Present
        } else {
            PresenceState::Absent
        };

        if derived == self.state {
            return None;
        }

        self.state = derived;
        self.changed_at = Some(now);

        match derived {
            PresenceState::Present => Some(Transition::Entered { at: now }),
            PresenceState::Absent => {
                // a new entry always needs a fresh identity check
                self.board.identity = false;
                Some(Transition::Exited { at: now })
            }
        }
    }

    fn proximity_in_range(&self, now: DateTime<Utc>) -> bool {
        match self.board.proximity {
            Some(reading) => {
                let fresh = now - reading.observed_at <= self.policy.staleness;
                fresh && reading.signal_strength > self.policy.rssi_threshold
            }
            None => false,
        }
    }
}

impl Default for PresenceStateMachine {
    fn default() -> Self {
        Self::new(PresencePolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::signals::{ProximityReading, SignalKind};
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 9, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn beacon(rssi: i16, at: i64) -> SignalUpdate {
        SignalUpdate::Proximity(ProximityReading {
            signal_strength: rssi,
            observed_at: t(at),
        })
    }

    fn present_machine() -> PresenceStateMachine {
        let mut machine = PresenceStateMachine::default();
        machine.apply(SignalUpdate::Geofence { inside: true }, t(0));
        machine.apply(beacon(-60, 0), t(0));
        let transition = machine.apply(SignalUpdate::Identity { verified: true }, t(0));
        assert_eq!(transition, Some(Transition::Entered { at: t(0) }));
        machine
    }

    #[test]
    fn starts_absent() {
        let machine = PresenceStateMachine::default();
        assert_eq!(machine.state(), PresenceState::Absent);
        assert!(machine.changed_at().is_none());
    }

    #[test]
    fn present_only_when_all_three_signals_hold() {
        let mut machine = PresenceStateMachine::default();
        assert_eq!(machine.apply(SignalUpdate::Geofence { inside: true }, t(0)), None);
        assert_eq!(machine.apply(beacon(-60, 0), t(0)), None);
        assert_eq!(machine.state(), PresenceState::Absent);
        assert_eq!(
            machine.apply(SignalUpdate::Identity { verified: true }, t(1)),
            Some(Transition::Entered { at: t(1) })
        );
        assert_eq!(machine.state(), PresenceState::Present);
    }

    #[test]
    fn each_signal_dropping_exits() {
        for kind in SignalKind::ALL {
            let mut machine = present_machine();
            let update = match kind {
                SignalKind::Geofence => SignalUpdate::Geofence { inside: false },
                SignalKind::Proximity => beacon(-80, 1),
                SignalKind::Identity => SignalUpdate::Identity { verified: false },
            };
            assert_eq!(
                machine.apply(update, t(1)),
                Some(Transition::Exited { at: t(1) }),
                "{kind} going false should exit"
            );
        }
    }

    #[test]
    fn rssi_at_threshold_is_not_in_range() {
        let mut machine = PresenceStateMachine::default();
        machine.apply(SignalUpdate::Geofence { inside: true }, t(0));
        machine.apply(SignalUpdate::Identity { verified: true }, t(0));
        assert_eq!(machine.apply(beacon(-70, 0), t(0)), None);
        assert_eq!(machine.apply(beacon(-69, 1), t(1)), Some(Transition::Entered { at: t(1) }));
    }

    #[test]
    fn proximity_goes_stale_after_window() {
        let mut machine = present_machine();
        // exactly at the window the reading still counts
        assert_eq!(machine.evaluate(t(10)), None);
        assert_eq!(machine.evaluate(t(11)), Some(Transition::Exited { at: t(11) }));
        assert!(!machine.signal_values(t(11)).proximity);
    }

    #[test]
    fn repeated_evaluation_is_idempotent() {
        let mut machine = present_machine();
        assert_eq!(machine.evaluate(t(1)), None);
        assert_eq!(machine.apply(SignalUpdate::Geofence { inside: true }, t(2)), None);
        assert_eq!(machine.state(), PresenceState::Present);
    }

    #[test]
    fn exit_resets_identity() {
        let mut machine = present_machine();
        machine.apply(SignalUpdate::Geofence { inside: false }, t(5));
        assert!(!machine.board().identity);

        // back inside with a fresh beacon is not enough without a new check
        machine.apply(SignalUpdate::Geofence { inside: true }, t(6));
        assert_eq!(machine.apply(beacon(-55, 6), t(6)), None);
        assert_eq!(
            machine.apply(SignalUpdate::Identity { verified: true }, t(7)),
            Some(Transition::Entered { at: t(7) })
        );
    }

    #[test]
    fn unavailable_sensor_forces_absent() {
        let mut machine = present_machine();
        let transition = machine.apply(
            SignalUpdate::Unavailable {
                kind: SignalKind::Geofence,
            },
            t(3),
        );
        assert_eq!(transition, Some(Transition::Exited { at: t(3) }));
    }

    #[test]
    fn absence_reason_reports_first_failing_signal() {
        let mut machine = PresenceStateMachine::default();
        assert_eq!(
            machine.signal_values(t(0)).absence_reason(),
            Some(AbsenceReason::OutsideGeofence)
        );
        machine.apply(SignalUpdate::Geofence { inside: true }, t(0));
        assert_eq!(
            machine.signal_values(t(0)).absence_reason(),
            Some(AbsenceReason::OutOfBeaconRange)
        );
        machine.apply(beacon(-50, 0), t(0));
        assert_eq!(
            machine.signal_values(t(0)).absence_reason(),
            Some(AbsenceReason::IdentityNotVerified)
        );
    }
}

//! Detection gate: the fan-in barrier of device detection.
//!
//! A device is detected once every one of its service schemas has been
//! fetched and every embedded device is itself detected. Each device owns a
//! gate counting those outstanding steps. Completing the last step flips the
//! gate to `Completed` and counts as one completed step of the parent gate;
//! any failure flips the gate and all of its ancestors to `Failed`.
//!
//! Gates are pure bookkeeping: they return the transitions they caused and
//! leave event emission to the caller.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

/// Detection state of one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionStatus {
    Pending,
    Completed,
    Failed,
}

/// A state change caused by a gate operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateTransition {
    /// Label of the gate that changed (the device UDN).
    pub label: String,
    pub status: DetectionStatus,
    /// Whether the gate has no parent.
    pub root: bool,
}

#[derive(Debug)]
struct GateState {
    remaining: usize,
    status: DetectionStatus,
}

/// Counter of outstanding detection steps for one device.
#[derive(Debug)]
pub struct DetectionGate {
    label: String,
    state: Mutex<GateState>,
    parent: Option<Arc<DetectionGate>>,
}

impl DetectionGate {
    /// Creates a gate waiting for `remaining` steps.
    pub fn new(
        label: impl Into<String>,
        remaining: usize,
        parent: Option<Arc<DetectionGate>>,
    ) -> Self {
        Self {
            label: label.into(),
            state: Mutex::new(GateState {
                remaining,
                status: DetectionStatus::Pending,
            }),
            parent,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn status(&self) -> DetectionStatus {
        self.state.lock().status
    }

    pub fn remaining(&self) -> usize {
        self.state.lock().remaining
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Completes the gate immediately if it has nothing to wait for.
    ///
    /// Call once per gate after construction, before any step can complete.
    pub fn arm(&self) -> Vec<GateTransition> {
        let completed = {
            let mut state = self.state.lock();
            if state.status == DetectionStatus::Pending && state.remaining == 0 {
                state.status = DetectionStatus::Completed;
                true
            } else {
                false
            }
        };
        if completed {
            self.completed_transitions()
        } else {
            Vec::new()
        }
    }

    /// Records one finished step.
    ///
    /// Ignored once the gate is no longer pending.
    pub fn complete_one(&self) -> Vec<GateTransition> {
        let completed = {
            let mut state = self.state.lock();
            if state.status != DetectionStatus::Pending {
                return Vec::new();
            }
            state.remaining = state.remaining.saturating_sub(1);
            if state.remaining == 0 {
                state.status = DetectionStatus::Completed;
                true
            } else {
                false
            }
        };
        if completed {
            self.completed_transitions()
        } else {
            Vec::new()
        }
    }

    /// Fails this gate and every pending ancestor.
    pub fn fail(&self) -> Vec<GateTransition> {
        let failed = {
            let mut state = self.state.lock();
            if state.status == DetectionStatus::Pending {
                state.status = DetectionStatus::Failed;
                true
            } else {
                false
            }
        };
        if !failed {
            return Vec::new();
        }
        let mut transitions = vec![self.transition(DetectionStatus::Failed)];
        if let Some(parent) = &self.parent {
            transitions.extend(parent.fail());
        }
        transitions
    }

    fn completed_transitions(&self) -> Vec<GateTransition> {
        let mut transitions = vec![self.transition(DetectionStatus::Completed)];
        if let Some(parent) = &self.parent {
            transitions.extend(parent.complete_one());
        }
        transitions
    }

    fn transition(&self, status: DetectionStatus) -> GateTransition {
        GateTransition {
            label: self.label.clone(),
            status,
            root: self.is_root(),
        }
    }
}

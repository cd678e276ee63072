//! Per-invocation machine scope
//!
//! Holds the working copy of the machine record, the cluster identity it
//! belongs to, the reconcile timestamp and the diagnostic events recorded
//! while handling it.

use crds::{ConditionSeverity, HivelocityMachine, RATE_LIMIT_EXCEEDED_CONDITION};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

/// Machine type tag value for control-plane machines
pub const MACHINE_TYPE_CONTROL_PLANE: &str = "control_plane";
/// Machine type tag value for worker machines
pub const MACHINE_TYPE_WORKER: &str = "worker";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

/// A diagnostic event about the machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineEvent {
    pub event_type: EventType,
    pub reason: String,
    pub message: String,
}

#[derive(Debug)]
pub struct MachineScope {
    pub machine: HivelocityMachine,
    pub cluster_name: String,
    /// Time of this reconciliation; handlers never read the clock themselves
    pub now: DateTime<Utc>,
    events: Vec<MachineEvent>,
}

impl MachineScope {
    pub fn new(machine: HivelocityMachine, cluster_name: String, now: DateTime<Utc>) -> Self {
        Self {
            machine,
            cluster_name,
            now,
            events: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        self.machine.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.machine.metadata.namespace.as_deref().unwrap_or_default()
    }

    /// `control_plane` or `worker`
    pub fn machine_type(&self) -> &'static str {
        if self.machine.is_control_plane() {
            MACHINE_TYPE_CONTROL_PLANE
        } else {
            MACHINE_TYPE_WORKER
        }
    }

    pub fn events(&self) -> &[MachineEvent] {
        &self.events
    }

    pub fn into_parts(self) -> (HivelocityMachine, Vec<MachineEvent>) {
        (self.machine, self.events)
    }

    pub fn record_event(&mut self, reason: &str, message: impl Into<String>) {
        let message = message.into();
        info!(machine = %self.name(), namespace = %self.namespace(), reason, "{}", message);
        self.events.push(MachineEvent {
            event_type: EventType::Normal,
            reason: reason.to_string(),
            message,
        });
    }

    pub fn record_warning(&mut self, reason: &str, message: impl Into<String>) {
        let message = message.into();
        warn!(machine = %self.name(), namespace = %self.namespace(), reason, "{}", message);
        self.events.push(MachineEvent {
            event_type: EventType::Warning,
            reason: reason.to_string(),
            message,
        });
    }

    pub fn mark_true(&mut self, condition: &str) {
        let now = self.now;
        self.machine.mark_true(condition, now);
    }

    pub fn mark_false(
        &mut self,
        condition: &str,
        reason: &str,
        severity: ConditionSeverity,
        message: impl Into<String>,
    ) {
        let now = self.now;
        self.machine.mark_false(condition, reason, severity, message, now);
    }

    /// Record that a remote call was rate limited
    pub fn mark_rate_limited(&mut self, operation: &str) {
        self.mark_true(RATE_LIMIT_EXCEEDED_CONDITION);
        self.record_warning(
            "RateLimitExceeded",
            format!("exceeded rate limit with calling Hivelocity function {operation}"),
        );
    }
}

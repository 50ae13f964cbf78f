// ============================================================================
// Actors Module
// ============================================================================
//
// Runtime supervision of the topology.
//
// Structure:
// - coordinator    - starts and stops every worker of the topology
// - alarm_monitor  - periodic gauge sampling and alarm evaluation
// - dlq_inspector  - dead-letter listing, stats and redrive
//
// Note: Routing itself (topics, bus, queues) is plain async code shared
//       through Arc. Actors are reserved for the periodic workers.
//
// ============================================================================

mod alarm_monitor;
mod coordinator;
mod dlq_inspector;

pub use coordinator::{GetAlarmMonitor, GetDlqInspector, Shutdown, TopologyCoordinator};

pub use alarm_monitor::{AlarmMonitorActor, EvaluateAlarms, GetAlarmStates, StopActor};
pub use dlq_inspector::{DeadLetterBinding, DlqInspectorActor, GetDlqMessages, GetDlqStats, RedriveDlq};

//! Upgrade event payloads.
//!
//! Events arrive as rows of the node's event log:
//!
//! ```text
//! NODE       ID        EVENT                                   ACTOR     SOURCE        MESSAGE
//! 10.0.0.2   cr4b..t0  talos/runtime/machine.SequenceEvent     cr4b..sg  upgrade       START
//! 10.0.0.2   cr4b..u0  talos/runtime/machine.MachineStatusEvent          upgrading     ready: false, ..
//! ```
//!
//! Rows are decoded at the subscription boundary into a closed set of
//! shapes; anything else becomes [`EventPayload::Unknown`] and is dropped by
//! the consumer rather than treated as an error. The actor column is often
//! empty, so fields are located from the event type and the end of the row.

use std::fmt;

use noderoll_core::UpgradeProgress;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    Stop,
}

impl Action {
    fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some(s) if s.eq_ignore_ascii_case("stop") => Action::Stop,
            _ => Action::Start,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Start => f.write_str("START"),
            Action::Stop => f.write_str("STOP"),
        }
    }
}

/// Coarse machine lifecycle stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineStage {
    Unknown,
    Booting,
    Installing,
    Maintenance,
    Running,
    Rebooting,
    ShuttingDown,
    Resetting,
    Upgrading,
}

impl MachineStage {
    pub fn parse(raw: &str) -> Self {
        let normalized: String = raw
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "booting" => MachineStage::Booting,
            "installing" => MachineStage::Installing,
            "maintenance" => MachineStage::Maintenance,
            "running" => MachineStage::Running,
            "rebooting" => MachineStage::Rebooting,
            "shuttingdown" => MachineStage::ShuttingDown,
            "resetting" => MachineStage::Resetting,
            "upgrading" => MachineStage::Upgrading,
            _ => MachineStage::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MachineStage::Unknown => "unknown",
            MachineStage::Booting => "booting",
            MachineStage::Installing => "installing",
            MachineStage::Maintenance => "maintenance",
            MachineStage::Running => "running",
            MachineStage::Rebooting => "rebooting",
            MachineStage::ShuttingDown => "shutting_down",
            MachineStage::Resetting => "resetting",
            MachineStage::Upgrading => "upgrading",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    Sequence {
        sequence: String,
        action: Action,
        error: Option<String>,
    },
    Phase {
        phase: String,
        action: Action,
    },
    Task {
        task: String,
        action: Action,
    },
    MachineStatus {
        stage: MachineStage,
    },
    Unknown {
        kind: String,
    },
}

impl EventPayload {
    pub fn sequence(sequence: &str, action: Action) -> Self {
        EventPayload::Sequence {
            sequence: sequence.to_string(),
            action,
            error: None,
        }
    }

    pub fn failed_sequence(sequence: &str, error: &str) -> Self {
        EventPayload::Sequence {
            sequence: sequence.to_string(),
            action: Action::Stop,
            error: Some(error.to_string()),
        }
    }

    pub fn phase(phase: &str, action: Action) -> Self {
        EventPayload::Phase {
            phase: phase.to_string(),
            action,
        }
    }

    pub fn task(task: &str, action: Action) -> Self {
        EventPayload::Task {
            task: task.to_string(),
            action,
        }
    }

    pub fn stage(stage: MachineStage) -> Self {
        EventPayload::MachineStatus { stage }
    }

    pub fn is_running(&self) -> bool {
        matches!(
            self,
            EventPayload::MachineStatus {
                stage: MachineStage::Running
            }
        )
    }

    /// Progress record for this event. `None` for unknown shapes.
    pub fn to_progress(&self) -> Option<UpgradeProgress> {
        let progress = match self {
            EventPayload::Sequence {
                sequence,
                action,
                error,
            } => UpgradeProgress {
                phase: Some(sequence.clone()),
                action: Some(action.to_string()),
                error: error.clone(),
                ..Default::default()
            },
            EventPayload::Phase { phase, action } => UpgradeProgress {
                phase: Some(phase.clone()),
                action: Some(action.to_string()),
                ..Default::default()
            },
            EventPayload::Task { task, action } => UpgradeProgress {
                task: Some(task.clone()),
                action: Some(action.to_string()),
                ..Default::default()
            },
            EventPayload::MachineStatus { stage } => UpgradeProgress {
                stage: Some(stage.as_str().to_string()),
                done: *stage == MachineStage::Running,
                ..Default::default()
            },
            EventPayload::Unknown { .. } => return None,
        };
        Some(progress)
    }

    /// Decode one row of event output. Blank lines and the header yield
    /// `None`.
    pub fn parse_line(line: &str) -> Option<Self> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let type_at = tokens.iter().position(|t| t.contains("machine.") || t.ends_with("Event"))?;
        let kind = tokens[type_at].rsplit('.').next().unwrap_or(tokens[type_at]);
        let rest = &tokens[type_at + 1..];

        let payload = match kind {
            "SequenceEvent" => {
                if let Some(err_at) = rest.iter().position(|t| *t == "error:") {
                    let sequence = err_at.checked_sub(1).map(|i| rest[i]).unwrap_or_default();
                    let error = line
                        .split_once(" error: ")
                        .map(|(_, msg)| msg.trim())
                        .filter(|msg| !msg.is_empty())
                        .map(str::to_string);
                    EventPayload::Sequence {
                        sequence: sequence.to_string(),
                        action: Action::Stop,
                        error,
                    }
                } else {
                    let (name, action) = name_and_action(rest)?;
                    EventPayload::sequence(name, action)
                }
            }
            "PhaseEvent" => {
                let (name, action) = name_and_action(rest)?;
                EventPayload::phase(name, action)
            }
            "TaskEvent" => {
                let (name, action) = name_and_action(rest)?;
                EventPayload::task(name, action)
            }
            "MachineStatusEvent" => {
                let stage = match rest.iter().position(|t| *t == "ready:") {
                    Some(at) => at.checked_sub(1).map(|i| rest[i]),
                    None => rest.last().copied(),
                }?;
                EventPayload::stage(MachineStage::parse(stage))
            }
            other => EventPayload::Unknown {
                kind: other.to_string(),
            },
        };
        Some(payload)
    }
}

/// The last two columns of sequence, phase and task rows.
fn name_and_action<'a>(rest: &[&'a str]) -> Option<(&'a str, Action)> {
    match rest {
        [.., name, action] => Some((*name, Action::parse(Some(*action)))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Output captured from a node during a failed upgrade.
    const FAILED_UPGRADE: &str = "\
NODE       ID                     EVENT                                      ACTOR                  SOURCE             MESSAGE
10.0.0.2   cr4b0h2u1pns73dmd7t0   talos/runtime/machine.MachineStatusEvent                          upgrading          ready: false, unmet conditions: [nodeReady]
10.0.0.2   cr4b0h2u1pns73dmd7t1   talos/runtime/machine.SequenceEvent        cr4b0h2u1pns73dmd7sg   upgrade            START
10.0.0.2   cr4b0h2u1pns73dmd7t2   talos/runtime/machine.PhaseEvent           cr4b0h2u1pns73dmd7sg   stopServices       START
10.0.0.2   cr4b0h2u1pns73dmd7t3   talos/runtime/machine.TaskEvent            cr4b0h2u1pns73dmd7sg   stopAllServices    STOP
10.0.0.2   cr4b0h2u1pns73dmd7t4   talos/runtime/machine.ServiceStateEvent    cr4b0h2u1pns73dmd7sg   kubelet            Stopping: Service is stopping
10.0.0.2   cr4b0h2u1pns73dmd7t5   talos/runtime/machine.SequenceEvent        cr4b0h2u1pns73dmd7sg   upgrade            error: failed to pull image: not found
";

    #[test]
    fn decode_failed_upgrade_log() {
        let events: Vec<EventPayload> = FAILED_UPGRADE.lines().filter_map(EventPayload::parse_line).collect();
        assert_eq!(
            events,
            vec![
                EventPayload::stage(MachineStage::Upgrading),
                EventPayload::sequence("upgrade", Action::Start),
                EventPayload::phase("stopServices", Action::Start),
                EventPayload::task("stopAllServices", Action::Stop),
                EventPayload::Unknown {
                    kind: "ServiceStateEvent".into()
                },
                EventPayload::failed_sequence("upgrade", "failed to pull image: not found"),
            ]
        );

        let progress = events[5].to_progress().unwrap();
        assert_eq!(progress.phase.as_deref(), Some("upgrade"));
        assert_eq!(progress.action.as_deref(), Some("STOP"));
        assert_eq!(progress.error.as_deref(), Some("failed to pull image: not found"));
        assert!(!progress.done);
        assert!(events[4].to_progress().is_none());
    }

    #[test]
    fn decode_running_without_actor() {
        let line = "10.0.0.2   cr4b0h2u1pns73dmd7t9   talos/runtime/machine.MachineStatusEvent   running   ready: true, unmet conditions: []";
        let ev = EventPayload::parse_line(line).unwrap();
        assert!(ev.is_running());
        let progress = ev.to_progress().unwrap();
        assert_eq!(progress.stage.as_deref(), Some("running"));
        assert!(progress.done);
    }

    #[test]
    fn header_and_blank_lines_are_skipped() {
        assert_eq!(EventPayload::parse_line("NODE   ID   EVENT   ACTOR   SOURCE   MESSAGE"), None);
        assert_eq!(EventPayload::parse_line("   "), None);
    }

    #[test]
    fn stage_parsing_is_lenient() {
        assert_eq!(MachineStage::parse("SHUTTING_DOWN"), MachineStage::ShuttingDown);
        assert_eq!(MachineStage::parse("shuttingDown"), MachineStage::ShuttingDown);
        assert_eq!(MachineStage::parse("Upgrading"), MachineStage::Upgrading);
        assert_eq!(MachineStage::parse("bogus"), MachineStage::Unknown);
    }
}

use crate::drift::DriftVerdict;
use crate::error::ReplicaError;
use crate::protocol::*;
use crate::registry::RegistryState;
use crate::serialization::Snapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Host,
    Follower,
}

impl Role {
    pub fn from_host_flag(is_host: bool) -> Self {
        if is_host {
            Role::Host
        } else {
            Role::Follower
        }
    }
}

/// Outcome of merging one inbound snapshot.
#[derive(Debug)]
pub struct MergeReport {
    pub sender: EntityId,
    pub sequence: u64,
    pub role: Role,
    /// Change-set entries written into the local registry.
    pub applied: Vec<FieldKey>,
    /// Change-set entries skipped by precedence (echoes, informational fields).
    pub ignored: Vec<FieldKey>,
    /// Fields overwritten after drifting past their tolerance.
    pub repaired: Vec<FieldKey>,
    /// Protocol anomalies that were logged and dropped.
    pub rejected: Vec<(FieldKey, ReplicaError)>,
}

impl MergeReport {
    pub fn new(sender: EntityId, sequence: u64, role: Role) -> Self {
        Self {
            sender,
            sequence,
            role,
            applied: Vec::new(),
            ignored: Vec::new(),
            repaired: Vec::new(),
            rejected: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }

    pub fn touched(&self) -> usize {
        self.applied.len() + self.repaired.len()
    }

    fn reject(&mut self, key: FieldKey, error: ReplicaError) {
        log::warn!(
            "dropping {} from entity {} (snapshot {}): {}",
            key,
            self.sender,
            self.sequence,
            error
        );
        self.rejected.push((key, error));
    }
}

pub(crate) fn merge(state: &mut RegistryState, remote: &Snapshot, role: Role) -> MergeReport {
    let mut report = MergeReport::new(remote.sender(), remote.sequence(), role);

    match role {
        Role::Host => merge_as_host(state, remote, &mut report),
        Role::Follower => {
            apply_host_changes(state, remote, &mut report);
            sweep_for_drift(state, remote, &mut report);
        }
    }

    report
}

fn changed_value<'a>(
    remote: &'a Snapshot,
    key: &FieldKey,
    report: &mut MergeReport,
) -> Option<&'a WireValue> {
    let value = remote.field(key);
    if value.is_none() {
        report.reject(
            key.clone(),
            ReplicaError::Deserialization(format!("change set entry {} missing from field map", key)),
        );
    }
    value
}

/// Accepts client-owned writes and re-marks them dirty so they fan out to other peers.
fn merge_as_host(state: &mut RegistryState, remote: &Snapshot, report: &mut MergeReport) {
    for key in remote.change_set() {
        let Some(value) = changed_value(remote, key, report) else {
            continue;
        };

        let Some(field) = state.fields.get_mut(key) else {
            report.reject(key.clone(), ReplicaError::UnknownRemoteField(key.clone()));
            continue;
        };

        match field.meta().precedence() {
            Precedence::Host => {
                report.reject(
                    key.clone(),
                    ReplicaError::UnauthorizedWrite {
                        sender: remote.sender(),
                        field: key.clone(),
                    },
                );
            }
            Precedence::Client => match field.authoritative_change_wire(value) {
                Ok(()) => {
                    if field.meta_mut().take_dirty() {
                        state.change_set.insert(key.clone());
                    }
                    log::trace!("accepted {} from entity {}", key, remote.sender());
                    report.applied.push(key.clone());
                }
                Err(error) => report.reject(key.clone(), error),
            },
            Precedence::Informational => report.ignored.push(key.clone()),
        }
    }
}

/// Follower pass one: host pushes are applied, echoes of our own writes are not.
fn apply_host_changes(state: &mut RegistryState, remote: &Snapshot, report: &mut MergeReport) {
    for key in remote.change_set() {
        let Some(value) = changed_value(remote, key, report) else {
            continue;
        };

        let Some(field) = state.fields.get_mut(key) else {
            report.reject(key.clone(), ReplicaError::UnknownRemoteField(key.clone()));
            continue;
        };

        match field.meta().precedence() {
            Precedence::Host => match field.local_set_wire(value) {
                Ok(()) => report.applied.push(key.clone()),
                Err(error) => report.reject(key.clone(), error),
            },
            Precedence::Client | Precedence::Informational => {
                log::trace!("ignoring echo of {}", key);
                report.ignored.push(key.clone());
            }
        }
    }
}

/// Follower pass two: compares every shared field and overrides any that drifted too long.
fn sweep_for_drift(state: &mut RegistryState, remote: &Snapshot, report: &mut MergeReport) {
    for (key, value) in remote.iter_fields() {
        let Some(field) = state.fields.get_mut(&key) else {
            continue;
        };

        let distance = match field.distance_to_wire(value) {
            Ok(distance) => distance,
            Err(error) => {
                report.reject(key, error);
                continue;
            }
        };

        match field.meta_mut().drift_mut().observe(distance) {
            DriftVerdict::InSync => {}
            DriftVerdict::Drifting(frames) => {
                log::trace!(
                    "{} out of sync for {} frames (distance {})",
                    key,
                    frames,
                    distance
                );
            }
            DriftVerdict::Repair => match field.local_set_wire(value) {
                Ok(()) => {
                    log::debug!(
                        "{} exceeded drift tolerance {}, adopted entity {}'s value",
                        key,
                        field.meta().tolerance(),
                        remote.sender()
                    );
                    report.repaired.push(key);
                }
                Err(error) => report.reject(key, error),
            },
        }
    }
}

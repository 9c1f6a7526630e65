use crate::debug;
use crate::error::{ReplicaError, Result};
use crate::grid::{Grid, GridEdit, ReplicatedGrid};
use crate::list::{ListEdit, ReplicatedList};
use crate::liveness::LivenessTable;
use crate::protocol::*;
use crate::reconcile::{self, MergeReport, Role};
use crate::serialization::{FieldMap, Snapshot};
use crate::value::{ReplicatedField, ReplicatedValue};
use ahash::{AHashMap, AHashSet};
use parking_lot::Mutex;
use std::fmt::{self, Write as _};
use std::marker::PhantomData;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub local_entity: EntityId,
    /// Reserved id for session-wide fields; never tracked for liveness.
    pub session_entity: Option<EntityId>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            local_entity: 0,
            session_entity: None,
        }
    }
}

impl RegistryConfig {
    pub fn new(local_entity: EntityId) -> Self {
        Self {
            local_entity,
            ..Self::default()
        }
    }

    pub fn with_session_entity(mut self, entity: EntityId) -> Self {
        self.session_entity = Some(entity);
        self
    }

    fn is_remote(&self, entity: EntityId) -> bool {
        entity != self.local_entity && Some(entity) != self.session_entity
    }
}

/// Insertion-ordered set of dirty fields.
#[derive(Debug, Default)]
pub(crate) struct ChangeSet {
    order: Vec<FieldKey>,
    members: AHashSet<FieldKey>,
}

impl ChangeSet {
    pub(crate) fn insert(&mut self, key: FieldKey) -> bool {
        if self.members.insert(key.clone()) {
            self.order.push(key);
            true
        } else {
            false
        }
    }

    pub(crate) fn contains(&self, key: &FieldKey) -> bool {
        self.members.contains(key)
    }

    pub(crate) fn remove_entity(&mut self, entity: EntityId) {
        self.order.retain(|key| key.entity != entity);
        self.members.retain(|key| key.entity != entity);
    }

    pub(crate) fn keys(&self) -> &[FieldKey] {
        &self.order
    }

    pub(crate) fn drain(&mut self) -> Vec<FieldKey> {
        self.members.clear();
        std::mem::take(&mut self.order)
    }

    pub(crate) fn clear(&mut self) {
        self.order.clear();
        self.members.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }
}

pub(crate) struct RegistryState {
    pub(crate) config: RegistryConfig,
    pub(crate) fields: AHashMap<FieldKey, Box<dyn ReplicatedField>>,
    pub(crate) change_set: ChangeSet,
    pub(crate) liveness: LivenessTable,
    sequence: u64,
}

impl RegistryState {
    fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            fields: AHashMap::new(),
            change_set: ChangeSet::default(),
            liveness: LivenessTable::new(),
            sequence: 0,
        }
    }

    fn owns_entity(&self, entity: EntityId) -> bool {
        self.fields.keys().any(|key| key.entity == entity)
    }

    fn with_field<F, R>(&mut self, key: &FieldKey, op: impl FnOnce(&mut F) -> Result<R>) -> Result<R>
    where
        F: ReplicatedField,
    {
        let field = self
            .fields
            .get_mut(key)
            .ok_or_else(|| ReplicaError::NotRegistered(key.to_string()))?;

        let typed = field.as_any_mut().downcast_mut::<F>().ok_or_else(|| {
            ReplicaError::type_mismatch(std::any::type_name::<F>(), format!("field {}", key))
        })?;

        let result = op(typed);

        if field.meta_mut().take_dirty() {
            self.change_set.insert(key.clone());
        }

        result
    }

    fn inspect_field<F, R>(&self, key: &FieldKey, op: impl FnOnce(&F) -> R) -> Result<R>
    where
        F: ReplicatedField,
    {
        let field = self
            .fields
            .get(key)
            .ok_or_else(|| ReplicaError::NotRegistered(key.to_string()))?;

        field
            .as_any()
            .downcast_ref::<F>()
            .map(op)
            .ok_or_else(|| {
                ReplicaError::type_mismatch(std::any::type_name::<F>(), format!("field {}", key))
            })
    }
}

/// Session-scoped store of replicated fields.
///
/// Cloning a `Registry` yields another handle to the same state; every
/// operation runs under one lock shared by all clones.
#[derive(Clone)]
pub struct Registry {
    state: Arc<Mutex<RegistryState>>,
}

impl Registry {
    /// Create an empty registry for one session
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(RegistryState::new(config))),
        }
    }

    /// Entity id this registry speaks for
    pub fn local_entity(&self) -> EntityId {
        self.state.lock().config.local_entity
    }

    /// Copy of the current configuration
    pub fn config(&self) -> RegistryConfig {
        self.state.lock().config.clone()
    }

    /// Attach `field` under `(entity, name)` and return a typed handle to it.
    ///
    /// Fails with `DuplicateField` if the key is taken. Remote entities start
    /// being tracked for liveness.
    pub fn register<F: ReplicatedField>(
        &self,
        entity: EntityId,
        name: impl Into<FieldName>,
        mut field: F,
    ) -> Result<FieldHandle<F>> {
        let key = FieldKey::new(entity, name);
        let mut state = self.state.lock();

        if state.fields.contains_key(&key) {
            return Err(ReplicaError::DuplicateField(key));
        }

        field.meta_mut().bind(key.clone());
        log::debug!("registered {} as {}", key, field.meta().precedence());

        if state.config.is_remote(entity) {
            state.liveness.track(entity);
        }
        state.fields.insert(key.clone(), Box::new(field));

        Ok(FieldHandle::new(self.state.clone(), key))
    }

    /// Removes every field of `entity`, its pending changes and its liveness entry.
    pub fn deregister_entity(&self, entity: EntityId) -> usize {
        let mut state = self.state.lock();

        let before = state.fields.len();
        state.fields.retain(|key, _| key.entity != entity);
        let removed = before - state.fields.len();

        state.change_set.remove_entity(entity);
        let was_tracked = state.liveness.remove(entity);

        if removed == 0 && !was_tracked {
            log::debug!("deregister of unknown entity {} ignored", entity);
        } else {
            log::debug!("deregistered entity {} ({} fields)", entity, removed);
        }

        removed
    }

    /// Add `key` to the change set; repeated calls keep a single entry
    pub fn mark_dirty(&self, key: &FieldKey) -> Result<()> {
        let mut state = self.state.lock();
        if !state.fields.contains_key(key) {
            return Err(ReplicaError::NotRegistered(key.to_string()));
        }
        state.change_set.insert(key.clone());
        Ok(())
    }

    /// Check whether `key` is waiting in the change set
    pub fn is_dirty(&self, key: &FieldKey) -> bool {
        self.state.lock().change_set.contains(key)
    }

    /// Change set contents in insertion order
    pub fn pending_changes(&self) -> Vec<FieldKey> {
        self.state.lock().change_set.keys().to_vec()
    }

    /// Copies every field and flushes the change set into an owned snapshot.
    pub fn snapshot_for_send(&self) -> Snapshot {
        let snapshot = {
            let mut state = self.state.lock();

            let mut fields = FieldMap::new();
            for (key, field) in &state.fields {
                fields
                    .entry(key.entity)
                    .or_default()
                    .insert(key.name.clone(), field.to_wire());
            }

            state.sequence += 1;
            let change_set = state.change_set.drain();
            Snapshot::from_parts(state.config.local_entity, state.sequence, fields, change_set)
        };

        debug::log_snapshot("outbound", &snapshot);
        snapshot
    }

    /// Advance every tracked entity's missed-packet counter by one period
    pub fn tick(&self) {
        self.state.lock().liveness.tick();
    }

    /// Merge a peer snapshot and reset the sender's liveness counter.
    ///
    /// Protocol anomalies are logged and returned in the report, never as errors.
    pub fn on_receive(&self, remote: &Snapshot, is_host: bool) -> MergeReport {
        let role = Role::from_host_flag(is_host);
        let sender = remote.sender();

        let report = {
            let mut state = self.state.lock();

            if sender == state.config.local_entity {
                log::debug!("ignoring snapshot {} from local entity {}", remote.sequence(), sender);
                return MergeReport::new(sender, remote.sequence(), role);
            }

            let report = reconcile::merge(&mut state, remote, role);

            if !state.liveness.heard_from(sender)
                && state.config.is_remote(sender)
                && state.owns_entity(sender)
            {
                state.liveness.track(sender);
            }

            report
        };

        debug::log_snapshot("inbound", remote);
        debug::trace_merge(&report);
        report
    }

    /// Entities whose missed-packet count exceeds `threshold_frames`, sorted
    pub fn disconnected_ids(&self, threshold_frames: u32) -> Vec<EntityId> {
        self.state.lock().liveness.exceeding(threshold_frames)
    }

    /// Lower an entity's missed-packet count by `grace_frames`, stopping at zero
    pub fn wait_for_reconnect(&self, entity: EntityId, grace_frames: u32) -> Result<()> {
        let remaining = self.state.lock().liveness.extend_grace(entity, grace_frames)?;
        log::debug!(
            "extended grace for entity {} by {} frames ({} missed)",
            entity,
            grace_frames,
            remaining
        );
        Ok(())
    }

    /// Current missed-packet count, if the entity is tracked
    pub fn missed_packets(&self, entity: EntityId) -> Option<u32> {
        self.state.lock().liveness.missed(entity)
    }

    /// Wire form of a field's current value
    pub fn get(&self, entity: EntityId, name: &str) -> Option<WireValue> {
        let key = FieldKey::new(entity, name);
        self.state.lock().fields.get(&key).map(|field| field.to_wire())
    }

    /// Check whether a field is registered
    pub fn contains(&self, entity: EntityId, name: &str) -> bool {
        self.state.lock().fields.contains_key(&FieldKey::new(entity, name))
    }

    /// Typed handle to an already registered field, if its type matches `F`.
    pub fn handle<F: ReplicatedField>(&self, entity: EntityId, name: &str) -> Option<FieldHandle<F>> {
        let key = FieldKey::new(entity, name);
        let matches = self
            .state
            .lock()
            .fields
            .get(&key)
            .map(|field| field.as_any().is::<F>())
            .unwrap_or(false);

        matches.then(|| FieldHandle::new(self.state.clone(), key))
    }

    /// Precedence of a registered field
    pub fn precedence(&self, key: &FieldKey) -> Option<Precedence> {
        self.state
            .lock()
            .fields
            .get(key)
            .map(|field| field.meta().precedence())
    }

    /// Explicit role change, e.g. when a field starts being viewed by a remote observer.
    pub fn reassign_precedence(&self, key: &FieldKey, precedence: Precedence) -> Result<()> {
        let mut state = self.state.lock();
        let field = state
            .fields
            .get_mut(key)
            .ok_or_else(|| ReplicaError::NotRegistered(key.to_string()))?;

        let previous = field.meta().precedence();
        field.meta_mut().set_precedence(precedence);
        field.meta_mut().drift_mut().reset();
        log::debug!("reassigned {} from {} to {}", key, previous, precedence);
        Ok(())
    }

    /// Consecutive mismatching merges seen for a field
    pub fn frames_out_of_sync(&self, key: &FieldKey) -> Option<u32> {
        self.state
            .lock()
            .fields
            .get(key)
            .map(|field| field.meta().frames_out_of_sync())
    }

    /// Number of registered fields
    pub fn field_count(&self) -> usize {
        self.state.lock().fields.len()
    }

    /// Distinct entity ids owning at least one field, sorted
    pub fn entities(&self) -> Vec<EntityId> {
        let state = self.state.lock();
        let mut ids: Vec<EntityId> = state.fields.keys().map(|key| key.entity).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Tears the session down; outstanding handles report `NotRegistered`.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        for field in state.fields.values_mut() {
            field.meta_mut().unbind();
        }
        state.fields.clear();
        state.change_set.clear();
        state.liveness.clear();
    }

    /// Human-readable listing of every field, sorted by key, with drift and liveness
    pub fn dump(&self) -> String {
        let state = self.state.lock();
        let mut out = String::new();

        let _ = writeln!(
            out,
            "registry local={} fields={} dirty={} remotes={} seq={}",
            state.config.local_entity,
            state.fields.len(),
            state.change_set.len(),
            state.liveness.len(),
            state.sequence
        );

        let mut keys: Vec<&FieldKey> = state.fields.keys().collect();
        keys.sort();

        for key in keys {
            let field = &state.fields[key];
            let meta = field.meta();
            let marker = if state.change_set.contains(key) { " *" } else { "" };
            let _ = writeln!(
                out,
                "  {} [{}] drift {}/{}{} = {:?}",
                key,
                meta.precedence(),
                meta.frames_out_of_sync(),
                meta.tolerance(),
                marker,
                field.to_wire()
            );
        }

        let mut remotes: Vec<(EntityId, u32)> = state
            .entities_with_liveness()
            .collect();
        remotes.sort_unstable();
        for (entity, missed) in remotes {
            let _ = writeln!(out, "  entity {} missed {} frames", entity, missed);
        }

        out
    }
}

impl RegistryState {
    fn entities_with_liveness(&self) -> impl Iterator<Item = (EntityId, u32)> + '_ {
        let mut ids: Vec<EntityId> = self.fields.keys().map(|key| key.entity).collect();
        ids.sort_unstable();
        ids.dedup();
        ids.into_iter()
            .filter_map(move |entity| self.liveness.missed(entity).map(|missed| (entity, missed)))
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Registry")
            .field("local_entity", &state.config.local_entity)
            .field("fields", &state.fields.len())
            .field("pending_changes", &state.change_set.len())
            .field("tracked_remotes", &state.liveness.len())
            .finish()
    }
}

/// Typed access to one registered field.
pub struct FieldHandle<F> {
    state: Arc<Mutex<RegistryState>>,
    key: FieldKey,
    _field: PhantomData<fn() -> F>,
}

impl<F> Clone for FieldHandle<F> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            key: self.key.clone(),
            _field: PhantomData,
        }
    }
}

impl<F> fmt::Debug for FieldHandle<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldHandle").field("key", &self.key).finish()
    }
}

impl<F: ReplicatedField> FieldHandle<F> {
    fn new(state: Arc<Mutex<RegistryState>>, key: FieldKey) -> Self {
        Self {
            state,
            key,
            _field: PhantomData,
        }
    }

    pub fn key(&self) -> &FieldKey {
        &self.key
    }

    pub fn is_registered(&self) -> bool {
        self.state.lock().fields.contains_key(&self.key)
    }

    /// Runs `op` on the field under the registry lock; authoritative changes made
    /// inside are added to the change set.
    pub fn with<R>(&self, op: impl FnOnce(&mut F) -> Result<R>) -> Result<R> {
        self.state.lock().with_field(&self.key, op)
    }

    pub fn inspect<R>(&self, op: impl FnOnce(&F) -> R) -> Result<R> {
        self.state.lock().inspect_field(&self.key, op)
    }

    pub fn mark_dirty(&self) -> Result<()> {
        let mut state = self.state.lock();
        if !state.fields.contains_key(&self.key) {
            return Err(ReplicaError::NotRegistered(self.key.to_string()));
        }
        state.change_set.insert(self.key.clone());
        Ok(())
    }

    pub fn precedence(&self) -> Result<Precedence> {
        self.inspect(|field| field.meta().precedence())
    }

    pub fn frames_out_of_sync(&self) -> Result<u32> {
        self.inspect(|field| field.meta().frames_out_of_sync())
    }
}

impl<T: Replicable> FieldHandle<ReplicatedValue<T>> {
    pub fn read(&self) -> Result<T> {
        self.inspect(|field| field.read())
    }

    pub fn local_set(&self, value: T) -> Result<()> {
        self.with(|field| field.local_set(value))
    }

    pub fn authoritative_change(&self, value: T) -> Result<()> {
        self.with(|field| field.authoritative_change(value))
    }
}

impl<T: Replicable> FieldHandle<ReplicatedList<T>> {
    pub fn read(&self) -> Result<Vec<T>> {
        self.inspect(|field| field.read())
    }

    pub fn local_set(&self, items: Vec<T>) -> Result<()> {
        self.with(|field| field.local_set(items))
    }

    pub fn authoritative_change(&self, items: Vec<T>) -> Result<()> {
        self.with(|field| field.authoritative_change(items))
    }

    pub fn local_edit(&self, edit: ListEdit<T>) -> Result<()> {
        self.with(|field| field.local_edit(edit))
    }

    pub fn authoritative_edit(&self, edit: ListEdit<T>) -> Result<()> {
        self.with(|field| field.authoritative_edit(edit))
    }
}

impl<T: Replicable> FieldHandle<ReplicatedGrid<T>> {
    pub fn read(&self) -> Result<Grid<T>> {
        self.inspect(|field| field.read())
    }

    pub fn local_set(&self, grid: Grid<T>) -> Result<()> {
        self.with(|field| field.local_set(grid))
    }

    pub fn authoritative_change(&self, grid: Grid<T>) -> Result<()> {
        self.with(|field| field.authoritative_change(grid))
    }

    pub fn local_edit(&self, edit: GridEdit<T>) -> Result<()> {
        self.with(|field| field.local_edit(edit))
    }

    pub fn authoritative_edit(&self, edit: GridEdit<T>) -> Result<()> {
        self.with(|field| field.authoritative_edit(edit))
    }
}

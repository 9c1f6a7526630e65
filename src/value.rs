use crate::drift::{DriftCounter, DEFAULT_TOLERANCE};
use crate::error::{ReplicaError, Result};
use crate::protocol::*;
use std::any::Any;
use std::fmt;

/// Invoked with the field's new value, the operation kind and the affected coordinates.
///
/// Callbacks run while the owning registry is locked and must not call back into it.
pub type ApplyCallback<V> = Box<dyn FnMut(&V, Operation, Coordinates) + Send>;

#[derive(Debug, Clone)]
pub struct FieldMeta {
    key: Option<FieldKey>,
    precedence: Precedence,
    drift: DriftCounter,
    dirty: bool,
}

impl FieldMeta {
    pub(crate) fn new(precedence: Precedence) -> Self {
        Self {
            key: None,
            precedence,
            drift: DriftCounter::new(DEFAULT_TOLERANCE),
            dirty: false,
        }
    }

    pub fn key(&self) -> Option<&FieldKey> {
        self.key.as_ref()
    }

    pub fn is_registered(&self) -> bool {
        self.key.is_some()
    }

    pub fn precedence(&self) -> Precedence {
        self.precedence
    }

    pub fn tolerance(&self) -> u32 {
        self.drift.tolerance()
    }

    pub fn frames_out_of_sync(&self) -> u32 {
        self.drift.frames_out_of_sync()
    }

    pub fn drift(&self) -> &DriftCounter {
        &self.drift
    }

    pub(crate) fn drift_mut(&mut self) -> &mut DriftCounter {
        &mut self.drift
    }

    pub(crate) fn set_precedence(&mut self, precedence: Precedence) {
        self.precedence = precedence;
    }

    pub(crate) fn bind(&mut self, key: FieldKey) {
        self.key = Some(key);
        self.dirty = false;
    }

    pub(crate) fn unbind(&mut self) {
        self.key = None;
        self.dirty = false;
    }

    pub(crate) fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    fn ensure_bound(&self) -> Result<()> {
        if self.key.is_none() {
            return Err(ReplicaError::NotRegistered("<unbound field>".to_string()));
        }
        Ok(())
    }
}

/// Value, metadata and callbacks shared by every field shape.
pub(crate) struct FieldCore<V> {
    pub(crate) value: V,
    pub(crate) meta: FieldMeta,
    on_local_apply: Option<ApplyCallback<V>>,
    on_authoritative_apply: Option<ApplyCallback<V>>,
}

impl<V> FieldCore<V> {
    pub(crate) fn new(value: V, precedence: Precedence) -> Self {
        Self {
            value,
            meta: FieldMeta::new(precedence),
            on_local_apply: None,
            on_authoritative_apply: None,
        }
    }

    pub(crate) fn set_tolerance(&mut self, tolerance: u32) {
        self.meta.drift.set_tolerance(tolerance);
    }

    pub(crate) fn set_local_callback(&mut self, callback: ApplyCallback<V>) {
        self.on_local_apply = Some(callback);
    }

    pub(crate) fn set_authoritative_callback(&mut self, callback: ApplyCallback<V>) {
        self.on_authoritative_apply = Some(callback);
    }

    pub(crate) fn ensure_bound(&self) -> Result<()> {
        self.meta.ensure_bound()
    }

    pub(crate) fn commit_local(&mut self, op: Operation, coords: Coordinates) {
        if let Some(callback) = self.on_local_apply.as_mut() {
            callback(&self.value, op, coords);
        }
    }

    pub(crate) fn commit_authoritative(&mut self, op: Operation, coords: Coordinates) {
        if let Some(callback) = self.on_authoritative_apply.as_mut() {
            callback(&self.value, op, coords);
        }
        self.meta.dirty = true;
    }
}

impl<V: fmt::Debug> fmt::Debug for FieldCore<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldCore")
            .field("value", &self.value)
            .field("meta", &self.meta)
            .field("on_local_apply", &self.on_local_apply.is_some())
            .field("on_authoritative_apply", &self.on_authoritative_apply.is_some())
            .finish()
    }
}

/// Type-erased view of a replicated field, as stored by the registry.
pub trait ReplicatedField: Any + Send {
    fn meta(&self) -> &FieldMeta;
    fn meta_mut(&mut self) -> &mut FieldMeta;

    fn to_wire(&self) -> WireValue;
    fn distance_to_wire(&self, remote: &WireValue) -> Result<usize>;
    fn local_set_wire(&mut self, remote: &WireValue) -> Result<()>;
    fn authoritative_change_wire(&mut self, remote: &WireValue) -> Result<()>;

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

#[derive(Debug)]
pub struct ReplicatedValue<T> {
    core: FieldCore<T>,
}

impl<T: Replicable> ReplicatedValue<T> {
    pub fn new(value: T, precedence: Precedence) -> Self {
        Self {
            core: FieldCore::new(value, precedence),
        }
    }

    pub fn with_tolerance(mut self, tolerance: u32) -> Self {
        self.core.set_tolerance(tolerance);
        self
    }

    pub fn on_local_apply<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&T, Operation, Coordinates) + Send + 'static,
    {
        self.core.set_local_callback(Box::new(callback));
        self
    }

    pub fn on_authoritative_apply<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&T, Operation, Coordinates) + Send + 'static,
    {
        self.core.set_authoritative_callback(Box::new(callback));
        self
    }

    pub fn read(&self) -> T {
        self.core.value.clone()
    }

    pub fn get(&self) -> &T {
        &self.core.value
    }

    pub fn local_set(&mut self, value: T) -> Result<()> {
        self.core.ensure_bound()?;
        self.core.value = value;
        self.core.commit_local(Operation::Set, Coordinates::Whole);
        Ok(())
    }

    pub fn authoritative_change(&mut self, value: T) -> Result<()> {
        self.core.ensure_bound()?;
        self.core.value = value;
        self.core.commit_authoritative(Operation::Set, Coordinates::Whole);
        Ok(())
    }

    pub fn compare_to(&self, other: &Self) -> usize {
        self.distance_to(&other.core.value)
    }

    pub fn distance_to(&self, value: &T) -> usize {
        usize::from(!self.core.value.same_value(value))
    }

    fn decode(remote: &WireValue) -> Result<T> {
        match remote {
            WireValue::Scalar(value) => T::from_field_value(value),
            other => Err(ReplicaError::type_mismatch("scalar", other.shape())),
        }
    }
}

impl<T: Replicable> ReplicatedField for ReplicatedValue<T> {
    fn meta(&self) -> &FieldMeta {
        &self.core.meta
    }

    fn meta_mut(&mut self) -> &mut FieldMeta {
        &mut self.core.meta
    }

    fn to_wire(&self) -> WireValue {
        WireValue::Scalar(self.core.value.to_field_value())
    }

    fn distance_to_wire(&self, remote: &WireValue) -> Result<usize> {
        Ok(self.distance_to(&Self::decode(remote)?))
    }

    fn local_set_wire(&mut self, remote: &WireValue) -> Result<()> {
        let value = Self::decode(remote)?;
        self.local_set(value)
    }

    fn authoritative_change_wire(&mut self, remote: &WireValue) -> Result<()> {
        let value = Self::decode(remote)?;
        self.authoritative_change(value)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drift::DriftVerdict;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_authoritative_change_requires_registration() {
        let mut value = ReplicatedValue::new(0i64, Precedence::Client);

        let err = value.authoritative_change(10).unwrap_err();
        assert!(matches!(err, ReplicaError::NotRegistered(_)));
        assert_eq!(value.read(), 0);
    }

    #[test]
    fn test_local_set_requires_registration() {
        let calls = Arc::new(Mutex::new(0));
        let counter = calls.clone();

        let mut value = ReplicatedValue::new(0i64, Precedence::Host)
            .on_local_apply(move |_: &i64, _, _| *counter.lock().unwrap() += 1);

        let err = value.local_set(5).unwrap_err();
        assert!(matches!(err, ReplicaError::NotRegistered(_)));
        assert_eq!(value.read(), 0);
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[test]
    fn test_local_set_fires_local_callback_only() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let local_calls = calls.clone();
        let authoritative_calls = calls.clone();

        let mut value = ReplicatedValue::new("idle".to_string(), Precedence::Host)
            .on_local_apply(move |v: &String, op, coords| {
                local_calls.lock().unwrap().push(("local", v.clone(), op, coords));
            })
            .on_authoritative_apply(move |v: &String, op, coords| {
                authoritative_calls.lock().unwrap().push(("auth", v.clone(), op, coords));
            });
        value.meta_mut().bind(FieldKey::new(2, "status"));

        value.local_set("running".to_string()).unwrap();

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0],
            ("local", "running".to_string(), Operation::Set, Coordinates::Whole)
        );
        assert!(!value.core.meta.dirty);
    }

    #[test]
    fn test_authoritative_change_marks_dirty_when_bound() {
        let mut value = ReplicatedValue::new(1u32, Precedence::Client);
        value.meta_mut().bind(FieldKey::new(3, "lives"));

        value.authoritative_change(2).unwrap();

        assert_eq!(value.read(), 2);
        assert!(value.meta_mut().take_dirty());
        assert!(!value.meta_mut().take_dirty());
    }

    #[test]
    fn test_compare_to_scalar() {
        let a = ReplicatedValue::new(5i32, Precedence::Host);
        let b = ReplicatedValue::new(5i32, Precedence::Client);
        let c = ReplicatedValue::new(6i32, Precedence::Client);

        assert_eq!(a.compare_to(&b), 0);
        assert_eq!(a.compare_to(&c), 1);
    }

    #[test]
    fn test_wire_shape_mismatch() {
        let mut value = ReplicatedValue::new(true, Precedence::Host);
        let err = value
            .local_set_wire(&WireValue::List(vec![FieldValue::Bool(false)]))
            .unwrap_err();

        assert!(err.is_protocol_violation());
        assert!(value.read());
    }

    #[test]
    fn test_nan_scalar_does_not_drift() {
        let mut speed = ReplicatedValue::new(f64::NAN, Precedence::Host);
        speed.meta_mut().bind(FieldKey::new(4, "speed"));

        let remote = WireValue::Scalar(FieldValue::F64(f64::NAN));
        for _ in 0..10 {
            let distance = speed.distance_to_wire(&remote).unwrap();
            assert_eq!(distance, 0);
            assert_eq!(speed.meta_mut().drift_mut().observe(distance), DriftVerdict::InSync);
        }

        assert_eq!(speed.distance_to_wire(&WireValue::Scalar(FieldValue::F64(1.0))).unwrap(), 1);
    }
}

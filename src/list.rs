use crate::error::{ReplicaError, Result};
use crate::protocol::*;
use crate::value::{FieldCore, FieldMeta, ReplicatedField};
use std::any::Any;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum ListEdit<T> {
    Insert { index: usize, item: T },
    Remove { index: usize },
    Set { index: usize, item: T },
}

impl<T> ListEdit<T> {
    pub fn operation(&self) -> Operation {
        match self {
            ListEdit::Insert { .. } => Operation::Add,
            ListEdit::Remove { .. } => Operation::Remove,
            ListEdit::Set { .. } => Operation::Set,
        }
    }

    pub fn coordinates(&self) -> Coordinates {
        match self {
            ListEdit::Insert { index, .. }
            | ListEdit::Remove { index }
            | ListEdit::Set { index, .. } => Coordinates::Index(*index),
        }
    }
}

/// Number of elements present in one list but not the other, ignoring order.
pub fn symmetric_difference<T: PartialEq>(a: &[T], b: &[T]) -> usize {
    symmetric_difference_by(a, b, |x, y| x == y)
}

pub fn symmetric_difference_by<T>(a: &[T], b: &[T], eq: impl Fn(&T, &T) -> bool) -> usize {
    let only_a = a.iter().filter(|x| !b.iter().any(|y| eq(x, y))).count();
    let only_b = b.iter().filter(|y| !a.iter().any(|x| eq(x, y))).count();
    only_a + only_b
}

#[derive(Debug)]
pub struct ReplicatedList<T> {
    core: FieldCore<Vec<T>>,
}

impl<T: Replicable> ReplicatedList<T> {
    pub fn new(items: Vec<T>, precedence: Precedence) -> Self {
        Self {
            core: FieldCore::new(items, precedence),
        }
    }

    /// Builds a list from a collection the caller may still be sharing.
    ///
    /// A shared `Arc` cannot be mutated in place, so its contents are copied
    /// into an owned buffer and a warning is logged.
    pub fn from_shared(items: Arc<Vec<T>>, precedence: Precedence) -> Self {
        let items = Arc::try_unwrap(items).unwrap_or_else(|shared| {
            log::warn!(
                "{}",
                ReplicaError::FixedCapacityCollection("ReplicatedList::from_shared")
            );
            shared.as_ref().clone()
        });
        Self::new(items, precedence)
    }

    pub fn with_tolerance(mut self, tolerance: u32) -> Self {
        self.core.set_tolerance(tolerance);
        self
    }

    pub fn on_local_apply<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&Vec<T>, Operation, Coordinates) + Send + 'static,
    {
        self.core.set_local_callback(Box::new(callback));
        self
    }

    pub fn on_authoritative_apply<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&Vec<T>, Operation, Coordinates) + Send + 'static,
    {
        self.core.set_authoritative_callback(Box::new(callback));
        self
    }

    pub fn read(&self) -> Vec<T> {
        self.core.value.clone()
    }

    pub fn items(&self) -> &[T] {
        &self.core.value
    }

    pub fn len(&self) -> usize {
        self.core.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.core.value.is_empty()
    }

    pub fn local_set(&mut self, items: Vec<T>) -> Result<()> {
        self.core.ensure_bound()?;
        self.core.value = items;
        self.core.commit_local(Operation::Set, Coordinates::Whole);
        Ok(())
    }

    pub fn authoritative_change(&mut self, items: Vec<T>) -> Result<()> {
        self.core.ensure_bound()?;
        self.core.value = items;
        self.core.commit_authoritative(Operation::Set, Coordinates::Whole);
        Ok(())
    }

    pub fn local_edit(&mut self, edit: ListEdit<T>) -> Result<()> {
        self.core.ensure_bound()?;
        let (op, coords) = self.apply_edit(edit)?;
        self.core.commit_local(op, coords);
        Ok(())
    }

    pub fn authoritative_edit(&mut self, edit: ListEdit<T>) -> Result<()> {
        self.core.ensure_bound()?;
        let (op, coords) = self.apply_edit(edit)?;
        self.core.commit_authoritative(op, coords);
        Ok(())
    }

    pub fn compare_to(&self, other: &Self) -> usize {
        self.distance_to(&other.core.value)
    }

    pub fn distance_to(&self, items: &[T]) -> usize {
        symmetric_difference_by(&self.core.value, items, T::same_value)
    }

    fn apply_edit(&mut self, edit: ListEdit<T>) -> Result<(Operation, Coordinates)> {
        let op = edit.operation();
        let coords = edit.coordinates();
        let len = self.core.value.len();

        let in_range = match &edit {
            ListEdit::Insert { index, .. } => *index <= len,
            ListEdit::Remove { index } | ListEdit::Set { index, .. } => *index < len,
        };
        if !in_range {
            return Err(ReplicaError::IndexOutOfRange {
                coordinate: coords,
                bounds: format!("len {}", len),
            });
        }

        match edit {
            ListEdit::Insert { index, item } => self.core.value.insert(index, item),
            ListEdit::Remove { index } => {
                self.core.value.remove(index);
            }
            ListEdit::Set { index, item } => self.core.value[index] = item,
        }

        Ok((op, coords))
    }

    fn decode(remote: &WireValue) -> Result<Vec<T>> {
        match remote {
            WireValue::List(values) => decode_items(values),
            other => Err(ReplicaError::type_mismatch("list", other.shape())),
        }
    }
}

impl<T: Replicable> ReplicatedField for ReplicatedList<T> {
    fn meta(&self) -> &FieldMeta {
        &self.core.meta
    }

    fn meta_mut(&mut self) -> &mut FieldMeta {
        &mut self.core.meta
    }

    fn to_wire(&self) -> WireValue {
        WireValue::List(encode_items(&self.core.value))
    }

    fn distance_to_wire(&self, remote: &WireValue) -> Result<usize> {
        Ok(self.distance_to(&Self::decode(remote)?))
    }

    fn local_set_wire(&mut self, remote: &WireValue) -> Result<()> {
        let items = Self::decode(remote)?;
        self.local_set(items)
    }

    fn authoritative_change_wire(&mut self, remote: &WireValue) -> Result<()> {
        let items = Self::decode(remote)?;
        self.authoritative_change(items)
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
    use std::sync::Mutex;

    fn bound<T: Replicable>(mut list: ReplicatedList<T>) -> ReplicatedList<T> {
        list.meta_mut().bind(FieldKey::new(1, "hand"));
        list
    }

    #[test]
    fn test_symmetric_difference_ignores_order() {
        assert_eq!(symmetric_difference(&[1, 2, 3], &[3, 2, 1]), 0);
        assert_eq!(symmetric_difference(&[1, 2, 3], &[2, 3, 4]), 2);
        assert_eq!(symmetric_difference::<u8>(&[], &[9]), 1);
    }

    #[test]
    fn test_local_edits_report_operation_and_index() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let mut list = bound(ReplicatedList::new(vec![10u8, 20], Precedence::Host).on_local_apply(
            move |_items: &Vec<u8>, op, coords| {
                sink.lock().unwrap().push((op, coords));
            },
        ));

        list.local_edit(ListEdit::Insert { index: 2, item: 30 }).unwrap();
        list.local_edit(ListEdit::Set { index: 0, item: 11 }).unwrap();
        list.local_edit(ListEdit::Remove { index: 1 }).unwrap();

        assert_eq!(list.read(), vec![11, 30]);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (Operation::Add, Coordinates::Index(2)),
                (Operation::Set, Coordinates::Index(0)),
                (Operation::Remove, Coordinates::Index(1)),
            ]
        );
    }

    #[test]
    fn test_out_of_range_edit_leaves_list_untouched() {
        let calls = Arc::new(Mutex::new(0));
        let counter = calls.clone();

        let mut list = bound(
            ReplicatedList::new(vec!["a".to_string()], Precedence::Host)
                .on_local_apply(move |_: &Vec<String>, _, _| *counter.lock().unwrap() += 1),
        );

        let err = list.local_edit(ListEdit::Remove { index: 1 }).unwrap_err();
        assert!(matches!(
            err,
            ReplicaError::IndexOutOfRange { coordinate: Coordinates::Index(1), .. }
        ));

        let err = list
            .local_edit(ListEdit::Insert { index: 5, item: "z".to_string() })
            .unwrap_err();
        assert!(matches!(err, ReplicaError::IndexOutOfRange { .. }));

        assert_eq!(list.read(), vec!["a".to_string()]);
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[test]
    fn test_local_edit_requires_registration() {
        let mut list = ReplicatedList::new(vec![1i32], Precedence::Host);

        let err = list.local_edit(ListEdit::Remove { index: 0 }).unwrap_err();
        assert!(matches!(err, ReplicaError::NotRegistered(_)));
        assert!(matches!(list.local_set(Vec::new()), Err(ReplicaError::NotRegistered(_))));
        assert_eq!(list.read(), vec![1]);
    }

    #[test]
    fn test_authoritative_edit_requires_registration() {
        let mut list = ReplicatedList::new(vec![1i32], Precedence::Client);
        let err = list.authoritative_edit(ListEdit::Remove { index: 0 }).unwrap_err();

        assert!(matches!(err, ReplicaError::NotRegistered(_)));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_from_shared_falls_back_to_owned_copy() {
        let shared = Arc::new(vec![1u16, 2, 3]);
        let keep_alive = shared.clone();

        let mut list = bound(ReplicatedList::from_shared(shared, Precedence::Host));
        list.local_edit(ListEdit::Remove { index: 0 }).unwrap();

        assert_eq!(list.read(), vec![2, 3]);
        assert_eq!(*keep_alive, vec![1, 2, 3]);

        let unique = ReplicatedList::from_shared(Arc::new(vec![7u16]), Precedence::Host);
        assert_eq!(unique.read(), vec![7]);
    }

    #[test]
    fn test_wire_round_trip_and_distance() {
        let list = ReplicatedList::new(vec![1i64, 2, 3], Precedence::Host);
        let wire = list.to_wire();

        assert_eq!(list.distance_to_wire(&wire).unwrap(), 0);

        let other = WireValue::List(vec![FieldValue::I64(1), FieldValue::I64(4)]);
        assert_eq!(list.distance_to_wire(&other).unwrap(), 3);
    }

    #[test]
    fn test_nan_items_match_themselves() {
        let list = ReplicatedList::new(vec![f32::NAN, 1.0], Precedence::Host);

        assert_eq!(list.distance_to(&[1.0, f32::NAN]), 0);
        assert_eq!(list.distance_to(&[1.0]), 1);
    }
}

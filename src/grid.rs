use crate::drift::Reconcilable;
use crate::error::{ReplicaError, Result};
use crate::protocol::*;
use crate::value::{FieldCore, FieldMeta, ReplicatedField};
use serde::{Deserialize, Serialize};
use std::any::Any;

fn cell_count(rows: usize, cols: usize) -> Result<usize> {
    rows.checked_mul(cols).ok_or_else(|| {
        ReplicaError::type_mismatch(
            "grid with addressable cell count",
            format!("{}x{} grid", rows, cols),
        )
    })
}

/// Row-major rectangular grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grid<T> {
    rows: usize,
    cols: usize,
    cells: Vec<T>,
}

impl<T> Grid<T> {
    pub fn filled(rows: usize, cols: usize, fill: T) -> Result<Self>
    where
        T: Clone,
    {
        let len = cell_count(rows, cols)?;
        Ok(Self {
            rows,
            cols,
            cells: vec![fill; len],
        })
    }

    /// Dimensions may come off the wire, so an overflowing shape is an error.
    pub fn from_cells(rows: usize, cols: usize, cells: Vec<T>) -> Result<Self> {
        let expected = cell_count(rows, cols)?;
        if cells.len() != expected {
            return Err(ReplicaError::type_mismatch(
                format!("{} cells for a {}x{} grid", expected, rows, cols),
                format!("{} cells", cells.len()),
            ));
        }
        Ok(Self { rows, cols, cells })
    }

    pub fn from_rows(rows: Vec<Vec<T>>) -> Result<Self> {
        let cols = rows.first().map(Vec::len).unwrap_or(0);
        let row_count = rows.len();
        let mut cells = Vec::with_capacity(cell_count(row_count, cols)?);

        for (index, row) in rows.into_iter().enumerate() {
            if row.len() != cols {
                return Err(ReplicaError::IndexOutOfRange {
                    coordinate: Coordinates::Row(index),
                    bounds: format!("{} columns", cols),
                });
            }
            cells.extend(row);
        }

        Ok(Self {
            rows: row_count,
            cols,
            cells,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn cells(&self) -> &[T] {
        &self.cells
    }

    pub fn get(&self, row: usize, col: usize) -> Option<&T> {
        if row < self.rows && col < self.cols {
            self.cells.get(row * self.cols + col)
        } else {
            None
        }
    }

    pub fn row(&self, row: usize) -> Option<&[T]> {
        if row < self.rows {
            Some(&self.cells[row * self.cols..(row + 1) * self.cols])
        } else {
            None
        }
    }

    pub fn set(&mut self, row: usize, col: usize, item: T) -> Result<()> {
        let index = self.index_of(row, col)?;
        self.cells[index] = item;
        Ok(())
    }

    pub fn insert_row(&mut self, row: usize, cells: Vec<T>) -> Result<()> {
        let expected_cols = if self.rows == 0 { cells.len() } else { self.cols };
        if row > self.rows || cells.len() != expected_cols {
            return Err(ReplicaError::IndexOutOfRange {
                coordinate: Coordinates::Row(row),
                bounds: self.bounds(),
            });
        }

        self.cols = expected_cols;
        let start = row * self.cols;
        self.cells.splice(start..start, cells);
        self.rows += 1;
        Ok(())
    }

    pub fn remove_row(&mut self, row: usize) -> Result<Vec<T>> {
        if row >= self.rows {
            return Err(ReplicaError::IndexOutOfRange {
                coordinate: Coordinates::Row(row),
                bounds: self.bounds(),
            });
        }

        let start = row * self.cols;
        let removed = self.cells.drain(start..start + self.cols).collect();
        self.rows -= 1;
        Ok(removed)
    }

    fn index_of(&self, row: usize, col: usize) -> Result<usize> {
        if row < self.rows && col < self.cols {
            Ok(row * self.cols + col)
        } else {
            Err(ReplicaError::IndexOutOfRange {
                coordinate: Coordinates::Cell { row, col },
                bounds: self.bounds(),
            })
        }
    }

    fn bounds(&self) -> String {
        format!("{}x{}", self.rows, self.cols)
    }
}

impl<T: PartialEq> Grid<T> {
    /// Cells that differ, counting cells present in only one grid.
    pub fn diff_count(&self, other: &Self) -> usize {
        self.diff_count_by(other, |a, b| a == b)
    }
}

impl<T> Grid<T> {
    pub fn diff_count_by(&self, other: &Self, eq: impl Fn(&T, &T) -> bool) -> usize {
        let rows = self.rows.max(other.rows);
        let cols = self.cols.max(other.cols);
        let mut differing = 0;

        for row in 0..rows {
            for col in 0..cols {
                let same = match (self.get(row, col), other.get(row, col)) {
                    (Some(a), Some(b)) => eq(a, b),
                    (None, None) => true,
                    _ => false,
                };
                if !same {
                    differing += 1;
                }
            }
        }

        differing
    }
}

impl<T: PartialEq + Clone> Reconcilable for Grid<T> {
    fn diff_count(&self, peer: &Self) -> usize {
        Grid::diff_count(self, peer)
    }

    fn replace_with(&mut self, peer: &Self) {
        self.clone_from(peer);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GridEdit<T> {
    InsertRow { row: usize, cells: Vec<T> },
    RemoveRow { row: usize },
    Set { row: usize, col: usize, item: T },
}

impl<T> GridEdit<T> {
    pub fn operation(&self) -> Operation {
        match self {
            GridEdit::InsertRow { .. } => Operation::Add,
            GridEdit::RemoveRow { .. } => Operation::Remove,
            GridEdit::Set { .. } => Operation::Set,
        }
    }

    pub fn coordinates(&self) -> Coordinates {
        match self {
            GridEdit::InsertRow { row, .. } | GridEdit::RemoveRow { row } => Coordinates::Row(*row),
            GridEdit::Set { row, col, .. } => Coordinates::Cell {
                row: *row,
                col: *col,
            },
        }
    }
}

#[derive(Debug)]
pub struct ReplicatedGrid<T> {
    core: FieldCore<Grid<T>>,
}

impl<T: Replicable> ReplicatedGrid<T> {
    pub fn new(grid: Grid<T>, precedence: Precedence) -> Self {
        Self {
            core: FieldCore::new(grid, precedence),
        }
    }

    pub fn with_tolerance(mut self, tolerance: u32) -> Self {
        self.core.set_tolerance(tolerance);
        self
    }

    pub fn on_local_apply<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&Grid<T>, Operation, Coordinates) + Send + 'static,
    {
        self.core.set_local_callback(Box::new(callback));
        self
    }

    pub fn on_authoritative_apply<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&Grid<T>, Operation, Coordinates) + Send + 'static,
    {
        self.core.set_authoritative_callback(Box::new(callback));
        self
    }

    pub fn read(&self) -> Grid<T> {
        self.core.value.clone()
    }

    pub fn grid(&self) -> &Grid<T> {
        &self.core.value
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<&T> {
        self.core.value.get(row, col)
    }

    pub fn local_set(&mut self, grid: Grid<T>) -> Result<()> {
        self.core.ensure_bound()?;
        self.core.value = grid;
        self.core.commit_local(Operation::Set, Coordinates::Whole);
        Ok(())
    }

    pub fn authoritative_change(&mut self, grid: Grid<T>) -> Result<()> {
        self.core.ensure_bound()?;
        self.core.value = grid;
        self.core.commit_authoritative(Operation::Set, Coordinates::Whole);
        Ok(())
    }

    pub fn local_edit(&mut self, edit: GridEdit<T>) -> Result<()> {
        self.core.ensure_bound()?;
        let (op, coords) = self.apply_edit(edit)?;
        self.core.commit_local(op, coords);
        Ok(())
    }

    pub fn authoritative_edit(&mut self, edit: GridEdit<T>) -> Result<()> {
        self.core.ensure_bound()?;
        let (op, coords) = self.apply_edit(edit)?;
        self.core.commit_authoritative(op, coords);
        Ok(())
    }

    pub fn compare_to(&self, other: &Self) -> usize {
        self.distance_to(&other.core.value)
    }

    pub fn distance_to(&self, grid: &Grid<T>) -> usize {
        self.core.value.diff_count_by(grid, T::same_value)
    }

    fn apply_edit(&mut self, edit: GridEdit<T>) -> Result<(Operation, Coordinates)> {
        let op = edit.operation();
        let coords = edit.coordinates();
        let grid = &mut self.core.value;

        match edit {
            GridEdit::InsertRow { row, cells } => grid.insert_row(row, cells)?,
            GridEdit::RemoveRow { row } => {
                grid.remove_row(row)?;
            }
            GridEdit::Set { row, col, item } => grid.set(row, col, item)?,
        }

        Ok((op, coords))
    }

    fn decode(remote: &WireValue) -> Result<Grid<T>> {
        match remote {
            WireValue::Grid { rows, cols, cells } => {
                Grid::from_cells(*rows, *cols, decode_items(cells)?)
            }
            other => Err(ReplicaError::type_mismatch("grid", other.shape())),
        }
    }
}

impl<T: Replicable> ReplicatedField for ReplicatedGrid<T> {
    fn meta(&self) -> &FieldMeta {
        &self.core.meta
    }

    fn meta_mut(&mut self) -> &mut FieldMeta {
        &mut self.core.meta
    }

    fn to_wire(&self) -> WireValue {
        let grid = &self.core.value;
        WireValue::Grid {
            rows: grid.rows(),
            cols: grid.cols(),
            cells: encode_items(grid.cells()),
        }
    }

    fn distance_to_wire(&self, remote: &WireValue) -> Result<usize> {
        Ok(self.distance_to(&Self::decode(remote)?))
    }

    fn local_set_wire(&mut self, remote: &WireValue) -> Result<()> {
        let grid = Self::decode(remote)?;
        self.local_set(grid)
    }

    fn authoritative_change_wire(&mut self, remote: &WireValue) -> Result<()> {
        let grid = Self::decode(remote)?;
        self.authoritative_change(grid)
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
    use crate::drift::{ConsistencyRepair, DriftVerdict};
    use std::sync::{Arc, Mutex};

    fn bound<T: Replicable>(mut field: ReplicatedGrid<T>) -> ReplicatedGrid<T> {
        field.meta_mut().bind(FieldKey::new(0, "board"));
        field
    }

    #[test]
    fn test_grid_diff_counts_cells_and_shape() {
        let a = Grid::filled(2, 2, 0u8).unwrap();
        let mut b = a.clone();
        b.set(1, 1, 9).unwrap();

        assert_eq!(a.diff_count(&b), 1);

        let c = Grid::filled(3, 2, 0u8).unwrap();
        assert_eq!(a.diff_count(&c), 2);
    }

    #[test]
    fn test_grid_rows_insert_and_remove() {
        let mut grid = Grid::from_rows(vec![vec![1, 2], vec![3, 4]]).unwrap();

        grid.insert_row(1, vec![7, 8]).unwrap();
        assert_eq!(grid.row(1), Some(&[7, 8][..]));
        assert_eq!(grid.rows(), 3);

        assert_eq!(grid.remove_row(0).unwrap(), vec![1, 2]);
        assert_eq!(grid.get(0, 0), Some(&7));
        assert_eq!(grid.get(1, 1), Some(&4));

        assert!(grid.insert_row(0, vec![1]).is_err());
        assert!(Grid::from_rows(vec![vec![1], vec![2, 3]]).is_err());
    }

    #[test]
    fn test_cell_edit_reports_coordinates() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let mut field = bound(
            ReplicatedGrid::new(Grid::filled(2, 3, 0i32).unwrap(), Precedence::Host).on_local_apply(
                move |grid: &Grid<i32>, op, coords| {
                    if let Coordinates::Cell { row, col } = coords {
                        sink.lock().unwrap().push((op, row, col, *grid.get(row, col).unwrap()));
                    }
                },
            ),
        );

        field.local_edit(GridEdit::Set { row: 1, col: 2, item: 5 }).unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![(Operation::Set, 1, 2, 5)]);
        assert_eq!(field.cell(1, 2), Some(&5));
    }

    #[test]
    fn test_out_of_range_cell() {
        let mut field = bound(ReplicatedGrid::new(
            Grid::filled(1, 1, false).unwrap(),
            Precedence::Host,
        ));
        let err = field
            .local_edit(GridEdit::Set { row: 0, col: 1, item: true })
            .unwrap_err();

        assert!(matches!(
            err,
            ReplicaError::IndexOutOfRange {
                coordinate: Coordinates::Cell { row: 0, col: 1 },
                ..
            }
        ));
    }

    #[test]
    fn test_wire_decode_rejects_bad_cell_count() {
        let mut field = bound(ReplicatedGrid::new(
            Grid::filled(1, 2, 0u8).unwrap(),
            Precedence::Host,
        ));
        let bad = WireValue::Grid {
            rows: 2,
            cols: 2,
            cells: vec![FieldValue::U8(1)],
        };

        assert!(field.local_set_wire(&bad).is_err());
        assert_eq!(field.read(), Grid::filled(1, 2, 0u8).unwrap());
    }

    #[test]
    fn test_wire_decode_rejects_overflowing_shape() {
        let mut field = bound(ReplicatedGrid::new(
            Grid::filled(1, 2, 0u8).unwrap(),
            Precedence::Host,
        ));
        let bad = WireValue::Grid {
            rows: usize::MAX,
            cols: 2,
            cells: Vec::new(),
        };

        let err = field.distance_to_wire(&bad).unwrap_err();
        assert!(err.is_protocol_violation());
        assert!(field.local_set_wire(&bad).is_err());
        assert_eq!(field.read(), Grid::filled(1, 2, 0u8).unwrap());

        assert!(Grid::filled(usize::MAX, 3, 0u8).is_err());
        assert!(Grid::<u8>::from_cells(3, usize::MAX, Vec::new()).is_err());
    }

    #[test]
    fn test_local_edit_requires_registration() {
        let mut field = ReplicatedGrid::new(Grid::filled(1, 1, 0u8).unwrap(), Precedence::Host);

        let err = field.local_edit(GridEdit::Set { row: 0, col: 0, item: 1 }).unwrap_err();
        assert!(matches!(err, ReplicaError::NotRegistered(_)));
        assert!(field.local_set(Grid::filled(2, 2, 1).unwrap()).is_err());
        assert_eq!(field.cell(0, 0), Some(&0));
    }

    #[test]
    fn test_nan_cells_do_not_count_as_drift() {
        let mut noise = Grid::filled(2, 2, 0.5f64).unwrap();
        noise.set(1, 0, f64::NAN).unwrap();
        let field = ReplicatedGrid::new(noise.clone(), Precedence::Host);

        assert_eq!(field.distance_to(&noise), 0);
        assert_eq!(noise.diff_count(&noise), 1);
    }

    #[test]
    fn test_simulation_grid_consistency_repair() {
        let mut board = ConsistencyRepair::new(Grid::filled(4, 4, 0u8).unwrap(), 2);
        let mut authoritative = Grid::filled(4, 4, 0u8).unwrap();
        authoritative.set(3, 0, 2).unwrap();

        assert_eq!(board.reconcile(&authoritative), DriftVerdict::Drifting(1));
        assert_eq!(board.reconcile(&authoritative), DriftVerdict::Drifting(2));
        assert_eq!(board.reconcile(&authoritative), DriftVerdict::Repair);
        assert_eq!(board.local(), &authoritative);
    }
}

use glam::Vec3;
use std::collections::BTreeMap;
use worldtick_common::CellCoord;

/// Groups items by the cell containing their position.
///
/// Rebuilt from scratch whenever a fresh grouping is needed; positions are
/// not tracked incrementally. BTreeMap keeps cell iteration order stable.
#[derive(Debug, Clone)]
pub struct GridPartition<T> {
    cells: BTreeMap<CellCoord, Vec<T>>,
}

impl<T> Default for GridPartition<T> {
    fn default() -> Self {
        Self {
            cells: BTreeMap::new(),
        }
    }
}

impl<T> GridPartition<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a partition from `(position, item)` pairs.
    pub fn build(items: impl IntoIterator<Item = (Vec3, T)>) -> Self {
        let mut grid = Self::new();
        grid.rebuild(items);
        grid
    }

    /// Rebuild the whole partition from `(position, item)` pairs.
    pub fn rebuild(&mut self, items: impl IntoIterator<Item = (Vec3, T)>) {
        self.cells.clear();
        for (pos, item) in items {
            self.cells
                .entry(CellCoord::from_position(pos))
                .or_default()
                .push(item);
        }
    }

    /// Items in a specific cell.
    pub fn items_in_cell(&self, coord: CellCoord) -> &[T] {
        self.cells.get(&coord).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Items within a square radius (in cells) of a center cell.
    pub fn items_in_radius(&self, center: CellCoord, radius: i32) -> Vec<&T> {
        let mut result = Vec::new();
        for dx in -radius..=radius {
            for dz in -radius..=radius {
                let coord = CellCoord::new(center.x + dx, center.z + dz);
                if let Some(items) = self.cells.get(&coord) {
                    result.extend(items);
                }
            }
        }
        result
    }

    /// Number of non-empty cells.
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Total number of items across all cells.
    pub fn total_placements(&self) -> usize {
        self.cells.values().map(Vec::len).sum()
    }

    /// Consume the partition, yielding each non-empty cell and its items.
    pub fn into_cells(self) -> impl Iterator<Item = (CellCoord, Vec<T>)> {
        self.cells.into_iter()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CellCoord, &Vec<T>)> {
        self.cells.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_by_cell() {
        let grid = GridPartition::build([
            (Vec3::new(1.0, 0.0, 1.0), "a"),
            (Vec3::new(15.0, 0.0, 2.0), "b"),
            (Vec3::new(20.0, 0.0, 0.0), "c"),
        ]);
        assert_eq!(grid.cell_count(), 2);
        assert_eq!(grid.total_placements(), 3);
        assert_eq!(grid.items_in_cell(CellCoord::new(0, 0)), &["a", "b"]);
        assert_eq!(grid.items_in_cell(CellCoord::new(1, 0)), &["c"]);
    }

    #[test]
    fn rebuild_replaces_previous_grouping() {
        let mut grid = GridPartition::build([(Vec3::ZERO, 1)]);
        grid.rebuild([(Vec3::new(40.0, 0.0, 40.0), 2)]);
        assert!(grid.items_in_cell(CellCoord::new(0, 0)).is_empty());
        assert_eq!(grid.items_in_cell(CellCoord::new(2, 2)), &[2]);
    }

    #[test]
    fn radius_query() {
        let grid = GridPartition::build([
            (Vec3::ZERO, 1),
            (Vec3::new(20.0, 0.0, 0.0), 2),
            (Vec3::new(200.0, 0.0, 0.0), 3),
        ]);
        let near: Vec<i32> = grid
            .items_in_radius(CellCoord::new(0, 0), 1)
            .into_iter()
            .copied()
            .collect();
        assert_eq!(near, vec![1, 2]);
        assert!(grid.items_in_radius(CellCoord::new(-10, -10), 0).is_empty());
    }

    #[test]
    fn into_cells_is_ordered() {
        let grid = GridPartition::build([
            (Vec3::new(40.0, 0.0, 0.0), 'x'),
            (Vec3::new(-40.0, 0.0, 0.0), 'y'),
        ]);
        let coords: Vec<CellCoord> = grid.into_cells().map(|(c, _)| c).collect();
        assert_eq!(coords, vec![CellCoord::new(-3, 0), CellCoord::new(2, 0)]);
    }
}

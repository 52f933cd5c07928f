//! Uniform spatial grid indexing for flock neighborhood queries.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors emitted by the spatial index.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Indicates construction values that cannot be used (e.g., non-positive cell size).
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Fixed-cell-size spatial partition over a rectangular domain.
///
/// Cells hold agent indices. Contents are rebuilt from scratch every step
/// while the grid itself lives for the whole run; `used_cells` tracks the
/// occupied cells so a clear touches only those instead of the full grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniformGrid {
    cell_count_x: usize,
    cell_count_y: usize,
    cell_size: f32,
    cells: Vec<Vec<usize>>,
    used_cells: Vec<usize>,
}

impl UniformGrid {
    /// Create a grid covering `width × height` with square cells of `cell_size`.
    ///
    /// Cell counts round up, so the grid always covers the full domain.
    pub fn new(width: f32, height: f32, cell_size: f32) -> Result<Self, IndexError> {
        if !width.is_finite() || !height.is_finite() || width <= 0.0 || height <= 0.0 {
            return Err(IndexError::InvalidConfig(
                "grid dimensions must be positive and finite",
            ));
        }
        if !cell_size.is_finite() || cell_size <= 0.0 {
            return Err(IndexError::InvalidConfig("cell_size must be positive"));
        }
        let cell_count_x = (width / cell_size).ceil() as usize;
        let cell_count_y = (height / cell_size).ceil() as usize;
        Ok(Self {
            cell_count_x,
            cell_count_y,
            cell_size,
            cells: vec![Vec::new(); cell_count_x * cell_count_y],
            used_cells: Vec::new(),
        })
    }

    /// Number of cell columns.
    #[must_use]
    pub const fn cell_count_x(&self) -> usize {
        self.cell_count_x
    }

    /// Number of cell rows.
    #[must_use]
    pub const fn cell_count_y(&self) -> usize {
        self.cell_count_y
    }

    /// Edge length of one cell in world units.
    #[must_use]
    pub const fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Total number of cells in the grid.
    #[must_use]
    pub fn total_cells(&self) -> usize {
        self.cells.len()
    }

    /// Number of cells currently holding at least one agent index.
    #[must_use]
    pub fn occupied_cells(&self) -> usize {
        self.used_cells.len()
    }

    /// Map a world position to cell coordinates.
    ///
    /// Positions outside the nominal domain (e.g. momentarily past the wrap
    /// margin) are clamped into the border cell, never indexed out of bounds.
    #[must_use]
    pub fn cell_coords(&self, x: f32, y: f32) -> (usize, usize) {
        let cx = ((x / self.cell_size).floor() as isize).clamp(0, self.cell_count_x as isize - 1);
        let cy = ((y / self.cell_size).floor() as isize).clamp(0, self.cell_count_y as isize - 1);
        (cx as usize, cy as usize)
    }

    fn cell_index(&self, cell_x: usize, cell_y: usize) -> usize {
        cell_y * self.cell_count_x + cell_x
    }

    /// The agent indices currently stored in one cell (intra-cell order is
    /// unspecified).
    #[must_use]
    pub fn cell(&self, cell_x: usize, cell_y: usize) -> &[usize] {
        &self.cells[self.cell_index(cell_x, cell_y)]
    }

    /// Empty every occupied cell, leaving allocated capacity in place.
    pub fn clear(&mut self) {
        for idx in self.used_cells.drain(..) {
            self.cells[idx].clear();
        }
    }

    /// Rebuild the index from agent positions.
    ///
    /// After a rebuild every agent index appears in exactly one cell. A cell
    /// joins `used_cells` the first time it receives content.
    pub fn rebuild(&mut self, positions: &[(f32, f32)]) {
        self.clear();
        for (index, &(x, y)) in positions.iter().enumerate() {
            let (cx, cy) = self.cell_coords(x, y);
            let cell = self.cell_index(cx, cy);
            if self.cells[cell].is_empty() {
                self.used_cells.push(cell);
            }
            self.cells[cell].push(index);
        }
    }

    /// Parallel rebuild: partition the agent range across workers, each
    /// accumulating private per-cell buckets, then merge buckets into the
    /// shared grid cell by cell.
    ///
    /// Merges for different cells are independent, so no insertion ever
    /// contends on a lock. Chunk boundaries and merge order are fixed, so the
    /// result is identical to [`rebuild`](Self::rebuild): each cell ends up
    /// with its agent indices in ascending order either way.
    pub fn par_rebuild(&mut self, positions: &[(f32, f32)]) {
        self.clear();
        if positions.is_empty() {
            return;
        }

        let chunk_len = positions
            .len()
            .div_ceil(rayon::current_num_threads().max(1));
        let partials: Vec<BTreeMap<usize, Vec<usize>>> = positions
            .par_chunks(chunk_len)
            .enumerate()
            .map(|(chunk_idx, chunk)| {
                let base = chunk_idx * chunk_len;
                let mut buckets: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
                for (offset, &(x, y)) in chunk.iter().enumerate() {
                    let (cx, cy) = self.cell_coords(x, y);
                    buckets
                        .entry(self.cell_index(cx, cy))
                        .or_default()
                        .push(base + offset);
                }
                buckets
            })
            .collect();

        for partial in partials {
            for (cell, mut bucket) in partial {
                if self.cells[cell].is_empty() {
                    self.used_cells.push(cell);
                }
                self.cells[cell].append(&mut bucket);
            }
        }
    }

    /// Invoke `visit` once for every agent index stored in the 3×3 block of
    /// cells centered at `(cell_x, cell_y)`.
    ///
    /// Out-of-range cells at the domain border are skipped; cell adjacency
    /// never wraps, even though agent motion does. Visitation order is
    /// unspecified and must not be relied upon.
    pub fn for_each_neighbor(&self, cell_x: usize, cell_y: usize, mut visit: impl FnMut(usize)) {
        let x_lo = cell_x.saturating_sub(1);
        let x_hi = (cell_x + 1).min(self.cell_count_x - 1);
        let y_lo = cell_y.saturating_sub(1);
        let y_hi = (cell_y + 1).min(self.cell_count_y - 1);
        for ny in y_lo..=y_hi {
            for nx in x_lo..=x_hi {
                for &index in &self.cells[self.cell_index(nx, ny)] {
                    visit(index);
                }
            }
        }
    }
}

//! Grid store: the occupancy grid, the derived planning grid, and the
//! planner's published path/cost-field slot. A mutex+condvar guards the
//! planning grid's version; an independent mutex guards the path slot so a
//! slow path reader never blocks the mapper.

use crate::params::Params;
use crate::types::{Cell, CellState};
use parking_lot::{Condvar, Mutex};
use std::time::Duration;

struct PlanningSlot {
    grid: Vec<u8>,
    version: u64,
}

struct PathSlot {
    cost_field: Vec<u8>,
    path: Vec<(f64, f64)>,
}

pub struct GridStore {
    w: usize,
    h: usize,
    cell_size: f64,
    occupancy: Mutex<Vec<u8>>,
    planning: Mutex<PlanningSlot>,
    planning_cv: Condvar,
    path_slot: Mutex<PathSlot>,
}

impl GridStore {
    pub fn new(params: &Params) -> Self {
        let w = params.grid_w;
        let h = params.grid_h;
        Self {
            w,
            h,
            cell_size: params.cell_size,
            occupancy: Mutex::new(vec![CellState::Unknown.as_byte(); w * h]),
            planning: Mutex::new(PlanningSlot {
                grid: vec![0u8; w * h],
                version: 0,
            }),
            planning_cv: Condvar::new(),
            path_slot: Mutex::new(PathSlot {
                cost_field: vec![0u8; w * h],
                path: Vec::new(),
            }),
        }
    }

    pub fn width(&self) -> usize {
        self.w
    }

    pub fn height(&self) -> usize {
        self.h
    }

    /// World `(x, y)` to a candidate cell; `None` if outside the grid.
    pub fn world_to_cell(&self, x: f64, y: f64) -> Option<Cell> {
        let gx = (x / self.cell_size).floor() as i32 + (self.w / 2) as i32;
        let gy = (y / self.cell_size).floor() as i32 + (self.h / 2) as i32;
        let cell = Cell::new(gx, gy);
        cell.in_bounds(self.w, self.h).then_some(cell)
    }

    pub fn cell_to_world(&self, cell: Cell) -> (f64, f64) {
        let x = (cell.x - (self.w / 2) as i32) as f64 * self.cell_size;
        let y = (cell.y - (self.h / 2) as i32) as f64 * self.cell_size;
        (x, y)
    }

    // --- Occupancy grid -----------------------------------------------

    /// Clone of the occupancy grid for the mapper to mutate locally before
    /// publishing (the "write a local copy, then atomically swap" policy of
    /// §5 — no lock is held while the mapper computes the new grid).
    pub fn snapshot_occupancy(&self) -> Vec<u8> {
        self.occupancy.lock().clone()
    }

    pub fn publish_occupancy(&self, grid: Vec<u8>) {
        debug_assert_eq!(grid.len(), self.w * self.h);
        *self.occupancy.lock() = grid;
    }

    pub fn get_occupancy(&self, cell: Cell) -> CellState {
        if !cell.in_bounds(self.w, self.h) {
            return CellState::Unknown;
        }
        CellState::from_byte(self.occupancy.lock()[cell.index(self.w)])
    }

    /// Seed a fixed-inset rectangular border as occupied (§9 of SPEC_FULL —
    /// the original binary's "outer wall" seeding). Not invoked by `main`
    /// automatically; available for callers/tests that want it.
    pub fn stamp_border_walls(&self, inset: i32) {
        let mut grid = self.occupancy.lock();
        let w = self.w as i32;
        let h = self.h as i32;
        let mut set = |x: i32, y: i32| {
            let c = Cell::new(x, y);
            if c.in_bounds(self.w, self.h) {
                grid[c.index(self.w)] = CellState::Occupied.as_byte();
            }
        };
        for x in inset..(w - inset) {
            set(x, inset);
            set(x, h - inset - 1);
        }
        for y in inset..(h - inset) {
            set(inset, y);
            set(w - inset - 1, y);
        }
    }

    // --- Planning grid (§4.1, §5) ---------------------------------------

    /// Dilate `occupancy` by a Euclidean disc of radius `r_inflate` cells,
    /// producing a binary planning grid (`0` traversable, `1` blocked).
    ///
    /// Scatters from each occupied cell rather than testing every cell
    /// against every obstacle: cheap when obstacles are sparse relative to
    /// the grid, which they are for a single range-sensor scan per tick.
    pub fn dilate(&self, occupancy: &[u8], r_inflate: i32) -> Vec<u8> {
        let offsets = disc_offsets(r_inflate);
        let mut planning = vec![0u8; self.w * self.h];
        for y in 0..self.h as i32 {
            for x in 0..self.w as i32 {
                let idx = Cell::new(x, y).index(self.w);
                if occupancy[idx] != CellState::Occupied.as_byte() {
                    continue;
                }
                for &(dx, dy) in &offsets {
                    let c = Cell::new(x + dx, y + dy);
                    if c.in_bounds(self.w, self.h) {
                        planning[c.index(self.w)] = 1;
                    }
                }
            }
        }
        planning
    }

    pub fn snapshot_planning(&self) -> (Vec<u8>, u64) {
        let slot = self.planning.lock();
        (slot.grid.clone(), slot.version)
    }

    /// Atomically replace the planning grid and bump `version`; wakes any
    /// threads blocked in `wait_for_change`. Per §5, this strictly follows
    /// the occupancy publish that produced `grid`.
    pub fn publish_planning(&self, grid: Vec<u8>) {
        debug_assert_eq!(grid.len(), self.w * self.h);
        let mut slot = self.planning.lock();
        slot.grid = grid;
        slot.version += 1;
        self.planning_cv.notify_all();
    }

    /// Block until the planning grid's version differs from `last_seen`, or
    /// `timeout` elapses. Returns `true` if a change was observed.
    pub fn wait_for_change(&self, last_seen: u64, timeout: Duration) -> bool {
        let mut slot = self.planning.lock();
        if slot.version != last_seen {
            return true;
        }
        let result = self.planning_cv.wait_for(&mut slot, timeout);
        !result.timed_out() && slot.version != last_seen
    }

    // --- Path / cost-field publish slot (§4.1, §5) -----------------------

    pub fn publish_path(&self, cost_field: Vec<u8>, path: Vec<(f64, f64)>) {
        let mut slot = self.path_slot.lock();
        slot.cost_field = cost_field;
        slot.path = path;
    }

    pub fn read_path(&self) -> (Vec<u8>, Vec<(f64, f64)>) {
        let slot = self.path_slot.lock();
        (slot.cost_field.clone(), slot.path.clone())
    }
}

/// Precompute the integer offsets of a disc of the given Euclidean radius,
/// for scatter-style dilation.
fn disc_offsets(radius: i32) -> Vec<(i32, i32)> {
    let r2 = radius * radius;
    let mut offsets = Vec::new();
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy <= r2 {
                offsets.push((dx, dy));
            }
        }
    }
    offsets
}

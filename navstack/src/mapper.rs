//! Mapper (§4.3): turns one 360-beam range scan plus the current pose into
//! an updated occupancy grid and its derived planning grid.
//!
//! Carving always runs to completion before stamping, onto a local copy of
//! the occupancy grid, so a free-space triangle from a later beam can never
//! erase an obstacle stamped earlier in the same tick (§3 Data Model) — this
//! mirrors the original `main.cpp`'s `gridCopy` "fill free, then fill
//! obstacle" ordering, done here via two passes over one owned `Vec<u8>`
//! rather than a second temporary grid.

use crate::geometry::{distance, wrap_angle};
use crate::grid::GridStore;
use crate::params::Params;
use crate::types::{Cell, CellState, Pose, ScanPoint};
use std::f64::consts::PI;
use tracing::{trace, warn};

pub struct Mapper {
    params: Params,
}

impl Mapper {
    pub fn new(params: Params) -> Self {
        Self { params }
    }

    /// Compute the 360 scan endpoints in world coordinates for the given
    /// pose and raw ranges. Beam `i`'s angle is
    /// `heading + (beam_span/2 - i*beam_step)`, plus `pi` when `backwards` is
    /// configured (§4.3 step 1: the sensor is mounted facing the opposite
    /// direction of travel, so the whole fan rotates with it).
    pub fn scan_endpoints(&self, pose: Pose, ranges: &[f32]) -> Vec<ScanPoint> {
        let half_span = self.params.beam_span / 2.0;
        let step = self.params.beam_step();
        ranges
            .iter()
            .enumerate()
            .map(|(i, &range)| {
                let mut a = pose.heading + (half_span - i as f64 * step);
                if self.params.backwards {
                    a += PI;
                }
                let a = wrap_angle(a);
                let range = range as f64;
                let effective = range.min(self.params.lidar_max_range);
                ScanPoint {
                    beam_angle: a,
                    range,
                    x: pose.x + effective * a.sin(),
                    y: pose.y - effective * a.cos(),
                }
            })
            .collect()
    }

    /// Run one full mapper tick: carve free space, stamp obstacles, dilate,
    /// and publish both grids.
    pub fn tick(&self, store: &GridStore, pose: Pose, ranges: &[f32]) {
        let scan = self.scan_endpoints(pose, ranges);
        let mut occ = store.snapshot_occupancy();

        self.carve_free_space(&mut occ, store, pose, &scan);
        self.stamp_obstacles(&mut occ, store, &scan);

        let planning = store.dilate(&occ, self.params.r_inflate);
        store.publish_occupancy(occ);
        store.publish_planning(planning);
        trace!(x = pose.x, y = pose.y, heading = pose.heading, "mapper tick published");
    }

    fn carve_free_space(&self, occ: &mut [u8], store: &GridStore, pose: Pose, scan: &[ScanPoint]) {
        let margin = self.params.beam_margin;
        let upper = scan.len().saturating_sub(margin);
        for i in margin..upper.saturating_sub(1) {
            let a = &scan[i];
            let b = &scan[i + 1];
            fill_triangle_free(occ, store, (pose.x, pose.y), (a.x, a.y), (b.x, b.y));
        }
    }

    fn stamp_obstacles(&self, occ: &mut [u8], store: &GridStore, scan: &[ScanPoint]) {
        for pair in scan.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            if a.range >= self.params.lidar_max_range || b.range >= self.params.lidar_max_range {
                continue;
            }
            if distance(a.x, a.y, b.x, b.y) >= self.params.obstacle_link_max_dist {
                continue;
            }
            if let (Some(ca), Some(cb)) = (store.world_to_cell(a.x, a.y), store.world_to_cell(b.x, b.y)) {
                for cell in bresenham_line(ca, cb) {
                    if cell.in_bounds(store.width(), store.height()) {
                        occ[cell.index(store.width())] = CellState::Occupied.as_byte();
                    }
                }
            }
        }
    }
}

/// Mark every cell inside the triangle `(origin, p1, p2)` as `Free`, using a
/// barycentric-sign test over the triangle's bounding box.
fn fill_triangle_free(
    occ: &mut [u8],
    store: &GridStore,
    origin: (f64, f64),
    p1: (f64, f64),
    p2: (f64, f64),
) {
    let pts = [origin, p1, p2];
    let cells: Vec<Option<Cell>> = pts.iter().map(|&(x, y)| store.world_to_cell(x, y)).collect();
    let (c0, c1, c2) = match (cells[0], cells[1], cells[2]) {
        (Some(a), Some(b), Some(c)) => (a, b, c),
        _ => {
            warn!("free-space triangle dropped: endpoint outside grid bounds");
            return;
        }
    };

    let min_x = c0.x.min(c1.x).min(c2.x).max(0);
    let max_x = c0.x.max(c1.x).max(c2.x).min(store.width() as i32 - 1);
    let min_y = c0.y.min(c1.y).min(c2.y).max(0);
    let max_y = c0.y.max(c1.y).max(c2.y).min(store.height() as i32 - 1);

    for y in min_y..=max_y {
        for x in min_x..=max_x {
            if point_in_triangle((x, y), c0, c1, c2) {
                let cell = Cell::new(x, y);
                occ[cell.index(store.width())] = CellState::Free.as_byte();
            }
        }
    }
}

fn sign(p: (i32, i32), a: Cell, b: Cell) -> i64 {
    (p.0 as i64 - b.x as i64) * (a.y as i64 - b.y as i64)
        - (a.x as i64 - b.x as i64) * (p.1 as i64 - b.y as i64)
}

fn point_in_triangle(p: (i32, i32), a: Cell, b: Cell, c: Cell) -> bool {
    let d1 = sign(p, a, b);
    let d2 = sign(p, b, c);
    let d3 = sign(p, c, a);

    let has_neg = d1 < 0 || d2 < 0 || d3 < 0;
    let has_pos = d1 > 0 || d2 > 0 || d3 > 0;
    !(has_neg && has_pos)
}

/// Integer Bresenham line between two grid cells, both endpoints included.
pub fn bresenham_line(from: Cell, to: Cell) -> Vec<Cell> {
    let mut cells = Vec::new();
    let (mut x0, mut y0) = (from.x, from.y);
    let (x1, y1) = (to.x, to.y);
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        cells.push(Cell::new(x0, y0));
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
    cells
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> Params {
        Params {
            grid_w: 200,
            grid_h: 200,
            cell_size: 0.1,
            beams: 8,
            beam_span: PI / 2.0,
            beam_margin: 1,
            lidar_max_range: 8.0,
            obstacle_link_max_dist: 0.25,
            r_inflate: 2,
            ..Default::default()
        }
    }

    #[test]
    fn scan_endpoints_count_matches_ranges() {
        let mapper = Mapper::new(params());
        let ranges = vec![1.0f32; 8];
        let scan = mapper.scan_endpoints(Pose::default(), &ranges);
        assert_eq!(scan.len(), 8);
    }

    #[test]
    fn backwards_mode_rotates_beam_fan_by_pi() {
        let forward = Mapper::new(params());
        let mut backward_params = params();
        backward_params.backwards = true;
        let backward = Mapper::new(backward_params);

        let ranges = vec![2.0f32; 8];
        let fwd_scan = forward.scan_endpoints(Pose::default(), &ranges);
        let back_scan = backward.scan_endpoints(Pose::default(), &ranges);

        for (f, b) in fwd_scan.iter().zip(back_scan.iter()) {
            assert_relative_eq_pt(b.x, -f.x);
            assert_relative_eq_pt(b.y, -f.y);
        }
    }

    fn assert_relative_eq_pt(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{a} != {b}");
    }

    #[test]
    fn no_return_beam_is_clamped_to_max_range_for_endpoint() {
        let mapper = Mapper::new(params());
        let mut ranges = vec![1.0f32; 8];
        ranges[0] = 100.0;
        let scan = mapper.scan_endpoints(Pose::default(), &ranges);
        let expected_dist = mapper.params.lidar_max_range;
        let d = distance(0.0, 0.0, scan[0].x, scan[0].y);
        assert!((d - expected_dist).abs() < 1e-6);
    }

    #[test]
    fn tick_carves_free_space_in_front_of_robot() {
        let p = params();
        let store = GridStore::new(&p);
        let mapper = Mapper::new(p.clone());
        let ranges = vec![2.0f32; 8];
        mapper.tick(&store, Pose::default(), &ranges);

        let center = Cell::new((p.grid_w / 2) as i32, (p.grid_h / 2) as i32);
        assert_eq!(store.get_occupancy(center), CellState::Free);
    }

    #[test]
    fn tick_stamps_obstacle_between_close_consecutive_short_beams() {
        let p = params();
        let store = GridStore::new(&p);
        let mapper = Mapper::new(p.clone());
        // every beam short and consistent => consecutive endpoints are close together.
        let ranges = vec![1.0f32; 8];
        mapper.tick(&store, Pose::default(), &ranges);

        let (_, version) = store.snapshot_planning();
        assert_eq!(version, 1);
    }

    #[test]
    fn obstacle_not_stamped_when_beams_too_far_apart() {
        let p = params();
        let store = GridStore::new(&p);
        let mapper = Mapper::new(p.clone());
        let mut ranges = vec![1.0f32; 8];
        ranges[4] = 6.0; // creates a large gap to its neighbors
        mapper.tick(&store, Pose::default(), &ranges);
        // Should not panic and should still publish.
        let (occ_planning, version) = store.snapshot_planning();
        assert_eq!(version, 1);
        assert_eq!(occ_planning.len(), p.grid_w * p.grid_h);
    }

    #[test]
    fn bresenham_line_endpoints_included() {
        let line = bresenham_line(Cell::new(0, 0), Cell::new(3, 0));
        assert_eq!(line.first(), Some(&Cell::new(0, 0)));
        assert_eq!(line.last(), Some(&Cell::new(3, 0)));
        assert_eq!(line.len(), 4);
    }

    #[test]
    fn bresenham_line_diagonal() {
        let line = bresenham_line(Cell::new(0, 0), Cell::new(3, 3));
        assert_eq!(line.len(), 4);
    }

    #[test]
    fn point_in_triangle_detects_centroid() {
        let a = Cell::new(0, 0);
        let b = Cell::new(10, 0);
        let c = Cell::new(0, 10);
        assert!(point_in_triangle((2, 2), a, b, c));
        assert!(!point_in_triangle((9, 9), a, b, c));
    }
}

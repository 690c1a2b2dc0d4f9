//! Navigation constants gathered into a value so tests can vary them without
//! touching globals.

/// Tri-state occupancy grid + binary planning grid dimensions, follower
/// thresholds and PID gains, and the telemetry/motor wire parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Params {
    /// Grid width in cells.
    pub grid_w: usize,
    /// Grid height in cells.
    pub grid_h: usize,
    /// Cell edge length, meters.
    pub cell_size: f64,
    /// Telemetry tick period, seconds.
    pub dt: f64,
    /// Beams with range at or above this are "no return".
    pub lidar_max_range: f64,
    /// Safety inflation radius, in cells.
    pub r_inflate: i32,
    /// Number of lidar beams per scan.
    pub beams: usize,
    /// Sensor span, radians (90 degrees forward, centered).
    pub beam_span: f64,
    /// Free-space-carving beam margin: skip this many beams at each end.
    pub beam_margin: usize,
    /// Max Euclidean distance (meters) between consecutive beam endpoints to
    /// stamp an obstacle segment between them.
    pub obstacle_link_max_dist: f64,
    /// Dead-reckoning linear encoder multiplier.
    pub encoder_linear_multiplier: f64,
    /// Motor mounted in reverse: negates every linear command the follower
    /// sends, matching `solution_1/movement.cpp`'s `#ifdef BACKWARDS` guard.
    pub backwards: bool,

    // Path follower thresholds (§4.5).
    pub linear_speed: f64,
    pub turning_speed: f64,
    pub turning_slowdown_distance: f64,
    pub linear_precision: f64,
    pub angular_precision: f64,
    /// Cornering radius used to fillet a turn between two path legs
    /// (`turn_start_distance = |r * tan(delta_a/2)|`,
    /// `turn_arc_length = |r * delta_a|`). The original's `PathPoint::r` was
    /// produced by code the retrieval pack didn't preserve; kept here as a
    /// fixed spec constant rather than guessed per-waypoint.
    pub corner_radius: f64,

    // PID gains (§4.5).
    pub turning_kp: f64,
    pub turning_max_p: f64,
    pub turning_kd: f64,
    pub driving_kp: f64,
    pub driving_max_p: f64,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            grid_w: 500,
            grid_h: 500,
            cell_size: 0.02,
            dt: 0.032,
            lidar_max_range: 8.0,
            r_inflate: 10,
            beams: 360,
            beam_span: std::f64::consts::FRAC_PI_2,
            beam_margin: 3,
            obstacle_link_max_dist: 0.25,
            encoder_linear_multiplier: 1.0,
            backwards: false,

            linear_speed: 1.0,
            turning_speed: 0.3,
            turning_slowdown_distance: 0.5,
            linear_precision: 0.1,
            angular_precision: 0.1,
            corner_radius: 0.3,

            turning_kp: 12.0,
            turning_max_p: 3.0,
            turning_kd: 6.0,
            driving_kp: 50.0,
            driving_max_p: 1.0,
        }
    }
}

impl Params {
    /// Per-beam angular step, derived from span and beam count (quarter
    /// degree resolution with the spec's 360 beams over 90 degrees).
    pub fn beam_step(&self) -> f64 {
        self.beam_span / (self.beams as f64)
    }
}

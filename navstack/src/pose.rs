//! Pose Estimator (§4.2): dead reckoning from per-frame gyro yaw-rate and an
//! encoder-derived linear displacement emulated from the wire's raw
//! ground-truth position. No filtering, no covariance — the original C++
//! `update_telemetry` is a direct integrator, and that is all the spec asks
//! for.

use crate::geometry::{distance, wrap_angle};
use crate::params::Params;
use crate::types::Pose;

#[derive(Debug, Clone)]
pub struct PoseEstimator {
    pose: Pose,
    prev_raw: Option<(f64, f64)>,
    encoder_linear_multiplier: f64,
    dt: f64,
}

impl PoseEstimator {
    pub fn new(params: &Params) -> Self {
        Self {
            pose: Pose::default(),
            prev_raw: None,
            encoder_linear_multiplier: params.encoder_linear_multiplier,
            dt: params.dt,
        }
    }

    pub fn pose(&self) -> Pose {
        self.pose
    }

    /// Integrate one telemetry frame. `gy` is yaw rate (rad/s); `raw_x`,
    /// `raw_y` are the wire's ground-truth simulator position, used only to
    /// emulate what an encoder would report (`ds := |raw - prev_raw| *
    /// encoder_linear_multiplier`, signed by `vx`'s sign) — never read as
    /// the robot's actual pose. The first frame after construction has no
    /// previous sample, so it reports zero displacement.
    pub fn update(&mut self, gy: f64, raw_x: f64, raw_y: f64, vx: f64) -> Pose {
        let step = match self.prev_raw {
            Some((px, py)) => distance(raw_x, raw_y, px, py),
            None => 0.0,
        };
        self.prev_raw = Some((raw_x, raw_y));

        let sign = if vx < 0.0 { -1.0 } else { 1.0 };
        let ds = step * self.encoder_linear_multiplier * sign;

        self.pose.heading = wrap_angle(self.pose.heading - gy * self.dt);
        self.pose.x += ds * self.pose.heading.sin();
        self.pose.y -= ds * self.pose.heading.cos();
        self.pose.speed = ds / self.dt;

        self.pose
    }
}

//! Path follower: a `ManualControl`/`PathFollowing` state machine driving
//! align -> drive -> slow-drive -> arc-turn per waypoint, with a PID control
//! law using derivative-on-measurement (damping the measured heading's rate
//! of change rather than the error's, so a waypoint switch never causes a
//! derivative kick).
//!
//! The per-waypoint heading target is computed once, when the waypoint
//! becomes active, and held fixed through drive/slow-drive (only the
//! arc-turn phase interpolates it) — this mirrors the original `followPath`,
//! which is a fixed-heading-leg traversal rather than a continuously
//! re-aimed pursuit.

use crate::geometry::{distance, wrap_angle};
use crate::grid::GridStore;
use crate::params::Params;
use crate::types::Pose;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use tracing::{debug, info};

/// Cooperative cancellation message for the follower thread (§5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowerMsg {
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FollowerState {
    ManualControl,
    PathFollowing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Align,
    Drive,
    SlowDrive,
    ArcTurn,
}

/// A linear/angular velocity command ready for motor egress.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotorCmd {
    pub v: f64,
    pub w: f64,
}

impl MotorCmd {
    pub fn zero() -> Self {
        Self { v: 0.0, w: 0.0 }
    }
}

/// Target heading to aim at point `(tx, ty)` from `(x, y)`: `atan2(dx, -dy)`
/// (heading 0 faces -Y, per the pose estimator's convention, §4.5).
fn align_heading(x: f64, y: f64, tx: f64, ty: f64) -> f64 {
    wrap_angle((tx - x).atan2(-(ty - y)))
}

/// Per-waypoint job state: the fixed heading target for this leg, and (for
/// non-terminal waypoints) the precomputed fillet geometry for the upcoming
/// turn into the next leg (§4.5 step 2-4).
struct Job {
    index: usize,
    phase: Phase,
    is_final: bool,
    leg_heading: f64,
    turn_end_heading: f64,
    turn_delta_a: f64,
    turn_start_distance: f64,
    turn_arc_length: f64,
    turn_progress: f64,
}

enum TickOutcome {
    Cmd(MotorCmd),
    WaypointDone,
}

impl Job {
    /// Begin tracking `path[index]`: compute the fixed leg heading, and (if
    /// not the last waypoint) the turn geometry into `path[index + 1]`.
    /// Enters `Drive` directly when the robot is already within
    /// `angular_precision` of the leg heading (§4.5 step 1 is conditional).
    fn begin(path: &[(f64, f64)], index: usize, pose: Pose, params: &Params) -> Self {
        let (tx, ty) = path[index];
        let leg_heading = align_heading(pose.x, pose.y, tx, ty);
        let is_final = index + 1 >= path.len();

        let (turn_end_heading, turn_delta_a, turn_start_distance, turn_arc_length) = if is_final {
            (leg_heading, 0.0, 0.0, 0.0)
        } else {
            let (nx, ny) = path[index + 1];
            let end_heading = align_heading(tx, ty, nx, ny);
            let delta = wrap_angle(end_heading - leg_heading);
            let r = params.corner_radius;
            (
                end_heading,
                delta,
                (r * (delta / 2.0).tan()).abs(),
                (r * delta).abs(),
            )
        };

        let phase = if wrap_angle(pose.heading - leg_heading).abs() > params.angular_precision {
            Phase::Align
        } else {
            Phase::Drive
        };

        Self {
            index,
            phase,
            is_final,
            leg_heading,
            turn_end_heading,
            turn_delta_a,
            turn_start_distance,
            turn_arc_length,
            turn_progress: 0.0,
        }
    }
}

pub struct PathFollower {
    params: Params,
    state: FollowerState,
    prev_heading: Option<f64>,
}

impl PathFollower {
    pub fn new(params: Params) -> Self {
        Self {
            params,
            state: FollowerState::ManualControl,
            prev_heading: None,
        }
    }

    /// Turning P (on error) + D (on measurement), clamped (§4.5 PID law).
    /// Derivative-on-measurement: damps `heading`'s own rate of change
    /// rather than the error's, so switching targets never causes a kick.
    fn turning_pid(&mut self, heading: f64, heading_error: f64) -> f64 {
        let rate = match self.prev_heading {
            Some(prev) => wrap_angle(heading - prev) / self.params.dt,
            None => 0.0,
        };
        self.prev_heading = Some(heading);
        let p = (-heading_error * self.params.turning_kp)
            .clamp(-self.params.turning_max_p, self.params.turning_max_p);
        let d = rate * self.params.turning_kd;
        p + d
    }

    /// Driving P: zero when `target_v` is zero (hold position during
    /// align), otherwise clamped proportional speed error (§4.5 PID law).
    /// Only used by the slow-drive phase's distance-proportional crawl; the
    /// drive/arc-turn phases command the fixed `linear_speed`/`turning_speed`
    /// targets directly, matching the original's `target_v` assignments.
    fn driving_p(&self, speed: f64, target_v: f64) -> f64 {
        if target_v == 0.0 {
            0.0
        } else {
            (-(speed - target_v) * self.params.driving_kp)
                .clamp(-self.params.driving_max_p, self.params.driving_max_p)
        }
    }

    fn signed_linear(&self, v: f64) -> f64 {
        if self.params.backwards {
            -v
        } else {
            v
        }
    }

    /// Advance one waypoint-job tick. Returns the motor command for this
    /// telemetry tick, or signals that the current waypoint is complete so
    /// the caller can begin the next one (or end the path).
    fn tick(&mut self, job: &mut Job, pose: Pose, path: &[(f64, f64)]) -> TickOutcome {
        let (tx, ty) = path[job.index];
        let dist = distance(pose.x, pose.y, tx, ty);

        match job.phase {
            Phase::Align => {
                let err = wrap_angle(job.leg_heading - pose.heading);
                let w = self.turning_pid(pose.heading, err);
                if err.abs() <= self.params.angular_precision {
                    job.phase = Phase::Drive;
                }
                TickOutcome::Cmd(MotorCmd { v: 0.0, w })
            }
            Phase::Drive => {
                let err = wrap_angle(job.leg_heading - pose.heading);
                let w = self.turning_pid(pose.heading, err);
                if job.is_final {
                    if dist <= self.params.linear_precision {
                        return TickOutcome::WaypointDone;
                    }
                } else if dist <= job.turn_start_distance + self.params.turning_slowdown_distance {
                    job.phase = Phase::SlowDrive;
                }
                TickOutcome::Cmd(MotorCmd {
                    v: self.signed_linear(self.driving_velocity(self.params.linear_speed, pose)),
                    w,
                })
            }
            Phase::SlowDrive => {
                let err = wrap_angle(job.leg_heading - pose.heading);
                let w = self.turning_pid(pose.heading, err);
                if dist <= self.params.linear_precision + job.turn_start_distance {
                    if job.turn_arc_length == 0.0 {
                        // Impossible arc (§7): skip arc-turn, snap heading.
                        job.leg_heading = job.turn_end_heading;
                        return TickOutcome::WaypointDone;
                    }
                    job.phase = Phase::ArcTurn;
                }
                TickOutcome::Cmd(MotorCmd {
                    v: self.signed_linear(self.driving_velocity(self.params.turning_speed, pose)),
                    w,
                })
            }
            Phase::ArcTurn => {
                let target_a =
                    job.leg_heading + job.turn_delta_a * job.turn_progress.clamp(0.0, 1.0);
                let err = wrap_angle(target_a - pose.heading);
                let w = self.turning_pid(pose.heading, err);
                job.turn_progress += pose.speed * self.params.dt / job.turn_arc_length;
                if job.turn_progress >= 1.0 {
                    return TickOutcome::WaypointDone;
                }
                TickOutcome::Cmd(MotorCmd {
                    v: self.signed_linear(self.driving_velocity(self.params.turning_speed, pose)),
                    w,
                })
            }
        }
    }

    /// The linear command actually sent is the driving-P output itself, not
    /// `target_v` — the original sends `driving_p` (clamped to
    /// `DRIVING_MAX_P`), which saturates near the target while the speed
    /// error is large and tapers as measured speed approaches it.
    fn driving_velocity(&self, target_v: f64, pose: Pose) -> f64 {
        self.driving_p(pose.speed, target_v)
    }

    fn check_stop(rx: &Receiver<FollowerMsg>) -> bool {
        matches!(rx.try_recv(), Ok(FollowerMsg::Stop))
    }

    /// Drive the follower thread (§5 T3): spins on `telemetry_updated`,
    /// polls `stop_rx` for cancellation at every phase-loop iteration and
    /// at the wait exit, and acquires a newly published path whenever it is
    /// in `ManualControl`.
    pub fn run(
        &mut self,
        store: &GridStore,
        pose_provider: impl Fn() -> Pose,
        telemetry_updated: &AtomicBool,
        stop_rx: &Receiver<FollowerMsg>,
        mut send: impl FnMut(MotorCmd),
        running: &AtomicBool,
    ) {
        let mut path: Vec<(f64, f64)> = Vec::new();
        let mut job: Option<Job> = None;

        while running.load(Ordering::Relaxed) {
            loop {
                if !running.load(Ordering::Relaxed) {
                    return;
                }
                if Self::check_stop(stop_rx) {
                    self.state = FollowerState::ManualControl;
                    job = None;
                    send(MotorCmd::zero());
                }
                if telemetry_updated.swap(false, Ordering::AcqRel) {
                    break;
                }
                std::thread::yield_now();
            }

            if Self::check_stop(stop_rx) {
                self.state = FollowerState::ManualControl;
                job = None;
                send(MotorCmd::zero());
                continue;
            }

            if self.state == FollowerState::ManualControl {
                let (_, published) = store.read_path();
                // A published path always includes the start point (§3); the
                // follower tracks waypoints from index 1 onward (§4.5).
                if published.len() < 2 {
                    continue;
                }
                let pose = pose_provider();
                job = Some(Job::begin(&published, 1, pose, &self.params));
                path = published;
                self.state = FollowerState::PathFollowing;
                info!(waypoints = path.len(), "path acquired");
            }

            let pose = pose_provider();
            if job.is_none() {
                continue;
            }

            // A waypoint transition starts the next leg's job immediately and
            // re-ticks it in the same telemetry cycle, rather than emitting a
            // zero-velocity command between legs (§4.5 step 5 reserves that
            // for `Stop`; `path.cpp`'s `followPath` never stops between
            // waypoints either — `target_v`/`target_a` just update).
            loop {
                let current = job.as_mut().expect("checked Some above");
                match self.tick(current, pose, &path) {
                    TickOutcome::Cmd(cmd) => {
                        send(cmd);
                        break;
                    }
                    TickOutcome::WaypointDone => {
                        let next_index = current.index + 1;
                        if next_index >= path.len() {
                            debug!("path complete");
                            self.state = FollowerState::ManualControl;
                            job = None;
                            send(MotorCmd::zero());
                            break;
                        }
                        job = Some(Job::begin(&path, next_index, pose, &self.params));
                    }
                }
            }
        }
    }
}

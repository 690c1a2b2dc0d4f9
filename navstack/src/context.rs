//! `NavContext`: the shared state `T1`/`T2`/`T3` coordinate through, one
//! owned struct instead of global mutable state. Holds the `GridStore`, the
//! cooperative shutdown flag, the `telemetry_updated` edge flag `T3` spins
//! on, the latest pose, and the active goal.

use crate::follower::FollowerMsg;
use crate::grid::GridStore;
use crate::params::Params;
use crate::types::{Cell, Pose};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};

pub struct NavContext {
    pub grid: GridStore,
    pub params: Params,
    pub running: Arc<AtomicBool>,
    pub telemetry_updated: Arc<AtomicBool>,
    pose: Mutex<Pose>,
    goal: Mutex<Option<Cell>>,
    stop_tx: mpsc::Sender<FollowerMsg>,
}

impl NavContext {
    pub fn new(params: Params) -> (Self, mpsc::Receiver<FollowerMsg>) {
        let (stop_tx, stop_rx) = mpsc::channel();
        let ctx = Self {
            grid: GridStore::new(&params),
            params,
            running: Arc::new(AtomicBool::new(true)),
            telemetry_updated: Arc::new(AtomicBool::new(false)),
            pose: Mutex::new(Pose::default()),
            goal: Mutex::new(None),
            stop_tx,
        };
        (ctx, stop_rx)
    }

    /// Called by `T1` after each pose-estimator update: publishes the new
    /// pose and signals the `telemetry_updated` edge `T3` waits on.
    pub fn set_pose(&self, pose: Pose) {
        *self.pose.lock() = pose;
        self.telemetry_updated.store(true, Ordering::Release);
    }

    pub fn pose(&self) -> Pose {
        *self.pose.lock()
    }

    pub fn set_goal(&self, goal: Cell) {
        *self.goal.lock() = Some(goal);
    }

    pub fn goal(&self) -> Option<Cell> {
        *self.goal.lock()
    }

    pub fn request_stop(&self) {
        let _ = self.stop_tx.send(FollowerMsg::Stop);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_pose_raises_telemetry_updated_edge() {
        let (ctx, _rx) = NavContext::new(Params::default());
        assert!(!ctx.telemetry_updated.load(Ordering::Acquire));
        ctx.set_pose(Pose::default());
        assert!(ctx.telemetry_updated.load(Ordering::Acquire));
    }

    #[test]
    fn goal_starts_unset() {
        let (ctx, _rx) = NavContext::new(Params::default());
        assert_eq!(ctx.goal(), None);
        ctx.set_goal(Cell::new(1, 2));
        assert_eq!(ctx.goal(), Some(Cell::new(1, 2)));
    }

    #[test]
    fn request_stop_is_observed_by_receiver() {
        let (ctx, rx) = NavContext::new(Params::default());
        ctx.request_stop();
        assert_eq!(rx.try_recv().unwrap(), FollowerMsg::Stop);
    }
}

//! Navigation stack entry point: binds the telemetry/motor endpoints,
//! spawns the planner (`T2`) and follower (`T3`) threads, and runs
//! ingress + pose estimation + mapping (`T1`) on the main thread (§5, §6).

mod config;
mod context;
mod error;
mod follower;
mod geometry;
mod grid;
mod mapper;
mod motor;
mod params;
mod planner;
mod pose;
mod telemetry;
mod types;

use config::NavSettings;
use context::NavContext;
use error::NavError;
use follower::PathFollower;
use mapper::Mapper;
use planner::Planner;
use pose::PoseEstimator;
use std::net::{TcpListener, UdpSocket};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{error, info};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let settings = NavSettings::from_env();
    let (ctx, stop_rx) = NavContext::new(settings.params);
    let ctx = Arc::new(ctx);

    {
        let ctx = Arc::clone(&ctx);
        ctrlc::set_handler(move || {
            info!("ctrl+c received, shutting down");
            ctx.running.store(false, Ordering::Relaxed);
        })?;
    }

    info!(addr = %settings.config.telemetry_addr(), "binding telemetry listener");
    let listener = TcpListener::bind(settings.config.telemetry_addr())?;
    let (stream, peer) = listener.accept()?;
    info!(%peer, "telemetry connection accepted");

    let motor_socket = UdpSocket::bind("0.0.0.0:0")?;
    let motor_addr = settings.config.motor_addr();
    info!(addr = %motor_addr, "motor egress ready");

    // T2: planner.
    let planner_handle = {
        let ctx = Arc::clone(&ctx);
        std::thread::spawn(move || {
            let mut planner = Planner::new(&ctx.params);
            planner.run(
                &ctx.grid,
                || ctx.grid.world_to_cell(ctx.pose().x, ctx.pose().y),
                || ctx.goal(),
                &ctx.running,
            );
            info!("planner thread exiting");
        })
    };

    // T3: follower.
    let follower_handle = {
        let ctx = Arc::clone(&ctx);
        std::thread::spawn(move || {
            let mut follower = PathFollower::new(ctx.params);
            follower.run(
                &ctx.grid,
                || ctx.pose(),
                &ctx.telemetry_updated,
                &stop_rx,
                |cmd| {
                    if let Err(e) = motor::send(&motor_socket, &motor_addr, cmd) {
                        error!(error = %e, "motor egress send failed");
                    }
                },
                &ctx.running,
            );
            info!("follower thread exiting");
        })
    };

    // T1: ingress + pose estimation + mapping, on the main thread.
    let result = run_ingress(Arc::clone(&ctx), stream);

    ctx.running.store(false, Ordering::Relaxed);
    ctx.request_stop();
    ctx.grid.publish_planning(ctx.grid.snapshot_planning().0); // wake planner's condvar wait
    let _ = planner_handle.join();
    let _ = follower_handle.join();

    match result {
        Ok(()) => {
            info!("ingress loop exited cleanly");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "telemetry ingress failed");
            std::process::exit(1);
        }
    }
}

fn run_ingress(ctx: Arc<NavContext>, mut stream: std::net::TcpStream) -> Result<(), NavError> {
    let mut estimator = PoseEstimator::new(&ctx.params);
    let mapper = Mapper::new(ctx.params);

    while ctx.running.load(Ordering::Relaxed) {
        let frame = match telemetry::read_frame(&mut stream) {
            Ok(frame) => frame,
            Err(e) if !ctx.running.load(Ordering::Relaxed) => {
                info!("ingress stopped during shutdown: {e}");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let pose = estimator.update(
            frame.gy as f64,
            frame.x as f64,
            frame.y as f64,
            frame.vx as f64,
        );
        ctx.set_pose(pose);
        mapper.tick(&ctx.grid, pose, &frame.ranges);

        tracing::debug!(
            x = pose.x,
            y = pose.y,
            heading = pose.heading,
            "telemetry tick"
        );
    }
    Ok(())
}

//! Motor egress (§4.7): pack `(v, w)` as little-endian `f32` pairs and send
//! over UDP to the configured motor endpoint.

use crate::follower::MotorCmd;
use std::io;
use std::net::UdpSocket;

pub const COMMAND_SIZE: usize = 8;

pub fn encode(cmd: MotorCmd) -> [u8; COMMAND_SIZE] {
    let mut buf = [0u8; COMMAND_SIZE];
    buf[0..4].copy_from_slice(&(cmd.v as f32).to_le_bytes());
    buf[4..8].copy_from_slice(&(cmd.w as f32).to_le_bytes());
    buf
}

pub fn send(socket: &UdpSocket, addr: &str, cmd: MotorCmd) -> io::Result<()> {
    let buf = encode(cmd);
    socket.send_to(&buf, addr)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_packs_little_endian_v_then_w() {
        let cmd = MotorCmd { v: 1.0, w: -0.5 };
        let buf = encode(cmd);
        let v = f32::from_le_bytes(buf[0..4].try_into().unwrap());
        let w = f32::from_le_bytes(buf[4..8].try_into().unwrap());
        assert_eq!(v, 1.0);
        assert_eq!(w, -0.5);
    }

    #[test]
    fn send_round_trips_over_loopback() {
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = receiver.local_addr().unwrap().to_string();

        send(&sender, &addr, MotorCmd { v: 0.75, w: 0.25 }).unwrap();

        let mut buf = [0u8; COMMAND_SIZE];
        let (n, _) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(n, COMMAND_SIZE);
        let v = f32::from_le_bytes(buf[0..4].try_into().unwrap());
        let w = f32::from_le_bytes(buf[4..8].try_into().unwrap());
        assert_eq!(v, 0.75);
        assert_eq!(w, 0.25);
    }
}

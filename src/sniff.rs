// src/sniff.rs
use pcap::{Active, Capture, Device};
use std::net::IpAddr;
use tracing::{debug, info};

use crate::error::Result;
use crate::models::domain::Frame;

/// Supplies captured frames to the capture engine.
pub trait FrameSource {
    /// Next captured frame, or `None` when the read timed out with nothing
    /// to deliver.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Address of the capture interface, resolved once at open time.
    fn local_address(&self) -> Option<IpAddr>;
}

/// Live capture from a network interface.
pub struct PcapSource {
    cap: Capture<Active>,
    local_address: Option<IpAddr>,
    next_id: u64,
}

impl PcapSource {
    pub fn open(interface: &str, port: u16) -> Result<Self> {
        let device = find_device(interface)?;
        let local_address = local_address_of(&device);
        let mut cap = create_capture(device)?;
        configure_capture(&mut cap, port)?;

        info!(interface, port, ?local_address, "capture started");
        Ok(PcapSource {
            cap,
            local_address,
            next_id: 0,
        })
    }
}

impl FrameSource for PcapSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        match self.cap.next_packet() {
            Ok(packet) => {
                let ts = packet.header.ts;
                let timestamp = ts.tv_sec as u64 * 1_000 + ts.tv_usec as u64 / 1_000;
                let frame = Frame::new(self.next_id, timestamp, packet.data.to_vec());
                self.next_id += 1;
                Ok(Some(frame))
            }
            Err(pcap::Error::TimeoutExpired) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn local_address(&self) -> Option<IpAddr> {
        self.local_address
    }
}

fn find_device(name: &str) -> Result<Device> {
    Device::list()?
        .into_iter()
        .find(|d| d.name == name)
        .ok_or_else(|| pcap::Error::PcapError(format!("no such device: {}", name)).into())
}

/// First IPv4 address of the device, falling back to whatever comes first.
fn local_address_of(device: &Device) -> Option<IpAddr> {
    let addrs: Vec<IpAddr> = device.addresses.iter().map(|a| a.addr).collect();
    debug!(device = %device.name, ?addrs, "device addresses");
    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
}

fn create_capture(device: Device) -> Result<Capture<Active>> {
    let cap = Capture::from_device(device)?
        .promisc(false)
        .snaplen(65535)
        .timeout(100) // lets the capture loop notice shutdown
        .immediate_mode(true)
        .open()?;
    Ok(cap)
}

fn configure_capture(cap: &mut Capture<Active>, port: u16) -> Result<()> {
    cap.filter(&format!("tcp port {}", port), true)?;
    Ok(())
}

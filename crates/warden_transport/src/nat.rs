//! # NAT Port Mapping
//!
//! Hosting behind a home router works only when the router forwards the
//! listening port. [`PortMapper`] asks for that forwarding; failure never
//! stops hosting.
//!
//! [`NatPmpMapper`] speaks NAT-PMP (RFC 6886) to a known gateway. A UPnP
//! mapper can be plugged in behind it through [`FallbackPortMapper`].

use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::poll::Deadline;

/// Requests external port forwarding.
pub trait PortMapper: Send {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Maps external UDP `port` to this host. Returns true on success.
    fn add_port_mapping(&mut self, port: u16) -> bool;

    /// Releases the mapping, if any.
    fn remove_port_mapping(&mut self);
}

/// Mapper that never maps anything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoPortMapping;

impl PortMapper for NoPortMapping {
    fn name(&self) -> &'static str {
        "none"
    }

    fn add_port_mapping(&mut self, _port: u16) -> bool {
        false
    }

    fn remove_port_mapping(&mut self) {}
}

/// Tries mappers in order and remembers which one succeeded.
#[derive(Default)]
pub struct FallbackPortMapper {
    mappers: Vec<Box<dyn PortMapper>>,
    active: Option<usize>,
}

impl FallbackPortMapper {
    /// Creates an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a mapper to the chain.
    #[must_use]
    pub fn then(mut self, mapper: Box<dyn PortMapper>) -> Self {
        self.mappers.push(mapper);
        self
    }

    /// Name of the mapper holding the current mapping.
    #[must_use]
    pub fn active_name(&self) -> Option<&'static str> {
        self.active.map(|index| self.mappers[index].name())
    }
}

impl PortMapper for FallbackPortMapper {
    fn name(&self) -> &'static str {
        self.active_name().unwrap_or("fallback")
    }

    fn add_port_mapping(&mut self, port: u16) -> bool {
        for (index, mapper) in self.mappers.iter_mut().enumerate() {
            if mapper.add_port_mapping(port) {
                info!("port {} mapped via {}", port, mapper.name());
                self.active = Some(index);
                return true;
            }
            debug!("{} could not map port {}", mapper.name(), port);
        }
        false
    }

    fn remove_port_mapping(&mut self) {
        if let Some(index) = self.active.take() {
            self.mappers[index].remove_port_mapping();
        }
    }
}

/// NAT-PMP server port on the gateway.
pub const NAT_PMP_PORT: u16 = 5351;

const OPCODE_MAP_UDP: u8 = 1;
const RESPONSE_BIT: u8 = 128;
const FIRST_RETRY: Duration = Duration::from_millis(250);

/// NAT-PMP client for one UDP mapping.
#[derive(Debug)]
pub struct NatPmpMapper {
    gateway: SocketAddr,
    lifetime_secs: u32,
    timeout: Duration,
    mapped: Option<Mapping>,
}

/// A mapping granted by the gateway.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Mapping {
    /// Local port.
    pub internal_port: u16,
    /// Port reachable from outside.
    pub external_port: u16,
    /// Granted lifetime in seconds.
    pub lifetime_secs: u32,
}

impl NatPmpMapper {
    /// Mapper talking to `gateway` (usually the default router on port
    /// [`NAT_PMP_PORT`]).
    #[must_use]
    pub const fn new(gateway: SocketAddr) -> Self {
        Self {
            gateway,
            lifetime_secs: 7200,
            timeout: Duration::from_secs(2),
            mapped: None,
        }
    }

    /// Mapper for a gateway IPv4 address on the standard port.
    #[must_use]
    pub fn for_gateway(gateway: Ipv4Addr) -> Self {
        Self::new(SocketAddr::from((gateway, NAT_PMP_PORT)))
    }

    /// Overall time budget for one request.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Requested mapping lifetime.
    #[must_use]
    pub const fn with_lifetime(mut self, lifetime_secs: u32) -> Self {
        self.lifetime_secs = lifetime_secs;
        self
    }

    /// Current mapping.
    #[must_use]
    pub const fn mapping(&self) -> Option<Mapping> {
        self.mapped
    }

    fn request(&self, internal: u16, external: u16, lifetime: u32) -> io::Result<Mapping> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        let request = encode_request(internal, external, lifetime);
        let deadline = Deadline::after(self.timeout);
        let mut wait = FIRST_RETRY;
        let mut response = [0u8; 16];

        while !deadline.expired() {
            socket.send_to(&request, self.gateway)?;
            socket.set_read_timeout(Some(wait.min(deadline.remaining()).max(Duration::from_millis(1))))?;
            match socket.recv_from(&mut response) {
                Ok((len, from)) if from == self.gateway => {
                    return decode_response(&response[..len]);
                }
                Ok(_) => {}
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {}
                Err(e) => return Err(e),
            }
            wait *= 2;
        }
        Err(io::Error::new(io::ErrorKind::TimedOut, "gateway did not answer"))
    }
}

impl PortMapper for NatPmpMapper {
    fn name(&self) -> &'static str {
        "NAT-PMP"
    }

    fn add_port_mapping(&mut self, port: u16) -> bool {
        match self.request(port, port, self.lifetime_secs) {
            Ok(mapping) => {
                debug!(
                    "NAT-PMP mapped {} -> {} for {}s",
                    mapping.internal_port, mapping.external_port, mapping.lifetime_secs
                );
                self.mapped = Some(mapping);
                true
            }
            Err(e) => {
                warn!("NAT-PMP mapping of port {} via {} failed: {}", port, self.gateway, e);
                false
            }
        }
    }

    fn remove_port_mapping(&mut self) {
        if let Some(mapping) = self.mapped.take() {
            // Lifetime 0 with external port 0 deletes the mapping.
            if let Err(e) = self.request(mapping.internal_port, 0, 0) {
                debug!("NAT-PMP unmapping of port {} failed: {}", mapping.internal_port, e);
            }
        }
    }
}

fn encode_request(internal: u16, external: u16, lifetime: u32) -> [u8; 12] {
    let mut request = [0u8; 12];
    request[1] = OPCODE_MAP_UDP;
    request[4..6].copy_from_slice(&internal.to_be_bytes());
    request[6..8].copy_from_slice(&external.to_be_bytes());
    request[8..12].copy_from_slice(&lifetime.to_be_bytes());
    request
}

fn decode_response(response: &[u8]) -> io::Result<Mapping> {
    if response.len() < 16 || response[0] != 0 || response[1] != (OPCODE_MAP_UDP | RESPONSE_BIT) {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "malformed NAT-PMP response"));
    }
    let result = u16::from_be_bytes([response[2], response[3]]);
    if result != 0 {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            format!("gateway refused mapping (result code {result})"),
        ));
    }
    Ok(Mapping {
        internal_port: u16::from_be_bytes([response[8], response[9]]),
        external_port: u16::from_be_bytes([response[10], response[11]]),
        lifetime_secs: u32::from_be_bytes([response[12], response[13], response[14], response[15]]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    /// Answers `count` requests like a NAT-PMP gateway with `result`.
    fn fake_gateway(result: u16, count: usize) -> (SocketAddr, thread::JoinHandle<Vec<[u8; 12]>>) {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = socket.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let mut seen = Vec::new();
            for _ in 0..count {
                let mut request = [0u8; 12];
                let (_, from) = socket.recv_from(&mut request).unwrap();
                let mut response = [0u8; 16];
                response[1] = request[1] | RESPONSE_BIT;
                response[2..4].copy_from_slice(&result.to_be_bytes());
                response[8..10].copy_from_slice(&request[4..6]);
                response[10..12].copy_from_slice(&request[6..8]);
                response[12..16].copy_from_slice(&request[8..12]);
                socket.send_to(&response, from).unwrap();
                seen.push(request);
            }
            seen
        });
        (addr, handle)
    }

    #[test]
    fn test_request_layout() {
        let request = encode_request(5556, 5556, 7200);
        assert_eq!(request[0], 0);
        assert_eq!(request[1], 1);
        assert_eq!(&request[4..6], &5556u16.to_be_bytes());
        assert_eq!(&request[8..12], &7200u32.to_be_bytes());
    }

    #[test]
    fn test_maps_and_unmaps() {
        let (gateway, handle) = fake_gateway(0, 2);
        let mut mapper = NatPmpMapper::new(gateway).with_lifetime(60);

        assert!(mapper.add_port_mapping(5556));
        assert_eq!(
            mapper.mapping(),
            Some(Mapping { internal_port: 5556, external_port: 5556, lifetime_secs: 60 })
        );

        mapper.remove_port_mapping();
        assert!(mapper.mapping().is_none());

        let seen = handle.join().unwrap();
        assert_eq!(&seen[1][8..12], &0u32.to_be_bytes());
    }

    #[test]
    fn test_refusal_is_not_fatal() {
        let (gateway, handle) = fake_gateway(2, 1);
        let mut mapper = NatPmpMapper::new(gateway);
        assert!(!mapper.add_port_mapping(5556));
        handle.join().unwrap();
    }

    #[test]
    fn test_silent_gateway_times_out() {
        let silent = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut mapper = NatPmpMapper::new(silent.local_addr().unwrap())
            .with_timeout(Duration::from_millis(100));
        assert!(!mapper.add_port_mapping(5556));
    }

    struct Scripted {
        answer: bool,
        removed: std::sync::Arc<std::sync::atomic::AtomicBool>,
    }

    impl PortMapper for Scripted {
        fn name(&self) -> &'static str {
            if self.answer { "UPnP" } else { "NAT-PMP" }
        }

        fn add_port_mapping(&mut self, _port: u16) -> bool {
            self.answer
        }

        fn remove_port_mapping(&mut self) {
            self.removed.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[test]
    fn test_fallback_order() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let first_removed = Arc::new(AtomicBool::new(false));
        let second_removed = Arc::new(AtomicBool::new(false));
        let mut chain = FallbackPortMapper::new()
            .then(Box::new(Scripted { answer: false, removed: first_removed.clone() }))
            .then(Box::new(Scripted { answer: true, removed: second_removed.clone() }));

        assert_eq!(chain.name(), "fallback");
        assert!(chain.add_port_mapping(5556));
        assert_eq!(chain.active_name(), Some("UPnP"));
        assert_eq!(chain.name(), "UPnP");

        chain.remove_port_mapping();
        assert!(!first_removed.load(Ordering::SeqCst));
        assert!(second_removed.load(Ordering::SeqCst));
        assert!(chain.active_name().is_none());
    }

    #[test]
    fn test_empty_chain_fails_softly() {
        assert!(!FallbackPortMapper::new().add_port_mapping(1));
        assert!(!NoPortMapping.add_port_mapping(1));
    }
}

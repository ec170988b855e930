//! Host port allocation for the tooling server.

use std::net::{Ipv4Addr, SocketAddr, TcpListener};

/// Hands out host ports that are free at the moment of the call.
///
/// The listener is dropped before the engine binds the port, so another
/// process can grab it in between. Callers treat a port conflict at container
/// start as retryable and allocate again.
#[derive(Debug, Clone, Copy, Default)]
pub struct PortAllocator;

impl PortAllocator {
    /// Bind port 0 on all interfaces, read back the assigned port, release it.
    pub fn allocate(&self) -> std::io::Result<u16> {
        let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)))?;
        let port = listener.local_addr()?.port();
        drop(listener);
        tracing::trace!(port, "Allocated host port");
        Ok(port)
    }
}

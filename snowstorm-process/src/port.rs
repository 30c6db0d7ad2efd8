use snowstorm_core::error::Result;
use std::net::{Ipv4Addr, TcpListener};

/// Asks the OS for a free TCP port on the loopback interface.
///
/// The port is released before returning, so another process may grab it
/// first; good enough for picking a server port in tests.
pub fn unused_local_port() -> Result<u16> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
    Ok(listener.local_addr()?.port())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unused_port_is_bindable() {
        let port = unused_local_port().unwrap();
        assert_ne!(port, 0);
        TcpListener::bind((Ipv4Addr::LOCALHOST, port)).unwrap();
    }
}

//! Shared host-resource helpers.

use std::fs;
use std::net::TcpListener;
use std::path::Path;

use crate::error::{Error, Result};

/// Allocate a free local TCP port.
///
/// Binds port 0 on the loopback interface and reads back the port the OS
/// picked. The listener is dropped before returning, so the port is only
/// reserved in the sense that it was free a moment ago; ports are drawn from
/// the ephemeral range and never recycled by this crate.
pub fn allocate_free_port() -> Result<u16> {
    let listener =
        TcpListener::bind(("127.0.0.1", 0)).map_err(|source| Error::PortAllocation { source })?;
    let port = listener
        .local_addr()
        .map_err(|source| Error::PortAllocation { source })?
        .port();
    Ok(port)
}

/// Create a directory and all of its parents if absent.
pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .map_err(|source| Error::io(format!("creating directory {}", path.display()), source))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_free_port_is_bindable() {
        let port = allocate_free_port().unwrap();
        assert!(port > 0);
        // The port was free, so binding it again should succeed.
        TcpListener::bind(("127.0.0.1", port)).unwrap();
    }

    #[test]
    fn test_allocate_free_port_varies() {
        // Hold listeners open so consecutive allocations cannot collide.
        let a = allocate_free_port().unwrap();
        let _hold = TcpListener::bind(("127.0.0.1", a)).unwrap();
        let b = allocate_free_port().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_ensure_dir_idempotent() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let nested = temp_dir.path().join("kinesis").join("deep");
        ensure_dir(&nested).unwrap();
        assert!(nested.is_dir());
        ensure_dir(&nested).unwrap();
    }
}

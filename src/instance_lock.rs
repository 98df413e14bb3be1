//! Single-instance guard.
//!
//! Two bridges on one P1 port would split its lines between them. On Linux
//! the guard binds an abstract-namespace Unix socket: the kernel releases it
//! when the process exits, so a crash never leaves a stale lock behind.

/// Holds the lock until dropped.
#[derive(Debug)]
pub struct InstanceLock {
    #[cfg(target_os = "linux")]
    _socket: std::os::unix::net::UnixListener,
    name: String,
}

impl InstanceLock {
    /// Takes the lock called `name`, failing if another process holds it.
    #[cfg(target_os = "linux")]
    pub fn acquire(name: &str) -> anyhow::Result<Self> {
        use anyhow::Context;
        use std::os::linux::net::SocketAddrExt;
        use std::os::unix::net::{SocketAddr, UnixListener};

        let address = SocketAddr::from_abstract_name(name.as_bytes())
            .with_context(|| format!("Invalid lock name {name}"))?;
        let socket = UnixListener::bind_addr(&address)
            .with_context(|| format!("{name} is held, is another instance running?"))?;
        tracing::debug!(name, "Instance lock acquired");
        Ok(Self {
            _socket: socket,
            name: name.to_string(),
        })
    }

    /// Abstract sockets are Linux only; elsewhere the guard is a no-op.
    #[cfg(not(target_os = "linux"))]
    pub fn acquire(name: &str) -> anyhow::Result<Self> {
        tracing::debug!(name, "No instance lock on this platform");
        Ok(Self {
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

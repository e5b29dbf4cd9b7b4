//! Host port allocation.
//!
//! Probing is best-effort: the bind is released immediately, so another
//! process can still grab the port before the runtime does. The container
//! lifecycle retries with a fresh free port when the runtime reports a
//! collision.

use std::net::TcpListener;

use fleet_common::Result;
use tracing::{info, warn};

/// Callers may only pin ports inside this window; anything else falls back
/// to an ephemeral allocation.
pub const PREFERRED_MIN: u16 = 10000;
pub const PREFERRED_MAX: u16 = 65535;

/// Bind port 0 and return whatever the OS hands out.
pub fn free_port() -> Result<u16> {
    let listener = TcpListener::bind(("0.0.0.0", 0))?;
    Ok(listener.local_addr()?.port())
}

/// Probe-only exclusive bind; the socket is dropped before returning.
pub fn is_port_free(port: u16) -> bool {
    TcpListener::bind(("0.0.0.0", port)).is_ok()
}

/// Pick an outer port, honoring `preferred` when it is inside the allowed
/// window and currently free.
pub fn allocate(preferred: Option<u16>) -> Result<u16> {
    let Some(preferred) = preferred else {
        let port = free_port()?;
        info!(port, "allocated a random free port");
        return Ok(port);
    };

    if preferred < PREFERRED_MIN {
        warn!(
            port = preferred,
            "preferred port outside {PREFERRED_MIN}..={PREFERRED_MAX}, falling back to a random free port"
        );
        return free_port();
    }
    if !is_port_free(preferred) {
        warn!(port = preferred, "preferred port occupied, falling back to a random free port");
        return free_port();
    }
    Ok(preferred)
}

/// Fresh port for a retry after the runtime rejected the previous one.
pub fn reallocate(rejected: u16) -> Result<u16> {
    warn!(port = rejected, "port seized before the runtime could bind it, picking a new one");
    free_port()
}

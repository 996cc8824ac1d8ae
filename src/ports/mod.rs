//! Port resolution: proactive allocation and reactive discovery.
//!
//! [`PortResolver`] avoids most host-port collisions before a container is
//! created. [`PortDiscovery`] finds the ephemeral host port a container ended
//! up on when nobody asked for a specific one. Discovery sweeps a whole
//! range with timed probes, so it only runs on demand.

mod discovery;
mod resolver;

pub use discovery::{IDENTITY_HEADER, PortDiscovery};
pub use resolver::{HostPortProbe, PortProbe, PortResolver};

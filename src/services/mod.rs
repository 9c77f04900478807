//! Business logic services
//!
//! This module contains business logic separated from HTTP concerns.
//! Services are stateless operations over injected paths and a
//! [`NetworkProbe`](crate::network_probe::NetworkProbe), so they can be
//! tested without touching the host.

pub mod dhcpcd;
pub mod error;
pub mod fs;
pub mod interface;
pub mod machine;
pub mod wifi;

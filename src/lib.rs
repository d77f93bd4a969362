//! Work dispatch for photon propagation.
//!
//! Clients submit steps to a broker, which hands them to workers that regroup them into
//! bunches sized for a conversion engine and route the outputs back to their callers.

pub use broker;
pub use client;
pub use comms;
pub use worker;

//! A pure Rust client for the NatNet streaming protocol, as spoken by
//! OptiTrack Motive and compatible motion-capture servers.
//!
//! The server publishes two kinds of payloads: per-frame tracking data
//! (marker sets, rigid bodies, skeletons, force plates, peripheral devices)
//! and a static description of the tracked scene. [`NatNetClient`] opens a
//! command channel and a data channel to the server, performs the initial
//! handshake, and decodes inbound packets at whatever protocol revision the
//! server advertises. Decoded records are delivered through event callbacks.

#![warn(
    anonymous_parameters,
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    trivial_casts,
    trivial_numeric_casts,
    unreachable_pub,
    unused_extern_crates,
    unused_qualifications
)]

pub mod client;
pub mod protocol;

pub use client::{ClientConfig, ClientError, NatNetClient};

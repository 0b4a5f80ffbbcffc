//! Replicated-drive abstraction for Pearl.
//!
//! The replication protocol and peer discovery are external capabilities.
//! This module describes them as traits and ships two backends:
//! an in-memory one (tests, demos, simulated peers) and a disk one
//! (single-device persistence with an exclusive storage lock).
//!
//! # Design Principles
//! - Backend isolation: no backend-specific logic in vault or notes code
//! - Async operations: all I/O is async
//! - Unified error semantics: missing files are `Error::NotFound`,
//!   storage held elsewhere is `Error::Locked`

pub mod disk;
pub mod drive;
pub mod local;
pub mod memory;

pub use disk::{DiskDrive, DiskDriveStore};
pub use drive::{
    Discovery, Drive, DriveEntry, DriveStore, FindingPeers, JoinOptions, PeerConnection, Swarm,
    SwarmEvent, SwarmFactory,
};
pub use local::LocalFolder;
pub use memory::{MemoryDrive, MemoryDriveStore, MemoryNetwork, MemorySwarm};

//! loopcheck-core: protocol constants, shared types, configuration and
//! trace parsing. All other loopcheck crates depend on this one.

pub mod config;
pub mod protocol;
pub mod trace;

pub use config::{ChunkingPolicy, LoopcheckConfig};
pub use protocol::{Direction, LinkSpeed, TransferKind};

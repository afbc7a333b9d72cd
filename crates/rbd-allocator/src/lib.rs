//! rbd-allocator
//!
//! Target allocation and execution mapping:
//! - `allocate_targets` ranks the universe by momentum × regime-tilt and
//!   emits universal-target weights (top-N, position-cap waterfall).
//! - `map_targets` resolves each universal symbol to an executable symbol
//!   (itself or an affordable proxy), preserving weight semantics and
//!   emitting mapping diagnostics.
//!
//! Proxy symbols are never allocation candidates; they enter only through
//! the mapper.  Pure deterministic logic, no IO.

mod classify;
mod mapper;
mod targets;

pub use classify::classify_symbol;
pub use mapper::{
    map_targets, reverse_proxy_map, ExecutedTargets, MapReason, MappingDiagnostics, ProxyMap,
    SymbolMapping,
};
pub use targets::{
    allocate_targets, AllocationError, RejectedCandidate, RejectionReason, ScoredCandidate,
    TargetAllocation,
};

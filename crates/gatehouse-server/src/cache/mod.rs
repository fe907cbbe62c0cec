//! Stampede-preventing response cache.
//!
//! ## Architecture
//!
//! - **Keys**: `"[<bucket>]<url>"`, the bucket being the current time
//!   truncated to the TTL, so entries roll over at bucket boundaries
//! - **Local tier (moka)**: byte-weighted, per-key load coalescing
//! - **Peer tier (Redis)**: cluster-wide load lock, shared values
//!
//! ## Request Flow
//!
//! ```text
//! GET → key → local tier → peer tier → wrapped service (synthetic GET)
//!                                           ↓
//!                               status ≥ 400: error, nothing stored
//! ```
//!
//! ## Graceful Degradation
//!
//! If Redis is unavailable or disabled, loads are coalesced per instance
//! only.

pub mod backend;
pub mod control;
pub mod key;
pub mod layer;

pub use backend::CacheBackend;
pub use control::{add_cache_control, cache_control_value};
pub use key::CacheKeyer;
pub use layer::{CacheLoadError, LoadRequest, ResponseCache, ResponseCacheLayer};

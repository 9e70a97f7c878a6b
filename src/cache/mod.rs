//! Region cache - Named, bounded, TTL-aware memoizing regions

pub mod entry;
pub mod manager;
pub mod region;
pub mod stats;

pub use entry::CacheEntry;
pub use manager::{CacheManager, RegionDefaults};
pub use region::CacheRegion;
pub use stats::RegionStats;

pub mod aggregator;
pub mod cache;
pub mod clock;
pub mod memory_store;
pub mod ranking;
pub mod store;
pub mod transaction;
pub mod windowing;

// Re-export main components
pub use aggregator::*;
pub use cache::*;
pub use clock::*;
pub use memory_store::*;
pub use ranking::*;
pub use store::*;
pub use transaction::*;
pub use windowing::*;

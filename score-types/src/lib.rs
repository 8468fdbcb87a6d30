pub mod errors;
pub mod identity;
pub mod leaderboard;
pub mod messages;
pub mod score;

// Re-export all types
pub use errors::*;
pub use identity::*;
pub use leaderboard::*;
pub use messages::*;
pub use score::*;

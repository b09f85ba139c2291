//! Bounded rankings ordered by descending target.

#[allow(clippy::module_inception)]
mod leaderboard;

pub use leaderboard::{Leaderboard, LeaderboardEntry};

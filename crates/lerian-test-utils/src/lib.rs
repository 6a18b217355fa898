//! Shared test fixtures for the Lerian sync workspace.
//!
//! Dev-dependency only; never published.
//!
//! - [`git`]: repository fixtures at three realism levels
//! - [`tree`]: [`tree::SyncFixture`] source/destination pairs

pub mod git;
pub mod tree;

pub mod error;
pub mod events;
pub mod intake;
pub mod period;
pub mod reconcile;
pub mod retry;
pub mod tiers;
pub mod usage;

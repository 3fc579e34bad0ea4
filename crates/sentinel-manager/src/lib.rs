//! Exit manager loops and their watchdog supervisor.
//!
//! Three periodic managers contend for each ticket's exit parameters:
//! primary trailing, profit protection (breakeven) and the defensive
//! manager. Every mutation flows through the write queue; managers never
//! touch the registry store directly.
//!
//! # Lock ordering
//!
//! Queue-dispatch lock (inside `WriteQueue`) → per-ticket execution lock
//! (`TicketLockSet`) → registry map shards. Acquisitions never nest in the
//! other direction and every acquisition carries a timeout.

pub mod adjuster;
pub mod defensive;
pub mod error;
pub mod locks;
pub mod profit;
pub mod trailing;
pub mod watchdog;

#[cfg(test)]
pub(crate) mod testutil;

pub use adjuster::{
    AdjusterError, AnalyticsSource, BoxFuture, DryRunExitAdjuster, ExitAdjuster, NoAnalytics,
    PositionSource,
};
pub use defensive::{DefensiveManager, DefensiveManagerConfig};
pub use error::{ManagerError, ManagerResult};
pub use locks::{TicketLockGuard, TicketLockSet};
pub use profit::{ProfitProtectionConfig, ProfitProtectionManager};
pub use trailing::{TrailingConfig, TrailingManager};
pub use watchdog::{AlertFlag, Watchdog, WatchdogConfig};

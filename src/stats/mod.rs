//! Lock-free bookkeeping: a direct-mapped table of per-owner counters, plus
//! two global totals that do not depend on per-owner attribution at all.

mod slot;
mod table;
mod totals;

pub use slot::{OwnerSlot, SlotUsage};
pub use table::{Accounting, DEFAULT_CAPACITY};
pub use totals::Totals;

//! Market data types and calendar provider
//!
//! Stock identity, K-line granularities, query ranges, and the trading
//! calendar seam supplying session boundaries and holidays.

mod calendar;
mod types;

pub(crate) use calendar::is_weekend;
pub use calendar::{MarketCalendar, Session, StaticCalendar};
pub use types::{KQuery, KRecord, KType, Stock};

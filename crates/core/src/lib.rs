//! Core data types for the whale alert bot.

pub mod alert;
pub mod chain;
pub mod destination;
pub mod tier;

pub use alert::*;
pub use chain::*;
pub use destination::*;
pub use tier::*;

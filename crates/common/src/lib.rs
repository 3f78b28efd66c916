//! Shared types for the checkout workspace.
//!
//! Identifiers are plain 64-bit integers wrapped in newtypes so a SKU id can
//! never be passed where a user id is expected. Order ids come from the
//! [`Snowflake`] generator, which hands out roughly time-ordered ids without
//! any coordination between nodes.

pub mod money;
pub mod snowflake;
pub mod types;

pub use money::{Money, MoneyError};
pub use snowflake::{IdError, Snowflake};
pub use types::{OrderId, SkuId, UserId};

//! Shared utilities: exact decimal conversion and id minting.

pub mod decimal;
pub mod ids;

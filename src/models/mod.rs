//! Domain records shared by the syncers, the store and the public API.

mod token;
mod transaction;

pub use token::*;
pub use transaction::*;

//! Request budgeting for remote page fetches
//!
//! Every fetch consults a [`RequestLimiter`] before it goes out, paying a
//! number of tokens that depends on the kind of call being made.

mod budget;

pub use budget::*;

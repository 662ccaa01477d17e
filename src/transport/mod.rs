//! Wire adapters. Both translate frames to and from envelopes and hand them
//! to the shared [`Dispatcher`](crate::dispatch::Dispatcher).

pub mod http;
pub mod stdio;

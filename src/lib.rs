//! A stopwatch with tally counters that keeps running while nobody is looking.
//! The daemon owns the timer and mirrors it to disk, so closing a terminal or restarting the
//! machine doesn't lose time. The CLI talks to it over a local socket.
//!

pub mod cli;
pub mod daemon;
pub mod fs;
pub mod utils;

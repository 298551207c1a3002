//! Crate-level behavioural tests.

mod session_behaviour;

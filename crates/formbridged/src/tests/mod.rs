//! Test suites for the formbridge daemon.

mod serve;
mod support;

//! Integration test driver for the `tests/integration/` submodules.
//!
//! Each `mod` below maps to a file that exercises one subsystem across
//! real brokers and worker threads.  All tests run on the host against
//! the in-process registry, loopback TCP and simulated devices.

mod broker_tests;
mod component_tests;
mod execution_tests;
mod machine_tests;
mod mock_hal;
mod support;
mod tcp_tests;

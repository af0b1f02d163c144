//! Adapter integration tests: real consume loops over the in-memory broker.

mod support;
mod scenarios;
mod roundtrip;
mod transport;

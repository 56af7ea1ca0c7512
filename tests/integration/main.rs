//! End-to-end pipeline tests: scripted sources → aggregator → store.

mod pipeline;
mod scripted_source;

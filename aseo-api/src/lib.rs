//! HTTP facade library: request extractors, route handlers, and shared
//! application state, split out from the binary so route-level tests can
//! exercise the router without a live process.

pub mod error;
pub mod extractors;
pub mod routes;
pub mod state;

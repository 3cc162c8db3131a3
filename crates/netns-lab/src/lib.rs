//! Namespace-backed lab networks for exercising the controllers against a
//! real kernel.
//!
//! # Modules
//!
//! - [`topology`]: Namespace and veth link management (RAII cleanup on drop)
//! - [`harness`]: Dependency checks and the failover/congestion lab layouts
//! - [`test_util`]: Privilege checks and unique name generation for tests

pub mod harness;
pub mod test_util;
pub mod topology;

pub use harness::{CongestionLab, FailoverLab, SkipReason, check_lab_deps};
pub use test_util::{check_privileges, unique_ns_name};
pub use topology::Namespace;

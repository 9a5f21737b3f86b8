//! kubevirt-ci-runner - ephemeral KubeVirt virtual machines as CI job executors
//!
//! Each CI job gets its own VirtualMachineInstance. The runner builds the
//! instance from the job description and cluster defaults, submits it, and
//! blocks until the guest has an IP address and reports `Ready`.
//!
//! # Architecture
//!
//! - One instance per job, correlated only through the identity label
//!   `{LABEL_PREFIX}/id=<job id>`
//! - One create and one watch per job; failures are reported, never retried
//! - Teardown belongs to whoever runs the job's cleanup stage
//!
//! # Modules
//!
//! - [`job`] - Job description and defaults merging
//! - [`quantity`] - Kubernetes quantity validation
//! - [`resources`] - Resource requests/limits for the instance
//! - [`crd`] - KubeVirt VirtualMachineInstance types
//! - [`client`] - Cluster API seam and client discovery
//! - [`vm`] - Creating and locating a job's instance
//! - [`readiness`] - Readiness state machine over the instance watch
//! - [`prepare`] - End-to-end preparation of a job's instance
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod client;
pub mod crd;
pub mod error;
pub mod job;
pub mod prepare;
pub mod quantity;
pub mod readiness;
pub mod resources;
pub mod vm;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

macro_rules! label_prefix {
    () => {
        "kubevirt-ci-runner.dev"
    };
}

/// Label namespace for everything the runner puts on cluster objects
pub const LABEL_PREFIX: &str = label_prefix!();

/// Identity label correlating an instance with its job
pub const ID_LABEL: &str = concat!(label_prefix!(), "/id");

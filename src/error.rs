//! Error types for VM provisioning
//!
//! Every variant carries the job ID or instance name it concerns, so a CI job
//! failure message is enough to diagnose the problem without re-querying the
//! cluster. Nothing here is retried by the library.

use std::time::Duration;

use thiserror::Error;

use crate::resources::{ResourceKind, ResourceList};

/// Main error type for provisioning operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A resource quantity string did not match the Kubernetes quantity grammar
    #[error("parsing {kind} {list} quantity '{value}': {reason}")]
    QuantityParse {
        /// Requests or limits
        list: ResourceList,
        /// Resource the quantity was given for
        kind: ResourceKind,
        /// The offending input
        value: String,
        /// What the parser rejected
        reason: String,
    },

    /// No containerdisk image was given by the job or the defaults
    #[error("job {job_id}: must specify a containerdisk image")]
    MissingImage {
        /// Job the instance was being built for
        job_id: String,
    },

    /// The cluster rejected the create request or the transport failed
    #[error("job {job_id}: creating virtual machine instance: {source}")]
    Submission {
        /// Job the instance was being created for
        job_id: String,
        /// The underlying kube-rs error
        #[source]
        source: kube::Error,
    },

    /// Listing instances by identity label failed
    #[error("job {job_id}: listing virtual machine instances: {source}")]
    Lookup {
        /// Job whose instance was being looked up
        job_id: String,
        /// The underlying kube-rs error
        #[source]
        source: kube::Error,
    },

    /// The instance was created but is no longer visible
    #[error("job {job_id}: virtual machine instance disappeared while the job was running")]
    InstanceVanished {
        /// Job whose instance vanished
        job_id: String,
    },

    /// More than one instance carries the job's identity label
    #[error("job {job_id}: virtual machine instance has ambiguous ID, {count} instances found")]
    AmbiguousIdentity {
        /// Job ID shared by the instances
        job_id: String,
        /// Number of instances found
        count: usize,
    },

    /// Starting or reading the watch subscription failed
    #[error("job {job_id}: watching virtual machine instance: {source}")]
    Watch {
        /// Job whose instance was being watched
        job_id: String,
        /// The underlying watcher error
        #[source]
        source: kube::runtime::watcher::Error,
    },

    /// The watch delivered something that is not an instance snapshot
    #[error("job {job_id}: unexpected object in watch stream: {detail}")]
    UnexpectedWatchObject {
        /// Job whose instance was being watched
        job_id: String,
        /// Description of the payload received
        detail: String,
    },

    /// The subscription ended before the instance became ready
    #[error("job {job_id}: watch stream closed before instance became ready")]
    WatchClosed {
        /// Job whose instance was being watched
        job_id: String,
    },

    /// The instance did not become ready before the deadline
    #[error("virtual machine instance {instance} not ready after {elapsed:?}")]
    Timeout {
        /// Name of the instance being waited on
        instance: String,
        /// Time spent waiting
        elapsed: Duration,
    },

    /// The caller aborted the wait
    #[error("waiting for virtual machine instance {instance} cancelled after {elapsed:?}")]
    Cancelled {
        /// Name of the instance being waited on
        instance: String,
        /// Time spent waiting
        elapsed: Duration,
    },

    /// Cluster client configuration could not be loaded
    #[error("cluster configuration error: {message}")]
    Config {
        /// Description of what failed
        message: String,
    },
}

impl Error {
    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Returns true if the error reflects a broken identity invariant
    ///
    /// These indicate external interference or a non-unique job ID and must
    /// never be retried automatically.
    pub fn is_identity_violation(&self) -> bool {
        matches!(
            self,
            Self::InstanceVanished { .. } | Self::AmbiguousIdentity { .. }
        )
    }
}

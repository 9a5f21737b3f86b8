//! Waiting for a job's instance to become reachable
//!
//! The watch delivers full snapshots of the instance, not diffs, so the
//! readiness predicate is re-evaluated from scratch on every event:
//!
//! ```text
//! AwaitingNetwork ──ip assigned──▶ AwaitingReadyCondition ──Ready=True──▶ Ready
//!        │                                   │
//!        └──────── deadline / cancel ────────┴──────────────────────────▶ TimedOut
//! ```
//!
//! An IP on the first interface is a precondition: `Ready=True` without an
//! address keeps the machine in `AwaitingNetwork`.

use std::time::Duration;

use futures::StreamExt;
use kube::runtime::watcher::{self, Event};
use kube::ResourceExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::client::{InstanceApi, InstanceEvents};
use crate::crd::{VirtualMachineInstance, CONDITION_READY};
use crate::job::JobContext;
use crate::vm::selector;
use crate::Error;

/// Position of an instance on its way to being usable
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadinessState {
    /// No IP on the first interface yet
    AwaitingNetwork,
    /// Addressed, but the `Ready` condition is not `True`
    AwaitingReadyCondition,
    /// Addressed and ready
    Ready,
    /// Deadline passed or the caller cancelled
    TimedOut,
}

impl ReadinessState {
    /// Classify a snapshot of the instance
    pub fn observe(instance: &VirtualMachineInstance) -> Self {
        let Some(status) = instance.status.as_ref() else {
            return Self::AwaitingNetwork;
        };
        if status.primary_ip().is_none() {
            return Self::AwaitingNetwork;
        }
        if !status.has_condition(CONDITION_READY) {
            return Self::AwaitingReadyCondition;
        }
        Self::Ready
    }

    /// Returns true once no further events will be consumed
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::TimedOut)
    }
}

/// A ready instance and the address it can be reached on
#[derive(Clone, Debug)]
pub struct ReadyInstance {
    /// Final snapshot
    pub instance: VirtualMachineInstance,
    /// IP of the first interface
    pub ip: String,
}

/// Tracks the current state and logs transitions
struct ReadinessMachine<'a> {
    instance: &'a str,
    state: ReadinessState,
}

impl<'a> ReadinessMachine<'a> {
    fn new(instance: &'a str) -> Self {
        Self {
            instance,
            state: ReadinessState::AwaitingNetwork,
        }
    }

    fn advance(&mut self, next: ReadinessState) -> ReadinessState {
        if next != self.state {
            debug!(
                instance = %self.instance,
                from = ?self.state,
                to = ?next,
                "readiness state changed"
            );
            self.state = next;
        }
        self.state
    }
}

/// Watch the job's instance until it is ready, the deadline passes, or
/// `cancel` fires
///
/// Exactly one subscription is opened and it is closed on every exit path.
/// Server-side watch expiries are resumed inside the subscription; only the
/// deadline and `cancel` bound the wait.
#[instrument(skip_all, fields(job_id = %job.id, instance = %instance))]
pub async fn wait_for_ready<A: InstanceApi + ?Sized>(
    api: &A,
    job: &JobContext,
    instance: &str,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<ReadyInstance, Error> {
    let started = Instant::now();

    let events = api.watch(&job.namespace, &selector(&job.id));

    info!(timeout = ?timeout, "Waiting for virtual machine instance to be ready");
    watch_until_ready(events, &job.id, instance, started + timeout, started, cancel).await
}

/// Drive the state machine over an open subscription
///
/// Owns `events`, so the subscription is dropped (and the server-side watch
/// ended) whichever way this returns.
async fn watch_until_ready(
    mut events: InstanceEvents,
    job_id: &str,
    instance: &str,
    deadline: Instant,
    started: Instant,
    cancel: &CancellationToken,
) -> Result<ReadyInstance, Error> {
    let mut machine = ReadinessMachine::new(instance);
    let sleep = tokio::time::sleep_until(deadline);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                machine.advance(ReadinessState::TimedOut);
                warn!(instance, "wait for readiness cancelled");
                return Err(Error::Cancelled {
                    instance: instance.to_string(),
                    elapsed: started.elapsed(),
                });
            }

            _ = &mut sleep => {
                machine.advance(ReadinessState::TimedOut);
                warn!(instance, "virtual machine instance not ready before deadline");
                return Err(Error::Timeout {
                    instance: instance.to_string(),
                    elapsed: started.elapsed(),
                });
            }

            event = events.next() => {
                let snapshot = match event {
                    Some(Ok(Event::Apply(vmi))) | Some(Ok(Event::InitApply(vmi))) => vmi,
                    Some(Ok(Event::Init)) | Some(Ok(Event::InitDone)) => continue,
                    Some(Ok(Event::Delete(vmi))) => {
                        warn!(deleted = %vmi.name_any(), "instance deleted while waiting");
                        return Err(Error::InstanceVanished {
                            job_id: job_id.to_string(),
                        });
                    }
                    // Resume point too old; the watcher relists on the next poll
                    Some(Err(watcher::Error::WatchError(status))) if status.code == 410 => {
                        debug!(reason = %status.reason, "watch expired, relisting");
                        continue;
                    }
                    Some(Err(watcher::Error::WatchError(status))) => {
                        return Err(Error::UnexpectedWatchObject {
                            job_id: job_id.to_string(),
                            detail: format!(
                                "status {} {}: {}",
                                status.code, status.reason, status.message
                            ),
                        });
                    }
                    Some(Err(watcher::Error::InitialListFailed(kube::Error::SerdeError(e))))
                    | Some(Err(watcher::Error::WatchFailed(kube::Error::SerdeError(e)))) => {
                        return Err(Error::UnexpectedWatchObject {
                            job_id: job_id.to_string(),
                            detail: format!("not a VirtualMachineInstance: {}", e),
                        });
                    }
                    Some(Err(source)) => {
                        return Err(Error::Watch {
                            job_id: job_id.to_string(),
                            source,
                        });
                    }
                    None => {
                        return Err(Error::WatchClosed {
                            job_id: job_id.to_string(),
                        });
                    }
                };

                if machine.advance(ReadinessState::observe(&snapshot)).is_terminal() {
                    let ip = snapshot
                        .status
                        .as_ref()
                        .and_then(|s| s.primary_ip())
                        .unwrap_or_default()
                        .to_string();
                    info!(
                        instance = %snapshot.name_any(),
                        ip = %ip,
                        elapsed = ?started.elapsed(),
                        "Virtual machine instance is ready"
                    );
                    return Ok(ReadyInstance {
                        instance: snapshot,
                        ip,
                    });
                }
            }
        }
    }
}

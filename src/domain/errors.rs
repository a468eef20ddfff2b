//! Aggregate error type for reconciler entry points.
//!
//! Individual services return their specific per-concern error (see
//! [`crate::domain::error`]); the `kube::runtime::Controller` error
//! channel and the admission-webhook handler need one type to converge on,
//! so each concern's error is folded into `SympoziumError` via `From`.

use thiserror::Error;

use super::error::{
    AdmissionError, ChannelRouterError, EventBusError, IpcError, PodBuilderError, PolicyError,
    ScheduleError, StoreError,
};
use super::models::agent_run::StatusInvariantError;

#[derive(Debug, Error)]
pub enum SympoziumError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    StatusInvariant(#[from] StatusInvariantError),

    #[error(transparent)]
    EventBus(#[from] EventBusError),

    #[error(transparent)]
    PodBuilder(#[from] PodBuilderError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Admission(#[from] AdmissionError),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error(transparent)]
    Ipc(#[from] IpcError),

    #[error(transparent)]
    ChannelRouter(#[from] ChannelRouterError),

    #[error("kube client error: {0}")]
    Kube(String),

    #[error("IPC filesystem error: {0}")]
    Io(String),
}

impl From<kube::Error> for SympoziumError {
    fn from(error: kube::Error) -> Self {
        Self::Kube(error.to_string())
    }
}

impl From<std::io::Error> for SympoziumError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

impl SympoziumError {
    /// Whether the reconcile loop should requeue with back-off (§7
    /// "Propagation policy") rather than write the status and stop.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            Self::EventBus(e) => e.is_transient(),
            Self::Kube(_) => true,
            Self::Io(_) => true,
            _ => false,
        }
    }
}

pub type SympoziumResult<T> = Result<T, SympoziumError>;

//! Admission webhook surface (SPEC_FULL.md §4.12).
//!
//! A thin axum adapter around [`crate::services::admission_validator`]:
//! `/validate` answers the Kubernetes `AdmissionReview` contract with an
//! allow/deny decision, `/mutate` answers with a JSON Patch for the
//! defaulting behaviors spec.md §4.10 assigns to admission rather than to
//! the pure validator.

pub mod server;
pub mod types;

pub use server::{router, serve, WebhookState};
pub use types::{AdmissionReviewRequest, AdmissionReviewResponse};

//! Core domain types and utilities for keel.
//!
//! This crate provides the identifiers and error handling shared by the
//! entity collaborator interfaces, the workflow engine and the scheduler.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{
    AccountId, ActionId, EntityId, ParseIdError, UserId, WorkflowId, WorkflowInstanceId,
};

//! ownerwatch-operator: kube-rs host for ownerwatch controllers
//!
//! Implements the `ownerwatch_core` manager traits on top of kube-runtime
//! and carries the process plumbing around them (configuration, leader
//! election, health probes).

pub mod config;
pub mod controller;
pub mod handlers;
pub mod health;
pub mod leader;
pub mod manager;
pub mod retry;

pub use config::{OperatorSettings, OwnerWatchConfig, OwnerWatchConfigSpec};
pub use handlers::{HandlerError, HandlerSet, Reconciler};
pub use manager::KubeManager;

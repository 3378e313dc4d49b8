//! Multi-phase build pipeline orchestrator.
//!
//! Drives background coding agents through a fixed sequence of phases,
//! gating each one on human approval and merging approved work forward, with
//! design mockup generation, asset generation, deployment, and change
//! request creation along the way.

pub mod approval;
pub mod assets;
pub mod config;
pub mod context;
pub mod errors;
pub mod external;
pub mod fanout;
pub mod phase;
pub mod pipeline;
pub mod poller;
pub mod retry;
pub mod scope;
pub mod ui;

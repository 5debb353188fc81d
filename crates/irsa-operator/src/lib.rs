//! IRSA operator - provisions AWS IAM roles for Kubernetes ServiceAccounts
//!
//! The binary in `main.rs` parses [`config::Cli`], installs the CRD and runs
//! the IamRole controller built by [`controller_runner`].

#![deny(missing_docs)]

pub mod config;
pub mod controller_runner;
pub mod startup;

//! # cloudtier core
//!
//! Queueing, scheduling and orchestration for the cloudtier storage-tiering
//! daemon.
//!
//! ## Overview
//!
//! - **Queues**: bounded FIFO queues of absolute paths, either process-local
//!   or backed by a named segment shared across processes and restarts
//! - **Transfer scheduling**: download and upload workers that drain a
//!   primary/secondary queue pair into a [`backend::StorageBackend`]
//! - **Scanning**: a walker that classifies the governed tree through a
//!   [`policy::Policy`] and feeds the queues
//! - **Orchestration**: ordered startup with full rollback, worker
//!   supervision, and reverse-order teardown
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use cloudtier_core::{
//!     backend::LocalDirBackend, config::TieringConfig, layout::TierLayout,
//!     orchestration::Daemon, policy::AccessAgePolicy,
//! };
//!
//! fn start(config: TieringConfig) -> cloudtier_core::Result<()> {
//!     let layout =
//!         TierLayout::new(&config.scan.root, &config.storage.remote_root);
//!     let daemon = Daemon::new(
//!         config.clone(),
//!         Arc::new(LocalDirBackend::new(layout.clone())),
//!         Arc::new(AccessAgePolicy::new(config.policy, layout)),
//!     );
//!     let topology = daemon.init_data()?;
//!     let running = daemon.start_routines(topology)?;
//!     running.shutdown();
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod failure;
pub mod layout;
pub mod orchestration;
pub mod policy;
pub mod queue;
pub mod scanner;
pub mod transfer;

pub use error::{Result, TieringError};

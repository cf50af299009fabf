//! Install and uninstall of packagemanifests-format operators on OLM
//!
//! `Install` loads a package directory, records it in the cluster as
//! registry config maps and wires OLM to it through a catalog source and a
//! subscription. `Uninstall` finds and removes everything an install
//! created. Both run as a validate, mutate, watch `Pipeline` bounded by a
//! `RunContext`.
//!
//! ```no_run
//! # async fn example() -> olmrun_common::Result<()> {
//! use olmrun_lifecycle::{
//!     ConfigOptions, Configuration, Install, InstallOptions, RunContext, DEFAULT_RUN_TIMEOUT,
//! };
//!
//! let config = Configuration::load(ConfigOptions::from_env()).await?;
//! let ctx = RunContext::with_timeout(DEFAULT_RUN_TIMEOUT);
//! let options = InstallOptions::new("testdata/memcached-operator", "0.0.2");
//! let csv = Install::new(&config, options).run(&ctx).await?;
//! # let _ = csv;
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]

pub mod client;
pub mod config;
pub mod context;
pub mod install;
pub mod install_mode;
pub mod manifests;
pub mod pipeline;
pub mod registry;
pub mod uninstall;
pub mod watch;

#[cfg(test)]
mod testing;

pub use client::{KubeResourceClient, ResourceClient, Scope};
pub use config::{ConfigOptions, Configuration};
pub use context::{RunContext, DEFAULT_RUN_TIMEOUT};
pub use install::{Install, InstallOptions};
pub use install_mode::InstallMode;
pub use manifests::{load_package, PackageBundle};
pub use pipeline::{Operation, Phase, Pipeline};
pub use uninstall::{Uninstall, UninstallOptions};
pub use watch::{poll_until, DEFAULT_POLL_INTERVAL};

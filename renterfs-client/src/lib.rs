//! renterfs client
//!
//! Stores files on contracted storage hosts. A [`HostSet`] keeps
//! authenticated sessions with every host a renter holds a contract with;
//! a [`FileSystem`] on top of it splits files into encrypted,
//! erasure-coded chunks and spreads their fragments over distinct hosts.
//!
//! ```no_run
//! # async fn demo(contract: renterfs_core::Contract) -> renterfs_core::Result<()> {
//! use renterfs_client::{FileSystem, HostSet, HostSetConfig, StoreConfig};
//! use std::sync::Arc;
//!
//! let hosts = Arc::new(HostSet::open("127.0.0.1:9980", HostSetConfig::default()).await?);
//! hosts.add_contract(contract).await?;
//!
//! let fs = FileSystem::open("renterfs-meta", hosts.clone(), StoreConfig::default())?;
//! let mut writer = fs.create("hello.txt", 1).await?;
//! writer.write(b"Hello, world!").await?;
//! writer.close().await?;
//!
//! let mut reader = fs.open_file("hello.txt").await?;
//! let contents = reader.read_to_end().await?;
//! assert_eq!(contents, b"Hello, world!");
//! # Ok(())
//! # }
//! ```
//!
//! The blocking [`api`] module exposes the same operations with sentinel
//! returns and a per-thread last error.

pub mod api;
pub mod config;
pub mod file;
pub mod fs;
pub mod hostset;

pub use config::{ClientConfig, ConfigError, HostSetConfig, StoreConfig};
pub use file::{FileReader, FileWriter};
pub use fs::{FileOptions, FileSystem};
pub use hostset::{HostHealth, HostSet};

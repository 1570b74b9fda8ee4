//! Registry Explorer Library
//!
//! Lists repositories, manifests and tags of container registries whose
//! APIs have little in common: plain distribution registries, Google,
//! GitHub, DockerHub and Harbor. Every backend is normalized into the same
//! [`catalog`] model.
//!
//! ```no_run
//! use registry_explorer::catalog::ListOptions;
//! use registry_explorer::config::ExplorerConfig;
//! use registry_explorer::registry::{ClientSettings, Resolver, default_keychain};
//!
//! # async fn demo() -> registry_explorer::Result<()> {
//! let settings = ClientSettings::new(ExplorerConfig::from_env(), default_keychain())?;
//! let client = Resolver::new(settings).resolve("ghcr.io").await?;
//! let children = client.list_repositories("my-org", &ListOptions::default()).await?;
//! println!("{:?}", children.repositories);
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod reference;
pub mod registry;

pub use catalog::{ListOptions, Manifest, ManifestList, RepositoryList};
pub use config::{AuthConfig, ExplorerConfig};
pub use error::{RegistryError, Result};
pub use logging::Logger;
pub use reference::RegistryReference;
pub use registry::{ProviderKind, RegistryClient};

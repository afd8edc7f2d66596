//! Endpoint registry: turns an endpoint descriptor into a filesystem
//! instance, inferring the backend from the asset when the type is omitted
//! (`ssh` asset → SFTP, `docker-host` asset → container with that host's
//! executor).

use std::sync::Arc;

use async_trait::async_trait;

use crate::container::ContainerFs;
use crate::docker::{LocalDockerExecutor, SshDockerExecutor};
use crate::local::LocalFs;
use crate::pool::{SshAssetConfig, SshPool};
use crate::sftp::SftpFs;
use crate::{FsError, RemoteFs};

/// Parsed endpoint descriptor:
/// `local` | `asset:<id>` | `container:<id>` | `container:<id>@<asset>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Endpoint {
    Local,
    Asset { asset_id: String },
    Container {
        container_id: String,
        asset_id: Option<String>,
    },
}

impl Endpoint {
    pub fn parse(s: &str) -> Result<Self, FsError> {
        if s.is_empty() || s == "local" {
            return Ok(Endpoint::Local);
        }
        if let Some(rest) = s.strip_prefix("asset:") {
            if rest.is_empty() {
                return Err(FsError::InvalidEndpoint(s.to_string()));
            }
            return Ok(Endpoint::Asset {
                asset_id: rest.to_string(),
            });
        }
        if let Some(rest) = s.strip_prefix("container:") {
            let (container_id, asset_id) = match rest.split_once('@') {
                Some((c, a)) if !c.is_empty() && !a.is_empty() => (c, Some(a.to_string())),
                Some(_) => return Err(FsError::InvalidEndpoint(s.to_string())),
                None if !rest.is_empty() => (rest, None),
                None => return Err(FsError::InvalidEndpoint(s.to_string())),
            };
            return Ok(Endpoint::Container {
                container_id: container_id.to_string(),
                asset_id,
            });
        }
        Err(FsError::InvalidEndpoint(s.to_string()))
    }
}

/// What an asset id resolves to, as far as filesystems care.
#[derive(Clone, Debug)]
pub enum AssetEndpoint {
    /// SSH host; files via SFTP, containers via remote docker CLI.
    Ssh(SshAssetConfig),
    /// Docker daemon on the local host.
    DockerHostLocal,
    /// Docker daemon on an SSH-reached host.
    DockerHostSsh(SshAssetConfig),
}

/// Looks asset ids up in whatever owns asset records (the store, in
/// production; a map, in tests).
#[async_trait]
pub trait AssetResolver: Send + Sync {
    async fn resolve(&self, asset_id: &str) -> Result<AssetEndpoint, FsError>;
}

/// Builds filesystem instances for endpoints. Cheap to clone.
#[derive(Clone)]
pub struct FsRegistry {
    pool: Arc<SshPool>,
    resolver: Arc<dyn AssetResolver>,
}

impl FsRegistry {
    pub fn new(pool: Arc<SshPool>, resolver: Arc<dyn AssetResolver>) -> Self {
        FsRegistry { pool, resolver }
    }

    pub fn pool(&self) -> &Arc<SshPool> {
        &self.pool
    }

    pub fn resolver(&self) -> &Arc<dyn AssetResolver> {
        &self.resolver
    }

    pub async fn open(&self, endpoint: &Endpoint) -> Result<Arc<dyn RemoteFs>, FsError> {
        match endpoint {
            Endpoint::Local => Ok(Arc::new(LocalFs::new())),
            Endpoint::Asset { asset_id } => match self.resolver.resolve(asset_id).await? {
                AssetEndpoint::Ssh(cfg) => {
                    Ok(Arc::new(SftpFs::new(Arc::clone(&self.pool), cfg)))
                }
                AssetEndpoint::DockerHostLocal | AssetEndpoint::DockerHostSsh(_) => {
                    Err(FsError::InvalidEndpoint(format!(
                        "asset {} is a docker host; use container:<id>@{}",
                        asset_id, asset_id
                    )))
                }
            },
            Endpoint::Container {
                container_id,
                asset_id,
            } => {
                let executor: Arc<dyn crate::DockerExecutor> = match asset_id {
                    None => Arc::new(LocalDockerExecutor::new()),
                    Some(asset_id) => match self.resolver.resolve(asset_id).await? {
                        AssetEndpoint::DockerHostLocal => Arc::new(LocalDockerExecutor::new()),
                        AssetEndpoint::DockerHostSsh(cfg) | AssetEndpoint::Ssh(cfg) => {
                            Arc::new(SshDockerExecutor::new(Arc::clone(&self.pool), cfg))
                        }
                    },
                };
                Ok(Arc::new(ContainerFs::new(executor, container_id.clone())))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_endpoint_forms() {
        assert_eq!(Endpoint::parse("local").unwrap(), Endpoint::Local);
        assert_eq!(Endpoint::parse("").unwrap(), Endpoint::Local);
        assert_eq!(
            Endpoint::parse("asset:a1").unwrap(),
            Endpoint::Asset {
                asset_id: "a1".into()
            }
        );
        assert_eq!(
            Endpoint::parse("container:c9@a1").unwrap(),
            Endpoint::Container {
                container_id: "c9".into(),
                asset_id: Some("a1".into())
            }
        );
        assert_eq!(
            Endpoint::parse("container:c9").unwrap(),
            Endpoint::Container {
                container_id: "c9".into(),
                asset_id: None
            }
        );
    }

    #[test]
    fn parse_rejects_malformed() {
        assert!(Endpoint::parse("asset:").is_err());
        assert!(Endpoint::parse("container:@a").is_err());
        assert!(Endpoint::parse("container:c@").is_err());
        assert!(Endpoint::parse("weird").is_err());
    }
}

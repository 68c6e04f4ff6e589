//! Repository tool over local file-backed repositories

use crate::error::BuildError;
use crate::runner::RepoTool;
use cim_catalog::{archive_repo, extract_repo, Catalog, CollectionKind, LocalCatalog};
use cim_dimensions::DimensionUniverse;
use cim_repo::{FixtureConfig, RepoBootstrapper};
use std::path::{Path, PathBuf};
use tokio::task;
use tracing::info;

/// [`RepoTool`] backed by [`LocalCatalog`] repositories and gzip snapshots
#[derive(Debug, Clone, Default)]
pub struct LocalRepoTool {
    fixture: FixtureConfig,
}

impl LocalRepoTool {
    #[must_use]
    pub fn new(fixture: FixtureConfig) -> Self {
        Self { fixture }
    }

    #[inline]
    #[must_use]
    pub fn fixture(&self) -> &FixtureConfig {
        &self.fixture
    }
}

fn owned(path: &Path) -> PathBuf {
    path.to_path_buf()
}

#[async_trait::async_trait]
impl RepoTool for LocalRepoTool {
    async fn bootstrap(&self, repo: &Path, clobber: bool) -> Result<(), BuildError> {
        let bootstrapper = RepoBootstrapper::new(self.fixture.clone());
        let repo = owned(repo);
        let outcome = task::spawn_blocking(move || bootstrapper.bootstrap(&repo, clobber)).await??;
        info!(?outcome, "base repository ready");
        Ok(())
    }

    async fn extract(&self, archive: &Path, repo: &Path) -> Result<(), BuildError> {
        let (archive, repo) = (owned(archive), owned(repo));
        task::spawn_blocking(move || extract_repo(&archive, &repo)).await??;
        Ok(())
    }

    async fn archive(&self, repo: &Path, archive: &Path) -> Result<(), BuildError> {
        let (repo, archive) = (owned(repo), owned(archive));
        task::spawn_blocking(move || archive_repo(&repo, &archive)).await??;
        Ok(())
    }

    async fn prep(&self, repo: &Path, pipeline: &Path, run: &str) -> Result<usize, BuildError> {
        let (repo, pipeline, run) = (owned(repo), owned(pipeline), run.to_string());
        Ok(task::spawn_blocking(move || cim_mock::prep(&repo, &pipeline, &run)).await??)
    }

    async fn flatten_chain(&self, repo: &Path, chain: &str, source: &str) -> Result<(), BuildError> {
        let (repo, chain, source) = (owned(repo), chain.to_string(), source.to_string());
        task::spawn_blocking(move || -> Result<(), BuildError> {
            let mut catalog = LocalCatalog::open(&repo, DimensionUniverse::standard())?;
            let members = catalog.flatten_collection(&source)?;
            catalog.register_collection(&chain, CollectionKind::Chained)?;
            catalog.set_collection_chain(&chain, &members)?;
            info!(chain, source, members = members.len(), "defined output chain");
            Ok(())
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn snapshot_and_chain_through_tool() {
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path().join("repo");
        let tool = LocalRepoTool::default();
        tool.bootstrap(&repo, false).await.unwrap();
        tool.flatten_chain(&repo, "HSC/runs/ci", "HSC/defaults").await.unwrap();

        let archive = dir.path().join("repo.tgz");
        tool.archive(&repo, &archive).await.unwrap();
        assert!(!repo.exists());
        let copy = dir.path().join("copy");
        tool.extract(&archive, &copy).await.unwrap();

        let catalog = LocalCatalog::open(&copy, DimensionUniverse::standard()).unwrap();
        assert_eq!(
            catalog.flatten_collection("HSC/runs/ci").unwrap(),
            catalog.flatten_collection("HSC/defaults").unwrap()
        );
    }
}

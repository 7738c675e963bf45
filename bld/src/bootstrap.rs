//! `bld bootstrap`: make sure the workspace has a resolved `MODULE.bazel`.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::core::label::MODULE_FILE;
use crate::io::bazel::ModuleResolver;
use crate::io::descriptor::ensure_module_file;
use crate::io::git::Git;

pub const MODULE_LOCK_FILE: &str = "MODULE.bazel.lock";
pub const BOOTSTRAP_COMMIT_MESSAGE: &str = "feat: Add MODULE.bazel and MODULE.bazel.lock";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapOutcome {
    /// `MODULE.bazel` was missing and has been created and committed.
    pub created: bool,
    /// Targets matched by `//...`, when the query succeeded.
    pub target_count: Option<usize>,
}

pub fn bootstrap_module(
    dir: &Path,
    resolver: &impl ModuleResolver,
    git: &Git,
) -> Result<BootstrapOutcome> {
    let created = ensure_module_file(dir)?;
    resolver
        .mod_explain(dir)
        .with_context(|| format!("resolve modules in {}", dir.display()))?;

    if created {
        let mut paths = vec![MODULE_FILE];
        if dir.join(MODULE_LOCK_FILE).exists() {
            paths.push(MODULE_LOCK_FILE);
        }
        git.add_paths(&paths)?;
        git.commit(BOOTSTRAP_COMMIT_MESSAGE)?;
        info!("committed {}", paths.join(" and "));
    }

    let target_count = match resolver.count_targets(dir) {
        Ok(count) => {
            info!(count, "found bazel targets");
            Some(count)
        }
        Err(err) => {
            warn!(err = %format!("{err:#}"), "could not count bazel targets");
            None
        }
    };

    Ok(BootstrapOutcome {
        created,
        target_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestRepo;
    use anyhow::bail;
    use std::fs;

    struct FakeResolver {
        explain_fails: bool,
        targets: Option<usize>,
    }

    impl ModuleResolver for FakeResolver {
        fn mod_explain(&self, workdir: &Path) -> Result<()> {
            if self.explain_fails {
                bail!("ERROR: module extension failed");
            }
            fs::write(workdir.join(MODULE_LOCK_FILE), "{}\n")?;
            Ok(())
        }

        fn count_targets(&self, _workdir: &Path) -> Result<usize> {
            match self.targets {
                Some(count) => Ok(count),
                None => bail!("no targets"),
            }
        }
    }

    #[test]
    fn creates_and_commits_module_files() {
        let repo = TestRepo::new().expect("repo");
        let resolver = FakeResolver {
            explain_fails: false,
            targets: Some(12),
        };

        let outcome = bootstrap_module(&repo.root(), &resolver, &repo.git()).expect("bootstrap");

        assert_eq!(
            outcome,
            BootstrapOutcome {
                created: true,
                target_count: Some(12)
            }
        );
        assert_eq!(
            repo.git().last_commit_subject().expect("subject"),
            BOOTSTRAP_COMMIT_MESSAGE
        );
        assert!(repo.git().status_porcelain().expect("status").is_empty());
    }

    #[test]
    fn existing_module_is_not_committed_again() {
        let repo = TestRepo::new().expect("repo");
        fs::write(repo.root().join(MODULE_FILE), "module(name = \"rg\")\n").expect("write");
        let resolver = FakeResolver {
            explain_fails: false,
            targets: None,
        };

        let outcome = bootstrap_module(&repo.root(), &resolver, &repo.git()).expect("bootstrap");

        assert!(!outcome.created);
        assert_eq!(outcome.target_count, None);
        assert_eq!(
            repo.git().last_commit_subject().expect("subject"),
            "initial commit"
        );
    }

    #[test]
    fn explain_failure_is_an_error() {
        let repo = TestRepo::new().expect("repo");
        let resolver = FakeResolver {
            explain_fails: true,
            targets: Some(1),
        };
        let err = bootstrap_module(&repo.root(), &resolver, &repo.git()).unwrap_err();
        assert!(format!("{err:#}").contains("module extension failed"));
    }
}

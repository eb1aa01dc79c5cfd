//! One crossgrade invocation

use crossgrader_errors::{Error, PackageError, StageError};
use crossgrader_types::{Arch, Stage};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::context::OpsCtx;

/// Operator switches for a session
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionOptions {
    /// Plan and report; never mutate the package database
    pub dry_run: bool,
    /// Fetch the target debs and stop before installing
    pub download_only: bool,
    /// Skip packages without a target build instead of blocking
    pub force_unavailable: bool,
    /// Ignore initramfs hooks no package could be linked to
    pub force_initramfs: bool,
    /// Start the stage even if the journal says the previous one failed
    pub force_stage: bool,
    /// Crossgrade only these; in stage three, keep these
    pub packages: Vec<String>,
}

impl SessionOptions {
    /// `--force-all`
    #[must_use]
    pub fn force_all(mut self) -> Self {
        self.force_unavailable = true;
        self.force_initramfs = true;
        self.force_stage = true;
        self
    }
}

/// Target and source of the crossgrade plus the stage being run
///
/// Created once per invocation. Only the stage moves, and only forward.
#[derive(Debug, Clone, Serialize)]
pub struct CrossgradeSession {
    target: Arch,
    source: Arch,
    stage: Stage,
    options: SessionOptions,
}

impl CrossgradeSession {
    /// Session without consulting the package database
    ///
    /// # Errors
    ///
    /// Returns `StageError::SameArchitecture` if `target == source`.
    pub fn new(
        target: Arch,
        source: Arch,
        stage: Stage,
        options: SessionOptions,
    ) -> Result<Self, Error> {
        if target == source {
            return Err(StageError::SameArchitecture {
                arch: target.to_string(),
            }
            .into());
        }
        Ok(Self {
            target,
            source,
            stage,
            options,
        })
    }

    /// Validate `target` and work out the source architecture
    ///
    /// Stage three removes `from`, which becomes the source. Otherwise the
    /// source is dpkg's native architecture, unless dpkg itself was already
    /// crossgraded: then the journal's record for `target` decides, and
    /// failing that the architecture most installed packages still use.
    ///
    /// # Errors
    ///
    /// Returns `PackageError::InvalidArchitecture` for a name dpkg does not
    /// know and `StageError::SameArchitecture` when no distinct source exists.
    pub async fn open(
        ctx: &OpsCtx,
        target: Arch,
        stage: Stage,
        from: Option<Arch>,
        options: SessionOptions,
    ) -> Result<Self, Error> {
        let known = ctx.pm.known_architectures().await?;
        if !known.contains(&target) {
            return Err(PackageError::InvalidArchitecture {
                arch: target.to_string(),
            }
            .into());
        }

        let source = match from {
            Some(from) => from,
            None => resolve_source(ctx, &target).await?,
        };
        tracing::debug!(%target, %source, %stage, "session opened");
        Self::new(target, source, stage, options)
    }

    #[must_use]
    pub fn target(&self) -> &Arch {
        &self.target
    }

    #[must_use]
    pub fn source(&self) -> &Arch {
        &self.source
    }

    #[must_use]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    #[must_use]
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    #[must_use]
    pub fn is_dry_run(&self) -> bool {
        self.options.dry_run
    }

    /// Move to `stage`; the session never goes back
    ///
    /// # Errors
    ///
    /// Returns `StageError::Regression` for an earlier stage.
    pub fn enter(&mut self, stage: Stage) -> Result<(), Error> {
        if stage < self.stage {
            return Err(StageError::Regression {
                from: self.stage.to_string(),
                to: stage.to_string(),
            }
            .into());
        }
        self.stage = stage;
        Ok(())
    }
}

async fn resolve_source(ctx: &OpsCtx, target: &Arch) -> Result<Arch, Error> {
    let native = ctx.pm.native_architecture().await?;
    if &native != target {
        return Ok(native);
    }

    let journal = ctx.journal().load().await?;
    if let Some(record) = journal
        .targets
        .get(target)
        .and_then(|t| t.stages.values().next())
    {
        return Ok(record.source.clone());
    }

    let mut counts: BTreeMap<Arch, usize> = BTreeMap::new();
    for pkg in ctx.pm.list_installed().await? {
        if pkg.is_installed() && !pkg.arch.is_all() && &pkg.arch != target {
            *counts.entry(pkg.arch).or_default() += 1;
        }
    }
    Ok(counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
        .map_or(native, |(arch, _)| arch))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_architecture_rejected() {
        let err = CrossgradeSession::new(
            Arch::new("amd64"),
            Arch::new("amd64"),
            Stage::First,
            SessionOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Stage(StageError::SameArchitecture { .. })));
    }

    #[test]
    fn test_stage_only_moves_forward() {
        let mut session = CrossgradeSession::new(
            Arch::new("amd64"),
            Arch::new("arm64"),
            Stage::Second,
            SessionOptions::default(),
        )
        .unwrap();
        session.enter(Stage::Third).unwrap();
        assert!(session.enter(Stage::First).is_err());
        assert_eq!(session.stage(), Stage::Third);
    }

    #[test]
    fn test_force_all_sets_every_override() {
        let options = SessionOptions::default().force_all();
        assert!(options.force_unavailable && options.force_initramfs && options.force_stage);
        assert!(!options.dry_run);
    }
}

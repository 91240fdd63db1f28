//! Persistence of compiled route tables.

use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use crate::{
    compiler::{CompiledRoutes, RouteCompiler},
    error::RouterError,
    router::Router,
};

/// Storage for compiled route tables.
pub trait RouteCache {
    /// `None` when nothing has been stored yet.
    fn load(&self) -> Result<Option<CompiledRoutes>, RouterError>;

    /// Compiles and stores `router`. Returns `false` when the table was refused
    /// because some handler cannot be restored.
    fn save(&self, router: &Router) -> Result<bool, RouterError>;

    fn clear(&self) -> Result<(), RouterError>;
}

/// JSON file store.
#[derive(Debug, Clone)]
pub struct FileRouteCache {
    path: PathBuf,
}

impl FileRouteCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RouteCache for FileRouteCache {
    fn load(&self) -> Result<Option<CompiledRoutes>, RouterError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(RouterError::Cache(format!("{}: {e}", self.path.display()))),
        };

        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| RouterError::Cache(format!("{}: {e}", self.path.display())))
    }

    fn save(&self, router: &Router) -> Result<bool, RouterError> {
        let report = RouteCompiler::validate_handlers(router);
        if !report.is_cacheable() {
            for problem in report.errors.iter().chain(&report.uncacheable) {
                tracing::warn!(cache = %self.path.display(), "{problem}");
            }
            return Ok(false);
        }

        let compiled = RouteCompiler::compile(router);
        let raw = serde_json::to_string_pretty(&compiled)
            .map_err(|e| RouterError::Cache(e.to_string()))?;

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .map_err(|e| RouterError::Cache(format!("{}: {e}", dir.display())))?;
        }
        fs::write(&self.path, raw)
            .map_err(|e| RouterError::Cache(format!("{}: {e}", self.path.display())))?;

        tracing::debug!(cache = %self.path.display(), routes = compiled.len(), "route cache written");
        Ok(true)
    }

    fn clear(&self) -> Result<(), RouterError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RouterError::Cache(format!("{}: {e}", self.path.display()))),
        }
    }
}

//! Declarative route loading.
//!
//! Controllers describe their routes as metadata: a class-level prefix and
//! middleware, and per-method route declarations. [`AttributeLoader`] translates
//! that metadata into the same registration calls used by hand-written routes, so
//! declared and manual routes behave identically.
//!
//! Manifests are JSON documents holding one [`ControllerMeta`] or an array of them:
//!
//! ```json
//! {
//!   "class": "UserController",
//!   "prefix": "/users",
//!   "middleware": ["auth"],
//!   "methods": [
//!     { "name": "show", "routes": [
//!       { "method": "GET", "path": "/{id}", "name": "users.show", "where": { "id": "\\d+" } }
//!     ] }
//!   ]
//! }
//! ```

use std::{collections::BTreeMap, fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{error::RouterError, fields::FieldSelection, handler::Handler, router::Router};

/// Routing metadata of one controller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerMeta {
    /// Container identifier of the controller. Manifests may omit it, in which
    /// case the file stem is used.
    pub class: String,
    pub prefix: String,
    /// Applied to every route of the controller, before route middleware.
    pub middleware: Vec<String>,
    pub methods: Vec<MethodMeta>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MethodMeta {
    pub name: String,
    pub public: bool,
    #[serde(rename = "static")]
    pub is_static: bool,
    pub constructor: bool,
    pub routes: Vec<RouteAttr>,
}

impl Default for MethodMeta {
    fn default() -> Self {
        Self {
            name: String::new(),
            public: true,
            is_static: false,
            constructor: false,
            routes: Vec::new(),
        }
    }
}

impl MethodMeta {
    /// Public instance methods other than constructors carry routes.
    pub fn is_routable(&self) -> bool {
        self.public && !self.is_static && !self.constructor && self.name != "new"
    }
}

/// One route declaration on a method.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteAttr {
    pub method: String,
    pub path: String,
    pub middleware: Vec<String>,
    pub name: Option<String>,
    #[serde(rename = "where")]
    pub constraints: BTreeMap<String, String>,
    pub fields: Option<FieldSelection>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Manifest {
    Many(Vec<ControllerMeta>),
    One(ControllerMeta),
}

pub struct AttributeLoader;

impl AttributeLoader {
    /// Registers every declared route; returns how many were registered.
    pub fn load(router: &mut Router, controllers: &[ControllerMeta]) -> Result<usize, RouterError> {
        let mut count = 0;
        for controller in controllers {
            count += Self::load_controller(router, controller)?;
        }
        Ok(count)
    }

    fn load_controller(router: &mut Router, meta: &ControllerMeta) -> Result<usize, RouterError> {
        let mut count = 0;

        for method in meta.methods.iter().filter(|m| m.is_routable()) {
            for attr in &method.routes {
                let path = format!("{}/{}", meta.prefix.trim_end_matches('/'), attr.path);
                let middleware = meta.middleware.iter().chain(&attr.middleware);

                let mut builder = router
                    .add(&attr.method, &path, Handler::method(meta.class.as_str(), method.name.as_str()))?
                    .middleware(middleware)
                    .constrain_all(&attr.constraints)?;
                if let Some(fields) = &attr.fields {
                    builder = builder.fields(fields.clone());
                }
                if let Some(name) = &attr.name {
                    builder.name(name)?;
                }
                count += 1;
            }
        }

        tracing::debug!(controller = %meta.class, routes = count, "controller routes loaded");
        Ok(count)
    }

    /// Loads every `*.json` manifest of `dir`, in file-name order.
    pub fn load_dir(router: &mut Router, dir: impl AsRef<Path>) -> Result<usize, RouterError> {
        let dir = dir.as_ref();
        let io = |e: std::io::Error| RouterError::Manifest(format!("{}: {e}", dir.display()));

        let mut files: Vec<_> = fs::read_dir(dir)
            .map_err(io)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        files.sort();

        let mut count = 0;
        for file in files {
            let raw = fs::read_to_string(&file)
                .map_err(|e| RouterError::Manifest(format!("{}: {e}", file.display())))?;
            let manifest: Manifest = serde_json::from_str(&raw)
                .map_err(|e| RouterError::Manifest(format!("{}: {e}", file.display())))?;

            let mut controllers = match manifest {
                Manifest::Many(list) => list,
                Manifest::One(meta) => vec![meta],
            };
            let stem = file
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            for controller in controllers.iter_mut().filter(|c| c.class.is_empty()) {
                controller.class = stem.clone();
            }

            count += Self::load(router, &controllers)?;
        }
        Ok(count)
    }
}

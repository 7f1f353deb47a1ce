//! Cells and the scope they are declared into.
//!
//! A [`Scope`] owns the host-registered bodies ([`Scope::define`]) and the
//! current declarations read from source files. Declaring binds a body to a
//! file position; running a cell evaluates its body, renders the value and
//! patches the output block after the cell's code.

use crate::config::{Config, DEFAULT_ASSETS_DIR};
use crate::declare::{AnnotationDeclarer, Declaration, DeclareError, Declarer};
use crate::patch::{PatchError, SourcePatcher};
use crate::render::{CellValue, RenderError, Renderer, RendererRegistry};
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// A cell body as registered by the host.
pub type CellBody = Arc<dyn Fn() -> anyhow::Result<Box<dyn CellValue>> + Send + Sync>;

#[derive(Error, Debug)]
pub enum CellError {
    #[error("unknown cell {name:?}{}", did_you_mean(.hint))]
    UnknownCell { name: String, hint: Option<String> },

    #[error("cell {name:?} failed: {source:#}")]
    Body {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("cell {name:?} produced a value that could not be rendered: {source}")]
    RenderFailed {
        name: String,
        #[source]
        source: RenderError,
    },

    #[error(transparent)]
    Patch(#[from] PatchError),

    #[error(transparent)]
    Declare(#[from] DeclareError),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn did_you_mean(hint: &Option<String>) -> String {
    match hint {
        Some(name) => format!(" (did you mean {name:?}?)"),
        None => String::new(),
    }
}

/// A declared cell: a body bound to a position in a file.
#[derive(Clone)]
pub struct Cell {
    pub name: String,
    pub file: PathBuf,
    /// 1-based line where the cell's code starts.
    pub line: usize,
    /// Path, minus extension, that renderers use for side-car assets.
    pub asset_stem: PathBuf,
    body: CellBody,
}

impl fmt::Debug for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell")
            .field("name", &self.name)
            .field("file", &self.file)
            .field("line", &self.line)
            .field("asset_stem", &self.asset_stem)
            .finish_non_exhaustive()
    }
}

impl Cell {
    /// Evaluate the body without rendering or patching.
    pub fn evaluate(&self) -> Result<Box<dyn CellValue>, CellError> {
        (self.body)().map_err(|source| CellError::Body {
            name: self.name.clone(),
            source,
        })
    }
}

/// Result of declaring a file into a scope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Redeclared {
    /// Cells now bound, in file order.
    pub declared: Vec<Declaration>,
    /// Names declared in the file that have no body.
    pub unbound: Vec<String>,
}

pub struct Scope {
    bodies: RwLock<HashMap<String, CellBody>>,
    cells: RwLock<HashMap<String, Arc<Cell>>>,
    renderers: RwLock<RendererRegistry>,
    declarer: Arc<dyn Declarer>,
    patcher: SourcePatcher,
    assets_dir: String,
}

impl Default for Scope {
    fn default() -> Self {
        Self {
            bodies: RwLock::new(HashMap::new()),
            cells: RwLock::new(HashMap::new()),
            renderers: RwLock::new(RendererRegistry::default()),
            declarer: Arc::new(AnnotationDeclarer::default()),
            patcher: SourcePatcher::default(),
            assets_dir: DEFAULT_ASSETS_DIR.to_string(),
        }
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self.cells.read().keys().cloned().collect();
        names.sort();
        f.debug_struct("Scope")
            .field("cells", &names)
            .field("patcher", &self.patcher)
            .field("assets_dir", &self.assets_dir)
            .finish_non_exhaustive()
    }
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    /// A scope whose markers, boundary finder, renderer bounds and
    /// declaration leaders come from `config`.
    pub fn from_config(config: &Config) -> Self {
        Self {
            renderers: RwLock::new(RendererRegistry::new(config.renderer())),
            declarer: Arc::new(AnnotationDeclarer::new(
                config.declare.leaders.iter().cloned(),
                config.markers(),
            )),
            patcher: config.patcher(),
            assets_dir: config.assets_dir.clone(),
            ..Self::default()
        }
    }

    pub fn with_declarer(mut self, declarer: impl Declarer + 'static) -> Self {
        self.declarer = Arc::new(declarer);
        self
    }

    pub fn with_patcher(mut self, patcher: SourcePatcher) -> Self {
        self.patcher = patcher;
        self
    }

    pub fn with_renderers(self, renderers: RendererRegistry) -> Self {
        *self.renderers.write() = renderers;
        self
    }

    pub fn with_assets_dir(mut self, assets_dir: impl Into<String>) -> Self {
        self.assets_dir = assets_dir.into();
        self
    }

    pub fn patcher(&self) -> &SourcePatcher {
        &self.patcher
    }

    /// Use `renderer` for results of type `T`.
    pub fn register_renderer<T: Any>(&self, renderer: impl Renderer + 'static) {
        self.renderers.write().register::<T>(renderer);
    }

    /// Bind `body` to the cell called `name`.
    ///
    /// Takes effect at the next declaration of a file that names the cell.
    pub fn define<F, T>(&self, name: impl Into<String>, body: F)
    where
        F: Fn() -> anyhow::Result<T> + Send + Sync + 'static,
        T: CellValue,
    {
        let body: CellBody = Arc::new(move || {
            let value = body()?;
            Ok(Box::new(value) as Box<dyn CellValue>)
        });
        self.bodies.write().insert(name.into(), body);
    }

    /// Declare every cell in `path` for the first time.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<Redeclared, CellError> {
        let path = path.as_ref();
        let canonical = path.canonicalize().map_err(|source| CellError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let content = read_to_string(&canonical)?;
        self.redeclare(&canonical, &content)
    }

    /// Re-bind the cells of `path` from `content` without running anything.
    ///
    /// Cells previously declared from `path` that `content` no longer
    /// declares are dropped.
    pub fn redeclare(&self, path: &Path, content: &str) -> Result<Redeclared, CellError> {
        let declarations = self.declarer.declare(path, content)?;
        let bodies = self.bodies.read();

        let mut redeclared = Redeclared::default();
        let mut fresh = Vec::with_capacity(declarations.len());
        for declaration in declarations {
            match bodies.get(&declaration.name) {
                Some(body) => {
                    fresh.push(Arc::new(Cell {
                        asset_stem: self.asset_stem(path, &declaration.name),
                        name: declaration.name.clone(),
                        file: path.to_path_buf(),
                        line: declaration.line,
                        body: Arc::clone(body),
                    }));
                    redeclared.declared.push(declaration);
                }
                None => redeclared.unbound.push(declaration.name),
            }
        }
        drop(bodies);

        let mut cells = self.cells.write();
        cells.retain(|_, cell| cell.file != path);
        for cell in fresh {
            if let Some(previous) = cells.get(&cell.name) {
                tracing::warn!(
                    cell = %cell.name,
                    previous = %previous.file.display(),
                    file = %path.display(),
                    "cell redeclared from another file"
                );
            }
            cells.insert(cell.name.clone(), cell);
        }

        if !redeclared.unbound.is_empty() {
            tracing::debug!(file = %path.display(), unbound = ?redeclared.unbound, "cells without a body");
        }
        tracing::debug!(file = %path.display(), cells = redeclared.declared.len(), "declared cells");
        Ok(redeclared)
    }

    pub fn cell(&self, name: &str) -> Option<Arc<Cell>> {
        self.cells.read().get(name).cloned()
    }

    /// Declared cells, ordered by file then line.
    pub fn cells(&self) -> Vec<Arc<Cell>> {
        let mut cells: Vec<Arc<Cell>> = self.cells.read().values().cloned().collect();
        cells.sort_by(|a, b| (&a.file, a.line).cmp(&(&b.file, b.line)));
        cells
    }

    /// Run the cell: evaluate, render, patch its output block, re-declare.
    ///
    /// A file that has disappeared is not patched; the value is still
    /// returned. Any other patch failure is returned after the body ran.
    pub fn run(&self, name: &str) -> Result<Box<dyn CellValue>, CellError> {
        let cell = self.cell(name).ok_or_else(|| CellError::UnknownCell {
            name: name.to_string(),
            hint: self.suggest(name),
        })?;

        let value = cell.evaluate()?;
        let rendered = self
            .renderers
            .read()
            .render(&*value, &cell.asset_stem)
            .map_err(|source| CellError::RenderFailed {
                name: cell.name.clone(),
                source,
            })?;

        match self.patcher.patch(&cell.file, cell.line, &rendered) {
            Ok(outcome) => {
                tracing::debug!(cell = %cell.name, kind = ?outcome.kind, "cell output written");
            }
            Err(PatchError::Read { path, source }) if source.kind() == io::ErrorKind::NotFound => {
                tracing::warn!(cell = %cell.name, path = %path.display(), "source file is gone; output not written");
                return Ok(value);
            }
            Err(err) => return Err(err.into()),
        }

        // The output is on disk; a file that no longer declares cleanly keeps
        // its previous cells until the next successful re-declaration.
        if let Err(err) = read_to_string(&cell.file)
            .and_then(|content| self.redeclare(&cell.file, &content))
        {
            tracing::warn!(cell = %cell.name, error = %err, "re-declaration after run failed");
        }
        Ok(value)
    }

    fn suggest(&self, name: &str) -> Option<String> {
        let cells = self.cells.read();
        cells
            .keys()
            .min_by_key(|candidate| strsim::levenshtein(name, candidate))
            .filter(|candidate| strsim::levenshtein(name, candidate) <= 3)
            .cloned()
    }

    fn asset_stem(&self, path: &Path, name: &str) -> PathBuf {
        let dir = path.parent().unwrap_or_else(|| Path::new(""));
        let stem = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        dir.join(&self.assets_dir).join(format!("{stem}_{name}"))
    }
}

fn read_to_string(path: &Path) -> Result<String, CellError> {
    fs::read_to_string(path).map_err(|source| CellError::Io {
        path: path.to_path_buf(),
        source,
    })
}

//! Turning cell results into the text stored in an output block.
//!
//! Every result type gets a bounded, uncoloured pretty-printed view by
//! default. Types that need something else (images, large binary data)
//! register a [`Renderer`] in a [`RendererRegistry`]; a renderer may write a
//! side-car asset file and return a `[[path]]` reference instead of inline
//! text.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt::Debug;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("failed to write asset {path}: {source}")]
    Asset {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("renderer for {type_name} failed: {message}")]
    Failed { type_name: String, message: String },
}

/// A value a cell body can return.
///
/// Implemented for every `Debug + Send + 'static` type. Note that this
/// includes `Box<dyn CellValue>` itself: render `&*boxed`, not `&boxed`.
pub trait CellValue: Any + Debug + Send + 'static {
    fn as_any(&self) -> &dyn Any;

    fn type_name(&self) -> &'static str;
}

impl<T: Any + Debug + Send> CellValue for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

impl dyn CellValue {
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

/// Produces the text for an output block.
///
/// Renderers must not return text containing the suffix marker; the
/// patcher refuses such output. A renderer that writes a side-car file
/// appends its own extension to `asset_stem` and creates parent
/// directories first (see [`write_asset`]).
pub trait Renderer: Send + Sync {
    fn render(&self, value: &dyn CellValue, asset_stem: &Path) -> Result<String, RenderError>;
}

/// Bounded `{:#?}` view of any value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugRenderer {
    pub max_width: usize,
    pub max_lines: usize,
}

impl Default for DebugRenderer {
    fn default() -> Self {
        Self {
            max_width: 80,
            max_lines: 40,
        }
    }
}

impl DebugRenderer {
    /// Bound already-formatted text to the configured width and height.
    pub fn bound(&self, text: &str) -> String {
        let lines: Vec<&str> = text.lines().collect();
        let shown = lines.len().min(self.max_lines.max(1));

        let mut out: Vec<String> = lines[..shown]
            .iter()
            .map(|line| truncate_line(line, self.max_width))
            .collect();
        if lines.len() > shown {
            out.push(format!("... ({} more lines)", lines.len() - shown));
        }
        out.join("\n")
    }
}

impl Renderer for DebugRenderer {
    fn render(&self, value: &dyn CellValue, _asset_stem: &Path) -> Result<String, RenderError> {
        // Strings print without quotes so text results read naturally.
        if let Some(text) = value.downcast_ref::<String>() {
            return Ok(self.bound(text));
        }
        if let Some(text) = value.downcast_ref::<&'static str>() {
            return Ok(self.bound(text));
        }
        Ok(self.bound(&format!("{value:#?}")))
    }
}

fn truncate_line(line: &str, max_width: usize) -> String {
    if line.chars().count() <= max_width {
        return line.to_string();
    }
    let mut cut: String = line.chars().take(max_width.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

/// Binary output destined for a side-car file, e.g. a rendered plot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// File extension without the dot, e.g. `"png"`.
    pub extension: String,
    pub data: Vec<u8>,
}

impl Artifact {
    pub fn new(extension: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            extension: extension.into(),
            data: data.into(),
        }
    }
}

/// Writes [`Artifact`] values next to the source and references them.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArtifactRenderer;

impl Renderer for ArtifactRenderer {
    fn render(&self, value: &dyn CellValue, asset_stem: &Path) -> Result<String, RenderError> {
        let artifact = value
            .downcast_ref::<Artifact>()
            .ok_or_else(|| RenderError::Failed {
                type_name: value.type_name().to_string(),
                message: "not an Artifact".to_string(),
            })?;
        write_asset(asset_stem, &artifact.extension, &artifact.data)
    }
}

/// Write `data` to `<stem>.<extension>`, creating parent directories, and
/// return the `[[path]]` reference for the output block.
pub fn write_asset(stem: &Path, extension: &str, data: &[u8]) -> Result<String, RenderError> {
    let path = stem.with_extension(extension);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| RenderError::Asset {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    fs::write(&path, data).map_err(|source| RenderError::Asset {
        path: path.clone(),
        source,
    })?;

    tracing::debug!(path = %path.display(), bytes = data.len(), "wrote cell asset");
    Ok(format!("[[{}]]", path.display()))
}

struct FnRenderer<F>(F);

impl<F> Renderer for FnRenderer<F>
where
    F: Fn(&dyn CellValue, &Path) -> Result<String, RenderError> + Send + Sync,
{
    fn render(&self, value: &dyn CellValue, asset_stem: &Path) -> Result<String, RenderError> {
        (self.0)(value, asset_stem)
    }
}

/// Per-type renderer overrides with a default fallback.
#[derive(Clone)]
pub struct RendererRegistry {
    overrides: HashMap<TypeId, Arc<dyn Renderer>>,
    fallback: Arc<dyn Renderer>,
}

impl Default for RendererRegistry {
    fn default() -> Self {
        Self::new(DebugRenderer::default())
    }
}

impl RendererRegistry {
    /// A registry with `fallback` as the default and [`ArtifactRenderer`]
    /// registered for [`Artifact`].
    pub fn new(fallback: impl Renderer + 'static) -> Self {
        let mut registry = Self {
            overrides: HashMap::new(),
            fallback: Arc::new(fallback),
        };
        registry.register::<Artifact>(ArtifactRenderer);
        registry
    }

    /// Use `renderer` for every value of type `T`, replacing any previous one.
    pub fn register<T: Any>(&mut self, renderer: impl Renderer + 'static) -> &mut Self {
        self.overrides.insert(TypeId::of::<T>(), Arc::new(renderer));
        self
    }

    /// Register a typed closure for values of type `T`.
    pub fn register_fn<T, F>(&mut self, render: F) -> &mut Self
    where
        T: Any,
        F: Fn(&T, &Path) -> Result<String, RenderError> + Send + Sync + 'static,
    {
        self.register::<T>(FnRenderer(
            move |value: &dyn CellValue, stem: &Path| match value.downcast_ref::<T>() {
                Some(typed) => render(typed, stem),
                None => Err(RenderError::Failed {
                    type_name: value.type_name().to_string(),
                    message: "registered for a different type".to_string(),
                }),
            },
        ))
    }

    pub fn has_override<T: Any>(&self) -> bool {
        self.overrides.contains_key(&TypeId::of::<T>())
    }

    pub fn render(&self, value: &dyn CellValue, asset_stem: &Path) -> Result<String, RenderError> {
        let renderer = self
            .overrides
            .get(&Any::type_id(value.as_any()))
            .unwrap_or(&self.fallback);
        renderer.render(value, asset_stem)
    }
}

use crate::block::Markers;
use crate::boundary::BracketScanner;
use crate::edit::WriteMode;
use crate::patch::{Boundary, SourcePatcher};
use crate::render::DebugRenderer;
use crate::ts::language_by_name;
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_ASSETS_DIR: &str = ".codecells_assets";

/// Contents of a `codecells.toml`.
#[derive(Debug, Deserialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub markers: MarkerSettings,
    pub render: RenderSettings,
    pub patch: PatchSettings,
    pub boundary: BoundarySettings,
    pub declare: DeclareSettings,
    pub watch: WatchSettings,
    /// Directory, next to each source file, that receives side-car assets.
    pub assets_dir: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            markers: MarkerSettings::default(),
            render: RenderSettings::default(),
            patch: PatchSettings::default(),
            boundary: BoundarySettings::default(),
            declare: DeclareSettings::default(),
            watch: WatchSettings::default(),
            assets_dir: DEFAULT_ASSETS_DIR.to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MarkerStyle {
    #[default]
    Hash,
    BlockComment,
    Custom,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default, deny_unknown_fields)]
pub struct MarkerSettings {
    pub style: MarkerStyle,
    pub prefix: Option<String>,
    pub suffix: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct RenderSettings {
    pub max_width: usize,
    pub max_lines: usize,
}

impl Default for RenderSettings {
    fn default() -> Self {
        let renderer = DebugRenderer::default();
        Self {
            max_width: renderer.max_width,
            max_lines: renderer.max_lines,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default, deny_unknown_fields)]
pub struct PatchSettings {
    pub write_mode: WriteMode,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FinderKind {
    #[default]
    Scanner,
    TreeSitter,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct BoundarySettings {
    pub finder: FinderKind,
    /// Grammar for `tree_sitter`; chosen per file extension when absent.
    pub language: Option<String>,
    /// Line comment leaders honoured by the scanner.
    pub comment_leaders: Vec<String>,
}

impl Default for BoundarySettings {
    fn default() -> Self {
        Self {
            finder: FinderKind::default(),
            language: None,
            comment_leaders: BracketScanner::default().comment_leaders().to_vec(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct DeclareSettings {
    /// Comment leaders that may introduce an `@cell` annotation.
    pub leaders: Vec<String>,
}

impl Default for DeclareSettings {
    fn default() -> Self {
        Self {
            leaders: vec!["#".to_string(), "//".to_string()],
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct WatchSettings {
    pub debounce_ms: u64,
    pub missing_backoff_ms: u64,
    pub missing_retries: u32,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            debounce_ms: 50,
            missing_backoff_ms: 100,
            missing_retries: 20,
        }
    }
}

impl WatchSettings {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn missing_backoff(&self) -> Duration {
        Duration::from_millis(self.missing_backoff_ms)
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        match self.markers.style {
            MarkerStyle::Custom => {
                for (field, value) in [
                    ("markers.prefix", &self.markers.prefix),
                    ("markers.suffix", &self.markers.suffix),
                ] {
                    match value {
                        None => issues.push(ValidationIssue::MissingField { field }),
                        Some(line) if marker_line(line).is_empty() => {
                            issues.push(ValidationIssue::Invalid {
                                field,
                                message: "marker must not be empty".to_string(),
                            })
                        }
                        Some(line) if marker_line(line).contains('\n') => {
                            issues.push(ValidationIssue::Invalid {
                                field,
                                message: "marker must be a single line".to_string(),
                            })
                        }
                        Some(_) => {}
                    }
                }
                if let (Some(prefix), Some(suffix)) = (&self.markers.prefix, &self.markers.suffix)
                {
                    let (prefix, suffix) = (marker_line(prefix), marker_line(suffix));
                    if !suffix.is_empty() && prefix.contains(suffix) {
                        issues.push(ValidationIssue::InvalidCombo {
                            message: "markers.prefix must not contain markers.suffix"
                                .to_string(),
                        });
                    }
                }
            }
            MarkerStyle::Hash | MarkerStyle::BlockComment => {
                if self.markers.prefix.is_some() || self.markers.suffix.is_some() {
                    issues.push(ValidationIssue::InvalidCombo {
                        message: "markers.prefix/suffix require style = \"custom\"".to_string(),
                    });
                }
            }
        }

        if self.render.max_width < 8 {
            issues.push(ValidationIssue::Invalid {
                field: "render.max_width",
                message: "must be at least 8".to_string(),
            });
        }
        if self.render.max_lines == 0 {
            issues.push(ValidationIssue::Invalid {
                field: "render.max_lines",
                message: "must be at least 1".to_string(),
            });
        }

        if let Some(name) = &self.boundary.language {
            if self.boundary.finder != FinderKind::TreeSitter {
                issues.push(ValidationIssue::InvalidCombo {
                    message: "boundary.language requires finder = \"tree_sitter\"".to_string(),
                });
            } else if let Err(err) = language_by_name(name) {
                issues.push(ValidationIssue::Invalid {
                    field: "boundary.language",
                    message: err.to_string(),
                });
            }
        }
        if self.boundary.comment_leaders.iter().any(|l| l.trim().is_empty()) {
            issues.push(ValidationIssue::Invalid {
                field: "boundary.comment_leaders",
                message: "leaders must not be blank".to_string(),
            });
        }

        if self.declare.leaders.is_empty() || self.declare.leaders.iter().any(|l| l.trim().is_empty())
        {
            issues.push(ValidationIssue::Invalid {
                field: "declare.leaders",
                message: "at least one non-blank leader is required".to_string(),
            });
        }

        if self.watch.debounce_ms == 0 {
            issues.push(ValidationIssue::Invalid {
                field: "watch.debounce_ms",
                message: "must be greater than zero".to_string(),
            });
        }

        if self.assets_dir.trim().is_empty() {
            issues.push(ValidationIssue::MissingField {
                field: "assets_dir",
            });
        } else if Path::new(&self.assets_dir).is_absolute() {
            issues.push(ValidationIssue::Invalid {
                field: "assets_dir",
                message: "must be relative to the source file's directory".to_string(),
            });
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }

    /// Marker lines selected by `[markers]`.
    pub fn markers(&self) -> Markers {
        match self.markers.style {
            MarkerStyle::Hash => Markers::default(),
            MarkerStyle::BlockComment => Markers::block_comment(),
            MarkerStyle::Custom => Markers::new(
                self.markers.prefix.clone().unwrap_or_default(),
                self.markers.suffix.clone().unwrap_or_default(),
            ),
        }
    }

    /// Boundary finder selected by `[boundary]`.
    ///
    /// Call on a validated config; an unknown language falls back to
    /// per-extension selection.
    pub fn boundary(&self) -> Boundary {
        match self.boundary.finder {
            FinderKind::Scanner => {
                Boundary::Scanner(BracketScanner::new(self.boundary.comment_leaders.clone()))
            }
            FinderKind::TreeSitter => match self.boundary.language.as_deref().map(language_by_name)
            {
                Some(Ok(lang)) => Boundary::TreeSitter(lang),
                _ => Boundary::TreeSitterByExtension,
            },
        }
    }

    pub fn renderer(&self) -> DebugRenderer {
        DebugRenderer {
            max_width: self.render.max_width,
            max_lines: self.render.max_lines,
        }
    }

    pub fn patcher(&self) -> SourcePatcher {
        SourcePatcher::new(self.markers(), self.boundary()).with_write_mode(self.patch.write_mode)
    }
}

fn marker_line(line: &str) -> &str {
    line.strip_suffix('\n').unwrap_or(line)
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    MissingField { field: &'static str },
    Invalid { field: &'static str, message: String },
    InvalidCombo { message: String },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::MissingField { field } => {
                write!(f, "missing required field '{field}'")
            }
            ValidationIssue::Invalid { field, message } => {
                write!(f, "invalid value for '{field}': {message}")
            }
            ValidationIssue::InvalidCombo { message } => {
                write!(f, "invalid configuration: {message}")
            }
        }
    }
}

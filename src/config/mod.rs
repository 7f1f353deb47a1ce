pub mod loader;
pub mod schema;

pub use loader::{discover, load_from_path, load_from_str, ConfigError, ConfigOrigin, CONFIG_FILE};
pub use schema::{
    BoundarySettings, Config, DeclareSettings, FinderKind, MarkerSettings, MarkerStyle,
    PatchSettings, RenderSettings, ValidationError, ValidationIssue, WatchSettings,
    DEFAULT_ASSETS_DIR,
};

pub mod loader;
pub mod paths;
pub mod schema;

pub use loader::{load_config, load_config_from_str};
pub use paths::{default_project_root, ProjectPaths};
pub use schema::{Config, DetectorConfig, ExportProfile, JobsConfig, ToolsConfig};

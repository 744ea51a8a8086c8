pub mod filesystem;

pub use filesystem::{copy_unique, ensure_directory, move_file, sha256_file};

//! Helpers for sanitizing data before it enters tracing span attributes.
//!
//! Logs are safe to share for debugging: absolute paths are reduced to
//! their file name.

use std::path::Path;

/// Returns only the filename component of a path (no directory).
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Joins a tool argument list, redacting every absolute path argument.
pub fn redact_args(args: &[String]) -> String {
    args.iter()
        .map(|arg| {
            let path = Path::new(arg);
            if path.is_absolute() {
                redact_path(path)
            } else {
                arg.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_path_returns_filename() {
        assert_eq!(
            redact_path(Path::new("/home/user/vhs/raw/TAPE_0001.mp4")),
            "TAPE_0001.mp4"
        );
    }

    #[test]
    fn test_redact_path_no_filename() {
        assert_eq!(redact_path(Path::new("/")), "<unknown>");
    }

    #[test]
    fn test_redact_args() {
        let args = vec![
            "-ss".to_string(),
            "1.000".to_string(),
            "-i".to_string(),
            "/home/user/vhs/raw/a.mp4".to_string(),
            "-".to_string(),
        ];
        assert_eq!(redact_args(&args), "-ss 1.000 -i a.mp4 -");
    }
}

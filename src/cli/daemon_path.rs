use std::path::PathBuf;

pub const DAEMON_EXECUTABLE: &str = "tallywatch-daemon";

/// The daemon binary is installed next to the CLI one.
pub fn to_daemon_path(mut cli_path: PathBuf) -> PathBuf {
    cli_path.set_file_name(DAEMON_EXECUTABLE);
    #[cfg(windows)]
    {
        cli_path.set_extension("exe");
    }
    cli_path
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::to_daemon_path;

    #[cfg(unix)]
    #[test]
    fn test_daemon_next_to_cli() {
        assert_eq!(
            to_daemon_path(PathBuf::from("/usr/local/bin/tallywatch")),
            PathBuf::from("/usr/local/bin/tallywatch-daemon")
        );
    }
}

use directories::ProjectDirs;
use std::path::PathBuf;

/// Application directories following the XDG base directory layout
#[derive(Debug, Clone)]
pub struct Directories {
    /// Config directory (~/.config/apidaemon)
    pub config: PathBuf,

    /// Config file path
    pub config_file: PathBuf,

    /// Data directory (~/.local/share/apidaemon); debug builds of the daemon
    /// write log files under `logs/`
    pub data: PathBuf,
}

impl Directories {
    /// Resolve the standard paths. Falls back to the current directory when
    /// no home directory can be determined.
    #[must_use]
    pub fn new() -> Self {
        let (config, data) = ProjectDirs::from("", "", "apidaemon").map_or_else(
            || (PathBuf::from("."), PathBuf::from(".")),
            |project| {
                (
                    project.config_dir().to_path_buf(),
                    project.data_dir().to_path_buf(),
                )
            },
        );

        Self {
            config_file: config.join("config.json"),
            config,
            data,
        }
    }
}

impl Default for Directories {
    fn default() -> Self {
        Self::new()
    }
}

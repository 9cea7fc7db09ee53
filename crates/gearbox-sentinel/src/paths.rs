use directories::ProjectDirs;
use eyre::ContextCompat as _;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct SentinelPaths {
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
    pub log_file: PathBuf,
}

impl SentinelPaths {
    pub fn discover() -> eyre::Result<Self> {
        let env_dir = |var: &str| {
            std::env::var(var)
                .ok()
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
        };
        let overrides = (
            env_dir("GEARBOX_SENTINEL_CONFIG_DIR"),
            env_dir("GEARBOX_SENTINEL_DATA_DIR"),
        );

        let (config_dir, data_dir) = match overrides {
            (Some(c), Some(d)) => (c, d),
            (c, d) => {
                // Linux: ~/.config/gearbox-sentinel, ~/.local/share/gearbox-sentinel
                // macOS: ~/Library/Application Support/gearbox-sentinel
                let proj = ProjectDirs::from("", "", "gearbox-sentinel")
                    .context("failed to resolve project dirs")?;
                (
                    c.unwrap_or_else(|| proj.config_dir().to_path_buf()),
                    d.unwrap_or_else(|| proj.data_dir().to_path_buf()),
                )
            }
        };
        let log_file = data_dir.join("gearbox-sentinel.log.jsonl");

        Ok(Self {
            config_dir,
            data_dir,
            log_file,
        })
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }
}

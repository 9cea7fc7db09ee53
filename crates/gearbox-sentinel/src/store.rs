use crate::{config::SentinelConfig, paths::SentinelPaths};
use eyre::Context as _;
use std::{fs, path::PathBuf};

/// Read-only access to `config.toml`; a missing file means defaults.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

/// Apply environment variable overrides to the config (HTTP endpoints, RPC URLs).
fn apply_env_overrides(cfg: &mut SentinelConfig) {
    /// Helper: if an env var is set and non-empty, apply `setter` with the trimmed value.
    fn apply_env(var: &str, setter: impl FnOnce(&str)) {
        if let Ok(u) = std::env::var(var) {
            let t = u.trim();
            if !t.is_empty() {
                setter(t);
            }
        }
    }

    apply_env("GEARBOX_SENTINEL_YIELDS_URL", |v| {
        v.clone_into(&mut cfg.http.yields_url);
    });
    apply_env("GEARBOX_SENTINEL_REWARDS_URL", |v| {
        v.clone_into(&mut cfg.http.rewards_url);
    });
    apply_env("GEARBOX_SENTINEL_COINS_URL", |v| {
        v.clone_into(&mut cfg.http.coins_base_url);
    });
    for (name, chain) in &mut cfg.chains {
        let var = format!(
            "GEARBOX_SENTINEL_RPC_URL_{}",
            name.to_ascii_uppercase().replace('-', "_")
        );
        apply_env(&var, |v| {
            v.clone_into(&mut chain.rpc_url);
        });
    }
    if let Ok(v) = std::env::var("GEARBOX_SENTINEL_CALL_TIMEOUT_MS") {
        if let Ok(n) = v.trim().parse::<u64>() {
            if n > 0 {
                cfg.scan.call_timeout_ms = n;
            }
        }
    }
}

impl ConfigStore {
    pub fn new(paths: &SentinelPaths) -> Self {
        Self {
            path: paths.config_file(),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn load(&self) -> eyre::Result<SentinelConfig> {
        let mut cfg = if self.path.exists() {
            let s = fs::read_to_string(&self.path)
                .with_context(|| format!("read {}", self.path.display()))?;
            toml::from_str(&s).with_context(|| format!("parse {}", self.path.display()))?
        } else {
            SentinelConfig::default()
        };
        apply_env_overrides(&mut cfg);
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &std::path::Path) -> ConfigStore {
        ConfigStore {
            path: dir.join("config.toml"),
        }
    }

    #[test]
    fn missing_file_loads_defaults_without_writing() -> eyre::Result<()> {
        let td = tempfile::tempdir()?;
        let store = store_in(td.path());
        let cfg = store.load()?;
        assert!(cfg.chains.contains_key("ethereum"));
        assert!(!store.path().exists(), "config file is never written");
        Ok(())
    }

    #[test]
    fn file_values_override_defaults() -> eyre::Result<()> {
        let td = tempfile::tempdir()?;
        let store = store_in(td.path());
        fs::write(
            store.path(),
            "[http]\nyields_url = \"http://127.0.0.1:9/pools\"\n",
        )?;
        let cfg = store.load()?;
        assert_eq!(cfg.http.yields_url, "http://127.0.0.1:9/pools");
        assert_eq!(cfg.http.coins_base_url, "https://coins.llama.fi");
        Ok(())
    }

    #[test]
    fn broken_toml_is_an_error() -> eyre::Result<()> {
        let td = tempfile::tempdir()?;
        let store = store_in(td.path());
        fs::write(store.path(), "[http\n")?;
        assert!(store.load().is_err());
        Ok(())
    }
}

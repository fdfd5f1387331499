use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub api: ApiSettings,
    pub scheduler: SchedulerSettings,
    pub snapshot: SnapshotSettings,
    pub database: DatabaseSettings,
    pub logging: LogSettings,
}

#[derive(Clone, Deserialize)]
pub struct ApiSettings {
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

// Keeps the password out of debug output.
impl std::fmt::Debug for ApiSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiSettings")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("timeout_secs", &self.timeout_secs)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

impl ApiSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSettings {
    pub interval_secs: u64,
}

impl SchedulerSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotSettings {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogSettings {
    pub level: String,
}

impl Settings {
    pub fn load(file: Option<&Path>) -> Result<Self, config::ConfigError> {
        let file_source = match file {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name("config").required(false),
        };

        config::Config::builder()
            .set_default("api.base_url", "https://incident-api.use1stag.elevatesecurity.io")?
            .set_default("api.username", "")?
            .set_default("api.password", "")?
            .set_default("api.timeout_secs", 30)?
            .set_default("api.connect_timeout_secs", 10)?
            .set_default("scheduler.interval_secs", 1200)?
            .set_default("snapshot.path", "incident_report.json")?
            .set_default("database.max_connections", 5)?
            .set_default("logging.level", "info")?
            .add_source(file_source)
            .add_source(config::Environment::with_prefix("INCIDENT_SYNC").separator("__"))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_apply_without_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.toml");
        std::fs::File::create(&path).unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.scheduler.interval(), Duration::from_secs(1200));
        assert_eq!(settings.api.timeout(), Duration::from_secs(30));
        assert_eq!(settings.snapshot.path, PathBuf::from("incident_report.json"));
        assert!(settings.database.url.is_none());
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[api]\nbase_url = \"http://localhost:9000\"\nusername = \"svc\"\npassword = \"hunter2\"\n\n[scheduler]\ninterval_secs = 60"
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.api.base_url, "http://localhost:9000");
        assert_eq!(settings.api.username, "svc");
        assert_eq!(settings.scheduler.interval_secs, 60);
        assert!(!format!("{:?}", settings.api).contains("hunter2"));
    }
}

//! Configuration vault – reads/writes `~/.waymark/config.toml`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use waymark_content::ResolverConfig;
use waymark_runtime::EngineConfig;
use waymark_sensors::LocationConfig;
use waymark_tracking::{CoordinatorConfig, OverlayPlacement};
use waymark_types::WaymarkError;

/// Where marker content is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Built-in demo campus catalogue.
    #[default]
    Memory,
    Firestore,
}

impl std::fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreBackend::Memory => write!(f, "memory"),
            StoreBackend::Firestore => write!(f, "firestore"),
        }
    }
}

impl std::str::FromStr for StoreBackend {
    type Err = WaymarkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "firestore" => Ok(StoreBackend::Firestore),
            other => Err(WaymarkError::Config(format!(
                "unknown store backend '{other}' (expected memory or firestore)"
            ))),
        }
    }
}

/// Persisted user configuration stored in `~/.waymark/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreBackend,

    /// Firestore project id (only used with `store = "firestore"`).
    #[serde(skip_serializing_if = "String::is_empty")]
    pub firestore_project: String,

    /// Firestore web API key (stored as plain text; the file is created
    /// owner-only).
    #[serde(skip_serializing_if = "String::is_empty")]
    pub firestore_api_key: String,

    /// Collection holding one document per marker.
    pub collection: String,

    pub enable_cache: bool,

    /// Seconds before a content fetch is abandoned; unset waits forever.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetch_timeout_secs: Option<u64>,

    pub show_with_limited_tracking: bool,

    /// Starting position of the simulated GPS.
    pub sim_latitude: f64,
    pub sim_longitude: f64,
    pub sim_heading_deg: f64,

    pub startup_timeout_secs: u64,
    pub desired_accuracy_m: f64,
    pub update_distance_m: f64,

    /// `false` shows only the markers listed under `[mappings]`, without
    /// fetching content.
    pub use_content_store: bool,

    /// Fixed marker placements, e.g.
    /// `[mappings.biblioteca]` / `offset = { x = 0.0, y = 0.15, z = 0.0 }`.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub mappings: HashMap<String, OverlayPlacement>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("store", &self.store)
            .field("firestore_project", &self.firestore_project)
            .field(
                "firestore_api_key",
                if self.firestore_api_key.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .field("collection", &self.collection)
            .field("enable_cache", &self.enable_cache)
            .field("fetch_timeout_secs", &self.fetch_timeout_secs)
            .field("show_with_limited_tracking", &self.show_with_limited_tracking)
            .field("sim_latitude", &self.sim_latitude)
            .field("sim_longitude", &self.sim_longitude)
            .field("sim_heading_deg", &self.sim_heading_deg)
            .field("startup_timeout_secs", &self.startup_timeout_secs)
            .field("use_content_store", &self.use_content_store)
            .field("mappings", &self.mappings.len())
            .finish_non_exhaustive()
    }
}

impl Default for Config {
    fn default() -> Self {
        let location = LocationConfig::default();
        let content = ResolverConfig::default();
        Self {
            store: StoreBackend::default(),
            firestore_project: String::new(),
            firestore_api_key: String::new(),
            collection: content.collection,
            enable_cache: content.enable_cache,
            fetch_timeout_secs: content.fetch_timeout_secs,
            show_with_limited_tracking: CoordinatorConfig::default().show_with_limited_tracking,
            sim_latitude: 13.7181033,
            sim_longitude: -89.2040915,
            sim_heading_deg: 0.0,
            startup_timeout_secs: location.startup_timeout_secs,
            desired_accuracy_m: location.desired_accuracy_m,
            update_distance_m: location.update_distance_m,
            use_content_store: true,
            mappings: HashMap::new(),
        }
    }
}

impl Config {
    /// Engine configuration derived from the user settings.  Steering keeps
    /// its defaults.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            location: LocationConfig {
                desired_accuracy_m: self.desired_accuracy_m,
                update_distance_m: self.update_distance_m,
                startup_timeout_secs: self.startup_timeout_secs,
            },
            content: ResolverConfig {
                collection: self.collection.clone(),
                enable_cache: self.enable_cache,
                fetch_timeout_secs: self.fetch_timeout_secs,
            },
            tracking: CoordinatorConfig {
                show_with_limited_tracking: self.show_with_limited_tracking,
                use_content_store: self.use_content_store,
                mappings: self.mappings.clone(),
            },
            ..EngineConfig::default()
        }
    }

    /// Reject settings the engine cannot start with.
    pub fn validate(&self) -> Result<(), WaymarkError> {
        if self.collection.trim().is_empty() {
            return Err(WaymarkError::Config("collection must not be empty".into()));
        }
        if !self.use_content_store && self.mappings.is_empty() {
            return Err(WaymarkError::Config(
                "use_content_store = false needs at least one [mappings] entry".into(),
            ));
        }
        if self.store == StoreBackend::Firestore && self.firestore_project.trim().is_empty() {
            return Err(WaymarkError::Config(
                "store = \"firestore\" needs firestore_project".into(),
            ));
        }
        if !(-90.0..=90.0).contains(&self.sim_latitude)
            || !(-180.0..=180.0).contains(&self.sim_longitude)
        {
            return Err(WaymarkError::Config(format!(
                "simulated position {}, {} is out of range",
                self.sim_latitude, self.sim_longitude
            )));
        }
        Ok(())
    }
}

/// Return the path to `~/.waymark/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".waymark").join("config.toml")
}

/// Load the config from disk and apply `WAYMARK_*` overrides.  Returns
/// `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, WaymarkError> {
    Ok(load_from(&config_path())?.map(|mut cfg| {
        apply_env_overrides(&mut cfg);
        cfg
    }))
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, WaymarkError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        WaymarkError::Config(format!("failed to read {}: {e}", path.display()))
    })?;
    let cfg: Config = toml::from_str(&raw)
        .map_err(|e| WaymarkError::Config(format!("failed to parse {}: {e}", path.display())))?;
    Ok(Some(cfg))
}

/// Apply `WAYMARK_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `WAYMARK_STORE` | `store` |
/// | `WAYMARK_FIRESTORE_PROJECT` | `firestore_project` |
/// | `WAYMARK_FIRESTORE_API_KEY` | `firestore_api_key` |
/// | `WAYMARK_COLLECTION` | `collection` |
/// | `WAYMARK_SIM_LAT` | `sim_latitude` |
/// | `WAYMARK_SIM_LON` | `sim_longitude` |
///
/// Unparseable values are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("WAYMARK_STORE") {
        if let Ok(store) = v.parse() {
            cfg.store = store;
        }
    }
    if let Ok(v) = std::env::var("WAYMARK_FIRESTORE_PROJECT") {
        cfg.firestore_project = v;
    }
    if let Ok(v) = std::env::var("WAYMARK_FIRESTORE_API_KEY") {
        cfg.firestore_api_key = v;
    }
    if let Ok(v) = std::env::var("WAYMARK_COLLECTION") {
        cfg.collection = v;
    }
    if let Ok(v) = std::env::var("WAYMARK_SIM_LAT") {
        if let Ok(lat) = v.parse::<f64>() {
            cfg.sim_latitude = lat;
        }
    }
    if let Ok(v) = std::env::var("WAYMARK_SIM_LON") {
        if let Ok(lon) = v.parse::<f64>() {
            cfg.sim_longitude = lon;
        }
    }
}

/// Save the config to disk, creating `~/.waymark/` if necessary.
pub fn save(cfg: &Config) -> Result<(), WaymarkError> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), WaymarkError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            WaymarkError::Config(format!("failed to create {}: {e}", parent.display()))
        })?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700)).map_err(|e| {
                WaymarkError::Config(format!("failed to restrict {}: {e}", parent.display()))
            })?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| WaymarkError::Config(format!("failed to serialize config: {e}")))?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(|e| WaymarkError::Config(format!("failed to write {}: {e}", path.display())))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| WaymarkError::Config(format!("failed to write {}: {e}", path.display())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_api_key() {
        let cfg = Config {
            firestore_api_key: "AIza-super-secret".to_string(),
            ..Config::default()
        };
        let debug_str = format!("{cfg:?}");
        assert!(!debug_str.contains("AIza-super-secret"));
        assert!(debug_str.contains("<redacted>"));
        assert!(format!("{:?}", Config::default()).contains("<not set>"));
    }

    #[test]
    fn defaults_match_campus_setup() {
        let cfg = Config::default();
        assert_eq!(cfg.store, StoreBackend::Memory);
        assert_eq!(cfg.collection, "buildingLocations");
        assert!(cfg.enable_cache);
        assert!(cfg.show_with_limited_tracking);
        assert_eq!(cfg.sim_latitude, 13.7181033);
        assert_eq!(cfg.sim_longitude, -89.2040915);
        assert_eq!(cfg.startup_timeout_secs, 20);
        assert_eq!(cfg.fetch_timeout_secs, None);
    }

    #[test]
    fn engine_config_carries_user_settings() {
        let cfg = Config {
            collection: "campus".into(),
            enable_cache: false,
            fetch_timeout_secs: Some(8),
            show_with_limited_tracking: false,
            startup_timeout_secs: 5,
            ..Config::default()
        };
        let engine = cfg.engine_config();
        assert_eq!(engine.content.collection, "campus");
        assert!(!engine.content.enable_cache);
        assert_eq!(engine.content.fetch_timeout_secs, Some(8));
        assert!(!engine.tracking.show_with_limited_tracking);
        assert_eq!(engine.location.startup_timeout_secs, 5);
        assert_eq!(engine.steering.lookahead_m, 2.0);
    }

    #[test]
    fn validate_rejects_bad_settings() {
        assert!(Config::default().validate().is_ok());

        let cfg = Config {
            store: StoreBackend::Firestore,
            ..Config::default()
        };
        assert!(matches!(cfg.validate(), Err(WaymarkError::Config(_))));

        let cfg = Config {
            sim_latitude: 95.0,
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).expect("file").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = std::fs::metadata(path.parent().unwrap())
            .expect("dir")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn roundtrip_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        let cfg = Config {
            store: StoreBackend::Firestore,
            firestore_project: "campus-ar".into(),
            fetch_timeout_secs: Some(10),
            ..Config::default()
        };

        save_to(&cfg, &path).expect("save");
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("store = \"firestore\""));
        assert!(!raw.contains("firestore_api_key"));

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.firestore_project, "campus-ar");
        assert_eq!(loaded.fetch_timeout_secs, Some(10));
    }

    #[test]
    fn partial_file_uses_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "collection = \"edificios\"\n").unwrap();

        let loaded = load_from(&path).unwrap().unwrap();
        assert_eq!(loaded.collection, "edificios");
        assert_eq!(loaded.sim_latitude, 13.7181033);
    }

    #[test]
    fn mapping_mode_reaches_the_engine() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "use_content_store = false\n\n[mappings.biblioteca]\noffset = { x = 0.0, y = 0.15, z = 0.0 }\n",
        )
        .unwrap();

        let loaded = load_from(&path).unwrap().unwrap();
        assert!(loaded.validate().is_ok());
        let tracking = loaded.engine_config().tracking;
        assert!(!tracking.use_content_store);
        let placement = tracking.mappings["biblioteca"];
        assert_eq!(placement.offset.y, 0.15);
        assert_eq!(placement.scale, OverlayPlacement::IDENTITY.scale);

        let empty = Config {
            use_content_store: false,
            ..Config::default()
        };
        assert!(empty.validate().is_err());
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "store = 42\n").unwrap();
        assert!(matches!(load_from(&path), Err(WaymarkError::Config(_))));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn config_path_points_to_waymark_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".waymark"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn env_overrides_apply_and_ignore_garbage() {
        // SAFETY: these variables are only touched by this test.
        unsafe {
            std::env::set_var("WAYMARK_STORE", "firestore");
            std::env::set_var("WAYMARK_FIRESTORE_PROJECT", "campus-ar");
            std::env::set_var("WAYMARK_COLLECTION", "edificios");
            std::env::set_var("WAYMARK_SIM_LAT", "13.70");
            std::env::set_var("WAYMARK_SIM_LON", "not-a-number");
        }
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        unsafe {
            for var in [
                "WAYMARK_STORE",
                "WAYMARK_FIRESTORE_PROJECT",
                "WAYMARK_COLLECTION",
                "WAYMARK_SIM_LAT",
                "WAYMARK_SIM_LON",
            ] {
                std::env::remove_var(var);
            }
        }

        assert_eq!(cfg.store, StoreBackend::Firestore);
        assert_eq!(cfg.firestore_project, "campus-ar");
        assert_eq!(cfg.collection, "edificios");
        assert_eq!(cfg.sim_latitude, 13.70);
        assert_eq!(cfg.sim_longitude, -89.2040915);
    }

    #[test]
    fn store_backend_parsing() {
        assert_eq!("Memory".parse::<StoreBackend>().unwrap(), StoreBackend::Memory);
        assert!("redis".parse::<StoreBackend>().is_err());
    }
}

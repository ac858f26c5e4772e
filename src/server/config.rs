//! Server configuration

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::auth::{Credential, DEFAULT_REALM};
use crate::error::{Error, Result};

/// Default signaling/HTTP port
pub const DEFAULT_PORT: u16 = 7788;

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Maximum concurrent sessions (0 = unlimited)
    pub max_sessions: usize,

    /// Directory static assets are served from
    pub web_root: PathBuf,

    /// Recordings go under `<record_root>/record/<date>/`
    pub record_root: PathBuf,

    /// Stop recordings automatically after this long
    pub max_record_duration: Option<Duration>,

    /// Where data-channel uploads are written
    pub upload_dir: PathBuf,

    /// Frames queued per ingestion point before drops start
    pub frame_queue_capacity: usize,

    /// Work pool workers
    pub work_pool_workers: usize,

    /// Work pool queue depth
    pub work_queue_capacity: usize,

    /// STUN server handed to the media engine
    pub stun_server: String,

    /// Stats log interval
    pub stats_interval: Duration,

    /// HTTP Digest authentication
    pub auth: AuthConfig,
}

/// Gateway authentication settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Challenge every request when set
    pub enabled: bool,
    pub realm: String,
    /// Accounts loaded into the in-memory credential store
    pub users: Vec<Credential>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            realm: DEFAULT_REALM.to_string(),
            users: Vec::new(),
        }
    }
}

impl AuthConfig {
    /// Auth turned on with no accounts yet
    pub fn required() -> Self {
        Self {
            enabled: true,
            ..Default::default()
        }
    }

    pub fn realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = realm.into();
        self
    }

    pub fn user(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.users.push(Credential::new(username, password));
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            max_sessions: 16,
            web_root: PathBuf::from("./webroot"),
            record_root: PathBuf::from("/tmp/output"),
            max_record_duration: Some(Duration::from_secs(60)),
            upload_dir: PathBuf::from("/tmp/output/upload"),
            frame_queue_capacity: 64,
            work_pool_workers: 2,
            work_queue_capacity: 32,
            stun_server: "stun://stun.l.google.com:19302".to_string(),
            stats_interval: Duration::from_secs(30),
            auth: AuthConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set maximum concurrent sessions
    pub fn max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max;
        self
    }

    /// Set the static asset directory
    pub fn web_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.web_root = dir.into();
        self
    }

    /// Set the recording root
    pub fn record_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.record_root = dir.into();
        self
    }

    /// Set or disable the recording time limit
    pub fn max_record_duration(mut self, limit: Option<Duration>) -> Self {
        self.max_record_duration = limit;
        self
    }

    /// Set the upload directory
    pub fn upload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.upload_dir = dir.into();
        self
    }

    /// Set the per-sink frame queue depth
    pub fn frame_queue_capacity(mut self, capacity: usize) -> Self {
        self.frame_queue_capacity = capacity.max(1);
        self
    }

    /// Set the gateway authentication
    pub fn auth(mut self, auth: AuthConfig) -> Self {
        self.auth = auth;
        self
    }

    /// Load from a JSON file; absent keys keep their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Parse from JSON text; absent keys keep their defaults
    pub fn from_json_str(text: &str) -> Result<Self> {
        let file: ConfigFile = serde_json::from_str(text)?;
        file.apply(Self::default())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct HttpSection {
    host: Option<String>,
    port: Option<u16>,
}

/// On-disk layout; every key optional, durations in seconds
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    http: Option<HttpSection>,
    max_sessions: Option<usize>,
    webroot: Option<PathBuf>,
    rootdir: Option<PathBuf>,
    /// 0 disables the limit
    rec_len: Option<u64>,
    upload_dir: Option<PathBuf>,
    frame_queue: Option<usize>,
    workers: Option<usize>,
    work_queue: Option<usize>,
    stun_server: Option<String>,
    stats_interval: Option<u64>,
    auth: Option<AuthConfig>,
}

impl ConfigFile {
    fn apply(self, mut config: ServerConfig) -> Result<ServerConfig> {
        if let Some(http) = self.http {
            if let Some(host) = http.host {
                let ip: IpAddr = host
                    .parse()
                    .map_err(|_| Error::Config(format!("invalid http.host `{}`", host)))?;
                config.bind_addr.set_ip(ip);
            }
            if let Some(port) = http.port {
                config.bind_addr.set_port(port);
            }
        }

        if let Some(max) = self.max_sessions {
            config.max_sessions = max;
        }
        if let Some(dir) = self.webroot {
            config.web_root = dir;
        }
        if let Some(dir) = self.rootdir {
            // Uploads follow the root unless placed explicitly
            config.upload_dir = dir.join("upload");
            config.record_root = dir;
        }
        if let Some(secs) = self.rec_len {
            config.max_record_duration = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(dir) = self.upload_dir {
            config.upload_dir = dir;
        }
        if let Some(n) = self.frame_queue {
            config.frame_queue_capacity = n.max(1);
        }
        if let Some(n) = self.workers {
            config.work_pool_workers = n.max(1);
        }
        if let Some(n) = self.work_queue {
            config.work_queue_capacity = n.max(1);
        }
        if let Some(stun) = self.stun_server {
            config.stun_server = stun;
        }
        if let Some(secs) = self.stats_interval {
            config.stats_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(auth) = self.auth {
            if auth.realm.is_empty() {
                return Err(Error::Config("auth.realm must not be empty".to_string()));
            }
            config.auth = auth;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();

        assert_eq!(config.bind_addr.port(), DEFAULT_PORT);
        assert_eq!(config.max_sessions, 16);
        assert_eq!(config.max_record_duration, Some(Duration::from_secs(60)));
        assert_eq!(config.record_root, PathBuf::from("/tmp/output"));
        assert!(!config.auth.enabled);
        assert_eq!(config.auth.realm, DEFAULT_REALM);
    }

    #[test]
    fn test_builder_chaining() {
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let config = ServerConfig::default()
            .bind(addr)
            .max_sessions(4)
            .web_root("/srv/www")
            .max_record_duration(None)
            .frame_queue_capacity(0);

        assert_eq!(config.bind_addr, addr);
        assert_eq!(config.max_sessions, 4);
        assert_eq!(config.web_root, PathBuf::from("/srv/www"));
        assert_eq!(config.max_record_duration, None);
        assert_eq!(config.frame_queue_capacity, 1);
    }

    #[test]
    fn test_json_overrides() {
        let config = ServerConfig::from_json_str(
            r#"{
                "http": {"host": "127.0.0.1", "port": 8443},
                "rootdir": "/data/cam",
                "rec_len": 0,
                "max_sessions": 2
            }"#,
        )
        .unwrap();

        assert_eq!(config.bind_addr, "127.0.0.1:8443".parse::<SocketAddr>().unwrap());
        assert_eq!(config.record_root, PathBuf::from("/data/cam"));
        assert_eq!(config.upload_dir, PathBuf::from("/data/cam/upload"));
        assert_eq!(config.max_record_duration, None);
        assert_eq!(config.max_sessions, 2);
        assert_eq!(config.work_pool_workers, 2);
    }

    #[test]
    fn test_json_empty_object_is_default() {
        let config = ServerConfig::from_json_str("{}").unwrap();
        assert_eq!(config.bind_addr.port(), DEFAULT_PORT);
    }

    #[test]
    fn test_json_bad_host() {
        let err = ServerConfig::from_json_str(r#"{"http":{"host":"not-an-ip"}}"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_json_auth_section() {
        let config = ServerConfig::from_json_str(
            r#"{
                "auth": {
                    "enabled": true,
                    "users": [
                        {"username": "test", "password": "test1234"},
                        {"username": "old", "password": "x", "active": false}
                    ]
                }
            }"#,
        )
        .unwrap();

        assert!(config.auth.enabled);
        assert_eq!(config.auth.realm, DEFAULT_REALM);
        assert_eq!(config.auth.users.len(), 2);
        assert!(config.auth.users[0].active);
        assert!(!config.auth.users[1].active);

        let err = ServerConfig::from_json_str(r#"{"auth":{"enabled":true,"realm":""}}"#)
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"webroot": "/opt/web"}"#).unwrap();

        let config = ServerConfig::from_json_file(&path).unwrap();
        assert_eq!(config.web_root, PathBuf::from("/opt/web"));

        assert!(matches!(
            ServerConfig::from_json_file(dir.path().join("missing.json")),
            Err(Error::Io(_))
        ));
    }
}

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Args;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use echonet_grid::{local_ip, NodeId, DEFAULT_ADVERTISE_INTERVAL, DEFAULT_PEER_TTL};
use echonet_skill::DEFAULT_REMOTE_TIMEOUT;

use crate::skills::BUILTIN_SKILLS;

/// Token accepted when no users file exists.
pub const DEFAULT_USER_TOKEN: &str = "testtoken123";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Node options shared by every subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct NodeArgs {
    /// Node id (defaults to hostname)
    #[arg(short, long)]
    pub id: Option<String>,

    /// HTTP port to listen on
    #[arg(short, long, default_value = "5000")]
    pub port: u16,

    /// Base URL peers use to reach this node (defaults to http://<lan ip>:<port>)
    #[arg(short, long)]
    pub url: Option<String>,

    /// Skills this node provides (comma-separated, defaults to all built-ins)
    #[arg(short, long)]
    pub skills: Option<String>,

    /// Work units this node accepts before it reports itself as loaded
    #[arg(long, default_value = "5")]
    pub max_load: u32,

    #[arg(long)]
    pub advertise_interval_secs: Option<u64>,

    #[arg(long)]
    pub peer_ttl_secs: Option<u64>,

    #[arg(long)]
    pub remote_timeout_secs: Option<u64>,

    /// JSON users file: {"users": [{"id": "...", "token": "..."}]}
    #[arg(long)]
    pub users: Option<PathBuf>,

    /// Route each op to the healthiest node instead of the first match
    #[arg(long)]
    pub health_aware: bool,
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub id: NodeId,
    pub port: u16,
    pub url: String,
    pub skills: Vec<String>,
    pub max_load: u32,
    pub advertise_interval: Duration,
    pub peer_ttl: Duration,
    pub remote_timeout: Duration,
    pub users_file: PathBuf,
    pub health_aware: bool,
}

impl NodeConfig {
    pub fn from_args(args: NodeArgs) -> Result<Self, ConfigError> {
        let id = args.id.unwrap_or_else(|| {
            std::env::var("HOSTNAME")
                .or_else(|_| std::env::var("COMPUTERNAME"))
                .unwrap_or_else(|_| format!("echonet-{}", &uuid::Uuid::new_v4().to_string()[..8]))
        });
        if id.trim().is_empty() {
            return Err(ConfigError::Invalid("node id must not be empty".into()));
        }

        let url = args
            .url
            .unwrap_or_else(|| format!("http://{}:{}", local_ip(), args.port));

        let skills: Vec<String> = match args.skills {
            Some(list) => list
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            None => BUILTIN_SKILLS.iter().map(|s| s.to_string()).collect(),
        };
        if let Some(unknown) = skills.iter().find(|s| !BUILTIN_SKILLS.contains(&s.as_str())) {
            return Err(ConfigError::Invalid(format!(
                "unknown skill {} (available: {})",
                unknown,
                BUILTIN_SKILLS.join(", ")
            )));
        }

        let users_file = args.users.unwrap_or_else(|| {
            directories::ProjectDirs::from("net", "echonet", "echonetd")
                .map(|d| d.data_dir().join("users.json"))
                .unwrap_or_else(|| PathBuf::from(".echonet/users.json"))
        });

        Ok(Self {
            id: NodeId::new(id),
            port: args.port,
            url,
            skills,
            max_load: args.max_load.max(1),
            advertise_interval: args
                .advertise_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_ADVERTISE_INTERVAL),
            peer_ttl: args
                .peer_ttl_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_PEER_TTL),
            remote_timeout: args
                .remote_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_REMOTE_TIMEOUT),
            users_file,
            health_aware: args.health_aware,
        })
    }
}

#[derive(Deserialize)]
struct UsersFile {
    users: Vec<UserEntry>,
}

#[derive(Deserialize)]
struct UserEntry {
    id: String,
    token: String,
}

/// Tokens allowed to submit tasks, mapped to user ids.
#[derive(Debug, Clone)]
pub struct UserTable {
    by_token: HashMap<String, String>,
}

impl UserTable {
    pub fn new<I>(users: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Self {
            by_token: users.into_iter().map(|(id, token)| (token, id)).collect(),
        }
    }

    /// Load `path`, or fall back to the single built-in test user when it
    /// does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    "No users file at {}, accepting only the built-in test token",
                    path.display()
                );
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let file: UsersFile = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Loaded {} users from {}", file.users.len(), path.display());
        Ok(Self::new(file.users.into_iter().map(|u| (u.id, u.token))))
    }

    pub fn user_for(&self, token: &str) -> Option<&str> {
        self.by_token.get(token).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_token.is_empty()
    }
}

impl Default for UserTable {
    fn default() -> Self {
        Self::new([("test".to_string(), DEFAULT_USER_TOKEN.to_string())])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn args() -> NodeArgs {
        NodeArgs {
            id: Some("nodeA".into()),
            port: 5000,
            max_load: 5,
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = NodeConfig::from_args(args()).unwrap();
        assert_eq!(config.id.as_str(), "nodeA");
        assert_eq!(config.skills, vec!["echo", "uppercase"]);
        assert_eq!(config.peer_ttl, DEFAULT_PEER_TTL);
        assert!(config.url.ends_with(":5000"));
    }

    #[test]
    fn test_skill_list_and_overrides() {
        let config = NodeConfig::from_args(NodeArgs {
            skills: Some(" uppercase , ".into()),
            url: Some("http://10.0.0.9:5000".into()),
            peer_ttl_secs: Some(30),
            ..args()
        })
        .unwrap();
        assert_eq!(config.skills, vec!["uppercase"]);
        assert_eq!(config.url, "http://10.0.0.9:5000");
        assert_eq!(config.peer_ttl, Duration::from_secs(30));
    }

    #[test]
    fn test_unknown_skill_rejected() {
        let err = NodeConfig::from_args(NodeArgs {
            skills: Some("echo,teleport".into()),
            ..args()
        })
        .unwrap_err();
        assert!(err.to_string().contains("teleport"));
    }

    #[test]
    fn test_users_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"users": [{{"id": "alice", "token": "a-token"}}, {{"id": "bob", "token": "b-token"}}]}}"#
        )
        .unwrap();

        let users = UserTable::load(file.path()).unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users.user_for("b-token"), Some("bob"));
        assert_eq!(users.user_for(DEFAULT_USER_TOKEN), None);
    }

    #[test]
    fn test_missing_users_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let users = UserTable::load(&dir.path().join("users.json")).unwrap();
        assert_eq!(users.user_for(DEFAULT_USER_TOKEN), Some("test"));
    }

    #[test]
    fn test_malformed_users_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{\"users\": 3}}").unwrap();
        assert!(matches!(
            UserTable::load(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }
}

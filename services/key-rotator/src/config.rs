//! Configuration types and loading
//!
//! Precedence: env vars > config file > defaults. The config file is optional
//! unless named explicitly. API keys and the access token are read from env
//! vars or from files referenced by the config, never from the TOML body.

use common::Secret;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Default upstream: the generative-language API.
pub const DEFAULT_UPSTREAM_URL: &str = "https://generativelanguage.googleapis.com";

/// Config file looked up in the working directory when none is named.
pub const DEFAULT_CONFIG_FILE: &str = "key-rotator.toml";

/// Root configuration
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub pool: PoolConfig,
    pub access: AccessConfig,
    /// Pool credentials, in order. From `API_KEYS` or `pool.keys_file`.
    #[serde(skip)]
    pub credentials: Vec<Secret<String>>,
}

/// Inbound listener settings
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub max_connections: usize,
    pub max_body_bytes: usize,
    /// Routing prefix removed from the inbound path before forwarding
    pub strip_prefix: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            max_body_bytes: 10 * 1024 * 1024,
            strip_prefix: None,
        }
    }
}

/// How the credential reaches the upstream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthStyle {
    /// `?key=<credential>`
    #[default]
    Query,
    /// `<auth_header>: <credential>`
    Header,
}

/// Upstream API settings
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UpstreamConfig {
    pub url: String,
    pub timeout_secs: u64,
    pub auth_style: AuthStyle,
    pub auth_header: String,
    pub key_param: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_UPSTREAM_URL.to_string(),
            timeout_secs: 120,
            auth_style: AuthStyle::Query,
            auth_header: provider::header_key::DEFAULT_HEADER.to_string(),
            key_param: provider::query_key::DEFAULT_PARAM.to_string(),
        }
    }
}

/// Credential pool settings
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    pub cooldown_secs: u64,
    /// File with one API key per line (alternative to `API_KEYS`)
    pub keys_file: Option<PathBuf>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: key_pool::DEFAULT_COOLDOWN.as_secs(),
            keys_file: None,
        }
    }
}

/// Shared-secret access check settings
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AccessConfig {
    /// Header callers must send the token in
    pub header: String,
    /// File containing the token (alternative to `AUTH_TOKEN`)
    pub token_file: Option<PathBuf>,
    #[serde(skip)]
    pub token: Option<Secret<String>>,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            header: crate::gate::DEFAULT_ACCESS_HEADER.to_string(),
            token_file: None,
            token: None,
        }
    }
}

impl Config {
    /// Load configuration from an optional TOML file, then overlay the
    /// process environment.
    ///
    /// Env vars: `LISTEN_ADDR`, `UPSTREAM_URL`, `API_KEYS`, `AUTH_TOKEN`.
    pub fn load(path: Option<&Path>) -> common::Result<Self> {
        Self::load_with_env(path, |name| std::env::var(name).ok())
    }

    /// `load` with an injectable environment lookup.
    pub fn load_with_env(
        path: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> common::Result<Self> {
        let mut config: Config = match path {
            Some(path) => toml::from_str(&std::fs::read_to_string(path)?)?,
            None => Config::default(),
        };

        if let Some(addr) = env("LISTEN_ADDR") {
            config.server.listen_addr = addr.parse().map_err(|e| {
                common::Error::Config(format!("LISTEN_ADDR is not a socket address: {e}"))
            })?;
        }
        if let Some(url) = env("UPSTREAM_URL").filter(|u| !u.trim().is_empty()) {
            config.upstream.url = url.trim().to_string();
        }

        // Credentials: env var takes precedence over file
        let raw_keys = match (env("API_KEYS"), &config.pool.keys_file) {
            (Some(keys), _) => Some(keys),
            (None, Some(file)) => Some(
                std::fs::read_to_string(file)
                    .map(|raw| strip_comment_lines(&raw))
                    .map_err(|e| {
                        common::Error::Config(format!(
                            "failed to read keys_file {}: {e}",
                            file.display()
                        ))
                    })?,
            ),
            (None, None) => None,
        };
        config.credentials = raw_keys.as_deref().map(parse_credentials).unwrap_or_default();

        // Access token: env var takes precedence over file; blank means open
        let raw_token = match (env("AUTH_TOKEN"), &config.access.token_file) {
            (Some(token), _) => Some(token),
            (None, Some(file)) => Some(std::fs::read_to_string(file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read token_file {}: {e}",
                    file.display()
                ))
            })?),
            (None, None) => None,
        };
        config.access.token = raw_token
            .map(|t| t.trim().to_owned())
            .filter(|t| !t.is_empty())
            .map(Secret::new);

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        let url = reqwest::Url::parse(&self.upstream.url).map_err(|e| {
            common::Error::Config(format!(
                "upstream url is not a valid URL ({e}): {}",
                self.upstream.url
            ))
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(common::Error::Config(format!(
                "upstream url must start with http:// or https://, got: {}",
                self.upstream.url
            )));
        }
        if url.query().is_some() {
            return Err(common::Error::Config(
                "upstream url must not carry a query string".into(),
            ));
        }
        if self.upstream.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }
        if self.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }
        if self.server.max_body_bytes == 0 {
            return Err(common::Error::Config(
                "max_body_bytes must be greater than 0".into(),
            ));
        }
        if self.pool.cooldown_secs == 0 {
            return Err(common::Error::Config(
                "cooldown_secs must be greater than 0".into(),
            ));
        }
        if let Some(prefix) = &self.server.strip_prefix
            && (!prefix.starts_with('/') || prefix.len() < 2)
        {
            return Err(common::Error::Config(format!(
                "strip_prefix must start with '/' and be non-empty, got: {prefix}"
            )));
        }
        if self.credentials.is_empty() {
            return Err(common::Error::NoCredentials);
        }
        Ok(())
    }

    /// Resolve the config file from CLI arg or `CONFIG_PATH` env var.
    ///
    /// Explicit paths are returned as-is (loading fails if missing). The
    /// default file is only used when it exists.
    pub fn resolve_path(cli_path: Option<&str>) -> Option<PathBuf> {
        if let Some(p) = cli_path {
            return Some(PathBuf::from(p));
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return Some(PathBuf::from(p));
        }
        let default = PathBuf::from(DEFAULT_CONFIG_FILE);
        default.exists().then_some(default)
    }
}

/// Split a key list on commas and newlines. Blank entries are dropped;
/// order and duplicates are kept.
pub fn parse_credentials(raw: &str) -> Vec<Secret<String>> {
    raw.split([',', '\n'])
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(|k| Secret::new(k.to_owned()))
        .collect()
}

/// Drop `#` comment lines from a keys file.
fn strip_comment_lines(raw: &str) -> String {
    raw.lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Mutex to serialize tests that mutate environment variables, preventing
    /// data races when tests run in parallel.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// SAFETY: Callers must hold ENV_MUTEX to prevent concurrent env mutation.
    unsafe fn set_env(key: &str, val: &str) {
        unsafe { std::env::set_var(key, val) };
    }

    unsafe fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn write_config(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("key-rotator.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn exposed(config: &Config) -> Vec<&str> {
        config
            .credentials
            .iter()
            .map(|k| k.expose().as_str())
            .collect()
    }

    #[test]
    fn defaults_with_keys_from_env() {
        let config = Config::load_with_env(None, env_of(&[("API_KEYS", "k1,k2")])).unwrap();
        assert_eq!(config.upstream.url, DEFAULT_UPSTREAM_URL);
        assert_eq!(config.upstream.timeout_secs, 120);
        assert_eq!(config.upstream.auth_style, AuthStyle::Query);
        assert_eq!(config.pool.cooldown_secs, 3600);
        assert_eq!(config.server.listen_addr.port(), 8080);
        assert_eq!(config.server.max_connections, 1000);
        assert_eq!(config.access.header, "x-proxy-token");
        assert!(config.access.token.is_none());
        assert_eq!(exposed(&config), vec!["k1", "k2"]);
    }

    #[test]
    fn no_credentials_fails_fast() {
        let err = Config::load_with_env(None, env_of(&[])).unwrap_err();
        assert!(matches!(err, common::Error::NoCredentials), "got: {err}");

        let err = Config::load_with_env(None, env_of(&[("API_KEYS", " , ,\n")])).unwrap_err();
        assert!(matches!(err, common::Error::NoCredentials), "got: {err}");
    }

    #[test]
    fn full_file_is_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
[server]
listen_addr = "127.0.0.1:9000"
max_connections = 50
max_body_bytes = 1024
strip_prefix = "/gemini"

[upstream]
url = "http://localhost:4000"
timeout_secs = 30
auth_style = "header"
auth_header = "x-api-key"

[pool]
cooldown_secs = 600

[access]
header = "x-token"
"#,
        );

        let config = Config::load_with_env(Some(&path), env_of(&[("API_KEYS", "a")])).unwrap();
        assert_eq!(
            config.server.listen_addr,
            "127.0.0.1:9000".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(config.server.max_connections, 50);
        assert_eq!(config.server.max_body_bytes, 1024);
        assert_eq!(config.server.strip_prefix.as_deref(), Some("/gemini"));
        assert_eq!(config.upstream.url, "http://localhost:4000");
        assert_eq!(config.upstream.timeout_secs, 30);
        assert_eq!(config.upstream.auth_style, AuthStyle::Header);
        assert_eq!(config.upstream.auth_header, "x-api-key");
        assert_eq!(config.pool.cooldown_secs, 600);
        assert_eq!(config.access.header, "x-token");
    }

    #[test]
    fn keys_in_toml_body_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "[pool]\nkeys = [\"AIza-inline\"]\n");
        let result = Config::load_with_env(Some(&path), env_of(&[("API_KEYS", "a")]));
        assert!(matches!(result, Err(common::Error::Toml(_))));
    }

    #[test]
    fn keys_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let keys = dir.path().join("keys");
        std::fs::write(&keys, "# primary\nk1\n\nk2\nk3\n").unwrap();
        let path = write_config(&dir, &format!("[pool]\nkeys_file = {:?}\n", keys));

        let config = Config::load_with_env(Some(&path), env_of(&[])).unwrap();
        assert_eq!(exposed(&config), vec!["k1", "k2", "k3"]);
    }

    #[test]
    fn env_keys_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "[pool]\nkeys_file = \"/nonexistent/keys\"\n");
        let config =
            Config::load_with_env(Some(&path), env_of(&[("API_KEYS", "from-env")])).unwrap();
        assert_eq!(exposed(&config), vec!["from-env"]);
    }

    #[test]
    fn env_keys_have_no_comment_syntax() {
        let config = Config::load_with_env(None, env_of(&[("API_KEYS", "#k1,k2")])).unwrap();
        assert_eq!(exposed(&config), vec!["#k1", "k2"]);
    }

    #[test]
    fn missing_keys_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "[pool]\nkeys_file = \"/nonexistent/keys\"\n");
        let err = Config::load_with_env(Some(&path), env_of(&[])).unwrap_err();
        assert!(err.to_string().contains("keys_file"), "got: {err}");
    }

    #[test]
    fn token_from_env_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let token = dir.path().join("token");
        std::fs::write(&token, "file-token\n").unwrap();
        let path = write_config(&dir, &format!("[access]\ntoken_file = {:?}\n", token));

        let config = Config::load_with_env(Some(&path), env_of(&[("API_KEYS", "k")])).unwrap();
        assert_eq!(config.access.token.as_ref().unwrap().expose(), "file-token");

        let config = Config::load_with_env(
            Some(&path),
            env_of(&[("API_KEYS", "k"), ("AUTH_TOKEN", "env-token")]),
        )
        .unwrap();
        assert_eq!(config.access.token.as_ref().unwrap().expose(), "env-token");
    }

    #[test]
    fn blank_token_means_open_proxy() {
        let config = Config::load_with_env(
            None,
            env_of(&[("API_KEYS", "k"), ("AUTH_TOKEN", "  \n")]),
        )
        .unwrap();
        assert!(config.access.token.is_none());
    }

    #[test]
    fn env_overrides_upstream_and_listen_addr() {
        let config = Config::load_with_env(
            None,
            env_of(&[
                ("API_KEYS", "k"),
                ("UPSTREAM_URL", "http://127.0.0.1:9999"),
                ("LISTEN_ADDR", "127.0.0.1:3000"),
            ]),
        )
        .unwrap();
        assert_eq!(config.upstream.url, "http://127.0.0.1:9999");
        assert_eq!(config.server.listen_addr.port(), 3000);
    }

    #[test]
    fn invalid_listen_addr_rejected() {
        let err = Config::load_with_env(
            None,
            env_of(&[("API_KEYS", "k"), ("LISTEN_ADDR", "localhost")]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("LISTEN_ADDR"), "got: {err}");
    }

    #[test]
    fn invalid_upstream_url_rejected() {
        for url in ["generativelanguage.googleapis.com", "ftp://example.test"] {
            let result =
                Config::load_with_env(None, env_of(&[("API_KEYS", "k"), ("UPSTREAM_URL", url)]));
            assert!(result.is_err(), "{url} must be rejected");
        }
        let result = Config::load_with_env(
            None,
            env_of(&[("API_KEYS", "k"), ("UPSTREAM_URL", "https://x.test/?key=a")]),
        );
        assert!(result.is_err(), "query string on upstream must be rejected");
    }

    #[test]
    fn zero_values_rejected() {
        let dir = tempfile::tempdir().unwrap();
        for body in [
            "[upstream]\ntimeout_secs = 0\n",
            "[server]\nmax_connections = 0\n",
            "[server]\nmax_body_bytes = 0\n",
            "[pool]\ncooldown_secs = 0\n",
            "[server]\nstrip_prefix = \"api\"\n",
        ] {
            let path = write_config(&dir, body);
            let result = Config::load_with_env(Some(&path), env_of(&[("API_KEYS", "k")]));
            assert!(
                matches!(result, Err(common::Error::Config(_))),
                "{body:?} must be rejected"
            );
        }
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let result = Config::load_with_env(
            Some(Path::new("/nonexistent/key-rotator.toml")),
            env_of(&[("API_KEYS", "k")]),
        );
        assert!(matches!(result, Err(common::Error::Io(_))));
    }

    #[test]
    fn parse_credentials_splits_and_trims() {
        let keys = parse_credentials(" a, b ,\nc\r\n,,a");
        let keys: Vec<&str> = keys.iter().map(|k| k.expose().as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "c", "a"]);
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let config = Config::load_with_env(
            None,
            env_of(&[("API_KEYS", "AIza-visible"), ("AUTH_TOKEN", "tok-visible")]),
        )
        .unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("AIza-visible"), "got: {debug}");
        assert!(!debug.contains("tok-visible"), "got: {debug}");
    }

    #[test]
    fn resolve_path_cli_arg() {
        let path = Config::resolve_path(Some("/custom/path.toml"));
        assert_eq!(path, Some(PathBuf::from("/custom/path.toml")));
    }

    #[test]
    fn resolve_path_env_var() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("CONFIG_PATH", "/env/path.toml") };
        let path = Config::resolve_path(None);
        assert_eq!(path, Some(PathBuf::from("/env/path.toml")));
        unsafe { remove_env("CONFIG_PATH") };
    }

    #[test]
    fn resolve_path_cli_overrides_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("CONFIG_PATH", "/env/should-lose.toml") };
        let path = Config::resolve_path(Some("/cli/wins.toml"));
        assert_eq!(path, Some(PathBuf::from("/cli/wins.toml")));
        unsafe { remove_env("CONFIG_PATH") };
    }

    #[test]
    fn load_reads_process_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("API_KEYS", "process-key") };
        let config = Config::load(None).unwrap();
        assert_eq!(exposed(&config), vec!["process-key"]);
        unsafe { remove_env("API_KEYS") };
    }
}

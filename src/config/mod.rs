use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

fn default_name() -> String {
    "Origin".to_string()
}

fn default_data_path() -> PathBuf {
    PathBuf::from("./data")
}

fn default_ssh_listen_addr() -> String {
    "0.0.0.0:22222".to_string()
}

fn default_http_listen_addr() -> String {
    "0.0.0.0:3443".to_string()
}

fn default_public_url() -> String {
    "https://localhost:3443".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct SshConfig {
    #[serde(default = "default_ssh_listen_addr")]
    pub listen_addr: String,
    /// Host key location. Defaults to `<data_path>/ssh/host_ed25519`.
    #[serde(default)]
    pub host_key_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_public_url")]
    pub public_url: String,
    #[serde(default)]
    pub tls_cert_path: Option<PathBuf>,
    #[serde(default)]
    pub tls_key_path: Option<PathBuf>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_ssh_listen_addr(),
            host_key_path: None,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_http_listen_addr(),
            public_url: default_public_url(),
            tls_cert_path: None,
            tls_key_path: None,
        }
    }
}

/// Top-level server configuration, loadable from a YAML file with
/// `ORIGIN_*` environment overrides layered on top.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_data_path")]
    pub data_path: PathBuf,
    #[serde(default)]
    pub ssh: SshConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: default_name(),
            data_path: default_data_path(),
            ssh: SshConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

impl Config {
    /// Load config from a YAML file, apply environment overrides, then
    /// validate and resolve paths. A missing file is not an error; defaults
    /// plus environment apply.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = match fs::read_to_string(path) {
            Ok(contents) => serde_yaml::from_str(&contents)
                .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => return Err(Error::Io(e)),
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("ORIGIN_NAME") {
            self.name = v;
        }
        if let Ok(v) = std::env::var("ORIGIN_DATA_PATH") {
            self.data_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ORIGIN_SSH_LISTEN_ADDR") {
            self.ssh.listen_addr = v;
        }
        if let Ok(v) = std::env::var("ORIGIN_SSH_HOST_KEY_PATH") {
            self.ssh.host_key_path = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("ORIGIN_HTTP_LISTEN_ADDR") {
            self.http.listen_addr = v;
        }
        if let Ok(v) = std::env::var("ORIGIN_HTTP_PUBLIC_URL") {
            self.http.public_url = v;
        }
        if let Ok(v) = std::env::var("ORIGIN_HTTP_TLS_CERT_PATH") {
            self.http.tls_cert_path = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("ORIGIN_HTTP_TLS_KEY_PATH") {
            self.http.tls_key_path = Some(PathBuf::from(v));
        }
    }

    /// Resolve relative paths against the data directory and normalize the
    /// public URL.
    fn validate(&mut self) -> Result<()> {
        if !self.data_path.is_absolute() {
            self.data_path = std::env::current_dir()
                .map_err(|e| Error::Config(format!("resolve data_path: {e}")))?
                .join(&self.data_path);
        }

        while self.http.public_url.ends_with('/') {
            self.http.public_url.pop();
        }

        if let Some(p) = self.ssh.host_key_path.take() {
            self.ssh.host_key_path = Some(self.resolve(p));
        }
        if let Some(p) = self.http.tls_cert_path.take() {
            self.http.tls_cert_path = Some(self.resolve(p));
        }
        if let Some(p) = self.http.tls_key_path.take() {
            self.http.tls_key_path = Some(self.resolve(p));
        }

        Ok(())
    }

    fn resolve(&self, path: PathBuf) -> PathBuf {
        if path.is_absolute() {
            path
        } else {
            self.data_path.join(path)
        }
    }

    #[must_use]
    pub fn repos_path(&self) -> PathBuf {
        self.data_path.join("repos")
    }

    #[must_use]
    pub fn repo_path(&self, name: &str) -> PathBuf {
        self.repos_path().join(format!("{name}.git"))
    }

    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_path.join("origin.db")
    }

    /// Effective SSH host key path, defaulting to `<data>/ssh/host_ed25519`.
    #[must_use]
    pub fn ssh_host_key_path(&self) -> PathBuf {
        match &self.ssh.host_key_path {
            Some(p) => p.clone(),
            None => self.data_path.join("ssh").join("host_ed25519"),
        }
    }

    #[must_use]
    pub fn has_tls(&self) -> bool {
        self.http.tls_cert_path.is_some() && self.http.tls_key_path.is_some()
    }

    /// Create the data directory skeleton. Failure here is fatal at boot.
    pub fn ensure_directories(&self) -> Result<()> {
        let dirs = [
            self.data_path.clone(),
            self.repos_path(),
            self.ssh_host_key_path()
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| self.data_path.clone()),
            self.data_path.join("log"),
        ];

        for dir in &dirs {
            fs::create_dir_all(dir)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(dir, fs::Permissions::from_mode(0o755))?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.name, "Origin");
        assert_eq!(config.ssh.listen_addr, "0.0.0.0:22222");
        assert_eq!(config.http.listen_addr, "0.0.0.0:3443");
        assert!(!config.has_tls());
    }

    #[test]
    fn parse_yaml_document() {
        let yaml = r#"
name: Test Forge
data_path: /srv/origin
ssh:
  listen_addr: "127.0.0.1:2222"
http:
  listen_addr: "127.0.0.1:8443"
  public_url: "https://git.example.com/"
"#;
        let mut config: Config = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.name, "Test Forge");
        assert_eq!(config.data_path, PathBuf::from("/srv/origin"));
        assert_eq!(config.ssh.listen_addr, "127.0.0.1:2222");
        // Trailing slash stripped.
        assert_eq!(config.http.public_url, "https://git.example.com");
    }

    #[test]
    fn relative_paths_resolve_against_data_path() {
        let yaml = r#"
data_path: /srv/origin
ssh:
  host_key_path: keys/host
http:
  tls_cert_path: tls/cert.pem
  tls_key_path: /etc/ssl/key.pem
"#;
        let mut config: Config = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.ssh_host_key_path(), PathBuf::from("/srv/origin/keys/host"));
        assert_eq!(
            config.http.tls_cert_path.as_deref(),
            Some(Path::new("/srv/origin/tls/cert.pem"))
        );
        assert_eq!(
            config.http.tls_key_path.as_deref(),
            Some(Path::new("/etc/ssl/key.pem"))
        );
        assert!(config.has_tls());
    }

    #[test]
    fn host_key_path_default() {
        let mut config = Config::default();
        config.data_path = PathBuf::from("/data");
        assert_eq!(
            config.ssh_host_key_path(),
            PathBuf::from("/data/ssh/host_ed25519")
        );
    }

    #[test]
    fn repo_path_appends_git_suffix() {
        let mut config = Config::default();
        config.data_path = PathBuf::from("/data");
        assert_eq!(config.repo_path("proj"), PathBuf::from("/data/repos/proj.git"));
    }
}

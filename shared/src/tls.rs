//! Certificate material for TLS-enabled environments

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::bridge_conf::TlsConf;
use crate::errors::{SharedError, SharedResult};

/// Default directory holding the test certificates
pub const DEFAULT_CERT_DIR: &str = "resources/certs";

/// Fixed certificate, key and trust-root paths for the server and client roles
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsMaterial {
    pub server_cert: PathBuf,
    pub server_key: PathBuf,
    pub client_cert: PathBuf,
    pub client_key: PathBuf,
    pub ca_file: PathBuf,
}

impl Default for TlsMaterial {
    fn default() -> Self {
        Self::from_dir(DEFAULT_CERT_DIR)
    }
}

impl TlsMaterial {
    /// Standard file names inside `dir`
    pub fn from_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            server_cert: dir.join("server-cert.pem"),
            server_key: dir.join("server-key.pem"),
            client_cert: dir.join("client-cert.pem"),
            client_key: dir.join("client-key.pem"),
            ca_file: dir.join("truststore.pem"),
        }
    }

    /// Server certificate and key, as the bridge's monitoring listener expects them
    pub fn server_conf(&self) -> TlsConf {
        TlsConf {
            cert: Some(self.server_cert.clone()),
            key: Some(self.server_key.clone()),
            root: None,
        }
    }

    /// Full client triple used for every broker-facing TLS connection
    pub fn client_conf(&self) -> TlsConf {
        TlsConf {
            cert: Some(self.client_cert.clone()),
            key: Some(self.client_key.clone()),
            root: Some(self.ca_file.clone()),
        }
    }

    /// Trust root only
    pub fn trust_conf(&self) -> TlsConf {
        TlsConf {
            cert: None,
            key: None,
            root: Some(self.ca_file.clone()),
        }
    }

    pub fn validate_server(&self) -> SharedResult<()> {
        check_exists(&[&self.server_cert, &self.server_key, &self.ca_file])
    }

    pub fn validate_client(&self) -> SharedResult<()> {
        check_exists(&[&self.client_cert, &self.client_key, &self.ca_file])
    }
}

fn check_exists(paths: &[&PathBuf]) -> SharedResult<()> {
    for path in paths {
        if !path.is_file() {
            return Err(SharedError::MissingTlsFile {
                path: path.display().to_string(),
            });
        }
    }
    Ok(())
}

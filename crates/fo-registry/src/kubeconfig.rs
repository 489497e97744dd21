//! Kubeconfig loading for out-of-cluster use
//!
//! Only the current context is read. Supported credentials are bearer tokens
//! (`token`, `tokenFile`) and client certificates, inline (`*-data`) or by
//! path. Exec and auth-provider plugins are not run.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::kubernetes::{KubernetesConfig, SERVICE_ACCOUNT_DIR};
use crate::{RegistryError, Result};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Kubeconfig {
    #[serde(default)]
    pub current_context: Option<String>,
    #[serde(default)]
    pub contexts: Vec<NamedContext>,
    #[serde(default)]
    pub clusters: Vec<NamedCluster>,
    #[serde(default)]
    pub users: Vec<NamedUser>,
}

#[derive(Debug, Deserialize)]
pub struct NamedContext {
    pub name: String,
    pub context: Context,
}

#[derive(Debug, Deserialize)]
pub struct Context {
    pub cluster: String,
    #[serde(default)]
    pub user: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NamedCluster {
    pub name: String,
    pub cluster: Cluster,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Cluster {
    pub server: String,
    #[serde(default)]
    pub certificate_authority: Option<String>,
    #[serde(default)]
    pub certificate_authority_data: Option<String>,
    #[serde(default)]
    pub insecure_skip_tls_verify: bool,
}

#[derive(Debug, Deserialize)]
pub struct NamedUser {
    pub name: String,
    pub user: User,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct User {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default, rename = "tokenFile")]
    pub token_file: Option<String>,
    #[serde(default)]
    pub client_certificate: Option<String>,
    #[serde(default)]
    pub client_certificate_data: Option<String>,
    #[serde(default)]
    pub client_key: Option<String>,
    #[serde(default)]
    pub client_key_data: Option<String>,
    #[serde(default)]
    pub exec: Option<serde::de::IgnoredAny>,
    #[serde(default)]
    pub auth_provider: Option<serde::de::IgnoredAny>,
}

impl Kubeconfig {
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_saphyr::from_str(text)
            .map_err(|e| RegistryError::Config(format!("invalid kubeconfig: {}", e)))
    }

    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            RegistryError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&text)
    }

    /// API server settings for the current context. Relative file
    /// references resolve against `base_dir`.
    pub fn to_config(&self, base_dir: &Path) -> Result<KubernetesConfig> {
        let context_name = self
            .current_context
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| RegistryError::Config("kubeconfig has no current-context".to_string()))?;

        let context = self
            .contexts
            .iter()
            .find(|c| c.name == context_name)
            .map(|c| &c.context)
            .ok_or_else(|| {
                RegistryError::Config(format!("context '{}' not found in kubeconfig", context_name))
            })?;

        let cluster = self
            .clusters
            .iter()
            .find(|c| c.name == context.cluster)
            .map(|c| &c.cluster)
            .ok_or_else(|| {
                RegistryError::Config(format!(
                    "cluster '{}' not found in kubeconfig",
                    context.cluster
                ))
            })?;

        let mut config = KubernetesConfig::new(cluster.server.clone());
        config.accept_invalid_certs = cluster.insecure_skip_tls_verify;

        if let Some(ca) = pem_source(
            cluster.certificate_authority_data.as_deref(),
            cluster.certificate_authority.as_deref(),
            base_dir,
        )? {
            config = config.with_ca_cert_pem(ca);
        }

        let Some(user_name) = context.user.as_deref() else {
            return Ok(config);
        };
        let user = self
            .users
            .iter()
            .find(|u| u.name == user_name)
            .map(|u| &u.user)
            .ok_or_else(|| {
                RegistryError::Config(format!("user '{}' not found in kubeconfig", user_name))
            })?;

        if let Some(token) = user.token.as_deref().filter(|t| !t.is_empty()) {
            config = config.with_token(token);
        } else if let Some(file) = user.token_file.as_deref() {
            let path = base_dir.join(file);
            let token = std::fs::read_to_string(&path).map_err(|e| {
                RegistryError::Config(format!("cannot read {}: {}", path.display(), e))
            })?;
            config = config.with_token(token.trim());
        }

        let cert = pem_source(
            user.client_certificate_data.as_deref(),
            user.client_certificate.as_deref(),
            base_dir,
        )?;
        let key = pem_source(
            user.client_key_data.as_deref(),
            user.client_key.as_deref(),
            base_dir,
        )?;
        match (cert, key) {
            (Some(mut cert), Some(key)) => {
                cert.push(b'\n');
                cert.extend_from_slice(&key);
                config.client_identity_pem = Some(cert);
            }
            (None, None) => {}
            _ => {
                return Err(RegistryError::Config(format!(
                    "user '{}' has a client certificate or key but not both",
                    user_name
                )))
            }
        }

        if config.token.is_none()
            && config.client_identity_pem.is_none()
            && (user.exec.is_some() || user.auth_provider.is_some())
        {
            warn!(
                user = user_name,
                "Kubeconfig user relies on an exec or auth-provider plugin, requests will be anonymous"
            );
        }

        Ok(config)
    }
}

/// Inline base64 data wins over a file reference.
fn pem_source(data: Option<&str>, file: Option<&str>, base_dir: &Path) -> Result<Option<Vec<u8>>> {
    if let Some(data) = data.filter(|d| !d.is_empty()) {
        return BASE64
            .decode(data.trim())
            .map(Some)
            .map_err(|e| RegistryError::Config(format!("invalid base64 in kubeconfig: {}", e)));
    }
    match file.filter(|f| !f.is_empty()) {
        Some(file) => {
            let path = base_dir.join(file);
            std::fs::read(&path).map(Some).map_err(|e| {
                RegistryError::Config(format!("cannot read {}: {}", path.display(), e))
            })
        }
        None => Ok(None),
    }
}

/// `KUBECONFIG` (first entry) if set, else `~/.kube/config`.
pub fn kubeconfig_path<F>(lookup: &F, home: Option<PathBuf>) -> Option<PathBuf>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup("KUBECONFIG").filter(|v| !v.is_empty()) {
        return std::env::split_paths(&value).find(|p| !p.as_os_str().is_empty());
    }
    home.map(|home| home.join(".kube").join("config"))
}

impl KubernetesConfig {
    /// Kubeconfig when the file exists, in-cluster service account otherwise.
    pub fn infer() -> Result<Self> {
        Self::infer_from(
            |key| std::env::var(key).ok(),
            dirs::home_dir(),
            Path::new(SERVICE_ACCOUNT_DIR),
        )
    }

    pub fn infer_from<F>(lookup: F, home: Option<PathBuf>, service_account_dir: &Path) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        match kubeconfig_path(&lookup, home).filter(|p| p.exists()) {
            Some(path) => {
                info!(path = %path.display(), "Loading Kubernetes configuration from kubeconfig");
                let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
                Kubeconfig::read(&path)?.to_config(base_dir)
            }
            None => {
                info!("No kubeconfig found, using in-cluster configuration");
                Self::in_cluster_from(service_account_dir, lookup)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KUBECONFIG: &str = r#"
apiVersion: v1
kind: Config
current-context: dev
clusters:
  - name: dev-cluster
    cluster:
      server: https://127.0.0.1:6443
      insecure-skip-tls-verify: true
  - name: prod-cluster
    cluster:
      server: https://prod.example.com
contexts:
  - name: dev
    context:
      cluster: dev-cluster
      user: dev-user
  - name: prod
    context:
      cluster: prod-cluster
users:
  - name: dev-user
    user:
      token: dev-token
"#;

    #[test]
    fn test_current_context_selects_cluster_and_user() {
        let config = Kubeconfig::from_yaml(KUBECONFIG)
            .unwrap()
            .to_config(Path::new("."))
            .unwrap();

        assert_eq!(config.api_url, "https://127.0.0.1:6443");
        assert_eq!(config.token.as_deref(), Some("dev-token"));
        assert!(config.accept_invalid_certs);
        assert!(config.ca_cert_pem.is_none());
    }

    #[test]
    fn test_inline_certificate_data_is_decoded() {
        let yaml = format!(
            r#"
current-context: c
clusters:
  - name: k
    cluster:
      server: https://10.0.0.1
      certificate-authority-data: {}
contexts:
  - name: c
    context:
      cluster: k
      user: u
users:
  - name: u
    user:
      client-certificate-data: {}
      client-key-data: {}
"#,
            BASE64.encode("CA PEM"),
            BASE64.encode("CERT PEM"),
            BASE64.encode("KEY PEM"),
        );

        let config = Kubeconfig::from_yaml(&yaml)
            .unwrap()
            .to_config(Path::new("."))
            .unwrap();

        assert_eq!(config.ca_cert_pem.as_deref(), Some(&b"CA PEM"[..]));
        assert_eq!(
            config.client_identity_pem.as_deref(),
            Some(&b"CERT PEM\nKEY PEM"[..])
        );
        assert!(config.token.is_none());
    }

    #[test]
    fn test_missing_context_is_an_error() {
        let yaml = "current-context: gone\ncontexts: []\nclusters: []\nusers: []\n";
        let err = Kubeconfig::from_yaml(yaml)
            .unwrap()
            .to_config(Path::new("."))
            .unwrap_err();
        assert!(err.to_string().contains("gone"), "{}", err);

        let err = Kubeconfig::from_yaml("clusters: []\n")
            .unwrap()
            .to_config(Path::new("."))
            .unwrap_err();
        assert!(matches!(err, RegistryError::Config(_)));
    }

    #[test]
    fn test_cert_without_key_is_an_error() {
        let yaml = format!(
            "current-context: c\nclusters:\n  - name: k\n    cluster:\n      server: https://x\n\
             contexts:\n  - name: c\n    context:\n      cluster: k\n      user: u\n\
             users:\n  - name: u\n    user:\n      client-certificate-data: {}\n",
            BASE64.encode("CERT")
        );
        let result = Kubeconfig::from_yaml(&yaml).unwrap().to_config(Path::new("."));
        assert!(matches!(result, Err(RegistryError::Config(_))));
    }

    #[test]
    fn test_kubeconfig_path_precedence() {
        let home = Some(PathBuf::from("/home/relay"));

        let path = kubeconfig_path(&|_: &str| None, home.clone());
        assert_eq!(path, Some(PathBuf::from("/home/relay/.kube/config")));

        let path = kubeconfig_path(
            &|k: &str| (k == "KUBECONFIG").then(|| "/etc/kube/admin.conf".to_string()),
            home.clone(),
        );
        assert_eq!(path, Some(PathBuf::from("/etc/kube/admin.conf")));

        let path = kubeconfig_path(&|k: &str| (k == "KUBECONFIG").then(String::new), None);
        assert_eq!(path, None);
    }
}

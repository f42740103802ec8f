//! Credential lookup from Kubernetes secrets

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};

use crate::error::{Error, Result};

/// Merged key/value credentials
pub type Credentials = BTreeMap<String, String>;

/// Resolves named secrets into one credential map
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Merge the data of `names` in order; later secrets overwrite earlier keys
    async fn resolve(&self, names: &[String], namespace: &str) -> Result<Credentials>;
}

/// Fetch a secret from Kubernetes
pub async fn get_secret(client: &Client, name: &str, namespace: &str) -> Result<Secret> {
    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    secrets
        .get(name)
        .await
        .map_err(|e| match e {
            kube::Error::Api(api_err) if api_err.code == 404 => {
                Error::SecretNotFound(format!("{}/{}", namespace, name))
            }
            other => Error::Kube(other),
        })
}

/// Decoded string entries of a secret
pub fn secret_strings(secret: &Secret) -> Result<Credentials> {
    let name = secret.metadata.name.clone().unwrap_or_default();
    let mut values = Credentials::new();

    for (key, bytes) in secret.data.iter().flatten() {
        let value = String::from_utf8(bytes.0.clone()).map_err(|e| {
            Error::Config(format!(
                "Invalid UTF-8 in secret '{}' key '{}': {}",
                name, key, e
            ))
        })?;
        values.insert(key.clone(), value);
    }

    Ok(values)
}

/// Merge credential maps in order, later maps win on key collision
pub fn merge_credentials(sets: impl IntoIterator<Item = Credentials>) -> Credentials {
    sets.into_iter().fold(Credentials::new(), |mut merged, set| {
        merged.extend(set);
        merged
    })
}

/// [`CredentialStore`] reading Kubernetes secrets
#[derive(Clone)]
pub struct KubeCredentialStore {
    client: Client,
}

impl KubeCredentialStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CredentialStore for KubeCredentialStore {
    async fn resolve(&self, names: &[String], namespace: &str) -> Result<Credentials> {
        let mut sets = Vec::with_capacity(names.len());
        for name in names {
            let secret = get_secret(&self.client, name, namespace).await?;
            sets.push(secret_strings(&secret)?);
        }
        Ok(merge_credentials(sets))
    }
}

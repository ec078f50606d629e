//! Secret fetching utilities for Kubernetes secrets

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};

use crate::error::{Error, Result};

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

/// Decode every key of a secret into an environment-style map.
///
/// Backup target credentials are passed to the backup tooling as environment
/// variables (`AWS_ACCESS_KEY_ID`, `AWS_ENDPOINTS`, ...), so the keys are kept
/// verbatim.
pub fn secret_to_env(secret: &Secret) -> Result<BTreeMap<String, String>> {
    let mut env = BTreeMap::new();
    let Some(data) = secret.data.as_ref() else {
        return Ok(env);
    };

    for (key, bytes) in data {
        let value = String::from_utf8(bytes.0.clone()).map_err(|e| {
            Error::Config(format!("Invalid UTF-8 in secret key '{}': {}", key, e))
        })?;
        env.insert(key.clone(), value);
    }
    Ok(env)
}

/// Fetch the credentials of a backup target.
///
/// An empty secret name means the target needs no credentials.
pub async fn get_target_credentials(
    client: &Client,
    namespace: &str,
    secret_name: &str,
) -> Result<BTreeMap<String, String>> {
    if secret_name.is_empty() {
        return Ok(BTreeMap::new());
    }
    let secret = get_secret(client, secret_name, namespace).await?;
    secret_to_env(&secret)
}

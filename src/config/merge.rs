use std::path::PathBuf;

use super::{Config, ConfigLayer};

/// Defaults, then the user layer, then the deployment layer.
pub fn merge_layers(user: Option<ConfigLayer>, deployment: Option<ConfigLayer>) -> Config {
    let mut config = Config::default();
    if let Some(layer) = user {
        layer.apply_to(&mut config);
    }
    if let Some(layer) = deployment {
        layer.apply_to(&mut config);
    }
    config
}

pub fn apply_env_overrides(config: &mut Config) {
    apply_env_overrides_from(config, |key| std::env::var(key).ok());
}

pub(crate) fn apply_env_overrides_from(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    let var = |key: &str| {
        lookup(key)
            .map(|raw| raw.trim().to_string())
            .filter(|value| !value.is_empty())
    };

    if let Some(path) = var("PDM_REPO_PATH") {
        config.repository.path = Some(PathBuf::from(path));
    }

    if let Some(url) = var("PDM_REMOTE_URL") {
        config.repository.remote_url = Some(url);
    }

    if let Some(branch) = var("PDM_BRANCH") {
        if branch.contains(char::is_whitespace) || branch.starts_with('-') {
            tracing::warn!("invalid PDM_BRANCH, ignoring: {branch:?}");
        } else {
            config.repository.branch = branch;
        }
    }

    if let Some(raw) = var("PDM_NETWORK_TIMEOUT_MS") {
        match raw.parse::<u64>() {
            Ok(value) => {
                config.network.timeout_ms = value;
            }
            Err(err) => {
                tracing::warn!("invalid PDM_NETWORK_TIMEOUT_MS, ignoring: {err}");
            }
        }
    }

    if let Some(domain) = var("PDM_ACTOR_EMAIL_DOMAIN") {
        if domain.contains(['@', '<', '>']) {
            tracing::warn!("invalid PDM_ACTOR_EMAIL_DOMAIN, ignoring: {domain:?}");
        } else {
            config.identity.author_email_domain = domain;
        }
    }
}

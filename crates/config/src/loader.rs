use std::{collections::BTreeSet, path::Path};

use anyhow::bail;
use indoc::formatdoc;

use crate::{Config, KeySource};

pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let path = path.as_ref().to_path_buf();
    let content = std::fs::read_to_string(&path)?;
    let config: Config = toml::from_str(&content)?;

    let warnings = validate(&config)?;

    for warning in warnings {
        log::warn!("{warning}");
    }

    Ok(config)
}

/// Structural checks that serde cannot express. Rate specs themselves are parsed
/// when the server registers the rules, before it starts listening.
pub(crate) fn validate(config: &Config) -> anyhow::Result<Vec<String>> {
    let mut warnings = Vec::new();
    let mut seen_paths = BTreeSet::new();

    for rule in &config.rate_limits.rules {
        if !rule.path.starts_with('/') {
            bail!("Rate limit rule path '{}' must start with '/'", rule.path);
        }

        if rule.path.split('/').any(|segment| segment.starts_with(':') || segment.starts_with('*')) {
            bail!(
                "Rate limit rule path '{}' uses ':' or '*' segments; write parameters as '{{name}}'",
                rule.path
            );
        }

        if config.server.health.enabled && rule.path == config.server.health.path {
            bail!(
                "Rate limit rule path '{}' collides with the health endpoint",
                rule.path
            );
        }

        if !seen_paths.insert(rule.path.as_str()) {
            bail!(formatdoc! {r#"
                Rate limit rule path '{path}' is configured more than once.
                Combine the quotas into a single rule instead, for example:

                [[rate_limits.rules]]
                path = "{path}"
                rate = ["10/m", "100/h"]
            "#, path = rule.path});
        }

        if rule.rate.is_empty() {
            bail!("Rate limit rule for '{}' has no rates configured", rule.path);
        }

        if let Some(methods) = &rule.methods
            && methods.is_empty()
        {
            bail!(
                "Rate limit rule for '{}' has an empty method list; remove `methods` to limit every method",
                rule.path
            );
        }

        if rule.key == KeySource::Identity && !identification_enabled(config) {
            warnings.push(format!(
                "Rate limit rule for '{}' keys by identity but client identification is not enabled; \
                 every caller will be keyed by address",
                rule.path
            ));
        }
    }

    if !config.rate_limits.enabled && !config.rate_limits.rules.is_empty() {
        warnings.push("Rate limit rules are configured but rate limiting is disabled".to_string());
    }

    Ok(warnings)
}

fn identification_enabled(config: &Config) -> bool {
    config
        .server
        .client_identification
        .as_ref()
        .is_some_and(|identification| identification.enabled)
}

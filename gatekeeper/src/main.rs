use args::Args;
use clap::Parser;
use config::{Config, KeySource, RuleConfig};
use server::ServeConfig;

mod args;
mod logger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    logger::init(&args)?;

    let config = args.load_config()?;

    if args.check {
        return check(&config).await;
    }

    server::serve(ServeConfig::new(config, args.listen_address)).await
}

/// Builds every rate limit layer without binding, so a bad rule shows up before deploying.
async fn check(config: &Config) -> anyhow::Result<()> {
    server::router(config).await?;

    let rules = &config.rate_limits.rules;

    for rule in rules {
        log::info!("{}", describe(rule));
    }

    if !config.rate_limits.enabled {
        log::warn!("Rate limiting is disabled, these operations are served without limits");
    }

    log::info!("Configuration is valid, {} protected operations", rules.len());

    Ok(())
}

fn describe(rule: &RuleConfig) -> String {
    let key = match &rule.key {
        KeySource::Identity => "identity".to_string(),
        KeySource::Address => "address".to_string(),
        KeySource::Header(name) => format!("header {name}"),
    };

    let methods = rule
        .methods
        .as_ref()
        .map(|methods| methods.join(", "))
        .unwrap_or_else(|| "any method".to_string());

    let mode = if rule.block { "blocking" } else { "flagging" };

    format!(
        "{} as '{}': {} per {key}, {methods}, {mode}",
        rule.path,
        rule.operation(),
        rule.rate.join(" and ")
    )
}

use std::{error::Error, path::PathBuf, sync::Arc};

use clap::Parser;
use pigeon_smtp::{AlertContext, AlertMailHandler, PrefixBlocklist, Server, SessionConfig};
use pigeon_utils::{
    host_tags, load_config, system_hostname, AlertClient, Config, LogAlertClient, OpsGenieClient,
    ShellDiagnostics,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// SMTP server turning inbound mail into OpsGenie alerts.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to listen on, e.g. `0.0.0.0:2500`.
    #[arg(long)]
    addr: Option<String>,

    /// OpsGenie API key used to create alerts.
    #[arg(long, env = "PIGEON_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// OpsGenie account the alerts target.
    #[arg(long, env = "PIGEON_ACCOUNT")]
    account: Option<String>,

    /// Refuse recipients starting with this prefix, may be repeated.
    #[arg(long = "block-prefix")]
    block_prefixes: Vec<String>,

    /// Log alerts instead of delivering them.
    #[arg(long)]
    dry_run: bool,
}

impl Args {
    /// Loads the configuration file, if any, and applies the flag overrides.
    fn into_config(self) -> Result<(Config, Option<String>), Box<dyn Error>> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => Config::default(),
        };
        if let Some(api_key) = self.api_key {
            config.alert.api_key = api_key;
        }
        if let Some(account) = self.account {
            config.alert.account = account;
        }
        config.smtp.blocked_prefixes.extend(self.block_prefixes);
        config.alert.dry_run |= self.dry_run;
        config.validate()?;
        Ok((config, self.addr))
    }
}

/// Main function for the SMTP server.
///
/// Builds the alert client from the configuration and serves connections
/// until the listener fails or Ctrl-C is received.
#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let (config, addr) = Args::parse().into_config()?;

    let client: Arc<dyn AlertClient> = if config.alert.dry_run {
        Arc::new(LogAlertClient::new())
    } else {
        Arc::new(OpsGenieClient::new(
            &config.alert.url,
            &config.alert.api_key,
            config.alert.timeout(),
        )?)
    };
    let context = AlertContext::new(
        client,
        Arc::new(ShellDiagnostics::new()),
        config.alert.account.clone(),
    )
    .with_tags(host_tags())
    .with_source(config.alert.source.clone().or_else(system_hostname));
    let policy = Arc::new(PrefixBlocklist::new(config.smtp.blocked_prefixes.clone()));
    let handler = Arc::new(AlertMailHandler::new(context, policy));

    let server = Server::new(SessionConfig::from_smtp(&config.smtp), handler);
    let addr = addr.unwrap_or_else(|| config.smtp.listen_addr());

    tokio::select! {
        result = server.listen_and_serve(&addr) => {
            if let Err(e) = &result {
                error!(addr = %addr, error = %e, "Server stopped");
            }
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
        }
    }
    Ok(())
}

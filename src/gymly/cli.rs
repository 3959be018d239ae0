use super::{BoxResult, auth::hash_password, config::Config};
use clap::Parser;

use std::{path::PathBuf, process::exit};
use tracing::info;

#[derive(Parser, Debug)]
#[clap(
    author = "gymly contributors",
    version,
    about = "Gym membership API: packages, subscriptions, check-ins and notifications",
    help_template = r#"
{name} v{version} by {author}
{about}

{usage-heading} {usage}

{all-args}
"#
)]
pub struct Cli {
    #[clap(short, long, default_value = "gymly.toml")]
    pub config: PathBuf,
    #[clap(short, long, help = "Toggle TLS")]
    pub tls: bool,
    #[clap(short, long, help = "Port to listen on")]
    pub port: Option<u16>,
    #[clap(short, long, help = "IP to listen on")]
    pub ip: Option<String>,
    #[clap(long, value_name = "PASSWORD", help = "Print an argon2 hash for PASSWORD and exit")]
    pub hash_password: Option<String>,
}

pub fn init() -> BoxResult<Config> {
    let cli = Cli::parse();

    if let Some(password) = cli.hash_password {
        println!("{}", hash_password(&password)?);
        exit(0);
    }

    let mut config = Config::load_from_file(&cli.config)?;

    if cli.tls {
        config.tls.enable = true;
    }
    info!("tls: {}", config.tls.enable);

    if let Some(port) = cli.port {
        config.network.port = port;
        info!("port: {}", config.network.port);
    }

    if let Some(ip) = cli.ip {
        config.network.ip = ip;
        info!("ip: {}", config.network.ip);
    }

    Ok(config)
}

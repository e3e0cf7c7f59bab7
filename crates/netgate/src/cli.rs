use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "netgate",
    version,
    about = "Authenticating reverse proxy for NetClave wallets"
)]
pub struct Cli {
    /// Full path to the JSON configuration file
    #[arg(long = "configFile", default_value = "/opt/config.json")]
    pub config_file: PathBuf,
}

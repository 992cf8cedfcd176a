use std::path::PathBuf;

use clap::Parser;
use dotenv::dotenv;
use jt808_gateway::{setup_tracing, AppResult, Gateway, GatewayConfig};
use tokio::runtime;
use tracing::info;

#[derive(Parser)]
#[command(version)]
pub struct CommandLine {
    /// path to config file
    #[arg(short, long)]
    pub conf: Option<String>,
    #[command(subcommand)]
    pub command: Option<Command>,
    /// log level (v: info, vv: debug, vvv: trace); overrides RUST_LOG
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Parser)]
pub enum Command {
    /// Print the effective configuration and exit
    PrintConfig,
}

fn main() -> AppResult<()> {
    dotenv().ok();
    let commandline: CommandLine = CommandLine::parse();
    match commandline.verbose {
        0 => {}
        1 => std::env::set_var("RUST_LOG", "info"),
        2 => std::env::set_var("RUST_LOG", "debug"),
        _ => std::env::set_var("RUST_LOG", "trace"),
    }

    let config_path = commandline.conf.as_ref().map_or_else(
        || {
            let mut path = PathBuf::from("./");
            path.push("conf.toml");
            path
        },
        PathBuf::from,
    );
    let gateway_config = GatewayConfig::set_up_config(config_path)?;

    if let Some(Command::PrintConfig) = commandline.command {
        println!("{:#?}", gateway_config);
        return Ok(());
    }

    let rt = runtime::Builder::new_multi_thread().enable_all().build()?;
    let _otel_guard = rt.block_on(setup_tracing())?;
    info!(
        "starting {} {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let gateway = Gateway::new(gateway_config);
    gateway.start(&rt)?;

    Ok(())
}

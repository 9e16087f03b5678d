use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use aux::MacAddr;
use clap::{Parser, Subcommand};
use wpa::AuthConfig;

mod sim;

pub use sim::{simulate, SimHost, Simulation};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// authenticator policy (TOML); defaults to WPA2-PSK with CCMP
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// derive the PSK of a passphrase
    Psk {
        passphrase: String,
        ssid: String,
    },
    /// print the WPA/RSN IE advertised by the policy
    Ie,
    /// parse a station's IE (hex) and negotiate it against the policy
    ParseIe {
        ie: String,
    },
    /// run stations through the handshakes and print the MIB
    Simulate {
        /// number of stations
        #[arg(short, long, default_value_t = 3)]
        stations: u8,
        /// GTK rekeys after every station is connected
        #[arg(short, long, default_value_t = 1)]
        rekeys: u32,
        #[arg(long, default_value = "02:00:00:00:00:01")]
        bssid: MacAddr,
        #[arg(long, default_value = "testnet")]
        ssid: String,
        #[arg(long, default_value = "testpassword")]
        passphrase: String,
    },
}

fn load_config(path: Option<&Path>) -> Result<AuthConfig> {
    let config = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
            toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        None => AuthConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

fn init_logger(verbose: u8) {
    let level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new().filter_level(level).parse_default_env().init();
}

pub fn run() -> Result<()> {
    let args = Args::parse(); //parse arguments
    init_logger(args.verbose);
    let config = load_config(args.config.as_deref())?;

    match args.command {
        Command::Psk { passphrase, ssid } => {
            println!("{}", hex::encode(crypto::generate_psk(&passphrase, ssid.as_bytes())));
        }
        Command::Ie => {
            println!("{}", hex::encode(wpa::build_ie(&config)?));
        }
        Command::ParseIe { ie } => {
            let bytes = hex::decode(ie.trim()).context("IE is not valid hex")?;
            let parsed = wpa::parse_ie(&bytes)?;
            println!("{:#?}", parsed);
            match wpa::validate_against_policy(&parsed, &config) {
                Ok(selection) => println!("accepted: {:#?}", selection),
                Err(e) => println!("rejected: {}", e),
            }
        }
        Command::Simulate { stations, rekeys, bssid, ssid, passphrase } => {
            let sim = Simulation { aa: bssid, passphrase, ssid, stations, rekeys };
            print!("{}", simulate(config, &sim)?);
        }
    }
    Ok(())
}

//! This module olds struct and helpers for parameters and configuration
use ::structopt::clap::AppSettings;
use anyhow::{bail, Context, Result};
use directories_next::ProjectDirs;
use figment::providers::{Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

use crate::mac::is_canonical;
use crate::orchestrator::Delays;

/// Address used when none is configured.
pub const DEFAULT_MAC: &str = "00:11:22:33:33:55";

// Courtesy of structopt_flags crate
/// `-v`/`-q` flags controlling the log level.
#[derive(structopt::StructOpt, Debug, Clone, PartialEq)]
pub struct QuietVerbose {
    /// Increase the output's verbosity level
    ///
    /// Pass many times to increase verbosity level, up to 3.
    #[structopt(
        name = "quietverbose",
        long = "verbose",
        short = "v",
        parse(from_occurrences),
        conflicts_with = "quietquiet",
        global = true
    )]
    verbosity_level: u8,

    /// Decrease the output's verbosity level.
    ///
    /// Used once, it will set error log level.
    /// Used twice, will silent the log completely
    #[structopt(
        name = "quietquiet",
        long = "quiet",
        short = "q",
        parse(from_occurrences),
        conflicts_with = "quietverbose",
        global = true
    )]
    quiet_level: u8,
}

impl Default for QuietVerbose {
    fn default() -> Self {
        QuietVerbose {
            verbosity_level: 1,
            quiet_level: 0,
        }
    }
}

impl Serialize for QuietVerbose {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.get_level_filter())
    }
}

fn de_from_str<'de, D>(deserializer: D) -> Result<QuietVerbose, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    let (verbosity_level, quiet_level) = match s.to_ascii_lowercase().as_ref() {
        "off" => (0, 2),
        "error" => (0, 1),
        "warn" => (0, 0),
        "info" => (1, 0),
        "debug" => (2, 0),
        _ => (3, 0),
    };
    Ok(QuietVerbose {
        verbosity_level,
        quiet_level,
    })
}

impl QuietVerbose {
    /// Level name understood by `tracing_subscriber::EnvFilter`.
    pub fn get_level_filter(&self) -> &str {
        let quiet = self.quiet_level.min(2) as i8;
        let verbose = self.verbosity_level.min(3) as i8;
        match verbose - quiet {
            -2 => "Off",
            -1 => "Error",
            0 => "Warn",
            1 => "Info",
            2 => "Debug",
            _ => "Trace",
        }
    }
}

#[derive(structopt::StructOpt, Serialize, Deserialize, Debug)]
/// Change the hardware address of a network interface on a rooted device
///
/// Obtain a root shell, bring the interface down, set its new address, bring it
/// up, restart the network service and read the address back.
#[structopt(global_settings(&[AppSettings::ColoredHelp, AppSettings::ColorAuto]))]
pub struct Args {
    /// network interface name
    #[serde(skip_serializing_if = "Option::is_none")]
    #[structopt(short, long, env = "ROOTMAC_INTERFACE")]
    pub interface_name: Option<String>,

    /// new MAC address (XX:XX:XX:XX:XX:XX)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[structopt(short = "m", long = "mac", env = "ROOTMAC_MAC")]
    pub new_mac: Option<String>,

    /// command giving a root shell reading commands on its standard input
    #[serde(skip_serializing_if = "Option::is_none")]
    #[structopt(long, env = "ROOTMAC_SU_COMMAND")]
    pub su_command: Option<String>,

    /// delay after each `ip link set` command in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    #[structopt(long, env = "ROOTMAC_SETTLE_DELAY_MS")]
    pub settle_delay_ms: Option<u64>,

    /// delay after restarting the network service in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    #[structopt(long, env = "ROOTMAC_RECONNECT_DELAY_MS")]
    pub reconnect_delay_ms: Option<u64>,

    /// print the report as JSON
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    #[structopt(long)]
    pub json: bool,

    /// configuration file
    ///
    /// Will use `config.toml` in the user configuration directory if unset.
    #[serde(skip)]
    #[structopt(short, long, env = "ROOTMAC_CONFIG", parse(from_os_str))]
    pub config: Option<PathBuf>,

    #[structopt(flatten)]
    #[serde(deserialize_with = "de_from_str")]
    pub verbose: QuietVerbose,
}

impl Default for Args {
    fn default() -> Args {
        let res = Args {
            interface_name: Some("wlan0".into()),
            new_mac: Some(DEFAULT_MAC.into()),
            su_command: Some("su".into()),
            settle_delay_ms: Some(Delays::default().settle.as_millis() as u64),
            reconnect_delay_ms: Some(Delays::default().reconnect.as_millis() as u64),
            json: false,
            config: None,
            verbose: QuietVerbose::default(),
        };
        debug!("Args::default : {:#?}", res);
        res
    }
}

/// Validated configuration used by the binary.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// interface whose address is changed
    pub interface_name: String,
    /// requested address, passed to `ip` as is
    pub new_mac: String,
    /// shell-words elevation command
    pub su_command: String,
    /// settling delays
    pub delays: Delays,
    /// print the report as JSON
    pub json: bool,
}

impl Args {
    /// Check merged arguments and build an [`AppConfig`].
    ///
    /// A MAC address that does not look canonical only triggers a warning, it
    /// is up to the kernel to refuse it.
    pub fn validate(self) -> Result<AppConfig> {
        let interface_name = match self.interface_name {
            Some(name) if !name.trim().is_empty() => name,
            _ => bail!("interface_name shall be defined"),
        };
        let new_mac = match self.new_mac {
            Some(mac) if !mac.trim().is_empty() => mac,
            _ => bail!("new_mac shall be defined"),
        };
        if !is_canonical(&new_mac) {
            warn!("'{}' does not look like XX:XX:XX:XX:XX:XX", new_mac);
        }
        let su_command = self.su_command.unwrap_or_else(|| "su".into());
        let words = shell_words::split(&su_command)
            .with_context(|| format!("Parsing su_command {su_command:?}"))?;
        if words.is_empty() {
            bail!("su_command shall not be empty");
        }
        let defaults = Delays::default();
        let delays = Delays {
            settle: self
                .settle_delay_ms
                .map_or(defaults.settle, Duration::from_millis),
            reconnect: self
                .reconnect_delay_ms
                .map_or(defaults.reconnect, Duration::from_millis),
        };
        Ok(AppConfig {
            interface_name,
            new_mac,
            su_command,
            delays,
            json: self.json,
        })
    }
}

/// Default location of the configuration file.
pub fn default_config_file() -> Option<PathBuf> {
    ProjectDirs::from("net", "rootmac", "rootmac").map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Merge configuration Default → Config File → command line args and
/// validate the result.
pub fn load(args: Args) -> Result<AppConfig> {
    let config_file = match &args.config {
        Some(path) => {
            if !path.is_file() {
                bail!("Configuration file {:?} does not exist", path);
            }
            Some(path.clone())
        }
        None => default_config_file(),
    };
    let mut figment = Figment::from(Serialized::defaults(Args::default()));
    if let Some(path) = &config_file {
        debug!("Reading configuration file {:?}", path);
        figment = figment.merge(Toml::file(path));
    }
    let merged: Args = figment
        .merge(Serialized::defaults(args))
        .extract()
        .context("Merging configuration")?;
    debug!("Merge config and parameters : {:#?}", merged);
    merged.validate()
}


#[cfg(test)]
mod load_should {
    use super::*;
    use mktemp::Temp;
    use std::fs;
    use test_log::test; // Automatically trace tests

    fn cli_args(config: Option<PathBuf>) -> Args {
        Args {
            interface_name: None,
            new_mac: None,
            su_command: None,
            settle_delay_ms: None,
            reconnect_delay_ms: None,
            json: false,
            config,
            verbose: QuietVerbose::default(),
        }
    }

    #[test]
    fn read_values_from_config_file() -> Result<()> {
        let temp = Temp::new_file()?.to_path_buf();
        fs::write(
            &temp,
            "interface_name = \"eth1\"\nsu_command = \"/system/xbin/su\"\nsettle_delay_ms = 10\njson = true\n",
        )?;
        let config = load(cli_args(Some(temp)))?;
        assert_eq!(config.interface_name, "eth1");
        assert_eq!(config.su_command, "/system/xbin/su");
        assert_eq!(config.delays.settle, Duration::from_millis(10));
        assert_eq!(config.delays.reconnect, Duration::from_millis(2000));
        assert_eq!(config.new_mac, DEFAULT_MAC);
        assert!(config.json);
        Ok(())
    }

    #[test]
    fn let_command_line_override_config_file() -> Result<()> {
        let temp = Temp::new_file()?.to_path_buf();
        fs::write(&temp, "interface_name = \"eth1\"\nnew_mac = \"02:00:00:00:00:01\"\n")?;
        let mut args = cli_args(Some(temp));
        args.interface_name = Some("wlan1".to_string());
        let config = load(args)?;
        assert_eq!(config.interface_name, "wlan1");
        assert_eq!(config.new_mac, "02:00:00:00:00:01");
        Ok(())
    }

    #[test]
    fn error_when_explicit_config_file_is_missing() {
        let temp = Temp::new_dir().unwrap();
        let missing = temp.to_path_buf().join("nope.toml");
        let err = load(cli_args(Some(missing))).unwrap_err();
        assert!(err.to_string().contains("does not exist"), "{}", err);
    }
}

#[cfg(test)]
mod quiet_verbose_should {
    use super::*;

    #[test]
    fn map_occurrences_to_level() {
        let level = |verbosity_level, quiet_level| {
            QuietVerbose {
                verbosity_level,
                quiet_level,
            }
            .get_level_filter()
            .to_string()
        };
        assert_eq!(level(1, 0), "Info");
        assert_eq!(level(0, 0), "Warn");
        assert_eq!(level(0, 5), "Off");
        assert_eq!(level(7, 0), "Trace");
    }

    #[test]
    fn read_level_back_from_its_name() {
        let verbose = QuietVerbose {
            verbosity_level: 2,
            quiet_level: 0,
        };
        let json = serde_json::to_string(&verbose).unwrap();
        let mut de = serde_json::Deserializer::from_str(&json);
        assert_eq!(de_from_str(&mut de).unwrap(), verbose);
    }
}

#![doc = include_str!("../README.md")]
use ::lib::config::{self, Args};
use ::lib::{setup_tracing, spawn_change};
use anyhow::{anyhow, Context, Result};
use tracing::{debug, info};

#[paw::main]
fn main(args: Args) -> Result<()> {
    setup_tracing(&args.verbose)?;
    // Merge config Default → Config File → command line args
    let config = config::load(args)?;
    debug!("Configuration : {:#?}", config);

    let json = config.json;
    info!(
        "Changing MAC address of {} to {}",
        config.interface_name, config.new_mac
    );
    let report = spawn_change(config)?
        .join()
        .map_err(|_| anyhow!("MAC change worker panicked"))?;

    if json {
        let summary =
            serde_json::to_string_pretty(&report.summary()).context("Serializing report")?;
        println!("{summary}");
    } else {
        println!("{report}");
    }
    std::process::exit(report.exit_code());
}

mod aggregate;
mod analysis;
mod config;
mod decode;
mod load;
mod report;
mod row;
mod series;
mod summary;
mod trend;

use std::{env::args, path::Path};

use jane_eyre::eyre::{self, bail, OptionExt};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{
    analysis::{assemble, Assembled},
    config::Config,
};

static USAGE: &'static str = "Usage: perflog-analyse <summary|json|report> <log_dir> [out_dir]";
static DEFAULT_OUT_DIR: &'static str = "./profile_analysis";

fn main() -> eyre::Result<()> {
    jane_eyre::install()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive("perflog_analyse=info".parse()?)
                .from_env_lossy(),
        )
        .init();

    let mode = args().nth(1).ok_or_eyre(USAGE)?;
    let args = args().skip(2).collect::<Vec<_>>();
    let log_dir = Path::new(args.first().ok_or_eyre(USAGE)?);

    match &*mode {
        // Usage: perflog-analyse summary <log_dir>
        "summary" => {
            let (config, Assembled { result, .. }) = analyse_dir(log_dir)?;
            print!("{}", report::render_text(&result, &config.thresholds)?);
        }
        // Usage: perflog-analyse json <log_dir>
        "json" => {
            let (_, Assembled { result, .. }) = analyse_dir(log_dir)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        // Usage: perflog-analyse report <log_dir> [out_dir]
        "report" => {
            let out_dir = Path::new(args.get(1).map_or(DEFAULT_OUT_DIR, |dir| &**dir));
            let (config, assembled) = analyse_dir(log_dir)?;
            print!("{}", report::render_text(&assembled.result, &config.thresholds)?);
            report::write_report(out_dir, &assembled, &config)?;
            info!(?out_dir, "Done");
        }
        other => bail!("Unknown command: {other}\n{USAGE}"),
    }

    Ok(())
}

fn analyse_dir(log_dir: &Path) -> eyre::Result<(Config, Assembled)> {
    let config = Config::load_from_dir(log_dir)?;
    let rows = load::load_dir(log_dir)?;
    let assembled = assemble(rows, &config)?;

    Ok((config, assembled))
}

//! Rebuilds an FLV file from the `.ser` and `.info` files a writer leaves
//! behind when it never got to finalize.
//!
//! ```text
//! flv-repair recording.flv.ser [audio codec id] [video codec id]
//! ```
//!
//! The codec ids are only used when the `.info` file is missing too. The
//! process always exits with status 0, failures are reported on stderr.
#![cfg_attr(all(coverage_nightly, test), feature(coverage_attribute))]
#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::Context;
use scuffle_flv::repair::{DEFAULT_AUDIO_CODEC, DEFAULT_VIDEO_CODEC, RepairReport, repair};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Debug, clap::Parser)]
#[command(name = "flv-repair", about = "Rebuild an FLV file from an interrupted recording")]
struct Cli {
    /// The data store of the recording, `<file>.flv.ser`
    path: PathBuf,
    /// Audio codec id to assume when there is no info record
    #[arg(env = "FLV_REPAIR_AUDIO_CODEC", default_value_t = DEFAULT_AUDIO_CODEC)]
    audio_codec: i32,
    /// Video codec id to assume when there is no info record
    #[arg(env = "FLV_REPAIR_VIDEO_CODEC", default_value_t = DEFAULT_VIDEO_CODEC)]
    video_codec: i32,
    /// Print the report as JSON on stdout
    #[arg(long, env = "FLV_REPAIR_JSON")]
    json: bool,
}

impl Cli {
    fn run(&self) -> anyhow::Result<RepairReport> {
        repair(&self.path, self.audio_codec, self.video_codec)
            .with_context(|| format!("failed to repair {}", self.path.display()))
    }
}

fn print_report(report: &RepairReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report).context("serialize report")?);
        return Ok(());
    }

    println!("repaired {} ({} bytes of tag data)", report.flv_path.display(), report.bytes);
    if report.used_defaults {
        println!("no info record was found, codec ids and audio parameters are assumed");
    }
    if let Some(duration) = report.metadata.as_ref().and_then(|m| m.duration) {
        println!("duration: {duration:.3}s");
    }

    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli: Cli = clap::Parser::parse();

    match cli.run().and_then(|report| print_report(&report, cli.json)) {
        Ok(()) => {}
        Err(err) => tracing::error!("{err:#}"),
    }
}

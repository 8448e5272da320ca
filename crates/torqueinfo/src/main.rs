//! torqueinfo - Torque/PBS and Maui scheduler state reporter.

mod render;

use camino::Utf8PathBuf;
use clap::Parser;
use miette::{IntoDiagnostic, Result};
use render::{Report, ShareMap};
use torqueinfo_cli::{Args, DEFAULT_CONFIG, Format};
use torqueinfo_core::{BdiiConfig, Config, glue1_queue_map, glue2_queue_map, interface_is_off};
use torqueinfo_maui::diagnose_available;
use torqueinfo_parsers::Input;
use torqueinfo_pbs::MissingGroupPolicy;
use torqueinfo_state::{CaptureConfig, capture_snapshot};
use tracing::Level;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let mut config = load_config(&args)?;
    args.apply(&mut config);

    if let Some(probe) = &config.status_probe {
        if interface_is_off(probe, config.command_timeout).await {
            tracing::info!(probe = %probe, "interface is off, nothing to report");
            return Ok(());
        }
    }

    let capture = capture_config(&args, &config);
    let snapshot = capture_snapshot(&capture).await.into_diagnostic()?;
    let shares = share_map(&config);

    let report = Report {
        output_format: config.output_format,
        snapshot: &snapshot,
        shares: &shares,
        vo_jobs: render::vo_job_counts(&snapshot, &config.vomap),
    };
    let output = match args.format {
        Format::Json => render::render_json(&report).into_diagnostic()?,
        Format::Text => render::render_text(&report),
    };
    println!("{}", output);

    Ok(())
}

/// Log to stderr; `-v` for debug, `-vv` for trace. `RUST_LOG` takes precedence.
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// The configuration file, or defaults when the default file is absent.
fn load_config(args: &Args) -> Result<Config> {
    if args.config == DEFAULT_CONFIG && !args.config.exists() {
        tracing::debug!(path = %args.config, "no configuration file, using defaults");
        return Ok(Config::default());
    }
    Config::load(&args.config).into_diagnostic()
}

fn input(file: Option<&Utf8PathBuf>) -> Input {
    file.cloned().map(Input::File).unwrap_or_default()
}

fn capture_config(args: &Args, config: &Config) -> CaptureConfig {
    let fair_share = match &args.diagnose_file {
        Some(path) => Some(Input::File(path.clone())),
        None if diagnose_available() => Some(Input::Live),
        None => {
            tracing::debug!("diagnose not found, skipping group limits");
            None
        }
    };

    let missing_group = match &config.fallback_group {
        Some(group) => MissingGroupPolicy::Fallback(group.clone()),
        None => MissingGroupPolicy::Error,
    };

    CaptureConfig {
        pbs_host: config.pbs_host.clone(),
        jobs: input(args.jobs_file.as_ref()),
        nodes: input(args.nodes_file.as_ref()),
        queues: input(args.queue_file.as_ref()),
        server: input(args.server_file.as_ref()),
        fair_share,
        maui_keyfile: config.maui_keyfile.as_ref().map(|p| p.to_string()),
        queue_names: args.queues.clone(),
        timeout: config.command_timeout,
        missing_group,
        utc_offset: None,
    }
}

/// Published DNs per queue for the configured GLUE schemas.
///
/// A missing or unreadable BDII setup only drops the mapping.
fn share_map(config: &Config) -> ShareMap {
    let mut shares = ShareMap::default();

    let bdii = match BdiiConfig::load(&config.bdii_configfile) {
        Ok(bdii) => bdii,
        Err(e) => {
            tracing::warn!(error = %e, "cannot read BDII configuration");
            return shares;
        }
    };
    let ldif_dir = bdii.ldif_dir();

    if config.output_format.includes_glue1() {
        match glue1_queue_map(&ldif_dir) {
            Ok(map) => shares.add_all(map),
            Err(e) => tracing::warn!(error = %e, "cannot read GLUE1 LDIF"),
        }
    }
    if config.output_format.includes_glue2() {
        match glue2_queue_map(&ldif_dir) {
            Ok(mapping) => {
                shares.add_all(mapping.shares);
                shares.managers = mapping.managers.into_values().collect();
            }
            Err(e) => tracing::warn!(error = %e, "cannot read GLUE2 LDIF"),
        }
    }

    shares
}

//! `cim`: build and prepare synthetic CI repositories

use anyhow::Context;
use cim_mock::MISC_INPUT_RUN;
use cim_repo::{BootstrapOutcome, FixtureConfig, RepoBootstrapper};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::io::IsTerminal;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("cim")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Synthetic repositories for pipeline CI")
        .subcommand_required(true)
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .global(true)
                .default_value("plain")
                .value_parser(["plain", "json"])
                .help("Log line format"),
        )
        .subcommand(
            Command::new("make-base-repo")
                .about("Create a base repository with instrument records, calibrations and raws")
                .arg(
                    Arg::new("root")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Repository directory"),
                )
                .arg(
                    Arg::new("clobber")
                        .long("clobber")
                        .action(ArgAction::SetTrue)
                        .help("Delete an existing repository first"),
                )
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_parser(value_parser!(PathBuf))
                        .help("Fixture configuration (TOML)"),
                ),
        )
        .subcommand(
            Command::new("prep-for-pipeline")
                .about("Add mock datasets for the overall inputs of a pipeline")
                .arg(
                    Arg::new("root")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Repository directory"),
                )
                .arg(
                    Arg::new("pipeline")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Pipeline definition (YAML)"),
                )
                .arg(
                    Arg::new("run")
                        .long("run")
                        .default_value(MISC_INPUT_RUN)
                        .help("Run collection for the new datasets"),
                ),
        )
}

fn init_logging(format: &str) {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if format == "json" {
        builder.json().init();
    } else {
        builder.with_ansi(std::io::stderr().is_terminal()).init();
    }
}

fn path_arg(args: &ArgMatches, name: &str) -> anyhow::Result<PathBuf> {
    args.get_one::<PathBuf>(name)
        .cloned()
        .with_context(|| format!("missing argument <{name}>"))
}

fn make_base_repo(args: &ArgMatches) -> anyhow::Result<()> {
    let root = path_arg(args, "root")?;
    let config = match args.get_one::<PathBuf>("config") {
        Some(path) => FixtureConfig::from_path(path)?,
        None => FixtureConfig::default(),
    };
    let outcome = RepoBootstrapper::new(config)
        .bootstrap(&root, args.get_flag("clobber"))
        .with_context(|| format!("bootstrapping {}", root.display()))?;
    match outcome {
        BootstrapOutcome::Existing => info!(root = %root.display(), "repository already present"),
        BootstrapOutcome::Created { datasets } => info!(root = %root.display(), datasets, "base repository ready"),
    }
    Ok(())
}

fn prep_for_pipeline(args: &ArgMatches) -> anyhow::Result<()> {
    let root = path_arg(args, "root")?;
    let pipeline = path_arg(args, "pipeline")?;
    let run = args
        .get_one::<String>("run")
        .map_or(MISC_INPUT_RUN, String::as_str);
    let written = cim_mock::prep(&root, &pipeline, run)
        .with_context(|| format!("preparing {} for {}", root.display(), pipeline.display()))?;
    info!(written, run, "repository prepared");
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    let Some((name, args)) = matches.subcommand() else {
        anyhow::bail!("no subcommand given");
    };
    init_logging(args.get_one::<String>("log-format").map_or("plain", String::as_str));

    match name {
        "make-base-repo" => make_base_repo(args),
        "prep-for-pipeline" => prep_for_pipeline(args),
        other => anyhow::bail!("unknown subcommand {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_definition_is_consistent() {
        cli().debug_assert();
    }

    #[test]
    fn prep_run_defaults_to_misc() {
        let matches = cli()
            .try_get_matches_from(["cim", "prep-for-pipeline", "repo", "ci.yaml"])
            .unwrap();
        let (name, args) = matches.subcommand().unwrap();
        assert_eq!(name, "prep-for-pipeline");
        assert_eq!(args.get_one::<String>("run").unwrap(), MISC_INPUT_RUN);
        assert_eq!(args.get_one::<String>("log-format").unwrap(), "plain");
    }

    #[test]
    fn log_format_is_global_and_checked() {
        let matches = cli()
            .try_get_matches_from(["cim", "make-base-repo", "repo", "--clobber", "--log-format", "json"])
            .unwrap();
        let (_, args) = matches.subcommand().unwrap();
        assert_eq!(args.get_one::<String>("log-format").unwrap(), "json");
        assert!(cli()
            .try_get_matches_from(["cim", "--log-format", "xml", "make-base-repo", "repo"])
            .is_err());
    }
}

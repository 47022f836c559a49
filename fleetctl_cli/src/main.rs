#[macro_use]
extern crate clap;
#[macro_use]
extern crate log;
extern crate loggerv;
extern crate libc;

extern crate fleetctl;

use clap::{Arg, App, AppSettings, ArgMatches, SubCommand};
use std::env;
use std::path::{Path, PathBuf};
use std::process;

use fleetctl::pipeline::run_command::RunCommandOptions;
use fleetctl::{Error, Result, DEFAULT_CONCURRENCY};

fn print_error_debug(e: &Error) {
    if env::var("CIRCLECI").is_ok() {
        // https://github.com/clux/muslrust/issues/42
        warn!("{:?}", e);
    } else {
        for e in e.iter().skip(1) {
            warn!("caused by: {}", e);
        }
    }
}

fn main() {
    let app = App::new("fleetctl")
        .version(crate_version!())
        .setting(AppSettings::VersionlessSubcommands)
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .setting(AppSettings::ColoredHelp)
        .setting(AppSettings::DeriveDisplayOrder)
        .global_settings(&[AppSettings::ColoredHelp])
        .about("Declarative, agentless fleet deployment engine")
        .arg(Arg::with_name("verbose")
            .short("v")
            .multiple(true)
            .help("Increase verbosity"))
        .arg(Arg::with_name("debug")
            .short("d")
            .long("debug")
            .help("Adds line numbers to log statements"))
        .arg(Arg::with_name("workspace")
            .short("w")
            .long("workspace")
            .takes_value(true)
            .global(true)
            .help("Workspace root (defaults to the current directory)"))

        .subcommand(SubCommand::with_name("init")
            .about("Bootstrap a workspace: directory skeleton, DB, CA, bucket_id"))

        .subcommand(SubCommand::with_name("build")
            .about("Run the reconciliation pipeline plus the post_build hook")
            .arg(Arg::with_name("concurrency")
                .long("concurrency")
                .short("c")
                .takes_value(true)
                .help("Worker pool size (default 4)")))

        .subcommand(SubCommand::with_name("deploy")
            .about("Run the deployment orchestrator over all or selected jobs")
            .arg(Arg::with_name("jobs")
                .long("jobs")
                .takes_value(true)
                .help("Comma-separated job names to restrict to"))
            .arg(Arg::with_name("concurrency")
                .long("concurrency")
                .short("c")
                .takes_value(true)
                .help("Worker pool size (default 4)")))

        .subcommand(SubCommand::with_name("health-check")
            .about("Run only the health_check hook")
            .arg(Arg::with_name("jobs")
                .long("jobs")
                .takes_value(true)
                .help("Comma-separated job names to restrict to"))
            .arg(Arg::with_name("wait")
                .long("wait")
                .help("Retry until healthy instead of failing after one attempt"))
            .arg(Arg::with_name("concurrency")
                .long("concurrency")
                .short("c")
                .takes_value(true)
                .help("Worker pool size (default 4)")))

        .subcommand(SubCommand::with_name("run-command")
            .about("Run an ad hoc shell command across selected hosts")
            .arg(Arg::with_name("agents")
                .long("agents")
                .takes_value(true)
                .help("Comma-separated host IPs to target"))
            .arg(Arg::with_name("labels")
                .long("labels")
                .takes_value(true)
                .help("Comma-separated labels to target (default: every agent)"))
            .arg(Arg::with_name("cmd")
                .long("cmd")
                .takes_value(true)
                .help("Inline shell body; otherwise workspace/command.sh is used"))
            .arg(Arg::with_name("local")
                .long("local")
                .help("Run on the controller instead of over ssh"))
            .arg(Arg::with_name("health_check")
                .long("health_check")
                .help("Retry the command against the health-check gate"))
            .arg(Arg::with_name("concurrency")
                .long("concurrency")
                .short("c")
                .takes_value(true)
                .help("Worker pool size (default 4)"))
            .arg(Arg::with_name("disable-cluster-check")
                .long("disable-cluster-check")
                .help("Skip validating --agents against the known inventory")))

        .subcommand(SubCommand::with_name("gc")
            .about("Physically expire soft-deleted KV rows and detained hosts")
            .arg(Arg::with_name("max-days")
                .long("max-days")
                .takes_value(true)
                .help("Age threshold in days (default 30)")));

    let args = app.get_matches();
    let name = args.subcommand_name().unwrap_or("fleetctl");
    if let Err(e) = run(&args) {
        error!("{} error: {}", name, e);
        print_error_debug(&e);
        process::exit(1);
    }
    process::exit(0);
}

fn run(args: &ArgMatches) -> Result<()> {
    loggerv::Logger::new()
        .verbosity(args.occurrences_of("verbose") + 1)
        .module_path(true)
        .line_numbers(args.is_present("debug"))
        .init()
        .unwrap();

    // Ignore SIGPIPE errors to avoid having to use `let _ = write!` everywhere.
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }

    let workspace_root = workspace_root(args)?;
    dispatch_commands(args, &workspace_root)
}

fn workspace_root(args: &ArgMatches) -> Result<PathBuf> {
    match args.value_of("workspace") {
        Some(w) => Ok(Path::new(w).to_path_buf()),
        None => Ok(env::current_dir()?),
    }
}

fn concurrency_of(args: &ArgMatches) -> usize {
    args.value_of("concurrency")
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_CONCURRENCY)
}

fn csv_list(args: &ArgMatches, name: &str) -> Vec<String> {
    args.value_of(name)
        .map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
        .unwrap_or_default()
}

fn dispatch_commands(args: &ArgMatches, workspace_root: &Path) -> Result<()> {
    if args.subcommand_matches("init").is_some() {
        return fleetctl::pipeline::init::run(workspace_root);
    }

    if let Some(a) = args.subcommand_matches("build") {
        return fleetctl::pipeline::build::run(workspace_root, concurrency_of(a));
    }

    if let Some(a) = args.subcommand_matches("deploy") {
        let jobs = csv_list(a, "jobs");
        let filter = if jobs.is_empty() { None } else { Some(jobs.as_slice()) };
        return fleetctl::pipeline::deploy::run(workspace_root, filter, concurrency_of(a));
    }

    if let Some(a) = args.subcommand_matches("health-check") {
        let jobs = csv_list(a, "jobs");
        let filter = if jobs.is_empty() { None } else { Some(jobs.as_slice()) };
        return fleetctl::pipeline::health_check::run(workspace_root, filter, a.is_present("wait"), concurrency_of(a));
    }

    if let Some(a) = args.subcommand_matches("run-command") {
        let agents = csv_list(a, "agents");
        let labels = csv_list(a, "labels");
        let opts = RunCommandOptions {
            agents: &agents,
            labels: &labels,
            cmd: a.value_of("cmd"),
            local: a.is_present("local"),
            health_check: a.is_present("health_check"),
            concurrency: concurrency_of(a),
            disable_cluster_check: a.is_present("disable-cluster-check"),
        };
        return fleetctl::pipeline::run_command::run(workspace_root, &opts);
    }

    if let Some(a) = args.subcommand_matches("gc") {
        let max_days = a.value_of("max-days").and_then(|v| v.parse().ok()).unwrap_or(30);
        return fleetctl::pipeline::gc::run(workspace_root, max_days);
    }

    unreachable!("subcommand required by AppSettings::SubcommandRequiredElseHelp")
}

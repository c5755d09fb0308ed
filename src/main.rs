mod config;
mod render;
mod request;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use watchlog_logs::detect;
use watchlog_logs::{HostMap, LogError, LogSource, Summary, SuspicionReport};

use crate::config::Config;
use crate::request::{Outcome, Request};

/// Watchlog - browse, filter and summarize firewall logs
#[derive(Parser, Debug)]
#[command(name = "watchlog")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (TOML)
    #[arg(long, env = "WATCHLOG_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Log root holding {host}/{month}/watchguard.log
    #[arg(long, env = "WG_LOG_BASE", global = true)]
    root: Option<PathBuf>,

    /// File of `ip: name` lines used to label addresses
    #[arg(long, global = true)]
    hosts_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List hosts with logs
    Hosts,

    /// List months available for a host (defaults to the last host)
    Months {
        #[arg(value_name = "HOST")]
        host: Option<String>,
    },

    /// Show the filtered tail of one month's log
    View(ViewArgs),

    /// Summarize the newest month of every host
    Report(ReportArgs),
}

#[derive(clap::Args, Debug)]
struct ViewArgs {
    /// Host (defaults to the last host)
    #[arg(long)]
    host: Option<String>,

    /// Month folder, e.g. 2024-05 (defaults to the newest)
    #[arg(long)]
    month: Option<String>,

    /// Number of trailing lines to read
    #[arg(short = 'n', long)]
    lines: Option<usize>,

    /// Filter expression: `deny -dns action!=Allow dport=6881-6999 ip=192.168.1.23`
    #[arg(short, long, default_value = "")]
    query: String,

    /// Extra regex; matches OR with the filter's text terms
    #[arg(long)]
    regex: Option<String>,

    /// Print a decoded flow header above each line
    #[arg(long)]
    pretty: bool,

    /// Collapse repeated consecutive lines
    #[arg(long)]
    fold: bool,

    /// Skip the top-N tables
    #[arg(long)]
    no_summary: bool,

    /// Emit JSON instead of text
    #[arg(long)]
    json: bool,
}

#[derive(clap::Args, Debug)]
struct ReportArgs {
    /// Number of trailing lines to read per host
    #[arg(short = 'n', long)]
    lines: Option<usize>,

    /// Filter expression applied before summarizing
    #[arg(short, long, default_value = "")]
    query: String,

    /// Emit JSON instead of text
    #[arg(long)]
    json: bool,
}

/// Per-host section of a report
#[derive(Debug, Serialize)]
struct HostReport {
    host: String,
    month: String,
    fetched: usize,
    matched: usize,
    summary: Summary,
    suspicion: SuspicionReport,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Diagnostics go to stderr so stdout stays pipeable
    let directives = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(directives.as_deref()))
        .with_writer(std::io::stderr)
        .init();

    match run_app(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// `RUST_LOG` directives when set and valid, WARN otherwise
fn log_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .filter(|d| !d.trim().is_empty())
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new("warn"))
}

async fn run_app(args: Args) -> Result<()> {
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(root) = args.root {
        config.log_root = root;
    }
    if let Some(hosts_file) = args.hosts_file {
        config.hosts_file = Some(hosts_file);
    }

    let source = LogSource::new(&config.log_root);
    let host_map = config.hosts_file.as_ref().map(HostMap::new);
    if let Some(map) = &host_map {
        map.reload_if_stale();
    }

    match args.command {
        Command::Hosts => {
            let hosts = source.hosts();
            if hosts.is_empty() {
                eprintln!("No logs yet under {}", source.root().display());
            }
            for host in hosts {
                println!("{}", host);
            }
            Ok(())
        }
        Command::Months { host } => {
            let host = pick_host(&source, host)?;
            for month in source.months(&host) {
                println!("{}", month);
            }
            Ok(())
        }
        Command::View(view_args) => view(&config, &source, host_map.as_ref(), view_args),
        Command::Report(report_args) => {
            report(&config, &source, host_map.as_ref(), report_args).await
        }
    }
}

/// Requested host, or the last one on disk
fn pick_host(source: &LogSource, host: Option<String>) -> Result<String> {
    match host {
        Some(host) => Ok(host),
        None => source
            .hosts()
            .pop()
            .with_context(|| format!("No logs yet under {}", source.root().display())),
    }
}

/// Requested month, or the newest one for the host
fn pick_month(source: &LogSource, host: &str, month: Option<String>) -> Result<String> {
    match month {
        Some(month) => Ok(month),
        None => source.months(host).pop().with_context(|| {
            format!(
                "No month folders under {}",
                source.root().join(host).display()
            )
        }),
    }
}

fn view(
    config: &Config,
    source: &LogSource,
    host_map: Option<&HostMap>,
    args: ViewArgs,
) -> Result<()> {
    let host = pick_host(source, args.host)?;
    let month = pick_month(source, &host, args.month)?;

    let request = Request {
        host,
        month,
        lines: config.clamp_lines(args.lines),
        query: args.query,
        regex: args.regex,
    };

    let outcome = request.run(source).map_err(|e| match e {
        LogError::NotFound { path } => anyhow::anyhow!("File not found: {}", path.display()),
        other => anyhow::Error::new(other).context(format!(
            "Cannot read logs for {}/{}",
            request.host, request.month
        )),
    })?;

    for warning in &outcome.warnings {
        eprintln!("Filter: ignoring {}", warning);
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    print_lines(&outcome, host_map, args.pretty, args.fold);

    if !args.no_summary {
        println!();
        print!("{}", render::table("Top internal sources", &outcome.summary.top_ips, host_map));
        print!("{}", render::table("Top destination ports", &outcome.summary.top_ports, None));
    }
    println!(
        "{} of {} lines from {}",
        outcome.lines.len(),
        outcome.fetched,
        outcome.path.display()
    );

    Ok(())
}

fn print_lines(outcome: &Outcome, host_map: Option<&HostMap>, pretty: bool, fold: bool) {
    let now = Local::now();
    let rows: Vec<(&str, usize)> = if fold {
        render::fold_duplicates(&outcome.lines)
    } else {
        outcome.lines.iter().map(|l| (l.as_str(), 1)).collect()
    };

    for (line, count) in rows {
        if pretty {
            println!("{}", render::header(line, host_map, now));
            println!("    {}", render::folded(line, count));
        } else {
            println!("{}", render::folded(line, count));
        }
    }
}

async fn report(
    config: &Config,
    source: &LogSource,
    host_map: Option<&HostMap>,
    args: ReportArgs,
) -> Result<()> {
    let lines = config.clamp_lines(args.lines);

    // Hosts are read in parallel on the blocking pool; each task owns its data
    let mut tasks = Vec::new();
    for host in source.hosts() {
        let Some(month) = source.months(&host).pop() else {
            continue;
        };
        let request = Request {
            host: host.clone(),
            month,
            lines,
            query: args.query.clone(),
            regex: None,
        };
        let source = source.clone();
        let task = tokio::task::spawn_blocking(move || {
            let outcome = request.run(&source)?;
            let suspicion = detect::analyze(&outcome.lines);
            Ok::<_, LogError>((outcome, suspicion))
        });
        tasks.push((host, task));
    }

    if tasks.is_empty() {
        eprintln!("No logs yet under {}", source.root().display());
        return Ok(());
    }

    let mut reports = Vec::new();
    for (host, task) in tasks {
        match task.await.context("Report task failed")? {
            Ok((outcome, suspicion)) => reports.push(HostReport {
                host,
                month: outcome.month,
                fetched: outcome.fetched,
                matched: outcome.lines.len(),
                summary: outcome.summary,
                suspicion,
            }),
            Err(e) => eprintln!("{}: {}", host, e),
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    for entry in &reports {
        println!(
            "== {} / {} ({} of {} lines) ==",
            entry.host, entry.month, entry.matched, entry.fetched
        );
        print!("{}", render::table("Top internal sources", &entry.summary.top_ips, host_map));
        print!("{}", render::table("Top destination ports", &entry.summary.top_ports, None));
        print!("{}", render::suspicion(&entry.suspicion, host_map));
        println!();
    }

    Ok(())
}

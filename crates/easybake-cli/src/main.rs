use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use easybake::{BakeError, Oven, html};
use tracing_subscriber::EnvFilter;

/// Process raw HTML to cooked (embedded numbering and collation).
#[derive(Debug, Parser)]
#[command(name = "easybake", version, disable_version_flag = true)]
struct Args {
    /// Print version
    #[arg(short = 'v', long = "version", action = clap::ArgAction::Version)]
    version: Option<bool>,

    /// CSS3 ruleset stylesheet recipe
    css_rules: PathBuf,

    /// Raw HTML file to cook (default stdin)
    html_in: Option<PathBuf>,

    /// Cooked HTML file output (default stdout)
    html_out: Option<PathBuf>,

    /// Run passes strictly before this one
    #[arg(short = 's', long = "stop-at", value_name = "PASS")]
    stop_at: Option<String>,

    /// Send debugging info to stderr
    #[arg(short, long)]
    debug: bool,

    /// Write an LCOV fragment of rule usage; prefix the path with + to
    /// append
    #[arg(short = 'c', long = "coverage-file", value_name = "PATH")]
    coverage_file: Option<String>,

    /// Generate repeatable autobaked-N ids instead of UUIDs
    #[arg(long)]
    use_repeatable_ids: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.debug);
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), BakeError> {
    let css = fs::read_to_string(&args.css_rules)?;
    let mut oven = Oven::new(&css, args.use_repeatable_ids)?;

    let doc = match &args.html_in {
        Some(path) => html::parse(&mut fs::File::open(path)?)?,
        None => html::parse(&mut io::stdin().lock())?,
    };

    oven.bake(&doc.root, args.stop_at.as_deref());

    match &args.html_out {
        Some(path) => html::serialize(&doc, &mut fs::File::create(path)?)?,
        None => html::serialize(&doc, &mut io::stdout().lock())?,
    }

    if let Some(path_arg) = &args.coverage_file {
        write_coverage(path_arg, &oven.coverage_report())?;
    }
    Ok(())
}

fn write_coverage(path_arg: &str, report: &str) -> io::Result<()> {
    if let Some(path) = path_arg.strip_prefix('+') {
        let mut file = fs::OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(report.as_bytes())
    } else {
        fs::write(path_arg, report)
    }
}

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .without_time()
        .init();
}

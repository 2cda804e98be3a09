use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use gpman::{Aid, Key, Orchestrator, SecurityMode};
use gpman_pcsc::PcscTerminal;
use tracing::debug;

mod utils;

use utils::{config, display, dump::CliTerminal, reader};

#[derive(Parser, Debug)]
#[command(version, about = "Manage GlobalPlatform smart cards")]
struct Cli {
    /// Show PC/SC and APDU trace
    #[arg(short, long)]
    debug: bool,

    /// Be verbose about operations
    #[arg(short, long)]
    verbose: bool,

    /// Use specific reader
    #[arg(short, long)]
    reader: Option<String>,

    /// List available readers and exit
    #[arg(long)]
    list_readers: bool,

    /// List the contents of the card
    #[arg(short, long)]
    list: bool,

    /// Show information
    #[arg(short, long)]
    info: bool,

    /// Send raw APDU (hex)
    #[arg(short, long, value_name = "HEX")]
    apdu: Vec<String>,

    /// Send raw APDU (hex) via SCP
    #[arg(short, long, value_name = "HEX")]
    secure_apdu: Vec<String>,

    /// Dump APDU communication to <FILE>
    #[arg(long, value_name = "FILE")]
    dump: Option<PathBuf>,

    /// Relaxed error checking
    #[arg(long)]
    relax: bool,

    /// Work with multiple readers
    #[arg(long)]
    all: bool,

    /// Continue with the next reader after a reader failure
    #[arg(long)]
    skip_error: bool,

    /// Use a CAP file as source
    #[arg(long, value_name = "FILE")]
    cap: Option<PathBuf>,

    /// Load a CAP file
    #[arg(long, value_name = "FILE")]
    load: Option<PathBuf>,

    /// Install applet, from the given CAP file or --cap
    #[arg(long, value_name = "FILE")]
    install: Option<Option<PathBuf>>,

    /// Installation parameters (hex)
    #[arg(long, value_name = "HEX")]
    params: Option<String>,

    /// Uninstall applet/package
    #[arg(long, value_name = "FILE")]
    uninstall: Option<PathBuf>,

    /// Indicate Default Selected
    #[arg(long)]
    default: bool,

    /// Also delete dependencies
    #[arg(long, requires = "delete")]
    deletedeps: bool,

    /// Remove card content during installation
    #[arg(long)]
    reinstall: bool,

    /// Make AID the default
    #[arg(long, value_name = "AID")]
    make_default: Option<Aid>,

    /// Delete something
    #[arg(long, value_name = "AID", num_args = 0..=1, action = clap::ArgAction::Append)]
    delete: Option<Vec<Aid>>,

    /// Create new instance of an applet
    #[arg(long, value_name = "AID")]
    create: Option<Aid>,

    /// Applet AID
    #[arg(long, value_name = "AID")]
    applet: Option<Aid>,

    /// Package AID
    #[arg(long, value_name = "AID")]
    package: Option<Aid>,

    /// Instance AID
    #[arg(long, value_name = "AID")]
    instance: Option<Aid>,

    /// Specify MAC key
    #[arg(long, value_name = "KEY")]
    mac: Option<Key>,

    /// Specify ENC key
    #[arg(long, value_name = "KEY")]
    enc: Option<Key>,

    /// Specify KEK key
    #[arg(long, value_name = "KEY")]
    kek: Option<Key>,

    /// Specify master key
    #[arg(long, value_name = "KEY")]
    key: Option<Key>,

    /// Specify key ID
    #[arg(long)]
    keyid: Option<u8>,

    /// Specify key version
    #[arg(long)]
    keyver: Option<u8>,

    /// Set new key
    #[arg(long, value_name = "KEY")]
    lock: Option<Key>,

    /// Set default key
    #[arg(long)]
    unlock: bool,

    /// Force the use of SCP0X
    #[arg(long)]
    scp: Option<u8>,

    /// Key version for the new key
    #[arg(long)]
    new_keyver: Option<u8>,

    /// Card has virgin keys
    #[arg(long)]
    virgin: bool,

    /// Use EMV diversification
    #[arg(long)]
    emv: bool,

    /// Use VISA2 diversification
    #[arg(long)]
    visa2: bool,

    /// APDU mode to use (mac/enc/clr)
    #[arg(long)]
    mode: Option<SecurityMode>,

    /// ISD AID
    #[arg(long, value_name = "AID")]
    sdaid: Option<Aid>,
}

fn main() -> ExitCode {
    // Parse command line arguments, usage errors exit with 1
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.debug);

    match run(&cli) {
        Ok(code) => code,
        Err(error) => {
            eprintln!("{}", display::error(&error.to_string()));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<ExitCode, Box<dyn std::error::Error>> {
    run_with(cli, PcscTerminal::new)
}

/// Runs the command line against the terminal returned by `open`, which is
/// only called once the flags are known to be consistent
fn run_with<E>(
    cli: &Cli,
    open: impl FnOnce() -> Result<PcscTerminal, E>,
) -> Result<ExitCode, Box<dyn std::error::Error>>
where
    E: Into<Box<dyn std::error::Error>>,
{
    if cli.list_readers {
        reader::list_readers(&open().map_err(Into::into)?)?;
        return Ok(ExitCode::SUCCESS);
    }

    // Everything is validated before PC/SC is touched
    let config = config::build(cli)?;
    debug!(options = ?config.options, "configuration resolved");

    let pcsc = open().map_err(Into::into)?;
    let mut terminal = CliTerminal::new(pcsc, cli.dump.as_deref())?;
    let mut reporter = display::ConsoleReporter::default();
    let report = Orchestrator::new(&mut terminal, &config, &mut reporter).run()?;

    Ok(match report.exit_code() {
        0 => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    })
}

fn setup_logging(verbose: bool, debug: bool) {
    let level = if debug {
        tracing::Level::TRACE
    } else if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    // RUST_LOG directives take precedence over the flags
    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(tracing_subscriber::filter::LevelFilter::from_level(level).into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .init();
}

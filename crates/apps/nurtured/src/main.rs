//! nurtured - Lead nurturing daemon
//!
//! Runs nurturing cycles against a Gmail mailbox, either once, on a loop,
//! or under remote control over stdin/stdout.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use log::{error, info, warn};

use nurture::config::CONFIG_FILE;
use nurture::logging::DEFAULT_CAPACITY;
use nurture::storage::Snapshot;
use nurture::{
    CONTACTS_FILE, ConfigHandle, ControlResponse, ControlSurface, CsvContactSource, GmailAuth,
    GmailClient, GmailCredentials, InMemoryLeadStore, InMemoryMessageSource, JsonFileStore,
    LeadStore, MessageSource, NurtureEngine, NurtureRunner,
};

#[derive(Parser)]
#[command(name = "nurtured", version, about = "Automated lead follow-up over Gmail")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Data directory holding config, contacts, tokens and tracking files
    #[arg(long, global = true, env = "NURTURE_DATA_DIR", value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Never send mail or write tracking files
    #[arg(long, global = true)]
    dry_run: bool,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one cycle and print the report
    Run,
    /// Run cycles on an interval until stdin closes
    Daemon {
        /// Hours between cycles, overriding the config
        #[arg(long)]
        interval_hours: Option<u64>,
    },
    /// Print the report without running a cycle
    Report {
        #[arg(long)]
        json: bool,
    },
    /// Accept JSON control requests on stdin, one per line
    Serve,
    /// Send a status summary to an address
    SendTest { email: String },
    /// Send the initial message to every lead not yet contacted
    Outreach,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = nurture::init_logging(&cli.log_level, DEFAULT_CAPACITY) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    if let Err(e) = run(cli) {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let data_dir = match cli.data_dir {
        Some(dir) => {
            config::ensure_dir(&dir)?;
            dir
        }
        None => config::init().context("Failed to initialize data directory")?,
    };
    info!("Using data directory {}", data_dir.display());

    let engine = Arc::new(build_engine(&data_dir, cli.dry_run)?);

    match cli.command {
        Commands::Run => {
            let outcome = engine.run_cycle()?;
            println!("{}", outcome);
        }
        Commands::Daemon { interval_hours } => {
            let runner = NurtureRunner::new(engine);
            runner.start(interval_hours)?;
            wait_for_eof();
            info!("stdin closed, shutting down");
            runner.stop()?;
        }
        Commands::Report { json } => {
            let report = engine.report()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report);
            }
        }
        Commands::Serve => {
            let surface = ControlSurface::new(Arc::new(NurtureRunner::new(engine)));
            serve(&surface)?;
        }
        Commands::SendTest { email } => {
            let surface = ControlSurface::new(Arc::new(NurtureRunner::new(engine)));
            let response = surface.handle(nurture::ControlRequest::SendTest { email });
            println!("{}", response.text);
            if !response.ok {
                std::process::exit(1);
            }
        }
        Commands::Outreach => {
            let stats = engine.send_initial_outreach()?;
            println!(
                "Initial outreach: {} sent, {} failed, {} skipped",
                stats.sent, stats.failed, stats.skipped
            );
        }
    }

    Ok(())
}

fn build_engine(data_dir: &Path, dry_run: bool) -> Result<NurtureEngine> {
    let config = Arc::new(ConfigHandle::load(data_dir.join(CONFIG_FILE))?);
    let contacts_path = data_dir.join(CONTACTS_FILE);
    if !contacts_path.exists() {
        warn!("No contact list at {}", contacts_path.display());
    }
    let contacts = Arc::new(CsvContactSource::new(contacts_path));
    let json_store = JsonFileStore::new(data_dir);

    let (source, store): (Arc<dyn MessageSource>, Arc<dyn LeadStore>) = if dry_run {
        info!("Dry run: no mail is sent and tracking files are not written");
        let snapshot: Snapshot = json_store.load()?;
        (
            Arc::new(InMemoryMessageSource::new()),
            Arc::new(InMemoryLeadStore::with_snapshot(snapshot)),
        )
    } else {
        let credentials = GmailCredentials::load(data_dir)
            .context("Gmail credentials not found")?;
        let auth = GmailAuth::new(&credentials, data_dir);
        if !auth.is_authenticated() {
            bail!(
                "No Gmail token at {}. Authorize the account and place the token document there.",
                auth.token_path().display()
            );
        }
        let page_size = config.snapshot().sync.page_size;
        (
            Arc::new(GmailClient::new(auth).with_page_size(page_size)),
            Arc::new(json_store),
        )
    };

    Ok(NurtureEngine::new(source, store, contacts, config).with_attachment_dir(data_dir))
}

/// Block until stdin reaches EOF
fn wait_for_eof() {
    let mut sink = std::io::sink();
    if let Err(e) = std::io::copy(&mut std::io::stdin().lock(), &mut sink) {
        warn!("Failed to read stdin: {}", e);
    }
}

/// Answer one JSON request per stdin line until EOF
fn serve(surface: &ControlSurface) -> Result<()> {
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout().lock();
    info!("Control surface ready on stdin");

    for line in stdin.lock().lines() {
        let line = line.context("Failed to read control request")?;
        if line.trim().is_empty() {
            continue;
        }
        let response: ControlResponse = surface.handle_line(&line);
        writeln!(stdout, "{}", serde_json::to_string(&response)?)?;
        stdout.flush()?;
    }

    if surface.runner().is_running() {
        surface.runner().stop()?;
    }
    Ok(())
}

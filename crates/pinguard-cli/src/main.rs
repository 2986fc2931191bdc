//! Pinguard CLI - PIN unlock with brute-force protection
//!
//! Reads PIN digits from stdin, checks them against the locally stored
//! credential and enforces the attempt limit across runs.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pinguard_core::pin::{format_time_remaining, validate_pin, EntryMode};
use pinguard_core::{
    AttemptStore, AttemptThrottle, Clock, GuardConfig, GuardError, JsonFileStore,
    LocalPinVerifier, PinCredential, PinInput, PinOutput, PinVerificationMachine,
    ProtectionStatus, SessionOutcome, SystemClock, TokioScheduler,
};

/// Refresh rate of the lockout countdown
const COUNTDOWN_TICK: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(name = "pinguard")]
#[command(about = "PIN unlock with attempt throttling and timed lockout", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to $PINGUARD_CONFIG or the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Set or replace the PIN
    SetPin {
        /// Replace an existing PIN
        #[arg(long)]
        force: bool,
    },

    /// Show attempts made and any active lockout
    Status,

    /// Enter the PIN interactively
    ///
    /// Digits are read from stdin; `-` deletes the last digit.
    Unlock,

    /// Clear failed attempts and any lockout
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pinguard=info,pinguard_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(GuardConfig::default_path);
    let config = GuardConfig::load_or_init(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    match cli.command {
        Commands::SetPin { force } => set_pin(&config, force)?,
        Commands::Status => {
            let throttle = open_throttle(&config)?;
            print_status(throttle.status()?);
        }
        Commands::Unlock => unlock(&config).await?,
        Commands::Reset => {
            let throttle = open_throttle(&config)?;
            throttle.record_successful_authentication()?;
            println!("Failed attempts cleared.");
        }
    }

    Ok(())
}

fn open_throttle(config: &GuardConfig) -> Result<AttemptThrottle> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store: Arc<dyn AttemptStore> = Arc::new(JsonFileStore::new(config.attempts_path())?);
    let scheduler = Arc::new(TokioScheduler::current(Arc::clone(&clock))?);

    AttemptThrottle::new(config.throttle()?, store, clock, scheduler)
        .context("Failed to open attempt state")
}

fn set_pin(config: &GuardConfig, force: bool) -> Result<()> {
    let path = config.credential_path();
    if path.exists() && !force {
        bail!("A PIN is already set. Use --force to replace it.");
    }

    let pin = prompt(&format!("New PIN ({} digits): ", config.submit_length))?;
    validate_pin(&pin, config.submit_length)?;
    let confirm = prompt("Confirm PIN: ")?;
    if pin != confirm {
        bail!("PINs do not match");
    }

    PinCredential::create(&pin, config.submit_length)?.save(&path)?;
    info!("PIN credential written to {:?}", path);
    println!("PIN set.");
    Ok(())
}

async fn unlock(config: &GuardConfig) -> Result<()> {
    let credential =
        PinCredential::load(&config.credential_path())?.ok_or(GuardError::PinNotSetUp)?;
    let throttle = open_throttle(config)?;
    let machine = PinVerificationMachine::new(
        throttle,
        Arc::new(LocalPinVerifier::new(credential)),
        config.pin_entry()?,
    );

    let (input_tx, input_rx) = mpsc::unbounded_channel();
    let (output_tx, mut output_rx) = mpsc::unbounded_channel();

    // Blocking stdin reads stay off the runtime so exit never waits on them
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            for c in line.trim().chars() {
                let input = match c {
                    '-' => PinInput::DigitRemoved,
                    c => PinInput::DigitEntered(c),
                };
                if input_tx.send(input).is_err() {
                    return;
                }
            }
        }
    });

    let printer = tokio::spawn(async move {
        let mut screen = Screen::default();
        let mut ticker = tokio::time::interval(COUNTDOWN_TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                output = output_rx.recv() => match output {
                    Some(output) => {
                        let was_locked = screen.is_locked();
                        if let Some(line) = screen.render(output, Utc::now()) {
                            println!("{}", line);
                        }
                        // Next refresh is one period after the lock was shown
                        if screen.is_locked() && !was_locked {
                            ticker.reset();
                        }
                    }
                    None => break,
                },
                _ = ticker.tick(), if screen.is_locked() => {
                    if let Some(line) = screen.tick(Utc::now()) {
                        println!("{}", line);
                    }
                }
            }
        }
    });

    println!("Enter PIN:");
    let outcome = machine.run(input_rx, output_tx).await?;
    printer.await.context("Output task failed")?;

    match outcome {
        SessionOutcome::Verified(_) => println!("Unlocked."),
        SessionOutcome::Abandoned => bail!("PIN entry abandoned"),
    }
    Ok(())
}

/// Terminal view of the PIN widget
#[derive(Debug, Default)]
struct Screen {
    locked_until: Option<DateTime<Utc>>,
}

impl Screen {
    fn is_locked(&self) -> bool {
        self.locked_until.is_some()
    }

    /// Line to print for a machine output, if any
    fn render(&mut self, output: PinOutput, now: DateTime<Utc>) -> Option<String> {
        match output {
            PinOutput::ModeChanged(EntryMode::PinEntry) => {
                self.locked_until = None;
                None
            }
            PinOutput::ModeChanged(EntryMode::Progress) => Some("Checking...".to_string()),
            PinOutput::ModeChanged(EntryMode::Locked { until }) => {
                self.locked_until = Some(until);
                self.tick(now)
            }
            PinOutput::ErrorShown(error) => Some(error.to_string()),
            PinOutput::ErrorHidden => None,
            PinOutput::PinCleared => Some("Enter PIN:".to_string()),
            PinOutput::Verified(_) => Some("PIN accepted.".to_string()),
        }
    }

    /// Countdown line while locked
    fn tick(&self, now: DateTime<Utc>) -> Option<String> {
        self.locked_until
            .map(|until| format!("Locked. Try again in {}.", format_time_remaining(until, now)))
    }
}

fn print_status(status: ProtectionStatus) {
    match status {
        ProtectionStatus::Allowed {
            attempts_made,
            attempts_remaining,
        } => {
            println!("Failed attempts: {}", attempts_made);
            println!("Attempts remaining: {}", attempts_remaining);
        }
        ProtectionStatus::Locked {
            attempts_made,
            locked_until,
        } => {
            println!("Failed attempts: {}", attempts_made);
            println!(
                "Locked until {} ({} remaining)",
                locked_until.format("%Y-%m-%d %H:%M:%S UTC"),
                format_time_remaining(locked_until, Utc::now())
            );
        }
    }
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use grbllink::{
    describe, init_logging, list_ports, BatchJob, Config, EventCategory, EventFilter,
    JogDirection, JogOutcome, Link, ProgressCallback, BUILD_DATE, VERSION,
};

/// GRBLLink - command/acknowledgment link to GRBL controllers
#[derive(Parser, Debug)]
#[command(name = "grbllink", version, about, long_about = None)]
struct Args {
    /// Serial port (overrides the configuration file)
    #[arg(short, long, global = true)]
    port: Option<String>,

    /// Baud rate (overrides the configuration file)
    #[arg(short, long, global = true)]
    baud: Option<u32>,

    /// Configuration file (JSON or TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Talk to an in-memory simulated device instead of a serial port
    #[arg(long, global = true, default_value_t = false)]
    simulate: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List serial ports that look like CNC controllers
    Ports,
    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    #[command(flatten)]
    Device(DeviceCommand),
}

/// Commands that talk to the device
#[derive(Subcommand, Debug)]
enum DeviceCommand {
    /// Send one command and print the response
    Send {
        /// Command line, without terminator
        command: String,
    },
    /// Print firmware info and the settings table
    Info,
    /// Change settings, e.g. `set '$110=600' '$32=1'`
    Set {
        /// `$n=value` assignments
        #[arg(required = true)]
        assignments: Vec<String>,
    },
    /// Stream a program file and wait for the device to go Idle
    Stream {
        /// Program file, one command per line
        file: PathBuf,
        /// Command sent instead of the rest of the program on abort (repeatable)
        #[arg(long = "abort-command")]
        abort_commands: Vec<String>,
        /// Abort automatically after this many milliseconds
        #[arg(long)]
        abort_after_ms: Option<u64>,
    },
    /// Jog in one direction for a while
    Jog {
        /// Direction, e.g. `x+`, `y-`, `x-y+`, `z+`
        direction: JogDirection,
        /// Speed slider percent (defaults to the configured value)
        #[arg(short, long)]
        speed: Option<u32>,
        /// How long the button is held
        #[arg(long, default_value_t = 500)]
        hold_ms: u64,
        /// What to do once the jog has stopped
        #[arg(long, value_enum, default_value_t = AfterJog::Keep)]
        then: AfterJog,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Write the default configuration
    Init {
        /// Overwrite an existing file
        #[arg(long, default_value_t = false)]
        force: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum AfterJog {
    /// Leave the machine where the jog ended
    Keep,
    /// Make the end position the new origin
    SetOrigin,
    /// Return to the origin
    Cancel,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.json_logs)?;
    tracing::debug!("grbllink {} (built {})", VERSION, BUILD_DATE);

    let mut config = Link::load_config(args.config.as_deref())?;
    if let Some(baud) = args.baud {
        config.connection.baud_rate = baud;
    }

    match args.command {
        Command::Ports => ports(),
        Command::Config { action } => config_action(args.config.as_ref(), &config, action),
        Command::Device(command) => {
            let link = connect(&config, args.port.as_deref(), args.simulate)?;
            let result = run(&link, command).await;
            link.close(if result.is_ok() { "finished" } else { "failed" });
            result
        }
    }
}

async fn run(link: &Link, command: DeviceCommand) -> anyhow::Result<()> {
    match command {
        DeviceCommand::Send { command } => send(link, &command).await,
        DeviceCommand::Info => {
            info(link).await;
            Ok(())
        }
        DeviceCommand::Set { assignments } => set(link, &assignments).await,
        DeviceCommand::Stream {
            file,
            abort_commands,
            abort_after_ms,
        } => stream(link, file, abort_commands, abort_after_ms).await,
        DeviceCommand::Jog {
            direction,
            speed,
            hold_ms,
            then,
        } => jog(link, direction, speed, hold_ms, then).await,
    }
}

fn connect(config: &Config, port: Option<&str>, simulate: bool) -> anyhow::Result<Link> {
    if simulate {
        tracing::info!("Using simulated device");
        return Ok(Link::simulated(config.clone()).0);
    }
    Link::open_serial(config.clone(), port).context("cannot open serial port")
}

fn ports() -> anyhow::Result<()> {
    let ports = list_ports()?;
    if ports.is_empty() {
        println!("No CNC serial ports found");
    }
    for port in ports {
        println!("{}\t{}", port.port_name, port.description);
    }
    Ok(())
}

fn config_action(
    path: Option<&PathBuf>,
    config: &Config,
    action: ConfigAction,
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            print!("{}", config.to_toml_string()?);
        }
        ConfigAction::Init { force } => {
            let path = match path {
                Some(path) => path.to_path_buf(),
                None => Config::default_path()?,
            };
            if path.exists() && !force {
                bail!("{} already exists (use --force)", path.display());
            }
            Config::default().save_to_file(&path)?;
            println!("Wrote {}", path.display());
        }
    }
    Ok(())
}

async fn send(link: &Link, command: &str) -> anyhow::Result<()> {
    let response = link.executor().execute_report(command).await;
    print!("{}", response.text);
    if !response.acknowledged {
        bail!("no acknowledgment for {:?}", command);
    }
    Ok(())
}

async fn info(link: &Link) {
    let reader = link.settings_reader();
    let info = reader.read_info().await;
    println!(
        "Firmware: {}{}",
        info.version.as_deref().unwrap_or("unknown"),
        if info.legacy { " (legacy banner)" } else { "" }
    );
    if let Some(build) = &info.build {
        println!("Build:    {}", build);
    }
    if let Some(options) = &info.options {
        println!("Options:  {}", options);
    }

    for (key, value) in reader.read_settings().await.iter() {
        match describe(key) {
            Some(setting) => println!("{:>5} = {:<12} {}", key, value, setting.display_label()),
            None => println!("{:>5} = {}", key, value),
        }
    }
}

async fn set(link: &Link, assignments: &[String]) -> anyhow::Result<()> {
    let current = link.settings_reader().read_settings().await;
    if current.is_empty() {
        bail!("device returned no settings");
    }

    let mut edited = current.clone();
    for assignment in assignments {
        let (key, value) = assignment
            .split_once('=')
            .with_context(|| format!("expected $n=value, got {:?}", assignment))?;
        let (key, value) = (key.trim(), value.trim());
        if let Some(setting) = describe(key) {
            setting.validate(value).map_err(anyhow::Error::msg)?;
        } else if current.get(key).is_none() {
            bail!("unknown setting {}", key);
        }
        edited.set(key, value);
    }

    let job = current.change_job(&edited);
    if job.commands.is_empty() {
        println!("Nothing to change");
        return Ok(());
    }
    let outcome = link.streamer().start(job, None).wait().await;
    if let Some(error) = outcome.error {
        bail!("settings write failed after {} of {}: {}", outcome.sent, outcome.total, error);
    }
    if !outcome.rejected.is_empty() {
        bail!("device rejected: {}", outcome.rejected.join("; "));
    }
    println!("Updated {} setting(s)", outcome.sent);
    Ok(())
}

async fn stream(
    link: &Link,
    file: PathBuf,
    abort_commands: Vec<String>,
    abort_after_ms: Option<u64>,
) -> anyhow::Result<()> {
    let program = std::fs::read_to_string(&file)
        .with_context(|| format!("cannot read {}", file.display()))?;
    let job = BatchJob::from_program(&program).with_abort_commands(abort_commands);
    if job.commands.is_empty() {
        bail!("{} has no commands", file.display());
    }

    let progress: ProgressCallback = Box::new(|index, total| {
        tracing::info!("Sending {}/{}", index + 1, total);
    });
    let handle = link.streamer().start(job, Some(progress));

    let abort = handle.abort_token();
    let watcher = tokio::spawn(async move {
        let deadline = async {
            match abort_after_ms {
                Some(ms) => tokio::time::sleep(Duration::from_millis(ms)).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::warn!("Interrupted, aborting batch"),
            _ = deadline => tracing::warn!("Abort timer expired"),
            _ = abort.cancelled() => return,
        }
        abort.cancel();
    });

    let outcome = handle.wait().await;
    watcher.abort();

    let [x, y, z] = link.status().snapshot().readout();
    println!(
        "Sent {}/{} commands{}; position X{} Y{} Z{}",
        outcome.sent,
        outcome.total,
        if outcome.aborted { " (aborted)" } else { "" },
        x,
        y,
        z
    );
    for rejection in &outcome.rejected {
        eprintln!("rejected: {}", rejection);
    }
    if let Some(error) = outcome.error {
        bail!("batch failed: {}", error);
    }
    if !outcome.rejected.is_empty() {
        bail!("{} command(s) rejected by the device", outcome.rejected.len());
    }
    Ok(())
}

async fn jog(
    link: &Link,
    direction: JogDirection,
    speed: Option<u32>,
    hold_ms: u64,
    then: AfterJog,
) -> anyhow::Result<()> {
    let controller = link.jog_controller();
    let speed = speed.unwrap_or(link.config().jog.default_speed);

    let positions = link.bus().subscribe(
        EventFilter::Categories(vec![EventCategory::Machine]),
        |event| tracing::debug!("{}", event.description()),
    );
    let session = controller.press_direction(direction, speed).await?;
    println!("Jogging {}: {}", direction, session.command());
    tokio::time::sleep(Duration::from_millis(hold_ms)).await;
    let report = session.finish().await;
    link.bus().unsubscribe(positions);

    let [x, y, z] = link.status().snapshot().readout();
    println!("{} moves; position X{} Y{} Z{}", report.moves, x, y, z);
    if let Some(error) = report.error {
        bail!("jog failed: {}", error);
    }

    let outcome = match then {
        AfterJog::Keep => return Ok(()),
        AfterJog::SetOrigin => JogOutcome::SetOrigin,
        AfterJog::Cancel => JogOutcome::Cancel,
    };
    let response = controller.apply_outcome(outcome).await;
    if !response.acknowledged {
        bail!("origin command was not acknowledged");
    }
    Ok(())
}

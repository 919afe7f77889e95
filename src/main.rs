mod analysis;
mod audio;
mod channel;
mod chirp;
mod conf;
mod logging;
mod machine;
mod protocol;
mod server;
mod session;
mod transport;

use crate::analysis::{AnalysisSettings, SlopeRule, TimeAxis, render};
use crate::audio::CpalRecorder;
use crate::channel::SocketChannel;
use crate::chirp::Chirp;
use crate::conf::Settings;
use crate::machine::{MachineSettings, ProtocolStateMachine};
use crate::protocol::{ClientMessage, RecordUpdate, ServerMessage, State};
use crate::server::MailboxServer;
use crate::transport::AsyncTransport;
use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "chirp-auth")]
#[command(about = "Acoustic chirp proximity check for two-factor login")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the session record mailbox
    Mailbox {
        /// Unix socket path (default from config)
        #[arg(long)]
        socket_path: Option<String>,
    },

    /// Listen for challenges and answer them from the microphone
    Device {
        /// Mailbox socket path (default from config)
        #[arg(long)]
        socket_path: Option<String>,

        /// Input device name (default from config, then system default)
        #[arg(long)]
        audio_device: Option<String>,

        /// Capture sample rate in Hz
        #[arg(long)]
        sample_rate: Option<u32>,

        /// Keep each recording and its spectrogram
        #[arg(long)]
        debug: bool,
    },

    /// Run the chirp analysis on a WAV file and print the report as JSON
    Analyze {
        /// 16-bit stereo WAV file
        wav: PathBuf,

        /// Challenge slope in Hz/s
        #[arg(long)]
        slope: f64,

        /// Delay between recording start and playback start
        #[arg(long, default_value = "0")]
        latency_ms: i64,

        #[arg(long, value_enum)]
        time_axis: Option<TimeAxis>,

        #[arg(long, value_enum)]
        slope_rule: Option<SlopeRule>,

        /// Also write the spectrogram to this PNG file
        #[arg(long)]
        png: Option<PathBuf>,
    },

    /// Write a linear chirp to a WAV file
    Chirp {
        output: PathBuf,

        #[arg(long, default_value = "1000")]
        start_hz: f64,

        #[arg(long, default_value = "3000")]
        end_hz: f64,

        /// Length in seconds
        #[arg(long, default_value = "2.0")]
        duration: f64,

        #[arg(long, default_value = "44100")]
        sample_rate: u32,

        /// Peak amplitude, fraction of full scale
        #[arg(long, default_value = "0.8")]
        amplitude: f64,
    },

    /// Write a state flag (and optionally the challenge slope) to the mailbox
    Flag {
        #[arg(value_enum)]
        state: State,

        /// Challenge slope in Hz/s
        #[arg(long)]
        slope: Option<f64>,

        #[arg(long)]
        socket_path: Option<String>,
    },

    /// Print the current session record
    Status {
        #[arg(long)]
        socket_path: Option<String>,
    },

    /// List available audio recording devices
    Devices,
}

fn get_uid() -> String {
    std::env::var("UID").unwrap_or_else(|_| {
        // Fallback: use nix to get actual UID
        nix::unistd::getuid().to_string()
    })
}

fn expand_socket_path(path: &str) -> String {
    let expanded = path.replace("$UID", &get_uid());

    // Support $RUNTIME_DIRECTORY for systemd RuntimeDirectory=
    if let Ok(runtime_dir) = std::env::var("RUNTIME_DIRECTORY") {
        expanded.replace("$RUNTIME_DIRECTORY", &runtime_dir)
    } else {
        expanded
    }
}

fn resolve_socket_path(arg: Option<String>, settings: &Settings) -> String {
    expand_socket_path(arg.as_deref().unwrap_or(&settings.socket_path))
}

async fn run_mailbox(socket_path: String) -> Result<()> {
    tracing::info!(socket = %socket_path, "starting mailbox");
    let mut server = MailboxServer::new(&socket_path).context("Failed to create mailbox")?;
    server.run().await.context("Mailbox error")?;
    Ok(())
}

async fn run_device(
    settings: &Settings,
    socket_path: String,
    audio_device: Option<String>,
    sample_rate: Option<u32>,
    debug: bool,
) -> Result<()> {
    settings.flags.validate().map_err(|e| anyhow!(e))?;

    let recorder = CpalRecorder::new(
        audio_device.or_else(|| settings.audio_device.clone()),
        sample_rate.unwrap_or(settings.sample_rate),
    );
    let channel = SocketChannel::new(AsyncTransport::new(socket_path.clone()), settings.flags);
    let machine_settings = MachineSettings {
        recordings_dir: settings.recordings_dir(),
        artifacts_dir: (debug || settings.debug_artifacts).then(|| settings.artifacts_dir()),
        analysis: settings.analysis,
    };

    tracing::info!(
        socket = %socket_path,
        recordings = %machine_settings.recordings_dir.display(),
        debug_artifacts = machine_settings.artifacts_dir.is_some(),
        "starting device"
    );

    let mut machine = ProtocolStateMachine::new(recorder, channel, machine_settings);
    machine
        .run()
        .await
        .context("Failed to subscribe to the mailbox")?;
    Ok(())
}

fn run_analyze(
    settings: &Settings,
    wav: PathBuf,
    slope: f64,
    latency_ms: i64,
    time_axis: Option<TimeAxis>,
    slope_rule: Option<SlopeRule>,
    png: Option<PathBuf>,
) -> Result<()> {
    let bytes =
        std::fs::read(&wav).with_context(|| format!("Failed to read {}", wav.display()))?;
    let analysis_settings = AnalysisSettings {
        time_axis: time_axis.unwrap_or(settings.analysis.time_axis),
        slope_rule: slope_rule.unwrap_or(settings.analysis.slope_rule),
    };

    let analysis = analysis::analyze(&bytes, latency_ms, slope, &analysis_settings)
        .with_context(|| format!("Analysis of {} failed", wav.display()))?;

    if let Some(png) = png {
        render::save_png(&analysis.spectrogram, &png)
            .with_context(|| format!("Failed to write {}", png.display()))?;
        eprintln!("Spectrogram written to {}", png.display());
    }

    println!("{}", serde_json::to_string_pretty(&analysis.report)?);
    Ok(())
}

fn run_chirp(output: PathBuf, sweep: Chirp) -> Result<()> {
    if sweep.duration_secs <= 0.0 {
        bail!("Duration must be positive");
    }
    chirp::write_wav(&output, &sweep.synthesize(), sweep.sample_rate)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!(
        "Wrote {} ({} Hz -> {} Hz over {} s, slope {} Hz/s)",
        output.display(),
        sweep.start_hz,
        sweep.end_hz,
        sweep.duration_secs,
        sweep.slope()
    );
    Ok(())
}

async fn run_flag(
    settings: &Settings,
    socket_path: String,
    state: State,
    slope: Option<f64>,
) -> Result<()> {
    let update = RecordUpdate {
        flag: Some(settings.flags.code(state)),
        slope,
        ..Default::default()
    };
    let transport = AsyncTransport::new(socket_path);
    match transport
        .send_request(&ClientMessage::new_update(update))
        .await
        .context("Failed to write flag")?
    {
        ServerMessage::Updated { .. } => {
            println!("{} ({})", state, settings.flags.code(state));
            Ok(())
        }
        ServerMessage::Error { error, .. } => bail!("Error from mailbox: {}", error),
        other => bail!("Unexpected response: {:?}", other),
    }
}

async fn run_status(settings: &Settings, socket_path: String) -> Result<()> {
    let transport = AsyncTransport::new(socket_path);
    match transport
        .send_request(&ClientMessage::new_get())
        .await
        .context("Failed to read the session record")?
    {
        ServerMessage::Record { record, .. } => {
            let state = settings.flags.state(record.flag);
            let status = serde_json::json!({
                "state": state.map(|s| s.as_str()),
                "terminal": state.is_some_and(|s| s.is_terminal()),
                "record": record,
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
        ServerMessage::Error { error, .. } => bail!("Error from mailbox: {}", error),
        other => bail!("Unexpected response: {:?}", other),
    }
}

fn run_devices() -> Result<()> {
    let devices = audio::list_devices().context("Failed to list audio devices")?;

    println!("Available Audio Devices:");
    println!(
        "{:<30} {:<10} {:<20} Formats",
        "Name", "Default", "Sample Rates"
    );
    println!("{}", "-".repeat(80));

    for device in devices {
        let default_str = if device.is_default { "YES" } else { "NO" };
        let sample_rates = device
            .supported_sample_rates
            .iter()
            .take(3)
            .map(|sr| sr.to_string())
            .collect::<Vec<_>>()
            .join(", ");

        let formats = device
            .supported_formats
            .iter()
            .take(2)
            .map(|f| format!("{:?}", f))
            .collect::<Vec<_>>()
            .join(", ");

        let name: String = device.name.chars().take(30).collect();
        println!(
            "{:<30} {:<10} {:<20} {}",
            name, default_str, sample_rates, formats
        );
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let settings = Settings::load();

    match cli.command {
        Commands::Mailbox { socket_path } => {
            run_mailbox(resolve_socket_path(socket_path, &settings)).await
        }
        Commands::Device {
            socket_path,
            audio_device,
            sample_rate,
            debug,
        } => {
            let socket_path = resolve_socket_path(socket_path, &settings);
            run_device(&settings, socket_path, audio_device, sample_rate, debug).await
        }
        Commands::Analyze {
            wav,
            slope,
            latency_ms,
            time_axis,
            slope_rule,
            png,
        } => run_analyze(&settings, wav, slope, latency_ms, time_axis, slope_rule, png),
        Commands::Chirp {
            output,
            start_hz,
            end_hz,
            duration,
            sample_rate,
            amplitude,
        } => run_chirp(
            output,
            Chirp {
                start_hz,
                end_hz,
                duration_secs: duration,
                sample_rate,
                amplitude,
            },
        ),
        Commands::Flag {
            state,
            slope,
            socket_path,
        } => {
            let socket_path = resolve_socket_path(socket_path, &settings);
            run_flag(&settings, socket_path, state, slope).await
        }
        Commands::Status { socket_path } => {
            run_status(&settings, resolve_socket_path(socket_path, &settings)).await
        }
        Commands::Devices => run_devices(),
    }
}

#[tokio::main]
async fn main() {
    logging::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

//! Thin demonstration/operations binary wiring a [`mgurdy_core::control::Core`]
//! to real or synthetic sensors and a MIDI output. There is no admin HTTP
//! surface here -- it calls into the `Core` API directly rather than over a
//! network.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use mgurdy_core::config::CoreConfig;
use mgurdy_core::control::Core;
use mgurdy_core::outputs::inprocess::InProcessOutput;
use mgurdy_core::sensors::platform::EvdevSensorSource;
use mgurdy_core::sensors::{ChannelSensorSource, NullSensorSource, RawSensorEvent, SensorSource};
use mgurdy_core::telemetry::NullTelemetrySink;
use mgurdy_protocol::string::{StringId, StringParam};

#[derive(Parser, Debug)]
#[command(name = "mgurdy-cli", about = "mgurdy-core demonstration/operations CLI")]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the instrument against real sensor devices (or headless, if none
    /// are configured) until interrupted.
    Run {
        /// Path to a CoreConfig TOML file.
        #[arg(short, long, default_value = "mgurdy.toml")]
        config: PathBuf,
        /// Raw MIDI device node to write output to. If omitted, output is
        /// only logged in-process.
        #[arg(long)]
        midi_device: Option<String>,
    },
    /// Run a short synthetic sensor sequence through the instrument model
    /// and print every message an in-process output would have received.
    Demo,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let args = Args::parse();
    match args.command {
        Commands::Run { config, midi_device } => run(config, midi_device),
        Commands::Demo => demo(),
    }
}

fn run(config_path: PathBuf, midi_device: Option<String>) -> anyhow::Result<()> {
    let config = if config_path.exists() {
        CoreConfig::load(&config_path)?
    } else {
        tracing::warn!(path = %config_path.display(), "no config file found, using defaults");
        CoreConfig::default()
    };

    let sensors: Box<dyn SensorSource> = if config.sensors.key_device.is_empty() || config.sensors.wheel_device.is_empty() {
        tracing::info!("no sensor devices configured, running headless");
        Box::new(NullSensorSource)
    } else {
        Box::new(EvdevSensorSource::open(&config.sensors.key_device, &config.sensors.wheel_device)?)
    };

    let core = Arc::new(Core::new(sensors, Box::new(NullTelemetrySink)));

    if let Some(device) = midi_device {
        core.add_midi_output(&device)?;
        tracing::info!(%device, "registered MIDI output");
    } else {
        let (output, _log) = InProcessOutput::new();
        core.add_fluid_output(Box::new(output))?;
        tracing::info!("no MIDI device given, registered in-process output only");
    }

    apply_default_strings(&core);

    core.spawn_worker();
    core.start();
    tracing::info!("instrument started, press Ctrl+C to stop");

    let (tx, rx) = std::sync::mpsc::channel();
    ctrlc_fallback(tx);
    rx.recv().ok();

    core.stop();
    core.stop_worker();
    Ok(())
}

/// Unmute the first melody, drone, and trompette string so `run` produces
/// audible output out of the box.
fn apply_default_strings(core: &Core) {
    let _ = core.set_string(StringId::Melody(0), StringParam::Mute(false));
    let _ = core.set_string(StringId::Drone(0), StringParam::Mute(false));
    let _ = core.set_string(StringId::Trompette(0), StringParam::Mute(false));
}

/// Blocks a background thread on SIGINT via raw `libc::sigwait`, then
/// signals `tx`. Non-Linux targets never signal; the process must be killed
/// externally instead.
#[cfg(target_os = "linux")]
fn ctrlc_fallback(tx: std::sync::mpsc::Sender<()>) {
    std::thread::spawn(move || {
        unsafe {
            let mut set: libc::sigset_t = std::mem::zeroed();
            libc::sigemptyset(&mut set);
            libc::sigaddset(&mut set, libc::SIGINT);
            libc::sigprocmask(libc::SIG_BLOCK, &set, std::ptr::null_mut());
            let mut sig: i32 = 0;
            libc::sigwait(&set, &mut sig);
        }
        let _ = tx.send(());
    });
}

#[cfg(not(target_os = "linux"))]
fn ctrlc_fallback(_tx: std::sync::mpsc::Sender<()>) {}

/// Drive a handful of synthetic wheel and key events through the model and
/// print what a synth would have received, without any real hardware or
/// realtime thread.
fn demo() -> anyhow::Result<()> {
    let (tx, rx) = std::sync::mpsc::channel();
    let core = Core::new(Box::new(ChannelSensorSource::new(rx)), Box::new(NullTelemetrySink));
    let (output, log) = InProcessOutput::new();
    core.add_fluid_output(Box::new(output))?;
    apply_default_strings(&core);
    core.start();

    tx.send(RawSensorEvent::WheelDistance(100)).ok();
    tx.send(RawSensorEvent::WheelElapsedUs(1100)).ok();
    tx.send(RawSensorEvent::WheelSync).ok();
    for _ in 0..5 {
        core.tick();
    }

    tx.send(RawSensorEvent::KeyPressure { index: 4, value: 2000 }).ok();
    for _ in 0..5 {
        core.tick();
    }

    for msg in log.drain() {
        println!("{msg:?}");
    }

    Ok(())
}

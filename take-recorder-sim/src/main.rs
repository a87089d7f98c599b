use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use take_recorder_core::models::channel::ChannelMask;
use take_recorder_core::models::config::SessionSettings;
use take_recorder_core::session::recording_session::RecordingSession;
use take_recorder_core::traits::audio_source::AudioSource;
use take_recorder_sim::runner::{self, LevelMeter};
use take_recorder_sim::{DirectoryStore, SimError, SyntheticSource, WavReplaySource};

#[derive(Parser)]
#[command(name = "take-recorder-sim")]
#[command(about = "Record a multitrack take from a simulated input device")]
struct Args {
    /// Session config (JSON); defaults to every input of the device in pairs
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Replay this multichannel WAV file instead of generating tones
    #[arg(short, long)]
    replay: Option<PathBuf>,

    /// Inputs of the synthetic interface
    #[arg(long, default_value = "8")]
    channels: u8,

    /// Tone of the synthetic interface's first input in Hz; input n plays n times this
    #[arg(long, default_value = "110")]
    tone: f32,

    /// Tone amplitude, 0 to 1
    #[arg(long, default_value = "0.5")]
    amplitude: f32,

    /// Seconds to record
    #[arg(short, long, default_value = "5")]
    duration: f64,

    /// Where retained takes are stored
    #[arg(short, long, default_value = "takes")]
    output_dir: PathBuf,

    /// Scratch directory for takes being recorded
    #[arg(long)]
    take_dir: Option<PathBuf>,

    /// Discard the take instead of retaining it
    #[arg(long)]
    discard: bool,

    /// List the simulated devices and exit
    #[arg(long)]
    list_devices: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let result = match &args.replay {
        Some(path) => WavReplaySource::open_file(path, "replay")
            .map_err(SimError::from)
            .and_then(|source| run(source, &args)),
        None => SyntheticSource::interface("sim", args.channels)
            .map_err(SimError::from)
            .and_then(|source| run(source.with_tone(args.tone, args.amplitude), &args)),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run<A: AudioSource>(source: A, args: &Args) -> Result<(), SimError> {
    if args.list_devices {
        for device in source.devices() {
            let masks: Vec<String> = ChannelMask::unique_masks_for(&device)
                .iter()
                .map(ToString::to_string)
                .collect();
            println!("{} ({}): {}", device.identity, device.name, masks.join("; "));
            println!("  rates: {:?}, encodings: {:?}", device.sample_rates, device.encodings);
        }
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => runner::load_config(path)?,
        None => {
            let device = source.devices().into_iter().next().ok_or(SimError::NoDevice)?;
            runner::default_config(&device).ok_or(SimError::NoDevice)?
        }
    };

    let store = Arc::new(DirectoryStore::new(&args.output_dir)?);
    store.clean_pending()?;
    let mut settings = SessionSettings::default();
    if let Some(dir) = &args.take_dir {
        settings.take_directory = dir.clone();
    }

    let mut session = RecordingSession::new(source, Arc::clone(&store), settings)?;
    session.subscribe(Arc::new(LevelMeter::new(Duration::from_millis(500))))?;

    let duration = Duration::from_secs_f64(args.duration.max(0.0));
    let id = runner::record_take(&mut session, config, duration, !args.discard)?;
    if args.discard {
        println!("take {} discarded", id);
    } else {
        println!("take {} stored in {}", id, store.root().display());
    }
    session.shutdown();
    Ok(())
}

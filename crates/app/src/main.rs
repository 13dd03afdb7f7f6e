use std::{path::PathBuf, time::Duration};

use beatsync_core::{
    AppConfig, AudioEngine, Chart, ClockSource, Engine, InputType, ScoreSnapshot, SideMode,
    SimulatedTimingProvider, TimingProvider,
};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Seconds of tail after the last event when no duration is given.
const CHART_TAIL: f64 = 1.0;

fn main() -> beatsync_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Play {
            chart,
            config,
            seconds,
            offset_ms,
            autoplay,
        } => run_play(&chart, config.as_ref(), seconds, offset_ms, autoplay),
        Commands::Dunk { seconds, offset_ms } => run_dunk(seconds, offset_ms),
        Commands::Export { output } => run_export(&output),
    }
}

fn run_play(
    chart_path: &PathBuf,
    config_path: Option<&PathBuf>,
    seconds: Option<f64>,
    offset_ms: f64,
    autoplay: bool,
) -> beatsync_core::Result<()> {
    let config = match config_path {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::live_defaults(),
    };
    let chart = Chart::load(chart_path)?;
    tracing::info!(chart = ?chart_path, clock = ?config.engine.clock, autoplay, "starting play");

    // Keeps the callback thread alive for the whole session.
    let mut audio = None;
    let timing: Box<dyn TimingProvider> = match config.engine.clock {
        ClockSource::Simulated => Box::new(SimulatedTimingProvider::new()),
        ClockSource::Audio => {
            let mut engine = AudioEngine::new(config.audio.clone());
            engine.start()?;
            let provider = engine.timing_provider();
            audio = Some(engine);
            Box::new(provider)
        }
    };

    let mut engine = Engine::with_config(timing, &config.engine);
    engine.load_chart(&chart)?;

    let duration = match seconds {
        Some(seconds) => seconds,
        None => chart_length(&chart)? + CHART_TAIL,
    };
    let offset = if autoplay { Some(offset_ms / 1000.0) } else { None };
    let pace = audio.is_some();
    drive(&mut engine, duration, config.engine.tick_delta(), offset, pace)?;

    if let Some(mut audio) = audio {
        audio.stop()?;
    }
    report(&engine.final_score());
    Ok(())
}

fn run_dunk(seconds: f64, offset_ms: f64) -> beatsync_core::Result<()> {
    let config = AppConfig::live_defaults();
    let mut engine = SideMode::Dunk.prepare(
        Box::new(SimulatedTimingProvider::new()),
        &config.engine,
    )?;
    drive(
        &mut engine,
        seconds,
        config.engine.tick_delta(),
        Some(offset_ms / 1000.0),
        false,
    )?;
    report(&engine.final_score());
    Ok(())
}

fn run_export(output: &PathBuf) -> beatsync_core::Result<()> {
    let chart = Chart::test_patterns()?;
    chart.save(output)?;
    tracing::info!(?output, events = chart.events().len(), "test pattern chart written");
    Ok(())
}

/// Ticks the session until `duration` seconds have played, the player fails
/// or the session stops. With `pace` set the loop sleeps between ticks so an
/// audio clock has time to move.
fn drive(
    engine: &mut Engine,
    duration: f64,
    delta: f64,
    autoplay_offset: Option<f64>,
    pace: bool,
) -> beatsync_core::Result<()> {
    while !engine.is_stopped() && engine.seconds() < duration {
        let report = engine.tick(delta)?;
        if let Some(offset) = autoplay_offset {
            press_due(engine, offset)?;
        }
        for cue in engine.world_mut().drain_cues() {
            tracing::debug!(beat = cue.beat, lane = ?cue.lane, score = ?cue.score, "cue");
        }
        if report.failed {
            tracing::info!(beat = report.beat, "player failed");
            break;
        }
        if pace {
            std::thread::sleep(Duration::from_secs_f64(delta));
        }
    }
    engine.stop();
    Ok(())
}

/// Presses every pending expectation whose target, shifted by `offset`, has
/// been reached.
fn press_due(engine: &mut Engine, offset: f64) -> beatsync_core::Result<()> {
    let now = engine.seconds();
    let due: Vec<(InputType, f64)> = engine
        .inputter()
        .pending()
        .iter()
        .map(|e| (e.lane, engine.tempos().beat_to_seconds(e.target_beat) + offset))
        .filter(|&(_, at)| at <= now)
        .collect();
    for (lane, at) in due {
        engine.on_input(lane, at)?;
    }
    Ok(())
}

fn chart_length(chart: &Chart) -> beatsync_core::Result<f64> {
    let last_beat = chart
        .events()
        .iter()
        .map(|event| event.end_beat())
        .fold(0.0, f64::max);
    Ok(chart.tempo_map()?.beat_to_seconds(last_beat))
}

fn report(score: &ScoreSnapshot) {
    tracing::info!(
        score = score.score_int,
        hit = score.inputs_hit,
        inputs = score.n_inputs,
        max_combo = score.max_combo,
        "session finished"
    );
    println!(
        "score {} ({:?}) - {}/{} hit, max combo {}{}{}",
        score.score_int,
        score.ranking,
        score.inputs_hit,
        score.n_inputs,
        score.max_combo,
        if score.no_miss { ", no miss" } else { "" },
        if score.skill_star { ", skill star" } else { "" },
    );
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless rhythm game sessions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Play a chart file.
    Play {
        /// Chart document to load.
        chart: PathBuf,
        /// Optional JSON config file.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Stop after this many seconds. Defaults to the chart length.
        #[arg(short, long)]
        seconds: Option<f64>,
        /// Offset applied to autoplay presses, in milliseconds.
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        offset_ms: f64,
        /// Press every expected input automatically.
        #[arg(long)]
        autoplay: bool,
    },
    /// Run the endless dunk mode with an autoplaying player.
    Dunk {
        #[arg(short, long, default_value_t = 60.0)]
        seconds: f64,
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        offset_ms: f64,
    },
    /// Write the built-in input test pattern chart.
    Export {
        /// Output path for the chart document.
        output: PathBuf,
    },
}

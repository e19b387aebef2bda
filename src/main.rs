//! flux: a thin CLI binary that wires the audio graph, transport, and
//! engine together and exposes the external interface of spec §6. It owns
//! nothing a GUI would own — it starts the device, prints status lines, and
//! reacts to the environment knobs already named there.

use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use flux_core::config::FluxConfig;
use flux_core::limits::TRACK_MAX;
use flux_engine::{Engine, EngineConfig, TrackPlugin};
use flux_graph::NodeSpec;
use flux_state::{StateSnapshot, TransportSnapshot};
use flux_transport::Transport;

fn main() {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    if let Err(err) = run() {
        tracing::error!(%err, "flux exited with a fatal error");
        std::process::exit(1);
    }
}

fn run() -> flux_core::Result<()> {
    flux_plugin::thread_ident::record_main_thread();

    let flux_config = FluxConfig::from_env();
    flux_config.validate()?;

    // spec §6: one optional positional argument, a single CLAP bundle path
    // loaded onto track 0.
    let plugin_path = env::args().nth(1).map(PathBuf::from);

    let engine_config = EngineConfig {
        parallel_threshold: flux_config.parallel_threshold,
        min_sleep_ns: flux_config.worker_min_sleep_ns,
        max_sleep_ns: flux_config.worker_max_sleep_ns,
        ..EngineConfig::default()
    };

    // One track: note source -> synth -> gain -> mixer -> master.
    let specs = vec![
        NodeSpec::note_source(0),
        NodeSpec::synth(0, 0),
        NodeSpec::gain(0, 1),
        NodeSpec::mixer(vec![2]),
        NodeSpec::master(vec![3]),
    ];

    let track_plugins = match plugin_path {
        Some(path) => vec![TrackPlugin { track: 0, path }],
        None => Vec::new(),
    };

    let mut engine = Engine::start(engine_config, specs, track_plugins)?;

    tracing::info!(
        device = %engine.device_name().unwrap_or_else(|_| "unknown".into()),
        sample_rate = engine.sample_rate(),
        "flux engine started"
    );

    let shutdown_requested = Arc::new(AtomicBool::new(false));
    {
        let shutdown_requested = Arc::clone(&shutdown_requested);
        ctrlc::set_handler(move || shutdown_requested.store(true, Ordering::SeqCst))
            .map_err(|e| flux_core::Error::InvalidConfig(format!("failed to install Ctrl-C handler: {e}")))?;
    }

    let mut transport = Transport::new(flux_config.tempo_bpm);
    {
        let mut snapshot = build_snapshot(&transport);
        engine.apply_track_plugins(&mut snapshot);
        engine.shared().write_snapshot(snapshot);
    }

    let tick_interval = Duration::from_millis(10);
    let mut last_status = Instant::now();

    while !shutdown_requested.load(Ordering::SeqCst) {
        std::thread::sleep(tick_interval);
        transport.tick(tick_interval.as_secs_f64());
        let mut snapshot = build_snapshot(&transport);
        engine.apply_track_plugins(&mut snapshot);
        engine.shared().write_snapshot(snapshot);

        if last_status.elapsed() >= Duration::from_secs(1) {
            last_status = Instant::now();
            let load = engine.load();
            println!(
                "device={} sample_rate={:.0}Hz usage={:.1}% underruns={}",
                engine.device_name().unwrap_or_else(|_| "unknown".into()),
                engine.sample_rate(),
                load.usage() * 100.0,
                load.underruns(),
            );
        }
    }

    tracing::info!("shutdown requested, stopping engine");
    engine.shutdown();
    Ok(())
}

/// Copy the transport's clip-launcher matrix and playhead into the shape
/// the audio thread reads (spec §4.B/§4.F).
fn build_snapshot(transport: &Transport) -> StateSnapshot {
    let mut snapshot = StateSnapshot::default();
    snapshot.clip_slots = transport.clip_slots;
    snapshot.clips = transport.clips.clone();

    let recording = (0..TRACK_MAX).any(|t| transport.recording_scene(t).is_some());
    let seconds_per_beat = if transport.tempo_bpm > 0.0 { 60.0 / transport.tempo_bpm } else { 0.0 };
    snapshot.transport = TransportSnapshot {
        playing: transport.playing,
        recording,
        tempo_bpm: transport.tempo_bpm,
        position_beats: transport.playhead_beat,
        position_seconds: transport.playhead_beat * seconds_per_beat,
        bar_start_beats: (transport.playhead_beat / 4.0).floor() * 4.0,
        bar_number: (transport.playhead_beat / 4.0).floor() as i32,
    };
    snapshot
}

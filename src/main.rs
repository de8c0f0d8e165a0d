use std::{
    env, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow, bail};
use gesture_mixer::{
    audio::RecordingEngine,
    config::{SessionConfig, VariantConfig, VariantKind},
    pipeline::{self, FrameSource, HandDetector, replay::ReplayFeed, subprocess::SubprocessDetector},
    session::SessionController,
    types::TrackName,
};

const USAGE: &str = "usage: gesture-mixer [--variant mixer|turntable|rotation|velocity] [--config variant.json]
                     [--dump-config] [--track name=path]...
                     (--replay detections.jsonl [--realtime] | --camera N --detector-cmd prog [args...])
                     [--overlay-dir dir]";

#[derive(Debug, Default)]
struct Options {
    variant: Option<VariantKind>,
    config: Option<PathBuf>,
    dump_config: bool,
    tracks: Vec<(TrackName, PathBuf)>,
    replay: Option<PathBuf>,
    realtime: bool,
    camera: Option<u32>,
    detector_cmd: Vec<String>,
    overlay_dir: Option<PathBuf>,
}

fn parse_args() -> Result<Options> {
    let mut opts = Options::default();
    let mut args = env::args().skip(1);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--variant" => opts.variant = Some(next_value(&mut args, "--variant")?.parse()?),
            "--config" => opts.config = Some(PathBuf::from(next_value(&mut args, "--config")?)),
            "--dump-config" => opts.dump_config = true,
            "--track" => opts.tracks.push(parse_track(&next_value(&mut args, "--track")?)?),
            "--replay" => opts.replay = Some(PathBuf::from(next_value(&mut args, "--replay")?)),
            "--realtime" => opts.realtime = true,
            "--camera" => {
                let index = next_value(&mut args, "--camera")?;
                opts.camera = Some(
                    index
                        .parse()
                        .with_context(|| format!("invalid camera index {index:?}"))?,
                );
            }
            "--detector-cmd" => {
                // Everything after the program name belongs to the detector.
                opts.detector_cmd = args.by_ref().collect();
                if opts.detector_cmd.is_empty() {
                    bail!("--detector-cmd needs a program\n{USAGE}");
                }
            }
            "--overlay-dir" => opts.overlay_dir = Some(PathBuf::from(next_value(&mut args, "--overlay-dir")?)),
            "-h" | "--help" => {
                println!("{USAGE}");
                std::process::exit(0);
            }
            other => bail!("unknown argument {other:?}\n{USAGE}"),
        }
    }

    Ok(opts)
}

fn next_value(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<String> {
    args.next()
        .ok_or_else(|| anyhow!("{flag} needs a value\n{USAGE}"))
}

fn parse_track(arg: &str) -> Result<(TrackName, PathBuf)> {
    let (name, path) = arg
        .split_once('=')
        .ok_or_else(|| anyhow!("expected name=path, got {arg:?}"))?;
    let track = TrackName::parse(name).ok_or_else(|| {
        anyhow!("unknown track {name:?} (expected drum, bass, melody, pad or perc)")
    })?;
    let path = PathBuf::from(path);
    if !path.is_file() {
        bail!("track file {} does not exist", path.display());
    }
    Ok((track, path))
}

fn load_variant(opts: &Options) -> Result<VariantConfig> {
    match (&opts.config, opts.variant) {
        (Some(path), _) => VariantConfig::from_json_path(path),
        (None, kind) => Ok(VariantConfig::preset(kind.unwrap_or(VariantKind::Mixer))),
    }
}

type Input = (Box<dyn FrameSource>, Box<dyn HandDetector>);

fn open_input(opts: &Options, config: &SessionConfig) -> Result<Input> {
    if let Some(path) = &opts.replay {
        let feed = ReplayFeed::from_path(path)?.realtime(opts.realtime);
        log::info!("loaded {} recorded frames from {}", feed.len(), path.display());
        let detector = feed.detector();
        return Ok((Box::new(feed), Box::new(detector)));
    }

    let Some(index) = opts.camera else {
        bail!("nothing to read frames from; pass --replay or --camera\n{USAGE}");
    };
    let Some((program, args)) = opts.detector_cmd.split_first() else {
        bail!("live capture needs --detector-cmd\n{USAGE}");
    };
    let detector = SubprocessDetector::spawn(program, args, &config.detector)?;
    Ok((open_camera(index)?, Box::new(detector)))
}

#[cfg(feature = "camera-nokhwa")]
fn open_camera(index: u32) -> Result<Box<dyn FrameSource>> {
    use gesture_mixer::pipeline::camera::{NokhwaCamera, available_cameras};

    match available_cameras() {
        Ok(cameras) => {
            for camera in cameras {
                log::info!("found camera {}: {}", camera.index, camera.label);
            }
        }
        Err(err) => log::warn!("failed to list cameras: {err:?}"),
    }
    Ok(Box::new(NokhwaCamera::new(index)))
}

#[cfg(not(feature = "camera-nokhwa"))]
fn open_camera(_index: u32) -> Result<Box<dyn FrameSource>> {
    bail!("built without live capture; rebuild with --features camera-nokhwa")
}

fn save_overlay(dir: &Path, sequence: u64, canvas: &image::RgbaImage) -> Result<()> {
    let path = dir.join(format!("frame_{sequence:06}.png"));
    canvas
        .save(&path)
        .with_context(|| format!("failed to write {}", path.display()))
}

fn main() -> Result<()> {
    env_logger::init();

    let opts = parse_args()?;
    let variant = load_variant(&opts)?;

    if opts.dump_config {
        println!("{}", serde_json::to_string_pretty(&variant)?);
        return Ok(());
    }

    let config = SessionConfig::new(variant);
    let (mut source, mut detector) = open_input(&opts, &config)?;

    if let Some(dir) = &opts.overlay_dir {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create overlay dir {}", dir.display()))?;
    }

    let mut session = SessionController::new(RecordingEngine::new(), config);
    for (track, path) in &opts.tracks {
        session.load_track(*track, path);
    }
    if !session.can_start() {
        bail!("load at least one track with --track name=path\n{USAGE}");
    }

    session.start(source.as_mut())?;
    println!("🎛️  {} session running", session.variant().kind.as_str());

    let mut last_status = String::new();
    let summary = pipeline::run(&mut session, detector.as_mut(), |frame, canvas, report| {
        let status = report
            .events
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" | ");
        if !status.is_empty() && status != last_status {
            println!("[{:>5}] {status}", frame.sequence);
            last_status = status;
        }
        match &opts.overlay_dir {
            Some(dir) => save_overlay(dir, frame.sequence, canvas),
            None => Ok(()),
        }
    })?;

    if let Some(graph) = session.graph() {
        for track in TrackName::ALL {
            if let Some(level_db) = graph.level_db(track) {
                println!("  {} {:<6} {:>6.1} dB", track.emoji(), track, level_db);
            }
        }
        if let Some(cutoff_hz) = graph.cutoff_hz() {
            println!("  🎹 filter {cutoff_hz:.0} Hz");
        }
    }

    let commands = session.engine().commands().len();
    session.stop();
    println!(
        "✅ {} frames, {} detector errors, {} audio commands",
        summary.frames, summary.detector_errors, commands
    );
    Ok(())
}

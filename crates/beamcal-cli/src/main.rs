use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use beamcal_core::CalibError;
use beamcal_pipeline::{
    laser_rig, marker_map, CalibrationSession, DirectoryImageSource, LaserRigProblem,
    LogProgress, MarkerMapProblem, ProblemType,
};
use clap::{Args, Parser, Subcommand};
use env_logger::Env;
use log::info;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Calibration runner for camera and laser-projector rigs.
#[derive(Debug, Parser)]
#[command(author, version, about = "Laser-projector rig calibration")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Locate lasers from beam captures.
    LaserRig {
        #[command(flatten)]
        files: RunFiles,
        /// Directory the capture image names are relative to.
        #[arg(long)]
        images: PathBuf,
    },
    /// Register cameras and markers from marker observations.
    MarkerMap {
        #[command(flatten)]
        files: RunFiles,
    },
}

#[derive(Debug, Args)]
struct RunFiles {
    /// JSON input for the chosen pipeline.
    #[arg(long)]
    input: PathBuf,
    /// Optional JSON config. Defaults are used if omitted.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Write the export here instead of stdout.
    #[arg(long)]
    output: Option<PathBuf>,
    /// Also save the whole session (input, state, log) as JSON.
    #[arg(long)]
    session: Option<PathBuf>,
}

fn load_json_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

fn open_session<P: ProblemType>(files: &RunFiles) -> Result<CalibrationSession<P>> {
    let mut session = CalibrationSession::<P>::with_input(load_json_file(&files.input)?)?;
    if let Some(path) = &files.config {
        session.set_config(load_json_file(path)?)?;
    }
    Ok(session)
}

/// Save the session when asked, even after a failed run.
fn finish<P: ProblemType>(
    session: &CalibrationSession<P>,
    files: &RunFiles,
    run: Result<()>,
) -> Result<String>
where
    P::Export: Serialize,
{
    if let Some(path) = &files.session {
        fs::write(path, session.to_json()?)
            .with_context(|| format!("writing {}", path.display()))?;
        info!("session saved to {}", path.display());
    }
    run?;
    Ok(serde_json::to_string_pretty(&session.export()?)?)
}

fn run_laser_rig(files: &RunFiles, images: &Path) -> Result<String> {
    let mut session = open_session::<LaserRigProblem>(files)?;
    let source = DirectoryImageSource::new(images);
    let run = laser_rig::run_calibration(&mut session, &source, &mut LogProgress);
    finish(&session, files, run)
}

fn run_marker_map(files: &RunFiles) -> Result<String> {
    let mut session = open_session::<MarkerMapProblem>(files)?;
    let run = marker_map::run_calibration(&mut session, &mut LogProgress);
    finish(&session, files, run)
}

fn try_main(cli: Cli) -> Result<()> {
    let (json, files) = match &cli.command {
        Command::LaserRig { files, images } => (run_laser_rig(files, images)?, files),
        Command::MarkerMap { files } => (run_marker_map(files)?, files),
    };
    match &files.output {
        Some(path) => {
            fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
            info!("export written to {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

/// Exit code 2 for rejected input, 1 for everything else.
fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<CalibError>() {
        Some(CalibError::InvalidInput(_)) => 2,
        _ => 1,
    }
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    if let Err(err) = try_main(Cli::parse()) {
        eprintln!("error: {err:#}");
        std::process::exit(exit_code(&err));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beamcal_core::synthetic::MarkerScene;
    use beamcal_pipeline::{MarkerMapConfig, MarkerMapInput, MarkerMapOutput, RigCamera, RigMarker};
    use tempfile::tempdir;

    fn write_json<T: Serialize>(value: &T, path: &Path) {
        serde_json::to_writer_pretty(fs::File::create(path).unwrap(), value).unwrap();
    }

    fn marker_input() -> MarkerMapInput {
        let scene = MarkerScene::new(6, 4, 5);
        let anchor = scene.observations()[0].object_index;
        MarkerMapInput {
            cameras: scene
                .cameras
                .iter()
                .map(|c| RigCamera {
                    intrinsics: c.intrinsics.clone(),
                    view_guess: Some(c.view.clone()),
                })
                .collect(),
            markers: scene
                .markers
                .iter()
                .enumerate()
                .map(|(m, pose)| RigMarker {
                    local_points: scene.local_points.clone(),
                    pose: (m == anchor).then(|| pose.clone()),
                })
                .collect(),
            observations: scene.observations(),
        }
    }

    fn files(dir: &Path) -> RunFiles {
        RunFiles {
            input: dir.join("input.json"),
            config: None,
            output: None,
            session: Some(dir.join("session.json")),
        }
    }

    #[test]
    fn marker_map_runs_from_files() {
        let dir = tempdir().unwrap();
        let files = files(dir.path());
        write_json(&marker_input(), &files.input);

        let json = run_marker_map(&files).unwrap();
        let export: MarkerMapOutput = serde_json::from_str(&json).unwrap();
        assert!(export.report.converged);

        let saved = fs::read_to_string(dir.path().join("session.json")).unwrap();
        let session = CalibrationSession::<MarkerMapProblem>::from_json(&saved).unwrap();
        assert_eq!(session.log.len(), marker_map::STAGES.len());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let dir = tempdir().unwrap();
        let mut files = files(dir.path());
        write_json(&marker_input(), &files.input);
        let config = MarkerMapConfig {
            outlier_threshold: Some(-1.0),
            ..Default::default()
        };
        let path = dir.path().join("config.json");
        write_json(&config, &path);
        files.config = Some(path);
        assert!(run_marker_map(&files).is_err());
    }

    #[test]
    fn empty_rig_is_rejected_before_any_stage() {
        let dir = tempdir().unwrap();
        let files = files(dir.path());
        let input = serde_json::json!({
            "cameras": [{ "intrinsics": beamcal_core::synthetic::default_intrinsics() }],
            "lasers": [],
            "captures": [],
        });
        write_json(&input, &files.input);
        // No lasers and no captures: rejected before any stage runs.
        let err = run_laser_rig(&files, dir.path()).unwrap_err();
        assert_eq!(exit_code(&err), 2);
        assert!(!files.session.as_ref().unwrap().exists());
    }

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::try_parse_from([
            "beamcal-cli",
            "laser-rig",
            "--input",
            "rig.json",
            "--images",
            "captures",
            "--output",
            "out.json",
        ])
        .unwrap();
        match cli.command {
            Command::LaserRig { files, images } => {
                assert_eq!(files.input, PathBuf::from("rig.json"));
                assert_eq!(images, PathBuf::from("captures"));
                assert_eq!(files.output, Some(PathBuf::from("out.json")));
                assert!(files.config.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}

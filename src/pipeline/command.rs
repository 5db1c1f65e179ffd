use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use super::{ConversionPipeline, CoverRequest};
use crate::models::ModelEntry;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const OUTPUT_MARKER: &str = "Cover generated at";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct PipelineSettings {
    /// Executable that runs the cover pipeline, e.g. `python`.
    pub program: Option<PathBuf>,
    /// Arguments placed before the generated flags, e.g. `["src/main.py"]`.
    pub args: Vec<String>,
    pub timeout_secs: Option<u64>,
}

/// Runs the cover pipeline as a child process.
///
/// The child receives the song, the model directory name and every tunable as
/// flags and is expected to print the output path, either on a line
/// containing `Cover generated at <path>` or as its last line of output.
#[derive(Debug, Clone)]
pub struct CommandPipeline {
    program: PathBuf,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl CommandPipeline {
    pub fn new(program: PathBuf, args: Vec<String>, timeout: Option<Duration>) -> Self {
        Self {
            program,
            args,
            timeout,
        }
    }

    pub fn from_settings(settings: &PipelineSettings) -> Result<Self> {
        let program = settings
            .program
            .clone()
            .ok_or_else(|| anyhow!("no pipeline program configured"))?;
        Ok(Self::new(
            program,
            settings.args.clone(),
            settings.timeout_secs.map(Duration::from_secs),
        ))
    }

    fn arguments(request: &CoverRequest, model: &ModelEntry) -> Vec<String> {
        let params = &request.params;
        let mut args = vec![
            "-i".to_string(),
            request.song.clone(),
            "-dir".to_string(),
            model.name.clone(),
            "-p".to_string(),
            params.pitch.to_string(),
            "-ir".to_string(),
            params.index_rate.to_string(),
            "-fr".to_string(),
            params.filter_radius.to_string(),
            "-rms".to_string(),
            params.rms_mix_rate.to_string(),
            "-palgo".to_string(),
            params.f0_method.as_str().to_string(),
            "-hop".to_string(),
            params.crepe_hop_length.to_string(),
            "-pro".to_string(),
            params.protect.to_string(),
            "-mv".to_string(),
            params.main_gain.to_string(),
            "-bv".to_string(),
            params.backup_gain.to_string(),
            "-iv".to_string(),
            params.inst_gain.to_string(),
            "-pall".to_string(),
            params.pitch_all.to_string(),
            "-rsize".to_string(),
            params.reverb_room_size.to_string(),
            "-rwet".to_string(),
            params.reverb_wet.to_string(),
            "-rdry".to_string(),
            params.reverb_dry.to_string(),
            "-rdamp".to_string(),
            params.reverb_damping.to_string(),
            "-oformat".to_string(),
            params.output_format.extension().to_string(),
        ];
        if params.keep_files {
            args.push("-k".to_string());
        }
        args
    }

    fn wait(&self, mut child: Child) -> Result<String> {
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());
        let start = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait().context("failed polling pipeline command")? {
                break status;
            }

            if let Some(timeout) = self.timeout {
                if start.elapsed() > timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(anyhow!("pipeline command exceeded {:?} timeout", timeout));
                }
            }

            thread::sleep(POLL_INTERVAL);
        };

        let stdout = collect(stdout);
        if !status.success() {
            return Err(anyhow!(
                "pipeline command exited with status {:?}: {}",
                status.code(),
                collect(stderr).trim()
            ));
        }
        Ok(stdout)
    }
}

impl ConversionPipeline for CommandPipeline {
    fn generate(&self, request: &CoverRequest, model: &ModelEntry) -> Result<PathBuf> {
        request.validate()?;
        let child = Command::new(&self.program)
            .args(&self.args)
            .args(Self::arguments(request, model))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn pipeline command {:?}", self.program))?;

        tracing::info!(%request, "cover generation started");
        let stdout = self.wait(child)?;
        let output = parse_output_path(&stdout)
            .ok_or_else(|| anyhow!("pipeline command did not report an output file"))?;
        tracing::info!(output = %output.display(), "cover generation finished");
        Ok(output)
    }
}

/// Reads a child pipe to the end on its own thread so a chatty child never
/// blocks on a full pipe.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    let mut pipe = pipe?;
    Some(thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    }))
}

fn collect(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

fn parse_output_path(stdout: &str) -> Option<PathBuf> {
    let lines: Vec<&str> = stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    lines
        .iter()
        .rev()
        .find_map(|line| {
            line.split_once(OUTPUT_MARKER)
                .map(|(_, path)| path.trim().to_string())
        })
        .or_else(|| lines.last().map(|line| line.to_string()))
        .filter(|path| !path.is_empty())
        .map(PathBuf::from)
}

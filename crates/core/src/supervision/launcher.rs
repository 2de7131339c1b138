//! Job launch: job-spec file, argument vector, detached spawn.
//!
//! The generator runs in its own session with stdout and stderr appended to
//! a per-task log file. Nothing is shell-interpreted.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use serde::Serialize;

use crate::naming::TaskPaths;

/// Named generation options passed through to the generator script.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationOptions {
    pub python: String,
    pub script: String,
    /// Working directory for the child; inherited when `None`.
    pub working_dir: Option<PathBuf>,
    pub ckpt_dir: String,
    pub wav2vec_dir: String,
    pub infinitetalk_dir: String,
    pub size: String,
    pub sample_steps: u32,
    pub mode: String,
    /// Quantization scheme; `--quant`/`--quant_dir` are omitted when `None`.
    pub quant: Option<String>,
    pub quant_dir: String,
    pub motion_frame: u32,
    pub num_persistent_param_in_dit: u64,
    pub lora_dir: Option<String>,
    pub lora_scale: Option<f32>,
    /// Appended verbatim before `--save_file`.
    pub extra_args: Vec<String>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            python: "python".into(),
            script: "generate_infinitetalk.py".into(),
            working_dir: None,
            ckpt_dir: "weights/Wan2.1-I2V-14B-480P".into(),
            wav2vec_dir: "weights/chinese-wav2vec2-base".into(),
            infinitetalk_dir: "weights/InfiniteTalk/single/infinitetalk.safetensors".into(),
            size: "infinitetalk-480".into(),
            sample_steps: 40,
            mode: "streaming".into(),
            quant: Some("fp8".into()),
            quant_dir: "weights/InfiniteTalk/quant_models/infinitetalk_single_fp8.safetensors"
                .into(),
            motion_frame: 9,
            num_persistent_param_in_dit: 0,
            lora_dir: None,
            lora_scale: None,
            extra_args: Vec::new(),
        }
    }
}

/// Inputs for a single launch.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub task_id: String,
    pub prompt: String,
    pub image_path: String,
    pub audio_path: String,
}

/// Everything recorded about a launched job.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchHandle {
    pub pid: i32,
    pub log_path: PathBuf,
    pub job_spec_path: PathBuf,
    pub output_path: PathBuf,
    pub command: Vec<String>,
}

/// A launched job together with the owned child handle.
#[derive(Debug)]
pub struct Launched {
    pub handle: LaunchHandle,
    pub child: Child,
}

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    /// The generator executable could not be found.
    #[error("Executable not found: {0}")]
    NotFound(String),

    /// The log file or the executable was not accessible.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Launch failed: {0}")]
    Unknown(String),
}

impl LaunchError {
    /// Map a failed `spawn` of `program`.
    fn from_spawn(program: &Path, err: io::Error) -> Self {
        let subject = program.display().to_string();
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound(subject),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(subject),
            _ => Self::Unknown(format!("{subject}: {err}")),
        }
    }

    /// Map a failure preparing the job spec, log or output location.
    ///
    /// `NotFound` is reserved for the executable, so a missing directory
    /// here is reported as `Unknown` naming the path.
    fn from_fs(path: &Path, err: io::Error) -> Self {
        let subject = path.display().to_string();
        match err.kind() {
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(subject),
            _ => Self::Unknown(format!("{subject}: {err}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Job spec and command
// ---------------------------------------------------------------------------

/// Serialize the job description the generator reads via `--input_json`.
pub fn job_spec_json(request: &LaunchRequest) -> serde_json::Value {
    serde_json::json!({
        "prompt": request.prompt,
        "cond_video": request.image_path,
        "cond_audio": {
            "person1": request.audio_path,
        },
    })
}

/// Write the job spec to `path`, creating the parent directory.
pub fn write_job_spec(request: &LaunchRequest, path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let body = serde_json::to_vec_pretty(&job_spec_json(request))?;
    std::fs::write(path, body)
}

/// Build the generator argument vector. The first element is the program.
pub fn build_command(
    options: &GenerationOptions,
    job_spec_path: &Path,
    output_path: &Path,
) -> Vec<String> {
    let mut cmd = vec![
        options.python.clone(),
        options.script.clone(),
        "--ckpt_dir".into(),
        options.ckpt_dir.clone(),
        "--wav2vec_dir".into(),
        options.wav2vec_dir.clone(),
        "--infinitetalk_dir".into(),
        options.infinitetalk_dir.clone(),
        "--input_json".into(),
        job_spec_path.display().to_string(),
        "--size".into(),
        options.size.clone(),
        "--sample_steps".into(),
        options.sample_steps.to_string(),
        "--mode".into(),
        options.mode.clone(),
    ];
    if let Some(quant) = &options.quant {
        cmd.extend([
            "--quant".into(),
            quant.clone(),
            "--quant_dir".into(),
            options.quant_dir.clone(),
        ]);
    }
    cmd.extend([
        "--motion_frame".into(),
        options.motion_frame.to_string(),
        "--num_persistent_param_in_dit".into(),
        options.num_persistent_param_in_dit.to_string(),
    ]);
    if let Some(lora_dir) = &options.lora_dir {
        cmd.extend(["--lora_dir".into(), lora_dir.clone()]);
    }
    if let Some(scale) = options.lora_scale {
        cmd.extend(["--lora_scale".into(), scale.to_string()]);
    }
    cmd.extend(options.extra_args.iter().cloned());
    cmd.extend(["--save_file".into(), output_path.display().to_string()]);
    cmd
}

// ---------------------------------------------------------------------------
// Spawn
// ---------------------------------------------------------------------------

fn open_log(path: &Path) -> Result<File, LaunchError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| LaunchError::from_fs(parent, e))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| LaunchError::from_fs(path, e))
}

/// Write the job spec and spawn the generator. Blocks on filesystem and
/// `fork`/`exec`; async callers go through [`launch`].
pub fn launch_blocking(
    request: &LaunchRequest,
    options: &GenerationOptions,
    paths: &TaskPaths,
) -> Result<Launched, LaunchError> {
    let job_spec_path = paths.job_spec_path(&request.task_id);
    let output_path = paths.output_path(&request.task_id);
    let log_path = paths.log_path(&request.task_id);

    write_job_spec(request, &job_spec_path)
        .map_err(|e| LaunchError::from_fs(&job_spec_path, e))?;
    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| LaunchError::from_fs(parent, e))?;
    }

    let command = build_command(options, &job_spec_path, &output_path);
    let stdout = open_log(&log_path)?;
    let stderr = stdout
        .try_clone()
        .map_err(|e| LaunchError::from_fs(&log_path, e))?;

    let mut cmd = Command::new(&command[0]);
    cmd.args(&command[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr));
    if let Some(dir) = &options.working_dir {
        cmd.current_dir(dir);
    }
    // SAFETY: setsid is async-signal-safe and touches no parent state.
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let child = cmd
        .spawn()
        .map_err(|e| LaunchError::from_spawn(Path::new(&command[0]), e))?;
    let pid = child.id() as i32;

    tracing::info!(
        task_id = %request.task_id,
        pid,
        log_path = %log_path.display(),
        "Generator process started",
    );

    Ok(Launched {
        handle: LaunchHandle {
            pid,
            log_path,
            job_spec_path,
            output_path,
            command,
        },
        child,
    })
}

/// Async wrapper running [`launch_blocking`] on the blocking pool.
pub async fn launch(
    request: LaunchRequest,
    options: GenerationOptions,
    paths: TaskPaths,
) -> Result<Launched, LaunchError> {
    tokio::task::spawn_blocking(move || launch_blocking(&request, &options, &paths))
        .await
        .map_err(|e| LaunchError::Unknown(format!("launch task panicked: {e}")))?
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;
    use std::time::Duration;

    use assert_matches::assert_matches;

    use super::*;

    fn request(id: &str) -> LaunchRequest {
        LaunchRequest {
            task_id: id.into(),
            prompt: "a woman speaking to camera".into(),
            image_path: "/inputs/face.png".into(),
            audio_path: "/inputs/voice.wav".into(),
        }
    }

    /// Options that run `body` through `/bin/sh` instead of the generator.
    fn sh_options(dir: &Path, body: &str) -> GenerationOptions {
        let script = dir.join("fake_generator.sh");
        std::fs::write(&script, body).expect("write script");
        GenerationOptions {
            python: "/bin/sh".into(),
            script: script.display().to_string(),
            ..GenerationOptions::default()
        }
    }

    fn wait_child(child: &mut Child) -> i32 {
        for _ in 0..100 {
            if let Some(status) = child.try_wait().expect("try_wait") {
                return status.code().unwrap_or(-1);
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        panic!("child did not exit");
    }

    #[test]
    fn command_uses_defaults_and_ends_with_save_file() {
        let cmd = build_command(
            &GenerationOptions::default(),
            Path::new("configs/task_a.json"),
            Path::new("output_videos/infinitetalk_res_a.mp4"),
        );
        assert_eq!(cmd[0], "python");
        assert_eq!(cmd[1], "generate_infinitetalk.py");
        let pos = |flag: &str| cmd.iter().position(|a| a == flag).expect(flag);
        assert_eq!(cmd[pos("--input_json") + 1], "configs/task_a.json");
        assert_eq!(cmd[pos("--sample_steps") + 1], "40");
        assert_eq!(cmd[pos("--quant") + 1], "fp8");
        assert_eq!(cmd[pos("--motion_frame") + 1], "9");
        assert_eq!(cmd[cmd.len() - 2], "--save_file");
        assert_eq!(cmd[cmd.len() - 1], "output_videos/infinitetalk_res_a.mp4");
    }

    #[test]
    fn optional_flags_follow_options() {
        let options = GenerationOptions {
            quant: None,
            lora_dir: Some("weights/lora".into()),
            lora_scale: Some(1.5),
            extra_args: vec!["--seed".into(), "42".into()],
            ..GenerationOptions::default()
        };
        let cmd = build_command(&options, Path::new("a.json"), Path::new("a.mp4"));
        assert!(!cmd.iter().any(|a| a == "--quant" || a == "--quant_dir"));
        assert!(cmd.windows(2).any(|w| w == ["--lora_dir", "weights/lora"]));
        assert!(cmd.windows(2).any(|w| w == ["--lora_scale", "1.5"]));
        assert!(cmd.windows(2).any(|w| w == ["--seed", "42"]));
    }

    #[test]
    fn job_spec_matches_generator_schema() {
        let value = job_spec_json(&request("t1"));
        assert_eq!(value["prompt"], "a woman speaking to camera");
        assert_eq!(value["cond_video"], "/inputs/face.png");
        assert_eq!(value["cond_audio"]["person1"], "/inputs/voice.wav");
    }

    #[tokio::test]
    async fn launch_writes_spec_and_captures_output() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = TaskPaths::under(dir.path());
        let options = sh_options(dir.path(), "echo to-stdout\necho to-stderr 1>&2\n");

        let mut launched = launch(request("t2"), options, paths.clone())
            .await
            .expect("launch");
        assert!(launched.handle.pid > 0);
        assert_eq!(wait_child(&mut launched.child), 0);

        let spec = std::fs::read_to_string(paths.job_spec_path("t2")).expect("spec");
        assert!(spec.contains("cond_audio"));

        let log = std::fs::read_to_string(&launched.handle.log_path).expect("log");
        assert!(log.contains("to-stdout"));
        assert!(log.contains("to-stderr"));
        assert_eq!(launched.handle.output_path, paths.output_path("t2"));
    }

    #[tokio::test]
    async fn launch_appends_to_existing_log() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = TaskPaths::under(dir.path());
        std::fs::create_dir_all(&paths.log_dir).expect("mkdir");
        std::fs::write(paths.log_path("t3"), "earlier line\n").expect("seed log");

        let options = sh_options(dir.path(), "echo later line\n");
        let mut launched = launch(request("t3"), options, paths.clone())
            .await
            .expect("launch");
        wait_child(&mut launched.child);

        let log = std::fs::read_to_string(paths.log_path("t3")).expect("log");
        assert!(log.starts_with("earlier line\n"));
        assert!(log.contains("later line"));
    }

    #[tokio::test]
    async fn child_leads_its_own_session() {
        let dir = tempfile::tempdir().expect("tempdir");
        let options = sh_options(dir.path(), "sleep 1\n");
        let mut launched = launch(request("t4"), options, TaskPaths::under(dir.path()))
            .await
            .expect("launch");

        // SAFETY: read-only query of another process's session id.
        let sid = unsafe { libc::getsid(launched.handle.pid) };
        assert_eq!(sid, launched.handle.pid);
        wait_child(&mut launched.child);
    }

    #[tokio::test]
    async fn missing_executable_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let options = GenerationOptions {
            python: dir.path().join("no-such-python").display().to_string(),
            ..GenerationOptions::default()
        };
        let result = launch(request("t5"), options, TaskPaths::under(dir.path())).await;
        assert_matches!(result, Err(LaunchError::NotFound(_)));
    }

    #[tokio::test]
    async fn non_executable_program_is_permission_denied() {
        let dir = tempfile::tempdir().expect("tempdir");
        let program = dir.path().join("python");
        std::fs::write(&program, "#!/bin/sh\n").expect("write");
        std::fs::set_permissions(&program, std::fs::Permissions::from_mode(0o644))
            .expect("chmod");
        let options = GenerationOptions {
            python: program.display().to_string(),
            ..GenerationOptions::default()
        };
        let result = launch(request("t6"), options, TaskPaths::under(dir.path())).await;
        assert_matches!(result, Err(LaunchError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn unwritable_job_spec_dir_is_not_reported_as_missing_executable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blocker = dir.path().join("configs");
        std::fs::write(&blocker, "not a directory").expect("write");
        let paths = TaskPaths::new(dir.path().join("logs"), &blocker, dir.path().join("out"));
        let options = sh_options(dir.path(), "exit 0\n");

        let result = launch(request("t7"), options, paths).await;
        let err = result.expect_err("job spec write fails");
        assert_matches!(&err, LaunchError::Unknown(msg) if msg.contains("task_t7.json"));
    }

    #[test]
    fn filesystem_not_found_names_the_path() {
        let err = LaunchError::from_fs(
            Path::new("logs/task_t8.log"),
            io::Error::from(io::ErrorKind::NotFound),
        );
        assert_matches!(&err, LaunchError::Unknown(msg) if msg.starts_with("logs/task_t8.log"));

        let err = LaunchError::from_spawn(
            Path::new("python"),
            io::Error::from(io::ErrorKind::NotFound),
        );
        assert_matches!(err, LaunchError::NotFound(p) if p == "python");
    }
}

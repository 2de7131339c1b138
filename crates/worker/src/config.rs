use std::fmt::Debug;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use talkvid_core::naming::TaskPaths;
use talkvid_core::supervision::classifier::{MarkerSet, DEFAULT_TAIL_LINES};
use talkvid_core::supervision::launcher::GenerationOptions;

/// Supervisor tuning loaded from environment variables.
///
/// Defaults match a single-GPU host running one generation at a time.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Maximum simultaneously active tasks (default: `1`).
    pub max_concurrent: usize,
    /// Scheduler tick interval (default: 1 s).
    pub tick_interval: Duration,
    /// Liveness monitor poll interval (default: 5 s).
    pub monitor_interval: Duration,
    /// Wait after SIGTERM before escalating (default: 5 s).
    pub cancel_grace: Duration,
    /// Wait after SIGKILL (default: 2 s).
    pub cancel_kill_wait: Duration,
    pub paths: TaskPaths,
    pub markers: MarkerSet,
    pub generation: GenerationOptions,
    /// Log lines inspected by the classifier and returned by `tail` by default.
    pub log_tail_lines: usize,
    /// Follow-stream poll interval (default: 500 ms).
    pub follow_poll: Duration,
    /// Follow-stream idle cutoff (default: 60 s).
    pub follow_idle: Duration,
    /// Base for download references, e.g. `http://localhost:3000`.
    pub public_base_url: Option<String>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 1,
            tick_interval: Duration::from_millis(1000),
            monitor_interval: Duration::from_millis(5000),
            cancel_grace: Duration::from_secs(5),
            cancel_kill_wait: Duration::from_secs(2),
            paths: TaskPaths::default(),
            markers: MarkerSet::default(),
            generation: GenerationOptions::default(),
            log_tail_lines: DEFAULT_TAIL_LINES,
            follow_poll: Duration::from_millis(500),
            follow_idle: Duration::from_secs(60),
            public_base_url: None,
        }
    }
}

impl SupervisorConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                  | Default                   |
    /// |--------------------------|---------------------------|
    /// | `MAX_CONCURRENT_TASKS`   | `1`                       |
    /// | `SCHEDULER_TICK_MS`      | `1000`                    |
    /// | `MONITOR_INTERVAL_MS`    | `5000`                    |
    /// | `CANCEL_GRACE_SECS`      | `5`                       |
    /// | `CANCEL_KILL_SECS`       | `2`                       |
    /// | `LOG_DIR`                | `logs`                    |
    /// | `JOB_SPEC_DIR`           | `configs`                 |
    /// | `OUTPUT_DIR`             | `output_videos`           |
    /// | `SUCCESS_MARKERS`        | built-in, `\|`-separated  |
    /// | `FAILURE_MARKERS`        | built-in, `\|`-separated  |
    /// | `LOG_TAIL_LINES`         | `100`                     |
    /// | `FOLLOW_POLL_MS`         | `500`                     |
    /// | `FOLLOW_IDLE_SECS`       | `60`                      |
    /// | `PUBLIC_BASE_URL`        | unset                     |
    ///
    /// Generation options are overridden by `GEN_*` variables, see
    /// [`generation_from_env`].
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let max_concurrent: usize = env_parse("MAX_CONCURRENT_TASKS", defaults.max_concurrent);
        assert!(max_concurrent >= 1, "MAX_CONCURRENT_TASKS must be at least 1");

        let paths = TaskPaths::new(
            env_string("LOG_DIR", "logs"),
            env_string("JOB_SPEC_DIR", "configs"),
            env_string("OUTPUT_DIR", "output_videos"),
        );

        let markers = MarkerSet {
            success: env_list("SUCCESS_MARKERS").unwrap_or(defaults.markers.success),
            failure: env_list("FAILURE_MARKERS").unwrap_or(defaults.markers.failure),
        };

        Self {
            max_concurrent,
            tick_interval: Duration::from_millis(env_parse("SCHEDULER_TICK_MS", 1000)),
            monitor_interval: Duration::from_millis(env_parse("MONITOR_INTERVAL_MS", 5000)),
            cancel_grace: Duration::from_secs(env_parse("CANCEL_GRACE_SECS", 5)),
            cancel_kill_wait: Duration::from_secs(env_parse("CANCEL_KILL_SECS", 2)),
            paths,
            markers,
            generation: generation_from_env(),
            log_tail_lines: env_parse("LOG_TAIL_LINES", DEFAULT_TAIL_LINES),
            follow_poll: Duration::from_millis(env_parse("FOLLOW_POLL_MS", 500)),
            follow_idle: Duration::from_secs(env_parse("FOLLOW_IDLE_SECS", 60)),
            public_base_url: std::env::var("PUBLIC_BASE_URL")
                .ok()
                .map(|url| url.trim_end_matches('/').to_string())
                .filter(|url| !url.is_empty()),
        }
    }

    /// Download reference for a finished task, if a public base URL is set.
    pub fn download_url(&self, task_id: &str) -> Option<String> {
        self.public_base_url
            .as_ref()
            .map(|base| format!("{base}/api/v1/tasks/{task_id}/output"))
    }
}

/// Generation options with `GEN_*` overrides.
///
/// | Env Var                            | Field                          |
/// |------------------------------------|--------------------------------|
/// | `GEN_PYTHON`                       | `python`                       |
/// | `GEN_SCRIPT`                       | `script`                       |
/// | `GEN_WORKING_DIR`                  | `working_dir`                  |
/// | `GEN_CKPT_DIR`                     | `ckpt_dir`                     |
/// | `GEN_WAV2VEC_DIR`                  | `wav2vec_dir`                  |
/// | `GEN_INFINITETALK_DIR`             | `infinitetalk_dir`             |
/// | `GEN_SIZE`                         | `size`                         |
/// | `GEN_SAMPLE_STEPS`                 | `sample_steps`                 |
/// | `GEN_MODE`                         | `mode`                         |
/// | `GEN_QUANT` (empty disables)       | `quant`                        |
/// | `GEN_QUANT_DIR`                    | `quant_dir`                    |
/// | `GEN_MOTION_FRAME`                 | `motion_frame`                 |
/// | `GEN_NUM_PERSISTENT_PARAM_IN_DIT`  | `num_persistent_param_in_dit`  |
/// | `GEN_LORA_DIR`                     | `lora_dir`                     |
/// | `GEN_LORA_SCALE`                   | `lora_scale`                   |
/// | `GEN_EXTRA_ARGS` (whitespace-split)| `extra_args`                   |
pub fn generation_from_env() -> GenerationOptions {
    let d = GenerationOptions::default();
    GenerationOptions {
        python: env_string("GEN_PYTHON", &d.python),
        script: env_string("GEN_SCRIPT", &d.script),
        working_dir: std::env::var("GEN_WORKING_DIR").ok().map(PathBuf::from),
        ckpt_dir: env_string("GEN_CKPT_DIR", &d.ckpt_dir),
        wav2vec_dir: env_string("GEN_WAV2VEC_DIR", &d.wav2vec_dir),
        infinitetalk_dir: env_string("GEN_INFINITETALK_DIR", &d.infinitetalk_dir),
        size: env_string("GEN_SIZE", &d.size),
        sample_steps: env_parse("GEN_SAMPLE_STEPS", d.sample_steps),
        mode: env_string("GEN_MODE", &d.mode),
        quant: match std::env::var("GEN_QUANT") {
            Ok(q) if q.trim().is_empty() => None,
            Ok(q) => Some(q),
            Err(_) => d.quant,
        },
        quant_dir: env_string("GEN_QUANT_DIR", &d.quant_dir),
        motion_frame: env_parse("GEN_MOTION_FRAME", d.motion_frame),
        num_persistent_param_in_dit: env_parse(
            "GEN_NUM_PERSISTENT_PARAM_IN_DIT",
            d.num_persistent_param_in_dit,
        ),
        lora_dir: std::env::var("GEN_LORA_DIR").ok(),
        lora_scale: std::env::var("GEN_LORA_SCALE").ok().map(|v| {
            v.parse()
                .expect("GEN_LORA_SCALE must be a valid floating point number")
        }),
        extra_args: std::env::var("GEN_EXTRA_ARGS")
            .map(|v| v.split_whitespace().map(String::from).collect())
            .unwrap_or_default(),
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.into())
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: Debug,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .unwrap_or_else(|e| panic!("{key} must be a valid value: {e:?}")),
        Err(_) => default,
    }
}

/// `|`-separated list; `None` when unset or empty.
fn env_list(key: &str) -> Option<Vec<String>> {
    let raw = std::env::var(key).ok()?;
    let items: Vec<String> = raw
        .split('|')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    (!items.is_empty()).then_some(items)
}

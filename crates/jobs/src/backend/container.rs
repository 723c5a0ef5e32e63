//! Container backend: `docker run` of the worker image, driven through the
//! runtime CLI.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use super::{BackendError, BackendKind, ExecutionState, JobBackend, JobSpec, BLUEPRINT_ENV};

/// Variables forwarded from the submitter's environment into the worker
/// container when set.
pub const FORWARDED_ENV: &[&str] = &[
    "DATABASE_URL",
    "CHOREO_MEDIA_ROOT",
    "CHOREO_STORAGE_BACKEND",
    "CHOREO_S3_BUCKET",
    "CHOREO_S3_ENDPOINT",
    "CHOREO_S3_PREFIX",
    "CHOREO_PUBLIC_BASE_URL",
    "AWS_ACCESS_KEY_ID",
    "AWS_SECRET_ACCESS_KEY",
    "AWS_REGION",
    "RUST_LOG",
    "LOG_FORMAT",
];

#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSettings {
    /// Runtime CLI, `docker` or a compatible replacement.
    pub runtime: PathBuf,
    pub image: String,
    /// Extra `docker run` arguments (network, volumes).
    pub run_args: Vec<String>,
}

pub struct ContainerBackend {
    settings: ContainerSettings,
}

impl ContainerBackend {
    pub fn new(settings: ContainerSettings) -> Self {
        Self { settings }
    }

    async fn runtime(&self, args: &[String]) -> Result<String, BackendError> {
        let output = Command::new(&self.settings.runtime)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| BackendError::from_io("failed to run container runtime", &e))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(classify_stderr(&String::from_utf8_lossy(&output.stderr)))
        }
    }
}

/// Name given to a job's container.
pub fn container_name(task_id: &str) -> String {
    let safe: String = task_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect();
    format!("choreo-{safe}")
}

/// Arguments for `docker run`. `forwarded` holds `(name, value)` pairs
/// copied into the container environment.
pub fn run_args(
    settings: &ContainerSettings,
    job: &JobSpec,
    blueprint_json: &str,
    forwarded: &[(String, String)],
) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "--detach".to_string(),
        "--name".to_string(),
        container_name(&job.task_id),
        "--label".to_string(),
        format!("choreo.task_id={}", job.task_id),
        "--env".to_string(),
        format!("{BLUEPRINT_ENV}={blueprint_json}"),
        "--env".to_string(),
        "CHOREO_WORKER_MODE=single".to_string(),
    ];
    for (name, value) in forwarded {
        args.push("--env".to_string());
        args.push(format!("{name}={value}"));
    }
    args.extend(settings.run_args.iter().cloned());
    args.push(settings.image.clone());
    args
}

/// Parse `docker inspect --format '{{.State.Status}} {{.State.ExitCode}}'`.
pub fn parse_inspect(output: &str) -> Result<ExecutionState, BackendError> {
    let mut parts = output.split_whitespace();
    let status = parts
        .next()
        .ok_or_else(|| BackendError::Unavailable("empty inspect output".into()))?;
    let exit_code: i32 = parts.next().and_then(|c| c.parse().ok()).unwrap_or(0);

    Ok(match status {
        "created" => ExecutionState::Queued,
        "running" | "restarting" | "paused" => ExecutionState::Running,
        "exited" | "dead" if exit_code == 0 => ExecutionState::Succeeded,
        // 137 = SIGKILL, what `docker kill` leaves behind.
        "exited" | "dead" if exit_code == 137 => ExecutionState::Cancelled,
        "exited" | "dead" => ExecutionState::Failed {
            error: format!("worker container exited with code {exit_code}"),
        },
        other => {
            return Err(BackendError::Unavailable(format!(
                "unexpected container status '{other}'"
            )))
        }
    })
}

/// Classify a runtime CLI failure by its message.
fn classify_stderr(stderr: &str) -> BackendError {
    let message = stderr.trim().to_string();
    let lower = message.to_lowercase();
    if lower.contains("no such container") || lower.contains("no such object") {
        BackendError::NotFound(message)
    } else if lower.contains("cannot connect") || lower.contains("connection refused") {
        BackendError::Connection(message)
    } else if lower.contains("permission denied") || lower.contains("unauthorized") {
        BackendError::Unauthorized(message)
    } else if lower.contains("timeout") || lower.contains("temporarily unavailable") {
        BackendError::Unavailable(message)
    } else {
        BackendError::Invalid(message)
    }
}

#[async_trait]
impl JobBackend for ContainerBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Container
    }

    async fn submit(&self, job: &JobSpec) -> Result<String, BackendError> {
        let blueprint = job.blueprint_json()?;
        let forwarded: Vec<(String, String)> = FORWARDED_ENV
            .iter()
            .filter_map(|name| std::env::var(name).ok().map(|v| (name.to_string(), v)))
            .collect();
        let args = run_args(&self.settings, job, &blueprint, &forwarded);

        let container_id = self.runtime(&args).await?;
        if container_id.is_empty() {
            return Err(BackendError::Unavailable("runtime returned no container id".into()));
        }
        tracing::info!(
            task_id = %job.task_id,
            container_id = %container_id,
            image = %self.settings.image,
            "Worker container started",
        );
        Ok(container_id)
    }

    async fn poll(&self, external_id: &str) -> Result<ExecutionState, BackendError> {
        let output = self
            .runtime(&[
                "inspect".to_string(),
                "--format".to_string(),
                "{{.State.Status}} {{.State.ExitCode}}".to_string(),
                external_id.to_string(),
            ])
            .await?;
        parse_inspect(&output)
    }

    async fn cancel(&self, external_id: &str) -> Result<bool, BackendError> {
        if self.poll(external_id).await?.is_terminal() {
            return Ok(false);
        }
        self.runtime(&["kill".to_string(), external_id.to_string()])
            .await?;
        tracing::info!(container_id = external_id, "Worker container killed");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use choreo_core::blueprint::{Blueprint, BlueprintMove, OutputConfig, TransitionType};

    fn settings() -> ContainerSettings {
        ContainerSettings {
            runtime: PathBuf::from("docker"),
            image: "registry.example/choreo-worker:1.4".into(),
            run_args: vec!["--network".into(), "choreo".into()],
        }
    }

    fn job() -> JobSpec {
        JobSpec {
            task_id: "5f1c/odd id".into(),
            user_id: "u".into(),
            blueprint: Blueprint {
                task_id: "5f1c/odd id".into(),
                audio_path: "music/a.wav".into(),
                moves: vec![BlueprintMove {
                    clip_id: "c".into(),
                    media_path: "clips/c.mp4".into(),
                    start_time: 0.0,
                    duration: 3.0,
                    transition_type: TransitionType::Cut,
                }],
                total_duration: 3.0,
                generation_parameters: serde_json::json!({}),
                output_config: OutputConfig::with_path("renders/x.mp4"),
            },
        }
    }

    // -- run args --

    #[test]
    fn run_args_carry_blueprint_and_image_last() {
        let forwarded = vec![("DATABASE_URL".to_string(), "postgres://db/choreo".to_string())];
        let args = run_args(&settings(), &job(), "{\"task_id\":\"x\"}", &forwarded);

        assert_eq!(args[0], "run");
        assert!(args.contains(&"CHOREO_BLUEPRINT={\"task_id\":\"x\"}".to_string()));
        assert!(args.contains(&"DATABASE_URL=postgres://db/choreo".to_string()));
        assert!(args.contains(&"choreo-5f1c-odd-id".to_string()));
        let network = args.iter().position(|a| a == "--network").unwrap();
        assert_eq!(args[network + 1], "choreo");
        assert_eq!(args.last().unwrap(), "registry.example/choreo-worker:1.4");
    }

    // -- inspect --

    #[test]
    fn inspect_output_maps_to_states() {
        assert_eq!(parse_inspect("created 0").unwrap(), ExecutionState::Queued);
        assert_eq!(parse_inspect("running 0\n").unwrap(), ExecutionState::Running);
        assert_eq!(parse_inspect("exited 0").unwrap(), ExecutionState::Succeeded);
        assert_eq!(parse_inspect("exited 137").unwrap(), ExecutionState::Cancelled);
        assert_matches!(
            parse_inspect("exited 2").unwrap(),
            ExecutionState::Failed { error } if error.contains("code 2")
        );
        assert!(parse_inspect("").is_err());
        assert!(parse_inspect("removing 0").is_err());
    }

    #[test]
    fn runtime_errors_are_classified() {
        assert_matches!(
            classify_stderr("Error: No such container: abc"),
            BackendError::NotFound(_)
        );
        assert!(classify_stderr("Cannot connect to the Docker daemon at unix:///var/run/docker.sock").is_transient());
        assert!(!classify_stderr("Unable to find image 'nope:latest' locally").is_transient());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn drives_runtime_cli() {
        use std::os::unix::fs::PermissionsExt;

        // Fake runtime: `run` prints an id, `inspect` reports running until
        // `kill` leaves a marker file.
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("killed");
        let runtime = dir.path().join("docker");
        std::fs::write(
            &runtime,
            format!(
                "#!/bin/sh\ncase \"$1\" in\n  run) echo c0ffee ;;\n  inspect) if [ -f {m} ]; then echo 'exited 137'; else echo 'running 0'; fi ;;\n  kill) touch {m}; echo c0ffee ;;\nesac\n",
                m = marker.display()
            ),
        )
        .unwrap();
        std::fs::set_permissions(&runtime, std::fs::Permissions::from_mode(0o755)).unwrap();

        let backend = ContainerBackend::new(ContainerSettings {
            runtime,
            ..settings()
        });
        let id = backend.submit(&job()).await.unwrap();
        assert_eq!(id, "c0ffee");
        assert_eq!(backend.poll(&id).await.unwrap(), ExecutionState::Running);
        assert!(backend.cancel(&id).await.unwrap());
        assert!(!backend.cancel(&id).await.unwrap());
        assert_eq!(backend.poll(&id).await.unwrap(), ExecutionState::Cancelled);
    }
}

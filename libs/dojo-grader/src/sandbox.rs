/// Isolation - Where Untrusted Code Actually Runs
///
/// **Core Responsibility:**
/// Launch one already-materialized artifact with a resolved command line,
/// drain stdout/stderr, enforce the wall-clock limit, and report the raw
/// outcome. No interpretation of the outcome happens here.
///
/// **Policies:**
/// - `Host`: plain child process with the service's own OS privileges.
///   Default and test double. UNSAFE for multi-tenant deployments: the
///   submitted code can read and write anything the service can.
/// - `Docker`: throwaway container per run, artifact directory mounted
///   read-only, networking disabled, memory/CPU capped.

use crate::config::LanguageConfig;
use anyhow::{Context, Result};
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::Docker;
use futures_util::stream::StreamExt;
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Mount point of the artifact directory inside a container
pub const CONTAINER_WORKDIR: &str = "/workspace";

/// Fully resolved command for one run
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

/// What happened to the process, before any grading interpretation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawOutcome {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    /// Set when no process ever ran (spawn failure, daemon unreachable)
    pub launch_error: Option<String>,
}

impl RawOutcome {
    fn launch_failure(message: String) -> Self {
        Self {
            launch_error: Some(message),
            ..Default::default()
        }
    }

    fn timed_out() -> Self {
        Self {
            timed_out: true,
            ..Default::default()
        }
    }
}

#[derive(Clone)]
pub enum Isolation {
    Host,
    Docker(DockerSandbox),
}

impl Isolation {
    /// `host` or `docker`; docker connects to the local daemon
    pub fn from_name(name: &str) -> Result<Self> {
        match name.trim().to_lowercase().as_str() {
            "host" | "" => Ok(Isolation::Host),
            "docker" => Ok(Isolation::Docker(DockerSandbox::connect()?)),
            other => anyhow::bail!("Unknown isolation policy '{}' (expected host or docker)", other),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Isolation::Host => "host",
            Isolation::Docker(_) => "docker",
        }
    }

    /// Host runs see the real artifact path, containers see the mount point
    pub fn artifact_path_for(&self, artifact: &Path, file_name: &str) -> String {
        match self {
            Isolation::Host => artifact.to_string_lossy().into_owned(),
            Isolation::Docker(_) => format!("{}/{}", CONTAINER_WORKDIR, file_name),
        }
    }

    /// Whether candidate interpreters should be probed on this machine
    pub fn probes_host_binaries(&self) -> bool {
        matches!(self, Isolation::Host)
    }

    pub async fn launch(
        &self,
        spec: &LaunchSpec,
        workdir: &Path,
        language: &LanguageConfig,
        timeout_ms: u64,
    ) -> RawOutcome {
        match self {
            Isolation::Host => run_on_host(spec, workdir, timeout_ms).await,
            Isolation::Docker(sandbox) => sandbox.run(spec, workdir, language, timeout_ms).await,
        }
    }
}

async fn drain<R: AsyncRead + Unpin>(pipe: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        if let Err(e) = pipe.read_to_end(&mut buf).await {
            debug!(error = %e, "Pipe read ended with error");
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Spawn directly on the host.
///
/// The child leads its own process group. Both pipes are drained by
/// separate tasks while the direct child is awaited; once it exits, the
/// rest of its group is killed so a background grandchild holding the
/// pipes open can neither stall the drains nor outlive the run. The wait
/// and the drain share one deadline.
async fn run_on_host(spec: &LaunchSpec, workdir: &Path, timeout_ms: u64) -> RawOutcome {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .envs(&spec.env)
        .current_dir(workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            return RawOutcome::launch_failure(format!(
                "Failed to launch '{}': {}",
                spec.program, e
            ))
        }
    };

    // Taken now: id() is gone once the child has been reaped
    let pgid = child.id();
    let mut stdout_task = tokio::spawn(drain(child.stdout.take()));
    let mut stderr_task = tokio::spawn(drain(child.stderr.take()));

    let finished = tokio::time::timeout(Duration::from_millis(timeout_ms), async {
        let status = child.wait().await;
        kill_process_group(pgid);
        let stdout = (&mut stdout_task).await.unwrap_or_default();
        let stderr = (&mut stderr_task).await.unwrap_or_default();
        (status, stdout, stderr)
    })
    .await;

    match finished {
        Ok((Ok(status), stdout, stderr)) => RawOutcome {
            stdout,
            stderr,
            exit_code: status.code(),
            timed_out: false,
            launch_error: None,
        },
        Ok((Err(e), _, _)) => {
            RawOutcome::launch_failure(format!("Failed waiting for '{}': {}", spec.program, e))
        }
        Err(_) => {
            warn!(program = %spec.program, timeout_ms, "Execution timed out, killing process group");
            kill_process_group(pgid);
            // kill() also reaps the direct child
            if let Err(e) = child.kill().await {
                debug!(error = %e, "Timed-out process already gone");
            }
            stdout_task.abort();
            stderr_task.abort();
            RawOutcome::timed_out()
        }
    }
}

/// SIGKILL every process left in the group led by `pgid`
#[cfg(unix)]
fn kill_process_group(pgid: Option<u32>) {
    let Some(pgid) = pgid else { return };
    // SAFETY: kill(2) takes no pointers; a negative pid addresses the group
    let rc = unsafe { libc::kill(-(pgid as libc::pid_t), libc::SIGKILL) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!(pgid, error = %err, "Failed to kill process group");
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: Option<u32>) {}

/// Force-removes its container once dropped. Holds its own `Docker` handle
/// so removal can run on a spawned task after the run future is gone.
struct ContainerGuard {
    docker: Docker,
    container_id: String,
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        // Cannot be async in Drop; hand the removal to the runtime
        let container_id = self.container_id.clone();
        let docker = self.docker.clone();

        tokio::spawn(async move {
            let remove_options = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };

            if let Err(e) = docker
                .remove_container(&container_id, Some(remove_options))
                .await
            {
                warn!(container_id = %container_id, error = %e, "Failed to clean up container");
            }
        });
    }
}

#[derive(Clone)]
pub struct DockerSandbox {
    docker: Docker,
}

impl DockerSandbox {
    pub fn connect() -> Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().context("Failed to connect to Docker daemon")?;
        Ok(Self { docker })
    }

    /// Pull the image if it is not cached locally
    async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.docker.inspect_image(image).await.is_ok() {
            debug!(image, "Image cache hit");
            return Ok(());
        }

        warn!(image, "Image cache miss, pulling");
        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });
        let mut stream = self.docker.create_image(options, None, None);
        while let Some(result) = stream.next().await {
            result.context("Failed to pull Docker image")?;
        }

        info!(image, "Image pulled");
        Ok(())
    }

    async fn run(
        &self,
        spec: &LaunchSpec,
        workdir: &Path,
        language: &LanguageConfig,
        timeout_ms: u64,
    ) -> RawOutcome {
        match self.try_run(spec, workdir, language, timeout_ms).await {
            Ok(outcome) => outcome,
            Err(e) => RawOutcome::launch_failure(format!("Container execution failed: {:#}", e)),
        }
    }

    async fn try_run(
        &self,
        spec: &LaunchSpec,
        workdir: &Path,
        language: &LanguageConfig,
        timeout_ms: u64,
    ) -> Result<RawOutcome> {
        let image = language
            .image
            .clone()
            .with_context(|| format!("No container image configured for '{}'", language.name))?;
        self.ensure_image(&image).await?;

        let mut cmd = vec![spec.program.clone()];
        cmd.extend(spec.args.iter().cloned());
        let env: Vec<String> = spec.env.iter().map(|(k, v)| format!("{}={}", k, v)).collect();

        let config = Config {
            image: Some(image.clone()),
            cmd: Some(cmd),
            env: Some(env),
            working_dir: Some(CONTAINER_WORKDIR.to_string()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            network_disabled: Some(true),
            host_config: Some(bollard::models::HostConfig {
                binds: Some(vec![format!(
                    "{}:{}:ro",
                    workdir.to_string_lossy(),
                    CONTAINER_WORKDIR
                )]),
                memory: Some(i64::from(language.memory_limit_mb) * 1024 * 1024),
                nano_cpus: Some((f64::from(language.cpu_limit) * 1_000_000_000.0) as i64),
                network_mode: Some("none".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let container_name = format!("dojo-{}", uuid::Uuid::new_v4());
        let container = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: container_name.as_str(),
                    platform: None,
                }),
                config,
            )
            .await
            .context("Failed to create container")?;

        let container_id = container.id.clone();
        let _guard = ContainerGuard {
            docker: self.docker.clone(),
            container_id: container_id.clone(),
        };

        self.docker
            .start_container(&container_id, None::<StartContainerOptions<String>>)
            .await
            .context("Failed to start container")?;

        let execution = async {
            let mut stdout = String::new();
            let mut stderr = String::new();

            let mut logs = self.docker.logs(
                &container_id,
                Some(LogsOptions::<String> {
                    stdout: true,
                    stderr: true,
                    follow: true,
                    ..Default::default()
                }),
            );
            while let Some(chunk) = logs.next().await {
                match chunk {
                    Ok(LogOutput::StdOut { message }) => {
                        stdout.push_str(&String::from_utf8_lossy(&message))
                    }
                    Ok(LogOutput::StdErr { message }) => {
                        stderr.push_str(&String::from_utf8_lossy(&message))
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "Error reading container logs");
                        break;
                    }
                }
            }

            let mut wait = self.docker.wait_container(
                &container_id,
                Some(WaitContainerOptions {
                    condition: "not-running",
                }),
            );
            // bollard reports non-zero exits as an error carrying the code
            let exit_code = match wait.next().await {
                Some(Ok(response)) => Some(response.status_code),
                Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => {
                    Some(code)
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Failed to read container exit code");
                    None
                }
                None => None,
            };

            (stdout, stderr, exit_code)
        };

        match tokio::time::timeout(Duration::from_millis(timeout_ms), execution).await {
            Ok((stdout, stderr, exit_code)) => Ok(RawOutcome {
                stdout,
                stderr,
                exit_code: exit_code.map(|c| c as i32),
                timed_out: false,
                launch_error: None,
            }),
            Err(_) => {
                warn!(container_id = %container_id, timeout_ms, "Container timed out, killing");
                if let Err(e) = self
                    .docker
                    .kill_container(&container_id, None::<KillContainerOptions<String>>)
                    .await
                {
                    warn!(error = %e, "Failed to kill timed-out container");
                }
                Ok(RawOutcome::timed_out())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> LaunchSpec {
        LaunchSpec {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            env: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_host_captures_both_streams() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = run_on_host(&sh("echo out; echo err >&2; exit 3"), dir.path(), 5_000).await;
        assert_eq!(outcome.stdout, "out\n");
        assert_eq!(outcome.stderr, "err\n");
        assert_eq!(outcome.exit_code, Some(3));
        assert!(!outcome.timed_out);
        assert!(outcome.launch_error.is_none());
    }

    #[tokio::test]
    async fn test_host_drains_large_output() {
        // Well past a typical 64 KiB pipe buffer on both streams
        let dir = tempfile::tempdir().unwrap();
        let script = "i=0; while [ $i -lt 20000 ]; do echo 0123456789; echo 0123456789 >&2; i=$((i+1)); done";
        let outcome = run_on_host(&sh(script), dir.path(), 20_000).await;
        assert_eq!(outcome.exit_code, Some(0));
        assert_eq!(outcome.stdout.lines().count(), 20_000);
        assert_eq!(outcome.stderr.lines().count(), 20_000);
    }

    #[tokio::test]
    async fn test_host_timeout_kills() {
        let dir = tempfile::tempdir().unwrap();
        let start = std::time::Instant::now();
        let outcome = run_on_host(&sh("sleep 30"), dir.path(), 300).await;
        assert!(outcome.timed_out);
        assert!(outcome.stdout.is_empty());
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_host_background_child_does_not_hold_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let start = std::time::Instant::now();
        let outcome = run_on_host(&sh("sleep 4 & echo hi; exit 0"), dir.path(), 3_000).await;
        assert!(!outcome.timed_out);
        assert_eq!(outcome.stdout, "hi\n");
        assert_eq!(outcome.exit_code, Some(0));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    /// Dead or a zombie waiting for its reaper
    #[cfg(target_os = "linux")]
    fn is_gone(pid: u32) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Err(_) => true,
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .map(|rest| rest.trim_start().starts_with('Z'))
                .unwrap_or(false),
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_host_timeout_kills_background_children() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("bg.pid");
        let script = format!("sleep 30 & echo $! > {}; wait", pid_file.display());
        let outcome = run_on_host(&sh(&script), dir.path(), 300).await;
        assert!(outcome.timed_out);

        let pid: u32 = std::fs::read_to_string(&pid_file).unwrap().trim().parse().unwrap();
        let mut gone = false;
        for _ in 0..50 {
            if is_gone(pid) {
                gone = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(gone, "background sleep {} survived the timeout", pid);
    }

    #[tokio::test]
    async fn test_host_missing_binary_is_launch_error() {
        let dir = tempfile::tempdir().unwrap();
        let spec = LaunchSpec {
            program: "definitely-not-a-real-binary-dojo".to_string(),
            args: vec![],
            env: BTreeMap::new(),
        };
        let outcome = run_on_host(&spec, dir.path(), 1_000).await;
        assert!(outcome.launch_error.unwrap().contains("definitely-not-a-real-binary-dojo"));
    }

    #[tokio::test]
    async fn test_host_passes_env() {
        let dir = tempfile::tempdir().unwrap();
        let mut spec = sh("printf %s \"$DOJO_GREETING\"");
        spec.env.insert("DOJO_GREETING".to_string(), "ok".to_string());
        let outcome = run_on_host(&spec, dir.path(), 5_000).await;
        assert_eq!(outcome.stdout, "ok");
    }

    #[test]
    fn test_artifact_path_for_host() {
        let path = Path::new("/tmp/dojo-1/main.py");
        assert_eq!(Isolation::Host.artifact_path_for(path, "main.py"), "/tmp/dojo-1/main.py");
    }

    #[test]
    fn test_unknown_isolation_rejected() {
        assert!(Isolation::from_name("chroot").is_err());
        assert_eq!(Isolation::from_name("HOST").unwrap().name(), "host");
    }
}

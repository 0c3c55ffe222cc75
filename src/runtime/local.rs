//! Single-host process collaborator
//!
//! Each launched service gets a pid file at `.fleet/run/{id}.pid` and a log
//! file at `.fleet/run/{id}.log`. Liveness is checked with `kill -0`, ports
//! are discovered with `lsof`. A missing `lsof` only means ports stay
//! unknown.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::probe::{ProbeError, ProcessCollaborator};
use crate::domain::Service;
use crate::storage::FLEET_DIR;

/// Stop timeout when neither the process nor the timeout config sets one
const DEFAULT_STOP_TIMEOUT_MS: i64 = 10_000;

pub struct LocalProcessProbe {
    run_dir: PathBuf,
    project_root: PathBuf,
}

impl LocalProcessProbe {
    pub fn new(run_dir: impl Into<PathBuf>, project_root: impl Into<PathBuf>) -> Self {
        Self {
            run_dir: run_dir.into(),
            project_root: project_root.into(),
        }
    }

    /// Creates the probe for a project, using `.fleet/run/`
    pub fn for_project(project_root: &Path) -> Self {
        Self::new(project_root.join(FLEET_DIR).join("run"), project_root)
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    fn file_for(&self, service_id: &str, extension: &str) -> PathBuf {
        let safe: String = service_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.run_dir.join(format!("{}.{}", safe, extension))
    }

    pub fn pid_path(&self, service_id: &str) -> PathBuf {
        self.file_for(service_id, "pid")
    }

    pub fn log_path(&self, service_id: &str) -> PathBuf {
        self.file_for(service_id, "log")
    }

    fn read_pid(&self, service_id: &str) -> Result<Option<u32>, ProbeError> {
        let path = self.pid_path(service_id);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ProbeError::Unreachable(format!("{}: {}", path.display(), e))),
        };

        content
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ProbeError::Malformed(format!("invalid pid file {}", path.display())))
    }

    fn remove_pid(&self, service_id: &str) {
        let path = self.pid_path(service_id);
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "failed to remove pid file");
            }
        }
    }

    /// Returns the pid of a live process, cleaning up stale pid files
    async fn live_pid(&self, service_id: &str) -> Result<Option<u32>, ProbeError> {
        match self.read_pid(service_id)? {
            Some(pid) if is_process_running(pid).await => Ok(Some(pid)),
            Some(pid) => {
                debug!(service = service_id, pid, "removing stale pid file");
                self.remove_pid(service_id);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn environment(&self, service: &Service) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        if let Some(env_file) = service
            .process_config
            .as_ref()
            .and_then(|p| p.env_file.as_deref())
        {
            let path = self.project_root.join(env_file);
            match fs::read_to_string(&path) {
                Ok(content) => env.extend(parse_env_file(&content)),
                Err(e) => warn!(path = %path.display(), error = %e, "failed to read env file"),
            }
        }
        // Inline variables win over the env file
        env.extend(service.env.clone());
        env
    }
}

#[async_trait]
impl ProcessCollaborator for LocalProcessProbe {
    async fn is_service_running(&self, service_id: &str) -> Result<bool, ProbeError> {
        Ok(self.live_pid(service_id).await?.is_some())
    }

    async fn get_service_pid(&self, service_id: &str) -> Result<Option<u32>, ProbeError> {
        self.live_pid(service_id).await
    }

    async fn get_port_for_pid(&self, pid: u32) -> Result<Option<u16>, ProbeError> {
        listening_port(pid).await
    }

    async fn start_service(&self, service: &Service) -> Result<(), ProbeError> {
        if self.live_pid(&service.id).await?.is_some() {
            debug!(service = %service.id, "already running");
            return Ok(());
        }

        let launch_err = |message: String| ProbeError::Launch {
            id: service.id.clone(),
            message,
        };

        fs::create_dir_all(&self.run_dir).map_err(|e| launch_err(e.to_string()))?;
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path(&service.id))
            .map_err(|e| launch_err(format!("cannot open log file: {}", e)))?;
        let log_err = log
            .try_clone()
            .map_err(|e| launch_err(format!("cannot open log file: {}", e)))?;

        let work_dir = service
            .work_dir
            .as_deref()
            .map(|dir| self.project_root.join(dir))
            .unwrap_or_else(|| self.project_root.clone());

        let mut child = Command::new(&service.path)
            .args(&service.args)
            .envs(self.environment(service))
            .current_dir(&work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .spawn()
            .map_err(|e| launch_err(e.to_string()))?;

        let pid = child
            .id()
            .ok_or_else(|| launch_err("process exited immediately".to_string()))?;

        fs::write(self.pid_path(&service.id), pid.to_string())
            .map_err(|e| launch_err(format!("cannot write pid file: {}", e)))?;

        // Reap the child when it exits so it never lingers as a zombie
        tokio::spawn(async move {
            let _ = child.wait().await;
        });

        info!(service = %service.id, pid, "started");
        Ok(())
    }

    async fn stop_service(&self, service: &Service) -> Result<(), ProbeError> {
        let Some(pid) = self.live_pid(&service.id).await? else {
            return Ok(());
        };

        let signal = service
            .process_config
            .as_ref()
            .and_then(|p| p.kill_signal.as_deref())
            .map(signal_name)
            .unwrap_or("TERM");

        send_signal(pid, signal).await.map_err(|message| ProbeError::Signal {
            id: service.id.clone(),
            message,
        })?;

        let timeout_ms = service
            .process_config
            .as_ref()
            .and_then(|p| p.graceful_shutdown_timeout)
            .or_else(|| service.timeout_config.as_ref().map(|t| t.stop_timeout))
            .unwrap_or(DEFAULT_STOP_TIMEOUT_MS)
            .max(0) as u64;
        let deadline = Duration::from_millis(timeout_ms);

        let start = Instant::now();
        while is_process_running(pid).await && start.elapsed() < deadline {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        if is_process_running(pid).await {
            warn!(service = %service.id, pid, "did not exit in time, killing");
            send_signal(pid, "KILL").await.map_err(|message| ProbeError::Signal {
                id: service.id.clone(),
                message,
            })?;
        }

        self.remove_pid(&service.id);
        info!(service = %service.id, pid, "stopped");
        Ok(())
    }

    async fn restart_service(&self, service: &Service) -> Result<(), ProbeError> {
        self.stop_service(service).await?;
        self.start_service(service).await
    }
}

/// Maps a configured kill signal to the name `kill` expects
fn signal_name(configured: &str) -> &'static str {
    match configured.trim().to_ascii_uppercase().trim_start_matches("SIG") {
        "KILL" => "KILL",
        "INT" => "INT",
        _ => "TERM",
    }
}

/// Checks if a process with the given PID is running
async fn is_process_running(pid: u32) -> bool {
    #[cfg(unix)]
    {
        Command::new("kill")
            .args(["-0", &pid.to_string()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[cfg(windows)]
    {
        Command::new("tasklist")
            .args(["/FI", &format!("PID eq {}", pid)])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .await
            .map(|o| String::from_utf8_lossy(&o.stdout).contains(&pid.to_string()))
            .unwrap_or(false)
    }
}

async fn send_signal(pid: u32, signal: &str) -> Result<(), String> {
    #[cfg(unix)]
    let status = Command::new("kill")
        .args([format!("-{}", signal), pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;

    #[cfg(windows)]
    let status = {
        let mut cmd = Command::new("taskkill");
        if signal == "KILL" {
            cmd.arg("/F");
        }
        cmd.args(["/PID", &pid.to_string()]).status().await
    };

    match status {
        Ok(s) if s.success() => Ok(()),
        Ok(s) => Err(format!("kill -{} {} exited with {}", signal, pid, s)),
        Err(e) => Err(e.to_string()),
    }
}

/// Finds the first TCP port a process listens on
async fn listening_port(pid: u32) -> Result<Option<u16>, ProbeError> {
    let output = Command::new("lsof")
        .args(["-Pan", "-p", &pid.to_string(), "-iTCP", "-sTCP:LISTEN", "-Fn"])
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .await;

    match output {
        // lsof exits non-zero when nothing matches
        Ok(out) => Ok(parse_lsof_ports(&String::from_utf8_lossy(&out.stdout))
            .into_iter()
            .next()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("lsof not available, ports stay unknown");
            Ok(None)
        }
        Err(e) => Err(ProbeError::Unreachable(format!("lsof: {}", e))),
    }
}

/// Extracts ports from `lsof -Fn` output (`n*:6379`, `n127.0.0.1:8080`)
pub fn parse_lsof_ports(output: &str) -> Vec<u16> {
    let mut ports: Vec<u16> = output
        .lines()
        .filter_map(|line| line.strip_prefix('n'))
        .filter_map(|name| name.rsplit_once(':'))
        .filter_map(|(_, port)| port.parse().ok())
        .collect();
    ports.dedup();
    ports
}

/// Parses `KEY=VALUE` lines, skipping blanks and `#` comments
fn parse_env_file(content: &str) -> BTreeMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let line = line.strip_prefix("export ").unwrap_or(line);
            let (key, value) = line.split_once('=')?;
            let value = value.trim().trim_matches('"').trim_matches('\'');
            Some((key.trim().to_string(), value.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn parse_lsof_output() {
        let output = "p4321\nf5\nn*:6379\nf6\nn[::1]:6379\nf7\nn127.0.0.1:16379\n";
        assert_eq!(parse_lsof_ports(output), vec![6379, 16379]);
        assert!(parse_lsof_ports("").is_empty());
    }

    #[test]
    fn parse_env() {
        let env = parse_env_file("# comment\nFOO=bar\nexport QUOTED=\"a b\"\n\nBROKEN\n");
        assert_eq!(env.get("FOO").map(String::as_str), Some("bar"));
        assert_eq!(env.get("QUOTED").map(String::as_str), Some("a b"));
        assert_eq!(env.len(), 2);
    }

    #[test]
    fn signal_names() {
        assert_eq!(signal_name("SIGKILL"), "KILL");
        assert_eq!(signal_name("sigint"), "INT");
        assert_eq!(signal_name("SIGTERM"), "TERM");
        assert_eq!(signal_name("bogus"), "TERM");
    }

    #[test]
    fn pid_paths_are_sanitized() {
        let probe = LocalProcessProbe::for_project(Path::new("/tmp/proj"));
        assert!(probe.pid_path("svc-1a2b3c4").ends_with("run/svc-1a2b3c4.pid"));
        assert!(probe.pid_path("../evil").ends_with("run/.._evil.pid"));
    }

    #[test]
    fn inline_env_overrides_env_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(".env"), "A=file\nB=file\n").unwrap();

        let probe = LocalProcessProbe::for_project(dir.path());
        let mut svc = Service::new("s", "S", "g", "/bin/true");
        svc.process_config = Some(crate::domain::ProcessConfig {
            env_file: Some(".env".to_string()),
            ..Default::default()
        });
        svc.env.insert("B".to_string(), "inline".to_string());

        let env = probe.environment(&svc);
        assert_eq!(env["A"], "file");
        assert_eq!(env["B"], "inline");
    }

    #[tokio::test]
    async fn missing_pid_file_means_stopped() {
        let dir = TempDir::new().unwrap();
        let probe = LocalProcessProbe::for_project(dir.path());
        assert!(!probe.is_service_running("nothing").await.unwrap());
        assert_eq!(probe.get_service_pid("nothing").await.unwrap(), None);
    }

    #[test]
    fn garbage_pid_file_is_malformed() {
        let dir = TempDir::new().unwrap();
        let probe = LocalProcessProbe::for_project(dir.path());
        fs::create_dir_all(probe.run_dir()).unwrap();
        fs::write(probe.pid_path("x"), "not a pid").unwrap();

        assert!(matches!(probe.read_pid("x"), Err(ProbeError::Malformed(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stale_pid_file_is_removed() {
        let dir = TempDir::new().unwrap();
        let probe = LocalProcessProbe::for_project(dir.path());
        fs::create_dir_all(probe.run_dir()).unwrap();
        fs::write(probe.pid_path("ghost"), "999999").unwrap();

        assert!(!probe.is_service_running("ghost").await.unwrap());
        assert!(!probe.pid_path("ghost").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn start_and_stop_a_real_process() {
        let dir = TempDir::new().unwrap();
        let probe = LocalProcessProbe::for_project(dir.path());
        let mut svc = Service::new("sleeper", "Sleeper", "g", "sleep");
        svc.args = vec!["30".to_string()];

        probe.start_service(&svc).await.unwrap();
        assert!(probe.is_service_running("sleeper").await.unwrap());
        let pid = probe.get_service_pid("sleeper").await.unwrap();
        assert!(pid.is_some());

        probe.stop_service(&svc).await.unwrap();
        assert!(!probe.is_service_running("sleeper").await.unwrap());
        assert!(!probe.pid_path("sleeper").exists());
    }
}

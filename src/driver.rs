use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{FleetError, ProcessErrorDetails};

pub const STATUS_RUNNING: &str = "running";
pub const STATUS_NOT_CREATED: &str = "not_created";

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status_code == 0
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }
}

pub trait VagrantRunner {
    fn run(&self, args: &[String], cwd: &Path) -> Result<CommandOutput, io::Error>;

    /// Executable name used when rendering a command for messages.
    fn program(&self) -> String {
        "vagrant".to_string()
    }
}

pub struct RealVagrantRunner {
    bin: PathBuf,
}

impl RealVagrantRunner {
    pub fn new(bin: &Path) -> Self {
        Self {
            bin: bin.to_path_buf(),
        }
    }
}

impl VagrantRunner for RealVagrantRunner {
    fn run(&self, args: &[String], cwd: &Path) -> Result<CommandOutput, io::Error> {
        let output = Command::new(&self.bin)
            .args(args)
            .current_dir(cwd)
            .env("VAGRANT_NO_COLOR", "1")
            .output()?;
        let status_code = output
            .status
            .code()
            .unwrap_or(if output.status.success() { 0 } else { 1 });
        Ok(CommandOutput {
            status_code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    fn program(&self) -> String {
        self.bin
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "vagrant".to_string())
    }
}

/// SSH coordinates as reported by `vagrant ssh-config`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionInfo {
    pub host: Option<String>,
    pub address: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub identity_file: Option<String>,
}

/// Thin wrapper over the vagrant CLI. Every call runs in the project directory
/// and any non-zero exit is a hard failure; nothing is retried.
pub struct Vagrant<R: VagrantRunner> {
    runner: R,
    cwd: PathBuf,
}

impl<R: VagrantRunner> Vagrant<R> {
    pub fn new(runner: R, cwd: &Path) -> Self {
        Self {
            runner,
            cwd: cwd.to_path_buf(),
        }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn box_list(&self) -> Result<Vec<String>, FleetError> {
        let output = self.execute(&["box", "list"])?;
        Ok(parse_box_list(&output.stdout_text()))
    }

    pub fn has_box(&self, box_name: &str) -> Result<bool, FleetError> {
        Ok(self.box_list()?.iter().any(|name| name == box_name))
    }

    pub fn box_add(&self, box_name: &str, source: &str) -> Result<(), FleetError> {
        self.execute(&["box", "add", box_name, source])?;
        Ok(())
    }

    pub fn status(&self, canonical_name: &str) -> Result<String, FleetError> {
        let output = self.execute(&["status", canonical_name, "--machine-readable"])?;
        Ok(parse_machine_state(&output.stdout_text(), canonical_name)
            .unwrap_or_else(|| STATUS_NOT_CREATED.to_string()))
    }

    pub fn up(&self, canonical_name: &str) -> Result<(), FleetError> {
        self.execute(&["up", canonical_name])?;
        Ok(())
    }

    pub fn halt(&self, canonical_name: &str) -> Result<(), FleetError> {
        self.execute(&["halt", canonical_name])?;
        Ok(())
    }

    pub fn destroy(&self, canonical_name: &str) -> Result<(), FleetError> {
        self.execute(&["destroy", "--force", canonical_name])?;
        Ok(())
    }

    pub fn connection_info(&self, canonical_name: &str) -> Result<ConnectionInfo, FleetError> {
        let output = self.execute(&["ssh-config", canonical_name])?;
        Ok(parse_ssh_config(&output.stdout_text()))
    }

    fn execute(&self, args: &[&str]) -> Result<CommandOutput, FleetError> {
        let args: Vec<String> = args.iter().map(|arg| arg.to_string()).collect();
        let command = render_command(&self.runner.program(), &args);
        tracing::info!(command = %command, "running vagrant");
        let output = self.runner.run(&args, &self.cwd).map_err(|err| {
            let details = spawn_error_details(&err, &command);
            FleetError::ExternalToolFailure {
                message: format!("failed to run command `{command}`: {err}"),
                details,
            }
        })?;
        if !output.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let (error_code, hint) = classify_failure(&stderr);
            let mut message = format!(
                "command failed with status {} while running `{}`",
                output.status_code, command
            );
            if !stderr.is_empty() {
                message = format!("{message}: {stderr}");
            }
            if let Some(ref hint_message) = hint {
                message = format!("{message}\nHint: {hint_message}");
            }
            return Err(FleetError::ExternalToolFailure {
                message,
                details: ProcessErrorDetails {
                    error_code,
                    hint,
                    command: Some(command),
                    status_code: Some(output.status_code),
                    raw_stderr: if stderr.is_empty() { None } else { Some(stderr) },
                },
            });
        }
        Ok(output)
    }
}

pub fn render_command(program: &str, args: &[String]) -> String {
    fn shell_quote(part: &str) -> String {
        if part.is_empty() {
            return "\"\"".to_string();
        }
        if part.chars().any(|c| c.is_whitespace()) {
            return format!("\"{}\"", part.replace('"', "\\\""));
        }
        part.to_string()
    }
    let mut parts = Vec::with_capacity(args.len() + 1);
    parts.push(program.to_string());
    parts.extend(args.iter().map(|arg| shell_quote(arg)));
    parts.join(" ")
}

fn spawn_error_details(err: &io::Error, command: &str) -> ProcessErrorDetails {
    if err.kind() == io::ErrorKind::NotFound {
        return ProcessErrorDetails {
            error_code: "vagrant_not_found".to_string(),
            hint: Some(
                "Install Vagrant and ensure `vagrant` is on your PATH, or set VAGRANT_FLEET_VAGRANT_BIN."
                    .to_string(),
            ),
            command: Some(command.to_string()),
            status_code: None,
            raw_stderr: None,
        };
    }
    ProcessErrorDetails {
        error_code: "process_command_failed".to_string(),
        hint: None,
        command: Some(command.to_string()),
        status_code: None,
        raw_stderr: None,
    }
}

fn classify_failure(stderr: &str) -> (String, Option<String>) {
    let lower = stderr.to_lowercase();

    if lower.contains("another process is already executing an action on the machine") {
        return (
            "vagrant_machine_locked".to_string(),
            Some("Another vagrant process is operating on this machine; wait for it and retry.".to_string()),
        );
    }

    if lower.contains("could not be found") && lower.contains("box") {
        return (
            "vagrant_box_not_found".to_string(),
            Some("Check box_name/box_path, or add the box with `vagrant box add`.".to_string()),
        );
    }

    if lower.contains("vboxmanage") || (lower.contains("provider") && lower.contains("usable")) {
        return (
            "vagrant_provider_unavailable".to_string(),
            Some("The VirtualBox provider is not usable on this host. Check the VirtualBox installation.".to_string()),
        );
    }

    if lower.contains("not created") {
        return ("vagrant_machine_not_created".to_string(), None);
    }

    ("process_command_failed".to_string(), None)
}

/// `vagrant box list` prints `name (provider, version)` per box.
pub fn parse_box_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("There are no installed boxes"))
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

/// Picks the `state` record out of `--machine-readable` output:
/// `timestamp,target,type,data...`.
pub fn parse_machine_state(text: &str, target: &str) -> Option<String> {
    let mut fallback = None;
    for line in text.lines() {
        let fields: Vec<&str> = line.trim().splitn(4, ',').collect();
        if fields.len() < 4 || fields[2] != "state" {
            continue;
        }
        let state = fields[3].split(',').next().unwrap_or_default().trim().to_string();
        if fields[1] == target {
            return Some(state);
        }
        if fallback.is_none() {
            fallback = Some(state);
        }
    }
    fallback
}

pub fn parse_ssh_config(text: &str) -> ConnectionInfo {
    let mut info = ConnectionInfo::default();
    for line in text.lines() {
        let line = line.trim();
        let Some((key, value)) = line.split_once(char::is_whitespace) else {
            continue;
        };
        let value = value.trim().trim_matches('"').to_string();
        match key {
            "Host" if info.host.is_none() => info.host = Some(value),
            "HostName" if info.address.is_none() => info.address = Some(value),
            "User" if info.user.is_none() => info.user = Some(value),
            "Port" if info.port.is_none() => info.port = value.parse().ok(),
            "IdentityFile" if info.identity_file.is_none() => info.identity_file = Some(value),
            _ => {}
        }
    }
    info
}

use dirs::home_dir;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::FleetError;
use crate::lock::LockStrategy;

pub const WORKDIR_ENV: &str = "VAGRANT_FLEET_WORKDIR";
pub const VAGRANT_BIN_ENV: &str = "VAGRANT_FLEET_VAGRANT_BIN";

const DEFAULT_MEM_MB: u32 = 512;
const DEFAULT_CPUS: u32 = 1;
const DEFAULT_LOCK_POLL_MS: u64 = 250;

/// Files owned by one project directory. Everything the fleet touches lives here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkdirLayout {
    pub root: PathBuf,
    pub vagrantfile: PathBuf,
    pub state_file: PathBuf,
    pub lock_file: PathBuf,
    pub data_dir: PathBuf,
}

impl WorkdirLayout {
    pub fn for_dir(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            vagrantfile: root.join("Vagrantfile"),
            state_file: root.join("Vagrantfile.json"),
            lock_file: root.join(".vagrant-fleet.lock"),
            data_dir: root.join(".vagrant"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub layout: WorkdirLayout,
    pub vagrant_bin: PathBuf,
    pub lock_strategy: LockStrategy,
    pub lock_poll: Duration,
    pub legacy_halt_changed: bool,
}

impl Settings {
    pub fn for_dir(root: &Path) -> Self {
        Self {
            layout: WorkdirLayout::for_dir(root),
            vagrant_bin: PathBuf::from("vagrant"),
            lock_strategy: LockStrategy::Auto,
            lock_poll: Duration::from_millis(DEFAULT_LOCK_POLL_MS),
            legacy_halt_changed: false,
        }
    }
}

pub fn resolve_workdir(override_path: Option<&PathBuf>) -> Result<PathBuf, FleetError> {
    if let Some(path) = override_path {
        return Ok(path.clone());
    }
    if let Ok(path) = env::var(WORKDIR_ENV) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(expand_path(&path)));
        }
    }
    Ok(env::current_dir()?)
}

pub fn resolve_vagrant_bin(override_path: Option<&PathBuf>) -> PathBuf {
    if let Some(path) = override_path {
        return path.clone();
    }
    if let Ok(path) = env::var(VAGRANT_BIN_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(expand_path(&path));
        }
    }
    which::which("vagrant").unwrap_or_else(|_| PathBuf::from("vagrant"))
}

pub fn expand_path(input: &str) -> String {
    if let Some(stripped) = input.strip_prefix("~/") {
        if let Some(home) = home_dir() {
            return home.join(stripped).to_string_lossy().to_string();
        }
    }
    input.to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Status,
    Up,
    Info,
    Halt,
    Destroy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DesiredState {
    Present,
    Absent,
}

impl DesiredState {
    fn operation(self) -> Operation {
        match self {
            DesiredState::Present => Operation::Up,
            DesiredState::Absent => Operation::Destroy,
        }
    }
}

/// Loosely typed scalar as orchestration tools tend to hand them over.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl Scalar {
    fn as_bool(&self, field: &str) -> Result<bool, FleetError> {
        match self {
            Scalar::Bool(value) => Ok(*value),
            Scalar::Int(value) => Ok(*value != 0),
            Scalar::Text(text) => parse_bool(text).ok_or_else(|| {
                FleetError::Config(format!("{field}: expected a boolean, got '{text}'"))
            }),
        }
    }

    fn as_positive_u32(&self, field: &str) -> Result<u32, FleetError> {
        let parsed = match self {
            Scalar::Int(value) => u32::try_from(*value).ok(),
            Scalar::Text(text) => text.trim().parse::<u32>().ok(),
            Scalar::Bool(_) => None,
        };
        match parsed {
            Some(value) if value > 0 => Ok(value),
            _ => Err(FleetError::Config(format!(
                "{field}: expected a positive integer, got {self:?}"
            ))),
        }
    }

    fn as_port(&self) -> Result<u16, FleetError> {
        let parsed = match self {
            Scalar::Int(value) => u16::try_from(*value).ok(),
            Scalar::Text(text) => text.trim().parse::<u16>().ok(),
            Scalar::Bool(_) => None,
        };
        match parsed {
            Some(port) if port > 0 => Ok(port),
            _ => Err(FleetError::Config(format!(
                "forward_ports: invalid port {self:?}"
            ))),
        }
    }
}

pub fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "yes" | "true" | "on" | "1" | "y" => Some(true),
        "no" | "false" | "off" | "0" | "n" | "" => Some(false),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum PortSpec {
    List(Vec<Scalar>),
    Single(Scalar),
}

impl PortSpec {
    fn ports(&self) -> Result<Vec<u16>, FleetError> {
        match self {
            PortSpec::List(items) => items.iter().map(Scalar::as_port).collect(),
            PortSpec::Single(Scalar::Text(text)) => text
                .split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(|part| Scalar::Text(part.to_string()).as_port())
                .collect(),
            PortSpec::Single(other) => Ok(vec![other.as_port()?]),
        }
    }
}

/// Raw invocation parameters, from an args file and/or command-line flags.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Params {
    pub state: Option<DesiredState>,
    pub cmd: Option<Operation>,
    pub box_name: Option<String>,
    pub box_path: Option<String>,
    pub vm_name: Option<String>,
    pub forward_ports: Option<PortSpec>,
    pub gui: Option<Scalar>,
    pub mem: Option<Scalar>,
    pub cpu: Option<Scalar>,
}

/// Settings applied uniformly to every VM block in the definition file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalOptions {
    pub gui: bool,
    pub mem_mb: u32,
    pub cpus: u32,
}

impl Default for GlobalOptions {
    fn default() -> Self {
        Self {
            gui: false,
            mem_mb: DEFAULT_MEM_MB,
            cpus: DEFAULT_CPUS,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub operation: Operation,
    pub vm_name: String,
    pub box_name: Option<String>,
    pub box_path: Option<String>,
    pub forward_ports: Vec<u16>,
    pub options: GlobalOptions,
}

impl Params {
    pub fn from_file(path: &Path) -> Result<Self, FleetError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, FleetError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Fields set in `other` win.
    pub fn overlay(mut self, other: Params) -> Self {
        self.state = other.state.or(self.state);
        self.cmd = other.cmd.or(self.cmd);
        self.box_name = other.box_name.or(self.box_name);
        self.box_path = other.box_path.or(self.box_path);
        self.vm_name = other.vm_name.or(self.vm_name);
        self.forward_ports = other.forward_ports.or(self.forward_ports);
        self.gui = other.gui.or(self.gui);
        self.mem = other.mem.or(self.mem);
        self.cpu = other.cpu.or(self.cpu);
        self
    }

    pub fn resolve(self) -> Result<Invocation, FleetError> {
        let operation = match (self.state, self.cmd) {
            (Some(_), Some(_)) => {
                return Err(FleetError::InvalidArgumentCombination(
                    "state and cmd are mutually exclusive".to_string(),
                ))
            }
            (Some(state), None) => state.operation(),
            (None, Some(cmd)) => cmd,
            (None, None) => Operation::Up,
        };

        let vm_name = self
            .vm_name
            .as_deref()
            .map(normalize_vm_name)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| FleetError::MissingRequiredInput("vm_name".to_string()))?;

        let forward_ports = match &self.forward_ports {
            Some(spec) => spec.ports()?,
            None => Vec::new(),
        };

        let mut options = GlobalOptions::default();
        if let Some(gui) = &self.gui {
            options.gui = gui.as_bool("gui")?;
        }
        if let Some(mem) = &self.mem {
            options.mem_mb = mem.as_positive_u32("mem")?;
        }
        if let Some(cpu) = &self.cpu {
            options.cpus = cpu.as_positive_u32("cpu")?;
        }

        Ok(Invocation {
            operation,
            vm_name,
            box_name: non_empty(self.box_name),
            box_path: non_empty(self.box_path).map(|path| expand_path(&path)),
            forward_ports,
            options,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Drops a trailing `.ext` from an inventory name: `web-01.local` -> `web-01`.
pub fn normalize_vm_name(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.rfind('.') {
        Some(idx) if idx > 0 => trimmed[..idx].to_string(),
        _ => trimmed.to_string(),
    }
}

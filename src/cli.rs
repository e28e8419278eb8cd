use clap::Parser;
use std::path::PathBuf;

use crate::config::{
    resolve_vagrant_bin, resolve_workdir, DesiredState, Operation, Params, PortSpec, Scalar,
    Settings,
};
use crate::error::FleetError;
use crate::lock::LockStrategy;

#[derive(Parser, Debug)]
#[command(
    name = "vagrant-fleet",
    version,
    about = "Converge a shared multi-VM Vagrantfile, one machine per invocation"
)]
pub struct Cli {
    /// YAML or JSON file with invocation parameters. Flags override its values.
    #[arg(value_name = "ARGS_FILE")]
    pub args_file: Option<PathBuf>,
    #[arg(long, value_enum)]
    pub state: Option<DesiredState>,
    #[arg(long, value_enum)]
    pub cmd: Option<Operation>,
    #[arg(long)]
    pub box_name: Option<String>,
    #[arg(long)]
    pub box_path: Option<String>,
    #[arg(long)]
    pub vm_name: Option<String>,
    #[arg(long, value_delimiter = ',')]
    pub forward_ports: Vec<u16>,
    /// Boolean as string: yes/no, true/false, 1/0.
    #[arg(long)]
    pub gui: Option<String>,
    #[arg(long)]
    pub mem: Option<u32>,
    #[arg(long)]
    pub cpu: Option<u32>,

    /// Project directory holding the Vagrantfile and state file.
    #[arg(long)]
    pub workdir: Option<PathBuf>,
    #[arg(long)]
    pub vagrant_bin: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = LockStrategy::Auto)]
    pub lock_strategy: LockStrategy,
    /// Report `changed: false` from halt even when a machine was stopped.
    #[arg(long)]
    pub legacy_halt_changed: bool,
    #[arg(long)]
    pub json: bool,
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    pub fn params(&self) -> Result<Params, FleetError> {
        let from_file = match &self.args_file {
            Some(path) => Params::from_file(path)?,
            None => Params::default(),
        };
        Ok(from_file.overlay(self.flag_params()))
    }

    fn flag_params(&self) -> Params {
        Params {
            state: self.state,
            cmd: self.cmd,
            box_name: self.box_name.clone(),
            box_path: self.box_path.clone(),
            vm_name: self.vm_name.clone(),
            forward_ports: if self.forward_ports.is_empty() {
                None
            } else {
                Some(PortSpec::List(
                    self.forward_ports
                        .iter()
                        .map(|port| Scalar::Int(i64::from(*port)))
                        .collect(),
                ))
            },
            gui: self.gui.clone().map(Scalar::Text),
            mem: self.mem.map(|mem| Scalar::Int(i64::from(mem))),
            cpu: self.cpu.map(|cpu| Scalar::Int(i64::from(cpu))),
        }
    }

    pub fn settings(&self) -> Result<Settings, FleetError> {
        let workdir = resolve_workdir(self.workdir.as_ref())?;
        let mut settings = Settings::for_dir(&workdir);
        settings.vagrant_bin = resolve_vagrant_bin(self.vagrant_bin.as_ref());
        settings.lock_strategy = self.lock_strategy;
        settings.legacy_halt_changed = self.legacy_halt_changed;
        Ok(settings)
    }
}

//! The five externally visible operations.
//!
//! Each one takes the workdir lock, reloads the registry from disk so sibling
//! invocations' changes are seen, does its work and, if it mutated anything,
//! writes the state file and the Vagrantfile before the lock is released.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io;

use crate::config::{GlobalOptions, Invocation, Operation, Settings, WorkdirLayout};
use crate::driver::{ConnectionInfo, RealVagrantRunner, Vagrant, VagrantRunner, STATUS_RUNNING};
use crate::error::FleetError;
use crate::lock::{LockGuard, LockManager};
use crate::registry::{Instance, Registry};
use crate::store::{commit_all, remove_if_exists, RegistryStore};
use crate::vagrantfile;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OperationResult {
    pub changed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instances: Option<Vec<InstanceDetail>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ansible_facts: Option<AnsibleFacts>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceDetail {
    pub name: String,
    pub vagrant_name: String,
    pub id: Option<String>,
    pub public_ip: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub key: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnsibleFacts {
    pub ansible_ssh_host: Option<String>,
    pub ansible_ssh_port: Option<u16>,
    pub ansible_ssh_private_key_file: Option<String>,
}

/// Arguments of `up`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpRequest {
    pub vm_name: String,
    pub box_name: Option<String>,
    pub box_path: Option<String>,
    pub forward_ports: Vec<u16>,
}

pub struct Fleet<R: VagrantRunner> {
    layout: WorkdirLayout,
    lock: LockManager,
    store: RegistryStore,
    vagrant: Vagrant<R>,
    options: GlobalOptions,
    legacy_halt_changed: bool,
}

impl Fleet<RealVagrantRunner> {
    pub fn from_settings(settings: &Settings, options: GlobalOptions) -> Self {
        Fleet::new(settings, options, RealVagrantRunner::new(&settings.vagrant_bin))
    }
}

impl<R: VagrantRunner> Fleet<R> {
    pub fn new(settings: &Settings, options: GlobalOptions, runner: R) -> Self {
        let layout = settings.layout.clone();
        Self {
            lock: LockManager::new(&layout.lock_file, settings.lock_strategy, settings.lock_poll),
            store: RegistryStore::new(&layout.state_file),
            vagrant: Vagrant::new(runner, &layout.root),
            layout,
            options,
            legacy_halt_changed: settings.legacy_halt_changed,
        }
    }

    pub fn vagrant(&self) -> &Vagrant<R> {
        &self.vagrant
    }

    pub fn run(&self, invocation: &Invocation) -> Result<OperationResult, FleetError> {
        let name = invocation.vm_name.as_str();
        match invocation.operation {
            Operation::Status => self.status(name),
            Operation::Up => self.up(&UpRequest {
                vm_name: invocation.vm_name.clone(),
                box_name: invocation.box_name.clone(),
                box_path: invocation.box_path.clone(),
                forward_ports: invocation.forward_ports.clone(),
            }),
            Operation::Info => self.info(name),
            Operation::Halt => self.halt(name),
            Operation::Destroy => self.destroy(name),
        }
    }

    pub fn status(&self, vm_name: &str) -> Result<OperationResult, FleetError> {
        let (_guard, registry) = self.begin()?;
        let mut status = BTreeMap::new();
        if let Some(instance) = registry.get(vm_name) {
            let state = self.vagrant.status(instance.canonical_name())?;
            status.insert(instance.canonical_name().to_string(), state);
        }
        Ok(OperationResult {
            changed: false,
            status: Some(status),
            ..OperationResult::default()
        })
    }

    pub fn up(&self, request: &UpRequest) -> Result<OperationResult, FleetError> {
        let (_guard, mut registry) = self.begin()?;
        let mut changed = false;

        let existing_box = registry
            .get(&request.vm_name)
            .and_then(|inst| inst.box_name().map(str::to_string));
        let box_name = match (&existing_box, &request.box_name) {
            (Some(current), Some(requested)) if current != requested => {
                tracing::warn!(
                    name = %request.vm_name,
                    current = %current,
                    requested = %requested,
                    "box is fixed once assigned; ignoring requested box"
                );
                current.clone()
            }
            (Some(current), _) => current.clone(),
            (None, Some(requested)) => requested.clone(),
            (None, None) => return Err(FleetError::MissingRequiredInput("box_name".to_string())),
        };

        if !self.vagrant.has_box(&box_name)? {
            let source = request.box_path.as_deref().ok_or_else(|| {
                FleetError::InvalidArgumentCombination(format!(
                    "box '{box_name}' is not installed and no box_path was given"
                ))
            })?;
            tracing::info!(box_name = %box_name, source, "adding box");
            self.vagrant.box_add(&box_name, source)?;
            changed = true;
        }

        let (instance, created) = registry.get_or_create(&request.vm_name)?;
        instance.set_box_if_absent(&box_name);
        let ports_changed = instance.replace_forward_ports(&request.forward_ports);
        changed |= created || ports_changed;
        let canonical = instance.canonical_name().to_string();

        self.persist(&registry)?;

        let mut state = self.vagrant.status(&canonical)?;
        if state != STATUS_RUNNING {
            tracing::info!(name = %request.vm_name, from = %state, "starting machine");
            self.vagrant.up(&canonical)?;
            state = STATUS_RUNNING.to_string();
            changed = true;
        }
        let connection = self.vagrant.connection_info(&canonical)?;

        let instance = registry
            .get(&request.vm_name)
            .ok_or_else(|| FleetError::Config(format!("instance '{}' vanished", request.vm_name)))?;
        Ok(detail_result(changed, instance, state, Some(connection)))
    }

    pub fn info(&self, vm_name: &str) -> Result<OperationResult, FleetError> {
        let (_guard, registry) = self.begin()?;
        let Some(instance) = registry.get(vm_name) else {
            return Ok(OperationResult {
                changed: false,
                instances: Some(Vec::new()),
                ..OperationResult::default()
            });
        };
        let state = self.vagrant.status(instance.canonical_name())?;
        let connection = if state == STATUS_RUNNING {
            Some(self.vagrant.connection_info(instance.canonical_name())?)
        } else {
            None
        };
        Ok(detail_result(false, instance, state, connection))
    }

    pub fn halt(&self, vm_name: &str) -> Result<OperationResult, FleetError> {
        let (_guard, registry) = self.begin()?;
        let mut status = BTreeMap::new();
        let mut halted = false;
        if let Some(instance) = registry.get(vm_name) {
            let canonical = instance.canonical_name();
            if self.vagrant.status(canonical)? == STATUS_RUNNING {
                tracing::info!(name = vm_name, "halting machine");
                self.vagrant.halt(canonical)?;
                halted = true;
            }
            status.insert(canonical.to_string(), self.vagrant.status(canonical)?);
        }
        Ok(OperationResult {
            changed: halted && !self.legacy_halt_changed,
            status: Some(status),
            ..OperationResult::default()
        })
    }

    pub fn destroy(&self, vm_name: &str) -> Result<OperationResult, FleetError> {
        let (_guard, mut registry) = self.begin()?;
        let Some(instance) = registry.get(vm_name) else {
            return Ok(OperationResult::default());
        };
        let canonical = instance.canonical_name().to_string();
        if self.vagrant.status(&canonical)? == STATUS_RUNNING {
            tracing::info!(name = vm_name, "halting machine before destroy");
            self.vagrant.halt(&canonical)?;
        }
        self.vagrant.destroy(&canonical)?;
        registry.remove(vm_name);

        if registry.is_empty() {
            self.clean_workdir()?;
        } else {
            self.persist(&registry)?;
        }
        Ok(OperationResult {
            changed: true,
            ..OperationResult::default()
        })
    }

    fn begin(&self) -> Result<(LockGuard, Registry), FleetError> {
        let guard = self.lock.acquire()?;
        let registry = self.store.load()?;
        Ok((guard, registry))
    }

    /// Replaces the state file and the Vagrantfile together or not at all.
    fn persist(&self, registry: &Registry) -> Result<(), FleetError> {
        let state = self.store.stage(registry)?;
        let definition = vagrantfile::stage(&self.layout.vagrantfile, registry, &self.options)?;
        commit_all(vec![definition, state])?;
        tracing::debug!(
            instances = registry.instance_count(),
            "state file and vagrantfile written"
        );
        Ok(())
    }

    fn clean_workdir(&self) -> Result<(), FleetError> {
        tracing::info!(root = %self.layout.root.display(), "last instance removed, cleaning workdir");
        remove_if_exists(&self.layout.vagrantfile)?;
        self.store.remove()?;
        match fs::remove_dir_all(&self.layout.data_dir) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

fn detail_result(
    changed: bool,
    instance: &Instance,
    state: String,
    connection: Option<ConnectionInfo>,
) -> OperationResult {
    let connection = connection.unwrap_or_default();
    let facts = AnsibleFacts {
        ansible_ssh_host: connection.address.clone(),
        ansible_ssh_port: connection.port,
        ansible_ssh_private_key_file: connection.identity_file.clone(),
    };
    let detail = InstanceDetail {
        name: instance.logical_name().to_string(),
        vagrant_name: instance.canonical_name().to_string(),
        id: connection.host,
        public_ip: connection.address,
        port: connection.port,
        username: connection.user,
        key: connection.identity_file,
        status: state,
    };
    OperationResult {
        changed,
        instances: Some(vec![detail]),
        ansible_facts: Some(facts),
        status: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::tests::{ok_output, state_output, MockVagrantRunner};
    use crate::driver::CommandOutput;
    use crate::vagrantfile::tests::machine_blocks;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::tempdir;

    const TEST_LOCK_POLL: Duration = Duration::from_millis(10);

    const SSH_CONFIG: &str = "Host web_01\n  HostName 127.0.0.1\n  User vagrant\n  Port 2222\n  IdentityFile /keys/web_01\n";

    fn fleet(dir: &Path) -> Fleet<MockVagrantRunner> {
        let mut settings = Settings::for_dir(dir);
        settings.lock_poll = TEST_LOCK_POLL;
        Fleet::new(&settings, GlobalOptions::default(), MockVagrantRunner::default())
    }

    fn request(name: &str, ports: &[u16]) -> UpRequest {
        UpRequest {
            vm_name: name.to_string(),
            box_name: Some("ubuntu".to_string()),
            box_path: Some("https://boxes.example/ubuntu.box".to_string()),
            forward_ports: ports.to_vec(),
        }
    }

    /// Queues the replies one `up` needs when the box exists and the machine is off.
    fn queue_up_from_off(runner: &MockVagrantRunner, canonical: &str) {
        runner.push_stdout("ubuntu (virtualbox, 0)\n");
        runner.push_stdout(&state_output(canonical, "not_created"));
        runner.push_output(ok_output(""));
        runner.push_stdout(SSH_CONFIG);
    }

    #[test]
    fn up_registers_and_starts_new_machine() {
        let dir = tempdir().unwrap();
        let fleet = fleet(dir.path());
        queue_up_from_off(fleet.vagrant().runner(), "web_01");

        let result = fleet.up(&request("web-01", &[8080])).unwrap();
        assert!(result.changed);
        let detail = &result.instances.as_ref().unwrap()[0];
        assert_eq!(detail.name, "web-01");
        assert_eq!(detail.vagrant_name, "web_01");
        assert_eq!(detail.status, "running");
        assert_eq!(detail.port, Some(2222));
        let facts = result.ansible_facts.unwrap();
        assert_eq!(facts.ansible_ssh_host.as_deref(), Some("127.0.0.1"));
        assert_eq!(facts.ansible_ssh_private_key_file.as_deref(), Some("/keys/web_01"));

        let runner = fleet.vagrant().runner();
        assert_eq!(runner.calls_to("up"), vec![vec!["up".to_string(), "web_01".to_string()]]);
        assert!(runner.calls_to("box").iter().all(|args| args[1] == "list"));

        let layout = WorkdirLayout::for_dir(dir.path());
        let registry = RegistryStore::new(&layout.state_file).load().unwrap();
        assert_eq!(registry.get("web-01").unwrap().forward_ports(), &[8080]);
        assert!(!layout.lock_file.exists());
    }

    #[test]
    fn up_is_idempotent_when_running() {
        let dir = tempdir().unwrap();
        let fleet = fleet(dir.path());
        queue_up_from_off(fleet.vagrant().runner(), "web_01");
        fleet.up(&request("web-01", &[8080])).unwrap();

        let runner = fleet.vagrant().runner();
        runner.push_stdout("ubuntu (virtualbox, 0)\n");
        runner.push_stdout(&state_output("web_01", "running"));
        runner.push_stdout(SSH_CONFIG);
        let second = fleet.up(&request("web-01", &[8080])).unwrap();

        assert!(!second.changed);
        assert_eq!(runner.calls_to("up").len(), 1);
    }

    #[test]
    fn up_adds_missing_box() {
        let dir = tempdir().unwrap();
        let fleet = fleet(dir.path());
        let runner = fleet.vagrant().runner();
        runner.push_stdout("There are no installed boxes! Use `vagrant box add` to add some.\n");
        runner.push_output(ok_output(""));
        runner.push_stdout(&state_output("web_01", "running"));
        runner.push_stdout(SSH_CONFIG);

        let result = fleet.up(&request("web-01", &[])).unwrap();
        assert!(result.changed);
        let adds: Vec<_> = runner
            .calls_to("box")
            .into_iter()
            .filter(|args| args[1] == "add")
            .collect();
        assert_eq!(
            adds,
            vec![vec![
                "box".to_string(),
                "add".to_string(),
                "ubuntu".to_string(),
                "https://boxes.example/ubuntu.box".to_string()
            ]]
        );
    }

    #[test]
    fn missing_box_without_path_is_rejected_before_any_write() {
        let dir = tempdir().unwrap();
        let fleet = fleet(dir.path());
        fleet.vagrant().runner().push_stdout("");
        let mut req = request("web-01", &[]);
        req.box_path = None;

        let err = fleet.up(&req).expect_err("no box path");
        assert!(matches!(err, FleetError::InvalidArgumentCombination(_)));
        let layout = WorkdirLayout::for_dir(dir.path());
        assert!(!layout.state_file.exists());
        assert!(!layout.vagrantfile.exists());
        assert!(!layout.lock_file.exists());
    }

    #[test]
    fn first_up_requires_box_name() {
        let dir = tempdir().unwrap();
        let fleet = fleet(dir.path());
        let mut req = request("web-01", &[]);
        req.box_name = None;
        let err = fleet.up(&req).expect_err("no box");
        assert!(matches!(err, FleetError::MissingRequiredInput(ref f) if f == "box_name"));
        assert!(fleet.vagrant().runner().calls().is_empty());
    }

    #[test]
    fn two_machines_share_one_vagrantfile() {
        let dir = tempdir().unwrap();
        let fleet = fleet(dir.path());
        queue_up_from_off(fleet.vagrant().runner(), "web_01");
        fleet.up(&request("web-01", &[8080])).unwrap();
        queue_up_from_off(fleet.vagrant().runner(), "db_01");
        fleet.up(&request("db-01", &[])).unwrap();

        let layout = WorkdirLayout::for_dir(dir.path());
        let registry = RegistryStore::new(&layout.state_file).load().unwrap();
        assert_eq!(registry.get("web-01").unwrap().internal_ip(), "192.168.179.254");
        assert_eq!(registry.get("db-01").unwrap().internal_ip(), "192.168.179.253");

        let text = fs::read_to_string(&layout.vagrantfile).unwrap();
        let blocks = machine_blocks(&text);
        assert_eq!(blocks.len(), registry.instances().count());
        for instance in registry.instances() {
            let (_, body) = blocks
                .iter()
                .find(|(label, _)| label == instance.canonical_name())
                .unwrap();
            assert!(body.contains(&format!("ip: \"{}\"", instance.internal_ip())));
            assert!(body.contains("vm.box = \"ubuntu\""));
            assert_eq!(
                body.matches(":forwarded_port").count(),
                instance.forward_ports().len()
            );
        }
    }

    #[test]
    fn later_box_name_is_ignored() {
        let dir = tempdir().unwrap();
        let fleet = fleet(dir.path());
        queue_up_from_off(fleet.vagrant().runner(), "web_01");
        fleet.up(&request("web-01", &[])).unwrap();

        let runner = fleet.vagrant().runner();
        runner.push_stdout("ubuntu (virtualbox, 0)\n");
        runner.push_stdout(&state_output("web_01", "running"));
        runner.push_stdout(SSH_CONFIG);
        let mut req = request("web-01", &[]);
        req.box_name = Some("debian".to_string());
        fleet.up(&req).unwrap();

        let layout = WorkdirLayout::for_dir(dir.path());
        let registry = RegistryStore::new(&layout.state_file).load().unwrap();
        assert_eq!(registry.get("web-01").unwrap().box_name(), Some("ubuntu"));
    }

    #[test]
    fn status_of_unknown_machine_is_empty() {
        let dir = tempdir().unwrap();
        let fleet = fleet(dir.path());
        let result = fleet.status("web-01").unwrap();
        assert!(!result.changed);
        assert!(result.status.unwrap().is_empty());
        assert!(fleet.vagrant().runner().calls().is_empty());
    }

    #[test]
    fn info_does_not_start_anything() {
        let dir = tempdir().unwrap();
        let fleet = fleet(dir.path());
        queue_up_from_off(fleet.vagrant().runner(), "web_01");
        fleet.up(&request("web-01", &[])).unwrap();

        let runner = fleet.vagrant().runner();
        runner.push_stdout(&state_output("web_01", "poweroff"));
        let result = fleet.info("web-01").unwrap();
        assert!(!result.changed);
        let detail = &result.instances.unwrap()[0];
        assert_eq!(detail.status, "poweroff");
        assert_eq!(detail.public_ip, None);
        assert_eq!(runner.calls_to("up").len(), 1);
        assert_eq!(runner.calls_to("ssh-config").len(), 1);
    }

    #[test]
    fn halt_reports_true_transition() {
        let dir = tempdir().unwrap();
        let fleet = fleet(dir.path());
        queue_up_from_off(fleet.vagrant().runner(), "web_01");
        fleet.up(&request("web-01", &[])).unwrap();

        let runner = fleet.vagrant().runner();
        runner.push_stdout(&state_output("web_01", "running"));
        runner.push_output(ok_output(""));
        runner.push_stdout(&state_output("web_01", "poweroff"));
        let result = fleet.halt("web-01").unwrap();
        assert!(result.changed);
        assert_eq!(result.status.unwrap()["web_01"], "poweroff");

        runner.push_stdout(&state_output("web_01", "poweroff"));
        runner.push_stdout(&state_output("web_01", "poweroff"));
        let again = fleet.halt("web-01").unwrap();
        assert!(!again.changed);
        assert_eq!(runner.calls_to("halt").len(), 1);
    }

    #[test]
    fn legacy_halt_never_reports_change() {
        let dir = tempdir().unwrap();
        let mut settings = Settings::for_dir(dir.path());
        settings.legacy_halt_changed = true;
        let fleet = Fleet::new(&settings, GlobalOptions::default(), MockVagrantRunner::default());
        queue_up_from_off(fleet.vagrant().runner(), "web_01");
        fleet.up(&request("web-01", &[])).unwrap();

        let runner = fleet.vagrant().runner();
        runner.push_stdout(&state_output("web_01", "running"));
        runner.push_output(ok_output(""));
        runner.push_stdout(&state_output("web_01", "poweroff"));
        let result = fleet.halt("web-01").unwrap();
        assert!(!result.changed);
        assert_eq!(runner.calls_to("halt").len(), 1);
    }

    #[test]
    fn destroying_last_machine_cleans_workdir() {
        let dir = tempdir().unwrap();
        let fleet = fleet(dir.path());
        queue_up_from_off(fleet.vagrant().runner(), "web_01");
        fleet.up(&request("web-01", &[8080])).unwrap();
        let layout = WorkdirLayout::for_dir(dir.path());
        fs::create_dir_all(layout.data_dir.join("machines")).unwrap();

        let runner = fleet.vagrant().runner();
        runner.push_stdout(&state_output("web_01", "running"));
        let result = fleet.destroy("web-01").unwrap();
        assert!(result.changed);
        assert_eq!(runner.calls_to("halt").len(), 1);
        assert_eq!(
            runner.calls_to("destroy"),
            vec![vec!["destroy".to_string(), "--force".to_string(), "web_01".to_string()]]
        );
        assert!(!layout.vagrantfile.exists());
        assert!(!layout.state_file.exists());
        assert!(!layout.data_dir.exists());

        let status = fleet.status("web-01").unwrap();
        assert!(status.status.unwrap().is_empty());
    }

    #[test]
    fn destroying_one_of_two_rewrites_files() {
        let dir = tempdir().unwrap();
        let fleet = fleet(dir.path());
        queue_up_from_off(fleet.vagrant().runner(), "web_01");
        fleet.up(&request("web-01", &[8080])).unwrap();
        queue_up_from_off(fleet.vagrant().runner(), "db_01");
        fleet.up(&request("db-01", &[])).unwrap();

        fleet
            .vagrant()
            .runner()
            .push_stdout(&state_output("web_01", "poweroff"));
        assert!(fleet.destroy("web-01").unwrap().changed);

        let layout = WorkdirLayout::for_dir(dir.path());
        let registry = RegistryStore::new(&layout.state_file).load().unwrap();
        assert_eq!(registry.instance_count(), 1);
        assert!(registry.contains("db-01"));
        let text = fs::read_to_string(&layout.vagrantfile).unwrap();
        let blocks = machine_blocks(&text);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].0, "db_01");
    }

    #[test]
    fn destroy_unknown_is_unchanged() {
        let dir = tempdir().unwrap();
        let fleet = fleet(dir.path());
        let result = fleet.destroy("ghost").unwrap();
        assert!(!result.changed);
        assert!(fleet.vagrant().runner().calls().is_empty());
    }

    #[test]
    fn failed_start_still_releases_lock() {
        let dir = tempdir().unwrap();
        let fleet = fleet(dir.path());
        let runner = fleet.vagrant().runner();
        runner.push_stdout("ubuntu (virtualbox, 0)\n");
        runner.push_stdout(&state_output("web_01", "not_created"));
        runner.push_output(CommandOutput {
            status_code: 1,
            stdout: Vec::new(),
            stderr: b"VBoxManage: error: something broke".to_vec(),
        });

        let err = fleet.up(&request("web-01", &[])).expect_err("up fails");
        let details = err.process_details().unwrap();
        assert_eq!(details.error_code, "vagrant_provider_unavailable");
        assert_eq!(details.command.as_deref(), Some("vagrant up web_01"));
        assert!(!WorkdirLayout::for_dir(dir.path()).lock_file.exists());
    }

    #[test]
    fn unwritable_vagrantfile_leaves_state_untouched() {
        let dir = tempdir().unwrap();
        let layout = WorkdirLayout::for_dir(dir.path());
        let fleet = fleet(dir.path());
        queue_up_from_off(fleet.vagrant().runner(), "web_01");
        fleet.up(&request("web-01", &[8080])).unwrap();
        let before = fs::read_to_string(&layout.state_file).unwrap();

        fs::remove_file(&layout.vagrantfile).unwrap();
        fs::create_dir(&layout.vagrantfile).unwrap();
        fleet.vagrant().runner().push_stdout("ubuntu (virtualbox, 0)\n");
        fleet.up(&request("db-01", &[])).expect_err("vagrantfile blocked");

        assert_eq!(fs::read_to_string(&layout.state_file).unwrap(), before);
        assert!(!layout.lock_file.exists());
    }

    #[test]
    fn first_up_with_blocked_vagrantfile_writes_nothing() {
        let dir = tempdir().unwrap();
        let layout = WorkdirLayout::for_dir(dir.path());
        fs::create_dir(&layout.vagrantfile).unwrap();
        let fleet = fleet(dir.path());
        fleet.vagrant().runner().push_stdout("ubuntu (virtualbox, 0)\n");
        fleet.up(&request("web-01", &[])).expect_err("vagrantfile blocked");
        assert!(!layout.state_file.exists());
        assert!(fleet.vagrant().runner().calls_to("up").is_empty());
    }

    #[test]
    fn malformed_state_aborts() {
        let dir = tempdir().unwrap();
        let layout = WorkdirLayout::for_dir(dir.path());
        fs::write(&layout.state_file, "[1, 2").unwrap();
        let fleet = fleet(dir.path());
        let err = fleet.status("web-01").expect_err("malformed");
        assert!(matches!(err, FleetError::MalformedState { .. }));
        assert_eq!(fs::read_to_string(&layout.state_file).unwrap(), "[1, 2");
    }
}

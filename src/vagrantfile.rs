use std::fmt::Write as _;
use std::path::Path;

use crate::config::GlobalOptions;
use crate::error::FleetError;
use crate::registry::{Instance, Registry};
use crate::store::StagedFile;

const HEADER: &str = "# -*- mode: ruby -*-
# vi: set ft=ruby :
#
# Generated by vagrant-fleet. Rewritten on every change; do not edit.

Vagrant.configure(\"2\") do |config|
";

const TRAILER: &str = "end\n";

/// Renders the whole Vagrantfile for `registry`. Machines appear in logical-name order.
pub fn render(registry: &Registry, options: &GlobalOptions) -> String {
    let mut out = String::from(HEADER);
    for instance in registry.instances() {
        out.push('\n');
        out.push_str(&render_machine(instance, options));
    }
    out.push_str(TRAILER);
    out
}

fn render_machine(instance: &Instance, options: &GlobalOptions) -> String {
    let label = instance.canonical_name();
    let cfg = format!("{label}_config");
    let mut block = String::new();

    let _ = writeln!(block, "  config.vm.define :{label} do |{cfg}|");
    if let Some(box_name) = instance.box_name() {
        let _ = writeln!(block, "    {cfg}.vm.box = \"{}\"", ruby_escape(box_name));
    }
    let _ = writeln!(
        block,
        "    {cfg}.vm.hostname = \"{}\"",
        ruby_escape(instance.logical_name())
    );
    let _ = writeln!(
        block,
        "    {cfg}.vm.network :private_network, ip: \"{}\"",
        instance.internal_ip()
    );
    block.push_str(&render_forward_ports(&cfg, instance.forward_ports()));
    let _ = writeln!(block, "    {cfg}.vm.provider :virtualbox do |vb|");
    let _ = writeln!(
        block,
        "      vb.customize [\"modifyvm\", :id, \"--nicpromisc2\", \"allow-all\"]"
    );
    let _ = writeln!(
        block,
        "      vb.customize [\"modifyvm\", :id, \"--nicpromisc3\", \"allow-all\"]"
    );
    if options.gui {
        let _ = writeln!(block, "      vb.gui = true");
    }
    let _ = writeln!(block, "      vb.memory = {}", options.mem_mb);
    let _ = writeln!(block, "      vb.cpus = {}", options.cpus);
    let _ = writeln!(block, "    end");
    let _ = writeln!(block, "  end");
    block
}

/// Host port equals guest port. No ports renders as nothing.
fn render_forward_ports(cfg: &str, ports: &[u16]) -> String {
    ports
        .iter()
        .map(|port| {
            format!("    {cfg}.vm.network :forwarded_port, guest: {port}, host: {port}\n")
        })
        .collect()
}

fn ruby_escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Stages a fresh rendering next to `path`; committing it overwrites the file in full.
pub fn stage(path: &Path, registry: &Registry, options: &GlobalOptions) -> Result<StagedFile, FleetError> {
    let staged = StagedFile::new(path, &render(registry, options))?;
    tracing::debug!(
        path = %path.display(),
        machines = registry.instance_count(),
        "vagrantfile rendered"
    );
    Ok(staged)
}

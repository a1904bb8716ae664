//! Translation of a [`ContainerDescriptor`] into engine `run` arguments.

use std::ffi::OsString;

use crate::descriptor::{
    ContainerDescriptor, MountIntent, NetworkPolicy, SecurityRelaxation, UserMapping,
};

/// Propagation applied to every bind mount.
///
/// Mounts the worker creates inside its own namespaces must not propagate
/// back into the host.
const BIND_PROPAGATION: &str = "rslave";

/// Loopback address used for published ports.
const PUBLISH_ADDRESS: &str = "127.0.0.1";

/// Builds the argument vector for `<engine> run`, excluding the program.
///
/// The result depends only on its inputs; the same descriptor always
/// produces the same arguments.
#[must_use]
pub fn run_arguments(
    descriptor: &ContainerDescriptor,
    detach: bool,
    auto_remove: bool,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["run".into()];
    if detach {
        args.push("--detach".into());
    }
    if auto_remove {
        args.push("--rm".into());
    }
    push_pair(&mut args, "--name", descriptor.name().as_str());

    match descriptor.network() {
        NetworkPolicy::None => push_pair(&mut args, "--network", "none"),
        NetworkPolicy::IsolatedPrivate { network, publish } => {
            push_pair(&mut args, "--network", network);
            if let Some(port) = publish {
                push_pair(
                    &mut args,
                    "--publish",
                    &format!("{PUBLISH_ADDRESS}:{}:{}", port.host, port.container),
                );
            }
        }
    }

    for mount in descriptor.mounts() {
        push_pair(&mut args, "--mount", &mount_spec(mount));
    }
    for path in descriptor.tmpfs() {
        args.push("--tmpfs".into());
        args.push(path.as_os_str().to_owned());
    }
    for (key, value) in descriptor.env() {
        push_pair(&mut args, "--env", &format!("{key}={value}"));
    }

    push_pair(&mut args, "--cgroup-parent", descriptor.cgroup_parent().as_str());

    match descriptor.user() {
        UserMapping::Id { uid, gid: Some(gid) } => {
            push_pair(&mut args, "--user", &format!("{uid}:{gid}"));
        }
        UserMapping::Id { uid, gid: None } => push_pair(&mut args, "--user", &uid.to_string()),
        UserMapping::KeepId => push_pair(&mut args, "--userns", "keep-id"),
    }

    for relaxation in descriptor.security() {
        push_pair(&mut args, "--security-opt", security_option(*relaxation));
    }

    if let Some(entrypoint) = descriptor.entrypoint() {
        push_pair(&mut args, "--entrypoint", entrypoint);
    }
    args.push(descriptor.image().as_str().into());
    args.extend(descriptor.args().iter().map(OsString::from));
    args
}

fn push_pair(args: &mut Vec<OsString>, flag: &str, value: &str) {
    args.push(flag.into());
    args.push(value.into());
}

const fn security_option(relaxation: SecurityRelaxation) -> &'static str {
    match relaxation {
        SecurityRelaxation::SeccompUnconfined => "seccomp=unconfined",
        SecurityRelaxation::AppArmorUnconfined => "apparmor=unconfined",
    }
}

/// Renders the `--mount` value.
///
/// The engines split the value as CSV, so any field containing a comma or a
/// quote is wrapped in quotes with embedded quotes doubled.
fn mount_spec(mount: &MountIntent) -> String {
    let mut fields = vec![
        String::from("type=bind"),
        csv_field(&format!("source={}", mount.host_path().display())),
        csv_field(&format!("target={}", mount.container_path().display())),
        format!("bind-propagation={BIND_PROPAGATION}"),
    ];
    if mount.is_read_only() {
        fields.push(String::from("readonly"));
    }
    fields.join(",")
}

fn csv_field(field: &str) -> String {
    if field.contains([',', '"']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_owned()
    }
}

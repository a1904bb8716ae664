//! Crate-level unit and behavioural tests.


use std::collections::HashSet;
use std::io;
use std::path::PathBuf;
use std::thread;

use mockall::mock;
use pernosco_config::EngineKind;
use rstest::{fixture, rstest};

use crate::testing::{EngineCall, FakeEngine, SharedBuffer};
use crate::{
    BACKTRACE_VARIABLE, CGROUP_V1_PARENT, CGROUP_V2_PARENT, CancellationToken, CgroupParent,
    Composer, ContainerDescriptor, ContainerEngine, ContainerError, ContainerHandle, ContainerName,
    DescriptorError, DockerProber, EngineError, ImageReference, Launch, LaunchOptions, Launcher,
    LogRouter, LogStream, MountIntent, NetworkPolicy, PodmanProber, ProcessOutcome, SCRATCH_PATH,
    Supervisor, SystemInfoProber, UserMapping, WorkerRequest, compose_descriptor,
    ensure_network_exists, probe_cgroup_parent, run_arguments, run_to_completion,
};

mock! {
    Engine {}
    impl ContainerEngine for Engine {
        fn kind(&self) -> EngineKind;
        fn system_info(&self, template: &str) -> Result<String, EngineError>;
        fn network_exists(&self, name: &str) -> Result<bool, EngineError>;
        fn create_internal_network(&self, name: &str) -> Result<(), EngineError>;
        fn run_detached(
            &self,
            descriptor: &ContainerDescriptor,
            auto_remove: bool,
        ) -> Result<ContainerHandle, EngineError>;
        fn run_foreground(
            &self,
            descriptor: &ContainerDescriptor,
            auto_remove: bool,
        ) -> Result<Vec<u8>, EngineError>;
        fn follow_logs(&self, handle: &ContainerHandle) -> Result<LogStream, EngineError>;
        fn wait(&self, handle: &ContainerHandle) -> Result<i32, EngineError>;
        fn stop(&self, handle: &ContainerHandle) -> Result<(), EngineError>;
        fn remove(&self, handle: &ContainerHandle) -> Result<(), EngineError>;
        fn address(&self, handle: &ContainerHandle, network: &str) -> Result<String, EngineError>;
    }
}

fn template_error() -> EngineError {
    EngineError::failed("podman info", Some(125), b"template: can't evaluate field")
}

/// Mock engine answering `info` templates from `answers` in order.
fn engine_answering(kind: EngineKind, answers: Vec<Result<String, EngineError>>) -> MockEngine {
    let mut engine = MockEngine::new();
    engine.expect_kind().return_const(kind);
    let mut remaining = answers.into_iter();
    engine
        .expect_system_info()
        .returning(move |_| remaining.next().unwrap_or_else(|| Err(template_error())));
    engine
}

#[fixture]
fn trace_dir() -> PathBuf {
    PathBuf::from("/home/op/.local/share/rr/latest-trace")
}

fn request(network: NetworkPolicy) -> WorkerRequest {
    WorkerRequest::new(
        ImageReference::new("pernosco/appserver:0123"),
        "pernosco-test",
        UserMapping::id(1000, Some(1000)),
    )
    .network(network)
}

fn descriptor(engine: &FakeEngine) -> ContainerDescriptor {
    Composer::new(engine)
        .compose(request(NetworkPolicy::None).arg("/trace"))
        .expect("compose")
}

// ---------------------------------------------------------------------------
// Capability probe
// ---------------------------------------------------------------------------

#[rstest]
#[case("2", CGROUP_V2_PARENT)]
#[case("1", CGROUP_V1_PARENT)]
fn docker_probe_selects_parent(#[case] reported: &str, #[case] expected: &str) {
    let engine = engine_answering(EngineKind::Docker, vec![Ok(reported.to_owned())]);
    let parent = probe_cgroup_parent(&engine, &DockerProber).expect("probe");
    assert_eq!(parent, CgroupParent::new(expected));
}

#[test]
fn unknown_cgroups_version_is_unsupported() {
    let engine = engine_answering(EngineKind::Docker, vec![Ok(String::from("3"))]);
    let err = probe_cgroup_parent(&engine, &DockerProber).expect_err("version 3 is unknown");
    assert!(matches!(
        err,
        ContainerError::UnsupportedRuntime {
            engine: EngineKind::Docker,
            ..
        }
    ));
}

#[rstest]
#[case::first_field_fails(vec![Err(template_error()), Ok(String::from("v2"))], CGROUP_V2_PARENT)]
#[case::first_field_absent(vec![Ok(String::from("<no value>")), Ok(String::from("v1"))], CGROUP_V1_PARENT)]
#[case::first_field_answers(vec![Ok(String::from("v2"))], CGROUP_V2_PARENT)]
fn podman_probe_falls_back_between_spellings(
    #[case] answers: Vec<Result<String, EngineError>>,
    #[case] expected: &str,
) {
    let engine = engine_answering(EngineKind::Podman, answers);
    let parent = probe_cgroup_parent(&engine, &PodmanProber).expect("probe");
    assert_eq!(parent.as_str(), expected);
}

#[test]
fn podman_probe_does_not_fall_back_past_an_unknown_value() {
    let engine = engine_answering(
        EngineKind::Podman,
        vec![Ok(String::from("v9")), Ok(String::from("v2"))],
    );
    assert!(PodmanProber.cgroups_version(&engine).is_err());
}

#[test]
fn exhausted_templates_report_the_last_engine_failure() {
    let engine = engine_answering(EngineKind::Podman, Vec::new());
    let err = PodmanProber
        .cgroups_version(&engine)
        .expect_err("no template answered");
    assert!(err.to_string().contains("can't evaluate field"));
}

// ---------------------------------------------------------------------------
// Composition
// ---------------------------------------------------------------------------

#[rstest]
fn mounts_keep_their_requested_mode(trace_dir: PathBuf) {
    let composed = compose_descriptor(
        request(NetworkPolicy::None)
            .mount(MountIntent::read_only(&trace_dir, &trace_dir))
            .mount(MountIntent::read_write("/srv/storage", "/srv/storage")),
        ContainerName::new("c"),
        CgroupParent::new(CGROUP_V2_PARENT),
    )
    .expect("compose");

    let modes: Vec<bool> = composed.mounts().iter().map(MountIntent::is_read_only).collect();
    assert_eq!(modes, [true, false]);

    let args: Vec<String> = run_arguments(&composed, true, false)
        .iter()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect();
    let mount_values: Vec<&String> = args
        .iter()
        .filter(|arg| arg.starts_with("type=bind"))
        .collect();
    let [trace, storage] = mount_values.as_slice() else {
        panic!("expected two mounts, got {mount_values:?}");
    };
    assert!(mount_values.iter().all(|value| value.contains("bind-propagation=rslave")));
    assert!(trace.ends_with(",readonly"));
    assert!(!storage.contains("readonly"));
}

#[test]
fn always_applies_fixed_confinement() {
    let composed = compose_descriptor(
        request(NetworkPolicy::None).log_filter("debug"),
        ContainerName::new("c"),
        CgroupParent::new(CGROUP_V1_PARENT),
    )
    .expect("compose");

    assert_eq!(composed.tmpfs(), [PathBuf::from(SCRATCH_PATH)]);
    assert_eq!(composed.env().get(BACKTRACE_VARIABLE).map(String::as_str), Some("full"));
    assert_eq!(composed.env().get("RUST_LOG").map(String::as_str), Some("debug"));
    assert_eq!(composed.security().len(), 2);
    assert_eq!(composed.cgroup_parent().as_str(), CGROUP_V1_PARENT);
}

#[test]
fn caller_environment_cannot_override_fixed_variables() {
    let composed = compose_descriptor(
        request(NetworkPolicy::None)
            .env(BACKTRACE_VARIABLE, "0")
            .env("RUST_LOG", "off")
            .env("RR_LOG", "all")
            .log_filter("debug"),
        ContainerName::new("c"),
        CgroupParent::new(CGROUP_V2_PARENT),
    )
    .expect("compose");

    assert_eq!(composed.env().get(BACKTRACE_VARIABLE).map(String::as_str), Some("full"));
    assert_eq!(composed.env().get("RUST_LOG").map(String::as_str), Some("debug"));
    assert_eq!(composed.env().get("RR_LOG").map(String::as_str), Some("all"));
}

#[rstest]
#[case::relative_source(
    MountIntent::read_only("relative/trace", "/trace"),
    DescriptorError::RelativeHostPath { path: PathBuf::from("relative/trace") }
)]
#[case::relative_target(
    MountIntent::read_only("/trace", "trace"),
    DescriptorError::RelativeContainerPath { path: PathBuf::from("trace") }
)]
#[case::shadows_scratch(
    MountIntent::read_write("/host/tmp", SCRATCH_PATH),
    DescriptorError::DuplicateContainerPath { path: PathBuf::from(SCRATCH_PATH) }
)]
fn rejects_invalid_mounts(#[case] mount: MountIntent, #[case] expected: DescriptorError) {
    let err = compose_descriptor(
        request(NetworkPolicy::None).mount(mount),
        ContainerName::new("c"),
        CgroupParent::new(CGROUP_V2_PARENT),
    )
    .expect_err("mount must be rejected");
    assert!(matches!(err, ContainerError::InvalidDescriptor(found) if found == expected));
}

#[rstest]
#[case("")]
#[case("A=B")]
fn rejects_malformed_environment_keys(#[case] key: &str) {
    let err = compose_descriptor(
        request(NetworkPolicy::None).env(key, "value"),
        ContainerName::new("c"),
        CgroupParent::new(CGROUP_V2_PARENT),
    )
    .expect_err("key must be rejected");
    assert!(matches!(
        err,
        ContainerError::InvalidDescriptor(DescriptorError::InvalidEnvironmentKey { .. })
    ));
}

#[test]
fn descriptor_requires_a_cgroup_parent() {
    let result = ContainerDescriptor::builder(
        ImageReference::new("img"),
        ContainerName::new("c"),
        UserMapping::KeepId,
    )
    .build();
    assert!(matches!(result, Err(DescriptorError::MissingCgroupParent { .. })));
}

#[rstest]
#[case("1000", UserMapping::id(1000, None))]
#[case("1000:1001", UserMapping::id(1000, Some(1001)))]
fn parses_user_mappings(#[case] text: &str, #[case] expected: UserMapping) {
    assert_eq!(text.parse::<UserMapping>().expect("parse"), expected);
}

#[rstest]
#[case("")]
#[case("root")]
#[case("1000:")]
#[case("1000:staff")]
fn rejects_malformed_user_mappings(#[case] text: &str) {
    assert!(text.parse::<UserMapping>().is_err());
}

#[test]
fn network_none_never_touches_networks() {
    let engine = FakeEngine::new(EngineKind::Docker);
    let composed = descriptor(&engine);

    assert_eq!(composed.network(), &NetworkPolicy::None);
    assert_eq!(
        engine.count(|call| matches!(
            call,
            EngineCall::NetworkExists(_) | EngineCall::CreateNetwork(_)
        )),
        0
    );
    let args: Vec<String> = run_arguments(&composed, true, false)
        .iter()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect();
    assert!(args.windows(2).any(|pair| pair == ["--network", "none"]));
}

#[test]
fn isolated_network_is_ensured_before_launch() {
    let engine = FakeEngine::new(EngineKind::Docker);
    let composed = Composer::new(&engine)
        .compose(request(NetworkPolicy::isolated("pernosco-isolated")))
        .expect("compose");
    Launcher::new(&engine).start(&composed).expect("start").cleanup();

    let calls = engine.calls();
    let created = calls
        .iter()
        .position(|call| call == &EngineCall::CreateNetwork(String::from("pernosco-isolated")))
        .expect("network created");
    let launched = calls
        .iter()
        .position(|call| matches!(call, EngineCall::RunDetached { .. }))
        .expect("container launched");
    assert!(created < launched);
}

#[test]
fn existing_network_is_reused() {
    let engine = FakeEngine::new(EngineKind::Podman).with_network("pernosco-isolated");
    ensure_network_exists(&engine, "pernosco-isolated").expect("ensure");
    assert_eq!(engine.count(|call| matches!(call, EngineCall::CreateNetwork(_))), 0);
}

#[test]
fn concurrent_network_setup_succeeds_for_every_caller() {
    let engine = FakeEngine::new(EngineKind::Docker);
    let results: Vec<Result<(), ContainerError>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| scope.spawn(|| ensure_network_exists(&engine, "pernosco-isolated")))
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("thread"))
            .collect()
    });
    assert!(results.iter().all(Result::is_ok), "{results:?}");
    assert!(engine.has_network("pernosco-isolated"));
}

#[test]
fn failed_network_creation_is_reported() {
    let engine = FakeEngine::new(EngineKind::Docker).failing_network_create("permission denied");
    let err = ensure_network_exists(&engine, "pernosco-isolated").expect_err("setup must fail");
    assert!(matches!(err, ContainerError::NetworkSetupFailed { .. }));
    assert!(err.to_string().contains("permission denied"));
}

#[test]
fn generated_names_do_not_collide() {
    let names: HashSet<String> = (0..10_000)
        .map(|_| ContainerName::generate("pernosco-build").to_string())
        .collect();
    assert_eq!(names.len(), 10_000);
    assert!(names.iter().all(|name| name.starts_with("pernosco-build-")));
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

#[test]
fn routes_error_lines_to_stderr_without_log_file() {
    let stdout = SharedBuffer::new();
    let stderr = SharedBuffer::new();
    let mut router = LogRouter::new(stdout.clone(), stderr.clone());
    for line in [&b"indexing\n"[..], b"ERROR: bad trace\n", b"done\n"] {
        router.route(line).expect("route");
    }
    assert_eq!(stdout.text(), "indexing\ndone\n");
    assert_eq!(stderr.text(), "ERROR: bad trace\n");
}

#[test]
fn log_file_receives_everything_and_stdout_stays_quiet() {
    let stdout = SharedBuffer::new();
    let stderr = SharedBuffer::new();
    let file = SharedBuffer::new();
    let mut router =
        LogRouter::new(stdout.clone(), stderr.clone()).with_log_file(Box::new(file.clone()));
    for line in [&b"indexing\n"[..], b"ERROR: bad trace\n"] {
        router.route(line).expect("route");
    }
    assert_eq!(stdout.text(), "");
    assert_eq!(stderr.text(), "ERROR: bad trace\n");
    assert_eq!(file.text(), "indexing\nERROR: bad trace\n");
}

#[test]
fn log_file_is_appended_to() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("worker.log");
    std::fs::write(&path, "earlier\n").expect("seed log");
    let file = crate::open_log_file(&path).expect("open");
    let mut router = LogRouter::new(io::sink(), io::sink()).with_log_file(Box::new(file));
    router.route(b"later").expect("route");
    drop(router);
    assert_eq!(std::fs::read_to_string(&path).expect("read"), "earlier\nlater\n");
}

// ---------------------------------------------------------------------------
// Supervision
// ---------------------------------------------------------------------------

fn supervise_with(engine: &FakeEngine, token: CancellationToken) -> Result<ProcessOutcome, ContainerError> {
    let composed = descriptor(engine);
    let router = LogRouter::new(SharedBuffer::new(), SharedBuffer::new());
    let mut supervisor = Supervisor::new(engine, router, token);
    run_to_completion(&Launcher::new(engine), &composed, &mut supervisor, |_, _| Ok(()))
}

fn removals(engine: &FakeEngine) -> usize {
    engine.count(|call| matches!(call, EngineCall::Remove(_)))
}

#[test]
fn worker_exit_code_is_propagated() {
    let engine = FakeEngine::new(EngineKind::Docker).with_exit_code(17);
    let outcome = supervise_with(&engine, CancellationToken::new()).expect("supervise");
    assert_eq!(outcome, ProcessOutcome::WorkerFailed { exit_code: 17 });
    assert_eq!(outcome.exit_status(), 17);
    assert_eq!(removals(&engine), 1);
}

#[test]
fn interrupt_stops_once_and_cleans_once() {
    let token = CancellationToken::new();
    let engine = FakeEngine::new(EngineKind::Docker)
        .with_log_lines(["step 1\n", "step 2\n"])
        .cancelling_on_eof(token.clone());
    let outcome = supervise_with(&engine, token).expect("supervise");

    assert_eq!(outcome, ProcessOutcome::Interrupted);
    assert_eq!(outcome.exit_status(), 130);
    assert_eq!(engine.count(|call| matches!(call, EngineCall::Stop(_))), 1);
    assert_eq!(engine.count(|call| matches!(call, EngineCall::Wait(_))), 0);
    assert_eq!(removals(&engine), 1);
}

#[test]
fn interrupt_while_following_stops_before_removing() {
    let token = CancellationToken::new();
    let engine = FakeEngine::new(EngineKind::Docker)
        .with_log_lines(["step 1\n"])
        .interrupted_mid_stream(token.clone());
    let outcome = supervise_with(&engine, token).expect("supervise");

    assert_eq!(outcome, ProcessOutcome::Interrupted);
    assert!(engine.stopped_while_following());
    let calls = engine.calls();
    let position = |wanted: fn(&EngineCall) -> bool| calls.iter().position(wanted).expect("call recorded");
    let follow = position(|call| matches!(call, EngineCall::FollowLogs(_)));
    let stop = position(|call| matches!(call, EngineCall::Stop(_)));
    let remove = position(|call| matches!(call, EngineCall::Remove(_)));
    assert!(follow < stop && stop < remove, "unexpected order: {calls:?}");
    assert_eq!(engine.count(|call| matches!(call, EngineCall::Stop(_))), 1);
    assert_eq!(engine.count(|call| matches!(call, EngineCall::Wait(_))), 0);
    assert_eq!(removals(&engine), 1);
}

#[test]
fn repeated_signals_still_stop_and_clean_up() {
    use signal_hook::consts::{SIGINT, SIGTERM};

    let token = CancellationToken::new();
    token.install_interrupt_handler().expect("install handlers");
    signal_hook::low_level::raise(SIGINT).expect("raise SIGINT");
    signal_hook::low_level::raise(SIGTERM).expect("raise SIGTERM");
    signal_hook::low_level::raise(SIGINT).expect("raise SIGINT again");
    assert!(token.is_cancelled());

    let engine = FakeEngine::new(EngineKind::Podman).with_log_lines(["never routed\n"]);
    let outcome = supervise_with(&engine, token).expect("supervise");

    assert_eq!(outcome.exit_status(), 130);
    assert_eq!(engine.count(|call| matches!(call, EngineCall::Stop(_))), 1);
    assert_eq!(removals(&engine), 1);
}

#[test]
fn already_raised_token_interrupts_immediately() {
    let token = CancellationToken::new();
    token.cancel();
    let engine = FakeEngine::new(EngineKind::Podman).with_log_lines(["never routed\n"]);
    let outcome = supervise_with(&engine, token).expect("supervise");
    assert_eq!(outcome, ProcessOutcome::Interrupted);
    assert_eq!(removals(&engine), 1);
}

#[test]
fn wait_failure_is_an_error_but_still_cleans_up() {
    let engine = FakeEngine::new(EngineKind::Docker).failing_wait("daemon went away");
    let err = supervise_with(&engine, CancellationToken::new()).expect_err("wait fails");
    assert!(matches!(err, ContainerError::WaitFailed { .. }));
    assert_eq!(removals(&engine), 1);
}

#[test]
fn launch_failure_carries_the_engine_diagnostic() {
    let engine = FakeEngine::new(EngineKind::Docker).failing_run("cgroup-parent not allowed");
    let err = supervise_with(&engine, CancellationToken::new()).expect_err("launch fails");
    assert!(matches!(err, ContainerError::LaunchFailed { .. }));
    assert!(err.to_string().contains("cgroup-parent not allowed"));
    assert_eq!(engine.count(|call| matches!(call, EngineCall::FollowLogs(_))), 0);
    assert_eq!(engine.count(|call| matches!(call, EngineCall::Stop(_))), 0);
}

#[test]
fn post_launch_hook_failure_still_cleans_up() {
    let engine = FakeEngine::new(EngineKind::Docker).with_address(None);
    let composed = Composer::new(&engine)
        .compose(request(NetworkPolicy::isolated("pernosco-isolated")))
        .expect("compose");
    let router = LogRouter::new(SharedBuffer::new(), SharedBuffer::new());
    let mut supervisor = Supervisor::new(&engine, router, CancellationToken::new());
    let err = run_to_completion(&Launcher::new(&engine), &composed, &mut supervisor, |handle, _| {
        engine
            .address(handle, "pernosco-isolated")
            .map(drop)
            .map_err(|source| ContainerError::Inspect {
                name: handle.name().to_owned(),
                source,
            })
    })
    .expect_err("inspection fails");

    assert!(matches!(err, ContainerError::Inspect { .. }));
    assert_eq!(engine.count(|call| matches!(call, EngineCall::FollowLogs(_))), 0);
    assert_eq!(removals(&engine), 1);
}

#[test]
fn foreground_runs_request_engine_side_removal() {
    let engine = FakeEngine::new(EngineKind::Docker).with_foreground_output(b"{\"files\":[]}");
    let composed = descriptor(&engine);
    let output = Launcher::new(&engine).run_captured(&composed).expect("run");
    assert_eq!(output, b"{\"files\":[]}");
    assert!(engine.calls().iter().any(|call| matches!(
        call,
        EngineCall::RunForeground {
            auto_remove: true,
            ..
        }
    )));
}

#[rstest]
#[case::detached_kept(LaunchOptions::default(), false)]
#[case::detached_auto_removed(LaunchOptions { detach: true, auto_remove: true }, true)]
fn detached_launches_honour_auto_remove(#[case] options: LaunchOptions, #[case] auto_remove: bool) {
    let engine = FakeEngine::new(EngineKind::Docker);
    let composed = descriptor(&engine);
    let launched = Launcher::new(&engine).launch(&composed, options).expect("launch");
    assert!(matches!(launched, Launch::Detached(ref handle) if handle.name() == composed.name().as_str()));
    assert!(engine.calls().contains(&EngineCall::RunDetached {
        name: composed.name().as_str().to_owned(),
        auto_remove,
    }));
}

#[test]
fn foreground_launch_returns_captured_output() {
    let engine = FakeEngine::new(EngineKind::Podman).with_foreground_output(b"manifest");
    let composed = descriptor(&engine);
    let options = LaunchOptions {
        detach: false,
        auto_remove: true,
    };
    let launched = Launcher::new(&engine).launch(&composed, options).expect("launch");
    assert_eq!(launched, Launch::Completed(b"manifest".to_vec()));
}

#[test]
fn refused_launch_discards_by_name_once() {
    let engine = FakeEngine::new(EngineKind::Docker).failing_run("port is already allocated");
    let composed = descriptor(&engine);
    let err = Launcher::new(&engine).start(&composed).expect_err("start fails");
    assert!(matches!(err, ContainerError::LaunchFailed { .. }));
    assert_eq!(
        engine.calls().last(),
        Some(&EngineCall::Remove(composed.name().as_str().to_owned()))
    );
    assert_eq!(removals(&engine), 1);
}

#[rstest]
#[case::docker(EngineKind::Docker, "Conflict. The container name \"/pernosco-x\" is already in use by container \"4f2\"")]
#[case::podman(EngineKind::Podman, "the container name \"pernosco-x\" is already in use by 4f2")]
fn name_conflict_leaves_the_other_container_alone(#[case] kind: EngineKind, #[case] stderr: &str) {
    let engine = FakeEngine::new(kind).failing_run(stderr);
    let composed = descriptor(&engine);
    let err = Launcher::new(&engine).start(&composed).expect_err("start fails");
    assert!(matches!(&err, ContainerError::LaunchFailed { source, .. } if source.is_name_conflict()));
    assert_eq!(removals(&engine), 0);
}

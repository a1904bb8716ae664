//! Test doubles for exercising the pipeline without a container engine.
//!
//! Enabled for this crate's own tests and, through the `test-support`
//! feature, for dependants' tests.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Cursor, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use pernosco_config::EngineKind;

use crate::cancel::CancellationToken;
use crate::descriptor::ContainerDescriptor;
use crate::engine::{ContainerEngine, ContainerHandle, LogStream};
use crate::error::EngineError;

/// One recorded engine request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    /// `info --format TEMPLATE`.
    SystemInfo(String),
    /// Network existence check.
    NetworkExists(String),
    /// `network create --internal NAME`.
    CreateNetwork(String),
    /// Detached `run`.
    RunDetached {
        /// Container name.
        name: String,
        /// Whether `--rm` was requested.
        auto_remove: bool,
    },
    /// Foreground `run`.
    RunForeground {
        /// Container name.
        name: String,
        /// Whether `--rm` was requested.
        auto_remove: bool,
    },
    /// `logs --follow NAME`.
    FollowLogs(String),
    /// `wait NAME`.
    Wait(String),
    /// `stop NAME`.
    Stop(String),
    /// `rm --force --volumes NAME`.
    Remove(String),
    /// Address lookup of NAME on NETWORK.
    Address {
        /// Container name.
        name: String,
        /// Network queried.
        network: String,
    },
}

#[derive(Debug)]
struct FakeState {
    calls: Vec<EngineCall>,
    launched: Vec<ContainerDescriptor>,
    info: BTreeMap<String, String>,
    networks: BTreeSet<String>,
    network_create_error: Option<String>,
    log_lines: Vec<Vec<u8>>,
    cancel_on_eof: Option<CancellationToken>,
    interrupt_mid_stream: Option<CancellationToken>,
    follower: FollowerState,
    stopped_while_following: bool,
    exit_code: Result<i32, String>,
    run_error: Option<String>,
    foreground_output: Vec<u8>,
    address: Option<String>,
}

/// Recording, scriptable [`ContainerEngine`].
#[derive(Debug)]
pub struct FakeEngine {
    kind: EngineKind,
    state: Mutex<FakeState>,
}

impl FakeEngine {
    /// Creates a fake reporting a unified cgroups hierarchy, with a worker
    /// that prints nothing and exits successfully.
    #[must_use]
    pub fn new(kind: EngineKind) -> Self {
        let template = match kind {
            EngineKind::Docker => "{{.CgroupVersion}}",
            EngineKind::Podman => "{{.Host.CgroupsVersion}}",
        };
        Self {
            kind,
            state: Mutex::new(FakeState {
                calls: Vec::new(),
                launched: Vec::new(),
                info: BTreeMap::from([(template.to_owned(), String::from("2"))]),
                networks: BTreeSet::new(),
                network_create_error: None,
                log_lines: Vec::new(),
                cancel_on_eof: None,
                interrupt_mid_stream: None,
                follower: FollowerState::default(),
                stopped_while_following: false,
                exit_code: Ok(0),
                run_error: None,
                foreground_output: Vec::new(),
                address: Some(String::from("172.18.0.2")),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: EngineCall) {
        self.state().calls.push(call);
    }

    /// Answers `info --format template` with `output`.
    #[must_use]
    pub fn with_info(self, template: &str, output: &str) -> Self {
        self.state().info.insert(template.to_owned(), output.to_owned());
        self
    }

    /// Makes `info --format template` fail.
    #[must_use]
    pub fn without_info(self, template: &str) -> Self {
        self.state().info.remove(template);
        self
    }

    /// Pre-creates a network.
    #[must_use]
    pub fn with_network(self, name: &str) -> Self {
        self.state().networks.insert(name.to_owned());
        self
    }

    /// Makes network creation fail with `message`.
    #[must_use]
    pub fn failing_network_create(self, message: &str) -> Self {
        self.state().network_create_error = Some(message.to_owned());
        self
    }

    /// Lines the worker prints before exiting.
    #[must_use]
    pub fn with_log_lines<I, S>(self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        self.state().log_lines = lines.into_iter().map(|line| line.as_ref().to_vec()).collect();
        self
    }

    /// Raises `token` once the worker's output has been fully read.
    #[must_use]
    pub fn cancelling_on_eof(self, token: CancellationToken) -> Self {
        self.state().cancel_on_eof = Some(token);
        self
    }

    /// Raises `token` after the worker's output has been read but keeps the
    /// follower open until the container is stopped.
    #[must_use]
    pub fn interrupted_mid_stream(self, token: CancellationToken) -> Self {
        self.state().interrupt_mid_stream = Some(token);
        self
    }

    /// Whether `stop` arrived while the log follower was still blocked.
    #[must_use]
    pub fn stopped_while_following(&self) -> bool {
        self.state().stopped_while_following
    }

    /// Exit code reported by `wait`.
    #[must_use]
    pub fn with_exit_code(self, exit_code: i32) -> Self {
        self.state().exit_code = Ok(exit_code);
        self
    }

    /// Makes `wait` fail with `message`.
    #[must_use]
    pub fn failing_wait(self, message: &str) -> Self {
        self.state().exit_code = Err(message.to_owned());
        self
    }

    /// Makes every `run` fail with `message`.
    #[must_use]
    pub fn failing_run(self, message: &str) -> Self {
        self.state().run_error = Some(message.to_owned());
        self
    }

    /// Standard output of foreground runs.
    #[must_use]
    pub fn with_foreground_output(self, output: &[u8]) -> Self {
        self.state().foreground_output = output.to_vec();
        self
    }

    /// Address reported for containers; `None` makes inspection fail.
    #[must_use]
    pub fn with_address(self, address: Option<&str>) -> Self {
        self.state().address = address.map(str::to_owned);
        self
    }

    /// Every request received so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<EngineCall> {
        self.state().calls.clone()
    }

    /// Number of recorded requests matching `predicate`.
    #[must_use]
    pub fn count(&self, predicate: impl Fn(&EngineCall) -> bool) -> usize {
        self.state().calls.iter().filter(|call| predicate(call)).count()
    }

    /// Descriptors handed to `run`, in order.
    #[must_use]
    pub fn launched(&self) -> Vec<ContainerDescriptor> {
        self.state().launched.clone()
    }

    /// Whether the network currently exists.
    #[must_use]
    pub fn has_network(&self, name: &str) -> bool {
        self.state().networks.contains(name)
    }

    fn run(&self, descriptor: &ContainerDescriptor, call: EngineCall) -> Result<(), EngineError> {
        let mut state = self.state();
        state.calls.push(call);
        if let Some(message) = state.run_error.clone() {
            return Err(fake_failure("run", &message));
        }
        state.launched.push(descriptor.clone());
        Ok(())
    }
}

fn fake_failure(command: &str, message: &str) -> EngineError {
    EngineError::failed(format!("fake {command}"), Some(125), message.as_bytes())
}

impl ContainerEngine for FakeEngine {
    fn kind(&self) -> EngineKind {
        self.kind
    }

    fn system_info(&self, template: &str) -> Result<String, EngineError> {
        self.record(EngineCall::SystemInfo(template.to_owned()));
        self.state()
            .info
            .get(template)
            .cloned()
            .ok_or_else(|| fake_failure("info", "template: can't evaluate field"))
    }

    fn network_exists(&self, name: &str) -> Result<bool, EngineError> {
        self.record(EngineCall::NetworkExists(name.to_owned()));
        Ok(self.has_network(name))
    }

    fn create_internal_network(&self, name: &str) -> Result<(), EngineError> {
        let mut state = self.state();
        state.calls.push(EngineCall::CreateNetwork(name.to_owned()));
        if let Some(message) = state.network_create_error.clone() {
            return Err(fake_failure("network create", &message));
        }
        if state.networks.insert(name.to_owned()) {
            Ok(())
        } else {
            Err(fake_failure("network create", "network with name already exists"))
        }
    }

    fn run_detached(
        &self,
        descriptor: &ContainerDescriptor,
        auto_remove: bool,
    ) -> Result<ContainerHandle, EngineError> {
        let name = descriptor.name().to_string();
        self.run(
            descriptor,
            EngineCall::RunDetached {
                name: name.clone(),
                auto_remove,
            },
        )?;
        Ok(ContainerHandle::new(name, Some(String::from("0123456789ab"))))
    }

    fn run_foreground(
        &self,
        descriptor: &ContainerDescriptor,
        auto_remove: bool,
    ) -> Result<Vec<u8>, EngineError> {
        self.run(
            descriptor,
            EngineCall::RunForeground {
                name: descriptor.name().to_string(),
                auto_remove,
            },
        )?;
        Ok(self.state().foreground_output.clone())
    }

    fn follow_logs(&self, handle: &ContainerHandle) -> Result<LogStream, EngineError> {
        let mut state = self.state();
        state.calls.push(EngineCall::FollowLogs(handle.name().to_owned()));
        let output = Cursor::new(state.log_lines.concat());
        let source: Box<dyn Read + Send> =
            match (state.interrupt_mid_stream.clone(), state.cancel_on_eof.clone()) {
                (Some(token), _) => Box::new(StallAfterOutput::new(output, token, state.follower.clone())),
                (None, Some(token)) => Box::new(CancelOnEof::new(output, token)),
                (None, None) => Box::new(output),
            };
        Ok(LogStream::from_readers(vec![source]))
    }

    fn wait(&self, handle: &ContainerHandle) -> Result<i32, EngineError> {
        self.record(EngineCall::Wait(handle.name().to_owned()));
        self.state()
            .exit_code
            .clone()
            .map_err(|message| fake_failure("wait", &message))
    }

    fn stop(&self, handle: &ContainerHandle) -> Result<(), EngineError> {
        let mut state = self.state();
        state.calls.push(EngineCall::Stop(handle.name().to_owned()));
        if state.follower.stalled.load(Ordering::SeqCst) {
            state.stopped_while_following = true;
        }
        state.follower.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn remove(&self, handle: &ContainerHandle) -> Result<(), EngineError> {
        self.record(EngineCall::Remove(handle.name().to_owned()));
        Ok(())
    }

    fn address(&self, handle: &ContainerHandle, network: &str) -> Result<String, EngineError> {
        self.record(EngineCall::Address {
            name: handle.name().to_owned(),
            network: network.to_owned(),
        });
        self.state()
            .address
            .clone()
            .ok_or_else(|| fake_failure("inspect", "no such container"))
    }
}

/// Reader that raises a token when its inner reader is exhausted.
#[derive(Debug)]
pub struct CancelOnEof<R> {
    inner: R,
    token: CancellationToken,
}

impl<R> CancelOnEof<R> {
    /// Wraps `inner`.
    #[must_use]
    pub const fn new(inner: R, token: CancellationToken) -> Self {
        Self { inner, token }
    }
}

impl<R: Read> Read for CancelOnEof<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.inner.read(buf)?;
        if read == 0 && !buf.is_empty() {
            self.token.cancel();
        }
        Ok(read)
    }
}

/// Flags shared between a stalled follower and the engine that stops it.
#[derive(Debug, Clone, Default)]
pub struct FollowerState {
    stalled: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
}

/// Upper bound on how long a stalled follower waits for `stop`.
const STALL_LIMIT: Duration = Duration::from_secs(10);

/// Reader that raises a token once its inner reader is exhausted, then
/// blocks like a live `logs --follow` until the container is stopped.
#[derive(Debug)]
pub struct StallAfterOutput<R> {
    inner: R,
    token: CancellationToken,
    follower: FollowerState,
}

impl<R> StallAfterOutput<R> {
    /// Wraps `inner`.
    #[must_use]
    pub const fn new(inner: R, token: CancellationToken, follower: FollowerState) -> Self {
        Self { inner, token, follower }
    }
}

impl<R: Read> Read for StallAfterOutput<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.inner.read(buf)?;
        if read > 0 || buf.is_empty() {
            return Ok(read);
        }
        self.follower.stalled.store(true, Ordering::SeqCst);
        self.token.cancel();
        let started = Instant::now();
        while !self.follower.stopped.load(Ordering::SeqCst) && started.elapsed() < STALL_LIMIT {
            thread::sleep(Duration::from_millis(5));
        }
        self.follower.stalled.store(false, Ordering::SeqCst);
        Ok(0)
    }
}

/// Cloneable in-memory sink.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far, lossily decoded.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes.lock().unwrap_or_else(PoisonError::into_inner)).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

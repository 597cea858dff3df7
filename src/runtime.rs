//! Engine runtime management: one isolated child process per declared
//! (engine, version), plus the blocking compile transport against it.
//!
//! # Ownership and teardown
//!
//! [`RuntimeContext`] owns every provisioned runtime. There is no global
//! registry and no exit hook: teardown is the context's `Drop` impl, which
//! kills and reaps each child, so every exit path of the owning scope —
//! normal completion, `?` propagation, panic unwinding — releases the
//! runtimes exactly once.
//!
//! # Transport protocol
//!
//! A compile request connects to the runtime's endpoint, writes the entire
//! input, half-closes the write side to signal end-of-input, and reads
//! until the server closes the connection. The accumulated bytes are the
//! raw output, success or error text undifferentiated. One request per
//! handle may be in flight at a time; a per-handle mutex enforces that.
//!
//! Sockets carry read/write timeouts so a hung engine surfaces as a
//! scoped [`CompatError::Transport`] instead of blocking its caller
//! forever.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use crate::catalog::TestId;
use crate::engines::{EngineRegistry, EngineVersionId, VersionConfig};
use crate::errors::{CompatError, Result};

/// Per-request socket deadline. Expiry is a transport failure scoped to
/// the single artifact being compiled.
pub const TRANSPORT_TIMEOUT: Duration = Duration::from_secs(120);

/// The seam between the build graph and the engine runtimes.
///
/// The production implementation is [`RuntimeContext`]; tests drive the
/// graph with scripted in-memory services instead.
pub trait CompileService: Sync {
    /// Compiles `input` (the source of `test`) on the runtime for `id`,
    /// returning the raw output bytes. Fails with a scoped transport
    /// error; never panics the run.
    fn compile(&self, id: &EngineVersionId, test: &TestId, input: &str) -> Result<Vec<u8>>;
}

#[derive(Debug)]
struct EngineRuntime {
    id: EngineVersionId,
    endpoint: String,
    child: Mutex<Child>,
    /// Serializes compile requests: the transport supports exactly one
    /// in-flight request per handle.
    session: Mutex<()>,
}

impl EngineRuntime {
    fn launch(id: EngineVersionId, config: &VersionConfig) -> Result<EngineRuntime> {
        let Some((program, args)) = config.command.split_first() else {
            return Err(CompatError::provision(
                &id.engine,
                &id.version,
                "empty launch command",
            ));
        };

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| {
                CompatError::provision(&id.engine, &id.version, format!("spawn failed: {e}"))
            })?;

        let runtime = EngineRuntime {
            id,
            endpoint: config.endpoint.clone(),
            child: Mutex::new(child),
            session: Mutex::new(()),
        };
        // On probe failure the runtime is dropped here, which reaps the
        // child before the error propagates.
        runtime.await_ready(config.ready_attempts, Duration::from_millis(config.ready_backoff_ms))?;
        Ok(runtime)
    }

    /// Readiness probe: bounded connect retries with fixed backoff. Also
    /// notices a child that died during startup instead of burning the
    /// whole retry budget against a dead endpoint.
    fn await_ready(&self, attempts: u32, backoff: Duration) -> Result<()> {
        for attempt in 0..attempts {
            if let Ok(mut child) = self.child.lock() {
                if let Ok(Some(status)) = child.try_wait() {
                    return Err(CompatError::provision(
                        &self.id.engine,
                        &self.id.version,
                        format!("runtime exited during startup: {status}"),
                    ));
                }
            }
            if TcpStream::connect(&self.endpoint).is_ok() {
                return Ok(());
            }
            if attempt + 1 < attempts {
                thread::sleep(backoff);
            }
        }
        Err(CompatError::provision(
            &self.id.engine,
            &self.id.version,
            format!(
                "endpoint {} unreachable after {} attempts",
                self.endpoint, attempts
            ),
        ))
    }

    fn compile(&self, test: &TestId, input: &str) -> Result<Vec<u8>> {
        let _session = self.session.lock().unwrap_or_else(|e| e.into_inner());
        request(&self.endpoint, &format!("{test} for {}", self.id), input)
    }
}

impl Drop for EngineRuntime {
    fn drop(&mut self) {
        if let Ok(mut child) = self.child.lock() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Maps a joined provisioning worker to its launch result, converting a
/// panic into a fatal error naming the engine version the worker owned.
fn launch_outcome(
    id: &EngineVersionId,
    joined: thread::Result<Result<EngineRuntime>>,
) -> Result<EngineRuntime> {
    match joined {
        Ok(result) => result,
        Err(_) => Err(CompatError::provision(
            &id.engine,
            &id.version,
            "provisioning worker panicked",
        )),
    }
}

/// One complete compile request over the minimal transport.
pub fn request(endpoint: &str, context: &str, input: &str) -> Result<Vec<u8>> {
    let fail = |reason: std::io::Error| CompatError::transport(context, reason);

    let mut stream = TcpStream::connect(endpoint).map_err(fail)?;
    stream.set_read_timeout(Some(TRANSPORT_TIMEOUT)).map_err(fail)?;
    stream.set_write_timeout(Some(TRANSPORT_TIMEOUT)).map_err(fail)?;
    stream.write_all(input.as_bytes()).map_err(fail)?;
    stream.shutdown(Shutdown::Write).map_err(fail)?;

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).map_err(fail)?;
    Ok(raw)
}

/// Owns every provisioned engine runtime for the lifetime of one build
/// run.
#[derive(Debug)]
pub struct RuntimeContext {
    runtimes: BTreeMap<EngineVersionId, EngineRuntime>,
}

impl RuntimeContext {
    /// Provisions every declared (engine, version) concurrently and blocks
    /// until all are ready.
    ///
    /// Any provisioning failure is fatal: runtimes that did come up are
    /// torn down when the partial context drops, and the first error
    /// propagates.
    pub fn provision_all(registry: &EngineRegistry) -> Result<RuntimeContext> {
        let launches: Vec<(EngineVersionId, &VersionConfig)> = registry.versions().collect();

        let results = thread::scope(|scope| {
            let workers: Vec<_> = launches
                .into_iter()
                .map(|(id, config)| {
                    let worker_id = id.clone();
                    (worker_id, scope.spawn(move || EngineRuntime::launch(id, config)))
                })
                .collect();
            workers
                .into_iter()
                .map(|(id, worker)| launch_outcome(&id, worker.join()))
                .collect::<Vec<_>>()
        });

        let mut runtimes = BTreeMap::new();
        let mut first_error = None;
        for result in results {
            match result {
                // Duplicate declarations resolve to the first launch; the
                // replaced runtime drops and is reaped immediately.
                Ok(runtime) => {
                    runtimes.entry(runtime.id.clone()).or_insert(runtime);
                }
                Err(e) => first_error = first_error.or(Some(e)),
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(RuntimeContext { runtimes }),
        }
    }

    pub fn len(&self) -> usize {
        self.runtimes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runtimes.is_empty()
    }
}

impl CompileService for RuntimeContext {
    fn compile(&self, id: &EngineVersionId, test: &TestId, input: &str) -> Result<Vec<u8>> {
        let runtime = self.runtimes.get(id).ok_or_else(|| {
            CompatError::transport(format!("{test} for {id}"), "no provisioned runtime")
        })?;
        runtime.compile(test, input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    /// Serves compile requests on a loopback port: each connection reads
    /// to EOF and answers with the next canned response. Connections that
    /// send no input are readiness probes and consume no response.
    fn serve(responses: Vec<&'static str>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = listener.local_addr().unwrap().to_string();
        thread::spawn(move || {
            let mut responses = responses.into_iter();
            let mut next = responses.next();
            while let Some(response) = next.take() {
                let Ok((mut stream, _)) = listener.accept() else {
                    break;
                };
                let mut input = Vec::new();
                if stream.read_to_end(&mut input).is_err() || input.is_empty() {
                    next = Some(response);
                    continue;
                }
                let _ = stream.write_all(response.as_bytes());
                next = responses.next();
            }
        });
        endpoint
    }

    #[test]
    fn request_round_trips_full_output() {
        let endpoint = serve(vec!["a {\n  color: red; }\n"]);
        let raw = request(&endpoint, "test", "a { color: red; }").unwrap();
        assert_eq!(raw, b"a {\n  color: red; }\n");
    }

    #[test]
    fn request_maps_connection_failure_to_scoped_transport_error() {
        // Bind then drop to get a port nobody serves.
        let endpoint = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().to_string()
        };
        let err = request(&endpoint, "selectors/attr for libsass 3.2", "a {}").unwrap_err();
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("selectors/attr"));
    }

    #[test]
    fn provision_succeeds_once_endpoint_answers() {
        let endpoint = serve(vec!["compiled", "compiled again"]);
        let yaml = format!(
            r#"
engines:
  - name: fake
    versions:
      - version: "1.0"
        command: ["sleep", "30"]
        endpoint: "{endpoint}"
        ready_attempts: 20
        ready_backoff_ms: 50
"#
        );
        let registry: EngineRegistry = serde_yaml::from_str(&yaml).unwrap();
        let context = RuntimeContext::provision_all(&registry).unwrap();
        assert_eq!(context.len(), 1);

        let id = EngineVersionId::new("fake", "1.0");
        let test = TestId::new("t/a");
        assert_eq!(context.compile(&id, &test, "x {}").unwrap(), b"compiled");
        assert_eq!(
            context.compile(&id, &test, "y {}").unwrap(),
            b"compiled again"
        );
        // Drop tears the sleep child down; nothing to assert beyond not
        // hanging.
    }

    #[test]
    fn provision_fails_fatally_when_runtime_dies_before_ready() {
        let yaml = r#"
engines:
  - name: dead
    versions:
      - version: "0.1"
        command: ["true"]
        endpoint: "127.0.0.1:9"
        ready_attempts: 50
        ready_backoff_ms: 20
"#;
        let registry: EngineRegistry = serde_yaml::from_str(yaml).unwrap();
        let err = RuntimeContext::provision_all(&registry).unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, CompatError::Provision { .. }));
    }

    #[test]
    fn compile_against_unknown_version_is_a_transport_error() {
        let context = RuntimeContext {
            runtimes: BTreeMap::new(),
        };
        let err = context
            .compile(
                &EngineVersionId::new("ghost", "9.9"),
                &TestId::new("t/a"),
                "a {}",
            )
            .unwrap_err();
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("t/a for ghost 9.9"));
    }

    #[test]
    fn panicked_provisioning_worker_names_its_engine_version() {
        let id = EngineVersionId::new("libsass", "3.2");
        let err = launch_outcome(&id, Err(Box::new("boom"))).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("libsass 3.2"));
    }
}

use serde_json::{Value, json};
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::channel;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use subluminal_core::{Redactor, args_hash, hash_reader};
use subluminal_policy::{BundleWatcher, CallInput, PolicyEngine};
use subluminal_types::{
    ArgsPreview, CallInfo, CallRef, CallStatus, Decision, DecisionAction, ErrorClass, ErrorDetail,
    Event, EventPayload, Mode, ResultPreview, RunInfo, RunStatus, SourceInfo,
};
use uuid::Uuid;

use crate::config::RuntimeConfig;
use crate::emitter::Emitter;
use crate::rpc::{RpcId, RpcLine, ToolCallParams, policy_error_response};
use crate::run_state::RunState;
use crate::secrets::{SecretStore, env_entries, parse_bindings, redact_values, resolve_bindings};
use crate::{Error, Result};

// NOTE: Duplex Shutdown Rationale
//
// Whichever reader completes first decides the strategy. Agent EOF
// means responses may still be in flight: close the child's stdin and
// drain the upstream reader. Child exit means there is nothing left to
// respond: stop immediately, never block on the agent. Waiting for
// both deadlocks on a crashed child; waiting for neither loses final
// responses.

const TRANSPORT: &str = "stdio";
const PREVIEW_MAX: usize = 1024;
const INSPECT_MAX: usize = 1024 * 1024;
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ProxyOptions {
    pub config: RuntimeConfig,
    pub command: String,
    pub args: Vec<String>,
    /// Optional second sink for the event stream (events always go to
    /// stderr; this tees them, e.g. into a JSONL file).
    pub events_tee: Option<Box<dyn Write + Send>>,
    pub emitter_capacity: usize,
}

impl ProxyOptions {
    pub fn new(config: RuntimeConfig, command: String, args: Vec<String>) -> Self {
        Self {
            config,
            command,
            args,
            events_tee: None,
            emitter_capacity: crate::emitter::DEFAULT_CAPACITY,
        }
    }
}

struct PendingCall {
    call_id: String,
    server_name: String,
    tool_name: String,
    args_hash: String,
}

struct ProxyCtx {
    run: RunInfo,
    source: SourceInfo,
    server_name: String,
    engine: Arc<PolicyEngine>,
    emitter: Arc<Emitter>,
    state: RunState,
    redactor: Redactor,
    pending: RwLock<HashMap<RpcId, PendingCall>>,
    agent_out: Mutex<Box<dyn Write + Send>>,
    stop: AtomicBool,
    terminated: AtomicBool,
}

impl ProxyCtx {
    fn emit(&self, payload: EventPayload) {
        self.emitter.emit(Event::new(&self.run, &self.source, payload));
    }

    fn emit_sync(&self, payload: EventPayload) {
        self.emitter
            .emit_sync(Event::new(&self.run, &self.source, payload));
    }

    fn write_agent(&self, line: &str) {
        if let Ok(mut out) = self.agent_out.lock() {
            let _ = out.write_all(line.as_bytes());
            let _ = out.write_all(b"\n");
            let _ = out.flush();
        }
    }
}

enum LoopDone {
    Agent,
    Upstream,
}

/// Run the adapter: spawn and supervise the upstream child, duplex the
/// two byte streams, intercept `tools/call` requests and emit the call
/// lifecycle as events. Never exits non-zero because the child
/// misbehaved; the outcome is recorded in the event stream.
pub fn run_proxy(options: ProxyOptions) -> Result<()> {
    let ProxyOptions {
        config,
        command,
        args,
        events_tee,
        emitter_capacity,
    } = options;

    let run = config.identity.clone();
    let source = SourceInfo::generate();
    let server_name = config
        .server_name
        .clone()
        .unwrap_or_else(|| command_basename(&command));

    // Events share the adapter's stderr with child diagnostics; both
    // are line-delimited and distinguishable by structure.
    let sink: Box<dyn Write + Send> = match events_tee {
        Some(extra) => Box::new(TeeWriter {
            a: Box::new(std::io::stderr()),
            b: extra,
        }),
        None => Box::new(std::io::stderr()),
    };
    let emitter = Arc::new(Emitter::with_capacity(sink, emitter_capacity));

    // Secrets: resolved values feed both the child environment and the
    // redactor. A missing store or binding degrades, never fails.
    let resolved = load_secrets(&config, &server_name);
    let redactor = Redactor::new(redact_values(&resolved));
    let injected_env = env_entries(&resolved);

    // Policy: inline JSON wins; a file source gets a poll watcher.
    let engine = Arc::new(PolicyEngine::new(run.clone()));
    install_initial_bundle(&config, &engine);
    let _watcher = config.policy_path.as_ref().and_then(|path| {
        BundleWatcher::spawn(
            path.clone(),
            engine.clone(),
            Duration::from_secs(2),
            config.policy_debug,
        )
        .ok()
    });

    // Child in its own process group, stderr inherited.
    let mut cmd = Command::new(&command);
    cmd.args(&args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .envs(injected_env);
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    let mut child = cmd
        .spawn()
        .map_err(|e| Error::Spawn(format!("{}: {}", command, e)))?;
    let child_pid = child.id() as i32;
    let child_stdin = child
        .stdin
        .take()
        .ok_or_else(|| Error::Spawn("child stdin not piped".to_string()))?;
    let child_stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::Spawn("child stdout not piped".to_string()))?;

    let ctx = Arc::new(ProxyCtx {
        run,
        source,
        server_name,
        engine,
        emitter: emitter.clone(),
        state: RunState::new(),
        redactor,
        pending: RwLock::new(HashMap::new()),
        agent_out: Mutex::new(Box::new(std::io::stdout())),
        stop: AtomicBool::new(false),
        terminated: AtomicBool::new(false),
    });

    install_signal_handler(&ctx, child_pid);

    ctx.emit(EventPayload::RunStart {
        started_at: chrono::Utc::now(),
        mode: ctx.engine.mode(),
        policy: ctx.engine.policy_info(),
    });

    let (done_tx, done_rx) = channel::<LoopDone>();

    let upstream_ctx = ctx.clone();
    let upstream_tx = done_tx.clone();
    let upstream_handle = std::thread::Builder::new()
        .name("subluminal-upstream".to_string())
        .spawn(move || {
            upstream_loop(&upstream_ctx, child_stdout);
            let _ = upstream_tx.send(LoopDone::Upstream);
        })?;

    let agent_ctx = ctx.clone();
    let _agent_handle = std::thread::Builder::new()
        .name("subluminal-agent".to_string())
        .spawn(move || {
            agent_loop(&agent_ctx, child_stdin);
            let _ = done_tx.send(LoopDone::Agent);
        })?;

    let mut child_exited_first = false;
    match done_rx.recv() {
        Ok(LoopDone::Agent) | Err(_) => {
            // Agent closed (or stop requested): the agent loop dropped
            // the child's stdin on exit. Drain outstanding responses.
            let _ = upstream_handle.join();
        }
        Ok(LoopDone::Upstream) => {
            // Child exited first: do not block waiting on the agent.
            child_exited_first = true;
        }
    }

    let status = if ctx.terminated.load(Ordering::SeqCst) {
        RunStatus::Terminated
    } else if child_exited_first {
        RunStatus::Failed
    } else {
        RunStatus::Succeeded
    };

    ctx.emit(EventPayload::RunEnd {
        ended_at: chrono::Utc::now(),
        status,
        summary: ctx.state.summary(),
    });
    emitter.close();

    stop_child(&mut child, child_pid, STOP_TIMEOUT);
    Ok(())
}

fn command_basename(command: &str) -> String {
    std::path::Path::new(command)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| command.to_string())
}

fn load_secrets(config: &RuntimeConfig, server_name: &str) -> Vec<crate::secrets::ResolvedBinding> {
    let bindings_text = match (&config.secret_bindings_inline, &config.secret_bindings_file) {
        (Some(inline), _) => Some(inline.clone()),
        (None, Some(path)) => std::fs::read_to_string(path).ok(),
        (None, None) => None,
    };
    let Some(text) = bindings_text else {
        return Vec::new();
    };
    let bindings = match parse_bindings(&text) {
        Ok(bindings) => bindings,
        Err(e) => {
            if config.secret_debug {
                eprintln!("subluminal: secret bindings unparseable: {}", e);
            }
            return Vec::new();
        }
    };
    let store = config
        .secrets_path
        .as_ref()
        .and_then(|path| SecretStore::load(path).ok())
        .unwrap_or_default();
    resolve_bindings(&bindings, &store, server_name, config.secret_debug)
}

fn install_initial_bundle(config: &RuntimeConfig, engine: &Arc<PolicyEngine>) {
    let loaded = if let Some(inline) = &config.policy_inline {
        subluminal_policy::parse_bundle_json(inline).and_then(subluminal_policy::compile)
    } else if let Some(path) = &config.policy_path {
        subluminal_policy::load_bundle_file(path)
    } else {
        return;
    };
    match loaded {
        Ok(bundle) => engine.install(bundle),
        Err(e) => {
            if config.policy_debug {
                eprintln!("subluminal: policy bundle failed to load: {}", e);
            }
        }
    }
}

fn install_signal_handler(ctx: &Arc<ProxyCtx>, child_pid: i32) {
    let ctx = ctx.clone();
    let _ = ctrlc::set_handler(move || {
        // Forward to the child's process group, then stop gracefully.
        #[cfg(unix)]
        unsafe {
            libc::kill(-child_pid, libc::SIGTERM);
        }
        #[cfg(not(unix))]
        let _ = child_pid;
        ctx.terminated.store(true, Ordering::SeqCst);
        ctx.stop.store(true, Ordering::SeqCst);
    });
}

fn stop_child(child: &mut Child, child_pid: i32, timeout: Duration) {
    if matches!(child.try_wait(), Ok(Some(_))) {
        return;
    }
    #[cfg(unix)]
    unsafe {
        libc::kill(-child_pid, libc::SIGTERM);
    }
    let start = Instant::now();
    while start.elapsed() < timeout {
        if matches!(child.try_wait(), Ok(Some(_))) {
            return;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    #[cfg(unix)]
    unsafe {
        libc::kill(-child_pid, libc::SIGKILL);
    }
    #[cfg(not(unix))]
    let _ = child.kill();
    let _ = child.wait();
}

// ---------------------------------------------------------------------------
// Agent side: read, intercept, forward or synthesize
// ---------------------------------------------------------------------------

enum AgentAction {
    Continue,
    Stop,
}

fn agent_loop(ctx: &Arc<ProxyCtx>, child_stdin: ChildStdin) {
    let mut child_in = child_stdin;
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        match handle_agent_line(ctx, &line, &mut child_in) {
            AgentAction::Continue => {}
            AgentAction::Stop => break,
        }
        if ctx.stop.load(Ordering::SeqCst) {
            break;
        }
    }
    // Dropping child_in closes the child's stdin and signals EOF.
}

fn forward_raw(child_in: &mut impl Write, line: &str) {
    // The child may have exited; losing the write is recorded by the
    // upstream loop ending, not treated as a proxy failure.
    let _ = child_in.write_all(line.as_bytes());
    let _ = child_in.write_all(b"\n");
    let _ = child_in.flush();
}

fn handle_agent_line(ctx: &Arc<ProxyCtx>, line: &str, child_in: &mut impl Write) -> AgentAction {
    let Some(rpc) = RpcLine::parse(line) else {
        forward_raw(child_in, line);
        return AgentAction::Continue;
    };
    if rpc.method() != Some("tools/call") {
        forward_raw(child_in, line);
        return AgentAction::Continue;
    }
    // Unparseable params: do not intercept, forward untouched.
    let Some(params) = ToolCallParams::from_line(&rpc) else {
        forward_raw(child_in, line);
        return AgentAction::Continue;
    };

    let inspection = inspect_args(&params.arguments, &ctx.redactor);
    let call_id = Uuid::new_v4().to_string();
    let seq = ctx.state.start_call(&call_id);

    let decision = ctx.engine.decide(&CallInput {
        server_name: &ctx.server_name,
        tool_name: &params.name,
        args_hash: &inspection.hash,
        args: &params.arguments,
    });
    let decision = sanitize_decision(decision, &ctx.redactor);

    let call_info = CallInfo {
        call_id: call_id.clone(),
        server_name: ctx.server_name.clone(),
        tool_name: params.name.clone(),
        transport: TRANSPORT.to_string(),
        args_hash: inspection.hash.clone(),
        args_stream_hash: inspection.stream_hash.clone(),
        bytes_in: line.len() as u64,
        preview: inspection.preview.clone(),
    };
    let call_ref = CallRef::from(&call_info);

    // Start is asynchronous; the decision is synchronous so it is on
    // the wire before any subsequent state change is observable.
    ctx.emit(EventPayload::ToolCallStart {
        call: call_info,
        seq,
    });
    ctx.emit_sync(EventPayload::ToolCallDecision {
        call: call_ref.clone(),
        decision: decision.clone(),
    });

    let enforce = ctx.engine.mode() != Mode::Observe && decision.action != DecisionAction::Allow;
    if !enforce {
        if let Some(id) = rpc.normalized_id() {
            if let Ok(mut pending) = ctx.pending.write() {
                pending.insert(
                    id,
                    PendingCall {
                        call_id,
                        server_name: ctx.server_name.clone(),
                        tool_name: params.name.clone(),
                        args_hash: inspection.hash,
                    },
                );
            }
        }
        ctx.state.increment_allowed();
        forward_raw(child_in, line);
        return AgentAction::Continue;
    }

    // Enforced: never forwarded. Synthesize the JSON-RPC error (when
    // the request is addressable) and close out the call locally.
    let code = decision.action.rpc_error_code().unwrap_or(-32081);
    let mut bytes_out = 0u64;
    if let Some(id) = rpc.id() {
        let response = policy_error_response(
            id,
            code,
            &decision,
            &ctx.run,
            &call_id,
            &ctx.server_name,
            &params.name,
            &inspection.hash,
            &decision.policy,
        );
        let response_line = response.to_string();
        bytes_out = response_line.len() as u64 + 1;
        ctx.write_agent(&response_line);
    }

    let latency_ms = ctx.state.end_call(&call_id);
    ctx.emit(EventPayload::ToolCallEnd {
        call: call_ref,
        status: CallStatus::Error,
        latency_ms,
        bytes_out,
        preview: ResultPreview::default(),
        error: Some(ErrorDetail {
            class: ErrorClass::PolicyBlock,
            message: decision.explain.summary.clone(),
            code: Some(code),
        }),
    });

    if decision.action == DecisionAction::Throttle {
        ctx.state.increment_throttled();
    } else {
        ctx.state.increment_blocked();
    }
    ctx.state.increment_errors();

    if decision.action == DecisionAction::TerminateRun {
        // The response above is already delivered; stop gracefully.
        ctx.terminated.store(true, Ordering::SeqCst);
        ctx.stop.store(true, Ordering::SeqCst);
        return AgentAction::Stop;
    }
    AgentAction::Continue
}

fn sanitize_decision(mut decision: Decision, redactor: &Redactor) -> Decision {
    if let Some(hint) = &decision.hint {
        decision.hint = Some(redactor.sanitize_hint(hint));
    }
    decision
}

// ---------------------------------------------------------------------------
// Upstream side: correlate, redact, forward
// ---------------------------------------------------------------------------

fn upstream_loop(ctx: &Arc<ProxyCtx>, child_stdout: ChildStdout) {
    let reader = BufReader::new(child_stdout);
    for line in reader.lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        handle_upstream_line(ctx, &line);
    }
}

fn handle_upstream_line(ctx: &Arc<ProxyCtx>, line: &str) {
    let Some(rpc) = RpcLine::parse(line) else {
        ctx.write_agent(line);
        return;
    };
    let mut value = rpc.value;

    // Redact the error payload before it reaches the agent.
    let mut sanitized = false;
    if let Some(err) = value.get_mut("error").and_then(Value::as_object_mut) {
        let message = err.get("message").and_then(Value::as_str).map(str::to_string);
        if let Some(message) = message {
            let redacted = ctx.redactor.redact(&message);
            if redacted != message {
                err.insert("message".to_string(), json!(redacted));
                sanitized = true;
            }
        }
        let data = err.get("data").cloned();
        if let Some(data) = data {
            let clean = ctx.redactor.sanitize_value(&data);
            if clean != data {
                err.insert("data".to_string(), clean);
                sanitized = true;
            }
        }
    }
    let out_line = if sanitized {
        value.to_string()
    } else {
        line.to_string()
    };

    let pending = value
        .get("id")
        .and_then(RpcId::normalize)
        .and_then(|id| ctx.pending.write().ok()?.remove(&id));
    let Some(pending) = pending else {
        // Not a tracked response (notification, untracked id).
        ctx.write_agent(&out_line);
        return;
    };

    let latency_ms = ctx.state.end_call(&pending.call_id);
    let (status, error) = match value.get("error") {
        Some(err) if !err.is_null() => {
            ctx.state.increment_errors();
            (
                CallStatus::Error,
                Some(ErrorDetail {
                    class: ErrorClass::UpstreamError,
                    message: err
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    code: err.get("code").and_then(Value::as_i64),
                }),
            )
        }
        _ => (CallStatus::Ok, None),
    };

    let preview = result_preview(&value, &ctx.redactor);
    ctx.emit(EventPayload::ToolCallEnd {
        call: CallRef {
            call_id: pending.call_id,
            server_name: pending.server_name,
            tool_name: pending.tool_name,
            args_hash: pending.args_hash,
        },
        status,
        latency_ms,
        bytes_out: out_line.len() as u64 + 1,
        preview,
        error,
    });
    ctx.write_agent(&out_line);
}

// ---------------------------------------------------------------------------
// Inspection helpers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct ArgsInspection {
    hash: String,
    stream_hash: Option<String>,
    preview: ArgsPreview,
}

fn inspect_args(args: &Value, redactor: &Redactor) -> ArgsInspection {
    let hash = args_hash(args);
    let raw = serde_json::to_string(args).unwrap_or_default();
    if raw.len() > INSPECT_MAX {
        // Oversized payload: no preview; a streaming hash over the raw
        // bytes complements the canonical hash.
        let stream_hash = hash_reader(raw.as_bytes()).ok();
        return ArgsInspection {
            hash,
            stream_hash,
            preview: ArgsPreview {
                truncated: true,
                args_preview: String::new(),
            },
        };
    }
    if raw.len() > PREVIEW_MAX {
        let cut = floor_char_boundary(&raw, PREVIEW_MAX);
        return ArgsInspection {
            hash,
            stream_hash: None,
            preview: ArgsPreview {
                truncated: true,
                args_preview: redactor.redact(&format!("{}...", &raw[..cut])),
            },
        };
    }
    ArgsInspection {
        hash,
        stream_hash: None,
        preview: ArgsPreview {
            truncated: false,
            args_preview: redactor.redact(&raw),
        },
    }
}

fn result_preview(response: &Value, redactor: &Redactor) -> ResultPreview {
    let body = response
        .get("result")
        .or_else(|| response.get("error"))
        .map(|v| v.to_string())
        .unwrap_or_default();
    if body.len() > INSPECT_MAX {
        return ResultPreview {
            truncated: true,
            result_preview: String::new(),
        };
    }
    if body.len() > PREVIEW_MAX {
        let cut = floor_char_boundary(&body, PREVIEW_MAX);
        return ResultPreview {
            truncated: true,
            result_preview: redactor.redact(&format!("{}...", &body[..cut])),
        };
    }
    ResultPreview {
        truncated: false,
        result_preview: redactor.redact(&body),
    }
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

struct TeeWriter {
    a: Box<dyn Write + Send>,
    b: Box<dyn Write + Send>,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let _ = self.a.write_all(buf);
        let _ = self.b.write_all(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let _ = self.a.flush();
        self.b.flush()
    }
}

//! V8 scripting backend - fresh isolates for untrusted policy code.
//!
//! Each invocation gets a brand new runtime; no state leaks between calls.
//! V8 isolates are `!Send`, so all JsRuntime operations run on a dedicated
//! thread with its own single-threaded tokio runtime. The public API is
//! fully async and `Send`-safe.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use deno_core::{JsRuntime, OpState, PollEventLoopOptions, RuntimeOptions, extension, op2, v8};
use serde_json::Value;
use tokio::sync::Semaphore;

use super::{ScriptFailure, ScriptInvocation, ScriptingBackend};
use crate::fetch::{FetchError, FetchHandler, FetchOptions};

/// Per-invocation fetch budget, kept in the isolate's OpState so concurrent
/// invocations can never observe each other's counts.
struct FetchBudget {
    max: u32,
    used: u32,
}

/// The JSON envelope the wrapper script hands back through `setResult`.
struct ResultEnvelope(String);

fn fetch_error_envelope(error: &FetchError) -> String {
    serde_json::json!({ "error": error.to_string() }).to_string()
}

#[op2(async)]
#[string]
async fn op_warden_fetch(
    state: Rc<RefCell<OpState>>,
    #[string] url: String,
    #[string] options: String,
) -> String {
    let handler = {
        let mut state = state.borrow_mut();
        let handler = state.borrow::<Arc<dyn FetchHandler>>().clone();
        let budget = state.borrow_mut::<FetchBudget>();
        if budget.used >= budget.max {
            return fetch_error_envelope(&FetchError::BudgetExceeded { max: budget.max });
        }
        budget.used += 1;
        handler
    };

    let options: FetchOptions = serde_json::from_str(&options).unwrap_or_default();
    match handler.fetch(&url, &options).await {
        Ok(response) => serde_json::json!({
            "status": response.status,
            "headers": response.headers,
            "body": response.body,
        })
        .to_string(),
        Err(error) => fetch_error_envelope(&error),
    }
}

#[op2(fast)]
fn op_warden_set_result(state: &mut OpState, #[string] result: String) {
    state.put(ResultEnvelope(result));
}

#[op2(fast)]
fn op_warden_log(#[string] message: String) {
    tracing::debug!(target: "warden::script", "{message}");
}

extension!(
    warden_ext,
    ops = [op_warden_fetch, op_warden_set_result, op_warden_log]
);

/// Bootstrap: capture ops in closures, expose the fetch facade and the
/// helper library, then delete `Deno` and the code generation primitives so
/// the prototype chain cannot be used to climb back out.
const BOOTSTRAP: &str = r#"
((ops) => {
    const fetchOp = ops.op_warden_fetch;
    const setResult = (json) => ops.op_warden_set_result(json);
    const log = (msg) => ops.op_warden_log(String(msg));

    globalThis.__warden = Object.freeze({ setResult, log });
    globalThis.console = Object.freeze({ log, info: log, warn: log, error: log });

    globalThis.fetch = async (url, options) => {
        const raw = await fetchOp(String(url), JSON.stringify(options || {}));
        const res = JSON.parse(raw);
        if (res.error !== undefined) {
            throw new Error(res.error);
        }
        return Object.freeze({
            status: res.status,
            ok: res.status >= 200 && res.status < 300,
            headers: res.headers,
            text: async () => res.body,
            json: async () => JSON.parse(res.body),
        });
    };

    const normalize = (value) => String(value).toLowerCase().replace(/[^a-z0-9]/g, "");
    globalThis.licenseAllowed = (license, allowed) =>
        (allowed || []).some((entry) => normalize(license).includes(normalize(entry)));
    globalThis.licenseBanned = (license, banned) =>
        (banned || []).some((entry) => normalize(license).includes(normalize(entry)));

    const semver = (value) => {
        const m = /^v?(\d+)(?:\.(\d+))?(?:\.(\d+))?/.exec(String(value).trim());
        return m ? [Number(m[1]), Number(m[2] || 0), Number(m[3] || 0)] : null;
    };
    const semverCmp = (a, b) => {
        const pa = semver(a), pb = semver(b);
        if (pa === null || pb === null) return null;
        for (let i = 0; i < 3; i++) {
            if (pa[i] !== pb[i]) return pa[i] < pb[i] ? -1 : 1;
        }
        return 0;
    };
    globalThis.semverGt = (a, b) => semverCmp(a, b) === 1;
    globalThis.semverLt = (a, b) => semverCmp(a, b) === -1;

    globalThis.daysSince = (date) => {
        const t = Date.parse(date);
        if (Number.isNaN(t)) return null;
        return Math.floor((Date.now() - t) / 86400000);
    };

    delete globalThis.Deno;

    delete globalThis.eval;
    const AsyncFunction = (async function () {}).constructor;
    const GeneratorFunction = (function* () {}).constructor;
    Object.defineProperty(Function.prototype, "constructor", {
        value: undefined, configurable: false, writable: false
    });
    Object.defineProperty(AsyncFunction.prototype, "constructor", {
        value: undefined, configurable: false, writable: false
    });
    Object.defineProperty(GeneratorFunction.prototype, "constructor", {
        value: undefined, configurable: false, writable: false
    });
})(Deno.core.ops);
"#;

/// State for the near-heap-limit callback.
struct HeapLimitState {
    handle: v8::IsolateHandle,
    /// Whether the heap limit has been triggered. AtomicBool lets the
    /// callback take a shared `&` reference, eliminating aliasing concerns.
    triggered: AtomicBool,
}

/// V8 near-heap-limit callback. Terminates execution and grants 1MB grace
/// for the termination to propagate cleanly.
extern "C" fn near_heap_limit_callback(
    data: *mut std::ffi::c_void,
    current_heap_limit: usize,
    _initial_heap_limit: usize,
) -> usize {
    // SAFETY: `data` points to the Box<HeapLimitState> allocated in
    // run_invocation. The Box outlives this callback because the watchdog
    // thread is joined before heap_state is dropped, and V8 only invokes
    // the callback while the isolate is running.
    let state = unsafe { &*(data as *const HeapLimitState) };
    if !state.triggered.swap(true, Ordering::SeqCst) {
        state.handle.terminate_execution();
    }
    current_heap_limit + 1024 * 1024
}

/// The V8 scripting backend. Creates a fresh isolate per invocation on a
/// dedicated thread; a semaphore bounds how many isolates run at once.
pub struct JsBackend {
    max_concurrent: usize,
    semaphore: Arc<Semaphore>,
}

impl std::fmt::Debug for JsBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsBackend")
            .field("max_concurrent", &self.max_concurrent)
            .finish_non_exhaustive()
    }
}

impl JsBackend {
    /// Create a backend allowing up to `max_concurrent` simultaneous
    /// isolates.
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent,
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
        }
    }

    /// The configured concurrency ceiling.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }
}

impl Default for JsBackend {
    fn default() -> Self {
        Self::new(8)
    }
}

#[async_trait]
impl ScriptingBackend for JsBackend {
    async fn check_syntax(&self, source: &str) -> Result<(), ScriptFailure> {
        // `new Function(...)` compiles the body without running it; passing
        // the source as a JSON string literal means nothing can escape into
        // the checking isolate.
        let quoted = serde_json::to_string(source)
            .map_err(|e| ScriptFailure::Runtime(e.to_string()))?;

        let (tx, rx) = tokio::sync::oneshot::channel();
        std::thread::spawn(move || {
            let mut runtime = JsRuntime::new(RuntimeOptions::default());
            let result = match runtime
                .execute_script("[warden:syntax]", format!("new Function({quoted}); undefined"))
            {
                Ok(_) => Ok(()),
                Err(e) => Err(ScriptFailure::Syntax(e.to_string())),
            };
            if tx.send(result).is_err() {
                tracing::warn!("syntax check receiver dropped");
            }
        });

        rx.await
            .map_err(|_| ScriptFailure::Runtime("sandbox thread panicked".to_string()))?
    }

    async fn execute(&self, invocation: ScriptInvocation) -> Result<Value, ScriptFailure> {
        let _permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ScriptFailure::Runtime("sandbox semaphore closed".to_string()))?;

        // V8 isolates are !Send - run everything on a dedicated thread.
        let (tx, rx) = tokio::sync::oneshot::channel();
        std::thread::spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    if tx
                        .send(Err(ScriptFailure::Runtime(format!("sandbox runtime: {e}"))))
                        .is_err()
                    {
                        tracing::warn!("sandbox result receiver dropped");
                    }
                    return;
                }
            };
            let result = rt.block_on(run_invocation(invocation));
            if tx.send(result).is_err() {
                tracing::warn!("sandbox result receiver dropped before result was sent");
            }
        });

        rx.await
            .map_err(|_| ScriptFailure::Runtime("sandbox thread panicked".to_string()))?
    }
}

fn create_runtime(invocation: &ScriptInvocation) -> JsRuntime {
    let create_params = v8::CreateParams::default().heap_limits(0, invocation.limits.max_heap_bytes);

    let mut runtime = JsRuntime::new(RuntimeOptions {
        extensions: vec![warden_ext::init_ops()],
        create_params: Some(create_params),
        ..Default::default()
    });

    {
        let op_state = runtime.op_state();
        let mut state = op_state.borrow_mut();
        state.put(invocation.fetch.clone());
        state.put(FetchBudget {
            max: invocation.limits.max_fetch_calls,
            used: 0,
        });
    }

    runtime
}

/// Run one invocation on the current thread (must be called from a
/// dedicated thread, not the caller's tokio runtime).
async fn run_invocation(invocation: ScriptInvocation) -> Result<Value, ScriptFailure> {
    let limits = invocation.limits.clone();
    let entry = invocation.kind.entry_point();
    let mut runtime = create_runtime(&invocation);

    // Compile-only check of the user source so a parse failure is reported
    // as a syntax failure rather than a wrapper error.
    let quoted = serde_json::to_string(&invocation.source)
        .map_err(|e| ScriptFailure::Runtime(e.to_string()))?;
    if let Err(e) =
        runtime.execute_script("[warden:compile]", format!("new Function({quoted}); undefined"))
    {
        return Err(ScriptFailure::Syntax(e.to_string()));
    }

    // Inject the context as a global. Host-produced JSON, embedded verbatim.
    let context_json = serde_json::to_string(&invocation.context)
        .map_err(|e| ScriptFailure::Runtime(e.to_string()))?;
    runtime
        .execute_script(
            "[warden:context]",
            format!("globalThis.__wardenContext = {context_json};"),
        )
        .map_err(|e| ScriptFailure::Runtime(e.to_string()))?;

    runtime
        .execute_script("[warden:bootstrap]", BOOTSTRAP)
        .map_err(|e| ScriptFailure::Runtime(e.to_string()))?;

    // --- Set up heap limit callback ---
    let heap_state = Box::new(HeapLimitState {
        handle: runtime.v8_isolate().thread_safe_handle(),
        triggered: AtomicBool::new(false),
    });
    runtime.v8_isolate().add_near_heap_limit_callback(
        near_heap_limit_callback,
        &*heap_state as *const HeapLimitState as *mut std::ffi::c_void,
    );

    // --- Set up CPU watchdog ---
    // Covers CPU-bound infinite loops that never yield to the event loop.
    let watchdog_handle = runtime.v8_isolate().thread_safe_handle();
    let timed_out = Arc::new(AtomicBool::new(false));
    let watchdog_timed_out = timed_out.clone();
    let timeout = limits.timeout;
    let (cancel_tx, cancel_rx) = std::sync::mpsc::channel::<()>();

    let watchdog = std::thread::spawn(move || {
        if let Err(std::sync::mpsc::RecvTimeoutError::Timeout) = cancel_rx.recv_timeout(timeout) {
            watchdog_timed_out.store(true, Ordering::SeqCst);
            watchdog_handle.terminate_execution();
        }
    });

    // --- Execute the script and invoke the entry point ---
    let wrapped = format!(
        r#"
        (async () => {{
            try {{
                {source}
                ;
                if (typeof {entry} !== "function") {{
                    __warden.setResult(JSON.stringify({{ missing: "{entry}" }}));
                    return;
                }}
                const __result = await {entry}(globalThis.__wardenContext);
                __warden.setResult(
                    JSON.stringify({{ ok: __result === undefined ? null : __result }})
                );
            }} catch (e) {{
                __warden.setResult(JSON.stringify({{
                    error: (e && e.message !== undefined) ? String(e.message) : String(e)
                }}));
            }}
        }})();
        "#,
        source = invocation.source,
    );

    let exec_error = match runtime.execute_script("[warden:execute]", wrapped) {
        Ok(_) => {
            // Drive the event loop so pending fetches and awaits resolve.
            match tokio::time::timeout(
                limits.timeout,
                runtime.run_event_loop(PollEventLoopOptions::default()),
            )
            .await
            {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(_) => {
                    timed_out.store(true, Ordering::SeqCst);
                    None
                }
            }
        }
        Err(e) => Some(e.to_string()),
    };

    // --- Cleanup: cancel the watchdog and wait for it to exit ---
    // The watchdog must be done before the runtime drops, preventing
    // use-after-free on the IsolateHandle.
    let _ = cancel_tx.send(());
    let _ = watchdog.join();

    // --- Check failure causes in priority order ---
    if heap_state.triggered.load(Ordering::SeqCst) {
        return Err(ScriptFailure::MemoryLimit);
    }

    if timed_out.load(Ordering::SeqCst) {
        return Err(ScriptFailure::Timeout(limits.timeout));
    }

    if let Some(message) = exec_error {
        return Err(ScriptFailure::Runtime(message));
    }

    // --- Extract the result envelope from OpState ---
    let raw = {
        let op_state = runtime.op_state();
        let state = op_state.borrow();
        state.try_borrow::<ResultEnvelope>().map(|r| r.0.clone())
    };
    let raw = raw.ok_or_else(|| {
        ScriptFailure::Runtime("script completed without producing a result".to_string())
    })?;

    if raw.len() > limits.max_result_bytes {
        return Err(ScriptFailure::OutputTooLarge {
            max: limits.max_result_bytes,
        });
    }

    let envelope: Value =
        serde_json::from_str(&raw).map_err(|e| ScriptFailure::Runtime(e.to_string()))?;

    if let Some(name) = envelope.get("missing").and_then(Value::as_str) {
        return Err(ScriptFailure::MissingEntryPoint(name.to_string()));
    }
    if let Some(error) = envelope.get("error") {
        return Err(ScriptFailure::Runtime(
            error.as_str().unwrap_or("unknown error").to_string(),
        ));
    }

    Ok(envelope.get("ok").cloned().unwrap_or(Value::Null))
}

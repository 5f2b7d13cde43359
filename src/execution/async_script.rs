//! Asynchronous script protocol.
//!
//! The user body is wrapped so that it receives a completion callback as its
//! last argument. Progress is kept in a document-scoped slot keyed by a page
//! identity token minted per invocation:
//!
//! ```text
//! document.__webdriverAsyncExecutors[P] = { pageId: P, asyncTimeout: 0 }
//! ```
//!
//! A page timer armed with the configured timeout schedules a second,
//! zero-delay timer that raises `asyncTimeout`. Deferring the flag by one
//! turn lets a callback queued on the same tick as the timeout still win.
//! The driver then polls the slot until it sees a result, the timeout flag,
//! or evidence that the document has been replaced.

use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::host::{HostValue, ScriptHost};
use crate::marshal::ResultMarshaller;

use super::fault::{ScriptFault, ScriptResult};
use super::invoker::ScriptInvoker;
use super::tokens::mint_token;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);
pub const DEFAULT_DEADLINE_GRACE: Duration = Duration::from_secs(5);

/// Outcome of one poll of the async slot.
#[derive(Debug, Clone, PartialEq)]
pub enum AsyncState {
    Pending,
    Done(Value),
    TimedOut,
    Reloaded,
}

/// Drives one asynchronous invocation from start to its terminal state.
#[derive(Debug, Clone, Copy)]
pub struct AsyncExecutionCoordinator {
    invoker: ScriptInvoker,
    poll_interval: Duration,
    deadline_grace: Duration,
}

impl AsyncExecutionCoordinator {
    pub fn new(poll_interval: Duration, deadline_grace: Duration) -> Self {
        Self {
            invoker: ScriptInvoker::new(),
            poll_interval,
            deadline_grace,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Run `body` asynchronously and return its marshalled callback value.
    ///
    /// `args` are passed first, then the hosting window, then the callback.
    /// Besides the in-page timer, a wall-clock deadline of
    /// `timeout + deadline_grace` bounds the poll loop, so a page whose timers
    /// never run still ends in a timeout. A deadline past the clock's range
    /// leaves the loop bounded by the in-page timer alone.
    pub fn execute<H: ScriptHost>(
        &self,
        host: &mut H,
        marshaller: &mut ResultMarshaller<'_, H::Object>,
        body: &str,
        args: &[HostValue<H::Object>],
        timeout: Duration,
    ) -> ScriptResult<Value> {
        let page_id = mint_token();
        let pending_id = mint_token();
        let timeout_ms = timeout.as_millis();

        let wrapper = async_wrapper_script(&page_id, body, timeout_ms);
        self.invoker
            .execute(host, &wrapper, args)
            .map_err(|fault| match fault {
                ScriptFault::Compilation(reason) => ScriptFault::Runtime(reason),
                other => other,
            })?;
        log::debug!("async script {page_id} started, timeout {timeout_ms} ms");

        let poll = poll_script(&page_id, &pending_id);
        let deadline = timeout
            .checked_add(self.deadline_grace)
            .and_then(|wait| Instant::now().checked_add(wait));
        if deadline.is_none() {
            log::debug!("async script {page_id} has no driver deadline");
        }
        let mut polls: u64 = 0;

        loop {
            host.yield_to_page();
            polls += 1;

            let raw = match self.invoker.execute(host, &poll, &[]) {
                Ok(raw) => raw,
                Err(fault) => {
                    log::info!("async poll for {page_id} failed ({fault}), assuming page reload");
                    return Err(ScriptFault::PageReload);
                }
            };
            let polled = marshaller.to_json(host, raw)?;

            match classify_poll(polled, &pending_id) {
                AsyncState::Done(value) => {
                    log::debug!("async script {page_id} completed after {polls} poll(s)");
                    return Ok(value);
                }
                AsyncState::TimedOut => {
                    log::info!("async script {page_id} timed out after {timeout_ms} ms");
                    return Err(timeout_fault(timeout_ms));
                }
                AsyncState::Reloaded => {
                    log::info!("page reload detected while waiting for async script {page_id}");
                    return Err(ScriptFault::PageReload);
                }
                AsyncState::Pending => {
                    log::trace!("async script {page_id} still pending (poll {polls})");
                    if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                        log::warn!("async script {page_id} passed the driver deadline");
                        return Err(timeout_fault(timeout_ms));
                    }
                    thread::sleep(self.poll_interval);
                }
            }
        }
    }
}

impl Default for AsyncExecutionCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL, DEFAULT_DEADLINE_GRACE)
    }
}

fn timeout_fault(timeout_ms: u128) -> ScriptFault {
    ScriptFault::Timeout(format!(
        "timed out waiting for async script result after {timeout_ms} ms"
    ))
}

/// Interpret a marshalled poll response. `[pending_id, flag]` is the only
/// shape that is not a finished result.
pub fn classify_poll(polled: Value, pending_id: &str) -> AsyncState {
    if let Value::Array(items) = &polled
        && items.len() == 2
        && items[0].as_str() == Some(pending_id)
        && let Some(flag) = items[1].as_f64()
    {
        return if flag < 0.0 {
            AsyncState::Reloaded
        } else if flag > 0.0 {
            AsyncState::TimedOut
        } else {
            AsyncState::Pending
        };
    }
    AsyncState::Done(polled)
}

fn js_string(text: &str) -> String {
    serde_json::to_string(text).unwrap_or_else(|_| "\"\"".to_string())
}

/// Script text starting one async invocation of `body`.
pub fn async_wrapper_script(page_id: &str, body: &str, timeout_ms: u128) -> String {
    format!(
        r#"(function() {{ return function(){{
var executors = document.__webdriverAsyncExecutors || (document.__webdriverAsyncExecutors = {{}});
var pageId = {page_id};
var state = {{ pageId: pageId, asyncTimeout: 0 }};
executors[pageId] = state;
var timeoutId = window.setTimeout(function() {{
  window.setTimeout(function() {{
    if (!('asyncScriptResult' in state)) {{ state.asyncTimeout = 1; }}
  }}, 0);
}}, {timeout_ms});
var callback = function(value) {{
  state.asyncTimeout = 0;
  state.asyncScriptResult = value;
  window.clearTimeout(timeoutId);
}};
var argsArray = Array.prototype.slice.call(arguments);
argsArray.push(callback);
try {{
  (function(){{
{body}
}}).apply(null, argsArray);
}} catch (e) {{
  window.clearTimeout(timeoutId);
  delete executors[pageId];
  throw e;
}}
}};}})();"#,
        page_id = js_string(page_id),
        timeout_ms = timeout_ms,
        body = body
    )
}

/// Script text reading the slot of `page_id` once.
pub fn poll_script(page_id: &str, pending_id: &str) -> String {
    format!(
        r#"(function() {{ return function(){{
var pageId = {page_id};
var pendingId = {pending_id};
var executors = document.__webdriverAsyncExecutors;
var state = executors ? executors[pageId] : undefined;
if (!state || state.pageId !== pageId) {{
  return [pendingId, -1];
}}
if ('asyncScriptResult' in state) {{
  var value = state.asyncScriptResult;
  delete executors[pageId];
  return value;
}}
if (state.asyncTimeout > 0) {{
  delete executors[pageId];
}}
return [pendingId, state.asyncTimeout];
}};}})();"#,
        page_id = js_string(page_id),
        pending_id = js_string(pending_id)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elements::ElementRegistry;
    use crate::execution::invoker::tests::{StubHost, StubObject};
    use crate::host::{BoaObject, BoaPage, DocumentId, HostError, ObjectKind};
    use crate::marshal::MarshalOptions;
    use serde_json::json;

    fn run_on_page(page: &mut BoaPage, body: &str, timeout: Duration) -> ScriptResult<Value> {
        let mut registry = ElementRegistry::new();
        let mut marshaller = ResultMarshaller::new(&mut registry, MarshalOptions::default());
        AsyncExecutionCoordinator::new(Duration::from_millis(5), Duration::from_secs(2))
            .execute(page, &mut marshaller, body, &[], timeout)
    }

    #[test]
    fn classifies_poll_responses() {
        let q = "{pending}";
        assert_eq!(classify_poll(json!([q, 0]), q), AsyncState::Pending);
        assert_eq!(classify_poll(json!([q, 1]), q), AsyncState::TimedOut);
        assert_eq!(classify_poll(json!([q, -1]), q), AsyncState::Reloaded);
        assert_eq!(
            classify_poll(json!(["other", 1]), q),
            AsyncState::Done(json!(["other", 1]))
        );
        assert_eq!(
            classify_poll(json!([q, 1, 2]), q),
            AsyncState::Done(json!([q, 1, 2]))
        );
        assert_eq!(classify_poll(json!(42), q), AsyncState::Done(json!(42)));
    }

    #[test]
    fn same_tick_callback_beats_zero_timeout() {
        let mut page = BoaPage::new().unwrap();
        let body = "var done = arguments[arguments.length - 1];\n\
                    window.setTimeout(function() { done(42); }, 0);";
        let value = run_on_page(&mut page, body, Duration::ZERO).unwrap();
        assert_eq!(value, json!(42));
    }

    #[test]
    fn synchronous_callback_completes_on_first_poll() {
        let mut page = BoaPage::new().unwrap();
        let body = "arguments[arguments.length - 1]({ answer: [4, 2] });";
        let value = run_on_page(&mut page, body, Duration::ZERO).unwrap();
        assert_eq!(value, json!({ "answer": [4, 2] }));
    }

    #[test]
    fn unbounded_timeout_has_no_driver_deadline() {
        let mut page = BoaPage::new().unwrap();
        let body = "var done = arguments[arguments.length - 1];\n\
                    window.setTimeout(function() { done(7); }, 10);";
        let value = run_on_page(&mut page, body, Duration::MAX).unwrap();
        assert_eq!(value, json!(7));
    }

    #[test]
    fn callback_receives_window_before_it() {
        let mut page = BoaPage::new().unwrap();
        let body = "var cb = arguments[arguments.length - 1];\n\
                    cb([arguments.length, arguments[arguments.length - 2] === window]);";
        let value = run_on_page(&mut page, body, Duration::from_millis(50)).unwrap();
        assert_eq!(value, json!([2, true]));
    }

    #[test]
    fn silent_scripts_time_out() {
        let mut page = BoaPage::new().unwrap();
        let started = Instant::now();
        let err = run_on_page(&mut page, "var ignored = 1;", Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, ScriptFault::Timeout(_)));
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[test]
    fn reload_while_pending_is_reported() {
        let mut page = BoaPage::new().unwrap();
        let before = page.document_id();
        let err = run_on_page(&mut page, "location.reload();", Duration::from_millis(500)).unwrap_err();
        assert_eq!(err, ScriptFault::PageReload);
        assert_ne!(page.document_id(), before);
    }

    #[test]
    fn synchronous_throw_is_a_runtime_fault_and_clears_the_slot() {
        let mut page = BoaPage::new().unwrap();
        let err = run_on_page(&mut page, "throw new Error('early');", Duration::from_millis(50))
            .unwrap_err();
        assert_eq!(err, ScriptFault::Runtime("early".into()));
        assert_eq!(
            page.evaluate("Object.keys(document.__webdriverAsyncExecutors).length")
                .unwrap(),
            HostValue::Integer(0)
        );
    }

    #[test]
    fn slot_is_released_after_completion() {
        let mut page = BoaPage::new().unwrap();
        run_on_page(&mut page, "arguments[arguments.length - 1](1);", Duration::ZERO).unwrap();
        assert_eq!(
            page.evaluate("Object.keys(document.__webdriverAsyncExecutors).length")
                .unwrap(),
            HostValue::Integer(0)
        );
    }

    #[test]
    fn failing_poll_means_reload() {
        let mut host = StubHost::new(vec![
            Ok(HostValue::Undefined),
            Err(HostError::Thrown { description: None }),
        ]);
        let mut registry: ElementRegistry<StubObject> = ElementRegistry::new();
        let mut marshaller = ResultMarshaller::new(&mut registry, MarshalOptions::default());
        let err = AsyncExecutionCoordinator::default()
            .execute(&mut host, &mut marshaller, "x", &[], Duration::ZERO)
            .unwrap_err();
        assert_eq!(err, ScriptFault::PageReload);
        assert_eq!(host.yields, 1);
        assert_eq!(host.compiled.len(), 2);
    }

    #[test]
    fn wrapper_compile_failure_surfaces_as_runtime_fault() {
        let mut host = StubHost::new(vec![]);
        host.fail_compile = true;
        let mut registry: ElementRegistry<StubObject> = ElementRegistry::new();
        let mut marshaller = ResultMarshaller::new(&mut registry, MarshalOptions::default());
        let err = AsyncExecutionCoordinator::default()
            .execute(&mut host, &mut marshaller, "x", &[], Duration::ZERO)
            .unwrap_err();
        assert!(matches!(err, ScriptFault::Runtime(_)));
        assert_eq!(host.yields, 0);
    }

    /// A page whose event loop never gets to run.
    struct FrozenPage(BoaPage);

    impl ScriptHost for FrozenPage {
        type Object = BoaObject;

        fn document_id(&self) -> DocumentId {
            self.0.document_id()
        }

        fn compile_function(&mut self, source: &str) -> Result<BoaObject, HostError> {
            self.0.compile_function(source)
        }

        fn call_function(
            &mut self,
            function: &BoaObject,
            receiver: &HostValue<BoaObject>,
            args: &[HostValue<BoaObject>],
        ) -> Result<HostValue<BoaObject>, HostError> {
            self.0.call_function(function, receiver, args)
        }

        fn window(&mut self) -> Result<BoaObject, HostError> {
            self.0.window()
        }

        fn object_kind(&mut self, object: &BoaObject) -> Result<ObjectKind, HostError> {
            self.0.object_kind(object)
        }

        fn object_identity(&mut self, object: &BoaObject) -> Result<u64, HostError> {
            self.0.object_identity(object)
        }

        fn property_names(&mut self, object: &BoaObject) -> Result<Vec<String>, HostError> {
            self.0.property_names(object)
        }
    }

    #[test]
    fn driver_deadline_bounds_frozen_pages() {
        let mut page = FrozenPage(BoaPage::new().unwrap());
        let mut registry = ElementRegistry::new();
        let mut marshaller = ResultMarshaller::new(&mut registry, MarshalOptions::default());
        let coordinator =
            AsyncExecutionCoordinator::new(Duration::from_millis(1), Duration::from_millis(20));

        let started = Instant::now();
        let err = coordinator
            .execute(&mut page, &mut marshaller, "var waiting = true;", &[], Duration::from_millis(10))
            .unwrap_err();
        assert!(matches!(err, ScriptFault::Timeout(_)));
        assert!(started.elapsed() >= Duration::from_millis(30));
    }
}

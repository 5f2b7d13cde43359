//! High level script bridge.
//!
//! Wires the argument binder, invoker, async coordinator and marshaller to a
//! single hosted page and exposes the `Invoke`/`InvokeAsync` surface a
//! command layer talks to, together with element handle bookkeeping across
//! navigations.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::elements::{ElementHandle, ElementRegistry};
use crate::execution::arguments::{ScriptArgument, bind_arguments};
use crate::execution::async_script::{
	AsyncExecutionCoordinator, DEFAULT_DEADLINE_GRACE, DEFAULT_POLL_INTERVAL,
};
use crate::execution::fault::{ScriptFault, ScriptResult, Status};
use crate::execution::invoker::{ScriptInvoker, wrap_function_body};
use crate::host::{DocumentId, ScriptHost};
use crate::marshal::{ArrayLikeDetection, DEFAULT_MAX_DEPTH, MarshalOptions, ResultMarshaller};
use crate::modules::events::{
	BridgeEvent, DocumentRetiredEvent, EventDispatcher, EventHandler, ExecutionFinishedEvent,
	ExecutionStartedEvent, LoggingHandler, MetricsHandler,
};
use crate::modules::metrics::{ExecutionMode, MetricsCollector};

/// Result alias used for bridge construction.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Configuration-level failures. Script failures are [`ScriptFault`]s.
#[derive(Debug, Error)]
pub enum BridgeError {
	#[error("invalid bridge configuration: {0}")]
	Config(#[from] serde_json::Error),
	#[error("invalid bridge configuration: {0}")]
	Invalid(String),
}

/// Outcome of one command as reported upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptResponse {
	pub status: Status,
	pub value: Value,
}

impl ScriptResponse {
	pub fn success(value: Value) -> Self {
		Self {
			status: Status::Success,
			value,
		}
	}

	/// Failure response; `value` is `{"message": "<description>"}`.
	pub fn fault(fault: &ScriptFault) -> Self {
		let mut value = Map::new();
		value.insert("message".to_string(), Value::String(fault.to_string()));
		Self {
			status: fault.status(),
			value: Value::Object(value),
		}
	}

	pub fn is_success(&self) -> bool {
		self.status.is_success()
	}

	pub fn message(&self) -> Option<&str> {
		if self.is_success() {
			return None;
		}
		self.value.get("message").and_then(Value::as_str)
	}
}

impl From<ScriptResult<Value>> for ScriptResponse {
	fn from(result: ScriptResult<Value>) -> Self {
		match result {
			Ok(value) => ScriptResponse::success(value),
			Err(fault) => ScriptResponse::fault(&fault),
		}
	}
}

/// Bridge configuration used by the builder.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptBridgeConfig {
	/// Timeout handed to the page timer of async scripts.
	pub async_script_timeout: Duration,
	pub poll_interval: Duration,
	/// Extra wall-clock time granted past the async timeout before the
	/// driver gives up on a page that stopped running its timers.
	pub deadline_grace: Duration,
	pub max_marshal_depth: usize,
	pub array_like: ArrayLikeDetection,
	pub enable_metrics: bool,
}

impl Default for ScriptBridgeConfig {
	fn default() -> Self {
		Self {
			async_script_timeout: Duration::ZERO,
			poll_interval: DEFAULT_POLL_INTERVAL,
			deadline_grace: DEFAULT_DEADLINE_GRACE,
			max_marshal_depth: DEFAULT_MAX_DEPTH,
			array_like: ArrayLikeDetection::default(),
			enable_metrics: true,
		}
	}
}

/// On-disk shape of [`ScriptBridgeConfig`], durations in milliseconds.
#[derive(Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
	async_script_timeout_ms: u64,
	poll_interval_ms: u64,
	deadline_grace_ms: u64,
	max_marshal_depth: usize,
	array_like: ArrayLikeDetection,
	enable_metrics: bool,
}

impl Default for ConfigFile {
	fn default() -> Self {
		ConfigFile::from(&ScriptBridgeConfig::default())
	}
}

impl From<&ScriptBridgeConfig> for ConfigFile {
	fn from(config: &ScriptBridgeConfig) -> Self {
		Self {
			async_script_timeout_ms: duration_ms(config.async_script_timeout),
			poll_interval_ms: duration_ms(config.poll_interval),
			deadline_grace_ms: duration_ms(config.deadline_grace),
			max_marshal_depth: config.max_marshal_depth,
			array_like: config.array_like,
			enable_metrics: config.enable_metrics,
		}
	}
}

impl From<ConfigFile> for ScriptBridgeConfig {
	fn from(file: ConfigFile) -> Self {
		Self {
			async_script_timeout: Duration::from_millis(file.async_script_timeout_ms),
			poll_interval: Duration::from_millis(file.poll_interval_ms),
			deadline_grace: Duration::from_millis(file.deadline_grace_ms),
			max_marshal_depth: file.max_marshal_depth,
			array_like: file.array_like,
			enable_metrics: file.enable_metrics,
		}
	}
}

fn duration_ms(duration: Duration) -> u64 {
	u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl ScriptBridgeConfig {
	/// Load a configuration from JSON. Missing fields keep their defaults.
	pub fn from_json(json: &str) -> BridgeResult<Self> {
		let file: ConfigFile = serde_json::from_str(json)?;
		let config = ScriptBridgeConfig::from(file);
		config.validate()?;
		Ok(config)
	}

	pub fn to_json(&self) -> BridgeResult<String> {
		Ok(serde_json::to_string_pretty(&ConfigFile::from(self))?)
	}

	pub fn validate(&self) -> BridgeResult<()> {
		if self.poll_interval.is_zero() {
			return Err(BridgeError::Invalid("poll interval must be positive".into()));
		}
		if self.max_marshal_depth == 0 {
			return Err(BridgeError::Invalid("marshal depth must be at least 1".into()));
		}
		Ok(())
	}

	pub fn marshal_options(&self) -> MarshalOptions {
		MarshalOptions {
			max_depth: self.max_marshal_depth,
			array_like: self.array_like,
			..MarshalOptions::default()
		}
	}
}

/// Fluent builder for [`ScriptBridge`].
pub struct ScriptBridgeBuilder {
	config: ScriptBridgeConfig,
	handlers: Vec<Arc<dyn EventHandler>>,
}

impl ScriptBridgeBuilder {
	pub fn new() -> Self {
		Self {
			config: ScriptBridgeConfig::default(),
			handlers: Vec::new(),
		}
	}

	pub fn with_config(mut self, config: ScriptBridgeConfig) -> Self {
		self.config = config;
		self
	}

	pub fn with_async_script_timeout(mut self, timeout: Duration) -> Self {
		self.config.async_script_timeout = timeout;
		self
	}

	pub fn with_poll_interval(mut self, interval: Duration) -> Self {
		self.config.poll_interval = interval;
		self
	}

	pub fn with_deadline_grace(mut self, grace: Duration) -> Self {
		self.config.deadline_grace = grace;
		self
	}

	pub fn with_max_marshal_depth(mut self, depth: usize) -> Self {
		self.config.max_marshal_depth = depth;
		self
	}

	pub fn with_array_like_detection(mut self, detection: ArrayLikeDetection) -> Self {
		self.config.array_like = detection;
		self
	}

	pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
		self.handlers.push(handler);
		self
	}

	pub fn disable_metrics(mut self) -> Self {
		self.config.enable_metrics = false;
		self
	}

	pub fn build<H: ScriptHost>(self, host: H) -> BridgeResult<ScriptBridge<H>> {
		let mut bridge = ScriptBridge::with_config(host, self.config)?;
		for handler in self.handlers {
			bridge.events.register_handler(handler);
		}
		Ok(bridge)
	}
}

impl Default for ScriptBridgeBuilder {
	fn default() -> Self {
		Self::new()
	}
}

/// Script execution front end bound to one hosted page.
pub struct ScriptBridge<H: ScriptHost> {
	host: H,
	config: ScriptBridgeConfig,
	registry: ElementRegistry<H::Object>,
	coordinator: AsyncExecutionCoordinator,
	metrics: Option<MetricsCollector>,
	events: EventDispatcher,
	last_document: DocumentId,
}

impl<H: ScriptHost> ScriptBridge<H> {
	/// Construct a bridge with default configuration.
	pub fn new(host: H) -> Self {
		let config = ScriptBridgeConfig::default();
		let metrics = config.enable_metrics.then(MetricsCollector::new);
		Self::assemble(host, config, metrics)
	}

	pub fn with_config(host: H, config: ScriptBridgeConfig) -> BridgeResult<Self> {
		config.validate()?;
		let metrics = config.enable_metrics.then(MetricsCollector::new);
		Ok(Self::assemble(host, config, metrics))
	}

	fn assemble(host: H, config: ScriptBridgeConfig, metrics: Option<MetricsCollector>) -> Self {
		let mut events = EventDispatcher::new();
		events.register_handler(Arc::new(LoggingHandler));
		if let Some(ref collector) = metrics {
			events.register_handler(Arc::new(MetricsHandler::new(collector.clone())));
		}

		let coordinator = AsyncExecutionCoordinator::new(config.poll_interval, config.deadline_grace);
		let last_document = host.document_id();

		Self {
			host,
			config,
			registry: ElementRegistry::new(),
			coordinator,
			metrics,
			events,
			last_document,
		}
	}

	pub fn host(&self) -> &H {
		&self.host
	}

	pub fn host_mut(&mut self) -> &mut H {
		&mut self.host
	}

	pub fn into_host(self) -> H {
		self.host
	}

	pub fn config(&self) -> &ScriptBridgeConfig {
		&self.config
	}

	pub fn metrics(&self) -> Option<&MetricsCollector> {
		self.metrics.as_ref()
	}

	pub fn registry(&self) -> &ElementRegistry<H::Object> {
		&self.registry
	}

	pub fn register_handler(&mut self, handler: Arc<dyn EventHandler>) {
		self.events.register_handler(handler);
	}

	pub fn async_script_timeout(&self) -> Duration {
		self.config.async_script_timeout
	}

	pub fn set_async_script_timeout(&mut self, timeout: Duration) {
		self.config.async_script_timeout = timeout;
	}

	/// Run a function body synchronously and report `{status, value}`.
	pub fn invoke(&mut self, body: &str, args: &[ScriptArgument]) -> ScriptResponse {
		self.execute(body, args).into()
	}

	/// Run a function body under the async callback protocol using the
	/// configured async script timeout.
	pub fn invoke_async(&mut self, body: &str, args: &[ScriptArgument]) -> ScriptResponse {
		self.execute_async(body, args).into()
	}

	pub fn invoke_async_with_timeout(
		&mut self,
		body: &str,
		args: &[ScriptArgument],
		timeout: Duration,
	) -> ScriptResponse {
		self.execute_async_with_timeout(body, args, timeout).into()
	}

	pub fn execute(&mut self, body: &str, args: &[ScriptArgument]) -> ScriptResult<Value> {
		self.run(ExecutionMode::Sync, body, args, None)
	}

	pub fn execute_async(&mut self, body: &str, args: &[ScriptArgument]) -> ScriptResult<Value> {
		let timeout = self.config.async_script_timeout;
		self.run(ExecutionMode::Async, body, args, Some(timeout))
	}

	pub fn execute_async_with_timeout(
		&mut self,
		body: &str,
		args: &[ScriptArgument],
		timeout: Duration,
	) -> ScriptResult<Value> {
		self.run(ExecutionMode::Async, body, args, Some(timeout))
	}

	/// Register a native element found outside of script execution.
	pub fn register_element(&mut self, node: H::Object) -> ElementHandle {
		self.sync_document();
		self.registry.register(node, self.last_document)
	}

	/// Resolve a handle against the document currently loaded.
	pub fn resolve_element(&mut self, token: &str) -> ScriptResult<H::Object> {
		self.sync_document();
		self.registry.resolve(token, self.last_document)
	}

	fn run(
		&mut self,
		mode: ExecutionMode,
		body: &str,
		args: &[ScriptArgument],
		timeout: Option<Duration>,
	) -> ScriptResult<Value> {
		self.sync_document();
		let document = self.last_document;
		self.events.dispatch(BridgeEvent::ExecutionStarted(ExecutionStartedEvent {
			mode,
			document,
			argument_count: args.len(),
			timestamp: chrono::Utc::now(),
		}));

		let started = Instant::now();
		let outcome = self.run_once(document, body, args, timeout);
		let latency = started.elapsed();

		let (status, message) = match &outcome {
			Ok(_) => (Status::Success, None),
			Err(fault) => (fault.status(), Some(fault.to_string())),
		};
		self.events.dispatch(BridgeEvent::ExecutionFinished(ExecutionFinishedEvent {
			mode,
			document,
			status,
			message,
			latency,
			timestamp: chrono::Utc::now(),
		}));

		self.sync_document();
		outcome
	}

	fn run_once(
		&mut self,
		document: DocumentId,
		body: &str,
		args: &[ScriptArgument],
		timeout: Option<Duration>,
	) -> ScriptResult<Value> {
		let bound = bind_arguments(&self.registry, document, args)?;
		let mut marshaller = ResultMarshaller::new(&mut self.registry, self.config.marshal_options());

		match timeout {
			None => {
				let raw = ScriptInvoker::new().execute(&mut self.host, &wrap_function_body(body), &bound)?;
				marshaller.to_json(&mut self.host, raw)
			}
			Some(timeout) => {
				self.coordinator
					.execute(&mut self.host, &mut marshaller, body, &bound, timeout)
			}
		}
	}

	/// Retire the handles of a document the host no longer shows.
	fn sync_document(&mut self) {
		let current = self.host.document_id();
		if current == self.last_document {
			return;
		}

		let previous = std::mem::replace(&mut self.last_document, current);
		let released = self.registry.retire_document(previous);
		self.events.dispatch(BridgeEvent::DocumentRetired(DocumentRetiredEvent {
			previous,
			current,
			released_handles: released,
			timestamp: chrono::Utc::now(),
		}));
	}
}

//! Worker-side bridge
//!
//! Runs inside a spawned worker. One [`WorkerBridge`] owns the worker's single
//! message channel, creates language-service instances on `$initialize` and
//! dispatches every capability request to the instance named in its params.
//! Replies reuse the request's own JSON-RPC id.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, OnceLock};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tokio::io::BufReader;

use super::handle::WorkerPort;
use super::protocol::{
    DocumentParams, InitializeParams, Message, Request, Response, RpcError, error_codes, methods,
};
use super::transport;
use crate::models::document::{
    CompletionItem, Diagnostic, FormattingOptions, Hover, Position, Range, TextDocument, TextEdit,
};
use crate::models::providers::Capability;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Operation not supported by this service")]
    Unsupported,

    #[error("{0}")]
    InvalidParams(String),

    #[error("{0}")]
    Failed(String),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// A language service hosted by a worker. Unimplemented features answer
/// `Unsupported`, which travels back as "method not found".
pub trait LanguageService: Send {
    fn hover(
        &mut self,
        _document: &TextDocument,
        _position: Position,
    ) -> ServiceResult<Option<Hover>> {
        Err(ServiceError::Unsupported)
    }

    fn completion(
        &mut self,
        _document: &TextDocument,
        _position: Position,
    ) -> ServiceResult<Vec<CompletionItem>> {
        Err(ServiceError::Unsupported)
    }

    fn diagnostics(&mut self, _document: &TextDocument) -> ServiceResult<Vec<Diagnostic>> {
        Err(ServiceError::Unsupported)
    }

    fn format(
        &mut self,
        _document: &TextDocument,
        _options: &FormattingOptions,
    ) -> ServiceResult<Vec<TextEdit>> {
        Err(ServiceError::Unsupported)
    }

    fn format_range(
        &mut self,
        _document: &TextDocument,
        _range: Range,
        _options: &FormattingOptions,
    ) -> ServiceResult<Vec<TextEdit>> {
        Err(ServiceError::Unsupported)
    }

    /// Capabilities without a dedicated method above
    fn other(&mut self, _capability: Capability, _params: &DocumentParams) -> ServiceResult<Value> {
        Err(ServiceError::Unsupported)
    }
}

/// Builds a service instance from the `$initialize` options blob
pub type ServiceFactory = Arc<dyn Fn(&Value) -> Box<dyn LanguageService> + Send + Sync>;

pub fn service_factory<F, S>(f: F) -> ServiceFactory
where
    F: Fn(&Value) -> S + Send + Sync + 'static,
    S: LanguageService + 'static,
{
    Arc::new(move |options| Box::new(f(options)))
}

#[derive(Default)]
pub struct WorkerBridge {
    initialized: bool,
    shutdown: bool,
    factories: HashMap<String, ServiceFactory>,
    instances: HashMap<String, Box<dyn LanguageService>>,
}

impl WorkerBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wire the bridge to its service. A second call is a no-op and returns `false`.
    pub fn initialize(&mut self, name: impl Into<String>, factory: ServiceFactory) -> bool {
        if self.initialized {
            tracing::debug!("Worker bridge already initialized, ignoring");
            return false;
        }
        self.initialized = true;
        self.factories.insert(name.into(), factory);
        true
    }

    /// Host an additional named service in the same worker
    pub fn add_service(&mut self, name: impl Into<String>, factory: ServiceFactory) -> &mut Self {
        self.factories.insert(name.into(), factory);
        self
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown
    }

    /// Handle one raw message; returns the reply to post back, if any.
    pub fn handle(&mut self, raw: &str) -> Option<String> {
        let response = match Message::parse(raw) {
            Ok(Message::Request(request)) => self.handle_request(request),
            Ok(Message::Notification(notification)) => {
                if notification.method == methods::SHUTDOWN {
                    self.shutdown = true;
                }
                return None;
            }
            Ok(Message::Response(_)) => return None,
            Err(_) => Response::error(None, RpcError::parse_error()),
        };

        match serde_json::to_string(&response) {
            Ok(json) => Some(json),
            Err(e) => {
                tracing::error!("Failed to serialize worker response: {}", e);
                None
            }
        }
    }

    fn handle_request(&mut self, request: Request) -> Response {
        let id = request.id.clone();
        match self.dispatch(&request.method, request.params) {
            Ok(result) => Response::success(id, result),
            Err(error) => Response::error(Some(id), error),
        }
    }

    fn dispatch(&mut self, method: &str, params: Option<Value>) -> Result<Value, RpcError> {
        if method == methods::INITIALIZE {
            let params: InitializeParams = parse_params(params)?;
            return self.create_instance(params);
        }
        if method == methods::SHUTDOWN {
            self.shutdown = true;
            return Ok(Value::Null);
        }

        let capability =
            Capability::from_method(method).ok_or_else(|| RpcError::method_not_found(method))?;
        let params: DocumentParams = parse_params(params)?;
        let service = self.instances.get_mut(&params.service).ok_or_else(|| {
            RpcError::new(
                error_codes::SERVICE_NOT_INITIALIZED,
                format!("Service not initialized: {}", params.service),
            )
        })?;

        let document = &params.document;
        let options = params.options.clone().unwrap_or_default();
        let result = match capability {
            Capability::Hover => {
                to_value(service.hover(document, require(params.position, "position")?))
            }
            Capability::CompletionItem => {
                to_value(service.completion(document, require(params.position, "position")?))
            }
            Capability::Diagnostics => to_value(service.diagnostics(document)),
            Capability::DocumentFormattingEdit => to_value(service.format(document, &options)),
            Capability::DocumentRangeFormattingEdit => to_value(service.format_range(
                document,
                require(params.range.clone(), "range")?,
                &options,
            )),
            other => service.other(other, &params),
        };

        result.map_err(|e| match e {
            ServiceError::Unsupported => RpcError::method_not_found(method),
            ServiceError::InvalidParams(msg) => RpcError::invalid_params(&msg),
            ServiceError::Failed(msg) => RpcError::internal_error(&msg),
        })
    }

    fn create_instance(&mut self, params: InitializeParams) -> Result<Value, RpcError> {
        if self.instances.contains_key(&params.service) {
            return Ok(Value::Bool(true));
        }
        let factory = self.factories.get(&params.service).ok_or_else(|| {
            RpcError::method_not_found(&format!("service '{}'", params.service))
        })?;
        let instance = factory(&params.options);
        tracing::debug!("Worker service '{}' created", params.service);
        self.instances.insert(params.service, instance);
        Ok(Value::Bool(true))
    }

    /// Serve a channel port until it closes or `$shutdown` arrives. Blocks the
    /// calling thread.
    pub fn run(&mut self, port: WorkerPort) {
        let WorkerPort {
            mut inbound,
            outbound,
        } = port;

        while let Some(raw) = inbound.blocking_recv() {
            if let Some(reply) = self.handle(&raw)
                && outbound.send(reply).is_err()
            {
                break;
            }
            if self.shutdown {
                break;
            }
        }
        tracing::debug!("Worker bridge stopped");
    }
}

fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, RpcError> {
    let params = params.ok_or_else(|| RpcError::invalid_params("missing params"))?;
    serde_json::from_value(params).map_err(|e| RpcError::invalid_params(&e.to_string()))
}

fn require<T>(value: Option<T>, field: &str) -> Result<T, RpcError> {
    value.ok_or_else(|| RpcError::invalid_params(&format!("missing {}", field)))
}

fn to_value<T: Serialize>(result: ServiceResult<T>) -> ServiceResult<Value> {
    result.and_then(|v| serde_json::to_value(v).map_err(|e| ServiceError::Failed(e.to_string())))
}

static PROCESS_BRIDGE: OnceLock<Mutex<WorkerBridge>> = OnceLock::new();

fn process_bridge() -> &'static Mutex<WorkerBridge> {
    PROCESS_BRIDGE.get_or_init(|| Mutex::new(WorkerBridge::new()))
}

/// Initialize the bridge of a stand-alone worker executable. Idempotent.
pub fn initialize(name: &str, factory: ServiceFactory) -> bool {
    match process_bridge().lock() {
        Ok(mut bridge) => bridge.initialize(name, factory),
        Err(poisoned) => poisoned.into_inner().initialize(name, factory),
    }
}

/// Serve the process bridge over framed stdin/stdout until stdin closes.
pub fn serve_stdio() -> io::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let mut reader = BufReader::new(tokio::io::stdin());
        let mut writer = tokio::io::stdout();

        while let Some(raw) = transport::read_message(&mut reader).await? {
            let (reply, shutdown) = {
                let mut bridge = match process_bridge().lock() {
                    Ok(bridge) => bridge,
                    Err(poisoned) => poisoned.into_inner(),
                };
                (bridge.handle(&raw), bridge.is_shutdown())
            };
            if let Some(reply) = reply {
                transport::write_message(&mut writer, &reply).await?;
            }
            if shutdown {
                break;
            }
        }
        Ok::<(), io::Error>(())
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use super::super::protocol::RequestId;
    use crate::models::document::DiagnosticSeverity;
    use serde_json::json;

    /// Upper-cases the document on format, reports every `TODO` as a warning.
    pub(crate) struct ShoutingService {
        pub(crate) greeting: String,
    }

    impl LanguageService for ShoutingService {
        fn hover(
            &mut self,
            document: &TextDocument,
            position: Position,
        ) -> ServiceResult<Option<Hover>> {
            Ok(Some(Hover {
                contents: vec![format!("{} {}:{}", self.greeting, document.uri, position.line)],
                range: None,
            }))
        }

        fn diagnostics(&mut self, document: &TextDocument) -> ServiceResult<Vec<Diagnostic>> {
            Ok(document
                .text
                .lines()
                .enumerate()
                .filter(|(_, line)| line.contains("TODO"))
                .map(|(i, _)| {
                    Diagnostic::new(
                        Range::point(Position::new(i as u32, 0)),
                        DiagnosticSeverity::Warning,
                        "unresolved TODO",
                    )
                })
                .collect())
        }

        fn format(
            &mut self,
            document: &TextDocument,
            _options: &FormattingOptions,
        ) -> ServiceResult<Vec<TextEdit>> {
            Ok(vec![TextEdit {
                range: document.full_range(),
                new_text: document.text.to_uppercase(),
            }])
        }
    }

    pub(crate) fn shouting_factory() -> ServiceFactory {
        service_factory(|options: &Value| ShoutingService {
            greeting: options["greeting"].as_str().unwrap_or("hello").to_string(),
        })
    }

    fn request(id: u64, method: &str, params: Value) -> String {
        serde_json::to_string(&Request::new(id, method, Some(params))).unwrap()
    }

    fn reply(bridge: &mut WorkerBridge, raw: &str) -> Response {
        serde_json::from_str(&bridge.handle(raw).unwrap()).unwrap()
    }

    fn doc_params(text: &str) -> Value {
        json!({
            "service": "shout",
            "document": { "uri": "file:///a.txt", "languageId": "plaintext", "text": text },
            "position": { "line": 3, "character": 1 },
        })
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let mut bridge = WorkerBridge::new();
        assert!(bridge.initialize("shout", shouting_factory()));
        assert!(!bridge.initialize("other", shouting_factory()));
        assert!(bridge.is_initialized());
        assert!(!bridge.factories.contains_key("other"));
    }

    #[test]
    fn test_dispatch_to_named_instance() {
        let mut bridge = WorkerBridge::new();
        bridge.initialize("shout", shouting_factory());

        let init = reply(
            &mut bridge,
            &request(
                1,
                methods::INITIALIZE,
                json!({ "service": "shout", "options": { "greeting": "hey" } }),
            ),
        );
        assert_eq!(init.id, Some(RequestId::Number(1)));
        assert_eq!(init.result, Some(json!(true)));

        let hover = reply(&mut bridge, &request(42, "provideHover", doc_params("x")));
        assert_eq!(hover.id, Some(RequestId::Number(42)));
        let contents = hover.into_result().unwrap();
        assert_eq!(contents["contents"][0], "hey file:///a.txt:3");
    }

    #[test]
    fn test_additional_service_in_same_worker() {
        let mut bridge = WorkerBridge::new();
        bridge.initialize("shout", shouting_factory());
        bridge.add_service("whisper", shouting_factory());

        for (id, service, greeting) in [(1, "shout", "HEY"), (2, "whisper", "psst")] {
            let init = reply(
                &mut bridge,
                &request(
                    id,
                    methods::INITIALIZE,
                    json!({ "service": service, "options": { "greeting": greeting } }),
                ),
            );
            assert_eq!(init.result, Some(json!(true)));
        }

        let mut params = doc_params("x");
        params["service"] = json!("whisper");
        let hover = reply(&mut bridge, &request(3, "provideHover", params));
        assert_eq!(hover.into_result().unwrap()["contents"][0], "psst file:///a.txt:3");

        let hover = reply(&mut bridge, &request(4, "provideHover", doc_params("x")));
        assert_eq!(hover.into_result().unwrap()["contents"][0], "HEY file:///a.txt:3");
    }

    #[test]
    fn test_request_before_initialize_fails() {
        let mut bridge = WorkerBridge::new();
        bridge.initialize("shout", shouting_factory());

        let resp = reply(&mut bridge, &request(2, "doValidation", doc_params("TODO")));
        let err = resp.into_result().unwrap_err();
        assert_eq!(err.code, error_codes::SERVICE_NOT_INITIALIZED);
    }

    #[test]
    fn test_unsupported_capability_maps_to_method_not_found() {
        let mut bridge = WorkerBridge::new();
        bridge.initialize("shout", shouting_factory());
        reply(&mut bridge, &request(1, methods::INITIALIZE, json!({ "service": "shout" })));

        let resp = reply(&mut bridge, &request(3, "provideCompletionItems", doc_params("")));
        assert_eq!(resp.into_result().unwrap_err().code, error_codes::METHOD_NOT_FOUND);

        let resp = reply(&mut bridge, &request(4, "provideNothing", doc_params("")));
        assert_eq!(resp.into_result().unwrap_err().code, error_codes::METHOD_NOT_FOUND);
    }

    #[test]
    fn test_garbage_gets_parse_error_and_shutdown_stops() {
        let mut bridge = WorkerBridge::new();
        let resp = reply(&mut bridge, "not json");
        assert_eq!(resp.id, None);
        assert_eq!(resp.into_result().unwrap_err().code, error_codes::PARSE_ERROR);

        let note = serde_json::to_string(&super::super::protocol::Notification::new(
            methods::SHUTDOWN,
            None,
        ))
        .unwrap();
        assert!(bridge.handle(&note).is_none());
        assert!(bridge.is_shutdown());
    }

    #[test]
    fn test_run_over_port() {
        let (port, remote) = WorkerPort::pair();
        let handle = std::thread::spawn(move || {
            let mut bridge = WorkerBridge::new();
            bridge.initialize("shout", shouting_factory());
            bridge.run(port);
        });

        let super::super::handle::RemotePort {
            to_worker,
            mut from_worker,
        } = remote;
        to_worker
            .send(request(1, methods::INITIALIZE, json!({ "service": "shout" })))
            .unwrap();
        to_worker
            .send(request(2, "doValidation", doc_params("ok\nTODO: fix")))
            .unwrap();
        drop(to_worker);

        let _init = from_worker.blocking_recv().unwrap();
        let raw = from_worker.blocking_recv().unwrap();
        let diagnostics: Response = serde_json::from_str(&raw).unwrap();
        let value = diagnostics.into_result().unwrap();
        assert_eq!(value.as_array().unwrap().len(), 1);
        assert_eq!(value[0]["range"]["start"]["line"], 1);

        handle.join().unwrap();
    }
}

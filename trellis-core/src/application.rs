// Application bootstrapper, request dispatch and HTTP server

use crate::catalog::TypeCatalog;
use crate::context::RequestContext;
use crate::descriptor::{MarkerKind, TypeDescriptor};
use crate::error::{Error, Result};
use crate::events::EventBus;
use crate::http::{CONTENT_TYPE, HttpRequest, HttpResponse, Reply};
use crate::logging::{debug, error, info, warn};
use crate::resolver::Resolver;
use crate::routing::{HttpMethod, RouteTarget, Router};
use http_body_util::{BodyExt, Full};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode, body::Incoming as IncomingBody};
use hyper_util::rt::TokioIo;
use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use trellis_config::ConfigManager;

/// Configuration key for the listening port
pub const HTTP_PORT_KEY: &str = "http_port";
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Builds an [`Application`] and runs the boot scan
#[derive(Default)]
pub struct ApplicationBuilder {
    catalog: Option<TypeCatalog>,
    config: Option<ConfigManager>,
    events: Option<EventBus>,
    router: Router,
}

impl ApplicationBuilder {
    /// Types to scan; defaults to everything submitted with `register_type!`
    pub fn catalog(mut self, catalog: TypeCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn config(mut self, config: ConfigManager) -> Self {
        self.config = Some(config);
        self
    }

    pub fn events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn before_request<F>(mut self, hook: F) -> Self
    where
        F: Fn(&HttpRequest) -> Option<HttpResponse> + Send + Sync + 'static,
    {
        self.router.before_request(hook);
        self
    }

    pub fn after_request<F>(mut self, hook: F) -> Self
    where
        F: Fn(&HttpRequest, &mut HttpResponse) + Send + Sync + 'static,
    {
        self.router.after_request(hook);
        self
    }

    pub fn not_found<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str, &str) -> HttpResponse + Send + Sync + 'static,
    {
        self.router.set_not_found(handler);
        self
    }

    /// Scan controllers into routes, collect CLI commands and subscribe
    /// event listeners
    pub fn build(self) -> Result<Application> {
        info!("Bootstrapping Trellis application");

        let catalog = self.catalog.unwrap_or_else(TypeCatalog::discover);
        let config = self.config.unwrap_or_default();
        let events = self.events.unwrap_or_default();
        let resolver = Resolver::new(catalog.clone(), config, events.clone());
        let mut router = self.router;

        debug!(types = catalog.len(), "Scanning application types");

        for controller in catalog.find_by_marker(MarkerKind::Controller)? {
            register_controller(&catalog, &mut router, &controller)?;
        }

        let mut commands = IndexMap::new();
        for controller in catalog.find_by_marker(MarkerKind::CliController)? {
            register_commands(&mut commands, &controller);
        }

        let listeners = events.register_listeners(&catalog, &resolver)?;

        info!(
            routes = router.len(),
            commands = commands.len(),
            listeners,
            "Application bootstrap complete"
        );

        Ok(Application {
            resolver,
            router: Arc::new(router),
            commands: Arc::new(commands),
        })
    }
}

fn register_controller(
    catalog: &TypeCatalog,
    router: &mut Router,
    controller: &TypeDescriptor,
) -> Result<()> {
    let Some(marker) = controller.controller() else {
        return Ok(());
    };
    let base = marker.base_url.trim_end_matches('/');

    let mut crud = false;
    if let Some(service) = &marker.service {
        if !controller.supports_dynamic_methods() {
            return Err(Error::InvalidArgument(format!(
                "controller {} declares service {} but does not support dynamic methods",
                controller.name(),
                service
            )));
        }
        let service_descriptor = catalog.describe(service)?;
        let has_entity = service_descriptor
            .service()
            .is_some_and(|s| s.entity.is_some());
        if has_entity && !service_descriptor.supports_dynamic_methods() {
            return Err(Error::InvalidArgument(format!(
                "service {} declares an entity but does not support dynamic methods",
                service
            )));
        }
        crud = has_entity;
    }

    if crud {
        let routes = [
            (HttpMethod::GET, format!("{}/one/:id", base), "one"),
            (HttpMethod::POST, join(base, ""), "list"),
            (HttpMethod::PUT, join(base, ""), "create"),
            (HttpMethod::PATCH, format!("{}/:id", base), "update"),
            (HttpMethod::DELETE, format!("{}/:id", base), "delete"),
        ];
        for (method, pattern, action) in routes {
            info!(
                method = %method,
                pattern = %pattern,
                controller = controller.name(),
                action,
                "Registered CRUD route"
            );
            router.add_route(method, &pattern, RouteTarget::new(controller.name(), action));
        }
    }

    for method in controller.methods() {
        let Some(route) = &method.route else {
            continue;
        };
        if route.method.is_empty() || route.path.is_empty() {
            warn!(
                controller = controller.name(),
                method = %method.name,
                "Skipping route with an empty method or path"
            );
            continue;
        }
        let http_method: HttpMethod = route.method.parse()?;
        let pattern = join(base, &route.path);
        info!(
            method = %http_method,
            pattern = %pattern,
            controller = controller.name(),
            action = %method.name,
            "Registered route"
        );
        router.add_route(
            http_method,
            &pattern,
            RouteTarget::new(controller.name(), method.name.clone()).produces(route.produces.clone()),
        );
    }

    Ok(())
}

fn register_commands(commands: &mut IndexMap<String, RouteTarget>, controller: &TypeDescriptor) {
    let base = controller
        .cli_controller()
        .map(|marker| marker.base_action.trim_matches('/'))
        .unwrap_or_default();

    for method in controller.methods() {
        let Some(cli) = &method.cli else {
            continue;
        };
        let action = if base.is_empty() {
            cli.action.clone()
        } else {
            format!("{}/{}", base, cli.action)
        };
        debug!(action = %action, controller = controller.name(), "Registered CLI command");
        commands.insert(action, RouteTarget::new(controller.name(), method.name.clone()));
    }
}

/// `base` + `/` + `path`, without doubled or trailing slashes
fn join(base: &str, path: &str) -> String {
    let path = path.trim_matches('/');
    match (base.is_empty(), path.is_empty()) {
        (true, true) => "/".to_string(),
        (true, false) => format!("/{}", path),
        (false, true) => base.to_string(),
        (false, false) => format!("{}/{}", base, path),
    }
}

/// A booted application: resolver, route table and CLI commands
#[derive(Clone)]
pub struct Application {
    resolver: Resolver,
    router: Arc<Router>,
    commands: Arc<IndexMap<String, RouteTarget>>,
}

impl Application {
    pub fn builder() -> ApplicationBuilder {
        ApplicationBuilder::default()
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn config(&self) -> &ConfigManager {
        self.resolver.config()
    }

    pub fn commands(&self) -> impl Iterator<Item = &str> {
        self.commands.keys().map(String::as_str)
    }

    /// Port from the `http_port` setting
    pub fn configured_port(&self) -> u16 {
        self.config().get_or(HTTP_PORT_KEY, DEFAULT_HTTP_PORT)
    }

    /// Handle one request end to end. Failures become JSON error responses.
    pub fn handle(&self, mut request: HttpRequest) -> HttpResponse {
        if let Some(mut response) = self.router.run_before(&request) {
            debug!(method = %request.method, path = %request.path, "Request short-circuited");
            self.router.run_after(&request, &mut response);
            return response;
        }

        let mut response = match self.router.match_route(&request.method, &request.path) {
            Some(matched) => {
                request.path_params = matched.params;
                self.dispatch(&request, &matched.target)
                    .unwrap_or_else(|err| {
                        if err.is_server_error() {
                            error!(
                                method = %request.method,
                                path = %request.path,
                                error = %err,
                                "Request failed"
                            );
                        } else {
                            warn!(
                                method = %request.method,
                                path = %request.path,
                                error = %err,
                                "Request rejected"
                            );
                        }
                        HttpResponse::from_error(&err)
                    })
            }
            None => self.router.not_found(&request.method, &request.path),
        };

        self.router.run_after(&request, &mut response);
        response
    }

    fn dispatch(&self, request: &HttpRequest, target: &RouteTarget) -> Result<HttpResponse> {
        let ctx = RequestContext::from_request(
            request.body_json(),
            &request.path_params,
            request.query_params.clone(),
        );

        debug!(
            method = %request.method,
            path = %request.path,
            controller = %target.type_name,
            action = %target.method,
            "Dispatching request"
        );

        let controller = self
            .resolver
            .instantiate(&target.type_name, Some(MarkerKind::Controller), &ctx)?;
        let reply = self.resolver.invoke(&controller, &target.method, &ctx)?;

        let declared = match (&reply, &target.produces) {
            (Reply::Response(_), _) => None,
            (_, produces) => produces.clone(),
        };
        let mut response = reply.into_response()?;
        if let Some(mime) = declared {
            response.headers.insert(CONTENT_TYPE.to_string(), mime);
        }
        Ok(response)
    }

    /// Run a CLI command. `argv[1]` is the action, the rest are
    /// `--key=value` parameters; a bare `--flag` is `true`.
    pub fn run_cli<S: AsRef<str>>(&self, argv: &[S]) -> Result<Reply> {
        let action = argv
            .get(1)
            .map(|arg| arg.as_ref().to_string())
            .ok_or_else(|| Error::UnknownCommand(String::new()))?;
        let target = self
            .commands
            .get(&action)
            .ok_or_else(|| Error::UnknownCommand(action.clone()))?;

        let mut ctx = RequestContext::new();
        for arg in argv.iter().skip(2) {
            let arg = arg.as_ref();
            let (key, value) = match arg.split_once('=') {
                Some((key, value)) => (key, JsonValue::String(value.to_string())),
                None => (arg, JsonValue::Bool(true)),
            };
            ctx.insert(key.trim_start_matches('-'), value);
        }

        info!(action = %action, controller = %target.type_name, "Running CLI command");
        let controller = self
            .resolver
            .instantiate(&target.type_name, Some(MarkerKind::CliController), &ctx)?;
        self.resolver.invoke(&controller, &target.method, &ctx)
    }

    /// Start the HTTP server on the specified port
    pub async fn listen(self, port: u16) -> Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Serve HTTP/1.1 connections from `listener` until it fails
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        info!(addr = %listener.local_addr()?, "Server listening");

        loop {
            let (stream, peer) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let app = self.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req: Request<IncomingBody>| {
                    let app = app.clone();
                    async move { handle_request(req, app).await }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    debug!(peer = %peer, error = %err, "Error serving connection");
                }
            });
        }
    }
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("routes", &self.router.len())
            .field("commands", &self.commands.len())
            .field("resolver", &self.resolver)
            .finish()
    }
}

/// Convert a hyper request, run it on the blocking pool, convert back
async fn handle_request(
    req: Request<IncomingBody>,
    app: Application,
) -> std::result::Result<Response<Full<bytes::Bytes>>, hyper::Error> {
    let method = req.method().to_string();
    let target = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let mut request = HttpRequest::new(method, target);
    for (name, value) in req.headers() {
        if let Ok(value) = value.to_str() {
            request.headers.insert(name.to_string(), value.to_string());
        }
    }
    request.body = req.collect().await?.to_bytes().to_vec();

    let response = match tokio::task::spawn_blocking(move || app.handle(request)).await {
        Ok(response) => response,
        Err(err) => {
            error!(error = %err, "Request handler panicked");
            HttpResponse::from_error(&Error::Internal(err.to_string()))
        }
    };

    let mut builder = Response::builder().status(response.status);
    for (key, value) in response.headers {
        builder = builder.header(key, value);
    }

    Ok(builder
        .body(Full::new(bytes::Bytes::from(response.body)))
        .unwrap_or_else(|err| {
            error!(error = %err, "Cannot build response");
            let mut fallback = Response::new(Full::new(bytes::Bytes::new()));
            *fallback.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            fallback
        }))
}

// Routing table and segment matcher for HTTP requests

use crate::error::Error;
use crate::http::{HttpRequest, HttpResponse};
use crate::logging::{debug, trace};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// HTTP methods
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    GET,
    POST,
    PUT,
    PATCH,
    DELETE,
    HEAD,
    OPTIONS,
    PING,
}

impl HttpMethod {
    pub const ALL: [HttpMethod; 8] = [
        HttpMethod::GET,
        HttpMethod::POST,
        HttpMethod::PUT,
        HttpMethod::PATCH,
        HttpMethod::DELETE,
        HttpMethod::HEAD,
        HttpMethod::OPTIONS,
        HttpMethod::PING,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::GET => "GET",
            HttpMethod::POST => "POST",
            HttpMethod::PUT => "PUT",
            HttpMethod::PATCH => "PATCH",
            HttpMethod::DELETE => "DELETE",
            HttpMethod::HEAD => "HEAD",
            HttpMethod::OPTIONS => "OPTIONS",
            HttpMethod::PING => "PING",
        }
    }
}

impl FromStr for HttpMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HttpMethod::ALL
            .into_iter()
            .find(|method| method.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::InvalidArgument(format!("unsupported HTTP method: {}", s)))
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The controller type and method a route dispatches to
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteTarget {
    pub type_name: String,
    pub method: String,
    /// Content type declared by the route, applied to serialized replies
    pub produces: Option<String>,
}

impl RouteTarget {
    pub fn new(type_name: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            method: method.into(),
            produces: None,
        }
    }

    pub fn produces(mut self, mime: Option<String>) -> Self {
        self.produces = mime;
        self
    }
}

/// A matched route with its captured path parameters
#[derive(Clone, Debug, PartialEq)]
pub struct RouteMatch {
    pub pattern: String,
    pub target: RouteTarget,
    pub params: HashMap<String, String>,
}

/// Runs before matching; returning a response ends the request
pub type BeforeHook = Arc<dyn Fn(&HttpRequest) -> Option<HttpResponse> + Send + Sync>;

/// Runs on every outgoing response, including not-found ones
pub type AfterHook = Arc<dyn Fn(&HttpRequest, &mut HttpResponse) + Send + Sync>;

/// Produces the response for an unmatched `(method, path)`
pub type NotFoundHandler = Arc<dyn Fn(&str, &str) -> HttpResponse + Send + Sync>;

/// Router for managing routes and dispatching requests
#[derive(Clone, Default)]
pub struct Router {
    routes: IndexMap<HttpMethod, IndexMap<String, RouteTarget>>,
    before: Vec<BeforeHook>,
    after: Vec<AfterHook>,
    not_found: Option<NotFoundHandler>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a route. Re-registering a method and pattern replaces the
    /// earlier target but keeps its position.
    pub fn add_route(&mut self, method: HttpMethod, pattern: &str, target: RouteTarget) {
        let pattern = normalize(pattern).to_string();
        let table = self.routes.entry(method).or_default();
        if let Some(previous) = table.insert(pattern.clone(), target) {
            debug!(
                method = %method,
                pattern = %pattern,
                replaced = %format!("{}::{}", previous.type_name, previous.method),
                "Route re-registered"
            );
        }
    }

    /// First route, in registration order, whose every segment matches
    pub fn match_route(&self, method: &str, path: &str) -> Option<RouteMatch> {
        let method = HttpMethod::from_str(method).ok()?;
        let table = self.routes.get(&method)?;
        let path = normalize(path);

        table.iter().find_map(|(pattern, target)| {
            match_path(pattern, path).map(|params| {
                trace!(method = %method, pattern = %pattern, path, "Route matched");
                RouteMatch {
                    pattern: pattern.clone(),
                    target: target.clone(),
                    params,
                }
            })
        })
    }

    pub fn before_request<F>(&mut self, hook: F)
    where
        F: Fn(&HttpRequest) -> Option<HttpResponse> + Send + Sync + 'static,
    {
        self.before.push(Arc::new(hook));
    }

    pub fn after_request<F>(&mut self, hook: F)
    where
        F: Fn(&HttpRequest, &mut HttpResponse) + Send + Sync + 'static,
    {
        self.after.push(Arc::new(hook));
    }

    pub fn set_not_found<F>(&mut self, handler: F)
    where
        F: Fn(&str, &str) -> HttpResponse + Send + Sync + 'static,
    {
        self.not_found = Some(Arc::new(handler));
    }

    /// Run the before hooks in order; the first response short-circuits
    pub fn run_before(&self, request: &HttpRequest) -> Option<HttpResponse> {
        self.before.iter().find_map(|hook| hook(request))
    }

    pub fn run_after(&self, request: &HttpRequest, response: &mut HttpResponse) {
        for hook in &self.after {
            hook(request, response);
        }
    }

    /// Response for a request no route matched
    pub fn not_found(&self, method: &str, path: &str) -> HttpResponse {
        debug!(method, path, "No route matched");
        match &self.not_found {
            Some(handler) => handler(method, path),
            None => HttpResponse::not_found().with_html("<h1>404</h1>"),
        }
    }

    pub fn routes(&self, method: HttpMethod) -> impl Iterator<Item = (&str, &RouteTarget)> {
        self.routes
            .get(&method)
            .into_iter()
            .flat_map(|table| table.iter().map(|(pattern, target)| (pattern.as_str(), target)))
    }

    pub fn len(&self) -> usize {
        self.routes.values().map(IndexMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Router {{")?;
        for (method, table) in &self.routes {
            for (pattern, target) in table {
                writeln!(
                    f,
                    "    {:<7} {} -> {}::{}",
                    method.as_str(),
                    pattern,
                    target.type_name,
                    target.method
                )?;
            }
        }
        write!(f, "}}")
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("routes", &self.routes)
            .field("before", &self.before.len())
            .field("after", &self.after.len())
            .field("not_found", &self.not_found.is_some())
            .finish()
    }
}

/// Drop one trailing slash, except from the root path
fn normalize(path: &str) -> &str {
    match path.strip_suffix('/') {
        Some(stripped) if !stripped.is_empty() => stripped,
        _ => path,
    }
}

/// Match a route pattern against a request path.
/// Returns Some(params) if matched, None otherwise
fn match_path(pattern: &str, path: &str) -> Option<HashMap<String, String>> {
    let pattern_parts: Vec<&str> = pattern.split('/').collect();
    let path_parts: Vec<&str> = path.split('/').collect();

    if pattern_parts.len() != path_parts.len() {
        return None;
    }

    let mut params = HashMap::new();

    for (pattern_part, path_part) in pattern_parts.iter().zip(path_parts.iter()) {
        if pattern_part == path_part {
            continue;
        }
        if pattern_part.starts_with(':') || pattern_part.starts_with('{') {
            let name: String = pattern_part
                .chars()
                .filter(|c| !matches!(c, ':' | '{' | '}'))
                .collect();
            params.insert(name, path_part.to_string());
        } else {
            return None;
        }
    }

    Some(params)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(method: &str) -> RouteTarget {
        RouteTarget::new("app::Controller::Widgets", method)
    }

    #[test]
    fn test_match_path_static() {
        let result = match_path("/users", "/users");
        assert_eq!(result.map(|params| params.len()), Some(0));
    }

    #[test]
    fn test_match_path_with_param() {
        let params = match_path("/users/:id", "/users/123").unwrap();
        assert_eq!(params.get("id"), Some(&"123".to_string()));
    }

    #[test]
    fn test_match_path_brace_param() {
        let params = match_path("/users/{id}/posts/:post_id", "/users/7/posts/abc-1").unwrap();
        assert_eq!(params.get("id"), Some(&"7".to_string()));
        assert_eq!(params.get("post_id"), Some(&"abc-1".to_string()));
    }

    #[test]
    fn test_match_path_no_match() {
        assert!(match_path("/users/:id", "/posts/123").is_none());
        assert!(match_path("/users/:id", "/users/1/extra").is_none());
    }

    #[test]
    fn test_match_path_root() {
        assert!(match_path("/", "/").is_some());
        assert!(match_path("/", "/users").is_none());
    }

    #[test]
    fn test_capture_is_verbatim() {
        let params = match_path("/files/:name", "/files/007%20A").unwrap();
        assert_eq!(params.get("name"), Some(&"007%20A".to_string()));
    }

    #[test]
    fn test_trailing_slash_is_ignored() {
        let mut router = Router::new();
        router.add_route(HttpMethod::GET, "/users", target("list"));

        let with = router.match_route("GET", "/users/").unwrap();
        let without = router.match_route("GET", "/users").unwrap();
        assert_eq!(with, without);
    }

    #[test]
    fn test_root_route() {
        let mut router = Router::new();
        router.add_route(HttpMethod::GET, "/", target("index"));
        assert_eq!(router.match_route("GET", "/").unwrap().target.method, "index");
        assert!(router.match_route("GET", "").is_none());
    }

    #[test]
    fn test_first_registered_route_wins() {
        let mut router = Router::new();
        router.add_route(HttpMethod::GET, "/widgets/:id", target("show"));
        router.add_route(HttpMethod::GET, "/widgets/latest", target("latest"));

        let matched = router.match_route("GET", "/widgets/latest").unwrap();
        assert_eq!(matched.target.method, "show");
        assert_eq!(matched.params.get("id"), Some(&"latest".to_string()));
    }

    #[test]
    fn test_mismatch_moves_to_next_candidate() {
        let mut router = Router::new();
        router.add_route(HttpMethod::GET, "/widgets/one/:id", target("one"));
        router.add_route(HttpMethod::GET, "/widgets/:id", target("show"));

        assert_eq!(router.match_route("GET", "/widgets/one/4").unwrap().target.method, "one");
        assert_eq!(router.match_route("GET", "/widgets/4").unwrap().target.method, "show");
    }

    #[test]
    fn test_re_registration_overwrites_in_place() {
        let mut router = Router::new();
        router.add_route(HttpMethod::GET, "/a/:id", target("first"));
        router.add_route(HttpMethod::GET, "/a/b", target("b"));
        router.add_route(HttpMethod::GET, "/a/:id", target("second"));

        assert_eq!(router.len(), 2);
        let patterns: Vec<_> = router.routes(HttpMethod::GET).map(|(p, _)| p).collect();
        assert_eq!(patterns, vec!["/a/:id", "/a/b"]);
        assert_eq!(router.match_route("GET", "/a/b").unwrap().target.method, "second");
    }

    #[test]
    fn test_methods_are_separate() {
        let mut router = Router::new();
        router.add_route(HttpMethod::DELETE, "/widgets/:id", target("delete"));
        assert!(router.match_route("GET", "/widgets/1").is_none());
        assert!(router.match_route("delete", "/widgets/1").is_some());
        assert!(router.match_route("BREW", "/widgets/1").is_none());
    }

    #[test]
    fn test_default_not_found() {
        let router = Router::new();
        let response = router.not_found("GET", "/missing");
        assert_eq!(response.status, 404);
        assert_eq!(response.body_string(), "<h1>404</h1>");
    }

    #[test]
    fn test_custom_not_found() {
        let mut router = Router::new();
        router.set_not_found(|method, path| {
            HttpResponse::not_found().with_body(format!("{} {} is gone", method, path))
        });
        assert_eq!(router.not_found("PUT", "/x").body_string(), "PUT /x is gone");
    }

    #[test]
    fn test_hooks() {
        let mut router = Router::new();
        router.before_request(|req| {
            (req.header("x-block").is_some()).then(|| HttpResponse::new(429))
        });
        router.after_request(|_, res| {
            res.headers.insert("X-Served-By".into(), "trellis".into());
        });

        let blocked = HttpRequest::new("GET", "/").with_header("X-Block", "1");
        assert_eq!(router.run_before(&blocked).map(|r| r.status), Some(429));
        assert!(router.run_before(&HttpRequest::new("GET", "/")).is_none());

        let mut response = HttpResponse::ok();
        router.run_after(&blocked, &mut response);
        assert_eq!(response.header("x-served-by"), Some(&"trellis".to_string()));
    }

    #[test]
    fn test_display_lists_routes() {
        let mut router = Router::new();
        router.add_route(HttpMethod::GET, "/widgets/one/:id", target("one"));
        let rendered = router.to_string();
        assert!(rendered.starts_with("Router {"));
        assert!(rendered.contains("/widgets/one/:id -> app::Controller::Widgets::one"));
    }

    #[test]
    fn test_http_method_from_str() {
        assert_eq!("patch".parse::<HttpMethod>().unwrap(), HttpMethod::PATCH);
        assert_eq!("PING".parse::<HttpMethod>().unwrap(), HttpMethod::PING);
        assert!("BREW".parse::<HttpMethod>().is_err());
    }
}

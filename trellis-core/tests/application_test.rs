//! Integration tests for booting an application and dispatching requests
//! and CLI commands.

mod common;

use common::*;
use serde_json::{Value as JsonValue, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use trellis_core::*;

#[derive(Default)]
struct Tools;

fn tools() -> TypeDescriptor {
    TypeDescriptor::builder("app::Cli::Tools")
        .cli_controller("tools")
        .default_constructor::<Tools>()
        .method(
            MethodDescriptor::new(
                "greet",
                vec![
                    ParamDescriptor::string("name"),
                    ParamDescriptor::bool("loud").with_default(false),
                ],
                |_: &Tools, args: &Arguments| {
                    let greeting = format!("Hello, {}", args.string("name")?);
                    Ok(if args.bool("loud")? {
                        greeting.to_uppercase().into()
                    } else {
                        greeting.into()
                    })
                },
            )
            .cli("greet"),
        )
        .build()
}

fn app(storage: &StubStorage) -> Application {
    let catalog = catalog(storage);
    catalog.register(tools());
    Application::builder().catalog(catalog).build().unwrap()
}

fn json_body(response: &HttpResponse) -> JsonValue {
    serde_json::from_slice(&response.body).unwrap()
}

fn request(method: &str, target: &str, body: JsonValue) -> HttpRequest {
    HttpRequest::new(method, target).with_json(&body).unwrap()
}

#[test]
fn test_boot_registers_crud_routes_before_explicit_ones() {
    let app = app(&StubStorage::default());

    let get: Vec<_> = app
        .router()
        .routes(HttpMethod::GET)
        .map(|(pattern, target)| (pattern.to_string(), target.method.clone()))
        .collect();
    assert_eq!(
        get,
        vec![
            ("/widgets/one/:id".to_string(), "one".to_string()),
            ("/widgets/count".to_string(), "count".to_string()),
            ("/widgets/:id".to_string(), "show".to_string()),
        ]
    );

    let matched = app.router().match_route("PUT", "/widgets/").unwrap();
    assert_eq!(matched.target.method, "create");
    let matched = app.router().match_route("DELETE", "/widgets/3").unwrap();
    assert_eq!(matched.target.method, "delete");
    assert_eq!(matched.params.get("id"), Some(&"3".to_string()));
}

#[test]
fn test_path_capture_reaches_handler() {
    let app = app(&StubStorage::default());

    let response = app.handle(HttpRequest::new("GET", "/widgets/42"));
    assert_eq!(response.status, 200);
    assert_eq!(json_body(&response), json!(42));
}

#[test]
fn test_declared_content_type_wins() {
    let app = app(&StubStorage::default());

    let response = app.handle(HttpRequest::new("GET", "/widgets/count"));
    assert_eq!(response.status, 200);
    assert_eq!(response.content_type(), Some(&"text/plain".to_string()));
    assert_eq!(response.body_string(), "0");
}

#[test]
fn test_crud_round_trip() {
    let storage = StubStorage::default();
    let app = app(&storage);

    let created = app.handle(request(
        "PUT",
        "/widgets",
        json!({"entity": {"Name": "Gear", "Price": 2.5}}),
    ));
    assert_eq!(created.status, 200);
    assert_eq!(json_body(&created)["Id"], json!(1));

    let one = app.handle(HttpRequest::new("GET", "/widgets/one/1"));
    assert_eq!(json_body(&one)["Name"], json!("Gear"));

    let patched = app.handle(request("PATCH", "/widgets/1", json!({"entity": {"Name": "Cog"}})));
    assert_eq!(patched.status, 200);
    assert_eq!(json_body(&patched)["Name"], json!("Cog"));

    let listed = app.handle(request("POST", "/widgets", json!({})));
    let listed = json_body(&listed);
    assert_eq!(listed.as_array().map(Vec::len), Some(1));
    assert_eq!(listed[0]["Name"], json!("Cog"));

    let deleted = app.handle(HttpRequest::new("DELETE", "/widgets/1"));
    assert_eq!(json_body(&deleted), json!(true));

    let missing = app.handle(HttpRequest::new("GET", "/widgets/one/1"));
    assert_eq!(missing.status, 200);
    assert_eq!(json_body(&missing), JsonValue::Null);
}

#[test]
fn test_bad_path_capture_is_a_client_error() {
    let app = app(&StubStorage::default());

    let response = app.handle(HttpRequest::new("GET", "/widgets/one/abc"));
    assert_eq!(response.status, 400);
    assert_eq!(json_body(&response)["status"], json!(400));
}

#[test]
fn test_unmatched_request_uses_not_found_handler() {
    let app = app(&StubStorage::default());
    let response = app.handle(HttpRequest::new("GET", "/gadgets"));
    assert_eq!(response.status, 404);
    assert_eq!(response.body_string(), "<h1>404</h1>");

    let app = Application::builder()
        .catalog(catalog(&StubStorage::default()))
        .not_found(|method, path| {
            HttpResponse::not_found().with_body(format!("no {} {}", method, path))
        })
        .build()
        .unwrap();
    let response = app.handle(HttpRequest::new("DELETE", "/gadgets"));
    assert_eq!(response.body_string(), "no DELETE /gadgets");
}

#[test]
fn test_hooks_wrap_dispatch() {
    let app = Application::builder()
        .catalog(catalog(&StubStorage::default()))
        .before_request(|request| {
            request
                .header("x-block")
                .map(|_| HttpResponse::new(401).with_body("blocked"))
        })
        .after_request(|_, response| {
            response
                .headers
                .insert("X-Served-By".to_string(), "trellis".to_string());
        })
        .build()
        .unwrap();

    let blocked = app.handle(HttpRequest::new("GET", "/widgets/1").with_header("X-Block", "1"));
    assert_eq!(blocked.status, 401);
    assert_eq!(blocked.header("x-served-by"), Some(&"trellis".to_string()));

    let served = app.handle(HttpRequest::new("GET", "/widgets/1"));
    assert_eq!(served.status, 200);
    assert_eq!(served.header("x-served-by"), Some(&"trellis".to_string()));
}

#[test]
fn test_boot_rejects_static_controller_with_service() {
    let storage = StubStorage::default();
    let catalog = catalog(&storage);
    catalog.register(
        TypeDescriptor::builder(CONTROLLER)
            .controller(ControllerMarker::new("/widgets").service(SERVICE))
            .default_constructor::<Tools>()
            .build(),
    );

    let err = Application::builder().catalog(catalog).build().unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[test]
fn test_boot_rejects_static_service_with_entity() {
    let storage = StubStorage::default();
    let catalog = catalog(&storage);
    catalog.register(
        TypeDescriptor::builder(SERVICE)
            .service(ServiceMarker::new().entity(WIDGET).storage(STORAGE))
            .default_constructor::<WidgetService>()
            .build(),
    );

    let err = Application::builder().catalog(catalog).build().unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[test]
fn test_cli_dispatch() {
    let app = app(&StubStorage::default());
    assert_eq!(app.commands().collect::<Vec<_>>(), vec!["tools/greet"]);

    let reply = app
        .run_cli(&["trellis", "tools/greet", "--name=Ada"])
        .unwrap();
    assert!(matches!(reply, Reply::Text(text) if text == "Hello, Ada"));

    let reply = app
        .run_cli(&["trellis", "tools/greet", "--name=Ada", "--loud"])
        .unwrap();
    assert!(matches!(reply, Reply::Text(text) if text == "HELLO, ADA"));
}

#[test]
fn test_cli_unknown_command() {
    let app = app(&StubStorage::default());

    match app.run_cli(&["trellis", "tools/wave"]) {
        Err(Error::UnknownCommand(action)) => assert_eq!(action, "tools/wave"),
        other => panic!("expected an unknown command, got {:?}", other),
    }
    assert!(matches!(
        app.run_cli(&["trellis"]),
        Err(Error::UnknownCommand(_))
    ));
}

#[tokio::test]
async fn test_serves_over_http() {
    let app = app(&StubStorage::default());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(app.serve(listener));

    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /widgets/7 HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut raw = String::new();
    stream.read_to_string(&mut raw).await.unwrap();

    assert!(raw.starts_with("HTTP/1.1 200"), "unexpected response: {}", raw);
    assert!(raw.ends_with("7"), "unexpected body: {}", raw);
}

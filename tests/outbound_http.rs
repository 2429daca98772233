//! Outbound requests against a local server through the default transport.

use std::io::Read;
use std::thread;

use script_bridge::{
    Bridge, BridgeConfig, BridgeError, BridgeErrorKind, FullCapabilities, HostRequest,
    RecordedResponse, ResponseWriter, SessionHandle, Table, TemplateRenderer, Value,
    WidgetCompilation, WidgetCompiler,
};
use serde_json::{Map as JsonMap, Value as JsonValue};
use tiny_http::{Header, Response, Server, StatusCode};

struct NoRenderer;

impl TemplateRenderer for NoRenderer {
    fn render(
        &self,
        _writer: &mut dyn ResponseWriter,
        _request: &HostRequest,
        _template: &str,
        _args: &JsonMap<String, JsonValue>,
    ) -> Result<(), BridgeError> {
        Ok(())
    }
}

struct NoWidgets;

impl WidgetCompiler for NoWidgets {
    fn compile(
        &self,
        _request: &HostRequest,
        _writer: &mut dyn ResponseWriter,
        _session: &SessionHandle,
    ) -> WidgetCompilation {
        WidgetCompilation {
            widgets: JsonMap::new(),
            error: None,
        }
    }
}

fn bridge() -> Bridge {
    let config = BridgeConfig {
        outbound_user_agent: Some("bridge-test".into()),
        ..BridgeConfig::default()
    };
    Bridge::builder()
        .config(config)
        .template_renderer(NoRenderer)
        .widget_compiler(NoWidgets)
        .build()
        .expect("bridge")
}

#[test]
fn get_returns_remote_body() {
    let server = Server::http("127.0.0.1:0").expect("http server");
    let addr = server.server_addr();

    let handle = thread::spawn(move || {
        if let Ok(request) = server.recv() {
            let agent = request
                .headers()
                .iter()
                .find(|h| h.field.equiv("User-Agent"))
                .map(|h| h.value.to_string());
            let path = request.url().to_string();
            request
                .respond(Response::from_string("online: 7"))
                .expect("respond");
            (path, agent)
        } else {
            (String::new(), None)
        }
    });

    let bridge = bridge();
    let mut request = HostRequest::new("GET", "/");
    let mut writer = RecordedResponse::new();
    let page = bridge.bind_full(&mut request, &mut writer, SessionHandle::anonymous());

    let body = page
        .get(&format!("http://{}/status?world=1", addr))
        .expect("get");
    assert_eq!(body, "online: 7");

    let (path, agent) = handle.join().expect("server thread");
    assert_eq!(path, "/status?world=1");
    assert_eq!(agent.as_deref(), Some("bridge-test"));
}

#[test]
fn request_reports_status_and_repeated_headers() {
    let server = Server::http("127.0.0.1:0").expect("http server");
    let addr = server.server_addr();

    let handle = thread::spawn(move || {
        if let Ok(mut request) = server.recv() {
            let method = request.method().to_string();
            let mut body = String::new();
            request
                .as_reader()
                .read_to_string(&mut body)
                .expect("read body");
            let response = Response::from_string("created")
                .with_status_code(StatusCode(201))
                .with_header(Header::from_bytes("X-Shard", "a").unwrap())
                .with_header(Header::from_bytes("X-Shard", "b").unwrap())
                .with_header(Header::from_bytes("X-Region", "eu").unwrap());
            request.respond(response).expect("respond");
            (method, body)
        } else {
            (String::new(), String::new())
        }
    });

    let bridge = bridge();
    let mut request = HostRequest::new("GET", "/");
    let mut writer = RecordedResponse::new();
    let page = bridge.bind_full(&mut request, &mut writer, SessionHandle::anonymous());

    let mut config = Table::new();
    config.set("method", "PUT");
    config.set("url", format!("http://{}/characters", addr));
    config.set("timeout", "5s");
    config.set("data", "name=Knight");

    let (body, headers, status) = page.request(&config).expect("request");
    assert_eq!(body, "created");
    assert_eq!(status, 201);
    assert_eq!(headers.get_str("X-Region"), &Value::from("eu"));

    let shards = headers
        .get_str("X-Shard")
        .as_table()
        .and_then(|t| t.sequence())
        .expect("sequence of shards");
    assert_eq!(shards, vec![&Value::from("a"), &Value::from("b")]);

    let (method, sent) = handle.join().expect("server thread");
    assert_eq!(method, "PUT");
    assert_eq!(sent, "name=Knight");
}

#[test]
fn unreachable_host_is_a_host_error() {
    // Bind then drop so the port is closed.
    let addr = Server::http("127.0.0.1:0")
        .expect("http server")
        .server_addr()
        .to_ip()
        .expect("ip address");

    let bridge = bridge();
    let mut request = HostRequest::new("GET", "/");
    let mut writer = RecordedResponse::new();
    let page = bridge.bind_full(&mut request, &mut writer, SessionHandle::anonymous());

    let err = page.get(&format!("http://{}/", addr)).unwrap_err();
    assert_eq!(err.kind, BridgeErrorKind::HostOperation);
    assert!(err.message.starts_with("Cannot execute http request"));
}

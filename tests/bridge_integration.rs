//! End-to-end flows through a built bridge, one request at a time.

use std::io;
use std::sync::{Arc, Mutex};

use script_bridge::{
    parse_towns, parse_vocations, Bridge, BridgeConfig, BridgeError, BridgeErrorKind,
    FullCapabilities, HostRequest, OtpError, OtpVerifier, RecordedResponse, RecordingTransport,
    ReferenceData, RegularCapabilities, ResponseWriter, ScriptObject, SessionHandle, Table,
    TemplateRenderer, Tier, Value, WidgetCompilation, WidgetCompiler, FULL_METHODS,
    REGULAR_METHODS,
};
use serde_json::{Map as JsonMap, Value as JsonValue};
use tracing_subscriber::fmt::MakeWriter;

struct EchoRenderer;

impl TemplateRenderer for EchoRenderer {
    fn render(
        &self,
        writer: &mut dyn ResponseWriter,
        _request: &HostRequest,
        template: &str,
        args: &JsonMap<String, JsonValue>,
    ) -> Result<(), BridgeError> {
        let body = format!("{} {}", template, JsonValue::Object(args.clone()));
        writer
            .write(body.as_bytes())
            .map_err(|e| BridgeError::host("render", e))?;
        Ok(())
    }
}

struct OnlineWidget;

impl WidgetCompiler for OnlineWidget {
    fn compile(
        &self,
        _request: &HostRequest,
        _writer: &mut dyn ResponseWriter,
        _session: &SessionHandle,
    ) -> WidgetCompilation {
        let mut widgets = JsonMap::new();
        widgets.insert("online".into(), JsonValue::from(3));
        WidgetCompilation {
            widgets,
            error: None,
        }
    }
}

struct AcceptCode(&'static str);

impl OtpVerifier for AcceptCode {
    fn verify(&self, _secret: &str, token: &str, _window: u32) -> Result<bool, OtpError> {
        if token == self.0 {
            Ok(true)
        } else {
            Err(OtpError::InvalidCode)
        }
    }
}

fn reference() -> Arc<ReferenceData> {
    let vocations = parse_vocations(
        r#"{"vocations": [
            {"id": 1, "name": "Knight", "fromvoc": 1},
            {"id": 2, "name": "Elite Knight", "fromvoc": 1}
        ]}"#,
    )
    .unwrap();
    let towns = parse_towns(r#"{"towns": [{"id": 1, "name": "Thais"}]}"#).unwrap();
    Arc::new(ReferenceData::new(vocations, towns).unwrap())
}

fn bridge_with(transport: Arc<RecordingTransport>) -> Bridge {
    Bridge::builder()
        .config(BridgeConfig::default())
        .reference_data(reference())
        .template_renderer(EchoRenderer)
        .widget_compiler(OnlineWidget)
        .otp_verifier(AcceptCode("123456"))
        .transport(transport)
        .build()
        .unwrap()
}

fn bridge() -> Bridge {
    bridge_with(Arc::new(RecordingTransport::new("remote")))
}

#[test]
fn method_tables_per_tier() {
    let bridge = bridge();
    let mut request = HostRequest::new("GET", "/");
    let mut writer = RecordedResponse::new();

    {
        let full = bridge.bind_full(&mut request, &mut writer, SessionHandle::anonymous());
        assert_eq!(full.methods(), FULL_METHODS);
    }
    {
        let regular = bridge.bind_regular(&mut request, &mut writer, SessionHandle::anonymous());
        assert_eq!(regular.methods(), REGULAR_METHODS);
        for method in REGULAR_METHODS {
            assert!(FULL_METHODS.contains(method));
        }
    }
    let widget = bridge.bind_widget(&mut request, &mut writer, SessionHandle::anonymous());
    assert!(widget.methods().is_empty());
}

#[test]
fn widget_calls_raise_instead_of_executing() {
    let bridge = bridge();
    let mut request = HostRequest::new("GET", "/");
    let mut writer = RecordedResponse::new();
    {
        let mut widget = bridge.bind_widget(&mut request, &mut writer, SessionHandle::anonymous());
        let err = widget
            .call("write", &[Value::from("defaced")])
            .unwrap_err();
        assert_eq!(
            err.kind,
            BridgeErrorKind::MissingCapability {
                method: "write".to_string(),
                tier: Tier::Widget
            }
        );
    }
    assert!(writer.body().is_empty());
    assert_eq!(writer.status(), None);
}

#[test]
fn cookie_round_trip_across_contexts() {
    let bridge = bridge();

    let mut first = HostRequest::new("POST", "/login");
    let mut writer = RecordedResponse::new();
    {
        let mut page = bridge.bind_full(&mut first, &mut writer, SessionHandle::anonymous());
        page.set_cookie("session", "token-42", 1_700_000_000).unwrap();
    }
    let set_cookie = writer.headers().get("Set-Cookie").to_string();
    assert!(set_cookie.contains("Expires=Tue, 14 Nov 2023 22:13:20 GMT"));
    assert!(set_cookie.contains("HttpOnly"));
    assert!(!set_cookie.contains("Secure"));
    let pair = set_cookie.split(';').next().unwrap();

    let mut second = HostRequest::new("GET", "/account").with_header("Cookie", pair);
    let mut writer = RecordedResponse::new();
    let mut page = bridge.bind_regular(&mut second, &mut writer, SessionHandle::anonymous());
    assert_eq!(
        page.call("getCookie", &[Value::from("session")]).unwrap(),
        vec![Value::from("token-42")]
    );
    assert_eq!(
        page.call("getCookie", &[Value::from("absent")]).unwrap(),
        vec![Value::Nil]
    );
}

#[test]
fn validators_through_script_dispatch() {
    let bridge = bridge();
    let mut request = HostRequest::new("GET", "/");
    let mut writer = RecordedResponse::new();
    let page = bridge.bind_full(&mut request, &mut writer, SessionHandle::anonymous());
    let mut validator = page.validator();

    let mut check = |method: &str, args: &[Value]| -> Value {
        validator.call(method, args).unwrap().remove(0)
    };

    assert_eq!(check("validGuildName", &[Value::from("Ab")]), Value::Bool(false));
    assert_eq!(check("validGuildName", &[Value::from("AbcdeFghij")]), Value::Bool(true));
    assert_eq!(check("validGuildName", &[Value::from("Abc123")]), Value::Bool(false));
    assert_eq!(check("validGuildName", &[Value::from("A".repeat(20))]), Value::Bool(true));
    assert_eq!(check("validGuildName", &[Value::from("A".repeat(21))]), Value::Bool(false));

    assert_eq!(check("validUsername", &[Value::from("John Doe")]), Value::Bool(true));
    assert_eq!(check("validUsername", &[Value::from("John_Doe")]), Value::Bool(false));

    assert_eq!(check("validVocation", &[Value::from(1.0), Value::Bool(true)]), Value::Bool(true));
    assert_eq!(check("validVocation", &[Value::from(2.0), Value::Bool(true)]), Value::Bool(false));
    assert_eq!(check("validVocation", &[Value::from(2.0), Value::Bool(false)]), Value::Bool(true));
    assert_eq!(check("validVocation", &[Value::from(999.0)]), Value::Bool(false));

    assert_eq!(check("validTown", &[Value::from("Thais")]), Value::Bool(true));
    assert_eq!(check("validGender", &[Value::from(3.0)]), Value::Bool(false));

    assert_eq!(
        check("checkQRCode", &[Value::from("123456"), Value::from("SECRET")]),
        Value::Bool(true)
    );
    assert_eq!(
        check("checkQRCode", &[Value::from("654321"), Value::from("SECRET")]),
        Value::Bool(false)
    );
}

#[test]
fn request_config_errors_happen_before_network() {
    let transport = Arc::new(RecordingTransport::new("remote"));
    let bridge = bridge_with(Arc::clone(&transport));
    let mut request = HostRequest::new("GET", "/");
    let mut writer = RecordedResponse::new();
    let page = bridge.bind_full(&mut request, &mut writer, SessionHandle::anonymous());

    let mut no_method = Table::new();
    no_method.set("url", "http://example.com/");
    let err = page.request(&no_method).unwrap_err();
    assert!(err.message.contains("method"));

    let mut no_url = Table::new();
    no_url.set("method", "GET");
    let err = page.request(&no_url).unwrap_err();
    assert!(err.message.contains("url"));

    let mut bad_timeout = Table::new();
    bad_timeout.set("method", "GET");
    bad_timeout.set("url", "http://example.com/");
    bad_timeout.set("timeout", "soon");
    assert!(page.request(&bad_timeout).is_err());

    assert_eq!(transport.request_count(), 0);

    let mut ok = Table::new();
    ok.set("method", "POST");
    ok.set("url", "http://example.com/api");
    let mut data = Table::new();
    data.set("level", 100.0);
    ok.set("data", data);
    let mut auth = Table::new();
    auth.set("username", "admin");
    auth.set("password", "hunter2");
    ok.set("authentication", auth);

    let (body, headers, status) = page.request(&ok).unwrap();
    assert_eq!(body, "remote");
    assert!(headers.is_empty());
    assert_eq!(status, 200);

    let calls = transport.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].method, "POST");
    assert_eq!(calls[0].body_len, "level=100".len());
    assert!(calls[0].authenticated);
}

#[test]
fn render_passes_widgets_and_sets_ok() {
    let bridge = bridge();
    let mut request = HostRequest::new("GET", "/");
    let mut writer = RecordedResponse::new();
    {
        let mut page = bridge.bind_regular(&mut request, &mut writer, SessionHandle::anonymous());
        let mut args = Table::new();
        args.set("title", "News");
        page.call("render", &[Value::from("news.html"), Value::Table(args)])
            .unwrap();
    }
    assert_eq!(writer.status(), Some(200));
    let body = writer.body_text();
    assert!(body.starts_with("news.html "));
    let json: JsonValue = serde_json::from_str(body.trim_start_matches("news.html ")).unwrap();
    assert_eq!(json["title"], "News");
    assert_eq!(json["widgets"]["online"], 3);
}

#[test]
fn multipart_upload_flow() {
    let body = concat!(
        "--XyZ\r\n",
        "Content-Disposition: form-data; name=\"guild\"\r\n\r\n",
        "Red Rose\r\n",
        "--XyZ\r\n",
        "Content-Disposition: form-data; name=\"logo\"; filename=\"logo.gif\"\r\n",
        "Content-Type: image/gif\r\n\r\n",
        "GIF89a\r\n",
        "--XyZ--\r\n",
    );
    let bridge = bridge();
    let mut request = HostRequest::new("POST", "/guild/logo")
        .with_header("Content-Type", "multipart/form-data; boundary=XyZ")
        .with_body(body);
    let mut writer = RecordedResponse::new();
    let mut page = bridge.bind_full(&mut request, &mut writer, SessionHandle::anonymous());

    page.parse_multipart_form(0).unwrap();
    let Value::Table(post) = page.field("postValues") else {
        panic!("postValues is not a table");
    };
    assert_eq!(post.get_str("guild"), &Value::from("Red Rose"));

    let file = page.get_form_file("logo").unwrap().unwrap();
    assert_eq!(file.filename(), "logo.gif");
    assert_eq!(file.content_type(), "image/gif");
    assert_eq!(file.bytes(), b"GIF89a");
    assert!(page.get_form_file("banner").unwrap().is_none());
}

#[test]
fn execute_maps_error_to_single_response() {
    let bridge = bridge();
    let mut request = HostRequest::new("GET", "/hook");
    let mut writer = RecordedResponse::new();

    let result = bridge.execute(
        Tier::Regular,
        &mut request,
        &mut writer,
        SessionHandle::anonymous(),
        |globals| {
            globals.call("http", "setHeader", &[Value::from("X-Hook"), Value::from("1")])?;
            globals.call("http", "request", &[Value::Table(Table::new())])?;
            Ok(())
        },
    );

    assert!(matches!(
        result.unwrap_err().kind,
        BridgeErrorKind::MissingCapability { .. }
    ));
    assert_eq!(writer.status(), Some(500));
    assert_eq!(writer.sent_headers().get("X-Hook"), "1");
    assert_eq!(writer.body_text(), "Internal Server Error");
}

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for Captured {
    type Writer = Captured;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[test]
fn failures_are_logged_with_request_id() {
    let captured = Captured::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(captured.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();

    tracing::subscriber::with_default(subscriber, || {
        let bridge = bridge();
        let mut request = HostRequest::new("GET", "/").with_request_id("req-logged-7");
        let mut writer = RecordedResponse::new();
        let session = SessionHandle::new("very-secret-session");
        let _ = bridge.execute(Tier::Widget, &mut request, &mut writer, session, |globals| {
            globals.call("http", "redirect", &[]).map(drop)
        });
    });

    let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
    assert!(output.contains("req-logged-7"));
    assert!(output.contains("script execution failed"));
    assert!(!output.contains("very-secret-session"));
}

//! Capability tier binding.
//!
//! [`Bridge`] is the process-wide composition root. For every request the
//! host binds one tier, which yields a [`BoundScript`] whose type parameter
//! fixes the tier for the life of the request. Which operations exist is
//! decided by trait impls on that type parameter:
//!
//! - [`RegularCapabilities`] for [`Full`] and [`Regular`],
//! - [`FullCapabilities`] for [`Full`] only,
//! - [`WidgetMarker`] for [`Widget`], which carries no operations.
//!
//! Scripts reach the same operations by name through [`ScriptObject`].

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::capability::{OutboundCap, ResponseCap};
use crate::collab::{
    Blacklister, CharBlacklist, OtpVerifier, SessionHandle, TemplateRenderer, WidgetCompiler,
};
use crate::config::BridgeConfig;
use crate::context::ScriptContext;
use crate::error::BridgeError;
use crate::http_bridge::{HttpBridge, OutboundClient};
use crate::logging::ScriptLog;
use crate::marshal::values_to_table;
use crate::multipart::UploadedFile;
use crate::object::{
    expect_integer, expect_string, expect_table, none, one, optional_integer, optional_string,
    optional_table, ScriptObject,
};
use crate::outbound::{HttpTransport, ReqwestTransport};
use crate::registry::ReferenceData;
use crate::request::{split_host_port, HostRequest};
use crate::response::ResponseWriter;
use crate::tier::{Full, Regular, ResponseTier, Tier, TierMarker, Widget};
use crate::validator::ValidatorObject;
use crate::value::{Handle, Table, Value};

/// Script methods of the regular tier.
pub const REGULAR_METHODS: &[&str] = &[
    "getCookie",
    "setCookie",
    "parseMultiPartForm",
    "getFormFile",
    "write",
    "render",
    "redirect",
    "serveFile",
    "getHeader",
    "setHeader",
    "getRemoteAddress",
    "getRelativeURL",
];

/// Script methods of the full tier.
pub const FULL_METHODS: &[&str] = &[
    "getCookie",
    "setCookie",
    "parseMultiPartForm",
    "getFormFile",
    "write",
    "render",
    "redirect",
    "serveFile",
    "getHeader",
    "setHeader",
    "getRemoteAddress",
    "getRelativeURL",
    "get",
    "postForm",
    "request",
];

/// Process-wide bridge state, shared by every request.
///
/// Built once at startup with [`Bridge::builder`]; read-only afterwards.
pub struct Bridge {
    config: BridgeConfig,
    reference: Arc<ReferenceData>,
    renderer: Box<dyn TemplateRenderer>,
    widgets: Box<dyn WidgetCompiler>,
    otp: Option<Box<dyn OtpVerifier>>,
    blacklister: Box<dyn Blacklister>,
    transport: Box<dyn HttpTransport>,
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("config", &self.config)
            .field("vocations", &self.reference.vocations().len())
            .field("towns", &self.reference.towns().len())
            .field("otp", &self.otp.is_some())
            .finish_non_exhaustive()
    }
}

/// Assembles a [`Bridge`].
///
/// # Examples
///
/// ```
/// use script_bridge::{Bridge, BridgeErrorKind};
///
/// // Renderer and widget compiler are required.
/// let err = Bridge::builder().build().unwrap_err();
/// assert_eq!(err.kind, BridgeErrorKind::NotRegistered);
/// ```
#[derive(Default)]
pub struct BridgeBuilder {
    config: Option<BridgeConfig>,
    reference: Option<Arc<ReferenceData>>,
    renderer: Option<Box<dyn TemplateRenderer>>,
    widgets: Option<Box<dyn WidgetCompiler>>,
    otp: Option<Box<dyn OtpVerifier>>,
    blacklister: Option<Box<dyn Blacklister>>,
    transport: Option<Box<dyn HttpTransport>>,
}

impl BridgeBuilder {
    /// Uses `config` instead of the defaults.
    pub fn config(mut self, config: BridgeConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Uses an already loaded reference data snapshot instead of the files
    /// named in the configuration.
    pub fn reference_data(mut self, reference: Arc<ReferenceData>) -> Self {
        self.reference = Some(reference);
        self
    }

    /// Registers the template renderer. Required.
    pub fn template_renderer(mut self, renderer: impl TemplateRenderer + 'static) -> Self {
        self.renderer = Some(Box::new(renderer));
        self
    }

    /// Registers the widget compiler. Required.
    pub fn widget_compiler(mut self, widgets: impl WidgetCompiler + 'static) -> Self {
        self.widgets = Some(Box::new(widgets));
        self
    }

    /// Registers the one-time-code verifier.
    pub fn otp_verifier(mut self, otp: impl OtpVerifier + 'static) -> Self {
        self.otp = Some(Box::new(otp));
        self
    }

    /// Replaces the default [`CharBlacklist`].
    pub fn blacklister(mut self, blacklister: impl Blacklister + 'static) -> Self {
        self.blacklister = Some(Box::new(blacklister));
        self
    }

    /// Replaces the default [`ReqwestTransport`].
    pub fn transport(mut self, transport: impl HttpTransport + 'static) -> Self {
        self.transport = Some(Box::new(transport));
        self
    }

    /// Builds the bridge, loading reference data from the configured files
    /// when no snapshot was supplied.
    ///
    /// # Errors
    ///
    /// `NotRegistered` without a template renderer or widget compiler,
    /// `Config` when reference data cannot be loaded, `HostOperation` when
    /// the default transport cannot be created.
    pub fn build(self) -> Result<Bridge, BridgeError> {
        let renderer = self
            .renderer
            .ok_or_else(|| BridgeError::not_registered("template renderer"))?;
        let widgets = self
            .widgets
            .ok_or_else(|| BridgeError::not_registered("widget compiler"))?;
        let config = self.config.unwrap_or_default();
        let reference = match self.reference {
            Some(reference) => reference,
            None => Arc::new(config.load_reference_data()?),
        };
        let transport = match self.transport {
            Some(transport) => transport,
            None => Box::new(ReqwestTransport::new()?),
        };

        tracing::info!(
            vocations = reference.vocations().len(),
            towns = reference.towns().len(),
            ssl = config.is_ssl(),
            otp = self.otp.is_some(),
            "script bridge ready"
        );

        Ok(Bridge {
            config,
            reference,
            renderer,
            widgets,
            otp: self.otp,
            blacklister: self.blacklister.unwrap_or_else(|| Box::new(CharBlacklist)),
            transport,
        })
    }
}

impl Bridge {
    /// Starts building a bridge.
    pub fn builder() -> BridgeBuilder {
        BridgeBuilder::default()
    }

    /// The active configuration.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// The shared reference data snapshot.
    pub fn reference_data(&self) -> &Arc<ReferenceData> {
        &self.reference
    }

    /// Binds a page script.
    pub fn bind_full<'a>(
        &'a self,
        request: &'a mut HostRequest,
        writer: &'a mut dyn ResponseWriter,
        session: SessionHandle,
    ) -> BoundScript<'a, Full> {
        self.bind(request, writer, session)
    }

    /// Binds an event hook script.
    pub fn bind_regular<'a>(
        &'a self,
        request: &'a mut HostRequest,
        writer: &'a mut dyn ResponseWriter,
        session: SessionHandle,
    ) -> BoundScript<'a, Regular> {
        self.bind(request, writer, session)
    }

    /// Binds a widget script.
    pub fn bind_widget<'a>(
        &'a self,
        request: &'a mut HostRequest,
        writer: &'a mut dyn ResponseWriter,
        session: SessionHandle,
    ) -> BoundScript<'a, Widget> {
        self.bind(request, writer, session)
    }

    fn bind<'a, T: TierMarker>(
        &'a self,
        request: &'a mut HostRequest,
        writer: &'a mut dyn ResponseWriter,
        session: SessionHandle,
    ) -> BoundScript<'a, T> {
        let ctx = ScriptContext::new(T::TIER, request, writer, session);
        ctx.log().debug(format_args!("bound {} {}", ctx.request().method(), ctx.subtopic()));
        BoundScript {
            bridge: self,
            ctx,
            _tier: PhantomData,
        }
    }

    /// Binds `tier` and runs `script` against the bound objects.
    ///
    /// An error returned by the script is logged with the request id and,
    /// if no status has been written yet, turned into an error response.
    /// The error is then returned to the caller unchanged. Either way the
    /// response is written at most once.
    ///
    /// # Errors
    ///
    /// Whatever `script` returns.
    pub fn execute<F>(
        &self,
        tier: Tier,
        request: &mut HostRequest,
        writer: &mut dyn ResponseWriter,
        session: SessionHandle,
        script: F,
    ) -> Result<(), BridgeError>
    where
        F: FnOnce(&mut ScriptGlobals<'_>) -> Result<(), BridgeError>,
    {
        let request_id = request.request_id().to_string();

        let result = match tier {
            Tier::Full => {
                let mut bound = self.bind_full(request, &mut *writer, session);
                let mut validator = bound.validator();
                script(&mut ScriptGlobals {
                    http: &mut bound,
                    validator: Some(&mut validator),
                })
            }
            Tier::Regular => {
                let mut bound = self.bind_regular(request, &mut *writer, session);
                let mut validator = bound.validator();
                script(&mut ScriptGlobals {
                    http: &mut bound,
                    validator: Some(&mut validator),
                })
            }
            Tier::Widget => {
                let mut bound = self.bind_widget(request, &mut *writer, session);
                script(&mut ScriptGlobals {
                    http: &mut bound,
                    validator: None,
                })
            }
        };

        if let Err(err) = &result {
            tracing::error!(request_id = %request_id, tier = %tier, error = %err, "script execution failed");
            if writer.status().is_none() {
                writer
                    .headers_mut()
                    .set("Content-Type", "text/plain; charset=utf-8");
                writer.write_header(err.status_code());
                if let Err(io) = writer.write(b"Internal Server Error") {
                    tracing::warn!(request_id = %request_id, error = %io, "cannot write error response");
                }
            }
        }
        result
    }
}

/// The objects a script sees as globals.
pub struct ScriptGlobals<'s> {
    /// The tier object (`http` in scripts)
    pub http: &'s mut dyn ScriptObject,
    /// The validator object; absent for widgets
    pub validator: Option<&'s mut dyn ScriptObject>,
}

impl ScriptGlobals<'_> {
    /// Calls `method` on the global named `global`.
    ///
    /// # Errors
    ///
    /// `NotRegistered` for unknown globals, otherwise whatever the call raises.
    pub fn call(&mut self, global: &str, method: &str, args: &[Value]) -> Result<Vec<Value>, BridgeError> {
        match global {
            "http" => self.http.call(method, args),
            "validator" => match self.validator.as_mut() {
                Some(validator) => validator.call(method, args),
                None => Err(BridgeError::not_registered("validator")),
            },
            other => Err(BridgeError::not_registered(other)),
        }
    }
}

/// A script bound to one request at tier `T`.
pub struct BoundScript<'a, T: TierMarker> {
    bridge: &'a Bridge,
    ctx: ScriptContext<'a>,
    _tier: PhantomData<T>,
}

impl<'a, T: TierMarker> BoundScript<'a, T> {
    /// The tier, fixed at bind time.
    pub fn tier(&self) -> Tier {
        T::TIER
    }

    /// The per-request context.
    pub fn context(&self) -> &ScriptContext<'a> {
        &self.ctx
    }

    /// A logger tagged with the request.
    pub fn log(&self) -> ScriptLog<'a> {
        self.ctx.log()
    }
}

impl<'a, T: ResponseTier> BoundScript<'a, T> {
    /// The validator object.
    pub fn validator(&self) -> ValidatorObject<'a> {
        let bridge = self.bridge;
        ValidatorObject::new(&bridge.reference, &*bridge.blacklister, bridge.otp.as_deref())
            .with_tier(T::TIER)
    }

    fn http(&mut self) -> HttpBridge<'_, 'a> {
        HttpBridge::new(&mut self.ctx, ResponseCap::grant::<T>())
    }

    fn max_memory(&self, requested: i64) -> u64 {
        match u64::try_from(requested) {
            Ok(n) if n > 0 => n,
            _ => self.bridge.config.multipart_max_memory,
        }
    }
}

impl<'a> BoundScript<'a, Full> {
    fn outbound(&self) -> OutboundClient<'a> {
        let bridge = self.bridge;
        OutboundClient::new(
            &*bridge.transport,
            bridge.config.outbound_user_agent.as_deref(),
            OutboundCap::grant(PhantomData),
        )
    }
}

/// Operations available to page and event hook scripts.
pub trait RegularCapabilities {
    /// Request cookie value, `None` when absent or when `name` is not a
    /// valid cookie name.
    ///
    /// # Errors
    ///
    /// `HostOperation` when the lookup itself fails.
    fn get_cookie(&self, name: &str) -> Result<Option<String>, BridgeError>;

    /// Sets an HTTP-only cookie on path `/` expiring at Unix time `expires`.
    /// The secure flag follows the TLS configuration.
    ///
    /// # Errors
    ///
    /// `HostOperation` for an invalid name or expiry.
    fn set_cookie(&mut self, name: &str, value: &str, expires: i64) -> Result<(), BridgeError>;

    /// Parses a multipart body. Zero or negative sizes use the configured default.
    ///
    /// # Errors
    ///
    /// `HostOperation` when the body is not a valid multipart form.
    fn parse_multipart_form(&mut self, max_memory: i64) -> Result<(), BridgeError>;

    /// An uploaded file, `None` when the field is absent.
    ///
    /// # Errors
    ///
    /// `HostOperation` when the file cannot be read.
    fn get_form_file(&mut self, field: &str) -> Result<Option<UploadedFile>, BridgeError>;

    /// Writes status 200 and `data`.
    ///
    /// # Errors
    ///
    /// `HostOperation` when the writer fails.
    fn write(&mut self, data: &str) -> Result<(), BridgeError>;

    /// Writes status 200 and renders a template with the compiled widgets.
    ///
    /// # Errors
    ///
    /// `AmbiguousTable` when `args` has no JSON shape.
    fn render(&mut self, template: &str, args: Option<&Table>) -> Result<(), BridgeError>;

    /// Redirects; see [`HttpBridge::redirect`].
    fn redirect(&mut self, dest: Option<&str>, status: u16);

    /// Writes status 200 and a local file.
    ///
    /// # Errors
    ///
    /// `HostOperation` when the file cannot be read.
    fn serve_file(&mut self, path: &str) -> Result<(), BridgeError>;

    /// A response header, or the empty string.
    fn get_header(&self, key: &str) -> String;

    /// Replaces a response header.
    fn set_header(&mut self, key: &str, value: &str);

    /// Host part of the client address.
    ///
    /// # Errors
    ///
    /// `HostOperation` for a malformed remote address.
    fn remote_address(&self) -> Result<String, BridgeError>;

    /// Path and query of the request as received.
    fn relative_url(&self) -> String;
}

/// Operations available to page scripts only.
pub trait FullCapabilities: RegularCapabilities {
    /// `GET url`, returning the body.
    ///
    /// # Errors
    ///
    /// `HostOperation` on network failure.
    fn get(&self, url: &str) -> Result<String, BridgeError>;

    /// Posts a urlencoded form, returning the body.
    ///
    /// # Errors
    ///
    /// `HostOperation` on network failure, `AmbiguousTable` for bad data.
    fn post_form(&self, url: &str, data: Option<&Table>) -> Result<String, BridgeError>;

    /// Executes a request described by a configuration table, returning
    /// the body, the response headers and the status.
    ///
    /// # Errors
    ///
    /// Raised before any network call for a malformed configuration.
    fn request(&self, config: &Table) -> Result<(String, Table, u16), BridgeError>;
}

/// Identity of widget scripts. Carries no operations.
pub trait WidgetMarker {}

impl WidgetMarker for BoundScript<'_, Widget> {}

impl<T: ResponseTier> RegularCapabilities for BoundScript<'_, T> {
    fn get_cookie(&self, name: &str) -> Result<Option<String>, BridgeError> {
        self.ctx.request().cookie(name)
    }

    fn set_cookie(&mut self, name: &str, value: &str, expires: i64) -> Result<(), BridgeError> {
        let secure = self.bridge.config.is_ssl();
        self.http().set_cookie(name, value, expires, secure)
    }

    fn parse_multipart_form(&mut self, max_memory: i64) -> Result<(), BridgeError> {
        let max_memory = self.max_memory(max_memory);
        self.http().parse_multipart_form(max_memory)
    }

    fn get_form_file(&mut self, field: &str) -> Result<Option<UploadedFile>, BridgeError> {
        let max_memory = self.bridge.config.multipart_max_memory;
        self.http().get_form_file(field, max_memory)
    }

    fn write(&mut self, data: &str) -> Result<(), BridgeError> {
        self.http().write(data)
    }

    fn render(&mut self, template: &str, args: Option<&Table>) -> Result<(), BridgeError> {
        let bridge = self.bridge;
        self.http()
            .render(&*bridge.renderer, &*bridge.widgets, template, args)
    }

    fn redirect(&mut self, dest: Option<&str>, status: u16) {
        self.http().redirect(dest, status)
    }

    fn serve_file(&mut self, path: &str) -> Result<(), BridgeError> {
        self.http().serve_file(path)
    }

    fn get_header(&self, key: &str) -> String {
        self.ctx.writer().headers().get(key).to_string()
    }

    fn set_header(&mut self, key: &str, value: &str) {
        self.http().set_header(key, value)
    }

    fn remote_address(&self) -> Result<String, BridgeError> {
        split_host_port(self.ctx.request().remote_addr()).map(str::to_string)
    }

    fn relative_url(&self) -> String {
        self.ctx.request().relative_url()
    }
}

impl FullCapabilities for BoundScript<'_, Full> {
    fn get(&self, url: &str) -> Result<String, BridgeError> {
        self.outbound().get(url)
    }

    fn post_form(&self, url: &str, data: Option<&Table>) -> Result<String, BridgeError> {
        self.outbound().post_form(url, data)
    }

    fn request(&self, config: &Table) -> Result<(String, Table, u16), BridgeError> {
        self.outbound().request(config)
    }
}

/// Dispatches the operations shared by the full and regular tiers.
fn dispatch_regular<T: ResponseTier>(
    bound: &mut BoundScript<'_, T>,
    method: &str,
    args: &[Value],
) -> Result<Vec<Value>, BridgeError> {
    match method {
        "getCookie" => {
            let name = expect_string(args, 1, "Invalid cookie name. Expected string")?;
            Ok(one(bound.get_cookie(name)?))
        }
        "setCookie" => {
            let name = expect_string(args, 1, "Invalid cookie name. Expected string")?;
            let value = expect_string(args, 2, "Invalid cookie value. Expected string")?;
            let expires =
                expect_integer(args, 3, "Invalid cookie expiration. Expected number")?;
            bound.set_cookie(name, value, expires)?;
            Ok(none())
        }
        "parseMultiPartForm" => {
            let size = optional_integer(args, 1, "Invalid form size. Expected number")?;
            bound.parse_multipart_form(size.unwrap_or(0))?;
            Ok(none())
        }
        "getFormFile" => {
            let field = expect_string(args, 1, "Invalid form field. Expected string")?;
            let file = bound.get_form_file(field)?;
            Ok(one(file.map(Handle::File)))
        }
        "write" => {
            bound.write(expect_string(args, 1, "Invalid data type. Expected string")?)?;
            Ok(none())
        }
        "render" => {
            let template = expect_string(args, 1, "Invalid template name. Expected string")?;
            let data = optional_table(args, 2, "Invalid template arguments. Expected table")?;
            bound.render(template, data)?;
            Ok(none())
        }
        "redirect" => {
            let dest = optional_string(args, 1, "Invalid destination. Expected string")?;
            let status = optional_integer(args, 2, "Invalid status code. Expected number")?
                .unwrap_or(0);
            let status = u16::try_from(status)
                .ok()
                .filter(|s| *s == 0 || (100..=999).contains(s))
                .ok_or_else(|| {
                    BridgeError::argument(2, "status code", "Invalid status code. Expected number")
                })?;
            bound.redirect(dest, status);
            Ok(none())
        }
        "serveFile" => {
            bound.serve_file(expect_string(args, 1, "Invalid path type. Expected string")?)?;
            Ok(none())
        }
        "getHeader" => {
            let key = expect_string(args, 1, "Invalid key type. Expected string")?;
            Ok(one(bound.get_header(key)))
        }
        "setHeader" => {
            let key = expect_string(args, 1, "Invalid key type. Expected string")?;
            let value = expect_string(args, 2, "Invalid value type. Expected string")?;
            bound.set_header(key, value);
            Ok(none())
        }
        "getRemoteAddress" => Ok(one(bound.remote_address()?)),
        "getRelativeURL" => Ok(one(bound.relative_url())),
        other => Err(BridgeError::missing_capability(other, T::TIER)),
    }
}

/// Per-request fields of the full and regular tier objects.
fn request_field<T: TierMarker>(bound: &BoundScript<'_, T>, name: &str) -> Value {
    let ctx = &bound.ctx;
    match name {
        "method" => ctx.request().method().into(),
        "body" => ctx.body_text().into(),
        "getValues" => values_to_table(ctx.get_values()).into(),
        "postValues" => ctx.post_values().map(values_to_table).into(),
        "subtopic" => ctx.subtopic().into(),
        "request" => Handle::Request.into(),
        "responseWriter" => Handle::ResponseWriter.into(),
        "session" => Handle::Session(ctx.session().clone()).into(),
        _ => Value::Nil,
    }
}

impl ScriptObject for BoundScript<'_, Full> {
    fn call(&mut self, method: &str, args: &[Value]) -> Result<Vec<Value>, BridgeError> {
        match method {
            "get" => {
                let url = expect_string(args, 1, "Invalid url type. Expected string")?;
                Ok(one(FullCapabilities::get(self, url)?))
            }
            "postForm" => {
                let url = expect_string(args, 1, "Invalid url type. Expected string")?;
                let data = optional_table(args, 2, "Invalid form data. Expected table")?;
                Ok(one(self.post_form(url, data)?))
            }
            "request" => {
                let config = expect_table(args, 1, "Invalid request configuration. Expected table")?;
                let (body, headers, status) = self.request(config)?;
                Ok(vec![body.into(), headers.into(), status.into()])
            }
            _ => dispatch_regular(self, method, args),
        }
    }

    fn methods(&self) -> &'static [&'static str] {
        FULL_METHODS
    }

    fn field(&self, name: &str) -> Value {
        request_field(self, name)
    }
}

impl ScriptObject for BoundScript<'_, Regular> {
    fn call(&mut self, method: &str, args: &[Value]) -> Result<Vec<Value>, BridgeError> {
        dispatch_regular(self, method, args)
    }

    fn methods(&self) -> &'static [&'static str] {
        REGULAR_METHODS
    }

    fn field(&self, name: &str) -> Value {
        request_field(self, name)
    }
}

impl ScriptObject for BoundScript<'_, Widget> {
    fn call(&mut self, method: &str, _args: &[Value]) -> Result<Vec<Value>, BridgeError> {
        self.log()
            .warn(format_args!("widget script called '{}'", method));
        Err(BridgeError::missing_capability(method, Tier::Widget))
    }

    fn methods(&self) -> &'static [&'static str] {
        &[]
    }

    fn field(&self, _name: &str) -> Value {
        Value::Nil
    }
}

//! HTTP operations bridged to scripts.
//!
//! [`HttpBridge`] covers response mutation and needs a [`ResponseCap`].
//! [`OutboundClient`] originates network traffic and needs an
//! [`OutboundCap`], which only the full tier receives.

use std::fs;

use serde_json::Value as JsonValue;
use url::Url;

use crate::capability::{OutboundCap, ResponseCap};
use crate::collab::{TemplateRenderer, WidgetCompiler};
use crate::context::ScriptContext;
use crate::error::BridgeError;
use crate::marshal::{headers_to_table, table_to_json_map};
use crate::multipart::UploadedFile;
use crate::outbound::{form_values, ClientConfig, HttpTransport, OutboundRequest, OutboundResponse};
use crate::response::SetCookie;
use crate::value::Table;

/// Template argument key under which compiled widgets are passed.
pub const WIDGETS_KEY: &str = "widgets";

/// Response-mutating operations of a bound context.
pub struct HttpBridge<'c, 'a> {
    ctx: &'c mut ScriptContext<'a>,
    _cap: ResponseCap,
}

impl<'c, 'a> HttpBridge<'c, 'a> {
    pub(crate) fn new(ctx: &'c mut ScriptContext<'a>, cap: ResponseCap) -> Self {
        Self { ctx, _cap: cap }
    }

    /// Adds a `Set-Cookie` header: HTTP-only, path `/`, expiring at the
    /// Unix time `expires`, secure when `secure` is set.
    ///
    /// # Errors
    ///
    /// `HostOperation` for an invalid name or expiry.
    pub fn set_cookie(
        &mut self,
        name: &str,
        value: &str,
        expires: i64,
        secure: bool,
    ) -> Result<(), BridgeError> {
        let header = SetCookie::scripted(name, value, expires, secure).header_value()?;
        self.ctx.writer_mut().headers_mut().add("Set-Cookie", header);
        Ok(())
    }

    /// Parses the body as a multipart form.
    ///
    /// # Errors
    ///
    /// `HostOperation` when the body is not a valid multipart form.
    pub fn parse_multipart_form(&mut self, max_memory: u64) -> Result<(), BridgeError> {
        self.ctx
            .parse_multipart(max_memory)
            .map_err(|e| BridgeError::host("Cannot parse multi-part form", e))
    }

    /// Retrieves an uploaded file, parsing the form first if needed.
    ///
    /// `None` when the form cannot be parsed or has no such file.
    ///
    /// # Errors
    ///
    /// `HostOperation` when the located file cannot be read.
    pub fn get_form_file(
        &mut self,
        field: &str,
        default_max_memory: u64,
    ) -> Result<Option<UploadedFile>, BridgeError> {
        if self.ctx.multipart().is_none() && self.ctx.parse_multipart(default_max_memory).is_err() {
            return Ok(None);
        }
        let Some(form) = self.ctx.multipart() else {
            return Ok(None);
        };
        match form.read_file(field) {
            None => Ok(None),
            Some(Ok(file)) => Ok(Some(file)),
            Some(Err(e)) => Err(BridgeError::host("Cannot read file content", e)),
        }
    }

    /// Writes status 200 and `data`.
    ///
    /// # Errors
    ///
    /// `HostOperation` when the writer fails.
    pub fn write(&mut self, data: &str) -> Result<(), BridgeError> {
        let writer = self.ctx.writer_mut();
        writer.write_header(200);
        writer
            .write(data.as_bytes())
            .map_err(|e| BridgeError::host("Cannot write response", e))?;
        Ok(())
    }

    /// Renders `template` with `args` plus the compiled widgets.
    ///
    /// Widget compilation and rendering failures are logged, not raised.
    ///
    /// # Errors
    ///
    /// `AmbiguousTable` when `args` cannot be converted to a map.
    pub fn render(
        &mut self,
        renderer: &dyn TemplateRenderer,
        widgets: &dyn WidgetCompiler,
        template: &str,
        args: Option<&Table>,
    ) -> Result<(), BridgeError> {
        let log = self.ctx.log();
        let mut data = match args {
            Some(table) => table_to_json_map(table)?,
            None => serde_json::Map::new(),
        };

        let (request, writer, session) = self.ctx.parts();
        let compiled = widgets.compile(request, writer, session);
        if let Some(err) = &compiled.error {
            log.error(format_args!("Cannot compile widget list: {}", err));
        }
        data.insert(WIDGETS_KEY.to_string(), JsonValue::Object(compiled.widgets));

        writer.write_header(200);
        if let Err(err) = renderer.render(writer, request, template, &data) {
            log.error(format_args!("Cannot render template {}: {}", template, err));
        }
        Ok(())
    }

    /// Redirects to `dest`, or back to the request URI when `dest` is
    /// `None`. A zero status means 302. Only the `Location` header and the
    /// status are written.
    pub fn redirect(&mut self, dest: Option<&str>, status: u16) {
        let (location, status) = match dest {
            None => (self.ctx.subtopic().to_string(), 302),
            Some(dest) => (
                resolve_location(self.ctx, dest),
                if status == 0 { 302 } else { status },
            ),
        };

        let writer = self.ctx.writer_mut();
        writer.headers_mut().set("Location", location.as_str());
        writer.write_header(status);
    }

    /// Writes status 200 and the contents of the file at `path`, relative
    /// to the working directory.
    ///
    /// # Errors
    ///
    /// `HostOperation` when the file cannot be read. The status has already
    /// been written by then.
    pub fn serve_file(&mut self, path: &str) -> Result<(), BridgeError> {
        let writer = self.ctx.writer_mut();
        writer.write_header(200);

        let bytes = fs::read(path).map_err(|e| BridgeError::host("Cannot serve file", e))?;
        writer
            .write(&bytes)
            .map_err(|e| BridgeError::host("Cannot serve file", e))?;
        Ok(())
    }

    /// Replaces a response header.
    pub fn set_header(&mut self, key: &str, value: &str) {
        self.ctx.writer_mut().headers_mut().set(key, value);
    }
}

/// Outbound HTTP operations, full tier only.
pub struct OutboundClient<'b> {
    transport: &'b dyn HttpTransport,
    user_agent: Option<&'b str>,
    _cap: OutboundCap,
}

impl<'b> OutboundClient<'b> {
    pub(crate) fn new(
        transport: &'b dyn HttpTransport,
        user_agent: Option<&'b str>,
        cap: OutboundCap,
    ) -> Self {
        Self {
            transport,
            user_agent,
            _cap: cap,
        }
    }

    /// `GET url`, returning the body.
    ///
    /// # Errors
    ///
    /// `HostOperation` for malformed URLs and transport failures.
    pub fn get(&self, url: &str) -> Result<String, BridgeError> {
        let url = Url::parse(url).map_err(|e| BridgeError::host("Cannot perform get request", e))?;
        let response = self.send(OutboundRequest::new("GET", url))?;
        Ok(response.body_text())
    }

    /// Posts `data` as a urlencoded form, returning the body.
    ///
    /// # Errors
    ///
    /// `AmbiguousTable` when `data` is not a flat string map, `HostOperation`
    /// for malformed URLs and transport failures.
    pub fn post_form(&self, url: &str, data: Option<&Table>) -> Result<String, BridgeError> {
        let values = form_values(data)?;
        let url = Url::parse(url).map_err(|e| BridgeError::host("Cannot post form", e))?;
        let response = self.send(OutboundRequest::form(url, &values))?;
        Ok(response.body_text())
    }

    /// Executes one request described by a configuration table.
    ///
    /// Returns the body, the response headers as a table (repeated headers
    /// become sequences) and the status code. The configuration is checked
    /// completely before anything is sent.
    ///
    /// # Errors
    ///
    /// See [`ClientConfig::from_table`] and [`HttpTransport::execute`].
    pub fn request(&self, config: &Table) -> Result<(String, Table, u16), BridgeError> {
        let request = ClientConfig::from_table(config)?.into_request()?;
        let response = self.send(request)?;
        Ok((
            response.body_text(),
            headers_to_table(&response.headers),
            response.status,
        ))
    }

    fn send(&self, mut request: OutboundRequest) -> Result<OutboundResponse, BridgeError> {
        if let Some(agent) = self.user_agent {
            if !request.headers.contains("User-Agent") {
                request.headers.set("User-Agent", agent);
            }
        }
        tracing::debug!(method = %request.method, url = %request.url, "outbound request");
        self.transport.execute(request)
    }
}

/// Resolves a redirect target relative to the request path. Absolute URLs
/// and absolute paths are kept as given.
fn resolve_location(ctx: &ScriptContext<'_>, dest: &str) -> String {
    if Url::parse(dest).is_ok() || dest.starts_with('/') {
        return dest.to_string();
    }
    match ctx.request().url().and_then(|base| {
        base.join(dest)
            .map_err(|e| BridgeError::host("Cannot resolve redirect", e))
    }) {
        Ok(joined) => match joined.query() {
            Some(q) => format!("{}?{}", joined.path(), q),
            None => joined.path().to_string(),
        },
        Err(_) => dest.to_string(),
    }
}

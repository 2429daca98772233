use crate::collab::SessionHandle;
use crate::logging::ScriptLog;
use crate::marshal::ValueSet;
use crate::multipart::{MultipartError, MultipartForm};
use crate::request::HostRequest;
use crate::response::ResponseWriter;
use crate::tier::Tier;

/// Per-request state a bound script operates on.
///
/// One context exists per in-flight request and is never shared. It borrows
/// the host's request and response writer for its whole lifetime, so it
/// cannot outlive the request it was created for.
///
/// The body is taken from the request exactly once, when the context is
/// created; the request itself is read-only from then on. Query values,
/// cookies and headers therefore reflect the request as it was at creation,
/// while response changes are visible immediately.
///
/// # Construction
///
/// Contexts are created by [`Bridge`](crate::Bridge) when it binds a tier.
/// The tier is fixed at creation.
pub struct ScriptContext<'a> {
    tier: Tier,
    request: &'a HostRequest,
    writer: &'a mut dyn ResponseWriter,
    session: SessionHandle,
    body: Vec<u8>,
    get_values: ValueSet,
    post_values: ValueSet,
    multipart: Option<MultipartForm>,
    subtopic: String,
}

impl<'a> ScriptContext<'a> {
    /// Captures the request body and parses query and urlencoded POST values.
    pub(crate) fn new(
        tier: Tier,
        request: &'a mut HostRequest,
        writer: &'a mut dyn ResponseWriter,
        session: SessionHandle,
    ) -> Self {
        let body = request.take_body();
        let request: &'a HostRequest = request;

        let post_values = if request.method() == "POST" && is_urlencoded(request.content_type()) {
            ValueSet::parse(&String::from_utf8_lossy(&body))
        } else {
            ValueSet::new()
        };

        Self {
            tier,
            request,
            writer,
            session,
            body,
            get_values: request.query(),
            post_values,
            multipart: None,
            subtopic: request.uri().to_string(),
        }
    }

    /// The tier this context was bound for.
    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// Returns the request ID for this context.
    pub fn request_id(&self) -> &str {
        self.request.request_id()
    }

    /// The request, as it was when the context was created.
    pub fn request(&self) -> &HostRequest {
        self.request
    }

    /// The response writer.
    pub fn writer(&self) -> &dyn ResponseWriter {
        &*self.writer
    }

    /// The response writer, mutably.
    pub fn writer_mut(&mut self) -> &mut dyn ResponseWriter {
        &mut *self.writer
    }

    /// Borrows the request, the writer and the session together.
    pub(crate) fn parts(&mut self) -> (&HostRequest, &mut dyn ResponseWriter, &SessionHandle) {
        (self.request, &mut *self.writer, &self.session)
    }

    /// The request's session.
    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// The captured body bytes.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// The captured body as text. Invalid UTF-8 is replaced.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Query string values.
    pub fn get_values(&self) -> &ValueSet {
        &self.get_values
    }

    /// Form values, for POST requests only.
    ///
    /// Urlencoded bodies are parsed at creation; multipart bodies after
    /// [`parse_multipart`](Self::parse_multipart).
    pub fn post_values(&self) -> Option<&ValueSet> {
        (self.request.method() == "POST").then_some(&self.post_values)
    }

    /// The raw request URI. Default redirect target.
    pub fn subtopic(&self) -> &str {
        &self.subtopic
    }

    /// The parsed multipart form, once parsed.
    pub fn multipart(&self) -> Option<&MultipartForm> {
        self.multipart.as_ref()
    }

    /// Parses the captured body as a multipart form and refreshes the form
    /// values from its text fields.
    ///
    /// # Errors
    ///
    /// See [`MultipartError`].
    pub fn parse_multipart(&mut self, max_memory: u64) -> Result<(), MultipartError> {
        let form = MultipartForm::parse(self.request.content_type(), &self.body, max_memory)?;
        self.post_values = form.values().clone();
        self.multipart = Some(form);
        Ok(())
    }

    /// A logger tagged with this request.
    pub fn log(&self) -> ScriptLog<'a> {
        ScriptLog::new(self.request.request_id(), self.tier)
    }
}

fn is_urlencoded(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(|media| media.trim().eq_ignore_ascii_case("application/x-www-form-urlencoded"))
        .unwrap_or(false)
}

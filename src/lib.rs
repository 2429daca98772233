//! Capability-tiered bridge between request-scoped scripts and an HTTP host.
//!
//! Every request handled by a script gets its own [`ScriptContext`], bound
//! at one of three tiers:
//!
//! - **Full** page scripts reach every HTTP and validation operation,
//!   including outbound network calls
//! - **Regular** event hook scripts lose the outbound operations
//! - **Widget** scripts get an object with no operations at all
//!
//! The tier is a type parameter of [`BoundScript`], so it cannot change after
//! binding. Operations that mutate the response need a [`ResponseCap`] and
//! outbound calls need an [`OutboundCap`]; both are zero-sized proofs only
//! this crate can grant.
//!
//! # Core Types
//!
//! - [`Bridge`]: process-wide state, built once with [`BridgeBuilder`]
//! - [`BoundScript`]: one request bound at one tier
//! - [`Value`] and [`Table`]: what scripts pass and receive
//! - [`ValidatorObject`]: generic and domain validators
//! - [`BridgeError`]: every failure a bridged call can raise
//! - [`Secret<T>`]: redacts tokens and passwords in logs
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use script_bridge::{
//!     Bridge, BridgeError, HostRequest, RecordedResponse, RecordingTransport, ReferenceData,
//!     RegularCapabilities, ResponseWriter, SessionHandle, TemplateRenderer, Value,
//!     WidgetCompilation, WidgetCompiler,
//! };
//! # use serde_json::{Map, Value as Json};
//! # struct Templates;
//! # impl TemplateRenderer for Templates {
//! #     fn render(&self, _: &mut dyn ResponseWriter, _: &HostRequest, _: &str,
//! #               _: &Map<String, Json>) -> Result<(), BridgeError> { Ok(()) }
//! # }
//! # struct Widgets;
//! # impl WidgetCompiler for Widgets {
//! #     fn compile(&self, _: &HostRequest, _: &mut dyn ResponseWriter, _: &SessionHandle)
//! #         -> WidgetCompilation { WidgetCompilation::default() }
//! # }
//!
//! let bridge = Bridge::builder()
//!     .reference_data(Arc::new(ReferenceData::default()))
//!     .template_renderer(Templates)
//!     .widget_compiler(Widgets)
//!     .transport(RecordingTransport::new(""))
//!     .build()?;
//!
//! let mut request = HostRequest::new("GET", "/account?tab=guilds");
//! let mut response = RecordedResponse::new();
//! {
//!     let mut page = bridge.bind_regular(&mut request, &mut response, SessionHandle::anonymous());
//!     page.set_header("Cache-Control", "no-store");
//!     page.write("hello")?;
//! }
//! assert_eq!(response.status(), Some(200));
//! assert_eq!(response.body_text(), "hello");
//! # Ok::<(), BridgeError>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod binder;
mod capability;
mod collab;
mod config;
mod context;
mod error;
mod http_bridge;
mod logging;
mod marshal;
mod multipart;
mod object;
mod outbound;
mod registry;
mod request;
mod response;
mod sanitizer;
mod secret;
mod tier;
mod validator;
mod value;

pub use binder::{
    BoundScript, Bridge, BridgeBuilder, FullCapabilities, RegularCapabilities, ScriptGlobals,
    WidgetMarker, FULL_METHODS, REGULAR_METHODS,
};
pub use capability::{OutboundCap, ResponseCap};
pub use collab::{
    Blacklister, CharBlacklist, OtpError, OtpVerifier, SessionHandle, TemplateRenderer,
    WidgetCompilation, WidgetCompiler,
};
pub use config::{BridgeConfig, SslConfig};
pub use context::ScriptContext;
pub use error::{BridgeError, BridgeErrorKind};
pub use http_bridge::{HttpBridge, OutboundClient, WIDGETS_KEY};
pub use logging::ScriptLog;
pub use marshal::{
    canonical_header_key, headers_to_table, table_to_json_map, table_to_values, value_to_json,
    values_to_table, HeaderSet, ValueSet,
};
pub use multipart::{FileHeader, MultipartError, MultipartForm, UploadedFile, DEFAULT_MAX_MEMORY};
pub use object::{
    arg, expect_integer, expect_string, expect_table, loose_string, optional_integer,
    optional_string, optional_table, ScriptObject,
};
pub use outbound::{
    parse_duration, BasicAuth, ClientConfig, HttpTransport, OutboundRequest, OutboundResponse,
    RecordedCall, RecordingTransport, ReqwestTransport,
};
pub use registry::{
    load_towns, load_vocations, parse_towns, parse_vocations, ReferenceData, Town, Vocation,
};
pub use request::{split_host_port, HostRequest};
pub use response::{RecordedResponse, ResponseWriter, SetCookie};
pub use sanitizer::escape;
pub use secret::Secret;
pub use tier::{Full, Regular, ResponseTier, Tier, TierMarker, Widget};
pub use validator::{
    generic_validator, valid_gender, valid_guild_name, valid_guild_rank, valid_username,
    ValidatorFn, ValidatorObject, GENERIC_VALIDATORS, OTP_WINDOW, VALIDATOR_METHODS,
};
pub use value::{Handle, Table, TableKey, TableShape, Value};

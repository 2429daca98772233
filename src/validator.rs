//! Validation bridge.
//!
//! Two families of checks are exposed to scripts: generic string validators
//! looked up by name in a fixed registry, and domain validators backed by
//! the [`ReferenceData`] snapshot. Absence is always a `false` result; only
//! wrong argument types, unknown validator names and collaborator failures
//! raise.

use url::{Host, Url};

use crate::collab::{Blacklister, OtpError, OtpVerifier};
use crate::error::{BridgeError, BridgeErrorKind};
use crate::object::{arg, expect_integer, expect_string, one, ScriptObject};
use crate::registry::ReferenceData;
use crate::sanitizer::{escape, letters_and_spaces, letters_hyphens_and_spaces};
use crate::tier::Tier;
use crate::value::Value;

/// Verification window, in time steps, for one-time codes.
pub const OTP_WINDOW: u32 = 3;

const STRING_EXPECTED: &str = "Invalid string format. Expected string";

/// A generic string validator.
pub type ValidatorFn = fn(&str) -> bool;

/// Generic validators scripts can call through `validate(name, value)`.
pub const GENERIC_VALIDATORS: &[(&str, ValidatorFn)] = &[
    ("IsURL", is_url),
    ("IsAlpha", is_alpha),
    ("IsAlphanumeric", is_alphanumeric),
    ("IsEmail", is_email),
    ("IsJson", is_json),
    ("IsNull", is_null),
    ("IsEmpty", is_null),
    ("IsASCII", is_ascii),
    ("IsUpperCase", is_upper_case),
    ("IsLowerCase", is_lower_case),
    ("IsInt", is_int),
];

/// Looks up a generic validator by its exact name.
pub fn generic_validator(name: &str) -> Option<ValidatorFn> {
    GENERIC_VALIDATORS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, f)| *f)
}

fn is_null(s: &str) -> bool {
    s.is_empty()
}

fn is_alpha(s: &str) -> bool {
    s.chars().all(|c| c.is_ascii_alphabetic())
}

fn is_alphanumeric(s: &str) -> bool {
    s.chars().all(|c| c.is_ascii_alphanumeric())
}

fn is_ascii(s: &str) -> bool {
    s.is_ascii()
}

fn is_upper_case(s: &str) -> bool {
    s == s.to_uppercase()
}

fn is_lower_case(s: &str) -> bool {
    s == s.to_lowercase()
}

fn is_int(s: &str) -> bool {
    if s.is_empty() {
        return true;
    }
    let digits = s.strip_prefix(['+', '-']).unwrap_or(s);
    match digits.as_bytes() {
        [] => false,
        [b'0'] => true,
        [b'0', ..] => false,
        bytes => bytes.iter().all(u8::is_ascii_digit),
    }
}

fn is_json(s: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(s).is_ok()
}

fn is_email(s: &str) -> bool {
    let Some((local, domain)) = s.rsplit_once('@') else {
        return false;
    };
    if local.is_empty() || local.len() > 64 || local.starts_with('.') || local.ends_with('.') {
        return false;
    }
    let local_ok = local
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "!#$%&'*+/=?^_`{|}~.-".contains(c));
    local_ok && !local.contains("..") && is_domain(domain)
}

fn is_domain(domain: &str) -> bool {
    let labels: Vec<&str> = domain.split('.').collect();
    labels.len() >= 2
        && labels.iter().all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
        && labels
            .last()
            .is_some_and(|tld| tld.chars().all(|c| c.is_ascii_alphabetic()) && tld.len() >= 2)
}

fn is_url(s: &str) -> bool {
    if s.len() <= 3 || s.len() >= 2083 || s.starts_with('.') || s.contains(char::is_whitespace) {
        return false;
    }
    let candidate = if s.contains("://") {
        s.to_string()
    } else {
        format!("http://{}", s)
    };
    let Ok(url) = Url::parse(&candidate) else {
        return false;
    };
    match url.host() {
        Some(Host::Domain(domain)) => domain == "localhost" || is_domain(domain),
        Some(Host::Ipv4(_)) | Some(Host::Ipv6(_)) => true,
        None => false,
    }
}

/// Guild names: 5 to 20 bytes, ASCII letters and spaces only.
pub fn valid_guild_name(name: &str) -> bool {
    (5..=20).contains(&name.len()) && letters_and_spaces(name)
}

/// Guild ranks: 5 to 15 bytes, ASCII letters, hyphens and spaces only.
pub fn valid_guild_rank(rank: &str) -> bool {
    (5..=15).contains(&rank.len()) && letters_hyphens_and_spaces(rank)
}

/// Usernames: any length, ASCII letters and spaces only.
pub fn valid_username(name: &str) -> bool {
    letters_and_spaces(name)
}

/// Genders are `0` or `1`.
pub fn valid_gender(gender: i64) -> bool {
    gender == 0 || gender == 1
}

/// Script methods of [`ValidatorObject`].
pub const VALIDATOR_METHODS: &[&str] = &[
    "validate",
    "blackList",
    "escape",
    "checkQRCode",
    "validVocation",
    "validTown",
    "validGender",
    "validGuildName",
    "validGuildRank",
    "validUsername",
];

/// The validator object scripts see.
///
/// Holds borrowed collaborators only; one is created per bound script.
pub struct ValidatorObject<'a> {
    reference: &'a ReferenceData,
    blacklister: &'a dyn Blacklister,
    otp: Option<&'a dyn OtpVerifier>,
    tier: Tier,
}

impl<'a> ValidatorObject<'a> {
    /// Creates a validator over a reference-data snapshot.
    pub fn new(
        reference: &'a ReferenceData,
        blacklister: &'a dyn Blacklister,
        otp: Option<&'a dyn OtpVerifier>,
    ) -> Self {
        Self {
            reference,
            blacklister,
            otp,
            tier: Tier::Full,
        }
    }

    /// Sets the tier reported when a script calls an unknown method.
    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = tier;
        self
    }

    /// Runs the generic validator `name` against `value`.
    ///
    /// # Errors
    ///
    /// `UnknownValidator` when no validator has that name.
    pub fn validate(&self, name: &str, value: &str) -> Result<bool, BridgeError> {
        let validator = generic_validator(name).ok_or_else(|| {
            BridgeError::new(
                BridgeErrorKind::UnknownValidator,
                format!("Unknown validator name '{}'", name),
            )
        })?;
        Ok(validator(value))
    }

    /// Checks a one-time code. A wrong code is `false`.
    ///
    /// # Errors
    ///
    /// `NotRegistered` without an OTP verifier, `HostOperation` for any
    /// verifier failure other than a wrong code.
    pub fn check_one_time_code(&self, token: &str, secret: &str) -> Result<bool, BridgeError> {
        let otp = self
            .otp
            .ok_or_else(|| BridgeError::not_registered("one-time-code verifier"))?;
        match otp.verify(secret, token, OTP_WINDOW) {
            Ok(valid) => Ok(valid),
            Err(OtpError::InvalidCode) => Ok(false),
            Err(err) => Err(BridgeError::host("Cannot authenticate token", err)),
        }
    }

    /// Whether a vocation exists, by id (numbers) or name (strings).
    /// With `base`, it must also be a base vocation.
    ///
    /// # Errors
    ///
    /// `ArgumentType` when `vocation` is neither a number nor a string.
    pub fn valid_vocation(&self, vocation: &Value, base: bool) -> Result<bool, BridgeError> {
        let found = match vocation {
            Value::Number(_) => self.reference.vocation_by_id(vocation.to_integer()),
            Value::String(name) => self.reference.vocation_by_name(name),
            _ => {
                return Err(BridgeError::argument(
                    1,
                    "number or string",
                    "Invalid vocation format. Expected number or string",
                ))
            }
        };
        Ok(found.is_some_and(|v| !base || v.is_base()))
    }

    /// Whether a town exists, by id (numbers) or name (strings).
    ///
    /// # Errors
    ///
    /// `ArgumentType` when `town` is neither a number nor a string.
    pub fn valid_town(&self, town: &Value) -> Result<bool, BridgeError> {
        match town {
            Value::Number(_) => Ok(u32::try_from(town.to_integer())
                .ok()
                .and_then(|id| self.reference.town_by_id(id))
                .is_some()),
            Value::String(name) => Ok(self.reference.town_by_name(name).is_some()),
            _ => Err(BridgeError::argument(
                1,
                "number or string",
                "Invalid town format. Expected number or string",
            )),
        }
    }
}

impl ScriptObject for ValidatorObject<'_> {
    fn call(&mut self, method: &str, args: &[Value]) -> Result<Vec<Value>, BridgeError> {
        match method {
            "validate" => {
                let name = expect_string(args, 1, "Invalid validator name")?;
                let value = expect_string(args, 2, "Invalid validator object")?;
                Ok(one(self.validate(name, value)?))
            }
            "blackList" => {
                let line = expect_string(args, 1, "Invalid object type. Expected string")?;
                let chars = expect_string(args, 2, "Invalid table of words. Expected string")?;
                Ok(one(self.blacklister.blacklist(line, chars)))
            }
            "escape" => Ok(one(escape(expect_string(args, 1, STRING_EXPECTED)?))),
            "checkQRCode" => {
                let token = expect_string(args, 1, "Invalid token type. Expected string")?;
                let secret = expect_string(args, 2, "Invalid secret type. Expected string")?;
                Ok(one(self.check_one_time_code(token, secret)?))
            }
            "validVocation" => Ok(one(
                self.valid_vocation(arg(args, 1), arg(args, 2).truthy())?,
            )),
            "validTown" => Ok(one(self.valid_town(arg(args, 1))?)),
            "validGender" => {
                let gender = expect_integer(args, 1, "Invalid gender type. Expected number")?;
                Ok(one(valid_gender(gender)))
            }
            "validGuildName" => Ok(one(valid_guild_name(expect_string(
                args,
                1,
                STRING_EXPECTED,
            )?))),
            "validGuildRank" => Ok(one(valid_guild_rank(expect_string(
                args,
                1,
                STRING_EXPECTED,
            )?))),
            "validUsername" => Ok(one(valid_username(expect_string(
                args,
                1,
                STRING_EXPECTED,
            )?))),
            other => Err(BridgeError::missing_capability(other, self.tier)),
        }
    }

    fn methods(&self) -> &'static [&'static str] {
        VALIDATOR_METHODS
    }

    fn field(&self, _name: &str) -> Value {
        Value::Nil
    }
}

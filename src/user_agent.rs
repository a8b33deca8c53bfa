//! User-Agent values: the tool's own identifier and randomized browser-like identities.
//!
//! Traffic that does not go through the identity layer carries
//! the tool's own identifier. The identity layer renders a fresh value from a
//! [`UserAgentGenerator`] on every call.

use std::sync::LazyLock;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use rand::seq::SliceRandom;
use regex::{Captures, Regex};
use reqwest::header::HeaderValue;
use sha2::{Digest, Sha256};

use crate::error::ConfigError;

/// Project URL for User-Agent identification.
const PROJECT_UA_URL: &str = "https://github.com/sligodave/digger";

/// Default identity template.
pub const DEFAULT_TEMPLATE: &str =
    "{base}/{base_version} ({os} {os_version}) {hash} {engine} {browser}/{browser_version}";

/// Placeholder names a template may use.
pub const PLACEHOLDERS: &[&str] = &[
    "base",
    "base_version",
    "os",
    "os_version",
    "engine",
    "engine_version",
    "browser",
    "browser_version",
    "hash",
];

#[allow(clippy::expect_used)]
static PLACEHOLDER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([A-Za-z_]+)\}").expect("placeholder regex is valid") // Static pattern, safe to panic
});

/// A browser family fixes the base product, rendering engine, and allowed browsers.
#[derive(Debug)]
struct Family {
    base: &'static str,
    engine: &'static str,
    browsers: &'static [&'static str],
}

const FAMILIES: &[Family] = &[
    Family {
        base: "Mozilla",
        engine: "Gecko",
        browsers: &["Internet Explorer", "Firefox", "Edge"],
    },
    Family {
        base: "Safari",
        engine: "WebKit",
        browsers: &["Chrome", "Safari", "Opera"],
    },
];

const OPERATING_SYSTEMS: &[&str] = &["Windows", "Linux", "OpenBSD", "Mac OSX", "Macintosh"];

// Digit counts for each dotted part of a version string.
const BASE_VERSION_DIGITS: &[u32] = &[1, 1];
const OS_VERSION_DIGITS: &[u32] = &[2, 2];
const BROWSER_VERSION_DIGITS: &[u32] = &[3, 1, 2];
const ENGINE_VERSION_DIGITS: &[u32] = &[2, 1, 3, 2];

/// Length of the hex token substituted for `{hash}`.
const HASH_LEN: usize = 32;

/// Default User-Agent for traffic that is not randomized (identifies the tool).
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("digger/{version} (+{PROJECT_UA_URL})")
}

/// One set of values for the template placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAgentValues {
    /// Base product, e.g. `Mozilla`.
    pub base: &'static str,
    /// Base product version, e.g. `5.0`.
    pub base_version: String,
    /// Operating system name.
    pub os: &'static str,
    /// Operating system version.
    pub os_version: String,
    /// Rendering engine of the chosen family.
    pub engine: &'static str,
    /// Rendering engine version.
    pub engine_version: String,
    /// Browser name from the chosen family.
    pub browser: &'static str,
    /// Browser version.
    pub browser_version: String,
    /// Time-derived hex token.
    pub hash: String,
}

impl UserAgentValues {
    /// Looks up a placeholder by name.
    #[must_use]
    pub fn get(&self, placeholder: &str) -> Option<&str> {
        let value = match placeholder {
            "base" => self.base,
            "base_version" => &self.base_version,
            "os" => self.os,
            "os_version" => &self.os_version,
            "engine" => self.engine,
            "engine_version" => &self.engine_version,
            "browser" => self.browser,
            "browser_version" => &self.browser_version,
            "hash" => &self.hash,
            _ => return None,
        };
        Some(value)
    }
}

/// Renders randomized, plausible browser User-Agent strings.
#[derive(Debug, Clone)]
pub struct UserAgentGenerator {
    template: String,
}

impl Default for UserAgentGenerator {
    fn default() -> Self {
        Self {
            template: DEFAULT_TEMPLATE.to_string(),
        }
    }
}

impl UserAgentGenerator {
    /// Creates a generator using [`DEFAULT_TEMPLATE`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a generator for a custom template.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if the template names a placeholder
    /// outside [`PLACEHOLDERS`], or if its rendering is not a legal header value.
    pub fn with_template(template: impl Into<String>) -> Result<Self, ConfigError> {
        let template = template.into();
        if let Some(unknown) = PLACEHOLDER_PATTERN
            .captures_iter(&template)
            .map(|caps| caps[1].to_string())
            .find(|name| !PLACEHOLDERS.contains(&name.as_str()))
        {
            return Err(ConfigError::invalid_value(
                "user_agent_template",
                format!("unknown placeholder {{{unknown}}}"),
            ));
        }

        // Placeholder values are plain ASCII, so one sample covers every rendering.
        let generator = Self { template };
        let sample = generator.generate();
        HeaderValue::from_str(&sample).map_err(|e| {
            ConfigError::invalid_value(
                "user_agent_template",
                format!("renders to an invalid header value {sample:?}: {e}"),
            )
        })?;
        Ok(generator)
    }

    /// The template being rendered.
    #[must_use]
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Renders a fresh value using the thread-local RNG.
    #[must_use]
    pub fn generate(&self) -> String {
        self.generate_with(&mut rand::thread_rng())
    }

    /// Renders a fresh value using the given RNG.
    pub fn generate_with<R: Rng + ?Sized>(&self, rng: &mut R) -> String {
        let values = random_values(rng);
        self.render(&values)
    }

    /// Substitutes every placeholder in the template.
    #[must_use]
    pub fn render(&self, values: &UserAgentValues) -> String {
        PLACEHOLDER_PATTERN
            .replace_all(&self.template, |caps: &Captures<'_>| {
                values.get(&caps[1]).unwrap_or(&caps[0]).to_string()
            })
            .into_owned()
    }
}

/// Draws one consistent set of placeholder values.
pub fn random_values<R: Rng + ?Sized>(rng: &mut R) -> UserAgentValues {
    // Both tables are non-empty constants.
    let family = FAMILIES.choose(rng).unwrap_or(&FAMILIES[0]);
    let os = OPERATING_SYSTEMS.choose(rng).copied().unwrap_or("Linux");
    let browser = family.browsers.choose(rng).copied().unwrap_or("Firefox");

    UserAgentValues {
        base: family.base,
        base_version: random_version(rng, BASE_VERSION_DIGITS),
        os,
        os_version: random_version(rng, OS_VERSION_DIGITS),
        engine: family.engine,
        engine_version: random_version(rng, ENGINE_VERSION_DIGITS),
        browser,
        browser_version: random_version(rng, BROWSER_VERSION_DIGITS),
        hash: time_hash(),
    }
}

/// Dotted version whose parts have exactly the given digit counts (no leading zeros).
fn random_version<R: Rng + ?Sized>(rng: &mut R, digits: &[u32]) -> String {
    digits
        .iter()
        .map(|&len| {
            let low = 10_u64.pow(len.saturating_sub(1));
            let high = 10_u64.pow(len) - 1;
            rng.gen_range(low..=high).to_string()
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Hex digest of the current time. Looks like a build hash; carries no meaning.
fn time_hash() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64();
    let mut hex = format!("{:x}", Sha256::digest(now.to_string().as_bytes()));
    hex.truncate(HASH_LEN);
    hex
}

//! Pipeline construction.
//!
//! Layers are declared outermost first. `build` validates the configuration,
//! binds the transport's source address when that layer is declared, then
//! wraps the executor from the innermost declaration outward.

use std::fmt;
use std::net::IpAddr;

use tracing::{debug, info, instrument};

use super::{Executor, Layer, Pipeline};
use crate::config::PipelineConfig;
use crate::error::ConfigError;
use crate::interfaces::InterfaceEnumerator;
use crate::layers::{
    AddressRotation, BaseUrlLayer, EnsureLayer, EnsurePolicy, PacingLayer, SourceAddressLayer,
    UserAgentLayer, resolve_pool,
};
use crate::transport::{HttpTransport, Transport};
use crate::user_agent::UserAgentGenerator;

/// Wraps the next inward layer into a new one.
pub type LayerFactory = Box<dyn FnMut(Box<dyn Layer>) -> Box<dyn Layer> + Send>;

/// Built-in layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerKind {
    /// Joins relative URLs onto `base_url`.
    BaseUrl,
    /// Randomizes the `User-Agent` header per call.
    UserAgent,
    /// Retries until an ok response or `ensure_attempts` run out.
    Ensure,
    /// Spaces calls by at least `pace` seconds.
    Pacing,
    /// Binds connections to an address from the configured pool.
    SourceAddress,
}

impl LayerKind {
    /// Name used in logs, errors, and [`Pipeline::layer_names`].
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::BaseUrl => "base-url",
            Self::UserAgent => "user-agent",
            Self::Ensure => "ensure",
            Self::Pacing => "pacing",
            Self::SourceAddress => "source-address",
        }
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

enum Declared {
    Builtin(LayerKind),
    Custom { name: String, factory: LayerFactory },
}

impl Declared {
    fn name(&self) -> &str {
        match self {
            Self::Builtin(kind) => kind.name(),
            Self::Custom { name, .. } => name,
        }
    }
}

/// Declares layers and builds pipelines from them.
///
/// One builder may build many pipelines. Source-address rotation advances
/// once per build, so sequential mode hands each pipeline the next address.
pub struct PipelineBuilder {
    config: PipelineConfig,
    layers: Vec<Declared>,
    interfaces: Option<Box<dyn InterfaceEnumerator>>,
    rotation: AddressRotation,
}

impl fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("config", &self.config)
            .field(
                "layers",
                &self.layers.iter().map(Declared::name).collect::<Vec<_>>(),
            )
            .field("interfaces", &self.interfaces.is_some())
            .field("rotation", &self.rotation)
            .finish()
    }
}

impl PipelineBuilder {
    /// Starts a builder with no layers.
    ///
    /// With the `interfaces` feature, interface discovery goes through the
    /// operating system unless replaced or removed.
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            layers: Vec::new(),
            interfaces: default_interfaces(),
            rotation: AddressRotation::default(),
        }
    }

    /// Appends a built-in layer inside the ones already declared.
    #[must_use]
    pub fn layer(mut self, kind: LayerKind) -> Self {
        self.layers.push(Declared::Builtin(kind));
        self
    }

    /// Appends a custom layer. `factory` runs once per build.
    #[must_use]
    pub fn custom_layer<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: FnMut(Box<dyn Layer>) -> Box<dyn Layer> + Send + 'static,
    {
        self.layers.push(Declared::Custom {
            name: name.into(),
            factory: Box::new(factory),
        });
        self
    }

    /// Uses `enumerator` for source-address discovery.
    #[must_use]
    pub fn interfaces(mut self, enumerator: impl InterfaceEnumerator + 'static) -> Self {
        self.interfaces = Some(Box::new(enumerator));
        self
    }

    /// Declares interface discovery unavailable.
    #[must_use]
    pub fn without_interfaces(mut self) -> Self {
        self.interfaces = None;
        self
    }

    /// The configuration pipelines are built from.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Builds a pipeline over a fresh [`HttpTransport`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration is invalid, a declared
    /// layer lacks what it needs, or the HTTP client cannot be built.
    pub fn build(&mut self) -> Result<Pipeline, ConfigError> {
        self.config.validate()?;
        let transport = HttpTransport::with_connect_timeout(self.config.connect_timeout_interval()?)?;
        self.build_with_transport(Box::new(transport))
    }

    /// Builds a pipeline whose executor sends through `transport`.
    ///
    /// # Errors
    ///
    /// See [`build`](Self::build).
    #[instrument(skip_all, fields(layers = self.layers.len()))]
    pub fn build_with_transport(
        &mut self,
        mut transport: Box<dyn Transport>,
    ) -> Result<Pipeline, ConfigError> {
        self.config.validate()?;
        self.check_declarations()?;

        let local_address = if self.declares(LayerKind::SourceAddress) {
            self.bind_source_address(transport.as_mut())?
        } else {
            None
        };

        let mut chain: Box<dyn Layer> = Box::new(Executor::new(transport));
        for declared in self.layers.iter_mut().rev() {
            chain = match declared {
                Declared::Builtin(kind) => wrap(*kind, chain, &self.config, local_address)?,
                Declared::Custom { factory, .. } => factory(chain),
            };
        }

        let layer_names: Vec<String> = self.layers.iter().map(|d| d.name().to_string()).collect();
        let defaults = self.config.request_defaults.to_call_options()?;
        debug!(layers = ?layer_names, "pipeline built");
        Ok(Pipeline::new(chain, layer_names, defaults, local_address))
    }

    fn declares(&self, kind: LayerKind) -> bool {
        self.layers
            .iter()
            .any(|declared| matches!(declared, Declared::Builtin(k) if *k == kind))
    }

    /// Rejects repeated built-ins and layers missing required settings.
    fn check_declarations(&self) -> Result<(), ConfigError> {
        let mut seen: Vec<LayerKind> = Vec::new();
        for declared in &self.layers {
            let Declared::Builtin(kind) = declared else {
                continue;
            };
            if seen.contains(kind) {
                return Err(ConfigError::DuplicateLayer { layer: kind.name() });
            }
            seen.push(*kind);
        }

        if self.declares(LayerKind::BaseUrl) && self.config.base_url.is_none() {
            return Err(ConfigError::missing_value(
                "base_url",
                LayerKind::BaseUrl.name(),
            ));
        }
        if let Some(template) = &self.config.user_agent_template {
            UserAgentGenerator::with_template(template.as_str())?;
        }
        Ok(())
    }

    fn bind_source_address(
        &mut self,
        transport: &mut dyn Transport,
    ) -> Result<Option<IpAddr>, ConfigError> {
        let ip_config = self.config.multiple_ip_config.clone().unwrap_or_default();
        let pool = resolve_pool(&ip_config, self.interfaces.as_deref())?;
        let Some(address) = self.rotation.select(&pool, ip_config.random) else {
            return Ok(None);
        };
        transport.bind_local_address(address)?;
        info!(%address, pool = pool.len(), random = ip_config.random, "bound source address");
        Ok(Some(address))
    }
}

fn wrap(
    kind: LayerKind,
    inner: Box<dyn Layer>,
    config: &PipelineConfig,
    local_address: Option<IpAddr>,
) -> Result<Box<dyn Layer>, ConfigError> {
    let layer: Box<dyn Layer> = match kind {
        LayerKind::BaseUrl => {
            let base_url = config
                .base_url
                .as_deref()
                .ok_or_else(|| ConfigError::missing_value("base_url", kind.name()))?;
            Box::new(BaseUrlLayer::new(inner, base_url))
        }
        LayerKind::UserAgent => {
            let generator = match &config.user_agent_template {
                Some(template) => UserAgentGenerator::with_template(template.as_str())?,
                None => UserAgentGenerator::new(),
            };
            Box::new(UserAgentLayer::new(inner, generator))
        }
        LayerKind::Ensure => {
            let policy = EnsurePolicy::with_attempts(config.ensure_attempts)
                .backoff(config.ensure_backoff_interval()?);
            Box::new(EnsureLayer::new(inner, policy))
        }
        LayerKind::Pacing => Box::new(PacingLayer::new(inner, config.pace_interval()?)),
        LayerKind::SourceAddress => Box::new(SourceAddressLayer::new(inner, local_address)),
    };
    Ok(layer)
}

#[cfg(feature = "interfaces")]
fn default_interfaces() -> Option<Box<dyn InterfaceEnumerator>> {
    Some(Box::new(crate::interfaces::SystemInterfaces))
}

#[cfg(not(feature = "interfaces"))]
fn default_interfaces() -> Option<Box<dyn InterfaceEnumerator>> {
    None
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::VecDeque;
    use std::net::Ipv4Addr;
    use std::sync::{Arc, Mutex};

    use reqwest::header::USER_AGENT;

    use super::*;
    use crate::error::PipelineError;
    use crate::interfaces::{InterfaceAddresses, group_by_interface};
    use crate::request::{CallOptions, CallSpec};
    use crate::response::Response;

    /// Replays statuses, records sent calls and bound addresses.
    #[derive(Default)]
    struct MockTransport {
        statuses: Mutex<VecDeque<u16>>,
        sent: Arc<Mutex<Vec<CallSpec>>>,
        bound: Arc<Mutex<Vec<IpAddr>>>,
    }

    impl MockTransport {
        fn with_statuses(statuses: impl IntoIterator<Item = u16>) -> Self {
            Self {
                statuses: Mutex::new(statuses.into_iter().collect()),
                ..Self::default()
            }
        }
    }

    impl Transport for MockTransport {
        fn send(&self, call: &CallSpec) -> Result<Response, PipelineError> {
            self.sent.lock().unwrap().push(call.clone());
            let status = self.statuses.lock().unwrap().pop_front().unwrap_or(200);
            Ok(Response::new(status, call.url.clone()))
        }

        fn bind_local_address(&mut self, address: IpAddr) -> Result<(), ConfigError> {
            self.bound.lock().unwrap().push(address);
            Ok(())
        }
    }

    fn v4(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    // ==================== Declarations ====================

    #[test]
    fn test_layer_names_follow_declaration_order() {
        let config = PipelineConfig::default().with_base_url("https://example.com");
        let pipeline = PipelineBuilder::new(config)
            .layer(LayerKind::BaseUrl)
            .layer(LayerKind::UserAgent)
            .custom_layer("audit", |inner| inner)
            .layer(LayerKind::Ensure)
            .layer(LayerKind::Pacing)
            .build_with_transport(Box::new(MockTransport::default()))
            .unwrap();

        assert_eq!(
            pipeline.layer_names(),
            vec!["base-url", "user-agent", "audit", "ensure", "pacing"]
        );
    }

    #[test]
    fn test_duplicate_builtin_layer_is_rejected() {
        let err = PipelineBuilder::new(PipelineConfig::default())
            .layer(LayerKind::Ensure)
            .layer(LayerKind::Pacing)
            .layer(LayerKind::Ensure)
            .build_with_transport(Box::new(MockTransport::default()))
            .unwrap_err();

        assert!(matches!(err, ConfigError::DuplicateLayer { layer: "ensure" }));
    }

    #[test]
    fn test_custom_layers_may_repeat() {
        let pipeline = PipelineBuilder::new(PipelineConfig::default())
            .custom_layer("tap", |inner| inner)
            .custom_layer("tap", |inner| inner)
            .build_with_transport(Box::new(MockTransport::default()))
            .unwrap();

        assert_eq!(pipeline.layer_names(), vec!["tap", "tap"]);
    }

    #[test]
    fn test_base_url_layer_requires_base_url() {
        let err = PipelineBuilder::new(PipelineConfig::default())
            .layer(LayerKind::BaseUrl)
            .build_with_transport(Box::new(MockTransport::default()))
            .unwrap_err();

        assert!(matches!(
            err,
            ConfigError::MissingValue {
                key: "base_url",
                layer: "base-url"
            }
        ));
    }

    #[test]
    fn test_invalid_config_fails_build() {
        let err = PipelineBuilder::new(PipelineConfig::default().with_pace(-1.0))
            .layer(LayerKind::Pacing)
            .build_with_transport(Box::new(MockTransport::default()))
            .unwrap_err();

        assert!(matches!(err, ConfigError::InvalidValue { key: "pace", .. }));
    }

    #[test]
    fn test_unknown_user_agent_placeholder_fails_build() {
        let config = PipelineConfig::default().with_user_agent_template("{os} {planet}");
        let err = PipelineBuilder::new(config)
            .layer(LayerKind::UserAgent)
            .build_with_transport(Box::new(MockTransport::default()))
            .unwrap_err();

        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_user_agent_template_with_control_characters_fails_build() {
        let config = PipelineConfig::default().with_user_agent_template("bot\n{os}");
        let err = PipelineBuilder::new(config)
            .layer(LayerKind::UserAgent)
            .build_with_transport(Box::new(MockTransport::default()))
            .unwrap_err();

        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "user_agent_template",
                ..
            }
        ));
    }

    #[test]
    fn test_build_with_http_transport() {
        let pipeline = PipelineBuilder::new(PipelineConfig::default())
            .layer(LayerKind::Ensure)
            .build()
            .unwrap();
        assert_eq!(pipeline.layer_names(), vec!["ensure"]);
        assert_eq!(pipeline.local_address(), None);
    }

    // ==================== Chain ====================

    #[test]
    fn test_outer_layers_see_calls_first() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let outer_log = Arc::clone(&order);
        let inner_log = Arc::clone(&order);

        let mut pipeline = PipelineBuilder::new(PipelineConfig::default())
            .custom_layer("outer", move |mut next| {
                let log = Arc::clone(&outer_log);
                Box::new(move |call: CallSpec| {
                    log.lock().unwrap().push("outer");
                    next.call(call)
                })
            })
            .custom_layer("inner", move |mut next| {
                let log = Arc::clone(&inner_log);
                Box::new(move |call: CallSpec| {
                    log.lock().unwrap().push("inner");
                    next.call(call)
                })
            })
            .build_with_transport(Box::new(MockTransport::default()))
            .unwrap();

        pipeline
            .get("https://example.com/", CallOptions::new())
            .unwrap();

        assert_eq!(*order.lock().unwrap(), vec!["outer", "inner"]);
    }

    #[test]
    fn test_full_chain_resolves_identifies_and_retries() {
        let transport = MockTransport::with_statuses([503, 200]);
        let sent = Arc::clone(&transport.sent);
        let config = PipelineConfig::default()
            .with_base_url("https://example.com/api/")
            .with_ensure_attempts(3);

        let mut pipeline = PipelineBuilder::new(config)
            .layer(LayerKind::BaseUrl)
            .layer(LayerKind::UserAgent)
            .layer(LayerKind::Ensure)
            .layer(LayerKind::Pacing)
            .build_with_transport(Box::new(transport))
            .unwrap();

        let response = pipeline.get("/items", CallOptions::new()).unwrap();

        assert_eq!(response.status(), 200);
        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|c| c.url == "https://example.com/api/items"));
        assert!(sent.iter().all(|c| c.options.headers.contains_key(USER_AGENT)));
    }

    #[test]
    fn test_request_defaults_reach_the_transport() {
        let transport = MockTransport::default();
        let sent = Arc::clone(&transport.sent);
        let mut config = PipelineConfig::default();
        config
            .request_defaults
            .headers
            .insert("Accept".to_string(), "application/json".to_string());
        config
            .request_defaults
            .query
            .push(("lang".to_string(), "en".to_string()));

        let mut pipeline = PipelineBuilder::new(config)
            .build_with_transport(Box::new(transport))
            .unwrap();
        pipeline
            .get("https://example.com/", CallOptions::new().query("page", "2"))
            .unwrap();

        let sent = sent.lock().unwrap();
        assert_eq!(sent[0].options.headers["accept"], "application/json");
        assert_eq!(
            sent[0].options.query,
            vec![
                ("lang".to_string(), "en".to_string()),
                ("page".to_string(), "2".to_string())
            ]
        );
    }

    // ==================== Source Address ====================

    #[test]
    fn test_successive_builds_rotate_addresses() {
        let config =
            PipelineConfig::default().with_ip_addresses(["10.0.0.1", "10.0.0.2", "10.0.0.3"], false);
        let mut builder = PipelineBuilder::new(config)
            .without_interfaces()
            .layer(LayerKind::SourceAddress);

        let mut bound = Vec::new();
        for _ in 0..4 {
            let transport = MockTransport::default();
            let binds = Arc::clone(&transport.bound);
            let pipeline = builder.build_with_transport(Box::new(transport)).unwrap();
            assert_eq!(binds.lock().unwrap().as_slice(), &[pipeline.local_address().unwrap()]);
            bound.push(pipeline.local_address().unwrap());
        }

        assert_eq!(bound, vec![v4(1), v4(2), v4(3), v4(1)]);
    }

    #[test]
    fn test_random_mode_binds_an_address_from_the_pool() {
        let config = PipelineConfig::default().with_ip_addresses(["10.0.0.1", "10.0.0.2"], true);
        let mut builder = PipelineBuilder::new(config).layer(LayerKind::SourceAddress);

        for _ in 0..10 {
            let pipeline = builder
                .build_with_transport(Box::new(MockTransport::default()))
                .unwrap();
            assert!([v4(1), v4(2)].contains(&pipeline.local_address().unwrap()));
        }
    }

    #[test]
    fn test_discovery_goes_through_injected_enumerator() {
        let table = group_by_interface([
            ("lo", IpAddr::V4(Ipv4Addr::LOCALHOST)),
            ("eth0", v4(42)),
        ]);
        let pipeline = PipelineBuilder::new(PipelineConfig::default())
            .interfaces(table)
            .layer(LayerKind::SourceAddress)
            .build_with_transport(Box::new(MockTransport::default()))
            .unwrap();

        assert_eq!(pipeline.local_address(), Some(v4(42)));
    }

    #[test]
    fn test_discovery_without_capability_fails() {
        let err = PipelineBuilder::new(PipelineConfig::default())
            .without_interfaces()
            .layer(LayerKind::SourceAddress)
            .build_with_transport(Box::new(MockTransport::default()))
            .unwrap_err();

        assert!(matches!(err, ConfigError::CapabilityUnavailable { .. }));
    }

    #[test]
    fn test_enumerator_failure_fails_build() {
        struct Unqueryable;

        impl InterfaceEnumerator for Unqueryable {
            fn interfaces(&self) -> Result<InterfaceAddresses, ConfigError> {
                Err(ConfigError::CapabilityUnavailable {
                    capability: "network interface enumeration",
                })
            }
        }

        let transport = MockTransport::default();
        let binds = Arc::clone(&transport.bound);
        let err = PipelineBuilder::new(PipelineConfig::default())
            .interfaces(Unqueryable)
            .layer(LayerKind::SourceAddress)
            .build_with_transport(Box::new(transport))
            .unwrap_err();

        assert!(matches!(err, ConfigError::CapabilityUnavailable { .. }));
        assert!(binds.lock().unwrap().is_empty());
    }

    #[test]
    fn test_empty_pool_leaves_transport_unbound() {
        let transport = MockTransport::default();
        let binds = Arc::clone(&transport.bound);
        let pipeline = PipelineBuilder::new(PipelineConfig::default())
            .interfaces(InterfaceAddresses::new())
            .layer(LayerKind::SourceAddress)
            .build_with_transport(Box::new(transport))
            .unwrap();

        assert_eq!(pipeline.local_address(), None);
        assert!(binds.lock().unwrap().is_empty());
    }

    #[test]
    fn test_ip_config_without_layer_is_ignored() {
        let transport = MockTransport::default();
        let binds = Arc::clone(&transport.bound);
        let config = PipelineConfig::default().with_ip_addresses(["10.0.0.1"], false);
        let pipeline = PipelineBuilder::new(config)
            .build_with_transport(Box::new(transport))
            .unwrap();

        assert_eq!(pipeline.local_address(), None);
        assert!(binds.lock().unwrap().is_empty());
    }
}

//! Remote capabilities exposed as local proxies.
//!
//! [`discover`] asks the peer for its capability list and binds one
//! [`CapabilityProxy`] per descriptor. Invoking a proxy becomes one
//! correlated `call` request; every failure is folded into an
//! `"Error calling <name>: <detail>"` string so the reasoning engine can
//! read it like any other tool output.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use formbridge_config::{DEFAULT_CALL_METHOD, DEFAULT_LIST_METHOD};

use crate::correlator::RequestCorrelator;
use crate::error::CorrelationError;

const CAPABILITY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::capability");

/// Description of one remote capability, as advertised by the peer.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CapabilityDescriptor {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(rename = "inputSchema", alias = "input_schema", default)]
    input_schema: Option<Value>,
}

impl CapabilityDescriptor {
    /// Creates a descriptor.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Option<Value>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }

    /// Unique capability name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Human-readable description, empty when the peer sent none.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// JSON Schema for the arguments, if advertised.
    #[must_use]
    pub const fn input_schema(&self) -> Option<&Value> {
        self.input_schema.as_ref()
    }
}

enum ArgumentCheck {
    Schema(Box<jsonschema::Validator>),
    Unchecked,
}

impl fmt::Debug for ArgumentCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Schema(_) => f.write_str("Schema"),
            Self::Unchecked => f.write_str("Unchecked"),
        }
    }
}

impl ArgumentCheck {
    fn compile(descriptor: &CapabilityDescriptor) -> Self {
        let Some(schema) = descriptor.input_schema() else {
            return Self::Unchecked;
        };
        match jsonschema::validator_for(schema) {
            Ok(validator) => Self::Schema(Box::new(validator)),
            Err(error) => {
                warn!(
                    target: CAPABILITY_TARGET,
                    capability = descriptor.name(),
                    %error,
                    "input schema does not compile; arguments will not be checked"
                );
                Self::Unchecked
            }
        }
    }

    fn validate(&self, arguments: &Value) -> Result<(), String> {
        let Self::Schema(validator) = self else {
            return Ok(());
        };
        let problems: Vec<String> = validator
            .iter_errors(arguments)
            .map(|error| error.to_string())
            .collect();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems.join("; "))
        }
    }
}

/// Method names used for discovery and invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityMethods {
    /// Method returning the capability list.
    pub list: String,
    /// Method invoking one capability.
    pub call: String,
}

impl Default for CapabilityMethods {
    fn default() -> Self {
        Self {
            list: DEFAULT_LIST_METHOD.to_owned(),
            call: DEFAULT_CALL_METHOD.to_owned(),
        }
    }
}

#[derive(Debug)]
struct ProxyInner {
    descriptor: CapabilityDescriptor,
    check: ArgumentCheck,
    correlator: Arc<RequestCorrelator>,
    call_method: String,
}

/// A locally callable stand-in for one remote capability.
#[derive(Debug, Clone)]
pub struct CapabilityProxy {
    inner: Arc<ProxyInner>,
}

impl CapabilityProxy {
    /// Binds a descriptor to the session's correlator.
    ///
    /// A schema that fails to compile leaves the proxy usable with
    /// unchecked arguments.
    #[must_use]
    pub fn bind(
        descriptor: CapabilityDescriptor,
        correlator: Arc<RequestCorrelator>,
        call_method: impl Into<String>,
    ) -> Self {
        let check = ArgumentCheck::compile(&descriptor);
        Self {
            inner: Arc::new(ProxyInner {
                descriptor,
                check,
                correlator,
                call_method: call_method.into(),
            }),
        }
    }

    /// Name of the remote capability.
    #[must_use]
    pub fn name(&self) -> &str {
        self.inner.descriptor.name()
    }

    /// The descriptor this proxy was built from.
    #[must_use]
    pub fn descriptor(&self) -> &CapabilityDescriptor {
        &self.inner.descriptor
    }

    /// Whether arguments are validated before sending.
    #[must_use]
    pub fn validates_arguments(&self) -> bool {
        matches!(self.inner.check, ArgumentCheck::Schema(_))
    }

    /// Invokes the remote capability.
    ///
    /// Returns the reply's `result`, or a string describing why the call
    /// failed. Arguments rejected by the schema are never sent.
    pub async fn invoke(&self, arguments: Value) -> Value {
        self.call(arguments).await.unwrap_or_else(Value::String)
    }

    /// Invokes the remote capability, keeping success and failure apart.
    ///
    /// # Errors
    ///
    /// Returns `"Error calling <name>: <detail>"` when the arguments fail
    /// validation, the peer answers with an error, or the request fails.
    pub async fn call(&self, arguments: Value) -> Result<Value, String> {
        let name = self.name();
        if let Err(detail) = self.inner.check.validate(&arguments) {
            debug!(target: CAPABILITY_TARGET, capability = name, %detail, "arguments rejected");
            return Err(call_failure(name, &format!("invalid arguments: {detail}")));
        }

        let params = json!({ "name": name, "arguments": arguments });
        match self
            .inner
            .correlator
            .issue(&self.inner.call_method, Some(params))
            .await
        {
            Ok(reply) => reply
                .into_outcome()
                .map_err(|error| call_failure(name, &describe_error(&error))),
            Err(error) => Err(call_failure(name, &error.to_string())),
        }
    }
}

fn call_failure(name: &str, detail: &str) -> String {
    format!("Error calling {name}: {detail}")
}

fn describe_error(error: &Value) -> String {
    match error {
        Value::String(message) => message.clone(),
        Value::Object(object) => object
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| error.to_string(), str::to_owned),
        other => other.to_string(),
    }
}

/// Renders a proxy's return value as text.
///
/// Strings are returned as-is; anything else is compact JSON.
#[must_use]
pub fn render_output(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// The proxies available to the reasoning engine, in advertised order.
#[derive(Debug, Clone, Default)]
pub struct CapabilitySet {
    proxies: Vec<CapabilityProxy>,
}

impl CapabilitySet {
    /// Looks up a proxy by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&CapabilityProxy> {
        self.proxies.iter().find(|proxy| proxy.name() == name)
    }

    /// Iterates over the proxies.
    pub fn iter(&self) -> impl Iterator<Item = &CapabilityProxy> {
        self.proxies.iter()
    }

    /// Number of proxies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    /// Whether no capability was discovered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    /// Capability names in advertised order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.proxies.iter().map(CapabilityProxy::name).collect()
    }
}

impl<'a> IntoIterator for &'a CapabilitySet {
    type Item = &'a CapabilityProxy;
    type IntoIter = std::slice::Iter<'a, CapabilityProxy>;

    fn into_iter(self) -> Self::IntoIter {
        self.proxies.iter()
    }
}

impl FromIterator<CapabilityProxy> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = CapabilityProxy>>(iter: I) -> Self {
        Self {
            proxies: iter.into_iter().collect(),
        }
    }
}

/// Fetches the peer's capabilities and binds a proxy for each.
///
/// An error-shaped reply, a timeout, or a result without a capability
/// array yields an empty set.
///
/// # Errors
///
/// Returns the correlation error when the connection closed or failed
/// while discovery was in flight.
pub async fn discover(
    correlator: &Arc<RequestCorrelator>,
    methods: &CapabilityMethods,
) -> Result<CapabilitySet, CorrelationError> {
    let reply = match correlator.issue(&methods.list, None).await {
        Ok(reply) => reply,
        Err(
            error @ (CorrelationError::ConnectionClosed { .. }
            | CorrelationError::Transport { .. }),
        ) => return Err(error),
        Err(error) => {
            warn!(target: CAPABILITY_TARGET, %error, "capability discovery failed");
            return Ok(CapabilitySet::default());
        }
    };

    let result = match reply.into_outcome() {
        Ok(result) => result,
        Err(error) => {
            warn!(
                target: CAPABILITY_TARGET,
                error = %describe_error(&error),
                "peer refused capability discovery"
            );
            return Ok(CapabilitySet::default());
        }
    };

    let Some(entries) = result
        .get("capabilities")
        .or_else(|| result.get("tools"))
        .and_then(Value::as_array)
    else {
        warn!(target: CAPABILITY_TARGET, "discovery result carries no capability list");
        return Ok(CapabilitySet::default());
    };

    let mut seen = HashSet::new();
    let set: CapabilitySet = descriptors(entries)
        .filter(|descriptor| {
            let fresh = seen.insert(descriptor.name().to_owned());
            if !fresh {
                warn!(
                    target: CAPABILITY_TARGET,
                    capability = descriptor.name(),
                    "dropping duplicate capability"
                );
            }
            fresh
        })
        .map(|descriptor| {
            CapabilityProxy::bind(descriptor, Arc::clone(correlator), methods.call.clone())
        })
        .collect();

    debug!(target: CAPABILITY_TARGET, count = set.len(), "capabilities discovered");
    Ok(set)
}

fn descriptors(entries: &[Value]) -> impl Iterator<Item = CapabilityDescriptor> + '_ {
    entries.iter().enumerate().filter_map(|(index, entry)| {
        match CapabilityDescriptor::deserialize(entry) {
            Ok(descriptor) if !descriptor.name().is_empty() => Some(descriptor),
            Ok(_) => {
                warn!(target: CAPABILITY_TARGET, index, "skipping capability without a name");
                None
            }
            Err(error) => {
                warn!(target: CAPABILITY_TARGET, index, %error, "skipping invalid capability descriptor");
                None
            }
        }
    })
}

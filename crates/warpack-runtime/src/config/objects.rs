// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Concrete server objects built from generic descriptors.
//!
//! Each object kind owns a setter table mapping a property name to a typed
//! setter. Names are matched case-insensitively, so `uriencoding` and
//! `URIEncoding` address the same setter. A name missing from the table is a
//! [`ConfigError::UnknownProperty`].

use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use regex::Regex;

use super::descriptors::{Descriptor, scalar_to_string};
use super::error::{ConfigError, Result};

/// Property setter for objects of type `T`.
struct PropertySetter<T> {
    name: &'static str,
    apply: fn(&mut T, &str) -> std::result::Result<(), String>,
}

fn set_property<T>(
    table: &[PropertySetter<T>],
    object: &'static str,
    target: &mut T,
    name: &str,
    value: &str,
) -> Result<()> {
    let setter = table
        .iter()
        .find(|s| s.name.eq_ignore_ascii_case(name))
        .ok_or_else(|| ConfigError::UnknownProperty {
            object,
            name: name.to_string(),
        })?;

    (setter.apply)(target, value).map_err(|reason| ConfigError::InvalidValue {
        object,
        name: name.to_string(),
        value: value.to_string(),
        reason,
    })
}

fn parse<V: FromStr>(value: &str) -> std::result::Result<V, String>
where
    V::Err: fmt::Display,
{
    value.trim().parse().map_err(|e: V::Err| e.to_string())
}

// ============================================================================
// Listener
// ============================================================================

/// Wire protocol a listener is declared with.
///
/// Advisory: every listener serves HTTP/1.1 and cleartext HTTP/2 alike. The
/// value is validated and logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Declared as HTTP/1.1.
    Http1,
    /// Declared as HTTP/2.
    Http2,
}

impl Protocol {
    /// Protocol used when a listener does not name one.
    pub const DEFAULT: &'static str = "HTTP/1.1";
}

impl FromStr for Protocol {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "HTTP/1.1" | "HTTP" => Ok(Self::Http1),
            "HTTP/2" | "H2" => Ok(Self::Http2),
            _ => Err(ConfigError::UnsupportedProtocol(s.to_string())),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http1 => f.write_str("HTTP/1.1"),
            Self::Http2 => f.write_str("HTTP/2"),
        }
    }
}

/// One network listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerSpec {
    pub protocol: Protocol,
    pub port: u16,
    pub address: IpAddr,
    pub uri_encoding: String,
    /// Upper bound on requests in flight.
    pub max_connections: Option<usize>,
    /// Request timeout.
    pub connection_timeout: Option<Duration>,
}

const LISTENER_SETTERS: &[PropertySetter<ListenerSpec>] = &[
    PropertySetter {
        name: "port",
        apply: |l, v| {
            l.port = parse(v)?;
            Ok(())
        },
    },
    PropertySetter {
        name: "address",
        apply: |l, v| {
            l.address = parse(v)?;
            Ok(())
        },
    },
    PropertySetter {
        name: "URIEncoding",
        apply: |l, v| {
            let normalized = v.trim().to_ascii_uppercase().replace('_', "-");
            if normalized != "UTF-8" && normalized != "UTF8" {
                return Err(format!("encoding '{v}' is not supported, use UTF-8"));
            }
            l.uri_encoding = "UTF-8".to_string();
            Ok(())
        },
    },
    PropertySetter {
        name: "maxConnections",
        apply: |l, v| {
            let max: usize = parse(v)?;
            if max == 0 {
                return Err("must be greater than zero".to_string());
            }
            l.max_connections = Some(max);
            Ok(())
        },
    },
    PropertySetter {
        name: "connectionTimeout",
        apply: |l, v| {
            let millis: u64 = parse(v)?;
            l.connection_timeout = (millis > 0).then(|| Duration::from_millis(millis));
            Ok(())
        },
    },
];

impl ListenerSpec {
    /// Default port of a listener that does not name one.
    pub const DEFAULT_PORT: u16 = 8080;

    /// Create a listener for `protocol` with default settings.
    pub fn for_protocol(protocol: &str) -> Result<Self> {
        Ok(Self {
            protocol: protocol.parse()?,
            port: Self::DEFAULT_PORT,
            address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            uri_encoding: "UTF-8".to_string(),
            max_connections: None,
            connection_timeout: None,
        })
    }

    /// Set a property by name.
    pub fn set_property(&mut self, name: &str, value: &str) -> Result<()> {
        set_property(LISTENER_SETTERS, "listener", self, name, value)
    }

    /// Address the listener binds.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

// ============================================================================
// Filters
// ============================================================================

/// Logs one line per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessLogFilter {
    pub prefix: String,
    pub enabled: bool,
}

impl Default for AccessLogFilter {
    fn default() -> Self {
        Self {
            prefix: "access".to_string(),
            enabled: true,
        }
    }
}

const ACCESS_LOG_SETTERS: &[PropertySetter<AccessLogFilter>] = &[
    PropertySetter {
        name: "prefix",
        apply: |f, v| {
            f.prefix = v.to_string();
            Ok(())
        },
    },
    PropertySetter {
        name: "enabled",
        apply: |f, v| {
            f.enabled = parse(v)?;
            Ok(())
        },
    },
];

/// Allows or denies requests by client address.
///
/// Patterns must match the whole address. A `deny` match always rejects; with
/// `allow` set, addresses that do not match it are rejected too.
#[derive(Debug, Clone)]
pub struct RemoteAddrFilter {
    pub allow: Option<Regex>,
    pub deny: Option<Regex>,
    pub deny_status: u16,
}

impl Default for RemoteAddrFilter {
    fn default() -> Self {
        Self {
            allow: None,
            deny: None,
            deny_status: 403,
        }
    }
}

fn anchored(pattern: &str) -> std::result::Result<Regex, String> {
    Regex::new(&format!("^(?:{pattern})$")).map_err(|e| e.to_string())
}

const REMOTE_ADDR_SETTERS: &[PropertySetter<RemoteAddrFilter>] = &[
    PropertySetter {
        name: "allow",
        apply: |f, v| {
            f.allow = Some(anchored(v)?);
            Ok(())
        },
    },
    PropertySetter {
        name: "deny",
        apply: |f, v| {
            f.deny = Some(anchored(v)?);
            Ok(())
        },
    },
    PropertySetter {
        name: "denyStatus",
        apply: |f, v| {
            let status: u16 = parse(v)?;
            if !(400..600).contains(&status) {
                return Err("must be a 4xx or 5xx status".to_string());
            }
            f.deny_status = status;
            Ok(())
        },
    },
];

impl RemoteAddrFilter {
    /// Whether a request from `addr` may proceed.
    pub fn permits(&self, addr: &str) -> bool {
        if self.deny.as_ref().is_some_and(|re| re.is_match(addr)) {
            return false;
        }
        match &self.allow {
            Some(re) => re.is_match(addr),
            None => true,
        }
    }
}

/// Adds a fixed header to every response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHeaderFilter {
    pub name: String,
    pub value: String,
}

const RESPONSE_HEADER_SETTERS: &[PropertySetter<ResponseHeaderFilter>] = &[
    PropertySetter {
        name: "name",
        apply: |f, v| {
            axum::http::HeaderName::from_str(v).map_err(|e| e.to_string())?;
            f.name = v.to_string();
            Ok(())
        },
    },
    PropertySetter {
        name: "value",
        apply: |f, v| {
            axum::http::HeaderValue::from_str(v).map_err(|e| e.to_string())?;
            f.value = v.to_string();
            Ok(())
        },
    },
];

/// A request-processing filter selected by `className`.
#[derive(Debug, Clone)]
pub enum FilterSpec {
    AccessLog(AccessLogFilter),
    RemoteAddr(RemoteAddrFilter),
    ResponseHeader(ResponseHeaderFilter),
}

impl FilterSpec {
    /// Descriptor key selecting the filter kind.
    pub const CLASS_NAME: &'static str = "className";

    /// Known `className` values.
    pub const KINDS: &'static [&'static str] =
        &["AccessLogFilter", "RemoteAddrFilter", "ResponseHeaderFilter"];

    /// Create a filter of the named kind with default settings.
    pub fn for_class(class_name: &str) -> Option<Self> {
        match class_name {
            "AccessLogFilter" => Some(Self::AccessLog(AccessLogFilter::default())),
            "RemoteAddrFilter" => Some(Self::RemoteAddr(RemoteAddrFilter::default())),
            "ResponseHeaderFilter" => Some(Self::ResponseHeader(ResponseHeaderFilter::default())),
            _ => None,
        }
    }

    /// Kind name.
    pub fn class_name(&self) -> &'static str {
        match self {
            Self::AccessLog(_) => "AccessLogFilter",
            Self::RemoteAddr(_) => "RemoteAddrFilter",
            Self::ResponseHeader(_) => "ResponseHeaderFilter",
        }
    }

    /// Set a property by name.
    pub fn set_property(&mut self, name: &str, value: &str) -> Result<()> {
        match self {
            Self::AccessLog(f) => {
                set_property(ACCESS_LOG_SETTERS, "AccessLogFilter", f, name, value)
            }
            Self::RemoteAddr(f) => {
                set_property(REMOTE_ADDR_SETTERS, "RemoteAddrFilter", f, name, value)
            }
            Self::ResponseHeader(f) => {
                set_property(RESPONSE_HEADER_SETTERS, "ResponseHeaderFilter", f, name, value)
            }
        }
    }

    /// Check settings that have no usable default.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::ResponseHeader(f) if f.name.is_empty() => Err(ConfigError::MissingField {
                object: "ResponseHeaderFilter",
                field: "name",
            }),
            _ => Ok(()),
        }
    }
}

// ============================================================================
// Resources
// ============================================================================

/// A named resource exposed through the naming subsystem.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceBinding {
    pub name: String,
    pub resource_type: Option<String>,
    pub auth: Option<String>,
    pub description: Option<String>,
    pub scope: Option<String>,
    pub singleton: Option<bool>,
    pub close_method: Option<String>,
    /// Factory attributes without a dedicated field.
    pub properties: BTreeMap<String, String>,
}

const RESOURCE_SETTERS: &[PropertySetter<ResourceBinding>] = &[
    PropertySetter {
        name: "name",
        apply: |r, v| {
            r.name = v.to_string();
            Ok(())
        },
    },
    PropertySetter {
        name: "type",
        apply: |r, v| {
            r.resource_type = Some(v.to_string());
            Ok(())
        },
    },
    PropertySetter {
        name: "auth",
        apply: |r, v| match v {
            "Container" | "Application" => {
                r.auth = Some(v.to_string());
                Ok(())
            }
            _ => Err("expected Container or Application".to_string()),
        },
    },
    PropertySetter {
        name: "description",
        apply: |r, v| {
            r.description = Some(v.to_string());
            Ok(())
        },
    },
    PropertySetter {
        name: "scope",
        apply: |r, v| match v {
            "Shareable" | "Unshareable" => {
                r.scope = Some(v.to_string());
                Ok(())
            }
            _ => Err("expected Shareable or Unshareable".to_string()),
        },
    },
    PropertySetter {
        name: "singleton",
        apply: |r, v| {
            r.singleton = Some(parse(v)?);
            Ok(())
        },
    },
    PropertySetter {
        name: "closeMethod",
        apply: |r, v| {
            r.close_method = Some(v.to_string());
            Ok(())
        },
    },
];

impl ResourceBinding {
    /// Build a binding from a resource descriptor.
    ///
    /// Known keys go through typed setters; any other key is kept as a
    /// factory property.
    pub fn from_descriptor(descriptor: &Descriptor) -> Result<Self> {
        let mut binding = Self::default();
        for (key, value) in descriptor {
            let value = scalar_to_string(key, value)?;
            let known = RESOURCE_SETTERS
                .iter()
                .any(|s| s.name.eq_ignore_ascii_case(key));
            if known {
                set_property(RESOURCE_SETTERS, "resource", &mut binding, key, &value)?;
            } else {
                binding.properties.insert(key.clone(), value);
            }
        }

        if binding.name.is_empty() {
            return Err(ConfigError::MissingField {
                object: "resource",
                field: "name",
            });
        }
        Ok(binding)
    }
}

// ============================================================================
// Lifecycle observers
// ============================================================================

/// Server lifecycle observers selectable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ObserverKind {
    /// Logs every server state transition.
    LifecycleLog,
    /// Maintains a pid file in the work directory while started.
    PidFile,
}

impl FromStr for ObserverKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "LifecycleLogObserver" => Ok(Self::LifecycleLog),
            "PidFileObserver" => Ok(Self::PidFile),
            _ => Err(ConfigError::UnknownObserver(s.to_string())),
        }
    }
}

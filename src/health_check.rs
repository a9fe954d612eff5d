//! Parser for the compact health-check label.
//!
//! The label holds up to four space separated fields:
//!
//! ```text
//! [KIND] [ARG] [INTERVAL] [TIMEOUT]
//! ```
//!
//! `KIND` is one of `script`, `shell`, `http` or `tcp` (any case).  For
//! `http` and `tcp` every `${service.port}` inside `ARG` is replaced by the
//! resolved host port of the service.  Missing trailing fields are read as
//! empty strings; an unknown or empty kind means "no check".

/// Placeholder substituted by the resolved service port.
pub const PORT_PLACEHOLDER: &str = "${service.port}";

/// Older spelling of [`PORT_PLACEHOLDER`], still seen on deployed labels.
pub const LEGACY_PORT_PLACEHOLDER: &str = "${service-port}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckKind {
    Script,
    Shell,
    Http,
    Tcp,
}

impl CheckKind {
    fn parse(kind: &str) -> Option<Self> {
        match kind.to_ascii_lowercase().as_str() {
            "script" => Some(CheckKind::Script),
            "shell" => Some(CheckKind::Shell),
            "http" => Some(CheckKind::Http),
            "tcp" => Some(CheckKind::Tcp),
            _ => None,
        }
    }

    fn takes_port(self) -> bool {
        matches!(self, CheckKind::Http | CheckKind::Tcp)
    }
}

/// A health check to attach to a service registration.
///
/// Interval and timeout are kept as the registry's duration strings
/// (`"10s"`, `"1m"`) and passed through untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheckSpec {
    pub kind: CheckKind,
    pub target: String,
    pub interval: String,
    pub timeout: String,
}

impl HealthCheckSpec {
    /// Parses a health-check descriptor. Never fails: anything unusable
    /// yields `None`.
    pub fn parse(descriptor: &str, service_port: &str) -> Option<Self> {
        let fields: Vec<&str> = descriptor.split(' ').collect();
        let field = |i: usize| fields.get(i).copied().unwrap_or_default();

        let kind = CheckKind::parse(field(0))?;
        let target = if kind.takes_port() {
            field(1)
                .replace(PORT_PLACEHOLDER, service_port)
                .replace(LEGACY_PORT_PLACEHOLDER, service_port)
        } else {
            field(1).to_string()
        };

        Some(Self {
            kind,
            target,
            interval: field(2).to_string(),
            timeout: field(3).to_string(),
        })
    }
}

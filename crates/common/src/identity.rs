use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Composite key uniquely naming one aggregate instance across the system.
///
/// The identity doubles as the event-store partition key: all events for
/// one aggregate instance live under the same identity, and per-identity
/// version ordering is enforced against it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregateIdentity {
    /// Logical namespace the aggregate type belongs to (bounded context).
    pub namespace: String,
    /// The aggregate type name (e.g. "Order").
    pub type_name: String,
    /// Module/deployment qualifier distinguishing same-named types.
    pub qualifier: String,
    /// The aggregate instance id within the type.
    pub instance_id: String,
}

impl AggregateIdentity {
    /// Creates a fully-qualified aggregate identity.
    pub fn new(
        namespace: impl Into<String>,
        type_name: impl Into<String>,
        qualifier: impl Into<String>,
        instance_id: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            type_name: type_name.into(),
            qualifier: qualifier.into(),
            instance_id: instance_id.into(),
        }
    }

    /// Creates an identity in the default namespace with the local qualifier.
    ///
    /// Convenient for single-module deployments and tests.
    pub fn local(type_name: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self::new("default", type_name, "local", instance_id)
    }
}

impl std::fmt::Display for AggregateIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{}/{}",
            self.namespace, self.type_name, self.instance_id
        )
    }
}

/// Unique identifier for a command message.
///
/// The command id is reused as the correlation id of the event batch the
/// command produces, which is what makes duplicate command delivery
/// detectable at the event store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(Uuid);

impl CommandId {
    /// Creates a new random command ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a command ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for CommandId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CommandId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for CommandId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Correlates an asynchronously-executed command or query back to whoever
/// is waiting for its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Creates a new random correlation ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a correlation ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Parses a correlation ID from its string form.
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

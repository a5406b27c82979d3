//! The LIMSML node tree model.
//!
//! Protocol messages are built from a small closed set of typed nodes:
//! [`Field`], [`Action`], [`Entity`], [`System`], [`Transaction`], plus the
//! request [`Header`]. Names are held lowercase in memory; the codec
//! uppercases them once when writing to the wire and lowercases once when
//! reading back.

/// A primitive LIMSML value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Value {
    /// Renders the value the way the wire format expects: booleans become
    /// the literal strings `"True"`/`"False"`, everything else uses its
    /// default textual form.
    pub fn to_wire_string(&self) -> String {
        match self {
            Value::Text(text) => text.clone(),
            Value::Int(n) => n.to_string(),
            Value::Float(n) => n.to_string(),
            Value::Bool(true) => "True".to_string(),
            Value::Bool(false) => "False".to_string(),
        }
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Value::Text(text.to_string())
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Value::Text(text)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n.into())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// Connection modes carried in the request header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionType {
    StartSession,
    ContinueSession,
    EndSession,
    Proxy,
}

impl ConnectionType {
    /// Wire spelling of the connect marker.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionType::StartSession => "StartSession",
            ConnectionType::ContinueSession => "ContinueSession",
            ConnectionType::EndSession => "EndSession",
            ConnectionType::Proxy => "Proxy",
        }
    }
}

/// Declares how the reply to a system sub-message is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    System,
    Data,
}

impl ResponseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseType::System => "system",
            ResponseType::Data => "data",
        }
    }

    /// Lenient wire parsing; anything that is not `data` reads as `system`.
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("data") {
            ResponseType::Data
        } else {
            ResponseType::System
        }
    }
}

/// One leaf datum attached to an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// Field id, lowercase in memory.
    pub id: String,
    pub value: Value,
    /// Extra wire attributes. `direction="in"` and `datatype="Text"` are
    /// injected by the codec when absent.
    pub attributes: Vec<(String, Value)>,
}

impl Field {
    pub fn new(id: &str, value: impl Into<Value>) -> Self {
        Self {
            id: id.to_lowercase(),
            value: value.into(),
            attributes: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.attributes.push((name.to_string(), value.into()));
        self
    }
}

/// A named remote command with its parameter bag.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    /// Command name, lowercase in memory, uppercased on the wire.
    pub command: String,
    /// Insertion-ordered parameters.
    pub parameters: Vec<(String, Value)>,
}

impl Action {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_lowercase(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.parameters.push((name.to_lowercase(), value.into()));
        self
    }
}

/// A typed, attributed node in the request tree. Children are owned; there
/// are no parent back-references and no cycles.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    /// Entity type, lowercase in memory.
    pub entity_type: String,
    pub action: Option<Action>,
    pub fields: Vec<Field>,
    pub children: Vec<Entity>,
}

impl Entity {
    pub fn new(entity_type: &str) -> Self {
        Self {
            entity_type: entity_type.to_lowercase(),
            action: None,
            fields: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.action = Some(action);
        self
    }

    pub fn with_field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_child(mut self, child: Entity) -> Self {
        self.children.push(child);
        self
    }
}

/// Declares how the reply to this sub-message should be interpreted.
#[derive(Debug, Clone, PartialEq)]
pub struct System {
    pub response_type: ResponseType,
    pub entity: Entity,
}

impl System {
    pub fn new(response_type: ResponseType, entity: Entity) -> Self {
        Self {
            response_type,
            entity,
        }
    }
}

/// The unit of execution; each transaction in a request independently
/// produces one reply segment.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub system: System,
}

impl Transaction {
    pub fn new(system: System) -> Self {
        Self { system }
    }

    /// `entity.command` label for logging.
    pub fn command(&self) -> String {
        let command = self
            .system
            .entity
            .action
            .as_ref()
            .map(|a| a.command.as_str())
            .unwrap_or("");
        format!("{}.{}", self.system.entity.entity_type, command)
    }
}

/// Header credentials carried by one of the connect modes. Exactly one of
/// password/session is present, fixed by the constructor for that mode;
/// invalid combinations are unrepresentable.
#[derive(Debug, Clone)]
pub struct Header {
    user: String,
    auth: HeaderAuth,
    connect: ConnectionType,
}

#[derive(Debug, Clone)]
pub(crate) enum HeaderAuth {
    Password(String),
    Session(String),
    None,
}

impl Header {
    /// StartSession: authenticates with a password.
    pub fn start_session(user: &str, password: &str) -> Self {
        Self {
            user: user.to_string(),
            auth: HeaderAuth::Password(password.to_string()),
            connect: ConnectionType::StartSession,
        }
    }

    /// ContinueSession: authenticates with the server-issued session token.
    pub fn continue_session(user: &str, session: &str) -> Self {
        Self {
            user: user.to_string(),
            auth: HeaderAuth::Session(session.to_string()),
            connect: ConnectionType::ContinueSession,
        }
    }

    /// EndSession: ends the session identified by the token.
    pub fn end_session(user: &str, session: &str) -> Self {
        Self {
            user: user.to_string(),
            auth: HeaderAuth::Session(session.to_string()),
            connect: ConnectionType::EndSession,
        }
    }

    /// Proxy: no credentials beyond the user name.
    pub fn proxy(user: &str) -> Self {
        Self {
            user: user.to_string(),
            auth: HeaderAuth::None,
            connect: ConnectionType::Proxy,
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn connect(&self) -> ConnectionType {
        self.connect
    }

    pub(crate) fn into_parts(self) -> (String, HeaderAuth, ConnectionType) {
        (self.user, self.auth, self.connect)
    }
}

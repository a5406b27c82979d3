//! The LIMSML session client: login handshake, validated dispatch of
//! discovered actions, and best-effort logout.
//!
//! One client instance owns one session, from login to logout. Only an
//! active session permits action execution; a dropped session is never
//! re-established implicitly.

use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;

use limsml_protocol::codec::Request;
use limsml_protocol::node::{Action, Entity, Header, ResponseType, System, Transaction, Value};
use limsml_protocol::response::Response;

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::registry::{ActionDefinition, ActionRegistry};
use crate::transport::{SoapTransport, Transport};

/// Metadata tables queried during login to discover the action registry.
const ACTIONS_TABLE: &str = "limsml_entity_action";
const PARAMS_TABLE: &str = "limsml_entity_param";

/// Page size for the login metadata queries.
const METADATA_PAGE_SIZE: i32 = 1000;

/// Session lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Active { session: String },
}

impl SessionState {
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Active { .. })
    }
}

/// Outcome of a best-effort logout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogoutOutcome {
    /// The server accepted the logout and the session token was cleared.
    LoggedOut,
    /// There was no active session to end.
    NotLoggedIn,
    /// The logout failed; the failure is reported rather than raised, and
    /// the session token is left intact.
    FailedButIgnored(String),
}

/// Target of a dispatched action: a bare entity type or a prepared tree.
#[derive(Debug, Clone)]
pub enum EntityTarget {
    Type(String),
    Tree(Entity),
}

impl EntityTarget {
    fn entity_type(&self) -> &str {
        match self {
            EntityTarget::Type(entity_type) => entity_type,
            EntityTarget::Tree(entity) => &entity.entity_type,
        }
    }

    fn into_entity(self) -> Entity {
        match self {
            EntityTarget::Type(entity_type) => Entity::new(&entity_type),
            EntityTarget::Tree(entity) => entity,
        }
    }
}

impl From<&str> for EntityTarget {
    fn from(entity_type: &str) -> Self {
        EntityTarget::Type(entity_type.to_lowercase())
    }
}

impl From<String> for EntityTarget {
    fn from(entity_type: String) -> Self {
        EntityTarget::Type(entity_type.to_lowercase())
    }
}

impl From<Entity> for EntityTarget {
    fn from(entity: Entity) -> Self {
        EntityTarget::Tree(entity)
    }
}

/// Client for one LIMSML session. Created by [`Client::login`].
pub struct Client {
    config: ClientConfig,
    transport: Box<dyn Transport>,
    registry: ActionRegistry,
    state: Mutex<SessionState>,
    /// Serializes full request/response exchanges: session state is mutable
    /// and the protocol has no request multiplexing.
    request_lock: AsyncMutex<()>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Logs in over the SOAP transport built from `config.url`.
    pub async fn login(config: ClientConfig) -> Result<Self, ClientError> {
        let transport = Box::new(SoapTransport::new(config.url.clone()));
        Self::login_with(config, transport).await
    }

    /// Logs in over a caller-supplied transport. The handshake issues bulk
    /// `find` queries for the action metadata tables and populates the
    /// registry from the reply.
    pub async fn login_with(
        config: ClientConfig,
        transport: Box<dyn Transport>,
    ) -> Result<Self, ClientError> {
        let find = ActionDefinition::new("find", ResponseType::Data);
        let parameters = vec![("pagesize".to_string(), Value::from(METADATA_PAGE_SIZE))];
        let transactions = vec![
            find.create_transaction(&parameters, Entity::new(ACTIONS_TABLE))?,
            find.create_transaction(&parameters, Entity::new(PARAMS_TABLE))?,
        ];

        let header = Header::start_session(&config.username, &config.password);
        let request = Request::new(header, transactions)?;

        tracing::info!(user = %config.username, "logging in to LIMSML service");
        let raw = transport.send(&request.to_xml()?).await?;
        let response = Response::parse(&raw)?;

        let Some(session) = response.parameters.get("session").cloned() else {
            let reason = if response.errors.is_empty() {
                "login response did not include a session parameter".to_string()
            } else {
                response.errors.join(", ")
            };
            return Err(ClientError::LoginFailed(reason));
        };

        let registry = match (
            response.data.get(ACTIONS_TABLE),
            response.data.get(PARAMS_TABLE),
        ) {
            (Some(actions), Some(params)) => ActionRegistry::from_metadata(actions, params),
            _ => {
                tracing::warn!("login response did not include action metadata; registry is empty");
                ActionRegistry::default()
            }
        };

        tracing::info!(actions = registry.len(), "LIMSML session established");

        Ok(Self {
            config,
            transport,
            registry,
            state: Mutex::new(SessionState::Active { session }),
            request_lock: AsyncMutex::new(()),
        })
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.state.lock().clone()
    }

    /// The action registry discovered at login.
    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    /// Definitions registered for the given command, across entity types.
    pub fn action(&self, command: &str) -> Vec<&ActionDefinition> {
        self.registry.matching(command)
    }

    /// Resolves a discovered action, validates the call against its
    /// definition, and executes it. Resolution prefers the exact
    /// `(entity, command)` pair and falls back to the generic entity.
    pub async fn dispatch(
        &self,
        entity: impl Into<EntityTarget>,
        command: &str,
        parameters: Vec<(String, Value)>,
    ) -> Result<Response, ClientError> {
        let target = entity.into();
        let parameters: Vec<(String, Value)> = parameters
            .into_iter()
            .map(|(name, value)| (name.to_lowercase(), value))
            .collect();

        let definition = self
            .registry
            .resolve(target.entity_type(), command)
            .ok_or_else(|| ClientError::UnknownAction {
                entity: target.entity_type().to_string(),
                command: command.to_lowercase(),
            })?;

        let transaction = definition.create_transaction(&parameters, target.into_entity())?;
        tracing::debug!(command = %transaction.command(), "dispatching action");
        self.execute(vec![transaction]).await
    }

    /// Executes prepared transactions under the active session.
    pub async fn execute(&self, transactions: Vec<Transaction>) -> Result<Response, ClientError> {
        let _guard = self.request_lock.lock().await;
        let session = match &*self.state.lock() {
            SessionState::Active { session } => session.clone(),
            SessionState::Disconnected => return Err(ClientError::NotLoggedIn),
        };

        let header = Header::continue_session(&self.config.username, &session);
        let request = Request::new(header, transactions)?;
        self.process(request).await
    }

    /// Sends a `ping` probe on the system entity.
    pub async fn ping(&self, message: &str) -> Result<Response, ClientError> {
        let entity = Entity::new("system")
            .with_action(Action::new("ping").with_parameter("message", message));
        self.execute(vec![Transaction::new(System::new(ResponseType::System, entity))])
            .await
    }

    /// Ends the session. Best-effort: failures are reported, never raised,
    /// and leave the session token intact.
    pub async fn logout(&self) -> LogoutOutcome {
        let _guard = self.request_lock.lock().await;
        let session = match &*self.state.lock() {
            SessionState::Active { session } => session.clone(),
            SessionState::Disconnected => return LogoutOutcome::NotLoggedIn,
        };

        let logout = ActionDefinition::new("logout", ResponseType::Data);
        let transaction = match logout.create_transaction(&[], Entity::new("user")) {
            Ok(transaction) => transaction,
            Err(e) => return LogoutOutcome::FailedButIgnored(e.to_string()),
        };

        let header = Header::end_session(&self.config.username, &session);
        let request = match Request::new(header, vec![transaction]) {
            Ok(request) => request,
            Err(e) => return LogoutOutcome::FailedButIgnored(e.to_string()),
        };

        match self.process(request).await {
            Ok(response) if response.errors.is_empty() => {
                *self.state.lock() = SessionState::Disconnected;
                tracing::info!("LIMSML session ended");
                LogoutOutcome::LoggedOut
            }
            Ok(response) => {
                let reason = response.errors.join(", ");
                tracing::warn!(%reason, "logout failed; keeping session token");
                LogoutOutcome::FailedButIgnored(reason)
            }
            Err(e) => {
                tracing::warn!(error = %e, "logout failed; keeping session token");
                LogoutOutcome::FailedButIgnored(e.to_string())
            }
        }
    }

    async fn process(&self, request: Request) -> Result<Response, ClientError> {
        let xml = request.to_xml()?;
        tracing::debug!(bytes = xml.len(), "sending LIMSML request");
        let raw = self.transport.send(&xml).await?;
        let response = Response::parse(&raw)?;
        tracing::debug!(
            parameters = response.parameters.len(),
            tables = response.data.len(),
            errors = response.errors.len(),
            "decoded LIMSML response"
        );
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::transport::TransportError;

    struct MockTransport {
        responses: Mutex<VecDeque<String>>,
        requests: Arc<Mutex<Vec<String>>>,
    }

    impl MockTransport {
        fn new(responses: &[&str]) -> (Box<Self>, Arc<Mutex<Vec<String>>>) {
            let requests = Arc::new(Mutex::new(Vec::new()));
            let transport = Box::new(Self {
                responses: Mutex::new(responses.iter().map(|r| r.to_string()).collect()),
                requests: Arc::clone(&requests),
            });
            (transport, requests)
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&self, request_xml: &str) -> Result<String, TransportError> {
            self.requests.lock().push(request_xml.to_string());
            self.responses
                .lock()
                .pop_front()
                .ok_or(TransportError::MissingResult)
        }
    }

    fn login_response() -> String {
        concat!(
            r#"<limsml>"#,
            r#"<header><parameter name="SESSION">TOK-123</parameter></header>"#,
            r#"<body>"#,
            // limsml_entity_action
            r#"<transaction><data><ADODataSet><NewDataSet>"#,
            r#"<xs:schema><xs:element name="NewDataSet"><xs:complexType><xs:choice>"#,
            r#"<xs:element name="LIMSML_ENTITY_ACTION"><xs:complexType><xs:sequence>"#,
            r#"<xs:element name="entity" msdata:Caption="Entity" type="xs:string" />"#,
            r#"<xs:element name="action" msdata:Caption="Action" type="xs:string" />"#,
            r#"<xs:element name="return_type" msdata:Caption="Return Type" type="xs:string" />"#,
            r#"</xs:sequence></xs:complexType></xs:element>"#,
            r#"</xs:choice></xs:complexType></xs:element></xs:schema>"#,
            r#"<LIMSML_ENTITY_ACTION><entity>sample</entity><action>GET</action>"#,
            r#"<return_type>data</return_type></LIMSML_ENTITY_ACTION>"#,
            r#"<LIMSML_ENTITY_ACTION><entity>generic</entity><action>FIND</action>"#,
            r#"<return_type>data</return_type></LIMSML_ENTITY_ACTION>"#,
            r#"<LIMSML_ENTITY_ACTION><entity>user</entity><action>LOGOUT</action>"#,
            r#"<return_type>system</return_type></LIMSML_ENTITY_ACTION>"#,
            r#"</NewDataSet></ADODataSet></data></transaction>"#,
            // limsml_entity_param
            r#"<transaction><data><ADODataSet><NewDataSet>"#,
            r#"<xs:schema><xs:element name="NewDataSet"><xs:complexType><xs:choice>"#,
            r#"<xs:element name="LIMSML_ENTITY_PARAM"><xs:complexType><xs:sequence>"#,
            r#"<xs:element name="entity" msdata:Caption="Entity" type="xs:string" />"#,
            r#"<xs:element name="action" msdata:Caption="Action" type="xs:string" />"#,
            r#"<xs:element name="parameter" msdata:Caption="Parameter" type="xs:string" />"#,
            r#"<xs:element name="is_mandatory" msdata:Caption="Mandatory" type="xs:boolean" />"#,
            r#"</xs:sequence></xs:complexType></xs:element>"#,
            r#"</xs:choice></xs:complexType></xs:element></xs:schema>"#,
            r#"<LIMSML_ENTITY_PARAM><entity>sample</entity><action>GET</action>"#,
            r#"<parameter>sample_id</parameter><is_mandatory>true</is_mandatory></LIMSML_ENTITY_PARAM>"#,
            r#"<LIMSML_ENTITY_PARAM><entity>sample</entity><action>GET</action>"#,
            r#"<parameter>template</parameter><is_mandatory>false</is_mandatory></LIMSML_ENTITY_PARAM>"#,
            r#"</NewDataSet></ADODataSet></data></transaction>"#,
            r#"</body>"#,
            r#"</limsml>"#,
        )
        .to_string()
    }

    fn system_response(command: &str, value: &str) -> String {
        format!(
            concat!(
                r#"<limsml><body><transaction><system><entity type="SYSTEM">"#,
                r#"<actions><action><command>{command}</command></action></actions>"#,
                r#"<fields><field id="RETURN">{value}</field></fields>"#,
                r#"<children /></entity></system></transaction></body></limsml>"#,
            ),
            command = command,
            value = value
        )
    }

    async fn logged_in_client(extra_responses: &[&str]) -> (Client, Arc<Mutex<Vec<String>>>) {
        let login = login_response();
        let mut responses = vec![login.as_str()];
        responses.extend_from_slice(extra_responses);
        let (transport, requests) = MockTransport::new(&responses);
        let client = Client::login_with(ClientConfig::default(), transport)
            .await
            .unwrap();
        (client, requests)
    }

    #[tokio::test]
    async fn login_discovers_session_and_actions() {
        let (client, requests) = logged_in_client(&[]).await;

        assert_eq!(
            client.state(),
            SessionState::Active {
                session: "TOK-123".to_string()
            }
        );
        assert_eq!(client.registry().len(), 2);
        assert!(client.registry().resolve("sample", "get").is_some());
        assert!(client.registry().resolve("generic", "find").is_some());
        // "logout" collides with a built-in method and is skipped.
        assert!(client.registry().resolve("user", "logout").is_none());

        // The handshake queried both metadata tables in one request.
        let sent = requests.lock();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains(r#"<parameter name="CONNECT">StartSession</parameter>"#));
        assert!(sent[0].contains(r#"<entity type="LIMSML_ENTITY_ACTION">"#));
        assert!(sent[0].contains(r#"<entity type="LIMSML_ENTITY_PARAM">"#));
        assert!(sent[0].contains(r#"<parameter name="PAGESIZE">1000</parameter>"#));
    }

    #[tokio::test]
    async fn login_fails_with_server_error_text() {
        let (transport, _) = MockTransport::new(&[concat!(
            r#"<limsml><errors><error><description>Bad password</description>"#,
            r#"<code>-49</code></error></errors></limsml>"#,
        )]);
        let err = Client::login_with(ClientConfig::default(), transport)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::LoginFailed(_)));
        assert!(err.to_string().contains("Bad password (-49)"));
    }

    #[tokio::test]
    async fn login_fails_generically_without_errors() {
        let (transport, _) = MockTransport::new(&["<limsml />"]);
        let err = Client::login_with(ClientConfig::default(), transport)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("session parameter"));
    }

    #[tokio::test]
    async fn dispatch_executes_a_discovered_action() {
        let exec = system_response("GET", "ok");
        let (client, requests) = logged_in_client(&[exec.as_str()]).await;

        let response = client
            .dispatch(
                "sample",
                "get",
                vec![("sample_id".to_string(), Value::from(42))],
            )
            .await
            .unwrap();

        assert_eq!(
            response.system.get("get").and_then(|v| v.as_str()),
            Some("ok")
        );
        let sent = requests.lock();
        assert_eq!(sent.len(), 2);
        assert!(sent[1].contains(r#"<parameter name="CONNECT">ContinueSession</parameter>"#));
        assert!(sent[1].contains(r#"<parameter name="SAMPLE_ID">42</parameter>"#));
    }

    #[tokio::test]
    async fn dispatch_drops_unknown_parameters() {
        let exec = system_response("GET", "ok");
        let (client, requests) = logged_in_client(&[exec.as_str()]).await;

        client
            .dispatch(
                "sample",
                "get",
                vec![
                    ("sample_id".to_string(), Value::from(42)),
                    ("bogus".to_string(), Value::from("x")),
                ],
            )
            .await
            .unwrap();

        let sent = requests.lock();
        assert!(sent[1].contains(r#"name="SAMPLE_ID""#));
        assert!(!sent[1].contains("BOGUS"));
    }

    #[tokio::test]
    async fn dispatch_validation_failure_sends_nothing() {
        let (client, requests) = logged_in_client(&[]).await;

        let err = client
            .dispatch("sample", "get", Vec::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::Validation { .. }));
        assert_eq!(requests.lock().len(), 1);
    }

    #[tokio::test]
    async fn dispatch_falls_back_to_the_generic_entity() {
        let exec = system_response("FIND", "done");
        let (client, requests) = logged_in_client(&[exec.as_str()]).await;

        client
            .dispatch(
                "personnel",
                "find",
                vec![("pagesize".to_string(), Value::from(10))],
            )
            .await
            .unwrap();

        let sent = requests.lock();
        assert!(sent[1].contains(r#"<entity type="PERSONNEL">"#));
        assert!(sent[1].contains("<command>FIND</command>"));
    }

    #[tokio::test]
    async fn dispatch_fails_for_unknown_commands() {
        let (client, requests) = logged_in_client(&[]).await;

        let err = client
            .dispatch("sample", "explode", Vec::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::UnknownAction { .. }));
        assert_eq!(err.to_string(), "no action registered for sample.explode");
        assert_eq!(requests.lock().len(), 1);
    }

    #[tokio::test]
    async fn ping_sends_a_system_transaction() {
        let pong = system_response("PING", "pong");
        let (client, requests) = logged_in_client(&[pong.as_str()]).await;

        let response = client.ping("are you there?").await.unwrap();
        assert_eq!(
            response.system.get("ping").and_then(|v| v.as_str()),
            Some("pong")
        );

        let sent = requests.lock();
        assert!(sent[1].contains("<command>PING</command>"));
        assert!(sent[1].contains(r#"<parameter name="MESSAGE">are you there?</parameter>"#));
    }

    #[tokio::test]
    async fn logout_clears_the_session() {
        let (client, requests) = logged_in_client(&["<limsml />"]).await;

        assert_eq!(client.logout().await, LogoutOutcome::LoggedOut);
        assert_eq!(client.state(), SessionState::Disconnected);

        let sent = requests.lock();
        assert_eq!(sent.len(), 2);
        assert!(sent[1].contains(r#"<parameter name="CONNECT">EndSession</parameter>"#));
        assert!(sent[1].contains(r#"<entity type="USER">"#));
        assert!(sent[1].contains("<command>LOGOUT</command>"));
    }

    #[tokio::test]
    async fn logout_failure_keeps_the_session_token() {
        let failure = concat!(
            r#"<limsml><errors><error><description>session busy</description>"#,
            r#"<code>7</code></error></errors></limsml>"#,
        );
        let (client, _) = logged_in_client(&[failure]).await;

        let outcome = client.logout().await;
        assert_eq!(
            outcome,
            LogoutOutcome::FailedButIgnored("session busy (7)".to_string())
        );
        assert!(client.state().is_active());
    }

    #[tokio::test]
    async fn logout_twice_reports_not_logged_in() {
        let (client, _) = logged_in_client(&["<limsml />"]).await;
        assert_eq!(client.logout().await, LogoutOutcome::LoggedOut);
        assert_eq!(client.logout().await, LogoutOutcome::NotLoggedIn);
    }

    #[tokio::test]
    async fn execute_while_disconnected_sends_nothing() {
        let (client, requests) = logged_in_client(&["<limsml />"]).await;
        client.logout().await;
        let sent_before = requests.lock().len();

        let err = client.ping("hello?").await.unwrap_err();
        assert!(matches!(err, ClientError::NotLoggedIn));
        assert_eq!(requests.lock().len(), sent_before);
    }

    #[tokio::test]
    async fn transport_failure_during_logout_is_swallowed() {
        // No canned logout response: the mock returns an error.
        let (client, _) = logged_in_client(&[]).await;

        let outcome = client.logout().await;
        assert!(matches!(outcome, LogoutOutcome::FailedButIgnored(_)));
        assert!(client.state().is_active());
    }
}

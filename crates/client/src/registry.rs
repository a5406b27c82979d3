//! Discovered remote actions and their validation contracts.
//!
//! The set of valid remote operations is not known until the login handshake
//! completes: the server's metadata tables list every entity+action pair and
//! its parameters. The registry built from them is immutable for the life of
//! the session.

use std::collections::HashMap;

use limsml_protocol::node::{Action, Entity, ResponseType, System, Transaction, Value};
use limsml_protocol::response::{CellValue, DataTable};

use crate::error::ClientError;

/// The wildcard entity: an action listing it accepts any entity type.
pub const GENERIC_ENTITY: &str = "generic";

/// Built-in client method names. A discovered command that would collide
/// with one of these is skipped, never overridden.
const RESERVED_COMMANDS: &[&str] = &[
    "login", "logout", "execute", "dispatch", "action", "actions", "ping",
];

/// Composite registry key, case-folded once at construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActionKey {
    entity: String,
    command: String,
}

impl ActionKey {
    pub fn new(entity: &str, command: &str) -> Self {
        Self {
            entity: entity.to_lowercase(),
            command: command.to_lowercase(),
        }
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

/// Metadata describing one remote command, learned at login.
#[derive(Debug, Clone)]
pub struct ActionDefinition {
    pub command: String,
    pub return_type: ResponseType,
    /// Declared parameter names; empty means "pass everything through".
    pub all_parameters: Vec<String>,
    pub required_parameters: Vec<String>,
    /// Entity types this action applies to; empty means "any".
    pub valid_entities: Vec<String>,
}

impl ActionDefinition {
    pub fn new(command: &str, return_type: ResponseType) -> Self {
        Self {
            command: command.to_lowercase(),
            return_type,
            all_parameters: Vec::new(),
            required_parameters: Vec::new(),
            valid_entities: Vec::new(),
        }
    }

    /// Checks the caller's parameters and target entity type against this
    /// definition. Parameter names are expected lowercase.
    pub fn validate(
        &self,
        parameters: &[(String, Value)],
        entity_type: &str,
    ) -> Result<(), ClientError> {
        let entity_ok = self.valid_entities.is_empty()
            || self.valid_entities.iter().any(|e| e == entity_type)
            || self.valid_entities.iter().any(|e| e == GENERIC_ENTITY);
        if !entity_ok {
            return Err(ClientError::Validation {
                command: self.command.clone(),
                reason: format!("entity type {entity_type:?} is not valid for this action"),
            });
        }

        for required in &self.required_parameters {
            if !parameters.iter().any(|(name, _)| name == required) {
                return Err(ClientError::Validation {
                    command: self.command.clone(),
                    reason: format!("missing required parameter {required:?}"),
                });
            }
        }

        Ok(())
    }

    /// Builds an executable transaction: validates the call, filters the
    /// parameter bag, and wraps the action onto the target entity.
    pub fn create_transaction(
        &self,
        parameters: &[(String, Value)],
        mut entity: Entity,
    ) -> Result<Transaction, ClientError> {
        self.validate(parameters, &entity.entity_type)?;

        let mut action = Action::new(&self.command);
        if self.all_parameters.is_empty() {
            action.parameters = parameters.to_vec();
        } else {
            // Unknown caller keys are dropped, silently.
            for declared in &self.all_parameters {
                if let Some((name, value)) = parameters.iter().find(|(name, _)| name == declared) {
                    action.parameters.push((name.clone(), value.clone()));
                }
            }
        }

        entity.action = Some(action);
        Ok(Transaction::new(System::new(self.return_type, entity)))
    }
}

/// Immutable mapping of discovered actions, built once at login.
#[derive(Debug, Default)]
pub struct ActionRegistry {
    actions: HashMap<ActionKey, ActionDefinition>,
}

impl ActionRegistry {
    /// Builds the registry from the two metadata tables returned by login:
    /// entity+action+return-type triples joined with per-action parameters
    /// and their mandatory flags.
    pub fn from_metadata(actions_table: &DataTable, params_table: &DataTable) -> Self {
        let mut actions = HashMap::new();

        for row in &actions_table.rows {
            let (Some(entity), Some(command)) = (cell_str(row, "entity"), cell_str(row, "action"))
            else {
                continue;
            };
            if RESERVED_COMMANDS.contains(&command.to_lowercase().as_str()) {
                tracing::debug!(command, "skipping action that collides with a built-in method");
                continue;
            }

            let return_type = cell_str(row, "return_type")
                .map(ResponseType::parse)
                .unwrap_or(ResponseType::System);

            let mut definition = ActionDefinition::new(command, return_type);
            for param_row in &params_table.rows {
                if cell_str(param_row, "entity") != Some(entity)
                    || cell_str(param_row, "action") != Some(command)
                {
                    continue;
                }
                let Some(parameter) = cell_str(param_row, "parameter") else {
                    continue;
                };
                definition.all_parameters.push(parameter.to_lowercase());
                if cell_bool(param_row, "is_mandatory") {
                    definition.required_parameters.push(parameter.to_lowercase());
                }
            }
            definition.valid_entities.push(entity.to_lowercase());

            actions.insert(ActionKey::new(entity, command), definition);
        }

        Self { actions }
    }

    /// Resolves the most specific definition: exact entity match first, then
    /// the generic-entity fallback.
    pub fn resolve(&self, entity_type: &str, command: &str) -> Option<&ActionDefinition> {
        self.actions
            .get(&ActionKey::new(entity_type, command))
            .or_else(|| self.actions.get(&ActionKey::new(GENERIC_ENTITY, command)))
    }

    /// All definitions registered for the given command, across entity
    /// types.
    pub fn matching(&self, command: &str) -> Vec<&ActionDefinition> {
        let command = command.to_lowercase();
        self.actions
            .values()
            .filter(|a| a.command == command)
            .collect()
    }

    pub fn get(&self, key: &ActionKey) -> Option<&ActionDefinition> {
        self.actions.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ActionKey, &ActionDefinition)> {
        self.actions.iter()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

fn cell_str<'a>(row: &'a HashMap<String, CellValue>, column: &str) -> Option<&'a str> {
    row.get(column).and_then(CellValue::as_str)
}

fn cell_bool(row: &HashMap<String, CellValue>, column: &str) -> bool {
    row.get(column).and_then(CellValue::as_bool).unwrap_or(false)
}

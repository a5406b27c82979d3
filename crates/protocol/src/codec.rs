//! Canonical XML encoding of the node tree model.
//!
//! Wire names are uppercased here and nowhere else; decoding folds them back
//! to lowercase at the same boundary. [`Request::new`] is also where the
//! header cipher is applied: the plaintext [`Header`] is consumed, so a
//! request can never be sealed twice.

use crate::crypto;
use crate::error::ProtocolError;
use crate::node::{Action, Entity, Field, Header, HeaderAuth, System, Transaction, Value};
use crate::xml::XmlNode;

const XMLNS: &str = "http://www.thermo.com/informatics/xmlns/limsml/1.0";
const XMLNS_XSD: &str = "http://www.w3.org/2001/XMLSchema";
const XMLNS_XSI: &str = "http://www.w3.org/2001/XMLSchema-instance";

/// Minimum password length accepted by the server; shorter passwords are
/// right-padded with spaces before encryption. A server requirement, not a
/// security measure.
const MIN_PASSWORD_LEN: usize = 10;

fn action_node(action: &Action) -> XmlNode {
    let mut node = XmlNode::new("action");
    let mut command = XmlNode::new("command");
    command.text = Some(action.command.to_uppercase());
    node.children.push(command);
    for (name, value) in &action.parameters {
        let mut parameter = XmlNode::new("parameter");
        parameter.set_attr("name", name.to_uppercase());
        let text = value.to_wire_string();
        if !text.is_empty() {
            parameter.text = Some(text);
        }
        node.children.push(parameter);
    }
    node
}

fn field_node(field: &Field) -> XmlNode {
    let mut node = XmlNode::new("field");
    node.set_attr("id", field.id.to_uppercase());
    for (name, value) in &field.attributes {
        node.set_attr(name, value.to_wire_string());
    }
    if field.attributes.iter().all(|(n, _)| n != "direction") {
        node.set_attr("direction", "in");
    }
    if field.attributes.iter().all(|(n, _)| n != "datatype") {
        node.set_attr("datatype", "Text");
    }
    let text = field.value.to_wire_string();
    if !text.is_empty() {
        node.text = Some(text);
    }
    node
}

pub(crate) fn entity_node(entity: &Entity) -> XmlNode {
    let mut node = XmlNode::new("entity");
    node.set_attr("type", entity.entity_type.to_uppercase());

    // The wrapper elements are always present; the server distinguishes
    // present-but-empty from absent.
    let mut actions = XmlNode::new("actions");
    if let Some(action) = &entity.action {
        actions.children.push(action_node(action));
    }
    let mut fields = XmlNode::new("fields");
    for field in &entity.fields {
        fields.children.push(field_node(field));
    }
    let mut children = XmlNode::new("children");
    for child in &entity.children {
        children.children.push(entity_node(child));
    }

    node.children.push(actions);
    node.children.push(fields);
    node.children.push(children);
    node
}

fn system_node(system: &System, root: bool) -> XmlNode {
    let mut node = XmlNode::new("system");
    node.set_attr("response_type", system.response_type.as_str());
    if root {
        node.set_attr("xmlns", XMLNS);
    }
    node.children.push(entity_node(&system.entity));
    node
}

pub(crate) fn transaction_node(transaction: &Transaction, root: bool) -> XmlNode {
    let mut node = XmlNode::new("transaction");
    if root {
        node.set_attr("xmlns:xsd", XMLNS_XSD);
        node.set_attr("xmlns:xsi", XMLNS_XSI);
    }
    node.children.push(system_node(&transaction.system, root));
    node
}

/// Serializes one transaction as a standalone document. This exact text is
/// the keyed material for the header cipher; the namespace placement and
/// self-closing conventions are load-bearing.
pub fn transaction_to_xml(transaction: &Transaction) -> Result<String, ProtocolError> {
    transaction_node(transaction, true).to_document()
}

/// Reads an entity element back into the tree model, folding wire-cased
/// names to their in-memory form.
pub fn entity_from_node(node: &XmlNode) -> Entity {
    let mut entity = Entity::new(node.attr("type").unwrap_or(""));
    if let Some(action) = node.child("actions").and_then(|a| a.child("action")) {
        entity.action = Some(action_from_node(action));
    }
    if let Some(fields) = node.child("fields") {
        for field in fields.children_named("field") {
            let mut decoded = Field::new(field.attr("id").unwrap_or(""), field.text_content());
            for (name, value) in &field.attributes {
                if name != "id" {
                    decoded.attributes.push((name.clone(), Value::Text(value.clone())));
                }
            }
            entity.fields.push(decoded);
        }
    }
    if let Some(children) = node.child("children") {
        for child in children.children_named("entity") {
            entity.children.push(entity_from_node(child));
        }
    }
    entity
}

fn action_from_node(node: &XmlNode) -> Action {
    let command = node.child("command").map(|c| c.text_content()).unwrap_or("");
    let mut action = Action::new(command);
    for parameter in node.children_named("parameter") {
        action.parameters.push((
            parameter.attr("name").unwrap_or("").to_lowercase(),
            Value::Text(parameter.text_content().to_string()),
        ));
    }
    action
}

/// A sealed LIMSML request: encrypted header parameters plus transactions.
#[derive(Debug)]
pub struct Request {
    header: Vec<(String, String)>,
    transactions: Vec<Transaction>,
}

impl Request {
    /// Builds a request and encrypts the header. The key is derived from the
    /// standalone XML of every transaction, concatenated in order.
    pub fn new(header: Header, transactions: Vec<Transaction>) -> Result<Self, ProtocolError> {
        let mut material = String::new();
        for transaction in &transactions {
            material.push_str(&transaction_to_xml(transaction)?);
        }
        let key = crypto::create_key(material.as_bytes());

        let (user, auth, connect) = header.into_parts();
        let mut parameters = vec![("USER".to_string(), crypto::encrypt(&key, Some(&user)))];
        match auth {
            HeaderAuth::Password(mut password) => {
                while password.chars().count() < MIN_PASSWORD_LEN {
                    password.push(' ');
                }
                parameters.push(("PASSWORD".to_string(), crypto::encrypt(&key, Some(&password))));
            }
            HeaderAuth::Session(session) => {
                parameters.push(("SESSION".to_string(), crypto::encrypt(&key, Some(&session))));
            }
            HeaderAuth::None => {}
        }
        parameters.push(("CONNECT".to_string(), connect.as_str().to_string()));

        Ok(Self {
            header: parameters,
            transactions,
        })
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    /// Serializes the request document sent over the transport. The LIMSML
    /// namespace is declared exactly once, at the document root.
    pub fn to_xml(&self) -> Result<String, ProtocolError> {
        let mut root = XmlNode::new("limsml");
        root.set_attr("xmlns:xsd", XMLNS_XSD);
        root.set_attr("xmlns:xsi", XMLNS_XSI);
        root.set_attr("xmlns", XMLNS);

        let mut header = XmlNode::new("header");
        for (name, value) in &self.header {
            let mut parameter = XmlNode::new("parameter");
            parameter.set_attr("name", name.as_str());
            if !value.is_empty() {
                parameter.text = Some(value.clone());
            }
            header.children.push(parameter);
        }

        let mut body = XmlNode::new("body");
        for transaction in &self.transactions {
            body.children.push(transaction_node(transaction, false));
        }

        root.children.push(header);
        root.children.push(body);
        root.to_document()
    }
}

//! Decoding of LIMSML response documents.
//!
//! The server may return zero, one, or many header parameters, transaction
//! results, and errors; the underlying XML omits array wrapping when exactly
//! one sibling exists, so everything here iterates by element name rather
//! than assuming either shape.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::error::ProtocolError;
use crate::xml::XmlNode;

/// Maximum size at which base64-encoded received files are eagerly decoded
/// to text. Larger payloads stay encoded so one response cannot balloon
/// memory.
pub const MAX_BASE64_DECODE: usize = 524_288;

/// One cell of a decoded dataset, or a per-command scalar.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Text(String),
    Bool(bool),
}

impl CellValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            CellValue::Text(text) => Some(text),
            CellValue::Bool(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CellValue::Bool(b) => Some(*b),
            CellValue::Text(_) => None,
        }
    }
}

impl std::fmt::Display for CellValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CellValue::Text(text) => f.write_str(text),
            CellValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// Column metadata from a dataset schema.
#[derive(Debug, Clone, PartialEq)]
pub struct DataColumn {
    /// Display caption from the schema (`msdata:Caption`).
    pub caption: String,
    /// Primitive type with its namespace prefix stripped (`boolean`,
    /// `string`, ...).
    pub data_type: String,
}

/// A decoded tabular dataset: declared columns plus decoded rows.
#[derive(Debug, Clone, Default)]
pub struct DataTable {
    pub columns: HashMap<String, DataColumn>,
    pub row_count: usize,
    pub rows: Vec<HashMap<String, CellValue>>,
}

/// A file payload returned by the server.
#[derive(Debug, Clone)]
pub struct ResponseFile {
    pub filename: String,
    /// Base64 payload exactly as received.
    pub data: String,
    /// Eagerly decoded text, present only below [`MAX_BASE64_DECODE`].
    pub text: Option<String>,
}

/// A decoded LIMSML response.
#[derive(Debug, Clone, Default)]
pub struct Response {
    /// Header parameters (e.g. the session token), keyed lowercase.
    pub parameters: HashMap<String, String>,
    /// Per-command scalar results from system-typed transactions.
    pub system: HashMap<String, CellValue>,
    /// Tabular datasets from data-typed transactions, keyed by table name.
    pub data: HashMap<String, DataTable>,
    /// File payloads from data-typed transactions.
    pub files: Vec<ResponseFile>,
    /// Server errors, flattened depth-first.
    pub errors: Vec<String>,
}

impl Response {
    /// Parses a raw LIMSML response document.
    pub fn parse(xml: &str) -> Result<Self, ProtocolError> {
        Ok(Self::from_node(&XmlNode::parse(xml)?))
    }

    /// Decodes an already-parsed response tree. Missing optional structures
    /// decode as zero/absent, not as errors.
    pub fn from_node(root: &XmlNode) -> Self {
        let mut response = Response::default();

        if let Some(header) = root.child("header") {
            for parameter in header.children_named("parameter") {
                if let Some(name) = parameter.attr("name") {
                    response
                        .parameters
                        .insert(name.to_lowercase(), parameter.text_content().to_string());
                }
            }
        }

        if let Some(body) = root.child("body") {
            for transaction in body.children_named("transaction") {
                response.decode_transaction(transaction);
            }
        }

        if let Some(errors) = root.child("errors") {
            for error in errors.children_named("error") {
                decode_error(error, &mut response.errors);
            }
        }

        response
    }

    fn decode_transaction(&mut self, transaction: &XmlNode) {
        if let Some(system) = transaction.child("system") {
            self.decode_system(system);
        } else if let Some(data) = transaction.child("data") {
            self.decode_data(data);
        }
    }

    /// A system result is a single scalar keyed by the action's command. A
    /// command with no field text (a ping-style probe) degrades to `true`
    /// rather than failing.
    fn decode_system(&mut self, system: &XmlNode) {
        let Some(entity) = system.child("entity") else {
            return;
        };
        let command = entity
            .child("actions")
            .and_then(|n| n.child("action"))
            .and_then(|n| n.child("command"))
            .map(|n| n.text_content().to_lowercase());
        let Some(command) = command.filter(|c| !c.is_empty()) else {
            return;
        };

        let field_text = entity
            .child("fields")
            .and_then(|n| n.child("field"))
            .and_then(|n| n.text.clone());
        match field_text {
            Some(text) => {
                self.system.insert(command, CellValue::Text(text));
            }
            None => {
                tracing::debug!(%command, "system result has no field; defaulting to true");
                self.system.insert(command, CellValue::Bool(true));
            }
        }
    }

    fn decode_data(&mut self, data: &XmlNode) {
        if let Some(dataset) = data.child("ADODataSet").and_then(|n| n.child("NewDataSet")) {
            self.decode_dataset(dataset);
        }
        if let Some(file_list) = data.child("DataFile") {
            for file in file_list.children_named("file") {
                self.decode_file(file);
            }
        }
    }

    fn decode_dataset(&mut self, dataset: &XmlNode) {
        let tables = dataset
            .child("xs:schema")
            .and_then(|n| n.child("xs:element"))
            .and_then(|n| n.child("xs:complexType"))
            .and_then(|n| n.child("xs:choice"));
        let Some(tables) = tables else {
            return;
        };

        for table in tables.children_named("xs:element") {
            let Some(name) = table.attr("name") else {
                continue;
            };
            let name = name.to_lowercase();
            let mut decoded = DataTable::default();

            if let Some(columns) = table
                .child("xs:complexType")
                .and_then(|n| n.child("xs:sequence"))
            {
                for column in columns.children_named("xs:element") {
                    let Some(column_name) = column.attr("name") else {
                        continue;
                    };
                    decoded.columns.insert(
                        column_name.to_lowercase(),
                        DataColumn {
                            caption: column.attr("msdata:Caption").unwrap_or_default().to_string(),
                            data_type: strip_type_prefix(column.attr("type").unwrap_or_default()),
                        },
                    );
                }
            }

            // Rows live in sibling elements named after the table, uppercase
            // on the wire. A table declared in the schema but absent from
            // the payload decodes as zero rows.
            for row in dataset.children_named(&name.to_uppercase()) {
                let mut decoded_row = HashMap::new();
                for cell in &row.children {
                    let column = cell.name.to_lowercase();
                    let data_type = decoded
                        .columns
                        .get(&column)
                        .map(|c| c.data_type.as_str())
                        .unwrap_or("string");
                    decoded_row.insert(column, string_to_value(cell.text_content(), data_type));
                }
                decoded.rows.push(decoded_row);
            }
            decoded.row_count = decoded.rows.len();

            self.data.insert(name, decoded);
        }
    }

    fn decode_file(&mut self, file: &XmlNode) {
        let Some(filename) = file.child("filename") else {
            return;
        };
        let Some(binary) = file.child("binary") else {
            return;
        };
        let data = binary.text_content().to_string();
        let text = if data.len() < MAX_BASE64_DECODE {
            match BASE64.decode(data.as_bytes()) {
                Ok(bytes) => String::from_utf8(bytes).ok(),
                Err(e) => {
                    tracing::warn!(error = %e, "file payload is not valid base64; leaving encoded");
                    None
                }
            }
        } else {
            None
        };

        self.files.push(ResponseFile {
            filename: filename.text_content().to_string(),
            data,
            text,
        });
    }
}

/// Typed cell decoding: `boolean` columns compare case-insensitively with
/// `"true"`; every other declared type passes the text through.
fn string_to_value(text: &str, data_type: &str) -> CellValue {
    match data_type {
        "boolean" => CellValue::Bool(text.eq_ignore_ascii_case("true")),
        _ => CellValue::Text(text.to_string()),
    }
}

/// Strips the 3-character namespace prefix from a schema type
/// (`xs:boolean` becomes `boolean`).
fn strip_type_prefix(declared: &str) -> String {
    declared.get(3..).unwrap_or_default().to_string()
}

/// Flattens an error node and its nested children, depth-first, preserving
/// discovery order.
fn decode_error(error: &XmlNode, out: &mut Vec<String>) {
    let description = error
        .child("description")
        .map(|n| n.text_content())
        .unwrap_or("");
    let code = error.child("code").map(|n| n.text_content()).unwrap_or("");
    match (description.is_empty(), code.is_empty()) {
        (false, false) => out.push(format!("{description} ({code})")),
        (false, true) => out.push(description.to_string()),
        _ => {}
    }

    if let Some(nested) = error.child("errors") {
        for child in nested.children_named("error") {
            decode_error(child, out);
        }
    }
}

/// Errors produced by the LIMSML protocol codec. Decoding is deliberately
/// lenient — missing optional structures read as zero/absent — so the only
/// hard failure at this layer is XML that cannot be parsed or built.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("XML: {0}")]
    Xml(String),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

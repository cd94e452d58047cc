//! `<TPSTransformer>` documents.
//!
//! Only the reversed flag and the GCP list are stored. Solving is
//! deterministic, so deserializing refits the same splines.

use std::fs;
use std::path::Path;

use crate::config::TpsOptions;
use crate::error::{Result, TpsError};
use crate::gcp_list::{gcp_list_from_node, gcp_list_to_node, GCP_LIST};
use crate::model::Gcp;
use crate::transformer::TpsTransformer;
use crate::xml::XmlNode;

pub const TPS_TRANSFORMER: &str = "TPSTransformer";
const REVERSED: &str = "Reversed";

impl TpsTransformer {
    pub fn serialize(&self) -> XmlNode {
        let mut tree = XmlNode::new(TPS_TRANSFORMER);
        tree.add_child(XmlNode::with_text(
            REVERSED,
            if self.is_reversed() { "1" } else { "0" },
        ));
        if !self.gcps().is_empty() {
            tree.add_child(gcp_list_to_node(self.gcps()));
        }
        tree
    }

    /// Rebuilds a transformer from a `<TPSTransformer>` element.
    pub fn deserialize(tree: &XmlNode, options: &TpsOptions) -> Result<Self> {
        let (gcps, reversed) = read_document(tree)?;
        Self::new(&gcps, reversed, options)
    }

    pub fn to_xml_string(&self) -> Result<String> {
        self.serialize().to_xml_string()
    }

    pub fn from_xml_str(text: &str, options: &TpsOptions) -> Result<Self> {
        Self::deserialize(&XmlNode::parse(text)?, options)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, self.to_xml_string()?)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>, options: &TpsOptions) -> Result<Self> {
        Self::from_xml_str(&fs::read_to_string(path)?, options)
    }
}

/// Returns the GCP list and reversed flag of a `<TPSTransformer>` element
/// without fitting the splines.
pub fn read_document(tree: &XmlNode) -> Result<(Vec<Gcp>, bool)> {
    if !tree.is(TPS_TRANSFORMER) {
        return Err(TpsError::MalformedDocument(format!(
            "expected <{}>, found <{}>",
            TPS_TRANSFORMER, tree.name
        )));
    }

    let gcps = match tree.child(GCP_LIST) {
        Some(list) => gcp_list_from_node(list)?,
        None => Vec::new(),
    };
    let reversed = parse_flag(tree.value(REVERSED).unwrap_or("0"))?;
    Ok((gcps, reversed))
}

/// Integer flag text as written by [`TpsTransformer::serialize`]; empty is false.
pub fn parse_flag(text: &str) -> Result<bool> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(false);
    }
    text.parse::<i64>()
        .map(|v| v != 0)
        .map_err(|_| TpsError::InvalidNumber {
            field: REVERSED.to_string(),
            text: text.to_string(),
        })
}

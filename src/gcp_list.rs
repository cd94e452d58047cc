//! `<GCPList>` encoding of ground control points.
//!
//! ```xml
//! <GCPList>
//!   <GCP Id="1" Pixel="10.25" Line="20" X="400030.5" Y="3700000">
//!     <Info>road crossing</Info>
//!   </GCP>
//! </GCPList>
//! ```

use crate::error::{Result, TpsError};
use crate::model::Gcp;
use crate::xml::XmlNode;

pub const GCP_LIST: &str = "GCPList";
const GCP: &str = "GCP";

pub fn gcp_list_to_node(gcps: &[Gcp]) -> XmlNode {
    let mut list = XmlNode::new(GCP_LIST);
    for gcp in gcps {
        let mut node = XmlNode::new(GCP);
        node.set_attribute("Id", gcp.id.as_str());
        // Shortest representation that parses back to the same value.
        node.set_attribute("Pixel", gcp.pixel.to_string());
        node.set_attribute("Line", gcp.line.to_string());
        node.set_attribute("X", gcp.x.to_string());
        node.set_attribute("Y", gcp.y.to_string());
        if gcp.z != 0.0 {
            node.set_attribute("Z", gcp.z.to_string());
        }
        if !gcp.info.is_empty() {
            node.add_child(XmlNode::with_text("Info", gcp.info.as_str()));
        }
        list.add_child(node);
    }
    list
}

/// Decodes every `<GCP>` child of `list`; other children are ignored.
pub fn gcp_list_from_node(list: &XmlNode) -> Result<Vec<Gcp>> {
    list.children
        .iter()
        .filter(|node| node.is(GCP))
        .map(|node| {
            Ok(Gcp {
                id: node.value("Id").unwrap_or_default().to_string(),
                info: node.value("Info").unwrap_or_default().to_string(),
                pixel: number(node, "Pixel")?,
                line: number(node, "Line")?,
                x: number(node, "X")?,
                y: number(node, "Y")?,
                // Older writers used GCPZ.
                z: match node.value("Z") {
                    Some(_) => number(node, "Z")?,
                    None => number(node, "GCPZ")?,
                },
            })
        })
        .collect()
}

fn number(node: &XmlNode, field: &str) -> Result<f64> {
    match node.value(field).map(str::trim) {
        None | Some("") => Ok(0.0),
        Some(text) => text.parse().map_err(|_| TpsError::InvalidNumber {
            field: field.to_string(),
            text: text.to_string(),
        }),
    }
}

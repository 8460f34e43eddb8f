//! SVG architecture diagrams of the ensemble
//!
//! Draws the layer graph: one input node fanning out to every member,
//! the averaging node, then the tail as a vertical chain.

use std::fs;
use std::path::{Path, PathBuf};

use crate::model::ensemble::tail_summary;
use crate::model::spec::{ClassifierSpec, FeatureShape};
use crate::utils::error::Result;
use crate::utils::format_number;

const NODE_WIDTH: f64 = 170.0;
const NODE_HEIGHT: f64 = 46.0;
const H_GAP: f64 = 20.0;
const V_GAP: f64 = 34.0;
const MARGIN: f64 = 30.0;
const TITLE_HEIGHT: f64 = 50.0;

const COLOR_INPUT: &str = "#2ecc71";
const COLOR_MEMBER: &str = "#3498db";
const COLOR_MERGE: &str = "#e67e22";
const COLOR_TAIL: &str = "#ecf0f1";
const COLOR_AXIS: &str = "#2c3e50";
const COLOR_TEXT: &str = "#2c3e50";

/// Caption of the titled diagram
pub const DIAGRAM_TITLE: &str = "Model Visualization";

/// One box in the diagram
#[derive(Debug, Clone, PartialEq)]
pub struct DiagramNode {
    pub label: String,
    pub detail: String,
}

impl DiagramNode {
    fn new(label: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            detail: detail.into(),
        }
    }
}

/// Layer graph of the ensemble
#[derive(Debug, Clone, PartialEq)]
pub struct EnsembleDiagram {
    pub input: DiagramNode,
    pub members: Vec<DiagramNode>,
    /// Averaging node followed by the tail layers
    pub chain: Vec<DiagramNode>,
}

impl EnsembleDiagram {
    /// Build the graph for an ensemble of the given member specs
    pub fn from_specs(specs: &[ClassifierSpec]) -> Result<Self> {
        let input_shape = specs
            .first()
            .map(|spec| FeatureShape::from(spec.input).to_string())
            .unwrap_or_default();

        let members = specs
            .iter()
            .map(|spec| {
                let params = spec.param_count()?;
                Ok(DiagramNode::new(
                    spec.name.clone(),
                    format!("(1) | {} params", format_number(params)),
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut chain = vec![DiagramNode::new("average", "(1)")];
        for row in tail_summary()? {
            chain.push(DiagramNode::new(row.name, row.output.to_string()));
        }

        Ok(Self {
            input: DiagramNode::new("input", input_shape),
            members,
            chain,
        })
    }

    /// The graph up to and including the averaging node
    pub fn partial(&self) -> Self {
        Self {
            input: self.input.clone(),
            members: self.members.clone(),
            chain: self.chain.iter().take(1).cloned().collect(),
        }
    }

    /// Render as a standalone SVG document
    pub fn to_svg(&self, title: Option<&str>) -> String {
        let columns = self.members.len().max(1) as f64;
        let width = (MARGIN * 2.0 + columns * NODE_WIDTH + (columns - 1.0) * H_GAP)
            .max(NODE_WIDTH + MARGIN * 2.0);
        let top = MARGIN + if title.is_some() { TITLE_HEIGHT } else { 0.0 };
        let rows = 2 + self.chain.len();
        let height = top + rows as f64 * (NODE_HEIGHT + V_GAP) - V_GAP + MARGIN;
        let center_x = width / 2.0 - NODE_WIDTH / 2.0;

        let mut svg = String::new();

        svg.push_str(&format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {} {}" width="{}" height="{}">"#,
            width, height, width, height
        ));
        svg.push_str(&format!(
            r#"<rect width="{}" height="{}" fill="white"/>"#,
            width, height
        ));

        if let Some(title) = title {
            svg.push_str(&format!(
                r#"<text x="{}" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="20" font-weight="bold" fill="{}">{}</text>"#,
                width / 2.0,
                MARGIN + 20.0,
                COLOR_TEXT,
                escape_xml(title)
            ));
        }

        // Input
        let input_y = top;
        push_node(&mut svg, &self.input, center_x, input_y, COLOR_INPUT);

        // Members, fanned out on one row
        let member_y = input_y + NODE_HEIGHT + V_GAP;
        let members_width = columns * NODE_WIDTH + (columns - 1.0) * H_GAP;
        let first_x = (width - members_width) / 2.0;
        let merge_y = member_y + NODE_HEIGHT + V_GAP;

        for (i, member) in self.members.iter().enumerate() {
            let x = first_x + i as f64 * (NODE_WIDTH + H_GAP);
            push_edge(&mut svg, center_x + NODE_WIDTH / 2.0, input_y + NODE_HEIGHT, x + NODE_WIDTH / 2.0, member_y);
            if !self.chain.is_empty() {
                push_edge(&mut svg, x + NODE_WIDTH / 2.0, member_y + NODE_HEIGHT, center_x + NODE_WIDTH / 2.0, merge_y);
            }
            push_node(&mut svg, member, x, member_y, COLOR_MEMBER);
        }

        // Average and tail
        for (i, node) in self.chain.iter().enumerate() {
            let y = merge_y + i as f64 * (NODE_HEIGHT + V_GAP);
            if i > 0 {
                push_edge(&mut svg, center_x + NODE_WIDTH / 2.0, y - V_GAP, center_x + NODE_WIDTH / 2.0, y);
            }
            let color = if i == 0 { COLOR_MERGE } else { COLOR_TAIL };
            push_node(&mut svg, node, center_x, y, color);
        }

        svg.push_str("</svg>");
        svg
    }
}

fn push_node(svg: &mut String, node: &DiagramNode, x: f64, y: f64, fill: &str) {
    svg.push_str(&format!(
        r#"<rect x="{}" y="{}" width="{}" height="{}" rx="6" fill="{}" stroke="{}" stroke-width="1"/>"#,
        x, y, NODE_WIDTH, NODE_HEIGHT, fill, COLOR_AXIS
    ));
    svg.push_str(&format!(
        r#"<text x="{}" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="13" font-weight="bold" fill="{}">{}</text>"#,
        x + NODE_WIDTH / 2.0,
        y + 19.0,
        COLOR_TEXT,
        escape_xml(&node.label)
    ));
    svg.push_str(&format!(
        r#"<text x="{}" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="11" fill="{}">{}</text>"#,
        x + NODE_WIDTH / 2.0,
        y + 36.0,
        COLOR_TEXT,
        escape_xml(&node.detail)
    ));
}

fn push_edge(svg: &mut String, x1: f64, y1: f64, x2: f64, y2: f64) {
    svg.push_str(&format!(
        r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="1.2"/>"#,
        x1, y1, x2, y2, COLOR_AXIS
    ));
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Files written by [`write_diagrams`]
#[derive(Debug, Clone)]
pub struct DiagramPaths {
    pub full: PathBuf,
    pub titled: PathBuf,
    pub partial: PathBuf,
}

/// Write `model.svg`, `model_with_title.svg` and `model_partial.svg`
pub fn write_diagrams(specs: &[ClassifierSpec], output_dir: &Path) -> Result<DiagramPaths> {
    fs::create_dir_all(output_dir)?;
    let diagram = EnsembleDiagram::from_specs(specs)?;

    let paths = DiagramPaths {
        full: output_dir.join("model.svg"),
        titled: output_dir.join("model_with_title.svg"),
        partial: output_dir.join("model_partial.svg"),
    };

    fs::write(&paths.full, diagram.to_svg(None))?;
    fs::write(&paths.titled, diagram.to_svg(Some(DIAGRAM_TITLE)))?;
    fs::write(&paths.partial, diagram.partial().to_svg(None))?;

    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::zoo::classifier_specs;
    use tempfile::TempDir;

    #[test]
    fn test_diagram_nodes() {
        let diagram = EnsembleDiagram::from_specs(&classifier_specs()).unwrap();
        assert_eq!(diagram.input.detail, "(3, 150, 150)");
        assert_eq!(diagram.members.len(), 8);
        assert_eq!(diagram.members[0].label, "three_block");
        assert_eq!(diagram.chain[0].label, "average");
        assert_eq!(diagram.chain.len(), 13);
        assert_eq!(diagram.chain.last().unwrap().detail, "(1)");
    }

    #[test]
    fn test_partial_stops_at_average() {
        let diagram = EnsembleDiagram::from_specs(&classifier_specs()).unwrap();
        let partial = diagram.partial();
        assert_eq!(partial.chain.len(), 1);
        assert_eq!(partial.members, diagram.members);

        let svg = partial.to_svg(None);
        assert!(svg.contains("average"));
        assert!(!svg.contains("leaky_re_lu"));
    }

    #[test]
    fn test_title_is_rendered() {
        let diagram = EnsembleDiagram::from_specs(&classifier_specs()).unwrap();
        assert!(diagram.to_svg(Some(DIAGRAM_TITLE)).contains(">Model Visualization<"));
        assert!(!diagram.to_svg(None).contains(DIAGRAM_TITLE));
    }

    #[test]
    fn test_write_diagrams() {
        let temp_dir = TempDir::new().unwrap();
        let paths = write_diagrams(&classifier_specs(), temp_dir.path()).unwrap();

        for path in [&paths.full, &paths.titled, &paths.partial] {
            let content = fs::read_to_string(path).unwrap();
            assert!(content.starts_with("<svg"));
            assert!(content.ends_with("</svg>"));
        }
    }

    #[test]
    fn test_escape_xml() {
        assert_eq!(escape_xml("a<b>&\"c\""), "a&lt;b&gt;&amp;&quot;c&quot;");
    }
}

//! Textual rendering of graphs.
//!
//! [`GraphDisplay`] prints an MLIR-like listing, one operation per line:
//!
//! ```text
//! %7 = load_tile %6 {l1_hint = #cached} : (tile<32x32xf32>) -> vector<32x32xf32>
//! ```
//!
//! [`RegionTree`] renders the region nesting as an ASCII tree via `ptree`, which is handy
//! for eyeballing where a rewrite moved a loop body.

use std::borrow::Cow;
use std::fmt::{self, Write as _};
use std::io;

use itertools::Itertools;
use ptree::{Style, TreeItem};

use crate::{Graph, OpId, RegionId};

/// `Display` adaptor for a whole graph.
pub struct GraphDisplay<'g>(pub &'g Graph);

impl Graph {
    pub fn display(&self) -> GraphDisplay<'_> {
        GraphDisplay(self)
    }

    /// One-line rendering of `op` without its regions.
    pub fn op_to_string(&self, op: OpId) -> String {
        let mut s = String::new();
        let _ = write_op_header(self, op, &mut s);
        s
    }

    /// Region nesting tree rendered as text.
    pub fn tree_string(&self) -> String {
        let mut buf = Vec::new();
        let root = RegionTree { graph: self, node: TreeNode::Region(self.root()) };
        if ptree::write_tree(&root, &mut buf).is_err() {
            return String::new();
        }
        String::from_utf8_lossy(&buf).into_owned()
    }
}

impl fmt::Display for GraphDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_region(self.0, self.0.root(), 0, f)
    }
}

fn write_region(graph: &Graph, region: RegionId, depth: usize, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let indent = "  ".repeat(depth);
    for &op in graph.region(region).ops() {
        let mut line = String::new();
        write_op_header(graph, op, &mut line)?;
        write!(f, "{indent}{line}")?;
        let regions = graph.regions(op);
        if regions.is_empty() {
            writeln!(f)?;
            continue;
        }
        for &r in regions {
            let args = graph.region(r).args().iter().map(|a| format!("{a}: {}", graph.value_type(*a))).join(", ");
            writeln!(f, " {{")?;
            writeln!(f, "{indent}^bb({args}):")?;
            write_region(graph, r, depth + 1, f)?;
            write!(f, "{indent}}}")?;
        }
        writeln!(f)?;
    }
    Ok(())
}

fn write_op_header(graph: &Graph, op: OpId, out: &mut String) -> fmt::Result {
    let results = graph.results(op);
    if !results.is_empty() {
        write!(out, "{} = ", results.iter().join(", "))?;
    }
    write!(out, "{}", graph.kind(op))?;

    let operands = graph.operands(op);
    if !operands.is_empty() {
        write!(out, " {}", operands.iter().join(", "))?;
    }

    let attrs = graph.attrs(op);
    if !attrs.is_empty() {
        write!(out, " {{{}}}", attrs.iter().map(|(k, v)| format!("{k} = {v}")).join(", "))?;
    }

    if !operands.is_empty() || !results.is_empty() {
        let operand_types = operands.iter().map(|v| graph.value_type(*v).to_string()).join(", ");
        let result_types = results.iter().map(|v| graph.value_type(*v).to_string()).join(", ");
        write!(out, " : ({operand_types}) -> {result_types}")?;
    }
    Ok(())
}

#[derive(Clone, Copy)]
enum TreeNode {
    Region(RegionId),
    Op(OpId),
}

/// `ptree` view over the region/operation nesting.
#[derive(Clone)]
pub struct RegionTree<'g> {
    graph: &'g Graph,
    node: TreeNode,
}

impl TreeItem for RegionTree<'_> {
    type Child = Self;

    fn write_self<W: io::Write>(&self, f: &mut W, _style: &Style) -> io::Result<()> {
        match self.node {
            TreeNode::Region(r) => {
                let args = self.graph.region(r).args().iter().join(", ");
                write!(f, "{r}({args})")
            }
            TreeNode::Op(op) => write!(f, "[{op}] {}", self.graph.kind(op)),
        }
    }

    fn children(&self) -> Cow<'_, [Self::Child]> {
        let children: Vec<Self> = match self.node {
            TreeNode::Region(r) => self
                .graph
                .region(r)
                .ops()
                .iter()
                .map(|op| Self { graph: self.graph, node: TreeNode::Op(*op) })
                .collect(),
            TreeNode::Op(op) => {
                self.graph.regions(op).iter().map(|r| Self { graph: self.graph, node: TreeNode::Region(*r) }).collect()
            }
        };
        Cow::Owned(children)
    }
}

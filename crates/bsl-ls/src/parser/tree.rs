//
// parser/tree.rs
//
// Parse tree for BSL modules
//

use tower_lsp::lsp_types::{Position, Range};

use crate::utf16::range_contains;

/// A parsed module
#[derive(Debug, Clone)]
pub struct ParseTree {
    pub root: Node,
}

impl ParseTree {
    /// Whether any node in the module failed to parse
    pub fn has_errors(&self) -> bool {
        self.root.contains_errors()
    }
}

/// Procedure or function header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubDeclaration {
    pub name: String,
    pub name_range: Range,
    pub is_function: bool,
    pub export: bool,
    pub is_async: bool,
}

/// Tagged node kinds
///
/// Nodes whose identifying token differs from their full extent carry a
/// `name_range`; for single-token nodes (`Identifier`, `VarName`, `Param`,
/// `LoopVariable`, `AccessProperty`) the node range is the token itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Region { name: String, name_range: Range },
    Preprocessor { text: String },
    ModuleVarDeclaration,
    SubVarDeclaration,
    VarName { name: String, export: bool },
    Sub(SubDeclaration),
    Param { name: String, by_value: bool },
    Annotation { name: String, name_range: Range },
    AnnotationParam { name: Option<String>, value: Option<String> },
    Assignment,
    /// Assignment target; children are the base identifier and its accessors
    LValue { name: Option<String> },
    CallStatement,
    /// Base expression followed by property, call and index accessors
    ComplexIdentifier,
    Identifier { name: String },
    GlobalMethodCall { name: String, name_range: Range },
    AccessProperty { name: String },
    AccessCall { name: String, name_range: Range },
    AccessIndex,
    NewExpression { type_name: Option<String>, type_range: Option<Range> },
    Expression,
    TernaryOperator,
    Literal,
    IfStatement,
    ElsIfBranch,
    ElseBranch,
    WhileStatement,
    ForStatement,
    ForEachStatement,
    LoopVariable { name: String },
    TryStatement,
    ExceptBranch,
    ReturnStatement,
    RaiseStatement,
    BreakStatement,
    ContinueStatement,
    GotoStatement,
    LabelStatement { name: String },
    HandlerStatement,
    Error { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub kind: NodeKind,
    pub range: Range,
    pub children: Vec<Node>,
}

impl Node {
    pub fn new(kind: NodeKind, range: Range, children: Vec<Node>) -> Self {
        Self { kind, range, children }
    }

    pub fn leaf(kind: NodeKind, range: Range) -> Self {
        Self::new(kind, range, Vec::new())
    }

    pub fn is_error(&self) -> bool {
        matches!(self.kind, NodeKind::Error { .. })
    }

    /// Whether this node or any descendant is an `Error` node
    pub fn contains_errors(&self) -> bool {
        self.is_error() || self.children.iter().any(Node::contains_errors)
    }

    /// Pre-order traversal: the callback sees a parent before its children
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Node)) {
        f(self);
        for child in &self.children {
            child.walk(f);
        }
    }

    /// Deepest node whose range contains `position`
    pub fn find_node_at(&self, position: Position) -> Option<&Node> {
        if !range_contains(&self.range, position) {
            return None;
        }
        self.children
            .iter()
            .find_map(|child| child.find_node_at(position))
            .or(Some(self))
    }

    /// Chain of nodes from this node down to the deepest one containing
    /// `position`, outermost first
    pub fn path_to(&self, position: Position) -> Vec<&Node> {
        let mut path = Vec::new();
        let mut current = Some(self);
        while let Some(node) = current {
            if !range_contains(&node.range, position) {
                break;
            }
            path.push(node);
            current = node.children.iter().find(|c| range_contains(&c.range, position));
        }
        path
    }

    /// Name of an identifier-like node, if any
    pub fn name(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Identifier { name }
            | NodeKind::VarName { name, .. }
            | NodeKind::Param { name, .. }
            | NodeKind::LoopVariable { name }
            | NodeKind::AccessProperty { name }
            | NodeKind::AccessCall { name, .. }
            | NodeKind::GlobalMethodCall { name, .. }
            | NodeKind::Annotation { name, .. }
            | NodeKind::Region { name, .. } => Some(name),
            NodeKind::Sub(decl) => Some(&decl.name),
            NodeKind::LValue { name } => name.as_deref(),
            _ => None,
        }
    }

    /// Range of the identifying token of this node
    pub fn name_range(&self) -> Range {
        match &self.kind {
            NodeKind::Sub(decl) => decl.name_range,
            NodeKind::AccessCall { name_range, .. }
            | NodeKind::GlobalMethodCall { name_range, .. }
            | NodeKind::Annotation { name_range, .. }
            | NodeKind::Region { name_range, .. } => *name_range,
            NodeKind::LValue { .. } => self.children.first().map(|c| c.range).unwrap_or(self.range),
            _ => self.range,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(sl: u32, sc: u32, el: u32, ec: u32) -> Range {
        Range::new(Position::new(sl, sc), Position::new(el, ec))
    }

    #[test]
    fn test_contains_errors_finds_nested_error() {
        let tree = Node::new(
            NodeKind::File,
            range(0, 0, 2, 0),
            vec![Node::new(
                NodeKind::Expression,
                range(0, 0, 1, 0),
                vec![Node::leaf(NodeKind::Error { message: "x".into() }, range(0, 1, 0, 2))],
            )],
        );
        assert!(tree.contains_errors());
        assert!(!tree.children[0].is_error());
    }

    #[test]
    fn test_walk_is_pre_order() {
        let tree = Node::new(
            NodeKind::File,
            range(0, 0, 3, 0),
            vec![
                Node::new(
                    NodeKind::Expression,
                    range(0, 0, 1, 0),
                    vec![Node::leaf(NodeKind::Literal, range(0, 0, 0, 1))],
                ),
                Node::leaf(NodeKind::Identifier { name: "А".into() }, range(2, 0, 2, 1)),
            ],
        );
        let mut kinds = Vec::new();
        tree.walk(&mut |n| kinds.push(n.kind.clone()));
        assert_eq!(kinds[0], NodeKind::File);
        assert_eq!(kinds[1], NodeKind::Expression);
        assert_eq!(kinds[2], NodeKind::Literal);
        assert!(matches!(kinds[3], NodeKind::Identifier { .. }));
    }

    #[test]
    fn test_find_node_at_returns_deepest() {
        let ident = Node::leaf(NodeKind::Identifier { name: "А".into() }, range(1, 4, 1, 5));
        let tree = Node::new(
            NodeKind::File,
            range(0, 0, 3, 0),
            vec![Node::new(NodeKind::ComplexIdentifier, range(1, 4, 1, 10), vec![ident])],
        );
        let found = tree.find_node_at(Position::new(1, 4)).unwrap();
        assert_eq!(found.name(), Some("А"));
        assert_eq!(tree.path_to(Position::new(1, 4)).len(), 3);
    }
}

//! Rule trees, the compiled form of a trigger. Serialization of this tree
//! is the determinism contract: compiling the same source twice must yield a
//! byte-identical serialized tree, so every container here is ordered.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    /// Ordering operators need ordered operands; booleans only get eq/ne.
    pub fn is_ordering(self) -> bool {
        matches!(self, Self::Lt | Self::Le | Self::Gt | Self::Ge)
    }
}

impl std::fmt::Display for CmpOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        };
        write!(f, "{s}")
    }
}

/// A value-producing expression. Event references are fully resolved by the
/// validator: the legacy `event.<f>` form never survives into a rule tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    Int(i128),
    Str(String),
    Bool(bool),
    EventField { event: String, field: String },
}

/// Document-id position of a statement target: a literal id or an event
/// reference resolved at execution time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdExpr {
    Literal(String),
    EventField { event: String, field: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cond {
    pub left: Expr,
    pub op: CmpOp,
    pub right: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleNode {
    Seq(Vec<RuleNode>),
    If {
        cond: Cond,
        then: Box<RuleNode>,
        #[serde(skip_serializing_if = "Option::is_none")]
        otherwise: Option<Box<RuleNode>>,
    },
    Insert {
        collection: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<IdExpr>,
        fields: Vec<(String, Expr)>,
    },
    Update {
        collection: String,
        id: IdExpr,
        fields: Vec<(String, Expr)>,
    },
    Delete {
        collection: String,
        id: IdExpr,
    },
}

/// Output of compilation: the executable tree, the event it is indexed
/// under, and the comment-stripped source that gets persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledTrigger {
    pub tree: RuleNode,
    pub bound_event: String,
    #[serde(skip)]
    pub stripped_source: String,
}

impl CompiledTrigger {
    /// Canonical serialized form; the determinism tests compare these bytes.
    pub fn serialized_tree(&self) -> String {
        // RuleNode contains no maps, only ordered vecs, so this cannot fail.
        serde_json::to_string(&self.tree).unwrap_or_default()
    }
}

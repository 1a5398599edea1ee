//! Schema resolution and lowering. Takes the parse tree, resolves every
//! event reference against the project's contract schema (never the
//! program's own `const events` header), determines the bound event, and
//! lowers into the serialized `RuleNode` form.

use triggr_common::{valid_collection_name, Result, TriggrError};
use triggr_registry::{EventDecl, ScalarType};

use crate::ast::{Cond, Expr, IdExpr, RuleNode};
use crate::parser::{PCond, PExpr, PIdExpr, PStmt, Program};

/// Static kinds for comparison type-checking. Byte strings, fixed arrays,
/// accounts, and opaque fields all surface as text at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StaticKind {
    Num,
    Text,
    Flag,
}

impl StaticKind {
    fn name(self) -> &'static str {
        match self {
            Self::Num => "numeric",
            Self::Text => "string",
            Self::Flag => "boolean",
        }
    }
}

fn kind_of_scalar(scalar: ScalarType) -> StaticKind {
    match scalar {
        ScalarType::U8
        | ScalarType::U16
        | ScalarType::U32
        | ScalarType::U64
        | ScalarType::U128
        | ScalarType::I8
        | ScalarType::I16
        | ScalarType::I32
        | ScalarType::I64
        | ScalarType::I128 => StaticKind::Num,
        ScalarType::Bool => StaticKind::Flag,
        ScalarType::BytesFixed(_)
        | ScalarType::Bytes
        | ScalarType::Account
        | ScalarType::Opaque => StaticKind::Text,
    }
}

/// One event reference found in the body. `event: None` is the legacy
/// `event.<field>` form awaiting resolution.
struct EventRef {
    event: Option<String>,
    field: String,
    line: u32,
}

pub fn validate_and_lower(program: &Program, schema: &[EventDecl]) -> Result<(RuleNode, String)> {
    let mut refs = Vec::new();
    collect_stmt_refs(&program.body, &mut refs)?;

    let bound = resolve_bound_event(program, &refs, schema)?;
    let decl = schema.iter().find(|e| e.name == bound).ok_or_else(|| {
        let line = refs
            .iter()
            .find(|r| r.event.as_deref() == Some(bound.as_str()))
            .map(|r| r.line)
            .unwrap_or(1);
        TriggrError::validation_at(format!("unknown event {bound}"), line)
    })?;

    for event_ref in &refs {
        if !decl.fields.iter().any(|(name, _)| *name == event_ref.field) {
            return Err(TriggrError::validation_at(
                format!("unknown field {} on event {}", event_ref.field, bound),
                event_ref.line,
            ));
        }
    }

    let ctx = Lowering { bound: &bound, decl };
    let body = ctx.lower_stmts(&program.body)?;
    Ok((RuleNode::Seq(body), bound))
}

fn resolve_bound_event(
    program: &Program,
    refs: &[EventRef],
    schema: &[EventDecl],
) -> Result<String> {
    let mut explicit: Option<&str> = None;
    for event_ref in refs {
        if let Some(name) = event_ref.event.as_deref() {
            match explicit {
                None => explicit = Some(name),
                Some(first) if first != name => {
                    return Err(TriggrError::validation_at(
                        format!(
                            "trigger references multiple events ({first} and {name}); \
                             a trigger is bound to exactly one event"
                        ),
                        event_ref.line,
                    ));
                }
                Some(_) => {}
            }
        }
    }
    if let Some(name) = explicit {
        return Ok(name.to_string());
    }

    // No explicit reference: a single-event const header (or a single-event
    // contract schema) resolves both the legacy `event.<f>` form and
    // reference-free bodies.
    if let Some([only]) = program.const_events.as_deref() {
        return Ok(only.name.clone());
    }
    if let [only] = schema {
        return Ok(only.name.clone());
    }
    Err(TriggrError::validation(
        "cannot determine the trigger's event: reference events.<Event>.<field> \
         or declare exactly one event in const events",
    ))
}

fn collect_stmt_refs(stmts: &[PStmt], refs: &mut Vec<EventRef>) -> Result<()> {
    for stmt in stmts {
        match stmt {
            PStmt::Insert { id, fields, .. } => {
                if let Some(PIdExpr::Path { segments, line }) = id {
                    refs.push(path_ref(segments, *line)?);
                }
                for (_, value) in fields {
                    collect_expr_ref(value, refs)?;
                }
            }
            PStmt::Update { id, fields, .. } => {
                if let PIdExpr::Path { segments, line } = id {
                    refs.push(path_ref(segments, *line)?);
                }
                for (_, value) in fields {
                    collect_expr_ref(value, refs)?;
                }
            }
            PStmt::Delete { id, .. } => {
                if let PIdExpr::Path { segments, line } = id {
                    refs.push(path_ref(segments, *line)?);
                }
            }
            PStmt::If {
                cond,
                then,
                otherwise,
                ..
            } => {
                collect_expr_ref(&cond.left, refs)?;
                collect_expr_ref(&cond.right, refs)?;
                collect_stmt_refs(then, refs)?;
                if let Some(else_body) = otherwise {
                    collect_stmt_refs(else_body, refs)?;
                }
            }
        }
    }
    Ok(())
}

fn collect_expr_ref(expr: &PExpr, refs: &mut Vec<EventRef>) -> Result<()> {
    if let PExpr::Path { segments, line } = expr {
        refs.push(path_ref(segments, *line)?);
    }
    Ok(())
}

fn path_ref(segments: &[String], line: u32) -> Result<EventRef> {
    match segments {
        [head, event, field] if head == "events" => Ok(EventRef {
            event: Some(event.clone()),
            field: field.clone(),
            line,
        }),
        [head, field] if head == "event" => Ok(EventRef {
            event: None,
            field: field.clone(),
            line,
        }),
        _ => Err(TriggrError::validation_at(
            format!(
                "unknown reference {}; expected events.<Event>.<field>",
                segments.join(".")
            ),
            line,
        )),
    }
}

struct Lowering<'a> {
    bound: &'a str,
    decl: &'a EventDecl,
}

impl Lowering<'_> {
    fn lower_stmts(&self, stmts: &[PStmt]) -> Result<Vec<RuleNode>> {
        stmts.iter().map(|s| self.lower_stmt(s)).collect()
    }

    fn lower_stmt(&self, stmt: &PStmt) -> Result<RuleNode> {
        match stmt {
            PStmt::Insert {
                collection,
                id,
                fields,
                line,
            } => {
                self.check_collection(collection, *line)?;
                Ok(RuleNode::Insert {
                    collection: collection.clone(),
                    id: id.as_ref().map(|i| self.lower_id(i)).transpose()?,
                    fields: self.lower_fields(fields)?,
                })
            }
            PStmt::Update {
                collection,
                id,
                fields,
                line,
            } => {
                self.check_collection(collection, *line)?;
                Ok(RuleNode::Update {
                    collection: collection.clone(),
                    id: self.lower_id(id)?,
                    fields: self.lower_fields(fields)?,
                })
            }
            PStmt::Delete {
                collection,
                id,
                line,
            } => {
                self.check_collection(collection, *line)?;
                Ok(RuleNode::Delete {
                    collection: collection.clone(),
                    id: self.lower_id(id)?,
                })
            }
            PStmt::If {
                cond,
                then,
                otherwise,
                ..
            } => Ok(RuleNode::If {
                cond: self.lower_cond(cond)?,
                then: Box::new(RuleNode::Seq(self.lower_stmts(then)?)),
                otherwise: otherwise
                    .as_ref()
                    .map(|body| Ok::<_, TriggrError>(Box::new(RuleNode::Seq(self.lower_stmts(body)?))))
                    .transpose()?,
            }),
        }
    }

    fn lower_cond(&self, cond: &PCond) -> Result<Cond> {
        let left_kind = self.kind_of(&cond.left, cond.line)?;
        let right_kind = self.kind_of(&cond.right, cond.line)?;
        if left_kind != right_kind {
            return Err(TriggrError::validation_at(
                format!(
                    "type mismatch: cannot compare {} with {}",
                    left_kind.name(),
                    right_kind.name()
                ),
                cond.line,
            ));
        }
        if left_kind == StaticKind::Flag && cond.op.is_ordering() {
            return Err(TriggrError::validation_at(
                format!("operator {} is not defined for booleans", cond.op),
                cond.line,
            ));
        }
        Ok(Cond {
            left: self.lower_expr(&cond.left)?,
            op: cond.op,
            right: self.lower_expr(&cond.right)?,
        })
    }

    fn kind_of(&self, expr: &PExpr, line: u32) -> Result<StaticKind> {
        match expr {
            PExpr::Int(_) => Ok(StaticKind::Num),
            PExpr::Str(_) => Ok(StaticKind::Text),
            PExpr::Bool(_) => Ok(StaticKind::Flag),
            PExpr::Path { segments, .. } => {
                let field = segments.last().map(String::as_str).unwrap_or("");
                let scalar = self
                    .decl
                    .fields
                    .iter()
                    .find(|(name, _)| name == field)
                    .map(|(_, scalar)| *scalar)
                    .ok_or_else(|| {
                        TriggrError::validation_at(
                            format!("unknown field {field} on event {}", self.bound),
                            line,
                        )
                    })?;
                Ok(kind_of_scalar(scalar))
            }
        }
    }

    fn lower_fields(&self, fields: &[(String, PExpr)]) -> Result<Vec<(String, Expr)>> {
        fields
            .iter()
            .map(|(name, value)| Ok((name.clone(), self.lower_expr(value)?)))
            .collect()
    }

    fn lower_expr(&self, expr: &PExpr) -> Result<Expr> {
        Ok(match expr {
            PExpr::Int(v) => Expr::Int(*v),
            PExpr::Str(s) => Expr::Str(s.clone()),
            PExpr::Bool(b) => Expr::Bool(*b),
            PExpr::Path { segments, .. } => Expr::EventField {
                event: self.bound.to_string(),
                field: segments.last().cloned().unwrap_or_default(),
            },
        })
    }

    fn lower_id(&self, id: &PIdExpr) -> Result<IdExpr> {
        Ok(match id {
            PIdExpr::Literal(s) => IdExpr::Literal(s.clone()),
            PIdExpr::Path { segments, .. } => IdExpr::EventField {
                event: self.bound.to_string(),
                field: segments.last().cloned().unwrap_or_default(),
            },
        })
    }

    fn check_collection(&self, name: &str, line: u32) -> Result<()> {
        if valid_collection_name(name) {
            Ok(())
        } else {
            Err(TriggrError::validation_at(
                format!("invalid collection name {name:?}: expected [a-z0-9_]+"),
                line,
            ))
        }
    }
}

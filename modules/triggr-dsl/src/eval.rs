//! Rule-tree evaluation. Statements execute in textual order and apply
//! immediately through the document store, so later statements observe the
//! effects of earlier ones. The first failing statement aborts the rest of
//! the trigger; the caller logs and moves on to the next trigger.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use triggr_common::{ProjectId, Result, TriggrError, Value};
use triggr_store::DocumentStore;

use crate::ast::{CmpOp, Cond, Expr, IdExpr, RuleNode};

/// A decoded chain event as the evaluator sees it.
#[derive(Debug, Clone)]
pub struct EventData {
    pub name: String,
    pub fields: BTreeMap<String, Value>,
}

/// Execute a compiled trigger against one event. Returns the number of
/// mutations applied.
pub async fn execute(
    tree: &RuleNode,
    event: &EventData,
    docs: &DocumentStore,
    project: ProjectId,
) -> Result<u32> {
    exec_node(tree, event, docs, project).await
}

fn exec_node<'a>(
    node: &'a RuleNode,
    event: &'a EventData,
    docs: &'a DocumentStore,
    project: ProjectId,
) -> Pin<Box<dyn Future<Output = Result<u32>> + Send + 'a>> {
    Box::pin(async move {
        match node {
            RuleNode::Seq(nodes) => {
                let mut mutations = 0;
                for inner in nodes {
                    mutations += exec_node(inner, event, docs, project).await?;
                }
                Ok(mutations)
            }
            RuleNode::If {
                cond,
                then,
                otherwise,
            } => {
                if eval_cond(cond, event)? {
                    exec_node(then, event, docs, project).await
                } else if let Some(else_branch) = otherwise {
                    exec_node(else_branch, event, docs, project).await
                } else {
                    Ok(0)
                }
            }
            RuleNode::Insert {
                collection,
                id,
                fields,
            } => {
                let doc_id = id.as_ref().map(|i| resolve_id(i, event)).transpose()?;
                let data = build_object(fields, event)?;
                docs.insert_doc(project, collection, doc_id, data).await?;
                Ok(1)
            }
            RuleNode::Update {
                collection,
                id,
                fields,
            } => {
                let doc_id = resolve_id(id, event)?;
                let data = build_object(fields, event)?;
                docs.patch_doc(project, collection, &doc_id, data).await?;
                Ok(1)
            }
            RuleNode::Delete { collection, id } => {
                let doc_id = resolve_id(id, event)?;
                docs.delete_doc(project, collection, &doc_id).await?;
                Ok(1)
            }
        }
    })
}

fn build_object(fields: &[(String, Expr)], event: &EventData) -> Result<Value> {
    let mut map = BTreeMap::new();
    for (name, expr) in fields {
        map.insert(name.clone(), eval_expr(expr, event)?);
    }
    Ok(Value::Obj(map))
}

fn eval_expr(expr: &Expr, event: &EventData) -> Result<Value> {
    match expr {
        Expr::Int(v) => Ok(Value::Int(*v)),
        Expr::Str(s) => Ok(Value::Str(s.clone())),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::EventField { event: name, field } => {
            if *name != event.name {
                return Err(TriggrError::validation(format!(
                    "trigger is bound to {name} but was invoked with {}",
                    event.name
                )));
            }
            event.fields.get(field).cloned().ok_or_else(|| {
                TriggrError::validation(format!("event {name} carries no field {field}"))
            })
        }
    }
}

fn resolve_id(id: &IdExpr, event: &EventData) -> Result<String> {
    let (name, field) = match id {
        IdExpr::Literal(s) => return Ok(s.clone()),
        IdExpr::EventField { event, field } => (event, field),
    };
    if *name != event.name {
        return Err(TriggrError::validation(format!(
            "trigger is bound to {name} but was invoked with {}",
            event.name
        )));
    }
    let value = event.fields.get(field).cloned().ok_or_else(|| {
        TriggrError::validation(format!("event {name} carries no field {field}"))
    })?;
    match value {
        Value::Str(s) => Ok(s),
        Value::Int(v) => Ok(v.to_string()),
        Value::Dec(s) => Ok(s),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(TriggrError::validation(format!(
            "cannot use {} as a document id",
            other.kind()
        ))),
    }
}

fn eval_cond(cond: &Cond, event: &EventData) -> Result<bool> {
    let left = eval_expr(&cond.left, event)?;
    let right = eval_expr(&cond.right, event)?;
    compare(cond.op, &left, &right)
}

/// Runtime comparison. No implicit coercion: mismatched kinds are an
/// evaluation error even though the static checker catches most of them.
fn compare(op: CmpOp, left: &Value, right: &Value) -> Result<bool> {
    use std::cmp::Ordering;

    let ordering = match (left, right) {
        (Value::Int(a), Value::Int(b)) => a.cmp(b),
        (Value::Str(a), Value::Str(b)) => a.cmp(b),
        (Value::Bool(a), Value::Bool(b)) => {
            return match op {
                CmpOp::Eq => Ok(a == b),
                CmpOp::Ne => Ok(a != b),
                other => Err(TriggrError::validation(format!(
                    "operator {other} is not defined for booleans"
                ))),
            };
        }
        (Value::Dec(a), Value::Dec(b)) => {
            return match op {
                CmpOp::Eq => Ok(a == b),
                CmpOp::Ne => Ok(a != b),
                other => Err(TriggrError::validation(format!(
                    "operator {other} is not defined for decimals"
                ))),
            };
        }
        (a, b) => {
            return Err(TriggrError::validation(format!(
                "cannot compare {} with {}",
                a.kind(),
                b.kind()
            )))
        }
    };

    Ok(match op {
        CmpOp::Eq => ordering == Ordering::Equal,
        CmpOp::Ne => ordering != Ordering::Equal,
        CmpOp::Lt => ordering == Ordering::Less,
        CmpOp::Le => ordering != Ordering::Greater,
        CmpOp::Gt => ordering == Ordering::Greater,
        CmpOp::Ge => ordering != Ordering::Less,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compare_integers() {
        assert!(compare(CmpOp::Gt, &Value::Int(250), &Value::Int(200)).unwrap());
        assert!(!compare(CmpOp::Gt, &Value::Int(10), &Value::Int(200)).unwrap());
        assert!(compare(CmpOp::Le, &Value::Int(5), &Value::Int(5)).unwrap());
    }

    #[test]
    fn compare_strings_is_lexicographic() {
        assert!(compare(CmpOp::Lt, &Value::Str("a".into()), &Value::Str("b".into())).unwrap());
    }

    #[test]
    fn mismatched_kinds_error() {
        let err = compare(CmpOp::Eq, &Value::Int(1), &Value::Str("1".into())).unwrap_err();
        assert!(err.to_string().contains("cannot compare"));
    }

    #[test]
    fn boolean_ordering_errors() {
        assert!(compare(CmpOp::Lt, &Value::Bool(true), &Value::Bool(false)).is_err());
        assert!(compare(CmpOp::Ne, &Value::Bool(true), &Value::Bool(false)).unwrap());
    }
}

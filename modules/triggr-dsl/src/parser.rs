//! Recursive-descent parser. Produces a line-annotated parse tree; the
//! validator resolves it against the project schema and lowers it into the
//! serialized `RuleNode` form.
//!
//! Grammar:
//!
//! ```text
//! program    := const_decl? "fn" "main" "(" "events" ")" block
//! const_decl := "const" "events" "=" "[" event_sig ("," event_sig)* ","? "]"
//! event_sig  := Ident "{" Ident ("," Ident)* ","? "}"
//! block      := "{" stmt* "}"
//! stmt       := "insert" "@" Ident target_id? "with"? obj
//!             | "update" "@" Ident ":" id_expr obj
//!             | "delete" "@" Ident ":" id_expr
//!             | "if" "(" expr cmp expr ")" block ("else" block)?
//! target_id  := ":" id_expr?
//! obj        := "{" (Ident ":" expr ",")* "}"    -- trailing comma optional
//! expr       := Int | Str | "true" | "false" | path
//! path       := Ident ("." Ident)+
//! id_expr    := Ident | Str | path
//! ```

use crate::ast::CmpOp;
use crate::lexer::{Token, TokenKind};
use triggr_common::{Result, TriggrError};

#[derive(Debug, Clone, PartialEq)]
pub struct EventSig {
    pub name: String,
    pub fields: Vec<String>,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PExpr {
    Int(i128),
    Str(String),
    Bool(bool),
    /// Dotted reference, e.g. `events.ValueChanged.value` or `event.value`.
    Path { segments: Vec<String>, line: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum PIdExpr {
    Literal(String),
    Path { segments: Vec<String>, line: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PCond {
    pub left: PExpr,
    pub op: CmpOp,
    pub right: PExpr,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PStmt {
    Insert {
        collection: String,
        id: Option<PIdExpr>,
        fields: Vec<(String, PExpr)>,
        line: u32,
    },
    Update {
        collection: String,
        id: PIdExpr,
        fields: Vec<(String, PExpr)>,
        line: u32,
    },
    Delete {
        collection: String,
        id: PIdExpr,
        line: u32,
    },
    If {
        cond: PCond,
        then: Vec<PStmt>,
        otherwise: Option<Vec<PStmt>>,
        line: u32,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub const_events: Option<Vec<EventSig>>,
    pub body: Vec<PStmt>,
}

pub fn parse(tokens: Vec<Token>) -> Result<Program> {
    let mut parser = Parser { tokens, pos: 0 };
    let program = parser.program()?;
    if let Some(extra) = parser.peek() {
        return Err(err_at(
            format!("unexpected {} after fn main", extra.kind),
            extra.line,
        ));
    }
    Ok(program)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn program(&mut self) -> Result<Program> {
        let const_events = if self.peek_ident("const") {
            Some(self.const_decl()?)
        } else {
            None
        };

        self.expect_ident("fn")?;
        let name_line = self.line();
        let name = self.expect_any_ident()?;
        if name != "main" {
            return Err(err_at(
                format!("expected fn main, found fn {name}"),
                name_line,
            ));
        }
        self.expect(TokenKind::LParen)?;
        let param_line = self.line();
        let param = self.expect_any_ident()?;
        if param != "events" {
            return Err(err_at(
                format!("main must take a single parameter named events, found {param}"),
                param_line,
            ));
        }
        self.expect(TokenKind::RParen)?;
        let body = self.block()?;

        Ok(Program { const_events, body })
    }

    fn const_decl(&mut self) -> Result<Vec<EventSig>> {
        self.expect_ident("const")?;
        let kw_line = self.line();
        let kw = self.expect_any_ident()?;
        if kw != "events" {
            return Err(err_at("expected const events = [...]", kw_line));
        }
        self.expect(TokenKind::Assign)?;
        self.expect(TokenKind::LBracket)?;

        let mut sigs: Vec<EventSig> = Vec::new();
        loop {
            if self.eat(TokenKind::RBracket) {
                break;
            }
            let line = self.line();
            let name = self.expect_any_ident()?;
            if sigs.iter().any(|s| s.name == name) {
                return Err(err_at(format!("duplicate event {name} in const events"), line));
            }
            self.expect(TokenKind::LBrace)?;
            let mut fields = Vec::new();
            loop {
                if self.eat(TokenKind::RBrace) {
                    break;
                }
                fields.push(self.expect_any_ident()?);
                if !self.eat(TokenKind::Comma) {
                    self.expect(TokenKind::RBrace)?;
                    break;
                }
            }
            if fields.is_empty() {
                return Err(err_at(format!("event {name} declares no fields"), line));
            }
            sigs.push(EventSig { name, fields, line });

            if !self.eat(TokenKind::Comma) {
                self.expect(TokenKind::RBracket)?;
                break;
            }
        }

        if sigs.is_empty() {
            return Err(err_at("const events declares no events", self.line()));
        }
        Ok(sigs)
    }

    fn block(&mut self) -> Result<Vec<PStmt>> {
        self.expect(TokenKind::LBrace)?;
        let mut stmts = Vec::new();
        while !self.eat(TokenKind::RBrace) {
            stmts.push(self.stmt()?);
        }
        Ok(stmts)
    }

    fn stmt(&mut self) -> Result<PStmt> {
        let line = self.line();
        let keyword = self.expect_any_ident()?;
        match keyword.as_str() {
            "insert" => {
                let collection = self.target_collection()?;
                let id = if self.eat(TokenKind::Colon) {
                    self.optional_id_expr()?
                } else {
                    None
                };
                // `with` is an accepted synonym before the field object.
                if self.peek_ident("with") {
                    self.pos += 1;
                }
                let fields = self.field_list()?;
                Ok(PStmt::Insert {
                    collection,
                    id,
                    fields,
                    line,
                })
            }
            "update" => {
                let collection = self.target_collection()?;
                self.expect(TokenKind::Colon)?;
                let id = self.id_expr()?;
                let fields = self.field_list()?;
                Ok(PStmt::Update {
                    collection,
                    id,
                    fields,
                    line,
                })
            }
            "delete" => {
                let collection = self.target_collection()?;
                self.expect(TokenKind::Colon)?;
                let id = self.id_expr()?;
                Ok(PStmt::Delete {
                    collection,
                    id,
                    line,
                })
            }
            "if" => {
                self.expect(TokenKind::LParen)?;
                let cond = self.cond()?;
                self.expect(TokenKind::RParen)?;
                let then = self.block()?;
                let otherwise = if self.peek_ident("else") {
                    self.pos += 1;
                    Some(self.block()?)
                } else {
                    None
                };
                Ok(PStmt::If {
                    cond,
                    then,
                    otherwise,
                    line,
                })
            }
            other => Err(err_at(format!("unknown statement {other:?}"), line)),
        }
    }

    fn target_collection(&mut self) -> Result<String> {
        self.expect(TokenKind::At)?;
        self.expect_any_ident()
    }

    /// After `insert @coll:` the id may be omitted entirely (`insert
    /// @coll: { ... }` auto-generates), so a `{` or `with` here means no id.
    fn optional_id_expr(&mut self) -> Result<Option<PIdExpr>> {
        match self.peek() {
            Some(t) if t.kind == TokenKind::LBrace => Ok(None),
            Some(t) if matches!(&t.kind, TokenKind::Ident(name) if name == "with") => Ok(None),
            _ => Ok(Some(self.id_expr()?)),
        }
    }

    fn id_expr(&mut self) -> Result<PIdExpr> {
        let line = self.line();
        match self.next_kind()? {
            TokenKind::Str(s) => Ok(PIdExpr::Literal(s)),
            TokenKind::Ident(first) => {
                if self.peek_kind() == Some(&TokenKind::Dot) {
                    let segments = self.path_tail(first)?;
                    Ok(PIdExpr::Path { segments, line })
                } else {
                    Ok(PIdExpr::Literal(first))
                }
            }
            other => Err(err_at(
                format!("expected document id, found {other}"),
                line,
            )),
        }
    }

    fn field_list(&mut self) -> Result<Vec<(String, PExpr)>> {
        self.expect(TokenKind::LBrace)?;
        let mut fields = Vec::new();
        loop {
            if self.eat(TokenKind::RBrace) {
                break;
            }
            let name = self.expect_any_ident()?;
            self.expect(TokenKind::Colon)?;
            let value = self.expr()?;
            fields.push((name, value));
            if !self.eat(TokenKind::Comma) {
                self.expect(TokenKind::RBrace)?;
                break;
            }
        }
        Ok(fields)
    }

    fn cond(&mut self) -> Result<PCond> {
        let line = self.line();
        let left = self.expr()?;
        let op = match self.next_kind()? {
            TokenKind::EqEq => CmpOp::Eq,
            TokenKind::NotEq => CmpOp::Ne,
            TokenKind::Lt => CmpOp::Lt,
            TokenKind::Le => CmpOp::Le,
            TokenKind::Gt => CmpOp::Gt,
            TokenKind::Ge => CmpOp::Ge,
            other => {
                return Err(err_at(
                    format!("expected comparison operator, found {other}"),
                    line,
                ))
            }
        };
        let right = self.expr()?;
        Ok(PCond {
            left,
            op,
            right,
            line,
        })
    }

    fn expr(&mut self) -> Result<PExpr> {
        let line = self.line();
        match self.next_kind()? {
            TokenKind::Int(v) => Ok(PExpr::Int(v)),
            TokenKind::Str(s) => Ok(PExpr::Str(s)),
            TokenKind::Ident(name) if name == "true" => Ok(PExpr::Bool(true)),
            TokenKind::Ident(name) if name == "false" => Ok(PExpr::Bool(false)),
            TokenKind::Ident(first) => {
                if self.peek_kind() == Some(&TokenKind::Dot) {
                    let segments = self.path_tail(first)?;
                    Ok(PExpr::Path { segments, line })
                } else {
                    Err(err_at(
                        format!("bare identifier {first:?} is not a value; expected a literal or an event reference"),
                        line,
                    ))
                }
            }
            other => Err(err_at(format!("expected expression, found {other}"), line)),
        }
    }

    fn path_tail(&mut self, first: String) -> Result<Vec<String>> {
        let mut segments = vec![first];
        while self.eat(TokenKind::Dot) {
            segments.push(self.expect_any_ident()?);
        }
        Ok(segments)
    }

    // --- Token plumbing ---

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.peek().map(|t| &t.kind)
    }

    fn peek_ident(&self, name: &str) -> bool {
        matches!(self.peek_kind(), Some(TokenKind::Ident(n)) if n == name)
    }

    /// Line of the next token, or of the last token when at end of input.
    fn line(&self) -> u32 {
        self.peek()
            .map(|t| t.line)
            .or_else(|| self.tokens.last().map(|t| t.line))
            .unwrap_or(1)
    }

    fn next_kind(&mut self) -> Result<TokenKind> {
        let line = self.line();
        match self.tokens.get(self.pos) {
            Some(token) => {
                self.pos += 1;
                Ok(token.kind.clone())
            }
            None => Err(err_at("unexpected end of input", line)),
        }
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.peek_kind() == Some(&kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<()> {
        let line = self.line();
        match self.tokens.get(self.pos) {
            Some(token) if token.kind == kind => {
                self.pos += 1;
                Ok(())
            }
            Some(token) => Err(err_at(
                format!("expected {kind}, found {}", token.kind),
                line,
            )),
            None => Err(err_at(format!("expected {kind}, found end of input"), line)),
        }
    }

    fn expect_any_ident(&mut self) -> Result<String> {
        let line = self.line();
        match self.next_kind()? {
            TokenKind::Ident(name) => Ok(name),
            other => Err(err_at(format!("expected identifier, found {other}"), line)),
        }
    }

    fn expect_ident(&mut self, name: &str) -> Result<()> {
        let line = self.line();
        let found = self.expect_any_ident()?;
        if found == name {
            Ok(())
        } else {
            Err(err_at(format!("expected {name}, found {found}"), line))
        }
    }
}

fn err_at(message: impl Into<String>, line: u32) -> TriggrError {
    TriggrError::validation_at(message, line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;

    fn parse_src(src: &str) -> Result<Program> {
        parse(lex(src)?)
    }

    #[test]
    fn parses_insert_with_auto_id_colon_form() {
        let program = parse_src(
            "fn main(events) { insert @transactions: { v: events.ValueChanged.value } }",
        )
        .unwrap();
        match &program.body[0] {
            PStmt::Insert { collection, id, fields, .. } => {
                assert_eq!(collection, "transactions");
                assert!(id.is_none());
                assert_eq!(fields.len(), 1);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parses_insert_with_synonym() {
        let program =
            parse_src("fn main(events) { insert @logs with { msg: \"hi\" } }").unwrap();
        assert!(matches!(&program.body[0], PStmt::Insert { id: None, .. }));
    }

    #[test]
    fn parses_explicit_and_dotted_ids() {
        let program = parse_src(
            "fn main(events) { update @users:u1 { a: 1 } delete @users:events.Foo.id }",
        )
        .unwrap();
        assert!(matches!(
            &program.body[0],
            PStmt::Update { id: PIdExpr::Literal(id), .. } if id == "u1"
        ));
        assert!(matches!(
            &program.body[1],
            PStmt::Delete { id: PIdExpr::Path { segments, .. }, .. }
                if segments == &["events", "Foo", "id"]
        ));
    }

    #[test]
    fn parses_if_else() {
        let program = parse_src(
            r#"fn main(events) {
                if (events.V.value > 200) {
                    update @users:u1 { score: events.V.value }
                } else {
                    delete @users:u9
                }
            }"#,
        )
        .unwrap();
        match &program.body[0] {
            PStmt::If { cond, then, otherwise, .. } => {
                assert_eq!(cond.op, CmpOp::Gt);
                assert_eq!(then.len(), 1);
                assert_eq!(otherwise.as_ref().unwrap().len(), 1);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parses_const_events_header() {
        let program = parse_src(
            "const events = [ ValueChanged { value, who }, Other { x } ]\nfn main(events) { }",
        )
        .unwrap();
        let sigs = program.const_events.unwrap();
        assert_eq!(sigs.len(), 2);
        assert_eq!(sigs[0].fields, vec!["value", "who"]);
    }

    #[test]
    fn rejects_duplicate_const_event() {
        let err = parse_src("const events = [ A { x }, A { y } ]\nfn main(events) { }")
            .unwrap_err();
        assert!(err.to_string().contains("duplicate event"));
    }

    #[test]
    fn rejects_empty_const_event_body() {
        let err = parse_src("const events = [ A { } ]\nfn main(events) { }").unwrap_err();
        assert!(err.to_string().contains("declares no fields"));
    }

    #[test]
    fn rejects_wrong_main_parameter() {
        let err = parse_src("fn main(evs) { }").unwrap_err();
        assert!(err.to_string().contains("named events"));
    }

    #[test]
    fn rejects_second_function_with_line() {
        let err = parse_src("fn main(events) { }\nfn helper(events) { }").unwrap_err();
        match err {
            triggr_common::TriggrError::Validation { line, .. } => assert_eq!(line, Some(2)),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn rejects_unbalanced_braces() {
        assert!(parse_src("fn main(events) { insert @a: { x: 1 }").is_err());
    }

    #[test]
    fn allows_trailing_commas_in_field_lists() {
        assert!(parse_src("fn main(events) { insert @a: { x: 1, y: 2, } }").is_ok());
    }

    #[test]
    fn rejects_notify_statement() {
        let err = parse_src("fn main(events) { notify @slack { msg: \"x\" } }").unwrap_err();
        assert!(err.to_string().contains("unknown statement"));
    }
}

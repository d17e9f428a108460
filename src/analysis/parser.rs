//! Pest-based parser for analysis code.

use super::ast::{Arrow, ArrowBody, BinaryOp, Expr, LogicalOp, Program, Stmt, UnaryOp};
use super::value::format_number;
use super::EvalError;
use pest::error::LineColLocation;
use pest::iterators::{Pair, Pairs};
use pest::pratt_parser::{Assoc, Op, PrattParser};
use pest::Parser;
use pest_derive::Parser;
use std::rc::Rc;
use std::sync::LazyLock;

#[derive(Parser)]
#[grammar = "analysis/analysis.pest"]
struct AnalysisParser;

/// Binary operator precedence, loosest first. Prefix operators bind tightest.
static PRATT: LazyLock<PrattParser<Rule>> = LazyLock::new(|| {
    PrattParser::new()
        .op(Op::infix(Rule::nullish, Assoc::Left))
        .op(Op::infix(Rule::or, Assoc::Left))
        .op(Op::infix(Rule::and, Assoc::Left))
        .op(Op::infix(Rule::eq, Assoc::Left)
            | Op::infix(Rule::ne, Assoc::Left)
            | Op::infix(Rule::strict_eq, Assoc::Left)
            | Op::infix(Rule::strict_ne, Assoc::Left))
        .op(Op::infix(Rule::lt, Assoc::Left)
            | Op::infix(Rule::le, Assoc::Left)
            | Op::infix(Rule::gt, Assoc::Left)
            | Op::infix(Rule::ge, Assoc::Left))
        .op(Op::infix(Rule::add, Assoc::Left) | Op::infix(Rule::sub, Assoc::Left))
        .op(Op::infix(Rule::mul, Assoc::Left)
            | Op::infix(Rule::div, Assoc::Left)
            | Op::infix(Rule::rem, Assoc::Left))
        .op(Op::prefix(Rule::not)
            | Op::prefix(Rule::neg)
            | Op::prefix(Rule::pos)
            | Op::prefix(Rule::typeof_op))
});

impl From<pest::error::Error<Rule>> for EvalError {
    fn from(error: pest::error::Error<Rule>) -> Self {
        let error = error.renamed_rules(|rule| describe(*rule));
        let (line, column) = match error.line_col {
            LineColLocation::Pos(pos) | LineColLocation::Span(pos, _) => pos,
        };
        EvalError::syntax(format!(
            "{} at line {line}, column {column}",
            error.variant.message()
        ))
    }
}

/// An expression and the height of its tree. The interpreter recurses once
/// per level, so height is what `max_depth` bounds.
type Node = (Expr, usize);

/// Parses analysis source, refusing nesting deeper than `max_depth`.
pub fn parse(source: &str, max_depth: usize) -> Result<Program, EvalError> {
    // Grammar recursion only happens through brackets, so bounding bracket
    // depth first keeps pest's own stack shallow.
    if bracket_depth(source) > max_depth {
        return Err(too_deep());
    }

    let mut pairs = AnalysisParser::parse(Rule::program, source)?;
    let program = pairs
        .next()
        .ok_or_else(|| EvalError::syntax("empty input"))?;

    let walker = Walker { max_depth };
    let body = walker.parse_statements(program.into_inner())?;
    Ok(Program { body })
}

struct Walker {
    max_depth: usize,
}

impl Walker {
    fn nested(&self, expr: Expr, height: usize) -> Result<Node, EvalError> {
        if height > self.max_depth {
            return Err(too_deep());
        }
        Ok((expr, height))
    }

    fn parse_statements(&self, pairs: Pairs<Rule>) -> Result<Vec<Stmt>, EvalError> {
        pairs
            .filter(|pair| pair.as_rule() != Rule::EOI)
            .map(|pair| self.parse_statement(pair))
            .collect()
    }

    fn parse_statement(&self, pair: Pair<Rule>) -> Result<Stmt, EvalError> {
        match pair.as_rule() {
            Rule::let_stmt => {
                let mut inner = pair.into_inner().skip(1);
                let name = next(&mut inner)?.as_str().to_string();
                let value = self.parse_expr(next(&mut inner)?)?;
                Ok(Stmt::Let { name, value })
            }
            Rule::return_stmt => {
                let value = pair
                    .into_inner()
                    .find(|inner| inner.as_rule() == Rule::expr)
                    .map(|inner| self.parse_expr(inner))
                    .transpose()?;
                Ok(Stmt::Return(value))
            }
            Rule::expr_stmt => Ok(Stmt::Expr(self.parse_expr(next(&mut pair.into_inner())?)?)),
            Rule::if_stmt => self.parse_if(pair),
            rule => Err(unexpected(rule)),
        }
    }

    fn parse_if(&self, pair: Pair<Rule>) -> Result<Stmt, EvalError> {
        let mut arms = Vec::new();
        let mut otherwise = Vec::new();

        let mut inner = pair
            .into_inner()
            .filter(|inner| !matches!(inner.as_rule(), Rule::kw_if | Rule::kw_else));
        while let Some(part) = inner.next() {
            if part.as_rule() == Rule::expr {
                let test = self.parse_expr(part)?;
                let consequent = self.parse_branch(next(&mut inner)?)?;
                arms.push((test, consequent));
            } else {
                otherwise = self.parse_branch(part)?;
            }
        }

        // Each `else if` nests one level deeper when executed.
        if arms.len() > self.max_depth {
            return Err(too_deep());
        }

        let mut alternate = otherwise;
        while let Some((test, consequent)) = arms.pop() {
            alternate = vec![Stmt::If {
                test,
                consequent,
                alternate,
            }];
        }
        alternate
            .pop()
            .ok_or_else(|| EvalError::syntax("if statement without a condition"))
    }

    fn parse_branch(&self, pair: Pair<Rule>) -> Result<Vec<Stmt>, EvalError> {
        let inner = next(&mut pair.into_inner())?;
        match inner.as_rule() {
            Rule::block => self.parse_statements(inner.into_inner()),
            _ => Ok(vec![self.parse_statement(inner)?]),
        }
    }

    fn parse_expr(&self, pair: Pair<Rule>) -> Result<Expr, EvalError> {
        self.parse_node(pair).map(|(expr, _)| expr)
    }

    fn parse_node(&self, pair: Pair<Rule>) -> Result<Node, EvalError> {
        match pair.as_rule() {
            Rule::expr => self.parse_node(next(&mut pair.into_inner())?),
            Rule::arrow => self.parse_arrow(pair),
            Rule::ternary => self.parse_ternary(pair),
            Rule::binary => self.parse_binary(pair),
            Rule::postfix => self.parse_postfix(pair),
            Rule::number => Ok((Expr::Number(parse_number(pair.as_str())?), 1)),
            Rule::string => Ok((Expr::Str(Rc::from(parse_string(pair)?)), 1)),
            Rule::boolean => Ok((Expr::Bool(pair.as_str() == "true"), 1)),
            Rule::null => Ok((Expr::Null, 1)),
            Rule::undefined => Ok((Expr::Undefined, 1)),
            Rule::ident => Ok((Expr::Ident(pair.as_str().to_string()), 1)),
            Rule::array => {
                let mut items = Vec::new();
                let mut height = 0;
                for item in pair.into_inner() {
                    let (item, item_height) = self.parse_node(item)?;
                    height = height.max(item_height);
                    items.push(item);
                }
                self.nested(Expr::Array(items), height + 1)
            }
            Rule::object => self.parse_object(pair),
            rule => Err(unexpected(rule)),
        }
    }

    fn parse_arrow(&self, pair: Pair<Rule>) -> Result<Node, EvalError> {
        let mut params = Vec::new();
        let mut body = None;
        for part in pair.into_inner() {
            match part.as_rule() {
                Rule::params => params.push(
                    part.into_inner()
                        .map(|name| name.as_str().to_string())
                        .collect::<Vec<_>>(),
                ),
                Rule::block => body = Some((ArrowBody::Block(self.parse_statements(part.into_inner())?), 1)),
                _ => {
                    let (expr, height) = self.parse_node(part)?;
                    body = Some((ArrowBody::Expr(expr), height));
                }
            }
        }

        let (body, height) = body.ok_or_else(|| EvalError::syntax("arrow function without a body"))?;
        let innermost = params
            .pop()
            .ok_or_else(|| EvalError::syntax("arrow function without parameters"))?;

        // `a => b => a + b` nests right to left.
        let (mut expr, mut height) =
            self.nested(Expr::Arrow(Rc::new(Arrow { params: innermost, body })), height + 1)?;
        while let Some(names) = params.pop() {
            let arrow = Arrow {
                params: names,
                body: ArrowBody::Expr(expr),
            };
            (expr, height) = self.nested(Expr::Arrow(Rc::new(arrow)), height + 1)?;
        }
        Ok((expr, height))
    }

    fn parse_ternary(&self, pair: Pair<Rule>) -> Result<Node, EvalError> {
        let mut parts = pair
            .into_inner()
            .map(|part| self.parse_node(part))
            .collect::<Result<Vec<_>, _>>()?;
        let (mut expr, mut height) = parts
            .pop()
            .ok_or_else(|| EvalError::syntax("empty expression"))?;

        // `a ? b : c ? d : e` folds from the right.
        while let Some((consequent, consequent_height)) = parts.pop() {
            let (test, test_height) = parts
                .pop()
                .ok_or_else(|| EvalError::syntax("incomplete conditional"))?;
            let conditional = Expr::Conditional {
                test: Box::new(test),
                consequent: Box::new(consequent),
                alternate: Box::new(expr),
            };
            (expr, height) = self.nested(
                conditional,
                1 + height.max(consequent_height).max(test_height),
            )?;
        }
        Ok((expr, height))
    }

    fn parse_binary(&self, pair: Pair<Rule>) -> Result<Node, EvalError> {
        PRATT
            .map_primary(|primary| self.parse_node(primary))
            .map_prefix(|op, operand| {
                let (operand, height) = operand?;
                let op = match op.as_rule() {
                    Rule::not => UnaryOp::Not,
                    Rule::neg => UnaryOp::Neg,
                    Rule::pos => UnaryOp::Plus,
                    Rule::typeof_op => UnaryOp::TypeOf,
                    rule => return Err(unexpected(rule)),
                };
                let unary = Expr::Unary {
                    op,
                    operand: Box::new(operand),
                };
                self.nested(unary, height + 1)
            })
            .map_infix(|left, op, right| {
                let (left, left_height) = left?;
                let (right, right_height) = right?;
                let expr = match op.as_rule() {
                    Rule::nullish => logical_expr(LogicalOp::Nullish, left, right),
                    Rule::or => logical_expr(LogicalOp::Or, left, right),
                    Rule::and => logical_expr(LogicalOp::And, left, right),
                    Rule::eq => binary_expr(BinaryOp::Eq, left, right),
                    Rule::ne => binary_expr(BinaryOp::NotEq, left, right),
                    Rule::strict_eq => binary_expr(BinaryOp::StrictEq, left, right),
                    Rule::strict_ne => binary_expr(BinaryOp::StrictNotEq, left, right),
                    Rule::lt => binary_expr(BinaryOp::Lt, left, right),
                    Rule::le => binary_expr(BinaryOp::LtEq, left, right),
                    Rule::gt => binary_expr(BinaryOp::Gt, left, right),
                    Rule::ge => binary_expr(BinaryOp::GtEq, left, right),
                    Rule::add => binary_expr(BinaryOp::Add, left, right),
                    Rule::sub => binary_expr(BinaryOp::Sub, left, right),
                    Rule::mul => binary_expr(BinaryOp::Mul, left, right),
                    Rule::div => binary_expr(BinaryOp::Div, left, right),
                    Rule::rem => binary_expr(BinaryOp::Rem, left, right),
                    rule => return Err(unexpected(rule)),
                };
                self.nested(expr, 1 + left_height.max(right_height))
            })
            .parse(pair.into_inner())
    }

    fn parse_postfix(&self, pair: Pair<Rule>) -> Result<Node, EvalError> {
        let mut inner = pair.into_inner();
        let (mut expr, mut height) = self.parse_node(next(&mut inner)?)?;

        for suffix in inner {
            let rule = suffix.as_rule();
            let (wrapped, child_height) = match rule {
                Rule::member | Rule::opt_member => {
                    let property = next(&mut suffix.into_inner())?.as_str().to_string();
                    let member = Expr::Member {
                        object: Box::new(expr),
                        property,
                        optional: rule == Rule::opt_member,
                    };
                    (member, 0)
                }
                Rule::index | Rule::opt_index => {
                    let (index, index_height) = self.parse_node(next(&mut suffix.into_inner())?)?;
                    let index = Expr::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                        optional: rule == Rule::opt_index,
                    };
                    (index, index_height)
                }
                Rule::call => {
                    let mut args = Vec::new();
                    let mut args_height = 0;
                    for arg in suffix.into_inner() {
                        let (arg, arg_height) = self.parse_node(arg)?;
                        args_height = args_height.max(arg_height);
                        args.push(arg);
                    }
                    let call = Expr::Call {
                        callee: Box::new(expr),
                        args,
                    };
                    (call, args_height)
                }
                rule => return Err(unexpected(rule)),
            };
            (expr, height) = self.nested(wrapped, 1 + height.max(child_height))?;
        }
        Ok((expr, height))
    }

    fn parse_object(&self, pair: Pair<Rule>) -> Result<Node, EvalError> {
        let mut entries = Vec::new();
        let mut height = 0;

        for entry in pair.into_inner() {
            let mut parts = entry.into_inner();
            let key_pair = next(&mut parts)?;
            let key_rule = key_pair.as_rule();
            let key = match key_rule {
                Rule::string => parse_string(key_pair)?,
                Rule::number => format_number(parse_number(key_pair.as_str())?),
                _ => key_pair.as_str().to_string(),
            };

            let value = match parts.next() {
                Some(value) => {
                    let (value, value_height) = self.parse_node(value)?;
                    height = height.max(value_height);
                    value
                }
                None if key_rule == Rule::name => Expr::Ident(key.clone()),
                None => {
                    return Err(EvalError::syntax(format!(
                        "expected ':' after property key '{key}'"
                    )))
                }
            };
            entries.push((key, value));
        }
        self.nested(Expr::Object(entries), height + 1)
    }
}

fn next<'i>(pairs: &mut impl Iterator<Item = Pair<'i, Rule>>) -> Result<Pair<'i, Rule>, EvalError> {
    pairs
        .next()
        .ok_or_else(|| EvalError::syntax("unexpected end of input"))
}

fn parse_number(raw: &str) -> Result<f64, EvalError> {
    raw.replace('_', "")
        .parse()
        .map_err(|_| EvalError::syntax(format!("invalid number '{raw}'")))
}

fn parse_string(pair: Pair<Rule>) -> Result<String, EvalError> {
    let raw = pair.into_inner().next().map(|chars| chars.as_str()).unwrap_or("");
    unescape(raw)
}

fn unescape(raw: &str) -> Result<String, EvalError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                let decoded = u32::from_str_radix(&hex, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| EvalError::syntax(format!("invalid unicode escape '\\u{hex}'")))?;
                out.push(decoded);
            }
            Some(other) => out.push(other),
            None => return Err(EvalError::syntax("unterminated escape sequence")),
        }
    }
    Ok(out)
}

/// Deepest bracket nesting outside strings and comments.
fn bracket_depth(source: &str) -> usize {
    let mut depth = 0usize;
    let mut deepest = 0;
    let mut chars = source.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '(' | '[' | '{' => {
                depth += 1;
                deepest = deepest.max(depth);
            }
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            '"' | '\'' => {
                while let Some(next) = chars.next() {
                    match next {
                        '\\' => {
                            chars.next();
                        }
                        '\n' => break,
                        quote if quote == c => break,
                        _ => {}
                    }
                }
            }
            '/' if chars.peek() == Some(&'/') => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = ' ';
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
            }
            _ => {}
        }
    }
    deepest
}

fn too_deep() -> EvalError {
    EvalError::syntax("expression nested too deeply")
}

fn unexpected(rule: Rule) -> EvalError {
    EvalError::syntax(format!("unexpected {}", describe(rule)))
}

fn binary_expr(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn logical_expr(op: LogicalOp, left: Expr, right: Expr) -> Expr {
    Expr::Logical {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn describe(rule: Rule) -> String {
    let name = match rule {
        Rule::EOI => "end of input",
        Rule::expr | Rule::ternary | Rule::binary | Rule::postfix => "expression",
        Rule::ident => "identifier",
        Rule::name => "property name",
        Rule::number => "number",
        Rule::string => "string",
        Rule::params => "parameters",
        Rule::block => "block",
        Rule::let_stmt | Rule::return_stmt | Rule::if_stmt | Rule::expr_stmt => "statement",
        Rule::kw_else => "'else'",
        Rule::call => "'('",
        Rule::index | Rule::opt_index => "'['",
        Rule::member | Rule::opt_member => "'.'",
        Rule::not | Rule::neg | Rule::pos | Rule::typeof_op => "unary operator",
        Rule::nullish
        | Rule::or
        | Rule::and
        | Rule::strict_eq
        | Rule::strict_ne
        | Rule::eq
        | Rule::ne
        | Rule::le
        | Rule::ge
        | Rule::lt
        | Rule::gt
        | Rule::add
        | Rule::sub
        | Rule::mul
        | Rule::div
        | Rule::rem => "operator",
        other => return format!("{other:?}"),
    };
    name.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse_expr(source: &str) -> Expr {
        let program = parse(source, 64).unwrap();
        match program.body.into_iter().next() {
            Some(Stmt::Expr(expr)) => expr,
            other => panic!("expected expression statement, got {other:?}"),
        }
    }

    #[test]
    fn test_precedence() {
        let expr = parse_expr("1 + 2 * 3");
        assert_eq!(
            expr,
            binary_expr(
                BinaryOp::Add,
                Expr::Number(1.0),
                binary_expr(BinaryOp::Mul, Expr::Number(2.0), Expr::Number(3.0))
            )
        );
    }

    #[test]
    fn test_left_associative_and_logical_layers() {
        let expr = parse_expr("a - b - c");
        assert_eq!(
            expr,
            binary_expr(
                BinaryOp::Sub,
                binary_expr(BinaryOp::Sub, Expr::Ident("a".into()), Expr::Ident("b".into())),
                Expr::Ident("c".into())
            )
        );

        let expr = parse_expr("a ?? b || c && !d");
        let Expr::Logical { op, right, .. } = expr else {
            panic!("expected logical");
        };
        assert_eq!(op, LogicalOp::Nullish);
        assert!(matches!(*right, Expr::Logical { op: LogicalOp::Or, .. }));
    }

    #[test]
    fn test_unary_binds_tighter_than_binary() {
        let expr = parse_expr("-a * typeof b");
        let Expr::Binary { op, left, right } = expr else {
            panic!("expected binary");
        };
        assert_eq!(op, BinaryOp::Mul);
        assert!(matches!(*left, Expr::Unary { op: UnaryOp::Neg, .. }));
        assert!(matches!(*right, Expr::Unary { op: UnaryOp::TypeOf, .. }));
    }

    #[test]
    fn test_arrow_forms() {
        assert!(matches!(parse_expr("x => x + 1"), Expr::Arrow(_)));
        assert!(matches!(parse_expr("(a, b) => a + b"), Expr::Arrow(_)));
        assert!(matches!(parse_expr("() => 1"), Expr::Arrow(_)));

        let Expr::Arrow(arrow) = parse_expr("(r) => { let x = r.a; return x * 2; }") else {
            panic!("expected arrow");
        };
        assert_eq!(arrow.params, vec!["r"]);
        assert!(matches!(&arrow.body, ArrowBody::Block(stmts) if stmts.len() == 2));
    }

    #[test]
    fn test_curried_arrow() {
        let Expr::Arrow(outer) = parse_expr("a => b => a + b") else {
            panic!("expected arrow");
        };
        assert_eq!(outer.params, vec!["a"]);
        let ArrowBody::Expr(Expr::Arrow(inner)) = &outer.body else {
            panic!("expected nested arrow");
        };
        assert_eq!(inner.params, vec!["b"]);
    }

    #[test]
    fn test_parenthesized_expression_is_not_arrow() {
        assert!(matches!(
            parse_expr("(1 + 2) * 3"),
            Expr::Binary {
                op: BinaryOp::Mul,
                ..
            }
        ));
    }

    #[test]
    fn test_method_chain() {
        let expr = parse_expr("data.filter(r => r?.age >= 30).length");
        let Expr::Member { property, object, .. } = expr else {
            panic!("expected member");
        };
        assert_eq!(property, "length");
        assert!(matches!(*object, Expr::Call { .. }));
    }

    #[test]
    fn test_optional_access() {
        let Expr::Index { optional, object, .. } = parse_expr("a?.b?.[0]") else {
            panic!("expected index");
        };
        assert!(optional);
        assert!(matches!(*object, Expr::Member { optional: true, .. }));
    }

    #[test]
    fn test_nested_conditional() {
        let Expr::Conditional { alternate, .. } = parse_expr("a ? 1 : b ? 2 : 3") else {
            panic!("expected conditional");
        };
        assert!(matches!(*alternate, Expr::Conditional { .. }));
    }

    #[test]
    fn test_object_literal_shorthand() {
        let expr = parse_expr("({ total, avg: 2, 'x y': 3, 1.50: 4 })");
        let Expr::Object(entries) = expr else {
            panic!("expected object");
        };
        assert_eq!(entries[0], ("total".to_string(), Expr::Ident("total".into())));
        assert_eq!(entries[2].0, "x y");
        assert_eq!(entries[3].0, "1.5");
    }

    #[test]
    fn test_comments_skipped() {
        let expr = parse_expr("1 // trailing\n /* block */ + 2");
        assert_eq!(
            expr,
            binary_expr(BinaryOp::Add, Expr::Number(1.0), Expr::Number(2.0))
        );
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(parse_expr(r"'it\'s'"), Expr::Str("it's".into()));
        assert_eq!(parse_expr(r#""a\nb""#), Expr::Str("a\nb".into()));
        assert_eq!(parse_expr(r#""\u0041""#), Expr::Str("A".into()));
        assert_eq!(parse_expr("''"), Expr::Str("".into()));
    }

    #[test]
    fn test_numbers() {
        assert_eq!(parse_expr("1_000"), Expr::Number(1000.0));
        assert_eq!(parse_expr(".5"), Expr::Number(0.5));
        assert_eq!(parse_expr("2e3"), Expr::Number(2000.0));
    }

    #[test]
    fn test_strict_equality() {
        let Expr::Binary { op, left, .. } = parse_expr("a === b !== c") else {
            panic!("expected binary");
        };
        assert_eq!(op, BinaryOp::StrictNotEq);
        assert!(matches!(*left, Expr::Binary { op: BinaryOp::StrictEq, .. }));
    }

    #[test]
    fn test_statements() {
        let program = parse("const n = data.length; if (n > 2) { return n } else return 0;", 64).unwrap();
        assert_eq!(program.body.len(), 2);
        assert!(matches!(program.body[1], Stmt::If { .. }));
    }

    #[test]
    fn test_else_if_chain() {
        let program = parse("if (a) return 1; else if (b) return 2; else return 3", 64).unwrap();
        let [Stmt::If { alternate, .. }] = program.body.as_slice() else {
            panic!("expected a single if statement");
        };
        let [Stmt::If { alternate: last, .. }] = alternate.as_slice() else {
            panic!("expected nested if");
        };
        assert_eq!(last, &vec![Stmt::Return(Some(Expr::Number(3.0)))]);
    }

    #[test]
    fn test_keyword_prefixed_identifiers() {
        let program = parse("let letter = 1; returned + iffy + constant", 64).unwrap();
        assert_eq!(program.body.len(), 2);
        assert!(matches!(&program.body[0], Stmt::Let { name, .. } if name == "letter"));
    }

    #[test]
    fn test_depth_limit() {
        let nested = format!("{}1{}", "(".repeat(100), ")".repeat(100));
        let err = parse(&nested, 64).unwrap_err();
        assert!(err.to_string().contains("nested too deeply"));
    }

    #[test]
    fn test_depth_limit_counts_operator_chains() {
        let chain = vec!["1"; 100].join(" + ");
        let err = parse(&chain, 64).unwrap_err();
        assert!(err.to_string().contains("nested too deeply"));

        let members = format!("data{}", ".x".repeat(100));
        assert!(parse(&members, 64).is_err());
        assert!(parse(&vec!["1"; 30].join(" + "), 64).is_ok());
    }

    #[test]
    fn test_brackets_inside_strings_do_not_count() {
        let source = format!("'{}' + \"{}\" // {}", "(".repeat(100), "[".repeat(100), "{".repeat(100));
        assert!(parse(&source, 64).is_ok());
    }

    #[test]
    fn test_rejects_unsupported_keywords() {
        assert!(parse("new Date()", 64).is_err());
        assert!(parse("function f() {}", 64).is_err());
        assert!(parse("while (true) {}", 64).is_err());
    }

    #[test]
    fn test_syntax_errors() {
        assert!(parse("data.map(", 64).is_err());
        assert!(parse("let = 3", 64).is_err());
        assert!(parse("a ? b", 64).is_err());
        assert!(parse("'open", 64).is_err());
        assert!(parse("a # b", 64).is_err());
        assert!(parse("/* never closed", 64).is_err());
        assert!(parse("!!!!!!!!!x", 64).is_err());
    }

    #[test]
    fn test_syntax_error_reports_position() {
        let err = parse("let x = 1;\nx +", 64).unwrap_err();
        let EvalError::Syntax(message) = err else {
            panic!("expected syntax error, got {err:?}");
        };
        assert!(message.contains("line 2"), "{message}");
    }
}

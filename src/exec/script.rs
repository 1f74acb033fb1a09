//! Tokenizer and parser for the restricted script dialect the executor
//! accepts: imports, assignments, and expression statements built from
//! names, literals, attribute access, subscripts, calls with keyword
//! arguments, arithmetic, and comparisons. Control flow and definitions
//! are rejected up front so the failure is visible per code block.

use crate::error::{Result, VizError};

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Name(String),
    Str(String),
    FStr(String),
    Int(i64),
    Float(f64),
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Dot,
    Colon,
    Assign,
    Plus,
    Minus,
    Star,
    Slash,
    EqEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Newline,
}

const REJECTED_KEYWORDS: &[&str] = &[
    "for", "while", "if", "elif", "else", "def", "class", "with", "try", "except", "lambda",
    "return", "yield", "global", "del", "assert", "raise",
];

fn err(message: impl Into<String>) -> VizError {
    VizError::Execution(message.into())
}

pub fn tokenize(code: &str) -> Result<Vec<Tok>> {
    let mut tokens = Vec::new();
    let mut chars = code.chars().peekable();
    let mut depth: i32 = 0;
    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\r' => {
                chars.next();
            }
            '\n' => {
                chars.next();
                if depth == 0 {
                    tokens.push(Tok::Newline);
                }
            }
            '#' => {
                while let Some(&c) = chars.peek() {
                    if c == '\n' {
                        break;
                    }
                    chars.next();
                }
            }
            '\'' | '"' => {
                chars.next();
                tokens.push(Tok::Str(read_string(&mut chars, c)?));
            }
            '(' => {
                chars.next();
                depth += 1;
                tokens.push(Tok::LParen);
            }
            ')' => {
                chars.next();
                depth -= 1;
                tokens.push(Tok::RParen);
            }
            '[' => {
                chars.next();
                depth += 1;
                tokens.push(Tok::LBracket);
            }
            ']' => {
                chars.next();
                depth -= 1;
                tokens.push(Tok::RBracket);
            }
            '{' => {
                chars.next();
                depth += 1;
                tokens.push(Tok::LBrace);
            }
            '}' => {
                chars.next();
                depth -= 1;
                tokens.push(Tok::RBrace);
            }
            ',' => {
                chars.next();
                tokens.push(Tok::Comma);
            }
            '.' => {
                chars.next();
                tokens.push(Tok::Dot);
            }
            ':' => {
                chars.next();
                tokens.push(Tok::Colon);
            }
            '+' => {
                chars.next();
                tokens.push(Tok::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Tok::Minus);
            }
            '*' => {
                chars.next();
                tokens.push(Tok::Star);
            }
            '/' => {
                chars.next();
                tokens.push(Tok::Slash);
            }
            '=' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Tok::EqEq);
                } else {
                    tokens.push(Tok::Assign);
                }
            }
            '!' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Tok::NotEq);
                } else {
                    return Err(err("unexpected character '!'"));
                }
            }
            '<' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Tok::LtEq);
                } else {
                    tokens.push(Tok::Lt);
                }
            }
            '>' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Tok::GtEq);
                } else {
                    tokens.push(Tok::Gt);
                }
            }
            c if c.is_ascii_digit() => {
                let mut text = String::new();
                let mut is_float = false;
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_digit() || c == '_' {
                        if c != '_' {
                            text.push(c);
                        }
                        chars.next();
                    } else if c == '.' && !is_float {
                        is_float = true;
                        text.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if is_float {
                    let value = text
                        .parse::<f64>()
                        .map_err(|_| err(format!("invalid number literal: {}", text)))?;
                    tokens.push(Tok::Float(value));
                } else {
                    let value = text
                        .parse::<i64>()
                        .map_err(|_| err(format!("invalid number literal: {}", text)))?;
                    tokens.push(Tok::Int(value));
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut name = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        name.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                // f-string prefix
                if name == "f" && matches!(chars.peek(), Some('\'') | Some('"')) {
                    let quote = *chars.peek().ok_or_else(|| err("unterminated f-string"))?;
                    chars.next();
                    tokens.push(Tok::FStr(read_string(&mut chars, quote)?));
                } else if REJECTED_KEYWORDS.contains(&name.as_str()) {
                    return Err(err(format!(
                        "unsupported statement: '{}' is not available in the execution sandbox",
                        name
                    )));
                } else {
                    tokens.push(Tok::Name(name));
                }
            }
            other => {
                return Err(err(format!("unexpected character '{}'", other)));
            }
        }
    }
    Ok(tokens)
}

fn read_string(chars: &mut std::iter::Peekable<std::str::Chars>, quote: char) -> Result<String> {
    let mut out = String::new();
    loop {
        match chars.next() {
            None => return Err(err("unterminated string literal")),
            Some(c) if c == quote => return Ok(out),
            Some('\\') => match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('\\') => out.push('\\'),
                Some('\'') => out.push('\''),
                Some('"') => out.push('"'),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => return Err(err("unterminated string literal")),
            },
            Some(c) => out.push(c),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FPart {
    Text(String),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Str(String),
    FString(Vec<FPart>),
    Int(i64),
    Float(f64),
    Bool(bool),
    NoneLit,
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    Name(String),
    Attr {
        base: Box<Expr>,
        name: String,
    },
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
    },
    Neg(Box<Expr>),
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

/// Assignment target: a plain name or a subscript on a name.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Name(String),
    Subscript { name: String, key: Expr },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Import {
        module: String,
        alias: Option<String>,
    },
    FromImport {
        module: String,
        item: String,
        alias: Option<String>,
    },
    Assign {
        targets: Vec<Target>,
        value: Expr,
    },
    Expr(Expr),
}

pub fn parse(code: &str) -> Result<Vec<Stmt>> {
    let tokens = tokenize(code)?;
    Parser { tokens, pos: 0 }.program()
}

struct Parser {
    tokens: Vec<Tok>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Tok> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: Tok) -> Result<()> {
        if self.eat(&tok) {
            Ok(())
        } else {
            Err(err(format!("expected {:?}, found {:?}", tok, self.peek())))
        }
    }

    fn expect_name(&mut self) -> Result<String> {
        match self.next() {
            Some(Tok::Name(name)) => Ok(name),
            other => Err(err(format!("expected name, found {:?}", other))),
        }
    }

    fn program(&mut self) -> Result<Vec<Stmt>> {
        let mut statements = Vec::new();
        while self.peek().is_some() {
            if self.eat(&Tok::Newline) {
                continue;
            }
            statements.push(self.statement()?);
            if self.peek().is_some() {
                self.expect(Tok::Newline)?;
            }
        }
        Ok(statements)
    }

    fn statement(&mut self) -> Result<Stmt> {
        if let Some(Tok::Name(word)) = self.peek() {
            match word.as_str() {
                "import" => return self.import_stmt(),
                "from" => return self.from_import_stmt(),
                _ => {}
            }
        }
        // comma-separated expressions, then either '=' (assignment) or end
        let mut parts = vec![self.expression()?];
        while self.eat(&Tok::Comma) {
            parts.push(self.expression()?);
        }
        if self.eat(&Tok::Assign) {
            let targets = parts
                .into_iter()
                .map(to_target)
                .collect::<Result<Vec<_>>>()?;
            let mut values = vec![self.expression()?];
            while self.eat(&Tok::Comma) {
                values.push(self.expression()?);
            }
            let value = if values.len() == 1 {
                values.remove(0)
            } else {
                Expr::Tuple(values)
            };
            Ok(Stmt::Assign { targets, value })
        } else if parts.len() == 1 {
            Ok(Stmt::Expr(parts.remove(0)))
        } else {
            Ok(Stmt::Expr(Expr::Tuple(parts)))
        }
    }

    fn import_stmt(&mut self) -> Result<Stmt> {
        self.pos += 1; // import
        let module = self.dotted_name()?;
        let alias = if self.eat(&Tok::Name("as".to_string())) {
            Some(self.expect_name()?)
        } else {
            None
        };
        Ok(Stmt::Import { module, alias })
    }

    fn from_import_stmt(&mut self) -> Result<Stmt> {
        self.pos += 1; // from
        let module = self.dotted_name()?;
        self.expect(Tok::Name("import".to_string()))?;
        let item = self.expect_name()?;
        let alias = if self.eat(&Tok::Name("as".to_string())) {
            Some(self.expect_name()?)
        } else {
            None
        };
        Ok(Stmt::FromImport {
            module,
            item,
            alias,
        })
    }

    fn dotted_name(&mut self) -> Result<String> {
        let mut name = self.expect_name()?;
        while self.eat(&Tok::Dot) {
            name.push('.');
            name.push_str(&self.expect_name()?);
        }
        Ok(name)
    }

    fn expression(&mut self) -> Result<Expr> {
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr> {
        let left = self.additive()?;
        let op = match self.peek() {
            Some(Tok::EqEq) => BinOp::Eq,
            Some(Tok::NotEq) => BinOp::Ne,
            Some(Tok::Lt) => BinOp::Lt,
            Some(Tok::LtEq) => BinOp::Le,
            Some(Tok::Gt) => BinOp::Gt,
            Some(Tok::GtEq) => BinOp::Ge,
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.additive()?;
        Ok(Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn additive(&mut self) -> Result<Expr> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Plus) => BinOp::Add,
                Some(Tok::Minus) => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let right = self.multiplicative()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn multiplicative(&mut self) -> Result<Expr> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Star) => BinOp::Mul,
                Some(Tok::Slash) => BinOp::Div,
                _ => break,
            };
            self.pos += 1;
            let right = self.unary()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.eat(&Tok::Minus) {
            Ok(Expr::Neg(Box::new(self.unary()?)))
        } else {
            self.postfix()
        }
    }

    fn postfix(&mut self) -> Result<Expr> {
        let mut expr = self.atom()?;
        loop {
            if self.eat(&Tok::Dot) {
                let name = self.expect_name()?;
                expr = Expr::Attr {
                    base: Box::new(expr),
                    name,
                };
            } else if self.eat(&Tok::LParen) {
                expr = self.call(expr)?;
            } else if self.eat(&Tok::LBracket) {
                let index = self.expression()?;
                self.expect(Tok::RBracket)?;
                expr = Expr::Index {
                    base: Box::new(expr),
                    index: Box::new(index),
                };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn call(&mut self, callee: Expr) -> Result<Expr> {
        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        if !self.eat(&Tok::RParen) {
            loop {
                // keyword argument: name '=' expr
                if let (Some(Tok::Name(name)), Some(Tok::Assign)) =
                    (self.tokens.get(self.pos), self.tokens.get(self.pos + 1))
                {
                    let name = name.clone();
                    self.pos += 2;
                    kwargs.push((name, self.expression()?));
                } else {
                    if !kwargs.is_empty() {
                        return Err(err("positional argument after keyword argument"));
                    }
                    args.push(self.expression()?);
                }
                if self.eat(&Tok::RParen) {
                    break;
                }
                self.expect(Tok::Comma)?;
                // trailing comma
                if self.eat(&Tok::RParen) {
                    break;
                }
            }
        }
        Ok(Expr::Call {
            callee: Box::new(callee),
            args,
            kwargs,
        })
    }

    fn atom(&mut self) -> Result<Expr> {
        match self.next() {
            Some(Tok::Str(s)) => Ok(Expr::Str(s)),
            Some(Tok::FStr(raw)) => Ok(Expr::FString(parse_fstring(&raw)?)),
            Some(Tok::Int(v)) => Ok(Expr::Int(v)),
            Some(Tok::Float(v)) => Ok(Expr::Float(v)),
            Some(Tok::Name(name)) => match name.as_str() {
                "True" => Ok(Expr::Bool(true)),
                "False" => Ok(Expr::Bool(false)),
                "None" => Ok(Expr::NoneLit),
                _ => Ok(Expr::Name(name)),
            },
            Some(Tok::LParen) => {
                let mut items = vec![self.expression()?];
                let mut is_tuple = false;
                while self.eat(&Tok::Comma) {
                    is_tuple = true;
                    if self.peek() == Some(&Tok::RParen) {
                        break;
                    }
                    items.push(self.expression()?);
                }
                self.expect(Tok::RParen)?;
                if is_tuple {
                    Ok(Expr::Tuple(items))
                } else {
                    Ok(items.remove(0))
                }
            }
            Some(Tok::LBracket) => {
                let mut items = Vec::new();
                if !self.eat(&Tok::RBracket) {
                    loop {
                        items.push(self.expression()?);
                        if self.eat(&Tok::RBracket) {
                            break;
                        }
                        self.expect(Tok::Comma)?;
                        if self.eat(&Tok::RBracket) {
                            break;
                        }
                    }
                }
                Ok(Expr::List(items))
            }
            Some(Tok::LBrace) => {
                let mut entries = Vec::new();
                if !self.eat(&Tok::RBrace) {
                    loop {
                        let key = self.expression()?;
                        self.expect(Tok::Colon)?;
                        let value = self.expression()?;
                        entries.push((key, value));
                        if self.eat(&Tok::RBrace) {
                            break;
                        }
                        self.expect(Tok::Comma)?;
                        if self.eat(&Tok::RBrace) {
                            break;
                        }
                    }
                }
                Ok(Expr::Dict(entries))
            }
            other => Err(err(format!("unexpected token {:?}", other))),
        }
    }
}

fn to_target(expr: Expr) -> Result<Target> {
    match expr {
        Expr::Name(name) => Ok(Target::Name(name)),
        Expr::Index { base, index } => match *base {
            Expr::Name(name) => Ok(Target::Subscript { name, key: *index }),
            _ => Err(err("unsupported assignment target")),
        },
        _ => Err(err("unsupported assignment target")),
    }
}

fn parse_fstring(raw: &str) -> Result<Vec<FPart>> {
    let mut parts = Vec::new();
    let mut text = String::new();
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' => {
                if chars.peek() == Some(&'{') {
                    chars.next();
                    text.push('{');
                    continue;
                }
                if !text.is_empty() {
                    parts.push(FPart::Text(std::mem::take(&mut text)));
                }
                let mut fragment = String::new();
                let mut depth = 1;
                for c in chars.by_ref() {
                    match c {
                        '{' => depth += 1,
                        '}' => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        _ => {}
                    }
                    fragment.push(c);
                }
                if depth != 0 {
                    return Err(err("unterminated expression in f-string"));
                }
                // format specs are not interpreted
                let fragment = match fragment.split_once(':') {
                    Some((expr, _)) => expr.to_string(),
                    None => fragment,
                };
                let tokens = tokenize(&fragment)?;
                let mut parser = Parser { tokens, pos: 0 };
                let expr = parser.expression()?;
                if parser.peek().is_some() {
                    return Err(err("invalid expression in f-string"));
                }
                parts.push(FPart::Expr(expr));
            }
            '}' => {
                if chars.peek() == Some(&'}') {
                    chars.next();
                }
                text.push('}');
            }
            other => text.push(other),
        }
    }
    if !text.is_empty() {
        parts.push(FPart::Text(text));
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_imports_and_aliases() {
        let stmts = parse("import pandas as pd\nimport matplotlib.pyplot as plt").unwrap();
        assert_eq!(
            stmts[0],
            Stmt::Import {
                module: "pandas".to_string(),
                alias: Some("pd".to_string())
            }
        );
        assert_eq!(
            stmts[1],
            Stmt::Import {
                module: "matplotlib.pyplot".to_string(),
                alias: Some("plt".to_string())
            }
        );
    }

    #[test]
    fn parses_subscript_assignment_and_call() {
        let stmts = parse("df['month'] = pd.to_datetime(df['date'], format='mixed')").unwrap();
        match &stmts[0] {
            Stmt::Assign { targets, value } => {
                assert_eq!(targets.len(), 1);
                assert!(matches!(&targets[0], Target::Subscript { name, .. } if name == "df"));
                match value {
                    Expr::Call { kwargs, .. } => {
                        assert_eq!(kwargs[0].0, "format");
                    }
                    other => panic!("expected call, got {:?}", other),
                }
            }
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn parses_tuple_assignment() {
        let stmts = parse("fig, ax = plt.subplots(figsize=(10, 6))").unwrap();
        match &stmts[0] {
            Stmt::Assign { targets, .. } => {
                assert_eq!(
                    targets,
                    &[
                        Target::Name("fig".to_string()),
                        Target::Name("ax".to_string())
                    ]
                );
            }
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn newlines_inside_parens_are_continuation() {
        let stmts = parse("x = px.bar(\n    df,\n    x='month',\n    y='total',\n)").unwrap();
        assert_eq!(stmts.len(), 1);
    }

    #[test]
    fn rejects_control_flow() {
        let e = parse("for i in range(3):\n    print(i)").unwrap_err();
        assert!(e.to_string().contains("unsupported statement"));
    }

    #[test]
    fn parses_comparison_filter() {
        let stmts = parse("df = df[df['sales'] > 100]").unwrap();
        match &stmts[0] {
            Stmt::Assign { value, .. } => match value {
                Expr::Index { index, .. } => {
                    assert!(matches!(**index, Expr::Binary { op: BinOp::Gt, .. }));
                }
                other => panic!("expected subscript, got {:?}", other),
            },
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn parses_fstring_fragments() {
        let stmts = parse("print(f'total: {total}')").unwrap();
        match &stmts[0] {
            Stmt::Expr(Expr::Call { args, .. }) => match &args[0] {
                Expr::FString(parts) => {
                    assert_eq!(parts[0], FPart::Text("total: ".to_string()));
                    assert_eq!(parts[1], FPart::Expr(Expr::Name("total".to_string())));
                }
                other => panic!("expected f-string, got {:?}", other),
            },
            other => panic!("expected call, got {:?}", other),
        }
    }
}

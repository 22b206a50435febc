//! Field templates evaluated against the normalized report data.
//!
//! A template is literal text with `{{ ... }}` actions in it. Each action is a
//! pipeline: a field path (or a string literal) followed by `| function args`
//! stages, e.g.
//!
//! ```text
//! {{ .sbomReport.report.artifact.repository }}:{{ .sbomReport.report.artifact.tag | default "latest" }}
//! {{ .sbomReport.metadata.labels["trivy-operator.resource.name"] | lower }}
//! ```
//!
//! Supported functions: `default`, `lower`, `upper`, `trim`, `trimPrefix`,
//! `trimSuffix` and `replace`.

use serde_json::Value;
use std::fmt::{Display, Formatter};
use thiserror::Error;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("invalid template {template:?} at offset {offset}: {reason}")]
    Syntax {
        template: String,
        offset: usize,
        reason: String,
    },

    #[error("field {path} is missing from the report and no default is defined")]
    MissingField { path: String },

    #[error("template for {field} rendered an empty value")]
    EmptyValue { field: &'static str },
}

/// Parses `expression` and renders it against `data` in one go.
pub fn render(expression: &str, data: &Value) -> Result<String, TemplateError> {
    Template::parse(expression)?.render(data)
}

/// A parsed template. Parsing never looks at report data, rendering never
/// mutates the template, so one template can be rendered against any number of
/// reports.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    parts: Vec<Part>,
}

#[derive(Debug, Clone, PartialEq)]
enum Part {
    Text(String),
    Action(Pipeline),
}

#[derive(Debug, Clone, PartialEq)]
struct Pipeline {
    operand: Operand,
    stages: Vec<Function>,
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Path(Path),
    Literal(String),
}

#[derive(Debug, Clone, PartialEq)]
struct Path(Vec<Segment>);

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Key(String),
    Index(usize),
}

#[derive(Debug, Clone, PartialEq)]
enum Function {
    Default(String),
    Lower,
    Upper,
    Trim,
    TrimPrefix(String),
    TrimSuffix(String),
    Replace(String, String),
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut parts = vec![];
        let mut pos = 0;
        while pos < source.len() {
            match source[pos..].find(OPEN) {
                None => {
                    parts.push(Part::Text(source[pos..].to_string()));
                    break;
                }
                Some(start) => {
                    if start > 0 {
                        parts.push(Part::Text(source[pos..pos + start].to_string()));
                    }
                    let mut lexer = Lexer::new(source, pos + start + OPEN.len());
                    parts.push(Part::Action(Pipeline::parse(&mut lexer)?));
                    pos = lexer.pos;
                }
            }
        }
        Ok(Template { parts })
    }

    pub fn render(&self, data: &Value) -> Result<String, TemplateError> {
        let mut rendered = String::new();
        for part in &self.parts {
            match part {
                Part::Text(text) => rendered.push_str(text),
                Part::Action(pipeline) => rendered.push_str(&pipeline.evaluate(data)?),
            }
        }
        Ok(rendered)
    }
}

impl Pipeline {
    fn parse(lexer: &mut Lexer) -> Result<Self, TemplateError> {
        let operand = match lexer.next_token()? {
            Token::Path(path) => Operand::Path(path),
            Token::Str(literal) => Operand::Literal(literal),
            Token::Close => return Err(lexer.error("empty action")),
            _ => return Err(lexer.error("expected a field path or a string literal")),
        };

        let mut stages = vec![];
        let mut token = lexer.next_token()?;
        loop {
            match token {
                Token::Close => break,
                Token::Pipe => {
                    let name = match lexer.next_token()? {
                        Token::Ident(name) => name,
                        _ => return Err(lexer.error("expected a function name after '|'")),
                    };
                    let mut args = vec![];
                    token = loop {
                        match lexer.next_token()? {
                            Token::Str(arg) => args.push(arg),
                            other => break other,
                        }
                    };
                    stages.push(Function::build(&name, args).map_err(|reason| lexer.error(reason))?);
                }
                _ => return Err(lexer.error("expected '|' or '}}'")),
            }
        }
        Ok(Pipeline { operand, stages })
    }

    fn evaluate(&self, data: &Value) -> Result<String, TemplateError> {
        let mut value = match &self.operand {
            Operand::Path(path) => path.lookup(data).and_then(scalar_text),
            Operand::Literal(literal) => Some(literal.clone()),
        };
        for stage in &self.stages {
            value = stage.apply(value);
        }
        value.ok_or_else(|| TemplateError::MissingField {
            path: match &self.operand {
                Operand::Path(path) => path.to_string(),
                Operand::Literal(literal) => format!("{:?}", literal),
            },
        })
    }
}

impl Path {
    fn lookup<'v>(&self, data: &'v Value) -> Option<&'v Value> {
        self.0
            .iter()
            .try_fold(data, |current, segment| match (segment, current) {
                (Segment::Key(key), Value::Object(map)) => map.get(key),
                (Segment::Index(index), Value::Array(items)) => items.get(*index),
                (Segment::Index(index), Value::Object(map)) => map.get(&index.to_string()),
                _ => None,
            })
    }
}

impl Display for Path {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            return write!(f, ".");
        }
        for segment in &self.0 {
            match segment {
                Segment::Key(key) if key.chars().all(is_segment_char) => write!(f, ".{}", key)?,
                Segment::Key(key) => write!(f, "[{:?}]", key)?,
                Segment::Index(index) => write!(f, ".{}", index)?,
            }
        }
        Ok(())
    }
}

impl Function {
    fn build(name: &str, args: Vec<String>) -> Result<Self, String> {
        let expected = match name {
            "lower" | "upper" | "trim" => 0,
            "default" | "trimPrefix" | "trimSuffix" => 1,
            "replace" => 2,
            _ => return Err(format!("unknown function {:?}", name)),
        };
        if args.len() != expected {
            return Err(format!(
                "{} expects {} argument(s), got {}",
                name,
                expected,
                args.len()
            ));
        }
        let mut args = args.into_iter();
        let mut arg = || args.next().unwrap_or_default();
        Ok(match name {
            "default" => Function::Default(arg()),
            "lower" => Function::Lower,
            "upper" => Function::Upper,
            "trim" => Function::Trim,
            "trimPrefix" => Function::TrimPrefix(arg()),
            "trimSuffix" => Function::TrimSuffix(arg()),
            _ => {
                let old = arg();
                Function::Replace(old, arg())
            }
        })
    }

    fn apply(&self, value: Option<String>) -> Option<String> {
        match self {
            // empty counts as missing, same as a null field
            Function::Default(fallback) => match value {
                Some(value) if !value.is_empty() => Some(value),
                _ => Some(fallback.clone()),
            },
            Function::Lower => value.map(|v| v.to_lowercase()),
            Function::Upper => value.map(|v| v.to_uppercase()),
            Function::Trim => value.map(|v| v.trim().to_string()),
            Function::TrimPrefix(prefix) => {
                value.map(|v| v.strip_prefix(prefix.as_str()).unwrap_or(v.as_str()).to_string())
            }
            Function::TrimSuffix(suffix) => {
                value.map(|v| v.strip_suffix(suffix.as_str()).unwrap_or(v.as_str()).to_string())
            }
            Function::Replace(old, new) => value.map(|v| v.replace(old.as_str(), new)),
        }
    }
}

/// Text form of a looked-up value. Null is treated as absent; containers
/// render as compact JSON.
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn is_segment_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

#[derive(Debug, PartialEq)]
enum Token {
    Path(Path),
    Str(String),
    Ident(String),
    Pipe,
    Close,
}

struct Lexer<'a> {
    source: &'a str,
    pos: usize,
    start: usize,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str, pos: usize) -> Self {
        Lexer {
            source,
            pos,
            start: pos,
        }
    }

    fn error(&self, reason: impl Into<String>) -> TemplateError {
        TemplateError::Syntax {
            template: self.source.to_string(),
            offset: self.start,
            reason: reason.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.source[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn next_token(&mut self) -> Result<Token, TemplateError> {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
        self.start = self.pos;
        if self.source[self.pos..].starts_with(CLOSE) {
            self.pos += CLOSE.len();
            return Ok(Token::Close);
        }
        match self.peek() {
            None => Err(self.error("unclosed action, missing '}}'")),
            Some('|') => {
                self.bump();
                Ok(Token::Pipe)
            }
            Some('"') => self.string().map(Token::Str),
            Some('.') => self.path().map(Token::Path),
            Some(c) if c.is_ascii_alphabetic() => {
                let mut ident = String::new();
                while let Some(c) = self.peek().filter(|c| c.is_ascii_alphanumeric() || *c == '_') {
                    ident.push(c);
                    self.bump();
                }
                Ok(Token::Ident(ident))
            }
            Some(c) => Err(self.error(format!("unexpected character {:?}", c))),
        }
    }

    fn string(&mut self) -> Result<String, TemplateError> {
        self.bump();
        let mut literal = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string literal")),
                Some('"') => return Ok(literal),
                Some('\\') => match self.bump() {
                    Some('"') => literal.push('"'),
                    Some('\\') => literal.push('\\'),
                    Some('n') => literal.push('\n'),
                    Some('t') => literal.push('\t'),
                    Some(c) => return Err(self.error(format!("unknown escape sequence \\{}", c))),
                    None => return Err(self.error("unterminated string literal")),
                },
                Some(c) => literal.push(c),
            }
        }
    }

    fn path(&mut self) -> Result<Path, TemplateError> {
        let mut segments = vec![];
        loop {
            match self.peek() {
                Some('.') => {
                    self.bump();
                    let mut segment = String::new();
                    while let Some(c) = self.peek().filter(|c| is_segment_char(*c)) {
                        segment.push(c);
                        self.bump();
                    }
                    if segment.is_empty() {
                        // a lone '.' is the whole mapping, '.["key"]' is a bracketed key
                        let terminated = self.peek().is_none_or(|c| c.is_whitespace() || c == '|')
                            || self.source[self.pos..].starts_with(CLOSE);
                        if segments.is_empty() && (terminated || self.peek() == Some('[')) {
                            continue;
                        }
                        return Err(self.error("empty path segment"));
                    }
                    segments.push(match segment.parse::<usize>() {
                        Ok(index) => Segment::Index(index),
                        Err(_) => Segment::Key(segment),
                    });
                }
                Some('[') => {
                    self.bump();
                    if self.peek() != Some('"') {
                        return Err(self.error("expected a quoted key after '['"));
                    }
                    let key = self.string()?;
                    if self.bump() != Some(']') {
                        return Err(self.error("expected ']' after bracketed key"));
                    }
                    segments.push(Segment::Key(key));
                }
                _ => return Ok(Path(segments)),
            }
        }
    }
}

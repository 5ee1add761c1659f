//! # Template Syntax
//!
//! Turns search template text into tokens.
//!
//! A template is line based. Every non-comment line is one of:
//!
//! - an **atom**: `[op] [name:]type [feature conditions]`
//! - a **lonely operator**: `op` on a line of its own
//! - a **relation line**: `name op name`
//! - a **feature line**: feature conditions for the preceding atom
//! - a **quantifier marker**: `/where/`, `/have/`, `/without/`, `/with/`,
//!   `/or/`, `/-/`
//!
//! Quantifier bodies are not tokenized here. Their lines are collected
//! verbatim (minus the quantifier's indentation) and attached to the atom the
//! quantifier follows; they are parsed again when the quantifier is evaluated.
//!
//! All errors of a template are collected before reporting.

use crate::relations::EdgeDirection;
use crate::{Diagnostic, FeatureConstraint, FeatureValue, WeftError, primitives::PARENT_REF};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::LazyLock;

// =============================================================================
// PATTERNS
// =============================================================================

const OP: &str = r"(?:[#&|\[\]<>:=-]+\S*|\.[^\s.]\S*\.)";
const NAME: &str = r"[A-Za-z0-9_.-]+";
const FEATURE_NAME: &str = r"[a-zA-Z0-9@_-]+";

/// The compiled line and feature patterns.
struct Patterns {
    qu_line: Regex,
    op_line: Regex,
    rel: Regex,
    atom_op: Regex,
    atom: Regex,
    name: Regex,
    names: Regex,
    any: Regex,
    none: Regex,
    ident: Regex,
    comp: Regex,
    re: Regex,
    predicate: Regex,
    num: Regex,
}

impl Patterns {
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            qu_line: Regex::new(r"^(\s*)(/where/|/have/|/without/|/with/|/or/|/-/)\s*$")?,
            op_line: Regex::new(&format!(r"^(\s*)({OP})\s*$"))?,
            rel: Regex::new(&format!(r"^(\s*)({NAME})\s+({OP})\s+({NAME})\s*$"))?,
            atom_op: Regex::new(&format!(
                r"^(\s*)({OP})\s+([^ \t=#<>~*]+)(?:(?:\s*\z)|(?:\s+(.*)))$"
            ))?,
            atom: Regex::new(r"^(\s*)([^ \t=#<>~*]+)(?:(?:\s*\z)|(?:\s+(.*)))$")?,
            name: Regex::new(&format!("^{NAME}$"))?,
            names: Regex::new(&format!(r"^\s*(?:{OP}\s+)?([^ \t:=#<>~*]+):"))?,
            any: Regex::new(&format!(r"^({FEATURE_NAME})\*\s*$"))?,
            none: Regex::new(&format!(r"^({FEATURE_NAME})(#?)\s*$"))?,
            ident: Regex::new(&format!(r"^({FEATURE_NAME})([=#])(.+)$"))?,
            comp: Regex::new(&format!(r"^({FEATURE_NAME})([<>])(.*)$"))?,
            re: Regex::new(&format!(r"^({FEATURE_NAME})~(.*)$"))?,
            predicate: Regex::new(&format!(r"^({FEATURE_NAME})\?({NAME})$"))?,
            num: Regex::new(r"^-?[0-9]+$")?,
        })
    }
}

static PATTERNS: LazyLock<Result<Patterns, regex::Error>> = LazyLock::new(Patterns::new);

fn patterns() -> Result<&'static Patterns, WeftError> {
    PATTERNS.as_ref().map_err(|e| {
        WeftError::Syntax(vec![Diagnostic::general(format!(
            "Template patterns do not compile: {e}"
        ))])
    })
}

// =============================================================================
// ESCAPES
// =============================================================================

/// Escape sequences, in the order they are replaced. Each one is stood in for
/// by the control character with its index while a line is matched.
const ESCAPES: [&str; 6] = ["\\\\", "\\ ", "\\t", "\\n", "\\|", "\\="];

/// What each escape means in a value.
const UNESCAPED: [&str; 6] = ["\\", " ", "\t", "\n", "|", "="];

/// Escapes that keep their backslash inside a regular expression.
const REGEX_KEEPS: [bool; 6] = [false, false, false, false, true, true];

fn placeholder(i: usize) -> char {
    char::from(i as u8)
}

fn escape(text: &str) -> String {
    let mut out = text.to_string();
    for (i, esc) in ESCAPES.iter().enumerate() {
        out = out.replace(esc, &placeholder(i).to_string());
    }
    out
}

fn unescape(text: &str, in_regex: bool) -> String {
    let mut out = text.to_string();
    for i in 0..ESCAPES.len() {
        let with = if in_regex && REGEX_KEEPS[i] {
            ESCAPES[i]
        } else {
            UNESCAPED[i]
        };
        out = out.replace(placeholder(i), with);
    }
    out
}

/// Undo `escape`, restoring the escape sequences themselves.
fn reescape(text: &str) -> String {
    let mut out = text.to_string();
    for (i, esc) in ESCAPES.iter().enumerate() {
        out = out.replace(placeholder(i), esc);
    }
    out
}

// =============================================================================
// TOKENS
// =============================================================================

/// Quantifier keywords.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuKind {
    Where,
    Have,
    Without,
    With,
    Or,
    End,
}

impl QuKind {
    fn parse(word: &str) -> Option<Self> {
        match word {
            "/where/" => Some(Self::Where),
            "/have/" => Some(Self::Have),
            "/without/" => Some(Self::Without),
            "/with/" => Some(Self::With),
            "/or/" => Some(Self::Or),
            "/-/" => Some(Self::End),
            _ => None,
        }
    }

    const fn opens(self) -> bool {
        matches!(self, Self::Where | Self::Without | Self::With)
    }

    const fn continues(self) -> bool {
        matches!(self, Self::Have | Self::Or)
    }
}

impl fmt::Display for QuKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let word = match self {
            Self::Where => "/where/",
            Self::Have => "/have/",
            Self::Without => "/without/",
            Self::With => "/with/",
            Self::Or => "/or/",
            Self::End => "/-/",
        };
        f.write_str(word)
    }
}

/// A quantifier as collected by the tokenizer.
///
/// `templates` holds one body per segment: for `/where/` the antecedent and
/// consequent, for `/with/` one body per alternative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quantifier {
    pub kind: QuKind,
    pub templates: Vec<Vec<String>>,
    /// Line of the opening keyword.
    pub line: usize,
}

/// Feature conditions of one atom, by feature name.
pub type Features = BTreeMap<String, FeatureConstraint>;

/// A relation operator as written, with the edge feature condition an
/// edge-shaped operator (`-f>`, `<f-`, `<f>`) carries inside its arrow.
#[derive(Debug, Clone)]
pub struct OpToken {
    pub text: String,
    pub edge: Option<(String, FeatureConstraint)>,
}

/// One logical line of a template.
#[derive(Debug, Clone)]
pub enum Token {
    Atom {
        line: usize,
        indent: usize,
        op: Option<OpToken>,
        name: String,
        otype: String,
        /// The source line without leading whitespace.
        src: String,
        features: Features,
        quantifiers: Vec<Quantifier>,
    },
    /// A lonely operator.
    Op {
        line: usize,
        indent: usize,
        op: OpToken,
    },
    Rel {
        line: usize,
        from: String,
        op: OpToken,
        to: String,
    },
    Feat {
        line: usize,
        features: Features,
    },
}

impl Token {
    /// Template line of the token.
    #[must_use]
    pub const fn line(&self) -> usize {
        match self {
            Self::Atom { line, .. }
            | Self::Op { line, .. }
            | Self::Rel { line, .. }
            | Self::Feat { line, .. } => *line,
        }
    }
}

// =============================================================================
// LINE PARSING
// =============================================================================

/// The shape of one escaped line.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Line<'a> {
    Op {
        indent: &'a str,
        op: &'a str,
    },
    Rel {
        indent: &'a str,
        from: &'a str,
        op: &'a str,
        to: &'a str,
    },
    Atom {
        indent: &'a str,
        op: Option<&'a str>,
        name: &'a str,
        otype: &'a str,
        features: &'a str,
    },
    Feat(&'a str),
}

fn group<'a>(caps: &regex::Captures<'a>, i: usize) -> &'a str {
    caps.get(i).map_or("", |m| m.as_str())
}

fn parse_line<'a>(p: &Patterns, esc: &'a str) -> Line<'a> {
    if let Some(c) = p.op_line.captures(esc) {
        return Line::Op {
            indent: group(&c, 1),
            op: group(&c, 2),
        };
    }
    if let Some(c) = p.rel.captures(esc) {
        return Line::Rel {
            indent: group(&c, 1),
            from: group(&c, 2),
            op: group(&c, 3),
            to: group(&c, 4),
        };
    }
    let atom = p
        .atom_op
        .captures(esc)
        .map(|c| (group(&c, 1), Some(group(&c, 2)), group(&c, 3), group(&c, 4)))
        .or_else(|| {
            p.atom
                .captures(esc)
                .map(|c| (group(&c, 1), None, group(&c, 2), group(&c, 3)))
        });
    match atom {
        Some((indent, op, atom, features)) => {
            let (name, otype) = atom.split_once(':').unwrap_or(("", atom));
            Line::Atom {
                indent,
                op,
                name,
                otype,
                features,
            }
        }
        None => Line::Feat(esc),
    }
}

/// Render a parsed line again, keeping its escapes.
fn gen_line(line: &Line<'_>) -> String {
    let text = match line {
        Line::Op { indent, op } => format!("{indent}{op}"),
        Line::Rel {
            indent,
            from,
            op,
            to,
        } => format!("{indent}{from} {op} {to}"),
        Line::Atom {
            indent,
            op,
            name,
            otype,
            features,
        } => {
            let op = op.map(|o| format!("{o} ")).unwrap_or_default();
            let name = if name.is_empty() {
                String::new()
            } else {
                format!("{name}:")
            };
            let features = if features.is_empty() {
                String::new()
            } else {
                format!(" {features}")
            };
            format!("{indent}{op}{name}{otype}{features}")
        }
        Line::Feat(text) => (*text).to_string(),
    };
    reescape(&text)
}

/// Parse one feature condition. `feat` is escaped.
fn parse_feature(p: &Patterns, feat: &str) -> Result<(String, FeatureConstraint), String> {
    if let Some(c) = p.any.captures(feat) {
        return Ok((group(&c, 1).to_string(), FeatureConstraint::Any));
    }
    if let Some(c) = p.none.captures(feat) {
        let constraint = if group(&c, 2).is_empty() {
            FeatureConstraint::Present
        } else {
            FeatureConstraint::Absent
        };
        return Ok((group(&c, 1).to_string(), constraint));
    }
    if let Some(c) = p.ident.captures(feat) {
        let values: BTreeSet<FeatureValue> = group(&c, 3)
            .split('|')
            .map(|v| FeatureValue::Str(unescape(v, false)))
            .collect();
        let constraint = if group(&c, 2) == "=" {
            FeatureConstraint::OneOf(values)
        } else {
            FeatureConstraint::NoneOf(values)
        };
        return Ok((group(&c, 1).to_string(), constraint));
    }
    if let Some(c) = p.comp.captures(feat) {
        let limit = group(&c, 3);
        let n = p
            .num
            .is_match(limit)
            .then(|| limit.parse::<i64>().ok())
            .flatten()
            .ok_or_else(|| format!("Limit is non numeric \"{}\"", unescape(limit, false)))?;
        let constraint = if group(&c, 2) == ">" {
            FeatureConstraint::Greater(n)
        } else {
            FeatureConstraint::Less(n)
        };
        return Ok((group(&c, 1).to_string(), constraint));
    }
    if let Some(c) = p.re.captures(feat) {
        let pattern = unescape(group(&c, 2), true);
        let re = Regex::new(&pattern)
            .map_err(|e| format!("Wrong regular expression \"{pattern}\": \"{e}\""))?;
        return Ok((group(&c, 1).to_string(), FeatureConstraint::Matches(re)));
    }
    if let Some(c) = p.predicate.captures(feat) {
        return Ok((
            group(&c, 1).to_string(),
            FeatureConstraint::Named(group(&c, 2).to_string()),
        ));
    }
    Err(format!(
        "Unrecognized feature condition \"{}\"",
        unescape(feat, false)
    ))
}

/// Parse a whitespace separated block of feature conditions.
fn parse_features(
    p: &Patterns,
    text: &str,
    line: usize,
    bad: &mut Vec<Diagnostic>,
) -> Option<Features> {
    let mut features = Features::new();
    let mut good = true;
    for feat in text.split_whitespace() {
        match parse_feature(p, feat) {
            Ok((name, constraint)) => {
                features.insert(name, constraint);
            }
            Err(message) => {
                bad.push(Diagnostic::at(line, message));
                good = false;
            }
        }
    }
    good.then_some(features)
}

/// Parse an operator, extracting the condition of an edge-shaped operator.
fn parse_op(p: &Patterns, op: &str, line: usize, bad: &mut Vec<Diagnostic>) -> Option<OpToken> {
    // feature comparisons may carry a regular expression
    let text = unescape(op, op.starts_with('.'));
    if EdgeDirection::of(op).is_none() {
        return Some(OpToken { text, edge: None });
    }
    match parse_feature(p, &op[1..op.len() - 1]) {
        Ok(edge) => Some(OpToken {
            text,
            edge: Some(edge),
        }),
        Err(message) => {
            bad.push(Diagnostic::at(line, message));
            None
        }
    }
}

// =============================================================================
// TOKENIZER
// =============================================================================

/// An open quantifier keyword: line, kind, indentation.
#[derive(Clone, Copy)]
struct Open {
    line: usize,
    kind: QuKind,
    indent: usize,
}

/// The outermost quantifier whose body is being collected.
struct Collecting {
    /// Index of the atom token it belongs to, if the opening was legal.
    target: Option<usize>,
    quantifier: Quantifier,
}

fn leading_whitespace(line: &str) -> usize {
    line.chars().take_while(|c| c.is_whitespace()).count()
}

/// Drop up to `n` leading whitespace characters.
fn strip_indent(line: &str, n: usize) -> String {
    let skip = line
        .char_indices()
        .take(n)
        .take_while(|(_, c)| c.is_whitespace())
        .last()
        .map_or(0, |(i, c)| i + c.len_utf8());
    line[skip..].to_string()
}

/// Tokenize a template.
///
/// Line numbers in the tokens and diagnostics are 0-based and local to
/// `template`.
pub fn tokenize(template: &str) -> Result<Vec<Token>, WeftError> {
    let p = patterns()?;
    let mut tokens: Vec<Token> = Vec::new();
    let mut bad: Vec<Diagnostic> = Vec::new();
    let mut open: Vec<Open> = Vec::new();
    let mut collecting: Option<Collecting> = None;

    for (i, line) in template.split('\n').enumerate() {
        if line.starts_with('%') || line.trim().is_empty() {
            continue;
        }
        let (indent, keyword) = match p.qu_line.captures(line) {
            Some(c) => (group(&c, 1).chars().count(), QuKind::parse(group(&c, 2))),
            None => (leading_whitespace(line), None),
        };

        if let (Some(top), Some(c)) = (open.last().copied(), collecting.as_mut()) {
            let outer_indent = open.first().map_or(0, |o| o.indent);
            let depth = open.len();
            let body = |q: &mut Quantifier, text: String| {
                if let Some(t) = q.templates.last_mut() {
                    t.push(text);
                }
            };
            match keyword {
                None => {
                    let strip = if depth == 1 { top.indent } else { outer_indent };
                    body(&mut c.quantifier, strip_indent(line, strip));
                }
                Some(kind) if kind.opens() => {
                    body(&mut c.quantifier, strip_indent(line, outer_indent));
                    open.push(Open { line: i, kind, indent });
                }
                Some(kind) => {
                    let misplaced = if kind.continues() {
                        (kind == QuKind::Have && top.kind != QuKind::Where)
                            || (kind == QuKind::Or && !matches!(top.kind, QuKind::With | QuKind::Or))
                    } else {
                        top.kind == QuKind::Where
                    };
                    if misplaced {
                        let message = if kind.continues() {
                            format!(
                                "Quantifier: \"{kind}\" can not follow \"{}\" on line {}",
                                top.kind, top.line
                            )
                        } else {
                            format!(
                                "Quantifier: \"{kind}\" : premature end of \"{}\" on line {}",
                                top.kind, top.line
                            )
                        };
                        bad.push(Diagnostic::at(i, message));
                    }
                    if top.indent != indent {
                        bad.push(Diagnostic::at(
                            i,
                            format!(
                                "Quantifier \"{kind}\" has not same indentation as \"{}\" on line {}",
                                top.kind, top.line
                            ),
                        ));
                    }
                    if depth > 1 {
                        body(&mut c.quantifier, strip_indent(line, outer_indent));
                    } else if kind.continues() {
                        c.quantifier.templates.push(Vec::new());
                    }
                    if kind.continues() {
                        if let Some(top) = open.last_mut() {
                            *top = Open { line: i, kind, indent };
                        }
                    } else {
                        open.pop();
                        if open.is_empty() {
                            if let Some(done) = collecting.take() {
                                attach(&mut tokens, done);
                            }
                        }
                    }
                }
            }
            continue;
        }

        if let Some(kind) = keyword {
            let mut good = true;
            if !kind.opens() {
                bad.push(Diagnostic::at(
                    i,
                    format!("Quantifier: Can not start with \"{kind}:\""),
                ));
                good = false;
            }
            match tokens.last() {
                None => {
                    bad.push(Diagnostic::at(i, "Quantifier: No preceding tokens"));
                    good = false;
                }
                Some(Token::Atom { indent: at, .. }) if *at == indent => {}
                Some(_) => {
                    bad.push(Diagnostic::at(
                        i,
                        "Quantifier: Does not immediately follow an atom at the same level",
                    ));
                    good = false;
                }
            }
            open.push(Open { line: i, kind, indent });
            collecting = Some(Collecting {
                target: good.then(|| tokens.len() - 1),
                quantifier: Quantifier {
                    kind,
                    templates: vec![Vec::new()],
                    line: i,
                },
            });
            continue;
        }

        if let Some(token) = tokenize_line(p, line, i, &mut bad) {
            tokens.push(token);
        }
    }

    for o in &open {
        bad.push(Diagnostic::at(
            o.line,
            format!("Quantifier: Unterminated \"{}\"", o.kind),
        ));
    }
    if bad.is_empty() {
        Ok(tokens)
    } else {
        Err(WeftError::Syntax(bad))
    }
}

fn attach(tokens: &mut [Token], done: Collecting) {
    let Some(target) = done.target else {
        return;
    };
    if let Some(Token::Atom { quantifiers, .. }) = tokens.get_mut(target) {
        quantifiers.push(done.quantifier);
    }
}

fn tokenize_line(p: &Patterns, line: &str, i: usize, bad: &mut Vec<Diagnostic>) -> Option<Token> {
    let esc = escape(line);
    match parse_line(p, &esc) {
        Line::Op { indent, op } => Some(Token::Op {
            line: i,
            indent: indent.chars().count(),
            op: parse_op(p, op, i, bad)?,
        }),
        Line::Rel { from, op, to, .. } => Some(Token::Rel {
            line: i,
            from: from.to_string(),
            op: parse_op(p, op, i, bad)?,
            to: to.to_string(),
        }),
        Line::Atom {
            indent,
            op,
            name,
            otype,
            features,
        } => {
            let mut good = true;
            if !name.is_empty() && !p.name.is_match(name) {
                bad.push(Diagnostic::at(i, format!("Illegal name: \"{name}\"")));
                good = false;
            }
            let features = parse_features(p, features, i, bad);
            let op = match op {
                Some(op) => parse_op(p, op, i, bad).map(Some),
                None => Some(None),
            };
            let (Some(features), Some(op), true) = (features, op, good) else {
                return None;
            };
            Some(Token::Atom {
                line: i,
                indent: indent.chars().count(),
                op,
                name: name.to_string(),
                otype: unescape(otype, false),
                src: line.trim_start().to_string(),
                features,
                quantifiers: Vec::new(),
            })
        }
        Line::Feat(text) => {
            // Feature lines that fail entirely are unrecognized lines.
            let before = bad.len();
            match parse_features(p, text, i, bad) {
                Some(features) if !features.is_empty() => Some(Token::Feat { line: i, features }),
                Some(_) => None,
                None => {
                    bad.truncate(before);
                    bad.push(Diagnostic::at(i, format!("Unrecognized line: {line}")));
                    None
                }
            }
        }
    }
}

// =============================================================================
// QUANTIFIER TEMPLATES
// =============================================================================

/// Rewrite the bodies of a quantifier so that the parent reference `..`
/// names the quantified atom.
///
/// An anonymous atom gets the name `parent`, extended with `x` until it
/// collides with no name used in the bodies. Returns the bodies as template
/// texts and the name chosen for the parent.
pub fn de_context(
    quantifier: &Quantifier,
    parent_name: &str,
) -> Result<(Vec<String>, String), WeftError> {
    let p = patterns()?;
    let parent = if parent_name.is_empty() {
        let used: BTreeSet<String> = quantifier
            .templates
            .iter()
            .flatten()
            .filter_map(|line| p.names.captures(line).map(|c| group(&c, 1).to_string()))
            .collect();
        let mut name = crate::primitives::PARENT_NAME.to_string();
        while used.contains(&name) {
            name.push('x');
        }
        name
    } else {
        parent_name.to_string()
    };

    let templates = quantifier
        .templates
        .iter()
        .map(|template| {
            template
                .iter()
                .map(|line| {
                    let esc = escape(line);
                    let pick = |n: &str| -> String {
                        if n == PARENT_REF { parent.clone() } else { n.to_string() }
                    };
                    match parse_line(p, &esc) {
                        Line::Rel {
                            indent,
                            from,
                            op,
                            to,
                        } if from == PARENT_REF || to == PARENT_REF => {
                            let (from, to) = (pick(from), pick(to));
                            gen_line(&Line::Rel {
                                indent,
                                from: &from,
                                op,
                                to: &to,
                            })
                        }
                        Line::Atom {
                            indent,
                            op,
                            name: "",
                            otype: PARENT_REF,
                            features,
                        } => gen_line(&Line::Atom {
                            indent,
                            op,
                            name: "",
                            otype: &parent,
                            features,
                        }),
                        _ => line.clone(),
                    }
                })
                .collect::<Vec<_>>()
                .join("\n")
        })
        .collect();
    Ok((templates, parent))
}

/// The quantified atom as the first line of a nested template: named, at the
/// outermost level, without operator.
pub fn clean_parent(src: &str, parent_name: &str) -> Result<String, WeftError> {
    let esc = escape(src);
    let line = match parse_line(patterns()?, &esc) {
        Line::Atom {
            name,
            otype,
            features,
            ..
        } => gen_line(&Line::Atom {
            indent: "",
            op: None,
            name: if name.is_empty() { parent_name } else { name },
            otype,
            features,
        }),
        _ => src.to_string(),
    };
    Ok(line)
}

// =============================================================================
// TESTS
// =============================================================================

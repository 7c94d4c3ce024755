/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Predicate AST and its evaluator.
//!
//! Field paths are lower-case. String comparisons ignore case and treat `*`
//! as a wildcard. A field with several values (tags, compatible types)
//! matches when any of its values matches.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sindri_models::models::{Entity, FieldValue};
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompareOp {
    fn holds(&self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Ge => ordering != Ordering::Less,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Le => ordering != Ordering::Greater,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Gt => "=gt=",
            CompareOp::Ge => "=ge=",
            CompareOp::Lt => "=lt=",
            CompareOp::Le => "=le=",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    True,
    False,
    Equals {
        field: String,
        value: FieldValue,
    },
    In {
        field: String,
        values: Vec<FieldValue>,
    },
    Compare {
        field: String,
        op: CompareOp,
        value: FieldValue,
    },
    IsNull {
        field: String,
    },
    Not(Box<Predicate>),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    pub fn equals(field: &str, value: impl Into<FieldValue>) -> Self {
        Predicate::Equals {
            field: field.to_ascii_lowercase(),
            value: value.into(),
        }
    }

    pub fn in_values<V, I>(field: &str, values: I) -> Self
    where
        V: Into<FieldValue>,
        I: IntoIterator<Item = V>,
    {
        Predicate::In {
            field: field.to_ascii_lowercase(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn compare(field: &str, op: CompareOp, value: impl Into<FieldValue>) -> Self {
        Predicate::Compare {
            field: field.to_ascii_lowercase(),
            op,
            value: value.into(),
        }
    }

    pub fn is_null(field: &str) -> Self {
        Predicate::IsNull {
            field: field.to_ascii_lowercase(),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(predicate: Predicate) -> Self {
        match predicate {
            Predicate::True => Predicate::False,
            Predicate::False => Predicate::True,
            Predicate::Not(inner) => *inner,
            other => Predicate::Not(Box::new(other)),
        }
    }

    /// Conjunction that folds constants and flattens nested `And`s.
    pub fn and(self, other: Predicate) -> Self {
        Predicate::all([self, other])
    }

    /// Disjunction that folds constants and flattens nested `Or`s.
    pub fn or(self, other: Predicate) -> Self {
        Predicate::any([self, other])
    }

    /// AND-s an optional restriction; `None` means unrestricted.
    pub fn and_opt(self, other: Option<Predicate>) -> Self {
        match other {
            Some(other) => self.and(other),
            None => self,
        }
    }

    pub fn all(predicates: impl IntoIterator<Item = Predicate>) -> Self {
        let mut terms = Vec::new();
        for predicate in predicates {
            match predicate {
                Predicate::True => {}
                Predicate::False => return Predicate::False,
                Predicate::And(inner) => terms.extend(inner),
                other => terms.push(other),
            }
        }
        match terms.len() {
            0 => Predicate::True,
            1 => terms.remove(0),
            _ => Predicate::And(terms),
        }
    }

    pub fn any(predicates: impl IntoIterator<Item = Predicate>) -> Self {
        let mut terms = Vec::new();
        for predicate in predicates {
            match predicate {
                Predicate::False => {}
                Predicate::True => return Predicate::True,
                Predicate::Or(inner) => terms.extend(inner),
                other => terms.push(other),
            }
        }
        match terms.len() {
            0 => Predicate::False,
            1 => terms.remove(0),
            _ => Predicate::Or(terms),
        }
    }

    /// Every field path referenced by the predicate.
    pub fn fields(&self) -> Vec<&str> {
        let mut fields = Vec::new();
        self.collect_fields(&mut fields);
        fields
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Predicate::True | Predicate::False => {}
            Predicate::Equals { field, .. }
            | Predicate::In { field, .. }
            | Predicate::Compare { field, .. }
            | Predicate::IsNull { field } => out.push(field),
            Predicate::Not(inner) => inner.collect_fields(out),
            Predicate::And(terms) | Predicate::Or(terms) => {
                for term in terms {
                    term.collect_fields(out);
                }
            }
        }
    }

    pub fn matches<T: Entity>(&self, entity: &T) -> bool {
        match self {
            Predicate::True => true,
            Predicate::False => false,
            Predicate::Equals { field, value } => {
                let actual = entity.field(field).unwrap_or_default();
                if *value == FieldValue::Null {
                    return is_null(&actual);
                }
                actual.iter().any(|a| value_eq(a, value))
            }
            Predicate::In { field, values } => {
                let actual = entity.field(field).unwrap_or_default();
                actual
                    .iter()
                    .any(|a| values.iter().any(|v| value_eq(a, v)))
            }
            Predicate::Compare { field, op, value } => entity
                .field(field)
                .unwrap_or_default()
                .iter()
                .any(|a| value_cmp(a, value).map(|o| op.holds(o)).unwrap_or(false)),
            Predicate::IsNull { field } => is_null(&entity.field(field).unwrap_or_default()),
            Predicate::Not(inner) => !inner.matches(entity),
            Predicate::And(terms) => terms.iter().all(|t| t.matches(entity)),
            Predicate::Or(terms) => terms.iter().any(|t| t.matches(entity)),
        }
    }
}

fn is_null(values: &[FieldValue]) -> bool {
    values.iter().all(|v| *v == FieldValue::Null)
}

fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn value_eq(actual: &FieldValue, expected: &FieldValue) -> bool {
    match (actual, expected) {
        (FieldValue::Null, _) | (_, FieldValue::Null) => false,
        (FieldValue::Str(a), FieldValue::Str(pattern)) => glob_match(pattern, a),
        (FieldValue::Str(a), FieldValue::Int(b)) => *a == b.to_string(),
        (FieldValue::Int(a), FieldValue::Int(b)) => a == b,
        (FieldValue::Int(a), FieldValue::Str(s)) => s.trim().parse::<i64>().ok() == Some(*a),
        (FieldValue::Bool(a), FieldValue::Bool(b)) => a == b,
        (FieldValue::Bool(a), FieldValue::Str(s)) => {
            s.to_ascii_lowercase().parse::<bool>().ok() == Some(*a)
        }
        (FieldValue::Time(a), FieldValue::Time(b)) => a == b,
        (FieldValue::Time(a), FieldValue::Str(s)) => parse_time(s) == Some(*a),
        _ => false,
    }
}

fn value_cmp(actual: &FieldValue, expected: &FieldValue) -> Option<Ordering> {
    match (actual, expected) {
        (FieldValue::Int(a), FieldValue::Int(b)) => Some(a.cmp(b)),
        (FieldValue::Int(a), FieldValue::Str(s)) => s.trim().parse::<i64>().ok().map(|b| a.cmp(&b)),
        (FieldValue::Time(a), FieldValue::Time(b)) => Some(a.cmp(b)),
        (FieldValue::Time(a), FieldValue::Str(s)) => parse_time(s).map(|b| a.cmp(&b)),
        (FieldValue::Str(a), FieldValue::Str(b)) => {
            Some(a.to_lowercase().cmp(&b.to_lowercase()))
        }
        _ => None,
    }
}

/// Case-insensitive match where `*` stands for any run of characters.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.to_lowercase().chars().collect();
    let text: Vec<char> = text.to_lowercase().chars().collect();

    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while t < text.len() {
        if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, t));
            p += 1;
        } else if p < pattern.len() && pattern[p] == text[t] {
            p += 1;
            t += 1;
        } else if let Some((star_p, star_t)) = star {
            p = star_p + 1;
            t = star_t + 1;
            star = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|c| *c == '*')
}

fn write_value(f: &mut fmt::Formatter<'_>, value: &FieldValue) -> fmt::Result {
    match value {
        FieldValue::Null => f.write_str("null"),
        FieldValue::Int(v) => write!(f, "{}", v),
        FieldValue::Bool(v) => write!(f, "{}", v),
        FieldValue::Time(v) => write!(f, "{}", v.to_rfc3339()),
        FieldValue::Str(v) => {
            let plain = !v.is_empty()
                && !v
                    .chars()
                    .any(|c| c.is_whitespace() || "();,'\"".contains(c));
            if plain {
                f.write_str(v)
            } else {
                write!(f, "\"{}\"", v.replace('\\', "\\\\").replace('"', "\\\""))
            }
        }
    }
}

/// Renders the predicate back into query syntax.
impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::True => f.write_str("true"),
            Predicate::False => f.write_str("false"),
            Predicate::Equals { field, value } => {
                write!(f, "{}==", field)?;
                write_value(f, value)
            }
            Predicate::In { field, values } => {
                write!(f, "{}=in=(", field)?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write_value(f, value)?;
                }
                f.write_str(")")
            }
            Predicate::Compare { field, op, value } => {
                write!(f, "{}{}", field, op.as_str())?;
                write_value(f, value)
            }
            Predicate::IsNull { field } => write!(f, "{}=is=null", field),
            Predicate::Not(inner) => match inner.as_ref() {
                Predicate::IsNull { field } => write!(f, "{}=not=null", field),
                Predicate::Equals { field, value } => {
                    write!(f, "{}!=", field)?;
                    write_value(f, value)
                }
                Predicate::In { field, values } => {
                    write!(f, "{}=out=(", field)?;
                    for (i, value) in values.iter().enumerate() {
                        if i > 0 {
                            f.write_str(",")?;
                        }
                        write_value(f, value)?;
                    }
                    f.write_str(")")
                }
                other => write!(f, "not({})", other),
            },
            Predicate::And(terms) => write_joined(f, terms, ";"),
            Predicate::Or(terms) => write_joined(f, terms, ","),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, terms: &[Predicate], separator: &str) -> fmt::Result {
    for (i, term) in terms.iter().enumerate() {
        if i > 0 {
            f.write_str(separator)?;
        }
        match term {
            Predicate::And(_) | Predicate::Or(_) => write!(f, "({})", term)?,
            _ => write!(f, "{}", term)?,
        }
    }
    Ok(())
}

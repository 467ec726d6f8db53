//! Store-independent query filters
//!
//! A `Filter` renders to a MongoDB query document and can also be evaluated
//! directly against BSON documents, which is what the in-memory store does.
//! Field names may be dotted paths (`metadata.created_at`).

use bson::{doc, Bson, Document};
use std::cmp::Ordering;

#[derive(Debug, Clone)]
enum Clause {
    Eq(String, Bson),
    Ne(String, Bson),
    Gte(String, Bson),
    Lte(String, Bson),
    In(String, Vec<Bson>),
    Contains(String, String),
}

/// Conjunction of field conditions
#[derive(Debug, Clone, Default)]
pub struct Filter {
    clauses: Vec<Clause>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Match a record by id
    pub fn by_id(id: &str) -> Self {
        Self::new().eq("_id", id)
    }

    /// Match records owned by a tenant
    pub fn tenant(tenant_id: &str) -> Self {
        Self::new().eq("tenant_id", tenant_id)
    }

    pub fn eq(mut self, field: &str, value: impl Into<Bson>) -> Self {
        self.clauses.push(Clause::Eq(field.to_string(), value.into()));
        self
    }

    pub fn ne(mut self, field: &str, value: impl Into<Bson>) -> Self {
        self.clauses.push(Clause::Ne(field.to_string(), value.into()));
        self
    }

    pub fn gte(mut self, field: &str, value: impl Into<Bson>) -> Self {
        self.clauses.push(Clause::Gte(field.to_string(), value.into()));
        self
    }

    pub fn lte(mut self, field: &str, value: impl Into<Bson>) -> Self {
        self.clauses.push(Clause::Lte(field.to_string(), value.into()));
        self
    }

    pub fn any_of<V: Into<Bson>>(mut self, field: &str, values: impl IntoIterator<Item = V>) -> Self {
        self.clauses.push(Clause::In(
            field.to_string(),
            values.into_iter().map(Into::into).collect(),
        ));
        self
    }

    /// Case-insensitive substring match on a string field
    pub fn contains(mut self, field: &str, needle: &str) -> Self {
        self.clauses.push(Clause::Contains(field.to_string(), needle.to_string()));
        self
    }

    /// Add an equality clause only when a value is present
    pub fn eq_opt(self, field: &str, value: Option<impl Into<Bson>>) -> Self {
        match value {
            Some(v) => self.eq(field, v),
            None => self,
        }
    }

    /// Append every clause of another filter
    pub fn and(mut self, other: Filter) -> Self {
        self.clauses.extend(other.clauses);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Render as a MongoDB query document
    pub fn to_document(&self) -> Document {
        let mut parts: Vec<Document> = self.clauses.iter().map(clause_document).collect();
        match parts.len() {
            0 => Document::new(),
            1 => parts.remove(0),
            _ => doc! { "$and": parts },
        }
    }

    /// Evaluate against a document
    pub fn matches(&self, document: &Document) -> bool {
        self.clauses.iter().all(|clause| clause_matches(clause, document))
    }
}

fn clause_document(clause: &Clause) -> Document {
    match clause {
        Clause::Eq(field, value) => doc! { field.as_str(): value.clone() },
        Clause::Ne(field, value) => doc! { field.as_str(): { "$ne": value.clone() } },
        Clause::Gte(field, value) => doc! { field.as_str(): { "$gte": value.clone() } },
        Clause::Lte(field, value) => doc! { field.as_str(): { "$lte": value.clone() } },
        Clause::In(field, values) => doc! { field.as_str(): { "$in": values.clone() } },
        Clause::Contains(field, needle) => doc! {
            field.as_str(): { "$regex": escape_regex(needle), "$options": "i" }
        },
    }
}

fn clause_matches(clause: &Clause, document: &Document) -> bool {
    match clause {
        Clause::Eq(field, value) => equals(lookup(document, field), value),
        Clause::Ne(field, value) => !equals(lookup(document, field), value),
        Clause::Gte(field, value) => lookup(document, field)
            .and_then(|found| compare_bson(found, value))
            .is_some_and(|ord| ord != Ordering::Less),
        Clause::Lte(field, value) => lookup(document, field)
            .and_then(|found| compare_bson(found, value))
            .is_some_and(|ord| ord != Ordering::Greater),
        Clause::In(field, values) => {
            let found = lookup(document, field);
            values.iter().any(|value| equals(found, value))
        }
        Clause::Contains(field, needle) => match lookup(document, field) {
            Some(Bson::String(s)) => s.to_lowercase().contains(&needle.to_lowercase()),
            _ => false,
        },
    }
}

/// Missing fields equal `null`, mirroring MongoDB query semantics
fn equals(found: Option<&Bson>, expected: &Bson) -> bool {
    match found {
        None | Some(Bson::Null) => matches!(expected, Bson::Null),
        Some(value) => compare_bson(value, expected) == Some(Ordering::Equal),
    }
}

/// Resolve a dotted path inside a document
pub fn lookup<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut parts = path.split('.');
    let first = parts.next()?;
    let mut current = document.get(first)?;
    for part in parts {
        current = match current {
            Bson::Document(inner) => inner.get(part)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Order two BSON values of compatible types. Numbers compare across widths.
pub fn compare_bson(a: &Bson, b: &Bson) -> Option<Ordering> {
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => return x.partial_cmp(&y),
        (Some(_), None) | (None, Some(_)) => return None,
        (None, None) => {}
    }

    match (a, b) {
        (Bson::String(x), Bson::String(y)) => Some(x.cmp(y)),
        (Bson::Boolean(x), Bson::Boolean(y)) => Some(x.cmp(y)),
        (Bson::DateTime(x), Bson::DateTime(y)) => Some(x.cmp(y)),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => Some(x.cmp(y)),
        (Bson::Null, Bson::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn as_number(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(v) => Some(f64::from(*v)),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Double(v) => Some(*v),
        _ => None,
    }
}

fn escape_regex(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if "\\.+*?()|[]{}^$".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

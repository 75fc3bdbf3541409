//! Kubernetes style label and field selectors, evaluated against [`ObjectMeta`].

use crate::ObjectMeta;
use crate::Result;
use crate::StoreError;

/// Selector strings as accepted by list and watch calls. `None` matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListSelectors {
    pub label_selector: Option<String>,
    pub field_selector: Option<String>,
}

impl ListSelectors {
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn with_labels(mut self, selector: impl Into<String>) -> Self {
        self.label_selector = Some(selector.into());
        self
    }

    pub fn with_fields(mut self, selector: impl Into<String>) -> Self {
        self.field_selector = Some(selector.into());
        self
    }

    pub fn compile(&self) -> Result<CompiledSelectors> {
        Ok(CompiledSelectors {
            labels: LabelSelector::parse(self.label_selector.as_deref().unwrap_or_default())?,
            fields: FieldSelector::parse(self.field_selector.as_deref().unwrap_or_default())?,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompiledSelectors {
    labels: LabelSelector,
    fields: FieldSelector,
}

impl CompiledSelectors {
    pub fn matches(&self, meta: &ObjectMeta) -> bool {
        self.labels.matches(meta) && self.fields.matches(meta)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum LabelOperator {
    Equals,
    NotEquals,
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct LabelRequirement {
    key: String,
    operator: LabelOperator,
    values: Vec<String>,
}

impl LabelRequirement {
    fn matches(&self, meta: &ObjectMeta) -> bool {
        let value = meta.labels.get(&self.key);
        match self.operator {
            LabelOperator::Exists => value.is_some(),
            LabelOperator::DoesNotExist => value.is_none(),
            LabelOperator::Equals | LabelOperator::In => {
                value.is_some_and(|v| self.values.iter().any(|candidate| candidate == v))
            }
            LabelOperator::NotEquals | LabelOperator::NotIn => {
                value.map_or(true, |v| self.values.iter().all(|candidate| candidate != v))
            }
        }
    }
}

/// Conjunction of label requirements.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: Vec<LabelRequirement>,
}

impl LabelSelector {
    /// Parses `k=v`, `k==v`, `k!=v`, `k in (a,b)`, `k notin (a,b)`, `k` and `!k`
    /// terms separated by commas. The empty string matches everything.
    pub fn parse(selector: &str) -> Result<Self> {
        let invalid = |reason: String| -> crate::Error {
            StoreError::InvalidSelector {
                selector: selector.to_string(),
                reason,
            }
            .into()
        };

        let mut requirements = Vec::new();
        for term in split_terms(selector).map_err(|reason| invalid(reason))? {
            let requirement = if let Some(key) = term.strip_prefix('!') {
                LabelRequirement {
                    key: key.trim().to_string(),
                    operator: LabelOperator::DoesNotExist,
                    values: Vec::new(),
                }
            } else if let Some((key, values)) = split_set_term(&term, "notin") {
                LabelRequirement {
                    key,
                    operator: LabelOperator::NotIn,
                    values: parse_set(&values).map_err(|reason| invalid(reason))?,
                }
            } else if let Some((key, values)) = split_set_term(&term, "in") {
                LabelRequirement {
                    key,
                    operator: LabelOperator::In,
                    values: parse_set(&values).map_err(|reason| invalid(reason))?,
                }
            } else if let Some((key, value)) = term.split_once("!=") {
                LabelRequirement {
                    key: key.trim().to_string(),
                    operator: LabelOperator::NotEquals,
                    values: vec![value.trim().to_string()],
                }
            } else if let Some((key, value)) = term.split_once("==").or_else(|| term.split_once('=')) {
                LabelRequirement {
                    key: key.trim().to_string(),
                    operator: LabelOperator::Equals,
                    values: vec![value.trim().to_string()],
                }
            } else {
                LabelRequirement {
                    key: term.trim().to_string(),
                    operator: LabelOperator::Exists,
                    values: Vec::new(),
                }
            };

            if !valid_key(&requirement.key) {
                return Err(invalid(format!("invalid label key {:?}", requirement.key)));
            }
            if requirement
                .values
                .iter()
                .any(|v| v.contains(char::is_whitespace) || v.contains(['(', ')', '=', '!']))
            {
                return Err(invalid(format!("invalid value in term {term:?}")));
            }
            requirements.push(requirement);
        }

        Ok(Self { requirements })
    }

    pub fn matches(&self, meta: &ObjectMeta) -> bool {
        self.requirements.iter().all(|r| r.matches(meta))
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Name,
    Namespace,
    Uid,
}

impl Field {
    fn value<'a>(&self, meta: &'a ObjectMeta) -> &'a str {
        match self {
            Field::Name => &meta.name,
            Field::Namespace => &meta.namespace,
            Field::Uid => &meta.uid,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FieldRequirement {
    field: Field,
    value: String,
    negate: bool,
}

/// Conjunction of `metadata.name`, `metadata.namespace` and `metadata.uid`
/// equality terms.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSelector {
    requirements: Vec<FieldRequirement>,
}

impl FieldSelector {
    pub fn parse(selector: &str) -> Result<Self> {
        let invalid = |reason: String| -> crate::Error {
            StoreError::InvalidSelector {
                selector: selector.to_string(),
                reason,
            }
            .into()
        };

        let mut requirements = Vec::new();
        for term in split_terms(selector).map_err(|reason| invalid(reason))? {
            let (field, value, negate) = if let Some((field, value)) = term.split_once("!=") {
                (field, value, true)
            } else if let Some((field, value)) = term.split_once("==").or_else(|| term.split_once('=')) {
                (field, value, false)
            } else {
                return Err(invalid(format!("term {term:?} has no operator")));
            };

            let field = match field.trim() {
                "metadata.name" => Field::Name,
                "metadata.namespace" => Field::Namespace,
                "metadata.uid" => Field::Uid,
                other => return Err(invalid(format!("unsupported field {other:?}"))),
            };
            requirements.push(FieldRequirement {
                field,
                value: value.trim().to_string(),
                negate,
            });
        }

        Ok(Self { requirements })
    }

    pub fn matches(&self, meta: &ObjectMeta) -> bool {
        self.requirements
            .iter()
            .all(|r| (r.field.value(meta) == r.value) != r.negate)
    }
}

/// Splits on commas that are not inside a parenthesized set.
fn split_terms(selector: &str) -> std::result::Result<Vec<String>, String> {
    let mut terms = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for c in selector.chars() {
        match c {
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| "unbalanced parentheses".to_string())?;
                current.push(c);
            }
            ',' if depth == 0 => {
                terms.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    if depth != 0 {
        return Err("unbalanced parentheses".to_string());
    }
    terms.push(current);

    let terms: Vec<String> = terms.into_iter().map(|t| t.trim().to_string()).collect();
    if terms.len() == 1 && terms[0].is_empty() {
        return Ok(Vec::new());
    }
    if terms.iter().any(|t| t.is_empty()) {
        return Err("empty term".to_string());
    }
    Ok(terms)
}

/// Recognizes `key <op> (values)` where `op` is a whole word.
fn split_set_term(term: &str, operator: &str) -> Option<(String, String)> {
    let open = term.find('(')?;
    let head = term[..open].trim_end();
    let key = head.strip_suffix(operator)?;
    if !key.ends_with(char::is_whitespace) {
        return None;
    }
    Some((key.trim().to_string(), term[open..].to_string()))
}

fn parse_set(values: &str) -> std::result::Result<Vec<String>, String> {
    let inner = values
        .trim()
        .strip_prefix('(')
        .and_then(|v| v.strip_suffix(')'))
        .ok_or_else(|| format!("malformed set {values:?}"))?;
    let values: Vec<String> = inner
        .split(',')
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect();
    if values.is_empty() {
        return Err("empty set".to_string());
    }
    Ok(values)
}

fn valid_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'))
}

use crate::{Bindings, FilterError, FilterResult};
use quadcloud_model::vocab::{rdf, xsd};
use quadcloud_model::{
    Decimal, Double, Expression, Function, Literal, LiteralRef, NamedNodeRef, Term, TermRef,
};
use regex::RegexBuilder;
use std::cmp::Ordering;
use std::str::FromStr;

const INTEGER_TYPES: [NamedNodeRef<'static>; 13] = [
    xsd::INTEGER,
    xsd::INT,
    xsd::LONG,
    xsd::SHORT,
    xsd::BYTE,
    xsd::NON_NEGATIVE_INTEGER,
    xsd::NON_POSITIVE_INTEGER,
    xsd::NEGATIVE_INTEGER,
    xsd::POSITIVE_INTEGER,
    xsd::UNSIGNED_INT,
    xsd::UNSIGNED_LONG,
    xsd::UNSIGNED_SHORT,
    xsd::UNSIGNED_BYTE,
];

/// Evaluates SPARQL expressions against a single solution.
///
/// Errors of the evaluation (unbound variables, type errors, unsupported functions) are
/// *expected* errors. A filter that raises such an error rejects the solution.
#[derive(Clone, Copy, Debug)]
pub struct ExpressionEvaluator<'a> {
    bindings: &'a Bindings,
}

impl<'a> ExpressionEvaluator<'a> {
    pub fn new(bindings: &'a Bindings) -> Self {
        Self { bindings }
    }

    /// Returns whether the solution passes `filter`.
    pub fn accepts(&self, filter: &Expression) -> bool {
        self.effective_boolean_value(filter).unwrap_or(false)
    }

    pub fn effective_boolean_value(&self, expression: &Expression) -> FilterResult<bool> {
        effective_boolean_value(self.evaluate(expression)?.as_ref())
    }

    /// Evaluates `expression` to an RDF term.
    pub fn evaluate(&self, expression: &Expression) -> FilterResult<Term> {
        match expression {
            Expression::NamedNode(node) => Ok(node.clone().into()),
            Expression::Literal(literal) => Ok(literal.clone().into()),
            Expression::Variable(variable) => match self.bindings.get(variable) {
                Some(term) => Ok(term.clone()),
                None => Err(FilterError::Unbound),
            },
            Expression::Bound(variable) => Ok(boolean(self.bindings.contains_key(variable))),
            Expression::Not(inner) => Ok(boolean(!self.effective_boolean_value(inner)?)),
            Expression::Or(lhs, rhs) => {
                match (
                    self.effective_boolean_value(lhs),
                    self.effective_boolean_value(rhs),
                ) {
                    (Ok(true), _) | (_, Ok(true)) => Ok(boolean(true)),
                    (Ok(false), Ok(false)) => Ok(boolean(false)),
                    (Err(error), _) | (_, Err(error)) => Err(error),
                }
            }
            Expression::And(lhs, rhs) => {
                match (
                    self.effective_boolean_value(lhs),
                    self.effective_boolean_value(rhs),
                ) {
                    (Ok(false), _) | (_, Ok(false)) => Ok(boolean(false)),
                    (Ok(true), Ok(true)) => Ok(boolean(true)),
                    (Err(error), _) | (_, Err(error)) => Err(error),
                }
            }
            Expression::Equal(lhs, rhs) => {
                let (lhs, rhs) = (self.evaluate(lhs)?, self.evaluate(rhs)?);
                Ok(boolean(rdf_term_equal(lhs.as_ref(), rhs.as_ref())?))
            }
            Expression::SameTerm(lhs, rhs) => {
                Ok(boolean(self.evaluate(lhs)? == self.evaluate(rhs)?))
            }
            Expression::Greater(lhs, rhs) => self.compare(lhs, rhs, Ordering::is_gt),
            Expression::GreaterOrEqual(lhs, rhs) => self.compare(lhs, rhs, Ordering::is_ge),
            Expression::Less(lhs, rhs) => self.compare(lhs, rhs, Ordering::is_lt),
            Expression::LessOrEqual(lhs, rhs) => self.compare(lhs, rhs, Ordering::is_le),
            Expression::In(lhs, rhs) => self.evaluate_in(lhs, rhs),
            Expression::Add(lhs, rhs) => self.arithmetic(lhs, rhs, i64::checked_add, |a, b| a + b),
            Expression::Subtract(lhs, rhs) => {
                self.arithmetic(lhs, rhs, i64::checked_sub, |a, b| a - b)
            }
            Expression::Multiply(lhs, rhs) => {
                self.arithmetic(lhs, rhs, i64::checked_mul, |a, b| a * b)
            }
            Expression::Divide(lhs, rhs) => {
                let (lhs, rhs) = (
                    numeric(self.evaluate(lhs)?.as_ref())?.as_f64(),
                    numeric(self.evaluate(rhs)?.as_ref())?.as_f64(),
                );
                if rhs == 0.0 {
                    return Err(FilterError::Arithmetic);
                }
                Ok(Literal::from(lhs / rhs).into())
            }
            Expression::UnaryPlus(inner) => {
                let value = self.evaluate(inner)?;
                numeric(value.as_ref())?;
                Ok(value)
            }
            Expression::UnaryMinus(inner) => match numeric(self.evaluate(inner)?.as_ref())? {
                Numeric::Integer(value) => Ok(Literal::from(
                    value.checked_neg().ok_or(FilterError::Arithmetic)?,
                )
                .into()),
                Numeric::Double(value) => Ok(Literal::from(-value).into()),
            },
            // Sub-patterns cannot be evaluated against a single solution.
            Expression::Exists(_) => Err(FilterError::Unsupported),
            Expression::If(test, if_true, if_false) => {
                if self.effective_boolean_value(test)? {
                    self.evaluate(if_true)
                } else {
                    self.evaluate(if_false)
                }
            }
            Expression::Coalesce(args) => {
                let mut error = FilterError::Unbound;
                for arg in args {
                    match self.evaluate(arg) {
                        Ok(value) => return Ok(value),
                        Err(e) => error = e,
                    }
                }
                Err(error)
            }
            Expression::FunctionCall(function, args) => self.evaluate_function(function, args),
        }
    }

    fn compare(
        &self,
        lhs: &Expression,
        rhs: &Expression,
        predicate: fn(Ordering) -> bool,
    ) -> FilterResult<Term> {
        let (lhs, rhs) = (self.evaluate(lhs)?, self.evaluate(rhs)?);
        Ok(boolean(predicate(compare_terms(lhs.as_ref(), rhs.as_ref())?)))
    }

    fn evaluate_in(&self, lhs: &Expression, rhs: &[Expression]) -> FilterResult<Term> {
        let value = self.evaluate(lhs)?;
        let mut error = None;
        for candidate in rhs {
            match self
                .evaluate(candidate)
                .and_then(|candidate| rdf_term_equal(value.as_ref(), candidate.as_ref()))
            {
                Ok(true) => return Ok(boolean(true)),
                Ok(false) => {}
                Err(e) => error = Some(e),
            }
        }
        match error {
            Some(error) => Err(error),
            None => Ok(boolean(false)),
        }
    }

    fn arithmetic(
        &self,
        lhs: &Expression,
        rhs: &Expression,
        integer: fn(i64, i64) -> Option<i64>,
        double: fn(f64, f64) -> f64,
    ) -> FilterResult<Term> {
        let lhs = numeric(self.evaluate(lhs)?.as_ref())?;
        let rhs = numeric(self.evaluate(rhs)?.as_ref())?;
        match (lhs, rhs) {
            (Numeric::Integer(lhs), Numeric::Integer(rhs)) => Ok(Literal::from(
                integer(lhs, rhs).ok_or(FilterError::Arithmetic)?,
            )
            .into()),
            _ => Ok(Literal::from(double(lhs.as_f64(), rhs.as_f64())).into()),
        }
    }

    fn evaluate_function(&self, function: &Function, args: &[Expression]) -> FilterResult<Term> {
        let args = args
            .iter()
            .map(|arg| self.evaluate(arg))
            .collect::<FilterResult<Vec<_>>>()?;
        match (function, args.as_slice()) {
            (Function::Str, [term]) => match term {
                Term::NamedNode(node) => Ok(Literal::new_simple_literal(node.as_str()).into()),
                Term::Literal(literal) => Ok(Literal::new_simple_literal(literal.value()).into()),
                Term::BlankNode(_) => Err(FilterError::TypeMismatch),
            },
            (Function::Lang, [Term::Literal(literal)]) => {
                Ok(Literal::new_simple_literal(literal.language().unwrap_or_default()).into())
            }
            (Function::Datatype, [Term::Literal(literal)]) => {
                Ok(literal.datatype().into_owned().into())
            }
            (Function::IsIri, [term]) => Ok(boolean(matches!(term, Term::NamedNode(_)))),
            (Function::IsBlank, [term]) => Ok(boolean(matches!(term, Term::BlankNode(_)))),
            (Function::IsLiteral, [term]) => Ok(boolean(matches!(term, Term::Literal(_)))),
            (Function::IsNumeric, [term]) => Ok(boolean(numeric(term.as_ref()).is_ok())),
            (Function::StrLen, [term]) => {
                let (value, _) = string(term.as_ref())?;
                let length =
                    i64::try_from(value.chars().count()).map_err(|_| FilterError::Arithmetic)?;
                Ok(Literal::from(length).into())
            }
            (Function::UCase, [term]) => {
                let (value, language) = string(term.as_ref())?;
                Ok(string_like(value.to_uppercase(), language))
            }
            (Function::LCase, [term]) => {
                let (value, language) = string(term.as_ref())?;
                Ok(string_like(value.to_lowercase(), language))
            }
            (Function::Contains, [lhs, rhs]) => {
                let ((lhs, _), (rhs, _)) = (string(lhs.as_ref())?, string(rhs.as_ref())?);
                Ok(boolean(lhs.contains(rhs)))
            }
            (Function::StrStarts, [lhs, rhs]) => {
                let ((lhs, _), (rhs, _)) = (string(lhs.as_ref())?, string(rhs.as_ref())?);
                Ok(boolean(lhs.starts_with(rhs)))
            }
            (Function::StrEnds, [lhs, rhs]) => {
                let ((lhs, _), (rhs, _)) = (string(lhs.as_ref())?, string(rhs.as_ref())?);
                Ok(boolean(lhs.ends_with(rhs)))
            }
            (Function::Concat, args) => {
                let mut result = String::new();
                for arg in args {
                    result.push_str(string(arg.as_ref())?.0);
                }
                Ok(Literal::new_simple_literal(result).into())
            }
            (Function::LangMatches, [tag, range]) => {
                let ((tag, _), (range, _)) = (string(tag.as_ref())?, string(range.as_ref())?);
                Ok(boolean(lang_matches(tag, range)))
            }
            (Function::Regex, [text, pattern]) => regex(text, pattern, None),
            (Function::Regex, [text, pattern, flags]) => regex(text, pattern, Some(flags)),
            (Function::Abs, [term]) => numeric_function(term, i64::checked_abs, f64::abs),
            (Function::Ceil, [term]) => numeric_function(term, Some, f64::ceil),
            (Function::Floor, [term]) => numeric_function(term, Some, f64::floor),
            (Function::Round, [term]) => numeric_function(term, Some, f64::round),
            _ => Err(FilterError::Unsupported),
        }
    }
}

/// Orders two optional terms for ORDER BY: unbound values first, then blank nodes, IRIs and
/// literals.
pub fn order_terms(lhs: Option<&Term>, rhs: Option<&Term>) -> Ordering {
    fn rank(term: Option<&Term>) -> u8 {
        match term {
            None => 0,
            Some(Term::BlankNode(_)) => 1,
            Some(Term::NamedNode(_)) => 2,
            Some(Term::Literal(_)) => 3,
        }
    }

    match (lhs, rhs) {
        (Some(Term::BlankNode(lhs)), Some(Term::BlankNode(rhs))) => lhs.as_str().cmp(rhs.as_str()),
        (Some(Term::NamedNode(lhs)), Some(Term::NamedNode(rhs))) => lhs.as_str().cmp(rhs.as_str()),
        (Some(Term::Literal(a)), Some(Term::Literal(b))) => {
            compare_terms(a.as_ref().into(), b.as_ref().into())
                .unwrap_or_else(|_| a.value().cmp(b.value()))
        }
        _ => rank(lhs).cmp(&rank(rhs)),
    }
}

/// The effective boolean value of a term.
pub fn effective_boolean_value(term: TermRef<'_>) -> FilterResult<bool> {
    let TermRef::Literal(literal) = term else {
        return Err(FilterError::TypeMismatch);
    };
    if literal.datatype() == xsd::BOOLEAN {
        return match literal.value() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            _ => Err(FilterError::InvalidLexicalForm),
        };
    }
    if let Ok((value, None)) = string(term) {
        return Ok(!value.is_empty());
    }
    match numeric(term)? {
        Numeric::Integer(value) => Ok(value != 0),
        Numeric::Double(value) => Ok(value != 0.0 && !value.is_nan()),
    }
}

/// The `=` operator of SPARQL.
pub fn rdf_term_equal(lhs: TermRef<'_>, rhs: TermRef<'_>) -> FilterResult<bool> {
    if let (Ok(lhs), Ok(rhs)) = (numeric(lhs), numeric(rhs)) {
        return Ok(lhs.compare(rhs) == Some(Ordering::Equal));
    }
    match (lhs, rhs) {
        (TermRef::Literal(a), TermRef::Literal(b)) => {
            if a == b {
                Ok(true)
            } else if a.datatype() == b.datatype()
                || (is_plain(a) && is_plain(b))
                || a.datatype() == xsd::BOOLEAN
                || b.datatype() == xsd::BOOLEAN
            {
                Ok(false)
            } else {
                Err(FilterError::TypeMismatch)
            }
        }
        _ => Ok(lhs == rhs),
    }
}

/// Compares two terms with the `<` operator family of SPARQL.
pub fn compare_terms(lhs: TermRef<'_>, rhs: TermRef<'_>) -> FilterResult<Ordering> {
    if let (Ok(lhs), Ok(rhs)) = (numeric(lhs), numeric(rhs)) {
        return lhs.compare(rhs).ok_or(FilterError::TypeMismatch);
    }
    match (string(lhs), string(rhs)) {
        (Ok((lhs, None)), Ok((rhs, None))) => return Ok(lhs.cmp(rhs)),
        (Ok((lhs, Some(a))), Ok((rhs, Some(b)))) if a == b => return Ok(lhs.cmp(rhs)),
        _ => {}
    }
    if let (TermRef::Literal(a), TermRef::Literal(b)) = (lhs, rhs) {
        if a.datatype() == xsd::BOOLEAN && b.datatype() == xsd::BOOLEAN {
            let (a, b) = (effective_boolean_value(lhs)?, effective_boolean_value(rhs)?);
            return Ok(a.cmp(&b));
        }
        if a.datatype() == xsd::DATE_TIME && b.datatype() == xsd::DATE_TIME {
            return Ok(a.value().cmp(b.value()));
        }
    }
    Err(FilterError::TypeMismatch)
}

#[derive(Clone, Copy, Debug)]
enum Numeric {
    Integer(i64),
    Double(f64),
}

impl Numeric {
    fn as_f64(self) -> f64 {
        match self {
            #[allow(clippy::cast_precision_loss, reason = "SPARQL promotes integers to doubles")]
            Numeric::Integer(value) => value as f64,
            Numeric::Double(value) => value,
        }
    }

    fn compare(self, other: Numeric) -> Option<Ordering> {
        match (self, other) {
            (Numeric::Integer(a), Numeric::Integer(b)) => Some(a.cmp(&b)),
            _ => self.as_f64().partial_cmp(&other.as_f64()),
        }
    }
}

fn numeric(term: TermRef<'_>) -> FilterResult<Numeric> {
    let TermRef::Literal(literal) = term else {
        return Err(FilterError::TypeMismatch);
    };
    let datatype = literal.datatype();
    if INTEGER_TYPES.contains(&datatype) {
        return Ok(Numeric::Integer(i64::from_str(literal.value())?));
    }
    if datatype == xsd::DECIMAL {
        Decimal::from_str(literal.value())?;
        return Ok(Numeric::Double(f64::from(Double::from_str(literal.value())?)));
    }
    if datatype == xsd::DOUBLE || datatype == xsd::FLOAT {
        return Ok(Numeric::Double(f64::from(Double::from_str(literal.value())?)));
    }
    Err(FilterError::TypeMismatch)
}

/// Returns the lexical form and the language of string literals.
fn string(term: TermRef<'_>) -> FilterResult<(&str, Option<&str>)> {
    match term {
        TermRef::Literal(literal) if is_plain(literal) => {
            Ok((literal.value(), literal.language()))
        }
        _ => Err(FilterError::TypeMismatch),
    }
}

fn is_plain(literal: LiteralRef<'_>) -> bool {
    literal.datatype() == xsd::STRING || literal.datatype() == rdf::LANG_STRING
}

fn string_like(value: String, language: Option<&str>) -> Term {
    match language {
        Some(language) => Literal::new_language_tagged_literal_unchecked(value, language).into(),
        None => Literal::new_simple_literal(value).into(),
    }
}

fn boolean(value: bool) -> Term {
    Literal::from(value).into()
}

fn lang_matches(tag: &str, range: &str) -> bool {
    if range == "*" {
        return !tag.is_empty();
    }
    let tag = tag.to_ascii_lowercase();
    let range = range.to_ascii_lowercase();
    tag == range
        || tag
            .strip_prefix(&range)
            .is_some_and(|rest| rest.starts_with('-'))
}

fn regex(text: &Term, pattern: &Term, flags: Option<&Term>) -> FilterResult<Term> {
    let (text, _) = string(text.as_ref())?;
    let (pattern, _) = string(pattern.as_ref())?;
    let flags = match flags {
        Some(flags) => string(flags.as_ref())?.0,
        None => "",
    };
    let regex = RegexBuilder::new(pattern)
        .case_insensitive(flags.contains('i'))
        .multi_line(flags.contains('m'))
        .dot_matches_new_line(flags.contains('s'))
        .ignore_whitespace(flags.contains('x'))
        .build()
        .map_err(|_| FilterError::InvalidRegex)?;
    Ok(boolean(regex.is_match(text)))
}

fn numeric_function(
    term: &Term,
    integer: fn(i64) -> Option<i64>,
    double: fn(f64) -> f64,
) -> FilterResult<Term> {
    match numeric(term.as_ref())? {
        Numeric::Integer(value) => {
            Ok(Literal::from(integer(value).ok_or(FilterError::Arithmetic)?).into())
        }
        Numeric::Double(value) => Ok(Literal::from(double(value)).into()),
    }
}

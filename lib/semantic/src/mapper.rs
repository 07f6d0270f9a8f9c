use quadcloud_can::{Coordinate, Element, RoutingKey, Zone, ZoneError};
use quadcloud_model::{quad_term_refs, ModelError, Quad, QuadPattern, TermRef};
use std::borrow::Cow;

/// Number of dimensions of a semantic coordinate space: graph, subject, predicate and object.
pub const SEMANTIC_DIMENSIONS: usize = 4;

/// The character used for terms whose doped form is empty.
pub const EMPTY_ELEMENT: char = '\u{A2}';

/// Transforms the lexical form of an IRI before it is projected into the coordinate space.
///
/// Blank nodes always use their label and literals their lexical form.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum DopingFunction {
    /// Keeps the local name of an IRI (the part after the last `/` or `#`). IRIs without a path
    /// keep their authority, without the scheme and a leading `www.`.
    #[default]
    PrefixRemoval,
    /// Uses the IRI as is.
    Identity,
    /// Reverses the IRI, which spreads IRIs sharing long common prefixes.
    Reverse,
}

impl DopingFunction {
    /// Returns whether the projection of literals preserves their lexical order. Range
    /// constraints can only be pushed into the routing if this holds.
    pub fn preserves_literal_order(self) -> bool {
        !matches!(self, DopingFunction::Reverse)
    }
}

/// Projects RDF terms and quadruples into the semantic coordinate space.
///
/// The projection is a pure function of the lexical form of a term. Every peer must use the same
/// mapper for routing to work.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SemanticMapper {
    doping: DopingFunction,
    lower: char,
    upper: char,
    max_element_length: usize,
}

impl SemanticMapper {
    /// Creates a new [SemanticMapper] for the space `[lower, upper)` on every dimension.
    pub fn new(
        doping: DopingFunction,
        lower: char,
        upper: char,
        max_element_length: usize,
    ) -> Self {
        Self {
            doping,
            lower,
            upper,
            max_element_length: max_element_length.max(1),
        }
    }

    pub fn doping(&self) -> DopingFunction {
        self.doping
    }

    /// The zone covering the entire semantic coordinate space.
    pub fn space(&self) -> Result<Zone, ZoneError> {
        Zone::space(
            SEMANTIC_DIMENSIONS,
            Element::from(self.lower),
            Element::from(self.upper),
        )
    }

    /// Projects a single term.
    ///
    /// The projection preserves the code point order of the doped strings, but not strictly:
    /// truncation and clamping map distinct strings to the same element. A code point below the
    /// space ends the element, as the result must not exceed any string continuing with an
    /// in-range code point. A code point above the space saturates the rest of the element.
    pub fn element(&self, term: TermRef<'_>) -> Element {
        let text = self.dope(term);
        let text = if text.is_empty() {
            Cow::Owned(EMPTY_ELEMENT.to_string())
        } else {
            text
        };

        let lower = u32::from(self.lower);
        let upper = u32::from(self.upper).saturating_sub(1).max(lower);
        let mut digits = Vec::with_capacity(self.max_element_length);
        for c in text.chars().map(u32::from) {
            if digits.len() == self.max_element_length {
                break;
            }
            if c < lower {
                digits.push(lower);
                break;
            }
            if c > upper {
                digits.resize(self.max_element_length, upper);
                break;
            }
            digits.push(c);
        }
        Element::from_digits(digits)
    }

    /// Projects the four terms of `quad`.
    pub fn coordinate(&self, quad: &Quad) -> Result<Coordinate, ModelError> {
        let terms = quad_term_refs(quad).ok_or(ModelError::DefaultGraph)?;
        Ok(terms.into_iter().map(|term| self.element(term)).collect())
    }

    /// Projects the bound positions of `pattern`. Unbound positions become wildcards.
    pub fn routing_key(&self, pattern: &QuadPattern) -> RoutingKey {
        RoutingKey::new(
            pattern
                .terms()
                .iter()
                .map(|term| term.as_ref().map(|term| self.element(term.as_ref())))
                .collect(),
        )
    }

    fn dope<'a>(&self, term: TermRef<'a>) -> Cow<'a, str> {
        match term {
            TermRef::NamedNode(node) => match self.doping {
                DopingFunction::PrefixRemoval => Cow::Borrowed(remove_prefix(node.as_str())),
                DopingFunction::Identity => Cow::Borrowed(node.as_str()),
                DopingFunction::Reverse => Cow::Owned(node.as_str().chars().rev().collect()),
            },
            TermRef::BlankNode(node) => Cow::Borrowed(node.as_str()),
            TermRef::Literal(literal) => Cow::Borrowed(literal.value()),
        }
    }
}

/// Removes the namespace of an IRI.
///
/// A trailing `/` or `#` is ignored. If the IRI has neither a path nor a fragment, the scheme and a
/// `www.` prefix are removed instead.
pub fn remove_prefix(iri: &str) -> &str {
    let value = iri.strip_suffix(['/', '#']).unwrap_or(iri);
    let slash = value.rfind('/');
    let sharp = value.rfind('#');

    if let Some(authority) = value.find("://").map(|i| i + 3) {
        let has_path = matches!(slash, Some(slash) if slash >= authority);
        if !has_path && sharp.is_none() {
            return match value.find("www.") {
                Some(www) => &value[www + 4..],
                None => &value[authority..],
            };
        }
    }

    match (slash, sharp) {
        (Some(slash), Some(sharp)) if sharp > slash => &value[sharp + 1..],
        (Some(slash), _) => &value[slash + 1..],
        (None, Some(sharp)) => &value[sharp + 1..],
        (None, None) => value,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use quadcloud_model::{BlankNode, Literal, NamedNode, Term};

    fn mapper() -> SemanticMapper {
        SemanticMapper::new(DopingFunction::PrefixRemoval, '0', '{', 64)
    }

    #[test]
    fn remove_prefix_keeps_local_name() {
        assert_eq!(remove_prefix("http://example.org/people/alice"), "alice");
        assert_eq!(remove_prefix("http://example.org/people/"), "people");
        assert_eq!(remove_prefix("http://xmlns.com/foaf/0.1/#name"), "name");
        assert_eq!(remove_prefix("http://example.org/ns#knows"), "knows");
        assert_eq!(remove_prefix("http://www.inria.fr"), "inria.fr");
        assert_eq!(remove_prefix("http://inria.fr/"), "inria.fr");
        assert_eq!(remove_prefix("urn:isbn:123"), "urn:isbn:123");
    }

    #[test]
    fn projection_is_deterministic() {
        let quad = Quad::new(
            NamedNode::new_unchecked("http://example.org/s"),
            NamedNode::new_unchecked("http://example.org/p"),
            Literal::new_simple_literal("42"),
            NamedNode::new_unchecked("http://example.org/g"),
        );
        let a = mapper().coordinate(&quad).unwrap();
        let b = mapper().coordinate(&quad.clone()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.get(3), Some(&Element::from("42")));
        assert!(mapper().space().unwrap().contains(&a));
    }

    #[test]
    fn elements_are_clamped_into_space() {
        let mapper = mapper();
        let space = mapper.space().unwrap();
        for term in [
            Term::from(Literal::new_simple_literal("~~~")),
            Term::from(Literal::new_simple_literal("")),
            Term::from(Literal::new_simple_literal("!")),
            Term::from(BlankNode::new_unchecked("b0")),
        ] {
            let element = mapper.element(term.as_ref());
            assert_eq!(space.contains_on(0, &element), std::cmp::Ordering::Equal);
        }
    }

    #[test]
    fn projection_preserves_code_point_order() {
        let mapper = SemanticMapper::new(DopingFunction::Identity, '0', '{', 8);
        let mut values = vec![
            "Émile", "Ölaf", "Öab", "Öb", "zz", "zzzzzzzzzz", "z", "za", "!a", "0", "0!", "0a",
            "Bob", "Bobby", "ö", "~", "a~b", "a}", "azz",
        ];
        values.sort_unstable();
        let elements = values
            .iter()
            .map(|value| mapper.element(Literal::new_simple_literal(*value).as_ref().into()))
            .collect::<Vec<_>>();
        for (i, window) in elements.windows(2).enumerate() {
            assert!(
                window[0] <= window[1],
                "{:?} < {:?} but {} > {}",
                values[i],
                values[i + 1],
                window[0],
                window[1]
            );
        }
    }

    #[test]
    fn out_of_space_code_points_stay_ordered() {
        let mapper = mapper();
        let element = |value: &str| mapper.element(Literal::new_simple_literal(value).as_ref().into());
        assert!(element("Émile") <= element("Ölaf"));
        assert!(element("zz") <= element("Émile"));
        assert!(element("Öab") <= element("Öb"));
        assert!(element("0") <= element("!a"));
        assert!(element("!a") <= element("0a"));
    }

    #[test]
    fn long_terms_are_truncated() {
        let mapper = SemanticMapper::new(DopingFunction::Identity, '0', '{', 4);
        let a = mapper.element(Literal::new_simple_literal("abcdef").as_ref().into());
        let b = mapper.element(Literal::new_simple_literal("abcdxy").as_ref().into());
        assert_eq!(a, b);
    }

    #[test]
    fn reverse_doping_reverses_iris() {
        let mapper = SemanticMapper::new(DopingFunction::Reverse, '0', '{', 64);
        let element = mapper.element(NamedNode::new_unchecked("http://a.b/cd").as_ref().into());
        assert_eq!(element.digits().first(), Some(&u32::from('d')));
    }

    #[test]
    fn routing_key_keeps_wildcards() {
        let pattern = QuadPattern::new(
            None,
            None,
            Some(NamedNode::new_unchecked("http://example.org/p").into()),
            None,
        );
        let key = mapper().routing_key(&pattern);
        assert_eq!(key.get(2), Some(&Element::from("p")));
        assert_eq!(key.get(0), None);
    }
}

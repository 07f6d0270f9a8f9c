use crate::{AtomicQuery, SemanticMapper};
use quadcloud_can::{Element, Zone};
use quadcloud_model::vocab::xsd;
use quadcloud_model::{Expression, LiteralRef, QuadPosition, Variable};

/// A comparison operator of a [FilterConstraint]. The variable is always on the left-hand side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Comparison {
    Equal,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
}

impl Comparison {
    /// The operator obtained by swapping both operands.
    fn swap(self) -> Comparison {
        match self {
            Comparison::Equal => Comparison::Equal,
            Comparison::Less => Comparison::Greater,
            Comparison::LessOrEqual => Comparison::GreaterOrEqual,
            Comparison::Greater => Comparison::Less,
            Comparison::GreaterOrEqual => Comparison::LessOrEqual,
        }
    }
}

/// A restriction of the zones an atomic query must visit, derived from a FILTER.
///
/// The semantic projection of string literals preserves their order but is not injective (long
/// literals are truncated, code points outside the space are clamped). Therefore, strict
/// comparisons are relaxed to their non-strict counterparts, and a constraint only excludes zones
/// that certainly contain no solution.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum FilterConstraint {
    Compare {
        position: QuadPosition,
        comparison: Comparison,
        element: Element,
    },
    And(Box<FilterConstraint>, Box<FilterConstraint>),
    Or(Box<FilterConstraint>, Box<FilterConstraint>),
}

impl FilterConstraint {
    /// Translates `expression` into a constraint on the positions of `query`.
    ///
    /// Only comparisons between a variable and a simple string literal are translated, combined with
    /// `&&` and `||`. Returns [None] if the expression does not restrict the routing.
    pub fn from_expression(
        expression: &Expression,
        query: &AtomicQuery,
        mapper: &SemanticMapper,
    ) -> Option<FilterConstraint> {
        if !mapper.doping().preserves_literal_order() {
            return None;
        }
        Self::translate(expression, query, mapper)
    }

    fn translate(
        expression: &Expression,
        query: &AtomicQuery,
        mapper: &SemanticMapper,
    ) -> Option<FilterConstraint> {
        match expression {
            Expression::And(lhs, rhs) => match (
                Self::translate(lhs, query, mapper),
                Self::translate(rhs, query, mapper),
            ) {
                (Some(lhs), Some(rhs)) => Some(FilterConstraint::And(Box::new(lhs), Box::new(rhs))),
                (Some(constraint), None) | (None, Some(constraint)) => Some(constraint),
                (None, None) => None,
            },
            Expression::Or(lhs, rhs) => Some(FilterConstraint::Or(
                Box::new(Self::translate(lhs, query, mapper)?),
                Box::new(Self::translate(rhs, query, mapper)?),
            )),
            Expression::Equal(lhs, rhs) => Self::compare(Comparison::Equal, lhs, rhs, query, mapper),
            Expression::Less(lhs, rhs) => Self::compare(Comparison::Less, lhs, rhs, query, mapper),
            Expression::LessOrEqual(lhs, rhs) => {
                Self::compare(Comparison::LessOrEqual, lhs, rhs, query, mapper)
            }
            Expression::Greater(lhs, rhs) => {
                Self::compare(Comparison::Greater, lhs, rhs, query, mapper)
            }
            Expression::GreaterOrEqual(lhs, rhs) => {
                Self::compare(Comparison::GreaterOrEqual, lhs, rhs, query, mapper)
            }
            _ => None,
        }
    }

    fn compare(
        comparison: Comparison,
        lhs: &Expression,
        rhs: &Expression,
        query: &AtomicQuery,
        mapper: &SemanticMapper,
    ) -> Option<FilterConstraint> {
        let (variable, comparison, literal) = match (lhs, rhs) {
            (Expression::Variable(variable), Expression::Literal(literal)) => {
                (variable, comparison, literal)
            }
            (Expression::Literal(literal), Expression::Variable(variable)) => {
                (variable, comparison.swap(), literal)
            }
            _ => return None,
        };
        let position = query.position_of(variable)?;
        if !is_string_literal(literal.as_ref()) || literal.value().is_empty() {
            return None;
        }

        let element = mapper.element(literal.as_ref().into());
        let constraint = FilterConstraint::Compare {
            position,
            comparison,
            element,
        };
        match comparison {
            // The empty string is projected to a dedicated element that breaks the order.
            Comparison::Less | Comparison::LessOrEqual => {
                let empty = mapper.element(LiteralRef::new_simple_literal("").into());
                Some(FilterConstraint::Or(
                    Box::new(constraint),
                    Box::new(FilterConstraint::Compare {
                        position,
                        comparison: Comparison::Equal,
                        element: empty,
                    }),
                ))
            }
            _ => Some(constraint),
        }
    }

    /// Returns whether `zone` may contain a solution of the constraint.
    pub fn admits(&self, zone: &Zone) -> bool {
        match self {
            FilterConstraint::Compare {
                position,
                comparison,
                element,
            } => {
                let dimension = position.dimension();
                let (Some(lower), Some(upper)) =
                    (zone.lower().get(dimension), zone.upper().get(dimension))
                else {
                    return true;
                };
                match comparison {
                    Comparison::Equal => lower <= element && element < upper,
                    Comparison::Less | Comparison::LessOrEqual => lower <= element,
                    Comparison::Greater | Comparison::GreaterOrEqual => element < upper,
                }
            }
            FilterConstraint::And(lhs, rhs) => lhs.admits(zone) && rhs.admits(zone),
            FilterConstraint::Or(lhs, rhs) => lhs.admits(zone) || rhs.admits(zone),
        }
    }

    /// The positions the constraint refers to.
    pub fn positions(&self) -> Vec<QuadPosition> {
        match self {
            FilterConstraint::Compare { position, .. } => vec![*position],
            FilterConstraint::And(lhs, rhs) | FilterConstraint::Or(lhs, rhs) => {
                let mut positions = lhs.positions();
                positions.extend(rhs.positions());
                positions
            }
        }
    }
}

fn is_string_literal(literal: LiteralRef<'_>) -> bool {
    literal.language().is_none() && literal.datatype() == xsd::STRING
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{DopingFunction, QueryTerm};
    use quadcloud_model::{GraphPattern, NamedNode, Query};

    fn mapper() -> SemanticMapper {
        SemanticMapper::new(DopingFunction::PrefixRemoval, '0', '{', 64)
    }

    fn query() -> AtomicQuery {
        AtomicQuery::new(
            QueryTerm::Bound(NamedNode::new_unchecked("http://example.org/g").into()),
            QueryTerm::Variable(Variable::new_unchecked("s")),
            QueryTerm::Bound(NamedNode::new_unchecked("http://example.org/name").into()),
            QueryTerm::Variable(Variable::new_unchecked("name")),
        )
    }

    fn find_filter(pattern: &GraphPattern) -> Option<Expression> {
        match pattern {
            GraphPattern::Filter { expr, .. } => Some(expr.clone()),
            GraphPattern::Project { inner, .. } | GraphPattern::Graph { inner, .. } => {
                find_filter(inner)
            }
            _ => None,
        }
    }

    fn filter(expression: &str) -> Expression {
        let query = format!(
            "SELECT * WHERE {{ GRAPH <http://example.org/g> {{ ?s ?p ?name FILTER({expression}) }} }}"
        );
        match Query::parse(&query, None).unwrap() {
            Query::Select { pattern, .. } => find_filter(&pattern).unwrap(),
            _ => unreachable!(),
        }
    }

    fn object_halves() -> (Zone, Zone) {
        mapper().space().unwrap().split(3).unwrap()
    }

    #[test]
    fn greater_than_prunes_lower_zone() {
        let constraint =
            FilterConstraint::from_expression(&filter("?name > \"m\""), &query(), &mapper())
                .unwrap();
        let (lower, upper) = object_halves();
        assert!(!constraint.admits(&lower));
        assert!(constraint.admits(&upper));
    }

    #[test]
    fn swapped_operands_are_normalized() {
        let constraint =
            FilterConstraint::from_expression(&filter("\"m\" < ?name"), &query(), &mapper())
                .unwrap();
        let (lower, upper) = object_halves();
        assert!(!constraint.admits(&lower));
        assert!(constraint.admits(&upper));
    }

    #[test]
    fn equality_selects_a_single_zone() {
        let constraint =
            FilterConstraint::from_expression(&filter("?name = \"Alice\""), &query(), &mapper())
                .unwrap();
        let (lower, upper) = object_halves();
        assert!(constraint.admits(&lower));
        assert!(!constraint.admits(&upper));
    }

    #[test]
    fn disjunction_with_opaque_part_is_not_translated() {
        let expression = filter("?name = \"Alice\" || isIRI(?name)");
        assert!(FilterConstraint::from_expression(&expression, &query(), &mapper()).is_none());

        let expression = filter("?name = \"Alice\" && isIRI(?name)");
        assert!(FilterConstraint::from_expression(&expression, &query(), &mapper()).is_some());
    }

    /// Narrows the space along the object dimension down to a small zone containing `element`.
    fn zone_containing(element: &Element, splits: usize) -> Zone {
        let mut zone = mapper().space().unwrap();
        for _ in 0..splits {
            let (lower, upper) = zone.split(3).unwrap();
            zone = if upper.contains_on(3, element) == std::cmp::Ordering::Equal {
                upper
            } else {
                lower
            };
        }
        zone
    }

    #[test]
    fn clamped_literals_are_not_pruned() {
        let mapper = mapper();
        let olaf = mapper.element(LiteralRef::new_simple_literal("Ölaf").into());
        let emile = mapper.element(LiteralRef::new_simple_literal("Émile").into());
        let zz = mapper.element(LiteralRef::new_simple_literal("zz").into());

        let greater =
            FilterConstraint::from_expression(&filter("?name > \"Émile\""), &query(), &mapper)
                .unwrap();
        let less =
            FilterConstraint::from_expression(&filter("?name < \"Ölaf\""), &query(), &mapper)
                .unwrap();
        for splits in 0..12 {
            assert!(greater.admits(&zone_containing(&olaf, splits)));
            assert!(less.admits(&zone_containing(&emile, splits)));
            assert!(less.admits(&zone_containing(&zz, splits)));
        }
        let bob = mapper.element(LiteralRef::new_simple_literal("Bob").into());
        assert!(!greater.admits(&zone_containing(&bob, 12)));
    }

    #[test]
    fn typed_literals_are_not_translated() {
        let expression = filter("?name > 5");
        assert!(FilterConstraint::from_expression(&expression, &query(), &mapper()).is_none());
    }
}

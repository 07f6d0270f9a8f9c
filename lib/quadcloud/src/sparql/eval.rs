use crate::Solutions;
use itertools::Itertools;
use quadcloud_model::{
    BlankNode, GraphName, NamedNode, NamedNodePattern, OrderExpression, Quad, Subject, Term,
    TermPattern, TriplePattern,
};
use quadcloud_semantic::{order_terms, Bindings, DecomposedQuery, ExpressionEvaluator, QueryForm};
use rustc_hash::FxHashMap;
use std::cmp::Ordering;

/// Computes the solutions of `query` from the quadruples returned for each of its atomic queries.
///
/// `answers[i]` holds the quadruples found for the `i`-th atomic query. The solutions are the join
/// of the per-query bindings, filtered by the global filters and ordered. Projection, duplicate
/// elimination and slicing are applied by [project].
pub fn solutions(query: &DecomposedQuery, answers: &[Vec<Quad>]) -> Vec<Bindings> {
    let mut solutions = vec![Bindings::new()];
    for (atomic_query, quads) in query.atomic_queries.iter().zip(answers) {
        let bindings = quads
            .iter()
            .filter_map(|quad| atomic_query.matches(quad))
            .filter(|bindings| {
                let evaluator = ExpressionEvaluator::new(bindings);
                atomic_query
                    .filters()
                    .iter()
                    .all(|filter| evaluator.accepts(filter))
            })
            .unique()
            .collect::<Vec<_>>();
        solutions = join(&solutions, &bindings);
        if solutions.is_empty() {
            return solutions;
        }
    }

    solutions.retain(|solution| {
        let evaluator = ExpressionEvaluator::new(solution);
        query.filters.iter().all(|filter| evaluator.accepts(filter))
    });

    if !query.modifiers.order_by.is_empty() {
        solutions.sort_by(|lhs, rhs| compare_solutions(&query.modifiers.order_by, lhs, rhs));
    }
    solutions
}

/// Joins two sequences of solutions on their shared variables.
pub fn join(lhs: &[Bindings], rhs: &[Bindings]) -> Vec<Bindings> {
    lhs.iter()
        .cartesian_product(rhs)
        .filter_map(|(lhs, rhs)| merge(lhs, rhs))
        .collect()
}

fn merge(lhs: &Bindings, rhs: &Bindings) -> Option<Bindings> {
    let mut result = lhs.clone();
    for (variable, term) in rhs {
        match result.get(variable) {
            Some(existing) if existing != term => return None,
            Some(_) => {}
            None => {
                result.insert(variable.clone(), term.clone());
            }
        }
    }
    Some(result)
}

fn compare_solutions(order_by: &[OrderExpression], lhs: &Bindings, rhs: &Bindings) -> Ordering {
    for expression in order_by {
        let (inner, descending) = match expression {
            OrderExpression::Asc(inner) => (inner, false),
            OrderExpression::Desc(inner) => (inner, true),
        };
        let lhs = ExpressionEvaluator::new(lhs).evaluate(inner).ok();
        let rhs = ExpressionEvaluator::new(rhs).evaluate(inner).ok();
        let ordering = order_terms(lhs.as_ref(), rhs.as_ref());
        let ordering = if descending {
            ordering.reverse()
        } else {
            ordering
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Applies DISTINCT/REDUCED, OFFSET and LIMIT to ordered solutions.
fn slice(query: &DecomposedQuery, solutions: Vec<Bindings>) -> Vec<Bindings> {
    let modifiers = &query.modifiers;
    let solutions: Box<dyn Iterator<Item = Bindings>> = if modifiers.distinct || modifiers.reduced
    {
        Box::new(solutions.into_iter().unique())
    } else {
        Box::new(solutions.into_iter())
    };
    let solutions = solutions.skip(modifiers.offset);
    match modifiers.limit {
        Some(limit) => solutions.take(limit).collect(),
        None => solutions.collect(),
    }
}

/// Restricts the solutions to the projected variables, then removes duplicates and slices.
pub fn project(query: &DecomposedQuery, solutions: Vec<Bindings>) -> Solutions {
    let variables = match &query.form {
        QueryForm::Select { projection } | QueryForm::Describe { projection } => {
            projection.clone()
        }
        QueryForm::Ask | QueryForm::Construct { .. } => query.variables(),
    };
    let rows = solutions
        .into_iter()
        .map(|solution| {
            solution
                .into_iter()
                .filter(|(variable, _)| variables.contains(variable))
                .collect::<Bindings>()
        })
        .collect();
    Solutions::new(variables, slice(query, rows))
}

/// Instantiates the CONSTRUCT template of `query` once per solution.
///
/// Blank nodes of the template are replaced by fresh blank nodes for each solution. Triples whose
/// instantiation is not a valid RDF triple (e.g., a literal subject or an unbound variable) are
/// skipped.
pub fn construct(query: &DecomposedQuery, solutions: Vec<Bindings>) -> Vec<Quad> {
    let QueryForm::Construct { template } = &query.form else {
        return Vec::new();
    };

    let mut quads = Vec::new();
    for solution in slice(query, solutions) {
        let Some(graph) = graph_name(query, &solution) else {
            continue;
        };
        let mut blank_nodes = FxHashMap::default();
        for pattern in template {
            if let Some(quad) = instantiate(pattern, &solution, &graph, &mut blank_nodes) {
                if !quads.contains(&quad) {
                    quads.push(quad);
                }
            }
        }
    }
    quads
}

/// The resources to describe: the IRIs bound to the projected variables of a DESCRIBE query.
pub fn describe_targets(query: &DecomposedQuery, solutions: Vec<Bindings>) -> Vec<NamedNode> {
    let QueryForm::Describe { projection } = &query.form else {
        return Vec::new();
    };
    slice(query, solutions)
        .into_iter()
        .flat_map(|solution| {
            projection
                .iter()
                .filter_map(|variable| match solution.get(variable) {
                    Some(Term::NamedNode(node)) => Some(node.clone()),
                    _ => None,
                })
                .collect::<Vec<_>>()
        })
        .unique()
        .collect()
}

fn graph_name(query: &DecomposedQuery, solution: &Bindings) -> Option<GraphName> {
    match query.graph.substitute(solution).as_bound() {
        Some(Term::NamedNode(node)) => Some(GraphName::NamedNode(node.clone())),
        _ => None,
    }
}

fn instantiate(
    pattern: &TriplePattern,
    solution: &Bindings,
    graph: &GraphName,
    blank_nodes: &mut FxHashMap<String, BlankNode>,
) -> Option<Quad> {
    let subject = match instantiate_term(&pattern.subject, solution, blank_nodes)? {
        Term::NamedNode(node) => Subject::NamedNode(node),
        Term::BlankNode(node) => Subject::BlankNode(node),
        _ => return None,
    };
    let predicate = match &pattern.predicate {
        NamedNodePattern::NamedNode(node) => node.clone(),
        NamedNodePattern::Variable(variable) => match solution.get(variable) {
            Some(Term::NamedNode(node)) => node.clone(),
            _ => return None,
        },
    };
    let object = instantiate_term(&pattern.object, solution, blank_nodes)?;
    Some(Quad::new(subject, predicate, object, graph.clone()))
}

fn instantiate_term(
    pattern: &TermPattern,
    solution: &Bindings,
    blank_nodes: &mut FxHashMap<String, BlankNode>,
) -> Option<Term> {
    match pattern {
        TermPattern::NamedNode(node) => Some(node.clone().into()),
        TermPattern::Literal(literal) => Some(literal.clone().into()),
        TermPattern::BlankNode(node) => Some(
            blank_nodes
                .entry(node.as_str().to_owned())
                .or_default()
                .clone()
                .into(),
        ),
        TermPattern::Variable(variable) => solution.get(variable).cloned(),
        #[allow(unreachable_patterns, reason = "Depends on the rdf-star feature of spargebra.")]
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use quadcloud_model::{Literal, Variable};
    use quadcloud_semantic::{DopingFunction, SemanticMapper, SparqlDecomposer};

    fn decompose(sparql: &str) -> DecomposedQuery {
        SparqlDecomposer::new(SemanticMapper::new(
            DopingFunction::PrefixRemoval,
            '0',
            '{',
            64,
        ))
        .decompose(sparql)
        .unwrap()
    }

    fn variable(name: &str) -> Variable {
        Variable::new_unchecked(name)
    }

    fn quad(subject: &str, predicate: &str, object: Term) -> Quad {
        Quad::new(
            NamedNode::new_unchecked(format!("http://example.org/{subject}")),
            NamedNode::new_unchecked(format!("http://example.org/{predicate}")),
            object,
            NamedNode::new_unchecked("http://example.org/g"),
        )
    }

    fn iri(local: &str) -> Term {
        NamedNode::new_unchecked(format!("http://example.org/{local}")).into()
    }

    #[test]
    fn joins_on_shared_variables() {
        let query = decompose(
            "SELECT ?name WHERE { GRAPH <http://example.org/g> { \
             ?person <http://example.org/knows> <http://example.org/bob> . \
             ?person <http://example.org/name> ?name } }",
        );
        let answers = vec![
            vec![
                quad("alice", "knows", iri("bob")),
                quad("carol", "knows", iri("bob")),
            ],
            vec![
                quad("alice", "name", Literal::new_simple_literal("Alice").into()),
                quad("dave", "name", Literal::new_simple_literal("Dave").into()),
            ],
        ];

        let result = project(&query, solutions(&query, &answers));

        assert_eq!(result.len(), 1);
        assert_eq!(
            result.rows()[0].get(&variable("name")),
            Some(&Literal::new_simple_literal("Alice").into())
        );
        assert!(!result.rows()[0].contains_key(&variable("person")));
    }

    #[test]
    fn orders_and_slices_solutions() {
        let query = decompose(
            "SELECT ?age WHERE { GRAPH <http://example.org/g> { ?s <http://example.org/age> ?age } } \
             ORDER BY DESC(?age) OFFSET 1 LIMIT 1",
        );
        let answers = vec![["a", "b", "c"]
            .into_iter()
            .zip([3, 1, 2])
            .map(|(subject, age)| quad(subject, "age", Literal::from(age).into()))
            .collect()];

        let result = project(&query, solutions(&query, &answers));

        assert_eq!(result.len(), 1);
        assert_eq!(
            result.rows()[0].get(&variable("age")),
            Some(&Literal::from(2).into())
        );
    }

    #[test]
    fn global_filters_reject_solutions() {
        let query = decompose(
            "SELECT * WHERE { GRAPH <http://example.org/g> { \
             ?a <http://example.org/age> ?x . ?b <http://example.org/age> ?y FILTER(?x < ?y) } }",
        );
        let answers = vec![
            vec![quad("a", "age", Literal::from(1).into())],
            vec![quad("b", "age", Literal::from(1).into())],
        ];

        assert!(solutions(&query, &answers).is_empty());
    }

    #[test]
    fn distinct_removes_duplicates() {
        let query = decompose(
            "SELECT DISTINCT ?p WHERE { GRAPH <http://example.org/g> { ?s ?p ?o } }",
        );
        let answers = vec![vec![
            quad("a", "p", iri("x")),
            quad("b", "p", iri("y")),
        ]];

        let result = project(&query, solutions(&query, &answers));

        assert_eq!(result.len(), 1);
    }

    #[test]
    fn construct_instantiates_template() {
        let query = decompose(
            "CONSTRUCT { ?s <http://example.org/seen> _:b . _:b <http://example.org/by> ?o } \
             WHERE { GRAPH <http://example.org/g> { ?s <http://example.org/knows> ?o } }",
        );
        let answers = vec![vec![
            quad("a", "knows", iri("b")),
            quad("c", "knows", Literal::new_simple_literal("d").into()),
        ]];

        let quads = construct(&query, solutions(&query, &answers));

        assert_eq!(quads.len(), 4);
        let graph = GraphName::NamedNode(NamedNode::new_unchecked("http://example.org/g"));
        assert!(quads.iter().all(|quad| quad.graph_name == graph));
    }

    #[test]
    fn describe_collects_bound_iris() {
        let query = decompose(
            "DESCRIBE ?s WHERE { GRAPH <http://example.org/g> { ?s <http://example.org/knows> ?o } }",
        );
        let answers = vec![vec![
            quad("a", "knows", iri("b")),
            quad("a", "knows", iri("c")),
        ]];

        let targets = describe_targets(&query, solutions(&query, &answers));

        assert_eq!(
            targets,
            vec![NamedNode::new_unchecked("http://example.org/a")]
        );
    }
}

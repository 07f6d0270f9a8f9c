#![cfg(test)]
#![allow(clippy::panic_in_result_fn)]

use quadcloud::model::{GraphName, Literal, NamedNode, Quad, QuadPattern, Term, Variable};
use quadcloud::semantic::Notification;
use quadcloud::{Network, OverlayConfig, OverlayError, QueryResult};
use std::error::Error;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

const GRAPH: &str = "http://example.org/graph";

fn config() -> OverlayConfig {
    OverlayConfig::semantic()
        .with_maintenance_interval(None)
        .with_request_timeout(Duration::from_secs(2))
}

async fn network(peers: usize) -> Result<Network, OverlayError> {
    let network = Network::bootstrap(config()).await?;
    for _ in 1..peers {
        network.add_peer().await?;
    }
    Ok(network)
}

fn iri(local: &str) -> NamedNode {
    NamedNode::new_unchecked(format!("http://example.org/{local}"))
}

fn quad(subject: &str, predicate: &str, object: impl Into<Term>) -> Quad {
    Quad::new(iri(subject), iri(predicate), object, NamedNode::new_unchecked(GRAPH))
}

fn variable(name: &str) -> Variable {
    Variable::new_unchecked(name)
}

async fn next(receiver: &mut UnboundedReceiver<Notification>) -> Notification {
    timeout(Duration::from_secs(2), receiver.recv())
        .await
        .expect("no notification arrived in time")
        .expect("the subscription was closed")
}

#[tokio::test]
async fn test_add_contains_delete() -> Result<(), Box<dyn Error>> {
    let network = network(6).await?;
    let proxy = network.put_get_proxy()?;
    let quad = quad("s", "p", Literal::new_simple_literal("42"));

    assert!(proxy.add(quad.clone()).await?);
    assert!(!proxy.add(quad.clone()).await?);
    assert!(proxy.contains(&quad).await?);
    assert!(proxy.delete(quad.clone()).await?);
    assert!(!proxy.contains(&quad).await?);
    Ok(())
}

#[tokio::test]
async fn test_default_graph_is_rejected() -> Result<(), Box<dyn Error>> {
    let network = network(2).await?;
    let proxy = network.put_get_proxy()?;
    let quad = Quad::new(iri("s"), iri("p"), iri("o"), GraphName::DefaultGraph);

    assert!(matches!(
        proxy.add(quad).await,
        Err(OverlayError::Model(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_find_pattern() -> Result<(), Box<dyn Error>> {
    let network = network(6).await?;
    let proxy = network.put_get_proxy()?;
    let added = proxy
        .add_all([
            quad("s", "p", Literal::new_simple_literal("1")),
            quad("s", "p", Literal::new_simple_literal("2")),
            quad("s", "q", Literal::new_simple_literal("3")),
            quad("t", "p", Literal::new_simple_literal("4")),
        ])
        .await?;
    assert_eq!(added, 4);

    let pattern = QuadPattern::new(
        Some(NamedNode::new_unchecked(GRAPH).into()),
        Some(iri("s").into()),
        Some(iri("p").into()),
        None,
    );
    let response = proxy.find(&pattern).await?;
    assert!(response.complete);
    assert_eq!(response.result.len(), 2);

    let response = proxy.find(&QuadPattern::any()).await?;
    assert_eq!(response.result.len(), 4);
    Ok(())
}

#[tokio::test]
async fn test_find_after_crash_is_partial() -> Result<(), Box<dyn Error>> {
    let network = network(6).await?;
    let quads = (0..30)
        .map(|i| quad(&format!("s{i}"), &format!("p{}", i % 5), Literal::from(i)))
        .collect::<Vec<_>>();
    assert_eq!(network.put_get_proxy()?.add_all(quads).await?, 30);
    let snapshots = network.snapshots().await?;
    let crashed = snapshots
        .iter()
        .max_by_key(|snapshot| snapshot.quads)
        .unwrap();

    assert!(network.crash_peer(crashed.id));
    let response = network.put_get_proxy()?.find(&QuadPattern::any()).await?;

    assert!(!response.complete);
    assert!(response.result.len() <= 30 - crashed.quads);
    Ok(())
}

#[tokio::test]
async fn test_filter_on_names_outside_the_space() -> Result<(), Box<dyn Error>> {
    let network = network(16).await?;
    let proxy = network.put_get_proxy()?;
    proxy
        .add_all(
            ["Ölaf", "Émile", "Ärger", "Bob", "zz", "~tilde"]
                .into_iter()
                .enumerate()
                .map(|(i, name)| {
                    quad(&format!("p{i}"), "name", Literal::new_simple_literal(name))
                }),
        )
        .await?;

    let names = |filter: &str| {
        let proxy = proxy.clone();
        let query = format!(
            "SELECT ?name WHERE {{ GRAPH <{GRAPH}> {{ ?person <http://example.org/name> ?name FILTER({filter}) }} }} ORDER BY ?name"
        );
        async move {
            let response = proxy.execute_sparql(&query).await?;
            let QueryResult::Select(solutions) = response.result else {
                panic!("expected solutions");
            };
            Ok::<_, OverlayError>(
                solutions
                    .iter()
                    .filter_map(|row| row.get(&variable("name")).cloned())
                    .collect::<Vec<_>>(),
            )
        }
    };
    let literal = |name: &str| Term::from(Literal::new_simple_literal(name));

    assert_eq!(names("?name > \"Émile\"").await?, vec![literal("Ölaf")]);
    assert_eq!(
        names("?name < \"Ölaf\"").await?,
        vec![
            literal("Bob"),
            literal("zz"),
            literal("~tilde"),
            literal("Ärger"),
            literal("Émile")
        ]
    );
    assert_eq!(names("?name >= \"zz\" && ?name <= \"~\"").await?, vec![literal("zz")]);
    Ok(())
}

#[tokio::test]
async fn test_published_quad_is_queried() -> Result<(), Box<dyn Error>> {
    let network = network(8).await?;
    network
        .publish_proxy()?
        .publish(quad("s", "p", Literal::new_simple_literal("42")))
        .await?;

    let response = network
        .put_get_proxy()?
        .execute_sparql(&format!(
            "SELECT ?o WHERE {{ GRAPH <{GRAPH}> {{ <http://example.org/s> <http://example.org/p> ?o }} }}"
        ))
        .await?;

    assert!(response.complete);
    let QueryResult::Select(solutions) = response.result else {
        panic!("expected solutions");
    };
    assert_eq!(solutions.len(), 1);
    assert_eq!(
        solutions.rows()[0].get(&variable("o")),
        Some(&Literal::new_simple_literal("42").into())
    );
    Ok(())
}

#[tokio::test]
async fn test_sparql_join_and_forms() -> Result<(), Box<dyn Error>> {
    let network = network(8).await?;
    let proxy = network.put_get_proxy()?;
    proxy
        .add_all([
            quad("alice", "knows", iri("bob")),
            quad("carol", "knows", iri("bob")),
            quad("alice", "name", Literal::new_simple_literal("Alice")),
            quad("carol", "name", Literal::new_simple_literal("Carol")),
            quad("dave", "name", Literal::new_simple_literal("Dave")),
        ])
        .await?;
    let pattern = format!(
        "GRAPH <{GRAPH}> {{ ?person <http://example.org/knows> <http://example.org/bob> . \
         ?person <http://example.org/name> ?name }}"
    );

    let response = proxy
        .execute_sparql(&format!("SELECT ?name WHERE {{ {pattern} }} ORDER BY ?name"))
        .await?;
    let QueryResult::Select(solutions) = response.result else {
        panic!("expected solutions");
    };
    let names = solutions
        .iter()
        .filter_map(|row| row.get(&variable("name")).cloned())
        .collect::<Vec<_>>();
    assert_eq!(
        names,
        vec![
            Term::from(Literal::new_simple_literal("Alice")),
            Term::from(Literal::new_simple_literal("Carol"))
        ]
    );

    let response = proxy
        .execute_sparql(&format!("ASK {{ {pattern} }}"))
        .await?;
    assert_eq!(response.result, QueryResult::Ask(true));

    let response = proxy
        .execute_sparql(&format!(
            "CONSTRUCT {{ ?person <http://example.org/friendOf> <http://example.org/bob> }} \
             WHERE {{ {pattern} }}"
        ))
        .await?;
    let QueryResult::Construct(quads) = response.result else {
        panic!("expected quadruples");
    };
    assert_eq!(quads.len(), 2);

    let response = proxy
        .execute_sparql(&format!(
            "DESCRIBE ?person WHERE {{ GRAPH <{GRAPH}> {{ ?person <http://example.org/name> \"Dave\" }} }}"
        ))
        .await?;
    assert_eq!(
        response.result,
        QueryResult::Describe(vec![quad(
            "dave",
            "name",
            Literal::new_simple_literal("Dave")
        )])
    );
    Ok(())
}

#[tokio::test]
async fn test_unsupported_query_is_malformed() -> Result<(), Box<dyn Error>> {
    let network = network(2).await?;
    let result = network
        .put_get_proxy()?
        .execute_sparql("SELECT * WHERE { ?s ?p ?o }")
        .await;
    assert!(matches!(result, Err(OverlayError::Malformed(_))));
    Ok(())
}

#[tokio::test]
async fn test_subscription_is_notified() -> Result<(), Box<dyn Error>> {
    let network = network(8).await?;
    let (id, mut receiver) = network
        .subscribe_proxy()?
        .subscribe(&format!(
            "SELECT ?o WHERE {{ GRAPH <{GRAPH}> {{ <http://example.org/s> <http://example.org/p> ?o }} }}"
        ))
        .await?;

    network
        .publish_proxy()?
        .publish(quad("s", "p", Literal::new_simple_literal("42")))
        .await?;

    let notification = next(&mut receiver).await;
    assert_eq!(notification.subscription_id, id);
    assert_eq!(notification.event.len(), 1);
    assert_eq!(
        notification.bindings.get(&variable("o")),
        Some(&Literal::new_simple_literal("42").into())
    );
    Ok(())
}

#[tokio::test]
async fn test_conjunctive_subscription_in_any_order() -> Result<(), Box<dyn Error>> {
    let network = network(8).await?;
    let (_, mut receiver) = network
        .subscribe_proxy()?
        .subscribe(&format!(
            "SELECT ?name WHERE {{ GRAPH <{GRAPH}> {{ \
             ?person <http://example.org/knows> <http://example.org/bob> . \
             ?person <http://example.org/name> ?name }} }}"
        ))
        .await?;
    let publisher = network.publish_proxy()?;

    publisher.publish(quad("alice", "knows", iri("bob"))).await?;
    publisher
        .publish(quad("alice", "name", Literal::new_simple_literal("Alice")))
        .await?;
    let notification = next(&mut receiver).await;
    assert_eq!(notification.event.len(), 2);
    assert_eq!(
        notification.bindings.get(&variable("name")),
        Some(&Literal::new_simple_literal("Alice").into())
    );
    assert!(!notification.bindings.contains_key(&variable("person")));

    publisher
        .publish(quad("carol", "name", Literal::new_simple_literal("Carol")))
        .await?;
    publisher.publish(quad("carol", "knows", iri("bob"))).await?;
    let notification = next(&mut receiver).await;
    assert_eq!(
        notification.bindings.get(&variable("name")),
        Some(&Literal::new_simple_literal("Carol").into())
    );
    Ok(())
}

#[tokio::test]
async fn test_subscription_filters() -> Result<(), Box<dyn Error>> {
    let network = network(4).await?;
    let (_, mut receiver) = network
        .subscribe_proxy()?
        .subscribe(&format!(
            "SELECT ?age WHERE {{ GRAPH <{GRAPH}> {{ ?s <http://example.org/age> ?age FILTER(?age > 30) }} }}"
        ))
        .await?;
    let publisher = network.publish_proxy()?;

    publisher.publish(quad("a", "age", Literal::from(20))).await?;
    publisher.publish(quad("b", "age", Literal::from(40))).await?;

    let notification = next(&mut receiver).await;
    assert_eq!(
        notification.bindings.get(&variable("age")),
        Some(&Literal::from(40).into())
    );
    Ok(())
}

#[tokio::test]
async fn test_unsubscribe_stops_notifications() -> Result<(), Box<dyn Error>> {
    let network = network(6).await?;
    let proxy = network.subscribe_proxy()?;
    let (id, mut receiver) = proxy
        .subscribe(&format!(
            "SELECT ?o WHERE {{ GRAPH <{GRAPH}> {{ <http://example.org/s> <http://example.org/p> ?o }} }}"
        ))
        .await?;

    assert!(proxy.unsubscribe(id).await? >= 1);
    network
        .publish_proxy()?
        .publish(quad("s", "p", Literal::new_simple_literal("42")))
        .await?;

    let received = timeout(Duration::from_millis(200), receiver.recv()).await;
    assert!(matches!(received, Ok(None) | Err(_)));
    Ok(())
}

#[tokio::test]
async fn test_subscriptions_move_with_zones() -> Result<(), Box<dyn Error>> {
    let network = network(1).await?;
    let (_, mut receiver) = network
        .subscribe_proxy()?
        .subscribe(&format!(
            "SELECT ?o WHERE {{ GRAPH <{GRAPH}> {{ <http://example.org/s> <http://example.org/p> ?o }} }}"
        ))
        .await?;
    for _ in 0..6 {
        network.add_peer().await?;
    }

    network
        .publish_proxy()?
        .publish(quad("s", "p", Literal::new_simple_literal("42")))
        .await?;

    assert_eq!(next(&mut receiver).await.event.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_proxies_need_semantic_space() -> Result<(), Box<dyn Error>> {
    let network = Network::bootstrap(config().with_dimensions(2)).await?;
    assert!(matches!(
        network.put_get_proxy(),
        Err(OverlayError::InvalidConfig(_))
    ));
    Ok(())
}

#![cfg(test)]
#![allow(clippy::panic_in_result_fn)]

use quadcloud::can::{Coordinate, Direction, Element, RoutingKey, Zone};
use quadcloud::{Network, OverlayConfig, OverlayError, PeerSnapshot, TransportError};
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

fn config() -> OverlayConfig {
    OverlayConfig::default()
        .with_dimensions(2)
        .with_bounds('a', 'c')
        .with_maintenance_interval(None)
        .with_request_timeout(Duration::from_secs(2))
        .with_leave_retries(3, Duration::from_millis(10), Duration::from_millis(50))
}

fn point(x: &str, y: &str) -> Coordinate {
    Coordinate::new(vec![Element::from(x), Element::from(y)])
}

fn zone(lower: (char, char), upper: (char, char)) -> Zone {
    Zone::new(
        Coordinate::new(vec![Element::from(lower.0), Element::from(lower.1)]),
        Coordinate::new(vec![Element::from(upper.0), Element::from(upper.1)]),
    )
    .unwrap()
}

fn volume(zone: &Zone) -> f64 {
    (0..zone.dimensions()).map(|dimension| zone.extent(dimension)).product()
}

/// The zones of the active peers are disjoint and cover the whole space.
fn assert_tiling(snapshots: &[PeerSnapshot], space: &Zone) {
    let zones = snapshots
        .iter()
        .map(|snapshot| snapshot.zone.clone().expect("every peer owns a zone"))
        .collect::<Vec<_>>();
    for (i, lhs) in zones.iter().enumerate() {
        for rhs in &zones[i + 1..] {
            assert!(!lhs.overlaps(rhs), "{lhs} overlaps {rhs}");
        }
    }
    let covered = zones.iter().map(volume).sum::<f64>();
    let expected = volume(space);
    assert!(
        ((covered - expected) / expected).abs() < 1e-9,
        "zones cover {covered} instead of {expected}"
    );
}

/// Every pair of adjacent zones lists each other on opposite sides, and nobody lists a peer that
/// is not adjacent.
fn assert_neighbors(snapshots: &[PeerSnapshot]) {
    for lhs in snapshots {
        let lhs_zone = lhs.zone.as_ref().expect("every peer owns a zone");
        for rhs in snapshots.iter().filter(|rhs| rhs.id != lhs.id) {
            let rhs_zone = rhs.zone.as_ref().expect("every peer owns a zone");
            match lhs_zone.adjacency(rhs_zone) {
                Some((dimension, direction)) => {
                    assert!(
                        lhs.has_neighbor(rhs.id, dimension, direction),
                        "{} does not list {} on ({dimension}, {direction})",
                        lhs.id,
                        rhs.id
                    );
                    assert!(
                        rhs.has_neighbor(lhs.id, dimension, direction.opposite()),
                        "{} does not list {}",
                        rhs.id,
                        lhs.id
                    );
                }
                None => assert!(
                    !lhs.neighbors.iter().any(|(_, _, entry)| entry.peer == rhs.id),
                    "{} lists the non-adjacent peer {}",
                    lhs.id,
                    rhs.id
                ),
            }
        }
    }
}

#[tokio::test]
async fn test_join_splits_zone_of_owner() -> Result<(), Box<dyn Error>> {
    let network = Network::bootstrap(config()).await?;
    let first = network.peers()[0];
    let second = network.add_peer_at(point("bb", "ab")).await?;

    let snapshots = network.snapshots().await?;
    let owner = snapshots.iter().find(|s| s.id == first).unwrap();
    let joined = snapshots.iter().find(|s| s.id == second).unwrap();
    assert_eq!(owner.zone, Some(zone(('a', 'a'), ('b', 'c'))));
    assert_eq!(joined.zone, Some(zone(('b', 'a'), ('c', 'c'))));
    assert!(owner.has_neighbor(second, 0, Direction::Upper));
    assert!(joined.has_neighbor(first, 0, Direction::Lower));
    assert_eq!(owner.neighbors.len(), 1);
    assert_eq!(joined.neighbors.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_random_joins_tile_the_space() -> Result<(), Box<dyn Error>> {
    let network = Network::bootstrap(config()).await?;
    for _ in 0..12 {
        network.add_peer().await?;
    }

    let snapshots = network.snapshots().await?;
    assert_eq!(snapshots.len(), 13);
    assert_tiling(&snapshots, &config().space()?);
    assert_neighbors(&snapshots);
    Ok(())
}

#[tokio::test]
async fn test_locate_reaches_exactly_one_owner() -> Result<(), Box<dyn Error>> {
    let network = Network::bootstrap(config()).await?;
    for _ in 0..10 {
        network.add_peer().await?;
    }
    let snapshots = network.snapshots().await?;
    let space = config().space()?;

    for _ in 0..20 {
        let target = space.random_point(&mut rand::rng());
        let located = network.locate(RoutingKey::from(target.clone())).await?;
        assert_eq!(located.len(), 1, "{target} is owned by {located:?}");
        let owner = snapshots.iter().find(|s| s.id == located[0]).unwrap();
        assert!(owner.zone.as_ref().unwrap().contains(&target));
    }
    Ok(())
}

#[tokio::test]
async fn test_wildcards_reach_every_intersecting_zone() -> Result<(), Box<dyn Error>> {
    let network = Network::bootstrap(config()).await?;
    network.add_peer_at(point("bb", "ab")).await?;
    network.add_peer_at(point("aa", "bb")).await?;

    let key = RoutingKey::new(vec![Some(Element::from("aa")), None]);
    assert_eq!(network.locate(key).await?.len(), 2);
    assert_eq!(network.locate(RoutingKey::broadcast(2)).await?.len(), 3);
    Ok(())
}

#[tokio::test]
async fn test_leave_merges_sibling() -> Result<(), Box<dyn Error>> {
    let network = Network::bootstrap(config()).await?;
    let first = network.peers()[0];
    let second = network.add_peer_at(point("bb", "ab")).await?;

    network.remove_peer(second).await?;

    let snapshots = network.snapshots().await?;
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].id, first);
    assert_eq!(snapshots[0].zone.as_ref(), Some(&config().space()?));
    assert!(snapshots[0].history.is_empty());
    assert!(snapshots[0].neighbors.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_leave_hands_zone_off() -> Result<(), Box<dyn Error>> {
    let network = Network::bootstrap(config()).await?;
    let second = network.add_peer_at(point("bb", "ab")).await?;
    network.add_peer_at(point("aa", "bb")).await?;

    network.remove_peer(second).await?;

    let snapshots = network.snapshots().await?;
    assert_eq!(snapshots.len(), 2);
    assert_tiling(&snapshots, &config().space()?);
    assert_neighbors(&snapshots);
    assert!(snapshots
        .iter()
        .any(|s| s.zone == Some(zone(('b', 'a'), ('c', 'c')))));
    Ok(())
}

#[tokio::test]
async fn test_random_leaves_keep_tiling() -> Result<(), Box<dyn Error>> {
    let network = Network::bootstrap(config()).await?;
    for _ in 0..8 {
        network.add_peer().await?;
    }
    for peer in network.peers().into_iter().take(5) {
        network.remove_peer(peer).await?;
    }

    let snapshots = network.snapshots().await?;
    assert_eq!(snapshots.len(), 4);
    assert_tiling(&snapshots, &config().space()?);
    assert_neighbors(&snapshots);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_sibling_leaves() -> Result<(), Box<dyn Error>> {
    let network =
        Network::bootstrap(config().with_request_timeout(Duration::from_millis(300))).await?;
    let first = network.peers()[0];
    let second = network.add_peer_at(point("bb", "ab")).await?;
    let third = network.add_peer_at(point("bb", "bb")).await?;

    // Both siblings first try to merge into each other.
    let (left_second, left_third) =
        tokio::join!(network.remove_peer(second), network.remove_peer(third));
    left_second?;
    left_third?;

    let snapshots = network.snapshots().await?;
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].id, first);
    assert_eq!(snapshots[0].zone.as_ref(), Some(&config().space()?));
    assert!(snapshots[0].neighbors.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_concurrent_joins_and_leaves() -> Result<(), Box<dyn Error>> {
    let network =
        Network::bootstrap(config().with_request_timeout(Duration::from_millis(500))).await?;
    for _ in 0..8 {
        network.add_peer().await?;
    }
    let leaving = network.peers();

    let (joined, left) = tokio::join!(
        futures::future::join_all((0..4).map(|_| network.add_peer())),
        futures::future::join_all(leaving[..3].iter().map(|peer| network.remove_peer(*peer))),
    );
    for result in joined {
        result?;
    }
    for result in left {
        result?;
    }

    let snapshots = network.snapshots().await?;
    assert_eq!(snapshots.len(), 10);
    assert_tiling(&snapshots, &config().space()?);
    assert!(snapshots.iter().all(|snapshot| !snapshot.neighbors.is_empty()));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_churn_with_short_timeouts_keeps_tiling() -> Result<(), Box<dyn Error>> {
    let config = config().with_request_timeout(Duration::from_millis(20));
    let network = Arc::new(Network::bootstrap(config.clone()).await?);
    for _ in 0..6 {
        network.add_peer().await?;
    }

    let mut tasks = JoinSet::new();
    for peer in network.peers().into_iter().take(3) {
        let network = Arc::clone(&network);
        tasks.spawn(async move { network.remove_peer(peer).await.is_ok() });
    }
    for _ in 0..6 {
        let network = Arc::clone(&network);
        tasks.spawn(async move { network.add_peer().await.is_ok() });
    }
    // Single operations may give up, the zones must stay disjoint and complete anyway.
    while tasks.join_next().await.transpose()?.is_some() {}
    tokio::time::sleep(Duration::from_millis(500)).await;

    let mut snapshots = Vec::new();
    for peer in network.peers() {
        if let Ok(snapshot) = network.handle(peer)?.snapshot().await {
            if snapshot.zone.is_some() {
                snapshots.push(snapshot);
            }
        }
    }
    assert_tiling(&snapshots, &config.space()?);
    Ok(())
}

#[tokio::test]
async fn test_last_peer_terminates() -> Result<(), Box<dyn Error>> {
    let network = Network::bootstrap(config()).await?;
    let peer = network.peers()[0];
    let handle = network.handle(peer)?;

    network.remove_peer(peer).await?;

    assert!(network.is_empty());
    assert!(matches!(
        handle.snapshot().await,
        Err(OverlayError::Transport(TransportError::Unreachable(_)))
    ));
    Ok(())
}

#[tokio::test]
async fn test_crashed_sibling_is_merged() -> Result<(), Box<dyn Error>> {
    let network = Network::bootstrap(config()).await?;
    let first = network.peers()[0];
    let second = network.add_peer_at(point("bb", "ab")).await?;
    network.maintain().await?;

    assert!(network.crash_peer(second));
    network.maintain().await?;
    network.maintain().await?;

    let snapshots = network.snapshots().await?;
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].id, first);
    assert_eq!(snapshots[0].zone.as_ref(), Some(&config().space()?));
    Ok(())
}

#[tokio::test]
async fn test_crash_repair_restores_tiling() -> Result<(), Box<dyn Error>> {
    let network = Network::bootstrap(config()).await?;
    for _ in 0..8 {
        network.add_peer().await?;
    }
    network.maintain().await?;

    let crashed = network.peers()[3];
    assert!(network.crash_peer(crashed));
    for _ in 0..3 {
        network.maintain().await?;
    }

    let snapshots = network.snapshots().await?;
    assert_eq!(snapshots.len(), 8);
    assert_tiling(&snapshots, &config().space()?);
    assert_neighbors(&snapshots);
    Ok(())
}

#[tokio::test]
async fn test_joined_peer_cannot_join_again() -> Result<(), Box<dyn Error>> {
    let network = Network::bootstrap(config()).await?;
    let first = network.peers()[0];
    let second = network.add_peer().await?;
    let handle = network.handle(second)?;

    assert!(matches!(
        handle.join(first, None).await,
        Err(OverlayError::AlreadyJoined(peer)) if peer == second
    ));
    assert!(matches!(
        handle.bootstrap().await,
        Err(OverlayError::AlreadyJoined(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_unknown_peers_are_not_activated() -> Result<(), Box<dyn Error>> {
    let network = Network::bootstrap(config()).await?;
    let second = network.add_peer().await?;
    network.remove_peer(second).await?;

    assert!(matches!(
        network.handle(second),
        Err(OverlayError::PeerNotActivated(peer)) if peer == second
    ));
    assert!(matches!(
        network.remove_peer(second).await,
        Err(OverlayError::PeerNotActivated(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let result = Network::bootstrap(config().with_bounds('c', 'a')).await;
    assert!(matches!(result, Err(OverlayError::InvalidConfig(_))));
}

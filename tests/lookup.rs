mod common;

use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use tokio::time::Duration;

use common::{link, make_node_id, NetworkRegistry, TestNode};
use portal_overlay::{FoundContent, OverlayConfig};

// Node indexes are chosen so that each hop's answer falls inside the
// distance classes the walker asks for: 1 -> 2 -> 4 -> 6 -> 7 step through
// adjacent log-distance classes toward the target 7.

#[tokio::test]
async fn node_lookup_walks_across_multiple_hops() {
    let registry = Arc::new(NetworkRegistry::default());
    let origin = TestNode::new(&registry, 1).await;
    let relay = TestNode::new(&registry, 2).await;
    let middle = TestNode::new(&registry, 4).await;
    let near = TestNode::new(&registry, 6).await;
    let target = TestNode::new(&registry, 7).await;

    link(&origin, &[&relay]).await;
    link(&relay, &[&middle]).await;
    link(&middle, &[&near]).await;
    link(&near, &[&target]).await;

    let found = origin.node.recursive_find_nodes(&make_node_id(7)).await;

    let order: Vec<_> = found.iter().map(|r| r.id()).collect();
    assert_eq!(
        order,
        vec![target.id(), near.id(), middle.id(), relay.id()],
        "results are ordered closest-first and include every discovery"
    );
    assert_eq!(
        origin.node.table_len().await,
        4,
        "every peer heard about becomes a table candidate"
    );
}

#[tokio::test]
async fn node_lookup_never_queries_the_same_peer_twice() {
    let registry = Arc::new(NetworkRegistry::default());
    let origin = TestNode::new(&registry, 1).await;
    let relay = TestNode::new(&registry, 2).await;
    let middle = TestNode::new(&registry, 4).await;
    let near = TestNode::new(&registry, 6).await;
    let target = TestNode::new(&registry, 7).await;

    link(&origin, &[&relay]).await;
    // Both later hops point back at already-known peers.
    link(&relay, &[&middle, &origin]).await;
    link(&middle, &[&near, &relay]).await;
    link(&near, &[&target, &middle]).await;

    origin.node.recursive_find_nodes(&make_node_id(7)).await;

    let queried = origin.network.node_queries().await;
    let unique: HashSet<_> = queried.iter().copied().collect();
    assert_eq!(
        queried.len(),
        unique.len(),
        "a peer must never be dispatched twice in one traversal"
    );
    assert!(
        !unique.contains(&origin.id()),
        "the local node never queries itself"
    );
}

#[tokio::test]
async fn node_lookup_with_empty_table_returns_nothing() {
    let registry = Arc::new(NetworkRegistry::default());
    let origin = TestNode::new(&registry, 1).await;

    let found = origin.node.recursive_find_nodes(&make_node_id(9)).await;

    assert!(found.is_empty());
    assert!(
        origin.network.node_queries().await.is_empty(),
        "no candidates means no queries"
    );
}

#[tokio::test]
async fn node_lookup_absorbs_per_peer_failures() {
    let registry = Arc::new(NetworkRegistry::default());
    let origin = TestNode::new(&registry, 1).await;
    let dead = TestNode::new(&registry, 2).await;
    let alive = TestNode::new(&registry, 5).await;
    let prize = TestNode::new(&registry, 7).await;

    link(&origin, &[&dead, &alive]).await;
    link(&alive, &[&prize]).await;
    origin.network.set_failure(dead.id(), true).await;

    let found = origin.node.recursive_find_nodes(&make_node_id(7)).await;

    let ids: HashSet<_> = found.iter().map(|r| r.id()).collect();
    assert!(
        ids.contains(&prize.id()),
        "the walk continues through the live branch"
    );
}

#[tokio::test]
async fn content_lookup_follows_closer_peers_to_the_holder() {
    let registry = Arc::new(NetworkRegistry::default());
    let origin = TestNode::new(&registry, 1).await;
    let relay = TestNode::new(&registry, 2).await;
    let holder = TestNode::new(&registry, 3).await;

    link(&origin, &[&relay]).await;
    link(&relay, &[&holder]).await;

    let key = b"page/front";
    let payload = b"the front page";
    assert!(holder
        .node
        .store()
        .should_store(key, payload)
        .expect("holder admits the payload"));

    let found = origin
        .node
        .recursive_find_content(key)
        .await
        .expect("lookup runs")
        .expect("content is found");

    assert_eq!(found.content, Bytes::copy_from_slice(payload));
    assert!(!found.utp_transfer, "the payload arrived inline");
    assert_eq!(
        origin.network.content_queries().await,
        vec![relay.id(), holder.id()],
        "the walk went relay first, then the holder it pointed at"
    );
    assert!(
        origin.node.get_record(&holder.id()).await.is_some(),
        "peers learned mid-walk land in the table"
    );
}

#[tokio::test]
async fn content_lookup_short_circuits_on_a_local_hit() {
    let registry = Arc::new(NetworkRegistry::default());
    let origin = TestNode::new(&registry, 1).await;
    let peer = TestNode::new(&registry, 2).await;
    link(&origin, &[&peer]).await;

    let key = b"page/local";
    let payload = b"already here";
    assert!(origin
        .node
        .store()
        .should_store(key, payload)
        .expect("local admission succeeds"));

    let found = origin
        .node
        .recursive_find_content(key)
        .await
        .expect("lookup runs")
        .expect("content is found");

    assert_eq!(found.content, Bytes::copy_from_slice(payload));
    assert!(
        origin.network.content_queries().await.is_empty(),
        "a local hit must not touch the network"
    );
}

#[tokio::test]
async fn content_lookup_pulls_side_channel_payloads() {
    let registry = Arc::new(NetworkRegistry::default());
    let origin = TestNode::new(&registry, 1).await;
    let relay = TestNode::new(&registry, 2).await;
    let holder = TestNode::new(&registry, 3).await;

    link(&origin, &[&relay]).await;
    link(&relay, &[&holder]).await;

    let key = b"page/large";
    let payload = b"too big for an inline response";
    origin
        .network
        .script_content(holder.id(), FoundContent::ConnectionId(Bytes::from_static(b"\xaa\xbb")))
        .await;
    origin
        .network
        .script_transfer(holder.id(), b"\xaa\xbb", payload)
        .await;

    let found = origin
        .node
        .recursive_find_content(key)
        .await
        .expect("lookup runs")
        .expect("content is found");

    assert_eq!(found.content, Bytes::copy_from_slice(payload));
    assert!(found.utp_transfer, "the payload came over the side channel");
}

#[tokio::test]
async fn failed_side_channel_transfer_only_fails_that_peer() {
    let registry = Arc::new(NetworkRegistry::default());
    let origin = TestNode::new(&registry, 1).await;
    let liar = TestNode::new(&registry, 2).await;
    let holder = TestNode::new(&registry, 3).await;

    link(&origin, &[&liar, &holder]).await;

    let key = b"page/contested";
    let payload = b"the real bytes";
    assert!(holder
        .node
        .store()
        .should_store(key, payload)
        .expect("holder admits the payload"));

    // The liar advertises a side channel it never arms; the holder is made
    // slower so the broken advertisement is processed first.
    origin
        .network
        .script_content(liar.id(), FoundContent::ConnectionId(Bytes::from_static(b"\x01")))
        .await;
    origin
        .network
        .set_latency(holder.id(), Duration::from_millis(80))
        .await;

    let found = origin
        .node
        .recursive_find_content(key)
        .await
        .expect("lookup runs")
        .expect("content is still found");

    assert_eq!(found.content, Bytes::copy_from_slice(payload));
    assert!(!found.utp_transfer);
}

#[tokio::test]
async fn content_lookup_times_out_unresponsive_peers() {
    let registry = Arc::new(NetworkRegistry::default());
    let config = OverlayConfig::default().with_request_timeout(Duration::from_millis(40));
    let origin = TestNode::with_config(&registry, 1, config).await;
    let sleepy = TestNode::new(&registry, 2).await;

    link(&origin, &[&sleepy]).await;

    let key = b"page/slow";
    assert!(sleepy
        .node
        .store()
        .should_store(key, b"never delivered in time")
        .expect("holder admits the payload"));
    origin
        .network
        .set_latency(sleepy.id(), Duration::from_millis(500))
        .await;

    let found = origin
        .node
        .recursive_find_content(key)
        .await
        .expect("lookup runs");

    assert!(
        found.is_none(),
        "a peer slower than the deadline counts as failed"
    );
}

#[tokio::test]
async fn content_lookup_exhausts_to_none_without_a_holder() {
    let registry = Arc::new(NetworkRegistry::default());
    let origin = TestNode::new(&registry, 1).await;
    let empty = TestNode::new(&registry, 2).await;
    link(&origin, &[&empty]).await;

    let found = origin
        .node
        .recursive_find_content(b"page/nowhere")
        .await
        .expect("lookup runs");

    assert!(found.is_none());
    assert_eq!(
        origin.network.content_queries().await,
        vec![empty.id()],
        "every reachable candidate was tried exactly once"
    );
}

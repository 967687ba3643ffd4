use std::time::Duration;

use flashlog_cluster::{MembershipView, PeerStatus, Role};
use test_log::test;

use crate::test_utilities::{eventually, start_node};

#[test(tokio::test)]
async fn test_nodes_discover_each_other_through_one_seed() {
    let seed = start_node(Role::Ingest, vec![]).await;
    let store_a = start_node(Role::Store, vec![seed.gossip_addr.clone()]).await;
    let store_b = start_node(Role::Store, vec![seed.gossip_addr.clone()]).await;

    let converged = eventually(Duration::from_secs(5), || {
        seed.live_count() == 3 && store_a.live_count() == 3 && store_b.live_count() == 3
    })
    .await;
    assert!(converged, "membership did not converge");

    let stores = store_a.membership.peers_by_role(Role::Store);
    assert_eq!(stores.len(), 2);
    let ingests = store_b.membership.peers_by_role(Role::Ingest);
    assert_eq!(ingests.len(), 1);
    assert_eq!(ingests[0].node_id, *seed.membership.local_id());

    store_b.crash().await;
    store_a.crash().await;
    seed.crash().await;
}

#[test(tokio::test)]
async fn test_crashed_node_is_declared_dead() {
    let seed = start_node(Role::Ingest, vec![]).await;
    let watcher = start_node(Role::Store, vec![seed.gossip_addr.clone()]).await;
    let victim = start_node(Role::Store, vec![seed.gossip_addr.clone()]).await;
    let victim_id = victim.membership.local_id().clone();

    assert!(
        eventually(Duration::from_secs(5), || {
            seed.live_count() == 3 && watcher.live_count() == 3
        })
        .await
    );

    victim.crash().await;

    let detected = eventually(Duration::from_secs(5), || {
        seed.status_of(&victim_id) == Some(PeerStatus::Dead)
            && watcher.status_of(&victim_id) == Some(PeerStatus::Dead)
    })
    .await;
    assert!(detected, "crashed node was not declared dead");
    assert_eq!(watcher.membership.peers_by_role(Role::Store).len(), 1);

    watcher.crash().await;
    seed.crash().await;
}

#[test(tokio::test)]
async fn test_departing_node_is_marked_left() {
    let seed = start_node(Role::Store, vec![]).await;
    let leaver = start_node(Role::Ingest, vec![seed.gossip_addr.clone()]).await;
    let leaver_id = leaver.membership.local_id().clone();

    assert!(eventually(Duration::from_secs(5), || seed.live_count() == 2).await);

    leaver.leave().await;

    // the announcement arrives well before suspicion could fire
    let left = eventually(Duration::from_millis(250), || {
        seed.status_of(&leaver_id) == Some(PeerStatus::Left)
    })
    .await;
    assert!(left, "departure was not observed");
    assert!(seed.membership.peers_by_role(Role::Ingest).is_empty());

    seed.crash().await;
}

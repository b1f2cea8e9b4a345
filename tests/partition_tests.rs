//! Network partition behavior: quorum safety on the minority side, stale
//! leadership on an isolated node, and convergence back to a single leader
//! after the links heal.


use std::time::Duration;

use test_harness::*;

#[test]
fn isolated_leader_is_replaced_by_the_majority() {
    let mut sim = build_cluster(5, 3, 3, 4, 13);
    step_ms(&mut sim, 100);
    assert_eq!(sim.leader_id(), Some(0));

    sim.isolate(0);
    assert!(
        run_until(&mut sim, 3_000, |s| {
            (1..5).any(|id| s.master(id).is_some_and(|m| m.is_leader()))
        }),
        "majority side never elected a replacement"
    );

    // The isolated node hears no contradiction and keeps its claim; the
    // cluster briefly holds two leaders, only one of which can act.
    assert!(sim.master(0).is_some_and(|m| m.is_leader()));
    assert_eq!(sim.count_leaders(), 2);
}

#[test]
fn minority_without_quorum_cannot_elect() {
    let mut sim = build_cluster(5, 3, 3, 4, 23);
    step_ms(&mut sim, 100);

    // Masters 1 and 2 lose the rest of the cluster. Two votes are never a
    // majority of five, so their campaigns go nowhere.
    sim.partition(&[1, 2], &[0, 3, 4, 5, 6, 7]);
    step_ms(&mut sim, 2_000);

    assert!(!sim.master(1).unwrap().is_leader());
    assert!(!sim.master(2).unwrap().is_leader());
    assert!(sim.master(0).unwrap().is_leader());

    // The leader kept its quorum and every worker; the job finishes
    // despite the partition.
    assert!(sim.run_until_complete(tick(), Duration::from_millis(30_000)));
}

#[test]
fn healed_partition_converges_to_a_single_leader() {
    let mut sim = build_cluster(5, 3, 3, 4, 29);
    step_ms(&mut sim, 100);

    // The old leader and one follower are cut off from the majority and
    // from every worker.
    let minority = [0, 1];
    let majority = [2, 3, 4, 5, 6, 7];
    sim.partition(&minority, &majority);

    assert!(run_until(&mut sim, 3_000, |s| {
        (2..5).any(|id| s.master(id).is_some_and(|m| m.is_leader()))
    }));

    sim.heal_partition(&minority, &majority);
    assert!(sim.run_until_complete(tick(), Duration::from_millis(30_000)));

    // Progress precedence settles the duel: the majority-side leader did
    // real work while the old one idled.
    step_ms(&mut sim, 1_000);
    assert_eq!(sim.count_leaders(), 1);
}

#[test]
fn isolated_follower_catches_up_after_heal() {
    let mut sim = build_cluster(3, 2, 2, 3, 37);

    // Cut a follower off before it ever learns the job exists.
    sim.isolate(1);
    step_ms(&mut sim, 1_000);
    assert_eq!(sim.master(1).unwrap().completed(), None);

    sim.heal_node(1);
    assert!(
        run_until(&mut sim, 2_000, |s| {
            s.master(1).is_some_and(|m| m.completed().is_some())
        }),
        "healed follower never received the base inputs"
    );
    assert!(sim.run_until_complete(tick(), Duration::from_millis(30_000)));
}

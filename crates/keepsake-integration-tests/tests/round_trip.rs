//! End-to-end save/load round trips.
//!
//! Builds small scenes through the public session API, saves them, damages
//! the live graph (destroyed nodes, changed fields, fresh sessions) and
//! checks that loading puts every persistent node and component back.

use glam::{Quat, Vec3};
use keepsake_core::graph::Node;
use keepsake_core::id::*;
use keepsake_core::scope::SaveScope;
use keepsake_core::session::Session;
use keepsake_core::test_utils::*;

fn counter_on(session: &Session, node: NodeKey) -> &Counter {
    let key = session
        .graph()
        .find_component::<Counter>(node)
        .expect("node has a counter");
    session.graph().component::<Counter>(key).expect("counter")
}

// ===========================================================================
// Test 1: fields and transforms survive a round trip in place
// ===========================================================================

#[test]
fn test_round_trip_in_place() {
    let dir = make_test_dir("it_round_trip");
    let mut session = test_session(&dir);

    let mut node = Node::new("crate");
    node.tag = "Loot".to_string();
    node.layer = 4;
    node.transform.position = Vec3::new(1.0, 2.0, 3.0);
    node.transform.rotation = Quat::from_rotation_y(0.5);
    let a = session.spawn_persistent(node, None, GroupId::MAIN);
    let c = session.attach(a, Counter::new(42)).unwrap();

    let saved = session.save(&SaveScope::all()).unwrap();
    assert_eq!(saved.total_nodes(), 1);
    assert_eq!(saved.total_components(), 1);

    {
        let graph = session.graph_mut();
        let live = graph.node_mut(a).unwrap();
        live.name = "renamed".to_string();
        live.transform.position = Vec3::ZERO;
        let counter = graph.component_mut::<Counter>(c).unwrap();
        counter.count = -1;
        counter.label = "scratch".to_string();
    }

    let loaded = session.load(&SaveScope::all()).unwrap();
    assert_eq!(loaded.nodes_created, 0);
    assert_eq!(loaded.components_created, 0);
    assert_eq!(loaded.restored, 1);
    assert!(loaded.misses.is_empty());

    let live = session.graph().node(a).unwrap();
    assert_eq!(live.name, "crate");
    assert_eq!(live.tag, "Loot");
    assert_eq!(live.layer, 4);
    assert_eq!(live.transform.position, Vec3::new(1.0, 2.0, 3.0));
    assert!(live.transform.rotation.abs_diff_eq(Quat::from_rotation_y(0.5), 1e-6));
    let counter = session.graph().component::<Counter>(c).unwrap();
    assert_eq!(counter.count, 42);
    assert_eq!(counter.label, "counter-42");

    cleanup(&dir);
}

// ===========================================================================
// Test 2: a destroyed child is rebuilt under its surviving parent
// ===========================================================================

#[test]
fn test_destroyed_child_rebuilt_under_parent() {
    let dir = make_test_dir("it_child_rebuilt");
    let mut session = test_session(&dir);

    let a = session.spawn_persistent(Node::new("A"), None, GroupId::MAIN);
    let b = session.spawn_persistent(Node::new("B"), Some(a), GroupId::MAIN);
    session.attach(a, Counter::new(1)).unwrap();
    session.attach(b, Counter::new(2)).unwrap();
    let b_id = session.node_id(b).cloned().unwrap();

    session.save(&SaveScope::group(GroupId::MAIN)).unwrap();
    session.destroy_node(b);
    assert_eq!(session.find_node(&b_id), None);

    let report = session.load(&SaveScope::group(GroupId::MAIN)).unwrap();
    assert_eq!(report.nodes_created, 1);
    assert_eq!(report.components_created, 1);

    // A is untouched.
    assert_eq!(session.graph().node(a).unwrap().name, "A");
    assert_eq!(counter_on(&session, a).count, 1);

    // B is back, with the same id, under A, with equal fields.
    let rebuilt = session.find_node(&b_id).expect("B rebuilt");
    assert_ne!(rebuilt, b);
    let node = session.graph().node(rebuilt).unwrap();
    assert_eq!(node.name, "B");
    assert_eq!(node.parent(), Some(a));
    assert_eq!(session.graph().node(a).unwrap().children(), &[rebuilt]);
    assert_eq!(counter_on(&session, rebuilt).count, 2);
    assert_eq!(counter_on(&session, rebuilt).label, "counter-2");

    cleanup(&dir);
}

// ===========================================================================
// Test 3: a deep chain is rebuilt parents-first into a fresh session
// ===========================================================================

#[test]
fn test_deep_chain_into_fresh_session() {
    let dir = make_test_dir("it_deep_chain");
    let mut ids = Vec::new();
    {
        let mut session = test_session(&dir);
        let mut parent = None;
        for depth in 0..6 {
            let node = session.spawn_persistent(Node::new(format!("d{depth}")), parent, GroupId::MAIN);
            session.attach(node, Counter::new(depth)).unwrap();
            ids.push(session.node_id(node).cloned().unwrap());
            parent = Some(node);
        }
        session.save(&SaveScope::all()).unwrap();
    }

    let mut fresh = test_session(&dir);
    let report = fresh.load(&SaveScope::all()).unwrap();
    assert_eq!(report.nodes_created, 6);
    assert_eq!(report.components_created, 6);
    assert_eq!(fresh.graph().roots().len(), 1);

    for (depth, id) in ids.iter().enumerate() {
        let key = fresh.find_node(id).expect("rebuilt");
        assert_eq!(fresh.graph().depth(key), depth as u32 + 1);
        assert_eq!(counter_on(&fresh, key).count, depth as i64);
        let parent = fresh.graph().node(key).unwrap().parent();
        match depth {
            0 => assert_eq!(parent, None),
            _ => assert_eq!(parent, fresh.find_node(&ids[depth - 1])),
        }
    }

    cleanup(&dir);
}

// ===========================================================================
// Test 4: loading twice creates nothing new
// ===========================================================================

#[test]
fn test_repeated_load_is_idempotent() {
    let dir = make_test_dir("it_idempotent");
    let mut session = test_session(&dir);
    let a = session.spawn_persistent(Node::new("a"), None, GroupId::MAIN);
    let b = session.spawn_persistent(Node::new("b"), Some(a), player());
    session.attach(a, Counter::new(1)).unwrap();
    let mut on_b = Counter::new(2);
    on_b.persist.group = player();
    session.attach(b, on_b).unwrap();
    session.save(&SaveScope::all()).unwrap();
    session.destroy_node(a);

    let first = session.load(&SaveScope::all()).unwrap();
    assert_eq!(first.nodes_created, 2);
    let (nodes, components) = (session.graph().node_count(), session.graph().component_count());

    let second = session.load(&SaveScope::all()).unwrap();
    assert_eq!(second.nodes_created, 0);
    assert_eq!(second.components_created, 0);
    assert_eq!(session.graph().node_count(), nodes);
    assert_eq!(session.graph().component_count(), components);

    cleanup(&dir);
}

// ===========================================================================
// Test 5: ids stay stable when runtime handles change
// ===========================================================================

#[test]
fn test_identity_survives_handle_reassignment() {
    let dir = make_test_dir("it_identity");
    let mut session = test_session(&dir);
    let a = session.spawn_persistent(Node::new("a"), None, GroupId::MAIN);
    let c = session.attach(a, Counter::new(5)).unwrap();
    let (node_id, component_id) = (
        session.node_id(a).cloned().unwrap(),
        session.component_id(c).cloned().unwrap(),
    );
    session.save(&SaveScope::all()).unwrap();

    // Save twice more: ids written to disk do not drift.
    session.save(&SaveScope::all()).unwrap();
    assert_eq!(session.node_id(a), Some(&node_id));
    assert_eq!(session.component_id(c), Some(&component_id));

    session.destroy_node(a);
    session.load(&SaveScope::all()).unwrap();

    let new_node = session.find_node(&node_id).expect("node id rebound");
    let new_component = session.find_component(&component_id).expect("component id rebound");
    assert_ne!(new_node, a);
    assert_ne!(new_component, c);
    assert_eq!(session.graph().owner(new_component), Some(new_node));
    let state = session
        .graph()
        .behaviour(new_component)
        .unwrap()
        .persistence()
        .clone();
    assert_eq!(state.component_id, Some(component_id));
    assert_eq!(state.node_id, Some(node_id));

    cleanup(&dir);
}

// ===========================================================================
// Test 6: references between components resolve after a rebuild
// ===========================================================================

#[test]
fn test_follower_references_resolve_after_rebuild() {
    let dir = make_test_dir("it_follower");
    let mut session = test_session(&dir);
    let leader = session.spawn_persistent(Node::new("leader"), None, GroupId::MAIN);
    let scout = session.spawn_persistent(Node::new("scout"), None, GroupId::MAIN);
    let buddy = session.attach(leader, Counter::new(7)).unwrap();
    let follower = Follower {
        target: Some(leader),
        buddy: Some(buddy),
        speed: 2.5,
        ..Default::default()
    };
    session.attach(scout, follower).unwrap();
    let (leader_id, scout_id) = (
        session.node_id(leader).cloned().unwrap(),
        session.node_id(scout).cloned().unwrap(),
    );
    session.save(&SaveScope::all()).unwrap();

    session.destroy_node(leader);
    session.destroy_node(scout);
    assert_eq!(session.graph().node_count(), 0);

    let report = session.load(&SaveScope::all()).unwrap();
    assert_eq!(report.nodes_created, 2);
    assert_eq!(report.restored, 2);

    let leader = session.find_node(&leader_id).unwrap();
    let scout = session.find_node(&scout_id).unwrap();
    let key = session.graph().find_component::<Follower>(scout).unwrap();
    let follower = session.graph().component::<Follower>(key).unwrap();
    assert_eq!(follower.target, Some(leader));
    assert_eq!(follower.buddy, session.graph().find_component::<Counter>(leader));
    assert_eq!(follower.speed, 2.5);

    cleanup(&dir);
}

// ===========================================================================
// Test 7: hooks run once per pipeline
// ===========================================================================

#[test]
fn test_hooks_run_once_per_pipeline() {
    let dir = make_test_dir("it_hooks");
    let mut session = test_session(&dir);
    let a = session.spawn_persistent(Node::new("a"), None, GroupId::MAIN);
    let c = session.attach(a, Counter::new(1)).unwrap();

    session.save(&SaveScope::all()).unwrap();
    let counter = session.graph().component::<Counter>(c).unwrap();
    assert_eq!((counter.pre_saves, counter.post_saves), (1, 1));
    assert!(!counter.persist.is_saving);

    session.destroy_node(a);
    session.load(&SaveScope::all()).unwrap();
    let a = session.graph().roots()[0];
    let counter = counter_on(&session, a);
    // Rebuilt components were not live for pre-load, but get post-load.
    assert_eq!((counter.pre_loads, counter.post_loads), (0, 1));
    assert!(!counter.persist.is_loading);

    cleanup(&dir);
}

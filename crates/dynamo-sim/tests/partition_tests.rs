//! Network partitions: cut routes never deliver, healed routes do.

use std::collections::BTreeSet;

use dynamo_config::DynamoConfig;
use dynamo_sim::{SimEvent, Simulation};
use dynamo_types::{Key, NodeId, Value};

struct Split {
    sim: Simulation,
    a: NodeId,
    b: NodeId,
    left: BTreeSet<NodeId>,
    right: BTreeSet<NodeId>,
}

/// Nodes `A`..`F` and clients `a`, `b`, cut into `{a, A, B, C}` and
/// `{D, E, F, b}` in both directions.
fn split(seed: u64) -> Split {
    let mut sim = Simulation::new(DynamoConfig::default().with_seed(seed)).unwrap();
    let nodes: Vec<NodeId> = (0..6).map(|_| sim.add_node().unwrap()).collect();
    let a = sim.add_client("a").unwrap();
    let b = sim.add_client("b").unwrap();

    let mut left: Vec<NodeId> = nodes[..3].to_vec();
    left.push(a.clone());
    let mut right: Vec<NodeId> = nodes[3..].to_vec();
    right.push(b.clone());
    sim.disconnect(&left, &right);
    sim.disconnect(&right, &left);

    Split {
        sim,
        a,
        b,
        left: left.into_iter().collect(),
        right: right.into_iter().collect(),
    }
}

fn crosses(split: &Split, from: &NodeId, to: &NodeId) -> bool {
    (split.left.contains(from) && split.right.contains(to))
        || (split.right.contains(from) && split.left.contains(to))
}

#[test]
fn cut_routes_never_deliver() {
    let mut split = split(21);
    let (a, b) = (split.a.clone(), split.b.clone());
    let far_for_a = NodeId::from("D");
    let far_for_b = NodeId::from("A");

    split
        .sim
        .put(&a, Key::from("K1"), Value::from(1u64), &[], Some(far_for_a))
        .unwrap();
    split
        .sim
        .put(&b, Key::from("K2"), Value::from(2u64), &[], Some(far_for_b))
        .unwrap();
    split.sim.get(&a, Key::from("K2"), None).unwrap();
    let limits = split.sim.limits().with_max_timers(60);
    split.sim.run(limits).unwrap();

    let mut cuts = 0;
    for logged in split.sim.events().iter() {
        match &logged.event {
            SimEvent::Deliver { message } => {
                assert!(
                    !crosses(&split, &message.from, &message.to),
                    "delivered across the cut: {}",
                    logged.event
                );
            }
            SimEvent::Cut { message } => {
                assert!(crosses(&split, &message.from, &message.to));
                cuts += 1;
            }
            _ => {}
        }
    }
    assert!(cuts >= 2);
}

#[test]
fn partitions_are_announced() {
    let split = split(1);
    let announced: Vec<String> = split
        .sim
        .events()
        .iter()
        .filter_map(|logged| match &logged.event {
            SimEvent::Announce { text } => Some(text.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(
        announced,
        vec![
            "Cut [A,B,C,a] -> [D,E,F,b]".to_string(),
            "Cut [D,E,F,b] -> [A,B,C,a]".to_string(),
        ]
    );
    assert_eq!(split.sim.bus().partitions().len(), 2);
}

#[test]
fn healing_restores_delivery() {
    let mut split = split(13);
    let a = split.a.clone();
    split.sim.heal_partitions();
    assert!(split.sim.bus().partitions().is_empty());

    let from = split.sim.events().next_seq();
    split
        .sim
        .put(&a, Key::from("K1"), Value::from(5u64), &[], Some(NodeId::from("E")))
        .unwrap();
    let limits = split.sim.limits().with_max_timers(0);
    split.sim.run(limits).unwrap();

    let delivered_to_e = split.sim.events().since(from).any(|logged| {
        matches!(
            &logged.event,
            SimEvent::Deliver { message } if message.from == a && message.to.as_str() == "E"
        )
    });
    assert!(delivered_to_e);
    assert!(
        !split
            .sim
            .events()
            .since(from)
            .any(|logged| matches!(logged.event, SimEvent::Cut { .. }))
    );
}

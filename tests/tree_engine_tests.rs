use std::collections::HashSet;
use std::sync::Arc;

use fractal_focus::focus::{Advance, FocusNavigator, FocusState};
use fractal_focus::models::{FlatRow, ProposedSubtask};
use fractal_focus::tree::{
    apply_subtasks, build_tree, collect_leaves, find, find_parent_of, find_with_parent,
    is_over_budget, pre_order, remove_node, sum_estimate, toggle_expansion, Task, ROOT_ID,
};
use pretty_assertions::assert_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Rows with arbitrary parent references: forward, backward, dangling, self,
/// and cycles all show up
fn random_rows(rng: &mut StdRng, count: usize) -> Vec<FlatRow> {
    (0..count)
        .map(|i| {
            let id = format!("n{}", i);
            let title = format!("Task {}", i);
            let estimate = rng.gen_range(0..60);
            match rng.gen_range(0..5) {
                0 => FlatRow::new(id, title, estimate),
                1 => FlatRow::child(id, title, estimate, "missing"),
                _ => {
                    let parent = format!("n{}", rng.gen_range(0..count));
                    FlatRow::child(id, title, estimate, parent)
                }
            }
        })
        .collect()
}

fn assert_depths(tree: &Task) {
    let mut stack = vec![tree];
    while let Some(node) = stack.pop() {
        for child in node.children() {
            assert_eq!(
                child.depth(),
                node.depth() + 1,
                "depth of {} under {}",
                child.id(),
                node.id()
            );
            stack.push(child);
        }
    }
}

fn ids(nodes: &[&Task]) -> Vec<String> {
    nodes.iter().map(|n| n.id().to_string()).collect()
}

/// root -> A{30} -> [w{5}, t1{5}, t2{10}]
fn scenario_tree() -> Task {
    build_tree(
        &[
            FlatRow::new("A", "A", 30),
            FlatRow::child("w", "w", 5, "A"),
            FlatRow::child("t1", "t1", 5, "A"),
            FlatRow::child("t2", "t2", 10, "A"),
        ],
        "Project",
    )
}

#[test]
fn test_builder_keeps_every_row_once_with_valid_depths() {
    let mut rng = StdRng::seed_from_u64(7);
    for round in 0..50 {
        let rows = random_rows(&mut rng, 1 + round % 25);
        let tree = build_tree(&rows, "Project");

        assert_depths(&tree);
        let seen: Vec<String> = pre_order(&tree)
            .into_iter()
            .skip(1)
            .map(|n| n.id().to_string())
            .collect();
        let unique: HashSet<&String> = seen.iter().collect();
        assert_eq!(seen.len(), rows.len(), "round {}", round);
        assert_eq!(unique.len(), rows.len(), "round {}", round);

        // siblings keep their relative row order
        for node in pre_order(&tree) {
            let positions: Vec<usize> = node
                .children()
                .iter()
                .map(|c| rows.iter().position(|r| r.id == c.id()).unwrap())
                .collect();
            let mut sorted = positions.clone();
            sorted.sort_unstable();
            assert_eq!(positions, sorted);
        }
    }
}

#[test]
fn test_round_trip_respects_parent_links() {
    let rows = vec![
        FlatRow::new("a", "a", 1),
        FlatRow::child("a1", "a1", 1, "a"),
        FlatRow::new("b", "b", 1),
        FlatRow::child("a2", "a2", 1, "a"),
        FlatRow::child("a1x", "a1x", 1, "a1"),
    ];
    let tree = build_tree(&rows, "Project");
    assert_eq!(
        ids(&pre_order(&tree)),
        vec!["root", "a", "a1", "a1x", "a2", "b"]
    );
    for row in &rows {
        let parent = find_parent_of(&tree, &row.id).unwrap();
        assert_eq!(Some(parent.id()), row.parent_id.as_deref().or(Some(ROOT_ID)));
    }
}

#[test]
fn test_leaf_order_is_stable_and_ignores_expansion() {
    let tree = scenario_tree();
    let first = ids(&collect_leaves(&tree));
    assert_eq!(first, ids(&collect_leaves(&tree)));

    let collapsed = toggle_expansion(&tree, "A");
    assert!(!find(&collapsed, "A").unwrap().is_expanded());
    assert_eq!(ids(&collect_leaves(&collapsed)), first);
}

#[test]
fn test_budget_scenario() {
    let tree = scenario_tree();
    assert_eq!(ids(&collect_leaves(&tree)), vec!["w", "t1", "t2"]);
    let a = find(&tree, "A").unwrap();
    assert_eq!(sum_estimate(a), 20);
    assert!(!is_over_budget(a));
}

#[test]
fn test_mutations_leave_input_untouched() {
    let tree = scenario_tree();
    let before = tree.clone();

    let _ = toggle_expansion(&tree, "w");
    let _ = apply_subtasks(&tree, "t1", &[ProposedSubtask::new("s", "s", 1)]);
    let _ = remove_node(&tree, "A");

    assert_eq!(tree, before);
}

#[test]
fn test_double_toggle_everywhere() {
    let tree = scenario_tree();
    for node in pre_order(&tree) {
        let twice = toggle_expansion(&toggle_expansion(&tree, node.id()), node.id());
        assert_eq!(twice, tree);
    }
}

#[test]
fn test_removal_excises_descendants() {
    let tree = scenario_tree();
    let pruned = remove_node(&tree, "A");
    for id in ["A", "w", "t1", "t2"] {
        assert!(find_with_parent(&pruned, id).is_none());
    }
    assert_depths(&pruned);
}

#[test]
fn test_apply_subtasks_scenario_on_hand_built_tree() {
    // A tree whose root sits at depth 0, as a client may hand in
    let tree: Task = serde_json::from_str(
        r#"{
            "id": "root", "title": "Album", "estimate": 30, "depth": 0, "isExpanded": true,
            "children": [{"id": "A", "title": "A", "estimate": 30, "depth": 1, "children": []}]
        }"#,
    )
    .unwrap();

    let proposals = vec![
        ProposedSubtask::new("s1", "x", 5),
        ProposedSubtask {
            selected: false,
            ..ProposedSubtask::new("s2", "y", 5)
        },
    ];
    let applied = apply_subtasks(&tree, "A", &proposals);
    let a = find(&applied, "A").unwrap();
    assert!(a.is_expanded());
    assert_eq!(a.children().len(), 1);
    let child = &a.children()[0];
    assert_eq!(
        (child.id(), child.title(), child.estimate(), child.depth()),
        ("A-s1", "x", 5, 2)
    );
}

#[test]
fn test_structural_sharing_on_deep_edit() {
    let tree = build_tree(
        &[
            FlatRow::new("a", "a", 1),
            FlatRow::child("a1", "a1", 1, "a"),
            FlatRow::child("a2", "a2", 1, "a"),
            FlatRow::new("b", "b", 1),
        ],
        "Project",
    );
    let applied = apply_subtasks(&tree, "a1", &[ProposedSubtask::new("s", "s", 1)]);
    assert!(Arc::ptr_eq(&tree.children()[1], &applied.children()[1]));
    assert!(Arc::ptr_eq(
        &tree.children()[0].children()[1],
        &applied.children()[0].children()[1]
    ));
}

#[test]
fn test_focus_walkthrough_scenario() {
    let tree = scenario_tree();
    let mut nav = FocusNavigator::new();
    nav.enter(&tree, "w").unwrap();

    assert_eq!(nav.advance(&tree), Advance::Next("t1".to_string()));
    let (tree, step) = nav.complete_current(&tree);
    assert_eq!(step, Advance::Next("t2".to_string()));
    assert_eq!(ids(&collect_leaves(&tree)), vec!["w", "t2"]);

    assert_eq!(nav.advance(&tree), Advance::Exhausted);
    assert_eq!(nav.state(), &FocusState::Complete);
}

#[test]
fn test_focus_survives_random_completions() {
    let mut rng = StdRng::seed_from_u64(11);
    let rows = random_rows(&mut rng, 30);
    let mut tree = build_tree(&rows, "Project");
    let mut nav = FocusNavigator::new();
    let first = collect_leaves(&tree)[0].id().to_string();
    nav.enter(&tree, &first).unwrap();

    let mut steps = 0;
    while nav.current().is_some() {
        steps += 1;
        assert!(steps <= rows.len() * 3, "focus never finished");
        if rng.gen_bool(0.5) {
            let (pruned, _) = nav.complete_current(&tree);
            tree = pruned;
        } else {
            nav.advance(&tree);
        }
        if let Some(current) = nav.current() {
            let node = find(&tree, current).unwrap();
            assert!(node.is_leaf() && !node.is_root());
        }
    }
    assert_eq!(nav.state(), &FocusState::Complete);
}

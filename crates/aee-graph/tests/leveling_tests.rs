use aee_atom::{AtomId, AtomSpec, AtomicUnit};
use aee_graph::{GraphBuilder, GraphError};
use proptest::prelude::*;
use std::collections::BTreeSet;

fn id(i: usize) -> String {
    format!("atom-{i:03}")
}

/// Forward-only edges (lower index to higher) always form a DAG
fn acyclic_atoms(count: usize, pairs: &[(usize, usize)]) -> Vec<AtomicUnit> {
    let mut atoms: Vec<AtomicUnit> = (0..count)
        .map(|i| AtomicUnit::new(id(i), "t", AtomSpec::new(id(i))))
        .collect();
    for &(a, b) in pairs {
        let (a, b) = (a % count, b % count);
        if a < b {
            atoms[b] = atoms[b].clone().depends_on(id(a));
        }
    }
    atoms
}

proptest! {
    #[test]
    fn prop_every_edge_crosses_levels(
        count in 1..40usize,
        pairs in proptest::collection::vec((0..40usize, 0..40usize), 0..120)
    ) {
        let atoms = acyclic_atoms(count, &pairs);
        let graph = GraphBuilder::new().add_atoms(atoms.iter()).unwrap().build().unwrap();

        // Invariant: prerequisites always sit on a strictly earlier level
        for edge in graph.edges() {
            prop_assert!(graph.level_of(&edge.from).unwrap() < graph.level_of(&edge.to).unwrap());
        }
    }

    #[test]
    fn prop_waves_partition_atoms(
        count in 1..40usize,
        pairs in proptest::collection::vec((0..40usize, 0..40usize), 0..120)
    ) {
        let atoms = acyclic_atoms(count, &pairs);
        let graph = GraphBuilder::new().add_atoms(atoms.iter()).unwrap().build().unwrap();

        let mut seen = BTreeSet::new();
        for (level, wave) in graph.waves().iter().enumerate() {
            prop_assert_eq!(wave.level, level);
            prop_assert!(!wave.is_empty());
            let mut sorted = wave.atoms.clone();
            sorted.sort();
            prop_assert_eq!(&sorted, &wave.atoms);
            for atom in &wave.atoms {
                prop_assert!(seen.insert(atom.clone()));
            }
        }
        prop_assert_eq!(seen.len(), count);
    }

    #[test]
    fn prop_level_is_one_past_deepest_prerequisite(
        count in 1..30usize,
        pairs in proptest::collection::vec((0..30usize, 0..30usize), 0..80)
    ) {
        let atoms = acyclic_atoms(count, &pairs);
        let graph = GraphBuilder::new().add_atoms(atoms.iter()).unwrap().build().unwrap();

        for atom in &atoms {
            let deps = graph.dependencies_of(&atom.id);
            let expected = deps
                .iter()
                .map(|d| graph.level_of(d).unwrap() + 1)
                .max()
                .unwrap_or(0);
            prop_assert_eq!(graph.level_of(&atom.id), Some(expected));
        }
    }

    #[test]
    fn prop_back_edge_is_always_a_cycle(len in 2..15usize) {
        let mut atoms: Vec<AtomicUnit> = (0..len)
            .map(|i| {
                let atom = AtomicUnit::new(id(i), "t", AtomSpec::new(id(i)));
                if i == 0 { atom } else { atom.depends_on(id(i - 1)) }
            })
            .collect();
        atoms[0] = atoms[0].clone().depends_on(id(len - 1));

        let err = GraphBuilder::new().add_atoms(atoms.iter()).unwrap().build().unwrap_err();
        let expected: Vec<AtomId> = (0..len).map(|i| AtomId::new(id(i))).collect();
        prop_assert_eq!(err, GraphError::CycleDetected { members: expected });
    }
}

#[test]
fn test_cycle_is_reported_before_leveling_anything() {
    let atoms = [
        AtomicUnit::new("root", "t", AtomSpec::new("root")),
        AtomicUnit::new("x", "t", AtomSpec::new("x")).depends_on("root").depends_on("y"),
        AtomicUnit::new("y", "t", AtomSpec::new("y")).depends_on("x"),
    ];
    let err = GraphBuilder::new().add_atoms(atoms.iter()).unwrap().build().unwrap_err();
    assert_eq!(err.cycle_members(), Some(&[AtomId::new("x"), AtomId::new("y")][..]));
}

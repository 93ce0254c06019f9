//! Property tests for the registry.
//!
//! Random sequences of entity and component operations are applied to a
//! registry with two owning groups, `(A, B)` excluding `C` and `(C, D)`
//! observing `A`, plus signal counters on `A` and `B`. `D` may name a
//! follower entity that is destroyed when the `D` goes away, so destroys
//! cascade through nested listener calls. After each step the registry is
//! compared with a brute-force model.

use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use proptest::prelude::*;
use tessera_ecs::prelude::*;

#[derive(Debug, Clone, PartialEq)]
struct A(u32);
#[derive(Debug, Clone, PartialEq)]
struct B(u32);
#[derive(Debug, Clone, PartialEq)]
struct C;
#[derive(Debug, Clone, PartialEq)]
struct D(Option<Entity>);

#[derive(Debug, Clone)]
enum RegistryOp {
    Create,
    Destroy(usize),
    EmplaceA(usize, u32),
    EmplaceB(usize, u32),
    EmplaceC(usize),
    RemoveA(usize),
    RemoveB(usize),
    RemoveC(usize),
    EmplaceD(usize, Option<usize>),
    RemoveD(usize),
    PatchA(usize),
}

fn registry_op_strategy() -> impl Strategy<Value = RegistryOp> {
    prop_oneof![
        3 => Just(RegistryOp::Create),
        1 => (0..64usize).prop_map(RegistryOp::Destroy),
        2 => (0..64usize, any::<u32>()).prop_map(|(i, v)| RegistryOp::EmplaceA(i, v)),
        2 => (0..64usize, any::<u32>()).prop_map(|(i, v)| RegistryOp::EmplaceB(i, v)),
        1 => (0..64usize).prop_map(RegistryOp::EmplaceC),
        1 => (0..64usize).prop_map(RegistryOp::RemoveA),
        1 => (0..64usize).prop_map(RegistryOp::RemoveB),
        1 => (0..64usize).prop_map(RegistryOp::RemoveC),
        2 => (0..64usize, prop::option::of(0..64usize))
            .prop_map(|(i, follower)| RegistryOp::EmplaceD(i, follower)),
        1 => (0..64usize).prop_map(RegistryOp::RemoveD),
        1 => (0..64usize).prop_map(RegistryOp::PatchA),
    ]
}

/// What the model believes each live entity carries.
#[derive(Debug, Clone, Default)]
struct Carried {
    a: Option<u32>,
    b: Option<u32>,
    c: bool,
    d: Option<Option<Entity>>,
}

#[derive(Default)]
struct Counters {
    constructed: Cell<i64>,
    destroyed: Cell<i64>,
    updated: Cell<i64>,
}

fn install_counters<T: Component>(registry: &mut Registry) -> Rc<Counters> {
    let counters = Rc::new(Counters::default());
    let c = Rc::clone(&counters);
    registry
        .on_construct::<T>()
        .connect(move |registry, entity| {
            assert!(registry.all_of::<(T,)>(entity));
            c.constructed.set(c.constructed.get() + 1);
        });
    let c = Rc::clone(&counters);
    registry
        .on_destroy::<T>()
        .connect(move |registry, entity| {
            assert!(registry.all_of::<(T,)>(entity));
            c.destroyed.set(c.destroyed.get() + 1);
        });
    let c = Rc::clone(&counters);
    registry
        .on_update::<T>()
        .connect(move |_, _| c.updated.set(c.updated.get() + 1));
    counters
}

/// Losing a `D` destroys its follower, if that is still alive.
fn install_followers(registry: &mut Registry) {
    registry.on_destroy::<D>().connect(|registry, entity| {
        let follower = registry.get_mut::<D>(entity).ok().and_then(|d| d.0.take());
        if let Some(follower) = follower {
            if registry.valid(follower) {
                registry.destroy(follower).unwrap();
            }
        }
    });
}

/// Remove `entity` and everything reachable through follower links.
fn destroy_in_model(model: &mut BTreeMap<Entity, Carried>, dead: &mut Vec<Entity>, entity: Entity) {
    let mut pending = vec![entity];
    while let Some(e) = pending.pop() {
        if let Some(carried) = model.remove(&e) {
            dead.push(e);
            if let Some(Some(follower)) = carried.d {
                pending.push(follower);
            }
        }
    }
}

fn pick(alive: &BTreeMap<Entity, Carried>, i: usize) -> Option<Entity> {
    if alive.is_empty() {
        None
    } else {
        alive.keys().nth(i % alive.len()).copied()
    }
}

fn check(registry: &mut Registry, model: &BTreeMap<Entity, Carried>) -> Result<(), TestCaseError> {
    prop_assert_eq!(registry.alive(), model.len());

    for (&e, carried) in model {
        prop_assert!(registry.valid(e));
        prop_assert_eq!(registry.try_get::<A>(e).map(|a| a.0), carried.a);
        prop_assert_eq!(registry.try_get::<B>(e).map(|b| b.0), carried.b);
        prop_assert_eq!(registry.all_of::<(C,)>(e), carried.c);
        prop_assert_eq!(registry.try_get::<D>(e).map(|d| d.0), carried.d);
    }

    let expected: BTreeSet<Entity> = model
        .iter()
        .filter(|(_, c)| c.a.is_some() && c.b.is_some() && !c.c)
        .map(|(&e, _)| e)
        .collect();

    // View: brute-force predicate, each entity once.
    let view = registry.view::<(A, B)>().exclude::<(C,)>();
    let listed: Vec<Entity> = view.iter().collect();
    let unique: BTreeSet<Entity> = listed.iter().copied().collect();
    prop_assert_eq!(listed.len(), unique.len());
    prop_assert_eq!(&unique, &expected);

    // Group: exact prefix, shared order in both owned storages.
    let len = {
        let group = registry.group::<(A, B), (), (C,)>().unwrap();
        let members: BTreeSet<Entity> = group.entities().iter().copied().collect();
        prop_assert_eq!(&members, &expected);
        group.len()
    };
    let a = registry.storage::<A>().unwrap().packed();
    let b = registry.storage::<B>().unwrap().packed();
    prop_assert_eq!(&a[..len], &b[..len]);

    // Second group: owns C and D, observes A.
    let expected: BTreeSet<Entity> = model
        .iter()
        .filter(|(_, c)| c.c && c.d.is_some() && c.a.is_some())
        .map(|(&e, _)| e)
        .collect();
    let len = {
        let group = registry.group::<(C, D), (A,), ()>().unwrap();
        let members: BTreeSet<Entity> = group.entities().iter().copied().collect();
        prop_assert_eq!(&members, &expected);
        for &e in group.entities() {
            let (_, (a,)) = group.get(e).unwrap();
            prop_assert_eq!(Some(a.0), model[&e].a);
        }
        group.len()
    };
    let c = registry.storage::<C>().unwrap().packed();
    let d = registry.storage::<D>().unwrap().packed();
    prop_assert_eq!(&c[..len], &d[..len]);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1_000))]

    #[test]
    fn registry_matches_model(ops in prop::collection::vec(registry_op_strategy(), 1..120)) {
        let mut registry = Registry::new();
        let counters_a = install_counters::<A>(&mut registry);
        let counters_b = install_counters::<B>(&mut registry);
        install_followers(&mut registry);
        registry.group::<(A, B), (), (C,)>().unwrap();
        registry.group::<(C, D), (A,), ()>().unwrap();

        let mut model: BTreeMap<Entity, Carried> = BTreeMap::new();
        let mut dead: Vec<Entity> = Vec::new();
        let mut patches = 0i64;

        for op in ops {
            match op {
                RegistryOp::Create => {
                    model.insert(registry.create(), Carried::default());
                }
                RegistryOp::Destroy(i) => {
                    if let Some(e) = pick(&model, i) {
                        registry.destroy(e).unwrap();
                        destroy_in_model(&mut model, &mut dead, e);
                    }
                }
                RegistryOp::EmplaceA(i, v) => {
                    if let Some(e) = pick(&model, i) {
                        let entry = model.get_mut(&e).unwrap();
                        let result = registry.emplace(e, A(v)).map(|a| a.0);
                        if entry.a.is_some() {
                            let duplicate = matches!(result, Err(EcsError::DuplicateComponent { .. }));
                            prop_assert!(duplicate);
                        } else {
                            prop_assert_eq!(result, Ok(v));
                            entry.a = Some(v);
                        }
                    }
                }
                RegistryOp::EmplaceB(i, v) => {
                    if let Some(e) = pick(&model, i) {
                        let entry = model.get_mut(&e).unwrap();
                        registry.emplace_or_replace(e, B(v)).unwrap();
                        entry.b = Some(v);
                    }
                }
                RegistryOp::EmplaceC(i) => {
                    if let Some(e) = pick(&model, i) {
                        registry.get_or_emplace(e, C).unwrap();
                        model.get_mut(&e).unwrap().c = true;
                    }
                }
                RegistryOp::RemoveA(i) => {
                    if let Some(e) = pick(&model, i) {
                        let entry = model.get_mut(&e).unwrap();
                        let removed = registry.remove::<A>(e).unwrap();
                        prop_assert_eq!(removed, usize::from(entry.a.is_some()));
                        entry.a = None;
                    }
                }
                RegistryOp::RemoveB(i) => {
                    if let Some(e) = pick(&model, i) {
                        registry.remove::<B>(e).unwrap();
                        model.get_mut(&e).unwrap().b = None;
                    }
                }
                RegistryOp::RemoveC(i) => {
                    if let Some(e) = pick(&model, i) {
                        registry.remove::<C>(e).unwrap();
                        model.get_mut(&e).unwrap().c = false;
                    }
                }
                RegistryOp::EmplaceD(i, follower) => {
                    if let Some(e) = pick(&model, i) {
                        let follower = follower.and_then(|j| pick(&model, j));
                        registry.emplace_or_replace(e, D(follower)).unwrap();
                        model.get_mut(&e).unwrap().d = Some(follower);
                    }
                }
                RegistryOp::RemoveD(i) => {
                    if let Some(e) = pick(&model, i) {
                        registry.remove::<D>(e).unwrap();
                        let entry = model.get_mut(&e).unwrap();
                        if let Some(Some(follower)) = entry.d.take() {
                            destroy_in_model(&mut model, &mut dead, follower);
                        }
                    }
                }
                RegistryOp::PatchA(i) => {
                    if let Some(e) = pick(&model, i) {
                        let entry = model.get_mut(&e).unwrap();
                        let result = registry.patch::<A, _>(e, |a| a.0 = a.0.wrapping_add(1));
                        match entry.a {
                            Some(v) => {
                                prop_assert!(result.is_ok());
                                entry.a = Some(v.wrapping_add(1));
                                patches += 1;
                            }
                            None => prop_assert!(result.is_err()),
                        }
                    }
                }
            }

            check(&mut registry, &model)?;
            for &e in &dead {
                prop_assert!(!registry.valid(e));
            }
        }

        let live_a = registry.count::<A>() as i64;
        let live_b = registry.count::<B>() as i64;
        prop_assert_eq!(counters_a.constructed.get() - counters_a.destroyed.get(), live_a);
        prop_assert_eq!(counters_b.constructed.get() - counters_b.destroyed.get(), live_b);
        prop_assert_eq!(counters_a.updated.get(), patches);
    }
}

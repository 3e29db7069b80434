//! Ready-set computation and deterministic orderings over the ticket
//! dependency graph. The graph is validated acyclic at load time, so
//! the walks here do not re-check for cycles.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use epic_core::state::TicketState;
use epic_core::types::{Ticket, TicketId};

/// Pending tickets whose dependencies are all completed, in id order.
/// The executor promotes these to `Ready` through the dependency gate.
pub fn eligible_for_ready(tickets: &BTreeMap<TicketId, Ticket>) -> Vec<TicketId> {
    tickets
        .values()
        .filter(|t| t.state == TicketState::Pending && t.dependencies_completed(tickets))
        .map(|t| t.id.clone())
        .collect()
}

/// The next ticket to execute: critical tickets first, then shallower
/// dependency depth, then id.
pub fn next_ready(tickets: &BTreeMap<TicketId, Ticket>) -> Option<TicketId> {
    let mut ready: Vec<&Ticket> = tickets
        .values()
        .filter(|t| t.state == TicketState::Ready)
        .collect();
    ready.sort_by(|a, b| {
        b.critical
            .cmp(&a.critical)
            .then_with(|| dependency_depth(&a.id, tickets).cmp(&dependency_depth(&b.id, tickets)))
            .then_with(|| a.id.cmp(&b.id))
    });
    ready.first().map(|t| t.id.clone())
}

/// Longest dependency chain below a ticket: 0 for no dependencies.
pub fn dependency_depth(id: &TicketId, tickets: &BTreeMap<TicketId, Ticket>) -> usize {
    fn walk(
        id: &TicketId,
        tickets: &BTreeMap<TicketId, Ticket>,
        memo: &mut BTreeMap<TicketId, usize>,
    ) -> usize {
        if let Some(depth) = memo.get(id) {
            return *depth;
        }
        let depth = tickets
            .get(id)
            .map(|t| {
                t.depends_on
                    .iter()
                    .map(|dep| walk(dep, tickets, memo) + 1)
                    .max()
                    .unwrap_or(0)
            })
            .unwrap_or(0);
        memo.insert(id.clone(), depth);
        depth
    }

    let mut memo = BTreeMap::new();
    walk(id, tickets, &mut memo)
}

/// Dependency-respecting order (dependencies before dependents) over
/// the tickets accepted by `include`. Deterministic: among unblocked
/// tickets the smallest id goes first.
pub fn topological_order(
    tickets: &BTreeMap<TicketId, Ticket>,
    include: impl Fn(&Ticket) -> bool,
) -> Vec<TicketId> {
    let selected: BTreeSet<TicketId> = tickets
        .values()
        .filter(|t| include(t))
        .map(|t| t.id.clone())
        .collect();

    let mut in_degree: BTreeMap<TicketId, usize> = BTreeMap::new();
    let mut children: BTreeMap<TicketId, Vec<TicketId>> = BTreeMap::new();
    for id in &selected {
        let ticket = &tickets[id];
        let mut degree = 0;
        for dep in &ticket.depends_on {
            if selected.contains(dep) {
                degree += 1;
                children.entry(dep.clone()).or_default().push(id.clone());
            }
        }
        in_degree.insert(id.clone(), degree);
    }

    let mut available: BTreeSet<TicketId> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| id.clone())
        .collect();
    let mut out = Vec::with_capacity(selected.len());

    while let Some(id) = available.iter().next().cloned() {
        available.remove(&id);
        for child in children.get(&id).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(child) {
                *degree -= 1;
                if *degree == 0 {
                    available.insert(child.clone());
                }
            }
        }
        out.push(id);
    }

    out
}

/// All tickets that depend on `id`, directly or transitively, in BFS
/// order with sorted neighbors.
pub fn transitive_dependents(
    id: &TicketId,
    tickets: &BTreeMap<TicketId, Ticket>,
) -> Vec<TicketId> {
    let mut children: BTreeMap<&TicketId, Vec<&TicketId>> = BTreeMap::new();
    for ticket in tickets.values() {
        for dep in &ticket.depends_on {
            children.entry(dep).or_default().push(&ticket.id);
        }
    }
    for list in children.values_mut() {
        list.sort();
    }

    let mut out = Vec::new();
    let mut seen = BTreeSet::new();
    let mut queue = VecDeque::new();
    queue.push_back(id);
    seen.insert(id.clone());

    while let Some(node) = queue.pop_front() {
        for &child in children.get(node).into_iter().flatten() {
            if seen.insert(child.clone()) {
                out.push(child.clone());
                queue.push_back(child);
            }
        }
    }

    out
}

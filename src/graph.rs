use std::collections::{HashMap, HashSet, VecDeque};

use anyhow::{Result, bail};

use crate::dsl::{Endpoint, Link, MaterialGraph, Node, NodeKind, SocketValue};

pub fn topo_sort(graph: &MaterialGraph) -> Result<Vec<String>> {
    let mut indeg: HashMap<&str, usize> = graph
        .nodes
        .iter()
        .map(|n| (n.id.as_str(), 0usize))
        .collect();

    let mut outgoing: HashMap<&str, Vec<&str>> = HashMap::new();
    for l in &graph.links {
        if !indeg.contains_key(l.from.node_id.as_str()) {
            bail!(
                "link references missing node: {} -> {}",
                l.from.node_id,
                l.to.node_id
            );
        }
        let Some(d) = indeg.get_mut(l.to.node_id.as_str()) else {
            bail!(
                "link references missing node: {} -> {}",
                l.from.node_id,
                l.to.node_id
            );
        };
        *d += 1;
        outgoing
            .entry(l.from.node_id.as_str())
            .or_default()
            .push(l.to.node_id.as_str());
    }

    // Seed in declaration order so the result is stable across runs.
    let mut q: VecDeque<&str> = graph
        .nodes
        .iter()
        .map(|n| n.id.as_str())
        .filter(|id| indeg.get(id) == Some(&0))
        .collect();
    let mut order: Vec<String> = Vec::with_capacity(graph.nodes.len());

    while let Some(n) = q.pop_front() {
        order.push(n.to_string());
        if let Some(nexts) = outgoing.get(n) {
            for m in nexts {
                if let Some(entry) = indeg.get_mut(m) {
                    *entry -= 1;
                    if *entry == 0 {
                        q.push_back(m);
                    }
                }
            }
        }
    }

    if order.len() != graph.nodes.len() {
        bail!(
            "cycle detected in material '{}' (cannot topologically sort)",
            graph.name
        );
    }
    Ok(order)
}

fn incoming_by_node(links: &[Link]) -> HashMap<&str, Vec<&str>> {
    let mut incoming: HashMap<&str, Vec<&str>> = HashMap::new();
    for l in links {
        incoming
            .entry(l.to.node_id.as_str())
            .or_default()
            .push(l.from.node_id.as_str());
    }
    incoming
}

/// Every node reachable backwards from `start`, `start` included, in
/// depth-first discovery order.
///
/// A node reached again while it is still on the current path means the
/// host handed us a cyclic graph; that is reported instead of looping.
pub fn upstream_reachable(graph: &MaterialGraph, start: &str) -> Result<Vec<String>> {
    let incoming = incoming_by_node(&graph.links);
    let mut order: Vec<String> = Vec::new();
    let mut done: HashSet<&str> = HashSet::new();
    let mut on_path: HashSet<&str> = HashSet::new();
    walk_upstream(&incoming, start, &mut order, &mut done, &mut on_path)?;
    Ok(order)
}

fn walk_upstream<'a>(
    incoming: &HashMap<&'a str, Vec<&'a str>>,
    node: &'a str,
    order: &mut Vec<String>,
    done: &mut HashSet<&'a str>,
    on_path: &mut HashSet<&'a str>,
) -> Result<()> {
    if done.contains(node) {
        return Ok(());
    }
    if !on_path.insert(node) {
        bail!("cycle detected while walking upstream of node '{node}'");
    }
    order.push(node.to_string());
    if let Some(prevs) = incoming.get(node) {
        for p in prevs {
            walk_upstream(incoming, *p, order, done, on_path)?;
        }
    }
    on_path.remove(node);
    done.insert(node);
    Ok(())
}

/// Whether `a` feeds `b`, directly or through other nodes.
pub fn is_upstream(graph: &MaterialGraph, a: &str, b: &str) -> Result<bool> {
    if a == b {
        return Ok(false);
    }
    Ok(upstream_reachable(graph, b)?.iter().any(|id| id == a))
}

/// First node of `kind` found walking upstream from `start`.
pub fn find_upstream_of_kind(graph: &MaterialGraph, start: &str, kind: NodeKind) -> Result<Option<String>> {
    for id in upstream_reachable(graph, start)? {
        if graph.node(&id).is_some_and(|n| n.kind == kind) {
            return Ok(Some(id));
        }
    }
    Ok(None)
}

/// An input socket found by [`find_upstream_input`].
#[derive(Debug, Clone, PartialEq)]
pub struct InputHit {
    pub node_id: String,
    pub link: Option<Endpoint>,
    pub value: Option<SocketValue>,
}

/// Walk upstream from `start`, entering only nodes whose kind passes
/// `filter`, and return the first node (depth-first) carrying an input named
/// `input`. `start` itself is always entered but never matched.
pub fn find_upstream_input(
    graph: &MaterialGraph,
    start: &str,
    filter: impl Fn(NodeKind) -> bool,
    input: &str,
) -> Result<Option<InputHit>> {
    let mut visited: HashSet<String> = HashSet::new();
    let mut on_path: HashSet<String> = HashSet::new();
    find_input_inner(graph, start, &filter, input, true, &mut visited, &mut on_path)
}

fn find_input_inner(
    graph: &MaterialGraph,
    node_id: &str,
    filter: &impl Fn(NodeKind) -> bool,
    input: &str,
    is_start: bool,
    visited: &mut HashSet<String>,
    on_path: &mut HashSet<String>,
) -> Result<Option<InputHit>> {
    if visited.contains(node_id) {
        return Ok(None);
    }
    if !on_path.insert(node_id.to_string()) {
        bail!("cycle detected while searching for input '{input}' at node '{node_id}'");
    }
    let node = graph.find_node(node_id)?;

    if !is_start {
        if let Some(s) = node.input(input) {
            return Ok(Some(InputHit {
                node_id: node.id.clone(),
                link: graph.incoming(&node.id, input).map(|l| l.from.clone()),
                value: s.default_value,
            }));
        }
    }

    for s in &node.inputs {
        let Some(l) = graph.incoming(&node.id, &s.name) else {
            continue;
        };
        let Some(up) = graph.node(&l.from.node_id) else {
            continue;
        };
        if !filter(up.kind) {
            continue;
        }
        if let Some(hit) = find_input_inner(graph, &up.id, filter, input, false, visited, on_path)? {
            return Ok(Some(hit));
        }
    }

    on_path.remove(node_id);
    visited.insert(node_id.to_string());
    Ok(None)
}

pub fn downstream_links<'a>(graph: &'a MaterialGraph, node_id: &str) -> Vec<&'a Link> {
    graph
        .links
        .iter()
        .filter(|l| l.from.node_id == node_id)
        .collect()
}

/// The material output currently driving the bake. When several outputs
/// claim to be active, one targeting all renderers wins.
pub fn active_output(graph: &MaterialGraph) -> Option<&Node> {
    let mut active = graph.material_outputs().filter(|n| n.is_active_output);
    let first = active.next()?;
    if first.target == crate::dsl::OutputTarget::All {
        return Some(first);
    }
    active
        .find(|n| n.target == crate::dsl::OutputTarget::All)
        .or(Some(first))
}

/// BSDF-family nodes feeding the active output, in discovery order.
pub fn bsdf_nodes<'a>(graph: &'a MaterialGraph) -> Result<Vec<&'a Node>> {
    let Some(out) = active_output(graph) else {
        return Ok(Vec::new());
    };
    let mut nodes = Vec::new();
    for id in upstream_reachable(graph, &out.id)? {
        if let Some(n) = graph.node(&id) {
            if n.kind.is_bsdf() {
                nodes.push(n);
            }
        }
    }
    Ok(nodes)
}

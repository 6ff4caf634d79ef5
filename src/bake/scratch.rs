use std::collections::HashMap;
use std::ops::{Deref, DerefMut};

use anyhow::{Result, anyhow};
use log::{debug, warn};

use crate::bake_service::BakeService;
use crate::dsl::{BakeScene, Endpoint, MaterialGraph, OutputTarget, TAG_SCRATCH};
use crate::graph::upstream_reachable;

/// Active-output flags and renderer targets of every material output, as
/// they were before a bake touched the material.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSnapshot {
    outputs: Vec<(String, bool, OutputTarget)>,
}

impl OutputSnapshot {
    pub fn capture(graph: &MaterialGraph) -> Self {
        Self {
            outputs: graph
                .material_outputs()
                .map(|n| (n.id.clone(), n.is_active_output, n.target))
                .collect(),
        }
    }

    pub fn restore(&self, graph: &mut MaterialGraph) {
        for (id, active, target) in &self.outputs {
            if let Some(n) = graph.node_mut(id) {
                n.is_active_output = *active;
                n.target = *target;
            }
        }
    }
}

/// Deletes every scratch-tagged node and the links touching it.
pub fn clear_scratch(graph: &mut MaterialGraph) -> usize {
    graph.remove_nodes_where(|n| n.has_tag(TAG_SCRATCH))
}

/// Duplicate `root` and everything upstream of it, tagging the copies as
/// scratch. Links among the originals are mirrored among the copies; the
/// copies are never active outputs. Returns original id -> copy id.
pub fn clone_upstream(graph: &mut MaterialGraph, root: &str, prefix: &str) -> Result<HashMap<String, String>> {
    let ids = upstream_reachable(graph, root)?;
    let mut map: HashMap<String, String> = HashMap::new();
    for id in &ids {
        map.insert(id.clone(), format!("{prefix}{id}"));
    }

    let mut copies = Vec::with_capacity(ids.len());
    for id in &ids {
        let mut n = graph.find_node(id)?.clone();
        n.id = map[id].clone();
        n.is_active_output = false;
        n.tags.insert(TAG_SCRATCH.to_string());
        copies.push(n);
    }
    for n in copies {
        graph.add_node(n)?;
    }

    let links: Vec<(Endpoint, Endpoint)> = graph
        .links
        .iter()
        .filter_map(|l| {
            let from = map.get(&l.from.node_id)?;
            let to = map.get(&l.to.node_id)?;
            Some((
                Endpoint::new(from.clone(), l.from.socket.clone()),
                Endpoint::new(to.clone(), l.to.socket.clone()),
            ))
        })
        .collect();
    for (from, to) in links {
        graph.connect(from, to);
    }

    debug!(
        "material '{}': cloned {} node(s) upstream of '{root}'",
        graph.name,
        map.len()
    );
    Ok(map)
}

/// Scoped ownership of a bake run's temporary graph edits.
///
/// The first time a material is borrowed through the scope its output
/// flags are snapshotted. When the scope drops, every scratch node is
/// deleted from those materials and the snapshot is written back, on every
/// exit path.
pub struct ScratchScope<'s> {
    scene: &'s mut BakeScene,
    touched: Vec<(String, OutputSnapshot)>,
}

impl<'s> ScratchScope<'s> {
    pub fn new(scene: &'s mut BakeScene) -> Self {
        Self {
            scene,
            touched: Vec::new(),
        }
    }

    /// Mutable access to one material together with the scene's node groups.
    pub fn material_mut(&mut self, name: &str) -> Result<(&mut MaterialGraph, &[crate::dsl::NodeGroup])> {
        if !self.touched.iter().any(|(n, _)| n == name) {
            let graph = self
                .scene
                .material_mut(name)
                .ok_or_else(|| anyhow!("material not found: {name}"))?;
            // Leftovers from an aborted run would be walked as real nodes.
            let stale = clear_scratch(graph);
            if stale > 0 {
                warn!("material '{name}': removed {stale} stale scratch node(s)");
            }
            self.touched.push((name.to_string(), OutputSnapshot::capture(graph)));
        }
        let BakeScene {
            materials, groups, ..
        } = &mut *self.scene;
        let graph = materials
            .iter_mut()
            .find(|m| m.name == name)
            .ok_or_else(|| anyhow!("material not found: {name}"))?;
        Ok((graph, groups.as_slice()))
    }

    /// Tear down explicitly; equivalent to dropping the scope.
    pub fn finish(self) {}
}

impl Deref for ScratchScope<'_> {
    type Target = BakeScene;

    fn deref(&self) -> &BakeScene {
        &*self.scene
    }
}

impl Drop for ScratchScope<'_> {
    fn drop(&mut self) {
        for (name, snapshot) in self.touched.drain(..) {
            let Some(graph) = self.scene.material_mut(&name) else {
                continue;
            };
            let removed = clear_scratch(graph);
            snapshot.restore(graph);
            debug!("material '{name}': teardown removed {removed} scratch node(s)");
        }
    }
}

/// Sets the bake service's sample count for as long as the guard lives.
pub struct SamplesOverride<'a, S: BakeService + ?Sized> {
    service: &'a mut S,
    previous: u32,
}

impl<'a, S: BakeService + ?Sized> SamplesOverride<'a, S> {
    pub fn new(service: &'a mut S, samples: u32) -> Self {
        let previous = service.samples();
        service.set_samples(samples);
        Self { service, previous }
    }
}

impl<S: BakeService + ?Sized> Deref for SamplesOverride<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        &*self.service
    }
}

impl<S: BakeService + ?Sized> DerefMut for SamplesOverride<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut *self.service
    }
}

impl<S: BakeService + ?Sized> Drop for SamplesOverride<'_, S> {
    fn drop(&mut self) {
        self.service.set_samples(self.previous);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::{Metadata, Node, NodeKind, TAG_SCRATCH};

    fn scene() -> BakeScene {
        let mut m = MaterialGraph::new("mat");
        m.add_node(Node::new("out", NodeKind::OutputMaterial).active()).unwrap();
        m.add_node(Node::new("bsdf", NodeKind::PrincipledBsdf)).unwrap();
        m.add_node(Node::new("rgb", NodeKind::Rgb)).unwrap();
        m.connect(Endpoint::new("bsdf", "BSDF"), Endpoint::new("out", "Surface"));
        m.connect(Endpoint::new("rgb", "Color"), Endpoint::new("bsdf", "Base Color"));
        BakeScene {
            version: "1".to_string(),
            metadata: Metadata {
                name: "s".to_string(),
                created: None,
                modified: None,
            },
            objects: Vec::new(),
            materials: vec![m],
            groups: Vec::new(),
        }
    }

    #[test]
    fn clone_mirrors_internal_links_and_tags_copies() {
        let mut s = scene();
        let g = &mut s.materials[0];
        let map = clone_upstream(g, "out", "tmp/").unwrap();
        assert_eq!(map.len(), 3);
        assert_eq!(g.count_tagged(TAG_SCRATCH), 3);
        let l = g.incoming("tmp/bsdf", "Base Color").unwrap();
        assert_eq!(l.from, Endpoint::new("tmp/rgb", "Color"));
        assert!(!g.node("tmp/out").unwrap().is_active_output);
        // originals untouched
        assert_eq!(
            g.incoming("bsdf", "Base Color").unwrap().from,
            Endpoint::new("rgb", "Color")
        );
    }

    #[test]
    fn dropping_the_scope_restores_flags_and_removes_scratch() {
        let mut s = scene();
        {
            let mut scope = ScratchScope::new(&mut s);
            let (g, _) = scope.material_mut("mat").unwrap();
            clone_upstream(g, "out", "tmp/").unwrap();
            g.node_mut("out").unwrap().is_active_output = false;
            g.node_mut("out").unwrap().target = OutputTarget::Eevee;
        }
        let g = &s.materials[0];
        assert_eq!(g.count_tagged(TAG_SCRATCH), 0);
        assert_eq!(g.nodes.len(), 3);
        assert_eq!(g.links.len(), 2);
        let out = g.node("out").unwrap();
        assert!(out.is_active_output);
        assert_eq!(out.target, OutputTarget::All);
    }
}

use std::collections::HashMap;

use anyhow::{Result, anyhow, bail};
use log::debug;

use crate::dsl::{Endpoint, MaterialGraph, Node, NodeGroup, NodeKind, SocketValue, TAG_SCRATCH, parse_str};

// A group that (indirectly) instances itself would otherwise expand forever.
const MAX_GROUP_EXPANSIONS: usize = 256;

fn group_by_id<'a>(groups: &'a [NodeGroup], id: &str) -> Option<&'a NodeGroup> {
    groups.iter().find(|g| g.id == id)
}

fn parse_group_id(node: &Node) -> Option<&str> {
    parse_str(&node.params, "groupId")
}

/// Where a group boundary socket takes its value from on the outside.
enum Source {
    Link(Endpoint),
    Value(Option<SocketValue>),
}

/// Replace every scratch-tagged `Group` node with a copy of its group's
/// implementation, so later passes never see nested groups.
///
/// Group inputs that are unlinked on the instance hand their literal value
/// to the inner sockets they feed. Inner nodes inherit the scratch tag.
pub(crate) fn expand_scratch_groups(graph: &mut MaterialGraph, groups: &[NodeGroup]) -> Result<usize> {
    let mut expanded_count: usize = 0;

    loop {
        let Some((instance_id, group_id)) = graph
            .nodes
            .iter()
            .find(|n| n.kind == NodeKind::Group && n.has_tag(TAG_SCRATCH))
            .map(|n| (n.id.clone(), parse_group_id(n).map(|s| s.to_string())))
        else {
            break;
        };

        if expanded_count >= MAX_GROUP_EXPANSIONS {
            bail!(
                "material '{}': more than {MAX_GROUP_EXPANSIONS} group expansions, is a group instancing itself?",
                graph.name
            );
        }

        let group_id = group_id
            .ok_or_else(|| anyhow!("group node '{instance_id}' missing params.groupId"))?;
        let group = group_by_id(groups, &group_id)
            .ok_or_else(|| anyhow!("group node '{instance_id}' refers to missing group '{group_id}'"))?;
        let instance = graph.find_node(&instance_id)?.clone();

        let is_boundary = |n: &Node| matches!(n.kind, NodeKind::GroupInput | NodeKind::GroupOutput);
        let boundary_kind: HashMap<&str, NodeKind> = group
            .nodes
            .iter()
            .filter(|n| is_boundary(n))
            .map(|n| (n.id.as_str(), n.kind))
            .collect();

        let node_id_map: HashMap<String, String> = group
            .nodes
            .iter()
            .filter(|n| !is_boundary(n))
            .map(|n| (n.id.clone(), format!("{instance_id}/{}", n.id)))
            .collect();

        // 1) Clone the group's body into the material.
        for n in group.nodes.iter().filter(|n| !is_boundary(n)) {
            let mut n = n.clone();
            n.id = node_id_map[&n.id].clone();
            n.tags.insert(TAG_SCRATCH.to_string());
            graph.add_node(n)?;
        }

        // What feeds each instance input from outside.
        let instance_source = |socket: &str| -> Source {
            match graph.incoming(&instance_id, socket) {
                Some(l) => Source::Link(l.from.clone()),
                None => Source::Value(instance.input(socket).and_then(|s| s.default_value)),
            }
        };

        // 2) Inner links. Those leaving the group input are rewired to the
        // instance's upstream; those entering the group output are recorded.
        let mut output_sources: HashMap<String, Source> = HashMap::new();
        let mut new_links: Vec<(Source, Endpoint)> = Vec::new();
        for l in &group.links {
            let from_kind = boundary_kind.get(l.from.node_id.as_str()).copied();
            let to_kind = boundary_kind.get(l.to.node_id.as_str()).copied();

            let source = match from_kind {
                Some(NodeKind::GroupInput) => instance_source(&l.from.socket),
                Some(_) => continue,
                None => {
                    let Some(from) = node_id_map.get(&l.from.node_id) else {
                        bail!("group '{group_id}' link '{}' references missing node '{}'", l.id, l.from.node_id);
                    };
                    Source::Link(Endpoint::new(from.clone(), l.from.socket.clone()))
                }
            };

            match to_kind {
                Some(NodeKind::GroupOutput) => {
                    output_sources.insert(l.to.socket.clone(), source);
                }
                Some(_) => {}
                None => {
                    let Some(to) = node_id_map.get(&l.to.node_id) else {
                        bail!("group '{group_id}' link '{}' references missing node '{}'", l.id, l.to.node_id);
                    };
                    new_links.push((source, Endpoint::new(to.clone(), l.to.socket.clone())));
                }
            }
        }

        // Unlinked group outputs fall back to the group output node's literal.
        let output_default = |socket: &str| -> Option<SocketValue> {
            group
                .nodes
                .iter()
                .find(|n| n.kind == NodeKind::GroupOutput)
                .and_then(|n| n.input(socket))
                .and_then(|s| s.default_value)
        };

        // 3) Downstream of the instance.
        let outbound: Vec<(String, Endpoint)> = graph
            .links
            .iter()
            .filter(|l| l.from.node_id == instance_id)
            .map(|l| (l.from.socket.clone(), l.to.clone()))
            .collect();
        for (socket, to) in outbound {
            match output_sources.get(&socket) {
                Some(Source::Link(from)) => new_links.push((Source::Link(from.clone()), to)),
                Some(Source::Value(v)) => new_links.push((Source::Value(*v), to)),
                None => new_links.push((Source::Value(output_default(&socket)), to)),
            }
        }

        // 4) Drop the instance, then wire.
        graph.remove_nodes_where(|n| n.id == instance_id);
        for (source, to) in new_links {
            match source {
                Source::Link(from) => graph.connect(from, to),
                Source::Value(Some(v)) => {
                    graph.disconnect(&to.node_id, &to.socket);
                    graph.set_input_default(&to.node_id, &to.socket, v)?;
                }
                Source::Value(None) => {
                    graph.disconnect(&to.node_id, &to.socket);
                }
            }
        }

        debug!(
            "material '{}': expanded group '{group_id}' at '{instance_id}'",
            graph.name
        );
        expanded_count += 1;
    }

    Ok(expanded_count)
}

/// A copy of `graph` with every group instance expanded, for passes that
/// only read the shading network.
pub fn flatten_groups(graph: &MaterialGraph, groups: &[NodeGroup]) -> Result<MaterialGraph> {
    let mut flat = graph.clone();
    let mut any = false;
    for n in flat.nodes.iter_mut().filter(|n| n.kind == NodeKind::Group) {
        n.tags.insert(TAG_SCRATCH.to_string());
        any = true;
    }
    if any {
        expand_scratch_groups(&mut flat, groups)?;
    }
    Ok(flat)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::{Socket, SocketType};

    fn boundary(id: &str, kind: NodeKind, sockets: Vec<Socket>) -> Node {
        let mut n = Node::new(id, kind);
        match kind {
            NodeKind::GroupInput => n.outputs = sockets,
            _ => n.inputs = sockets,
        }
        n
    }

    // Group "tint": out.Color = mix(in.Base, in.Tint, 0.5)
    fn tint_group() -> NodeGroup {
        let mut g = MaterialGraph::new("tint");
        g.add_node(boundary(
            "gin",
            NodeKind::GroupInput,
            vec![
                Socket::new("Base", SocketType::Color, None),
                Socket::new("Tint", SocketType::Color, None),
            ],
        ))
        .unwrap();
        g.add_node(boundary(
            "gout",
            NodeKind::GroupOutput,
            vec![Socket::new("Color", SocketType::Color, None)],
        ))
        .unwrap();
        g.add_node(Node::new("mix", NodeKind::MixRgb)).unwrap();
        g.connect(Endpoint::new("gin", "Base"), Endpoint::new("mix", "Color1"));
        g.connect(Endpoint::new("gin", "Tint"), Endpoint::new("mix", "Color2"));
        g.connect(Endpoint::new("mix", "Color"), Endpoint::new("gout", "Color"));
        NodeGroup {
            id: "tint".to_string(),
            nodes: g.nodes,
            links: g.links,
        }
    }

    fn instance(id: &str) -> Node {
        let mut n = Node::new(id, NodeKind::Group).with_param("groupId", serde_json::json!("tint"));
        n.inputs = vec![
            Socket::new("Base", SocketType::Color, None),
            Socket::new(
                "Tint",
                SocketType::Color,
                Some(SocketValue::Color([1.0, 0.0, 0.0, 1.0])),
            ),
        ];
        n.outputs = vec![Socket::new("Color", SocketType::Color, None)];
        n.tags.insert(TAG_SCRATCH.to_string());
        n
    }

    #[test]
    fn group_is_replaced_by_its_body() {
        let mut m = MaterialGraph::new("m");
        let mut rgb = Node::new("rgb", NodeKind::Rgb);
        rgb.tags.insert(TAG_SCRATCH.to_string());
        m.add_node(rgb).unwrap();
        m.add_node(instance("grp")).unwrap();
        let mut bsdf = Node::new("bsdf", NodeKind::PrincipledBsdf);
        bsdf.tags.insert(TAG_SCRATCH.to_string());
        m.add_node(bsdf).unwrap();
        m.connect(Endpoint::new("rgb", "Color"), Endpoint::new("grp", "Base"));
        m.connect(Endpoint::new("grp", "Color"), Endpoint::new("bsdf", "Base Color"));

        let n = expand_scratch_groups(&mut m, &[tint_group()]).unwrap();
        assert_eq!(n, 1);
        assert!(m.node("grp").is_none());

        let inner = m.node("grp/mix").unwrap();
        assert!(inner.has_tag(TAG_SCRATCH));
        assert_eq!(
            m.incoming("grp/mix", "Color1").unwrap().from,
            Endpoint::new("rgb", "Color")
        );
        // Unlinked instance input propagates its literal.
        assert!(m.incoming("grp/mix", "Color2").is_none());
        assert_eq!(
            inner.input("Color2").unwrap().default_value,
            Some(SocketValue::Color([1.0, 0.0, 0.0, 1.0]))
        );
        assert_eq!(
            m.incoming("bsdf", "Base Color").unwrap().from,
            Endpoint::new("grp/mix", "Color")
        );
    }

    #[test]
    fn flattened_copy_leaves_the_material_alone() {
        let mut m = MaterialGraph::new("m");
        let mut grp = instance("grp");
        grp.tags.clear();
        m.add_node(grp).unwrap();
        m.add_node(Node::new("bsdf", NodeKind::PrincipledBsdf)).unwrap();
        m.connect(Endpoint::new("grp", "Color"), Endpoint::new("bsdf", "Base Color"));

        let flat = flatten_groups(&m, &[tint_group()]).unwrap();
        assert!(flat.node("grp").is_none());
        assert_eq!(
            flat.incoming("bsdf", "Base Color").unwrap().from,
            Endpoint::new("grp/mix", "Color")
        );
        assert!(m.node("grp").is_some_and(|n| !n.has_tag(TAG_SCRATCH)));
        assert!(m.node("grp/mix").is_none());
    }

    #[test]
    fn self_instancing_group_fails() {
        let mut group = tint_group();
        let mut nested = instance("inner");
        nested.tags.clear();
        group.nodes.push(nested);
        group.links.push(crate::dsl::Link {
            id: "x".to_string(),
            from: Endpoint::new("inner", "Color"),
            to: Endpoint::new("mix", "Fac"),
        });

        let mut m = MaterialGraph::new("m");
        m.add_node(instance("grp")).unwrap();
        let err = expand_scratch_groups(&mut m, &[group]).unwrap_err();
        assert!(err.to_string().contains("group expansions"), "{err}");
    }
}

mod common;

use node_forge_bake::bake::types::{
    AlphaVariant, OPAQUE_COLOR, SENTINEL_BLACK, SENTINEL_FLAT_NORMAL, TRANSPARENT_COLOR, WHITE,
};
use node_forge_bake::bake::{BakeTarget, ExportNodes, IsolateOptions, ScratchScope, prepare_export};
use node_forge_bake::dsl::{
    Endpoint, MaterialGraph, Node, NodeKind, SocketValue, TAG_SCRATCH,
};
use node_forge_bake::eval::eval_output_color;

use common::{approx, color, grouped, object, principled, scene, shell_group};

fn export(g: &mut MaterialGraph, target: BakeTarget) -> ExportNodes {
    prepare_export(g, &[], &target, IsolateOptions::default(), "img").unwrap()
}

fn export_with(g: &mut MaterialGraph, target: BakeTarget, options: IsolateOptions) -> ExportNodes {
    prepare_export(g, &[], &target, options, "img").unwrap()
}

fn emission_of(g: &MaterialGraph, export: &ExportNodes) -> String {
    let out = export.output.as_ref().unwrap();
    g.incoming(out, "Surface").unwrap().from.node_id.clone()
}

fn emission_default(g: &MaterialGraph, export: &ExportNodes) -> [f32; 4] {
    let emit = emission_of(g, export);
    g.node(&emit)
        .unwrap()
        .input("Color")
        .unwrap()
        .default_value
        .unwrap()
        .as_color()
}

fn input_default(g: &MaterialGraph, node: &str, socket: &str) -> SocketValue {
    g.node(node)
        .unwrap()
        .input(socket)
        .unwrap()
        .default_value
        .unwrap()
}

/// `out` <- mix shader(Fac <- `fac`, Shader <- `a`, Shader_001 <- `b`).
fn mixed(name: &str, a: Node, b: Node) -> MaterialGraph {
    let mut m = MaterialGraph::new(name);
    m.add_node(Node::new("out", NodeKind::OutputMaterial).active())
        .unwrap();
    m.add_node(Node::new("mix", NodeKind::MixShader)).unwrap();
    m.add_node(Node::new("fac", NodeKind::Value).with_output("Value", SocketValue::Float(0.3)))
        .unwrap();
    let (a_id, b_id) = (a.id.clone(), b.id.clone());
    let a_out = a.outputs[0].name.clone();
    let b_out = b.outputs[0].name.clone();
    m.add_node(a).unwrap();
    m.add_node(b).unwrap();
    m.connect(Endpoint::new("fac", "Value"), Endpoint::new("mix", "Fac"));
    m.connect(Endpoint::new(a_id, a_out), Endpoint::new("mix", "Shader"));
    m.connect(Endpoint::new(b_id, b_out), Endpoint::new("mix", "Shader_001"));
    m.connect(Endpoint::new("mix", "Shader"), Endpoint::new("out", "Surface"));
    m
}

#[test]
fn untraceable_targets_keep_the_sentinel() {
    let mut m = MaterialGraph::new("glow");
    m.add_node(Node::new("out", NodeKind::OutputMaterial).active())
        .unwrap();
    m.add_node(Node::new("emit", NodeKind::Emission)).unwrap();
    m.connect(Endpoint::new("emit", "Emission"), Endpoint::new("out", "Surface"));

    let e = export(&mut m, BakeTarget::Input("Roughness".into()));
    assert!(e.source.is_none());
    assert_eq!(emission_default(&m, &e), SENTINEL_BLACK);
    assert!(m.incoming(&emission_of(&m, &e), "Color").is_none());

    let mut m = principled("plain", &[]);
    let e = export(&mut m, BakeTarget::Input("Clearcoat Normal".into()));
    assert!(e.source.is_none());
    assert_eq!(emission_default(&m, &e), SENTINEL_FLAT_NORMAL);
}

#[test]
fn material_without_output_still_gets_an_export_path() {
    let mut m = MaterialGraph::new("bare");
    m.add_node(Node::new("bsdf", NodeKind::PrincipledBsdf)).unwrap();
    let e = export(&mut m, BakeTarget::Input("Color".into()));
    assert!(e.source.is_none());
    let out = m.node(e.output.as_ref().unwrap()).unwrap();
    assert!(out.is_active_output);
    assert!(out.has_tag(TAG_SCRATCH));
}

#[test]
fn ambient_occlusion_keeps_only_the_ao_branch() {
    let ao_side = Node::new("lit", NodeKind::PrincipledBsdf);
    let plain_side = Node::new("plain", NodeKind::PrincipledBsdf);
    let mut m = mixed("ao", ao_side, plain_side);
    m.add_node(Node::new("ao", NodeKind::AmbientOcclusion)).unwrap();
    m.connect(Endpoint::new("ao", "Color"), Endpoint::new("lit", "Base Color"));

    let e = export(&mut m, BakeTarget::AmbientOcclusion);
    let src = e.source.clone().unwrap();
    let synth = m.node(&src.node_id).unwrap();
    assert_eq!(synth.kind, NodeKind::MixRgb);

    let into_ao = m.incoming(&src.node_id, "Color1").unwrap();
    assert_eq!(into_ao.from.node_id, "bake.tmp/ao");
    assert!(m.incoming(&src.node_id, "Color2").is_none());
    assert_eq!(input_default(&m, &src.node_id, "Color2").as_color(), WHITE);
    assert!(m.incoming(&src.node_id, "Fac").is_none());
    assert_eq!(input_default(&m, &src.node_id, "Fac").as_float(), 0.0);
}

#[test]
fn ambient_occlusion_through_a_color_mix_keeps_the_ao_side() {
    let mut m = principled("dirt", &[]);
    m.add_node(Node::new("tex", NodeKind::ImageTexture)).unwrap();
    m.add_node(Node::new("ao", NodeKind::AmbientOcclusion)).unwrap();
    m.add_node(Node::new("blend", NodeKind::MixRgb)).unwrap();
    m.connect(Endpoint::new("tex", "Color"), Endpoint::new("blend", "Color1"));
    m.connect(Endpoint::new("ao", "Color"), Endpoint::new("blend", "Color2"));
    m.connect(Endpoint::new("blend", "Color"), Endpoint::new("bsdf", "Base Color"));

    let e = export(&mut m, BakeTarget::AmbientOcclusion);
    assert_eq!(e.source.unwrap(), Endpoint::new("bake.tmp/blend", "Color"));

    assert_eq!(
        m.incoming("bake.tmp/blend", "Color2").unwrap().from,
        Endpoint::new("bake.tmp/ao", "AO")
    );
    assert!(m.incoming("bake.tmp/blend", "Color1").is_none());
    assert_eq!(input_default(&m, "bake.tmp/blend", "Color1").as_color(), WHITE);
    assert!(m.incoming("bake.tmp/blend", "Fac").is_none());
    assert_eq!(input_default(&m, "bake.tmp/blend", "Fac").as_float(), 1.0);

    // The original mix is untouched.
    assert_eq!(
        m.incoming("blend", "Color1").unwrap().from,
        Endpoint::new("tex", "Color")
    );
}

#[test]
fn bump_reads_the_bump_height() {
    let mut m = principled("bumpy", &[]);
    m.add_node(Node::new("bump", NodeKind::Bump).with_input("Height", SocketValue::Float(0.4)))
        .unwrap();
    m.connect(Endpoint::new("bump", "Normal"), Endpoint::new("bsdf", "Normal"));

    let e = export(&mut m, BakeTarget::Bump);
    let src = e.source.unwrap();
    assert!(approx(eval_output_color(&m, &src).unwrap(), [0.4, 0.4, 0.4, 1.0]));

    let mut m = principled("flat", &[]);
    let e = export(&mut m, BakeTarget::Bump);
    assert!(e.source.is_none());
    assert_eq!(emission_default(&m, &e), SENTINEL_FLAT_NORMAL);
}

#[test]
fn displacement_reads_the_height_feeding_the_output() {
    let mut m = principled("rocky", &[]);
    m.add_node(Node::new("h", NodeKind::Value).with_output("Value", SocketValue::Float(0.6)))
        .unwrap();
    m.add_node(Node::new("disp", NodeKind::Displacement)).unwrap();
    m.connect(Endpoint::new("h", "Value"), Endpoint::new("disp", "Height"));
    m.connect(Endpoint::new("disp", "Displacement"), Endpoint::new("out", "Displacement"));

    let e = export(&mut m, BakeTarget::Displacement);
    assert_eq!(e.source.unwrap(), Endpoint::new("bake.tmp/h", "Value"));
}

#[test]
fn translucent_and_glass_alpha_read_their_mix() {
    let veil = Node::new("veil", NodeKind::TranslucentBsdf);
    let body = Node::new("body", NodeKind::PrincipledBsdf);
    let mut m = mixed("frost", veil, body.clone());
    let e = export(&mut m, BakeTarget::Alpha(AlphaVariant::Translucent));
    assert_eq!(e.source.unwrap(), Endpoint::new("bake.tmp/fac", "Value"));

    let glass = Node::new("pane", NodeKind::GlassBsdf);
    let mut m = mixed("window", body, glass);
    let e = export(&mut m, BakeTarget::for_job("Glass Alpha", None));
    let src = e.source.unwrap();
    assert_eq!(m.node(&src.node_id).unwrap().kind, NodeKind::Invert);
    assert!(approx(eval_output_color(&m, &src).unwrap(), [0.7, 0.7, 0.7, 1.0]));

    // No glass shader: nothing to read, the sentinel stays.
    let mut m = principled("plain", &[]);
    let e = export(&mut m, BakeTarget::Alpha(AlphaVariant::Glass));
    assert!(e.source.is_none());
    assert_eq!(emission_default(&m, &e), SENTINEL_BLACK);
}

#[test]
fn grouped_materials_are_isolated_through_the_group() {
    let groups = [shell_group("shell", &[("Metallic", SocketValue::Float(0.2))])];
    let mut m = grouped("g", "shell");
    let before = serde_json::to_value(&m).unwrap();

    let e = prepare_export(
        &mut m,
        &groups,
        &BakeTarget::Input("Metallic".into()),
        IsolateOptions::default(),
        "img",
    )
    .unwrap();
    let src = e.source.unwrap();
    assert!(approx(eval_output_color(&m, &src).unwrap(), [0.2, 0.2, 0.2, 1.0]));
    assert!(m.node("bake.tmp/grp").is_none());
    assert!(m.node("bake.tmp/grp/bsdf").is_some_and(|n| n.has_tag(TAG_SCRATCH)));

    // Teardown through a scope brings the grouped material back.
    let mut s = scene(vec![object("a", &["g"])], vec![grouped("g", "shell")]);
    s.groups = groups.to_vec();
    {
        let mut scope = ScratchScope::new(&mut s);
        let (g, groups) = scope.material_mut("g").unwrap();
        prepare_export(g, groups, &BakeTarget::Glossiness, IsolateOptions::default(), "img").unwrap();
    }
    assert_eq!(serde_json::to_value(&s.materials[0]).unwrap(), before);
}

#[test]
fn transparent_branches_are_excluded_from_color() {
    let glass = Node::new("clear", NodeKind::TransparentBsdf);
    let body = Node::new("body", NodeKind::PrincipledBsdf).with_input("Base Color", color(0.2, 0.4, 0.6));

    let mut m = mixed("cutout", glass.clone(), body.clone());
    let e = export(&mut m, BakeTarget::Input("Color".into()));
    let mix = e.source.unwrap().node_id;
    assert!(m.incoming(&mix, "Color1").is_none());
    assert_eq!(input_default(&m, &mix, "Color1").as_color(), TRANSPARENT_COLOR);
    let body_color = m.incoming(&mix, "Color2").unwrap().from.clone();
    assert!(approx(eval_output_color(&m, &body_color).unwrap(), [0.2, 0.4, 0.6, 1.0]));

    // Nothing on the opaque side leaves the opaque marker in place.
    let mut m = mixed("cutout", glass.clone(), Node::new("emit", NodeKind::Emission));
    let e = export(&mut m, BakeTarget::Input("Color".into()));
    let mix = e.source.unwrap().node_id;
    assert_eq!(input_default(&m, &mix, "Color2").as_color(), OPAQUE_COLOR);

    let mut m = mixed("cutout", glass, body);
    let keep = IsolateOptions {
        exclude_transparent_colors: false,
    };
    let e = export_with(&mut m, BakeTarget::Input("Color".into()), keep);
    let mix = e.source.unwrap().node_id;
    let white = m.incoming(&mix, "Color1").unwrap().from.clone();
    assert!(approx(eval_output_color(&m, &white).unwrap(), WHITE));
}

#[test]
fn color_into_scalar_input_goes_through_bw() {
    let mut m = principled("rust", &[]);
    m.add_node(Node::new("tex", NodeKind::ImageTexture)).unwrap();
    m.connect(Endpoint::new("tex", "Color"), Endpoint::new("bsdf", "Metallic"));

    let e = export(&mut m, BakeTarget::Input("Metallic".into()));
    let src = e.source.unwrap();
    assert_eq!(src.socket, "Val");
    assert_eq!(m.node(&src.node_id).unwrap().kind, NodeKind::RgbToBw);
    assert_eq!(
        m.incoming(&src.node_id, "Color").unwrap().from,
        Endpoint::new("bake.tmp/tex", "Color")
    );
}

#[test]
fn alpha_reads_the_transparent_mix_factor() {
    let glass = Node::new("clear", NodeKind::TransparentBsdf);
    let body = Node::new("body", NodeKind::PrincipledBsdf);

    let mut m = mixed("cutout", glass.clone(), body.clone());
    let e = export(&mut m, BakeTarget::for_job("Alpha", None));
    assert_eq!(e.source.unwrap(), Endpoint::new("bake.tmp/fac", "Value"));

    // Transparent in the second slot: 1 - fac is the opacity.
    let mut m = mixed("cutout", body, glass);
    let e = export(&mut m, BakeTarget::for_job("Alpha", None));
    let src = e.source.unwrap();
    assert_eq!(m.node(&src.node_id).unwrap().kind, NodeKind::Invert);
    assert!(approx(eval_output_color(&m, &src).unwrap(), [0.7, 0.7, 0.7, 1.0]));
}

#[test]
fn scope_teardown_restores_every_touched_material() {
    let mut ao = mixed(
        "ao",
        Node::new("lit", NodeKind::PrincipledBsdf),
        Node::new("plain", NodeKind::PrincipledBsdf),
    );
    ao.add_node(Node::new("ao", NodeKind::AmbientOcclusion)).unwrap();
    ao.connect(Endpoint::new("ao", "Color"), Endpoint::new("lit", "Base Color"));
    let plain = principled("plain", &[("Metallic", SocketValue::Float(0.4))]);

    let mut s = scene(
        vec![object("a", &["ao"]), object("b", &["plain"])],
        vec![ao, plain],
    );
    let before = serde_json::to_value(&s.materials).unwrap();

    for target in [
        BakeTarget::AmbientOcclusion,
        BakeTarget::Input("Color".into()),
        BakeTarget::Glossiness,
        BakeTarget::MaterialId,
        BakeTarget::Normal,
    ] {
        let mut scope = ScratchScope::new(&mut s);
        for name in ["ao", "plain"] {
            let (g, groups) = scope.material_mut(name).unwrap();
            prepare_export(g, groups, &target, IsolateOptions::default(), "img").unwrap();
            assert!(g.count_tagged(TAG_SCRATCH) > 0);
        }
    }

    assert_eq!(serde_json::to_value(&s.materials).unwrap(), before);
}

#[test]
fn scope_teardown_runs_when_a_step_fails() {
    let mut s = scene(vec![object("a", &["plain"])], vec![principled("plain", &[])]);
    let before = serde_json::to_value(&s.materials).unwrap();

    let mut attempt = || -> anyhow::Result<()> {
        let mut scope = ScratchScope::new(&mut s);
        let (g, groups) = scope.material_mut("plain")?;
        prepare_export(g, groups, &BakeTarget::Glossiness, IsolateOptions::default(), "img")?;
        scope.material_mut("missing")?;
        Ok(())
    };
    assert!(attempt().is_err());

    assert_eq!(serde_json::to_value(&s.materials).unwrap(), before);
}

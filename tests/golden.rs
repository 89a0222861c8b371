//! Golden tests for the prompt kernel.
//!
//! These tests pin the parse shapes, compiled text and cache behavior of
//! the reference scenarios.

use prompt_kernel::{
    compile, display_value, parse, serialize, BracketType, CacheKey, CompileCache,
    CompileOptions, PresetMode, Segment, SegmentKind, SegmentUpdate, update_segment,
    MAX_BRACKET_LEVEL, WEIGHT_BASE,
};

// ─────────────────────────────────────────────────────────────────────────────
// Test Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn literal(segment: &Segment) -> String {
    compile(segment, &CompileOptions::literal())
}

fn weight_of(segment: &Segment) -> (BracketType, u8, f64) {
    match segment.kind() {
        SegmentKind::Weighted {
            bracket_type,
            bracket_level,
            display_value,
        } => (*bracket_type, *bracket_level, *display_value),
        other => panic!("expected weighted segment, got {:?}", other),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SCENARIO TESTS
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_scenario_weighted_between_text() {
    let tree = parse("a{b}c");
    let children = tree.children();
    assert_eq!(children.len(), 3);
    assert_eq!(children[0].text_content(), Some("a"));
    assert_eq!(weight_of(&children[1]).0, BracketType::Increase);
    assert_eq!(weight_of(&children[1]).1, 1);
    assert_eq!(children[1].children()[0].text_content(), Some("b"));
    assert_eq!(children[2].text_content(), Some("c"));
    assert_eq!(literal(&tree), "a{b}c");
}

#[test]
fn test_scenario_double_weight() {
    let tree = parse("{{kw}}");
    let (bracket_type, level, value) = weight_of(&tree);
    assert_eq!(bracket_type, BracketType::Increase);
    assert_eq!(level, 2);
    assert!((value - 1.1025).abs() < 1e-12);
    assert_eq!(tree.children().len(), 1);
    assert_eq!(tree.children()[0].text_content(), Some("kw"));
}

#[test]
fn test_scenario_random_preset() {
    let preset = Segment::preset(
        "style",
        PresetMode::Random,
        None,
        vec!["x".to_string(), "y".to_string()],
    )
    .unwrap();
    assert_eq!(literal(&preset), "!style");

    let expanded = compile(&preset, &CompileOptions::expanded(0));
    assert!(expanded == "x" || expanded == "y");
    assert_eq!(compile(&preset, &CompileOptions::expanded(0)), expanded);
}

#[test]
fn test_scenario_unterminated_recovery() {
    let tree = parse("{{abc");
    assert_eq!(tree.kind(), &SegmentKind::text("{{abc"));
    assert!(tree.children().is_empty());
}

#[test]
fn test_scenario_cache_set_get_invalidate() {
    let mut cache = CompileCache::default();
    let key = CacheKey::new("t1", false, 0);
    cache.set(key.clone(), "hello");
    assert_eq!(cache.get(&key).as_deref(), Some("hello"));
    cache.invalidate("t1");
    assert_eq!(cache.get(&key), None);
}

// ─────────────────────────────────────────────────────────────────────────────
// ROUND TRIP TESTS
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_round_trip_realistic_prompts() {
    let prompts = [
        "masterpiece, best quality, {{1girl}}, solo, [[lowres]]",
        "a photo of !subject in (a forest|a city|the desert), {dramatic lighting}",
        "{[nested] and {{deeper}} } tail",
        "(red|(dark|light) blue) eyes, !hair",
        "plain text with no structure at all",
        "",
    ];
    for prompt in prompts {
        assert_eq!(literal(&parse(prompt)), prompt, "prompt {:?}", prompt);
        assert_eq!(serialize(&parse(prompt)), prompt, "prompt {:?}", prompt);
    }
}

#[test]
fn test_serialize_round_trips_keywords() {
    let text = "{style:anime}, pose:standing !extra";
    let tree = parse(text);
    assert_eq!(serialize(&tree), text);
    assert_eq!(literal(&tree), "{anime}, standing !extra");
}

#[test]
fn test_deeply_nested_prompt_round_trips() {
    let depth = 10_000;
    let text = format!("{}{}", "{a".repeat(depth), "}b".repeat(depth));
    let tree = parse(&text);
    assert_eq!(literal(&tree), text);
    assert_eq!(serialize(&tree), text);

    let brackets = format!("{}x{}", "[".repeat(depth), "]".repeat(depth));
    assert_eq!(literal(&parse(&brackets)), brackets);
}

#[test]
fn test_malformed_inputs_round_trip() {
    for text in ["{a]", "}}x{{", "[a {b] c}", "((a|b)", "x ((y)) z", "{{{{"] {
        assert_eq!(literal(&parse(text)), text, "input {:?}", text);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// WEIGHT MATH TESTS
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_display_value_formula() {
    for level in 0..=MAX_BRACKET_LEVEL {
        let up = display_value(BracketType::Increase, level);
        let down = display_value(BracketType::Decrease, level);
        assert!((up - WEIGHT_BASE.powi(level as i32)).abs() < 1e-9);
        assert!((down - WEIGHT_BASE.powi(-(level as i32))).abs() < 1e-9);
    }
}

#[test]
fn test_level_clamped_after_update() {
    let seg = Segment::weighted(BracketType::Increase, 1, vec![Segment::text("x")]);
    let high = update_segment(&seg, SegmentUpdate::new().bracket_level(500)).unwrap();
    assert_eq!(weight_of(&high).1, MAX_BRACKET_LEVEL);
    let low = update_segment(&seg, SegmentUpdate::new().bracket_level(-4)).unwrap();
    assert_eq!(weight_of(&low).1, 0);
    assert_eq!(literal(&low), "x");
}

// ─────────────────────────────────────────────────────────────────────────────
// DETERMINISM TESTS
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_expansion_identical_for_seed() {
    let tree = parse("(a|b|c) (d|e|f) (g|h|i) (j|k|l) (m|n|o)");
    let first = compile(&tree, &CompileOptions::expanded(1234));
    for _ in 0..20 {
        assert_eq!(compile(&tree, &CompileOptions::expanded(1234)), first);
    }
}

#[test]
fn test_expansion_varies_across_seeds() {
    let tree = parse("(a|b|c|d) (e|f|g|h) (i|j|k|l) (m|n|o|p)");
    let outputs: std::collections::BTreeSet<String> = (0..20)
        .map(|seed| compile(&tree, &CompileOptions::expanded(seed * 7919)))
        .collect();
    assert!(outputs.len() > 1);
}

#[test]
fn test_missing_selection_marker_names_preset() {
    let tree = Segment::group(vec![
        Segment::text("portrait, "),
        Segment::preset("pose", PresetMode::Fixed, None, vec![]).unwrap(),
    ]);
    let text = literal(&tree);
    assert!(text.starts_with("portrait, [ERROR:"));
    assert!(text.contains("\"pose\""));
    assert!(tree.ensure_compilable().is_err());
}

//! Metadata analysis tests: parameters, hashing, config round-trips, and
//! structural parity with the compile pass.
#![expect(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]

use std::collections::BTreeSet;
use std::collections::HashMap;

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use weft::{
    read_metadata, set_config, Config, Document, ErrorCode, MetadataOptions, RenderError, Value,
};

fn names(parameters: &BTreeSet<String>) -> Vec<&str> {
    parameters.iter().map(String::as_str).collect()
}

fn codes(metadata: &weft::Metadata) -> Vec<ErrorCode> {
    metadata.errors.iter().map(|e| e.code).collect()
}

struct MapResolver(HashMap<String, String>);

impl weft::ReferenceResolver for MapResolver {
    fn resolve(&self, path: &str, _from: Option<&str>) -> Option<Document> {
        self.0.get(path).map(|content| Document {
            path: path.to_string(),
            content: content.clone(),
        })
    }
}

fn resolver(entries: &[(&str, &str)]) -> MapResolver {
    MapResolver(
        entries
            .iter()
            .map(|(path, content)| ((*path).to_string(), (*content).to_string()))
            .collect(),
    )
}

// Parameters

#[test]
fn undefined_reads_become_parameters() {
    let metadata = read_metadata(
        "{{ a }} {{ b.c }} {{#if d}}{{ e }}{{/if}}",
        &MetadataOptions::default(),
    );
    assert_eq!(names(&metadata.parameters), vec!["a", "b", "d", "e"]);
    assert!(metadata.errors.is_empty());
}

#[test]
fn assignments_and_bindings_define_names() {
    let metadata = read_metadata(
        "{{ x = 1 }}{{ x }}{{#for item, i in [1] }}{{ item }}{{ i }}{{/for}}<step as=reply/>{{ reply }}",
        &MetadataOptions::default(),
    );
    assert!(names(&metadata.parameters).is_empty(), "{metadata:?}");
}

#[test]
fn host_function_reads_are_parameters() {
    let metadata = read_metadata("{{ lookup(city) }}", &MetadataOptions::default());
    assert_eq!(names(&metadata.parameters), vec!["city", "lookup"]);
}

#[test]
fn predeclared_names_are_excluded() {
    let options = MetadataOptions {
        predeclared_parameters: ["city".to_string()].into_iter().collect(),
        ..Default::default()
    };
    let metadata = read_metadata("{{ city }} {{ country }}", &options);
    assert_eq!(names(&metadata.parameters), vec!["country"]);
}

#[test]
fn scope_rules_mirror_execution() {
    // A name defined inside a block is not defined after it.
    let metadata = read_metadata(
        "{{#if c}}{{ inner = 1 }}{{/if}}{{ inner }}",
        &MetadataOptions::default(),
    );
    assert_eq!(names(&metadata.parameters), vec!["c", "inner"]);
}

// Hashing

#[test]
fn identical_sources_hash_identically() {
    let options = MetadataOptions::default();
    let a = read_metadata("<user>{{ q }}</user>", &options);
    let b = read_metadata("<user>{{ q }}</user>", &options);
    assert_eq!(a.hash, b.hash);

    let c = read_metadata("<user>{{ q }}!</user>", &options);
    assert_ne!(a.hash, c.hash);
}

#[test]
fn referenced_changes_propagate_through_two_levels() {
    let base = resolver(&[
        ("mid", "middle <include path=\"leaf\"/>"),
        ("leaf", "leaf v1"),
    ]);
    let changed = resolver(&[
        ("mid", "middle <include path=\"leaf\"/>"),
        ("leaf", "leaf v2"),
    ]);
    let source = "top <include path=\"mid\"/>";

    let before = read_metadata(
        source,
        &MetadataOptions {
            resolver: Some(&base),
            ..Default::default()
        },
    );
    let after = read_metadata(
        source,
        &MetadataOptions {
            resolver: Some(&changed),
            ..Default::default()
        },
    );
    assert!(before.errors.is_empty(), "{before:?}");
    // Only a grand-child changed, yet the root hash moved.
    assert_ne!(before.hash, after.hash);
}

// References

#[test]
fn referenced_parameters_must_be_supplied() {
    let refs = resolver(&[("greeting", "Hello {{ name }}!")]);
    let options = MetadataOptions {
        resolver: Some(&refs),
        ..Default::default()
    };

    let missing = read_metadata("<include path=\"greeting\"/>", &options);
    assert_eq!(codes(&missing), vec![ErrorCode::ReferenceMissingParameter]);

    let supplied = read_metadata("<include path=\"greeting\" name=\"Ada\"/>", &options);
    assert!(supplied.errors.is_empty());
}

#[test]
fn unresolvable_references_are_reported() {
    let refs = resolver(&[]);
    let options = MetadataOptions {
        resolver: Some(&refs),
        ..Default::default()
    };
    let metadata = read_metadata("<include path=\"ghost\"/>", &options);
    assert_eq!(codes(&metadata), vec![ErrorCode::ReferenceNotFound]);
}

#[test]
fn reference_cycles_are_detected() {
    let refs = resolver(&[
        ("a", "<include path=\"b\"/>"),
        ("b", "<include path=\"a\"/>"),
    ]);
    let options = MetadataOptions {
        resolver: Some(&refs),
        ..Default::default()
    };
    let metadata = read_metadata("<include path=\"a\"/>", &options);
    assert!(codes(&metadata).contains(&ErrorCode::CircularReference));
}

#[test]
fn reference_depth_is_bounded() {
    let deep = |path: &str, _from: Option<&str>| -> Option<Document> {
        let level: usize = path.trim_start_matches("deep").parse().ok()?;
        Some(Document {
            path: path.to_string(),
            content: format!("<include path=\"deep{}\"/>", level + 1),
        })
    };
    let options = MetadataOptions {
        resolver: Some(&deep),
        ..Default::default()
    };
    let metadata = read_metadata("<include path=\"deep0\"/>", &options);
    assert!(codes(&metadata).contains(&ErrorCode::ReferenceDepthLimit));
}

#[test]
fn errors_inside_references_are_wrapped() {
    let refs = resolver(&[("broken", "<message>no role</message>")]);
    let options = MetadataOptions {
        resolver: Some(&refs),
        ..Default::default()
    };
    let metadata = read_metadata("<include path=\"broken\"/>", &options);
    assert_eq!(codes(&metadata), vec![ErrorCode::ReferenceError]);
    assert!(metadata.errors[0].message.contains("broken"));
}

// Config

#[test]
fn config_round_trip_removes_and_inserts() {
    let with_block = "---\nmodel: m\n---\nbody";
    let removed = set_config(with_block, &Config::new());
    assert_eq!(removed, "body");

    let config: Config = [
        ("model".to_string(), Value::string("m2")),
        ("temperature".to_string(), Value::Number(1.0)),
    ]
    .into_iter()
    .collect();
    let inserted = set_config("body", &config);
    let metadata = read_metadata(&inserted, &MetadataOptions::default());
    assert_eq!(metadata.config, config);
    assert!(inserted.ends_with("body"));
}

#[test]
fn replacing_an_existing_block_preserves_the_body() {
    let source = "---\nmodel: old\n---\n<user>hi</user>";
    let config: Config = [("model".to_string(), Value::string("new"))]
        .into_iter()
        .collect();
    let updated = set_config(source, &config);
    assert_eq!(updated, "---\nmodel: new\n---\n<user>hi</user>");
}

#[test]
fn config_validator_failures_are_collected() {
    let validator = |config: &Config| -> Result<(), String> {
        if config.get("model").is_none() {
            Err("'model' is required".to_string())
        } else {
            Ok(())
        }
    };
    let options = MetadataOptions {
        config_validator: Some(&validator),
        ..Default::default()
    };

    let invalid = read_metadata("---\ntemperature: 1\n---\nx", &options);
    assert_eq!(codes(&invalid), vec![ErrorCode::InvalidConfig]);

    let absent = read_metadata("no config here", &options);
    assert_eq!(codes(&absent), vec![ErrorCode::ConfigNotFound]);
}

#[test]
fn duplicate_and_misplaced_configs_are_reported() {
    let duplicate = read_metadata("---\na: 1\n---\n---\nb: 2\n---\n", &MetadataOptions::default());
    assert_eq!(codes(&duplicate), vec![ErrorCode::ConfigAlreadyDeclared]);

    let late = read_metadata("text first\n---\na: 1\n---\n", &MetadataOptions::default());
    assert_eq!(codes(&late), vec![ErrorCode::InvalidConfigPlacement]);
}

// Parity with the compile pass

#[test]
fn structural_errors_match_render_codes() {
    let cases: &[(&str, ErrorCode)] = &[
        (
            "<user><system>x</system></user>",
            ErrorCode::MessageTagInsideMessage,
        ),
        (
            "<user><text><text>x</text></text></user>",
            ErrorCode::ContentTagInsideContent,
        ),
        ("<message>x</message>", ErrorCode::MessageTagWithoutRole),
        (
            "<message role=\"owl\">x</message>",
            ErrorCode::InvalidMessageRole,
        ),
        (
            "<assistant><tool-call name=\"f\"/></assistant>",
            ErrorCode::ToolCallTagWithoutId,
        ),
        (
            "<assistant><tool-call id=\"1\"/></assistant>",
            ErrorCode::ToolCallWithoutName,
        ),
        ("<tool>r</tool>", ErrorCode::ToolMessageWithoutId),
        (
            "<user><tool-call id=\"1\" name=\"f\"/></user>",
            ErrorCode::InvalidToolCallPlacement,
        ),
        ("<step><step/></step>", ErrorCode::StepTagInsideStep),
        ("<include path=\"x\"/>", ErrorCode::DidNotResolveReferences),
        ("<blink>x</blink>", ErrorCode::UnknownTag),
        ("<step as={{ x }}/>", ErrorCode::InvalidStaticAttribute),
        (
            "<user>\n---\na: 1\n---\n</user>",
            ErrorCode::ConfigOutsideRoot,
        ),
        (
            "<content type=\"wat\">x</content>",
            ErrorCode::ContentTagWithoutType,
        ),
        (
            "{{ el = 1 }}{{#for el in [1]}}x{{/for}}",
            ErrorCode::VariableAlreadyDeclared,
        ),
    ];

    for (source, expected) in cases {
        let prompt = weft::parse(source).unwrap();
        let render_err = weft::render(&prompt, []).unwrap_err();
        let RenderError::Compile(diagnostic) = render_err else {
            panic!("render of {source:?} did not fail with a compile error");
        };
        assert_eq!(diagnostic.code, *expected, "render code for {source:?}");

        let metadata = read_metadata(source, &MetadataOptions::default());
        assert!(
            codes(&metadata).contains(expected),
            "metadata for {source:?} missing {expected:?}, got {:?}",
            codes(&metadata)
        );
    }
}

#[test]
fn parse_errors_are_collected_not_thrown() {
    let metadata = read_metadata("{{ a +", &MetadataOptions::default());
    assert_eq!(codes(&metadata), vec![ErrorCode::ParseError]);
    assert!(!metadata.hash.is_empty());
}

// Properties

proptest! {
    #[test]
    fn hashing_is_deterministic(source in ".{0,120}") {
        let options = MetadataOptions::default();
        let first = read_metadata(&source, &options);
        let second = read_metadata(&source, &options);
        prop_assert_eq!(&first.hash, &second.hash);

        let extended = format!("{source}#");
        let third = read_metadata(&extended, &options);
        prop_assert_ne!(&first.hash, &third.hash);
    }

    #[test]
    fn analysis_never_panics(source in ".{0,200}") {
        let _ = read_metadata(&source, &MetadataOptions::default());
    }
}

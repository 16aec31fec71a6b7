//! End-to-end rendering tests.
#![expect(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]

use pretty_assertions::assert_eq;
use weft::{ContentItem, ErrorCode, MessageRole, RenderError, Value};

fn params(entries: &[(&str, Value)]) -> Vec<(String, Value)> {
    entries
        .iter()
        .map(|(name, value)| ((*name).to_string(), value.clone()))
        .collect()
}

#[test]
fn renders_a_full_document() {
    let source = "\
---
model: test-model
temperature: 0.2
---
<system>
  You are {{ persona }}.
</system>
<user>
  {{ question }}
</user>
<assistant>
  <text>Let me check.</text>
  <tool-call id=\"call-1\" name=\"lookup\" arguments={{ {q: question} }}/>
</assistant>";

    let prompt = weft::parse(source).unwrap();
    let conversation = weft::render(
        &prompt,
        params(&[
            ("persona", Value::string("a helpful assistant")),
            ("question", Value::string("what is weft?")),
        ]),
    )
    .unwrap();

    assert_eq!(
        conversation.config.get("model"),
        Some(&Value::string("test-model"))
    );
    assert_eq!(conversation.messages.len(), 3);
    assert_eq!(conversation.messages[0].role, MessageRole::System);
    assert_eq!(
        conversation.messages[0].joined_text(),
        "You are a helpful assistant."
    );
    assert_eq!(conversation.messages[1].joined_text(), "what is weft?");

    let assistant = &conversation.messages[2];
    assert_eq!(assistant.role, MessageRole::Assistant);
    assert_eq!(assistant.content[0], ContentItem::text("Let me check."));
    let ContentItem::ToolCall { id, name, arguments } = &assistant.content[1] else {
        panic!("expected a tool call");
    };
    assert_eq!(id, "call-1");
    assert_eq!(name, "lookup");
    assert_eq!(arguments["q"], serde_json::json!("what is weft?"));
}

#[test]
fn missing_parameter_fails_with_span() {
    let prompt = weft::parse("hello {{ who }}").unwrap();
    let err = weft::render(&prompt, []).unwrap_err();
    let RenderError::Compile(diagnostic) = err else {
        panic!("expected a compile error");
    };
    assert_eq!(diagnostic.code, ErrorCode::VariableNotDeclared);
    assert_eq!(diagnostic.span.start, 9);
    assert_eq!(diagnostic.span.end, 12);
}

#[test]
fn multi_step_prompts_require_a_chain() {
    let prompt = weft::parse("think<step/>").unwrap();
    let err = weft::render(&prompt, []).unwrap_err();
    assert!(matches!(err, RenderError::MultipleSteps));
    assert_eq!(
        err.to_string(),
        "Use a Chain to render prompts with multiple steps"
    );
}

#[test]
fn conversations_serialize_for_transport() {
    let prompt = weft::parse("<user>ping</user>").unwrap();
    let conversation = weft::render(&prompt, []).unwrap();
    let json = serde_json::to_value(&conversation).unwrap();
    assert_eq!(json["messages"][0]["role"], "user");
    assert_eq!(json["messages"][0]["content"][0]["type"], "text");
    assert_eq!(json["messages"][0]["content"][0]["text"], "ping");
}

#[test]
fn control_flow_composes_with_messages() {
    let source = "\
<user>
  {{#for item, i in items}}{{ i }}: {{ item }}
  {{:else}}nothing to list{{/for}}
</user>";
    let prompt = weft::parse(source).unwrap();

    let listed = weft::render(
        &prompt,
        params(&[(
            "items",
            Value::Array(vec![Value::string("alpha"), Value::string("beta")]),
        )]),
    )
    .unwrap();
    assert_eq!(listed.messages[0].joined_text(), "0: alpha\n1: beta");

    let empty = weft::render(&prompt, params(&[("items", Value::Array(vec![]))])).unwrap();
    assert_eq!(empty.messages[0].joined_text(), "nothing to list");
}
